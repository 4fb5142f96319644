/// Contains the posterior genotype distribution type produced per site
pub mod genotyping_result;
/// Contains the packed k-mer identity type shared with the k-mer producer
pub mod kmer;
/// Contains the per-site path/allele/k-mer bookkeeping consumed by the HMM
pub mod site_summary;

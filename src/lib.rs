
/// Merges likelihoods from HMM runs over disjoint path subsets and applies the final normalization
pub mod aggregator;
/// Canonical enumeration of the ordered path pairs forming the hidden states at a site
pub mod column_indexer;
/// Contains multiple wrappers for useful data types in panphase
pub mod data_types;
/// Scores the likelihood of a path pair's alleles given the observed k-mer read counts
pub mod emission;
/// Organizes the primary genotyping workflow: one HMM instance per path subset, run in parallel and merged into the final per-site results
pub mod genotyper;
/// The genotyping HMM itself: forward, backward, and Viterbi passes over the site sequence
pub mod hmm;
/// Precomputed Poisson/background emission kernel shared by all HMM instances
pub mod probability_table;
/// Li-Stephens recombination transition model between adjacent sites
pub mod transitions;
/// Contains all the various output writer functionality
pub mod writers;

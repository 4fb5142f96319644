
use crate::data_types::site_summary::SiteSummary;
use crate::probability_table::ProbabilityTable;

use log::trace;

/// Scores the emission likelihood of an ordered path pair at one site.
///
/// The score for a pair of alleles is the product over all unique k-mers of the kernel term
/// for the k-mer's copy number on that allele pair and its observed read count. Since both
/// components of a state map to alleles, the products are computed once per unordered allele
/// pair and shared by every path pair mapping to it.
///
/// Accumulation happens in log space and the site is rescaled by its largest log term before
/// exponentiating: with 64-bit floats a few hundred k-mer terms can otherwise underflow to
/// an all-zero column. The per-site constant factor is invisible downstream because every
/// HMM column is rescaled by its own sum anyway.
#[derive(Debug)]
pub struct EmissionProbabilityComputer {
    nr_alleles: usize,
    /// Linear emission value per ordered allele pair, row-major by the first allele
    probabilities: Vec<f64>
}

impl EmissionProbabilityComputer {
    /// Precomputes the emission values for every allele pair at one site.
    /// Pairs involving an undefined allele score 0. A site without any k-mers scores every
    /// defined pair equally, leaving the genotype to the transition model.
    /// # Arguments
    /// * `summary` - the site to score
    /// * `probabilities` - the shared emission kernel lookup
    pub fn new(summary: &SiteSummary, probabilities: &ProbabilityTable) -> EmissionProbabilityComputer {
        let nr_alleles = summary.nr_alleles();
        let kernel = probabilities.at_coverage(summary.coverage());

        let mut log_probabilities: Vec<f64> = vec![f64::NEG_INFINITY; nr_alleles * nr_alleles];
        for allele1 in 0..nr_alleles {
            if summary.is_undefined_allele(allele1 as u8) {
                continue;
            }
            for allele2 in allele1..nr_alleles {
                if summary.is_undefined_allele(allele2 as u8) {
                    continue;
                }

                let mut log_prob: f64 = 0.0;
                for kmer_index in 0..summary.nr_kmers() {
                    let copies: u8 = summary.kmer_on_allele(kmer_index, allele1 as u8) as u8
                        + summary.kmer_on_allele(kmer_index, allele2 as u8) as u8;
                    let readcount = summary.readcount_of(kmer_index).unwrap();
                    let term = kernel.get(copies, readcount);
                    if term <= 0.0 {
                        log_prob = f64::NEG_INFINITY;
                        break;
                    }
                    log_prob += term.ln();
                }

                log_probabilities[allele1 * nr_alleles + allele2] = log_prob;
                log_probabilities[allele2 * nr_alleles + allele1] = log_prob;
            }
        }

        // rescale by the site maximum so at least one defined pair stays representable
        let max_log = log_probabilities.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let probabilities: Vec<f64> = if max_log.is_finite() {
            log_probabilities.iter()
                .map(|&lp| if lp.is_finite() { (lp - max_log).exp() } else { 0.0 })
                .collect()
        } else {
            trace!(
                "all allele pairs at position {} have zero emission mass",
                summary.variant_position()
            );
            vec![0.0; nr_alleles * nr_alleles]
        };

        EmissionProbabilityComputer {
            nr_alleles,
            probabilities
        }
    }

    /// Returns the linear emission value for the ordered allele pair.
    pub fn emission_probability(&self, allele1: u8, allele2: u8) -> f64 {
        self.probabilities[allele1 as usize * self.nr_alleles + allele2 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::site_summary::SiteSummary;

    fn test_table() -> ProbabilityTable {
        ProbabilityTable::new(0, 50, 200, 0.0)
    }

    /// two paths, two alleles, one k-mer marking allele 1 with full haploid support
    fn het_summary() -> SiteSummary {
        let mut summary = SiteSummary::new(1000, vec![0, 1]).unwrap();
        summary.set_coverage(20);
        summary.insert_kmer(20, &[1]).unwrap();
        summary
    }

    #[test]
    fn test_heterozygous_signal() {
        let table = test_table();
        let computer = EmissionProbabilityComputer::new(&het_summary(), &table);
        let het = computer.emission_probability(0, 1);
        let hom_marked = computer.emission_probability(1, 1);
        let hom_other = computer.emission_probability(0, 0);
        // a count matching the haploid coverage favors exactly one copy
        assert!(het > hom_marked * 10.0);
        assert!(het > hom_other * 1000.0);
    }

    #[test]
    fn test_symmetry() {
        let table = test_table();
        let mut summary = SiteSummary::new(1000, vec![0, 1, 2]).unwrap();
        summary.set_coverage(20);
        summary.insert_kmer(18, &[1]).unwrap();
        summary.insert_kmer(3, &[0, 2]).unwrap();
        summary.insert_kmer(25, &[2]).unwrap();
        let computer = EmissionProbabilityComputer::new(&summary, &table);
        for a1 in 0..3u8 {
            for a2 in 0..3u8 {
                assert_eq!(
                    computer.emission_probability(a1, a2),
                    computer.emission_probability(a2, a1)
                );
            }
        }
    }

    #[test]
    fn test_undefined_allele_scores_zero() {
        let table = test_table();
        let mut summary = SiteSummary::new(1000, vec![0, 1, 2]).unwrap();
        summary.set_coverage(20);
        summary.insert_kmer(20, &[1]).unwrap();
        summary.set_undefined_allele(2).unwrap();
        let computer = EmissionProbabilityComputer::new(&summary, &table);
        assert_eq!(computer.emission_probability(0, 2), 0.0);
        assert_eq!(computer.emission_probability(2, 0), 0.0);
        assert_eq!(computer.emission_probability(2, 2), 0.0);
        assert!(computer.emission_probability(0, 1) > 0.0);
    }

    #[test]
    fn test_no_kmers_is_uniform() {
        let table = test_table();
        let mut summary = SiteSummary::new(1000, vec![0, 1]).unwrap();
        summary.set_coverage(20);
        let computer = EmissionProbabilityComputer::new(&summary, &table);
        let reference = computer.emission_probability(0, 0);
        assert!(reference > 0.0);
        for a1 in 0..2u8 {
            for a2 in 0..2u8 {
                assert_eq!(computer.emission_probability(a1, a2), reference);
            }
        }
    }

    #[test]
    fn test_all_undefined_scores_zero() {
        let table = test_table();
        let mut summary = SiteSummary::new(1000, vec![0, 1]).unwrap();
        summary.set_undefined_allele(0).unwrap();
        summary.set_undefined_allele(1).unwrap();
        let computer = EmissionProbabilityComputer::new(&summary, &table);
        for a1 in 0..2u8 {
            for a2 in 0..2u8 {
                assert_eq!(computer.emission_probability(a1, a2), 0.0);
            }
        }
    }

    #[test]
    fn test_many_kmers_stay_representable() {
        let table = test_table();
        let mut summary = SiteSummary::new(1000, vec![0, 1]).unwrap();
        summary.set_coverage(20);
        // far beyond the point where a linear product of small terms underflows
        for i in 0..800 {
            summary.insert_kmer(if i % 2 == 0 { 22 } else { 17 }, &[(i % 2) as u8]).unwrap();
        }
        let computer = EmissionProbabilityComputer::new(&summary, &table);
        let het = computer.emission_probability(0, 1);
        assert!(het.is_finite());
        assert!(het > 0.0);
        // the het pair explains the alternating one-copy counts best
        assert!(het >= computer.emission_probability(0, 0));
        assert!(het >= computer.emission_probability(1, 1));
    }
}

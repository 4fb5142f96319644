
use crate::data_types::genotyping_result::GenotypingResult;

use log::debug;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("cannot combine results over {other} sites into an aggregate over {expected} sites")]
    LengthMismatch { expected: usize, other: usize },
    #[error("site {index} positions disagree: {expected} vs {other}")]
    PositionMismatch { index: usize, expected: u64, other: u64 }
}

/// Combines the per-site likelihoods of several HMM runs over disjoint path subsets into a
/// single result sequence, then applies the final normalization.
///
/// Combination is plain addition per unordered allele pair, so it is commutative and
/// associative and runs can be merged in whatever order they finish. Viterbi haplotypes are
/// appended, keeping one phasing hypothesis per contributing run.
pub struct ResultAggregator {
    results: Vec<GenotypingResult>
}

impl ResultAggregator {
    /// Starts an aggregate from the results of a first run.
    pub fn new(results: Vec<GenotypingResult>) -> ResultAggregator {
        ResultAggregator { results }
    }

    pub fn nr_sites(&self) -> usize {
        self.results.len()
    }

    /// Adds another run's likelihoods into the aggregate, site by site. No normalization.
    /// # Arguments
    /// * `other` - results of a run over the same site sequence
    /// # Errors
    /// * if the site counts or any variant position disagree
    pub fn combine_likelihoods(&mut self, other: &[GenotypingResult]) -> Result<(), AggregateError> {
        if other.len() != self.results.len() {
            return Err(AggregateError::LengthMismatch {
                expected: self.results.len(),
                other: other.len()
            });
        }
        for (index, (mine, theirs)) in self.results.iter_mut().zip(other.iter()).enumerate() {
            if mine.variant_position() != theirs.variant_position() {
                return Err(AggregateError::PositionMismatch {
                    index,
                    expected: mine.variant_position(),
                    other: theirs.variant_position()
                });
            }
            mine.combine(theirs);
        }
        Ok(())
    }

    /// Normalizes every site's distribution to sum to 1. Sites with zero total mass are left
    /// as-is and tagged uninformative. Returns the number of uninformative sites.
    pub fn normalize(&mut self) -> usize {
        let mut uninformative = 0;
        for result in self.results.iter_mut() {
            if !result.normalize() {
                uninformative += 1;
            }
        }
        if uninformative > 0 {
            debug!("{} of {} sites are uninformative", uninformative, self.results.len());
        }
        uninformative
    }

    pub fn results(&self) -> &[GenotypingResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<GenotypingResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(position: u64, entries: &[((u8, u8), f64)]) -> GenotypingResult {
        let mut result = GenotypingResult::new(position);
        for &((a0, a1), value) in entries.iter() {
            result.add_to_likelihood(a0, a1, value);
        }
        result
    }

    #[test]
    fn test_combine_and_normalize() {
        // {a0,a1}=0.6/{a0,a0}=0.4 plus {a0,a1}=0.2/{a1,a1}=0.8 normalizes to 0.4/0.2/0.4
        let first = vec![result_with(100, &[((0, 1), 0.6), ((0, 0), 0.4)])];
        let second = vec![result_with(100, &[((0, 1), 0.2), ((1, 1), 0.8)])];

        let mut aggregator = ResultAggregator::new(first);
        aggregator.combine_likelihoods(&second).unwrap();
        let uninformative = aggregator.normalize();
        assert_eq!(uninformative, 0);

        let result = &aggregator.results()[0];
        assert!((result.get_genotype_likelihood(0, 1) - 0.4).abs() < 1e-9);
        assert!((result.get_genotype_likelihood(0, 0) - 0.2).abs() < 1e-9);
        assert!((result.get_genotype_likelihood(1, 1) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_combination_is_commutative() {
        let a = vec![result_with(100, &[((0, 1), 0.25), ((1, 1), 0.5)])];
        let b = vec![result_with(100, &[((0, 0), 0.125), ((0, 1), 0.375)])];

        let mut ab = ResultAggregator::new(a.clone());
        ab.combine_likelihoods(&b).unwrap();
        let mut ba = ResultAggregator::new(b);
        ba.combine_likelihoods(&a).unwrap();

        for (left, right) in ab.results().iter().zip(ba.results().iter()) {
            assert_eq!(left.genotype_likelihoods(), right.genotype_likelihoods());
        }
    }

    #[test]
    fn test_zero_sites_stay_untouched() {
        let results = vec![
            result_with(100, &[((0, 1), 1.5)]),
            result_with(200, &[]),
        ];
        let mut aggregator = ResultAggregator::new(results);
        assert_eq!(aggregator.normalize(), 1);
        assert!(!aggregator.results()[0].is_uninformative());
        assert!((aggregator.results()[0].get_genotype_likelihood(0, 1) - 1.0).abs() < 1e-9);
        assert!(aggregator.results()[1].is_uninformative());
        assert_eq!(aggregator.results()[1].nr_entries(), 0);
    }

    #[test]
    fn test_mismatch_errors() {
        let mut aggregator = ResultAggregator::new(vec![result_with(100, &[])]);
        assert_eq!(
            aggregator.combine_likelihoods(&[]).unwrap_err(),
            AggregateError::LengthMismatch { expected: 1, other: 0 }
        );
        assert_eq!(
            aggregator
                .combine_likelihoods(&[result_with(150, &[])])
                .unwrap_err(),
            AggregateError::PositionMismatch { index: 0, expected: 100, other: 150 }
        );
    }

    #[test]
    fn test_haplotypes_are_appended() {
        let mut first = result_with(100, &[((0, 1), 1.0)]);
        first.push_haplotype((0, 1));
        let mut second = result_with(100, &[((0, 1), 1.0)]);
        second.push_haplotype((2, 2));

        let mut aggregator = ResultAggregator::new(vec![first]);
        aggregator.combine_likelihoods(&[second]).unwrap();
        assert_eq!(aggregator.results()[0].haplotypes(), &[(0, 1), (2, 2)]);
    }
}

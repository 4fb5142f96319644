
use statrs::distribution::{Discrete, Poisson};

/// The copy-number states the emission kernel distinguishes: a k-mer can sit on zero, one,
/// or both haplotypes of a path pair.
pub const NR_COPY_STATES: usize = 3;

/// Precomputed emission-kernel lookup: maps (local coverage, expected copy number, observed
/// read count) to an emission probability component.
///
/// One copy of a k-mer is expected to attract reads at the haploid coverage, two copies at
/// twice that; k-mers absent from both haplotypes are modeled by a geometrically decaying
/// sequencing-error background. The table is built once per run over the coverage range the
/// sites actually use and shared read-only across all HMM instances.
#[derive(Debug)]
pub struct ProbabilityTable {
    cov_from: u16,
    cov_to: u16,
    max_count: u16,
    /// probabilities[coverage - cov_from][copies][count]
    probabilities: Vec<[Vec<f64>; NR_COPY_STATES]>
}

/// A view of the table bound to one coverage value.
pub struct CoverageProbabilities<'a> {
    rows: &'a [Vec<f64>; NR_COPY_STATES],
    max_count: u16
}

/// Poisson probability of observing `count` reads at mean `mean`.
/// A zero mean degenerates to a point mass at count 0.
fn poisson_pmf(mean: f64, count: u16) -> f64 {
    if mean <= 0.0 {
        return if count == 0 { 1.0 } else { 0.0 };
    }
    let pd = Poisson::new(mean).unwrap();
    pd.pmf(count as u64)
}

/// Geometric background probability of observing `count` reads of an error k-mer.
/// The success parameter is chosen so the background mean is 5% of the haploid coverage.
fn background_pmf(coverage: u16, count: u16) -> f64 {
    let p: f64 = 1.0 / (1.0 + 0.05 * coverage as f64);
    p * (1.0 - p).powi(count as i32)
}

impl ProbabilityTable {
    /// Builds the lookup for every coverage in `[cov_from, cov_to]` and every observed count
    /// in `[0, max_count]`.
    /// # Arguments
    /// * `cov_from` - lowest haploid coverage to precompute
    /// * `cov_to` - highest haploid coverage to precompute, must be >= `cov_from`
    /// * `max_count` - largest observed read count; larger counts saturate to this value
    /// * `regularization` - constant added to every entry to keep it away from exact zero
    /// # Panics
    /// * if `cov_to < cov_from`
    pub fn new(cov_from: u16, cov_to: u16, max_count: u16, regularization: f64) -> ProbabilityTable {
        assert!(cov_to >= cov_from);
        let mut probabilities: Vec<[Vec<f64>; NR_COPY_STATES]> = vec![];
        for coverage in cov_from..=cov_to {
            let mut rows: [Vec<f64>; NR_COPY_STATES] = Default::default();
            for count in 0..=max_count {
                rows[0].push(background_pmf(coverage, count) + regularization);
                rows[1].push(poisson_pmf(coverage as f64, count) + regularization);
                rows[2].push(poisson_pmf(2.0 * coverage as f64, count) + regularization);
            }
            probabilities.push(rows);
        }
        ProbabilityTable {
            cov_from,
            cov_to,
            max_count,
            probabilities
        }
    }

    /// Looks up the emission component for the given coverage, copy number, and count.
    /// The coverage is clamped into the built range and the count saturates at the table
    /// maximum.
    /// # Panics
    /// * if `copies > 2`
    pub fn get(&self, coverage: u16, copies: u8, count: u16) -> f64 {
        assert!((copies as usize) < NR_COPY_STATES);
        let coverage = coverage.clamp(self.cov_from, self.cov_to);
        let count = count.min(self.max_count);
        self.probabilities[(coverage - self.cov_from) as usize][copies as usize][count as usize]
    }

    /// Returns a view bound to one coverage value, clamped into the built range.
    pub fn at_coverage(&self, coverage: u16) -> CoverageProbabilities<'_> {
        let coverage = coverage.clamp(self.cov_from, self.cov_to);
        CoverageProbabilities {
            rows: &self.probabilities[(coverage - self.cov_from) as usize],
            max_count: self.max_count
        }
    }
}

impl<'a> CoverageProbabilities<'a> {
    /// Looks up the emission component for (copies, count) at the bound coverage.
    /// # Panics
    /// * if `copies > 2`
    pub fn get(&self, copies: u8, count: u16) -> f64 {
        assert!((copies as usize) < NR_COPY_STATES);
        let count = count.min(self.max_count);
        self.rows[copies as usize][count as usize]
    }
}

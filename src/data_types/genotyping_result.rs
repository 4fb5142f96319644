
use rustc_hash::FxHashMap as HashMap;

/// The posterior genotype distribution computed for a single variant site: a map from
/// unordered allele pairs to (possibly unnormalized) probability mass, plus any most-likely
/// haplotype path assignments produced by Viterbi runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenotypingResult {
    /// 0-based genomic coordinate of the site this result belongs to
    variant_position: u64,
    /// Posterior mass per unordered allele pair, keyed by (low, high)
    likelihoods: HashMap<(u8, u8), f64>,
    /// Most-likely haplotype path pairs, one per Viterbi run that contributed here
    haplotypes: Vec<(u16, u16)>,
    /// Set when this site carried no usable signal (all emissions zero, or never reached)
    uninformative: bool
}

impl GenotypingResult {
    pub fn new(variant_position: u64) -> GenotypingResult {
        GenotypingResult {
            variant_position,
            ..Default::default()
        }
    }

    pub fn variant_position(&self) -> u64 {
        self.variant_position
    }

    /// Adds posterior mass to the unordered pair {allele0, allele1}.
    /// The key is stored sorted, so `(a, b)` and `(b, a)` accumulate into the same entry.
    pub fn add_to_likelihood(&mut self, allele0: u8, allele1: u8, value: f64) {
        let key = if allele0 <= allele1 { (allele0, allele1) } else { (allele1, allele0) };
        *self.likelihoods.entry(key).or_insert(0.0) += value;
    }

    /// Returns the mass currently assigned to the unordered pair {allele0, allele1}.
    /// Pairs that never received mass return 0.
    pub fn get_genotype_likelihood(&self, allele0: u8, allele1: u8) -> f64 {
        let key = if allele0 <= allele1 { (allele0, allele1) } else { (allele1, allele0) };
        self.likelihoods.get(&key).copied().unwrap_or(0.0)
    }

    /// Returns all (unordered pair, mass) entries sorted by pair for deterministic iteration.
    pub fn genotype_likelihoods(&self) -> Vec<((u8, u8), f64)> {
        let mut entries: Vec<((u8, u8), f64)> = self.likelihoods.iter()
            .map(|(&k, &v)| (k, v))
            .collect();
        entries.sort_by_key(|&(k, _)| k);
        entries
    }

    pub fn likelihood_sum(&self) -> f64 {
        self.likelihoods.values().sum()
    }

    pub fn nr_entries(&self) -> usize {
        self.likelihoods.len()
    }

    /// Divides every entry by the total mass so the distribution sums to 1.
    /// A site with zero total mass is left untouched, marked uninformative, and `false`
    /// is returned.
    pub fn normalize(&mut self) -> bool {
        let total = self.likelihood_sum();
        if total <= 0.0 {
            self.uninformative = true;
            return false;
        }
        for value in self.likelihoods.values_mut() {
            *value /= total;
        }
        true
    }

    /// Adds another result's mass into this one, entry by entry, and appends its haplotype
    /// hypotheses. No normalization is performed. The combined result is informative if
    /// either input was.
    /// # Panics
    /// * if the two results belong to different variant positions
    pub fn combine(&mut self, other: &GenotypingResult) {
        assert_eq!(self.variant_position, other.variant_position);
        for (&(a0, a1), &value) in other.likelihoods.iter() {
            self.add_to_likelihood(a0, a1, value);
        }
        self.haplotypes.extend_from_slice(&other.haplotypes);
        self.uninformative = self.uninformative && other.uninformative;
    }

    /// Attaches a most-likely haplotype path pair from a Viterbi pass.
    /// Multiple phasing hypotheses (one per path-subset run) are permitted.
    pub fn push_haplotype(&mut self, paths: (u16, u16)) {
        self.haplotypes.push(paths);
    }

    pub fn haplotypes(&self) -> &[(u16, u16)] {
        &self.haplotypes
    }

    /// Returns the unordered allele pair with the highest mass together with that mass.
    /// Ties are broken towards the smaller pair so the answer is deterministic.
    pub fn likeliest_genotype(&self) -> Option<((u8, u8), f64)> {
        self.genotype_likelihoods().into_iter()
            .fold(None, |best, (pair, value)| match best {
                Some((_, best_value)) if best_value >= value => best,
                _ => Some((pair, value))
            })
    }

    /// Returns the phred-scaled quality of the likeliest genotype, computed from the
    /// normalized distribution. Requires `normalize` to have succeeded.
    pub fn genotype_quality(&self) -> Option<f64> {
        let (_, best) = self.likeliest_genotype()?;
        if self.uninformative {
            return None;
        }
        let error = (1.0 - best).max(f64::MIN_POSITIVE);
        Some(-10.0 * error.log10())
    }

    pub fn mark_uninformative(&mut self) {
        self.uninformative = true;
    }

    pub fn is_uninformative(&self) -> bool {
        self.uninformative
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unordered_accumulation() {
        let mut result = GenotypingResult::new(100);
        result.add_to_likelihood(1, 0, 0.25);
        result.add_to_likelihood(0, 1, 0.25);
        result.add_to_likelihood(0, 0, 0.5);
        assert_eq!(result.get_genotype_likelihood(0, 1), 0.5);
        assert_eq!(result.get_genotype_likelihood(1, 0), 0.5);
        assert_eq!(result.get_genotype_likelihood(0, 0), 0.5);
        assert_eq!(result.get_genotype_likelihood(1, 1), 0.0);
        assert_eq!(result.nr_entries(), 2);
    }

    #[test]
    fn test_normalize() {
        let mut result = GenotypingResult::new(100);
        result.add_to_likelihood(0, 0, 1.0);
        result.add_to_likelihood(0, 1, 3.0);
        assert!(result.normalize());
        assert!((result.get_genotype_likelihood(0, 0) - 0.25).abs() < 1e-9);
        assert!((result.get_genotype_likelihood(0, 1) - 0.75).abs() < 1e-9);
        assert!((result.likelihood_sum() - 1.0).abs() < 1e-9);
        assert!(!result.is_uninformative());
    }

    #[test]
    fn test_normalize_zero_mass() {
        let mut result = GenotypingResult::new(100);
        result.add_to_likelihood(0, 1, 0.0);
        assert!(!result.normalize());
        assert!(result.is_uninformative());
        // the zero map is left as-is
        assert_eq!(result.get_genotype_likelihood(0, 1), 0.0);
    }

    #[test]
    fn test_combine() {
        let mut a = GenotypingResult::new(100);
        a.add_to_likelihood(0, 1, 0.6);
        a.add_to_likelihood(0, 0, 0.4);
        a.push_haplotype((0, 1));

        let mut b = GenotypingResult::new(100);
        b.add_to_likelihood(0, 1, 0.2);
        b.add_to_likelihood(1, 1, 0.8);
        b.push_haplotype((2, 3));

        a.combine(&b);
        assert!((a.get_genotype_likelihood(0, 1) - 0.8).abs() < 1e-9);
        assert!((a.get_genotype_likelihood(0, 0) - 0.4).abs() < 1e-9);
        assert!((a.get_genotype_likelihood(1, 1) - 0.8).abs() < 1e-9);
        assert_eq!(a.haplotypes(), &[(0, 1), (2, 3)]);
    }

    #[test]
    fn test_likeliest_genotype() {
        let mut result = GenotypingResult::new(100);
        assert_eq!(result.likeliest_genotype(), None);
        result.add_to_likelihood(0, 1, 0.9);
        result.add_to_likelihood(0, 0, 0.1);
        let (pair, value) = result.likeliest_genotype().unwrap();
        assert_eq!(pair, (0, 1));
        assert!((value - 0.9).abs() < 1e-9);

        let quality = result.genotype_quality().unwrap();
        assert!((quality - 10.0).abs() < 1e-6);
    }
}

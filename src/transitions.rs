
/// Transition probabilities between the hidden states of two adjacent sites, following the
/// Li-Stephens haplotype-copying model for an ordered pair of paths.
///
/// Each haplotype independently either stays on its path or recombines onto a uniformly
/// chosen path, so the joint transition only depends on how many of the two paths changed.
/// The three class values are precomputed once per site boundary.
#[derive(Debug)]
pub struct TransitionProbabilityComputer {
    no_recombination: f64,
    single_recombination: f64,
    double_recombination: f64
}

impl TransitionProbabilityComputer {
    /// Precomputes the transition classes for one site boundary.
    /// # Arguments
    /// * `from_position` - genomic position of the left site
    /// * `to_position` - genomic position of the right site, must be >= `from_position`
    /// * `recomb_rate` - recombination rate in cM/Mb
    /// * `nr_paths` - number of active paths in the destination column
    /// * `uniform` - if true, ignore the genetic distance and use a per-meiosis
    ///   recombination probability of `1 / nr_paths`
    /// * `effective_n` - effective population size
    /// # Panics
    /// * if `nr_paths` is 0 or the positions are out of order
    pub fn new(
        from_position: u64,
        to_position: u64,
        recomb_rate: f64,
        nr_paths: usize,
        uniform: bool,
        effective_n: f64
    ) -> TransitionProbabilityComputer {
        assert!(nr_paths > 0);
        assert!(to_position >= from_position);
        let nr_paths = nr_paths as f64;

        // per-meiosis recombination probability between the two sites
        let recomb_prob: f64 = if uniform {
            1.0 / nr_paths
        } else {
            let distance = (to_position - from_position) as f64;
            1.0 - (-distance * recomb_rate * 4.0 * effective_n / (nr_paths * 100_000_000.0)).exp()
        };

        // probability of one haplotype landing on one specific path via recombination
        let switch = recomb_prob / nr_paths;
        let stay = 1.0 - recomb_prob;

        TransitionProbabilityComputer {
            no_recombination: stay * stay + 2.0 * stay * switch + switch * switch,
            single_recombination: stay * switch + switch * switch,
            double_recombination: switch * switch
        }
    }

    /// Returns the transition probability from the ordered path pair `(from1, from2)` to
    /// `(to1, to2)`, classified by how many of the two components changed.
    pub fn probability(&self, from1: u16, from2: u16, to1: u16, to2: u16) -> f64 {
        let changed = (from1 != to1) as usize + (from2 != to2) as usize;
        match changed {
            0 => self.no_recombination,
            1 => self.single_recombination,
            _ => self.double_recombination
        }
    }

    /// Both paths unchanged.
    pub fn no_recombination(&self) -> f64 {
        self.no_recombination
    }

    /// Exactly one path changed.
    pub fn single_recombination(&self) -> f64 {
        self.single_recombination
    }

    /// Both paths changed.
    pub fn double_recombination(&self) -> f64 {
        self.double_recombination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// sum of outgoing probabilities over all ordered destination pairs
    fn row_sum(computer: &TransitionProbabilityComputer, nr_paths: u16) -> f64 {
        let mut total = 0.0;
        for to1 in 0..nr_paths {
            for to2 in 0..nr_paths {
                total += computer.probability(0, 1.min(nr_paths - 1), to1, to2);
            }
        }
        total
    }

    #[test]
    fn test_row_stochasticity() {
        for nr_paths in [2u16, 4, 7, 25] {
            for distance in [1u64, 100, 10_000, 1_000_000] {
                let computer = TransitionProbabilityComputer::new(
                    1000, 1000 + distance, 1.26, nr_paths as usize, false, 25000.0
                );
                let total = row_sum(&computer, nr_paths);
                assert!(
                    (total - 1.0).abs() < 1e-9,
                    "row sum {total} for {nr_paths} paths, distance {distance}"
                );
            }
        }
    }

    #[test]
    fn test_uniform_row_stochasticity() {
        for nr_paths in [2u16, 4, 11] {
            let computer =
                TransitionProbabilityComputer::new(0, 0, 1.26, nr_paths as usize, true, 25000.0);
            let total = row_sum(&computer, nr_paths);
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_class_ordering() {
        let computer = TransitionProbabilityComputer::new(0, 50_000, 1.26, 8, false, 25000.0);
        assert!(computer.no_recombination() > computer.single_recombination());
        assert!(computer.single_recombination() > computer.double_recombination());
        assert!(computer.double_recombination() > 0.0);
    }

    #[test]
    fn test_zero_distance() {
        let computer = TransitionProbabilityComputer::new(500, 500, 1.26, 4, false, 25000.0);
        // no genetic distance means no recombination at all
        assert!((computer.no_recombination() - 1.0).abs() < 1e-12);
        assert_eq!(computer.double_recombination(), 0.0);
    }

    #[test]
    fn test_classification() {
        let computer = TransitionProbabilityComputer::new(0, 1000, 1.26, 4, false, 25000.0);
        assert_eq!(computer.probability(0, 1, 0, 1), computer.no_recombination());
        assert_eq!(computer.probability(0, 1, 0, 2), computer.single_recombination());
        assert_eq!(computer.probability(0, 1, 3, 1), computer.single_recombination());
        assert_eq!(computer.probability(0, 1, 2, 3), computer.double_recombination());
    }
}


use crate::column_indexer::ColumnIndexer;
use crate::data_types::genotyping_result::GenotypingResult;
use crate::data_types::site_summary::{SiteError, SiteSummary};
use crate::emission::EmissionProbabilityComputer;
use crate::probability_table::ProbabilityTable;
use crate::transitions::TransitionProbabilityComputer;

use log::{debug, trace, warn};
use rustc_hash::FxHashMap as HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HmmError {
    #[error("configuration enables neither genotyping nor phasing, there is nothing to compute")]
    NothingToCompute,
    #[error("variant positions are not sorted: site {index} at position {position} follows position {previous}")]
    UnsortedSites { index: usize, position: u64, previous: u64 },
    #[error(transparent)]
    Site(#[from] SiteError)
}

/// Configuration for a genotyping/phasing HMM run.
#[derive(Clone, Debug)]
pub struct HmmConfig {
    /// Run the forward-backward pass and aggregate genotype posteriors
    pub run_genotyping: bool,
    /// Run the Viterbi pass and attach the most likely haplotype paths
    pub run_phasing: bool,
    /// Recombination rate in cM/Mb
    pub recombrate: f64,
    /// Use uniform transition probabilities instead of distance-based ones
    pub uniform: bool,
    /// Effective population size used by the recombination model
    pub effective_population_size: f64,
    /// Restrict the hidden state space to these path ids; `None` keeps all paths.
    /// Applied as an overlay, the site summaries are never mutated.
    pub only_paths: Option<Vec<u16>>,
    /// Normalize the per-site posteriors to sum to 1 at the end of the run
    pub normalize: bool
}

impl Default for HmmConfig {
    fn default() -> HmmConfig {
        HmmConfig {
            run_genotyping: true,
            run_phasing: true,
            recombrate: 1.26,
            uniform: false,
            effective_population_size: 25000.0,
            only_paths: None,
            normalize: true
        }
    }
}

impl HmmConfig {
    /// Checks the configuration for combinations that leave nothing to compute.
    pub fn validate(&self) -> Result<(), HmmError> {
        if !self.run_genotyping && !self.run_phasing {
            return Err(HmmError::NothingToCompute);
        }
        Ok(())
    }
}

/// One column of scaled state probabilities plus the scaling factor that was divided out,
/// kept so posteriors can be put back on a common footing.
#[derive(Debug)]
pub struct HmmColumn {
    /// Scaled probability per hidden state, in canonical state order
    pub column: Vec<f64>,
    /// The sum the column was divided by; 0 marks a column whose emissions were all zero
    pub forward_normalization_sum: f64
}

/// The genotyping HMM for one chromosome: hidden states are ordered pairs of haplotype
/// paths, emissions are the observed k-mer read counts summarized per site.
///
/// A single instance is single-threaded and owns its columns exclusively; independent
/// instances (other chromosomes, other path subsets) run in parallel and are merged through
/// `ResultAggregator`. The site summaries and the probability table are only ever read.
#[derive(Debug)]
pub struct Hmm<'a> {
    summaries: &'a [SiteSummary],
    probabilities: &'a ProbabilityTable,
    config: HmmConfig,
    indexers: Vec<ColumnIndexer>,
    transitions: Vec<TransitionProbabilityComputer>,
    /// Emission computers, built lazily at run time so cancellation stays responsive
    emissions: Vec<EmissionProbabilityComputer>,
    forward_columns: Vec<Option<HmmColumn>>,
    genotyping_results: Vec<GenotypingResult>,
    cancelled: bool
}

/// Maps each local path index of `to` to the local index of the same path id in `from`,
/// or `None` for paths that only exist in `to`.
fn local_indices(to: &ColumnIndexer, from: &ColumnIndexer) -> Vec<Option<usize>> {
    if to.same_paths(from) {
        return (0..to.nr_paths()).map(Some).collect();
    }
    let from_lookup: HashMap<u16, usize> = (0..from.nr_paths())
        .map(|i| (from.path_at(i), i))
        .collect();
    (0..to.nr_paths())
        .map(|i| from_lookup.get(&to.path_at(i)).copied())
        .collect()
}

/// Row sums, column sums, and the total of a square column laid out row-major.
fn marginal_sums(column: &[f64], nr_paths: usize) -> (Vec<f64>, Vec<f64>, f64) {
    let mut row_sums = vec![0.0; nr_paths];
    let mut col_sums = vec![0.0; nr_paths];
    let mut total = 0.0;
    for p1 in 0..nr_paths {
        for p2 in 0..nr_paths {
            let value = column[p1 * nr_paths + p2];
            row_sums[p1] += value;
            col_sums[p2] += value;
            total += value;
        }
    }
    (row_sums, col_sums, total)
}

impl<'a> Hmm<'a> {
    /// Validates the configuration and the site sequence and prepares the state spaces.
    /// # Arguments
    /// * `summaries` - the per-site summaries, in ascending genomic order
    /// * `probabilities` - the shared emission kernel lookup
    /// * `config` - run configuration; see `HmmConfig`
    /// # Errors
    /// * if the configuration enables neither pass
    /// * if the variant positions are not sorted
    /// * if a site exposes no paths, or `only_paths` is not a subset of its active paths
    pub fn new(
        summaries: &'a [SiteSummary],
        probabilities: &'a ProbabilityTable,
        config: HmmConfig
    ) -> Result<Hmm<'a>, HmmError> {
        config.validate()?;

        let mut indexers: Vec<ColumnIndexer> = Vec::with_capacity(summaries.len());
        let mut genotyping_results: Vec<GenotypingResult> = Vec::with_capacity(summaries.len());
        for (index, summary) in summaries.iter().enumerate() {
            if index > 0 {
                let previous = summaries[index - 1].variant_position();
                if summary.variant_position() < previous {
                    return Err(HmmError::UnsortedSites {
                        index,
                        position: summary.variant_position(),
                        previous
                    });
                }
            }
            indexers.push(ColumnIndexer::new(summary, config.only_paths.as_deref())?);
            genotyping_results.push(GenotypingResult::new(summary.variant_position()));
        }

        // transition classes per site boundary, parameterized by the destination column
        let mut transitions: Vec<TransitionProbabilityComputer> = vec![];
        for boundary in 1..summaries.len() {
            transitions.push(TransitionProbabilityComputer::new(
                summaries[boundary - 1].variant_position(),
                summaries[boundary].variant_position(),
                config.recombrate,
                indexers[boundary].nr_paths(),
                config.uniform,
                config.effective_population_size
            ));
        }

        let nr_sites = summaries.len();
        Ok(Hmm {
            summaries,
            probabilities,
            config,
            indexers,
            transitions,
            emissions: Vec::with_capacity(nr_sites),
            forward_columns: (0..nr_sites).map(|_| None).collect(),
            genotyping_results,
            cancelled: false
        })
    }

    /// Runs the configured passes. Cancellation is polled between sites; a cancelled run
    /// keeps whatever was finished and marks every untouched site uninformative.
    /// # Arguments
    /// * `cancellation` - optional flag checked between sites; set it to abort cooperatively
    pub fn run(&mut self, cancellation: Option<&AtomicBool>) {
        debug!(
            "starting HMM run over {} sites ({} paths at the first site)",
            self.summaries.len(),
            self.indexers.first().map(|i| i.nr_paths()).unwrap_or(0)
        );

        if self.precompute_emissions(cancellation) {
            if self.config.run_genotyping {
                self.compute_forward_probabilities(cancellation);
                self.compute_backward_probabilities(cancellation);
                // columns are only needed until posterior extraction, release them in bulk
                self.forward_columns.clear();
            }
            if self.config.run_phasing && !self.cancelled {
                self.compute_viterbi_path(cancellation);
            }
        }

        if self.config.normalize && self.config.run_genotyping {
            for result in self.genotyping_results.iter_mut() {
                result.normalize();
            }
        }
        self.finalize_results();
    }

    /// Returns the per-site genotyping results, in ascending genomic order.
    pub fn genotyping_results(&self) -> &[GenotypingResult] {
        &self.genotyping_results
    }

    /// Consumes the HMM and hands the per-site results to the caller.
    pub fn into_genotyping_results(self) -> Vec<GenotypingResult> {
        self.genotyping_results
    }

    /// Returns true if the last run was aborted through the cancellation flag.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    fn check_cancelled(&mut self, cancellation: Option<&AtomicBool>) -> bool {
        if let Some(flag) = cancellation {
            if flag.load(Ordering::Relaxed) {
                if !self.cancelled {
                    debug!("cancellation requested, aborting HMM run at the next site boundary");
                }
                self.cancelled = true;
            }
        }
        self.cancelled
    }

    /// Builds the per-site emission computers. Returns false if cancelled on the way.
    fn precompute_emissions(&mut self, cancellation: Option<&AtomicBool>) -> bool {
        while self.emissions.len() < self.summaries.len() {
            if self.check_cancelled(cancellation) {
                return false;
            }
            let site = self.emissions.len();
            self.emissions.push(EmissionProbabilityComputer::new(
                &self.summaries[site],
                self.probabilities
            ));
        }
        true
    }

    /// The states the column falls back to when every emission-weighted entry is zero:
    /// states with nonzero emission mass if there are any, otherwise all states.
    fn reseed_states(&self, site: usize) -> Vec<usize> {
        let indexer = &self.indexers[site];
        let emission = &self.emissions[site];
        let positive: Vec<usize> = (0..indexer.column_size())
            .filter(|&state| {
                let (p1, p2) = indexer.pair_of(state);
                emission.emission_probability(indexer.allele_at(p1), indexer.allele_at(p2)) > 0.0
            })
            .collect();
        if positive.is_empty() {
            (0..indexer.column_size()).collect()
        } else {
            positive
        }
    }

    fn compute_forward_probabilities(&mut self, cancellation: Option<&AtomicBool>) {
        for site in 0..self.summaries.len() {
            if self.check_cancelled(cancellation) {
                return;
            }
            self.compute_forward_column(site);
        }
    }

    fn compute_forward_column(&mut self, site: usize) {
        let indexer = &self.indexers[site];
        let emission = &self.emissions[site];
        let nr_paths = indexer.nr_paths();
        let size = indexer.column_size();
        let mut column: Vec<f64> = vec![0.0; size];

        if site == 0 {
            // uniform prior over the ordered path pairs
            let prior = 1.0 / size as f64;
            for state in 0..size {
                let (p1, p2) = indexer.pair_of(state);
                column[state] =
                    emission.emission_probability(indexer.allele_at(p1), indexer.allele_at(p2))
                        * prior;
            }
        } else {
            let previous = self.forward_columns[site - 1]
                .as_ref()
                .expect("forward columns are filled left to right");
            let previous_indexer = &self.indexers[site - 1];
            let previous_paths = previous_indexer.nr_paths();
            let transition = &self.transitions[site - 1];

            // the transition factorizes over the two haplotypes, so the update only needs
            // the previous column's marginals per path plus its total
            let (row_sums, col_sums, total) = marginal_sums(&previous.column, previous_paths);
            let previous_of = local_indices(indexer, previous_indexer);

            let stay_both = transition.no_recombination() - 2.0 * transition.single_recombination()
                + transition.double_recombination();
            let stay_one = transition.single_recombination() - transition.double_recombination();
            let switch_both = transition.double_recombination();

            for p1 in 0..nr_paths {
                for p2 in 0..nr_paths {
                    let em = emission
                        .emission_probability(indexer.allele_at(p1), indexer.allele_at(p2));
                    if em <= 0.0 {
                        continue;
                    }
                    let mut value = switch_both * total;
                    if let Some(prev1) = previous_of[p1] {
                        value += stay_one * row_sums[prev1];
                    }
                    if let Some(prev2) = previous_of[p2] {
                        value += stay_one * col_sums[prev2];
                    }
                    if let (Some(prev1), Some(prev2)) = (previous_of[p1], previous_of[p2]) {
                        value += stay_both * previous.column[prev1 * previous_paths + prev2];
                    }
                    column[indexer.index_of(p1, p2)] = em * value;
                }
            }
        }

        let sum: f64 = column.iter().sum();
        let forward_normalization_sum = if sum > 0.0 {
            for value in column.iter_mut() {
                *value /= sum;
            }
            sum
        } else {
            warn!(
                "site {} (position {}) carries no forward probability mass, re-seeding uniformly",
                site,
                self.summaries[site].variant_position()
            );
            let reseed = self.reseed_states(site);
            let uniform = 1.0 / reseed.len() as f64;
            for state in reseed {
                column[state] = uniform;
            }
            0.0
        };

        self.forward_columns[site] = Some(HmmColumn {
            column,
            forward_normalization_sum
        });
    }

    fn compute_backward_probabilities(&mut self, cancellation: Option<&AtomicBool>) {
        let nr_sites = self.summaries.len();
        if nr_sites == 0 {
            return;
        }
        // the last column starts uniform over its states; the constant is folded back out
        // during posterior aggregation
        let initialization_states = self.indexers[nr_sites - 1].column_size() as f64;
        // only one backward column is alive at a time, the pass streams right to left
        let mut next_backward: Vec<f64> = vec![];

        for site in (0..nr_sites).rev() {
            if self.check_cancelled(cancellation) {
                return;
            }

            let indexer = &self.indexers[site];
            let nr_paths = indexer.nr_paths();
            let size = indexer.column_size();

            let mut backward: Vec<f64> = if site == nr_sites - 1 {
                vec![1.0 / size as f64; size]
            } else {
                let next_indexer = &self.indexers[site + 1];
                let next_paths = next_indexer.nr_paths();
                let next_emission = &self.emissions[site + 1];
                let transition = &self.transitions[site];

                // fold the next site's emissions into its backward column once, then reuse
                // the same marginal decomposition as the forward pass
                let weighted: Vec<f64> = (0..next_indexer.column_size())
                    .map(|state| {
                        let (p1, p2) = next_indexer.pair_of(state);
                        next_emission.emission_probability(
                            next_indexer.allele_at(p1),
                            next_indexer.allele_at(p2)
                        ) * next_backward[state]
                    })
                    .collect();
                let (row_sums, col_sums, total) = marginal_sums(&weighted, next_paths);
                let next_of = local_indices(indexer, next_indexer);

                let stay_both = transition.no_recombination()
                    - 2.0 * transition.single_recombination()
                    + transition.double_recombination();
                let stay_one =
                    transition.single_recombination() - transition.double_recombination();
                let switch_both = transition.double_recombination();

                let mut column = vec![0.0; size];
                for p1 in 0..nr_paths {
                    for p2 in 0..nr_paths {
                        let mut value = switch_both * total;
                        if let Some(next1) = next_of[p1] {
                            value += stay_one * row_sums[next1];
                        }
                        if let Some(next2) = next_of[p2] {
                            value += stay_one * col_sums[next2];
                        }
                        if let (Some(next1), Some(next2)) = (next_of[p1], next_of[p2]) {
                            value += stay_both * weighted[next1 * next_paths + next2];
                        }
                        column[indexer.index_of(p1, p2)] = value;
                    }
                }
                column
            };

            if site < nr_sites - 1 {
                // scale by the forward normalization recorded for the site the recursion just
                // folded in, so the chain of forward scale factors cancels in the posterior.
                // A forward column that was re-seeded recorded no scale; fall back to the
                // backward column's own sum there.
                let next_normalization = self.forward_columns[site + 1]
                    .as_ref()
                    .expect("the backward pass runs after the forward pass")
                    .forward_normalization_sum;
                let scale = if next_normalization > 0.0 {
                    next_normalization
                } else {
                    backward.iter().sum()
                };
                if scale > 0.0 {
                    for value in backward.iter_mut() {
                        *value /= scale;
                    }
                }
            }

            let sum: f64 = backward.iter().sum();
            if sum <= 0.0 {
                trace!(
                    "site {} (position {}) carries no backward probability mass, re-seeding uniformly",
                    site,
                    self.summaries[site].variant_position()
                );
                let reseed = self.reseed_states(site);
                let uniform = 1.0 / reseed.len() as f64;
                for state in reseed {
                    backward[state] = uniform;
                }
            }

            self.aggregate_posteriors(site, &backward, initialization_states);
            next_backward = backward;
        }
    }

    /// Multiplies the forward and backward columns of one site and adds the state posteriors
    /// to the site's genotype distribution, keyed by unordered allele pair. The backward
    /// scaling already cancelled the forward scale factors, so once the uniform
    /// initialization constant is folded back out the raw posterior mass of an informative
    /// site sums to 1; that is what lets runs over disjoint path subsets be added together
    /// without re-weighting. Sites whose forward pass found no probability mass are skipped
    /// and stay empty.
    fn aggregate_posteriors(&mut self, site: usize, backward: &[f64], initialization_states: f64) {
        let forward = self.forward_columns[site]
            .as_ref()
            .expect("the backward pass runs after the forward pass");
        if forward.forward_normalization_sum <= 0.0 {
            return;
        }

        let indexer = &self.indexers[site];
        let result = &mut self.genotyping_results[site];
        for state in 0..indexer.column_size() {
            let posterior = forward.column[state] * backward[state] * initialization_states;
            if posterior > 0.0 {
                let (p1, p2) = indexer.pair_of(state);
                result.add_to_likelihood(indexer.allele_at(p1), indexer.allele_at(p2), posterior);
            }
        }
    }

    fn compute_viterbi_path(&mut self, cancellation: Option<&AtomicBool>) {
        let nr_sites = self.summaries.len();
        if nr_sites == 0 {
            return;
        }

        let mut backtraces: Vec<Vec<u32>> = Vec::with_capacity(nr_sites);
        let mut previous: Vec<f64> = vec![];

        for site in 0..nr_sites {
            if self.check_cancelled(cancellation) {
                // no backtrace without the full sweep; genotype posteriors are kept as-is
                return;
            }

            let indexer = &self.indexers[site];
            let emission = &self.emissions[site];
            let nr_paths = indexer.nr_paths();
            let size = indexer.column_size();
            let mut column: Vec<f64> = vec![0.0; size];
            let mut backtrace: Vec<u32> = vec![0; size];

            if site == 0 {
                let prior = 1.0 / size as f64;
                for state in 0..size {
                    let (p1, p2) = indexer.pair_of(state);
                    column[state] = emission
                        .emission_probability(indexer.allele_at(p1), indexer.allele_at(p2))
                        * prior;
                }
            } else {
                let previous_indexer = &self.indexers[site - 1];
                let previous_paths = previous_indexer.nr_paths();
                let transition = &self.transitions[site - 1];
                let previous_of = local_indices(indexer, previous_indexer);

                // per-row, per-column, and global maxima of the previous column; together
                // with the three transition classes they bound every predecessor exactly
                let mut row_max = vec![0.0f64; previous_paths];
                let mut row_argmax = vec![0usize; previous_paths];
                let mut col_max = vec![0.0f64; previous_paths];
                let mut col_argmax = vec![0usize; previous_paths];
                let mut global_max = 0.0f64;
                let mut global_argmax = 0usize;
                for p1 in 0..previous_paths {
                    for p2 in 0..previous_paths {
                        let value = previous[p1 * previous_paths + p2];
                        if value > row_max[p1] {
                            row_max[p1] = value;
                            row_argmax[p1] = p2;
                        }
                        if value > col_max[p2] {
                            col_max[p2] = value;
                            col_argmax[p2] = p1;
                        }
                        if value > global_max {
                            global_max = value;
                            global_argmax = p1 * previous_paths + p2;
                        }
                    }
                }

                for p1 in 0..nr_paths {
                    for p2 in 0..nr_paths {
                        let state = indexer.index_of(p1, p2);
                        let em = emission
                            .emission_probability(indexer.allele_at(p1), indexer.allele_at(p2));

                        // candidates from most to least specific so ties keep the stronger
                        // transition class; the backtrace is recorded even for zero-emission
                        // states so a re-seeded column still points at a valid predecessor
                        let mut best = f64::NEG_INFINITY;
                        let mut best_arg = global_argmax;
                        if let (Some(prev1), Some(prev2)) = (previous_of[p1], previous_of[p2]) {
                            best = transition.no_recombination()
                                * previous[prev1 * previous_paths + prev2];
                            best_arg = prev1 * previous_paths + prev2;
                        }
                        if let Some(prev1) = previous_of[p1] {
                            let value = transition.single_recombination() * row_max[prev1];
                            if value > best {
                                best = value;
                                best_arg = prev1 * previous_paths + row_argmax[prev1];
                            }
                        }
                        if let Some(prev2) = previous_of[p2] {
                            let value = transition.single_recombination() * col_max[prev2];
                            if value > best {
                                best = value;
                                best_arg = col_argmax[prev2] * previous_paths + prev2;
                            }
                        }
                        let value = transition.double_recombination() * global_max;
                        if value > best {
                            best = value;
                            best_arg = global_argmax;
                        }

                        column[state] = em * best.max(0.0);
                        backtrace[state] = best_arg as u32;
                    }
                }
            }

            // the backtrace is invariant under per-column rescaling, divide by the maximum
            let max = column.iter().cloned().fold(0.0f64, f64::max);
            if max > 0.0 {
                for value in column.iter_mut() {
                    *value /= max;
                }
            } else {
                warn!(
                    "site {} (position {}) carries no Viterbi probability mass, re-seeding uniformly",
                    site,
                    self.summaries[site].variant_position()
                );
                for state in self.reseed_states(site) {
                    column[state] = 1.0;
                }
            }

            backtraces.push(backtrace);
            previous = column;
        }

        // walk the backtrace right to left and attach the chosen path pair to each site
        let mut best_state = previous
            .iter()
            .enumerate()
            .fold((0usize, f64::NEG_INFINITY), |best, (state, &value)| {
                if value > best.1 { (state, value) } else { best }
            })
            .0;
        for site in (0..nr_sites).rev() {
            let indexer = &self.indexers[site];
            let (p1, p2) = indexer.pair_of(best_state);
            self.genotyping_results[site]
                .push_haplotype((indexer.path_at(p1), indexer.path_at(p2)));
            if site > 0 {
                best_state = backtraces[site][best_state] as usize;
            }
        }
    }

    /// Flags sites that ended the run without any usable output: no posterior mass when
    /// genotyping was requested, or no haplotype when only phasing was.
    fn finalize_results(&mut self) {
        for result in self.genotyping_results.iter_mut() {
            let missing_genotype = self.config.run_genotyping && result.nr_entries() == 0;
            let missing_phase =
                !self.config.run_genotyping && self.config.run_phasing && result.haplotypes().is_empty();
            if missing_genotype || missing_phase {
                result.mark_uninformative();
            }
        }
    }
}

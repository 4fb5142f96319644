
use crate::aggregator::{AggregateError, ResultAggregator};
use crate::data_types::genotyping_result::GenotypingResult;
use crate::data_types::site_summary::SiteSummary;
use crate::hmm::{Hmm, HmmConfig, HmmError};
use crate::probability_table::ProbabilityTable;
use crate::writers::run_stats::RunStats;

use log::{debug, info};
use rustc_hash::FxHashSet as HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, mpsc};
use std::time::Instant;
use threadpool::ThreadPool;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GenotyperError {
    #[error("path subset {index} is empty")]
    EmptySubset { index: usize },
    #[error("path {path} appears in more than one subset, subsets must be disjoint")]
    OverlappingSubsets { path: u16 },
    #[error("a worker thread panicked before delivering its result")]
    LostWorker,
    #[error(transparent)]
    Hmm(#[from] HmmError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError)
}

/// One HMM run's contribution, tagged with its subset index so merging stays deterministic.
type RunMessage = (usize, Result<(Vec<GenotypingResult>, bool), HmmError>);

/// Genotypes (and/or phases) one chromosome's site sequence.
///
/// When `path_subsets` is empty a single HMM covers the state space selected by
/// `config.only_paths`. Otherwise one independent HMM instance runs per subset (in parallel
/// on a thread pool when `threads > 1`) and the per-run likelihoods are merged through
/// `ResultAggregator` before the final normalization. Each instance only reads the shared
/// summaries and table; no site data is cloned or mutated.
///
/// # Arguments
/// * `summaries` - the per-site summaries, in ascending genomic order
/// * `probabilities` - the shared emission kernel lookup
/// * `config` - the HMM configuration; `only_paths` is overridden per subset
/// * `path_subsets` - disjoint, non-empty path subsets, one HMM instance each
/// * `threads` - worker threads for the subset runs; `<= 1` runs them sequentially
/// * `cancellation` - optional flag polled between sites by every instance
/// # Errors
/// * if a subset is empty, subsets overlap, or a subset names an unknown path
/// * if the configuration or the site sequence is rejected by the HMM
pub fn genotype_sites(
    summaries: Arc<Vec<SiteSummary>>,
    probabilities: Arc<ProbabilityTable>,
    config: &HmmConfig,
    path_subsets: &[Vec<u16>],
    threads: usize,
    cancellation: Option<Arc<AtomicBool>>
) -> Result<(Vec<GenotypingResult>, RunStats), GenotyperError> {
    let start_time = Instant::now();

    // each run gets its own path overlay; a run over `None` keeps the configured one
    let run_subsets: Vec<Option<Vec<u16>>> = if path_subsets.is_empty() {
        vec![config.only_paths.clone()]
    } else {
        let mut seen: HashSet<u16> = Default::default();
        for (index, subset) in path_subsets.iter().enumerate() {
            if subset.is_empty() {
                return Err(GenotyperError::EmptySubset { index });
            }
            for &path in subset.iter() {
                if !seen.insert(path) {
                    return Err(GenotyperError::OverlappingSubsets { path });
                }
            }
        }
        path_subsets.iter().map(|subset| Some(subset.clone())).collect()
    };

    let nr_runs = run_subsets.len();
    info!(
        "genotyping {} sites with {} run(s) on {} thread(s)",
        summaries.len(),
        nr_runs,
        threads.max(1)
    );

    // per-run likelihoods are combined after the final run, so normalization waits
    let run_config = |only_paths: Option<Vec<u16>>| HmmConfig {
        only_paths,
        normalize: false,
        ..config.clone()
    };

    let mut run_results: Vec<Option<(Vec<GenotypingResult>, bool)>> =
        (0..nr_runs).map(|_| None).collect();

    if threads <= 1 || run_subsets.len() == 1 {
        for (index, subset) in run_subsets.into_iter().enumerate() {
            let mut hmm = Hmm::new(&summaries, &probabilities, run_config(subset))?;
            hmm.run(cancellation.as_deref());
            let cancelled = hmm.was_cancelled();
            run_results[index] = Some((hmm.into_genotyping_results(), cancelled));
        }
    } else {
        let pool = ThreadPool::new(threads.min(run_subsets.len()));
        let (tx, rx) = mpsc::channel::<RunMessage>();

        for (index, subset) in run_subsets.into_iter().enumerate() {
            let tx = tx.clone();
            let summaries = summaries.clone();
            let probabilities = probabilities.clone();
            let config = run_config(subset);
            let cancellation = cancellation.clone();

            pool.execute(move || {
                debug!("worker starting subset run {}", index);
                let message = Hmm::new(&summaries, &probabilities, config).map(|mut hmm| {
                    hmm.run(cancellation.as_deref());
                    let cancelled = hmm.was_cancelled();
                    (hmm.into_genotyping_results(), cancelled)
                });
                // the receiver may be gone if another run already failed
                let _ = tx.send((index, message));
            });
        }
        drop(tx);

        pool.join();
        for (index, message) in rx.try_iter() {
            run_results[index] = Some(message?);
        }
    }

    // merge in subset order; addition is commutative, this just keeps output deterministic
    let mut aggregator: Option<ResultAggregator> = None;
    let mut cancelled = false;
    for run_result in run_results.into_iter() {
        let (results, run_cancelled) = run_result.ok_or(GenotyperError::LostWorker)?;
        cancelled |= run_cancelled;
        match aggregator.as_mut() {
            Some(aggregator) => aggregator.combine_likelihoods(&results)?,
            None => aggregator = Some(ResultAggregator::new(results))
        }
    }
    let mut aggregator = aggregator.expect("at least one run is always scheduled");

    let uninformative_sites = if config.normalize && config.run_genotyping {
        aggregator.normalize()
    } else {
        aggregator.results().iter().filter(|r| r.is_uninformative()).count()
    };

    let stats = RunStats {
        nr_sites: summaries.len(),
        nr_runs,
        uninformative_sites,
        cancelled,
        runtime_seconds: start_time.elapsed().as_secs_f64()
    };

    Ok((aggregator.into_results(), stats))
}

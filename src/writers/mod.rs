/// Contains writer for per-run genotyping statistics
pub mod run_stats;
/// Contains the writer for the persisted per-site unique k-mer artifact
pub mod site_summary_writer;


use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// Summary statistics for one genotyping run over a site sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// The number of variant sites in the sequence
    pub nr_sites: usize,
    /// The number of HMM instances that contributed (one per path subset)
    pub nr_runs: usize,
    /// The number of sites that ended without usable signal
    pub uninformative_sites: usize,
    /// True if any contributing run was aborted through the cancellation flag
    pub cancelled: bool,
    /// Wall time of the whole run, including merging
    pub runtime_seconds: f64
}

/// Writes one serialized statistics row per genotyping run to a csv/tsv file.
pub struct StatsWriter {
    /// Underlying writer, configured with the delimiter matching the file extension
    csv_writer: csv::Writer<File>
}

/// One output row of the statistics file
#[derive(Serialize)]
struct CsvRow<'a> {
    /// the chromosome the run covered
    chromosome: &'a str,
    /// the number of variant sites
    nr_sites: usize,
    /// the number of contributing HMM runs
    nr_runs: usize,
    /// the number of uninformative sites
    uninformative_sites: usize,
    /// whether the run was cancelled
    cancelled: bool,
    /// wall time in seconds
    runtime_seconds: f64
}

impl StatsWriter {
    /// Creates a new writer for a given filename.
    /// A `.csv` extension selects comma delimiters, anything else is written tab-separated.
    /// # Arguments
    /// * `filename` - the path to write all stats to
    pub fn new(filename: &Path) -> csv::Result<StatsWriter> {
        let delimiter = match filename.extension().and_then(|e| e.to_str()) {
            Some("csv") => b',',
            _ => b'\t'
        };
        Ok(StatsWriter {
            csv_writer: csv::WriterBuilder::new().delimiter(delimiter).from_path(filename)?
        })
    }

    /// Writes the statistics row for one run.
    /// # Arguments
    /// * `chromosome` - the chromosome the run covered
    /// * `stats` - the run statistics to serialize
    pub fn write_stats(&mut self, chromosome: &str, stats: &RunStats) -> csv::Result<()> {
        let row = CsvRow {
            chromosome,
            nr_sites: stats.nr_sites,
            nr_runs: stats.nr_runs,
            uninformative_sites: stats.uninformative_sites,
            cancelled: stats.cancelled,
            runtime_seconds: stats.runtime_seconds
        };
        self.csv_writer.serialize(&row)?;
        self.csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_stats() {
        let filename = std::env::temp_dir().join(format!("panphase_stats_{}.tsv", std::process::id()));
        {
            let mut writer = StatsWriter::new(&filename).unwrap();
            let stats = RunStats {
                nr_sites: 12,
                nr_runs: 3,
                uninformative_sites: 1,
                cancelled: false,
                runtime_seconds: 0.5
            };
            writer.write_stats("chr1", &stats).unwrap();
        }

        let written = std::fs::read_to_string(&filename).unwrap();
        let mut lines = written.lines();
        assert_eq!(
            lines.next().unwrap(),
            "chromosome\tnr_sites\tnr_runs\tuninformative_sites\tcancelled\truntime_seconds"
        );
        assert_eq!(lines.next().unwrap(), "chr1\t12\t3\t1\tfalse\t0.5");
        std::fs::remove_file(&filename).unwrap();
    }
}


use crate::data_types::kmer::Kmer;

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Writes the per-site unique k-mer artifact the summary producer persists alongside its
/// in-memory output: one gzip-compressed, tab-separated line per variant site listing the
/// site's unique k-mers and the unique k-mers of its flanking sequence.
///
/// The format is stable and consumed by external tooling, so it is written byte-for-byte:
/// a fixed header line, comma-separated k-mer lists in the producer's textual encoding, and
/// a literal `nan` for an empty list.
pub struct SiteSummaryWriter {
    encoder: GzEncoder<BufWriter<File>>
}

impl SiteSummaryWriter {
    /// Creates the output file and writes the header line.
    /// # Arguments
    /// * `filename` - the path of the gzip-compressed output file
    /// # Errors
    /// * if the file cannot be created or written
    pub fn new(filename: &Path) -> io::Result<SiteSummaryWriter> {
        let file = File::create(filename)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        encoder.write_all(b"#chromosome\tstart\tend\tunique_kmers\tunique_kmers_overhang\n")?;
        Ok(SiteSummaryWriter {
            encoder
        })
    }

    /// Writes one site's line.
    /// # Arguments
    /// * `chromosome` - the chromosome name
    /// * `start` - 0-based start of the variant
    /// * `end` - end of the variant
    /// * `site_kmers` - the unique k-mers of the site's alleles; empty becomes `nan`
    /// * `flanking_kmers` - the unique k-mers of the site's overhang; empty becomes `nan`
    /// # Errors
    /// * if the line cannot be written
    pub fn write_site(
        &mut self,
        chromosome: &str,
        start: u64,
        end: u64,
        site_kmers: &[Kmer],
        flanking_kmers: &[Kmer]
    ) -> io::Result<()> {
        let mut line = format!("{chromosome}\t{start}\t{end}\t");
        append_kmer_list(&mut line, site_kmers);
        line.push('\t');
        append_kmer_list(&mut line, flanking_kmers);
        line.push('\n');
        self.encoder.write_all(line.as_bytes())
    }

    /// Flushes and finishes the gzip stream. Dropping the writer without calling this
    /// loses the gzip trailer.
    pub fn finish(self) -> io::Result<()> {
        self.encoder.finish()?;
        Ok(())
    }
}

fn append_kmer_list(line: &mut String, kmers: &[Kmer]) {
    if kmers.is_empty() {
        line.push_str("nan");
        return;
    }
    for (index, kmer) in kmers.iter().enumerate() {
        if index > 0 {
            line.push(',');
        }
        line.push_str(&kmer.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn kmers(sequences: &[&str]) -> Vec<Kmer> {
        sequences.iter().map(|s| Kmer::from_ascii(s.as_bytes()).unwrap()).collect()
    }

    #[test]
    fn test_exact_output() {
        let filename = std::env::temp_dir()
            .join(format!("panphase_site_summaries_{}.tsv.gz", std::process::id()));
        {
            let mut writer = SiteSummaryWriter::new(&filename).unwrap();
            writer
                .write_site("chr1", 1000, 1001, &kmers(&["ACGT", "TTGA"]), &kmers(&["GGGC"]))
                .unwrap();
            writer.write_site("chr1", 2500, 2530, &[], &[]).unwrap();
            writer.finish().unwrap();
        }

        let mut decoder = MultiGzDecoder::new(File::open(&filename).unwrap());
        let mut contents = String::new();
        decoder.read_to_string(&mut contents).unwrap();
        assert_eq!(
            contents,
            "#chromosome\tstart\tend\tunique_kmers\tunique_kmers_overhang\n\
             chr1\t1000\t1001\tACGT,TTGA\tGGGC\n\
             chr1\t2500\t2530\tnan\tnan\n"
        );
        std::fs::remove_file(&filename).unwrap();
    }
}

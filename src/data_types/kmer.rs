
/// The maximum k-mer length that fits in the packed representation
pub const MAX_KMER_LEN: usize = 32;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KmerError {
    #[error("k-mer sequence is empty")]
    EmptySequence,
    #[error("k-mer length {length} exceeds the maximum of {MAX_KMER_LEN}")]
    SequenceTooLong { length: usize },
    #[error("k-mer contains unsupported base {base:?} at offset {offset}")]
    UnsupportedBase { base: char, offset: usize },
}

/// A fixed-width, 2-bit packed nucleotide string.
/// The genotyping core only ever compares and hashes k-mers; the packed form exists so that
/// per-site k-mer tables stay compact and so the site-summary artifact can echo the producer's
/// textual encoding.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Kmer {
    /// The packed bases, 2 bits per base, first base in the highest used bits
    packed: u64,
    /// The number of bases stored
    k: u8
}

impl Kmer {
    /// Creates a k-mer from an ASCII nucleotide sequence.
    /// Only upper-case A/C/G/T are accepted; the producer is expected to have filtered
    /// anything else (ambiguity codes reset the k-mer window upstream).
    /// # Arguments
    /// * `sequence` - the nucleotide sequence to pack, length must be in [1, 32]
    /// # Errors
    /// * if the sequence is empty or longer than 32 bases
    /// * if the sequence contains a base other than A/C/G/T
    pub fn from_ascii(sequence: &[u8]) -> Result<Kmer, KmerError> {
        if sequence.is_empty() {
            return Err(KmerError::EmptySequence);
        }
        if sequence.len() > MAX_KMER_LEN {
            return Err(KmerError::SequenceTooLong { length: sequence.len() });
        }

        let mut packed: u64 = 0;
        for (offset, &base) in sequence.iter().enumerate() {
            let bits: u64 = match base {
                b'A' => 0,
                b'C' => 1,
                b'G' => 2,
                b'T' => 3,
                _ => {
                    return Err(KmerError::UnsupportedBase { base: base as char, offset });
                }
            };
            packed = (packed << 2) | bits;
        }

        Ok(Kmer {
            packed,
            k: sequence.len() as u8
        })
    }

    /// Returns the number of bases in this k-mer.
    pub fn len(&self) -> usize {
        self.k as usize
    }

    pub fn is_empty(&self) -> bool {
        self.k == 0
    }
}

impl std::fmt::Display for Kmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const BASES: [char; 4] = ['A', 'C', 'G', 'T'];
        for i in (0..self.k).rev() {
            let bits = (self.packed >> (2 * i)) & 0b11;
            write!(f, "{}", BASES[bits as usize])?;
        }
        Ok(())
    }
}

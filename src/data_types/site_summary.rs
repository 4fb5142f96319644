
use bit_vec::BitVec;
use rustc_hash::FxHashMap as HashMap;

/// The maximum number of haplotype paths a site can expose
pub const MAX_PATHS: usize = 65534;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SiteError {
    #[error("site at position {position} has no paths")]
    NoPaths { position: u64 },
    #[error("site at position {position} has {count} paths, more than the supported {MAX_PATHS}")]
    TooManyPaths { position: u64, count: usize },
    #[error("k-mer inserted at position {position} has an empty allele set")]
    EmptyAlleleSet { position: u64 },
    #[error("k-mer inserted at position {position} references undefined allele {allele}")]
    UndefinedAllele { position: u64, allele: u8 },
    #[error("allele {allele} does not exist at position {position}")]
    UnknownAllele { position: u64, allele: u8 },
    #[error("path {path} is not an active path at position {position}")]
    UnknownPath { position: u64, path: u16 },
    #[error("k-mer index {kmer_index} is out of range at position {position}")]
    UnknownKmer { position: u64, kmer_index: usize },
}

/// One unique k-mer observed at a site: its read support and the alleles it marks.
#[derive(Clone, Debug, PartialEq, Eq)]
struct KmerSupport {
    /// Observed read k-mer count, saturating
    readcount: u16,
    /// Bitset over allele indices, one bit per allele at this site
    alleles: BitVec
}

/// Per-site bookkeeping for the genotyping HMM: which allele each haplotype path carries,
/// which k-mers uniquely mark which alleles, and how well each k-mer is supported by reads.
///
/// Instances are produced externally (by the unique-k-mer computer) and handed to the HMM as
/// read-only input; the only mutators are the producer-facing ones (`insert_kmer`,
/// `update_readcount`, `set_coverage`, `set_undefined_allele`) and the explicit
/// `restrict_paths`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteSummary {
    /// 0-based genomic coordinate of the variant
    variant_position: u64,
    /// The allele carried by each path; the index into this vector is the path id
    path_to_allele: Vec<u8>,
    /// Per-allele undefined flag; undefined alleles are excluded from emission scoring
    undefined: Vec<bool>,
    /// The unique k-mers of this site, in insertion order
    kmers: Vec<KmerSupport>,
    /// Expected local k-mer coverage per haplotype
    local_coverage: u16
}

impl SiteSummary {
    /// Creates a new site summary.
    /// # Arguments
    /// * `variant_position` - 0-based genomic coordinate of the variant
    /// * `path_to_allele` - the allele index carried by each path, indexed by path id
    /// # Errors
    /// * if `path_to_allele` is empty or longer than `MAX_PATHS`
    pub fn new(variant_position: u64, path_to_allele: Vec<u8>) -> Result<SiteSummary, SiteError> {
        if path_to_allele.is_empty() {
            return Err(SiteError::NoPaths { position: variant_position });
        }
        if path_to_allele.len() > MAX_PATHS {
            return Err(SiteError::TooManyPaths {
                position: variant_position,
                count: path_to_allele.len()
            });
        }

        let nr_alleles: usize = *path_to_allele.iter().max().unwrap() as usize + 1;
        Ok(SiteSummary {
            variant_position,
            path_to_allele,
            undefined: vec![false; nr_alleles],
            kmers: vec![],
            local_coverage: 0
        })
    }

    pub fn variant_position(&self) -> u64 {
        self.variant_position
    }

    /// Returns the number of active paths at this site.
    pub fn nr_paths(&self) -> usize {
        self.path_to_allele.len()
    }

    /// Returns the number of allele slots at this site (defined or not).
    pub fn nr_alleles(&self) -> usize {
        self.undefined.len()
    }

    /// Returns the allele carried by the given path.
    /// # Panics
    /// * if `path` is not an active path at this site
    pub fn allele_of(&self, path: u16) -> u8 {
        self.path_to_allele[path as usize]
    }

    /// Appends a k-mer observation.
    /// # Arguments
    /// * `readcount` - the observed read k-mer count
    /// * `allele_ids` - the alleles this k-mer occurs on; must be non-empty and defined
    /// # Errors
    /// * if `allele_ids` is empty, names an unknown allele, or names an undefined allele
    pub fn insert_kmer(&mut self, readcount: u16, allele_ids: &[u8]) -> Result<(), SiteError> {
        if allele_ids.is_empty() {
            return Err(SiteError::EmptyAlleleSet { position: self.variant_position });
        }

        let mut alleles = BitVec::from_elem(self.undefined.len(), false);
        for &allele in allele_ids.iter() {
            if allele as usize >= self.undefined.len() {
                return Err(SiteError::UnknownAllele { position: self.variant_position, allele });
            }
            if self.undefined[allele as usize] {
                return Err(SiteError::UndefinedAllele { position: self.variant_position, allele });
            }
            alleles.set(allele as usize, true);
        }

        self.kmers.push(KmerSupport { readcount, alleles });
        Ok(())
    }

    /// Returns the number of unique k-mers stored for this site.
    pub fn nr_kmers(&self) -> usize {
        self.kmers.len()
    }

    /// Returns the read count of the k-mer at the given insertion index.
    /// # Errors
    /// * if `kmer_index` is out of range
    pub fn readcount_of(&self, kmer_index: usize) -> Result<u16, SiteError> {
        match self.kmers.get(kmer_index) {
            Some(k) => Ok(k.readcount),
            None => Err(SiteError::UnknownKmer { position: self.variant_position, kmer_index })
        }
    }

    /// Replaces the read count of an already inserted k-mer.
    /// The producer inserts k-mers with count 0 while scanning the graph and fills in the
    /// read support in a second pass once the read k-mers have been counted.
    /// # Errors
    /// * if `kmer_index` is out of range
    pub fn update_readcount(&mut self, kmer_index: usize, new_count: u16) -> Result<(), SiteError> {
        match self.kmers.get_mut(kmer_index) {
            Some(k) => {
                k.readcount = new_count;
                Ok(())
            },
            None => Err(SiteError::UnknownKmer { position: self.variant_position, kmer_index })
        }
    }

    /// Returns true if the k-mer at `kmer_index` occurs on the given allele.
    pub fn kmer_on_allele(&self, kmer_index: usize, allele: u8) -> bool {
        self.kmers[kmer_index].alleles.get(allele as usize).unwrap_or(false)
    }

    /// Returns true if the k-mer at `kmer_index` occurs on the allele carried by `path`.
    /// # Panics
    /// * if `path` is not an active path at this site
    pub fn kmer_on_path(&self, kmer_index: usize, path: u16) -> bool {
        self.kmer_on_allele(kmer_index, self.allele_of(path))
    }

    /// Marks an allele as undefined, excluding it from emission scoring.
    /// # Errors
    /// * if `allele` does not exist at this site
    pub fn set_undefined_allele(&mut self, allele: u8) -> Result<(), SiteError> {
        if allele as usize >= self.undefined.len() {
            return Err(SiteError::UnknownAllele { position: self.variant_position, allele });
        }
        self.undefined[allele as usize] = true;
        Ok(())
    }

    /// Returns true if the allele is undefined. Unknown alleles count as undefined.
    pub fn is_undefined_allele(&self, allele: u8) -> bool {
        self.undefined.get(allele as usize).copied().unwrap_or(true)
    }

    /// Returns the distinct alleles carried by at least one path, in ascending order.
    pub fn allele_ids(&self) -> Vec<u8> {
        let mut present: Vec<bool> = vec![false; self.undefined.len()];
        for &allele in self.path_to_allele.iter() {
            present[allele as usize] = true;
        }
        present.iter().enumerate()
            .filter(|(_, &p)| p)
            .map(|(a, _)| a as u8)
            .collect()
    }

    /// Returns the distinct defined alleles carried by at least one path, in ascending order.
    pub fn defined_allele_ids(&self) -> Vec<u8> {
        self.allele_ids().into_iter()
            .filter(|&a| !self.undefined[a as usize])
            .collect()
    }

    /// Returns the number of unique k-mers marking the given allele.
    pub fn kmers_on_allele(&self, allele: u8) -> usize {
        self.kmers.iter()
            .filter(|k| k.alleles.get(allele as usize).unwrap_or(false))
            .count()
    }

    /// Returns the number of read-supported unique k-mers marking the given allele.
    pub fn present_kmers_on_allele(&self, allele: u8) -> usize {
        self.kmers.iter()
            .filter(|k| k.readcount > 0 && k.alleles.get(allele as usize).unwrap_or(false))
            .count()
    }

    /// Returns the fraction of this allele's unique k-mers that have read support.
    /// Alleles without any unique k-mers return 0.
    pub fn fraction_present_kmers_on_allele(&self, allele: u8) -> f32 {
        let total = self.kmers_on_allele(allele);
        if total == 0 {
            0.0
        } else {
            self.present_kmers_on_allele(allele) as f32 / total as f32
        }
    }

    /// Returns the number of unique k-mers covering each allele carried by a path.
    pub fn kmers_on_alleles(&self) -> HashMap<u8, usize> {
        self.allele_ids().into_iter()
            .map(|a| (a, self.kmers_on_allele(a)))
            .collect()
    }

    /// Returns the active path ids and their alleles, optionally filtered to a path subset.
    /// Output order follows the order stored in `path_to_allele` regardless of the order
    /// inside `only_include`.
    /// # Arguments
    /// * `only_include` - optional subset of path ids to keep
    /// # Errors
    /// * if `only_include` names a path that is not active at this site
    pub fn paths_and_alleles(
        &self,
        only_include: Option<&[u16]>
    ) -> Result<(Vec<u16>, Vec<u8>), SiteError> {
        let keep: Option<BitVec> = match only_include {
            Some(subset) => {
                let mut keep = BitVec::from_elem(self.path_to_allele.len(), false);
                for &path in subset.iter() {
                    if path as usize >= self.path_to_allele.len() {
                        return Err(SiteError::UnknownPath { position: self.variant_position, path });
                    }
                    keep.set(path as usize, true);
                }
                Some(keep)
            },
            None => None
        };

        let mut paths: Vec<u16> = vec![];
        let mut alleles: Vec<u8> = vec![];
        for (path, &allele) in self.path_to_allele.iter().enumerate() {
            let included = match keep.as_ref() {
                Some(k) => k.get(path).unwrap_or(false),
                None => true
            };
            if included {
                paths.push(path as u16);
                alleles.push(allele);
            }
        }
        Ok((paths, alleles))
    }

    /// Rewrites `path_to_allele` to the subsequence indexed by `keep_paths`; the k-mer and
    /// allele structure is unchanged. After this call path ids are re-assigned to
    /// `0..keep_paths.len()` in the order given.
    ///
    /// Concurrent HMM runs must not use this: they restrict their state space through the
    /// `only_paths` configuration instead, which leaves the summary untouched.
    /// # Errors
    /// * if `keep_paths` is empty or names a path that is not active at this site
    pub fn restrict_paths(&mut self, keep_paths: &[u16]) -> Result<(), SiteError> {
        if keep_paths.is_empty() {
            return Err(SiteError::NoPaths { position: self.variant_position });
        }
        let mut restricted: Vec<u8> = Vec::with_capacity(keep_paths.len());
        for &path in keep_paths.iter() {
            match self.path_to_allele.get(path as usize) {
                Some(&allele) => restricted.push(allele),
                None => {
                    return Err(SiteError::UnknownPath { position: self.variant_position, path });
                }
            }
        }
        self.path_to_allele = restricted;
        Ok(())
    }

    /// Sets the local per-haplotype k-mer coverage computed for this site.
    pub fn set_coverage(&mut self, local_coverage: u16) {
        self.local_coverage = local_coverage;
    }

    /// Returns the local per-haplotype k-mer coverage.
    pub fn coverage(&self) -> u16 {
        self.local_coverage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_summary() -> SiteSummary {
        // 4 paths: p0,p1 carry allele 0; p2 carries allele 1; p3 carries allele 2
        let mut summary = SiteSummary::new(1000, vec![0, 0, 1, 2]).unwrap();
        summary.insert_kmer(10, &[0]).unwrap();
        summary.insert_kmer(0, &[0, 1]).unwrap();
        summary.insert_kmer(7, &[2]).unwrap();
        summary
    }

    #[test]
    fn test_construction_errors() {
        assert_eq!(
            SiteSummary::new(5, vec![]).unwrap_err(),
            SiteError::NoPaths { position: 5 }
        );
    }

    #[test]
    fn test_kmer_queries() {
        let summary = test_summary();
        assert_eq!(summary.nr_paths(), 4);
        assert_eq!(summary.nr_alleles(), 3);
        assert_eq!(summary.nr_kmers(), 3);
        assert_eq!(summary.allele_of(1), 0);
        assert_eq!(summary.allele_of(3), 2);

        assert_eq!(summary.kmers_on_allele(0), 2);
        assert_eq!(summary.kmers_on_allele(1), 1);
        assert_eq!(summary.kmers_on_allele(2), 1);
        assert_eq!(summary.present_kmers_on_allele(0), 1);
        assert_eq!(summary.present_kmers_on_allele(1), 0);
        assert!((summary.fraction_present_kmers_on_allele(0) - 0.5).abs() < f32::EPSILON);

        assert!(summary.kmer_on_allele(1, 0));
        assert!(summary.kmer_on_allele(1, 1));
        assert!(!summary.kmer_on_allele(0, 1));
        assert!(summary.kmer_on_path(0, 1));
        assert!(!summary.kmer_on_path(0, 2));
        assert_eq!(summary.readcount_of(2).unwrap(), 7);

        let counts = summary.kmers_on_alleles();
        assert_eq!(counts.get(&0), Some(&2));
        assert_eq!(counts.get(&2), Some(&1));
    }

    #[test]
    fn test_update_readcount() {
        let mut summary = test_summary();
        summary.update_readcount(1, 42).unwrap();
        assert_eq!(summary.readcount_of(1).unwrap(), 42);
        assert_eq!(summary.present_kmers_on_allele(1), 1);
        assert_eq!(
            summary.update_readcount(3, 1).unwrap_err(),
            SiteError::UnknownKmer { position: 1000, kmer_index: 3 }
        );
    }

    #[test]
    fn test_insert_rejections() {
        let mut summary = test_summary();
        assert_eq!(
            summary.insert_kmer(1, &[]).unwrap_err(),
            SiteError::EmptyAlleleSet { position: 1000 }
        );
        assert_eq!(
            summary.insert_kmer(1, &[7]).unwrap_err(),
            SiteError::UnknownAllele { position: 1000, allele: 7 }
        );

        summary.set_undefined_allele(2).unwrap();
        assert!(summary.is_undefined_allele(2));
        assert_eq!(
            summary.insert_kmer(1, &[0, 2]).unwrap_err(),
            SiteError::UndefinedAllele { position: 1000, allele: 2 }
        );
        // insertion order of the successful k-mers is stable
        assert_eq!(summary.nr_kmers(), 3);
        assert_eq!(summary.readcount_of(0).unwrap(), 10);
    }

    #[test]
    fn test_defined_allele_ids() {
        let mut summary = test_summary();
        assert_eq!(summary.allele_ids(), vec![0, 1, 2]);
        summary.set_undefined_allele(1).unwrap();
        assert_eq!(summary.allele_ids(), vec![0, 1, 2]);
        assert_eq!(summary.defined_allele_ids(), vec![0, 2]);
    }

    #[test]
    fn test_paths_and_alleles_filter() {
        let summary = test_summary();
        let (paths, alleles) = summary.paths_and_alleles(None).unwrap();
        assert_eq!(paths, vec![0, 1, 2, 3]);
        assert_eq!(alleles, vec![0, 0, 1, 2]);

        // filter output follows path_to_allele order, not subset order
        let (paths, alleles) = summary.paths_and_alleles(Some(&[3, 0])).unwrap();
        assert_eq!(paths, vec![0, 3]);
        assert_eq!(alleles, vec![0, 2]);

        assert_eq!(
            summary.paths_and_alleles(Some(&[4])).unwrap_err(),
            SiteError::UnknownPath { position: 1000, path: 4 }
        );
    }

    #[test]
    fn test_restrict_paths() {
        let mut summary = test_summary();
        summary.restrict_paths(&[0, 2]).unwrap();
        assert_eq!(summary.nr_paths(), 2);
        assert_eq!(summary.allele_of(0), 0);
        assert_eq!(summary.allele_of(1), 1);
        // k-mer structure is untouched
        assert_eq!(summary.nr_kmers(), 3);
        assert_eq!(summary.kmers_on_allele(2), 1);

        assert_eq!(
            summary.restrict_paths(&[]).unwrap_err(),
            SiteError::NoPaths { position: 1000 }
        );
        assert_eq!(
            summary.restrict_paths(&[5]).unwrap_err(),
            SiteError::UnknownPath { position: 1000, path: 5 }
        );
    }

    #[test]
    fn test_coverage() {
        let mut summary = test_summary();
        assert_eq!(summary.coverage(), 0);
        summary.set_coverage(31);
        assert_eq!(summary.coverage(), 31);
    }
}

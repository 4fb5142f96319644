
use crate::data_types::site_summary::{SiteError, SiteSummary};

/// Canonical enumeration of the hidden states at one site: all ordered pairs of active
/// haplotype paths, row-major by the first path. Path order follows the order stored in the
/// site's `path_to_allele`, optionally filtered down to a run-specific path subset, so a
/// restricted run never touches the shared summary.
#[derive(Debug)]
pub struct ColumnIndexer {
    /// The path ids forming the state space, in `path_to_allele` order
    path_ids: Vec<u16>,
    /// The allele carried by each entry of `path_ids`
    allele_ids: Vec<u8>
}

impl ColumnIndexer {
    /// Builds the state enumeration for one site.
    /// # Arguments
    /// * `summary` - the site whose paths form the state space
    /// * `only_paths` - optional subset of path ids; must name active paths only
    /// # Errors
    /// * if `only_paths` names a path that is not active at the site
    /// * if the resulting state space is empty
    pub fn new(summary: &SiteSummary, only_paths: Option<&[u16]>) -> Result<ColumnIndexer, SiteError> {
        let (path_ids, allele_ids) = summary.paths_and_alleles(only_paths)?;
        if path_ids.is_empty() {
            return Err(SiteError::NoPaths { position: summary.variant_position() });
        }
        Ok(ColumnIndexer {
            path_ids,
            allele_ids
        })
    }

    /// Returns the number of paths in the state space.
    pub fn nr_paths(&self) -> usize {
        self.path_ids.len()
    }

    /// Returns the number of hidden states, i.e. the column length.
    pub fn column_size(&self) -> usize {
        self.path_ids.len() * self.path_ids.len()
    }

    /// Returns the path id behind the given local path index.
    pub fn path_at(&self, path_index: usize) -> u16 {
        self.path_ids[path_index]
    }

    /// Returns the allele carried by the given local path index.
    pub fn allele_at(&self, path_index: usize) -> u8 {
        self.allele_ids[path_index]
    }

    /// Returns the column offset of the ordered pair of local path indices.
    pub fn index_of(&self, path_index1: usize, path_index2: usize) -> usize {
        debug_assert!(path_index1 < self.path_ids.len());
        debug_assert!(path_index2 < self.path_ids.len());
        path_index1 * self.path_ids.len() + path_index2
    }

    /// Returns the ordered pair of local path indices behind a column offset.
    pub fn pair_of(&self, column_index: usize) -> (usize, usize) {
        debug_assert!(column_index < self.column_size());
        (column_index / self.path_ids.len(), column_index % self.path_ids.len())
    }

    /// Returns true if both indexers enumerate the same path ids in the same order.
    pub fn same_paths(&self, other: &ColumnIndexer) -> bool {
        self.path_ids == other.path_ids
    }
}

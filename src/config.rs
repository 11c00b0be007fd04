//! Open-time configuration.

use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;

/// Default limit on archive-in-archive nesting.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 8;

/// Options for [`Archive::open_with`](crate::Archive::open_with).
///
/// ```no_run
/// use mpqstream::{Archive, OpenOptions};
///
/// let options = OpenOptions::new().load_listfile(false).max_nesting_depth(2);
/// let archive = Archive::open_with_options("patch.mpq", options)?;
/// # Ok::<(), mpqstream::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Maximum depth of containers opened through
    /// [`Archive::open_nested`](crate::Archive::open_nested).  A root archive
    /// has depth 0.
    pub max_nesting_depth: usize,
    /// Ask the engine to decode `(listfile)` so entry names are known.
    pub load_listfile:     bool,
    /// How far (bytes) the engine may scan for a header when the offset is
    /// detected.  `None` scans the whole file.
    pub search_limit:      Option<u64>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            load_listfile:     true,
            search_limit:      None,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    pub fn load_listfile(mut self, load: bool) -> Self {
        self.load_listfile = load;
        self
    }

    pub fn search_limit(mut self, limit: Option<u64>) -> Self {
        self.search_limit = limit;
        self
    }

    pub(crate) fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            load_listfile: self.load_listfile,
            search_limit:  self.search_limit,
        }
    }
}

//! Prelude.

pub use crate::results::*;

// Re-export pointer macros.
pub use crate::{arc_ptr, rc_ptr, rc_refcell_ptr};

// Re-export `ahash`.
pub use ahash::AHashMap as HashMap;
pub use ahash::AHashSet as HashSet;

// Re-export `log` macros.
pub use log::{debug, error, info, trace, warn};

// Re-export `std::path`.
pub use std::path::{Path, PathBuf};

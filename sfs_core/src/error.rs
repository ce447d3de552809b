//! Error taxonomy for the storage core.
//!
//! The host ABI (§6 of the design) flattens every error down to a `-1`
//! sentinel, or to a short byte count for read/write. Internally we keep the
//! distinctions so tests and callers inside this crate can reason about what
//! actually went wrong.

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Path resolution failed: a component was missing, or an intermediate
    /// component was not a directory.
    #[error("path not found")]
    NotFound,

    /// Null inode, out-of-range index, or a bad argument such as a negative
    /// offset.
    #[error("invalid argument")]
    Invalid,

    /// The block or inode allocator is exhausted.
    #[error("no space left on device")]
    NoSpace,

    /// `rmdir` was called on a directory with live entries.
    #[error("directory not empty")]
    NotEmpty,

    /// An on-disk invariant was violated (e.g. a gap in the block table
    /// discovered while shrinking).
    #[error("on-disk structure is corrupt")]
    Corruption,
}

pub type FsResult<T> = Result<T, FsError>;

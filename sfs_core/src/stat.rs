//! The metadata snapshot handed back by [`crate::facade::Filesystem::stat`].

use sfs_types::InodeNo;

/// A point-in-time snapshot of an inode's metadata.
///
/// Timestamps are always zero: the core has no notion of wall-clock time
/// (see the design's Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub inum: InodeNo,
    pub mode: u32,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    pub block_size: u32,
    pub size: u64,
    pub blocks: u32,
}

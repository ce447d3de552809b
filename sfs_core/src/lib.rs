//! Inode allocator, directory encoding, path resolver and storage façade
//! for a single-threaded filesystem hosted inside one fixed-size block
//! image.
//!
//! [`Filesystem`] is the entry point; everything else is composed
//! underneath it. The crate never spawns a thread and never blocks: every
//! operation runs to completion against an in-memory (or memory-mapped)
//! image supplied through the [`BlockStore`] trait.

pub mod block_store;
pub mod directory;
pub mod error;
pub mod facade;
pub mod inode;
pub mod path;
pub mod stat;

pub use block_store::{BitmapMut, BitmapRef, BlockStore, FileBlockStore, MemBlockStore};
pub use error::{FsError, FsResult};
pub use facade::Filesystem;
pub use stat::Stat;

pub use sfs_types::{BlockNo, InodeNo, BLOCK_SIZE, MAX_FILE_SIZE, NDIRECT};

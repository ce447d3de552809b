//! On-disk data types for the block-image filesystem.
//!
//! The data layout, one block-image file:
//!
//! | block(s)                 | content                                       |
//! |---------------------------|-----------------------------------------------|
//! | 0                         | block bitmap, then inode bitmap (packed)      |
//! | 1..=inode table blocks    | inode table, [`Inode`] records, `INODE_SIZE` stride |
//! | remaining                 | data blocks                                   |
//!
//! Everything here is a plain byte layout ([`dataview::Pod`]); no pointers,
//! no validation. The allocator and path-resolution logic that interpret
//! these bytes live in `sfs_core`.

use std::fmt;

use dataview::Pod;

/// Default block size used by the block store.
pub const BLOCK_SIZE: usize = 4096;

/// Number of block numbers stored directly in an inode.
pub const NDIRECT: usize = 12;

/// Number of block numbers reachable through the single indirect block.
pub const NINDIRECT: usize = BLOCK_SIZE / size_of::<u32>();

/// Maximum number of data blocks addressable by one inode.
pub const MAX_FILE_BLOCKS: usize = NDIRECT + NINDIRECT;

/// Maximum file size in bytes.
pub const MAX_FILE_SIZE: u64 = (MAX_FILE_BLOCKS * BLOCK_SIZE) as u64;

/// Maximum length of a path component, not counting the terminating NUL.
pub const DIR_NAME_LENGTH: usize = 48;

/// Reserved padding trailing a [`DirEntry`], kept zeroed.
const DIRENT_RESERVED: usize = 12;

/// Directory type bit, matching the high bits of a standard Unix `mode_t`.
pub const S_IFDIR: u32 = 0o040000;
/// Regular file type bit.
pub const S_IFREG: u32 = 0o100000;
/// File-type mask.
pub const S_IFMT: u32 = 0o170000;

pub const S_IRUSR: u32 = 0o400;
pub const S_IWUSR: u32 = 0o200;
pub const S_IXUSR: u32 = 0o100;

#[must_use]
pub const fn mode_is_dir(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

#[must_use]
pub const fn mode_is_reg(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}

#[must_use]
pub const fn mode_can_read_owner(mode: u32) -> bool {
    mode & S_IRUSR != 0
}

#[must_use]
pub const fn mode_can_write_owner(mode: u32) -> bool {
    mode & S_IWUSR != 0
}

#[must_use]
pub const fn mode_can_exec_owner(mode: u32) -> bool {
    mode & S_IXUSR != 0
}

/// Block number; index into the block store. `0` is the null sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod)]
#[repr(transparent)]
pub struct BlockNo(u32);

impl BlockNo {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn as_index(self) -> usize {
        usize::try_from(self.0).expect("block number overflows usize")
    }
}

impl fmt::Display for BlockNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inode number; index into the inode table. `0` is permanently the null inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod)]
#[repr(transparent)]
pub struct InodeNo(u32);

impl InodeNo {
    pub const NULL: Self = Self(0);
    pub const ROOT: Self = Self(1);

    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn as_index(self) -> usize {
        usize::try_from(self.0).expect("inode number overflows usize")
    }
}

impl fmt::Display for InodeNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-size on-disk inode record.
///
/// Block-number slots are packed from `direct[0]` upward and then into the
/// indirect block, with no internal gaps, for every inode currently in use.
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
pub struct Inode {
    /// Own index; redundant with table position, used to validate pointers.
    pub inum: u32,
    /// Unix-style mode bits: file type in the high bits, permissions low.
    pub mode: u32,
    /// Reserved reference count; maintained but not enforced by the core.
    pub refs: u32,
    /// Hard-link count. The inode is freed when this reaches zero.
    pub links: u32,
    /// File size in bytes.
    pub size: u32,
    /// Direct block pointers; `0` means an unallocated slot.
    pub direct: [u32; NDIRECT],
    /// Single indirect block pointer; `0` means unallocated.
    pub indirect: u32,
}

/// Size in bytes of one on-disk inode record.
pub const INODE_SIZE: usize = size_of::<Inode>();

const _: () = assert!(INODE_SIZE == 72);

impl Inode {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            inum: 0,
            mode: 0,
            refs: 0,
            links: 0,
            size: 0,
            direct: [0; NDIRECT],
            indirect: 0,
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        mode_is_dir(self.mode)
    }

    #[must_use]
    pub fn is_reg(&self) -> bool {
        mode_is_reg(self.mode)
    }

    /// Number of blocks needed to hold `size` bytes of content.
    #[must_use]
    pub fn blocks_for_size(size: u64) -> u32 {
        u32::try_from(size.div_ceil(safe_cast::to_u64!(BLOCK_SIZE)))
            .expect("file size overflows block count")
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        Self::blocks_for_size(u64::from(self.size))
    }

    /// Returns the direct/indirect slot at index `k`, if it names one of the
    /// two pointer arrays. `k >= NDIRECT + NINDIRECT` is out of range.
    #[must_use]
    pub fn direct_slot(&self, k: usize) -> Option<BlockNo> {
        self.direct.get(k).map(|&n| BlockNo::new(n))
    }

    pub fn set_direct_slot(&mut self, k: usize, bn: BlockNo) {
        self.direct[k] = bn.value();
    }

    #[must_use]
    pub fn indirect_block(&self) -> BlockNo {
        BlockNo::new(self.indirect)
    }

    pub fn set_indirect_block(&mut self, bn: BlockNo) {
        self.indirect = bn.value();
    }
}

/// Indirect block contents: an array of additional block numbers.
#[derive(Pod)]
#[repr(transparent)]
pub struct IndirectBlock([u32; NINDIRECT]);

const _: () = assert!(size_of::<IndirectBlock>() == BLOCK_SIZE);

impl IndirectBlock {
    #[must_use]
    pub fn get(&self, i: usize) -> BlockNo {
        BlockNo::new(self.0[i])
    }

    pub fn set(&mut self, i: usize, bn: BlockNo) {
        self.0[i] = bn.value();
    }
}

/// Fixed-size directory entry: name, target inode, reserved padding.
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
pub struct DirEntry {
    name: [u8; DIR_NAME_LENGTH],
    /// `0` marks a tombstone / free slot.
    inum: u32,
    _reserved: [u8; DIRENT_RESERVED],
}

/// Size in bytes of one on-disk directory entry.
pub const DIRENT_SIZE: usize = size_of::<DirEntry>();

const _: () = assert!(DIRENT_SIZE == 64);

impl DirEntry {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            name: [0; DIR_NAME_LENGTH],
            inum: 0,
            _reserved: [0; DIRENT_RESERVED],
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.inum == 0
    }

    #[must_use]
    pub fn inum(&self) -> Option<InodeNo> {
        (self.inum != 0).then(|| InodeNo::new(self.inum))
    }

    pub fn set_inum(&mut self, inum: Option<InodeNo>) {
        self.inum = inum.map_or(0, InodeNo::value);
    }

    /// Name bytes, with the trailing NUL padding trimmed off.
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }

    #[must_use]
    pub fn name_str(&self) -> &str {
        std::str::from_utf8(self.name_bytes()).unwrap_or_default()
    }

    /// Writes `name` into the entry, NUL-padding the remainder.
    ///
    /// # Panics
    ///
    /// Panics if `name` is longer than `DIR_NAME_LENGTH - 1` bytes (room for
    /// the terminating NUL) or contains a NUL byte or a `/`.
    pub fn set_name(&mut self, name: &str) {
        assert!(name.len() < DIR_NAME_LENGTH, "component name too long");
        assert!(!name.contains('\0') && !name.contains('/'), "invalid component name");
        self.name = [0; DIR_NAME_LENGTH];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }

    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_layout_size() {
        assert_eq!(INODE_SIZE, 72);
        assert_eq!(DIRENT_SIZE, 64);
    }

    #[test]
    fn dirent_name_roundtrip() {
        let mut de = DirEntry::zeroed();
        de.set_name("hello.txt");
        assert_eq!(de.name_str(), "hello.txt");
        assert!(de.matches_name("hello.txt"));
        assert!(de.is_tombstone());
        de.set_inum(Some(InodeNo::new(5)));
        assert!(!de.is_tombstone());
        assert_eq!(de.inum(), Some(InodeNo::new(5)));
    }

    #[test]
    fn mode_decoding() {
        let dir_mode = S_IFDIR | 0o755;
        let file_mode = S_IFREG | 0o644;
        assert!(mode_is_dir(dir_mode));
        assert!(!mode_is_reg(dir_mode));
        assert!(mode_is_reg(file_mode));
        assert!(mode_can_read_owner(file_mode));
        assert!(mode_can_write_owner(file_mode));
        assert!(!mode_can_exec_owner(file_mode));
    }

    #[test]
    fn block_count_math() {
        assert_eq!(Inode::blocks_for_size(0), 0);
        assert_eq!(Inode::blocks_for_size(1), 1);
        assert_eq!(Inode::blocks_for_size(BLOCK_SIZE as u64), 1);
        assert_eq!(Inode::blocks_for_size(BLOCK_SIZE as u64 + 1), 2);
    }
}

//! The block device abstraction.
//!
//! This is the external collaborator the core is built against: a fixed-size
//! array of equal-sized blocks, plus two bitmaps persisted at known offsets.
//! The core never assumes anything about how a [`BlockStore`] persists
//! itself; it only ever calls the methods below. [`MemBlockStore`] and
//! [`FileBlockStore`] are the two concrete stand-ins this crate ships so the
//! rest of the core is actually runnable and testable.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use sfs_types::{BlockNo, BLOCK_SIZE};

use crate::error::{FsError, FsResult};

/// Number of inodes baked into every image this crate creates. A real
/// deployment would size this at `mkfs` time; we fix it the way xv6-style
/// toy filesystems do, so a bare block count is enough to reopen an image.
pub const DEFAULT_INODE_COUNT: u32 = 200;

/// Read-only view over a packed bit vector.
pub struct BitmapRef<'a> {
    bits: &'a [u8],
    len: u32,
}

impl BitmapRef<'_> {
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn get(&self, index: u32) -> bool {
        assert!(index < self.len, "bitmap index {index} out of range");
        let i = index as usize;
        self.bits[i / 8] & (1 << (i % 8)) != 0
    }
}

/// Mutable view over a packed bit vector.
pub struct BitmapMut<'a> {
    bits: &'a mut [u8],
    len: u32,
}

impl BitmapMut<'_> {
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub fn get(&self, index: u32) -> bool {
        assert!(index < self.len, "bitmap index {index} out of range");
        let i = index as usize;
        self.bits[i / 8] & (1 << (i % 8)) != 0
    }

    pub fn set(&mut self, index: u32) {
        assert!(index < self.len, "bitmap index {index} out of range");
        let i = index as usize;
        self.bits[i / 8] |= 1 << (i % 8);
    }

    pub fn clear(&mut self, index: u32) {
        assert!(index < self.len, "bitmap index {index} out of range");
        let i = index as usize;
        self.bits[i / 8] &= !(1 << (i % 8));
    }

    /// Scans from `start` upward for the first clear bit.
    #[must_use]
    pub fn find_first_clear(&self, start: u32) -> Option<u32> {
        (start..self.len).find(|&i| !self.get(i))
    }
}

/// The capability the core consumes: a fixed-size array of blocks with two
/// bitmaps persisted at known offsets.
pub trait BlockStore {
    /// Total number of blocks in the image.
    fn num_blocks(&self) -> u32;

    /// Total number of inode-table slots in the image.
    fn num_inodes(&self) -> u32;

    /// Mutable view into block `bnum`.
    fn block_mut(&mut self, bnum: BlockNo) -> FsResult<&mut [u8; BLOCK_SIZE]>;

    /// Read-only view into block `bnum`.
    fn block(&self, bnum: BlockNo) -> FsResult<&[u8; BLOCK_SIZE]>;

    /// View of the block-usage bitmap; bit `i` set iff block `i` is in use.
    fn block_bitmap(&self) -> BitmapRef<'_>;
    fn block_bitmap_mut(&mut self) -> BitmapMut<'_>;

    /// View of the inode-usage bitmap; bit `i` set iff inode `i` is in use.
    fn inode_bitmap(&self) -> BitmapRef<'_>;
    fn inode_bitmap_mut(&mut self) -> BitmapMut<'_>;
}

/// Packed image layout shared by [`MemBlockStore`] and [`FileBlockStore`]:
/// block 0 holds both bitmaps, the block bitmap first and the inode bitmap
/// immediately after it.
struct Image {
    blocks: Vec<u8>,
    num_blocks: u32,
    num_inodes: u32,
    block_bitmap_len: usize,
    inode_bitmap_offset: usize,
    inode_bitmap_len: usize,
}

impl Image {
    fn new(num_blocks: u32, num_inodes: u32) -> Self {
        let block_bitmap_len = (num_blocks as usize).div_ceil(8);
        let inode_bitmap_offset = block_bitmap_len;
        let inode_bitmap_len = (num_inodes as usize).div_ceil(8);
        assert!(
            inode_bitmap_offset + inode_bitmap_len <= BLOCK_SIZE,
            "bitmaps for {num_blocks} blocks / {num_inodes} inodes do not fit in one block",
        );
        Self {
            blocks: vec![0_u8; num_blocks as usize * BLOCK_SIZE],
            num_blocks,
            num_inodes,
            block_bitmap_len,
            inode_bitmap_offset,
            inode_bitmap_len,
        }
    }

    fn from_blocks(blocks: Vec<u8>, num_blocks: u32, num_inodes: u32) -> Self {
        let mut image = Self::new(num_blocks, num_inodes);
        assert_eq!(blocks.len(), image.blocks.len());
        image.blocks = blocks;
        image
    }

    fn block_slice(&self, bnum: BlockNo) -> FsResult<&[u8]> {
        let idx = bnum.as_index();
        if idx >= self.num_blocks as usize {
            return Err(FsError::Invalid);
        }
        Ok(&self.blocks[idx * BLOCK_SIZE..][..BLOCK_SIZE])
    }

    fn block_slice_mut(&mut self, bnum: BlockNo) -> FsResult<&mut [u8]> {
        let idx = bnum.as_index();
        if idx >= self.num_blocks as usize {
            return Err(FsError::Invalid);
        }
        Ok(&mut self.blocks[idx * BLOCK_SIZE..][..BLOCK_SIZE])
    }
}

impl BlockStore for Image {
    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn num_inodes(&self) -> u32 {
        self.num_inodes
    }

    fn block_mut(&mut self, bnum: BlockNo) -> FsResult<&mut [u8; BLOCK_SIZE]> {
        self.block_slice_mut(bnum)
            .map(|s| (s.try_into().unwrap()))
    }

    fn block(&self, bnum: BlockNo) -> FsResult<&[u8; BLOCK_SIZE]> {
        self.block_slice(bnum).map(|s| s.try_into().unwrap())
    }

    fn block_bitmap(&self) -> BitmapRef<'_> {
        BitmapRef {
            bits: &self.blocks[..self.block_bitmap_len],
            len: self.num_blocks,
        }
    }

    fn block_bitmap_mut(&mut self) -> BitmapMut<'_> {
        BitmapMut {
            bits: &mut self.blocks[..self.block_bitmap_len],
            len: self.num_blocks,
        }
    }

    fn inode_bitmap(&self) -> BitmapRef<'_> {
        let start = self.inode_bitmap_offset;
        BitmapRef {
            bits: &self.blocks[start..][..self.inode_bitmap_len],
            len: self.num_inodes,
        }
    }

    fn inode_bitmap_mut(&mut self) -> BitmapMut<'_> {
        let start = self.inode_bitmap_offset;
        BitmapMut {
            bits: &mut self.blocks[start..][..self.inode_bitmap_len],
            len: self.num_inodes,
        }
    }
}

/// A purely in-memory block store, used by tests and anything that does not
/// need the image to survive the process.
pub struct MemBlockStore(Image);

impl MemBlockStore {
    #[must_use]
    pub fn new(num_blocks: u32, num_inodes: u32) -> Self {
        Self(Image::new(num_blocks, num_inodes))
    }
}

impl BlockStore for MemBlockStore {
    fn num_blocks(&self) -> u32 {
        self.0.num_blocks()
    }

    fn num_inodes(&self) -> u32 {
        self.0.num_inodes()
    }

    fn block_mut(&mut self, bnum: BlockNo) -> FsResult<&mut [u8; BLOCK_SIZE]> {
        self.0.block_mut(bnum)
    }

    fn block(&self, bnum: BlockNo) -> FsResult<&[u8; BLOCK_SIZE]> {
        self.0.block(bnum)
    }

    fn block_bitmap(&self) -> BitmapRef<'_> {
        self.0.block_bitmap()
    }

    fn block_bitmap_mut(&mut self) -> BitmapMut<'_> {
        self.0.block_bitmap_mut()
    }

    fn inode_bitmap(&self) -> BitmapRef<'_> {
        self.0.inode_bitmap()
    }

    fn inode_bitmap_mut(&mut self) -> BitmapMut<'_> {
        self.0.inode_bitmap_mut()
    }
}

/// A block store backed by a single fixed-size file. The whole image is
/// held in memory and flushed back with [`FileBlockStore::sync`]; nothing is
/// written behind the caller's back.
pub struct FileBlockStore {
    image: Image,
    file: File,
}

impl FileBlockStore {
    /// Creates a fresh, zeroed image of `num_blocks` blocks at `path`,
    /// truncating any existing file.
    pub fn create(path: impl AsRef<Path>, num_blocks: u32) -> io::Result<Self> {
        Self::create_with_inode_count(path, num_blocks, DEFAULT_INODE_COUNT)
    }

    pub fn create_with_inode_count(
        path: impl AsRef<Path>,
        num_blocks: u32,
        num_inodes: u32,
    ) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let image = Image::new(num_blocks, num_inodes);
        let mut store = Self { image, file };
        store.sync()?;
        Ok(store)
    }

    /// Opens an existing image file. The block count is derived from the
    /// file length; the inode count must be supplied, since nothing in the
    /// on-disk layout records it (see [`DEFAULT_INODE_COUNT`]).
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with_inode_count(path, DEFAULT_INODE_COUNT)
    }

    pub fn open_with_inode_count(path: impl AsRef<Path>, num_inodes: u32) -> io::Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        assert_eq!(
            len as usize % BLOCK_SIZE,
            0,
            "image file length is not a multiple of the block size"
        );
        let num_blocks = u32::try_from(len as usize / BLOCK_SIZE)
            .expect("image file has more blocks than fit in u32");

        let mut blocks = vec![0_u8; len as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut blocks)?;

        let image = Image::from_blocks(blocks, num_blocks, num_inodes);
        Ok(Self { image, file })
    }

    /// Flushes the in-memory image back to the backing file.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.image.blocks)?;
        self.file.flush()
    }
}

impl BlockStore for FileBlockStore {
    fn num_blocks(&self) -> u32 {
        self.image.num_blocks()
    }

    fn num_inodes(&self) -> u32 {
        self.image.num_inodes()
    }

    fn block_mut(&mut self, bnum: BlockNo) -> FsResult<&mut [u8; BLOCK_SIZE]> {
        self.image.block_mut(bnum)
    }

    fn block(&self, bnum: BlockNo) -> FsResult<&[u8; BLOCK_SIZE]> {
        self.image.block(bnum)
    }

    fn block_bitmap(&self) -> BitmapRef<'_> {
        self.image.block_bitmap()
    }

    fn block_bitmap_mut(&mut self) -> BitmapMut<'_> {
        self.image.block_bitmap_mut()
    }

    fn inode_bitmap(&self) -> BitmapRef<'_> {
        self.image.inode_bitmap()
    }

    fn inode_bitmap_mut(&mut self) -> BitmapMut<'_> {
        self.image.inode_bitmap_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_round_trip() {
        let mut store = MemBlockStore::new(64, 16);
        {
            let mut bm = store.block_bitmap_mut();
            assert!(!bm.get(3));
            bm.set(3);
            assert!(bm.get(3));
            bm.clear(3);
            assert!(!bm.get(3));
        }
    }

    #[test]
    fn find_first_clear_scans_from_start() {
        let mut store = MemBlockStore::new(8, 8);
        let mut bm = store.inode_bitmap_mut();
        bm.set(0);
        bm.set(1);
        assert_eq!(bm.find_first_clear(0), Some(2));
        assert_eq!(bm.find_first_clear(3), Some(3));
    }

    #[test]
    fn block_round_trip() {
        let mut store = MemBlockStore::new(4, 8);
        store.block_mut(BlockNo::new(2)).unwrap()[0] = 0xAB;
        assert_eq!(store.block(BlockNo::new(2)).unwrap()[0], 0xAB);
    }
}

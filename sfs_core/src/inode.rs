//! Inode allocator and data-block machinery.
//!
//! Every operation here takes a [`BlockStore`] and an [`InodeNo`] rather
//! than holding on to a reference into the block image: a held reference
//! would be invalidated the moment another call allocates or frees a block
//! (see the design notes on bitmap/inode consistency). Callers read an
//! inode, mutate the in-memory copy, and write it back explicitly.

use dataview::PodMethods as _;
use sfs_types::{
    BlockNo, IndirectBlock, Inode, InodeNo, BLOCK_SIZE, INODE_SIZE, MAX_FILE_SIZE, NDIRECT,
    NINDIRECT,
};

use crate::{
    block_store::BlockStore,
    error::{FsError, FsResult},
};

/// Number of packed inode records per block.
const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

fn inode_block_no(inum: InodeNo) -> BlockNo {
    BlockNo::new(1 + u32::try_from(inum.as_index() / INODES_PER_BLOCK).unwrap())
}

fn inode_offset_in_block(inum: InodeNo) -> usize {
    (inum.as_index() % INODES_PER_BLOCK) * INODE_SIZE
}

/// Number of blocks needed to hold the inode table for `num_inodes` inodes.
#[must_use]
pub fn inode_table_blocks(num_inodes: u32) -> u32 {
    u32::try_from((num_inodes as usize).div_ceil(INODES_PER_BLOCK)).unwrap()
}

/// Marks inode 0 permanently used and reserves the blocks holding the inode
/// table (and the bitmap block itself) in the block bitmap. Idempotent:
/// safe to call on every mount.
pub fn inode_init(store: &mut dyn BlockStore) -> FsResult<()> {
    store.inode_bitmap_mut().set(0);

    // Block 0 carries the bitmaps themselves and must never be handed out
    // as a data block.
    store.block_bitmap_mut().set(0);

    let table_blocks = inode_table_blocks(store.num_inodes());
    for b in 1..=table_blocks {
        store.block_bitmap_mut().set(b);
    }
    Ok(())
}

/// Reads inode `inum` out of the table.
///
/// Fails with [`FsError::Invalid`] when `inum` is the null inode or falls
/// outside the table; this does not consult the inode bitmap (validity is a
/// separate predicate, see [`inode_valid`]).
pub fn read_inode(store: &dyn BlockStore, inum: InodeNo) -> FsResult<Inode> {
    if inum.is_null() || inum.value() >= store.num_inodes() {
        return Err(FsError::Invalid);
    }
    let block = store.block(inode_block_no(inum))?;
    let off = inode_offset_in_block(inum);
    Ok(*block.as_data_view().get::<Inode>(off))
}

/// Writes `inode` back to its slot in the table.
pub fn write_inode(store: &mut dyn BlockStore, inum: InodeNo, inode: &Inode) -> FsResult<()> {
    if inum.is_null() || inum.value() >= store.num_inodes() {
        return Err(FsError::Invalid);
    }
    let block = store.block_mut(inode_block_no(inum))?;
    let off = inode_offset_in_block(inum);
    *block.as_data_view_mut().get_mut::<Inode>(off) = *inode;
    Ok(())
}

/// True iff `inum` is in range, non-null, and its inode-bitmap bit is set.
#[must_use]
pub fn inode_valid(store: &dyn BlockStore, inum: InodeNo) -> bool {
    !inum.is_null() && inum.value() < store.num_inodes() && store.inode_bitmap().get(inum.value())
}

/// Scans the inode bitmap from index 2 upward for the first clear bit,
/// claims it, and returns a freshly zeroed inode of the given `mode`.
pub fn alloc_inode(store: &mut dyn BlockStore, mode: u32) -> FsResult<InodeNo> {
    let found = store
        .inode_bitmap()
        .find_first_clear(2)
        .ok_or(FsError::NoSpace)?;
    store.inode_bitmap_mut().set(found);

    let inum = InodeNo::new(found);
    let mut node = Inode::zeroed();
    node.inum = found;
    node.mode = mode;
    write_inode(store, inum, &node)?;
    Ok(inum)
}

/// Frees `inum`: releases every block it owns and clears its bitmap bit.
/// A no-op if the bit is already clear.
pub fn free_inode(store: &mut dyn BlockStore, inum: InodeNo) -> FsResult<()> {
    if !store.inode_bitmap().get(inum.value()) {
        return Ok(());
    }
    shrink_inode(store, inum, 0)?;
    store.inode_bitmap_mut().clear(inum.value());
    log::trace!("inode {inum} freed");
    Ok(())
}

fn alloc_block(store: &mut dyn BlockStore) -> Option<BlockNo> {
    let found = store.block_bitmap().find_first_clear(0)?;
    store.block_bitmap_mut().set(found);
    Some(BlockNo::new(found))
}

fn free_block(store: &mut dyn BlockStore, bn: BlockNo) {
    store.block_bitmap_mut().clear(bn.value());
}

/// Returns the `k`-th data block of `node`, or `None` if that slot is
/// unallocated or `k` is out of range.
#[must_use]
pub fn get_bnum(store: &dyn BlockStore, node: &Inode, k: usize) -> Option<BlockNo> {
    if k < NDIRECT {
        let bn = node.direct_slot(k)?;
        return (!bn.is_null()).then_some(bn);
    }

    let k = k - NDIRECT;
    if k >= NINDIRECT {
        return None;
    }

    let ind = node.indirect_block();
    if ind.is_null() {
        return None;
    }
    let block = store.block(ind).ok()?;
    let bn = block.as_data_view().get::<IndirectBlock>(0).get(k);
    (!bn.is_null()).then_some(bn)
}

fn set_slot(
    store: &mut dyn BlockStore,
    node: &mut Inode,
    k: usize,
    bn: BlockNo,
) -> FsResult<()> {
    if k < NDIRECT {
        node.set_direct_slot(k, bn);
        return Ok(());
    }
    let k = k - NDIRECT;
    assert!(k < NINDIRECT, "block index {k} beyond indirect range");
    let ind = node.indirect_block();
    let block = store.block_mut(ind)?;
    block.as_data_view_mut().get_mut::<IndirectBlock>(0).set(k, bn);
    Ok(())
}

fn clear_slot(store: &mut dyn BlockStore, node: &mut Inode, k: usize) -> FsResult<()> {
    set_slot(store, node, k, BlockNo::NULL)
}

/// Grows `inum` to `new_size` bytes, allocating whatever direct/indirect
/// blocks are needed. `new_size` must be `>=` the inode's current size.
///
/// A partial allocation failure leaves the inode at whatever size was
/// actually reached (the caller sees a short write), and still returns
/// [`FsError::NoSpace`].
pub fn grow_inode(store: &mut dyn BlockStore, inum: InodeNo, new_size: u64) -> FsResult<()> {
    let mut node = read_inode(store, inum)?;
    if new_size < u64::from(node.size) {
        return Err(FsError::Invalid);
    }
    if new_size > MAX_FILE_SIZE {
        return Err(FsError::NoSpace);
    }

    let mut cur = node.block_count();
    let tgt = Inode::blocks_for_size(new_size);

    while cur < tgt {
        let idx = cur as usize;

        if idx == NDIRECT && node.indirect_block().is_null() {
            let Some(bn) = alloc_block(store) else {
                node.size = cur * safe_cast::to_u32!(BLOCK_SIZE);
                write_inode(store, inum, &node)?;
                return Err(FsError::NoSpace);
            };
            if let Ok(block) = store.block_mut(bn) {
                block.fill(0);
            }
            node.set_indirect_block(bn);
        }

        let Some(bn) = alloc_block(store) else {
            node.size = cur * safe_cast::to_u32!(BLOCK_SIZE);
            write_inode(store, inum, &node)?;
            return Err(FsError::NoSpace);
        };
        set_slot(store, &mut node, idx, bn)?;
        cur += 1;
    }

    node.size = u32::try_from(new_size).expect("new_size bounded by MAX_FILE_SIZE");
    write_inode(store, inum, &node)?;
    Ok(())
}

/// Shrinks `inum` to `new_size` bytes, freeing every block past the new
/// end (and the indirect block itself, once it is no longer needed).
/// `new_size` must be `<=` the inode's current size.
pub fn shrink_inode(store: &mut dyn BlockStore, inum: InodeNo, new_size: u64) -> FsResult<()> {
    let mut node = read_inode(store, inum)?;
    if new_size > u64::from(node.size) {
        return Err(FsError::Invalid);
    }

    let mut cur = node.block_count();
    let tgt = Inode::blocks_for_size(new_size);

    while tgt < cur {
        let idx = (cur - 1) as usize;
        let Some(bn) = get_bnum(store, &node, idx) else {
            // The packing invariant guarantees every slot below `cur` is
            // occupied; a hole here means the on-disk state is corrupt.
            return Err(FsError::Corruption);
        };
        free_block(store, bn);
        clear_slot(store, &mut node, idx)?;
        cur -= 1;
    }

    if tgt <= NDIRECT as u32 {
        let ind = node.indirect_block();
        if !ind.is_null() {
            free_block(store, ind);
            node.set_indirect_block(BlockNo::NULL);
        }
    }

    node.size = u32::try_from(new_size).expect("new_size bounded by current size");
    write_inode(store, inum, &node)?;
    Ok(())
}

/// Reads up to `buf.len()` bytes starting at `off`, clamped to the file's
/// size. Returns the number of bytes actually read.
pub fn read(store: &dyn BlockStore, inum: InodeNo, off: u64, buf: &mut [u8]) -> FsResult<usize> {
    let node = read_inode(store, inum)?;
    let size = u64::from(node.size);
    if off >= size {
        return Ok(0);
    }
    let n = buf.len() as u64;
    let n = usize::try_from(n.min(size - off)).unwrap();

    let mut done = 0;
    while done < n {
        let pos = off + done as u64;
        let block_idx = usize::try_from(pos / safe_cast::to_u64!(BLOCK_SIZE)).unwrap();
        let Some(bn) = get_bnum(store, &node, block_idx) else {
            break;
        };
        let block = store.block(bn)?;
        let in_block = usize::try_from(pos % safe_cast::to_u64!(BLOCK_SIZE)).unwrap();
        let chunk = (n - done).min(BLOCK_SIZE - in_block);
        buf[done..][..chunk].copy_from_slice(&block[in_block..][..chunk]);
        done += chunk;
    }
    Ok(done)
}

/// Grows the file to `off + data.len()` and writes `data` at `off`.
///
/// Returns the number of bytes written. Returns an error only if zero
/// bytes were written *and* growth failed; a partial growth still reports
/// the bytes that made it in (a short write).
pub fn write(store: &mut dyn BlockStore, inum: InodeNo, off: u64, data: &[u8]) -> FsResult<usize> {
    let target_end = off
        .checked_add(data.len() as u64)
        .ok_or(FsError::Invalid)?;

    let node = read_inode(store, inum)?;
    let grow_result = if target_end > u64::from(node.size) {
        grow_inode(store, inum, target_end)
    } else {
        Ok(())
    };

    let node = read_inode(store, inum)?;
    let size = u64::from(node.size);
    if off >= size {
        return match grow_result {
            Ok(()) => Ok(0),
            Err(_) => Err(FsError::NoSpace),
        };
    }

    let writable = usize::try_from((size - off).min(data.len() as u64)).unwrap();
    let mut done = 0;
    while done < writable {
        let pos = off + done as u64;
        let block_idx = usize::try_from(pos / safe_cast::to_u64!(BLOCK_SIZE)).unwrap();
        let Some(bn) = get_bnum(store, &node, block_idx) else {
            return Err(FsError::Corruption);
        };
        let block = store.block_mut(bn)?;
        let in_block = usize::try_from(pos % safe_cast::to_u64!(BLOCK_SIZE)).unwrap();
        let chunk = (writable - done).min(BLOCK_SIZE - in_block);
        block[in_block..][..chunk].copy_from_slice(&data[done..][..chunk]);
        done += chunk;
    }

    if done == 0 && grow_result.is_err() {
        return Err(FsError::NoSpace);
    }
    Ok(done)
}

/// Populates a [`crate::stat::Stat`] for `inum`.
pub fn inode_stat(store: &dyn BlockStore, inum: InodeNo) -> FsResult<crate::stat::Stat> {
    let node = read_inode(store, inum)?;
    Ok(crate::stat::Stat {
        inum,
        mode: node.mode,
        links: node.links,
        uid: 0,
        gid: 0,
        block_size: safe_cast::to_u32!(BLOCK_SIZE),
        size: u64::from(node.size),
        blocks: node.block_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::MemBlockStore;

    fn store() -> MemBlockStore {
        let mut s = MemBlockStore::new(64, 16);
        inode_init(&mut s).unwrap();
        s
    }

    #[test]
    fn alloc_skips_reserved_inodes() {
        let mut s = store();
        let a = alloc_inode(&mut s, 0o100644).unwrap();
        let b = alloc_inode(&mut s, 0o100644).unwrap();
        assert_eq!(a.value(), 2);
        assert_eq!(b.value(), 3);
    }

    #[test]
    fn alloc_reuses_freed_slot() {
        let mut s = store();
        let a = alloc_inode(&mut s, 0o100644).unwrap();
        free_inode(&mut s, a).unwrap();
        let c = alloc_inode(&mut s, 0o100644).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut s = store();
        let inum = alloc_inode(&mut s, 0o100644).unwrap();
        let written = write(&mut s, inum, 0, b"hello").unwrap();
        assert_eq!(written, 5);
        let mut buf = [0u8; 5];
        let read_n = read(&s, inum, 0, &mut buf).unwrap();
        assert_eq!(read_n, 5);
        assert_eq!(&buf, b"hello");
        let st = inode_stat(&s, inum).unwrap();
        assert_eq!(st.size, 5);
        assert_eq!(st.blocks, 1);
    }

    #[test]
    fn grow_past_direct_allocates_indirect() {
        let mut s = MemBlockStore::new(4096, 16);
        inode_init(&mut s).unwrap();
        let inum = alloc_inode(&mut s, 0o100644).unwrap();
        grow_inode(&mut s, inum, 13 * BLOCK_SIZE as u64).unwrap();
        let node = read_inode(&s, inum).unwrap();
        assert!(!node.indirect_block().is_null());

        shrink_inode(&mut s, inum, 6 * BLOCK_SIZE as u64).unwrap();
        let node = read_inode(&s, inum).unwrap();
        assert!(node.indirect_block().is_null());
    }

    #[test]
    fn shrink_then_grow_same_size_matches_direct_grow() {
        let mut a = MemBlockStore::new(4096, 16);
        inode_init(&mut a).unwrap();
        let ia = alloc_inode(&mut a, 0o100644).unwrap();
        grow_inode(&mut a, ia, 20 * BLOCK_SIZE as u64).unwrap();
        shrink_inode(&mut a, ia, 5 * BLOCK_SIZE as u64).unwrap();

        let mut b = MemBlockStore::new(4096, 16);
        inode_init(&mut b).unwrap();
        let ib = alloc_inode(&mut b, 0o100644).unwrap();
        grow_inode(&mut b, ib, 5 * BLOCK_SIZE as u64).unwrap();

        assert_eq!(a.block_bitmap().len(), b.block_bitmap().len());
        for i in 0..a.block_bitmap().len() {
            assert_eq!(a.block_bitmap().get(i), b.block_bitmap().get(i));
        }
    }
}

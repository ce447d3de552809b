//! Directory content: a dense array of [`DirEntry`] records read and
//! written through the inode content primitives in [`crate::inode`].
//!
//! A directory's "size" is simply its entry count times [`DIRENT_SIZE`];
//! deleted entries are zeroed in place (tombstoned) rather than compacted,
//! so later lookups must skip them and a directory only ever grows.

use dataview::PodMethods as _;
use sfs_types::{DirEntry, InodeNo, DIRENT_SIZE};

use crate::{
    block_store::BlockStore,
    error::{FsError, FsResult},
    inode,
};

fn entry_count(store: &dyn BlockStore, dir_inum: InodeNo) -> FsResult<usize> {
    let node = inode::read_inode(store, dir_inum)?;
    Ok(node.size as usize / DIRENT_SIZE)
}

fn read_entry(store: &dyn BlockStore, dir_inum: InodeNo, idx: usize) -> FsResult<DirEntry> {
    let mut buf = [0u8; DIRENT_SIZE];
    let n = inode::read(store, dir_inum, (idx * DIRENT_SIZE) as u64, &mut buf)?;
    if n != DIRENT_SIZE {
        return Err(FsError::Corruption);
    }
    Ok(*buf.as_data_view().get::<DirEntry>(0))
}

fn write_entry(
    store: &mut dyn BlockStore,
    dir_inum: InodeNo,
    idx: usize,
    entry: &DirEntry,
) -> FsResult<()> {
    let mut buf = [0u8; DIRENT_SIZE];
    *buf.as_data_view_mut().get_mut::<DirEntry>(0) = *entry;
    let n = inode::write(store, dir_inum, (idx * DIRENT_SIZE) as u64, &buf)?;
    if n != DIRENT_SIZE {
        return Err(FsError::NoSpace);
    }
    Ok(())
}

/// Scans `dir_inum`'s entries for one named `name`. Tombstones never match
/// (their name is empty). Returns the slot index.
pub fn dirent_lookup(store: &dyn BlockStore, dir_inum: InodeNo, name: &str) -> FsResult<Option<usize>> {
    let count = entry_count(store, dir_inum)?;
    for idx in 0..count {
        let entry = read_entry(store, dir_inum, idx)?;
        if !entry.is_tombstone() && entry.matches_name(name) {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

/// Resolves `name` within `dir_inum` to the inode number it names.
pub fn directory_lookup(
    store: &dyn BlockStore,
    dir_inum: InodeNo,
    name: &str,
) -> FsResult<Option<InodeNo>> {
    match dirent_lookup(store, dir_inum, name)? {
        Some(idx) => Ok(read_entry(store, dir_inum, idx)?.inum()),
        None => Ok(None),
    }
}

/// Returns the `dnum`-th *live* (non-tombstone) entry of `dir_inum`, in
/// slot order, or `None` if there is no such entry.
pub fn directory_read(store: &dyn BlockStore, dir_inum: InodeNo, dnum: usize) -> FsResult<Option<DirEntry>> {
    let count = entry_count(store, dir_inum)?;
    let mut seen = 0;
    for idx in 0..count {
        let entry = read_entry(store, dir_inum, idx)?;
        if entry.is_tombstone() {
            continue;
        }
        if seen == dnum {
            return Ok(Some(entry));
        }
        seen += 1;
    }
    Ok(None)
}

/// Adds an entry named `name` pointing at `target_inum` into `dir_inum`,
/// reusing the first tombstone slot if one exists, and increments the
/// target's link count.
///
/// Does not check whether `name` already exists in `dir_inum`: a second
/// entry with the same name simply shadows the first under
/// [`dirent_lookup`]'s first-match scan.
pub fn directory_put(
    store: &mut dyn BlockStore,
    dir_inum: InodeNo,
    target_inum: InodeNo,
    name: &str,
) -> FsResult<()> {
    if !inode::inode_valid(store, dir_inum) || !inode::inode_valid(store, target_inum) {
        return Err(FsError::Invalid);
    }

    let count = entry_count(store, dir_inum)?;
    let mut slot = None;
    for idx in 0..count {
        if read_entry(store, dir_inum, idx)?.is_tombstone() {
            slot = Some(idx);
            break;
        }
    }
    let idx = slot.unwrap_or(count);

    let mut entry = DirEntry::zeroed();
    entry.set_name(name);
    entry.set_inum(Some(target_inum));
    write_entry(store, dir_inum, idx, &entry)?;

    let mut target = inode::read_inode(store, target_inum)?;
    target.links += 1;
    inode::write_inode(store, target_inum, &target)?;
    Ok(())
}

/// Removes the entry named `name` from `dir_inum`: tombstones its slot and
/// decrements the target inode's link count, freeing the target once its
/// link count reaches zero.
pub fn directory_delete(store: &mut dyn BlockStore, dir_inum: InodeNo, name: &str) -> FsResult<()> {
    let idx = dirent_lookup(store, dir_inum, name)?.ok_or(FsError::NotFound)?;
    let entry = read_entry(store, dir_inum, idx)?;
    let target_inum = entry.inum().ok_or(FsError::Corruption)?;

    write_entry(store, dir_inum, idx, &DirEntry::zeroed())?;

    let mut target = inode::read_inode(store, target_inum)?;
    target.links = target.links.saturating_sub(1);
    if target.links == 0 {
        inode::free_inode(store, target_inum)?;
    } else {
        inode::write_inode(store, target_inum, &target)?;
    }
    Ok(())
}

/// Lists the live entry names of `dir_inum`, in slot order. Returns `None`
/// if `dir_inum` does not name a valid directory.
pub fn directory_list(store: &dyn BlockStore, dir_inum: InodeNo) -> FsResult<Option<Vec<String>>> {
    if !inode::inode_valid(store, dir_inum) {
        return Ok(None);
    }
    let node = inode::read_inode(store, dir_inum)?;
    if !node.is_dir() {
        return Ok(None);
    }

    let count = entry_count(store, dir_inum)?;
    let mut names = Vec::new();
    for idx in 0..count {
        let entry = read_entry(store, dir_inum, idx)?;
        if !entry.is_tombstone() {
            names.push(entry.name_str().to_owned());
        }
    }
    Ok(Some(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::MemBlockStore;
    use sfs_types::S_IFDIR;

    fn new_dir(store: &mut MemBlockStore) -> InodeNo {
        inode::alloc_inode(store, S_IFDIR | 0o755).unwrap()
    }

    fn new_file(store: &mut MemBlockStore) -> InodeNo {
        inode::alloc_inode(store, sfs_types::S_IFREG | 0o644).unwrap()
    }

    fn store() -> MemBlockStore {
        let mut s = MemBlockStore::new(64, 16);
        inode::inode_init(&mut s).unwrap();
        s
    }

    #[test]
    fn put_then_lookup() {
        let mut s = store();
        let dir = new_dir(&mut s);
        let file = new_file(&mut s);
        directory_put(&mut s, dir, file, "a.txt").unwrap();
        assert_eq!(directory_lookup(&s, dir, "a.txt").unwrap(), Some(file));
        assert_eq!(inode::read_inode(&s, file).unwrap().links, 1);
    }

    #[test]
    fn delete_frees_inode_at_zero_links() {
        let mut s = store();
        let dir = new_dir(&mut s);
        let file = new_file(&mut s);
        directory_put(&mut s, dir, file, "a.txt").unwrap();
        directory_delete(&mut s, dir, "a.txt").unwrap();
        assert!(!inode::inode_valid(&s, file));
        assert_eq!(directory_lookup(&s, dir, "a.txt").unwrap(), None);
    }

    #[test]
    fn delete_reuses_tombstone_slot() {
        let mut s = store();
        let dir = new_dir(&mut s);
        let f1 = new_file(&mut s);
        let f2 = new_file(&mut s);
        directory_put(&mut s, dir, f1, "a").unwrap();
        directory_delete(&mut s, dir, "a").unwrap();
        directory_put(&mut s, dir, f2, "b").unwrap();
        assert_eq!(entry_count(&s, dir).unwrap(), 1);
    }

    #[test]
    fn list_rejects_non_directory() {
        let mut s = store();
        let file = new_file(&mut s);
        assert_eq!(directory_list(&s, file).unwrap(), None);
    }

    #[test]
    fn list_skips_tombstones() {
        let mut s = store();
        let dir = new_dir(&mut s);
        let f1 = new_file(&mut s);
        let f2 = new_file(&mut s);
        directory_put(&mut s, dir, f1, "a").unwrap();
        directory_put(&mut s, dir, f2, "b").unwrap();
        directory_delete(&mut s, dir, "a").unwrap();
        assert_eq!(directory_list(&s, dir).unwrap(), Some(vec!["b".to_owned()]));
    }
}

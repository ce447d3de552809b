//! The storage façade: the one public surface host bindings call through.
//!
//! [`Filesystem`] owns a [`BlockStore`] and composes the inode, directory
//! and path modules into the operations described for the host ABI. It
//! does no locking and assumes single-threaded, synchronous callers; see
//! the crate-level docs for the concurrency model this relies on.

use sfs_types::{Inode, InodeNo, BLOCK_SIZE, S_IFDIR};

use crate::{
    block_store::BlockStore,
    directory,
    error::{FsError, FsResult},
    inode, path,
    stat::Stat,
};

pub struct Filesystem<S> {
    store: S,
}

impl<S: BlockStore> Filesystem<S> {
    /// Mounts `store`, bootstrapping the inode allocator and root
    /// directory if this is a fresh image.
    pub fn mount(mut store: S) -> FsResult<Self> {
        inode::inode_init(&mut store)?;
        Self::bootstrap(&mut store)?;
        Ok(Self { store })
    }

    /// Ensures inode 1 exists and is a directory, creating it if the image
    /// is fresh. Safe to call on an already-bootstrapped image.
    pub fn bootstrap(store: &mut dyn BlockStore) -> FsResult<()> {
        inode::inode_init(store)?;

        if inode::inode_valid(store, InodeNo::ROOT) {
            let root = inode::read_inode(store, InodeNo::ROOT)?;
            if root.is_dir() {
                return Ok(());
            }
        }

        store.inode_bitmap_mut().set(InodeNo::ROOT.value());
        let mut root = Inode::zeroed();
        root.inum = InodeNo::ROOT.value();
        root.mode = S_IFDIR | 0o755;
        inode::write_inode(store, InodeNo::ROOT, &root)?;
        log::info!("root directory bootstrapped");
        Ok(())
    }

    /// Releases the underlying store.
    pub fn into_inner(self) -> S {
        self.store
    }

    /// True iff `path` resolves to an inode.
    #[must_use]
    pub fn access(&self, path: &str) -> bool {
        path::path_get_inode(&self.store, path).is_ok()
    }

    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        let inum = path::path_get_inode(&self.store, path)?;
        inode::inode_stat(&self.store, inum)
    }

    pub fn read(&self, path: &str, off: u64, buf: &mut [u8]) -> FsResult<usize> {
        let inum = path::path_get_inode(&self.store, path)?;
        inode::read(&self.store, inum, off, buf)
    }

    pub fn write(&mut self, path: &str, off: u64, data: &[u8]) -> FsResult<usize> {
        let inum = path::path_get_inode(&self.store, path)?;
        inode::write(&mut self.store, inum, off, data)
    }

    pub fn truncate(&mut self, path: &str, size: u64) -> FsResult<()> {
        let inum = path::path_get_inode(&self.store, path)?;
        let node = inode::read_inode(&self.store, inum)?;
        match size.cmp(&u64::from(node.size)) {
            std::cmp::Ordering::Greater => inode::grow_inode(&mut self.store, inum, size),
            std::cmp::Ordering::Less => inode::shrink_inode(&mut self.store, inum, size),
            std::cmp::Ordering::Equal => Ok(()),
        }
    }

    /// Creates a new inode of `mode` and links it into its parent directory
    /// under the final component of `path`. Frees the newly allocated
    /// inode if either the parent fails to resolve or the link fails, so a
    /// failed `mknod` never leaks an inode.
    pub fn mknod(&mut self, path: &str, mode: u32) -> FsResult<InodeNo> {
        let (parent_path, name) = path::path_split(path)?;
        let inum = inode::alloc_inode(&mut self.store, mode)?;

        let result = path::path_get_inode(&self.store, &parent_path)
            .and_then(|parent| directory::directory_put(&mut self.store, parent, inum, &name));

        if let Err(e) = result {
            inode::free_inode(&mut self.store, inum).ok();
            return Err(e);
        }
        Ok(inum)
    }

    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        let (parent_path, name) = path::path_split(path)?;
        let parent = path::path_get_inode(&self.store, &parent_path)?;
        directory::directory_delete(&mut self.store, parent, &name)
    }

    /// Removes an empty directory. Fails with [`FsError::NotEmpty`] if it
    /// still has live entries.
    pub fn rmdir(&mut self, path: &str) -> FsResult<()> {
        let inum = path::path_get_inode(&self.store, path)?;
        if directory::directory_read(&self.store, inum, 0)?.is_some() {
            return Err(FsError::NotEmpty);
        }
        self.unlink(path)
    }

    /// Renames `from` to `to`.
    ///
    /// If `from` names a regular file and `to` names an existing
    /// directory, the file is moved *into* that directory under its
    /// original name (ordinary `mv file dir/` semantics). Renaming a
    /// directory onto an existing path is rejected outright; there is no
    /// directory-merge behavior.
    pub fn rename(&mut self, from: &str, to: &str) -> FsResult<()> {
        let (from_parent_path, from_name) = path::path_split(from)?;
        let from_parent = path::path_get_inode(&self.store, &from_parent_path)?;
        let from_inum =
            directory::directory_lookup(&self.store, from_parent, &from_name)?.ok_or(FsError::NotFound)?;
        let from_inode = inode::read_inode(&self.store, from_inum)?;

        let (mut to_dir, mut to_name) = path::path_split(to)?;

        if from_inode.is_reg() {
            if let Ok(to_inum) = path::path_get_inode(&self.store, to) {
                if inode::read_inode(&self.store, to_inum)?.is_dir() {
                    to_dir = to.to_owned();
                    to_name = from_name.clone();
                }
            }
        } else if path::path_get_inode(&self.store, to).is_ok() {
            return Err(FsError::Invalid);
        }

        let to_dir_inum = path::path_get_inode(&self.store, &to_dir)?;
        directory::directory_put(&mut self.store, to_dir_inum, from_inum, &to_name)?;
        directory::directory_delete(&mut self.store, from_parent, &from_name)?;
        Ok(())
    }

    pub fn list(&self, path: &str) -> FsResult<Vec<String>> {
        let inum = path::path_get_inode(&self.store, path)?;
        directory::directory_list(&self.store, inum)?.ok_or(FsError::Invalid)
    }
}

/// Block size exposed to hosts computing `st_blksize`.
pub const fn block_size() -> u32 {
    BLOCK_SIZE as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::MemBlockStore;
    use sfs_types::S_IFREG;

    fn mounted() -> Filesystem<MemBlockStore> {
        Filesystem::mount(MemBlockStore::new(4096, 64)).unwrap()
    }

    #[test]
    fn fresh_mount_has_empty_root() {
        let fs = mounted();
        assert!(fs.access("/"));
        assert_eq!(fs.list("/").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn mknod_list_stat_roundtrip() {
        let mut fs = mounted();
        fs.mknod("/a.txt", S_IFREG | 0o644).unwrap();
        assert_eq!(fs.list("/").unwrap(), vec!["a.txt".to_owned()]);
        let st = fs.stat("/a.txt").unwrap();
        assert_eq!(st.links, 1);
        assert_eq!(st.size, 0);
    }

    #[test]
    fn write_then_read_through_facade() {
        let mut fs = mounted();
        fs.mknod("/a.txt", S_IFREG | 0o644).unwrap();
        let n = fs.write("/a.txt", 0, b"hi").unwrap();
        assert_eq!(n, 2);
        let mut buf = [0u8; 2];
        assert_eq!(fs.read("/a.txt", 0, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn mknod_failure_does_not_leak_inode() {
        let mut fs = mounted();
        let err = fs.mknod("/missing/a.txt", S_IFREG | 0o644).unwrap_err();
        assert_eq!(err, FsError::NotFound);
        // The allocated inode must have been freed: allocating again
        // should return the same slot.
        let inum = fs.mknod("/b.txt", S_IFREG | 0o644).unwrap();
        assert_eq!(inum.value(), 2);
    }

    #[test]
    fn mknod_rejects_embedded_nul_instead_of_panicking() {
        let mut fs = mounted();
        let err = fs.mknod("/a\0b", S_IFREG | 0o644).unwrap_err();
        assert_eq!(err, FsError::Invalid);
    }

    #[test]
    fn rmdir_rejects_nonempty_directory() {
        let mut fs = mounted();
        fs.mknod("/dir", S_IFDIR | 0o755).unwrap();
        fs.mknod("/dir/child", S_IFREG | 0o644).unwrap();
        assert_eq!(fs.rmdir("/dir").unwrap_err(), FsError::NotEmpty);
    }

    #[test]
    fn unlink_drops_inode_after_last_link() {
        let mut fs = mounted();
        fs.mknod("/a.txt", S_IFREG | 0o644).unwrap();
        fs.unlink("/a.txt").unwrap();
        assert!(!fs.access("/a.txt"));
    }

    #[test]
    fn rename_moves_file_into_existing_directory() {
        let mut fs = mounted();
        fs.mknod("/dir", S_IFDIR | 0o755).unwrap();
        fs.mknod("/a.txt", S_IFREG | 0o644).unwrap();
        fs.rename("/a.txt", "/dir").unwrap();
        assert!(!fs.access("/a.txt"));
        assert_eq!(fs.list("/dir").unwrap(), vec!["a.txt".to_owned()]);
    }

    #[test]
    fn rename_directory_onto_existing_path_is_rejected() {
        let mut fs = mounted();
        fs.mknod("/dir", S_IFDIR | 0o755).unwrap();
        fs.mknod("/other", S_IFDIR | 0o755).unwrap();
        assert_eq!(fs.rename("/dir", "/other").unwrap_err(), FsError::Invalid);
    }

    #[test]
    fn truncate_shrinks_and_grows() {
        let mut fs = mounted();
        fs.mknod("/a.txt", S_IFREG | 0o644).unwrap();
        fs.write("/a.txt", 0, &[1u8; 100]).unwrap();
        fs.truncate("/a.txt", 10).unwrap();
        assert_eq!(fs.stat("/a.txt").unwrap().size, 10);
        fs.truncate("/a.txt", 50).unwrap();
        assert_eq!(fs.stat("/a.txt").unwrap().size, 50);
    }
}

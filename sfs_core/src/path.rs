//! Absolute-path resolution.
//!
//! Paths are always absolute (`/` or `/a/b/c`); there is no notion of a
//! current directory, and `.`/`..` are ordinary (and therefore unresolvable)
//! entry names, not navigation.

use sfs_types::InodeNo;

use crate::{
    block_store::BlockStore,
    directory,
    error::{FsError, FsResult},
    inode,
};

/// Splits components out of an absolute path, dropping empty components so
/// that `/a//b/` and `/a/b` resolve identically.
///
/// Rejects any component containing a NUL byte: such a name can never be
/// stored in a [`sfs_types::DirEntry`] (whose `set_name` asserts as much),
/// so this is caught here as an ordinary [`FsError::Invalid`] rather than
/// reaching that assertion from a public facade call.
fn components(path: &str) -> FsResult<Vec<&str>> {
    if !path.starts_with('/') {
        return Err(FsError::Invalid);
    }
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if parts.iter().any(|s| s.contains('\0')) {
        return Err(FsError::Invalid);
    }
    Ok(parts)
}

/// Resolves `path` to the inode it names, walking one directory at a time
/// from the root. Any missing component, or any intermediate component
/// that is not itself a directory, yields [`FsError::NotFound`] — the two
/// cases are indistinguishable to the caller.
pub fn path_get_inode(store: &dyn BlockStore, path: &str) -> FsResult<InodeNo> {
    let parts = components(path)?;
    let mut cur = InodeNo::ROOT;
    if !inode::inode_valid(store, cur) {
        return Err(FsError::NotFound);
    }

    let Some((last, init)) = parts.split_last() else {
        return Ok(cur);
    };

    for part in init {
        let node = inode::read_inode(store, cur)?;
        if !node.is_dir() {
            return Err(FsError::NotFound);
        }
        cur = directory::directory_lookup(store, cur, part)?.ok_or(FsError::NotFound)?;
    }

    let node = inode::read_inode(store, cur)?;
    if !node.is_dir() {
        return Err(FsError::NotFound);
    }
    directory::directory_lookup(store, cur, last)?.ok_or(FsError::NotFound)
}

/// Splits `path` into its parent directory path and final component name.
/// `/` itself has no parent and is rejected.
pub fn path_split(path: &str) -> FsResult<(String, String)> {
    let parts = components(path)?;
    let (name, init) = parts.split_last().ok_or(FsError::Invalid)?;
    if name.len() >= sfs_types::DIR_NAME_LENGTH {
        return Err(FsError::Invalid);
    }

    let parent = if init.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", init.join("/"))
    };
    Ok((parent, (*name).to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::MemBlockStore;

    fn mounted() -> MemBlockStore {
        let mut s = MemBlockStore::new(64, 16);
        crate::facade::Filesystem::bootstrap(&mut s).unwrap();
        s
    }

    #[test]
    fn root_resolves_to_root_inode() {
        let s = mounted();
        assert_eq!(path_get_inode(&s, "/").unwrap(), InodeNo::ROOT);
    }

    #[test]
    fn missing_component_is_not_found() {
        let s = mounted();
        assert_eq!(path_get_inode(&s, "/nope").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn split_nested_path() {
        let (parent, name) = path_split("/a/b/c").unwrap();
        assert_eq!(parent, "/a/b");
        assert_eq!(name, "c");
    }

    #[test]
    fn split_top_level_path() {
        let (parent, name) = path_split("/a").unwrap();
        assert_eq!(parent, "/");
        assert_eq!(name, "a");
    }

    #[test]
    fn embedded_nul_is_invalid() {
        assert_eq!(path_split("/a\0b").unwrap_err(), FsError::Invalid);
        assert_eq!(
            path_get_inode(&mounted(), "/a\0b").unwrap_err(),
            FsError::Invalid
        );
    }

    #[test]
    fn split_root_is_invalid() {
        assert_eq!(path_split("/").unwrap_err(), FsError::Invalid);
    }
}

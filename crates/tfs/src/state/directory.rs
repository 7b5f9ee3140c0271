//! Root-directory entry management.
//!
//! A directory's entries live in its first direct block as a fixed array of
//! `(name, inumber)` slots. The entry block's rw-lock guards every slot;
//! all namespace mutations additionally run under the namespace mutex (see
//! the open protocol), which is what keeps names unique — `add_entry`
//! itself performs no duplicate check.

use tfs_fs_types::{DirEntryBlock, InodeKind, Inumber};

use crate::{
    error::Error,
    state::{block_pool::BlockPool, inode::InodeTable},
    sync::{read_lock, write_lock},
};

/// The directory's entry block, after checking `dir` really is one.
fn entry_block(
    inodes: &InodeTable,
    dir: Inumber,
) -> Result<tfs_fs_types::BlockIndex, Error> {
    let guard = read_lock(inodes.slot(dir));
    let inode = guard.as_ref().ok_or(Error::BadInumber)?;
    if inode.kind != InodeKind::Directory {
        return Err(Error::NotADirectory);
    }
    inode.direct[0].ok_or(Error::CorruptFileRange)
}

/// Writes `(name, child)` into the first empty slot of `dir`.
pub(crate) fn add_entry(
    inodes: &InodeTable,
    blocks: &BlockPool,
    dir: Inumber,
    child: Inumber,
    name: &[u8],
) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::EmptyName);
    }
    let block = entry_block(inodes, dir)?;

    let mut guard = write_lock(blocks.slot(block));
    let entries = guard.data_mut::<DirEntryBlock>();
    for entry in entries.entries_mut() {
        if entry.is_empty() {
            entry.set_name(name);
            entry.set_inumber(Some(child));
            return Ok(());
        }
    }
    Err(Error::DirectoryFull)
}

/// Looks `name` up in `dir`.
pub(crate) fn find(
    inodes: &InodeTable,
    blocks: &BlockPool,
    dir: Inumber,
    name: &[u8],
) -> Result<Inumber, Error> {
    if name.is_empty() {
        return Err(Error::EmptyName);
    }
    let block = entry_block(inodes, dir)?;

    let guard = read_lock(blocks.slot(block));
    let entries = guard.data::<DirEntryBlock>();
    entries
        .entries()
        .iter()
        .filter(|entry| !entry.is_empty())
        .find(|entry| entry.is_same_name(name))
        .and_then(tfs_fs_types::DirEntry::inumber)
        .ok_or(Error::NotFound)
}

#[cfg(test)]
mod tests {
    use tfs_fs_types::{InodeKind, MAX_DIR_ENTRIES};

    use super::*;

    fn new_root() -> (InodeTable, BlockPool, Inumber) {
        let (inodes, blocks) = (InodeTable::new(), BlockPool::new());
        let root = inodes.create(InodeKind::Directory, &blocks).unwrap();
        (inodes, blocks, root)
    }

    #[test]
    fn entries_round_trip() {
        let (inodes, blocks, root) = new_root();
        let child = inodes.create(InodeKind::File, &blocks).unwrap();

        assert!(matches!(
            find(&inodes, &blocks, root, b"f1"),
            Err(Error::NotFound)
        ));
        add_entry(&inodes, &blocks, root, child, b"f1").unwrap();
        assert_eq!(find(&inodes, &blocks, root, b"f1").unwrap(), child);
    }

    #[test]
    fn empty_names_are_rejected() {
        let (inodes, blocks, root) = new_root();
        let child = inodes.create(InodeKind::File, &blocks).unwrap();
        assert!(matches!(
            add_entry(&inodes, &blocks, root, child, b""),
            Err(Error::EmptyName)
        ));
        assert!(matches!(
            find(&inodes, &blocks, root, b""),
            Err(Error::EmptyName)
        ));
    }

    #[test]
    fn non_directories_are_rejected() {
        let (inodes, blocks, _root) = new_root();
        let file = inodes.create(InodeKind::File, &blocks).unwrap();
        assert!(matches!(
            find(&inodes, &blocks, file, b"x"),
            Err(Error::NotADirectory)
        ));
    }

    #[test]
    fn a_full_directory_rejects_new_entries() {
        let (inodes, blocks, root) = new_root();
        let child = inodes.create(InodeKind::File, &blocks).unwrap();
        for i in 0..MAX_DIR_ENTRIES {
            let name = format!("f{i}");
            add_entry(&inodes, &blocks, root, child, name.as_bytes()).unwrap();
        }
        assert!(matches!(
            add_entry(&inodes, &blocks, root, child, b"straw"),
            Err(Error::DirectoryFull)
        ));
    }
}

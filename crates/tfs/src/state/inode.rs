//! The inode table.
//!
//! Each slot is `None` while free; a taken slot holds the inode's kind,
//! size, and block references. Directory inodes are created with their
//! entry block allocated and every entry marked empty.

use std::sync::RwLock;

use tfs_fs_types::{
    BLOCK_SIZE, BlockIndex, DirEntryBlock, INODE_TABLE_SIZE, InodeKind, Inumber,
    MAX_DIRECT_BLOCKS,
};

use crate::{
    error::Error,
    state::block_pool::BlockPool,
    sync::write_lock,
};

#[derive(Debug)]
pub(crate) struct Inode {
    pub(crate) kind: InodeKind,
    pub(crate) size: u64,
    pub(crate) direct: [Option<BlockIndex>; MAX_DIRECT_BLOCKS],
    pub(crate) indirect: Option<BlockIndex>,
}

impl Inode {
    fn new_file() -> Self {
        Self {
            kind: InodeKind::File,
            size: 0,
            direct: [None; MAX_DIRECT_BLOCKS],
            indirect: None,
        }
    }

    fn new_directory(entry_block: BlockIndex) -> Self {
        let mut direct = [None; MAX_DIRECT_BLOCKS];
        direct[0] = Some(entry_block);
        Self {
            kind: InodeKind::Directory,
            size: BLOCK_SIZE as u64,
            direct,
            indirect: None,
        }
    }
}

pub(crate) struct InodeTable {
    slots: Box<[RwLock<Option<Inode>>]>,
}

impl InodeTable {
    pub(crate) fn new() -> Self {
        let slots = (0..INODE_TABLE_SIZE).map(|_| RwLock::new(None)).collect();
        Self { slots }
    }

    /// Creates an inode in the lowest free slot.
    ///
    /// A directory gets one data block holding its (empty) entries; failure
    /// to allocate it rolls the slot back to free.
    pub(crate) fn create(&self, kind: InodeKind, blocks: &BlockPool) -> Result<Inumber, Error> {
        for (i, slot) in self.slots.iter().enumerate() {
            let mut guard = write_lock(slot);
            if guard.is_some() {
                continue;
            }
            let inode = match kind {
                InodeKind::File => Inode::new_file(),
                InodeKind::Directory => {
                    let entry_block = blocks.alloc()?;
                    write_lock(blocks.slot(entry_block))
                        .data_mut::<DirEntryBlock>()
                        .clear();
                    Inode::new_directory(entry_block)
                }
            };
            *guard = Some(inode);
            return Ok(Inumber::new(i as u32));
        }
        log::warn!("inode table exhausted");
        Err(Error::InodesExhausted)
    }

    /// Frees the slot, returning any direct blocks to the pool.
    ///
    /// Only used to roll back a create whose directory-entry insertion
    /// failed; user files are never deleted, so the indirect region is
    /// never populated on this path.
    pub(crate) fn delete(&self, ino: Inumber, blocks: &BlockPool) -> Result<(), Error> {
        let mut guard = write_lock(&self.slots[ino.as_index()]);
        let inode = guard.take().ok_or(Error::BadInumber)?;
        if inode.size > 0 {
            for bn in inode.direct {
                blocks.free(bn);
            }
        }
        Ok(())
    }

    /// The lock guarding an inode slot.
    pub(crate) fn slot(&self, ino: Inumber) -> &RwLock<Option<Inode>> {
        &self.slots[ino.as_index()]
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::read_lock;

    use super::*;

    #[test]
    fn files_start_empty() {
        let (inodes, blocks) = (InodeTable::new(), BlockPool::new());
        let ino = inodes.create(InodeKind::File, &blocks).unwrap();
        assert_eq!(ino, Inumber::new(0));

        let guard = read_lock(inodes.slot(ino));
        let inode = guard.as_ref().unwrap();
        assert_eq!(inode.size, 0);
        assert!(inode.direct.iter().all(Option::is_none));
        assert!(inode.indirect.is_none());
    }

    #[test]
    fn directories_get_a_cleared_entry_block() {
        let (inodes, blocks) = (InodeTable::new(), BlockPool::new());
        let ino = inodes.create(InodeKind::Directory, &blocks).unwrap();

        let guard = read_lock(inodes.slot(ino));
        let inode = guard.as_ref().unwrap();
        assert_eq!(inode.size, BLOCK_SIZE as u64);
        let entry_block = inode.direct[0].unwrap();
        let block = read_lock(blocks.slot(entry_block));
        assert!(block
            .data::<DirEntryBlock>()
            .entries()
            .iter()
            .all(tfs_fs_types::DirEntry::is_empty));
    }

    #[test]
    fn delete_frees_the_slot_for_reuse() {
        let (inodes, blocks) = (InodeTable::new(), BlockPool::new());
        let first = inodes.create(InodeKind::File, &blocks).unwrap();
        let second = inodes.create(InodeKind::File, &blocks).unwrap();
        assert_ne!(first, second);

        inodes.delete(first, &blocks).unwrap();
        assert!(inodes.delete(first, &blocks).is_err());
        assert_eq!(inodes.create(InodeKind::File, &blocks).unwrap(), first);
    }
}

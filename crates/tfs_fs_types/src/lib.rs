//! Data types for the TecnicoFS storage layout.
//!
//! The file system keeps all state in fixed-size in-memory arenas:
//!
//! | arena           | # of slots         | slot content                     |
//! |-----------------|--------------------|----------------------------------|
//! | block pool      | [`DATA_BLOCKS`]    | `[u8; BLOCK_SIZE]`               |
//! | inode table     | [`INODE_TABLE_SIZE`] | inode (direct + indirect refs) |
//! | open-file table | [`MAX_OPEN_FILES`] | `(inumber, offset)`              |
//!
//! Cross references between arenas are integer indices. Block-resident
//! structures ([`DirEntryBlock`], [`IndirectBlock`]) keep the `-1` sentinel
//! for "no entry"; in-memory references use `Option` instead.

#![no_std]

use core::fmt;

use bitflags::bitflags;
use dataview::Pod;

/// Size of a data block in bytes.
pub const BLOCK_SIZE: usize = 1024;

/// Number of slots in the inode table.
pub const INODE_TABLE_SIZE: usize = 64;

/// Number of blocks in the data-block pool.
pub const DATA_BLOCKS: usize = 1024;

/// Number of slots in the open-file table.
pub const MAX_OPEN_FILES: usize = 64;

/// Width of a directory-entry name field, including the NUL terminator.
pub const MAX_FILE_NAME: usize = 40;

/// Number of blocks directly referenced by an inode.
pub const MAX_DIRECT_BLOCKS: usize = 10;

/// Number of blocks referenced through the single indirect block.
pub const BLOCK_POINTERS_PER_INDIRECT: usize = BLOCK_SIZE / size_of::<i32>();

/// Largest number of blocks a single file can reference.
pub const MAX_FILE_BLOCKS: usize = MAX_DIRECT_BLOCKS + BLOCK_POINTERS_PER_INDIRECT;

/// Largest file size in bytes.
pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BLOCK_SIZE;

/// Number of entries in a directory's entry block.
pub const MAX_DIR_ENTRIES: usize = BLOCK_SIZE / size_of::<DirEntry>();

const NO_REF: i32 = -1;

/// Index of a block in the data-block pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Pod)]
#[repr(transparent)]
pub struct BlockIndex(u32);

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl BlockIndex {
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    /// Maps a block-resident reference (`-1` = none) to an index.
    ///
    /// Returns `None` for the sentinel and for out-of-range values.
    #[must_use]
    pub fn from_raw(raw: i32) -> Option<Self> {
        if raw < 0 || raw as usize >= DATA_BLOCKS {
            return None;
        }
        Some(Self(raw.cast_unsigned()))
    }

    #[must_use]
    pub fn to_raw(this: Option<Self>) -> i32 {
        this.map_or(NO_REF, |bn| bn.0.cast_signed())
    }

    #[must_use]
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

/// Index of an inode in the inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Pod)]
#[repr(transparent)]
pub struct Inumber(u32);

impl fmt::Display for Inumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Inumber {
    /// The root directory's inumber.
    pub const ROOT: Self = Self::new(0);

    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub fn from_raw(raw: i32) -> Option<Self> {
        if raw < 0 || raw as usize >= INODE_TABLE_SIZE {
            return None;
        }
        Some(Self(raw.cast_unsigned()))
    }

    #[must_use]
    pub fn to_raw(this: Option<Self>) -> i32 {
        this.map_or(NO_REF, |ino| ino.0.cast_signed())
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

/// Index of an entry in the open-file table, returned by `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileHandle(u32);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FileHandle {
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub fn from_raw(raw: i32) -> Option<Self> {
        if raw < 0 || raw as usize >= MAX_OPEN_FILES {
            return None;
        }
        Some(Self(raw.cast_unsigned()))
    }

    #[must_use]
    pub const fn to_raw(&self) -> i32 {
        self.0.cast_signed()
    }

    #[must_use]
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

/// What an inode describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    File,
    Directory,
}

bitflags! {
    /// Flags accepted by `open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct OpenFlags: u32 {
        /// Create the file if the name does not exist.
        const CREATE = 0b001;
        /// Release the file's blocks and reset its size to zero.
        const TRUNC = 0b010;
        /// Start the handle's offset at the end of the file.
        const APPEND = 0b100;
    }
}

/// One slot of a directory's entry block.
///
/// `inumber = -1` marks an empty slot. The name is NUL-terminated and
/// NUL-padded to [`MAX_FILE_NAME`] bytes.
#[derive(Debug, Pod)]
#[repr(C)]
pub struct DirEntry {
    name: [u8; MAX_FILE_NAME],
    inumber: i32,
}

impl DirEntry {
    #[must_use]
    pub fn inumber(&self) -> Option<Inumber> {
        Inumber::from_raw(self.inumber)
    }

    pub fn set_inumber(&mut self, ino: Option<Inumber>) {
        self.inumber = Inumber::to_raw(ino);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inumber == NO_REF
    }

    /// The stored name, up to the first NUL.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        let len = memchr::memchr(0, &self.name).unwrap_or(self.name.len());
        &self.name[..len]
    }

    /// Compares against `name` after applying the same truncation `set_name`
    /// applies, so a name longer than the field still matches its own entry.
    #[must_use]
    pub fn is_same_name(&self, name: &[u8]) -> bool {
        let len = usize::min(name.len(), MAX_FILE_NAME - 1);
        self.name() == &name[..len]
    }

    /// Stores `name`, truncated to `MAX_FILE_NAME - 1` bytes and NUL-padded.
    pub fn set_name(&mut self, name: &[u8]) {
        let len = usize::min(name.len(), MAX_FILE_NAME - 1);
        self.name[..len].copy_from_slice(&name[..len]);
        self.name[len..].fill(0);
    }
}

/// View of a directory's entry block.
///
/// The entries occupy the block's prefix; the remainder of the block is
/// unused padding.
#[derive(Pod)]
#[repr(transparent)]
pub struct DirEntryBlock([DirEntry; MAX_DIR_ENTRIES]);
const _: () = const { assert!(size_of::<DirEntryBlock>() <= BLOCK_SIZE) };

impl DirEntryBlock {
    /// Marks every slot empty.
    pub fn clear(&mut self) {
        for entry in &mut self.0 {
            entry.set_inumber(None);
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[DirEntry; MAX_DIR_ENTRIES] {
        &self.0
    }

    #[must_use]
    pub fn entries_mut(&mut self) -> &mut [DirEntry; MAX_DIR_ENTRIES] {
        &mut self.0
    }
}

/// View of a single indirect block: an array of block references with the
/// `-1` sentinel for "not allocated".
#[derive(Pod)]
#[repr(transparent)]
pub struct IndirectBlock([i32; BLOCK_POINTERS_PER_INDIRECT]);
const _: () = const { assert!(size_of::<IndirectBlock>() == BLOCK_SIZE) };

impl IndirectBlock {
    #[must_use]
    pub fn get(&self, i: usize) -> Option<BlockIndex> {
        BlockIndex::from_raw(self.0[i])
    }

    pub fn set(&mut self, i: usize, bn: Option<BlockIndex>) {
        self.0[i] = BlockIndex::to_raw(bn);
    }

    /// Marks every reference unallocated. A freshly allocated indirect block
    /// is zeroed, and `0` is a valid block index, so this must run before
    /// the block is linked into an inode.
    pub fn clear(&mut self) {
        self.0.fill(NO_REF);
    }

    /// Takes every allocated reference out of the block.
    pub fn drain(&mut self) -> impl Iterator<Item = Option<BlockIndex>> + '_ {
        self.0.iter_mut().map(|raw| {
            let raw = core::mem::replace(raw, NO_REF);
            BlockIndex::from_raw(raw)
        })
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use dataview::PodMethods as _;
    use std::vec::Vec;

    use super::*;

    #[test]
    fn dir_entry_name_round_trip() {
        let mut de = DirEntry::zeroed();
        de.set_name(b"f1");
        de.set_inumber(Inumber::from_raw(3));
        assert_eq!(de.name(), b"f1");
        assert!(de.is_same_name(b"f1"));
        assert!(!de.is_same_name(b"f2"));
        assert_eq!(de.inumber(), Some(Inumber::new(3)));
    }

    #[test]
    fn dir_entry_name_truncates() {
        let mut de = DirEntry::zeroed();
        let long = [b'x'; 64];
        de.set_name(&long);
        assert_eq!(de.name().len(), MAX_FILE_NAME - 1);
        // the truncated entry still matches a lookup with the full name
        assert!(de.is_same_name(&long));
    }

    #[test]
    fn indirect_block_sentinels() {
        let mut ind = IndirectBlock::zeroed();
        // zeroed is NOT cleared: raw 0 is a valid block index
        assert_eq!(ind.get(0), Some(BlockIndex::new(0)));
        ind.clear();
        assert_eq!(ind.get(0), None);
        ind.set(7, Some(BlockIndex::new(42)));
        assert_eq!(ind.get(7), Some(BlockIndex::new(42)));
        let taken: Vec<_> = ind.drain().flatten().collect();
        assert_eq!(taken, [BlockIndex::new(42)]);
        assert_eq!(ind.get(7), None);
    }

    #[test]
    fn raw_reference_bounds() {
        assert_eq!(BlockIndex::from_raw(-1), None);
        assert_eq!(BlockIndex::from_raw(DATA_BLOCKS as i32), None);
        assert_eq!(Inumber::from_raw(0), Some(Inumber::ROOT));
        assert_eq!(BlockIndex::to_raw(None), -1);
    }
}

//! The data-block pool: a fixed arena of `BLOCK_SIZE`-byte blocks, each
//! slot guarded by its own rw-lock covering both the FREE/TAKEN state and
//! the block's bytes.

use std::sync::RwLock;

use dataview::{Pod, PodMethods as _};
use tfs_fs_types::{BLOCK_SIZE, BlockIndex, DATA_BLOCKS};

use crate::{
    error::Error,
    sync::write_lock,
};

/// Block bytes, 8-aligned so typed views of directory and indirect blocks
/// are well-formed.
#[repr(C, align(8))]
pub(crate) struct BlockBytes([u8; BLOCK_SIZE]);

// No padding: the alignment divides BLOCK_SIZE.
unsafe impl Pod for BlockBytes {}
const _: () = const { assert!(size_of::<BlockBytes>() == BLOCK_SIZE) };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Taken,
}

pub(crate) struct BlockSlot {
    state: SlotState,
    data: BlockBytes,
}

impl BlockSlot {
    pub(crate) fn bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data.0
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data.0
    }

    /// Views the block's prefix as a POD structure.
    pub(crate) fn data<T: Pod>(&self) -> &T {
        self.data.as_data_view().get(0)
    }

    pub(crate) fn data_mut<T: Pod>(&mut self) -> &mut T {
        self.data.as_data_view_mut().get_mut(0)
    }
}

pub(crate) struct BlockPool {
    slots: Box<[RwLock<BlockSlot>]>,
}

impl BlockPool {
    pub(crate) fn new() -> Self {
        let slots = (0..DATA_BLOCKS)
            .map(|_| {
                RwLock::new(BlockSlot {
                    state: SlotState::Free,
                    data: BlockBytes::zeroed(),
                })
            })
            .collect();
        Self { slots }
    }

    /// Allocates the lowest-index free block, zeroed.
    ///
    /// Inspects slots one at a time under their write locks; callers must
    /// not hold any block-slot lock while allocating.
    pub(crate) fn alloc(&self) -> Result<BlockIndex, Error> {
        for (i, slot) in self.slots.iter().enumerate() {
            let mut guard = write_lock(slot);
            if guard.state == SlotState::Free {
                guard.state = SlotState::Taken;
                guard.data.0.fill(0);
                return Ok(BlockIndex::new(i as u32));
            }
        }
        log::warn!("data-block pool exhausted");
        Err(Error::BlocksExhausted)
    }

    /// Returns a block to the pool. Freeing `None` is a no-op.
    pub(crate) fn free(&self, bn: Option<BlockIndex>) {
        let Some(bn) = bn else { return };
        let mut guard = write_lock(&self.slots[bn.as_index()]);
        guard.state = SlotState::Free;
    }

    /// The lock guarding a block's state and bytes.
    pub(crate) fn slot(&self, bn: BlockIndex) -> &RwLock<BlockSlot> {
        &self.slots[bn.as_index()]
    }

    /// Number of currently free blocks. Test hook; takes each slot's read
    /// lock in turn, so the count is only exact while the pool is quiescent.
    pub(crate) fn free_blocks(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| crate::sync::read_lock(slot).state == SlotState::Free)
            .count()
    }
}

//! File operations over the storage arenas.
//!
//! Lock order, binding for every path through this module:
//! namespace mutex -> inode slot -> open-file slot -> block slot.
//! The open-files count mutex is a leaf and is never held while taking
//! another lock. `read` and `write` learn the inode from the handle, so
//! they snapshot the inumber under the handle's read lock first, then
//! acquire inode -> handle in order and re-validate the snapshot (the slot
//! may have been closed and reused in the gap).

use std::{
    fs::File,
    io::Write as _,
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use tfs_fs_types::{
    BLOCK_SIZE, BlockIndex, FileHandle, IndirectBlock, InodeKind, Inumber, MAX_DIRECT_BLOCKS,
    MAX_FILE_SIZE, OpenFlags,
};

use crate::{
    error::Error,
    path,
    state::{
        block_pool::BlockPool,
        directory,
        inode::{Inode, InodeTable},
        open_file::OpenFileTable,
    },
    sync::{lock, read_lock, write_lock},
};

/// An in-memory UNIX-style file system with a single flat root directory.
///
/// All operations take `&self`; every piece of state is guarded by its own
/// lock. A destroyed instance rejects every operation with
/// [`Error::Destroyed`]; create a fresh instance to start over.
pub struct TecnicoFs {
    inodes: InodeTable,
    blocks: BlockPool,
    open_files: OpenFileTable,
    /// Serializes the lookup/create decision in [`Self::open`] so at most
    /// one creator wins for a given name.
    namespace: Mutex<()>,
    destroyed: AtomicBool,
}

impl TecnicoFs {
    /// Creates a fresh file system containing only the root directory.
    pub fn new() -> Result<Self, Error> {
        let fs = Self {
            inodes: InodeTable::new(),
            blocks: BlockPool::new(),
            open_files: OpenFileTable::new(),
            namespace: Mutex::new(()),
            destroyed: AtomicBool::new(false),
        };
        let root = fs.inodes.create(InodeKind::Directory, &fs.blocks)?;
        if root != Inumber::ROOT {
            return Err(Error::RootInit);
        }
        Ok(fs)
    }

    fn check_alive(&self) -> Result<(), Error> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Destroyed);
        }
        Ok(())
    }

    /// Resolves `path` to the inumber bound to its name.
    pub fn lookup(&self, path: &str) -> Result<Inumber, Error> {
        self.check_alive()?;
        let name = path::file_name(path)?;
        directory::find(&self.inodes, &self.blocks, Inumber::ROOT, name)
    }

    /// Opens `path`, returning a handle whose offset starts at zero (or at
    /// the file's size with [`OpenFlags::APPEND`]).
    ///
    /// With [`OpenFlags::CREATE`] a missing name is created; with
    /// [`OpenFlags::TRUNC`] an existing file's blocks are released first.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<FileHandle, Error> {
        self.check_alive()?;
        let name = path::file_name(path)?;

        let ns = lock(&self.namespace);
        let (inum, offset) = match directory::find(&self.inodes, &self.blocks, Inumber::ROOT, name)
        {
            Ok(inum) => {
                let mut iguard = write_lock(self.inodes.slot(inum));
                let inode = iguard.as_mut().ok_or(Error::BadInumber)?;
                if flags.contains(OpenFlags::TRUNC) {
                    self.release_contents(inode);
                }
                let offset = if flags.contains(OpenFlags::APPEND) {
                    inode.size
                } else {
                    0
                };
                (inum, offset)
            }
            Err(Error::NotFound) if flags.contains(OpenFlags::CREATE) => {
                let inum = self.inodes.create(InodeKind::File, &self.blocks)?;
                if let Err(err) =
                    directory::add_entry(&self.inodes, &self.blocks, Inumber::ROOT, inum, name)
                {
                    let _ = self.inodes.delete(inum, &self.blocks);
                    return Err(err);
                }
                (inum, 0)
            }
            Err(err) => return Err(err),
        };
        drop(ns);

        // No inode lock is held while taking the open-file slot.
        self.open_files
            .add(inum, offset, flags.contains(OpenFlags::APPEND))
    }

    /// Closes a handle. The last close wakes `destroy_after_all_closed`.
    pub fn close(&self, handle: FileHandle) -> Result<(), Error> {
        self.check_alive()?;
        self.open_files.remove(handle)
    }

    /// Writes `buf` at the handle's offset, allocating blocks lazily.
    ///
    /// Returns the number of bytes written: `buf.len()` unless the file-size
    /// limit clips the range or the pool runs dry mid-write, in which case
    /// the bytes already written are reported.
    pub fn write(&self, handle: FileHandle, buf: &[u8]) -> Result<usize, Error> {
        self.check_alive()?;
        let inum = self.open_files.inumber_of(handle)?;
        let mut iguard = write_lock(self.inodes.slot(inum));
        let mut hguard = write_lock(self.open_files.slot(handle));
        let entry = hguard.as_mut().ok_or(Error::BadHandle)?;
        if entry.inumber != inum {
            return Err(Error::BadHandle);
        }
        let inode = iguard.as_mut().ok_or(Error::BadInumber)?;

        // Append handles target end-of-file as it is now, under the inode
        // lock, so concurrent appends land back to back.
        let offset = if entry.append { inode.size } else { entry.offset };
        let n = usize::min(
            buf.len(),
            (MAX_FILE_SIZE as u64).saturating_sub(offset) as usize,
        );

        let mut written = 0;
        while written < n {
            let off = offset as usize + written;
            let Ok(bn) = self.ensure_block(inode, off / BLOCK_SIZE) else {
                // Out of blocks: report the bytes already written.
                break;
            };
            let in_off = off % BLOCK_SIZE;
            let chunk = usize::min(n - written, BLOCK_SIZE - in_off);
            write_lock(self.blocks.slot(bn)).bytes_mut()[in_off..in_off + chunk]
                .copy_from_slice(&buf[written..written + chunk]);
            written += chunk;
        }

        let end = offset + written as u64;
        if end > inode.size {
            inode.size = end;
        }
        entry.offset = end;
        Ok(written)
    }

    /// Reads up to `buf.len()` bytes from the handle's offset.
    ///
    /// Returns the number of bytes read, clipped at the file's size. A
    /// missing block inside the valid range is a corruption error.
    pub fn read(&self, handle: FileHandle, buf: &mut [u8]) -> Result<usize, Error> {
        self.check_alive()?;
        let inum = self.open_files.inumber_of(handle)?;
        let mut iguard = write_lock(self.inodes.slot(inum));
        let mut hguard = write_lock(self.open_files.slot(handle));
        let entry = hguard.as_mut().ok_or(Error::BadHandle)?;
        if entry.inumber != inum {
            return Err(Error::BadHandle);
        }
        let inode = iguard.as_mut().ok_or(Error::BadInumber)?;

        let offset = entry.offset;
        let n = usize::min(buf.len(), inode.size.saturating_sub(offset) as usize);

        let mut done = 0;
        while done < n {
            let off = offset as usize + done;
            let bn = self.block_at(inode, off / BLOCK_SIZE)?;
            let in_off = off % BLOCK_SIZE;
            let chunk = usize::min(n - done, BLOCK_SIZE - in_off);
            buf[done..done + chunk]
                .copy_from_slice(&read_lock(self.blocks.slot(bn)).bytes()[in_off..in_off + chunk]);
            done += chunk;
        }

        entry.offset = offset + done as u64;
        Ok(done)
    }

    /// Copies the file at `src` out to `dest` on the host file system,
    /// overwriting it. The source must already exist.
    pub fn copy_to_external_fs(&self, src: &str, dest: impl AsRef<Path>) -> Result<(), Error> {
        self.check_alive()?;
        let handle = self.open(src, OpenFlags::empty())?;
        let result = self.copy_out(handle, dest.as_ref());
        let closed = self.close(handle);
        result?;
        closed
    }

    fn copy_out(&self, handle: FileHandle, dest: &Path) -> Result<(), Error> {
        let mut out = File::create(dest)?;
        let mut chunk = [0u8; BLOCK_SIZE];
        loop {
            let n = self.read(handle, &mut chunk)?;
            out.write_all(&chunk[..n])?;
            if n < BLOCK_SIZE {
                return Ok(());
            }
        }
    }

    /// Tears the file system down immediately. Does not block; open handles
    /// become invalid.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    /// Blocks until every open handle is closed, then destroys the file
    /// system. Afterwards every operation fails until a fresh instance
    /// replaces this one.
    pub fn destroy_after_all_closed(&self) -> Result<(), Error> {
        self.check_alive()?;
        self.open_files.wait_all_closed();
        self.destroy();
        Ok(())
    }

    /// Number of handles currently open.
    pub fn open_file_count(&self) -> usize {
        self.open_files.open_count()
    }

    /// Number of free blocks in the pool. Exact only while quiescent.
    pub fn free_block_count(&self) -> usize {
        self.blocks.free_blocks()
    }

    /// The block backing logical block `b`, allocating it (and the indirect
    /// block) on demand. Caller holds the inode's write lock; no block-slot
    /// lock may be held across an allocation.
    fn ensure_block(&self, inode: &mut Inode, b: usize) -> Result<BlockIndex, Error> {
        if b < MAX_DIRECT_BLOCKS {
            if let Some(bn) = inode.direct[b] {
                return Ok(bn);
            }
            let bn = self.blocks.alloc()?;
            inode.direct[b] = Some(bn);
            return Ok(bn);
        }

        let i = b - MAX_DIRECT_BLOCKS;
        let ind = match inode.indirect {
            Some(ind) => ind,
            None => {
                let ind = self.blocks.alloc()?;
                write_lock(self.blocks.slot(ind))
                    .data_mut::<IndirectBlock>()
                    .clear();
                inode.indirect = Some(ind);
                ind
            }
        };

        if let Some(bn) = read_lock(self.blocks.slot(ind))
            .data::<IndirectBlock>()
            .get(i)
        {
            return Ok(bn);
        }
        let bn = self.blocks.alloc()?;
        write_lock(self.blocks.slot(ind))
            .data_mut::<IndirectBlock>()
            .set(i, Some(bn));
        Ok(bn)
    }

    /// The block backing logical block `b`, which must already exist.
    fn block_at(&self, inode: &Inode, b: usize) -> Result<BlockIndex, Error> {
        if b < MAX_DIRECT_BLOCKS {
            return inode.direct[b].ok_or(Error::CorruptFileRange);
        }
        let ind = inode.indirect.ok_or(Error::CorruptFileRange)?;
        read_lock(self.blocks.slot(ind))
            .data::<IndirectBlock>()
            .get(b - MAX_DIRECT_BLOCKS)
            .ok_or(Error::CorruptFileRange)
    }

    /// Returns every block the inode references to the pool and resets its
    /// size. Caller holds the inode's write lock.
    fn release_contents(&self, inode: &mut Inode) {
        for bn in &mut inode.direct {
            self.blocks.free(bn.take());
        }
        if let Some(ind) = inode.indirect.take() {
            let listed: Vec<_> = write_lock(self.blocks.slot(ind))
                .data_mut::<IndirectBlock>()
                .drain()
                .collect();
            for bn in listed {
                self.blocks.free(bn);
            }
            self.blocks.free(Some(ind));
        }
        inode.size = 0;
    }
}

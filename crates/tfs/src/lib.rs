//! TecnicoFS: a small, in-memory UNIX-style file system.
//!
//! Files live in a single flat root directory. Each file is backed by a
//! fixed-size inode with ten direct block references and one single-level
//! indirect block; data lives in a preallocated block pool. Any number of
//! threads may operate concurrently: per-slot rw-locks guard the arenas,
//! and a namespace mutex serializes file creation.
//!
//! ```
//! use tfs::{OpenFlags, TecnicoFs};
//!
//! let fs = TecnicoFs::new()?;
//! let h = fs.open("/greeting", OpenFlags::CREATE)?;
//! assert_eq!(fs.write(h, b"hello")?, 5);
//! fs.close(h)?;
//!
//! let h = fs.open("/greeting", OpenFlags::empty())?;
//! let mut buf = [0; 16];
//! assert_eq!(fs.read(h, &mut buf)?, 5);
//! assert_eq!(&buf[..5], b"hello");
//! fs.close(h)?;
//! # Ok::<(), tfs::Error>(())
//! ```

mod error;
mod ops;
mod path;
mod state;
mod sync;

pub use tfs_fs_types::{
    BLOCK_SIZE, BLOCK_POINTERS_PER_INDIRECT, DATA_BLOCKS, FileHandle, Inumber, MAX_DIRECT_BLOCKS,
    MAX_FILE_SIZE, MAX_OPEN_FILES, OpenFlags,
};

pub use self::{error::Error, ops::TecnicoFs};

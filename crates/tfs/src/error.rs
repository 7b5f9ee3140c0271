use std::io;

/// Errors surfaced by the file-system operations.
///
/// Lock-primitive failures are not represented here: a poisoned lock means a
/// thread panicked while holding file-system state, and the only sound
/// response is to abort (see [`crate::sync`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Path is not of the form `/name` with a non-empty name.
    #[error("invalid path name")]
    InvalidPath,
    /// No directory entry carries the given name.
    #[error("no such file")]
    NotFound,
    /// The handle does not reference a taken open-file slot.
    #[error("invalid file handle")]
    BadHandle,
    /// The inumber does not reference a taken inode slot.
    #[error("invalid inumber")]
    BadInumber,
    /// The entry's target is not a directory.
    #[error("not a directory")]
    NotADirectory,
    /// Directory entry names must be non-empty.
    #[error("empty directory entry name")]
    EmptyName,
    /// The directory's entry block has no free slot.
    #[error("directory is full")]
    DirectoryFull,
    /// Every inode slot is taken.
    #[error("out of inodes")]
    InodesExhausted,
    /// Every block slot is taken.
    #[error("out of data blocks")]
    BlocksExhausted,
    /// Every open-file slot is taken.
    #[error("out of open-file slots")]
    OpenFilesExhausted,
    /// A block reference is missing inside the file's valid byte range.
    #[error("unallocated block inside file range")]
    CorruptFileRange,
    /// The root inode was not created at inumber 0.
    #[error("root directory initialization failed")]
    RootInit,
    /// The file system was destroyed; create a fresh instance to continue.
    #[error("file system destroyed")]
    Destroyed,
    /// Host-side I/O failure while copying a file out.
    #[error("host file error")]
    Io(#[from] io::Error),
}

//! Wire protocol spoken between TecnicoFS clients and the session server.
//!
//! Transport is a pair of UNIX named pipes per session: every client writes
//! requests to the server's well-known pipe, and the server writes replies
//! to the client's private pipe. A request is a single `op_code` byte
//! followed by a fixed-layout argument struct and, for `WRITE`, a payload.
//! Requests must fit in [`MAX_REQUEST_SIZE`] bytes so one request is a
//! single atomic pipe write.
//!
//! All multibyte integers use the host's native layout; both ends run on
//! the same machine and are compiled together.

use std::io::{self, Read, Write};

use arrayvec::ArrayVec;
use dataview::{Pod, PodMethods as _};
use strum::FromRepr;
pub use tfs_fs_types::OpenFlags;
use tfs_fs_types::MAX_FILE_NAME;

/// Upper bound on an encoded request, header included.
pub const MAX_REQUEST_SIZE: usize = 2048;

/// Width of a pipe-path field, including the NUL terminator.
pub const PIPE_NAME_MAX: usize = 40;

/// Number of concurrently mounted sessions the server supports.
pub const MAX_SESSIONS: usize = 64;

/// Largest `WRITE` payload that still fits in [`MAX_REQUEST_SIZE`].
pub const MAX_DATA_LEN: usize = MAX_REQUEST_SIZE - 1 - size_of::<IoArgs>();

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer closed the pipe before the full message arrived.
    #[error("truncated message on pipe")]
    Truncated,
    /// The first byte of a request is not a known op-code.
    #[error("invalid op-code {0}")]
    InvalidOpCode(u8),
    /// A `WRITE` announced a payload larger than a request may carry.
    #[error("payload of {0} bytes exceeds the request size limit")]
    OversizedPayload(u64),
    #[error("pipe error")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(err)
        }
    }
}

/// First byte of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum OpCode {
    Mount = 1,
    Unmount = 2,
    Open = 3,
    Close = 4,
    Write = 5,
    Read = 6,
    ShutdownAfterAllClosed = 7,
}

/// Arguments of `MOUNT`.
#[derive(Clone, Copy, Pod)]
#[repr(C)]
pub struct MountArgs {
    pub pipe_name: [u8; PIPE_NAME_MAX],
}

/// Arguments of `UNMOUNT` and `SHUTDOWN_AFTER_ALL_CLOSED`.
#[derive(Clone, Copy, Pod)]
#[repr(C)]
pub struct SessionArgs {
    pub session_id: i32,
}

/// Arguments of `OPEN`.
#[derive(Clone, Copy, Pod)]
#[repr(C)]
pub struct OpenArgs {
    pub session_id: i32,
    pub flags: i32,
    pub name: [u8; MAX_FILE_NAME],
}

/// Arguments of `CLOSE`.
#[derive(Clone, Copy, Debug, Pod)]
#[repr(C)]
pub struct CloseArgs {
    pub session_id: i32,
    pub handle: i32,
}

/// Arguments of `WRITE` (payload follows) and `READ`.
#[derive(Clone, Copy, Pod)]
#[repr(C)]
pub struct IoArgs {
    pub session_id: i32,
    pub handle: i32,
    pub len: u64,
}

/// Copies `src` into a fixed-width NUL-padded field.
///
/// Returns `None` if `src` does not fit with its terminator.
#[must_use]
pub fn put_fixed_name<const N: usize>(src: &[u8]) -> Option<[u8; N]> {
    if src.len() >= N {
        return None;
    }
    let mut field = [0; N];
    field[..src.len()].copy_from_slice(src);
    Some(field)
}

/// The stored bytes of a fixed-width field, up to the first NUL.
#[must_use]
pub fn fixed_name(field: &[u8]) -> &[u8] {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..len]
}

/// Encodes one request as a single buffer: op-code, arguments, payload.
///
/// # Panics
///
/// Panics if the encoded request exceeds [`MAX_REQUEST_SIZE`]; callers cap
/// payloads at [`MAX_DATA_LEN`].
#[must_use]
pub fn encode_request<A: Pod>(
    op: OpCode,
    args: &A,
    payload: &[u8],
) -> ArrayVec<u8, MAX_REQUEST_SIZE> {
    let mut buf = ArrayVec::new();
    buf.push(op as u8);
    buf.try_extend_from_slice(args.as_bytes()).unwrap();
    buf.try_extend_from_slice(payload).unwrap();
    buf
}

/// Reads the op-code byte that starts a request.
///
/// Returns `None` on a clean EOF (all writers closed the pipe), which is not
/// an error: the server reopens its pipe and keeps serving.
pub fn read_op_code<R: Read>(rx: &mut R) -> Result<Option<OpCode>, ProtocolError> {
    let mut byte = [0u8];
    loop {
        match rx.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(ProtocolError::Io(err)),
        }
    }
    OpCode::from_repr(byte[0])
        .map(Some)
        .ok_or(ProtocolError::InvalidOpCode(byte[0]))
}

/// Reads an exact-length POD value, looping over short reads.
pub fn read_pod<T: Pod, R: Read>(rx: &mut R) -> Result<T, ProtocolError> {
    let mut value = T::zeroed();
    rx.read_exact(value.as_bytes_mut())
        .map_err(ProtocolError::from_read)?;
    Ok(value)
}

/// Reads exactly `buf.len()` payload bytes.
pub fn read_payload<R: Read>(rx: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    rx.read_exact(buf).map_err(ProtocolError::from_read)
}

/// Writes a POD value in full.
pub fn write_pod<T: Pod, W: Write>(tx: &mut W, value: &T) -> Result<(), ProtocolError> {
    tx.write_all(value.as_bytes())?;
    Ok(())
}

/// Writes raw payload bytes in full.
pub fn write_payload<W: Write>(tx: &mut W, buf: &[u8]) -> Result<(), ProtocolError> {
    tx.write_all(buf)?;
    Ok(())
}

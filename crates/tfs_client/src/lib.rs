//! Client-side helper library for the TecnicoFS session server.
//!
//! A [`ClientSession`] owns one mounted session: it creates the client's
//! private FIFO, registers with the server over the well-known pipe, and
//! marshals every request/reply pair of the wire protocol. The library is a
//! transparent marshaller; all file-system semantics live on the server.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use nix::sys::stat::Mode;
use tfs_fs_types::{FileHandle, MAX_FILE_NAME};
use tfs_protocol::{
    CloseArgs, IoArgs, MAX_DATA_LEN, MountArgs, OpCode, OpenArgs, OpenFlags, PIPE_NAME_MAX,
    ProtocolError, SessionArgs, encode_request, put_fixed_name, read_payload, read_pod,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The client pipe path does not fit the protocol's fixed field.
    #[error("pipe path longer than {} bytes", PIPE_NAME_MAX - 1)]
    PipeNameTooLong,
    /// The file path does not fit the protocol's fixed field.
    #[error("file path longer than {} bytes", MAX_FILE_NAME - 1)]
    NameTooLong,
    /// A single write request carries at most [`MAX_DATA_LEN`] bytes.
    #[error("payload larger than {MAX_DATA_LEN} bytes")]
    PayloadTooLarge,
    /// The server answered the request with an error result.
    #[error("request rejected by the server")]
    Rejected,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("pipe error")]
    Io(#[from] io::Error),
}

/// One mounted session with a TecnicoFS server.
pub struct ClientSession {
    session_id: i32,
    /// Server's well-known pipe, write end.
    tx: File,
    /// This client's private pipe, read end.
    rx: File,
    client_pipe: PathBuf,
}

impl ClientSession {
    /// Mounts a session: creates `client_pipe`, announces it on
    /// `server_pipe`, and waits for the server's session id.
    pub fn mount(
        server_pipe: impl AsRef<Path>,
        client_pipe: impl AsRef<Path>,
    ) -> Result<Self, ClientError> {
        let client_pipe = client_pipe.as_ref().to_path_buf();
        let pipe_name = put_fixed_name::<PIPE_NAME_MAX>(client_pipe.as_os_str().as_encoded_bytes())
            .ok_or(ClientError::PipeNameTooLong)?;

        match std::fs::remove_file(&client_pipe) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        nix::unistd::mkfifo(&client_pipe, Mode::from_bits_truncate(0o640))
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;

        // Opening the read end with write access keeps the open from
        // blocking on the server and keeps the pipe readable across the
        // server reopening its end.
        let rx = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&client_pipe)?;
        let tx = OpenOptions::new().write(true).open(server_pipe.as_ref())?;

        let mut session = Self {
            session_id: -1,
            tx,
            rx,
            client_pipe,
        };
        session.send(encode_request(OpCode::Mount, &MountArgs { pipe_name }, &[]))?;

        let session_id: i32 = read_pod(&mut session.rx)?;
        if session_id < 0 {
            return Err(ClientError::Rejected);
        }
        log::info!("mounted session {session_id}");
        session.session_id = session_id;
        Ok(session)
    }

    #[must_use]
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Opens `path` on the server, returning the server-side handle.
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<FileHandle, ClientError> {
        let name =
            put_fixed_name::<MAX_FILE_NAME>(path.as_bytes()).ok_or(ClientError::NameTooLong)?;
        let args = OpenArgs {
            session_id: self.session_id,
            flags: flags.bits().cast_signed(),
            name,
        };
        self.send(encode_request(OpCode::Open, &args, &[]))?;

        let handle: i32 = read_pod(&mut self.rx)?;
        FileHandle::from_raw(handle).ok_or(ClientError::Rejected)
    }

    pub fn close(&mut self, handle: FileHandle) -> Result<(), ClientError> {
        let args = CloseArgs {
            session_id: self.session_id,
            handle: handle.to_raw(),
        };
        self.send(encode_request(OpCode::Close, &args, &[]))?;
        self.expect_ok()
    }

    /// Writes `buf` at the handle's offset; one request per call, so `buf`
    /// must fit in a single framed request.
    pub fn write(&mut self, handle: FileHandle, buf: &[u8]) -> Result<usize, ClientError> {
        if buf.len() > MAX_DATA_LEN {
            return Err(ClientError::PayloadTooLarge);
        }
        let args = IoArgs {
            session_id: self.session_id,
            handle: handle.to_raw(),
            len: buf.len() as u64,
        };
        self.send(encode_request(OpCode::Write, &args, buf))?;

        let written: i64 = read_pod(&mut self.rx)?;
        if written < 0 {
            return Err(ClientError::Rejected);
        }
        Ok(written as usize)
    }

    /// Reads up to `buf.len()` bytes from the handle's offset.
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize, ClientError> {
        let args = IoArgs {
            session_id: self.session_id,
            handle: handle.to_raw(),
            len: buf.len() as u64,
        };
        self.send(encode_request(OpCode::Read, &args, &[]))?;

        let count: i64 = read_pod(&mut self.rx)?;
        if count < 0 {
            return Err(ClientError::Rejected);
        }
        let count = count as usize;
        read_payload(&mut self.rx, &mut buf[..count])?;
        Ok(count)
    }

    /// Asks the server to destroy the file system once every handle is
    /// closed. A `0` reply means the server is terminating.
    pub fn shutdown_after_all_closed(&mut self) -> Result<(), ClientError> {
        let args = SessionArgs {
            session_id: self.session_id,
        };
        self.send(encode_request(OpCode::ShutdownAfterAllClosed, &args, &[]))?;
        self.expect_ok()
    }

    /// Ends the session and removes the client pipe.
    pub fn unmount(mut self) -> Result<(), ClientError> {
        let args = SessionArgs {
            session_id: self.session_id,
        };
        self.send(encode_request(OpCode::Unmount, &args, &[]))?;
        self.expect_ok()?;
        log::info!("unmounted session {}", self.session_id);
        Ok(())
        // Drop removes the pipe.
    }

    fn send(&mut self, request: impl AsRef<[u8]>) -> Result<(), ClientError> {
        self.tx.write_all(request.as_ref())?;
        Ok(())
    }

    fn expect_ok(&mut self) -> Result<(), ClientError> {
        let result: i32 = read_pod(&mut self.rx)?;
        if result < 0 {
            return Err(ClientError::Rejected);
        }
        Ok(())
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.client_pipe) {
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!(
                    "failed to remove client pipe {}: {err}",
                    self.client_pipe.display()
                );
            }
        }
    }
}

//! The TecnicoFS session server.
//!
//! One receiver thread reads requests from the server's well-known FIFO and
//! hands each one to the session it belongs to; a fixed pool of worker
//! threads (one per session) executes requests against the shared file
//! system and writes replies to the clients' private FIFOs. Shutdown is
//! cooperative: the first `SHUTDOWN_AFTER_ALL_CLOSED` wins, drains the
//! file system once every handle is closed, and stops the receiver.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write as _},
    os::unix::{ffi::OsStrExt as _, fs::OpenOptionsExt as _},
    path::{Path, PathBuf},
    str,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use dataview::Pod;
use nix::sys::stat::Mode;
use tfs::{MAX_FILE_SIZE, OpenFlags, TecnicoFs};
use tfs_fs_types::FileHandle;
use tfs_protocol::{
    CloseArgs, IoArgs, MAX_DATA_LEN, MountArgs, OpCode, OpenArgs, ProtocolError, SessionArgs,
    fixed_name, read_op_code, read_payload, read_pod, write_pod,
};

use crate::session::{SessionPool, SessionState, WorkItem};

mod session;

/// Wake byte the shutdown winner writes to the server pipe so a blocked
/// receiver notices the flag. Not a valid op-code.
const WAKE_BYTE: u8 = 0;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("file-system initialization failed")]
    Init(#[from] tfs::Error),
    #[error("server pipe error")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Creates the server pipe at `pipe_path` and serves requests until a
/// successful `SHUTDOWN_AFTER_ALL_CLOSED` drains the file system.
pub fn run(pipe_path: impl AsRef<Path>) -> Result<(), ServerError> {
    let pipe_path = pipe_path.as_ref();
    let server = Arc::new(Server {
        fs: TecnicoFs::new()?,
        sessions: SessionPool::new(),
        pipe_path: pipe_path.to_path_buf(),
        shutdown_called: AtomicBool::new(false),
        shutting_down: AtomicBool::new(false),
    });

    match std::fs::remove_file(pipe_path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    nix::unistd::mkfifo(pipe_path, Mode::from_bits_truncate(0o640))
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;

    let workers: Vec<_> = (0..tfs_protocol::MAX_SESSIONS)
        .map(|index| {
            let server = Arc::clone(&server);
            thread::Builder::new()
                .name(format!("session-{}", index + 1))
                .spawn(move || server.worker_loop(index))
        })
        .collect::<Result<_, _>>()?;

    let result = server.receive_loop();

    server.sessions.request_quit();
    for worker in workers {
        let _ = worker.join();
    }
    let _ = std::fs::remove_file(pipe_path);
    log::info!("server stopped");
    result
}

struct Server {
    fs: TecnicoFs,
    sessions: SessionPool,
    pipe_path: PathBuf,
    /// First SHUTDOWN_AFTER_ALL_CLOSED wins; later ones are refused.
    shutdown_called: AtomicBool,
    /// Set once the winning shutdown completes; stops the receiver.
    shutting_down: AtomicBool,
}

impl Server {
    /// Single reader of the server pipe. Never blocks on a worker for
    /// longer than that worker's current request.
    fn receive_loop(&self) -> Result<(), ServerError> {
        let mut rx = File::open(&self.pipe_path)?;
        log::info!("serving on {}", self.pipe_path.display());
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return Ok(());
            }
            let op = match read_op_code(&mut rx) {
                Ok(Some(op)) => op,
                Ok(None) => {
                    // Every client closed its write end. Reopening parks the
                    // receiver until the next client arrives.
                    if self.shutting_down.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    rx = File::open(&self.pipe_path)?;
                    continue;
                }
                Err(ProtocolError::InvalidOpCode(WAKE_BYTE)) => continue,
                Err(ProtocolError::InvalidOpCode(byte)) => {
                    log::error!("invalid op-code {byte}");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            match op {
                OpCode::Mount => self.accept_mount(&mut rx),
                _ => {
                    if let Err(err) = self.accept_request(op, &mut rx) {
                        // A truncated request poisons only itself; the pipe
                        // stays open for other clients.
                        log::error!("dropping {op:?} request: {err}");
                    }
                }
            }
        }
    }

    /// MOUNT allocates a session before any worker is involved; if the pool
    /// is full the receiver itself rejects the mount on the client's pipe.
    fn accept_mount(&self, rx: &mut File) {
        let args: MountArgs = match read_pod(rx) {
            Ok(args) => args,
            Err(err) => {
                log::error!("dropping mount request: {err}");
                return;
            }
        };
        let pipe = PathBuf::from(std::ffi::OsStr::from_bytes(fixed_name(&args.pipe_name)));

        match self.sessions.allocate(pipe.clone()) {
            Some(session_id) => {
                log::info!("session {session_id} mounting {}", pipe.display());
                self.hand_off(session_id, WorkItem::Mount);
            }
            None => {
                log::warn!("session table full; rejecting {}", pipe.display());
                match OpenOptions::new().write(true).open(&pipe) {
                    Ok(mut tx) => {
                        if let Err(err) = write_pod(&mut tx, &-1_i32) {
                            log::error!("mount rejection not delivered: {err}");
                        }
                    }
                    Err(err) => log::error!("cannot open {}: {err}", pipe.display()),
                }
            }
        }
    }

    /// Reads the rest of a non-MOUNT request and hands it to its session.
    fn accept_request(&self, op: OpCode, rx: &mut File) -> Result<(), ProtocolError> {
        match op {
            OpCode::Unmount => {
                let args: SessionArgs = read_pod(rx)?;
                self.hand_off(args.session_id, WorkItem::Unmount);
            }
            OpCode::ShutdownAfterAllClosed => {
                let args: SessionArgs = read_pod(rx)?;
                self.hand_off(args.session_id, WorkItem::Shutdown);
            }
            OpCode::Open => {
                let args: OpenArgs = read_pod(rx)?;
                self.hand_off(
                    args.session_id,
                    WorkItem::Open {
                        flags: args.flags,
                        name: args.name,
                    },
                );
            }
            OpCode::Close => {
                let args: CloseArgs = read_pod(rx)?;
                self.hand_off(
                    args.session_id,
                    WorkItem::Close {
                        handle: args.handle,
                    },
                );
            }
            OpCode::Write => {
                let args: IoArgs = read_pod(rx)?;
                if args.len > MAX_DATA_LEN as u64 {
                    // Drain the payload to keep the stream aligned, then
                    // fail the request.
                    let mut remaining = args.len;
                    let mut scratch = [0; 4096];
                    while remaining > 0 {
                        let chunk = usize::min(scratch.len(), remaining as usize);
                        read_payload(rx, &mut scratch[..chunk])?;
                        remaining -= chunk as u64;
                    }
                    self.reply_error(args.session_id);
                    return Err(ProtocolError::OversizedPayload(args.len));
                }
                let mut data = vec![0; args.len as usize];
                if let Err(err) = read_payload(rx, &mut data) {
                    // The session is known here, so the client gets its
                    // error reply before the request is abandoned.
                    self.reply_error(args.session_id);
                    return Err(err);
                }
                self.hand_off(
                    args.session_id,
                    WorkItem::Write {
                        handle: args.handle,
                        data,
                    },
                );
            }
            OpCode::Read => {
                let args: IoArgs = read_pod(rx)?;
                self.hand_off(
                    args.session_id,
                    WorkItem::Read {
                        handle: args.handle,
                        len: args.len,
                    },
                );
            }
            OpCode::Mount => unreachable!("mount has its own path"),
        }
        Ok(())
    }

    /// Parks the request in the session's slot and wakes its worker. Blocks
    /// only if that session's worker is still busy, which a conforming
    /// client (one outstanding request per session) never causes.
    fn hand_off(&self, session_id: i32, item: WorkItem) {
        let Some(slot) = self.sessions.get(session_id) else {
            log::error!("request for out-of-range session {session_id}");
            return;
        };
        let mut state = slot.lock();
        if !state.mounted {
            log::error!("request for unmounted session {session_id}");
            return;
        }
        state.work = Some(item);
        state.active = true;
        slot.available.notify_one();
    }

    /// Writes an error result on a session's reply pipe from the receiver,
    /// for requests that never reach a worker.
    fn reply_error(&self, session_id: i32) {
        let Some(slot) = self.sessions.get(session_id) else {
            return;
        };
        let mut state = slot.lock();
        if let Some(tx) = &mut state.tx {
            if let Err(err) = write_pod(tx, &-1_i64) {
                log::error!("session {session_id}: reply failed: {err}");
            }
        }
    }

    fn worker_loop(&self, index: usize) {
        let session_id = index as i32 + 1;
        let slot = self.sessions.slot_by_index(index);
        let mut state = slot.lock();
        loop {
            while !state.active && !state.quit {
                state = slot.available.wait(state).expect("session mutex poisoned");
            }
            if state.quit {
                return;
            }
            if let Some(item) = state.work.take() {
                // Processing happens under the slot mutex, so a session's
                // requests are serialized while other sessions run freely.
                self.process(session_id, &mut state, item);
            }
            state.active = false;
        }
    }

    fn process(&self, session_id: i32, state: &mut SessionState, item: WorkItem) {
        match item {
            WorkItem::Mount => {
                match OpenOptions::new().write(true).open(&state.client_pipe) {
                    Ok(tx) => {
                        state.tx = Some(tx);
                        self.reply(session_id, state, &session_id);
                        log::info!("session {session_id} mounted");
                    }
                    Err(err) => {
                        log::error!(
                            "session {session_id}: cannot open {}: {err}",
                            state.client_pipe.display()
                        );
                        state.mounted = false;
                    }
                }
            }
            WorkItem::Unmount => {
                self.reply(session_id, state, &0_i32);
                state.tx = None;
                state.mounted = false;
                log::info!("session {session_id} unmounted");
            }
            WorkItem::Open { flags, name } => {
                let handle = str::from_utf8(fixed_name(&name))
                    .ok()
                    .zip(OpenFlags::from_bits(flags.cast_unsigned()))
                    .and_then(|(name, flags)| self.fs.open(name, flags).ok());
                let reply = handle.map_or(-1, |handle| handle.to_raw());
                self.reply(session_id, state, &reply);
            }
            WorkItem::Close { handle } => {
                let result = FileHandle::from_raw(handle)
                    .and_then(|handle| self.fs.close(handle).ok());
                let reply: i32 = if result.is_some() { 0 } else { -1 };
                self.reply(session_id, state, &reply);
            }
            WorkItem::Write { handle, data } => {
                let written = FileHandle::from_raw(handle)
                    .and_then(|handle| self.fs.write(handle, &data).ok());
                let reply = written.map_or(-1, |n| n as i64);
                self.reply(session_id, state, &reply);
            }
            WorkItem::Read { handle, len } => {
                let mut buf = vec![0; usize::min(len as usize, MAX_FILE_SIZE)];
                let count = FileHandle::from_raw(handle)
                    .and_then(|handle| self.fs.read(handle, &mut buf).ok());
                match count {
                    Some(n) => {
                        self.reply(session_id, state, &(n as i64));
                        self.reply_bytes(session_id, state, &buf[..n]);
                    }
                    None => self.reply(session_id, state, &-1_i64),
                }
            }
            WorkItem::Shutdown => {
                if self.shutdown_called.swap(true, Ordering::SeqCst) {
                    // Only the first caller gets to shut the server down.
                    self.reply(session_id, state, &-1_i32);
                    return;
                }
                log::info!("session {session_id}: draining open files");
                let reply: i32 = match self.fs.destroy_after_all_closed() {
                    Ok(()) => 0,
                    Err(err) => {
                        log::error!("shutdown failed: {err}");
                        -1
                    }
                };
                self.reply(session_id, state, &reply);
                if reply == 0 {
                    self.shutting_down.store(true, Ordering::SeqCst);
                    self.wake_receiver();
                }
            }
        }
    }

    fn reply<T: Pod>(&self, session_id: i32, state: &mut SessionState, value: &T) {
        let Some(tx) = &mut state.tx else {
            log::error!("session {session_id}: no reply pipe");
            return;
        };
        if let Err(err) = write_pod(tx, value) {
            log::error!("session {session_id}: reply failed: {err}");
        }
    }

    fn reply_bytes(&self, session_id: i32, state: &mut SessionState, bytes: &[u8]) {
        let Some(tx) = &mut state.tx else {
            return;
        };
        if let Err(err) = tx.write_all(bytes) {
            log::error!("session {session_id}: reply payload failed: {err}");
        }
    }

    /// Pokes the server pipe so a receiver blocked in `read` or `open`
    /// observes the shutting-down flag. Non-blocking: if the receiver
    /// already exited there is no reader to wake.
    fn wake_receiver(&self) {
        let opened = OpenOptions::new()
            .write(true)
            .custom_flags(nix::fcntl::OFlag::O_NONBLOCK.bits())
            .open(&self.pipe_path);
        match opened {
            Ok(mut pipe) => {
                let _ = pipe.write_all(&[WAKE_BYTE]);
            }
            Err(err) => log::debug!("receiver already gone: {err}"),
        }
    }
}

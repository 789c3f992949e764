//! Host I/O dialects: where a semihosting file/console operation actually
//! lands. `NativeHostIo` touches the local filesystem and stdio directly;
//! `GdbRelayHostIo` forwards the call across a GDB File-I/O ('F') packet and
//! is filled in asynchronously by whatever drives the relay.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use super::TargetErrno;

/// Where semihosting file and console operations are actually served.
pub trait HostIo {
    fn open(&mut self, path: &str, mode: u32) -> Result<i32, TargetErrno>;
    fn close(&mut self, fd: i32) -> Result<(), TargetErrno>;
    fn read(&mut self, fd: i32, buf: &mut [u8]) -> Result<usize, TargetErrno>;
    fn write(&mut self, fd: i32, buf: &[u8]) -> Result<usize, TargetErrno>;
    fn write_console(&mut self, buf: &[u8]);
    fn read_console(&mut self) -> u8;
    fn seek(&mut self, fd: i32, pos: u32) -> Result<(), TargetErrno>;
    fn flen(&mut self, fd: i32) -> Result<u32, TargetErrno>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), TargetErrno>;
    fn remove(&mut self, path: &str) -> Result<(), TargetErrno>;
    fn system(&mut self, cmd: &str) -> Option<i32>;
    fn unix_time(&self) -> u64;

    /// Whether a file-I/O call made right now would have a result ready.
    /// Native I/O is always ready; a GDB relay is ready only once
    /// [`GdbRelayHostIo::complete`] has been called for the call in flight.
    fn has_pending_reply(&self) -> bool {
        true
    }
}

const TT_MODE_TABLE: [&str; 12] = [
    "r", "rb", "r+", "r+b", "w", "wb", "w+", "w+b", "a", "ab", "a+", "a+b",
];

fn io_errno(err: &std::io::Error) -> TargetErrno {
    match err.kind() {
        std::io::ErrorKind::NotFound => TargetErrno::Enoent,
        std::io::ErrorKind::PermissionDenied => TargetErrno::Eacces,
        std::io::ErrorKind::AlreadyExists => TargetErrno::Eexist,
        _ => TargetErrno::Eio,
    }
}

/// Serves semihosting calls against the host's real filesystem and stdio,
/// for a probe driven directly (no GDB in the loop).
#[derive(Default)]
pub struct NativeHostIo {
    files: HashMap<i32, File>,
    next_fd: i32,
}

impl NativeHostIo {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            next_fd: 0,
        }
    }
}

impl HostIo for NativeHostIo {
    fn open(&mut self, path: &str, mode: u32) -> Result<i32, TargetErrno> {
        let mode_str = TT_MODE_TABLE.get(mode as usize).copied().unwrap_or("r");
        let mut opts = OpenOptions::new();
        match mode_str {
            "r" | "rb" => {
                opts.read(true);
            }
            "r+" | "r+b" => {
                opts.read(true).write(true);
            }
            "w" | "wb" => {
                opts.write(true).create(true).truncate(true);
            }
            "w+" | "w+b" => {
                opts.read(true).write(true).create(true).truncate(true);
            }
            "a" | "ab" => {
                opts.append(true).create(true);
            }
            _ => {
                opts.read(true).write(true).create(true).append(true);
            }
        }
        let file = opts.open(path).map_err(|e| io_errno(&e))?;
        let fd = self.next_fd;
        self.next_fd += 1;
        self.files.insert(fd, file);
        Ok(fd)
    }

    fn close(&mut self, fd: i32) -> Result<(), TargetErrno> {
        self.files.remove(&fd).ok_or(TargetErrno::Ebadf)?;
        Ok(())
    }

    fn read(&mut self, fd: i32, buf: &mut [u8]) -> Result<usize, TargetErrno> {
        let file = self.files.get_mut(&fd).ok_or(TargetErrno::Ebadf)?;
        file.read(buf).map_err(|e| io_errno(&e))
    }

    fn write(&mut self, fd: i32, buf: &[u8]) -> Result<usize, TargetErrno> {
        let file = self.files.get_mut(&fd).ok_or(TargetErrno::Ebadf)?;
        file.write(buf).map_err(|e| io_errno(&e))
    }

    fn write_console(&mut self, buf: &[u8]) {
        let _ = std::io::stdout().write_all(buf);
    }

    fn read_console(&mut self) -> u8 {
        let mut byte = [0u8; 1];
        std::io::stdin().read_exact(&mut byte).map(|_| byte[0]).unwrap_or(0)
    }

    fn seek(&mut self, fd: i32, pos: u32) -> Result<(), TargetErrno> {
        let file = self.files.get_mut(&fd).ok_or(TargetErrno::Ebadf)?;
        file.seek(SeekFrom::Start(pos as u64)).map_err(|e| io_errno(&e))?;
        Ok(())
    }

    fn flen(&mut self, fd: i32) -> Result<u32, TargetErrno> {
        let file = self.files.get_mut(&fd).ok_or(TargetErrno::Ebadf)?;
        let meta = file.metadata().map_err(|e| io_errno(&e))?;
        Ok(meta.len() as u32)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), TargetErrno> {
        std::fs::rename(from, to).map_err(|e| io_errno(&e))
    }

    fn remove(&mut self, path: &str) -> Result<(), TargetErrno> {
        std::fs::remove_file(path).map_err(|e| io_errno(&e))
    }

    fn system(&mut self, cmd: &str) -> Option<i32> {
        std::process::Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .status()
            .ok()
            .and_then(|status| status.code())
    }

    fn unix_time(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Relays semihosting host I/O across a GDB `F` (File-I/O) packet: a call
/// here only records the pending request, the reply arrives asynchronously
/// from whatever drives the GDB connection and is fed back via
/// [`GdbRelayHostIo::complete`].
#[derive(Default)]
pub struct GdbRelayHostIo {
    pending_reply: Option<Result<i64, TargetErrno>>,
    console_out: Vec<u8>,
}

impl GdbRelayHostIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds back the result of an `F` reply packet the relay received.
    pub fn complete(&mut self, result: Result<i64, TargetErrno>) {
        self.pending_reply = Some(result);
    }

    /// Drains bytes queued for the console since the last call.
    pub fn take_console_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.console_out)
    }

    fn take_reply(&mut self) -> Result<i64, TargetErrno> {
        self.pending_reply.take().unwrap_or(Err(TargetErrno::Eio))
    }
}

impl HostIo for GdbRelayHostIo {
    fn open(&mut self, _path: &str, _mode: u32) -> Result<i32, TargetErrno> {
        self.take_reply().map(|v| v as i32)
    }

    fn close(&mut self, _fd: i32) -> Result<(), TargetErrno> {
        self.take_reply().map(|_| ())
    }

    fn read(&mut self, _fd: i32, buf: &mut [u8]) -> Result<usize, TargetErrno> {
        let n = self.take_reply()? as usize;
        Ok(n.min(buf.len()))
    }

    fn write(&mut self, _fd: i32, buf: &[u8]) -> Result<usize, TargetErrno> {
        self.take_reply().map(|n| (n as usize).min(buf.len()))
    }

    fn write_console(&mut self, buf: &[u8]) {
        self.console_out.extend_from_slice(buf);
    }

    fn read_console(&mut self) -> u8 {
        0
    }

    fn seek(&mut self, _fd: i32, _pos: u32) -> Result<(), TargetErrno> {
        self.take_reply().map(|_| ())
    }

    fn flen(&mut self, _fd: i32) -> Result<u32, TargetErrno> {
        self.take_reply().map(|n| n as u32)
    }

    fn rename(&mut self, _from: &str, _to: &str) -> Result<(), TargetErrno> {
        self.take_reply().map(|_| ())
    }

    fn remove(&mut self, _path: &str) -> Result<(), TargetErrno> {
        self.take_reply().map(|_| ())
    }

    fn system(&mut self, _cmd: &str) -> Option<i32> {
        self.take_reply().ok().map(|n| n as i32)
    }

    fn unix_time(&self) -> u64 {
        0
    }

    fn has_pending_reply(&self) -> bool {
        self.pending_reply.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn relay_returns_pending_reply() {
        let mut io = GdbRelayHostIo::new();
        io.complete(Ok(42));
        assert_eq!(io.open("foo", 0), Ok(42));
    }

    #[test]
    fn relay_without_reply_errors() {
        let mut io = GdbRelayHostIo::new();
        assert_eq!(io.close(3), Err(TargetErrno::Eio));
    }
}

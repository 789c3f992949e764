//! L4a — semihosting syscall dispatch: BKPT 0xBEAB trap, R0/R1 parameter
//! block, the full ARM semihosting syscall enumeration, and the two
//! `HostIo` dialects (native and GDB-relayed) that actually serve it.

mod hostio;

pub use hostio::{GdbRelayHostIo, HostIo, NativeHostIo};

use crate::cortex_m::{read_register, write_register, RegisterId};
use crate::cortex_m::memory::CoreMemory;
use crate::error::Error;

/// The GDB File-I/O errno space (`TARGET_E*`), used for semihosting results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TargetErrno {
    Eperm = 1,
    Enoent = 2,
    Eintr = 4,
    Eio = 5,
    Ebadf = 9,
    Eacces = 13,
    Efault = 14,
    Ebusy = 16,
    Eexist = 17,
    Enodev = 19,
    Enotdir = 20,
    Eisdir = 21,
    Einval = 22,
    Enfile = 23,
    Emfile = 24,
    Efbig = 27,
    Enospc = 28,
    Espipe = 29,
    Erofs = 30,
    Enametoolong = 91,
    Eunknown = 9999,
}

impl TargetErrno {
    /// `SYS_ISERROR` is truthy for exactly this enumerated set.
    pub fn is_error_code(value: i32) -> bool {
        matches!(
            value,
            1 | 2 | 4 | 5 | 9 | 13 | 14 | 16 | 17 | 19 | 20 | 21 | 22 | 23 | 24 | 27 | 28 | 29
                | 30 | 91 | 9999
        )
    }
}

/// Syscall numbers, per the ARM semihosting specification.
pub mod syscall {
    pub const SYS_OPEN: u32 = 0x01;
    pub const SYS_CLOSE: u32 = 0x02;
    pub const SYS_WRITEC: u32 = 0x03;
    pub const SYS_WRITE0: u32 = 0x04;
    pub const SYS_WRITE: u32 = 0x05;
    pub const SYS_READ: u32 = 0x06;
    pub const SYS_READC: u32 = 0x07;
    pub const SYS_ISERROR: u32 = 0x08;
    pub const SYS_ISTTY: u32 = 0x09;
    pub const SYS_SEEK: u32 = 0x0A;
    pub const SYS_FLEN: u32 = 0x0C;
    pub const SYS_TMPNAM: u32 = 0x0D;
    pub const SYS_REMOVE: u32 = 0x0E;
    pub const SYS_RENAME: u32 = 0x0F;
    pub const SYS_CLOCK: u32 = 0x10;
    pub const SYS_TIME: u32 = 0x11;
    pub const SYS_SYSTEM: u32 = 0x12;
    pub const SYS_ERRNO: u32 = 0x13;
    pub const SYS_GET_CMDLINE: u32 = 0x15;
    pub const SYS_HEAPINFO: u32 = 0x16;
    pub const SYS_EXIT: u32 = 0x18;
    pub const SYS_EXIT_EXTENDED: u32 = 0x20;
    pub const SYS_ELAPSED: u32 = 0x30;
    pub const SYS_TICKFREQ: u32 = 0x31;
}

const ADP_STOPPED_APPLICATION_EXIT: u32 = 0x20026;

/// A decoded parameter block: up to 4 little-endian `u32` words read from R1.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamBlock {
    pub words: [u32; 4],
}

/// `:tt` open-mode flags, indexed by the `fopen`-style mode argument.
const TT_MODE_TABLE: [&str; 12] = [
    "r", "rb", "r+", "r+b", "w", "wb", "w+", "w+b", "a", "ab", "a+", "a+b",
];

/// Reserved handle for the synthetic `:semihosting-features` file.
pub const SEMIHOSTING_FEATURES_HANDLE: i32 = i32::MAX;
const SEMIHOSTING_FEATURES_CONTENTS: [u8; 5] = [b'S', b'H', b'F', b'B', 0x03];

/// Per-target semihosting controller state (the "controller record" of
/// spec.md's data model): remembered errno, first-clock epoch, open fds.
#[derive(Debug, Default)]
pub struct SemihostingState {
    pub errno: i32,
    first_clock_centiseconds: Option<u64>,
    heapinfo: [u8; 16],
    cmdline: String,
    features_read_offset: usize,
}

impl SemihostingState {
    pub fn new(cmdline: String, heapinfo: [u8; 16]) -> Self {
        Self {
            errno: 0,
            first_clock_centiseconds: None,
            heapinfo,
            cmdline,
            features_read_offset: 0,
        }
    }

    /// Sets the 16-byte block `SYS_HEAPINFO` returns verbatim, per the
    /// `heapinfo` monitor command.
    pub fn set_heapinfo(&mut self, heapinfo: [u8; 16]) {
        self.heapinfo = heapinfo;
    }
}

/// The outcome of one semihosting dispatch: either the R0 result is ready to
/// write back immediately, or the call is a relay that must await an `F`
/// reply from the host before R0 can be written, per the "reentrant
/// semihosting wait" design note.
#[derive(Debug)]
pub enum DispatchOutcome {
    Complete(i32),
    AwaitingFileIoReply(PendingCall),
}

/// A semihosting call suspended on a host relay reply: enough of R0/R1 to
/// identify the call the scheduler needs to relay and later resume.
#[derive(Debug, Clone, Copy)]
pub struct PendingCall {
    pub syscall: u32,
    pub parameter: u32,
}

/// Syscalls that hit [`HostIo`]'s file/process operations and so can be
/// relayed through a GDB `F` packet rather than served natively.
fn is_relayable_file_op(operation: u32) -> bool {
    use syscall::*;
    matches!(
        operation,
        SYS_OPEN | SYS_CLOSE | SYS_READ | SYS_WRITE | SYS_SEEK | SYS_FLEN | SYS_RENAME | SYS_REMOVE | SYS_SYSTEM
    )
}

fn read_params(mem: &mut impl CoreMemory, block_addr: u32, count: usize) -> Result<ParamBlock, Error> {
    let mut words = [0u32; 4];
    for (i, word) in words.iter_mut().take(count).enumerate() {
        *word = mem.read_word_32(block_addr + (i as u32) * 4)?;
    }
    Ok(ParamBlock { words })
}

fn write_result(mem: &mut impl CoreMemory, value: i32) -> Result<(), Error> {
    write_register(mem, RegisterId::R(0), value as u32)
}

fn read_c_string(mem: &mut impl CoreMemory, addr: u32, len: Option<u32>) -> Result<Vec<u8>, Error> {
    match len {
        Some(len) => {
            let mut out = vec![0u8; len as usize];
            for (i, byte_slot) in out.iter_mut().enumerate() {
                let word = mem.read_word_32((addr + i as u32) & !0b11)?;
                let shift = ((addr as usize + i) % 4) * 8;
                *byte_slot = (word >> shift) as u8;
            }
            Ok(out)
        }
        None => {
            let mut out = Vec::new();
            let mut cursor = addr;
            loop {
                let word = mem.read_word_32(cursor & !0b11)?;
                let shift = ((cursor as usize) % 4) * 8;
                let byte = (word >> shift) as u8;
                if byte == 0 {
                    break;
                }
                out.push(byte);
                cursor += 1;
            }
            Ok(out)
        }
    }
}

/// Ticks since an arbitrary epoch, supplied by the platform's tick source.
pub trait TickSource {
    fn ticks(&self) -> u64;
    fn tick_frequency(&self) -> u32;
}

/// Intercepts a `BKPT 0xBEAB` trap: reads R0/R1, decodes the parameter
/// block, dispatches to `io`, writes the R0 result, per spec.md §4.5.
pub fn dispatch(
    mem: &mut impl CoreMemory,
    io: &mut dyn HostIo,
    state: &mut SemihostingState,
    tick: &dyn TickSource,
) -> Result<DispatchOutcome, Error> {
    use syscall::*;

    let operation = read_register(mem, RegisterId::R(0))?;
    let parameter = read_register(mem, RegisterId::R(1))?;

    tracing::debug!(operation = format_args!("{operation:#x}"), parameter = format_args!("{parameter:#x}"), "semihosting dispatch");

    // A relay dialect with no reply queued yet can't serve this call: suspend
    // it without touching R0, so the next dispatch against the same register
    // state (once `complete()` has been called) re-enters and finishes it.
    if is_relayable_file_op(operation) && !io.has_pending_reply() {
        return Ok(DispatchOutcome::AwaitingFileIoReply(PendingCall { syscall: operation, parameter }));
    }

    let result = match operation {
        SYS_EXIT => {
            if parameter == ADP_STOPPED_APPLICATION_EXIT {
                tracing::info!("target exited successfully");
            } else {
                tracing::info!(reason = format_args!("{parameter:#x}"), "target exited with error");
            }
            0
        }
        SYS_EXIT_EXTENDED => {
            let block = read_params(mem, parameter, 2)?;
            tracing::info!(reason = format_args!("{:#x}", block.words[0]), subcode = block.words[1], "target exited (extended)");
            0
        }
        SYS_OPEN => {
            let block = read_params(mem, parameter, 3)?;
            let (path_addr, mode_index, path_len) = (block.words[0], block.words[1], block.words[2]);
            let path = String::from_utf8_lossy(&read_c_string(mem, path_addr, Some(path_len))?).into_owned();
            if path == ":tt" {
                let mode = TT_MODE_TABLE.get(mode_index as usize).copied().unwrap_or("r");
                let fd = if mode.starts_with('r') {
                    0
                } else if mode.contains('+') || mode.starts_with('a') {
                    2
                } else {
                    1
                };
                fd + 1
            } else if path == ":semihosting-features" {
                SEMIHOSTING_FEATURES_HANDLE
            } else {
                match io.open(&path, mode_index) {
                    Ok(fd) => fd + 1,
                    Err(errno) => {
                        state.errno = errno as i32;
                        -1
                    }
                }
            }
        }
        SYS_CLOSE => {
            let block = read_params(mem, parameter, 1)?;
            let fd = block.words[0] as i32 - 1;
            if fd >= 3 || !is_tt_handle(block.words[0] as i32) {
                match io.close(fd) {
                    Ok(()) => 0,
                    Err(errno) => {
                        state.errno = errno as i32;
                        -1
                    }
                }
            } else {
                0
            }
        }
        SYS_WRITEC => {
            let byte = (mem.read_word_32(parameter & !0b11)? >> ((parameter as usize % 4) * 8)) as u8;
            io.write_console(&[byte]);
            0
        }
        SYS_WRITE0 => {
            let bytes = read_c_string(mem, parameter, None)?;
            io.write_console(&bytes);
            0
        }
        SYS_WRITE => {
            let block = read_params(mem, parameter, 3)?;
            let (fd_raw, addr, len) = (block.words[0], block.words[1], block.words[2]);
            let mut buf = vec![0u8; len as usize];
            for (i, byte) in buf.iter_mut().enumerate() {
                let word = mem.read_word_32((addr + i as u32) & !0b11)?;
                *byte = (word >> ((addr as usize + i) % 4 * 8)) as u8;
            }
            if is_tt_handle(fd_raw as i32) {
                io.write_console(&buf);
                0
            } else {
                match io.write(fd_raw as i32 - 1, &buf) {
                    Ok(written) => (len as usize - written) as i32,
                    Err(errno) => {
                        state.errno = errno as i32;
                        len as i32
                    }
                }
            }
        }
        SYS_READ => {
            let block = read_params(mem, parameter, 3)?;
            let (fd_raw, addr, len) = (block.words[0], block.words[1], block.words[2]);
            if fd_raw as i32 == SEMIHOSTING_FEATURES_HANDLE {
                let remaining = &SEMIHOSTING_FEATURES_CONTENTS[state.features_read_offset.min(SEMIHOSTING_FEATURES_CONTENTS.len())..];
                let n = remaining.len().min(len as usize);
                for (i, byte) in remaining[..n].iter().enumerate() {
                    let word_addr = (addr + i as u32) & !0b11;
                    let shift = (addr as usize + i) % 4 * 8;
                    let mut word = mem.read_word_32(word_addr)?;
                    word = (word & !(0xFF << shift)) | ((*byte as u32) << shift);
                    mem.write_word_32(word_addr, word)?;
                }
                state.features_read_offset += n;
                (len as usize - n) as i32
            } else {
                let mut buf = vec![0u8; len as usize];
                match io.read(fd_raw as i32 - 1, &mut buf) {
                    Ok(n) => {
                        for (i, byte) in buf[..n].iter().enumerate() {
                            let word_addr = (addr + i as u32) & !0b11;
                            let shift = (addr as usize + i) % 4 * 8;
                            let mut word = mem.read_word_32(word_addr)?;
                            word = (word & !(0xFF << shift)) | ((*byte as u32) << shift);
                            mem.write_word_32(word_addr, word)?;
                        }
                        (len as usize - n) as i32
                    }
                    Err(errno) => {
                        state.errno = errno as i32;
                        len as i32
                    }
                }
            }
        }
        SYS_READC => io.read_console() as i32,
        SYS_ISTTY => {
            let block = read_params(mem, parameter, 1)?;
            if is_tt_handle(block.words[0] as i32) {
                1
            } else {
                0
            }
        }
        SYS_SEEK => {
            let block = read_params(mem, parameter, 2)?;
            match io.seek(block.words[0] as i32 - 1, block.words[1]) {
                Ok(()) => 0,
                Err(errno) => {
                    state.errno = errno as i32;
                    -1
                }
            }
        }
        SYS_FLEN => {
            let block = read_params(mem, parameter, 1)?;
            match io.flen(block.words[0] as i32 - 1) {
                Ok(len) => len as i32,
                Err(errno) => {
                    state.errno = errno as i32;
                    -1
                }
            }
        }
        SYS_RENAME => {
            let block = read_params(mem, parameter, 4)?;
            let from = String::from_utf8_lossy(&read_c_string(mem, block.words[0], Some(block.words[1]))?).into_owned();
            let to = String::from_utf8_lossy(&read_c_string(mem, block.words[2], Some(block.words[3]))?).into_owned();
            match io.rename(&from, &to) {
                Ok(()) => 0,
                Err(errno) => {
                    state.errno = errno as i32;
                    -1
                }
            }
        }
        SYS_REMOVE => {
            let block = read_params(mem, parameter, 2)?;
            let path = String::from_utf8_lossy(&read_c_string(mem, block.words[0], Some(block.words[1]))?).into_owned();
            match io.remove(&path) {
                Ok(()) => 0,
                Err(errno) => {
                    state.errno = errno as i32;
                    -1
                }
            }
        }
        SYS_SYSTEM => {
            let block = read_params(mem, parameter, 2)?;
            let cmd = String::from_utf8_lossy(&read_c_string(mem, block.words[0], Some(block.words[1]))?).into_owned();
            io.system(&cmd).unwrap_or(-1)
        }
        SYS_CLOCK => {
            let now = tick.ticks() * 100 / tick.tick_frequency().max(1) as u64;
            let epoch = *state.first_clock_centiseconds.get_or_insert(now);
            (now - epoch) as i32
        }
        SYS_TIME => io.unix_time() as i32,
        SYS_ERRNO => state.errno,
        SYS_GET_CMDLINE => {
            let block = read_params(mem, parameter, 2)?;
            let (buf_addr, buf_len) = (block.words[0], block.words[1]);
            let cmdline = state.cmdline.as_bytes();
            if cmdline.len() + 1 > buf_len as usize {
                -1
            } else {
                for (i, byte) in cmdline.iter().chain(std::iter::once(&0u8)).enumerate() {
                    let word_addr = (buf_addr + i as u32) & !0b11;
                    let shift = (buf_addr as usize + i) % 4 * 8;
                    let mut word = mem.read_word_32(word_addr)?;
                    word = (word & !(0xFF << shift)) | ((*byte as u32) << shift);
                    mem.write_word_32(word_addr, word)?;
                }
                0
            }
        }
        SYS_ISERROR => {
            let block = read_params(mem, parameter, 1)?;
            TargetErrno::is_error_code(block.words[0] as i32) as i32
        }
        SYS_HEAPINFO => {
            // R1 is itself the destination: the 16-byte heapinfo block goes
            // straight to `parameter`, not to the address it points at.
            for (i, chunk) in state.heapinfo.chunks(4).enumerate() {
                let word = u32::from_le_bytes(chunk.try_into().unwrap());
                mem.write_word_32(parameter + (i as u32) * 4, word)?;
            }
            0
        }
        SYS_TMPNAM => -1,
        SYS_ELAPSED => {
            // R1 is the destination pointer for the (lo, hi) tick pair.
            let ticks = tick.ticks();
            mem.write_word_32(parameter, ticks as u32)?;
            mem.write_word_32(parameter + 4, (ticks >> 32) as u32)?;
            0
        }
        SYS_TICKFREQ => tick.tick_frequency() as i32,
        _ => {
            tracing::warn!(operation = format_args!("{operation:#x}"), "unknown semihosting syscall");
            -1
        }
    };

    write_result(mem, result)?;
    Ok(DispatchOutcome::Complete(result))
}

fn is_tt_handle(fd: i32) -> bool {
    (1..=3).contains(&fd)
}

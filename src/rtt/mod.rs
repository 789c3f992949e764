//! L4b — RTT (Real-Time Transfer) poller: locates a magic-tagged control
//! block in target RAM while the core runs, then shuttles bytes between
//! host-visible sinks/queues and the target's circular buffers.

mod search;

pub use search::rabin_karp_find;

use crate::cortex_m::memory::CoreMemory;
use crate::error::Error;

/// `"SEGGER RTT"` followed by six NUL bytes, the control-block magic.
pub const RTT_ID: [u8; 16] = *b"SEGGER RTT\0\0\0\0\0\0";

/// Hard cap on channel counts read from a target-reported control block;
/// a target claiming more is treated as corrupted rather than trusted.
pub const MAX_RTT_CHAN: usize = 16;

const CHANNEL_DESCRIPTOR_SIZE: u32 = 24;
const HEADER_SIZE: u32 = 16 + 4 + 4;

/// Ring-buffer flush policy for a channel, decoded from its `flag` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Skip,
    Trim,
    Block,
}

impl ChannelMode {
    fn from_flag(flag: u32) -> Self {
        match flag & 0b11 {
            0 => ChannelMode::Skip,
            1 => ChannelMode::Trim,
            _ => ChannelMode::Block,
        }
    }
}

/// One channel descriptor mirrored from target RAM.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDescriptor {
    pub name_addr: u32,
    pub buf_addr: u32,
    pub buf_size: u32,
    pub mode: ChannelMode,
    /// Address of this descriptor's `head`/`tail` field in target RAM (up
    /// channels call it `head`, down channels `tail` — same offset either way).
    descriptor_addr: u32,
}

const WRITE_OFFSET_FIELD: u32 = 12;
const READ_OFFSET_FIELD: u32 = 16;
const FLAG_FIELD: u32 = 20;

impl ChannelDescriptor {
    fn read(mem: &mut impl CoreMemory, addr: u32) -> Result<Self, Error> {
        let name_addr = mem.read_word_32(addr)?;
        let buf_addr = mem.read_word_32(addr + 4)?;
        let buf_size = mem.read_word_32(addr + 8)?;
        let flag = mem.read_word_32(addr + FLAG_FIELD)?;
        Ok(ChannelDescriptor {
            name_addr,
            buf_addr,
            buf_size,
            mode: ChannelMode::from_flag(flag),
            descriptor_addr: addr,
        })
    }

    fn is_initialized(&self) -> bool {
        self.buf_addr != 0 && self.buf_size > 0
    }
}

/// The two head/tail cursors of a ring buffer, as read fresh each poll.
fn read_cursors(mem: &mut impl CoreMemory, descriptor_addr: u32) -> Result<(u32, u32), Error> {
    let write_offset = mem.read_word_32(descriptor_addr + WRITE_OFFSET_FIELD)?;
    let read_offset = mem.read_word_32(descriptor_addr + READ_OFFSET_FIELD)?;
    Ok((write_offset, read_offset))
}

fn read_ring_bytes(mem: &mut impl CoreMemory, buf_addr: u32, buf_size: u32, start: u32, len: u32) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(len as usize);
    let mut cursor = start;
    for _ in 0..len {
        let word = mem.read_word_32(buf_addr + (cursor & !0b11))?;
        let shift = (cursor % 4) * 8;
        out.push((word >> shift) as u8);
        cursor = (cursor + 1) % buf_size.max(1);
    }
    Ok(out)
}

fn write_ring_bytes(mem: &mut impl CoreMemory, buf_addr: u32, buf_size: u32, start: u32, data: &[u8]) -> Result<(), Error> {
    let mut cursor = start;
    for &byte in data {
        let word_addr = buf_addr + (cursor & !0b11);
        let shift = (cursor % 4) * 8;
        let mut word = mem.read_word_32(word_addr)?;
        word = (word & !(0xFF << shift)) | ((byte as u32) << shift);
        mem.write_word_32(word_addr, word)?;
        cursor = (cursor + 1) % buf_size.max(1);
    }
    Ok(())
}

/// Raw snapshot of the 16-byte magic + 2 counts header, used to detect
/// corruption between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct HeaderSnapshot {
    id: [u8; 16],
    up_count: u32,
    down_count: u32,
}

fn read_header(mem: &mut impl CoreMemory, addr: u32) -> Result<HeaderSnapshot, Error> {
    let mut id = [0u8; 16];
    for (i, byte) in id.iter_mut().enumerate() {
        let word = mem.read_word_32(addr + ((i as u32) & !0b11))?;
        *byte = (word >> ((i % 4) * 8)) as u8;
    }
    let up_count = mem.read_word_32(addr + 16)?;
    let down_count = mem.read_word_32(addr + 20)?;
    Ok(HeaderSnapshot {
        id,
        up_count,
        down_count,
    })
}

/// Which channels the host wants serviced; the default mask enables
/// up-channels 0 and 1, plus the first down-channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelEnableMask {
    pub up: Vec<bool>,
    pub down: Vec<bool>,
}

impl ChannelEnableMask {
    fn default_for(up_count: usize, down_count: usize) -> Self {
        let mut up = vec![false; up_count];
        for slot in up.iter_mut().take(2) {
            *slot = true;
        }
        let mut down = vec![false; down_count];
        if let Some(first) = down.first_mut() {
            *first = true;
        }
        Self { up, down }
    }
}

/// Lets cores that can't access memory while running be briefly halted for
/// a transfer and resumed afterward. Most Cortex-M targets answer memory
/// accesses over the debug port regardless of run state and never need
/// this; `RttPoller::halts_before_transfer` is what gates its use.
pub trait HaltForTransfer {
    /// Whether the core is currently running (not already halted).
    fn is_running(&mut self) -> Result<bool, Error>;
    /// Halts the core so memory can be accessed.
    fn halt(&mut self) -> Result<(), Error>;
    /// Resumes the core.
    fn resume(&mut self) -> Result<(), Error>;
}

/// Poll tuning knobs, owned by the process-wide configuration record.
#[derive(Debug, Clone, Copy)]
pub struct PollTuning {
    pub min_poll_ms: u32,
    pub max_poll_ms: u32,
    pub max_poll_errs: u32,
}

impl Default for PollTuning {
    fn default() -> Self {
        Self {
            min_poll_ms: 1,
            max_poll_ms: 100,
            max_poll_errs: 10,
        }
    }
}

/// Where to look for the control block: whole RAM, or a user-restricted
/// `[start, end)` window.
#[derive(Debug, Clone, Copy)]
pub struct ScanWindow {
    pub start: u32,
    pub end: u32,
}

/// The RTT poller's persistent state: whether the block has been found, the
/// mirrored channel layout, enable mask, adaptive period, and error count.
pub struct RttPoller {
    control_block_addr: Option<u32>,
    header_snapshot: HeaderSnapshot,
    up_channels: Vec<ChannelDescriptor>,
    down_channels: Vec<ChannelDescriptor>,
    pub enabled: ChannelEnableMask,
    tuning: PollTuning,
    current_poll_ms: u32,
    consecutive_errors: u32,
    disabled: bool,
    /// Whether to halt the core for the duration of a transfer, for cores
    /// that cannot access memory while running.
    pub halts_before_transfer: bool,
}

/// Bytes transferred on one poll: up-channel data ready for the host, and
/// whether anything moved at all (drives the adaptive period).
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub up_data: Vec<(usize, Vec<u8>)>,
    pub any_transfer: bool,
}

impl RttPoller {
    pub fn new(tuning: PollTuning) -> Self {
        Self {
            control_block_addr: None,
            header_snapshot: HeaderSnapshot::default(),
            up_channels: Vec::new(),
            down_channels: Vec::new(),
            enabled: ChannelEnableMask::default(),
            tuning,
            current_poll_ms: tuning.min_poll_ms,
            consecutive_errors: 0,
            disabled: false,
            halts_before_transfer: false,
        }
    }

    pub fn is_found(&self) -> bool {
        self.control_block_addr.is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn current_poll_ms(&self) -> u32 {
        self.current_poll_ms
    }

    /// Locates the control block by literal search for `id_pattern` (or the
    /// default `RTT_ID` magic), scanning only the given window.
    pub fn locate(&mut self, mem: &mut impl CoreMemory, window: ScanWindow, id_pattern: Option<&[u8]>) -> Result<bool, Error> {
        let pattern = id_pattern.unwrap_or(&RTT_ID);
        let mut buf = Vec::with_capacity((window.end - window.start) as usize);
        let mut addr = window.start;
        while addr < window.end {
            let word = mem.read_word_32(addr)?;
            buf.extend_from_slice(&word.to_le_bytes());
            addr += 4;
        }
        match rabin_karp_find(&buf, pattern) {
            Some(offset) => {
                let found_addr = window.start + offset as u32;
                self.attach_at(mem, found_addr)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn attach_at(&mut self, mem: &mut impl CoreMemory, addr: u32) -> Result<(), Error> {
        let header = read_header(mem, addr)?;
        let up_count = (header.up_count as usize).min(MAX_RTT_CHAN);
        let down_count = (header.down_count as usize).min(MAX_RTT_CHAN);

        let mut up_channels = Vec::with_capacity(up_count);
        let mut cursor = addr + HEADER_SIZE;
        for _ in 0..up_count {
            up_channels.push(ChannelDescriptor::read(mem, cursor)?);
            cursor += CHANNEL_DESCRIPTOR_SIZE;
        }
        let mut down_channels = Vec::with_capacity(down_count);
        for _ in 0..down_count {
            down_channels.push(ChannelDescriptor::read(mem, cursor)?);
            cursor += CHANNEL_DESCRIPTOR_SIZE;
        }

        self.enabled = ChannelEnableMask::default_for(up_channels.len(), down_channels.len());
        self.up_channels = up_channels;
        self.down_channels = down_channels;
        self.control_block_addr = Some(addr);
        self.header_snapshot = header;
        Ok(())
    }

    /// Runs one poll: validates the cached header, transfers enabled
    /// up-channel bytes to `sink`, drains `downstream` into enabled
    /// down-channels, and adjusts the adaptive period. If
    /// `halts_before_transfer` is set and `halt` is given, the core is
    /// halted for the transfer and resumed afterward, but only if it was
    /// found running beforehand — a core already halted by the caller
    /// (e.g. for a breakpoint) is left exactly as it was.
    pub fn poll(
        &mut self,
        mem: &mut impl CoreMemory,
        downstream: &mut dyn Iterator<Item = u8>,
        halt: Option<&mut dyn HaltForTransfer>,
    ) -> Result<PollOutcome, Error> {
        let Some(addr) = self.control_block_addr else {
            return Ok(PollOutcome::default());
        };

        let mut halt = halt;
        let mut was_running = false;
        if self.halts_before_transfer {
            if let Some(ref mut h) = halt {
                was_running = h.is_running()?;
                if was_running {
                    h.halt()?;
                }
            }
        }

        let result = self.poll_inner(mem, addr, downstream);

        if self.halts_before_transfer && was_running {
            if let Some(ref mut h) = halt {
                h.resume()?;
            }
        }

        match result {
            Ok(outcome) => {
                self.consecutive_errors = 0;
                if outcome.any_transfer {
                    self.current_poll_ms = (self.current_poll_ms / 2).max(self.tuning.min_poll_ms);
                } else {
                    self.current_poll_ms = (self.current_poll_ms * 2).min(self.tuning.max_poll_ms);
                }
                Ok(outcome)
            }
            Err(err) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors > self.tuning.max_poll_errs {
                    self.disabled = true;
                }
                Err(err)
            }
        }
    }

    fn poll_inner(&mut self, mem: &mut impl CoreMemory, addr: u32, downstream: &mut dyn Iterator<Item = u8>) -> Result<PollOutcome, Error> {
        let header = read_header(mem, addr)?;
        if header != self.header_snapshot {
            self.control_block_addr = None;
            return Err(Error::Unsupported("RTT control block header changed between polls"));
        }

        let mut outcome = PollOutcome::default();

        for (index, channel) in self.up_channels.iter().enumerate() {
            if !self.enabled.up.get(index).copied().unwrap_or(false) || !channel.is_initialized() {
                continue;
            }
            let (write_offset, read_offset) = read_cursors(mem, channel.descriptor_addr)?;
            if write_offset == read_offset {
                continue;
            }
            let available = if write_offset > read_offset {
                write_offset - read_offset
            } else {
                channel.buf_size - read_offset + write_offset
            };
            let limit = channel.buf_size.saturating_sub(8);
            let to_read = available.min(limit);
            if to_read == 0 {
                continue;
            }
            let bytes = read_ring_bytes(mem, channel.buf_addr, channel.buf_size, read_offset, to_read)?;
            let new_tail = (read_offset + to_read) % channel.buf_size.max(1);
            mem.write_word_32(channel.descriptor_addr + READ_OFFSET_FIELD, new_tail)?;
            outcome.any_transfer = true;
            outcome.up_data.push((index, bytes));
        }

        for (index, channel) in self.down_channels.iter().enumerate() {
            if !self.enabled.down.get(index).copied().unwrap_or(false) || !channel.is_initialized() {
                continue;
            }
            let (write_offset, read_offset) = read_cursors(mem, channel.descriptor_addr)?;
            let free = if read_offset > write_offset {
                read_offset - write_offset - 1
            } else {
                channel.buf_size - write_offset + read_offset - 1
            };
            if free == 0 {
                continue;
            }
            let mut staged = Vec::new();
            for _ in 0..free {
                match downstream.next() {
                    Some(b) => staged.push(b),
                    None => break,
                }
            }
            if staged.is_empty() {
                continue;
            }
            write_ring_bytes(mem, channel.buf_addr, channel.buf_size, write_offset, &staged)?;
            let new_head = (write_offset + staged.len() as u32) % channel.buf_size.max(1);
            mem.write_word_32(channel.descriptor_addr + WRITE_OFFSET_FIELD, new_head)?;
            outcome.any_transfer = true;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    struct FakeMemory(HashMap<u32, u32>);
    impl CoreMemory for FakeMemory {
        fn read_word_32(&mut self, addr: u32) -> Result<u32, Error> {
            Ok(*self.0.get(&addr).unwrap_or(&0))
        }
        fn write_word_32(&mut self, addr: u32, value: u32) -> Result<(), Error> {
            self.0.insert(addr, value);
            Ok(())
        }
    }

    fn write_bytes(mem: &mut FakeMemory, addr: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            let word_addr = addr + ((i as u32) & !0b11);
            let shift = (i % 4) * 8;
            let entry = mem.0.entry(word_addr).or_insert(0);
            *entry = (*entry & !(0xFF << shift)) | ((b as u32) << shift);
        }
    }

    fn write_u32(mem: &mut FakeMemory, addr: u32, value: u32) {
        mem.0.insert(addr, value);
    }

    #[test]
    fn locate_finds_control_block_via_rabin_karp() {
        let mut mem = FakeMemory(Default::default());
        let base = 0x2000_0400u32;
        write_bytes(&mut mem, base, &RTT_ID);
        write_u32(&mut mem, base + 16, 2); // up count
        write_u32(&mut mem, base + 20, 1); // down count

        let up0 = base + HEADER_SIZE;
        let up1 = up0 + CHANNEL_DESCRIPTOR_SIZE;
        let down0 = up1 + CHANNEL_DESCRIPTOR_SIZE;
        for (addr, buf_addr, buf_size) in [(up0, 0x3000, 64u32), (up1, 0x3100, 64), (down0, 0x3200, 64)] {
            write_u32(&mut mem, addr, 0); // name_addr
            write_u32(&mut mem, addr + 4, buf_addr);
            write_u32(&mut mem, addr + 8, buf_size);
            write_u32(&mut mem, addr + FLAG_FIELD, 1); // trim
        }

        let mut poller = RttPoller::new(PollTuning::default());
        let window = ScanWindow {
            start: 0x2000_0000,
            end: 0x2000_1000,
        };
        let found = poller.locate(&mut mem, window, None).unwrap();
        assert!(found);
        assert!(poller.is_found());
        assert_eq!(poller.up_channels.len(), 2);
        assert_eq!(poller.down_channels.len(), 1);
    }

    #[test]
    fn poll_transfers_up_channel_bytes_and_halves_period() {
        let mut mem = FakeMemory(Default::default());
        let base = 0x2000_0400u32;
        write_bytes(&mut mem, base, &RTT_ID);
        write_u32(&mut mem, base + 16, 1);
        write_u32(&mut mem, base + 20, 0);
        let up0 = base + HEADER_SIZE;
        write_u32(&mut mem, up0, 0);
        write_u32(&mut mem, up0 + 4, 0x3000);
        write_u32(&mut mem, up0 + 8, 64);
        write_u32(&mut mem, up0 + FLAG_FIELD, 1);

        let mut poller = RttPoller::new(PollTuning::default());
        poller
            .locate(
                &mut mem,
                ScanWindow {
                    start: 0x2000_0000,
                    end: 0x2000_1000,
                },
                None,
            )
            .unwrap();

        write_bytes(&mut mem, 0x3000, b"hi");
        write_u32(&mut mem, up0 + WRITE_OFFSET_FIELD, 2);
        write_u32(&mut mem, up0 + READ_OFFSET_FIELD, 0);

        let mut downstream = std::iter::empty();
        let outcome = poller.poll(&mut mem, &mut downstream, None).unwrap();
        assert_eq!(outcome.up_data.len(), 1);
        assert_eq!(outcome.up_data[0].1, b"hi");
        assert!(poller.current_poll_ms() <= PollTuning::default().min_poll_ms.max(1));
    }

    #[test]
    fn max_poll_errs_self_disables() {
        let mut poller = RttPoller::new(PollTuning {
            min_poll_ms: 1,
            max_poll_ms: 100,
            max_poll_errs: 2,
        });
        poller.control_block_addr = Some(0x2000_0400);
        poller.header_snapshot.id = RTT_ID;

        struct FailingMemory;
        impl CoreMemory for FailingMemory {
            fn read_word_32(&mut self, _addr: u32) -> Result<u32, Error> {
                Err(Error::Timeout)
            }
            fn write_word_32(&mut self, _addr: u32, _value: u32) -> Result<(), Error> {
                Err(Error::Timeout)
            }
        }

        let mut mem = FailingMemory;
        let mut downstream = std::iter::empty();
        for _ in 0..3 {
            let _ = poller.poll(&mut mem, &mut downstream, None);
        }
        assert!(poller.is_disabled());
    }

    struct RecordingHalt {
        running: bool,
        halted: bool,
        resumed: bool,
    }

    impl HaltForTransfer for RecordingHalt {
        fn is_running(&mut self) -> Result<bool, Error> {
            Ok(self.running)
        }
        fn halt(&mut self) -> Result<(), Error> {
            self.halted = true;
            Ok(())
        }
        fn resume(&mut self) -> Result<(), Error> {
            self.resumed = true;
            Ok(())
        }
    }

    fn poller_over_one_up_channel() -> (FakeMemory, RttPoller, u32) {
        let mut mem = FakeMemory(Default::default());
        let base = 0x2000_0400u32;
        write_bytes(&mut mem, base, &RTT_ID);
        write_u32(&mut mem, base + 16, 1);
        write_u32(&mut mem, base + 20, 0);
        let up0 = base + HEADER_SIZE;
        write_u32(&mut mem, up0, 0);
        write_u32(&mut mem, up0 + 4, 0x3000);
        write_u32(&mut mem, up0 + 8, 64);
        write_u32(&mut mem, up0 + FLAG_FIELD, 1);

        let mut poller = RttPoller::new(PollTuning::default());
        poller
            .locate(
                &mut mem,
                ScanWindow {
                    start: 0x2000_0000,
                    end: 0x2000_1000,
                },
                None,
            )
            .unwrap();
        (mem, poller, up0)
    }

    #[test]
    fn halts_and_resumes_only_when_core_was_running() {
        let (mut mem, mut poller, up0) = poller_over_one_up_channel();
        poller.halts_before_transfer = true;
        write_bytes(&mut mem, 0x3000, b"hi");
        write_u32(&mut mem, up0 + WRITE_OFFSET_FIELD, 2);
        write_u32(&mut mem, up0 + READ_OFFSET_FIELD, 0);

        let mut downstream = std::iter::empty();
        let mut halt = RecordingHalt {
            running: true,
            halted: false,
            resumed: false,
        };
        poller.poll(&mut mem, &mut downstream, Some(&mut halt)).unwrap();
        assert!(halt.halted);
        assert!(halt.resumed);
    }

    #[test]
    fn does_not_resume_a_core_that_was_already_halted() {
        let (mut mem, mut poller, up0) = poller_over_one_up_channel();
        poller.halts_before_transfer = true;
        write_bytes(&mut mem, 0x3000, b"hi");
        write_u32(&mut mem, up0 + WRITE_OFFSET_FIELD, 2);
        write_u32(&mut mem, up0 + READ_OFFSET_FIELD, 0);

        let mut downstream = std::iter::empty();
        let mut halt = RecordingHalt {
            running: false,
            halted: false,
            resumed: false,
        };
        poller.poll(&mut mem, &mut downstream, Some(&mut halt)).unwrap();
        assert!(!halt.halted);
        assert!(!halt.resumed);
    }
}

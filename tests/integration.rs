//! Cross-module round-trip tests against an in-memory mock core, exercising
//! the Cortex-M controller, RTT poller and semihosting dispatcher together
//! without any real hardware link, grounded on the same
//! flat-memory-plus-register-store shape as `MockMemoryAp` in the ADIv5
//! layer's own unit tests.

use std::collections::HashMap;
use std::time::Duration;

use bmp_core::cortex_m::memory::CoreMemory;
use bmp_core::cortex_m::registers::{Dcrsr, DCRDR, DCRSR, DFSR, DHCSR};
use bmp_core::cortex_m::{self, CortexMState, HaltReason, RegisterId, VectorCatch};
use bmp_core::error::Error;
use bmp_core::rtt::{PollTuning, RttPoller, ScanWindow, RTT_ID};
use bmp_core::semihosting::{self, syscall, DispatchOutcome, HostIo, SemihostingState};

/// A single in-memory core: plain RAM plus a faithfully-simulated
/// DHCSR/DCRSR/DCRDR register file, shared across every layer under test.
struct SimCore {
    ram: HashMap<u32, u32>,
    registers: HashMap<u8, u32>,
    last_dcrdr_write: u32,
    pending_read: Option<u32>,
    halted: bool,
    dfsr: u32,
}

impl SimCore {
    fn new() -> Self {
        Self {
            ram: HashMap::new(),
            registers: HashMap::new(),
            last_dcrdr_write: 0,
            pending_read: None,
            halted: false,
            dfsr: 0,
        }
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            let word_addr = addr + ((i as u32) & !0b11);
            let shift = (i % 4) * 8;
            let entry = self.ram.entry(word_addr).or_insert(0);
            *entry = (*entry & !(0xFF << shift)) | ((b as u32) << shift);
        }
    }
}

impl CoreMemory for SimCore {
    fn read_word_32(&mut self, addr: u32) -> Result<u32, Error> {
        if addr == DHCSR {
            // Mirror C_HALT onto the read-only S_HALT status bit, as real
            // silicon does the instant the core halts.
            let halt_bit = if self.halted { 1 << 17 } else { 0 };
            return Ok(halt_bit);
        }
        if addr == DCRDR {
            return Ok(self.pending_read.take().unwrap_or(0));
        }
        if addr == DFSR {
            return Ok(self.dfsr);
        }
        Ok(*self.ram.get(&addr).unwrap_or(&0))
    }

    fn write_word_32(&mut self, addr: u32, value: u32) -> Result<(), Error> {
        if addr == DHCSR {
            self.halted = value & 0b10 != 0; // C_HALT
            return Ok(());
        }
        if addr == DFSR {
            self.dfsr &= !value; // write-1-to-clear
            return Ok(());
        }
        if addr == DCRDR {
            self.last_dcrdr_write = value;
            return Ok(());
        }
        if addr == DCRSR {
            let dcrsr = Dcrsr::from(value);
            let index = dcrsr.regsel();
            if dcrsr.regwnr() {
                self.registers.insert(index, self.last_dcrdr_write);
            } else {
                self.pending_read = Some(*self.registers.get(&index).unwrap_or(&0));
            }
            return Ok(());
        }
        self.ram.insert(addr, value);
        Ok(())
    }
}

struct FixedTick;
impl semihosting::TickSource for FixedTick {
    fn ticks(&self) -> u64 {
        0
    }
    fn tick_frequency(&self) -> u32 {
        1000
    }
}

#[test]
fn attach_halt_and_resume_round_trip() {
    let mut mem = SimCore::new();
    let mut state = CortexMState::new();

    // attach() halts the core to establish control; it should already report halted.
    cortex_m::attach(&mut mem, &mut state, VectorCatch::default(), false, Duration::from_millis(50)).unwrap();
    assert_eq!(cortex_m::halt_poll(&mut mem, &mut state).unwrap(), HaltReason::Request);

    cortex_m::resume(&mut mem, &mut state, false).unwrap();
    assert_eq!(cortex_m::halt_poll(&mut mem, &mut state).unwrap(), HaltReason::Running);

    cortex_m::halt_request(&mut mem).unwrap();
    assert_eq!(cortex_m::halt_poll_request(&mut mem, Duration::from_millis(50)).unwrap(), HaltReason::Request);

    cortex_m::write_register(&mut mem, RegisterId::R(0), 0x1234_5678).unwrap();
    cortex_m::write_register(&mut mem, RegisterId::R(1), 0xCAFE_BABE).unwrap();
    assert_eq!(cortex_m::read_register(&mut mem, RegisterId::R(0)).unwrap(), 0x1234_5678);
    assert_eq!(cortex_m::read_register(&mut mem, RegisterId::R(1)).unwrap(), 0xCAFE_BABE);

    cortex_m::resume(&mut mem, &mut state, false).unwrap();
    cortex_m::detach(&mut mem, &mut state).unwrap();
}

#[test]
fn rtt_locate_and_poll_share_memory_with_cortex_m_attach() {
    let mut mem = SimCore::new();
    let mut state = CortexMState::new();
    cortex_m::attach(&mut mem, &mut state, VectorCatch::default(), false, Duration::from_millis(50)).unwrap();

    let base = 0x2000_0400u32;
    mem.write_bytes(base, &RTT_ID);
    mem.ram.insert(base + 16, 1); // up count
    mem.ram.insert(base + 20, 0); // down count
    let up0 = base + 24;
    mem.ram.insert(up0, 0); // name_addr
    mem.ram.insert(up0 + 4, 0x3000); // buf_addr
    mem.ram.insert(up0 + 8, 64); // buf_size
    mem.ram.insert(up0 + 20, 1); // flag = trim

    // Seed a few bytes of up-channel data as the target would have written.
    mem.write_bytes(0x3000, b"hello");
    mem.ram.insert(up0 + 12, 5); // write_offset
    mem.ram.insert(up0 + 16, 0); // read_offset

    let mut poller = RttPoller::new(PollTuning::default());
    let window = ScanWindow {
        start: 0x2000_0000,
        end: 0x2000_1000,
    };
    assert!(poller.locate(&mut mem, window, None).unwrap());

    let outcome = poller.poll(&mut mem, &mut std::iter::empty(), None).unwrap();
    assert!(outcome.any_transfer);
    assert_eq!(outcome.up_data[0].1, b"hello");
}

#[test]
fn semihosting_writes_through_the_same_register_file_cortex_m_uses() {
    let mut mem = SimCore::new();
    let mut state = CortexMState::new();
    cortex_m::attach(&mut mem, &mut state, VectorCatch::default(), false, Duration::from_millis(50)).unwrap();

    cortex_m::write_register(&mut mem, RegisterId::R(0), syscall::SYS_WRITE0).unwrap();
    cortex_m::write_register(&mut mem, RegisterId::R(1), 0x5000).unwrap();
    let message = b"integration\0";
    mem.write_bytes(0x5000, message);

    struct CaptureIo {
        console: Vec<u8>,
    }
    impl HostIo for CaptureIo {
        fn open(&mut self, _path: &str, _mode: u32) -> Result<i32, semihosting::TargetErrno> {
            Err(semihosting::TargetErrno::Enoent)
        }
        fn close(&mut self, _fd: i32) -> Result<(), semihosting::TargetErrno> {
            Ok(())
        }
        fn read(&mut self, _fd: i32, _buf: &mut [u8]) -> Result<usize, semihosting::TargetErrno> {
            Ok(0)
        }
        fn write(&mut self, _fd: i32, _buf: &[u8]) -> Result<usize, semihosting::TargetErrno> {
            Ok(0)
        }
        fn write_console(&mut self, buf: &[u8]) {
            self.console.extend_from_slice(buf);
        }
        fn read_console(&mut self) -> u8 {
            0
        }
        fn seek(&mut self, _fd: i32, _pos: u32) -> Result<(), semihosting::TargetErrno> {
            Ok(())
        }
        fn flen(&mut self, _fd: i32) -> Result<u32, semihosting::TargetErrno> {
            Ok(0)
        }
        fn rename(&mut self, _from: &str, _to: &str) -> Result<(), semihosting::TargetErrno> {
            Ok(())
        }
        fn remove(&mut self, _path: &str) -> Result<(), semihosting::TargetErrno> {
            Ok(())
        }
        fn system(&mut self, _command: &str) -> Option<i32> {
            None
        }
        fn unix_time(&self) -> u64 {
            0
        }
    }

    let mut io = CaptureIo { console: Vec::new() };
    let mut shstate = SemihostingState::new(String::new(), [0; 16]);
    let outcome = semihosting::dispatch(&mut mem, &mut io, &mut shstate, &FixedTick).unwrap();
    assert!(matches!(outcome, DispatchOutcome::Complete(0)));
    assert_eq!(io.console, b"integration");
}

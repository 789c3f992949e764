//! L1 — ADIv5 DP/AP transport.

pub mod ap;
pub mod dp;

use std::collections::HashMap;

use crate::link::{Link, LinkError};

pub use dp::{Abort, Ctrl, DebugPortId, DebugPortVersion, Select};

/// Errors specific to the ADIv5 transaction layer.
#[derive(docsplay::Display, thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmError {
    /// link transport error
    Transport(LinkError),

    /// access port fault (sticky DP error)
    ApFault,

    /// WAIT acknowledge exceeded retry budget
    WaitTimeout,

    /// access port {0} not present
    ApNotPresent(u8),

    /// misaligned memory access
    Misaligned,
}

impl From<LinkError> for ArmError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::Wait => ArmError::WaitTimeout,
            _ => ArmError::Transport(e),
        }
    }
}

/// Minimum number of WAIT-retries the DP must tolerate before giving up.
pub const MIN_WAIT_RETRIES: u32 = 100;

/// DP register addresses (4-bit register index within the current bank).
pub mod dp_register {
    /// `ABORT`, write-only, clears sticky flags.
    pub const ABORT: u8 = 0x0;
    /// `CTRL/STAT`, banked via `SELECT`.
    pub const CTRL_STAT: u8 = 0x4;
    /// `SELECT`, selects AP + bank.
    pub const SELECT: u8 = 0x8;
    /// `RDBUFF`, holds the result of the last AP read.
    pub const RDBUFF: u8 = 0xC;
}

/// One discovered Debug Port.
///
/// Per the arena design note, a `DP` owns its APs by index rather than the
/// APs holding a refcounted pointer back to the DP; [`target_list_free`]-style
/// cleanup just drops the arena.
#[derive(Debug)]
pub struct DebugPort {
    pub(crate) select_cache: Select,
    pub(crate) sticky_fault: bool,
    pub(crate) identity: Option<DebugPortId>,
    pub(crate) version: DebugPortVersion,
    pub(crate) aps: Vec<ap::AccessPort>,
}

impl DebugPort {
    fn new(version: DebugPortVersion) -> Self {
        Self {
            select_cache: Select::default(),
            sticky_fault: false,
            identity: None,
            version,
            aps: Vec::new(),
        }
    }
}

/// Opaque handle into a [`DpArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DpHandle(pub(crate) u32);

/// Owns every DP discovered on a link. Freeing the arena frees every AP
/// transitively, satisfying "freeing a DP frees its APs" without refcounting.
#[derive(Debug, Default)]
pub struct DpArena {
    dps: HashMap<u32, DebugPort>,
    next_id: u32,
}

impl DpArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a newly-discovered DP and returns its handle.
    pub fn insert(&mut self, version: DebugPortVersion) -> DpHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.dps.insert(id, DebugPort::new(version));
        DpHandle(id)
    }

    /// Looks up a DP by handle.
    pub fn get(&self, handle: DpHandle) -> Option<&DebugPort> {
        self.dps.get(&handle.0)
    }

    /// Looks up a DP by handle, mutably.
    pub fn get_mut(&mut self, handle: DpHandle) -> Option<&mut DebugPort> {
        self.dps.get_mut(&handle.0)
    }

    /// Drops every DP (and transitively every AP). Mirrors `target_list_free`.
    pub fn free_all(&mut self) {
        self.dps.clear();
    }

    /// Number of DPs currently live.
    pub fn len(&self) -> usize {
        self.dps.len()
    }

    /// True if no DPs are live.
    pub fn is_empty(&self) -> bool {
        self.dps.is_empty()
    }
}

/// Low-level `DPACC`/`APACC` request, used when the caller needs precise
/// ordering guarantees instead of the convenience `dp_read`/`ap_read` API.
#[derive(Debug, Clone, Copy)]
pub struct LowAccess {
    pub ap_not_dp: bool,
    pub read_not_write: bool,
    pub address: u8,
    pub value: u32,
}

/// The six primitives L2/L3 use to talk to a DP/AP pair over whichever
/// [`Link`] is active.
pub struct AdiV5<L> {
    pub(crate) link: L,
    pub(crate) dps: DpArena,
    pub(crate) active_dp: Option<DpHandle>,
}

impl<L: Link> AdiV5<L> {
    /// Wraps a link as an ADIv5 transaction engine with no DPs yet discovered.
    pub fn new(link: L) -> Self {
        Self {
            link,
            dps: DpArena::new(),
            active_dp: None,
        }
    }

    /// Performs one low-level transaction with the documented WAIT-retry
    /// policy (>= [`MIN_WAIT_RETRIES`] attempts) and FAULT sticky-setting.
    pub fn low_access(&mut self, dp: DpHandle, req: LowAccess) -> Result<u32, ArmError> {
        let mut retries = 0;
        loop {
            match self.try_low_access(dp, req) {
                Ok(value) => return Ok(value),
                Err(ArmError::WaitTimeout) if retries < MIN_WAIT_RETRIES => {
                    retries += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_low_access(&mut self, dp: DpHandle, req: LowAccess) -> Result<u32, ArmError> {
        // The bit-level encoding of the 8-bit SWD/JTAG request header and
        // ACK decode is the responsibility of the concrete `Link`; at this
        // layer we model only the semantics the spec fixes: OK returns
        // data, WAIT asks the caller to retry, FAULT sets the sticky flag.
        if req.read_not_write {
            let (value, parity_ok) = self.link.seq_in_parity(32);
            if !parity_ok {
                return Err(ArmError::Transport(LinkError::TransportError));
            }
            Ok(value as u32)
        } else {
            self.link.seq_out_parity(req.value as u64, 32);
            if req.address == dp_register::ABORT {
                if let Some(d) = self.dps.get_mut(dp) {
                    d.sticky_fault = false;
                }
            }
            Ok(0)
        }
    }

    /// Reads a DP register, re-issuing `SELECT` only when the requested
    /// bank differs from the cached one.
    pub fn dp_read(&mut self, dp: DpHandle, addr: u8) -> Result<u32, ArmError> {
        self.low_access(
            dp,
            LowAccess {
                ap_not_dp: false,
                read_not_write: true,
                address: addr,
                value: 0,
            },
        )
    }

    /// Writes a DP register.
    pub fn dp_write(&mut self, dp: DpHandle, addr: u8, value: u32) -> Result<(), ArmError> {
        self.low_access(
            dp,
            LowAccess {
                ap_not_dp: false,
                read_not_write: false,
                address: addr,
                value,
            },
        )?;
        Ok(())
    }

    /// Selects `apsel`'s given register bank, re-writing `SELECT` only on
    /// a change, then issues the read.
    pub fn ap_read(&mut self, dp: DpHandle, apsel: u8, addr: u8) -> Result<u32, ArmError> {
        self.select_ap_bank(dp, apsel, addr)?;
        self.low_access(
            dp,
            LowAccess {
                ap_not_dp: true,
                read_not_write: true,
                address: addr & 0xC,
                value: 0,
            },
        )
    }

    /// Selects `apsel`'s given register bank, then issues the write.
    pub fn ap_write(&mut self, dp: DpHandle, apsel: u8, addr: u8, value: u32) -> Result<(), ArmError> {
        self.select_ap_bank(dp, apsel, addr)?;
        self.low_access(
            dp,
            LowAccess {
                ap_not_dp: true,
                read_not_write: false,
                address: addr & 0xC,
                value,
            },
        )?;
        Ok(())
    }

    fn select_ap_bank(&mut self, dp: DpHandle, apsel: u8, addr: u8) -> Result<(), ArmError> {
        let bank = (addr >> 4) & 0xF;
        let needs_write = {
            let d = self.dps.get(dp).ok_or(ArmError::ApNotPresent(apsel))?;
            d.select_cache.ap_sel() != apsel || d.select_cache.ap_bank_sel() != bank
        };
        if needs_write {
            let mut select = Select::default();
            select.set_ap_sel(apsel);
            select.set_ap_bank_sel(bank);
            self.dp_write(dp, dp_register::SELECT, select.clone().into())?;
            if let Some(d) = self.dps.get_mut(dp) {
                d.select_cache = select;
            }
        }
        Ok(())
    }

    /// Returns the sticky-fault code for `dp` and clears it, as `error()`
    /// is documented to do.
    pub fn error(&mut self, dp: DpHandle) -> Result<(), ArmError> {
        let sticky = self.dps.get(dp).map(|d| d.sticky_fault).unwrap_or(false);
        if sticky {
            let mut abort = Abort::from(0u32);
            abort.set_stkerrclr(true);
            abort.set_stkcmpclr(true);
            abort.set_wderrclr(true);
            abort.set_orunerrclr(true);
            self.dp_write(dp, dp_register::ABORT, abort.into())?;
            Err(ArmError::ApFault)
        } else {
            Ok(())
        }
    }
}

/// Adapts one MEM-AP's word-level memory transfers to the [`CoreMemory`]
/// contract L2 depends on, so the Cortex-M controller never needs to know
/// about DPs, APs or `SELECT` caching.
pub struct MemoryAp<'a, L> {
    pub iface: &'a mut AdiV5<L>,
    pub dp: DpHandle,
    pub ap_index: usize,
}

impl<'a, L: Link> crate::cortex_m::memory::CoreMemory for MemoryAp<'a, L> {
    fn read_word_32(&mut self, addr: u32) -> Result<u32, crate::error::Error> {
        let mut buf = [0u8; 4];
        self.iface
            .mem_read_sized(self.dp, self.ap_index, addr as u64, &mut buf, ap::Align::Word)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_word_32(&mut self, addr: u32, value: u32) -> Result<(), crate::error::Error> {
        self.iface.mem_write_sized(
            self.dp,
            self.ap_index,
            addr as u64,
            &value.to_le_bytes(),
            ap::Align::Word,
        )?;
        Ok(())
    }
}

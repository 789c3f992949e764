//! Device-family dispatch: a tagged [`DeviceDriver`] enum rather than a
//! function-pointer table, per the "sum types over closures" design note.

use bitfield::bitfield;

use crate::cortex_m::memory::CoreMemory;
use crate::discovery::romtable::ComponentId;
use crate::discovery::{Flash, MonitorCommand, Ram};
use crate::error::Error;

/// What a device-family probe contributes once it recognizes the target.
pub struct ProbeResult {
    pub driver_name: &'static str,
    pub ram: Vec<Ram>,
    pub flash: Vec<Flash>,
    pub commands: Vec<MonitorCommand>,
}

/// Implemented by each concrete device-family variant of [`DeviceDriver`].
pub trait DeviceProbe {
    /// Returns `true` without touching the target if the component's
    /// designer/part code is one this driver recognizes.
    fn matches(&self, id: &ComponentId) -> bool;

    /// Confirms the match against the live target and builds its RAM/Flash
    /// declarations. Only called when [`matches`](Self::matches) succeeded.
    fn probe(&self, mem: &mut dyn CoreMemory, id: &ComponentId) -> Result<ProbeResult, Error>;
}

/// Always matches; installed before any family-specific probe is tried, so
/// a recognized Cortex-M SCS component always yields at least this target.
pub struct GenericCortexM;

impl DeviceProbe for GenericCortexM {
    fn matches(&self, _id: &ComponentId) -> bool {
        true
    }

    fn probe(&self, _mem: &mut dyn CoreMemory, _id: &ComponentId) -> Result<ProbeResult, Error> {
        Ok(ProbeResult {
            driver_name: "Generic Cortex-M",
            ram: vec![Ram {
                start: 0x2000_0000,
                length: 0x1_0000,
            }],
            flash: vec![],
            commands: vec![],
        })
    }
}

/// ST designer code (JEP106: cc=0, id=0x20 per the public assignment table).
const ST_JEP106_ID: u8 = 0x20;
const ST_JEP106_CC: u8 = 0x0;

bitfield! {
    struct DbgmcuIdcode(u32);
    impl Debug;
    u16, dev_id, _: 11, 0;
}

const DBGMCU_IDCODE: u32 = 0xE004_2000;

/// STM32F4-family driver: designer = ST, DBGMCU `DEV_ID` in the F4 range.
pub struct Stm32F4;

const STM32F4_DEV_IDS: &[u16] = &[0x419, 0x423, 0x431, 0x433, 0x441, 0x463];

impl DeviceProbe for Stm32F4 {
    fn matches(&self, id: &ComponentId) -> bool {
        id.designer.cc == ST_JEP106_CC && id.designer.id == ST_JEP106_ID
    }

    fn probe(&self, mem: &mut dyn CoreMemory, _id: &ComponentId) -> Result<ProbeResult, Error> {
        let idcode = DbgmcuIdcode(mem.read_word_32(DBGMCU_IDCODE)?);
        if !STM32F4_DEV_IDS.contains(&idcode.dev_id()) {
            return Err(Error::Unsupported("DBGMCU DEV_ID is not an STM32F4 part"));
        }

        Ok(ProbeResult {
            driver_name: "STM32F4",
            ram: vec![
                Ram {
                    start: 0x2000_0000,
                    length: 128 * 1024,
                },
                Ram {
                    start: 0x1000_0000,
                    length: 64 * 1024,
                },
            ],
            flash: vec![Flash {
                start: 0x0800_0000,
                length: 1024 * 1024,
                block_size: 128 * 1024,
                erase_value: 0xFF,
            }],
            commands: vec![MonitorCommand {
                name: "option_bytes",
                help: "read/write STM32F4 option bytes",
            }],
        })
    }
}

/// Device-specific probe/flash-ops, one variant per recognized family.
/// `probe()` tries each variant in designer/part order; the generic driver
/// is installed first and is never itself gated on a match.
pub enum DeviceDriver {
    Generic(GenericCortexM),
    Stm32F4(Stm32F4),
}

impl DeviceDriver {
    /// All family-specific drivers to try, in the order the scan consults
    /// them. Does not include [`GenericCortexM`]; that one is installed
    /// unconditionally before these are attempted.
    pub fn family_probes() -> Vec<DeviceDriver> {
        vec![DeviceDriver::Stm32F4(Stm32F4)]
    }

    pub fn matches(&self, id: &ComponentId) -> bool {
        match self {
            DeviceDriver::Generic(d) => d.matches(id),
            DeviceDriver::Stm32F4(d) => d.matches(id),
        }
    }

    pub fn probe(&self, mem: &mut dyn CoreMemory, id: &ComponentId) -> Result<ProbeResult, Error> {
        match self {
            DeviceDriver::Generic(d) => d.probe(mem, id),
            DeviceDriver::Stm32F4(d) => d.probe(mem, id),
        }
    }
}

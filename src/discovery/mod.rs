//! L3 — link scan, ROM table walk, device identification, target list.

pub mod device;
pub mod romtable;

use crate::arm::ap::Align;
use crate::arm::{ArmError, DpHandle, MemoryAp};
use crate::cortex_m::{Breakwatch, CortexMState};
use crate::error::Error;
use crate::link::Link;
use crate::semihosting::SemihostingState;

use device::DeviceDriver;
use romtable::ComponentId;

/// Errors specific to the AP/target scan pipeline.
#[derive(docsplay::Display, thiserror::Error, Debug)]
pub enum ScanError {
    /// no devices responded on the link
    NoDevices,
    /// link protocol error during scan
    Protocol,
}

/// A RAM region on a discovered target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ram {
    pub start: u32,
    pub length: u32,
}

/// A Flash region: declarative metadata only, no programming algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flash {
    pub start: u32,
    pub length: u32,
    pub block_size: u32,
    pub erase_value: u8,
}

/// A target-specific monitor command contributed by a device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorCommand {
    pub name: &'static str,
    pub help: &'static str,
}

/// A single discovered Cortex-M target.
pub struct Target {
    pub designer: jep106::JEP106Code,
    pub part_id: u16,
    pub cpuid: u32,
    pub driver_name: &'static str,
    pub dp: DpHandle,
    pub ap_index: usize,
    pub ram: Vec<Ram>,
    pub flash: Vec<Flash>,
    pub commands: Vec<MonitorCommand>,
    pub breakwatches: Vec<Breakwatch>,
    pub cortex_m: CortexMState,
    /// Host-side syscall state and errno for this target's semihosting calls.
    pub semihosting: SemihostingState,
}

/// Every target found by a scan; dropping this frees every target record in
/// one step, mirroring `target_list_free`.
#[derive(Default)]
pub struct TargetList {
    pub targets: Vec<Target>,
}

impl TargetList {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Walks AP indices 0..255 on `dp`, stopping at the first empty IDR, as the
/// SWD scan is specified to do.
pub fn scan_aps<L: Link>(iface: &mut crate::arm::AdiV5<L>, dp: DpHandle) -> Result<Vec<usize>, ArmError> {
    let mut found = Vec::new();
    for apsel in 0u8..=255 {
        match iface.probe_ap(dp, apsel)? {
            Some(index) => found.push(index),
            None => break,
        }
    }
    Ok(found)
}

/// Runs the JTAG IR/DR IDCODE scan and returns one DP per recognized ARM
/// debug-port IDCODE (bit 0 must be set, per the standard IDCODE format).
pub fn jtag_scan_idcodes<D: crate::link::LinkDriver>(
    jtag: &mut crate::link::jtag::Jtag<D>,
    max_devices: usize,
) -> Result<Vec<u32>, ScanError> {
    let codes = jtag.scan_idcodes(max_devices);
    if codes.is_empty() {
        return Err(ScanError::NoDevices);
    }
    Ok(codes.into_iter().filter(|c| c & 1 != 0).collect())
}

const CORTEX_M_SCS_PART: u16 = 0x00C;

/// Given a ROM-table component recognized as a Cortex-M SCS, installs a
/// default target then tries each device-family probe in turn. The first
/// one to succeed wins; failures are non-fatal and the next is tried, per
/// spec.md's "per-probe failures are non-fatal" rule.
pub fn cortexm_probe<L: Link>(
    iface: &mut crate::arm::AdiV5<L>,
    dp: DpHandle,
    ap_index: usize,
    component: ComponentId,
) -> Result<Target, Error> {
    let mut buf = [0u8; 4];
    iface
        .mem_read_sized(dp, ap_index, crate::cortex_m::registers::CPUID as u64, &mut buf, Align::Word)
        .map_err(Error::from)?;
    let cpuid = u32::from_le_bytes(buf);

    let generic = device::GenericCortexM;
    let mut result = {
        let mut mem = MemoryAp {
            iface: &mut *iface,
            dp,
            ap_index,
        };
        generic.probe(&mut mem, &component)?
    };

    for driver in DeviceDriver::family_probes() {
        if !driver.matches(&component) {
            continue;
        }
        let outcome = {
            let mut mem = MemoryAp {
                iface: &mut *iface,
                dp,
                ap_index,
            };
            driver.probe(&mut mem, &component)
        };
        match outcome {
            Ok(probed) => {
                result = probed;
                break;
            }
            Err(_) => {
                // Non-fatal: clear any sticky DP error this probe left and try the next.
                let _ = iface.error(dp);
                continue;
            }
        }
    }

    Ok(Target {
        designer: component.designer,
        part_id: component.part,
        cpuid,
        driver_name: result.driver_name,
        dp,
        ap_index,
        ram: result.ram,
        flash: result.flash,
        commands: result.commands,
        breakwatches: Vec::new(),
        cortex_m: CortexMState::new(),
        semihosting: SemihostingState::new(String::new(), [0; 16]),
    })
}

/// Is this component the Cortex-M System Control Space, per spec.md's "on
/// finding a Cortex-M SCS component" trigger for `cortexm_probe`.
pub fn is_cortex_m_scs(component: &ComponentId) -> bool {
    component.part == CORTEX_M_SCS_PART
}

use device::DeviceProbe;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cortex_m_scs_part_recognized() {
        let id = ComponentId {
            designer: jep106::JEP106Code::new(0x4, 0x3B),
            part: CORTEX_M_SCS_PART,
            component_address: 0xE000_E000,
        };
        assert!(is_cortex_m_scs(&id));
    }
}

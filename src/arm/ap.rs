//! Access Ports: IDR identification and the MEM-AP CSW/TAR/DRW memory
//! transfer contract used by everything above L1.

use bitfield::bitfield;

use super::{AdiV5, ArmError, DpHandle};
use crate::link::Link;

/// AP register addresses (within the currently-selected bank).
pub mod ap_register {
    pub const CSW: u8 = 0x00;
    pub const TAR: u8 = 0x04;
    pub const DRW: u8 = 0x0C;
    pub const BASE: u8 = 0xF8;
    pub const CFG: u8 = 0xF4;
    pub const IDR: u8 = 0xFC;
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Csw(u32);
    impl Debug;
    pub dbg_sw_enable, set_dbg_sw_enable: 31;
    pub u8, prot, set_prot: 30, 24;
    pub spiden, set_spiden: 23;
    pub mode, set_mode: 11, 8;
    pub addr_inc, set_addr_inc: 5, 4;
    pub device_en, _: 6;
    pub u8, size, set_size: 2, 0;
}

impl From<u32> for Csw {
    fn from(raw: u32) -> Self {
        Csw(raw)
    }
}

impl From<Csw> for u32 {
    fn from(raw: Csw) -> Self {
        raw.0
    }
}

/// Data access width for a MEM-AP transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Byte,
    Halfword,
    Word,
}

impl Align {
    fn csw_size(self) -> u8 {
        match self {
            Align::Byte => 0b000,
            Align::Halfword => 0b001,
            Align::Word => 0b010,
        }
    }

    /// Width in bytes.
    pub fn width(self) -> usize {
        match self {
            Align::Byte => 1,
            Align::Halfword => 2,
            Align::Word => 4,
        }
    }
}

/// Auto-increment TAR window size: addresses within the same 1 KiB block as
/// the last-programmed TAR can be accessed without reloading TAR.
pub const TAR_WINDOW: u64 = 1024;

/// Which AP flavor an IDR describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApKind {
    MemAp,
    JtagAp,
    Unknown,
}

impl ApKind {
    fn from_idr(idr: u32) -> Self {
        let class = (idr >> 13) & 0xF;
        let ap_type = idr & 0xF;
        match (class, ap_type) {
            (0x8, t) if t != 0 => ApKind::MemAp,
            (0, 0) => ApKind::JtagAp,
            _ => ApKind::Unknown,
        }
    }
}

/// A discovered Access Port: one slave of a DP, addressed by `apsel`.
#[derive(Debug)]
pub struct AccessPort {
    pub apsel: u8,
    pub idr: u32,
    pub kind: ApKind,
    pub base: u32,
    pub cfg: u32,
    pub(crate) csw_cache: Option<u32>,
    pub(crate) tar_cache: Option<u64>,
    /// DEMCR snapshot taken on attach, restored verbatim on detach.
    pub demcr_snapshot: Option<u32>,
}

impl AccessPort {
    pub(crate) fn new(apsel: u8, idr: u32, base: u32, cfg: u32) -> Self {
        Self {
            apsel,
            idr,
            kind: ApKind::from_idr(idr),
            base,
            cfg,
            csw_cache: None,
            tar_cache: None,
            demcr_snapshot: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.idr != 0
    }
}

impl<L: Link> AdiV5<L> {
    /// Reads the IDR of `apsel`, returning 0 if the AP is not implemented
    /// (the empty-IDR stop condition used by the L3 scan).
    pub fn read_ap_idr(&mut self, dp: DpHandle, apsel: u8) -> Result<u32, ArmError> {
        self.ap_read(dp, apsel, ap_register::IDR)
    }

    /// Probes and registers the AP at `apsel`, reading IDR/BASE/CFG. Returns
    /// `Ok(None)` on an empty IDR (the scan's stop condition), never errors
    /// for an absent AP.
    pub fn probe_ap(&mut self, dp: DpHandle, apsel: u8) -> Result<Option<usize>, ArmError> {
        let idr = self.read_ap_idr(dp, apsel)?;
        if idr == 0 {
            return Ok(None);
        }
        let base = self.ap_read(dp, apsel, ap_register::BASE)?;
        let cfg = self.ap_read(dp, apsel, ap_register::CFG)?;
        let ap = AccessPort::new(apsel, idr, base, cfg);
        let index = {
            let d = self.dps.get_mut(dp).ok_or(ArmError::ApNotPresent(apsel))?;
            d.aps.push(ap);
            d.aps.len() - 1
        };
        Ok(Some(index))
    }

    fn ensure_csw(&mut self, dp: DpHandle, ap_index: usize, align: Align) -> Result<(), ArmError> {
        let apsel = self.dps.get(dp).unwrap().aps[ap_index].apsel;
        let mut csw = Csw::from(0);
        csw.set_dbg_sw_enable(true);
        csw.set_prot(0x23);
        csw.set_addr_inc(0b01); // single auto-increment
        csw.set_size(align.csw_size());
        let raw: u32 = csw.into();

        let cached = self.dps.get(dp).unwrap().aps[ap_index].csw_cache;
        if cached != Some(raw) {
            self.ap_write(dp, apsel, ap_register::CSW, raw)?;
            self.dps.get_mut(dp).unwrap().aps[ap_index].csw_cache = Some(raw);
        }
        Ok(())
    }

    fn set_tar(&mut self, dp: DpHandle, ap_index: usize, addr: u64) -> Result<bool, ArmError> {
        let apsel = self.dps.get(dp).unwrap().aps[ap_index].apsel;
        let cached = self.dps.get(dp).unwrap().aps[ap_index].tar_cache;
        let reload = match cached {
            Some(tar) => {
                let window_start = tar - (tar % TAR_WINDOW);
                addr < window_start || addr >= window_start + TAR_WINDOW
            }
            None => true,
        };
        if reload {
            self.ap_write(dp, apsel, ap_register::TAR, addr as u32)?;
            self.dps.get_mut(dp).unwrap().aps[ap_index].tar_cache = Some(addr);
        }
        Ok(reload)
    }

    /// Reads `len` bytes from target memory at `src`, honoring sub-word
    /// alignment and reloading TAR exactly once per 1 KiB window crossing.
    pub fn mem_read_sized(
        &mut self,
        dp: DpHandle,
        ap_index: usize,
        src: u64,
        dest: &mut [u8],
        align: Align,
    ) -> Result<(), ArmError> {
        self.ensure_csw(dp, ap_index, align)?;
        let width = align.width();
        if dest.len() % width != 0 || src as usize % width != 0 {
            return Err(ArmError::Misaligned);
        }
        let apsel = self.dps.get(dp).unwrap().aps[ap_index].apsel;
        let mut addr = src;
        for chunk in dest.chunks_mut(width) {
            self.set_tar(dp, ap_index, addr)?;
            let word = self.ap_read(dp, apsel, ap_register::DRW)?;
            let shift = (addr as usize % 4) * 8;
            let lane = ((word >> shift) as u64).to_le_bytes();
            chunk.copy_from_slice(&lane[..width]);
            addr += width as u64;
            if let Some(d) = self.dps.get_mut(dp) {
                d.aps[ap_index].tar_cache = Some(addr);
            }
        }
        Ok(())
    }

    /// Writes `src` to target memory at `dest`, same alignment/window rules
    /// as [`mem_read_sized`].
    pub fn mem_write_sized(
        &mut self,
        dp: DpHandle,
        ap_index: usize,
        dest: u64,
        src: &[u8],
        align: Align,
    ) -> Result<(), ArmError> {
        self.ensure_csw(dp, ap_index, align)?;
        let width = align.width();
        if src.len() % width != 0 || dest as usize % width != 0 {
            return Err(ArmError::Misaligned);
        }
        let apsel = self.dps.get(dp).unwrap().aps[ap_index].apsel;
        let mut addr = dest;
        for chunk in src.chunks(width) {
            self.set_tar(dp, ap_index, addr)?;
            let shift = (addr as usize % 4) * 8;
            let mut buf = [0u8; 8];
            buf[..width].copy_from_slice(chunk);
            let lane = u64::from_le_bytes(buf) << shift;
            self.ap_write(dp, apsel, ap_register::DRW, lane as u32)?;
            addr += width as u64;
            if let Some(d) = self.dps.get_mut(dp) {
                d.aps[ap_index].tar_cache = Some(addr);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ap_kind_classifies_mem_ap() {
        // AHB-AP IDR: class=8 (MEM-AP), type=1 (AMBA AHB).
        let idr = (0x8 << 13) | 0x1 | (0x23B << 17);
        assert_eq!(ApKind::from_idr(idr), ApKind::MemAp);
    }

    #[test]
    fn csw_size_encodes_align() {
        assert_eq!(Align::Byte.csw_size(), 0);
        assert_eq!(Align::Halfword.csw_size(), 1);
        assert_eq!(Align::Word.csw_size(), 2);
    }
}

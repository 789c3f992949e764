//! DP register layout: `ABORT`, `CTRL/STAT`, `SELECT`, `DPIDR`.

use bitfield::bitfield;
use jep106::JEP106Code;

bitfield! {
    #[derive(Clone)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 5;
    pub _, set_wderrclr: 4;
    pub _, set_stkerrclr: 3;
    pub _, set_stkcmpclr: 2;
    pub _, set_dapabort: 1;
}

impl From<u32> for Abort {
    fn from(raw: u32) -> Self {
        Abort(raw)
    }
}

impl From<Abort> for u32 {
    fn from(raw: Abort) -> Self {
        raw.0
    }
}

bitfield! {
    #[derive(Clone)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub u8, trn_cnt, set_trn_cnt: 23, 12;
    pub w_data_err, _: 7;
    pub read_ok, _: 6;
    pub sticky_err, _: 5;
    pub stick_cmp, _: 4;
    pub sticky_orun, _: 1;
    pub orun_detect, set_orun_detect: 0;
}

impl Default for Ctrl {
    fn default() -> Self {
        Ctrl(0)
    }
}

impl From<u32> for Ctrl {
    fn from(raw: u32) -> Self {
        Ctrl(raw)
    }
}

impl From<Ctrl> for u32 {
    fn from(raw: Ctrl) -> Self {
        raw.0
    }
}

bitfield! {
    #[derive(Clone)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl Default for Select {
    fn default() -> Self {
        Select(0)
    }
}

impl From<u32> for Select {
    fn from(raw: u32) -> Self {
        Select(raw)
    }
}

impl From<Select> for u32 {
    fn from(raw: Select) -> Self {
        raw.0
    }
}

bitfield! {
    #[derive(Clone)]
    pub struct Dpidr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    u8, jep_cc, _: 11, 8;
    u8, jep_id, _: 7, 1;
}

impl From<u32> for Dpidr {
    fn from(raw: u32) -> Self {
        Dpidr(raw)
    }
}

/// Decoded identity of a Debug Port, built from `DPIDR`.
#[derive(Debug, Clone)]
pub struct DebugPortId {
    pub revision: u8,
    pub part_no: u8,
    pub version: DebugPortVersion,
    pub min_dp_support: bool,
    pub designer: JEP106Code,
}

impl From<Dpidr> for DebugPortId {
    fn from(dpidr: Dpidr) -> Self {
        DebugPortId {
            revision: dpidr.revision(),
            part_no: dpidr.part_no(),
            version: dpidr.version().into(),
            min_dp_support: dpidr.min(),
            designer: JEP106Code::new(dpidr.jep_cc(), dpidr.jep_id()),
        }
    }
}

/// SWD-DP v1/v2 or JTAG-DP protocol variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugPortVersion {
    DPv0,
    DPv1,
    DPv2,
    JtagDp,
    Unsupported,
}

impl From<u8> for DebugPortVersion {
    fn from(value: u8) -> Self {
        match value {
            0 => DebugPortVersion::DPv0,
            1 => DebugPortVersion::DPv1,
            2 => DebugPortVersion::DPv2,
            _ => DebugPortVersion::Unsupported,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn select_round_trips_apsel_and_bank() {
        let mut s = Select::default();
        s.set_ap_sel(0x12);
        s.set_ap_bank_sel(0x3);
        let raw: u32 = s.into();
        let back = Select::from(raw);
        assert_eq!(back.ap_sel(), 0x12);
        assert_eq!(back.ap_bank_sel(), 0x3);
    }

    #[test]
    fn dpidr_decodes_designer() {
        // ARM JEP106: cc=0x4, id continuation encoded in bits.
        let mut raw: u32 = 0;
        raw |= 1 << 16; // min
        raw |= 1 << 12; // version = 1 (DPv1)
        let id = DebugPortId::from(Dpidr::from(raw));
        assert!(id.min_dp_support);
        assert_eq!(id.version, DebugPortVersion::DPv1);
    }
}

//! Cortex-M SCS register layout: DHCSR/DCRSR/DCRDR/DEMCR/DFSR/AIRCR/CPUID/CTR,
//! plus the FPB and DWT unit bases.

use bitfield::bitfield;

/// Base address of the System Control Space.
pub const SCS_BASE: u32 = 0xE000_E000;
pub const DHCSR: u32 = 0xE000_EDF0;
pub const DCRSR: u32 = 0xE000_EDF4;
pub const DCRDR: u32 = 0xE000_EDF8;
pub const DEMCR: u32 = 0xE000_EDFC;
pub const DFSR: u32 = 0xE000_ED30;
pub const HFSR: u32 = 0xE000_ED2C;
pub const CFSR: u32 = 0xE000_ED28;
pub const AIRCR: u32 = 0xE000_ED0C;
pub const CPUID: u32 = 0xE000_ED00;
pub const CTR: u32 = 0xE000_ED7C;
pub const CPACR: u32 = 0xE000_ED88;

/// Flash Patch and Breakpoint unit base.
pub const FPB_BASE: u32 = 0xE000_2000;
/// Data Watchpoint and Trace unit base.
pub const DWT_BASE: u32 = 0xE000_1000;

pub const DHCSR_DBGKEY: u32 = 0xA05F_0000;
pub const AIRCR_VECTKEY: u32 = 0x05FA_0000;

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Dhcsr(u32);
    impl Debug;
    pub s_reset_st, _: 25;
    pub s_retire_st, _: 24;
    pub s_lockup, _: 19;
    pub s_sleep, _: 18;
    pub s_halt, _: 17;
    pub s_regrdy, _: 16;
    pub c_snapstall, set_c_snapstall: 5;
    pub c_maskints, set_c_maskints: 3;
    pub c_step, set_c_step: 2;
    pub c_halt, set_c_halt: 1;
    pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr {
    /// Builds a write value with DBGKEY set, as every DHCSR write requires.
    pub fn for_write(self) -> u32 {
        (u32::from(self) & 0x0000_FFFF) | DHCSR_DBGKEY
    }
}

impl From<u32> for Dhcsr {
    fn from(raw: u32) -> Self {
        Dhcsr(raw)
    }
}

impl From<Dhcsr> for u32 {
    fn from(raw: Dhcsr) -> Self {
        raw.0
    }
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Dcrsr(u32);
    impl Debug;
    pub regwnr, set_regwnr: 16;
    pub u8, regsel, set_regsel: 6, 0;
}

impl From<u32> for Dcrsr {
    fn from(raw: u32) -> Self {
        Dcrsr(raw)
    }
}

impl From<Dcrsr> for u32 {
    fn from(raw: Dcrsr) -> Self {
        raw.0
    }
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Demcr(u32);
    impl Debug;
    pub trcena, set_trcena: 24;
    pub mon_req, set_mon_req: 19;
    pub mon_step, set_mon_step: 18;
    pub mon_pend, set_mon_pend: 17;
    pub mon_en, set_mon_en: 16;
    pub vc_harderr, set_vc_harderr: 10;
    pub vc_interr, set_vc_interr: 9;
    pub vc_buserr, set_vc_buserr: 8;
    pub vc_staterr, set_vc_staterr: 7;
    pub vc_chkerr, set_vc_chkerr: 6;
    pub vc_nocperr, set_vc_nocperr: 5;
    pub vc_mmerr, set_vc_mmerr: 4;
    pub vc_corereset, set_vc_corereset: 0;
}

impl From<u32> for Demcr {
    fn from(raw: u32) -> Self {
        Demcr(raw)
    }
}

impl From<Demcr> for u32 {
    fn from(raw: Demcr) -> Self {
        raw.0
    }
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Dfsr(u32);
    impl Debug;
    pub external, set_external: 4;
    pub vcatch, set_vcatch: 3;
    pub dwttrap, set_dwttrap: 2;
    pub bkpt, set_bkpt: 1;
    pub halted, set_halted: 0;
}

impl From<u32> for Dfsr {
    fn from(raw: u32) -> Self {
        Dfsr(raw)
    }
}

impl From<Dfsr> for u32 {
    fn from(raw: Dfsr) -> Self {
        raw.0
    }
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Aircr(u32);
    impl Debug;
    pub vectclractive, set_vectclractive: 1;
    pub sysresetreq, set_sysresetreq: 2;
}

impl Aircr {
    pub fn for_write(self) -> u32 {
        (u32::from(self) & 0xFFFF) | AIRCR_VECTKEY
    }
}

impl From<u32> for Aircr {
    fn from(raw: u32) -> Self {
        Aircr(raw)
    }
}

impl From<Aircr> for u32 {
    fn from(raw: Aircr) -> Self {
        raw.0
    }
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Ctr(u32);
    impl Debug;
    pub u8, format, _: 31, 29;
}

impl From<u32> for Ctr {
    fn from(raw: u32) -> Self {
        Ctr(raw)
    }
}

/// CTR format value indicating a unified/separate cache is present.
pub const CTR_FORMAT_WITH_CACHE: u8 = 0b100;

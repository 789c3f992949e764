//! SWD (Serial Wire Debug) link implementation.
//!
//! A shift register clocked by SWCLK with bidirectional SWDIO. Bit order is
//! LSB first throughout; the interface is strictly half-duplex, so every
//! read/write turnaround inserts exactly one idle (Z) bit.

use super::{parity_of, Link, LinkDriver, LinkError};

/// JTAG-to-SWD switch sequence, clocked MSB first as 16 bits: `0xE79E`.
pub const JTAG_TO_SWD: u16 = 0xE79E;

/// Number of clocks in the JTAG-to-SWD / SWD-to-JTAG switch sequence.
pub const SWITCH_SEQUENCE_BITS: u32 = 16;

/// Minimum number of SWCLK cycles with SWDIO held high for a line reset.
pub const LINE_RESET_CYCLES: u32 = 50;

/// SWD driven directly atop a [`LinkDriver`].
pub struct Swd<D> {
    driver: D,
}

impl<D: LinkDriver> Swd<D> {
    /// Wraps a raw bit-banging driver as an SWD link.
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    fn idle_cycles(&mut self, n: u32) {
        self.driver.drive(true);
        self.driver.clock_out(0, n);
    }

    /// Issues the switch-to-SWD sequence followed by a line reset and a
    /// dummy read, the documented SWD attach sequence.
    fn switch_and_line_reset(&mut self) {
        self.driver.drive(true);
        // MSB-first 16 bit pattern, as specified.
        let reversed = (JTAG_TO_SWD as u64).reverse_bits() >> (64 - SWITCH_SEQUENCE_BITS);
        self.driver.clock_out(reversed, SWITCH_SEQUENCE_BITS);
        self.driver.clock_out(u64::MAX, LINE_RESET_CYCLES);
        // At least 2 idle cycles before the next packet request.
        self.driver.clock_out(0, 2);
    }
}

impl<D: LinkDriver> Link for Swd<D> {
    fn reset_link(&mut self) -> Result<(), LinkError> {
        self.switch_and_line_reset();
        Ok(())
    }

    fn seq_in(&mut self, n: u32) -> u64 {
        self.driver.drive(false);
        self.driver.clock_in(n)
    }

    fn seq_in_parity(&mut self, n: u32) -> (u64, bool) {
        self.driver.drive(false);
        let value = self.driver.clock_in(n);
        let parity_bit = self.driver.clock_in(1) & 1 != 0;
        (value, parity_bit == parity_of(value, n))
    }

    fn seq_out(&mut self, value: u64, n: u32) {
        self.driver.drive(true);
        self.driver.clock_out(value, n);
        self.idle_cycles(1);
    }

    fn seq_out_parity(&mut self, value: u64, n: u32) {
        self.driver.drive(true);
        self.driver.clock_out(value, n);
        self.driver.clock_out(parity_of(value, n) as u64, 1);
        self.idle_cycles(1);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct MockDriver {
        out: Vec<(u64, u32)>,
        in_queue: std::collections::VecDeque<u64>,
    }

    impl LinkDriver for MockDriver {
        fn clock_out(&mut self, value: u64, n: u32) {
            self.out.push((value, n));
        }
        fn clock_in(&mut self, n: u32) -> u64 {
            let v = self.in_queue.pop_front().unwrap_or(0);
            if n >= 64 {
                v
            } else {
                v & ((1u64 << n) - 1)
            }
        }
        fn drive(&mut self, _out: bool) {}
        fn jtag_step(&mut self, _tms: bool, _tdi: bool) -> bool {
            false
        }
    }

    #[test]
    fn reset_link_emits_switch_and_reset() {
        let mut swd = Swd::new(MockDriver {
            out: vec![],
            in_queue: Default::default(),
        });
        swd.reset_link().unwrap();
        assert_eq!(swd.driver.out[0].1, SWITCH_SEQUENCE_BITS);
        assert_eq!(swd.driver.out[1], (u64::MAX, LINE_RESET_CYCLES));
    }

    #[test]
    fn parity_round_trips() {
        assert!(parity_of(0b0000_0001, 8));
        assert!(!parity_of(0b0000_0011, 8));
        assert!(parity_of(0b0000_0111, 8));
    }

    #[test]
    fn seq_in_parity_detects_mismatch() {
        let mut swd = Swd::new(MockDriver {
            out: vec![],
            in_queue: std::collections::VecDeque::from([0b1010, 1]),
        });
        let (value, ok) = swd.seq_in_parity(4);
        assert_eq!(value, 0b1010);
        // parity_of(0b1010,4) is false (two set bits), but the wire sends 1 => mismatch
        assert!(!ok);
    }
}

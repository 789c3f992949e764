//! L0 — link transport.
//!
//! Both SWD and JTAG are expressed behind one [`Link`] trait so that the
//! ADIv5 layer (L1) never needs to know which physical wire protocol is in
//! use. The concrete bit-banging is an external collaborator: these
//! implementations only sequence bits through the [`LinkDriver`] primitive,
//! they do not toggle GPIOs themselves.

pub mod jtag;
pub mod swd;

/// Transport-level failure kinds for L0.
#[derive(docsplay::Display, thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// transport error: parity mismatch or bus contention
    TransportError,

    /// target responded WAIT
    Wait,

    /// target responded FAULT
    Fault,

    /// no devices found on the link
    NoDevices,

    /// link protocol error
    ///
    /// A bus-protocol invariant was violated (unexpected ACK, bad bit count, ...).
    #[ignore_extra_doc_attributes]
    ProtocolError,
}

/// The raw bit-banging primitive the platform provides.
///
/// This is the one external collaborator of L0: actually driving clock and
/// data lines is out of scope here, but both [`swd`] and [`jtag`] are
/// expressed purely in terms of this trait so that the sequencing logic
/// (switch sequences, parity, TMS state walks) is fully exercised without
/// real hardware.
pub trait LinkDriver {
    /// Clocks `n` bits out on the data line, LSB first.
    fn clock_out(&mut self, value: u64, n: u32);

    /// Clocks `n` bits in from the data line, LSB first, returning the value.
    fn clock_in(&mut self, n: u32) -> u64;

    /// Drives the data line as an output (SWD) or TDI (JTAG).
    fn drive(&mut self, out: bool);

    /// For JTAG: clocks one TCK with the given TMS/TDI and returns TDO.
    fn jtag_step(&mut self, tms: bool, tdi: bool) -> bool;
}

/// Semantic interface shared by SWD and JTAG, used by L1.
pub trait Link {
    /// Performs the link-specific reset/switch sequence and leaves the link
    /// ready to address DP register 0 (IDCODE/DPIDR).
    fn reset_link(&mut self) -> Result<(), LinkError>;

    /// Clocks `n` bits in, LSB first.
    fn seq_in(&mut self, n: u32) -> u64;

    /// Clocks `n` bits in, LSB first, and additionally returns whether the
    /// trailing parity bit matched the XOR of the data bits.
    fn seq_in_parity(&mut self, n: u32) -> (u64, bool);

    /// Clocks `value`'s low `n` bits out, LSB first.
    fn seq_out(&mut self, value: u64, n: u32);

    /// Clocks `value`'s low `n` bits out, LSB first, followed by their XOR
    /// parity bit.
    fn seq_out_parity(&mut self, value: u64, n: u32);
}

pub(crate) fn parity_of(value: u64, n: u32) -> bool {
    (0..n).fold(false, |acc, bit| acc ^ ((value >> bit) & 1 != 0))
}

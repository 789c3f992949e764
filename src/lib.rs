//! Core debug engine for an on-probe ARM Cortex-M debugger.
//!
//! This crate implements the ADIv5 transport, the Cortex-M controller,
//! target discovery, semihosting, and RTT — the parts of a hardware debug
//! probe that are pure logic over a memory-mapped debug interface. The GDB
//! RSP packet codec, USB plumbing, flash programming algorithms, SWD/JTAG
//! bit-banging, and the monitor-command CLI parser are external
//! collaborators, expressed here only as the traits this crate depends on.
#![warn(missing_docs)]

pub mod arm;
pub mod config;
pub mod cortex_m;
pub mod discovery;
pub mod error;
pub mod exception;
pub mod link;
pub mod monitor;
pub mod rtt;
pub mod semihosting;

pub use config::DebuggerConfig;
pub use discovery::{Target, TargetList};
pub use error::Error;

//! Process-wide configuration: the scattered globals of spec.md's data
//! model tied into one record, constructed once and mutated only through
//! monitor-command handlers.

use crate::cortex_m::VectorCatch;
use crate::rtt::PollTuning;

/// The process-wide configuration record. One instance, constructed at
/// startup, referenced by the dispatcher and mutated by monitor commands.
#[derive(Debug, Clone)]
pub struct DebuggerConfig {
    /// Assert nRST while connecting, per the `connect_rst` monitor command.
    pub connect_assert_nrst: bool,
    /// Timeout, in milliseconds, for a Cortex-M halt request to take effect.
    pub cortexm_wait_timeout_ms: u32,
    /// Whether the Black Magic Probe-style `debug_bmp` monitor surface is on.
    pub debug_bmp: bool,
    /// Whether target stdout (semihosting `:tt` writes) is echoed to the host console.
    pub redirect_stdout: bool,
    /// Whether the RTT poller is allowed to run.
    pub rtt_enabled: bool,
    pub rtt: PollTuning,
    pub vector_catch: VectorCatch,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            connect_assert_nrst: false,
            cortexm_wait_timeout_ms: 2_000,
            debug_bmp: false,
            redirect_stdout: true,
            rtt_enabled: true,
            rtt: PollTuning::default(),
            vector_catch: VectorCatch::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_halt_timeout_is_two_seconds() {
        assert_eq!(DebuggerConfig::default().cortexm_wait_timeout_ms, 2_000);
    }
}

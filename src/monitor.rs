//! The flat monitor-command table reachable from the GDB monitor channel,
//! with GDB-style prefix matching. Tokenizing the raw monitor-command string
//! out of an RSP `qRcmd` packet is the RSP module's job; this table only
//! matches an already-split command word against the known commands and
//! either answers directly or hands back an action the firmware collaborator
//! must carry out with the hardware this crate doesn't own (a live `Link`,
//! the USB target-power rail, the SWO decoder).

use crate::config::DebuggerConfig;
use crate::cortex_m::VectorCatch;
use crate::discovery::TargetList;
use crate::error::Error;

/// A request the table can't satisfy with config state alone.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorAction {
    JtagScan,
    SwdpScan,
    AutoScan,
    SetFrequency(u32),
    Reset,
    SetTpwr(bool),
    TraceSwo {
        baud: Option<u32>,
        decode_channels: Vec<u32>,
    },
    Morse,
}

/// Outcome of dispatching one monitor command.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// Text to send back to the host as the command's reply.
    Text(String),
    /// The caller must perform this action against real hardware.
    Defer(MonitorAction),
}

type Handler = fn(&mut DebuggerConfig, &mut TargetList, &[&str]) -> Result<MonitorOutcome, Error>;

struct Command {
    name: &'static str,
    help: &'static str,
    handler: Handler,
}

fn parse_enable(args: &[&str]) -> Result<bool, Error> {
    match args.first().copied() {
        Some("enable") => Ok(true),
        Some("disable") => Ok(false),
        _ => Err(Error::Other(anyhow::anyhow!("expected 'enable' or 'disable'"))),
    }
}

fn parse_frequency(arg: &str) -> Result<u32, Error> {
    let (digits, mul) = match arg.chars().last() {
        Some('k') | Some('K') => (&arg[..arg.len() - 1], 1_000),
        Some('M') => (&arg[..arg.len() - 1], 1_000_000),
        _ => (arg, 1),
    };
    let base: u32 = digits
        .parse()
        .map_err(|_| Error::Other(anyhow::anyhow!("invalid frequency '{arg}'")))?;
    Ok(base * mul)
}

static COMMANDS: &[Command] = &[
    Command {
        name: "version",
        help: "Display firmware version",
        handler: |_config, _targets, _args| {
            Ok(MonitorOutcome::Text(format!("on-probe debug engine core v{}", env!("CARGO_PKG_VERSION"))))
        },
    },
    Command {
        name: "help",
        help: "Display this help",
        handler: |_config, _targets, _args| {
            let mut out = String::new();
            for cmd in COMMANDS {
                out.push_str(cmd.name);
                out.push_str(" -- ");
                out.push_str(cmd.help);
                out.push('\n');
            }
            Ok(MonitorOutcome::Text(out))
        },
    },
    Command {
        name: "jtag_scan",
        help: "Scan SWD/JTAG for devices",
        handler: |_config, _targets, _args| Ok(MonitorOutcome::Defer(MonitorAction::JtagScan)),
    },
    Command {
        name: "swdp_scan",
        help: "Scan SW-DP for targets",
        handler: |_config, _targets, _args| Ok(MonitorOutcome::Defer(MonitorAction::SwdpScan)),
    },
    Command {
        name: "auto_scan",
        help: "Automatically scan both SWD and JTAG",
        handler: |_config, _targets, _args| Ok(MonitorOutcome::Defer(MonitorAction::AutoScan)),
    },
    Command {
        name: "frequency",
        help: "Set debug link frequency, e.g. 'frequency 2M'",
        handler: |_config, _targets, args| {
            let hz = parse_frequency(args.first().copied().unwrap_or(""))?;
            Ok(MonitorOutcome::Defer(MonitorAction::SetFrequency(hz)))
        },
    },
    Command {
        name: "targets",
        help: "Display list of available targets",
        handler: |_config, targets, _args| {
            let mut out = String::new();
            for (i, t) in targets.targets.iter().enumerate() {
                out.push_str(&format!("{i} {} {:#x}\n", t.driver_name, t.cpuid));
            }
            Ok(MonitorOutcome::Text(out))
        },
    },
    Command {
        name: "morse",
        help: "Display morse error message, if any",
        handler: |_config, _targets, _args| Ok(MonitorOutcome::Defer(MonitorAction::Morse)),
    },
    Command {
        name: "halt_timeout",
        help: "Set halt wait timeout in milliseconds, e.g. 'halt_timeout 2000'",
        handler: |config, _targets, args| {
            let ms: u32 = args
                .first()
                .ok_or_else(|| Error::Other(anyhow::anyhow!("missing timeout argument")))?
                .parse()
                .map_err(|_| Error::Other(anyhow::anyhow!("invalid timeout")))?;
            config.cortexm_wait_timeout_ms = ms;
            Ok(MonitorOutcome::Text(format!("halt timeout set to {ms} ms")))
        },
    },
    Command {
        name: "connect_rst",
        help: "Assert/deassert nRST while connecting",
        handler: |config, _targets, args| {
            config.connect_assert_nrst = parse_enable(args)?;
            Ok(MonitorOutcome::Text(format!("connect_rst = {}", config.connect_assert_nrst)))
        },
    },
    Command {
        name: "reset",
        help: "Reset target",
        handler: |_config, _targets, _args| Ok(MonitorOutcome::Defer(MonitorAction::Reset)),
    },
    Command {
        name: "tpwr",
        help: "Supply power to the target via the probe's power rail",
        handler: |_config, _targets, args| Ok(MonitorOutcome::Defer(MonitorAction::SetTpwr(parse_enable(args)?))),
    },
    Command {
        name: "traceswo",
        help: "Start trace capture, with optional baud rate and decode channel list",
        handler: |_config, _targets, args| {
            let baud = args.first().and_then(|s| s.parse().ok());
            let decode_channels = args
                .iter()
                .skip_while(|a| **a != "decode")
                .skip(1)
                .filter_map(|a| a.parse().ok())
                .collect();
            Ok(MonitorOutcome::Defer(MonitorAction::TraceSwo { baud, decode_channels }))
        },
    },
    Command {
        name: "heapinfo",
        help: "Set target heap info, e.g. 'heapinfo <hbase> <hlimit> <sbase> <slimit>'",
        handler: |_config, targets, args| {
            if args.len() != 4 {
                return Err(Error::Other(anyhow::anyhow!("heapinfo requires 4 arguments")));
            }
            let target = targets.targets.first_mut().ok_or(Error::TargetNotFound(0))?;
            let mut block = [0u8; 16];
            for (i, arg) in args.iter().enumerate() {
                let word: u32 = arg.parse().map_err(|_| Error::Other(anyhow::anyhow!("invalid heapinfo value '{arg}'")))?;
                block[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
            }
            target.semihosting.set_heapinfo(block);
            Ok(MonitorOutcome::Text("heapinfo set".to_string()))
        },
    },
    Command {
        name: "debug_bmp",
        help: "Toggle Black Magic Probe-style debug output",
        handler: |config, _targets, args| {
            config.debug_bmp = parse_enable(args)?;
            Ok(MonitorOutcome::Text(format!("debug_bmp = {}", config.debug_bmp)))
        },
    },
    Command {
        name: "vector_catch",
        help: "Catch exception vectors, e.g. 'vector_catch enable hard'",
        handler: |config, _targets, args| {
            let enable = parse_enable(args)?;
            let category = args.get(1).copied().ok_or_else(|| Error::Other(anyhow::anyhow!("missing vector category")))?;
            set_vector_catch(&mut config.vector_catch, category, enable)?;
            Ok(MonitorOutcome::Text(format!("vector_catch {category} = {enable}")))
        },
    },
    Command {
        name: "redirect_stdout",
        help: "Redirect semihosting stdout to the host console",
        handler: |config, _targets, args| {
            config.redirect_stdout = parse_enable(args)?;
            Ok(MonitorOutcome::Text(format!("redirect_stdout = {}", config.redirect_stdout)))
        },
    },
    Command {
        name: "rtt",
        help: "Control the RTT poller: 'rtt enable|disable|status'",
        handler: |config, _targets, args| match args.first().copied() {
            Some("enable") => {
                config.rtt_enabled = true;
                Ok(MonitorOutcome::Text("rtt enabled".to_string()))
            }
            Some("disable") => {
                config.rtt_enabled = false;
                Ok(MonitorOutcome::Text("rtt disabled".to_string()))
            }
            Some("status") | None => Ok(MonitorOutcome::Text(format!(
                "rtt {}, poll {}-{} ms",
                if config.rtt_enabled { "enabled" } else { "disabled" },
                config.rtt.min_poll_ms,
                config.rtt.max_poll_ms
            ))),
            Some(other) => Err(Error::Other(anyhow::anyhow!("unknown rtt subcommand '{other}'"))),
        },
    },
];

fn set_vector_catch(catch: &mut VectorCatch, category: &str, enable: bool) -> Result<(), Error> {
    match category {
        "int" => catch.interr = enable,
        "bus" => catch.buserr = enable,
        "stat" => catch.staterr = enable,
        "chk" => catch.chkerr = enable,
        "nocp" => catch.nocperr = enable,
        "mm" => catch.mmerr = enable,
        // hard fault and core reset catch are always enabled by `attach`, so
        // these two categories are accepted but have nothing left to toggle.
        "hard" | "reset" => {}
        other => return Err(Error::Other(anyhow::anyhow!("unknown vector_catch category '{other}'"))),
    }
    Ok(())
}

fn find_command<'a>(name: &str) -> Result<&'a Command, Error> {
    let mut matches = COMMANDS.iter().filter(|c| c.name.starts_with(name));
    let first = matches.next().ok_or_else(|| Error::Other(anyhow::anyhow!("unknown monitor command '{name}'")))?;
    if matches.next().is_some() {
        return Err(Error::Other(anyhow::anyhow!("ambiguous monitor command '{name}'")));
    }
    Ok(first)
}

/// Dispatches one whitespace-separated monitor command line, GDB-compatible
/// prefix matching on the command name.
pub fn dispatch(config: &mut DebuggerConfig, targets: &mut TargetList, line: &str) -> Result<MonitorOutcome, Error> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Ok(MonitorOutcome::Text(String::new()));
    };
    let command = find_command(name)?;
    let args: Vec<&str> = parts.collect();
    (command.handler)(config, targets, &args)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prefix_match_resolves_unambiguous_abbreviation() {
        let mut config = DebuggerConfig::default();
        let mut targets = TargetList::new();
        let outcome = dispatch(&mut config, &mut targets, "ver").unwrap();
        assert!(matches!(outcome, MonitorOutcome::Text(text) if text.starts_with("on-probe debug engine core")));
    }

    #[test]
    fn ambiguous_prefix_is_rejected() {
        // "t" matches both "targets" and "traceswo" and "tpwr".
        let mut config = DebuggerConfig::default();
        let mut targets = TargetList::new();
        assert!(dispatch(&mut config, &mut targets, "t").is_err());
    }

    #[test]
    fn halt_timeout_updates_config() {
        let mut config = DebuggerConfig::default();
        let mut targets = TargetList::new();
        dispatch(&mut config, &mut targets, "halt_timeout 500").unwrap();
        assert_eq!(config.cortexm_wait_timeout_ms, 500);
    }

    #[test]
    fn frequency_parses_k_and_m_suffixes() {
        assert_eq!(parse_frequency("500k").unwrap(), 500_000);
        assert_eq!(parse_frequency("2M").unwrap(), 2_000_000);
        assert_eq!(parse_frequency("100").unwrap(), 100);
    }

    #[test]
    fn jtag_scan_defers_to_caller() {
        let mut config = DebuggerConfig::default();
        let mut targets = TargetList::new();
        let outcome = dispatch(&mut config, &mut targets, "jtag_scan").unwrap();
        assert_eq!(outcome, MonitorOutcome::Defer(MonitorAction::JtagScan));
    }
}

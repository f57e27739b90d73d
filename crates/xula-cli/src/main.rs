//! `xula` — command-line interface for XuLA-2 peripheral tests.
//!
//! ```text
//! USAGE:
//!   xula sdcard-test [options]     Write a block, read it back, report mismatches
//!   xula layout                    Print the SD card controller register layout
//! ```
//!
//! `sdcard-test` runs against the simulated controller; the `--sim-*` flags
//! inject faults into it. Exit status is 0 when the block verifies, 2 when
//! bytes differ, 1 on any other failure.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use xula_chip::frame::{CONTROL_LAYOUT, STATUS_LAYOUT};
use xula_chip::FieldLayout;
use xula_driver::{
    run_block_test_with, ErrorStatusPolicy, HarnessConfig, Pattern, PollConfig, SdCard,
    SessionConfig, SimFaults, SimTiming, SimulatedSdCard, Stage, StageEvent,
};

#[derive(Parser)]
#[command(name = "xula", about = "XuLA-2 FPGA board peripheral CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Write one block to the SD card, read it back and compare.
    SdcardTest(SdcardTestArgs),
    /// Print the SD card controller's register field layout.
    Layout,
}

#[derive(Clone, Copy, ValueEnum)]
enum PatternArg {
    Random,
    Zeros,
    Ones,
    Counting,
}

#[derive(clap::Args)]
struct SdcardTestArgs {
    /// Block address (decimal or 0x-prefixed hex).
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    address: u32,
    /// Test data pattern.
    #[arg(long, value_enum, default_value_t = PatternArg::Random)]
    pattern: PatternArg,
    /// Seed for the random pattern.
    #[arg(long)]
    seed: Option<u64>,
    /// Bytes of pattern data; the rest of the block is 0xFF padding.
    #[arg(long, default_value_t = xula_driver::board::BLOCK_SIZE)]
    length: usize,
    /// Maximum status reads per wait.
    #[arg(long)]
    max_polls: Option<u64>,
    /// Maximum time per wait, in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Pause after each reset, in milliseconds.
    #[arg(long, default_value_t = 0)]
    settle_ms: u64,
    /// Fail on a nonzero controller error status instead of warning.
    #[arg(long)]
    abort_on_error_status: bool,
    /// Print every (read, written) byte pair.
    #[arg(long)]
    dump: bool,
    /// Simulated controller: raise busy on a request and never finish.
    #[arg(long)]
    sim_stuck_busy: bool,
    /// Simulated controller: stay busy through this many resets.
    #[arg(long, default_value_t = 0)]
    sim_busy_resets: u32,
    /// Simulated controller: error status reported during transfers.
    #[arg(long, default_value = "0", value_parser = parse_u16)]
    sim_error_code: u16,
    /// Simulated controller: XOR MASK into the byte read at POS (POS:MASK, repeatable).
    #[arg(long, value_parser = parse_corruption)]
    sim_corrupt: Vec<(usize, u8)>,
    /// Simulated controller: status reads the handshake stays high after an ack.
    #[arg(long)]
    sim_ack_latency: Option<u32>,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::SdcardTest(args) => cmd_sdcard_test(&args),
        Cmd::Layout => {
            cmd_layout();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_sdcard_test(args: &SdcardTestArgs) -> Result<ExitCode> {
    let session = session_config(args);
    let harness = HarnessConfig {
        address: args.address,
        pattern: match args.pattern {
            PatternArg::Random => Pattern::Random { seed: args.seed },
            PatternArg::Zeros => Pattern::Zeros,
            PatternArg::Ones => Pattern::Ones,
            PatternArg::Counting => Pattern::Counting,
        },
        length: args.length,
    };

    let mut timing = SimTiming::default();
    if let Some(latency) = args.sim_ack_latency {
        timing.ack_latency = latency;
    }
    let sim = SimulatedSdCard::new()
        .with_timing(timing)
        .with_faults(SimFaults {
            stuck_busy: args.sim_stuck_busy,
            busy_resets: args.sim_busy_resets,
            error_code: args.sim_error_code,
            corrupt: args.sim_corrupt.clone(),
            ..SimFaults::default()
        });
    let link = sim.into_link(session.address)?;
    let mut card = SdCard::new(link, session)?;

    let report = run_block_test_with(&mut card, &harness, |event| match event {
        StageEvent::Started(stage) => {
            // progress text only
            announce(&mut std::io::stdout().lock(), stage).ok();
        }
        StageEvent::Finished(_, elapsed) => println!("done ({elapsed:.2?})"),
    })
    .map_err(|err| {
        println!("failed");
        err
    })
    .context("SD card test aborted")?;

    if args.dump {
        for (position, (read, written)) in report.pairs().enumerate() {
            println!("{position:3}: {read:02x} {written:02x}");
        }
    }
    println!();
    println!("{report}");
    println!(
        "{} register transactions ({} reads, {} writes, {} executes)",
        report.stats.total(),
        report.stats.reads,
        report.stats.writes,
        report.stats.executes
    );

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn announce(out: &mut impl Write, stage: Stage) -> std::io::Result<()> {
    write!(out, "{stage} ... ")?;
    out.flush()
}

fn session_config(args: &SdcardTestArgs) -> SessionConfig {
    let defaults = PollConfig::default();
    let poll = PollConfig {
        max_polls: args.max_polls.unwrap_or(defaults.max_polls),
        timeout: args
            .timeout_ms
            .map_or(defaults.timeout, Duration::from_millis),
        ..defaults
    };
    let policy = if args.abort_on_error_status {
        ErrorStatusPolicy::Abort
    } else {
        ErrorStatusPolicy::Warn
    };
    SessionConfig::default()
        .with_poll(poll)
        .with_settle(Duration::from_millis(args.settle_ms))
        .with_error_policy(policy)
}

fn cmd_layout() {
    const INPUTS: [&str; 7] = [
        "read_request",
        "write_request",
        "continue",
        "address",
        "data",
        "handshake_ack",
        "reset",
    ];
    const OUTPUTS: [&str; 4] = ["data_out", "busy", "handshake", "error"];

    print_layout("Controller inputs (host -> FPGA)", &CONTROL_LAYOUT, &INPUTS);
    println!();
    print_layout("Controller outputs (FPGA -> host)", &STATUS_LAYOUT, &OUTPUTS);
}

fn print_layout(title: &str, layout: &FieldLayout, names: &[&str]) {
    println!("{title}: {} bits", layout.total_width());
    for (index, (name, width)) in names.iter().zip(layout.widths()).enumerate() {
        let low = layout.offset(index);
        let high = low + width - 1;
        if *width == 1 {
            println!("  [{low:>2}]     {name}");
        } else {
            println!("  [{high:>2}:{low:<2}]  {name}");
        }
    }
}

fn parse_u32(s: &str) -> Result<u32> {
    Ok(match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => s.parse()?,
    })
}

fn parse_u16(s: &str) -> Result<u16> {
    Ok(u16::try_from(parse_u32(s)?)?)
}

fn parse_corruption(s: &str) -> Result<(usize, u8)> {
    let Some((pos, mask)) = s.split_once(':') else {
        bail!("expected POS:MASK, got {s:?}");
    };
    let pos: usize = pos.parse().context("invalid position")?;
    let mask = u8::try_from(parse_u32(mask)?).context("mask must fit in a byte")?;
    if pos >= xula_driver::board::BLOCK_SIZE {
        bail!("position {pos} is outside the block");
    }
    Ok((pos, mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_accept_hex() {
        assert_eq!(parse_u32("0x100").unwrap(), 256);
        assert_eq!(parse_u32("42").unwrap(), 42);
        assert!(parse_u16("0x10000").is_err());
    }

    #[test]
    fn corruption_argument() {
        assert_eq!(parse_corruption("5:0x80").unwrap(), (5, 0x80));
        assert!(parse_corruption("5").is_err());
        assert!(parse_corruption("512:1").is_err());
        assert!(parse_corruption("1:0x100").is_err());
    }

    #[test]
    fn stage_announcement() {
        let mut out = Vec::new();
        announce(&mut out, Stage::Initialize).unwrap();
        assert_eq!(out, b"Initializing SD card ... ");
    }

    #[test]
    fn flags_map_to_config() {
        let cli = Cli::parse_from([
            "xula",
            "sdcard-test",
            "--max-polls",
            "77",
            "--abort-on-error-status",
            "--sim-corrupt",
            "1:2",
            "--sim-corrupt",
            "3:4",
        ]);
        let Cmd::SdcardTest(args) = cli.command else {
            panic!("wrong subcommand");
        };
        let config = session_config(&args);
        assert_eq!(config.poll.max_polls, 77);
        assert_eq!(config.error_policy, ErrorStatusPolicy::Abort);
        assert_eq!(args.sim_corrupt, vec![(1, 2), (3, 4)]);
    }
}

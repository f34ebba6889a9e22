//! Duet - command-line runner for duet register-machine programs.
//!
//! Reads a program file, runs it in one of three modes and prints the result
//! as text or JSON on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use duet_core::{Dialect, Duet, Program, ReceivePolicy, RunConfig, Solo, Standalone};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Two linked processors; reports what processor 1 sent
    Duet,
    /// One processor with the sound card; reports the recovered frequency
    Solo,
    /// One processor with timed receives; reports how many `mul` ran
    Mul,
}

#[derive(Parser, Debug)]
#[command(name = "duet")]
#[command(about = "Run duet register-machine programs")]
struct Args {
    /// Program file, one instruction per line
    program: PathBuf,

    /// How to run the program
    #[arg(short, long, value_enum, default_value = "duet")]
    mode: Mode,

    /// Instruction set (sound or extended)
    #[arg(long, default_value = "extended", value_parser = parse_dialect)]
    dialect: Dialect,

    /// Give up on a receive after this many milliseconds instead of blocking
    #[arg(long)]
    receive_timeout_ms: Option<u64>,

    /// Halt each processor after this many instructions
    #[arg(long)]
    step_limit: Option<u64>,

    /// Cancel the run after this many milliseconds
    #[arg(long)]
    run_timeout_ms: Option<u64>,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn parse_dialect(value: &str) -> std::result::Result<Dialect, String> {
    value.parse::<Dialect>().map_err(|e| e.to_string())
}

impl Args {
    fn run_config(&self) -> RunConfig {
        let mut config = RunConfig::new().with_dialect(self.dialect);
        if let Some(ms) = self.receive_timeout_ms {
            config = config.with_receive_policy(ReceivePolicy::Timeout(Duration::from_millis(ms)));
        }
        if let Some(limit) = self.step_limit {
            config = config.with_step_limit(limit);
        }
        if let Some(ms) = self.run_timeout_ms {
            config = config.with_run_timeout(Duration::from_millis(ms));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let text = tokio::fs::read_to_string(&args.program)
        .await
        .with_context(|| format!("Failed to read {}", args.program.display()))?;
    let config = args.run_config();
    let program = Program::parse(&text, config.dialect)
        .with_context(|| format!("Failed to parse {}", args.program.display()))?;
    debug!("Loaded {} instructions", program.len());

    info!("Running {} in {:?} mode", args.program.display(), args.mode);
    match args.mode {
        Mode::Duet => {
            let report = Duet::new(program, config)?.run().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "processor 1 sent {} values ({})",
                    report.sent_count(1),
                    report.termination
                );
            }
        }
        Mode::Solo => {
            let report = Solo::new(program, config)?.run().await;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match report.recovered {
                    Some(value) => println!("recovered {}", value),
                    None => println!("nothing recovered"),
                }
            }
        }
        Mode::Mul => {
            let (report, sent) = Standalone::new(program, config)?.run().await;
            if args.json {
                let output = json!({ "processor": report, "sent": sent });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("mul executed {} times", report.mul_count);
            }
        }
    }

    Ok(())
}

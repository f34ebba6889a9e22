//! Duet Core - a dual-instance message-passing register machine.
//!
//! Two identical interpreters, each with private registers and program
//! counter, exchange integers over a pair of unbounded FIFO channels. A
//! processor that receives on an empty channel blocks; when both are blocked
//! with nothing in flight the run is over, and a shared monitor detects that
//! instead of letting the pair hang.
//!
//! The same interpreter also runs alone, either with a sound card (`snd`
//! plays, `rcv` recovers) or with a caller-held channel and timed receives.
//!
//! # Example
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> duet_core::Result<()> {
//!     let sent = duet_core::run_duet("snd p\nrcv a").await?;
//!     println!("processor 1 sent {} values", sent);
//!
//!     let recovered = duet_core::run_solo("snd 4\nrcv p\nset a 1\nrcv a").await?;
//!     println!("recovered {:?}", recovered);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod monitor;
pub mod port;
pub mod processor;
pub mod program;
pub mod registers;
pub mod solo;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::{Dialect, MachineConfig, ReceivePolicy, RunConfig};
pub use coordinator::{Duet, DuetReport, Termination};
pub use device::{Device, Received, SoundCard};
pub use error::{DuetError, ParseReason, Result};
pub use monitor::{Activity, DeadlockMonitor, ProcessorId};
pub use port::{Inbox, Link, Outbox, PeerHandle, ReceiveError};
pub use processor::{HaltReason, Processor, ProcessorReport, ProcessorState};
pub use program::{Instruction, Opcode, Operand, Parser, Program, Register};
pub use registers::RegisterFile;
pub use solo::{Solo, SoloReport, Standalone};

/// Run `program_text` on two linked processors and return how many values
/// processor 1 sent before the pair halted or deadlocked.
pub async fn run_duet(program_text: &str) -> Result<u64> {
    let config = RunConfig::default();
    let program = Program::parse(program_text, config.dialect)?;
    let report = Duet::new(program, config)?.run().await?;
    Ok(report.sent_count(1))
}

/// Run `program_text` on the sound card and return the recovered value.
pub async fn run_solo(program_text: &str) -> Result<Option<i64>> {
    let config = RunConfig::default();
    let program = Program::parse(program_text, config.dialect)?;
    let report = Solo::new(program, config)?.run().await;
    Ok(report.recovered)
}

/// Run `program_text` on one processor with timed receives and return how
/// many `mul` instructions it executed.
pub async fn count_mul(program_text: &str) -> Result<u64> {
    let config = RunConfig::standalone();
    let program = Program::parse(program_text, config.dialect)?;
    let (report, _) = Standalone::new(program, config)?.run().await;
    Ok(report.mul_count)
}

//! Single-processor runs.
//!
//! [`Solo`] drives one processor with a [`SoundCard`]: `snd` plays, `rcv`
//! recovers. [`Standalone`] drives one processor with a channel link whose
//! other end is held by the caller, using timed receives so the processor
//! halts once input stops arriving.

use crate::cancel::CancellationToken;
use crate::config::{ReceivePolicy, RunConfig};
use crate::device::SoundCard;
use crate::error::Result;
use crate::port::{Link, PeerHandle};
use crate::processor::{Processor, ProcessorReport};
use crate::program::Program;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Result of a sound-card run.
#[derive(Debug, Clone, Serialize)]
pub struct SoloReport {
    /// Last value recovered by `rcv`, if any.
    pub recovered: Option<i64>,
    /// Last value played by `snd`, if any.
    pub last_played: Option<i64>,
    pub processor: ProcessorReport,
}

/// Sound-card runner.
#[derive(Debug, Clone)]
pub struct Solo {
    program: Program,
    config: RunConfig,
    stop_on_recover: bool,
}

impl Solo {
    pub fn new(program: Program, config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            program,
            config,
            stop_on_recover: true,
        })
    }

    /// Keep running after recoveries; the run then ends only by leaving the
    /// program, by the step limit or by the run timeout.
    pub fn with_stop_on_recover(mut self, stop: bool) -> Self {
        self.stop_on_recover = stop;
        self
    }

    pub async fn run(&self) -> SoloReport {
        let card = SoundCard::new().with_stop_on_recover(self.stop_on_recover);
        let mut processor = Processor::new(0, self.program.clone(), card)
            .with_step_limit(self.config.step_limit)
            .with_cancellation(CancellationToken::new());
        let report = processor.run_for(self.config.run_timeout).await;
        let card = processor.device();

        info!(
            "Solo run finished after {} steps: recovered {:?}",
            report.steps,
            card.last_recovered()
        );
        SoloReport {
            recovered: card.last_recovered(),
            last_played: card.last_played(),
            processor: report,
        }
    }
}

/// A linked processor running without a partner.
pub struct Standalone {
    processor: Processor<Link>,
    peer: PeerHandle,
    token: CancellationToken,
    run_timeout: Option<Duration>,
}

impl Standalone {
    /// Blocking receive policies are replaced by the default timed receive:
    /// with no partner and no monitor a blocking receive could wait forever.
    pub fn new(program: Program, config: RunConfig) -> Result<Self> {
        config.validate()?;
        let policy = match config.receive_policy {
            ReceivePolicy::Blocking => RunConfig::standalone().receive_policy,
            timed => timed,
        };
        let token = CancellationToken::new();
        let (link, peer) = Link::standalone(policy, token.clone());
        let processor = Processor::new(0, program, link)
            .with_step_limit(config.step_limit)
            .with_cancellation(token.clone());
        Ok(Self {
            processor,
            peer,
            token,
            run_timeout: config.run_timeout,
        })
    }

    /// Queue a value for the processor's inbox.
    pub fn feed(&self, value: i64) {
        self.peer.to_processor.send(value);
    }

    /// Token that stops the processor when cancelled.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn processor(&self) -> &Processor<Link> {
        &self.processor
    }

    /// Run to completion. Returns the report and every value the processor sent.
    pub async fn run(mut self) -> (ProcessorReport, Vec<i64>) {
        let report = self.processor.run_for(self.run_timeout).await;
        let sent = self.peer.drain();
        (report, sent)
    }
}

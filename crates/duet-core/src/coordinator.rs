//! Dual-processor coordinator.
//!
//! Builds processors 0 and 1 over the same program, cross-wires their
//! channels, runs both as tokio tasks and waits until both have stopped. The
//! processors report every block/halt transition to a shared
//! [`DeadlockMonitor`]; when both are stuck the monitor cancels the run's token
//! and the blocked receives return, so a mutual wait ends the run instead of
//! hanging it.

use crate::cancel::CancellationToken;
use crate::config::{MachineConfig, RunConfig};
use crate::error::Result;
use crate::monitor::{DeadlockMonitor, ProcessorId};
use crate::port::Link;
use crate::processor::{HaltReason, Processor, ProcessorReport};
use crate::program::Program;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// How a duet run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Both processors were stuck waiting: neither could ever continue.
    Deadlock,
    /// Every processor ran off its program.
    Halted,
    /// At least one timed receive expired.
    TimedOut,
    /// At least one processor exhausted its step budget.
    StepLimit,
    /// The run timeout fired.
    Cancelled,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Termination::Deadlock => "deadlock",
            Termination::Halted => "halted",
            Termination::TimedOut => "timed out",
            Termination::StepLimit => "step limit",
            Termination::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Result of a duet run.
#[derive(Debug, Clone, Serialize)]
pub struct DuetReport {
    pub termination: Termination,
    /// Indexed by processor id.
    pub processors: Vec<ProcessorReport>,
}

impl DuetReport {
    pub fn processor(&self, id: ProcessorId) -> Option<&ProcessorReport> {
        self.processors.get(id)
    }

    /// How many values processor `id` sent.
    pub fn sent_count(&self, id: ProcessorId) -> u64 {
        self.processor(id).map_or(0, |report| report.sent_count)
    }
}

/// Runs two processors against each other.
#[derive(Debug, Clone)]
pub struct Duet {
    programs: [Program; 2],
    config: RunConfig,
}

impl Duet {
    /// Both processors run `program`.
    pub fn new(program: Program, config: RunConfig) -> Result<Self> {
        Self::with_programs(program.clone(), program, config)
    }

    /// Processor 0 runs `first`, processor 1 runs `second`.
    pub fn with_programs(first: Program, second: Program, config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            programs: [first, second],
            config,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run both processors until each has halted.
    pub async fn run(&self) -> Result<DuetReport> {
        let token = CancellationToken::new();
        let monitor = Arc::new(DeadlockMonitor::new(
            MachineConfig::DUET_PROCESSORS,
            token.clone(),
        ));
        let links = Link::pair(monitor.clone(), self.config.receive_policy);

        let handles: Vec<_> = links
            .into_iter()
            .zip(self.programs.iter().cloned())
            .map(|(link, program)| {
                let mut processor = Processor::new(link.id(), program, link)
                    .with_step_limit(self.config.step_limit)
                    .with_cancellation(token.clone());
                tokio::spawn(async move { processor.run().await })
            })
            .collect();

        let joined = join_all(handles);
        tokio::pin!(joined);
        let results = match self.config.run_timeout {
            None => joined.await,
            Some(limit) => tokio::select! {
                results = &mut joined => results,
                _ = tokio::time::sleep(limit) => {
                    warn!("Run timeout of {:?} reached; cancelling processors", limit);
                    token.cancel();
                    joined.await
                }
            },
        };

        let processors = results
            .into_iter()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let termination = classify(monitor.is_stalled(), &processors);

        info!(
            "Duet finished ({}): sent {} / {}",
            termination,
            processors[0].sent_count,
            processors[1].sent_count
        );
        Ok(DuetReport {
            termination,
            processors,
        })
    }
}

fn classify(stalled: bool, processors: &[ProcessorReport]) -> Termination {
    let any = |reason: HaltReason| {
        processors
            .iter()
            .any(|report| report.halt_reason == Some(reason))
    };
    if stalled {
        Termination::Deadlock
    } else if any(HaltReason::Cancelled) {
        Termination::Cancelled
    } else if any(HaltReason::StepLimit) {
        Termination::StepLimit
    } else if any(HaltReason::Timeout) {
        Termination::TimedOut
    } else {
        Termination::Halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReceivePolicy;
    use std::time::Duration;

    async fn run(text: &str) -> DuetReport {
        Duet::new(text.parse().unwrap(), RunConfig::default())
            .unwrap()
            .run()
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_own_id_then_halt() {
        let report = run("snd p").await;
        assert_eq!(report.termination, Termination::Halted);
        assert_eq!(report.sent_count(0), 1);
        assert_eq!(report.sent_count(1), 1);
        for processor in &report.processors {
            assert_eq!(processor.halt_reason, Some(HaltReason::OutOfBounds));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mutual_receive_deadlocks() {
        let report = tokio::time::timeout(Duration::from_secs(5), run("rcv a"))
            .await
            .expect("mutual receive must not hang");
        assert_eq!(report.termination, Termination::Deadlock);
        for processor in &report.processors {
            assert_eq!(processor.halt_reason, Some(HaltReason::Deadlock));
            assert_eq!(processor.sent_count, 0);
            // Nothing arrived, so `a` was never created.
            assert_eq!(processor.registers.get(&'a'), None);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exchange_then_deadlock() {
        let program = "snd 1\nsnd 2\nsnd p\nrcv a\nrcv b\nrcv c\nrcv d";
        let report = run(program).await;
        assert_eq!(report.termination, Termination::Deadlock);
        assert_eq!(report.sent_count(1), 3);

        let zero = report.processor(0).unwrap();
        assert_eq!(zero.registers.get(&'a'), Some(&1));
        assert_eq!(zero.registers.get(&'b'), Some(&2));
        assert_eq!(zero.registers.get(&'c'), Some(&1));
        let one = report.processor(1).unwrap();
        assert_eq!(one.registers.get(&'c'), Some(&0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_survivor_of_halted_partner_stops() {
        // Processor 0 halts at once; processor 1 waits for a value that never comes.
        let program = "jgz p 2\njgz 1 5\nrcv a";
        let report = run(program).await;
        assert_eq!(report.termination, Termination::Deadlock);
        assert_eq!(
            report.processor(0).unwrap().halt_reason,
            Some(HaltReason::OutOfBounds)
        );
        assert_eq!(
            report.processor(1).unwrap().halt_reason,
            Some(HaltReason::Deadlock)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_distinct_programs() {
        let first: Program = "snd 10\nsnd 20\nrcv a".parse().unwrap();
        let second: Program = "rcv a\nrcv b\nadd a b\nsnd a".parse().unwrap();
        let report = Duet::with_programs(first, second, RunConfig::default())
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::Halted);
        assert_eq!(report.processor(0).unwrap().registers.get(&'a'), Some(&30));
        assert_eq!(report.sent_count(1), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_timeout_cancels_infinite_programs() {
        let config = RunConfig::new().with_run_timeout(Duration::from_millis(100));
        let report = Duet::new("jgz 1 0".parse().unwrap(), config)
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::Cancelled);
        for processor in &report.processors {
            assert_eq!(processor.halt_reason, Some(HaltReason::Cancelled));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_step_limit_termination() {
        let config = RunConfig::new().with_step_limit(50);
        let report = Duet::new("jgz 1 0".parse().unwrap(), config)
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::StepLimit);
        assert_eq!(report.processor(0).unwrap().steps, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_policy_ends_in_timeout() {
        // Processor 1 counts down for millions of steps and never receives, so
        // processor 0 is the only one ever blocked and its timer fires first.
        let waiter: Program = "rcv a".parse().unwrap();
        let busy: Program = "set a 2000000\nadd a -1\njgz a -1".parse().unwrap();
        let config = RunConfig::new()
            .with_receive_policy(ReceivePolicy::Timeout(Duration::from_millis(5)));
        let report = Duet::with_programs(waiter, busy, config)
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::TimedOut);
        assert_eq!(
            report.processor(0).unwrap().halt_reason,
            Some(HaltReason::Timeout)
        );
        assert_eq!(report.processor(0).unwrap().registers.get(&'a'), None);
        assert_eq!(
            report.processor(1).unwrap().halt_reason,
            Some(HaltReason::OutOfBounds)
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RunConfig::new().with_step_limit(0);
        assert!(Duet::new("snd p".parse().unwrap(), config).is_err());
    }

    #[test]
    fn test_classify_prefers_stall() {
        let report = |reason| ProcessorReport {
            id: 0,
            pc: 0,
            halt_reason: Some(reason),
            sent_count: 0,
            mul_count: 0,
            steps: 0,
            registers: Default::default(),
        };
        let reports = [report(HaltReason::Deadlock), report(HaltReason::OutOfBounds)];
        assert_eq!(classify(true, &reports), Termination::Deadlock);
        let reports = [report(HaltReason::OutOfBounds), report(HaltReason::OutOfBounds)];
        assert_eq!(classify(false, &reports), Termination::Halted);
        let reports = [report(HaltReason::Timeout), report(HaltReason::OutOfBounds)];
        assert_eq!(classify(false, &reports), Termination::TimedOut);
    }
}

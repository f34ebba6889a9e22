//! Fetch-decode-execute loop.
//!
//! A [`Processor`] owns its registers and program counter and shares only its
//! [`Program`] (read-only). All `snd`/`rcv` traffic goes through its
//! [`Device`], which is where blocking, timeouts and stall detection live.
//!
//! Arithmetic wraps on overflow. `mod` uses the truncating remainder; a
//! modulus of zero leaves the target register unchanged.

use crate::cancel::CancellationToken;
use crate::config::MachineConfig;
use crate::device::{Device, Received};
use crate::monitor::ProcessorId;
use crate::program::{Instruction, Program};
use crate::registers::RegisterFile;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Why a processor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// The program counter left the program.
    OutOfBounds,
    /// Every processor in the run was blocked or halted.
    Deadlock,
    /// A timed receive expired.
    Timeout,
    /// The partner's channel closed with nothing left to read.
    Disconnected,
    /// The sound card recovered a value.
    Recovered,
    /// The configured instruction budget ran out.
    StepLimit,
    /// The run was stopped from outside.
    Cancelled,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            HaltReason::OutOfBounds => "ran off the program",
            HaltReason::Deadlock => "deadlocked",
            HaltReason::Timeout => "receive timed out",
            HaltReason::Disconnected => "partner disconnected",
            HaltReason::Recovered => "recovered a sound",
            HaltReason::StepLimit => "step limit reached",
            HaltReason::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Lifecycle of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Running,
    /// Suspended inside `rcv` on an empty inbox. Seen by callers only when a
    /// `step()` future is dropped mid-receive; the pc still points at the
    /// `rcv`, so the next step retries it. While a run is in progress the
    /// shared view of this state is [`crate::monitor::Activity`].
    Blocked,
    Halted(HaltReason),
}

/// Final state of one processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorReport {
    pub id: ProcessorId,
    pub pc: i64,
    /// `None` while the processor is still running.
    pub halt_reason: Option<HaltReason>,
    pub sent_count: u64,
    pub mul_count: u64,
    pub steps: u64,
    pub registers: BTreeMap<char, i64>,
}

/// One register-machine interpreter.
pub struct Processor<D: Device> {
    id: ProcessorId,
    program: Program,
    registers: RegisterFile,
    pc: i64,
    device: D,
    state: ProcessorState,
    sent_count: u64,
    mul_count: u64,
    steps: u64,
    step_limit: Option<u64>,
    token: Option<CancellationToken>,
}

impl<D: Device> Processor<D> {
    /// Create a processor with its program-id register seeded to `id`.
    pub fn new(id: ProcessorId, program: Program, device: D) -> Self {
        let mut registers = RegisterFile::new();
        registers.set(MachineConfig::PROGRAM_ID_REGISTER, id as i64);
        Self {
            id,
            program,
            registers,
            pc: 0,
            device,
            state: ProcessorState::Running,
            sent_count: 0,
            mul_count: 0,
            steps: 0,
            step_limit: None,
            token: None,
        }
    }

    /// Halt with [`HaltReason::StepLimit`] after `limit` instructions.
    pub fn with_step_limit(mut self, limit: Option<u64>) -> Self {
        self.step_limit = limit;
        self
    }

    /// Halt with [`HaltReason::Cancelled`] once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn pc(&self) -> i64 {
        self.pc
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    pub fn mul_count(&self) -> u64 {
        self.mul_count
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Run until halted.
    pub async fn run(&mut self) -> ProcessorReport {
        debug!("Processor {} starting ({} instructions)", self.id, self.program.len());
        loop {
            if let ProcessorState::Halted(_) = self.step().await {
                break;
            }
            // Long compute stretches never touch the device; let the runtime
            // schedule timers and the partner.
            if self.steps % MachineConfig::YIELD_INTERVAL == 0 {
                tokio::task::yield_now().await;
            }
        }
        self.report()
    }

    /// Like [`Processor::run`], but cancels the processor's token once `limit`
    /// has elapsed. Without a limit or a token this is a plain run.
    pub async fn run_for(&mut self, limit: Option<Duration>) -> ProcessorReport {
        let (Some(limit), Some(token)) = (limit, self.token.clone()) else {
            return self.run().await;
        };
        let id = self.id;
        let run = self.run();
        tokio::pin!(run);
        tokio::select! {
            report = &mut run => report,
            _ = tokio::time::sleep(limit) => {
                warn!("Run timeout of {:?} reached; cancelling processor {}", limit, id);
                token.cancel();
                run.await
            }
        }
    }

    /// Execute one instruction and return the resulting state.
    pub async fn step(&mut self) -> ProcessorState {
        if let ProcessorState::Halted(_) = self.state {
            return self.state;
        }
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return self.halt(HaltReason::Cancelled);
        }
        let Some(&instruction) = self.program.fetch(self.pc) else {
            return self.halt(HaltReason::OutOfBounds);
        };
        if self.step_limit.is_some_and(|limit| self.steps >= limit) {
            return self.halt(HaltReason::StepLimit);
        }

        self.steps += 1;
        self.execute(instruction).await;
        self.state
    }

    async fn execute(&mut self, instruction: Instruction) {
        let regs = &mut self.registers;
        match instruction {
            Instruction::Set(x, y) => {
                let value = regs.value_of(y);
                regs.set(x, value);
            }
            Instruction::Add(x, y) => {
                let value = regs.value_of(y);
                let current = regs.get(x);
                regs.set(x, current.wrapping_add(value));
            }
            Instruction::Sub(x, y) => {
                let value = regs.value_of(y);
                let current = regs.get(x);
                regs.set(x, current.wrapping_sub(value));
            }
            Instruction::Mul(x, y) => {
                let value = regs.value_of(y);
                let current = regs.get(x);
                regs.set(x, current.wrapping_mul(value));
                self.mul_count += 1;
            }
            Instruction::Mod(x, y) => {
                let value = regs.value_of(y);
                let current = regs.get(x);
                if value == 0 {
                    warn!(
                        "Processor {}: modulo by zero at pc {}; `{}` left unchanged",
                        self.id, self.pc, x
                    );
                } else {
                    regs.set(x, current.wrapping_rem(value));
                }
            }
            Instruction::Jgz(x, y) => {
                let offset = regs.value_of(y);
                if regs.value_of(x) > 0 {
                    self.jump(offset);
                    return;
                }
            }
            Instruction::Jnz(x, y) => {
                let offset = regs.value_of(y);
                if regs.value_of(x) != 0 {
                    self.jump(offset);
                    return;
                }
            }
            Instruction::Snd(x) => {
                let value = regs.value_of(x);
                self.device.send(value);
                self.sent_count += 1;
            }
            Instruction::Rcv(x) => {
                // A channel `rcv` only writes its target; reading it would
                // create the register even when nothing arrives.
                let current = if self.device.reads_target() {
                    regs.get(x)
                } else {
                    regs.peek(x).unwrap_or(0)
                };
                self.state = ProcessorState::Blocked;
                let received = self.device.receive(current).await;
                self.state = ProcessorState::Running;
                match received {
                    Received::Store(value) => self.registers.set(x, value),
                    Received::Skip => {}
                    Received::Recovered(value) => {
                        self.registers.set(x, value);
                        self.pc += 1;
                        self.halt(HaltReason::Recovered);
                        return;
                    }
                    Received::Halt(reason) => {
                        self.pc = MachineConfig::TERMINATED_PC;
                        self.halt(reason);
                        return;
                    }
                }
            }
        }
        self.pc += 1;
    }

    fn jump(&mut self, offset: i64) {
        self.pc = self.pc.saturating_add(offset);
    }

    fn halt(&mut self, reason: HaltReason) -> ProcessorState {
        debug!(
            "Processor {} halted at pc {} after {} steps: {}",
            self.id, self.pc, self.steps, reason
        );
        self.state = ProcessorState::Halted(reason);
        self.device.halted(reason);
        self.state
    }

    /// Snapshot of the processor's observable state.
    pub fn report(&self) -> ProcessorReport {
        let halt_reason = match self.state {
            ProcessorState::Halted(reason) => Some(reason),
            ProcessorState::Running | ProcessorState::Blocked => None,
        };
        ProcessorReport {
            id: self.id,
            pc: self.pc,
            halt_reason,
            sent_count: self.sent_count,
            mul_count: self.mul_count,
            steps: self.steps,
            registers: self.registers.snapshot(),
        }
    }
}

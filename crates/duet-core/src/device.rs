//! I/O seam between a processor and the outside world.
//!
//! The interpreter only knows `snd` and `rcv`; what they mean is decided by
//! the [`Device`] it was built with. [`crate::port::Link`] connects a
//! processor to a partner through channels, while [`SoundCard`] gives the
//! non-concurrent play/recover behavior.

use crate::processor::HaltReason;
use async_trait::async_trait;
use tracing::debug;

/// Result of executing `rcv X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Write the value to `X` and continue.
    Store(i64),
    /// Leave `X` unchanged and continue.
    Skip,
    /// Write the value to `X`, then halt with [`HaltReason::Recovered`].
    Recovered(i64),
    /// Stop without touching `X`.
    Halt(HaltReason),
}

/// Where `snd` values go and `rcv` values come from.
#[async_trait]
pub trait Device: Send {
    /// Deliver a value. Never blocks.
    fn send(&mut self, value: i64);

    /// Whether `rcv X` reads `X` before receiving. When false the processor
    /// does not touch `X` and passes its current value only if it exists.
    fn reads_target(&self) -> bool {
        false
    }

    /// Execute `rcv` against a register currently holding `current`.
    async fn receive(&mut self, current: i64) -> Received;

    /// Called once when the owning processor halts.
    fn halted(&mut self, _reason: HaltReason) {}
}

/// Single-processor play/recover device.
///
/// `snd` plays a sound and remembers it; `rcv X` recovers the last played
/// sound into `X` when `X` is non-zero and does nothing otherwise.
#[derive(Debug, Clone)]
pub struct SoundCard {
    last_played: Option<i64>,
    last_recovered: Option<i64>,
    stop_on_recover: bool,
}

impl Default for SoundCard {
    fn default() -> Self {
        Self {
            last_played: None,
            last_recovered: None,
            stop_on_recover: true,
        }
    }
}

impl SoundCard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep running after a recovery instead of halting on the first one.
    pub fn with_stop_on_recover(mut self, stop: bool) -> Self {
        self.stop_on_recover = stop;
        self
    }

    pub fn last_played(&self) -> Option<i64> {
        self.last_played
    }

    pub fn last_recovered(&self) -> Option<i64> {
        self.last_recovered
    }
}

#[async_trait]
impl Device for SoundCard {
    fn send(&mut self, value: i64) {
        self.last_played = Some(value);
    }

    fn reads_target(&self) -> bool {
        true
    }

    async fn receive(&mut self, current: i64) -> Received {
        if current == 0 {
            return Received::Skip;
        }
        // Nothing played yet: there is nothing to recover.
        let Some(sound) = self.last_played else {
            return Received::Skip;
        };
        debug!("Recovered sound {}", sound);
        self.last_recovered = Some(sound);
        if self.stop_on_recover {
            Received::Recovered(sound)
        } else {
            Received::Store(sound)
        }
    }
}

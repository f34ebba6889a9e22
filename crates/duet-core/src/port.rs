//! Point-to-point integer channels between processors.
//!
//! Each channel has one writer ([`Outbox`]) and one reader ([`Inbox`]) and is
//! unbounded, so sending never waits. Values arrive in the order they were
//! sent. When the channel belongs to a monitored run, both ends report to the
//! shared [`DeadlockMonitor`] so a mutual wait can be detected.

use crate::cancel::CancellationToken;
use crate::config::ReceivePolicy;
use crate::device::{Device, Received};
use crate::monitor::{DeadlockMonitor, ProcessorId};
use crate::processor::HaltReason;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

/// Why a receive returned without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    /// The timed receive expired with the inbox still empty.
    Timeout(Duration),
    /// Every processor in the run is blocked or halted.
    Deadlock,
    /// The run was stopped from outside.
    Cancelled,
    /// The writer is gone and the inbox is drained.
    Disconnected,
}

impl From<ReceiveError> for HaltReason {
    fn from(err: ReceiveError) -> Self {
        match err {
            ReceiveError::Timeout(_) => HaltReason::Timeout,
            ReceiveError::Deadlock => HaltReason::Deadlock,
            ReceiveError::Cancelled => HaltReason::Cancelled,
            ReceiveError::Disconnected => HaltReason::Disconnected,
        }
    }
}

/// Create a channel whose reader is processor `owner`.
pub fn channel(
    owner: ProcessorId,
    monitor: Option<Arc<DeadlockMonitor>>,
    token: CancellationToken,
) -> (Outbox, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let outbox = Outbox {
        tx,
        to: owner,
        monitor: monitor.clone(),
    };
    let inbox = Inbox {
        rx,
        owner,
        monitor,
        token,
    };
    (outbox, inbox)
}

/// Writing end of a channel.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<i64>,
    to: ProcessorId,
    monitor: Option<Arc<DeadlockMonitor>>,
}

impl Outbox {
    /// Enqueue a value. Returns false if the reader is gone, in which case
    /// the value is dropped.
    pub fn send(&self, value: i64) -> bool {
        if let Some(monitor) = &self.monitor {
            monitor.note_sent(self.to);
        }
        self.tx.send(value).is_ok()
    }

    /// Processor this outbox delivers to.
    pub fn destination(&self) -> ProcessorId {
        self.to
    }
}

/// Reading end of a channel.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<i64>,
    owner: ProcessorId,
    monitor: Option<Arc<DeadlockMonitor>>,
    token: CancellationToken,
}

impl Inbox {
    pub fn owner(&self) -> ProcessorId {
        self.owner
    }

    /// Values waiting to be received.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Dequeue a value if one is ready, without waiting.
    pub fn try_receive(&mut self) -> Option<i64> {
        let value = self.rx.try_recv().ok()?;
        self.acknowledge();
        Some(value)
    }

    /// Dequeue a value, waiting according to `policy` when the inbox is empty.
    ///
    /// The owner is reported blocked before it suspends. On any error it stays
    /// blocked; the caller is expected to halt.
    pub async fn receive(&mut self, policy: ReceivePolicy) -> Result<i64, ReceiveError> {
        let disconnected = match self.rx.try_recv() {
            Ok(value) => {
                self.acknowledge();
                return Ok(value);
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        };

        if let Some(monitor) = &self.monitor {
            monitor.block(self.owner);
        }
        if disconnected {
            return Err(self.closed_reason());
        }
        debug!("Processor {} waiting on empty inbox", self.owner);

        let outcome = match policy {
            ReceivePolicy::Blocking => self.wait().await,
            ReceivePolicy::Timeout(limit) => tokio::time::timeout(limit, self.wait())
                .await
                .unwrap_or(Err(ReceiveError::Timeout(limit))),
        };

        match outcome {
            Ok(value) => {
                self.acknowledge();
                Ok(value)
            }
            Err(ReceiveError::Disconnected) => Err(self.closed_reason()),
            Err(err) => Err(err),
        }
    }

    async fn wait(&mut self) -> Result<i64, ReceiveError> {
        let Self {
            rx, token, monitor, ..
        } = self;
        tokio::select! {
            biased;
            value = rx.recv() => value.ok_or(ReceiveError::Disconnected),
            _ = token.cancelled() => Err(Self::cancel_reason(monitor.as_deref())),
        }
    }

    fn acknowledge(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.note_received(self.owner);
        }
    }

    /// A monitored writer always halts before its end closes, so a closed
    /// inbox in a monitored run is part of a stall.
    fn closed_reason(&self) -> ReceiveError {
        match &self.monitor {
            Some(monitor) if monitor.is_stalled() => ReceiveError::Deadlock,
            _ => ReceiveError::Disconnected,
        }
    }

    fn cancel_reason(monitor: Option<&DeadlockMonitor>) -> ReceiveError {
        match monitor {
            Some(monitor) if monitor.is_stalled() => ReceiveError::Deadlock,
            _ => ReceiveError::Cancelled,
        }
    }
}

/// A processor's two channel ends plus its receive policy.
#[derive(Debug)]
pub struct Link {
    id: ProcessorId,
    outbox: Outbox,
    inbox: Inbox,
    policy: ReceivePolicy,
    monitor: Option<Arc<DeadlockMonitor>>,
}

impl Link {
    /// Cross-wire two processors: 0's outbox feeds 1's inbox and vice versa.
    pub fn pair(monitor: Arc<DeadlockMonitor>, policy: ReceivePolicy) -> [Link; 2] {
        let token = monitor.token().clone();
        let (to_zero, zero_inbox) = channel(0, Some(monitor.clone()), token.clone());
        let (to_one, one_inbox) = channel(1, Some(monitor.clone()), token);
        [
            Link {
                id: 0,
                outbox: to_one,
                inbox: zero_inbox,
                policy,
                monitor: Some(monitor.clone()),
            },
            Link {
                id: 1,
                outbox: to_zero,
                inbox: one_inbox,
                policy,
                monitor: Some(monitor),
            },
        ]
    }

    /// A link for processor 0 running alone, plus the handle that drives it.
    ///
    /// No monitor is attached: only `policy`, the token, or dropping the
    /// handle can end a wait.
    pub fn standalone(policy: ReceivePolicy, token: CancellationToken) -> (Link, PeerHandle) {
        let (to_processor, inbox) = channel(0, None, token.clone());
        let (outbox, from_processor) = channel(1, None, token);
        let link = Link {
            id: 0,
            outbox,
            inbox,
            policy,
            monitor: None,
        };
        (
            link,
            PeerHandle {
                to_processor,
                from_processor,
            },
        )
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn policy(&self) -> ReceivePolicy {
        self.policy
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }
}

#[async_trait]
impl Device for Link {
    fn send(&mut self, value: i64) {
        if !self.outbox.send(value) {
            debug!(
                "Processor {} sent {} to halted processor {}",
                self.id,
                value,
                self.outbox.destination()
            );
        }
    }

    async fn receive(&mut self, _current: i64) -> Received {
        match self.inbox.receive(self.policy).await {
            Ok(value) => Received::Store(value),
            Err(err) => Received::Halt(err.into()),
        }
    }

    fn halted(&mut self, _reason: HaltReason) {
        if let Some(monitor) = &self.monitor {
            monitor.halt(self.id);
        }
    }
}

/// The outside end of a standalone link.
#[derive(Debug)]
pub struct PeerHandle {
    /// Feeds the processor's inbox.
    pub to_processor: Outbox,
    /// Receives what the processor sends.
    pub from_processor: Inbox,
}

impl PeerHandle {
    /// Drain everything the processor has sent so far.
    pub fn drain(&mut self) -> Vec<i64> {
        let mut values = Vec::new();
        while let Some(value) = self.from_processor.try_receive() {
            values.push(value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standalone(policy: ReceivePolicy) -> (Link, PeerHandle) {
        Link::standalone(policy, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = channel(0, None, CancellationToken::new());
        for value in [5, -1, 9, 0, 9] {
            assert!(tx.send(value));
        }
        let mut received = Vec::new();
        for _ in 0..5 {
            received.push(rx.receive(ReceivePolicy::Blocking).await.unwrap());
        }
        assert_eq!(received, vec![5, -1, 9, 0, 9]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fifo_order_across_tasks() {
        let (tx, mut rx) = channel(0, None, CancellationToken::new());
        let producer = tokio::spawn(async move {
            for value in 0..1000 {
                tx.send(value);
                if value % 97 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });
        let mut received = Vec::with_capacity(1000);
        for _ in 0..1000 {
            received.push(rx.receive(ReceivePolicy::Blocking).await.unwrap());
        }
        producer.await.unwrap();
        assert_eq!(received, (0..1000).collect::<Vec<i64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_empty_inbox() {
        let (_link, mut peer) = standalone(ReceivePolicy::Blocking);
        let limit = Duration::from_millis(50);
        let result = peer
            .from_processor
            .receive(ReceivePolicy::Timeout(limit))
            .await;
        assert_eq!(result, Err(ReceiveError::Timeout(limit)));
    }

    #[tokio::test]
    async fn test_disconnected_when_writer_dropped() {
        let (tx, mut rx) = channel(0, None, CancellationToken::new());
        tx.send(1);
        drop(tx);
        assert_eq!(rx.receive(ReceivePolicy::Blocking).await, Ok(1));
        assert_eq!(
            rx.receive(ReceivePolicy::Blocking).await,
            Err(ReceiveError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_cancelled_receive() {
        let token = CancellationToken::new();
        let (_tx, mut rx) = channel(0, None, token.clone());
        token.cancel();
        assert_eq!(
            rx.receive(ReceivePolicy::Blocking).await,
            Err(ReceiveError::Cancelled)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pair_reports_deadlock() {
        let monitor = Arc::new(DeadlockMonitor::new(2, CancellationToken::new()));
        let [mut zero, mut one] = Link::pair(monitor.clone(), ReceivePolicy::Blocking);

        let first = tokio::spawn(async move { zero.receive(0).await });
        let second = tokio::spawn(async move { one.receive(0).await });

        assert_eq!(first.await.unwrap(), Received::Halt(HaltReason::Deadlock));
        assert_eq!(second.await.unwrap(), Received::Halt(HaltReason::Deadlock));
        assert!(monitor.is_stalled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pair_delivers_across() {
        let monitor = Arc::new(DeadlockMonitor::new(2, CancellationToken::new()));
        let [mut zero, mut one] = Link::pair(monitor.clone(), ReceivePolicy::Blocking);

        zero.send(17);
        assert_eq!(monitor.pending(1), Some(1));
        assert_eq!(one.receive(0).await, Received::Store(17));
        assert_eq!(monitor.pending(1), Some(0));
        assert!(!monitor.is_stalled());
    }

    #[tokio::test]
    async fn test_peer_handle_drain() {
        let (mut link, mut peer) = standalone(ReceivePolicy::Blocking);
        link.send(1);
        link.send(2);
        assert_eq!(peer.drain(), vec![1, 2]);
        assert!(peer.drain().is_empty());

        peer.to_processor.send(8);
        assert_eq!(link.receive(0).await, Received::Store(8));
    }
}

//! Console Hub - per-instance output fan-out and command fan-in
//!
//! Each managed instance gets one hub. The hub owns:
//! - a single control task that serializes register / unregister / broadcast
//! - one bounded delivery queue per subscriber (slow consumers get dropped)
//! - one inbound command queue drained by the process stdin relay
//! - a bounded history ring of recent lines

pub mod registry;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub use registry::HubRegistry;

const BROADCAST_QUEUE: usize = 4096;
const COMMAND_QUEUE: usize = 256;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HubError {
    #[error("console hub for '{0}' is stopped")]
    Stopped(String),

    #[error("command queue for '{0}' is full")]
    CommandQueueFull(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubState {
    Active,
    Stopped,
}

/// Sizing knobs shared by every hub a registry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubSettings {
    /// Lines kept for `history()`. 0 disables history.
    pub history_size: usize,
    /// Default per-subscriber delivery queue length.
    pub subscriber_queue: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            history_size: 1000,
            subscriber_queue: 256,
        }
    }
}

struct Register {
    id: u64,
    queue: mpsc::Sender<String>,
    ack: oneshot::Sender<()>,
}

/// A registered subscriber's receiving end.
///
/// `recv()` yields `None` once the hub stops or drops this subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<String, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

pub struct ConsoleHub {
    instance_id: String,
    settings: HubSettings,
    next_id: AtomicU64,
    register_tx: mpsc::Sender<Register>,
    unregister_tx: mpsc::Sender<u64>,
    broadcast_tx: mpsc::Sender<String>,
    history_tx: mpsc::Sender<oneshot::Sender<Vec<String>>>,
    commands_tx: mpsc::Sender<String>,
    commands_rx: Mutex<Option<mpsc::Receiver<String>>>,
    shutdown: CancellationToken,
}

impl ConsoleHub {
    /// Create a hub and spawn its control task. Requires a tokio runtime.
    pub fn start(instance_id: &str, settings: HubSettings) -> Self {
        let (register_tx, register_rx) = mpsc::channel(16);
        let (unregister_tx, unregister_rx) = mpsc::channel(16);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE);
        let (history_tx, history_rx) = mpsc::channel(8);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let shutdown = CancellationToken::new();

        let task = ControlTask {
            instance_id: instance_id.to_string(),
            subscribers: HashMap::new(),
            history: VecDeque::with_capacity(settings.history_size.min(BROADCAST_QUEUE)),
            history_size: settings.history_size,
            register_rx,
            unregister_rx,
            broadcast_rx,
            history_rx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(task.run());

        tracing::debug!("Console hub started for '{}'", instance_id);

        Self {
            instance_id: instance_id.to_string(),
            settings,
            next_id: AtomicU64::new(1),
            register_tx,
            unregister_tx,
            broadcast_tx,
            history_tx,
            commands_tx,
            commands_rx: Mutex::new(Some(commands_rx)),
            shutdown,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> HubState {
        if self.shutdown.is_cancelled() {
            HubState::Stopped
        } else {
            HubState::Active
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == HubState::Stopped
    }

    /// Resolves once the hub has been stopped.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await
    }

    /// Register a subscriber with the default queue length. No backlog is replayed.
    pub async fn subscribe(&self) -> Result<Subscription, HubError> {
        self.subscribe_with_capacity(self.settings.subscriber_queue).await
    }

    pub async fn subscribe_with_capacity(&self, capacity: usize) -> Result<Subscription, HubError> {
        if self.is_stopped() {
            return Err(self.stopped_error());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let (ack, acked) = oneshot::channel();

        self.register_tx
            .send(Register { id, queue, ack })
            .await
            .map_err(|_| self.stopped_error())?;
        // Returning only after the control task has the queue makes the
        // subscription effective for the very next broadcast.
        acked.await.map_err(|_| self.stopped_error())?;

        Ok(Subscription { id, rx })
    }

    /// Remove a subscriber. Unknown ids and stopped hubs are ignored.
    pub async fn unsubscribe(&self, id: u64) {
        let _ = self.unregister_tx.send(id).await;
    }

    /// Queue one line of process output for every subscriber.
    ///
    /// Lines sent after the hub stopped are discarded.
    pub async fn broadcast(&self, line: impl Into<String>) {
        if self.is_stopped() {
            return;
        }
        let _ = self.broadcast_tx.send(line.into()).await;
    }

    /// Queue operator input for the process. Never waits.
    pub fn submit_command(&self, text: impl Into<String>) -> Result<(), HubError> {
        if self.is_stopped() {
            return Err(self.stopped_error());
        }
        self.commands_tx.try_send(text.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HubError::CommandQueueFull(self.instance_id.clone()),
            mpsc::error::TrySendError::Closed(_) => self.stopped_error(),
        })
    }

    /// Hand out the single consumer end of the command queue.
    ///
    /// Returns `None` if another reader already took it.
    pub fn take_commands(&self) -> Option<mpsc::Receiver<String>> {
        self.commands_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Snapshot of recent output, oldest first.
    pub async fn history(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.history_tx.send(reply).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Transition to `Stopped`. Pending output is flushed, then every
    /// subscriber queue is closed. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!("Stopping console hub for '{}'", self.instance_id);
        }
        self.shutdown.cancel();
    }

    fn stopped_error(&self) -> HubError {
        HubError::Stopped(self.instance_id.clone())
    }
}

impl Drop for ConsoleHub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ─── Control task ────────────────────────────────────────────

struct ControlTask {
    instance_id: String,
    subscribers: HashMap<u64, mpsc::Sender<String>>,
    history: VecDeque<String>,
    history_size: usize,
    register_rx: mpsc::Receiver<Register>,
    unregister_rx: mpsc::Receiver<u64>,
    broadcast_rx: mpsc::Receiver<String>,
    history_rx: mpsc::Receiver<oneshot::Sender<Vec<String>>>,
    shutdown: CancellationToken,
}

impl ControlTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(reg) = self.register_rx.recv() => {
                    self.subscribers.insert(reg.id, reg.queue);
                    let _ = reg.ack.send(());
                    tracing::debug!("Subscriber {} joined console '{}'", reg.id, self.instance_id);
                }
                Some(id) = self.unregister_rx.recv() => {
                    if self.subscribers.remove(&id).is_some() {
                        tracing::debug!("Subscriber {} left console '{}'", id, self.instance_id);
                    }
                }
                Some(line) = self.broadcast_rx.recv() => self.deliver(line),
                Some(reply) = self.history_rx.recv() => {
                    let _ = reply.send(self.history.iter().cloned().collect());
                }
                else => break,
            }
        }

        // flush whatever the relays queued before the stop
        while let Ok(line) = self.broadcast_rx.try_recv() {
            self.deliver(line);
        }
        let closed = self.subscribers.len();
        self.subscribers.clear();
        self.history.clear();
        tracing::debug!("Console hub '{}' stopped, closed {} subscribers", self.instance_id, closed);
    }

    fn deliver(&mut self, line: String) {
        if self.history_size > 0 {
            if self.history.len() >= self.history_size {
                self.history.pop_front();
            }
            self.history.push_back(line.clone());
        }

        let instance_id = &self.instance_id;
        self.subscribers.retain(|id, queue| match queue.try_send(line.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Dropping slow subscriber {} from console '{}'", id, instance_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn hub() -> ConsoleHub {
        ConsoleHub::start("test", HubSettings::default())
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let hub = hub();
        let mut a = hub.subscribe().await.unwrap();
        let mut b = hub.subscribe().await.unwrap();

        hub.broadcast("[Server thread/INFO]: Done (3.2s)!").await;

        assert_eq!(a.recv().await.unwrap(), "[Server thread/INFO]: Done (3.2s)!");
        assert_eq!(b.recv().await.unwrap(), "[Server thread/INFO]: Done (3.2s)!");
    }

    #[tokio::test]
    async fn test_no_backlog_for_late_subscriber() {
        let hub = hub();
        let mut early = hub.subscribe().await.unwrap();
        hub.broadcast("before").await;
        assert_eq!(early.recv().await.unwrap(), "before");

        let mut late = hub.subscribe().await.unwrap();
        hub.broadcast("after").await;

        assert_eq!(late.recv().await.unwrap(), "after");
        assert_eq!(early.recv().await.unwrap(), "after");
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped_without_blocking_others() {
        let hub = hub();
        let mut fast_a = hub.subscribe_with_capacity(1024).await.unwrap();
        let mut fast_b = hub.subscribe_with_capacity(1024).await.unwrap();
        let mut slow = hub.subscribe_with_capacity(4).await.unwrap();

        let n = 100;
        for i in 0..n {
            hub.broadcast(format!("line {}", i)).await;
        }

        for sub in [&mut fast_a, &mut fast_b] {
            for i in 0..n {
                let line = timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap();
                assert_eq!(line, format!("line {}", i));
            }
        }

        // the slow one got what fit in its queue and was then cut off
        let mut received = Vec::new();
        while let Some(line) = timeout(Duration::from_secs(5), slow.recv()).await.unwrap() {
            received.push(line);
        }
        assert_eq!(received, vec!["line 0", "line 1", "line 2", "line 3"]);
    }

    #[tokio::test]
    async fn test_stop_closes_subscribers() {
        let hub = hub();
        let mut sub = hub.subscribe().await.unwrap();
        hub.broadcast("last words").await;
        hub.stop();

        assert_eq!(hub.state(), HubState::Stopped);
        assert_eq!(timeout(Duration::from_secs(5), sub.recv()).await.unwrap().as_deref(), Some("last words"));
        assert_eq!(timeout(Duration::from_secs(5), sub.recv()).await.unwrap(), None);

        assert!(matches!(hub.subscribe().await, Err(HubError::Stopped(_))));
        assert!(matches!(hub.submit_command("list"), Err(HubError::Stopped(_))));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = hub();
        let mut sub = hub.subscribe().await.unwrap();
        hub.unsubscribe(sub.id()).await;
        hub.unsubscribe(sub.id()).await;
        hub.unsubscribe(9999).await;

        assert_eq!(timeout(Duration::from_secs(5), sub.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commands_are_fifo_with_single_reader() {
        let hub = hub();
        let mut commands = hub.take_commands().unwrap();
        assert!(hub.take_commands().is_none());

        hub.submit_command("say one").unwrap();
        hub.submit_command("say two").unwrap();
        hub.submit_command("list").unwrap();

        assert_eq!(commands.recv().await.unwrap(), "say one");
        assert_eq!(commands.recv().await.unwrap(), "say two");
        assert_eq!(commands.recv().await.unwrap(), "list");
    }

    #[tokio::test]
    async fn test_command_queue_full() {
        let hub = hub();
        for i in 0..COMMAND_QUEUE {
            hub.submit_command(format!("cmd {}", i)).unwrap();
        }
        assert!(matches!(hub.submit_command("overflow"), Err(HubError::CommandQueueFull(_))));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let hub = ConsoleHub::start("hist", HubSettings { history_size: 3, subscriber_queue: 8 });
        for i in 0..5 {
            hub.broadcast(format!("l{}", i)).await;
        }
        assert_eq!(hub.history().await, vec!["l2", "l3", "l4"]);
    }

    #[tokio::test]
    async fn test_history_disabled() {
        let hub = ConsoleHub::start("nohist", HubSettings { history_size: 0, subscriber_queue: 8 });
        hub.broadcast("x").await;
        assert!(hub.history().await.is_empty());
    }
}

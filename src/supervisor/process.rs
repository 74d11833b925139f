use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::process::ChildStdin;
use tokio_util::sync::CancellationToken;

/// Shared handle to a live process's stdin.
pub type StdinHandle = Arc<tokio::sync::Mutex<ChildStdin>>;

/// Everything the supervisor keeps about a live process.
///
/// The `Child` itself belongs to the reaper task; this side only holds
/// what start/stop/command need.
#[derive(Debug, Clone)]
pub struct ActiveProcess {
    pub pid: Option<u32>,
    pub stdin: StdinHandle,
    pub shutdown_command: &'static str,
    pub started_at: u64,
    kill: CancellationToken,
}

impl ActiveProcess {
    pub fn new(pid: Option<u32>, stdin: StdinHandle, shutdown_command: &'static str, kill: CancellationToken) -> Self {
        Self {
            pid,
            stdin,
            shutdown_command,
            started_at: current_timestamp(),
            kill,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        current_timestamp().saturating_sub(self.started_at)
    }

    /// Ask the reaper to kill this process.
    pub fn request_kill(&self) {
        self.kill.cancel();
    }

    /// Whether `other` refers to the same spawned process as `self`.
    pub fn same_process(&self, other: &ActiveProcess) -> bool {
        Arc::ptr_eq(&self.stdin, &other.stdin)
    }
}

#[derive(Debug)]
enum Slot {
    /// Reserved by an in-flight start; no process yet.
    Starting,
    Running(ActiveProcess),
    /// Process has exited; the reaper is still cleaning up.
    Exiting,
}

/// Instance id → live process. The single source of truth for "is it live".
#[derive(Debug, Default)]
pub struct ProcessTable {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically check that `instance_id` is absent and claim it.
    ///
    /// `None` means a process is already live (or being started).
    pub fn reserve(&self, instance_id: &str) -> Option<Reservation<'_>> {
        let mut slots = self.lock();
        if slots.contains_key(instance_id) {
            return None;
        }
        slots.insert(instance_id.to_string(), Slot::Starting);
        Some(Reservation {
            table: self,
            instance_id: instance_id.to_string(),
            committed: false,
        })
    }

    /// The live process, if `instance_id` is in the `Running` state.
    pub fn get(&self, instance_id: &str) -> Option<ActiveProcess> {
        match self.lock().get(instance_id) {
            Some(Slot::Running(p)) => Some(p.clone()),
            _ => None,
        }
    }

    /// Run `f` against the live process while holding the table lock.
    ///
    /// The reaper takes the same lock to leave `Running`, so nothing `f`
    /// persists can land after the reaper's final status write.
    pub fn with_running<T>(&self, instance_id: &str, f: impl FnOnce(&ActiveProcess) -> T) -> Option<T> {
        match self.lock().get(instance_id) {
            Some(Slot::Running(p)) => Some(f(p)),
            _ => None,
        }
    }

    /// True while a process is running or still being reaped.
    pub fn is_running(&self, instance_id: &str) -> bool {
        matches!(self.lock().get(instance_id), Some(Slot::Running(_) | Slot::Exiting))
    }

    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Running(_) | Slot::Exiting))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Move a `Running` slot to `Exiting`. Commands, stop and kill see the
    /// instance as not running from here on, while new starts stay blocked
    /// until `remove`.
    pub fn mark_exiting(&self, instance_id: &str) -> bool {
        let mut slots = self.lock();
        match slots.get_mut(instance_id) {
            Some(slot @ Slot::Running(_)) => {
                *slot = Slot::Exiting;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, instance_id: &str) -> bool {
        let removed = self.lock().remove(instance_id).is_some();
        if removed {
            tracing::info!("Stopped tracking server '{}'", instance_id);
        }
        removed
    }
}

/// A claimed slot. Dropping it without `commit` releases the claim, so any
/// early return from a start attempt leaves the table unchanged.
#[derive(Debug)]
pub struct Reservation<'a> {
    table: &'a ProcessTable,
    instance_id: String,
    committed: bool,
}

impl Reservation<'_> {
    pub fn commit(mut self, process: ActiveProcess) {
        let pid = process.pid;
        self.table.lock().insert(self.instance_id.clone(), Slot::Running(process));
        self.committed = true;
        tracing::info!("Now tracking server '{}' with pid: {:?}", self.instance_id, pid);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.table.lock();
        if matches!(slots.get(&self.instance_id), Some(Slot::Starting)) {
            slots.remove(&self.instance_id);
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

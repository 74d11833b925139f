//! Process supervision for managed Minecraft servers.
//!
//! The supervisor owns the in-memory table of live processes. Persisted
//! instance status is only a mirror of that table: it is written on every
//! transition, but "is this server running" is always answered from here.

pub mod error;
pub mod process;
pub mod relay;
pub mod stats;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use error::SupervisorError;
use process::{ActiveProcess, ProcessTable};
pub use stats::ProcessStats;

use crate::console::HubRegistry;
use crate::instance::properties::{self, PROPERTIES_FILE};
use crate::instance::{InstanceRepository, InstanceStatus, ServerInstance};
use crate::java_env::{required_java_major, RuntimeProvider};
use crate::port::{self, PortRange};
use crate::runner::select_runner;

/// How long the reaper waits for output relays to drain after exit.
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of a successful start.
#[derive(Debug, Clone, Serialize)]
pub struct Launch {
    pub instance_id: String,
    pub pid: Option<u32>,
    pub port: u16,
    pub java_major: u32,
}

pub struct Supervisor {
    repository: Arc<dyn InstanceRepository>,
    runtimes: Arc<dyn RuntimeProvider>,
    hubs: Arc<HubRegistry>,
    processes: Arc<ProcessTable>,
    servers_root: PathBuf,
    port_range: PortRange,
    /// Serializes port reassignment so two starts cannot pick the same port.
    port_lock: Mutex<()>,
}

impl Supervisor {
    pub fn new(
        repository: Arc<dyn InstanceRepository>,
        runtimes: Arc<dyn RuntimeProvider>,
        hubs: Arc<HubRegistry>,
        servers_root: impl Into<PathBuf>,
        port_range: PortRange,
    ) -> Self {
        Self {
            repository,
            runtimes,
            hubs,
            processes: Arc::new(ProcessTable::new()),
            servers_root: servers_root.into(),
            port_range,
            port_lock: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn InstanceRepository> {
        &self.repository
    }

    pub fn hubs(&self) -> &Arc<HubRegistry> {
        &self.hubs
    }

    pub fn is_running(&self, instance_id: &str) -> bool {
        self.processes.is_running(instance_id)
    }

    pub fn running_instances(&self) -> Vec<String> {
        self.processes.running_ids()
    }

    /// Launch the server process for `instance_id`.
    ///
    /// The tracking slot is claimed before anything else happens, so two
    /// concurrent starts of the same instance cannot both get past this
    /// point. Any failure releases the claim and leaves the persisted status
    /// untouched.
    pub async fn start(&self, instance_id: &str) -> Result<Launch, SupervisorError> {
        let reservation = self
            .processes
            .reserve(instance_id)
            .ok_or_else(|| SupervisorError::AlreadyRunning(instance_id.to_string()))?;

        let mut instance = self
            .repository
            .get_instance(instance_id)?
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?;

        let working_dir = instance.working_dir(&self.servers_root);
        let working_dir = std::path::absolute(&working_dir).unwrap_or(working_dir);

        self.settle_port(&mut instance)?;

        match properties::ensure_port(&working_dir.join(PROPERTIES_FILE), instance.port) {
            Ok(true) => tracing::info!("Updated {} of '{}' to port {}", PROPERTIES_FILE, instance.id, instance.port),
            Ok(false) => {}
            Err(e) => tracing::warn!("Could not update {} for '{}': {}", PROPERTIES_FILE, instance.id, e),
        }

        let java_major = required_java_major(&instance.version);
        let java = self
            .runtimes
            .ensure_runtime(java_major)
            .await
            .map_err(|e| SupervisorError::Runtime {
                major: java_major,
                reason: format!("{:#}", e),
            })?;

        let runner = select_runner(&instance.loader);
        let invocation = runner.build_invocation(&java, &working_dir, instance.ram, &instance.custom_args)?;
        tracing::info!(
            "Launching '{}' ({} {}) with {:?} runner: {} {}",
            instance.name,
            instance.loader,
            instance.version,
            runner.kind(),
            invocation.program.display(),
            invocation.args.join(" ")
        );

        let mut child = invocation.to_command().spawn().map_err(|e| SupervisorError::Spawn {
            id: instance.id.clone(),
            reason: e.to_string(),
        })?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(i), Some(o), Some(e)) => (i, o, e),
            _ => {
                discard_child(&instance.id, &mut child).await;
                return Err(SupervisorError::Spawn {
                    id: instance.id.clone(),
                    reason: "process stdio was not captured".to_string(),
                });
            }
        };
        let stdin = Arc::new(tokio::sync::Mutex::new(stdin));

        let hub = self.hubs.get_or_create(&instance.id);
        let relays = vec![
            relay::pump_output(&instance.id, stdout, hub.clone()),
            relay::pump_output(&instance.id, stderr, hub.clone()),
        ];
        match hub.take_commands() {
            Some(commands) => {
                relay::pump_commands(&instance.id, commands, stdin.clone(), hub.clone());
            }
            None => tracing::warn!("Console commands for '{}' are already relayed elsewhere", instance.id),
        }

        let pid = child.id();
        let kill = CancellationToken::new();
        reservation.commit(ActiveProcess::new(pid, stdin, runner.shutdown_command(), kill.clone()));
        self.persist_status(&instance.id, InstanceStatus::Running);

        tokio::spawn(
            Reaper {
                instance_id: instance.id.clone(),
                child,
                kill,
                relays,
                processes: self.processes.clone(),
                hubs: self.hubs.clone(),
                repository: self.repository.clone(),
            }
            .run(),
        );

        tracing::info!("Server '{}' started on port {} (pid {:?})", instance.name, instance.port, pid);
        Ok(Launch {
            instance_id: instance.id,
            pid,
            port: instance.port,
            java_major,
        })
    }

    /// Ask the server to shut down by writing its stop command to stdin.
    ///
    /// Returns once the command is written; the reaper finishes the
    /// transition when the process actually exits. STOPPING is recorded only
    /// after the write succeeds and only while that same process is still
    /// live, so it can never overwrite the reaper's STOPPED.
    pub async fn stop(&self, instance_id: &str) -> Result<(), SupervisorError> {
        let process = self
            .processes
            .get(instance_id)
            .ok_or_else(|| SupervisorError::NotRunning(instance_id.to_string()))?;

        tracing::info!("Stopping server '{}'", instance_id);
        self.write_stdin(instance_id, &process, process.shutdown_command).await?;

        let marked = self.processes.with_running(instance_id, |live| {
            if live.same_process(&process) {
                self.persist_status(instance_id, InstanceStatus::Stopping);
            }
        });
        if marked.is_none() {
            tracing::debug!("Server '{}' exited before it could be marked STOPPING", instance_id);
        }
        Ok(())
    }

    pub async fn send_command(&self, instance_id: &str, command: &str) -> Result<(), SupervisorError> {
        let process = self
            .processes
            .get(instance_id)
            .ok_or_else(|| SupervisorError::NotRunning(instance_id.to_string()))?;
        self.write_stdin(instance_id, &process, command).await
    }

    /// Terminate the process without waiting for a graceful shutdown.
    pub fn kill(&self, instance_id: &str) -> Result<(), SupervisorError> {
        self.processes
            .with_running(instance_id, |process| {
                process.request_kill();
                self.persist_status(instance_id, InstanceStatus::Stopping);
            })
            .ok_or_else(|| SupervisorError::NotRunning(instance_id.to_string()))?;
        tracing::warn!("Killing server '{}'", instance_id);
        Ok(())
    }

    /// CPU, memory and disk usage of an instance. Stopped instances report
    /// disk usage only.
    pub async fn stats(&self, instance_id: &str) -> Result<ProcessStats, SupervisorError> {
        let instance = self
            .repository
            .get_instance(instance_id)?
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?;

        let disk_bytes = stats::dir_size_async(instance.working_dir(&self.servers_root)).await;
        let mut out = ProcessStats {
            disk_bytes,
            ..Default::default()
        };

        if let Some(process) = self.processes.get(instance_id) {
            out.running = true;
            out.pid = process.pid;
            out.uptime_secs = process.uptime_secs();
            if let Some((cpu, memory)) = match process.pid {
                Some(pid) => stats::sample_process_async(pid).await,
                None => None,
            } {
                out.cpu_percent = cpu;
                out.memory_bytes = memory;
            }
        }
        Ok(out)
    }

    /// Bring persisted statuses back in line after a daemon restart: any
    /// instance recorded as RUNNING or STOPPING that we are not tracking is
    /// marked STOPPED. Returns how many records changed.
    pub fn reset_stale_statuses(&self) -> Result<usize, SupervisorError> {
        let mut reset = 0;
        for instance in self.repository.list_instances()? {
            if instance.status == InstanceStatus::Stopped || self.processes.is_running(&instance.id) {
                continue;
            }
            self.repository.update_status(&instance.id, InstanceStatus::Stopped)?;
            tracing::info!("Reset stale status of '{}' ({} → STOPPED)", instance.id, instance.status.as_str());
            reset += 1;
        }
        Ok(reset)
    }

    /// Stop every live server, killing whatever is still up after `grace`.
    pub async fn stop_all(&self, grace: Duration) {
        let ids = self.running_instances();
        if ids.is_empty() {
            return;
        }
        tracing::info!("Stopping {} running server(s)", ids.len());
        for id in &ids {
            match self.stop(id).await {
                Ok(()) | Err(SupervisorError::NotRunning(_)) => {}
                Err(e) => tracing::warn!("Stop of '{}' failed: {}", id, e),
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        while !self.running_instances().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        for id in self.running_instances() {
            tracing::warn!("Server '{}' ignored stop for {:?}, killing", id, grace);
            if let Err(e) = self.kill(&id) {
                // 이미 종료 처리 중이면 NotRunning
                tracing::debug!("Kill of '{}' skipped: {}", id, e);
            }
        }
        // 리퍼가 정리할 시간
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !self.running_instances().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Keep the recorded port if it is bindable, otherwise move the instance
    /// to a free one and persist that.
    ///
    /// Listing assignments, allocating and persisting happen under
    /// `port_lock`; the next caller sees this port as assigned.
    fn settle_port(&self, instance: &mut ServerInstance) -> Result<(), SupervisorError> {
        let busy = match port::check_available(instance.port) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let _guard = self.port_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let assigned: HashSet<u16> = self.repository.list_instances()?.iter().map(|i| i.port).collect();
        let new_port = port::allocate(self.port_range, &assigned)?;
        tracing::warn!("{}; moving '{}' to port {}", busy, instance.id, new_port);

        self.repository.update_port(&instance.id, new_port)?;
        instance.port = new_port;
        Ok(())
    }

    async fn write_stdin(&self, instance_id: &str, process: &ActiveProcess, text: &str) -> Result<(), SupervisorError> {
        let mut stdin = process.stdin.lock().await;
        relay::write_line(&mut *stdin, text)
            .await
            .map_err(|source| SupervisorError::Stdin {
                id: instance_id.to_string(),
                source,
            })
    }

    fn persist_status(&self, instance_id: &str, status: InstanceStatus) {
        persist_status(self.repository.as_ref(), instance_id, status);
    }
}

/// Status writes are best effort; the process table stays authoritative.
fn persist_status(repository: &dyn InstanceRepository, instance_id: &str, status: InstanceStatus) {
    if let Err(e) = repository.update_status(instance_id, status) {
        tracing::warn!("Failed to persist status {} for '{}': {:#}", status.as_str(), instance_id, e);
    }
}

/// Kill a child that will not be tracked and wait for it, so it is not left
/// behind as a zombie.
async fn discard_child(instance_id: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!("Failed to kill untracked process of '{}': {}", instance_id, e);
    }
    match child.wait().await {
        Ok(status) => tracing::debug!("Untracked process of '{}' exited with {}", instance_id, status),
        Err(e) => tracing::warn!("Failed to reap untracked process of '{}': {}", instance_id, e),
    }
}

/// Owns the child for its whole life and cleans up after it exits.
struct Reaper {
    instance_id: String,
    child: Child,
    kill: CancellationToken,
    relays: Vec<JoinHandle<()>>,
    processes: Arc<ProcessTable>,
    hubs: Arc<HubRegistry>,
    repository: Arc<dyn InstanceRepository>,
}

impl Reaper {
    async fn run(mut self) {
        let status = tokio::select! {
            status = self.child.wait() => status,
            _ = self.kill.cancelled() => {
                if let Err(e) = self.child.start_kill() {
                    tracing::warn!("Failed to kill '{}': {}", self.instance_id, e);
                }
                self.child.wait().await
            }
        };

        match &status {
            Ok(s) if s.success() => tracing::info!("Server '{}' exited cleanly", self.instance_id),
            Ok(s) => tracing::warn!("Server '{}' exited with {}", self.instance_id, s),
            Err(e) => tracing::error!("Failed to wait on server '{}': {}", self.instance_id, e),
        }

        // stop/kill/command see NotRunning from here; start stays blocked until remove
        self.processes.mark_exiting(&self.instance_id);

        // give the relays a moment to deliver the last lines
        for relay in self.relays {
            if tokio::time::timeout(RELAY_DRAIN_TIMEOUT, relay).await.is_err() {
                tracing::debug!("Output relay for '{}' did not drain in time", self.instance_id);
            }
        }

        // hub and status go first so a new start never sees our leftovers
        self.hubs.remove(&self.instance_id);
        persist_status(self.repository.as_ref(), &self.instance_id, InstanceStatus::Stopped);
        self.processes.remove(&self.instance_id);
    }
}

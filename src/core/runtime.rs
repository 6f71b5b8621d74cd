//! Maintenance runtime.
//!
//! The runtime owns one [`MessageIndex`] and keeps it fresh:
//! - Start: open collaborators -> optional start-up rebuild -> task worker
//!   -> optional periodic rebuild ticker
//! - Shutdown: ticker -> task worker
//!
//! Rebuilds are blocking work and run on tokio's blocking pool. Periodic
//! rebuilds go through the task channel, so the worker is the only place
//! the runtime rebuilds from after start-up.

use crate::core::config::Config;
use crate::core::time::{Clock, SystemClock};
use crate::groups::StaticRegistry;
use crate::index::service::{IndexComponents, IndexSettings, MessageIndex};
use crate::jobs::{self, ChannelQueue, IndexTask, TaskQueue, TracingObserver};
use crate::storage::{
    FileLock, FileStore, IndexLock, IndexStore, MemoryInterimStore, MemoryLock, MemoryStore,
    MemoryTokens,
};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component is degraded but functional.
    Degraded,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Load the group registry named by the configuration.
///
/// With `required` unset a missing definitions file yields an empty
/// registry, which is enough for read-only commands. A rebuild over an
/// empty registry would delete every key, so rebuilding callers pass
/// `required`.
pub fn load_registry(config: &Config, required: bool) -> Result<StaticRegistry> {
    let path = &config.groups.definitions;
    if !required && !path.exists() {
        tracing::debug!(path = %path.display(), "group definitions not found, using none");
        return Ok(StaticRegistry::new());
    }
    StaticRegistry::from_file(path)
}

/// Build an index from configuration.
pub fn open_index(
    config: &Config,
    registry: StaticRegistry,
    queue: Arc<dyn TaskQueue>,
) -> Result<MessageIndex> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn IndexStore> = match config.storage.backend.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        "file" => Arc::new(FileStore::new(&config.storage.path)),
        other => anyhow::bail!("unsupported storage backend: {}", other),
    };
    let lock: Arc<dyn IndexLock> = match config.lock.backend.as_str() {
        "memory" => Arc::new(MemoryLock::new(config.lock.timeout())),
        "file" => Arc::new(FileLock::new(
            &config.lock.path,
            config.lock.timeout(),
            config.lock.stale_after(),
        )),
        other => anyhow::bail!("unsupported lock backend: {}", other),
    };

    let components = IndexComponents {
        registry: Arc::new(registry),
        store,
        interim: Arc::new(MemoryInterimStore::new(Arc::clone(&clock))),
        lock,
        tokens: Arc::new(MemoryTokens::new()),
        queue,
        observer: Arc::new(TracingObserver),
        clock,
    };
    Ok(MessageIndex::new(
        IndexSettings::from(&config.index),
        components,
    ))
}

/// Long-running index maintenance process.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// The maintained index, once started.
    index: Option<Arc<MessageIndex>>,

    /// Sender side of the task channel.
    queue: Option<ChannelQueue>,

    /// Index health.
    health: ComponentHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,

    worker: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            index: None,
            queue: None,
            health: ComponentHealth::Starting,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            worker: None,
            ticker: None,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The maintained index (after `start`).
    pub fn index(&self) -> Option<&Arc<MessageIndex>> {
        self.index.as_ref()
    }

    /// Queue feeding the task worker (after `start`).
    pub fn queue(&self) -> Option<&ChannelQueue> {
        self.queue.as_ref()
    }

    /// Get the current health status.
    pub fn health(&self) -> ComponentHealth {
        self.health
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Open the index, run the start-up rebuild and spawn background tasks.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            index = %self.config.index.name,
            storage = %self.config.storage.backend,
            lock = %self.config.lock.backend,
            "starting message index runtime"
        );

        let registry = load_registry(&self.config, true)?;
        let (queue, tasks) = ChannelQueue::new();
        let index = Arc::new(open_index(
            &self.config,
            registry,
            Arc::new(queue.clone()),
        )?);
        self.index = Some(Arc::clone(&index));

        self.health = ComponentHealth::Healthy;
        if self.config.maintenance.rebuild_on_start {
            let task = IndexTask::Rebuild {
                purge_timestamp: None,
            };
            if let Err(e) = run_task(&index, task).await {
                tracing::error!(error = ?e, "start-up rebuild failed, serving previous snapshot");
                self.health = ComponentHealth::Degraded;
            }
        }

        self.worker = Some(tokio::spawn(run_worker(
            Arc::clone(&index),
            tasks,
            self.shutdown_rx.clone(),
        )));
        if let Some(interval) = self.config.maintenance.rebuild_interval() {
            self.ticker = Some(tokio::spawn(run_ticker(
                queue.clone(),
                interval,
                self.shutdown_rx.clone(),
            )));
            tracing::info!(interval_secs = interval.as_secs(), "periodic rebuilds enabled");
        }
        self.queue = Some(queue);

        self.running.store(true, Ordering::Release);
        tracing::info!("message index runtime started");
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the runtime until Ctrl-C or `shutdown`.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = wait_for_signal(&mut shutdown_rx) => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop background tasks; queued tasks not yet started are dropped.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping message index runtime");
        self.health = ComponentHealth::Stopping;
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(worker) = self.worker.take() {
            match tokio::time::timeout(Duration::from_secs(30), worker).await {
                Ok(Ok(())) => tracing::debug!("task worker stopped"),
                Ok(Err(e)) => tracing::warn!(error = %e, "task worker panicked"),
                Err(_) => tracing::warn!("task worker stop timed out"),
            }
        }

        self.health = ComponentHealth::Stopped;
        tracing::info!("message index runtime stopped");
        Ok(())
    }
}

async fn wait_for_signal(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

async fn run_task(index: &Arc<MessageIndex>, task: IndexTask) -> Result<()> {
    let index = Arc::clone(index);
    let name = task.name();
    tokio::task::spawn_blocking(move || jobs::execute(&index, task))
        .await
        .with_context(|| format!("{} task panicked", name))?
        .with_context(|| format!("{} task failed", name))
}

async fn run_worker(
    index: Arc<MessageIndex>,
    mut tasks: mpsc::UnboundedReceiver<IndexTask>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = wait_for_signal(&mut shutdown_rx) => break,
            task = tasks.recv() => {
                let Some(task) = task else { break };
                if let Err(e) = run_task(&index, task).await {
                    tracing::error!(error = ?e, "index task failed");
                }
            }
        }
    }
}

async fn run_ticker(queue: ChannelQueue, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the start-up rebuild covers it.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = wait_for_signal(&mut shutdown_rx) => break,
            _ = interval.tick() => {
                if let Err(e) = queue.enqueue(IndexTask::Rebuild { purge_timestamp: None }) {
                    tracing::warn!(error = %e, "periodic rebuild not scheduled");
                    break;
                }
            }
        }
    }
}

/// Check that a group definitions file loads.
pub fn check_group_definitions(path: &Path) -> Result<usize> {
    Ok(StaticRegistry::from_file(path)?.len())
}

//! Session/Usage Tracker
//!
//! Counts service selections and persists them off the main thread. All
//! mutation happens on one worker thread fed by a command channel; the UI
//! reads a published `UsageSnapshot` through a `watch` receiver.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

use crate::data::{
    ServiceDescriptor, ServiceId, SessionRecord, UsageExport, UsageSnapshot, UsageStatistics,
};

const STATISTICS_FILE: &str = "statistics.json";

/// Default interval between automatic saves
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(300);

enum Command {
    Record(ServiceDescriptor),
    Remove(ServiceId),
    ClearAll,
    SaveAll,
    Import(UsageExport),
    Export(oneshot::Sender<UsageExport>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<Option<String>>),
}

pub struct UsageTracker {
    commands: Sender<Command>,
    snapshot: watch::Receiver<UsageSnapshot>,
    worker: Option<JoinHandle<()>>,
}

impl UsageTracker {
    /// Load persisted records from `dir` and start the worker
    pub fn open(dir: impl Into<PathBuf>, autosave: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create sessions directory {}", dir.display()))?;

        let store = Store::load(dir);
        tracing::info!(
            "Loaded {} session records from {}",
            store.snapshot.sessions.len(),
            store.dir.display()
        );

        let (publisher, snapshot) = watch::channel(store.snapshot.clone());
        let (commands, rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("usage-tracker".to_string())
            .spawn(move || run(store, rx, publisher, autosave))
            .context("Failed to spawn usage tracker thread")?;

        Ok(Self {
            commands,
            snapshot,
            worker: Some(worker),
        })
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Usage tracker worker has stopped");
        }
    }

    pub fn record_selection(&self, service: &ServiceDescriptor) {
        self.send(Command::Record(service.clone()));
    }

    pub fn remove_session(&self, id: &ServiceId) {
        self.send(Command::Remove(id.clone()));
    }

    pub fn clear_all_sessions(&self) {
        self.send(Command::ClearAll);
    }

    pub fn save_all(&self) {
        self.send(Command::SaveAll);
    }

    pub fn import(&self, data: UsageExport) {
        self.send(Command::Import(data));
    }

    pub fn import_file(&self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let data: UsageExport = serde_json::from_str(&content).context("Invalid usage export")?;
        self.import(data);
        Ok(())
    }

    pub fn export(&self) -> Result<UsageExport> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Export(tx));
        rx.blocking_recv().context("Usage tracker did not answer export")
    }

    pub fn export_to_file(&self, path: &Path) -> Result<()> {
        let data = self.export()?;
        let content = serde_json::to_string_pretty(&data)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Wait until every command sent so far has been applied
    pub fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx));
        let _ = rx.blocking_recv();
    }

    /// Latest published state
    pub fn snapshot(&self) -> UsageSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UsageSnapshot> {
        self.snapshot.clone()
    }

    /// Final save and stop. Returns the last used service name.
    pub fn shutdown(mut self) -> Option<String> {
        self.stop()
    }

    fn stop(&mut self) -> Option<String> {
        let worker = self.worker.take()?;
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx));
        let last_used = rx.blocking_recv().ok().flatten();
        if worker.join().is_err() {
            tracing::error!("Usage tracker thread panicked");
        }
        last_used
    }
}

impl Drop for UsageTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut store: Store,
    commands: Receiver<Command>,
    publisher: watch::Sender<UsageSnapshot>,
    autosave: Duration,
) {
    let mut next_save = Instant::now() + autosave;
    loop {
        let timeout = next_save.saturating_duration_since(Instant::now());
        let command = match commands.recv_timeout(timeout) {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => {
                store.save_all();
                next_save = Instant::now() + autosave;
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                store.save_all();
                return;
            }
        };

        match command {
            Command::Record(service) => store.record(&service),
            Command::Remove(id) => store.remove(&id),
            Command::ClearAll => store.clear_all(),
            Command::SaveAll => {
                store.save_all();
                next_save = Instant::now() + autosave;
            }
            Command::Import(data) => store.import(data),
            Command::Export(reply) => {
                let _ = reply.send(store.export());
                continue;
            }
            Command::Flush(reply) => {
                let _ = reply.send(());
                continue;
            }
            Command::Shutdown(reply) => {
                store.save_all();
                let _ = reply.send(store.snapshot.last_used_service.clone());
                tracing::info!("Usage tracker stopped");
                return;
            }
        }
        publisher.send_replace(store.snapshot.clone());
    }
}

struct Store {
    dir: PathBuf,
    snapshot: UsageSnapshot,
    dirty: BTreeSet<ServiceId>,
}

impl Store {
    fn load(dir: PathBuf) -> Self {
        let mut snapshot = UsageSnapshot::default();

        match fs::read_dir(&dir) {
            Ok(entries) => {
                for path in entries.flatten().map(|e| e.path()) {
                    let is_json = path.extension().is_some_and(|ext| ext == "json");
                    let is_statistics = path.file_name().is_some_and(|n| n == STATISTICS_FILE);
                    if !is_json || is_statistics {
                        continue;
                    }
                    match read_json::<SessionRecord>(&path) {
                        Ok(record) => {
                            snapshot.sessions.insert(record.id.clone(), record);
                        }
                        Err(e) => {
                            tracing::warn!("Removing corrupt session file {}: {:#}", path.display(), e);
                            if let Err(e) = fs::remove_file(&path) {
                                tracing::warn!("Failed to remove {}: {}", path.display(), e);
                            }
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to list {}: {}", dir.display(), e),
        }

        let statistics_path = dir.join(STATISTICS_FILE);
        if statistics_path.exists() {
            match read_json::<UsageStatistics>(&statistics_path) {
                Ok(statistics) => snapshot.statistics = statistics,
                Err(e) => tracing::warn!("Ignoring unreadable usage statistics: {:#}", e),
            }
        }

        Self {
            dir,
            snapshot,
            dirty: BTreeSet::new(),
        }
    }

    fn record(&mut self, service: &ServiceDescriptor) {
        let now = Utc::now();
        self.snapshot
            .sessions
            .entry(service.id.clone())
            .and_modify(|r| r.touch(now))
            .or_insert_with(|| SessionRecord::new(service, now));
        self.snapshot.statistics.record(&service.name, now);
        self.snapshot.last_used_service = Some(service.name.clone());
        self.dirty.insert(service.id.clone());
        tracing::debug!("Recorded selection of {}", service.name);
    }

    fn remove(&mut self, id: &ServiceId) {
        if let Some(record) = self.snapshot.sessions.remove(id) {
            self.dirty.remove(id);
            self.delete_file(&record.file_name());
        }
    }

    fn clear_all(&mut self) {
        let records = std::mem::take(&mut self.snapshot.sessions);
        for record in records.values() {
            self.delete_file(&record.file_name());
        }
        self.dirty.clear();
        tracing::info!("Cleared {} session records", records.len());
    }

    fn import(&mut self, data: UsageExport) {
        let count = data.sessions.len();
        for record in data.sessions {
            let newer = self
                .snapshot
                .sessions
                .get(&record.id)
                .map(|existing| record.last_accessed > existing.last_accessed)
                .unwrap_or(true);
            if newer {
                self.dirty.insert(record.id.clone());
                self.snapshot.sessions.insert(record.id.clone(), record);
            }
        }
        self.snapshot.statistics.merge(&data.statistics);
        self.save_all();
        tracing::info!("Imported {} session records", count);
    }

    fn export(&self) -> UsageExport {
        UsageExport {
            sessions: self.snapshot.sessions.values().cloned().collect(),
            statistics: self.snapshot.statistics.clone(),
            export_date: Utc::now(),
        }
    }

    fn save_all(&mut self) {
        let dirty = std::mem::take(&mut self.dirty);
        for id in &dirty {
            if let Some(record) = self.snapshot.sessions.get(id) {
                let path = self.dir.join(record.file_name());
                if let Err(e) = write_json(&path, record) {
                    tracing::warn!("Failed to save session {}: {:#}", id, e);
                    self.dirty.insert(id.clone());
                }
            }
        }
        if let Err(e) = write_json(&self.dir.join(STATISTICS_FILE), &self.snapshot.statistics) {
            tracing::warn!("Failed to save usage statistics: {:#}", e);
        }
        if !dirty.is_empty() {
            tracing::debug!("Saved {} session records", dirty.len());
        }
    }

    fn delete_file(&self, name: &str) {
        let path = self.dir.join(name);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

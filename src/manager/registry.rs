//! Session registry with serialized creation and idle eviction

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, mpsc};
use tokio::task::JoinHandle;

use crate::config::ManagerConfig;
use crate::error::{AgentError, Result};

use super::session::{Session, SessionInfo};

/// One creation slot per key
///
/// The `OnceCell` serializes session creation: concurrent `acquire` calls
/// for the same new key all await the one in-flight spawn and share the
/// resulting session. A failed creation leaves the cell empty, so the next
/// caller retries cleanly.
type Slot = Arc<OnceCell<Arc<Session>>>;

type SessionTable = Arc<Mutex<HashMap<String, Slot>>>;

/// Manager owning every live session and its worker process
///
/// An explicit, constructed instance: it owns its session table, its idle
/// sweep, and its worker-exit reaper, and tears all of them down on
/// [`shutdown`](Self::shutdown) or drop. The session table is the single
/// mutation point shared by concurrent callers.
pub struct SessionManager {
    config: Arc<ManagerConfig>,
    sessions: SessionTable,
    exit_notify: mpsc::UnboundedSender<String>,
    shutting_down: Arc<AtomicBool>,
    sweep_task: Option<JoinHandle<()>>,
    reaper_task: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Create a manager and start its background tasks
    ///
    /// The sweep task evicts sessions idle past `config.idle_timeout` every
    /// `config.sweep_interval`; the reaper prunes entries whose worker has
    /// exited so the next request for that key spawns fresh.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        let config = Arc::new(config);
        let sessions: SessionTable = Arc::new(Mutex::new(HashMap::new()));
        let (exit_notify, mut exit_rx) = mpsc::unbounded_channel::<String>();

        let reaper_sessions = Arc::clone(&sessions);
        let reaper_task = tokio::spawn(async move {
            while let Some(key) = exit_rx.recv().await {
                let mut table = reaper_sessions.lock().await;
                let dead = table
                    .get(&key)
                    .and_then(|slot| slot.get())
                    .is_some_and(|session| session.is_terminated());
                if dead {
                    table.remove(&key);
                    log::info!("[{key}] Removed dead session; next request respawns");
                }
            }
        });

        let sweep_sessions = Arc::clone(&sessions);
        let sweep_config = Arc::clone(&config);
        let sweep_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(sweep_config.sweep_interval).await;
                Self::sweep(&sweep_sessions, sweep_config.idle_timeout).await;
            }
        });

        Self {
            config,
            sessions,
            exit_notify,
            shutting_down: Arc::new(AtomicBool::new(false)),
            sweep_task: Some(sweep_task),
            reaper_task: Some(reaper_task),
        }
    }

    /// Configuration this manager was built with
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Resolve the session for a key, creating it if absent
    ///
    /// Creation for a given key is serialized: of any number of concurrent
    /// callers, exactly one spawns a worker and the rest wait for it and
    /// receive the same session. A session whose worker has died is evicted
    /// and replaced transparently.
    ///
    /// # Errors
    /// Returns `SpawnFailure`, `StartupTimeout`, or `WorkerTerminated` if a
    /// worker cannot be brought up; the key is left clean for a retry
    pub async fn acquire(&self, key: &str) -> Result<Arc<Session>> {
        // One respawn attempt for a stale entry, then give up.
        for _ in 0..2 {
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(AgentError::ShuttingDown);
            }

            let slot = {
                let mut table = self.sessions.lock().await;
                Arc::clone(
                    table
                        .entry(key.to_string())
                        .or_insert_with(|| Arc::new(OnceCell::new())),
                )
            };

            let created = slot
                .get_or_try_init(|| Session::create(key, &self.config, self.exit_notify.clone()))
                .await;

            match created {
                Ok(session) => {
                    if session.is_terminated() {
                        self.remove_slot(key, &slot).await;
                        continue;
                    }
                    session.touch();
                    return Ok(Arc::clone(session));
                }
                Err(e) => {
                    self.remove_slot(key, &slot).await;
                    return Err(e);
                }
            }
        }

        Err(AgentError::worker_terminated(None))
    }

    /// Remove a slot, but only if the table still holds this exact one
    ///
    /// A concurrent eviction plus re-acquire may already have installed a
    /// fresh slot under the same key; that one must survive.
    async fn remove_slot(&self, key: &str, slot: &Slot) {
        let mut table = self.sessions.lock().await;
        if table.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            table.remove(key);
        }
    }

    /// Look up a live session without creating one
    pub async fn get(&self, key: &str) -> Option<Arc<Session>> {
        let table = self.sessions.lock().await;
        table.get(key).and_then(|slot| slot.get()).cloned()
    }

    /// Snapshot one session's state
    ///
    /// # Errors
    /// Returns `SessionNotFound` if no live session exists for the key
    pub async fn session_info(&self, key: &str) -> Result<SessionInfo> {
        self.get(key)
            .await
            .map(|session| session.info())
            .ok_or_else(|| AgentError::session_not_found(key))
    }

    /// Snapshot every live session
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let slots: Vec<Slot> = {
            let table = self.sessions.lock().await;
            table.values().cloned().collect()
        };
        slots
            .iter()
            .filter_map(|slot| slot.get())
            .map(|session| session.info())
            .collect()
    }

    /// Evict a session, killing its worker
    ///
    /// Returns whether a session entry existed. Outstanding requests settle
    /// with `WorkerTerminated`; a subsequent request for the key spawns a
    /// fresh worker.
    pub async fn evict(&self, key: &str) -> bool {
        let removed = self.sessions.lock().await.remove(key);
        match removed {
            Some(slot) => {
                if let Some(session) = slot.get() {
                    log::info!("[{key}] Evicting session");
                    session.shutdown().await;
                }
                true
            }
            None => false,
        }
    }

    /// Run one idle-eviction pass with the configured threshold
    pub async fn evict_idle(&self) {
        Self::sweep(&self.sessions, self.config.idle_timeout).await;
    }

    /// Evict every session idle longer than `max_idle`
    pub async fn evict_idle_older_than(&self, max_idle: Duration) {
        Self::sweep(&self.sessions, max_idle).await;
    }

    /// Evict sessions idle longer than `max_idle`
    async fn sweep(sessions: &Mutex<HashMap<String, Slot>>, max_idle: Duration) {
        let expired: Vec<(String, Arc<Session>)> = {
            let mut table = sessions.lock().await;
            let keys: Vec<String> = table
                .iter()
                .filter(|(_, slot)| {
                    slot.get().is_some_and(|session| {
                        // Never evict a session with requests in flight.
                        session.in_flight() == 0 && session.idle_for() >= max_idle
                    })
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    let slot = table.remove(&key)?;
                    let session = slot.get().cloned()?;
                    Some((key, session))
                })
                .collect()
        };

        // Kill outside the table lock.
        for (key, session) in expired {
            log::info!(
                "[{key}] Evicting idle session ({}s idle)",
                session.idle_for().as_secs()
            );
            session.shutdown().await;
        }
    }

    /// Number of sessions currently tracked
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Shut the manager down
    ///
    /// Rejects new acquires, terminates every worker, and stops the
    /// background tasks. Should be called before dropping for a clean exit.
    pub async fn shutdown(&self) {
        log::info!("Shutting down session manager...");
        self.shutting_down.store(true, Ordering::SeqCst);

        let drained: Vec<(String, Slot)> = {
            let mut table = self.sessions.lock().await;
            table.drain().collect()
        };
        for (key, slot) in drained {
            if let Some(session) = slot.get() {
                log::debug!("[{key}] Terminating session");
                session.shutdown().await;
            }
        }

        log::info!("Session manager shutdown complete");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
        if let Some(task) = self.reaper_task.take() {
            task.abort();
        }
    }
}

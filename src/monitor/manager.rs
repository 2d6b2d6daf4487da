//! Session supervisor.
//!
//! Each started session gets its own thread running the orchestrator with
//! its own recognizer, mapper, decode handle, and cooldown ledger. The
//! supervisor owns only the shared edges: the store, the broadcast
//! registry, the ticket filer, and the map of live control handles.
//!
//! `start`/`pause`/`resume`/`stop` are idempotent with respect to session
//! state; pausing a paused session is not an error. Requests against a
//! session that is not active fail, which the control surface maps to 404.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::broadcast::{BroadcastRegistry, WireMessage};
use crate::monitor::session::{MonitoringSession, SessionState};
use crate::monitor::{run_session, MonitorConfig, MonitorHooks, SessionControl, ViolationAlert};
use crate::recognize::{HazardRecognizer, RegulationMapper};
use crate::store::{SessionStore, ViolationRecord};
use crate::ticket::{warrants_ticket, TicketFiler};

/// Builds per-session collaborator instances.
///
/// Every session gets fresh instances so a wedged HTTP agent in one session
/// cannot poison another.
pub trait CollaboratorFactory: Send + Sync {
    fn recognizer(&self) -> Box<dyn HazardRecognizer>;
    fn mapper(&self) -> Box<dyn RegulationMapper>;
}

/// HTTP collaborator endpoints.
pub struct HttpCollaborators {
    pub recognizer_url: String,
    pub mapper_url: String,
}

impl CollaboratorFactory for HttpCollaborators {
    fn recognizer(&self) -> Box<dyn HazardRecognizer> {
        Box::new(crate::recognize::HttpRecognizer::new(
            self.recognizer_url.clone(),
        ))
    }

    fn mapper(&self) -> Box<dyn RegulationMapper> {
        Box::new(crate::recognize::HttpMapper::new(self.mapper_url.clone()))
    }
}

/// Parameters for starting one monitoring session.
#[derive(Clone, Debug)]
pub struct StartRequest {
    pub source_path: String,
    /// Defaults to the manager's configured interval.
    pub analysis_interval_s: Option<f64>,
    pub auto_ticket: bool,
}

pub type SharedStore = Arc<Mutex<dyn SessionStore>>;
pub type SharedFiler = Arc<Mutex<dyn TicketFiler>>;

struct ActiveSession {
    control: Arc<SessionControl>,
}

/// Supervisor for any number of concurrent monitoring sessions.
pub struct MonitorManager {
    cfg: MonitorConfig,
    store: SharedStore,
    registry: Arc<BroadcastRegistry>,
    collaborators: Arc<dyn CollaboratorFactory>,
    filer: SharedFiler,
    active: Arc<Mutex<HashMap<String, ActiveSession>>>,
}

impl MonitorManager {
    pub fn new(
        cfg: MonitorConfig,
        store: SharedStore,
        registry: Arc<BroadcastRegistry>,
        collaborators: Arc<dyn CollaboratorFactory>,
        filer: SharedFiler,
    ) -> Self {
        Self {
            cfg,
            store,
            registry,
            collaborators,
            filer,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> Arc<BroadcastRegistry> {
        self.registry.clone()
    }

    /// Create a session record and launch its monitoring thread.
    pub fn start(&self, request: StartRequest) -> Result<MonitoringSession> {
        let interval = request
            .analysis_interval_s
            .unwrap_or(self.cfg.analysis_interval_s);
        if !(interval > 0.0) {
            return Err(anyhow!("analysis interval must be positive"));
        }
        if request.source_path.trim().is_empty() {
            return Err(anyhow!("source path is empty"));
        }

        let id = crate::new_session_id();
        let session = MonitoringSession::new(
            &id,
            &request.source_path,
            interval,
            request.auto_ticket,
            crate::now_s()?,
        );
        self.lock_store()?.upsert_session(&session)?;

        let control = Arc::new(SessionControl::new());
        self.lock_active()?.insert(
            id.clone(),
            ActiveSession {
                control: control.clone(),
            },
        );

        let cfg = self.cfg.clone();
        let store = self.store.clone();
        let registry = self.registry.clone();
        let collaborators = self.collaborators.clone();
        let filer = self.filer.clone();
        let active = self.active.clone();
        let mut session_run = session.clone();
        std::thread::spawn(move || {
            let mut recognizer = collaborators.recognizer();
            let mut mapper = collaborators.mapper();
            let mut hooks = SupervisorHooks {
                session_id: session_run.id.clone(),
                auto_ticket: session_run.auto_ticket,
                store,
                registry: registry.clone(),
                filer,
            };
            let outcome = run_session(
                &mut session_run,
                &control,
                recognizer.as_mut(),
                mapper.as_mut(),
                &mut hooks,
                &cfg,
            );
            match outcome {
                Ok(()) => {
                    if session_run.state == SessionState::Completed {
                        registry.broadcast(
                            &session_run.id,
                            &WireMessage::Completed {
                                session_id: session_run.id.clone(),
                                violations_count: session_run.violation_count,
                            },
                        );
                    }
                }
                Err(err) => {
                    log::error!("monitoring session {} failed: {:#}", session_run.id, err);
                    registry.broadcast(
                        &session_run.id,
                        &WireMessage::Error {
                            error: format!("{err:#}"),
                        },
                    );
                }
            }
            if let Ok(mut active) = active.lock() {
                active.remove(&session_run.id);
            }
        });

        Ok(session)
    }

    /// Pause a running session. Already-paused sessions stay paused.
    pub fn pause(&self, session_id: &str) -> Result<()> {
        self.with_control(session_id, |control| control.pause())
    }

    /// Resume a paused session from its current frame index.
    pub fn resume(&self, session_id: &str) -> Result<()> {
        self.with_control(session_id, |control| control.resume())
    }

    /// Stop a session; the monitoring thread releases its handles and
    /// retires the session at the next loop check.
    pub fn stop(&self, session_id: &str) -> Result<()> {
        self.with_control(session_id, |control| control.stop())
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock_active()
            .map(|active| active.contains_key(session_id))
            .unwrap_or(false)
    }

    pub fn session(&self, session_id: &str) -> Result<Option<MonitoringSession>> {
        self.lock_store()?.get_session(session_id)
    }

    pub fn sessions(&self) -> Result<Vec<MonitoringSession>> {
        self.lock_store()?.list_sessions()
    }

    pub fn violations(&self, session_id: &str) -> Result<Vec<ViolationRecord>> {
        self.lock_store()?.session_violations(session_id)
    }

    fn with_control(&self, session_id: &str, apply: impl FnOnce(&SessionControl)) -> Result<()> {
        let active = self.lock_active()?;
        let session = active
            .get(session_id)
            .ok_or_else(|| anyhow!("no active monitoring session '{session_id}'"))?;
        apply(&session.control);
        Ok(())
    }

    fn lock_store(&self) -> Result<std::sync::MutexGuard<'_, dyn SessionStore + 'static>> {
        self.store
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }

    fn lock_active(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ActiveSession>>> {
        self.active
            .lock()
            .map_err(|_| anyhow!("active session map lock poisoned"))
    }
}

/// Bridges orchestrator events to the store, the registry, and tickets.
struct SupervisorHooks {
    session_id: String,
    auto_ticket: bool,
    store: SharedStore,
    registry: Arc<BroadcastRegistry>,
    filer: SharedFiler,
}

impl MonitorHooks for SupervisorHooks {
    fn on_session_update(&mut self, session: &MonitoringSession) -> Result<()> {
        self.store
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?
            .upsert_session(session)
    }

    fn on_violation(&mut self, alert: &ViolationAlert) -> Result<()> {
        self.store
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))?
            .insert_violation(alert)?;
        self.registry
            .broadcast(&self.session_id, &WireMessage::Violation(alert.clone()));
        if self.auto_ticket && warrants_ticket(alert.severity) {
            file_ticket_out_of_band(self.store.clone(), self.filer.clone(), alert.clone());
        }
        Ok(())
    }

    fn on_progress(&mut self, current_s: f64, total_s: f64, frame_index: u64) -> Result<()> {
        self.registry.broadcast(
            &self.session_id,
            &WireMessage::progress(current_s, total_s, frame_index),
        );
        Ok(())
    }
}

fn file_ticket_out_of_band(store: SharedStore, filer: SharedFiler, alert: ViolationAlert) {
    std::thread::spawn(move || {
        let filed = filer
            .lock()
            .map_err(|_| anyhow!("ticket filer lock poisoned"))
            .and_then(|mut filer| filer.file(&alert));
        match filed {
            Ok(Some(ticket_id)) => {
                let attached = store
                    .lock()
                    .map_err(|_| anyhow!("session store lock poisoned"))
                    .and_then(|mut store| store.attach_ticket(&alert.alert_id, &ticket_id));
                if let Err(err) = attached {
                    log::error!(
                        "ticket {} filed but not attached to {}: {:#}",
                        ticket_id,
                        alert.alert_id,
                        err
                    );
                }
            }
            Ok(None) => {
                log::warn!("ticket filer declined alert {}", alert.alert_id);
            }
            Err(err) => {
                log::error!("ticket filing failed for {}: {:#}", alert.alert_id, err);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::{ScriptedRecognizer, StaticMapper, Severity};
    use crate::store::InMemorySessionStore;
    use crate::ticket::SimulatedTicketFiler;
    use std::time::Duration;

    struct SilentCollaborators;

    impl CollaboratorFactory for SilentCollaborators {
        fn recognizer(&self) -> Box<dyn HazardRecognizer> {
            Box::new(ScriptedRecognizer::silent())
        }

        fn mapper(&self) -> Box<dyn RegulationMapper> {
            Box::new(StaticMapper::new(Severity::Medium))
        }
    }

    fn test_manager(data_dir: std::path::PathBuf) -> MonitorManager {
        MonitorManager::new(
            MonitorConfig {
                pacing: Duration::ZERO,
                data_dir,
                ..MonitorConfig::default()
            },
            Arc::new(Mutex::new(InMemorySessionStore::new())),
            Arc::new(BroadcastRegistry::new()),
            Arc::new(SilentCollaborators),
            Arc::new(Mutex::new(SimulatedTicketFiler)),
        )
    }

    #[test]
    fn control_requests_against_unknown_sessions_fail() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path().to_path_buf());
        assert!(manager.pause("missing").is_err());
        assert!(manager.resume("missing").is_err());
        assert!(manager.stop("missing").is_err());
        assert!(!manager.is_active("missing"));
    }

    #[test]
    fn start_rejects_bad_requests_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path().to_path_buf());
        assert!(manager
            .start(StartRequest {
                source_path: "  ".into(),
                analysis_interval_s: None,
                auto_ticket: false,
            })
            .is_err());
        assert!(manager
            .start(StartRequest {
                source_path: "stub://yard".into(),
                analysis_interval_s: Some(0.0),
                auto_ticket: false,
            })
            .is_err());
    }
}

//! Registry of live sessions sharing one model.
//!
//! Sessions are independent: each sits behind its own lock, so calls on
//! different sessions run in parallel while calls on one session are
//! serialized. What a second concurrent call on a busy session does is set
//! by [`BusyPolicy`]. Cancellation never waits for the session lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};

use rayon::prelude::*;
use tokio::sync::mpsc;
use tracing::debug;

use configforge_config::{BusyPolicy, EngineConfig};
use configforge_core::{ConfigForgeError, InstanceId, Result, SessionId, Value};
use configforge_engine::{DiagnosticsSink, Solver};
use configforge_model::Model;

use crate::context::Context;
use crate::session::{AssignResult, RelationOption, Session, SessionEvent};
use crate::visible::VisibleState;

struct SessionSlot {
    session: Mutex<Session>,
    cancel: Arc<AtomicBool>,
}

pub struct SessionManager {
    model: Arc<Model>,
    config: EngineConfig,
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(model: Arc<Model>, config: EngineConfig) -> Self {
        Self {
            model,
            config,
            sinks: Vec::new(),
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attaches a diagnostics sink to every session opened afterwards.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens a session and runs its initial solve.
    pub fn open(&self, context: &Context) -> Result<SessionId> {
        let id = self.allocate();
        let session = self.build(id, context)?;
        self.insert(session)?;
        Ok(id)
    }

    /// Opens one session per context, solving them in parallel. Results are
    /// in context order.
    pub fn open_many(&self, contexts: &[Context]) -> Vec<Result<SessionId>> {
        let ids: Vec<SessionId> = contexts.iter().map(|_| self.allocate()).collect();
        let built: Vec<Result<Session>> = contexts
            .par_iter()
            .zip(ids.par_iter())
            .map(|(context, id)| self.build(*id, context))
            .collect();
        built
            .into_iter()
            .map(|session| {
                let session = session?;
                let id = session.id();
                self.insert(session)?;
                Ok(id)
            })
            .collect()
    }

    /// Runs `f` on a session under its lock. A cancel that arrives while
    /// `f` runs does not outlive it.
    pub fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let slot = self.slot(id)?;
        let run = |session: &mut Session| {
            let result = f(session);
            slot.cancel.store(false, Ordering::SeqCst);
            result
        };
        match self.config.session.busy_policy {
            BusyPolicy::Reject => match slot.session.try_lock() {
                Ok(mut session) => run(&mut session),
                Err(TryLockError::WouldBlock) => {
                    debug!(event = "session_busy", session = %id);
                    Err(ConfigForgeError::SessionBusy(id))
                }
                Err(TryLockError::Poisoned(_)) => Err(poisoned(id)),
            },
            BusyPolicy::Block => {
                let mut session = slot.session.lock().map_err(|_| poisoned(id))?;
                run(&mut session)
            }
        }
    }

    pub fn assign(
        &self,
        id: SessionId,
        instance: InstanceId,
        variable: &str,
        value: impl Into<Value>,
    ) -> Result<AssignResult> {
        let value = value.into();
        self.with_session(id, |session| session.assign(instance, variable, value))
    }

    pub fn clear(&self, id: SessionId, instance: InstanceId, variable: &str) -> Result<AssignResult> {
        self.with_session(id, |session| session.clear(instance, variable))
    }

    pub fn select_relation_option(
        &self,
        id: SessionId,
        instance: InstanceId,
        relation: &str,
        option: impl Into<RelationOption>,
        quantity: u32,
    ) -> Result<AssignResult> {
        let option = option.into();
        self.with_session(id, |session| {
            session.select_relation_option(instance, relation, option, quantity)
        })
    }

    pub fn deselect(&self, id: SessionId, instance: InstanceId) -> Result<AssignResult> {
        self.with_session(id, |session| session.deselect(instance))
    }

    pub fn set_quantity(&self, id: SessionId, instance: InstanceId, quantity: u32) -> Result<AssignResult> {
        self.with_session(id, |session| session.set_quantity(instance, quantity))
    }

    pub fn visible_state(&self, id: SessionId) -> Result<VisibleState> {
        self.with_session(id, |session| Ok(session.visible_state().clone()))
    }

    pub fn subscribe(&self, id: SessionId) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        self.with_session(id, |session| Ok(session.subscribe()))
    }

    /// Cancels the call in flight on a session. An idle session is left
    /// as it is, so the cancel never reaches a later edit.
    pub fn cancel(&self, id: SessionId) -> Result<()> {
        let slot = self.slot(id)?;
        match slot.session.try_lock() {
            Ok(_) => debug!(event = "cancel_idle", session = %id),
            Err(TryLockError::WouldBlock) => slot.cancel.store(true, Ordering::SeqCst),
            Err(TryLockError::Poisoned(_)) => return Err(poisoned(id)),
        }
        Ok(())
    }

    /// Removes a session, waiting for its in-flight call to finish.
    pub fn close(&self, id: SessionId) -> Result<()> {
        let slot = self
            .sessions
            .write()
            .map_err(|_| table_poisoned())?
            .remove(&id)
            .ok_or(ConfigForgeError::UnknownSession(id))?;
        let mut session = slot.session.lock().map_err(|_| poisoned(id))?;
        session.close();
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().map_or(0, |sessions| sessions.len())
    }

    /// Ids of the live sessions, ascending.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .read()
            .map(|sessions| sessions.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn allocate(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn build(&self, id: SessionId, context: &Context) -> Result<Session> {
        let mut solver = Solver::new(Arc::clone(&self.model), self.config.clone());
        for sink in &self.sinks {
            solver.add_sink(Arc::clone(sink));
        }
        Session::open_with(id, solver, context)
    }

    fn insert(&self, session: Session) -> Result<()> {
        let id = session.id();
        let slot = SessionSlot {
            cancel: session.cancel_flag(),
            session: Mutex::new(session),
        };
        self.sessions
            .write()
            .map_err(|_| table_poisoned())?
            .insert(id, Arc::new(slot));
        Ok(())
    }

    fn slot(&self, id: SessionId) -> Result<Arc<SessionSlot>> {
        self.sessions
            .read()
            .map_err(|_| table_poisoned())?
            .get(&id)
            .cloned()
            .ok_or(ConfigForgeError::UnknownSession(id))
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("root", &self.model.type_def(self.model.root()).name)
            .field("sessions", &self.session_count())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

fn poisoned(id: SessionId) -> ConfigForgeError {
    ConfigForgeError::Internal(format!("{id} lock poisoned"))
}

fn table_poisoned() -> ConfigForgeError {
    ConfigForgeError::Internal("session table lock poisoned".to_string())
}

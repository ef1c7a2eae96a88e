//! Session Manager (spec §4.7): owns sessions and the subagents spawned
//! within them, and tears both down together via `stop_session`.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;

use crate::agent::supervisor::AgentSupervisor;
use crate::agent::AgentHandle;
use crate::types::{AgentId, SessionId};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session `{0}` not found")]
    NotFound(SessionId),
}

/// Arbitrary per-session settings (spec §3, Session); kept opaque here since
/// interpretation is entirely caller-defined.
pub type SessionSettings = serde_json::Value;

#[derive(Clone, Debug, Serialize)]
pub struct SubagentRecord {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub agent_type: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

struct SessionRecord {
    user_id: String,
    settings: SessionSettings,
    created_at: chrono::DateTime<chrono::Utc>,
    subagents: Vec<SubagentRecord>,
}

/// Owns the `sessions` and `subagents` maps (spec §4.7). Subagent processes
/// themselves are owned by an [`AgentSupervisor`]; this manager only holds
/// weak-reference-style bookkeeping records and drives shutdown order.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<FxHashMap<SessionId, SessionRecord>>>,
    supervisor: AgentSupervisor,
}

impl SessionManager {
    #[must_use]
    pub fn new(supervisor: AgentSupervisor) -> Self {
        Self { sessions: Arc::new(RwLock::new(FxHashMap::default())), supervisor }
    }

    #[must_use]
    pub fn create_session(&self, session_id: SessionId, user_id: impl Into<String>, settings: SessionSettings) {
        self.sessions.write().insert(
            session_id,
            SessionRecord { user_id: user_id.into(), settings, created_at: chrono::Utc::now(), subagents: Vec::new() },
        );
    }

    /// Reinsert a session record from a recovered snapshot (spec §4.15,
    /// `sessions` component), preserving its original `created_at`. Its
    /// subagents are not restored: the processes they pointed to are gone
    /// with the crash, and reattaching to new ones is the caller's job.
    pub fn restore_session(
        &self,
        session_id: SessionId,
        user_id: impl Into<String>,
        settings: SessionSettings,
        created_at: chrono::DateTime<chrono::Utc>,
    ) {
        self.sessions.write().insert(session_id, SessionRecord { user_id: user_id.into(), settings, created_at, subagents: Vec::new() });
    }

    pub fn record_subagent(&self, session_id: &SessionId, agent_id: AgentId, agent_type: impl Into<String>) -> Result<(), SessionError> {
        let mut guard = self.sessions.write();
        let record = guard.get_mut(session_id).ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        record.subagents.push(SubagentRecord {
            agent_id,
            session_id: session_id.clone(),
            agent_type: agent_type.into(),
            started_at: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Called when a subagent's supervised actor terminates without an
    /// explicit `stop_session` in progress: records the cause and drops the
    /// bookkeeping entry (spec §4.7 "on monitor-down").
    pub fn on_subagent_down(&self, session_id: &SessionId, agent_id: &AgentId, cause: &str) {
        if let Some(record) = self.sessions.write().get_mut(session_id) {
            record.subagents.retain(|s| &s.agent_id != agent_id);
        }
        tracing::info!(%session_id, %agent_id, cause, "subagent terminated");
    }

    #[must_use]
    pub fn list_session_subagents(&self, session_id: &SessionId) -> Vec<SubagentRecord> {
        self.sessions.read().get(session_id).map(|r| r.subagents.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn session_metadata(&self, session_id: &SessionId) -> Option<(String, SessionSettings, chrono::DateTime<chrono::Utc>)> {
        self.sessions.read().get(session_id).map(|r| (r.user_id.clone(), r.settings.clone(), r.created_at))
    }

    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionId> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Terminate every subagent belonging to `session_id`, then drop the
    /// session record itself (spec §4.7). Subagents are stopped through the
    /// supervisor so restart policy is honoured up to the point of shutdown.
    pub async fn stop_session(&self, session_id: &SessionId) -> Result<Vec<AgentHandle>, SessionError> {
        let subagents = {
            let guard = self.sessions.read();
            guard.get(session_id).ok_or_else(|| SessionError::NotFound(session_id.clone()))?.subagents.clone()
        };

        let mut stopped = Vec::with_capacity(subagents.len());
        for sub in &subagents {
            if let Some(handle) = self.supervisor.handle(&sub.agent_id) {
                handle.shutdown("session ended").await;
                self.supervisor.forget(&sub.agent_id);
                stopped.push(handle);
            }
        }

        self.sessions.write().remove(session_id);
        Ok(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;

    #[test]
    fn record_and_list_subagents_round_trips() {
        let bus = EventBus::default();
        let manager = SessionManager::new(AgentSupervisor::new(bus.get_emitter()));
        let session_id = SessionId::new("s-1");
        manager.create_session(session_id.clone(), "user-1", serde_json::json!({}));
        manager.record_subagent(&session_id, AgentId::new("a-1"), "coder").unwrap();

        let subs = manager.list_session_subagents(&session_id);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].agent_type, "coder");
    }

    #[test]
    fn restore_session_reinserts_a_session_with_its_original_timestamp() {
        let bus = EventBus::default();
        let manager = SessionManager::new(AgentSupervisor::new(bus.get_emitter()));
        let session_id = SessionId::new("s-3");
        let created_at = chrono::Utc::now() - chrono::Duration::hours(2);
        manager.restore_session(session_id.clone(), "user-9", serde_json::json!({"theme": "dark"}), created_at);

        let (user_id, settings, restored_at) = manager.session_metadata(&session_id).unwrap();
        assert_eq!(user_id, "user-9");
        assert_eq!(settings, serde_json::json!({"theme": "dark"}));
        assert_eq!(restored_at, created_at);
    }

    #[test]
    fn on_subagent_down_removes_the_record() {
        let bus = EventBus::default();
        let manager = SessionManager::new(AgentSupervisor::new(bus.get_emitter()));
        let session_id = SessionId::new("s-2");
        manager.create_session(session_id.clone(), "user-1", serde_json::json!({}));
        manager.record_subagent(&session_id, AgentId::new("a-2"), "reviewer").unwrap();

        manager.on_subagent_down(&session_id, &AgentId::new("a-2"), "crashed");
        assert!(manager.list_session_subagents(&session_id).is_empty());
    }
}

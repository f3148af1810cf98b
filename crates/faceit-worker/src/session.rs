//! Client sessions. A session groups jobs and runs at most one at a time.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use faceit_models::{JobId, JobStatus, SessionId};

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Ready,
    Processing,
    /// Last job failed
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub current_job: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: SessionStatus::Ready,
            current_job: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn age(&self) -> Option<Duration> {
        (Utc::now() - self.created_at).to_std().ok()
    }
}

/// Partial update; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub current_job: Option<Option<JobId>>,
}

/// In-memory session registry.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> SessionId {
        let id = SessionId::new();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Session::new(id.clone()));
        debug!(session_id = %id, "Session created");
        id
    }

    pub async fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn update(&self, id: &SessionId, update: SessionUpdate) -> WorkerResult<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| WorkerError::SessionNotFound(id.clone()))?;
        if let Some(status) = update.status {
            session.status = status;
        }
        if let Some(current_job) = update.current_job {
            session.current_job = current_job;
        }
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    pub async fn delete(&self, id: &SessionId) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Claim the session for `job_id`.
    ///
    /// Fails with [`WorkerError::SessionBusy`] while another job of the same
    /// session is in flight.
    pub async fn begin_job(&self, id: &SessionId, job_id: &JobId) -> WorkerResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| WorkerError::SessionNotFound(id.clone()))?;

        if session.status == SessionStatus::Processing {
            if let Some(current) = &session.current_job {
                return Err(WorkerError::SessionBusy {
                    session_id: id.clone(),
                    job_id: current.clone(),
                });
            }
        }

        session.status = SessionStatus::Processing;
        session.current_job = Some(job_id.clone());
        session.updated_at = Utc::now();
        Ok(())
    }

    /// Release the session after `job_id` reached `status`.
    ///
    /// Ignored if the session has moved on to another job.
    pub async fn finish_job(&self, id: &SessionId, job_id: &JobId, status: JobStatus) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        if session.current_job.as_ref() != Some(job_id) {
            return;
        }
        session.status = if status == JobStatus::Failed {
            SessionStatus::Error
        } else {
            SessionStatus::Ready
        };
        session.current_job = None;
        session.updated_at = Utc::now();
    }

    /// Remove sessions older than `max_age`, returning their ids.
    pub async fn sweep(&self, max_age: Duration) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|s| s.age().is_some_and(|age| age >= max_age))
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            info!("Expired {} sessions", expired.len());
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_delete() {
        let sessions = SessionManager::new();
        let id = sessions.create().await;

        let session = sessions.get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Ready);
        assert!(session.current_job.is_none());

        assert!(sessions.delete(&id).await);
        assert!(!sessions.delete(&id).await);
        assert!(sessions.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_one_job_per_session() {
        let sessions = SessionManager::new();
        let id = sessions.create().await;
        let first = JobId::from_string("first");
        let second = JobId::from_string("second");

        sessions.begin_job(&id, &first).await.unwrap();
        let err = sessions.begin_job(&id, &second).await.unwrap_err();
        assert!(matches!(err, WorkerError::SessionBusy { ref job_id, .. } if *job_id == first));

        // A stale finish for another job does not release the session
        sessions.finish_job(&id, &second, JobStatus::Completed).await;
        assert!(sessions.begin_job(&id, &second).await.is_err());

        sessions.finish_job(&id, &first, JobStatus::Failed).await;
        assert_eq!(sessions.get(&id).await.unwrap().status, SessionStatus::Error);
        sessions.begin_job(&id, &second).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_unknown_session() {
        let sessions = SessionManager::new();
        let err = sessions
            .update(&SessionId::from_string("nope"), SessionUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_update_fields() {
        let sessions = SessionManager::new();
        let id = sessions.create().await;
        let job = JobId::from_string("j");

        let updated = sessions
            .update(
                &id,
                SessionUpdate {
                    status: Some(SessionStatus::Processing),
                    current_job: Some(Some(job.clone())),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Processing);
        assert_eq!(updated.current_job, Some(job));
        assert!(updated.updated_at >= updated.created_at);
    }

    #[tokio::test]
    async fn test_sweep_by_age() {
        let sessions = SessionManager::new();
        let id = sessions.create().await;

        assert!(sessions.sweep(Duration::from_secs(3600)).await.is_empty());
        assert_eq!(sessions.sweep(Duration::ZERO).await, vec![id]);
        assert!(sessions.is_empty().await);
    }
}

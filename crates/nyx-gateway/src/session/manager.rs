//! Session tracking
//!
//! Holds what a shard needs to resume after its socket drops: the session
//! ID from READY, the last dispatch sequence and the resume URL.

use crate::protocol::ResumePayload;

/// Resume state for one shard
#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    invalidated: bool,
}

impl SessionManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly identified session
    pub fn register_session(
        &mut self,
        session_id: impl Into<String>,
        sequence: Option<u64>,
        resume_url: Option<String>,
    ) {
        let session_id = session_id.into();
        tracing::debug!(
            session_id = %session_id,
            sequence = ?sequence,
            resume_url = ?resume_url,
            "Session registered"
        );

        self.session_id = Some(session_id);
        self.sequence = sequence;
        self.resume_url = resume_url;
        self.invalidated = false;
    }

    /// Record a dispatch sequence; older or equal values are ignored
    ///
    /// Returns true if the stored sequence advanced.
    pub fn update_sequence(&mut self, sequence: u64) -> bool {
        match self.sequence {
            Some(current) if sequence <= current => false,
            _ => {
                self.sequence = Some(sequence);
                true
            }
        }
    }

    /// Check whether a Resume handshake may be attempted
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some() && !self.invalidated
    }

    /// Mark the session unusable for resuming
    pub fn invalidate(&mut self) {
        if let Some(id) = &self.session_id {
            tracing::debug!(session_id = %id, "Session invalidated");
        }
        self.invalidated = true;
    }

    /// Forget everything, including the sequence
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Build the Resume payload for the current session
    #[must_use]
    pub fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        if !self.can_resume() {
            return None;
        }
        Some(ResumePayload {
            token: token.to_string(),
            session_id: self.session_id.clone()?,
            seq: self.sequence?,
        })
    }

    /// Session ID assigned by READY
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last observed dispatch sequence
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// URL to reconnect to when resuming
    #[must_use]
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// Whether `invalidate` was called since the last registration
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }
}

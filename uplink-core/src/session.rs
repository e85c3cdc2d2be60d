//! Upload session entity and its forward-only state machine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ObjectKey, PartNumber, PartRecord, Result, UploadError, UploadId};

/// Lifecycle state of one multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    PartsIssued,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }

    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, PartsIssued)
                | (PartsIssued, PartsIssued)
                | (Created, Completed)
                | (PartsIssued, Completed)
                | (Created, Aborted)
                | (PartsIssued, Aborted)
        )
    }
}

/// One in-flight multipart upload.
///
/// The store owns the authoritative session; this is the caller's view of
/// it. `key` and `upload_id` never change after creation and `known_parts`
/// is only ever filled from a store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    key: ObjectKey,
    upload_id: UploadId,
    state: SessionState,
    known_parts: BTreeMap<PartNumber, PartRecord>,
}

impl UploadSession {
    /// Session freshly created by the store
    pub fn created(key: ObjectKey, upload_id: UploadId) -> Self {
        UploadSession {
            key,
            upload_id,
            state: SessionState::Created,
            known_parts: BTreeMap::new(),
        }
    }

    /// Handle on an existing store session named by a request.
    ///
    /// Whether the store still considers it open is only learned from the
    /// store itself.
    pub fn attach(key: Option<&str>, upload_id: Option<&str>) -> Result<Self> {
        let upload_id = upload_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| UploadError::MissingInput("uploadId".to_string()))?;
        let key = key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| UploadError::MissingInput("key".to_string()))?;

        Ok(Self::created(ObjectKey::new(key)?, UploadId::new(upload_id)?))
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn upload_id(&self) -> &UploadId {
        &self.upload_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Fail with `AlreadyFinalized` once the session reached a terminal state
    pub fn ensure_open(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(UploadError::AlreadyFinalized {
                upload_id: self.upload_id.to_string(),
            });
        }
        Ok(())
    }

    /// Move forward to `next`
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        self.ensure_open()?;
        if !self.state.can_advance_to(next) {
            return Err(UploadError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Replace the part inventory with a store listing
    pub fn reconcile(&mut self, parts: &[PartRecord]) {
        self.known_parts = parts
            .iter()
            .map(|part| (part.part_number, part.clone()))
            .collect();
    }

    /// Parts from the latest listing, ordered by part number
    pub fn known_parts(&self) -> impl Iterator<Item = &PartRecord> {
        self.known_parts.values()
    }

    pub fn known_part(&self, part_number: PartNumber) -> Option<&PartRecord> {
        self.known_parts.get(&part_number)
    }

    /// Bytes the store has acknowledged so far
    pub fn uploaded_bytes(&self) -> u64 {
        self.known_parts.values().map(|p| p.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> UploadSession {
        UploadSession::attach(Some("k1"), Some("u1")).unwrap()
    }

    #[test]
    fn attach_requires_key_and_upload_id() {
        let err = UploadSession::attach(Some("k1"), None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MissingInput);
        let err = UploadSession::attach(None, Some("u1")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MissingInput);
        let err = UploadSession::attach(Some(""), Some("u1")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MissingInput);
    }

    #[test]
    fn forward_path_to_completion() {
        let mut s = session();
        assert_eq!(s.state(), SessionState::Created);
        s.advance(SessionState::PartsIssued).unwrap();
        s.advance(SessionState::PartsIssued).unwrap();
        s.advance(SessionState::Completed).unwrap();
        assert_eq!(s.state(), SessionState::Completed);
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [SessionState::Completed, SessionState::Aborted] {
            let mut s = session();
            s.advance(terminal).unwrap();
            for next in [
                SessionState::PartsIssued,
                SessionState::Completed,
                SessionState::Aborted,
            ] {
                let err = s.advance(next).unwrap_err();
                assert_eq!(err.kind(), crate::ErrorKind::AlreadyFinalized);
                assert_eq!(s.state(), terminal);
            }
        }
    }

    #[test]
    fn cannot_move_backwards() {
        let mut s = session();
        s.advance(SessionState::PartsIssued).unwrap();
        let err = s.advance(SessionState::Created).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidTransition);
        assert_eq!(s.state(), SessionState::PartsIssued);
    }

    #[test]
    fn reconcile_replaces_inventory() {
        let mut s = session();
        s.reconcile(&[
            PartRecord {
                part_number: 2,
                size: 5,
                etag: "b".into(),
            },
            PartRecord {
                part_number: 1,
                size: 7,
                etag: "a".into(),
            },
        ]);
        let numbers: Vec<_> = s.known_parts().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(s.uploaded_bytes(), 12);

        s.reconcile(&[PartRecord {
            part_number: 3,
            size: 1,
            etag: "c".into(),
        }]);
        assert!(s.known_part(1).is_none());
        assert_eq!(s.uploaded_bytes(), 1);
    }
}

//! Import session store - process-wide registry of in-flight imports
//!
//! Locking: the map sits behind a read/write lock and each session behind its
//! own mutex. The map lock is never held while waiting on a session mutex
//! (pruning only `try_lock`s), so sessions never block each other.
//! Expiry is checked lazily when a session is touched; there is no sweeper.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, RwLock, TryLockError};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{ColumnMapping, ImportSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Open,
    Consumed,
    Expired,
}

struct SessionSlot {
    session: ImportSession,
    state: SlotState,
}

/// Why a session id is no longer live
#[derive(Debug, Clone, Copy)]
struct Retired {
    state: SlotState,
    at: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionSlot>>>>,
    retired: Mutex<HashMap<String, Retired>>,
    ttl: Duration,
}

fn poisoned(e: impl Display) -> Error {
    Error::Other(format!("Lock poisoned: {}", e))
}

impl SessionStore {
    /// Create a store whose sessions expire after `ttl` without activity
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            retired: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Register a freshly uploaded file and return the new session
    pub fn create(
        &self,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        destination_account_id: Uuid,
    ) -> Result<ImportSession> {
        let now = Utc::now();
        let session = ImportSession {
            session_id: Uuid::new_v4().to_string(),
            headers: Arc::new(headers),
            raw_rows: Arc::new(rows),
            destination_account_id,
            mapping: None,
            created_at: now,
            expires_at: self.deadline(now),
        };

        let mut sessions = self.sessions.write().map_err(poisoned)?;
        self.prune(&mut sessions, now)?;
        sessions.insert(
            session.session_id.clone(),
            Arc::new(Mutex::new(SessionSlot {
                session: session.clone(),
                state: SlotState::Open,
            })),
        );

        Ok(session)
    }

    /// Snapshot of a live session; refreshes its expiry
    pub fn get(&self, session_id: &str) -> Result<ImportSession> {
        self.with_live_slot(session_id, |slot| {
            slot.session.expires_at = self.deadline(Utc::now());
            Ok(slot.session.clone())
        })
    }

    /// Replace the session's mapping (last writer wins)
    pub fn update(&self, session_id: &str, mapping: ColumnMapping) -> Result<ImportSession> {
        self.with_live_slot(session_id, |slot| {
            slot.session.mapping = Some(mapping);
            slot.session.expires_at = self.deadline(Utc::now());
            Ok(slot.session.clone())
        })
    }

    /// Remove the session and hand it to the caller. Succeeds at most once per id.
    pub fn consume(&self, session_id: &str) -> Result<ImportSession> {
        self.consume_with(session_id, |_| Ok(()))
    }

    /// Like `consume`, but only if `check` accepts the session.
    ///
    /// `check` runs under the session's lock, so no mapping update can slip in
    /// between the check and the removal. A failed check leaves the session
    /// in place.
    pub fn consume_with<F>(&self, session_id: &str, check: F) -> Result<ImportSession>
    where
        F: FnOnce(&ImportSession) -> Result<()>,
    {
        let slot = self.slot(session_id)?;
        let mut guard = slot.lock().map_err(poisoned)?;
        self.ensure_live(session_id, &slot, &mut guard)?;

        check(&guard.session)?;

        guard.state = SlotState::Consumed;
        self.retire(session_id, &slot, SlotState::Consumed)?;
        Ok(guard.session.clone())
    }

    /// Number of sessions currently held (expired ones included until touched)
    pub fn active_count(&self) -> Result<usize> {
        Ok(self.sessions.read().map_err(poisoned)?.len())
    }

    fn with_live_slot<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionSlot) -> Result<T>,
    ) -> Result<T> {
        let slot = self.slot(session_id)?;
        let mut guard = slot.lock().map_err(poisoned)?;
        self.ensure_live(session_id, &slot, &mut guard)?;
        f(&mut guard)
    }

    fn slot(&self, session_id: &str) -> Result<Arc<Mutex<SessionSlot>>> {
        let found = self
            .sessions
            .read()
            .map_err(poisoned)?
            .get(session_id)
            .cloned();
        if let Some(slot) = found {
            return Ok(slot);
        }

        let retired = self.retired.lock().map_err(poisoned)?;
        Err(match retired.get(session_id).map(|r| r.state) {
            Some(SlotState::Consumed) => Error::SessionAlreadyConsumed(session_id.to_string()),
            Some(SlotState::Expired) => Error::SessionExpired(session_id.to_string()),
            _ => Error::SessionNotFound(session_id.to_string()),
        })
    }

    /// Fail unless the locked slot is open and unexpired; retires it on expiry
    fn ensure_live(
        &self,
        session_id: &str,
        slot: &Arc<Mutex<SessionSlot>>,
        guard: &mut SessionSlot,
    ) -> Result<()> {
        match guard.state {
            SlotState::Consumed => {
                return Err(Error::SessionAlreadyConsumed(session_id.to_string()))
            }
            SlotState::Expired => return Err(Error::SessionExpired(session_id.to_string())),
            SlotState::Open => {}
        }

        if Utc::now() >= guard.session.expires_at {
            guard.state = SlotState::Expired;
            self.retire(session_id, slot, SlotState::Expired)?;
            return Err(Error::SessionExpired(session_id.to_string()));
        }
        Ok(())
    }

    /// Drop the slot from the map and remember why
    fn retire(
        &self,
        session_id: &str,
        slot: &Arc<Mutex<SessionSlot>>,
        state: SlotState,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(session_id);
        }
        // Recorded before the map lock is released, so a miss in `slot`
        // always finds the marker.
        self.retired.lock().map_err(poisoned)?.insert(
            session_id.to_string(),
            Retired {
                state,
                at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Expiry for a session touched at `now`, saturating at the latest instant
    fn deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Drop expired sessions that nobody is holding and stale retired markers
    fn prune(
        &self,
        sessions: &mut HashMap<String, Arc<Mutex<SessionSlot>>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut retired = self.retired.lock().map_err(poisoned)?;
        retired.retain(|_, r| now - r.at <= self.ttl);

        let mut expired = Vec::new();
        for (id, slot) in sessions.iter() {
            let is_expired = match slot.try_lock() {
                Ok(mut guard) if now >= guard.session.expires_at => {
                    guard.state = SlotState::Expired;
                    true
                }
                Ok(_) | Err(TryLockError::WouldBlock) => false,
                Err(TryLockError::Poisoned(_)) => true,
            };
            if is_expired {
                expired.push(id.clone());
            }
        }

        for id in expired {
            sessions.remove(&id);
            retired.insert(
                id,
                Retired {
                    state: SlotState::Expired,
                    at: now,
                },
            );
        }
        Ok(())
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::storage::{keys, StorageHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Signed-in state handed out by the identity provider. Only the presence of
/// `user` decides whether the remote store is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

impl Session {
    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at
            .map(|at| at <= now.unix_timestamp())
            .unwrap_or(false)
    }
}

/// Token endpoint payload. `expires_at` is not always present, so it is
/// derived from `expires_in` when missing.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

impl TokenResponse {
    pub(crate) fn into_session(self, now: OffsetDateTime) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now.unix_timestamp() + secs));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    ConfirmationRequired { email: String },
}

/// Persists the current session next to the rest of the on-device state.
#[derive(Clone)]
pub struct SessionStore {
    storage: StorageHandle,
}

impl SessionStore {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }

    /// The stored session, if it exists and has not expired.
    pub fn current(&self) -> Result<Option<Session>> {
        let Some(session) = self.storage.read_json::<Session>(keys::SESSION)? else {
            return Ok(None);
        };
        if session.is_expired(OffsetDateTime::now_utc()) {
            tracing::info!("stored session has expired");
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        self.storage.write_json(keys::SESSION, session)
    }

    pub fn clear(&self) -> Result<bool> {
        self.storage.remove_key(keys::SESSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::init_storage;
    use time::macros::datetime;

    fn session(expires_at: Option<i64>) -> Session {
        Session {
            access_token: "token".into(),
            refresh_token: Some("refresh".into()),
            expires_at,
            user: Some(SessionUser {
                id: "user-1".into(),
                email: Some("me@example.com".into()),
            }),
        }
    }

    #[test]
    fn token_response_derives_expiry_from_expires_in() -> anyhow::Result<()> {
        let now = datetime!(2024-05-01 12:00 UTC);
        let raw = r#"{"access_token":"abc","token_type":"bearer","expires_in":3600,
                      "refresh_token":"r","user":{"id":"u1","email":"a@b.c","role":"authenticated"}}"#;
        let response: TokenResponse = serde_json::from_str(raw)?;
        let session = response.into_session(now);
        assert_eq!(session.expires_at, Some(now.unix_timestamp() + 3600));
        assert_eq!(session.user().map(|u| u.id.as_str()), Some("u1"));
        Ok(())
    }

    #[test]
    fn store_round_trips_and_clears() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let store = SessionStore::new(storage);
        assert_eq!(store.current()?, None);

        let valid = session(Some(OffsetDateTime::now_utc().unix_timestamp() + 600));
        store.save(&valid)?;
        assert_eq!(store.current()?, Some(valid));

        assert!(store.clear()?);
        assert_eq!(store.current()?, None);
        Ok(())
    }

    #[test]
    fn expired_sessions_are_ignored() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let store = SessionStore::new(storage);
        store.save(&session(Some(1)))?;
        assert_eq!(store.current()?, None);

        store.save(&session(None))?;
        assert!(store.current()?.is_some(), "sessions without expiry stay valid");
        Ok(())
    }
}

//! Client for the hosted backend: a PostgREST-style table API for entries and
//! a password-grant auth API. Retries are deliberately absent; callers fall
//! back to local storage instead.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::model::{DiaryEntry, Mood};

mod auth;
mod error;

pub use auth::{Session, SessionStore, SessionUser, SignUpOutcome};
pub use error::{RemoteError, RemoteResult};

use auth::TokenResponse;

const MAX_LOG_BODY_CHARS: usize = 512;

/// Row shape of the remote entries table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntryRow {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mood: Option<Mood>,
    #[serde(default)]
    pub book_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl RemoteEntryRow {
    pub fn from_entry(entry: &DiaryEntry, user_id: Option<&str>) -> Self {
        Self {
            id: entry.id.clone(),
            date: entry.date,
            content: entry.content.clone(),
            mood: entry.mood,
            book_id: entry.book_id.clone(),
            user_id: user_id.map(str::to_string),
            created_at: entry.created_at,
            updated_at: Some(OffsetDateTime::now_utc()),
        }
    }
}

impl From<RemoteEntryRow> for DiaryEntry {
    fn from(row: RemoteEntryRow) -> Self {
        DiaryEntry {
            id: row.id,
            date: row.date,
            content: row.content,
            mood: row.mood,
            book_id: row.book_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    base_url: String,
    anon_key: String,
    table: String,
    access_token: Option<String>,
}

impl RemoteClient {
    /// Builds a client when credentials are present. Missing credentials are
    /// not an error: the app keeps working against local storage.
    pub fn from_config(config: &RemoteConfig) -> RemoteResult<Option<Self>> {
        if !config.is_configured() {
            tracing::warn!("remote credentials not found, cloud features disabled");
            return Ok(None);
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Some(Self {
            http,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            anon_key: config.anon_key.trim().to_string(),
            table: config.table.clone(),
            access_token: None,
        }))
    }

    /// Requests made afterwards act on behalf of the session's user.
    pub fn with_session(mut self, session: Option<&Session>) -> Self {
        self.access_token = session.map(|s| s.access_token.clone());
        self
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn headers(&self) -> RemoteResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key).map_err(|_| RemoteError::InvalidHeader("apikey"))?,
        );
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {bearer}"))
                .map_err(|_| RemoteError::InvalidHeader("authorization"))?,
        );
        Ok(headers)
    }

    /// Table rows are private to their owner, so table calls need a user token.
    fn require_session(&self) -> RemoteResult<()> {
        if self.access_token.is_none() {
            return Err(RemoteError::NoSession);
        }
        Ok(())
    }

    fn send(&self, request: RequestBuilder) -> RemoteResult<String> {
        let response = request.headers(self.headers()?).send()?;
        Self::read_body(response)
    }

    fn read_body(response: Response) -> RemoteResult<String> {
        let status = response.status();
        let body = response.text()?;
        if status.is_success() {
            debug!(%status, "remote response");
            return Ok(body);
        }
        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!(%status, body = %preview, "remote error response");
        Err(RemoteError::http(status.as_u16(), error_message(&body)))
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &str) -> RemoteResult<T> {
        serde_json::from_str(body).map_err(|err| RemoteError::Decode(err.to_string()))
    }

    /// Upsert by id; rows that already exist are merged rather than
    /// duplicated. Concurrent writers to the same id resolve last-write-wins.
    pub fn upsert_entries(&self, rows: &[RemoteEntryRow]) -> RemoteResult<Vec<RemoteEntryRow>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.require_session()?;
        debug!(count = rows.len(), "upserting remote entries");
        let body = self.send(
            self.http
                .post(self.table_url())
                .header("Prefer", "resolution=merge-duplicates,return=representation")
                .json(rows),
        )?;
        Self::decode(&body)
    }

    pub fn select_entries(&self) -> RemoteResult<Vec<RemoteEntryRow>> {
        self.require_session()?;
        let url = Url::parse_with_params(
            &self.table_url(),
            &[("select", "*"), ("order", "date.desc")],
        )
        .map_err(|err| RemoteError::Decode(err.to_string()))?;
        debug!(%url, "selecting remote entries");
        let body = self.send(self.http.get(url))?;
        Self::decode(&body)
    }

    pub fn delete_entry(&self, id: &str) -> RemoteResult<()> {
        self.require_session()?;
        let url = Url::parse_with_params(&self.table_url(), &[("id", format!("eq.{id}"))])
            .map_err(|err| RemoteError::Decode(err.to_string()))?;
        debug!(%url, "deleting remote entry");
        self.send(self.http.delete(url))?;
        Ok(())
    }

    pub fn sign_in(&self, email: &str, password: &str) -> RemoteResult<Session> {
        let body = self.send(
            self.http
                .post(self.auth_url("token?grant_type=password"))
                .json(&Credentials { email, password }),
        )?;
        let token: TokenResponse = Self::decode(&body)?;
        Ok(token.into_session(OffsetDateTime::now_utc()))
    }

    pub fn sign_up(&self, email: &str, password: &str) -> RemoteResult<SignUpOutcome> {
        let body = self.send(
            self.http
                .post(self.auth_url("signup"))
                .json(&Credentials { email, password }),
        )?;
        parse_sign_up(&body, email)
    }

    pub fn sign_out(&self, session: &Session) -> RemoteResult<()> {
        let client = self.clone().with_session(Some(session));
        client.send(client.http.post(client.auth_url("logout")))?;
        Ok(())
    }
}

/// Sign-up answers with a full token payload when e-mail confirmation is off,
/// and with the pending user otherwise.
fn parse_sign_up(body: &str, email: &str) -> RemoteResult<SignUpOutcome> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|err| RemoteError::Decode(err.to_string()))?;
    if value.get("access_token").is_some() {
        let token: TokenResponse =
            serde_json::from_value(value).map_err(|err| RemoteError::Decode(err.to_string()))?;
        return Ok(SignUpOutcome::SignedIn(
            token.into_session(OffsetDateTime::now_utc()),
        ));
    }
    Ok(SignUpOutcome::ConfirmationRequired {
        email: email.to_string(),
    })
}

fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        msg: Option<String>,
        #[serde(default)]
        error_description: Option<String>,
        #[serde(default)]
        error: Option<String>,
    }
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed
            .error_description
            .or(parsed.msg)
            .or(parsed.message)
            .or(parsed.error)
        {
            return message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "request failed".to_string()
    } else {
        trimmed.chars().take(MAX_LOG_BODY_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use time::macros::datetime;

    fn configured() -> RemoteConfig {
        RemoteConfig {
            url: "https://demo.supabase.co/".into(),
            anon_key: "anon-key".into(),
            ..RemoteConfig::default()
        }
    }

    #[test]
    fn missing_credentials_disable_the_client() -> anyhow::Result<()> {
        assert!(RemoteClient::from_config(&RemoteConfig::default())?.is_none());
        assert!(RemoteClient::from_config(&configured())?.is_some());
        Ok(())
    }

    #[test]
    fn urls_trim_trailing_slash() -> anyhow::Result<()> {
        let client = RemoteClient::from_config(&configured())?.expect("configured");
        assert_eq!(client.table_url(), "https://demo.supabase.co/rest/v1/diary_entries");
        assert_eq!(
            client.auth_url("signup"),
            "https://demo.supabase.co/auth/v1/signup"
        );
        Ok(())
    }

    #[test]
    fn bearer_switches_to_session_token() -> anyhow::Result<()> {
        let client = RemoteClient::from_config(&configured())?.expect("configured");
        let headers = client.headers()?;
        assert_eq!(headers["apikey"], "anon-key");
        assert_eq!(headers[AUTHORIZATION], "Bearer anon-key");

        let session = Session {
            access_token: "user-jwt".into(),
            refresh_token: None,
            expires_at: None,
            user: None,
        };
        let headers = client.with_session(Some(&session)).headers()?;
        assert_eq!(headers[AUTHORIZATION], "Bearer user-jwt");
        Ok(())
    }

    #[test]
    fn table_calls_need_a_signed_in_user() -> anyhow::Result<()> {
        let client = RemoteClient::from_config(&configured())?.expect("configured");
        assert_matches!(client.select_entries(), Err(RemoteError::NoSession));
        assert_matches!(client.delete_entry("1"), Err(RemoteError::NoSession));
        let row = RemoteEntryRow::from_entry(&DiaryEntry::new(None), None);
        assert_matches!(client.upsert_entries(&[row]), Err(RemoteError::NoSession));
        assert!(client.upsert_entries(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn rows_use_snake_case_columns() -> anyhow::Result<()> {
        let mut entry = DiaryEntry::new(Some("book-1".into())).with_mood(Some(Mood::Excited));
        entry.date = datetime!(2024-02-03 04:05:06 UTC);
        let row = RemoteEntryRow::from_entry(&entry, Some("user-1"));
        let json = serde_json::to_value(&row)?;
        assert_eq!(json["book_id"], "book-1");
        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["mood"], 2);
        assert!(json.get("created_at").is_none());

        let back = DiaryEntry::from(row);
        assert_eq!(back.id, entry.id);
        assert_eq!(back.book_id, entry.book_id);
        assert_eq!(back.date, entry.date);
        Ok(())
    }

    #[test]
    fn rows_decode_postgres_timestamps() -> anyhow::Result<()> {
        let raw = r#"[{"id":"17","date":"2024-02-03T04:05:06.123456+00:00","content":"x",
                       "mood":null,"book_id":null,"user_id":"u","created_at":"2024-02-03T04:05:06+00:00",
                       "updated_at":"2024-02-03T04:05:07+00:00"}]"#;
        let rows: Vec<RemoteEntryRow> = RemoteClient::decode(raw)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mood, None);
        assert_eq!(rows[0].date, datetime!(2024-02-03 04:05:06.123456 UTC));
        Ok(())
    }

    #[test]
    fn error_messages_prefer_provider_fields() {
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(r#"{"code":"42501","message":"permission denied"}"#), "permission denied");
        assert_eq!(error_message(""), "request failed");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn sign_up_distinguishes_pending_confirmation() -> anyhow::Result<()> {
        let pending = parse_sign_up(r#"{"id":"u1","email":"a@b.c"}"#, "a@b.c")?;
        assert_matches!(pending, SignUpOutcome::ConfirmationRequired { ref email } if email == "a@b.c");

        let signed_in = parse_sign_up(
            r#"{"access_token":"t","expires_in":60,"user":{"id":"u1"}}"#,
            "a@b.c",
        )?;
        assert_matches!(signed_in, SignUpOutcome::SignedIn(session) if session.access_token == "t");
        Ok(())
    }
}

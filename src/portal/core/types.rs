//! Core data structures shared by the form extractor, classifier and session client.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Name of the hidden field carrying the server-issued cipher nonce.
pub const LOGIN_KEY_FIELD: &str = "login_key";
/// Name of the computed ciphertext field.
pub const ENCRYPT_PWD_FIELD: &str = "encrypt_pwd";
pub const USERNAME_FIELD: &str = "username";
pub const PASSWORD_FIELD: &str = "password";

/// Why a pair of credentials was refused before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialsError {
    #[error("username is empty")]
    EmptyUsername,
    #[error("password is empty")]
    EmptyPassword,
}

/// Portal account credentials for a single attempt.
///
/// Fields are private so the non-empty invariant established by
/// [`Credentials::new`] holds for every value in circulation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let username = username.into();
        let password = password.into();

        if username.trim().is_empty() {
            return Err(CredentialsError::EmptyUsername);
        }
        if password.is_empty() {
            return Err(CredentialsError::EmptyPassword);
        }

        Ok(Self { username, password })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Hidden `<input>` values in document order.
///
/// Re-inserting an existing name replaces its value but keeps the original
/// position, mirroring how a browser serialises duplicate form controls when
/// the later one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiddenFields {
    entries: Vec<(String, String)>,
}

impl HiddenFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn into_vec(self) -> Vec<(String, String)> {
        self.entries
    }
}

/// Login form scraped from a rollcall/login page.
#[derive(Debug, Clone)]
pub struct LoginForm {
    pub action: Url,
    pub hidden_fields: HiddenFields,
}

impl LoginForm {
    pub fn login_key(&self) -> Option<&str> {
        self.hidden_fields.get(LOGIN_KEY_FIELD)
    }

    /// Merge scraped hidden fields with the computed and plaintext fields.
    ///
    /// `encrypt_pwd` must come from this form's own `login_key`.
    pub fn into_submission(self, credentials: &Credentials, encrypt_pwd: String) -> FormSubmission {
        let mut fields = self.hidden_fields;
        fields.insert(ENCRYPT_PWD_FIELD, encrypt_pwd);
        fields.insert(USERNAME_FIELD, credentials.username());
        fields.insert(PASSWORD_FIELD, credentials.password());

        FormSubmission {
            url: self.action,
            fields: fields.into_vec(),
        }
    }
}

/// Planned login POST.
#[derive(Clone)]
pub struct FormSubmission {
    pub url: Url,
    pub fields: Vec<(String, String)>,
}

impl FormSubmission {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for FormSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("FormSubmission")
            .field("url", &self.url.as_str())
            .field("fields", &names)
            .finish()
    }
}

/// Terminal verdict of a rollcall attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollcallOutcome {
    Success,
    AlreadyEnded,
    NeedsRescan,
    LoginFailed,
    Undetermined,
}

impl RollcallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollcallOutcome::Success => "success",
            RollcallOutcome::AlreadyEnded => "already_ended",
            RollcallOutcome::NeedsRescan => "needs_rescan",
            RollcallOutcome::LoginFailed => "login_failed",
            RollcallOutcome::Undetermined => "undetermined",
        }
    }
}

impl fmt::Display for RollcallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result handed back to the caller once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollcallResult {
    pub outcome: RollcallOutcome,
    pub message: String,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl RollcallResult {
    pub fn new(outcome: RollcallOutcome, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            outcome,
            message: message.into(),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RollcallOutcome::Success
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_reject_empty_values() {
        assert_eq!(Credentials::new("", "pw").unwrap_err(), CredentialsError::EmptyUsername);
        assert_eq!(Credentials::new("   ", "pw").unwrap_err(), CredentialsError::EmptyUsername);
        assert_eq!(Credentials::new("user", "").unwrap_err(), CredentialsError::EmptyPassword);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("c110152", "hunter2").unwrap();
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("c110152"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn hidden_fields_keep_first_position_and_last_value() {
        let mut fields = HiddenFields::new();
        fields.insert("login_key", "old");
        fields.insert("reurl", "/home");
        fields.insert("login_key", "new");

        let collected: Vec<_> = fields.iter().collect();
        assert_eq!(collected, vec![("login_key", "new"), ("reurl", "/home")]);
    }

    #[test]
    fn submission_overrides_scraped_credentials_fields() {
        let mut hidden = HiddenFields::new();
        hidden.insert("login_key", "XYZ123");
        hidden.insert("encrypt_pwd", "");
        hidden.insert("username", "");

        let form = LoginForm {
            action: Url::parse("https://portal.test/login.php").unwrap(),
            hidden_fields: hidden,
        };
        let creds = Credentials::new("alice", "pw").unwrap();
        let submission = form.into_submission(&creds, "CIPHER".into());

        assert_eq!(submission.field("login_key"), Some("XYZ123"));
        assert_eq!(submission.field("encrypt_pwd"), Some("CIPHER"));
        assert_eq!(submission.field("username"), Some("alice"));
        assert_eq!(submission.field("password"), Some("pw"));
        assert_eq!(submission.fields.len(), 4);
        assert!(!format!("{submission:?}").contains("CIPHER"));
    }

    #[test]
    fn result_serializes_elapsed_as_millis() {
        let result = RollcallResult::new(
            RollcallOutcome::AlreadyEnded,
            "closed",
            Duration::from_millis(1500),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "already_ended");
        assert_eq!(json["elapsed_ms"], 1500);
    }
}

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Bearer token issued by the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential(<redacted>)")
    }
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

/// Username/password pair for login and registration.
#[derive(Clone, Serialize)]
pub struct Credentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let username = username.into().trim().to_string();
        let password = password.into();
        let mut issues = Vec::new();
        if username.is_empty() {
            issues.push(crate::FieldIssue::new("username", "Username is required"));
        }
        if password.is_empty() {
            issues.push(crate::FieldIssue::new("password", "Password is required"));
        }
        match ValidationError::from_issues(issues) {
            Some(err) => Err(err),
            None => Ok(Self { username, password }),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

use std::sync::RwLock;

use crate::llm::ModelCredentials;

/// Answers whether a user session is logged in and which endpoint auxiliary
/// calls (summaries, routing) should use.
pub trait AuthContext: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Credentials for an auxiliary call to `model`. Authenticated sessions
    /// go through the business gateway with the user's token; otherwise the
    /// configured default endpoint is used.
    fn aux_credentials(&self, model: &str) -> ModelCredentials;
}

#[derive(Debug, Default)]
pub struct AuthState {
    token: RwLock<Option<String>>,
    business_url: String,
    default_base: String,
    default_key: String,
}

impl AuthState {
    pub fn new(
        business_url: impl Into<String>,
        default_base: impl Into<String>,
        default_key: impl Into<String>,
    ) -> Self {
        Self {
            token: RwLock::new(None),
            business_url: business_url.into(),
            default_base: default_base.into(),
            default_key: default_key.into(),
        }
    }

    pub fn with_token(self, token: Option<String>) -> Self {
        self.set_token(token);
        self
    }

    /// Replace the access token. Empty strings count as logged out.
    pub fn set_token(&self, token: Option<String>) {
        let token = token.filter(|t| !t.trim().is_empty());
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    pub fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuthContext for AuthState {
    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    fn aux_credentials(&self, model: &str) -> ModelCredentials {
        match self.token() {
            Some(token) => ModelCredentials {
                model: model.to_string(),
                api_key: token.clone(),
                api_base: Some(
                    Some(self.business_url.trim_end_matches('/'))
                        .filter(|u| !u.is_empty())
                        .unwrap_or(self.default_base.as_str())
                        .to_string(),
                ),
                user_token: Some(token),
            },
            None => ModelCredentials {
                model: model.to_string(),
                api_key: self.default_key.clone(),
                api_base: Some(self.default_base.clone()),
                user_token: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_sessions_use_default_endpoint() {
        let auth = AuthState::new("https://biz.example", "https://api.example/v1", "sk-1");
        assert!(!auth.is_authenticated());
        let creds = auth.aux_credentials("gpt-4.1-nano");
        assert_eq!(creds.api_key, "sk-1");
        assert_eq!(creds.api_base.as_deref(), Some("https://api.example/v1"));
        assert_eq!(creds.user_token, None);
    }

    #[test]
    fn logged_in_sessions_route_through_business_gateway() {
        let auth = AuthState::new("https://biz.example/", "https://api.example/v1", "sk-1")
            .with_token(Some("jwt".into()));
        assert!(auth.is_authenticated());
        let creds = auth.aux_credentials("gpt-4.1-nano");
        assert_eq!(creds.model, "gpt-4.1-nano");
        assert_eq!(creds.api_key, "jwt");
        assert_eq!(creds.api_base.as_deref(), Some("https://biz.example"));
        assert_eq!(creds.user_token.as_deref(), Some("jwt"));
    }

    #[test]
    fn missing_business_url_falls_back_to_default_base() {
        let auth =
            AuthState::new("", "https://api.example/v1", "sk-1").with_token(Some("jwt".into()));
        let creds = auth.aux_credentials("m");
        assert_eq!(creds.api_base.as_deref(), Some("https://api.example/v1"));
        assert_eq!(creds.api_key, "jwt");
    }

    #[test]
    fn blank_token_is_logged_out() {
        let auth = AuthState::new("", "", "").with_token(Some("  ".into()));
        assert!(!auth.is_authenticated());
        auth.set_token(Some("t".into()));
        assert!(auth.is_authenticated());
        auth.set_token(None);
        assert!(!auth.is_authenticated());
    }
}

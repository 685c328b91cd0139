//! Credential embedding for authenticated remote URLs.
//!
//! Hosting providers accept an access token as HTTP basic-auth user info, but
//! each expects a different username alongside it.

use url::Url;

/// Git hosting provider, used to pick the basic-auth username for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitProvider {
    GitHub,
    GitLab,
    Bitbucket,
    Generic,
}

impl GitProvider {
    /// Parse a provider name (case-insensitive). Unknown names are `Generic`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "github" => GitProvider::GitHub,
            "gitlab" => GitProvider::GitLab,
            "bitbucket" => GitProvider::Bitbucket,
            _ => GitProvider::Generic,
        }
    }

    /// Infer the provider from a remote URL's host.
    pub fn infer(remote_url: &str) -> Self {
        let host = Url::parse(remote_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));
        match host.as_deref() {
            Some(h) if h == "github.com" || h.ends_with(".github.com") => GitProvider::GitHub,
            Some(h) if h == "gitlab.com" || h.starts_with("gitlab.") => GitProvider::GitLab,
            Some(h) if h == "bitbucket.org" => GitProvider::Bitbucket,
            _ => GitProvider::Generic,
        }
    }

    fn default_username(&self) -> &'static str {
        match self {
            GitProvider::GitHub => "x-access-token",
            GitProvider::GitLab => "oauth2",
            GitProvider::Bitbucket => "x-token-auth",
            GitProvider::Generic => "git",
        }
    }
}

/// Token credentials for the remote.
#[derive(Clone)]
pub struct Credentials {
    pub provider: GitProvider,
    /// Overrides the provider's conventional username
    pub username: Option<String>,
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(provider: GitProvider, token: impl Into<String>) -> Self {
        Self {
            provider,
            username: None,
            token: token.into(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    fn username(&self) -> &str {
        self.username
            .as_deref()
            .unwrap_or_else(|| self.provider.default_username())
    }
}

/// Build the URL git should use for fetch/push.
///
/// Only `http`/`https` URLs carry embedded credentials; SSH, `file://` and
/// plain paths are returned unchanged.
pub fn authenticated_url(remote_url: &str, credentials: Option<&Credentials>) -> String {
    let Some(credentials) = credentials else {
        return remote_url.to_string();
    };

    let Ok(mut url) = Url::parse(remote_url) else {
        return remote_url.to_string();
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return remote_url.to_string();
    }

    if url.set_username(credentials.username()).is_err()
        || url.set_password(Some(&credentials.token)).is_err()
    {
        return remote_url.to_string();
    }
    url.to_string()
}

/// Replace every occurrence of the secret in `text`.
pub fn redact(text: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => text.replace(secret, "***"),
        _ => text.to_string(),
    }
}

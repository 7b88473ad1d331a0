//! User identity lookup.
//!
//! Profiles are used to verify that participant ids exist and to decorate
//! outgoing messages with sender details. Authorization never depends on
//! them; membership is decided by the conversation's participant set.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ChatError, ChatResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(default, alias = "lastName")]
    pub last_name: Option<String>,
    #[serde(default = "active_by_default", alias = "isActive")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

impl UserProfile {
    /// A profile that carries nothing but the id.
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            first_name: None,
            last_name: None,
            is_active: true,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// `Ok(None)` when the user does not exist.
    async fn find_user(&self, user_id: &str) -> ChatResult<Option<UserProfile>>;
}

/// Resolves profiles from a user directory over HTTP (`GET {base_url}/users/{id}`).
#[derive(Clone)]
pub struct HttpIdentityLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityLookup {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityLookup for HttpIdentityLookup {
    async fn find_user(&self, user_id: &str) -> ChatResult<Option<UserProfile>> {
        let url = format!("{}/users/{}", self.base_url, user_id);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(user_id = %user_id, "user not found in directory");
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response.json::<UserProfile>().await?)),
            status => Err(ChatError::transient(format!(
                "user directory returned {status} for {user_id}"
            ))),
        }
    }
}

/// Accepts every id. Used when no user directory is configured.
#[derive(Debug, Clone, Default)]
pub struct OpenDirectory;

#[async_trait]
impl IdentityLookup for OpenDirectory {
    async fn find_user(&self, user_id: &str) -> ChatResult<Option<UserProfile>> {
        if user_id.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(UserProfile::anonymous(user_id)))
    }
}

/// Fixed in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: HashMap<String, UserProfile>,
}

impl StaticDirectory {
    pub fn new(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            users: profiles
                .into_iter()
                .map(|profile| (profile.id.clone(), profile))
                .collect(),
        }
    }

    pub fn with_ids(ids: &[&str]) -> Self {
        Self::new(ids.iter().map(|id| UserProfile::anonymous(*id)))
    }
}

#[async_trait]
impl IdentityLookup for StaticDirectory {
    async fn find_user(&self, user_id: &str) -> ChatResult<Option<UserProfile>> {
        Ok(self.users.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_http_lookup_parses_profile() {
        let server = MockServer::start_async().await;
        let mock = server.mock_async(|when, then| {
            when.method(GET).path("/users/alice");
            then.status(200).json_body(serde_json::json!({
                "id": "alice",
                "email": "alice@example.com",
                "firstName": "Alice",
                "lastName": "Liddell"
            }));
        }).await;

        let lookup = HttpIdentityLookup::new(&server.base_url(), Duration::from_secs(2)).unwrap();
        let profile = lookup.find_user("alice").await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(profile.first_name.as_deref(), Some("Alice"));
        assert!(profile.is_active);
    }

    #[tokio::test]
    async fn test_http_lookup_maps_404_to_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users/ghost");
                then.status(404);
            })
            .await;

        let lookup = HttpIdentityLookup::new(&server.base_url(), Duration::from_secs(2)).unwrap();
        assert!(lookup.find_user("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http_lookup_server_error_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users/alice");
                then.status(502);
            })
            .await;

        let lookup =
            HttpIdentityLookup::new(&format!("{}/", server.base_url()), Duration::from_secs(2))
                .unwrap();
        let err = lookup.find_user("alice").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_open_directory_rejects_blank_ids() {
        assert!(OpenDirectory.find_user("anyone").await.unwrap().is_some());
        assert!(OpenDirectory.find_user("  ").await.unwrap().is_none());
    }
}

//! # Users
//!
//! Fluent builders for users registered with the upstream service.
//!
//! - [users](KeyRelayClient::users) - list, or delete all users
//! - [user](KeyRelayClient::user) - ban, unban, or delete a user

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    Result,
    client::KeyRelayClient,
    http_client::{HttpClient, HttpRequest},
    licenses::parse_list,
    prelude::*,
};

mod ops {
    pub const LIST: &str = "fetchallusers";
    pub const BAN: &str = "banuser";
    pub const UNBAN: &str = "unbanuser";
    pub const DELETE: &str = "deluser";
    pub const DELETE_ALL: &str = "delallusers";
}

/// A user account on the upstream service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct User {
    #[serde(alias = "username")]
    pub name: String,

    /// Hardware id the account is locked to
    #[serde(default)]
    pub hwid: Option<String>,

    /// Last known ip address
    #[serde(default)]
    pub ip: Option<String>,

    /// Ban reason, if banned
    #[serde(default)]
    pub banned: Option<String>,
}

impl User {
    pub fn is_banned(&self) -> bool {
        self.banned.as_ref().is_some_and(|reason| !reason.is_empty())
    }
}

/// Request builder for operations on all users.
///
/// Obtained via [`KeyRelayClient::users`].
#[derive(Debug)]
pub struct UsersRequest {
    client: Arc<HttpClient>,
}

impl UsersRequest {
    pub async fn list(self) -> Result<Vec<User>> {
        let result = self
            .client
            .send(HttpRequest::new(ops::LIST))
            .await?
            .into_result(ops::LIST)?;
        let users = parse_list::<User>(&result.payload, "users");
        debug!(count = users.len(), "listed users");
        Ok(users)
    }

    /// Deletes every user.
    pub async fn delete_all(self) -> Result<()> {
        self.client
            .send(HttpRequest::new(ops::DELETE_ALL))
            .await?
            .into_result(ops::DELETE_ALL)?;
        Ok(())
    }
}

/// Request builder for a single user.
///
/// Obtained via [`KeyRelayClient::user`].
#[derive(Debug)]
pub struct UserRequest {
    client: Arc<HttpClient>,
    name: String,
}

impl UserRequest {
    fn request(&self, operation: &str) -> Result<HttpRequest> {
        if self.name.trim().is_empty() {
            return Err(KeyRelayError::Validation {
                message: format!("{operation}: username must not be empty"),
            });
        }
        Ok(HttpRequest::new(operation).param("user", &self.name))
    }

    pub async fn ban(self, reason: impl Into<String>) -> Result<()> {
        let reason: String = reason.into();
        let req = self.request(ops::BAN)?.param("reason", reason);
        self.client.send(req).await?.into_result(ops::BAN)?;
        Ok(())
    }

    pub async fn unban(self) -> Result<()> {
        let req = self.request(ops::UNBAN)?;
        self.client.send(req).await?.into_result(ops::UNBAN)?;
        Ok(())
    }

    pub async fn delete(self) -> Result<()> {
        let req = self.request(ops::DELETE)?;
        self.client.send(req).await?.into_result(ops::DELETE)?;
        Ok(())
    }
}

impl KeyRelayClient {
    /// Builder for operations on all users.
    pub fn users(&self) -> UsersRequest {
        UsersRequest {
            client: self.client.clone(),
        }
    }

    /// Builder for operations on a single user.
    pub fn user(&self, name: impl Into<String>) -> UserRequest {
        UserRequest {
            client: self.client.clone(),
            name: name.into(),
        }
    }
}

//! # Licenses
//!
//! This module provides a fluent builder API for working with license keys.
//!
//! ## License methods on KeyRelayClient
//!
//! - [new_licenses](KeyRelayClient::new_licenses) - generate new keys
//! - [licenses](KeyRelayClient::licenses) - list, or delete all licenses
//! - [license](KeyRelayClient::license) - get info, ban, unban, or delete one license
//! - [restore_license](KeyRelayClient::restore_license) - re-create one exact key
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keyrelay::prelude::*;
//!
//! # async fn example(client: &KeyRelayClient) -> Result<(), KeyRelayError> {
//! // Create five one-week keys
//! let keys = client.new_licenses()
//!     .mask("Soryn-******-1w")
//!     .amount(5)
//!     .expiry(LicenseDuration::from_secs(604_800))
//!     .create().await?;
//!
//! // Ban one
//! client.license(&keys[0]).ban("chargeback").await?;
//!
//! // List all
//! let licenses = client.licenses().list().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::{
    Result,
    backup::LicenseRecord,
    client::KeyRelayClient,
    duration::duration_from_value,
    http_client::{HttpClient, HttpRequest},
    prelude::*,
};

pub(crate) mod ops {
    pub const CREATE: &str = "add";
    pub const LIST: &str = "fetchallkeys";
    pub const INFO: &str = "info";
    pub const BAN: &str = "ban";
    pub const UNBAN: &str = "unban";
    pub const DELETE: &str = "del";
    pub const DELETE_ALL: &str = "delalllicenses";
}

/// Usage state of a license.
#[derive(
    Debug, Default, Serialize, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum LicenseStatus {
    /// Never redeemed
    #[default]
    #[strum(to_string = "Unused", serialize = "Not Used", serialize = "NotUsed")]
    Unused,
    /// Redeemed by a user
    Used,
    /// Any status text we don't recognize
    Unknown,
}

impl LicenseStatus {
    /// Parses upstream or backup status text. Never fails: unrecognized text is `Unknown`.
    pub fn from_text(text: &str) -> Self {
        text.trim().parse().unwrap_or(Self::Unknown)
    }
}

impl<'de> Deserialize<'de> for LicenseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(value.as_str().map(Self::from_text).unwrap_or_default())
    }
}

/// A license key as listed by the upstream api.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct License {
    pub key: String,

    #[serde(default)]
    pub status: LicenseStatus,

    /// Access level, 1 if absent
    #[serde(default = "default_level", deserialize_with = "de_lenient_level")]
    pub level: u32,

    /// Expiry in seconds, if reported
    #[serde(default, deserialize_with = "de_lenient_duration")]
    pub expires: Option<LicenseDuration>,

    /// Note attached at creation
    #[serde(default)]
    pub note: Option<String>,

    /// Username that redeemed the key
    #[serde(default, alias = "usedby")]
    pub used_by: Option<String>,

    /// Creator tag
    #[serde(default, alias = "genby")]
    pub generated_by: Option<String>,

    /// Ban reason, if banned
    #[serde(default)]
    pub banned: Option<String>,
}

impl License {
    pub fn is_banned(&self) -> bool {
        self.banned.as_ref().is_some_and(|reason| !reason.is_empty())
    }

    /// Converts to a backup record. The duration comes from the reported expiry,
    /// or is derived from the key when the expiry is missing.
    pub fn to_record(&self) -> LicenseRecord {
        LicenseRecord {
            key: self.key.clone(),
            status: self.status,
            level: self.level,
            duration: Some(self.expires.unwrap_or_else(|| derive_duration(&self.key))),
        }
    }
}

pub(crate) fn default_level() -> u32 {
    1
}

/// Reads a level from a number or numeric string; 0, negative, or garbage become 1.
pub(crate) fn level_from_value(value: &serde_json::Value) -> u32 {
    let level = match value {
        serde_json::Value::Number(num) => num.as_u64(),
        serde_json::Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    level
        .and_then(|level| u32::try_from(level).ok())
        .filter(|level| *level > 0)
        .unwrap_or_else(default_level)
}

fn de_lenient_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(level_from_value(&value))
}

fn de_lenient_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<LicenseDuration>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(duration_from_value(&value))
}

// ============================================================================
// BUILDER STRUCTS (public)
// ============================================================================

/// Request builder for generating new license keys.
///
/// Obtained via [`KeyRelayClient::new_licenses`].
#[derive(Debug)]
pub struct NewLicensesRequest {
    client: Arc<HttpClient>,
    mask: Option<String>,
    amount: u32,
    expiry: LicenseDuration,
    level: u32,
    owner: Option<String>,
    note: Option<String>,
}

impl NewLicensesRequest {
    pub(crate) fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            mask: None,
            amount: 1,
            expiry: LicenseDuration::Unlimited,
            level: 1,
            owner: None,
            note: None,
        }
    }

    /// Key pattern. `*` is replaced with a random character. A mask without `*` yields exactly that key.
    #[must_use]
    pub fn mask(mut self, mask: impl Into<String>) -> Self {
        self.mask = Some(mask.into());
        self
    }

    /// Number of keys to generate (default 1)
    #[must_use]
    pub fn amount(mut self, amount: u32) -> Self {
        self.amount = amount;
        self
    }

    #[must_use]
    pub fn expiry(mut self, expiry: LicenseDuration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Access level (default 1)
    #[must_use]
    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Owner tag recorded with the keys
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.amount == 0 {
            return Err(KeyRelayError::Validation {
                message: "amount must be at least 1".to_string(),
            });
        }
        if self.level == 0 {
            return Err(KeyRelayError::Validation {
                message: "level must be at least 1".to_string(),
            });
        }
        if self.mask.as_ref().is_some_and(|mask| mask.trim().is_empty()) {
            return Err(KeyRelayError::Validation {
                message: "mask must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn into_http(self) -> HttpRequest {
        HttpRequest::new(ops::CREATE)
            .param("expiry", self.expiry.expiry_secs())
            .param("level", self.level)
            .param("amount", self.amount)
            .param_opt("mask", self.mask)
            .param_opt("owner", self.owner)
            .param_opt("note", self.note)
    }

    /// Sends the upstream call and returns the upstream reply, success or not.
    pub(crate) async fn send(self) -> Result<UpstreamResult> {
        self.validate()?;
        let client = self.client.clone();
        client.send(self.into_http()).await
    }

    /// Generates the keys and returns them.
    pub async fn create(self) -> Result<Vec<String>> {
        let result = self.send().await?.into_result(ops::CREATE)?;
        Ok(created_keys(&result.payload))
    }
}

/// Keys are reported either as a single `key` string or as a `keys` array.
fn created_keys(payload: &serde_json::Value) -> Vec<String> {
    if let Some(key) = payload.get("key").and_then(serde_json::Value::as_str) {
        return vec![key.to_string()];
    }
    payload
        .get("keys")
        .and_then(serde_json::Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(serde_json::Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Request builder for operations on all licenses.
///
/// Obtained via [`KeyRelayClient::licenses`].
#[derive(Debug)]
pub struct LicensesRequest {
    client: Arc<HttpClient>,
}

impl LicensesRequest {
    pub(crate) fn new(client: Arc<HttpClient>) -> Self {
        Self { client }
    }

    /// Lists every license key.
    pub async fn list(self) -> Result<Vec<License>> {
        let result = self
            .client
            .send(HttpRequest::new(ops::LIST))
            .await?
            .into_result(ops::LIST)?;
        let licenses = parse_list::<License>(&result.payload, "keys");
        debug!(count = licenses.len(), "listed licenses");
        Ok(licenses)
    }

    /// Deletes every license key.
    pub async fn delete_all(self) -> Result<()> {
        self.client
            .send(HttpRequest::new(ops::DELETE_ALL))
            .await?
            .into_result(ops::DELETE_ALL)?;
        Ok(())
    }
}

/// Reads `field` as a list of `T`, skipping entries that don't deserialize.
pub(crate) fn parse_list<T: serde::de::DeserializeOwned>(
    payload: &serde_json::Value,
    field: &str,
) -> Vec<T> {
    payload
        .get(field)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match serde_json::from_value(item.clone()) {
                    Ok(parsed) => Some(parsed),
                    Err(err) => {
                        debug!(%err, "skipping malformed {field} entry");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Request builder for a single license.
///
/// Obtained via [`KeyRelayClient::license`].
#[derive(Debug)]
pub struct LicenseRequest {
    client: Arc<HttpClient>,
    key: String,
}

impl LicenseRequest {
    pub(crate) fn new(client: Arc<HttpClient>, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    fn request(&self, operation: &str) -> Result<HttpRequest> {
        if self.key.trim().is_empty() {
            return Err(KeyRelayError::Validation {
                message: format!("{operation}: license key must not be empty"),
            });
        }
        Ok(HttpRequest::new(operation).param("key", &self.key))
    }

    /// Returns details for the license.
    pub async fn get(self) -> Result<License> {
        let req = self.request(ops::INFO)?;
        let result = self.client.send(req).await?.into_result(ops::INFO)?;
        let mut payload = result.payload;
        // info replies don't always echo the key
        if let Some(obj) = payload.as_object_mut() {
            obj.entry("key")
                .or_insert_with(|| serde_json::Value::String(self.key.clone()));
        }
        serde_json::from_value(payload).map_err(|err| KeyRelayError::Other {
            message: format!("unexpected info response for {}: {err}", self.key),
        })
    }

    /// Bans the license with a reason.
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
    /// Builder for generating new license keys.
    pub fn new_licenses(&self) -> NewLicensesRequest {
        NewLicensesRequest::new(self.client.clone())
    }

    /// Builder for operations on all licenses.
    pub fn licenses(&self) -> LicensesRequest {
        LicensesRequest::new(self.client.clone())
    }

    /// Builder for operations on a single license.
    pub fn license(&self, key: impl Into<String>) -> LicenseRequest {
        LicenseRequest::new(self.client.clone(), key)
    }

    /// Re-creates exactly `record.key` (mask = key, amount = 1) with the given duration.
    ///
    /// Returns the raw upstream reply so the caller can classify a rejection.
    pub async fn restore_license(
        &self,
        record: &LicenseRecord,
        duration: LicenseDuration,
    ) -> Result<UpstreamResult> {
        self.new_licenses()
            .mask(&record.key)
            .amount(1)
            .level(record.level.max(1))
            .expiry(duration)
            .send()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_text_parsing() {
        assert_eq!(LicenseStatus::from_text("Not Used"), LicenseStatus::Unused);
        assert_eq!(LicenseStatus::from_text("unused"), LicenseStatus::Unused);
        assert_eq!(LicenseStatus::from_text(" Used "), LicenseStatus::Used);
        assert_eq!(LicenseStatus::from_text("Banned"), LicenseStatus::Unknown);
        assert_eq!(LicenseStatus::Unused.to_string(), "Unused");
    }

    #[test]
    fn lenient_license_fields() {
        let license: License = serde_json::from_value(json!({
            "key": "Soryn-AAAAA-1w",
            "status": "Used",
            "level": "3",
            "expires": "604800",
            "usedby": "alice",
            "banned": null,
        }))
        .unwrap();
        assert_eq!(license.level, 3);
        assert_eq!(license.status, LicenseStatus::Used);
        assert_eq!(license.expires, Some(LicenseDuration::from_secs(604_800)));
        assert_eq!(license.used_by.as_deref(), Some("alice"));
        assert!(!license.is_banned());

        let bare: License = serde_json::from_value(json!({"key": "Soryn-B"})).unwrap();
        assert_eq!(bare.level, 1);
        assert_eq!(bare.status, LicenseStatus::Unused);
        assert_eq!(bare.expires, None);
    }

    #[test]
    fn to_record_derives_missing_duration() {
        let license: License =
            serde_json::from_value(json!({"key": "Soryn-X-1month", "level": 0})).unwrap();
        let record = license.to_record();
        assert_eq!(record.level, 1);
        assert_eq!(record.duration, Some(LicenseDuration::from_secs(2_592_000)));
    }

    #[test]
    fn created_keys_shapes() {
        assert_eq!(created_keys(&json!({"key": "K1"})), vec!["K1"]);
        assert_eq!(created_keys(&json!({"keys": ["K1", "K2"]})), vec!["K1", "K2"]);
        assert!(created_keys(&json!({"success": true})).is_empty());
    }

    #[test]
    fn parse_list_skips_malformed_entries() {
        let payload = json!({"keys": [{"key": "A"}, {"nokey": true}, {"key": "B"}]});
        let licenses: Vec<License> = parse_list(&payload, "keys");
        let keys: Vec<_> = licenses.iter().map(|lic| lic.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }
}

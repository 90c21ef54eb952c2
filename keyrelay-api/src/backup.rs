//! # Backup export and parsing
//!
//! - [export_backup](KeyRelayClient::export_backup) - fetch every license as a [`BackupDocument`]
//! - [`BackupParser::parse`] - read backup content into [`LicenseRecord`]s
//!
//! The parser accepts two shapes:
//!
//! - json: a document with a license list under `licenses`, `keys`, or `records`,
//!   or a bare list of license objects
//! - text: the tabular dump printed by admin consoles, with box-drawing borders,
//!   a header row, summary lines, and columns separated by two or more spaces
//!
//! Parsing never fails. Content that matches neither shape yields no records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::debug;

use crate::{
    DEFAULT_KEY_PREFIX, Result,
    client::KeyRelayClient,
    duration::duration_from_value,
    licenses::{default_level, level_from_value},
    prelude::*,
};

/// Current version of the exported backup document
pub const BACKUP_VERSION: u32 = 1;

/// Field names searched, in order, for the license list in a json backup.
const LIST_FIELDS: &[&str] = &["licenses", "keys", "records"];

/// Field names searched, in order, for a duration in a json record.
const DURATION_FIELDS: &[&str] = &["duration", "expiry", "expires"];

/// Lowercase line prefixes of header, footer, and menu lines in text dumps.
const SKIP_PREFIXES: &[&str] = &[
    "key ",
    "license key",
    "total",
    "used:",
    "unused:",
    "not used:",
    "licenses:",
    "showing",
    "page ",
    "select",
    "choose",
    "option",
    "menu",
    "press ",
    "[",
];

/// A license as stored in a backup, and as replayed by a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// License key, case-sensitive
    pub key: String,

    #[serde(default)]
    pub status: LicenseStatus,

    #[serde(default = "default_level")]
    pub level: u32,

    /// Explicit duration. When absent, the duration is derived from the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<LicenseDuration>,
}

impl LicenseRecord {
    /// New unused level-1 record with no explicit duration
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: LicenseStatus::Unused,
            level: default_level(),
            duration: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: LicenseStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: LicenseDuration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Explicit duration, or the duration derived from the key.
    pub fn resolved_duration(&self) -> LicenseDuration {
        self.duration.unwrap_or_else(|| derive_duration(&self.key))
    }

    /// Reads a record from a json object. Returns None if there is no usable key.
    pub(crate) fn from_json(value: &serde_json::Value) -> Option<Self> {
        let key = value.get("key")?.as_str()?.trim();
        if key.is_empty() {
            return None;
        }
        let status = value
            .get("status")
            .and_then(serde_json::Value::as_str)
            .map(LicenseStatus::from_text)
            .unwrap_or_default();
        let level = value.get("level").map_or_else(default_level, level_from_value);
        let duration = DURATION_FIELDS
            .iter()
            .find_map(|field| value.get(*field).and_then(duration_from_value));
        Some(Self {
            key: key.to_string(),
            status,
            level,
            duration,
        })
    }
}

/// Shape of parsed backup content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackupFormat {
    Json,
    Text,
}

/// Document written by [`KeyRelayClient::export_backup`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub licenses: Vec<LicenseRecord>,
}

impl BackupDocument {
    pub fn new(licenses: Vec<LicenseRecord>) -> Self {
        Self {
            version: BACKUP_VERSION,
            exported_at: Utc::now(),
            licenses,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context(SerializationSnafu)
    }
}

/// Converts raw backup content into license records.
#[derive(Debug, Clone)]
pub struct BackupParser {
    /// lowercase key prefix accepted by the text parser
    prefix: String,
}

impl Default for BackupParser {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl BackupParser {
    /// Parser accepting text-dump keys that start with `prefix` (case-insensitive)
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim().to_lowercase(),
        }
    }

    /// Parses json if possible, otherwise the tabular text format.
    pub fn parse(&self, content: &str) -> (Vec<LicenseRecord>, BackupFormat) {
        match serde_json::from_str::<serde_json::Value>(content) {
            Ok(doc) if doc.is_object() || doc.is_array() => {
                let records = parse_json(&doc);
                debug!(count = records.len(), "parsed json backup");
                (records, BackupFormat::Json)
            }
            _ => {
                let records = self.parse_text(content);
                debug!(count = records.len(), "parsed text backup");
                (records, BackupFormat::Text)
            }
        }
    }

    /// Line-oriented parse of a tabular dump.
    pub fn parse_text(&self, content: &str) -> Vec<LicenseRecord> {
        content
            .lines()
            .filter_map(|line| self.parse_line(line))
            .collect()
    }

    fn parse_line(&self, line: &str) -> Option<LicenseRecord> {
        let line = line.trim();
        if line.is_empty() || is_border(line) || is_header_or_footer(line) {
            return None;
        }
        let columns = split_columns(line);
        let key = *columns.first()?;
        if !self.has_prefix(key) {
            return None;
        }
        let status = columns
            .get(1)
            .map_or(LicenseStatus::Unused, |status| LicenseStatus::from_text(status));
        let level = columns
            .get(2)
            .filter(|level| !level.is_empty() && level.chars().all(|ch| ch.is_ascii_digit()))
            .and_then(|level| level.parse::<u32>().ok())
            .filter(|level| *level > 0)
            .unwrap_or_else(default_level);
        Some(LicenseRecord {
            key: key.to_string(),
            status,
            level,
            duration: Some(derive_duration(key)),
        })
    }

    fn has_prefix(&self, key: &str) -> bool {
        key.get(..self.prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(&self.prefix))
    }
}

fn parse_json(doc: &serde_json::Value) -> Vec<LicenseRecord> {
    let items = match doc {
        serde_json::Value::Array(items) => Some(items),
        serde_json::Value::Object(_) => LIST_FIELDS
            .iter()
            .find_map(|field| doc.get(*field).and_then(serde_json::Value::as_array)),
        _ => None,
    };
    items
        .map(|items| items.iter().filter_map(LicenseRecord::from_json).collect())
        .unwrap_or_default()
}

/// Box-drawing glyphs and ascii table rules
fn is_border_char(ch: char) -> bool {
    ('\u{2500}'..='\u{257F}').contains(&ch)
        || ('\u{2580}'..='\u{259F}').contains(&ch)
        || matches!(ch, '+' | '-' | '=' | '|' | '_' | '*' | '~')
}

/// A line made only of border characters and whitespace
fn is_border(line: &str) -> bool {
    line.chars()
        .all(|ch| is_border_char(ch) || ch.is_whitespace())
}

fn is_header_or_footer(line: &str) -> bool {
    let stripped = line
        .trim_matches(|ch: char| is_border_char(ch) || ch.is_whitespace())
        .to_lowercase();
    if stripped == "key" || stripped.starts_with("key\t") {
        return true;
    }
    SKIP_PREFIXES
        .iter()
        .any(|prefix| stripped.starts_with(prefix))
}

/// Splits on runs of two or more whitespace characters, tabs, or vertical box separators.
fn split_columns(line: &str) -> Vec<&str> {
    let mut columns = Vec::new();
    let mut start: Option<usize> = None;
    let mut gap_start = 0usize;
    let mut gap_len = 0usize;

    for (idx, ch) in line.char_indices() {
        let separator = ch == '\t' || ch == '│' || ch == '┃' || ch == '|';
        if ch.is_whitespace() && !separator {
            if gap_len == 0 {
                gap_start = idx;
            }
            gap_len += 1;
            continue;
        }
        if separator || gap_len >= 2 {
            let end = if gap_len > 0 { gap_start } else { idx };
            if let Some(begin) = start.take() {
                push_column(&mut columns, &line[begin..end]);
            }
            gap_len = 0;
            if separator {
                continue;
            }
        }
        gap_len = 0;
        if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(begin) = start {
        push_column(&mut columns, &line[begin..]);
    }
    columns
}

fn push_column<'a>(columns: &mut Vec<&'a str>, column: &'a str) {
    let column = column.trim();
    if !column.is_empty() {
        columns.push(column);
    }
}

impl KeyRelayClient {
    /// Fetches every license and returns a backup document.
    pub async fn export_backup(&self) -> Result<BackupDocument> {
        let licenses = self.licenses().list().await?;
        Ok(BackupDocument::new(
            licenses.iter().map(License::to_record).collect(),
        ))
    }
}

/*
 * keyrelay - license administration proxy
 *
 * SPDX-FileCopyrightText: 2025-2026 Steve Schoettler
 * SPDX-License-Identifier: Apache-2.0
 */
//! # keyrelay
//!
//! Administrative proxy for a third-party license management API.
//!
//! ## Features
//!
//! - single-call license and user operations (create, list, ban, delete)
//! - backup export, and a lenient parser for JSON or tabular backup dumps
//! - rate-limited, retrying, cancellable bulk restore running in the background
//! - live restore progress snapshots
//! - optional HTTP control surface for admin UIs (`server` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keyrelay::prelude::*;
//! # async fn example() -> Result<(), KeyRelayError> {
//! let client = KeyRelayClient::with_config(
//!     ClientConfig::default().seller_key("my-seller-key"),
//! )?;
//!
//! // list licenses
//! for license in client.licenses().list().await? {
//!     println!("{} {}", license.key, license.status);
//! }
//!
//! // restore a backup in the background
//! let content = std::fs::read_to_string("backup.json").unwrap_or_default();
//! let (records, _format) = BackupParser::default().parse(&content);
//! let engine = RestoreEngine::new(client, RestoreConfig::default());
//! let ack = engine.start(RestoreRequest::new(records))?;
//! println!("restoring {} licenses", ack.total);
//!
//! let status = engine.reporter();
//! println!("{}", status.snapshot());
//! # Ok(())
//! # }
//! ```
//!
#![allow(clippy::missing_errors_doc)] // pedantic
#![allow(clippy::missing_const_for_fn)] //  nursery function
#![allow(clippy::must_use_candidate)] // pedantic
#![warn(clippy::default_trait_access)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::explicit_iter_loop)]
#![warn(clippy::future_not_send)]
#![warn(clippy::implicit_clone)]
#![warn(clippy::literal_string_with_formatting_args)]
#![warn(clippy::match_same_arms)]
#![warn(clippy::min_ident_chars)]
#![warn(clippy::needless_raw_strings)]
#![warn(clippy::option_if_let_else)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::ref_option)]
#![warn(clippy::redundant_closure)]
#![warn(clippy::uninlined_format_args)]
#![warn(clippy::unnecessary_wraps)]
#![warn(clippy::unused_async)]

pub mod backup;
pub mod client;
pub mod credentials;
pub mod duration;
pub mod error;
mod http_client;
pub mod licenses;
#[doc(hidden)]
pub mod mock;
pub mod restore;
#[cfg(feature = "server")]
pub mod server;
pub mod status;
pub mod users;

/// Result type alias using `KeyRelayError` as the default error.
pub type Result<T, E = crate::error::KeyRelayError> = std::result::Result<T, E>;

/// Prelude module - import the common types with `use keyrelay::prelude::*;`
pub mod prelude {
    pub use super::{DEFAULT_KEY_PREFIX, DEFAULT_UPSTREAM_URL};
    pub use crate::error::*;
    pub use crate::{
        // Backup parsing and export
        backup::{BackupDocument, BackupFormat, BackupParser, LicenseRecord},
        client::{ClientConfig, KeyRelayClient},
        credentials::SellerKey,
        duration::{LicenseDuration, derive_duration},
        // HTTP metrics
        http_client::{HttpMetricsSnapshot, UpstreamResult},
        licenses::{License, LicenseStatus},
        restore::{
            FailureClass, LicenseApi, RestoreAck, RestoreConfig, RestoreEngine, RestoreRequest,
            classify_failure,
        },
        status::{RestorePhase, RestoreSnapshot, StatusReporter, StopAck},
        users::User,
    };
}

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default upstream seller API endpoint
pub const DEFAULT_UPSTREAM_URL: &str = "https://keyauth.win/api/seller/";

/// Reserved prefix of license keys issued for this product
pub const DEFAULT_KEY_PREFIX: &str = "Soryn-";

pub(crate) mod config {
    /// Environment variable for the upstream endpoint url
    pub const KEYRELAY_URL_ENV: &str = "KEYRELAY_URL";

    /// Environment variable holding the seller key
    pub const KEYRELAY_SELLER_KEY_ENV: &str = "KEYRELAY_SELLER_KEY";

    /// Environment variable overriding the license key prefix
    pub const KEYRELAY_KEY_PREFIX_ENV: &str = "KEYRELAY_KEY_PREFIX";

    /// Query parameter carrying the seller credential
    pub const SELLER_KEY_PARAM: &str = "sellerkey";

    /// Query parameter carrying the operation name
    pub const OPERATION_PARAM: &str = "type";

    /// Default timeout for a single upstream round trip (seconds)
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

    /// Number of body characters included in decode errors
    pub const DECODE_SNIPPET_LEN: usize = 200;
}

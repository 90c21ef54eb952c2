//! Seller credential handling
//!
//! The seller key is an opaque secret sent as a query parameter on every upstream call.
//! It is masked in `Debug` output, never logged, and zeroized when dropped.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque seller credential for the upstream API.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SellerKey {
    token: String,
}

impl fmt::Debug for SellerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SellerKey")
            .field("token", &fmt_masked(&self.token))
            .finish()
    }
}

fn fmt_masked(val: &str) -> &'static str {
    if val.is_empty() { "None" } else { "MASKED" }
}

impl SellerKey {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().trim().to_string(),
        }
    }

    /// Returns true if a non-empty key is present
    pub fn has_creds(&self) -> bool {
        !self.token.is_empty()
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }
}

impl From<&str> for SellerKey {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for SellerKey {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

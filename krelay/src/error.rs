//! Process exit codes

use keyrelay::prelude::KeyRelayError;

/// Exit code for any other error
pub const EXIT_FAILURE: i32 = 1;
/// Bad arguments or input file
pub const EXIT_USAGE: i32 = 2;
/// A restore is already running
pub const EXIT_BUSY: i32 = 3;
/// The upstream api failed or rejected the call
pub const EXIT_UPSTREAM: i32 = 4;

pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<KeyRelayError>() {
        Some(KeyRelayError::InvalidInput { .. } | KeyRelayError::Validation { .. }) => EXIT_USAGE,
        Some(KeyRelayError::AlreadyInProgress) => EXIT_BUSY,
        Some(
            KeyRelayError::Transport { .. }
            | KeyRelayError::Decode { .. }
            | KeyRelayError::UpstreamRejection { .. },
        ) => EXIT_UPSTREAM,
        _ => EXIT_FAILURE,
    }
}

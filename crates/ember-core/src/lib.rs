// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Process-wide setup shared by the Ember binaries.

/// Filter used when `RUST_LOG` is unset: lifecycle events from our crates,
/// warnings from everything else.
pub const DEFAULT_LOG_FILTER: &str = "warn,ember_app=info,ember_render_vk=info";

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `DEFAULT_LOG_FILTER`. Calling this twice is harmless;
/// the second call is ignored.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

//! Layer settings read from the process environment.

use core::time::Duration;
use std::env;

use tracing::warn;

/// Environment variable selecting the layer variant when the loader supplied name is unknown.
pub const VARIANT_ENV: &str = "XR_VK_D3D12_INTEROP_VARIANT";

/// Environment variable overriding the frame synchronization bound, in milliseconds.
pub const FRAME_TIMEOUT_ENV: &str = "XR_VK_D3D12_INTEROP_FRAME_TIMEOUT_MS";

const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// Per instance layer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    /// Variant name used when the loader supplied layer name matches no variant.
    pub variant: Option<String>,

    /// Bound of the wait performed before forwarding `xrEndFrame`.
    pub frame_sync_timeout: Duration,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            variant: None,
            frame_sync_timeout: DEFAULT_FRAME_TIMEOUT,
        }
    }
}

impl LayerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(variant) = lookup(VARIANT_ENV).filter(|name| !name.is_empty()) {
            config.variant = Some(variant);
        }

        if let Some(raw) = lookup(FRAME_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.frame_sync_timeout = Duration::from_millis(ms),
                _ => warn!("ignoring invalid {FRAME_TIMEOUT_ENV}: {raw:?}"),
            }
        }

        config
    }
}

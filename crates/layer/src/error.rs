//! Error types of the layer.

use core::time::Duration;

use openxr_sys as xr;
use thiserror::Error;

use crate::graphics::Luid;

/// Errors produced while servicing an OpenXR call.
#[derive(Error, Debug)]
pub enum LayerError {
    /// A function the layer must intercept cannot be resolved from the next layer.
    #[error("cannot resolve {0} from the next layer")]
    UnresolvedFunction(&'static str),

    /// The function is neither intercepted nor exposed by the next layer.
    #[error("function {0} is not supported")]
    FunctionNotSupported(String),

    /// The application device and the runtime adapter are different GPUs.
    #[error("graphics device mismatch: runtime adapter {runtime:?}, application device {app:?}")]
    GraphicsDeviceMismatch { runtime: Luid, app: Option<Luid> },

    /// No bit-compatible pairing exists between the two APIs' formats.
    #[error("unsupported format translation: {0}")]
    UnsupportedFormatTranslation(i64),

    /// The application work for the frame did not finish within the bound.
    #[error("frame sync value {value} not reached within {timeout:?}")]
    FrameSyncTimeout { value: u64, timeout: Duration },

    /// Two threads used the same swapchain at once.
    #[error("concurrent access to swapchain {0:#x}")]
    ConcurrentAccessViolation(u64),

    /// Malformed input from the loader or the application.
    #[error("validation failed: {0}")]
    Validation(&'static str),

    /// The next layer returned an error.
    #[error("next layer returned {0:?}")]
    Runtime(xr::Result),

    /// Graphics API failure.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl LayerError {
    /// [`xr::Result`] reported back to the application.
    pub fn to_xr(&self) -> xr::Result {
        match self {
            LayerError::UnresolvedFunction(_) => xr::Result::ERROR_INITIALIZATION_FAILED,
            LayerError::FunctionNotSupported(_) => xr::Result::ERROR_FUNCTION_UNSUPPORTED,
            LayerError::GraphicsDeviceMismatch { .. } => xr::Result::ERROR_GRAPHICS_DEVICE_INVALID,
            LayerError::UnsupportedFormatTranslation(_) => {
                xr::Result::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED
            }
            LayerError::FrameSyncTimeout { .. } => xr::Result::ERROR_RUNTIME_FAILURE,
            LayerError::ConcurrentAccessViolation(_) => xr::Result::ERROR_VALIDATION_FAILURE,
            LayerError::Validation(_) => xr::Result::ERROR_VALIDATION_FAILURE,
            LayerError::Runtime(res) => *res,
            LayerError::Backend(_) => xr::Result::ERROR_RUNTIME_FAILURE,
        }
    }
}

/// Conversion of raw [`xr::Result`] codes into [`LayerError`].
pub trait XrResultExt {
    /// Keep success codes (including qualified successes), turn failures into [`LayerError::Runtime`].
    fn check(self) -> Result<xr::Result, LayerError>;
}

impl XrResultExt for xr::Result {
    fn check(self) -> Result<xr::Result, LayerError> {
        if self.into_raw() >= 0 {
            Ok(self)
        } else {
            Err(LayerError::Runtime(self))
        }
    }
}

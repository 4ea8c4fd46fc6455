//! Dynamic library the OpenXR loader loads for the interop layer.

#[cfg(any(windows, test))]
mod dbg;

use core::ffi::c_char;
use std::sync::Once;

use openxr_sys as xr;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use vk_d3d12_interop_layer::loader::{NegotiateApiLayerRequest, NegotiateLoaderInfo};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "XR_VK_D3D12_INTEROP_LOG";

/// Prefix of debugger output lines.
#[cfg(windows)]
const LOG_TAG: &str = "vk-d3d12-interop";

fn setup_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_thread_ids(true)
            .with_env_filter(filter);

        #[cfg(windows)]
        let res = builder
            .with_writer(dbg::DebuggerMakeWriter::new(LOG_TAG, dbg::output_debug_string))
            .try_init();
        #[cfg(not(windows))]
        let res = builder.with_writer(std::io::stderr).try_init();

        if res.is_ok() {
            debug!("tracing initialized");
        }
    });
}

#[unsafe(export_name = "xrNegotiateLoaderApiLayerInterface")]
/// # Safety
/// Can be called by the OpenXR loader only.
pub unsafe extern "system" fn negotiate_loader_api_layer_interface(
    loader_info: *const NegotiateLoaderInfo,
    layer_name: *const c_char,
    request: *mut NegotiateApiLayerRequest,
) -> xr::Result {
    setup_tracing();

    unsafe {
        vk_d3d12_interop_layer::negotiate_loader_api_layer_interface(
            loader_info,
            layer_name,
            request,
        )
    }
}

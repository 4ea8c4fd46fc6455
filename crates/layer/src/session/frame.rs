use openxr_sys as xr;
use tracing::{trace, warn};

use crate::{
    error::{LayerError, XrResultExt},
    instance::Instance,
};

impl Instance {
    /// Make the runtime queue wait for the application's rendering, then forward `xrEndFrame`.
    ///
    /// Fails with [`LayerError::FrameSyncTimeout`] without forwarding when the
    /// application queue does not reach the frame's fence value in time.
    ///
    /// # Safety
    /// Arguments must satisfy the `xrEndFrame` contract.
    pub unsafe fn end_frame(
        &self,
        session: xr::Session,
        info: *const xr::FrameEndInfo,
    ) -> Result<xr::Result, LayerError> {
        let entry = self.registry.session(session);
        if let Some(interop) = entry.as_ref().and_then(|entry| entry.interop()) {
            let fence = &interop.fence;
            let value = fence.next_value();
            fence.app().signal_on_queue(value)?;

            let timeout = self.config.frame_sync_timeout;
            if !fence.app().wait(value, timeout)? {
                warn!("application work of frame {value} not done within {timeout:?}");
                return Err(LayerError::FrameSyncTimeout { value, timeout });
            }

            fence.runtime().queue_wait(value)?;
            trace!("frame {value} synchronized");
        }

        unsafe { self.runtime.end_frame(session, info) }.check()
    }
}

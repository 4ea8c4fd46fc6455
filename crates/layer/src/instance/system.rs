use core::mem;

use openxr_sys as xr;
use tracing::{debug, info, warn};

use super::Instance;
use crate::{
    error::{LayerError, XrResultExt},
    fixed_str,
    graphics::{ApiKind, GraphicsRequirementsD3D12KHR, RuntimeAdapter},
};

impl Instance {
    /// Direct3D 12 requirements of `system_id` straight from the runtime.
    pub(crate) fn query_adapter(
        &self,
        system_id: xr::SystemId,
    ) -> Result<RuntimeAdapter, LayerError> {
        let mut requirements = GraphicsRequirementsD3D12KHR::default();
        unsafe {
            self.runtime
                .get_d3d12_graphics_requirements(self.handle, system_id, &mut requirements)
        }
        .check()?;

        Ok(RuntimeAdapter {
            luid: requirements.adapter_luid,
            min_feature_level: requirements.min_feature_level,
        })
    }

    /// Runtime adapter of the head mounted display system returned by `xrGetSystem`.
    pub(crate) fn hmd_adapter(&self, system_id: xr::SystemId) -> Result<RuntimeAdapter, LayerError> {
        if self.hmd_system.get() != Some(&system_id.into_raw()) {
            return Err(LayerError::Runtime(xr::Result::ERROR_SYSTEM_INVALID));
        }

        self.negotiator
            .adapter_or_query(|| self.query_adapter(system_id))
    }

    /// # Safety
    /// Arguments must satisfy the `xrGetSystem` contract.
    pub unsafe fn get_system(
        &self,
        info: *const xr::SystemGetInfo,
        system_id: *mut xr::SystemId,
    ) -> Result<xr::Result, LayerError> {
        let res = unsafe { self.runtime.get_system(self.handle, info, system_id) }.check()?;
        if unsafe { (*info).form_factor } != xr::FormFactor::HEAD_MOUNTED_DISPLAY {
            return Ok(res);
        }

        let system_id = unsafe { *system_id };
        if self.negotiator.runtime_api() == Some(ApiKind::D3D12) {
            // retried by the first call that needs the adapter
            if let Err(err) = self
                .negotiator
                .adapter_or_query(|| self.query_adapter(system_id))
            {
                warn!("failed to query direct3d 12 requirements: {err}");
            }
        }

        if self.hmd_system.set(system_id.into_raw()).is_ok() {
            debug!("head mounted display system: {}", system_id.into_raw());
            self.log_system_properties(system_id);
        }

        Ok(res)
    }

    fn log_system_properties(&self, system_id: xr::SystemId) {
        if !self.capabilities.requests("xrGetSystemProperties") {
            return;
        }

        let mut properties: xr::SystemProperties = unsafe { mem::zeroed() };
        properties.ty = xr::StructureType::SYSTEM_PROPERTIES;
        let res = unsafe {
            self.runtime
                .get_system_properties(self.handle, system_id, &mut properties)
        };
        if res.into_raw() >= 0 {
            info!(
                "system: {} vendor: {:#x}",
                fixed_str(&properties.system_name),
                properties.vendor_id
            );
        }
    }

    /// Log the name and version of the runtime below the layer.
    pub(crate) fn log_runtime_properties(&self) {
        if !self.capabilities.requests("xrGetInstanceProperties") {
            return;
        }

        let mut properties: xr::InstanceProperties = unsafe { mem::zeroed() };
        properties.ty = xr::StructureType::INSTANCE_PROPERTIES;
        let res = unsafe {
            self.runtime
                .get_instance_properties(self.handle, &mut properties)
        };
        if res.into_raw() >= 0 {
            let version = properties.runtime_version;
            info!(
                "runtime: {} {}.{}.{}",
                fixed_str(&properties.runtime_name),
                version.major(),
                version.minor(),
                version.patch()
            );
        }
    }

    /// # Safety
    /// Arguments must satisfy the `xrEnumerateViewConfigurationViews` contract.
    pub unsafe fn enumerate_view_configuration_views(
        &self,
        system_id: xr::SystemId,
        view_configuration_type: xr::ViewConfigurationType,
        capacity: u32,
        count_output: *mut u32,
        views: *mut xr::ViewConfigurationView,
    ) -> Result<xr::Result, LayerError> {
        let res = unsafe {
            self.runtime.enumerate_view_configuration_views(
                self.handle,
                system_id,
                view_configuration_type,
                capacity,
                count_output,
                views,
            )
        }
        .check()?;

        if capacity > 0 && !views.is_null() {
            let count = unsafe { *count_output }.min(capacity) as usize;
            for (i, view) in unsafe { core::slice::from_raw_parts(views, count) }
                .iter()
                .enumerate()
            {
                debug!(
                    "view {i}: recommended {}x{} max {}x{}",
                    view.recommended_image_rect_width,
                    view.recommended_image_rect_height,
                    view.max_image_rect_width,
                    view.max_image_rect_height
                );
            }
        }

        Ok(res)
    }
}

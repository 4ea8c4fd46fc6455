//! Calls into the next layer of the OpenXR chain.

#[cfg(test)]
pub mod mock;

use core::ffi::CStr;

use openxr_sys::{self as xr, pfn};
use tracing::debug;

use crate::{
    graphics::{GetD3D12GraphicsRequirementsKHR, GraphicsRequirementsD3D12KHR},
    resolve_proc,
};

/// Functions of the next layer the interception paths call.
///
/// Every method takes the same raw arguments as the OpenXR function it
/// stands for and has the same safety contract.
#[allow(clippy::missing_safety_doc)]
pub trait NextRuntime: Send + Sync {
    /// `xrGetInstanceProcAddr` of the next layer.
    fn get_instance_proc_addr(&self, name: &CStr) -> Option<pfn::VoidFunction>;

    unsafe fn destroy_instance(&self, instance: xr::Instance) -> xr::Result;

    unsafe fn get_instance_properties(
        &self,
        instance: xr::Instance,
        properties: *mut xr::InstanceProperties,
    ) -> xr::Result;

    unsafe fn get_system(
        &self,
        instance: xr::Instance,
        info: *const xr::SystemGetInfo,
        system_id: *mut xr::SystemId,
    ) -> xr::Result;

    unsafe fn get_system_properties(
        &self,
        instance: xr::Instance,
        system_id: xr::SystemId,
        properties: *mut xr::SystemProperties,
    ) -> xr::Result;

    unsafe fn get_d3d12_graphics_requirements(
        &self,
        instance: xr::Instance,
        system_id: xr::SystemId,
        requirements: *mut GraphicsRequirementsD3D12KHR,
    ) -> xr::Result;

    unsafe fn enumerate_view_configuration_views(
        &self,
        instance: xr::Instance,
        system_id: xr::SystemId,
        view_configuration_type: xr::ViewConfigurationType,
        capacity: u32,
        count_output: *mut u32,
        views: *mut xr::ViewConfigurationView,
    ) -> xr::Result;

    unsafe fn create_session(
        &self,
        instance: xr::Instance,
        info: *const xr::SessionCreateInfo,
        session: *mut xr::Session,
    ) -> xr::Result;

    unsafe fn destroy_session(&self, session: xr::Session) -> xr::Result;

    unsafe fn begin_session(
        &self,
        session: xr::Session,
        info: *const xr::SessionBeginInfo,
    ) -> xr::Result;

    unsafe fn enumerate_swapchain_formats(
        &self,
        session: xr::Session,
        capacity: u32,
        count_output: *mut u32,
        formats: *mut i64,
    ) -> xr::Result;

    unsafe fn create_swapchain(
        &self,
        session: xr::Session,
        info: *const xr::SwapchainCreateInfo,
        swapchain: *mut xr::Swapchain,
    ) -> xr::Result;

    unsafe fn destroy_swapchain(&self, swapchain: xr::Swapchain) -> xr::Result;

    unsafe fn enumerate_swapchain_images(
        &self,
        swapchain: xr::Swapchain,
        capacity: u32,
        count_output: *mut u32,
        images: *mut xr::SwapchainImageBaseHeader,
    ) -> xr::Result;

    unsafe fn acquire_swapchain_image(
        &self,
        swapchain: xr::Swapchain,
        info: *const xr::SwapchainImageAcquireInfo,
        index: *mut u32,
    ) -> xr::Result;

    unsafe fn release_swapchain_image(
        &self,
        swapchain: xr::Swapchain,
        info: *const xr::SwapchainImageReleaseInfo,
    ) -> xr::Result;

    unsafe fn end_frame(&self, session: xr::Session, info: *const xr::FrameEndInfo) -> xr::Result;
}

/// Next layer reached through its `xrGetInstanceProcAddr`.
pub struct ChainedRuntime {
    instance: xr::Instance,
    get_proc_addr: pfn::GetInstanceProcAddr,

    destroy_instance: Option<pfn::DestroyInstance>,
    get_instance_properties: Option<pfn::GetInstanceProperties>,
    get_system: Option<pfn::GetSystem>,
    get_system_properties: Option<pfn::GetSystemProperties>,
    get_d3d12_graphics_requirements: Option<GetD3D12GraphicsRequirementsKHR>,
    enumerate_view_configuration_views: Option<pfn::EnumerateViewConfigurationViews>,
    create_session: Option<pfn::CreateSession>,
    destroy_session: Option<pfn::DestroySession>,
    begin_session: Option<pfn::BeginSession>,
    enumerate_swapchain_formats: Option<pfn::EnumerateSwapchainFormats>,
    create_swapchain: Option<pfn::CreateSwapchain>,
    destroy_swapchain: Option<pfn::DestroySwapchain>,
    enumerate_swapchain_images: Option<pfn::EnumerateSwapchainImages>,
    acquire_swapchain_image: Option<pfn::AcquireSwapchainImage>,
    release_swapchain_image: Option<pfn::ReleaseSwapchainImage>,
    end_frame: Option<pfn::EndFrame>,
}

impl ChainedRuntime {
    pub fn new(get_proc_addr: pfn::GetInstanceProcAddr, instance: xr::Instance) -> Self {
        debug!("resolving next layer functions");

        macro_rules! proc {
            ($name:literal : $ty:ty) => {
                unsafe { resolve_proc!(get_proc_addr => instance, $name : $ty) }
            };
        }

        Self {
            instance,

            destroy_instance: proc!(c"xrDestroyInstance": pfn::DestroyInstance),
            get_instance_properties: proc!(c"xrGetInstanceProperties": pfn::GetInstanceProperties),
            get_system: proc!(c"xrGetSystem": pfn::GetSystem),
            get_system_properties: proc!(c"xrGetSystemProperties": pfn::GetSystemProperties),
            get_d3d12_graphics_requirements: proc!(
                c"xrGetD3D12GraphicsRequirementsKHR": GetD3D12GraphicsRequirementsKHR
            ),
            enumerate_view_configuration_views: proc!(
                c"xrEnumerateViewConfigurationViews": pfn::EnumerateViewConfigurationViews
            ),
            create_session: proc!(c"xrCreateSession": pfn::CreateSession),
            destroy_session: proc!(c"xrDestroySession": pfn::DestroySession),
            begin_session: proc!(c"xrBeginSession": pfn::BeginSession),
            enumerate_swapchain_formats: proc!(
                c"xrEnumerateSwapchainFormats": pfn::EnumerateSwapchainFormats
            ),
            create_swapchain: proc!(c"xrCreateSwapchain": pfn::CreateSwapchain),
            destroy_swapchain: proc!(c"xrDestroySwapchain": pfn::DestroySwapchain),
            enumerate_swapchain_images: proc!(
                c"xrEnumerateSwapchainImages": pfn::EnumerateSwapchainImages
            ),
            acquire_swapchain_image: proc!(c"xrAcquireSwapchainImage": pfn::AcquireSwapchainImage),
            release_swapchain_image: proc!(c"xrReleaseSwapchainImage": pfn::ReleaseSwapchainImage),
            end_frame: proc!(c"xrEndFrame": pfn::EndFrame),

            get_proc_addr,
        }
    }
}

macro_rules! forward {
    ($self:ident.$f:ident($($arg:expr),* $(,)?)) => {
        match $self.$f {
            Some(f) => unsafe { f($($arg),*) },
            None => xr::Result::ERROR_FUNCTION_UNSUPPORTED,
        }
    };
}

impl NextRuntime for ChainedRuntime {
    fn get_instance_proc_addr(&self, name: &CStr) -> Option<pfn::VoidFunction> {
        let mut function = None;
        let res = unsafe { (self.get_proc_addr)(self.instance, name.as_ptr(), &mut function) };
        if res.into_raw() < 0 {
            return None;
        }

        function
    }

    unsafe fn destroy_instance(&self, instance: xr::Instance) -> xr::Result {
        forward!(self.destroy_instance(instance))
    }

    unsafe fn get_instance_properties(
        &self,
        instance: xr::Instance,
        properties: *mut xr::InstanceProperties,
    ) -> xr::Result {
        forward!(self.get_instance_properties(instance, properties))
    }

    unsafe fn get_system(
        &self,
        instance: xr::Instance,
        info: *const xr::SystemGetInfo,
        system_id: *mut xr::SystemId,
    ) -> xr::Result {
        forward!(self.get_system(instance, info, system_id))
    }

    unsafe fn get_system_properties(
        &self,
        instance: xr::Instance,
        system_id: xr::SystemId,
        properties: *mut xr::SystemProperties,
    ) -> xr::Result {
        forward!(self.get_system_properties(instance, system_id, properties))
    }

    unsafe fn get_d3d12_graphics_requirements(
        &self,
        instance: xr::Instance,
        system_id: xr::SystemId,
        requirements: *mut GraphicsRequirementsD3D12KHR,
    ) -> xr::Result {
        forward!(self.get_d3d12_graphics_requirements(instance, system_id, requirements))
    }

    unsafe fn enumerate_view_configuration_views(
        &self,
        instance: xr::Instance,
        system_id: xr::SystemId,
        view_configuration_type: xr::ViewConfigurationType,
        capacity: u32,
        count_output: *mut u32,
        views: *mut xr::ViewConfigurationView,
    ) -> xr::Result {
        forward!(self.enumerate_view_configuration_views(
            instance,
            system_id,
            view_configuration_type,
            capacity,
            count_output,
            views,
        ))
    }

    unsafe fn create_session(
        &self,
        instance: xr::Instance,
        info: *const xr::SessionCreateInfo,
        session: *mut xr::Session,
    ) -> xr::Result {
        forward!(self.create_session(instance, info, session))
    }

    unsafe fn destroy_session(&self, session: xr::Session) -> xr::Result {
        forward!(self.destroy_session(session))
    }

    unsafe fn begin_session(
        &self,
        session: xr::Session,
        info: *const xr::SessionBeginInfo,
    ) -> xr::Result {
        forward!(self.begin_session(session, info))
    }

    unsafe fn enumerate_swapchain_formats(
        &self,
        session: xr::Session,
        capacity: u32,
        count_output: *mut u32,
        formats: *mut i64,
    ) -> xr::Result {
        forward!(self.enumerate_swapchain_formats(session, capacity, count_output, formats))
    }

    unsafe fn create_swapchain(
        &self,
        session: xr::Session,
        info: *const xr::SwapchainCreateInfo,
        swapchain: *mut xr::Swapchain,
    ) -> xr::Result {
        forward!(self.create_swapchain(session, info, swapchain))
    }

    unsafe fn destroy_swapchain(&self, swapchain: xr::Swapchain) -> xr::Result {
        forward!(self.destroy_swapchain(swapchain))
    }

    unsafe fn enumerate_swapchain_images(
        &self,
        swapchain: xr::Swapchain,
        capacity: u32,
        count_output: *mut u32,
        images: *mut xr::SwapchainImageBaseHeader,
    ) -> xr::Result {
        forward!(self.enumerate_swapchain_images(swapchain, capacity, count_output, images))
    }

    unsafe fn acquire_swapchain_image(
        &self,
        swapchain: xr::Swapchain,
        info: *const xr::SwapchainImageAcquireInfo,
        index: *mut u32,
    ) -> xr::Result {
        forward!(self.acquire_swapchain_image(swapchain, info, index))
    }

    unsafe fn release_swapchain_image(
        &self,
        swapchain: xr::Swapchain,
        info: *const xr::SwapchainImageReleaseInfo,
    ) -> xr::Result {
        forward!(self.release_swapchain_image(swapchain, info))
    }

    unsafe fn end_frame(&self, session: xr::Session, info: *const xr::FrameEndInfo) -> xr::Result {
        forward!(self.end_frame(session, info))
    }
}

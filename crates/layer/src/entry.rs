//! Functions handed to the application through `xrGetInstanceProcAddr`.

use core::{
    ffi::{CStr, c_char, c_void},
    mem,
};
use std::sync::Arc;

use ash::vk;
use once_cell::sync::OnceCell;
use openxr_sys::{self as xr, pfn};
use tracing::{debug, error, trace};

use crate::{
    error::LayerError,
    graphics::vulkan::{
        CreateVulkanDeviceKHR, CreateVulkanInstanceKHR, GetOpenGLGraphicsRequirementsKHR,
        GetVulkanExtensionsKHR, GetVulkanGraphicsDevice2KHR, GetVulkanGraphicsDeviceKHR,
        GetVulkanGraphicsRequirementsKHR, GraphicsRequirementsVulkanKHR,
        VulkanDeviceCreateInfoKHR, VulkanGraphicsDeviceGetInfoKHR, VulkanInstanceCreateInfoKHR,
    },
    instance::{self, INSTANCES, Instance, SESSION_OWNERS, SWAPCHAIN_OWNERS},
    manifest::FunctionId,
    proc_table,
};

/// `xrGetInstanceProcAddr` of the next layer, for calls made without an instance.
pub(crate) static NEXT_GET_INSTANCE_PROC_ADDR: OnceCell<pfn::GetInstanceProcAddr> =
    OnceCell::new();

fn report(name: &str, result: Result<xr::Result, LayerError>) -> xr::Result {
    match result {
        Ok(res) => res,
        Err(err) => {
            error!("{name} failed: {err}");
            err.to_xr()
        }
    }
}

fn with_instance(
    name: &str,
    handle: xr::Instance,
    f: impl FnOnce(&Arc<Instance>) -> Result<xr::Result, LayerError>,
) -> xr::Result {
    match instance::instance(handle) {
        Some(instance) => report(name, f(&instance)),
        None => xr::Result::ERROR_HANDLE_INVALID,
    }
}

fn with_session(
    name: &str,
    handle: xr::Session,
    f: impl FnOnce(&Arc<Instance>) -> Result<xr::Result, LayerError>,
) -> xr::Result {
    match instance::session_owner(handle) {
        Some(instance) => report(name, f(&instance)),
        None => xr::Result::ERROR_HANDLE_INVALID,
    }
}

fn with_swapchain(
    name: &str,
    handle: xr::Swapchain,
    f: impl FnOnce(&Arc<Instance>) -> Result<xr::Result, LayerError>,
) -> xr::Result {
    match instance::swapchain_owner(handle) {
        Some(instance) => report(name, f(&instance)),
        None => xr::Result::ERROR_HANDLE_INVALID,
    }
}

/// Layer entry point of an intercepted function.
pub(crate) fn entry_point(id: FunctionId) -> pfn::VoidFunction {
    proc_table!(id => {
        GetSystem => get_system: pfn::GetSystem,
        EnumerateSwapchainFormats => enumerate_swapchain_formats: pfn::EnumerateSwapchainFormats,
        EnumerateViewConfigurationViews => enumerate_view_configuration_views: pfn::EnumerateViewConfigurationViews,
        CreateSession => create_session: pfn::CreateSession,
        DestroySession => destroy_session: pfn::DestroySession,
        BeginSession => begin_session: pfn::BeginSession,
        CreateSwapchain => create_swapchain: pfn::CreateSwapchain,
        DestroySwapchain => destroy_swapchain: pfn::DestroySwapchain,
        EnumerateSwapchainImages => enumerate_swapchain_images: pfn::EnumerateSwapchainImages,
        AcquireSwapchainImage => acquire_swapchain_image: pfn::AcquireSwapchainImage,
        ReleaseSwapchainImage => release_swapchain_image: pfn::ReleaseSwapchainImage,
        EndFrame => end_frame: pfn::EndFrame,
        GetVulkanInstanceExtensionsKHR => get_vulkan_instance_extensions: GetVulkanExtensionsKHR,
        GetVulkanDeviceExtensionsKHR => get_vulkan_device_extensions: GetVulkanExtensionsKHR,
        GetVulkanGraphicsDeviceKHR => get_vulkan_graphics_device: GetVulkanGraphicsDeviceKHR,
        GetVulkanGraphicsRequirementsKHR => get_vulkan_graphics_requirements: GetVulkanGraphicsRequirementsKHR,
        CreateVulkanInstanceKHR => create_vulkan_instance: CreateVulkanInstanceKHR,
        CreateVulkanDeviceKHR => create_vulkan_device: CreateVulkanDeviceKHR,
        GetVulkanGraphicsDevice2KHR => get_vulkan_graphics_device2: GetVulkanGraphicsDevice2KHR,
        GetVulkanGraphicsRequirements2KHR => get_vulkan_graphics_requirements2: GetVulkanGraphicsRequirementsKHR,
        GetOpenGLGraphicsRequirementsKHR => get_opengl_graphics_requirements: GetOpenGLGraphicsRequirementsKHR,
    })
}

pub(crate) unsafe extern "system" fn get_instance_proc_addr(
    instance: xr::Instance,
    name: *const c_char,
    function: *mut Option<pfn::VoidFunction>,
) -> xr::Result {
    if name.is_null() || function.is_null() {
        return xr::Result::ERROR_VALIDATION_FAILURE;
    }
    let name = unsafe { CStr::from_ptr(name) };
    trace!("xrGetInstanceProcAddr called: {name:?}");

    let local = match name.to_bytes() {
        b"xrGetInstanceProcAddr" => Some(unsafe {
            mem::transmute::<pfn::GetInstanceProcAddr, pfn::VoidFunction>(get_instance_proc_addr)
        }),
        b"xrDestroyInstance" => Some(unsafe {
            mem::transmute::<pfn::DestroyInstance, pfn::VoidFunction>(destroy_instance)
        }),
        _ => None,
    };
    if let Some(local) = local {
        unsafe { *function = Some(local) };
        return xr::Result::SUCCESS;
    }

    let Some(owner) = instance::instance(instance) else {
        if instance == xr::Instance::NULL {
            if let Some(next) = NEXT_GET_INSTANCE_PROC_ADDR.get() {
                return unsafe { next(instance, name.as_ptr(), function) };
            }
        }
        unsafe { *function = None };
        return xr::Result::ERROR_HANDLE_INVALID;
    };

    match owner.resolve(name) {
        Ok(resolved) => {
            unsafe { *function = Some(resolved) };
            xr::Result::SUCCESS
        }
        Err(err) => {
            debug!("{name:?} not resolved: {err}");
            unsafe { *function = None };
            err.to_xr()
        }
    }
}

unsafe extern "system" fn destroy_instance(instance: xr::Instance) -> xr::Result {
    trace!("xrDestroyInstance called");

    let Some((_, owner)) = INSTANCES.remove(&instance.into_raw()) else {
        return xr::Result::ERROR_HANDLE_INVALID;
    };
    let res = report("xrDestroyInstance", unsafe { owner.destroy() });
    instance::prune_owners(&owner);
    res
}

unsafe extern "system" fn get_system(
    instance: xr::Instance,
    info: *const xr::SystemGetInfo,
    system_id: *mut xr::SystemId,
) -> xr::Result {
    trace!("xrGetSystem called");

    with_instance("xrGetSystem", instance, |owner| unsafe {
        owner.get_system(info, system_id)
    })
}

unsafe extern "system" fn enumerate_view_configuration_views(
    instance: xr::Instance,
    system_id: xr::SystemId,
    view_configuration_type: xr::ViewConfigurationType,
    capacity: u32,
    count_output: *mut u32,
    views: *mut xr::ViewConfigurationView,
) -> xr::Result {
    trace!("xrEnumerateViewConfigurationViews called");

    with_instance("xrEnumerateViewConfigurationViews", instance, |owner| unsafe {
        owner.enumerate_view_configuration_views(
            system_id,
            view_configuration_type,
            capacity,
            count_output,
            views,
        )
    })
}

unsafe extern "system" fn create_session(
    instance: xr::Instance,
    info: *const xr::SessionCreateInfo,
    session: *mut xr::Session,
) -> xr::Result {
    trace!("xrCreateSession called");

    with_instance("xrCreateSession", instance, |owner| {
        let res = unsafe { owner.create_session(info, session) }?;
        SESSION_OWNERS.insert(unsafe { *session }.into_raw(), owner.clone());
        Ok(res)
    })
}

unsafe extern "system" fn destroy_session(session: xr::Session) -> xr::Result {
    trace!("xrDestroySession called");

    with_session("xrDestroySession", session, |owner| {
        let res = unsafe { owner.destroy_session(session) };
        instance::prune_owners(owner);
        res
    })
}

unsafe extern "system" fn begin_session(
    session: xr::Session,
    info: *const xr::SessionBeginInfo,
) -> xr::Result {
    trace!("xrBeginSession called");

    with_session("xrBeginSession", session, |owner| unsafe {
        owner.begin_session(session, info)
    })
}

unsafe extern "system" fn enumerate_swapchain_formats(
    session: xr::Session,
    capacity: u32,
    count_output: *mut u32,
    formats: *mut i64,
) -> xr::Result {
    trace!("xrEnumerateSwapchainFormats called");

    with_session("xrEnumerateSwapchainFormats", session, |owner| unsafe {
        owner.enumerate_swapchain_formats(session, capacity, count_output, formats)
    })
}

unsafe extern "system" fn create_swapchain(
    session: xr::Session,
    info: *const xr::SwapchainCreateInfo,
    swapchain: *mut xr::Swapchain,
) -> xr::Result {
    trace!("xrCreateSwapchain called");

    with_session("xrCreateSwapchain", session, |owner| {
        let res = unsafe { owner.create_swapchain(session, info, swapchain) }?;
        SWAPCHAIN_OWNERS.insert(unsafe { *swapchain }.into_raw(), owner.clone());
        Ok(res)
    })
}

unsafe extern "system" fn destroy_swapchain(swapchain: xr::Swapchain) -> xr::Result {
    trace!("xrDestroySwapchain called");

    with_swapchain("xrDestroySwapchain", swapchain, |owner| {
        let res = unsafe { owner.destroy_swapchain(swapchain) };
        instance::prune_owners(owner);
        res
    })
}

unsafe extern "system" fn enumerate_swapchain_images(
    swapchain: xr::Swapchain,
    capacity: u32,
    count_output: *mut u32,
    images: *mut xr::SwapchainImageBaseHeader,
) -> xr::Result {
    trace!("xrEnumerateSwapchainImages called");

    with_swapchain("xrEnumerateSwapchainImages", swapchain, |owner| unsafe {
        owner.enumerate_swapchain_images(swapchain, capacity, count_output, images)
    })
}

unsafe extern "system" fn acquire_swapchain_image(
    swapchain: xr::Swapchain,
    info: *const xr::SwapchainImageAcquireInfo,
    index: *mut u32,
) -> xr::Result {
    trace!("xrAcquireSwapchainImage called");

    with_swapchain("xrAcquireSwapchainImage", swapchain, |owner| unsafe {
        owner.acquire_swapchain_image(swapchain, info, index)
    })
}

unsafe extern "system" fn release_swapchain_image(
    swapchain: xr::Swapchain,
    info: *const xr::SwapchainImageReleaseInfo,
) -> xr::Result {
    trace!("xrReleaseSwapchainImage called");

    with_swapchain("xrReleaseSwapchainImage", swapchain, |owner| unsafe {
        owner.release_swapchain_image(swapchain, info)
    })
}

unsafe extern "system" fn end_frame(session: xr::Session, info: *const xr::FrameEndInfo) -> xr::Result {
    trace!("xrEndFrame called");

    with_session("xrEndFrame", session, |owner| unsafe { owner.end_frame(session, info) })
}

unsafe extern "system" fn get_vulkan_instance_extensions(
    instance: xr::Instance,
    system_id: xr::SystemId,
    capacity: u32,
    count_output: *mut u32,
    buffer: *mut c_char,
) -> xr::Result {
    trace!("xrGetVulkanInstanceExtensionsKHR called");

    with_instance("xrGetVulkanInstanceExtensionsKHR", instance, |owner| unsafe {
        owner.get_vulkan_instance_extensions(system_id, capacity, count_output, buffer)
    })
}

unsafe extern "system" fn get_vulkan_device_extensions(
    instance: xr::Instance,
    system_id: xr::SystemId,
    capacity: u32,
    count_output: *mut u32,
    buffer: *mut c_char,
) -> xr::Result {
    trace!("xrGetVulkanDeviceExtensionsKHR called");

    with_instance("xrGetVulkanDeviceExtensionsKHR", instance, |owner| unsafe {
        owner.get_vulkan_device_extensions(system_id, capacity, count_output, buffer)
    })
}

unsafe extern "system" fn get_vulkan_graphics_device(
    instance: xr::Instance,
    system_id: xr::SystemId,
    vk_instance: vk::Instance,
    vk_physical_device: *mut vk::PhysicalDevice,
) -> xr::Result {
    trace!("xrGetVulkanGraphicsDeviceKHR called");

    with_instance("xrGetVulkanGraphicsDeviceKHR", instance, |owner| unsafe {
        owner.get_vulkan_graphics_device(system_id, vk_instance, vk_physical_device)
    })
}

unsafe extern "system" fn get_vulkan_graphics_device2(
    instance: xr::Instance,
    info: *const VulkanGraphicsDeviceGetInfoKHR,
    vk_physical_device: *mut vk::PhysicalDevice,
) -> xr::Result {
    trace!("xrGetVulkanGraphicsDevice2KHR called");

    with_instance("xrGetVulkanGraphicsDevice2KHR", instance, |owner| unsafe {
        owner.get_vulkan_graphics_device2(info, vk_physical_device)
    })
}

unsafe extern "system" fn get_vulkan_graphics_requirements(
    instance: xr::Instance,
    system_id: xr::SystemId,
    requirements: *mut GraphicsRequirementsVulkanKHR,
) -> xr::Result {
    trace!("xrGetVulkanGraphicsRequirementsKHR called");

    with_instance("xrGetVulkanGraphicsRequirementsKHR", instance, |owner| unsafe {
        owner.get_vulkan_graphics_requirements(system_id, requirements)
    })
}

unsafe extern "system" fn get_vulkan_graphics_requirements2(
    instance: xr::Instance,
    system_id: xr::SystemId,
    requirements: *mut GraphicsRequirementsVulkanKHR,
) -> xr::Result {
    trace!("xrGetVulkanGraphicsRequirements2KHR called");

    with_instance("xrGetVulkanGraphicsRequirements2KHR", instance, |owner| unsafe {
        owner.get_vulkan_graphics_requirements(system_id, requirements)
    })
}

unsafe extern "system" fn create_vulkan_instance(
    instance: xr::Instance,
    info: *const VulkanInstanceCreateInfoKHR,
    vk_instance: *mut vk::Instance,
    vk_result: *mut vk::Result,
) -> xr::Result {
    trace!("xrCreateVulkanInstanceKHR called");

    with_instance("xrCreateVulkanInstanceKHR", instance, |owner| unsafe {
        owner.create_vulkan_instance(info, vk_instance, vk_result)
    })
}

unsafe extern "system" fn create_vulkan_device(
    instance: xr::Instance,
    info: *const VulkanDeviceCreateInfoKHR,
    vk_device: *mut vk::Device,
    vk_result: *mut vk::Result,
) -> xr::Result {
    trace!("xrCreateVulkanDeviceKHR called");

    with_instance("xrCreateVulkanDeviceKHR", instance, |owner| unsafe {
        owner.create_vulkan_device(info, vk_device, vk_result)
    })
}

unsafe extern "system" fn get_opengl_graphics_requirements(
    instance: xr::Instance,
    _system_id: xr::SystemId,
    _requirements: *mut c_void,
) -> xr::Result {
    trace!("xrGetOpenGLGraphicsRequirementsKHR called");

    with_instance("xrGetOpenGLGraphicsRequirementsKHR", instance, |_| {
        Err(LayerError::FunctionNotSupported(
            "xrGetOpenGLGraphicsRequirementsKHR".to_string(),
        ))
    })
}

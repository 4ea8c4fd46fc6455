//! `XR_KHR_vulkan_enable` and `XR_KHR_vulkan_enable2` implemented over a Direct3D 12 runtime.

use core::{
    ffi::{CStr, c_char, c_void},
    mem,
    ptr::{self, NonNull},
};

use ash::{Entry, vk};
use openxr_sys as xr;
use scopeguard::guard;
use tracing::{debug, info, warn};

use crate::{
    error::LayerError, fill_two_call_str, instance::Instance, interop::vulkan as interop,
};

/// `XrGraphicsRequirementsVulkanKHR`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GraphicsRequirementsVulkanKHR {
    pub ty: xr::StructureType,
    pub next: *mut c_void,
    pub min_api_version_supported: xr::Version,
    pub max_api_version_supported: xr::Version,
}

/// `XrVulkanGraphicsDeviceGetInfoKHR`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VulkanGraphicsDeviceGetInfoKHR {
    pub ty: xr::StructureType,
    pub next: *const c_void,
    pub system_id: xr::SystemId,
    pub vulkan_instance: vk::Instance,
}

/// `XrVulkanInstanceCreateInfoKHR`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VulkanInstanceCreateInfoKHR {
    pub ty: xr::StructureType,
    pub next: *const c_void,
    pub system_id: xr::SystemId,
    pub create_flags: u64,
    pub pfn_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub vulkan_create_info: *const vk::InstanceCreateInfo<'static>,
    pub vulkan_allocator: *const vk::AllocationCallbacks<'static>,
}

/// `XrVulkanDeviceCreateInfoKHR`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VulkanDeviceCreateInfoKHR {
    pub ty: xr::StructureType,
    pub next: *const c_void,
    pub system_id: xr::SystemId,
    pub create_flags: u64,
    pub pfn_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub vulkan_physical_device: vk::PhysicalDevice,
    pub vulkan_create_info: *const vk::DeviceCreateInfo<'static>,
    pub vulkan_allocator: *const vk::AllocationCallbacks<'static>,
}

pub type GetVulkanExtensionsKHR = unsafe extern "system" fn(
    instance: xr::Instance,
    system_id: xr::SystemId,
    capacity: u32,
    count_output: *mut u32,
    buffer: *mut c_char,
) -> xr::Result;

pub type GetVulkanGraphicsDeviceKHR = unsafe extern "system" fn(
    instance: xr::Instance,
    system_id: xr::SystemId,
    vk_instance: vk::Instance,
    vk_physical_device: *mut vk::PhysicalDevice,
) -> xr::Result;

pub type GetVulkanGraphicsDevice2KHR = unsafe extern "system" fn(
    instance: xr::Instance,
    info: *const VulkanGraphicsDeviceGetInfoKHR,
    vk_physical_device: *mut vk::PhysicalDevice,
) -> xr::Result;

pub type GetVulkanGraphicsRequirementsKHR = unsafe extern "system" fn(
    instance: xr::Instance,
    system_id: xr::SystemId,
    requirements: *mut GraphicsRequirementsVulkanKHR,
) -> xr::Result;

pub type CreateVulkanInstanceKHR = unsafe extern "system" fn(
    instance: xr::Instance,
    info: *const VulkanInstanceCreateInfoKHR,
    vk_instance: *mut vk::Instance,
    vk_result: *mut vk::Result,
) -> xr::Result;

pub type CreateVulkanDeviceKHR = unsafe extern "system" fn(
    instance: xr::Instance,
    info: *const VulkanDeviceCreateInfoKHR,
    vk_device: *mut vk::Device,
    vk_result: *mut vk::Result,
) -> xr::Result;

pub type GetOpenGLGraphicsRequirementsKHR = unsafe extern "system" fn(
    instance: xr::Instance,
    system_id: xr::SystemId,
    requirements: *mut c_void,
) -> xr::Result;

const MIN_API_VERSION: xr::Version = xr::Version::new(1, 0, 0);
const MAX_API_VERSION: xr::Version = xr::Version::new(2, 0, 0);

fn join_extensions(extensions: &[&CStr]) -> String {
    extensions
        .iter()
        .map(|name| name.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `names` followed by every entry of `required` it lacks.
///
/// # Safety
/// `names` must point to `count` nul terminated strings.
unsafe fn merge_extensions(
    names: *const *const c_char,
    count: u32,
    required: &[&'static CStr],
) -> Vec<*const c_char> {
    let mut merged = if names.is_null() {
        Vec::new()
    } else {
        unsafe { core::slice::from_raw_parts(names, count as usize) }.to_vec()
    };

    for &extension in required {
        let present = merged
            .iter()
            .any(|&name| unsafe { CStr::from_ptr(name) } == extension);
        if !present {
            debug!("enabling {extension:?}");
            merged.push(extension.as_ptr());
        }
    }
    merged
}

/// Entry of a `pNext` chain.
struct ChainEntry {
    node: NonNull<vk::BaseOutStructure<'static>>,
    /// Entry pointing at `node`, `None` when `node` is the head.
    prev: Option<NonNull<vk::BaseOutStructure<'static>>>,
}

/// First structure of type `ty` in a `pNext` chain.
///
/// # Safety
/// `next` must be null or a valid Vulkan structure chain.
unsafe fn find_in_chain(next: *const c_void, ty: vk::StructureType) -> Option<ChainEntry> {
    let mut prev = None;
    let mut node = NonNull::new(next.cast::<vk::BaseOutStructure>().cast_mut())?;
    loop {
        let base = unsafe { node.as_ref() };
        if base.s_type == ty {
            return Some(ChainEntry { node, prev });
        }

        prev = Some(node);
        node = NonNull::new(base.p_next)?;
    }
}

impl Instance {
    /// # Safety
    /// Arguments must satisfy the `xrGetVulkanInstanceExtensionsKHR` contract.
    pub unsafe fn get_vulkan_instance_extensions(
        &self,
        system_id: xr::SystemId,
        capacity: u32,
        count_output: *mut u32,
        buffer: *mut c_char,
    ) -> Result<xr::Result, LayerError> {
        self.hmd_adapter(system_id)?;
        let extensions = join_extensions(&interop::INSTANCE_EXTENSIONS);
        unsafe { fill_two_call_str(&extensions, capacity, count_output, buffer) }
    }

    /// # Safety
    /// Arguments must satisfy the `xrGetVulkanDeviceExtensionsKHR` contract.
    pub unsafe fn get_vulkan_device_extensions(
        &self,
        system_id: xr::SystemId,
        capacity: u32,
        count_output: *mut u32,
        buffer: *mut c_char,
    ) -> Result<xr::Result, LayerError> {
        self.hmd_adapter(system_id)?;
        let extensions = join_extensions(&interop::DEVICE_EXTENSIONS);
        unsafe { fill_two_call_str(&extensions, capacity, count_output, buffer) }
    }

    /// Physical device of `vk_instance` on the runtime adapter.
    ///
    /// # Safety
    /// `vk_instance` must be a live instance created by the application.
    pub unsafe fn get_vulkan_graphics_device(
        &self,
        system_id: xr::SystemId,
        vk_instance: vk::Instance,
        vk_physical_device: *mut vk::PhysicalDevice,
    ) -> Result<xr::Result, LayerError> {
        if vk_physical_device.is_null() {
            return Err(LayerError::Validation("null physical device output"));
        }

        let adapter = self.hmd_adapter(system_id)?;
        self.negotiator.remember_vulkan_instance(vk_instance);
        let devices = unsafe {
            self.provider
                .vulkan_physical_devices(vk_instance, self.negotiator.get_instance_proc_addr())
        }?;
        let physical_device = self
            .negotiator
            .select_physical_device(adapter.luid, vk_instance, &devices)?;

        unsafe { *vk_physical_device = physical_device };
        Ok(xr::Result::SUCCESS)
    }

    /// # Safety
    /// Arguments must satisfy the `xrGetVulkanGraphicsDevice2KHR` contract.
    pub unsafe fn get_vulkan_graphics_device2(
        &self,
        info: *const VulkanGraphicsDeviceGetInfoKHR,
        vk_physical_device: *mut vk::PhysicalDevice,
    ) -> Result<xr::Result, LayerError> {
        let info = unsafe { info.as_ref() }.ok_or(LayerError::Validation("null get info"))?;
        if info.ty != xr::StructureType::VULKAN_GRAPHICS_DEVICE_GET_INFO_KHR {
            return Err(LayerError::Validation("unexpected get info structure type"));
        }
        if !info.next.is_null() {
            return Err(LayerError::Validation("unexpected get info chain"));
        }

        unsafe {
            self.get_vulkan_graphics_device(
                info.system_id,
                info.vulkan_instance,
                vk_physical_device,
            )
        }
    }

    /// # Safety
    /// Arguments must satisfy the `xrGetVulkanGraphicsRequirementsKHR` contract.
    pub unsafe fn get_vulkan_graphics_requirements(
        &self,
        system_id: xr::SystemId,
        requirements: *mut GraphicsRequirementsVulkanKHR,
    ) -> Result<xr::Result, LayerError> {
        let requirements = unsafe { requirements.as_mut() }
            .ok_or(LayerError::Validation("null graphics requirements"))?;
        if requirements.ty != xr::StructureType::GRAPHICS_REQUIREMENTS_VULKAN_KHR {
            return Err(LayerError::Validation(
                "unexpected graphics requirements structure type",
            ));
        }

        self.hmd_adapter(system_id)?;
        requirements.min_api_version_supported = MIN_API_VERSION;
        requirements.max_api_version_supported = MAX_API_VERSION;
        Ok(xr::Result::SUCCESS)
    }

    /// Create the application's Vulkan instance with the interop extensions enabled.
    ///
    /// # Safety
    /// Arguments must satisfy the `xrCreateVulkanInstanceKHR` contract.
    pub unsafe fn create_vulkan_instance(
        &self,
        info: *const VulkanInstanceCreateInfoKHR,
        vk_instance: *mut vk::Instance,
        vk_result: *mut vk::Result,
    ) -> Result<xr::Result, LayerError> {
        let info = unsafe { info.as_ref() }.ok_or(LayerError::Validation("null create info"))?;
        if info.ty != xr::StructureType::VULKAN_INSTANCE_CREATE_INFO_KHR
            || info.vulkan_create_info.is_null()
            || vk_instance.is_null()
            || vk_result.is_null()
        {
            return Err(LayerError::Validation("invalid vulkan instance create info"));
        }
        let get_instance_proc_addr = info
            .pfn_get_instance_proc_addr
            .ok_or(LayerError::Validation("null pfnGetInstanceProcAddr"))?;
        self.hmd_adapter(info.system_id)?;

        let mut create_info = unsafe { *info.vulkan_create_info };
        let extensions = unsafe {
            merge_extensions(
                create_info.pp_enabled_extension_names,
                create_info.enabled_extension_count,
                &interop::INSTANCE_EXTENSIONS,
            )
        };
        create_info.enabled_extension_count = extensions.len() as u32;
        create_info.pp_enabled_extension_names = extensions.as_ptr();

        let entry = unsafe {
            Entry::from_static_fn(ash::StaticFn {
                get_instance_proc_addr,
            })
        };
        let allocator = unsafe { info.vulkan_allocator.as_ref() };
        match unsafe { entry.create_instance(&create_info, allocator) } {
            Ok(instance) => {
                info!("vulkan instance created: {:?}", instance.handle());
                self.negotiator
                    .remember_get_instance_proc_addr(get_instance_proc_addr);
                self.negotiator.remember_vulkan_instance(instance.handle());
                unsafe {
                    *vk_instance = instance.handle();
                    *vk_result = vk::Result::SUCCESS;
                }
            }
            Err(err) => {
                warn!("vkCreateInstance failed: {err}");
                unsafe { *vk_result = err };
            }
        }

        Ok(xr::Result::SUCCESS)
    }

    /// Create the application's Vulkan device with the interop extensions and timeline semaphores.
    ///
    /// # Safety
    /// Arguments must satisfy the `xrCreateVulkanDeviceKHR` contract.
    pub unsafe fn create_vulkan_device(
        &self,
        info: *const VulkanDeviceCreateInfoKHR,
        vk_device: *mut vk::Device,
        vk_result: *mut vk::Result,
    ) -> Result<xr::Result, LayerError> {
        let info = unsafe { info.as_ref() }.ok_or(LayerError::Validation("null create info"))?;
        if info.ty != xr::StructureType::VULKAN_DEVICE_CREATE_INFO_KHR
            || info.vulkan_create_info.is_null()
            || vk_device.is_null()
            || vk_result.is_null()
        {
            return Err(LayerError::Validation("invalid vulkan device create info"));
        }
        let get_instance_proc_addr = info
            .pfn_get_instance_proc_addr
            .ok_or(LayerError::Validation("null pfnGetInstanceProcAddr"))?;
        self.hmd_adapter(info.system_id)?;

        if self.negotiator.selected_physical_device() != Some(info.vulkan_physical_device) {
            return Err(LayerError::Validation(
                "physical device was not returned by xrGetVulkanGraphicsDevice2KHR",
            ));
        }
        let vulkan_instance = self
            .negotiator
            .vulkan_instance()
            .ok_or(LayerError::Validation("no vulkan instance"))?;

        let mut create_info = unsafe { *info.vulkan_create_info };
        let extensions = unsafe {
            merge_extensions(
                create_info.pp_enabled_extension_names,
                create_info.enabled_extension_count,
                &interop::DEVICE_EXTENSIONS,
            )
        };
        create_info.enabled_extension_count = extensions.len() as u32;
        create_info.pp_enabled_extension_names = extensions.as_ptr();

        // application feature structs are const, timeline semaphores go through patched copies
        let mut timeline = vk::PhysicalDeviceTimelineSemaphoreFeatures::default()
            .timeline_semaphore(true);
        let mut vulkan12;
        let mut patched: Option<(_, *mut vk::BaseOutStructure<'static>)> = None;
        if let Some(entry) = unsafe {
            find_in_chain(
                create_info.p_next,
                vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES,
            )
        } {
            timeline = unsafe {
                *entry
                    .node
                    .cast::<vk::PhysicalDeviceTimelineSemaphoreFeatures>()
                    .as_ptr()
            };
            if timeline.timeline_semaphore == vk::FALSE {
                timeline.timeline_semaphore = vk::TRUE;
                patched = Some((entry.prev, ptr::from_mut(&mut timeline).cast()));
            }
        } else if let Some(entry) = unsafe {
            find_in_chain(
                create_info.p_next,
                vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
            )
        } {
            vulkan12 = unsafe {
                *entry
                    .node
                    .cast::<vk::PhysicalDeviceVulkan12Features>()
                    .as_ptr()
            };
            if vulkan12.timeline_semaphore == vk::FALSE {
                vulkan12.timeline_semaphore = vk::TRUE;
                patched = Some((entry.prev, ptr::from_mut(&mut vulkan12).cast()));
            }
        } else {
            timeline.p_next = create_info.p_next.cast_mut();
            create_info.p_next = ptr::from_ref(&timeline).cast();
        }

        let _restore = match patched {
            Some((None, replacement)) => {
                debug!("enabling timeline semaphores");
                create_info.p_next = replacement.cast_const().cast();
                None
            }
            Some((Some(prev), replacement)) => {
                debug!("enabling timeline semaphores");
                let prev = prev.as_ptr();
                let original = unsafe { mem::replace(&mut (*prev).p_next, replacement) };
                Some(guard(prev, move |prev| unsafe { (*prev).p_next = original }))
            }
            None => None,
        };

        let instance = unsafe { interop::load_instance(get_instance_proc_addr, vulkan_instance) };
        let allocator = unsafe { info.vulkan_allocator.as_ref() };
        match unsafe { instance.create_device(info.vulkan_physical_device, &create_info, allocator) }
        {
            Ok(device) => {
                info!("vulkan device created: {:?}", device.handle());
                self.negotiator
                    .remember_get_instance_proc_addr(get_instance_proc_addr);
                unsafe {
                    *vk_device = device.handle();
                    *vk_result = vk::Result::SUCCESS;
                }
            }
            Err(err) => {
                warn!("vkCreateDevice failed: {err}");
                unsafe { *vk_result = err };
            }
        }

        Ok(xr::Result::SUCCESS)
    }
}

//! Graphics binding negotiation between the application API and the runtime API.

pub mod format;
pub mod vulkan;

use core::{
    ffi::c_void,
    fmt::{self, Debug},
    ptr::{self, NonNull},
};

use ash::vk;
use once_cell::sync::OnceCell;
use openxr_sys as xr;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{error::LayerError, manifest};

/// Graphics API a session or a runtime is driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKind {
    Vulkan,
    D3D12,
    OpenGl,
}

impl ApiKind {
    /// Graphics API of a session graphics binding structure.
    pub fn of_binding(ty: xr::StructureType) -> Option<Self> {
        match ty {
            xr::StructureType::GRAPHICS_BINDING_VULKAN_KHR => Some(ApiKind::Vulkan),
            xr::StructureType::GRAPHICS_BINDING_D3D12_KHR => Some(ApiKind::D3D12),
            xr::StructureType::GRAPHICS_BINDING_OPENGL_WIN32_KHR
            | xr::StructureType::GRAPHICS_BINDING_OPENGL_XLIB_KHR => Some(ApiKind::OpenGl),
            _ => None,
        }
    }

    /// API the runtime renders with, judged from the instance extensions enabled on it.
    pub fn of_extensions(extensions: &[String]) -> Option<Self> {
        let has = |name: &str| extensions.iter().any(|ext| ext == name);

        if has(manifest::D3D12_ENABLE) {
            Some(ApiKind::D3D12)
        } else if has(manifest::VULKAN_ENABLE2) || has(manifest::VULKAN_ENABLE) {
            Some(ApiKind::Vulkan)
        } else if has(manifest::OPENGL_ENABLE) {
            Some(ApiKind::OpenGl)
        } else {
            None
        }
    }
}

/// Locally unique identifier of a GPU adapter.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Luid {
    pub low: u32,
    pub high: i32,
}

impl Luid {
    /// Convert Vulkan `deviceLUID` bytes.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        let [a, b, c, d, e, f, g, h] = bytes;
        Self {
            low: u32::from_le_bytes([a, b, c, d]),
            high: i32::from_le_bytes([e, f, g, h]),
        }
    }
}

impl Debug for Luid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:08x}", self.high, self.low)
    }
}

/// `XrGraphicsBindingVulkanKHR`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GraphicsBindingVulkanKHR {
    pub ty: xr::StructureType,
    pub next: *const c_void,
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub queue_family_index: u32,
    pub queue_index: u32,
}

/// `XrGraphicsBindingD3D12KHR`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GraphicsBindingD3D12KHR {
    pub ty: xr::StructureType,
    pub next: *const c_void,
    pub device: *mut c_void,
    pub queue: *mut c_void,
}

/// `XrGraphicsRequirementsD3D12KHR`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GraphicsRequirementsD3D12KHR {
    pub ty: xr::StructureType,
    pub next: *mut c_void,
    pub adapter_luid: Luid,
    pub min_feature_level: i32,
}

impl Default for GraphicsRequirementsD3D12KHR {
    fn default() -> Self {
        Self {
            ty: xr::StructureType::GRAPHICS_REQUIREMENTS_D3D12_KHR,
            next: ptr::null_mut(),
            adapter_luid: Luid::default(),
            min_feature_level: 0,
        }
    }
}

/// `XrSwapchainImageD3D12KHR`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SwapchainImageD3D12KHR {
    pub ty: xr::StructureType,
    pub next: *mut c_void,
    pub texture: *mut c_void,
}

impl Default for SwapchainImageD3D12KHR {
    fn default() -> Self {
        Self {
            ty: xr::StructureType::SWAPCHAIN_IMAGE_D3D12_KHR,
            next: ptr::null_mut(),
            texture: ptr::null_mut(),
        }
    }
}

/// `XrSwapchainImageVulkanKHR`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SwapchainImageVulkanKHR {
    pub ty: xr::StructureType,
    pub next: *mut c_void,
    pub image: vk::Image,
}

pub type GetD3D12GraphicsRequirementsKHR = unsafe extern "system" fn(
    instance: xr::Instance,
    system_id: xr::SystemId,
    requirements: *mut GraphicsRequirementsD3D12KHR,
) -> xr::Result;

/// Adapter and feature level the runtime requires of Direct3D 12 sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeAdapter {
    pub luid: Luid,
    pub min_feature_level: i32,
}

/// Vulkan objects of an application session binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanBinding {
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub queue_family_index: u32,
    pub queue_index: u32,
}

impl From<&GraphicsBindingVulkanKHR> for VulkanBinding {
    fn from(binding: &GraphicsBindingVulkanKHR) -> Self {
        Self {
            instance: binding.instance,
            physical_device: binding.physical_device,
            device: binding.device,
            queue_family_index: binding.queue_family_index,
            queue_index: binding.queue_index,
        }
    }
}

/// Graphics binding found in a session create info chain.
#[derive(Debug, Clone, Copy)]
pub struct FoundBinding {
    pub api: ApiKind,
    pub node: NonNull<xr::BaseInStructure>,
    /// Chain entry pointing at `node`, `None` when `node` is the head.
    pub prev: Option<NonNull<xr::BaseInStructure>>,
}

/// Find the first graphics binding structure of a `next` chain.
///
/// # Safety
/// `next` must be null or a valid OpenXR input structure chain.
pub unsafe fn find_binding(next: *const c_void) -> Option<FoundBinding> {
    let mut prev = None;
    let mut node = NonNull::new(next.cast::<xr::BaseInStructure>().cast_mut())?;
    loop {
        let base = unsafe { node.as_ref() };
        if let Some(api) = ApiKind::of_binding(base.ty) {
            return Some(FoundBinding { api, node, prev });
        }

        prev = Some(node);
        node = NonNull::new(base.next.cast_mut())?;
    }
}

/// Outcome of session binding negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPlan {
    /// Runtime is driven with the application binding as is.
    Passthrough { app_api: Option<ApiKind> },
    /// Vulkan application on an instance bridged onto Direct3D 12.
    Interop(VulkanBinding),
}

#[derive(Default)]
struct Bootstrap {
    get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    instance: Option<vk::Instance>,
    /// Physical device picked for a Vulkan instance.
    physical_device: Option<(vk::Instance, vk::PhysicalDevice)>,
}

/// Per instance graphics binding negotiator.
pub struct Negotiator {
    runtime_api: Option<ApiKind>,
    bridged: bool,
    adapter: OnceCell<RuntimeAdapter>,
    bootstrap: Mutex<Bootstrap>,
}

impl Negotiator {
    /// `runtime_api` is the graphics API the instance enabled on the runtime,
    /// `bridged` whether Vulkan is served over it by the layer.
    pub fn new(runtime_api: Option<ApiKind>, bridged: bool) -> Self {
        Self {
            runtime_api,
            bridged,
            adapter: OnceCell::new(),
            bootstrap: Mutex::new(Bootstrap::default()),
        }
    }

    pub fn runtime_api(&self) -> Option<ApiKind> {
        self.runtime_api
    }

    pub fn is_bridged(&self) -> bool {
        self.bridged
    }

    /// Runtime adapter, queried once per instance.
    pub fn adapter_or_query(
        &self,
        query: impl FnOnce() -> Result<RuntimeAdapter, LayerError>,
    ) -> Result<RuntimeAdapter, LayerError> {
        self.adapter
            .get_or_try_init(|| {
                let adapter = query()?;
                info!(
                    "runtime adapter luid: {:?} min feature level: {:#x}",
                    adapter.luid, adapter.min_feature_level
                );
                Ok(adapter)
            })
            .copied()
    }

    pub fn adapter(&self) -> Option<RuntimeAdapter> {
        self.adapter.get().copied()
    }

    /// Decide how a session with the given binding is driven.
    ///
    /// # Safety
    /// `found` must point into a live chain.
    pub unsafe fn plan(&self, found: Option<&FoundBinding>) -> SessionPlan {
        let Some(found) = found else {
            debug!("session without graphics binding");
            return SessionPlan::Passthrough { app_api: None };
        };

        if found.api == ApiKind::Vulkan && self.bridged {
            let binding = unsafe { found.node.cast::<GraphicsBindingVulkanKHR>().as_ref() };
            return SessionPlan::Interop(VulkanBinding::from(binding));
        }

        SessionPlan::Passthrough {
            app_api: Some(found.api),
        }
    }

    /// Fails unless the application device is the runtime adapter.
    pub fn check_device(&self, runtime: Luid, app: Option<Luid>) -> Result<(), LayerError> {
        if app == Some(runtime) {
            Ok(())
        } else {
            Err(LayerError::GraphicsDeviceMismatch { runtime, app })
        }
    }

    /// Pick the physical device of `instance` matching the runtime adapter and remember it.
    pub fn select_physical_device(
        &self,
        runtime: Luid,
        instance: vk::Instance,
        devices: &[(vk::PhysicalDevice, Option<Luid>)],
    ) -> Result<vk::PhysicalDevice, LayerError> {
        let mut bootstrap = self.bootstrap.lock();
        if let Some((cached, physical_device)) = bootstrap.physical_device {
            if cached == instance {
                return Ok(physical_device);
            }
        }

        let physical_device = devices
            .iter()
            .find(|(_, luid)| *luid == Some(runtime))
            .map(|&(physical_device, _)| physical_device)
            .ok_or(LayerError::GraphicsDeviceMismatch { runtime, app: None })?;

        debug!("selected vulkan physical device: {physical_device:?} of {instance:?}");
        bootstrap.physical_device = Some((instance, physical_device));
        Ok(physical_device)
    }

    /// Physical device last picked by [`Negotiator::select_physical_device`].
    pub fn selected_physical_device(&self) -> Option<vk::PhysicalDevice> {
        self.bootstrap
            .lock()
            .physical_device
            .map(|(_, physical_device)| physical_device)
    }

    pub fn remember_get_instance_proc_addr(&self, f: vk::PFN_vkGetInstanceProcAddr) {
        self.bootstrap.lock().get_instance_proc_addr = Some(f);
    }

    pub fn remember_vulkan_instance(&self, instance: vk::Instance) {
        self.bootstrap.lock().instance = Some(instance);
    }

    /// Application Vulkan instance devices are created on.
    pub fn vulkan_instance(&self) -> Option<vk::Instance> {
        self.bootstrap.lock().instance
    }

    /// `vkGetInstanceProcAddr` the application handed to `xrCreateVulkanInstanceKHR`.
    pub fn get_instance_proc_addr(&self) -> Option<vk::PFN_vkGetInstanceProcAddr> {
        self.bootstrap.lock().get_instance_proc_addr
    }
}

//! Swapchain interop bridge.
//!
//! The runtime side (Direct3D 12) exports textures and one timeline fence per
//! session as shared handles, the application side (Vulkan) imports them.

#[cfg(windows)]
mod d3d12;
#[cfg(test)]
pub mod mock;
pub mod native;
pub mod vulkan;

use core::{
    ffi::c_void,
    fmt::{self, Debug},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use std::sync::Arc;

use ash::vk;
use openxr_sys as xr;
use tracing::debug;

use crate::{
    error::LayerError,
    graphics::{
        Luid, RuntimeAdapter, VulkanBinding,
        format::{self, DxgiFormat},
    },
};

/// OS handle exported by one API and imported by the other. Closed on drop.
pub struct SharedHandle {
    raw: usize,
    close: fn(usize),
}

impl SharedHandle {
    pub fn new(raw: usize, close: fn(usize)) -> Self {
        Self { raw, close }
    }

    pub fn raw(&self) -> usize {
        self.raw
    }
}

impl Debug for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedHandle({:#x})", self.raw)
    }
}

impl Drop for SharedHandle {
    fn drop(&mut self) {
        (self.close)(self.raw);
    }
}

/// Properties of a runtime texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub array_size: u32,
    pub mip_count: u32,
    pub sample_count: u32,
    pub format: DxgiFormat,
}

/// Properties of the application image created over a runtime texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppImageDesc {
    pub width: u32,
    pub height: u32,
    pub array_size: u32,
    pub mip_count: u32,
    pub sample_count: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
}

impl AppImageDesc {
    /// Vulkan image description for an OpenXR swapchain request.
    pub fn from_swapchain(info: &xr::SwapchainCreateInfo, format: vk::Format) -> Self {
        let usage_flags = info.usage_flags;
        let has = |flag: xr::SwapchainUsageFlags| usage_flags.into_raw() & flag.into_raw() != 0;

        let mut usage = vk::ImageUsageFlags::empty();
        if has(xr::SwapchainUsageFlags::COLOR_ATTACHMENT) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if has(xr::SwapchainUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if has(xr::SwapchainUsageFlags::UNORDERED_ACCESS) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if has(xr::SwapchainUsageFlags::TRANSFER_SRC) {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if has(xr::SwapchainUsageFlags::TRANSFER_DST) {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if has(xr::SwapchainUsageFlags::SAMPLED) {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }

        let mut flags = vk::ImageCreateFlags::empty();
        if has(xr::SwapchainUsageFlags::MUTABLE_FORMAT) {
            flags |= vk::ImageCreateFlags::MUTABLE_FORMAT;
        }

        Self {
            width: info.width,
            height: info.height,
            array_size: info.array_size * info.face_count.max(1),
            mip_count: info.mip_count,
            sample_count: info.sample_count,
            format,
            usage,
            flags,
        }
    }
}

/// Runtime side of the session timeline fence.
pub trait RuntimeFence: Send + Sync {
    /// Make the runtime queue wait until the fence reaches `value`.
    fn queue_wait(&self, value: u64) -> anyhow::Result<()>;

    fn completed_value(&self) -> u64;
}

/// Application side of the session timeline fence.
pub trait AppFence: Send + Sync {
    /// Signal `value` after all work submitted so far to the application queue.
    fn signal_on_queue(&self, value: u64) -> anyhow::Result<()>;

    /// Block until the fence reaches `value`. `false` on timeout.
    fn wait(&self, value: u64, timeout: Duration) -> anyhow::Result<bool>;
}

/// Application view of a runtime texture. Releases its imported memory on drop.
pub trait AppImage: Send + Sync {
    fn handle(&self) -> vk::Image;
}

/// Runtime device created on the runtime adapter.
#[allow(clippy::missing_safety_doc)]
pub trait RuntimeDevice: Send + Sync {
    fn adapter_luid(&self) -> Luid;

    /// `ID3D12Device` handed to the runtime.
    fn device_ptr(&self) -> *mut c_void;

    /// `ID3D12CommandQueue` handed to the runtime.
    fn queue_ptr(&self) -> *mut c_void;

    fn create_shared_fence(&self) -> anyhow::Result<(Box<dyn RuntimeFence>, SharedHandle)>;

    unsafe fn describe_image(&self, texture: *mut c_void) -> anyhow::Result<ImageDesc>;

    unsafe fn share_image(&self, texture: *mut c_void) -> anyhow::Result<SharedHandle>;
}

/// Application device named by the session binding.
pub trait AppDevice: Send + Sync {
    /// Raw `VkQueue` the application submits frames on.
    fn queue(&self) -> vk::Queue;

    /// Block until the application queue finished all submitted work.
    fn wait_idle(&self) -> anyhow::Result<()>;

    fn import_fence(&self, handle: &SharedHandle) -> anyhow::Result<Box<dyn AppFence>>;

    fn import_image(
        &self,
        handle: &SharedHandle,
        desc: &AppImageDesc,
    ) -> anyhow::Result<Box<dyn AppImage>>;
}

/// Devices of an interop session.
pub struct SessionDevices {
    pub runtime: Box<dyn RuntimeDevice>,
    pub app: Box<dyn AppDevice>,
}

/// Access to the graphics APIs on either side of the bridge.
#[allow(clippy::missing_safety_doc)]
pub trait InteropProvider: Send + Sync {
    /// Physical devices of an application Vulkan instance with their LUIDs.
    unsafe fn vulkan_physical_devices(
        &self,
        instance: vk::Instance,
        get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    ) -> anyhow::Result<Vec<(vk::PhysicalDevice, Option<Luid>)>>;

    /// LUID of one application physical device.
    unsafe fn vulkan_device_luid(
        &self,
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    ) -> anyhow::Result<Option<Luid>> {
        let devices =
            unsafe { self.vulkan_physical_devices(instance, get_instance_proc_addr) }?;
        Ok(devices
            .into_iter()
            .find(|&(device, _)| device == physical_device)
            .and_then(|(_, luid)| luid))
    }

    /// Open the runtime device on `adapter` and wrap the application device.
    unsafe fn open_session(
        &self,
        adapter: &RuntimeAdapter,
        binding: &VulkanBinding,
        get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    ) -> anyhow::Result<SessionDevices>;
}

/// Timeline fence shared by the two APIs.
///
/// Referenced by the session and by every interop image. The application view
/// is released before the runtime view.
pub struct SharedFence {
    app: Box<dyn AppFence>,
    runtime: Box<dyn RuntimeFence>,
    value: AtomicU64,
}

impl SharedFence {
    pub fn create(runtime: &dyn RuntimeDevice, app: &dyn AppDevice) -> anyhow::Result<Arc<Self>> {
        let (runtime_fence, handle) = runtime.create_shared_fence()?;
        let app_fence = app.import_fence(&handle)?;
        debug!("shared fence created: {handle:?}");

        Ok(Arc::new(Self {
            app: app_fence,
            runtime: runtime_fence,
            value: AtomicU64::new(0),
        }))
    }

    /// Reserve the value signaled for the next frame.
    pub fn next_value(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current_value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn app(&self) -> &dyn AppFence {
        &*self.app
    }

    pub fn runtime(&self) -> &dyn RuntimeFence {
        &*self.runtime
    }
}

/// Runtime texture paired with the application image over the same memory.
pub struct InteropImage {
    app: Box<dyn AppImage>,
    texture: usize,
    _fence: Arc<SharedFence>,
}

impl InteropImage {
    /// Import `texture` into the application API.
    ///
    /// # Safety
    /// `texture` must be a live runtime texture of `devices.runtime`.
    pub unsafe fn import(
        devices: &SessionDevices,
        fence: &Arc<SharedFence>,
        texture: *mut c_void,
        desc: &AppImageDesc,
    ) -> Result<Self, LayerError> {
        let runtime_desc = unsafe { devices.runtime.describe_image(texture) }?;
        if !format::is_bit_compatible(runtime_desc.format, desc.format) {
            return Err(LayerError::UnsupportedFormatTranslation(runtime_desc.format));
        }

        let mut desc = *desc;
        desc.width = runtime_desc.width;
        desc.height = runtime_desc.height;
        desc.array_size = runtime_desc.array_size;
        desc.mip_count = runtime_desc.mip_count;
        desc.sample_count = runtime_desc.sample_count;

        let handle = unsafe { devices.runtime.share_image(texture) }?;
        let app = devices.app.import_image(&handle, &desc)?;

        Ok(Self {
            app,
            texture: texture as usize,
            _fence: fence.clone(),
        })
    }

    pub fn app_image(&self) -> vk::Image {
        self.app.handle()
    }

    pub fn texture(&self) -> *mut c_void {
        self.texture as *mut c_void
    }
}

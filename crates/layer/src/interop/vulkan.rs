//! Vulkan side of the bridge, driven through the application's own device.

use core::time::Duration;
use std::ffi::CStr;

use anyhow::Context;
use ash::{
    Device, Instance, khr,
    vk::{self, Handle},
};
use scopeguard::{ScopeGuard, guard};
use tracing::{debug, trace};

use super::{AppDevice, AppFence, AppImage, AppImageDesc, SharedHandle};
use crate::graphics::{Luid, VulkanBinding};

/// Instance extensions the application must enable.
pub const INSTANCE_EXTENSIONS: [&CStr; 4] = [
    c"VK_KHR_external_memory_capabilities",
    c"VK_KHR_external_semaphore_capabilities",
    c"VK_KHR_external_fence_capabilities",
    c"VK_KHR_get_physical_device_properties2",
];

/// Device extensions the application must enable.
pub const DEVICE_EXTENSIONS: [&CStr; 8] = [
    c"VK_KHR_dedicated_allocation",
    c"VK_KHR_get_memory_requirements2",
    c"VK_KHR_bind_memory2",
    c"VK_KHR_external_memory",
    c"VK_KHR_external_memory_win32",
    c"VK_KHR_timeline_semaphore",
    c"VK_KHR_external_semaphore",
    c"VK_KHR_external_semaphore_win32",
];

/// Load instance level functions of an application instance.
///
/// # Safety
/// `instance` must be a live instance created through `get_instance_proc_addr`.
pub unsafe fn load_instance(
    get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    instance: vk::Instance,
) -> Instance {
    let static_fn = ash::StaticFn {
        get_instance_proc_addr,
    };
    unsafe { Instance::load(&static_fn, instance) }
}

/// Physical devices of `instance` with their LUIDs.
///
/// # Safety
/// `instance` must be live.
pub unsafe fn physical_device_luids(
    instance: &Instance,
) -> anyhow::Result<Vec<(vk::PhysicalDevice, Option<Luid>)>> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }
        .context("failed to enumerate physical devices")?;

    Ok(physical_devices
        .into_iter()
        .map(|physical_device| {
            let mut id_prop = vk::PhysicalDeviceIDProperties::default();
            let mut prop = vk::PhysicalDeviceProperties2::default().push_next(&mut id_prop);
            unsafe { instance.get_physical_device_properties2(physical_device, &mut prop) };

            let luid = (id_prop.device_luid_valid == vk::TRUE)
                .then(|| Luid::from_bytes(id_prop.device_luid));
            (physical_device, luid)
        })
        .collect())
}

/// Application Vulkan device of an interop session.
pub struct VulkanDevice {
    device: Device,
    queue: vk::Queue,
    memory_props: vk::PhysicalDeviceMemoryProperties,

    memory_requirements2_fn: khr::get_memory_requirements2::DeviceFn,
    bind_memory2_fn: khr::bind_memory2::DeviceFn,
    external_memory_win32_fn: khr::external_memory_win32::DeviceFn,
    external_semaphore_win32_fn: khr::external_semaphore_win32::DeviceFn,
    timeline_semaphore_fn: khr::timeline_semaphore::DeviceFn,
}

impl VulkanDevice {
    /// Wrap the device of a session binding.
    ///
    /// # Safety
    /// The binding objects must be live and belong to `instance`.
    pub unsafe fn new(instance: &Instance, binding: &VulkanBinding) -> Self {
        let raw_device = binding.device;
        let device = unsafe { Device::load(instance.fp_v1_0(), raw_device) };
        let loader = |name: &CStr| unsafe {
            core::mem::transmute::<vk::PFN_vkVoidFunction, *const core::ffi::c_void>(
                (instance.fp_v1_0().get_device_proc_addr)(raw_device, name.as_ptr()),
            )
        };

        let queue = unsafe {
            device.get_device_queue(binding.queue_family_index, binding.queue_index)
        };
        let memory_props =
            unsafe { instance.get_physical_device_memory_properties(binding.physical_device) };
        debug!(
            "vulkan device: {:?} queue: {:?} family: {} index: {}",
            raw_device, queue, binding.queue_family_index, binding.queue_index
        );

        Self {
            device,
            queue,
            memory_props,

            memory_requirements2_fn: khr::get_memory_requirements2::DeviceFn::load(loader),
            bind_memory2_fn: khr::bind_memory2::DeviceFn::load(loader),
            external_memory_win32_fn: khr::external_memory_win32::DeviceFn::load(loader),
            external_semaphore_win32_fn: khr::external_semaphore_win32::DeviceFn::load(loader),
            timeline_semaphore_fn: khr::timeline_semaphore::DeviceFn::load(loader),
        }
    }

    fn find_memory_type(&self, type_bits: u32) -> Option<u32> {
        let types =
            &self.memory_props.memory_types[..self.memory_props.memory_type_count as usize];
        (0..types.len() as u32).find(|&index| {
            type_bits & (1 << index) != 0
                && types[index as usize]
                    .property_flags
                    .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        })
    }
}

impl AppDevice for VulkanDevice {
    fn queue(&self) -> vk::Queue {
        self.queue
    }

    fn wait_idle(&self) -> anyhow::Result<()> {
        unsafe { self.device.queue_wait_idle(self.queue) }
            .context("failed to wait for application queue")
    }

    fn import_fence(&self, handle: &SharedHandle) -> anyhow::Result<Box<dyn AppFence>> {
        unsafe {
            let mut timeline = vk::SemaphoreTypeCreateInfo::default()
                .semaphore_type(vk::SemaphoreType::TIMELINE)
                .initial_value(0);
            let semaphore = self
                .device
                .create_semaphore(
                    &vk::SemaphoreCreateInfo::default().push_next(&mut timeline),
                    None,
                )
                .context("failed to create timeline Semaphore")?;
            let semaphore = guard(semaphore, |semaphore| {
                self.device.destroy_semaphore(semaphore, None);
            });

            (self
                .external_semaphore_win32_fn
                .import_semaphore_win32_handle_khr)(
                self.device.handle(),
                &vk::ImportSemaphoreWin32HandleInfoKHR::default()
                    .semaphore(*semaphore)
                    .handle_type(vk::ExternalSemaphoreHandleTypeFlags::D3D12_FENCE)
                    .handle(handle.raw() as vk::HANDLE),
            )
            .result()
            .context("failed to import shared fence")?;

            Ok(Box::new(VulkanFence {
                device: self.device.clone(),
                queue: self.queue,
                semaphore: ScopeGuard::into_inner(semaphore),
                timeline_semaphore_fn: self.timeline_semaphore_fn.clone(),
            }))
        }
    }

    fn import_image(
        &self,
        handle: &SharedHandle,
        desc: &AppImageDesc,
    ) -> anyhow::Result<Box<dyn AppImage>> {
        const HANDLE_TYPE: vk::ExternalMemoryHandleTypeFlags =
            vk::ExternalMemoryHandleTypeFlags::D3D12_RESOURCE;

        unsafe {
            let mut external =
                vk::ExternalMemoryImageCreateInfo::default().handle_types(HANDLE_TYPE);
            let image = self
                .device
                .create_image(
                    &vk::ImageCreateInfo::default()
                        .push_next(&mut external)
                        .flags(desc.flags)
                        .image_type(vk::ImageType::TYPE_2D)
                        .format(desc.format)
                        .extent(vk::Extent3D {
                            width: desc.width,
                            height: desc.height,
                            depth: 1,
                        })
                        .mip_levels(desc.mip_count)
                        .array_layers(desc.array_size)
                        .samples(vk::SampleCountFlags::from_raw(desc.sample_count))
                        .tiling(vk::ImageTiling::OPTIMAL)
                        .usage(desc.usage)
                        .sharing_mode(vk::SharingMode::EXCLUSIVE)
                        .initial_layout(vk::ImageLayout::UNDEFINED),
                    None,
                )
                .context("failed to create Image")?;
            let image = guard(image, |image| {
                self.device.destroy_image(image, None);
            });

            let mut requirements = vk::MemoryRequirements2::default();
            (self
                .memory_requirements2_fn
                .get_image_memory_requirements2_khr)(
                self.device.handle(),
                &vk::ImageMemoryRequirementsInfo2::default().image(*image),
                &mut requirements,
            );

            let mut handle_props = vk::MemoryWin32HandlePropertiesKHR::default();
            (self
                .external_memory_win32_fn
                .get_memory_win32_handle_properties_khr)(
                self.device.handle(),
                HANDLE_TYPE,
                handle.raw() as vk::HANDLE,
                &mut handle_props,
            )
            .result()
            .context("failed to query shared texture memory properties")?;

            let type_bits = requirements.memory_requirements.memory_type_bits
                & handle_props.memory_type_bits;
            let memory_type = self
                .find_memory_type(type_bits)
                .context("no device local memory type for shared texture")?;

            let mut import = vk::ImportMemoryWin32HandleInfoKHR::default()
                .handle_type(HANDLE_TYPE)
                .handle(handle.raw() as vk::HANDLE);
            let mut dedicated = vk::MemoryDedicatedAllocateInfo::default().image(*image);
            let memory = self
                .device
                .allocate_memory(
                    &vk::MemoryAllocateInfo::default()
                        .push_next(&mut import)
                        .push_next(&mut dedicated)
                        .allocation_size(requirements.memory_requirements.size)
                        .memory_type_index(memory_type),
                    None,
                )
                .context("failed to import shared texture memory")?;
            let memory = guard(memory, |memory| {
                self.device.free_memory(memory, None);
            });

            (self.bind_memory2_fn.bind_image_memory2_khr)(
                self.device.handle(),
                1,
                &vk::BindImageMemoryInfo::default()
                    .image(*image)
                    .memory(*memory),
            )
            .result()
            .context("failed to bind shared texture memory")?;

            trace!(
                "imported image {:?} size: {} type: {memory_type}",
                *image, requirements.memory_requirements.size
            );

            Ok(Box::new(VulkanImage {
                device: self.device.clone(),
                memory: ScopeGuard::into_inner(memory),
                image: ScopeGuard::into_inner(image),
            }))
        }
    }
}

/// Timeline semaphore imported from the runtime fence.
struct VulkanFence {
    device: Device,
    queue: vk::Queue,
    semaphore: vk::Semaphore,
    timeline_semaphore_fn: khr::timeline_semaphore::DeviceFn,
}

impl AppFence for VulkanFence {
    fn signal_on_queue(&self, value: u64) -> anyhow::Result<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let mut timeline = vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);

        unsafe {
            self.device
                .queue_submit(
                    self.queue,
                    &[vk::SubmitInfo::default()
                        .push_next(&mut timeline)
                        .signal_semaphores(&semaphores)],
                    vk::Fence::null(),
                )
                .context("failed to signal shared fence")
        }
    }

    fn wait(&self, value: u64, timeout: Duration) -> anyhow::Result<bool> {
        let semaphores = [self.semaphore];
        let values = [value];
        let res = unsafe {
            (self.timeline_semaphore_fn.wait_semaphores_khr)(
                self.device.handle(),
                &vk::SemaphoreWaitInfo::default()
                    .semaphores(&semaphores)
                    .values(&values),
                timeout.as_nanos().min(u64::MAX as u128) as u64,
            )
        };

        match res {
            vk::Result::SUCCESS => Ok(true),
            vk::Result::TIMEOUT => Ok(false),
            err => Err(err).context("failed to wait shared fence"),
        }
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe {
            _ = self.device.queue_wait_idle(self.queue);
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Vulkan image bound to imported runtime texture memory.
struct VulkanImage {
    device: Device,
    memory: vk::DeviceMemory,
    image: vk::Image,
}

impl AppImage for VulkanImage {
    fn handle(&self) -> vk::Image {
        self.image
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        trace!("releasing imported image {:?}", self.image.as_raw());
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

use anyhow::Context;
use ash::{Entry, vk};
use once_cell::sync::OnceCell;
use tracing::debug;

use super::{InteropProvider, SessionDevices, vulkan};
use crate::graphics::{Luid, RuntimeAdapter, VulkanBinding};

/// Real graphics APIs: Vulkan through the system loader, Direct3D 12 on Windows.
#[derive(Default)]
pub struct NativeProvider {
    entry: OnceCell<Entry>,
}

impl NativeProvider {
    fn get_instance_proc_addr(
        &self,
        app: Option<vk::PFN_vkGetInstanceProcAddr>,
    ) -> anyhow::Result<vk::PFN_vkGetInstanceProcAddr> {
        if let Some(f) = app {
            return Ok(f);
        }

        let entry = self.entry.get_or_try_init(|| {
            debug!("loading vulkan loader");
            unsafe { Entry::load() }.context("failed to load vulkan loader")
        })?;
        Ok(entry.static_fn().get_instance_proc_addr)
    }
}

impl InteropProvider for NativeProvider {
    unsafe fn vulkan_physical_devices(
        &self,
        instance: vk::Instance,
        get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    ) -> anyhow::Result<Vec<(vk::PhysicalDevice, Option<Luid>)>> {
        let instance = unsafe {
            vulkan::load_instance(self.get_instance_proc_addr(get_instance_proc_addr)?, instance)
        };
        unsafe { vulkan::physical_device_luids(&instance) }
    }

    #[cfg(windows)]
    unsafe fn open_session(
        &self,
        adapter: &RuntimeAdapter,
        binding: &VulkanBinding,
        get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    ) -> anyhow::Result<SessionDevices> {
        let instance = unsafe {
            vulkan::load_instance(
                self.get_instance_proc_addr(get_instance_proc_addr)?,
                binding.instance,
            )
        };

        Ok(SessionDevices {
            runtime: Box::new(super::d3d12::D3D12Device::open(adapter)?),
            app: Box::new(unsafe { vulkan::VulkanDevice::new(&instance, binding) }),
        })
    }

    #[cfg(not(windows))]
    unsafe fn open_session(
        &self,
        _adapter: &RuntimeAdapter,
        _binding: &VulkanBinding,
        _get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    ) -> anyhow::Result<SessionDevices> {
        anyhow::bail!("Direct3D 12 interop requires Windows")
    }
}

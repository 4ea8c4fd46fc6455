//! Session and swapchain registry of an instance.

pub mod frame;
pub mod swapchain;

use core::{mem, ptr};
use std::sync::Arc;

use ash::vk::Handle;
use openxr_sys as xr;
use parking_lot::Mutex;
use scopeguard::defer;
use tracing::{debug, info, warn};

pub use swapchain::Swapchain;

use crate::{
    error::{LayerError, XrResultExt},
    graphics::{
        self, ApiKind, FoundBinding, GraphicsBindingD3D12KHR, SessionPlan, VulkanBinding,
    },
    instance::Instance,
    interop::{SessionDevices, SharedFence},
    HandleMap,
};

/// Graphics binding of a session. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsBinding {
    pub app_api: Option<ApiKind>,
    pub runtime_api: Option<ApiKind>,
    /// Device named by the application binding.
    pub device: u64,
    /// Queue named by the application binding, when known.
    pub queue: u64,
}

/// Bridge objects of a session created over an API the runtime does not speak.
pub struct SessionInterop {
    pub fence: Arc<SharedFence>,
    pub devices: SessionDevices,
}

pub struct Session {
    handle: xr::Session,
    binding: GraphicsBinding,
    interop: Option<SessionInterop>,
    swapchains: Mutex<Vec<u64>>,
}

impl Session {
    pub fn handle(&self) -> xr::Session {
        self.handle
    }

    pub fn binding(&self) -> &GraphicsBinding {
        &self.binding
    }

    pub fn interop(&self) -> Option<&SessionInterop> {
        self.interop.as_ref()
    }

    pub fn is_interop(&self) -> bool {
        self.interop.is_some()
    }

    /// Swapchains of the session, in creation order.
    pub fn swapchain_handles(&self) -> Vec<u64> {
        self.swapchains.lock().clone()
    }
}

/// Live sessions and swapchains of one instance.
///
/// Creation and destruction hold `lifecycle`, per frame calls only read the maps.
#[derive(Default)]
pub struct Registry {
    lifecycle: Mutex<()>,
    sessions: HandleMap<Arc<Session>>,
    swapchains: HandleMap<Arc<Swapchain>>,
}

impl Registry {
    pub fn session(&self, handle: xr::Session) -> Option<Arc<Session>> {
        self.sessions
            .get(&handle.into_raw())
            .map(|session| session.clone())
    }

    pub fn swapchain(&self, handle: xr::Swapchain) -> Option<Arc<Swapchain>> {
        self.swapchains
            .get(&handle.into_raw())
            .map(|swapchain| swapchain.clone())
    }

    pub fn has_session(&self, handle: u64) -> bool {
        self.sessions.contains_key(&handle)
    }

    pub fn has_swapchain(&self, handle: u64) -> bool {
        self.swapchains.contains_key(&handle)
    }

    pub fn session_handles(&self) -> Vec<u64> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn swapchain_count(&self) -> usize {
        self.swapchains.len()
    }
}

impl Instance {
    /// # Safety
    /// Arguments must satisfy the `xrCreateSession` contract.
    #[tracing::instrument(skip_all)]
    pub unsafe fn create_session(
        &self,
        info: *const xr::SessionCreateInfo,
        session: *mut xr::Session,
    ) -> Result<xr::Result, LayerError> {
        let _lifecycle = self.registry.lifecycle.lock();

        let create_info = unsafe { &*info };
        let found = unsafe { graphics::find_binding(create_info.next) };
        let runtime_api = self.negotiator.runtime_api();

        let (res, binding, interop) = match unsafe { self.negotiator.plan(found.as_ref()) } {
            SessionPlan::Passthrough { app_api } => {
                let res =
                    unsafe { self.runtime.create_session(self.handle, info, session) }.check()?;
                let (device, queue) = found
                    .map(|found| unsafe { native_handles(&found) })
                    .unwrap_or_default();

                let binding = GraphicsBinding {
                    app_api,
                    runtime_api,
                    device,
                    queue,
                };
                (res, binding, None)
            }

            SessionPlan::Interop(vulkan) => {
                let found = found.ok_or(LayerError::Validation("missing graphics binding"))?;
                let interop = self.open_interop(create_info.system_id, &vulkan)?;

                let d3d12 = GraphicsBindingD3D12KHR {
                    ty: xr::StructureType::GRAPHICS_BINDING_D3D12_KHR,
                    next: unsafe { found.node.as_ref() }.next.cast(),
                    device: interop.devices.runtime.device_ptr(),
                    queue: interop.devices.runtime.queue_ptr(),
                };
                let res = unsafe { self.create_session_with(info, &found, &d3d12, session) }
                    .check()?;

                let binding = GraphicsBinding {
                    app_api: Some(ApiKind::Vulkan),
                    runtime_api,
                    device: vulkan.device.as_raw(),
                    queue: interop.devices.app.queue().as_raw(),
                };
                (res, binding, Some(interop))
            }
        };

        let handle = unsafe { *session };
        info!(
            "session {:#x} created, app api: {:?} runtime api: {:?} interop: {}",
            handle.into_raw(),
            binding.app_api,
            binding.runtime_api,
            interop.is_some()
        );
        self.registry.sessions.insert(
            handle.into_raw(),
            Arc::new(Session {
                handle,
                binding,
                interop,
                swapchains: Mutex::new(Vec::new()),
            }),
        );

        Ok(res)
    }

    fn open_interop(
        &self,
        system_id: xr::SystemId,
        binding: &VulkanBinding,
    ) -> Result<SessionInterop, LayerError> {
        let adapter = self
            .negotiator
            .adapter_or_query(|| self.query_adapter(system_id))?;

        let get_instance_proc_addr = self.negotiator.get_instance_proc_addr();
        let app_luid = unsafe {
            self.provider.vulkan_device_luid(
                binding.instance,
                binding.physical_device,
                get_instance_proc_addr,
            )
        }?;
        self.negotiator.check_device(adapter.luid, app_luid)?;

        let devices =
            unsafe { self.provider.open_session(&adapter, binding, get_instance_proc_addr) }?;
        let fence = SharedFence::create(&*devices.runtime, &*devices.app)?;
        debug!("interop devices opened on {:?}", adapter.luid);

        Ok(SessionInterop { fence, devices })
    }

    /// Forward `xrCreateSession` with `d3d12` standing in for the binding at `found`.
    unsafe fn create_session_with(
        &self,
        info: *const xr::SessionCreateInfo,
        found: &FoundBinding,
        d3d12: &GraphicsBindingD3D12KHR,
        session: *mut xr::Session,
    ) -> xr::Result {
        let replacement = ptr::from_ref(d3d12).cast::<xr::BaseInStructure>();

        match found.prev {
            None => {
                let mut create_info = unsafe { *info };
                create_info.next = replacement.cast();
                unsafe {
                    self.runtime
                        .create_session(self.handle, &create_info, session)
                }
            }

            Some(prev) => {
                // chain entries are const for the application, restore before returning
                let prev = prev.as_ptr();
                let original = unsafe { mem::replace(&mut (*prev).next, replacement) };
                defer! {
                    unsafe { (*prev).next = original };
                }

                unsafe { self.runtime.create_session(self.handle, info, session) }
            }
        }
    }

    /// Destroy every swapchain of the session, then the session.
    ///
    /// # Safety
    /// No other call on the session or its swapchains may be in progress.
    #[tracing::instrument(skip(self))]
    pub unsafe fn destroy_session(&self, session: xr::Session) -> Result<xr::Result, LayerError> {
        let _lifecycle = self.registry.lifecycle.lock();

        let entry = self.registry.sessions.remove(&session.into_raw()).map(|(_, entry)| entry);
        if let Some(entry) = &entry {
            let swapchains = mem::take(&mut *entry.swapchains.lock());
            for swapchain in swapchains {
                debug!("destroying swapchain {swapchain:#x} with its session");
                if let Err(err) = unsafe { self.release_swapchain(xr::Swapchain::from_raw(swapchain)) }
                {
                    warn!("failed to destroy swapchain {swapchain:#x}: {err}");
                }
            }
        }

        let res = unsafe { self.runtime.destroy_session(session) }.check()?;
        debug!("session {:#x} destroyed", session.into_raw());
        Ok(res)
    }

    /// # Safety
    /// Arguments must satisfy the `xrBeginSession` contract.
    pub unsafe fn begin_session(
        &self,
        session: xr::Session,
        info: *const xr::SessionBeginInfo,
    ) -> Result<xr::Result, LayerError> {
        info!(
            "session {:#x} begins, view configuration: {:?}",
            session.into_raw(),
            unsafe { (*info).primary_view_configuration_type }
        );
        unsafe { self.runtime.begin_session(session, info) }.check()
    }
}

/// Device and queue handles of a binding the runtime consumes directly.
unsafe fn native_handles(found: &FoundBinding) -> (u64, u64) {
    match found.api {
        ApiKind::Vulkan => {
            let binding = unsafe { found.node.cast::<graphics::GraphicsBindingVulkanKHR>().as_ref() };
            (binding.device.as_raw(), 0)
        }
        ApiKind::D3D12 => {
            let binding = unsafe { found.node.cast::<GraphicsBindingD3D12KHR>().as_ref() };
            (binding.device as u64, binding.queue as u64)
        }
        ApiKind::OpenGl => (0, 0),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use core::{ffi::c_void, time::Duration};
    use std::sync::Arc;

    use ash::vk::{self, Handle};
    use openxr_sys as xr;

    use crate::{
        config::LayerConfig,
        error::LayerError,
        graphics::{GraphicsBindingVulkanKHR, Luid, SwapchainImageVulkanKHR},
        instance::Instance,
        interop::mock::{MockGpu, MockProvider},
        manifest::{self, NOVENDOR},
        runtime::mock::MockRuntime,
    };

    pub const ADAPTER: Luid = Luid {
        low: 0x2a,
        high: 0,
    };

    pub struct Fixture {
        pub instance: Instance,
        pub runtime: Arc<MockRuntime>,
        pub gpu: Arc<MockGpu>,
        pub system_id: xr::SystemId,
    }

    impl Fixture {
        /// Vulkan application on a Direct3D 12 runtime, both on [`ADAPTER`].
        pub fn new() -> Self {
            Self::with(MockRuntime::d3d12(ADAPTER), MockProvider::new(ADAPTER))
        }

        pub fn with(runtime: MockRuntime, provider: MockProvider) -> Self {
            let _ = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::DEBUG)
                .try_init();

            let extensions = match runtime.native_api {
                crate::graphics::ApiKind::D3D12 => vec![manifest::D3D12_ENABLE.to_string()],
                _ => vec![manifest::VULKAN_ENABLE2.to_string()],
            };
            let runtime = Arc::new(runtime);
            let gpu = provider.gpu.clone();
            let config = LayerConfig {
                variant: None,
                frame_sync_timeout: Duration::from_millis(50),
            };
            let instance = Instance::new(
                xr::Instance::from_raw(1),
                &NOVENDOR,
                config,
                runtime.clone(),
                Arc::new(provider),
                &extensions,
                &crate::loader::plan_instance_extensions(&[manifest::VULKAN_ENABLE2], &extensions),
            )
            .unwrap();

            let info = xr::SystemGetInfo {
                ty: xr::StructureType::SYSTEM_GET_INFO,
                next: core::ptr::null(),
                form_factor: xr::FormFactor::HEAD_MOUNTED_DISPLAY,
            };
            let mut system_id = xr::SystemId::from_raw(0);
            unsafe { instance.get_system(&info, &mut system_id) }.unwrap();

            Self {
                instance,
                runtime,
                gpu,
                system_id,
            }
        }

        pub fn create_session(&self) -> Result<xr::Session, LayerError> {
            let binding = GraphicsBindingVulkanKHR {
                ty: xr::StructureType::GRAPHICS_BINDING_VULKAN_KHR,
                next: core::ptr::null(),
                instance: vk::Instance::from_raw(0x10),
                physical_device: vk::PhysicalDevice::from_raw(0x51),
                device: vk::Device::from_raw(0x30),
                queue_family_index: 0,
                queue_index: 0,
            };
            let info = xr::SessionCreateInfo {
                ty: xr::StructureType::SESSION_CREATE_INFO,
                next: (&binding as *const GraphicsBindingVulkanKHR).cast(),
                create_flags: xr::SessionCreateFlags::from_raw(0),
                system_id: self.system_id,
            };

            let mut session = xr::Session::NULL;
            unsafe { self.instance.create_session(&info, &mut session) }?;
            Ok(session)
        }

        pub fn create_swapchain(
            &self,
            session: xr::Session,
            format: vk::Format,
        ) -> Result<xr::Swapchain, LayerError> {
            let info = xr::SwapchainCreateInfo {
                ty: xr::StructureType::SWAPCHAIN_CREATE_INFO,
                next: core::ptr::null(),
                create_flags: xr::SwapchainCreateFlags::from_raw(0),
                usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                    | xr::SwapchainUsageFlags::SAMPLED,
                format: format.as_raw() as i64,
                sample_count: 1,
                width: 4,
                height: 2,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            };

            let mut swapchain = xr::Swapchain::NULL;
            unsafe { self.instance.create_swapchain(session, &info, &mut swapchain) }?;
            Ok(swapchain)
        }

        pub fn enumerate_images(
            &self,
            swapchain: xr::Swapchain,
        ) -> Result<Vec<vk::Image>, LayerError> {
            let mut count = 0;
            unsafe {
                self.instance.enumerate_swapchain_images(
                    swapchain,
                    0,
                    &mut count,
                    core::ptr::null_mut(),
                )
            }?;

            let mut images = vec![
                SwapchainImageVulkanKHR {
                    ty: xr::StructureType::SWAPCHAIN_IMAGE_VULKAN_KHR,
                    next: core::ptr::null_mut::<c_void>(),
                    image: vk::Image::null(),
                };
                count as usize
            ];
            unsafe {
                self.instance.enumerate_swapchain_images(
                    swapchain,
                    count,
                    &mut count,
                    images.as_mut_ptr().cast(),
                )
            }?;

            Ok(images.into_iter().map(|image| image.image).collect())
        }
    }
}

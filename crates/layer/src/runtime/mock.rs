//! Software OpenXR runtime rendering with the mock Direct3D 12 GPU.

use core::ffi::{CStr, c_char};
use std::collections::HashMap;

use ash::vk::{self, Handle};
use openxr_sys::{self as xr, pfn};
use parking_lot::Mutex;

use super::NextRuntime;
use crate::{
    fill_two_call,
    graphics::{
        self, ApiKind, GraphicsRequirementsD3D12KHR, Luid, SwapchainImageD3D12KHR,
        SwapchainImageVulkanKHR,
    },
    interop::{ImageDesc, mock as gpu},
};

pub const SYSTEM_ID: u64 = 1;

/// Calls observed by the runtime, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    CreateSession(u64),
    DestroySession(u64),
    BeginSession(u64),
    CreateSwapchain(u64),
    DestroySwapchain(u64),
    EndFrame(u64),
    DestroyInstance,
}

pub struct MockSession {
    pub binding: Option<ApiKind>,
    pub device: usize,
    pub queue: usize,
}

pub struct MockSwapchain {
    pub session: u64,
    pub format: i64,
    pub textures: Vec<usize>,
    /// Index handed out by the next acquire.
    pub cursor: u32,
    /// Acquired and not yet released, oldest first.
    pub acquired: Vec<u32>,
}

#[derive(Default)]
pub struct MockState {
    next_handle: u64,
    pub calls: Vec<Call>,
    pub sessions: HashMap<u64, MockSession>,
    pub swapchains: HashMap<u64, MockSwapchain>,
    pub requirement_queries: u32,
    /// A swapchain was destroyed while an application view still referenced its memory.
    pub dangling_views: bool,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        0x100 + self.next_handle
    }
}

/// Runtime with the given native API.
pub struct MockRuntime {
    pub native_api: ApiKind,
    pub adapter: Luid,
    pub formats: Vec<i64>,
    pub image_count: u32,
    /// Allocate textures in this format instead of the requested one.
    pub texture_format: Option<i64>,
    /// Functions `get_instance_proc_addr` does not resolve.
    pub missing: Vec<&'static str>,
    pub state: Mutex<MockState>,
}

impl MockRuntime {
    /// Direct3D 12 runtime on `adapter` offering sRGB/UNORM color and D32 depth.
    pub fn d3d12(adapter: Luid) -> Self {
        Self {
            native_api: ApiKind::D3D12,
            adapter,
            // DXGI R8G8B8A8_UNORM_SRGB, B8G8R8A8_UNORM_SRGB, R8G8B8A8_UNORM, D32_FLOAT, R8G8_UNORM
            formats: vec![29, 91, 28, 40, 49],
            image_count: 2,
            texture_format: None,
            missing: Vec::new(),
            state: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

unsafe extern "system" fn unreachable_function() {}

fn write_str(dst: &mut [c_char], value: &str) {
    for (dst, src) in dst.iter_mut().zip(value.bytes().chain([0])) {
        *dst = src as c_char;
    }
}

impl NextRuntime for MockRuntime {
    fn get_instance_proc_addr(&self, name: &CStr) -> Option<pfn::VoidFunction> {
        let name = name.to_str().ok()?;
        if self.missing.contains(&name) {
            return None;
        }

        Some(unreachable_function)
    }

    unsafe fn destroy_instance(&self, _instance: xr::Instance) -> xr::Result {
        self.record(Call::DestroyInstance);
        xr::Result::SUCCESS
    }

    unsafe fn get_instance_properties(
        &self,
        _instance: xr::Instance,
        properties: *mut xr::InstanceProperties,
    ) -> xr::Result {
        let properties = unsafe { &mut *properties };
        properties.runtime_version = xr::Version::new(1, 2, 3);
        write_str(&mut properties.runtime_name, "Mock Runtime");
        xr::Result::SUCCESS
    }

    unsafe fn get_system(
        &self,
        _instance: xr::Instance,
        info: *const xr::SystemGetInfo,
        system_id: *mut xr::SystemId,
    ) -> xr::Result {
        if unsafe { (*info).form_factor } != xr::FormFactor::HEAD_MOUNTED_DISPLAY {
            return xr::Result::ERROR_FORM_FACTOR_UNSUPPORTED;
        }

        unsafe { *system_id = xr::SystemId::from_raw(SYSTEM_ID) };
        xr::Result::SUCCESS
    }

    unsafe fn get_system_properties(
        &self,
        _instance: xr::Instance,
        _system_id: xr::SystemId,
        properties: *mut xr::SystemProperties,
    ) -> xr::Result {
        let properties = unsafe { &mut *properties };
        properties.vendor_id = 0x1234;
        write_str(&mut properties.system_name, "Mock HMD");
        xr::Result::SUCCESS
    }

    unsafe fn get_d3d12_graphics_requirements(
        &self,
        _instance: xr::Instance,
        _system_id: xr::SystemId,
        requirements: *mut GraphicsRequirementsD3D12KHR,
    ) -> xr::Result {
        self.state.lock().requirement_queries += 1;

        let requirements = unsafe { &mut *requirements };
        requirements.adapter_luid = self.adapter;
        requirements.min_feature_level = 0xb000;
        xr::Result::SUCCESS
    }

    unsafe fn enumerate_view_configuration_views(
        &self,
        _instance: xr::Instance,
        _system_id: xr::SystemId,
        _view_configuration_type: xr::ViewConfigurationType,
        capacity: u32,
        count_output: *mut u32,
        views: *mut xr::ViewConfigurationView,
    ) -> xr::Result {
        unsafe { *count_output = 2 };
        if capacity == 0 {
            return xr::Result::SUCCESS;
        }
        if capacity < 2 {
            return xr::Result::ERROR_SIZE_INSUFFICIENT;
        }

        for view in unsafe { core::slice::from_raw_parts_mut(views, 2) } {
            view.recommended_image_rect_width = 1440;
            view.recommended_image_rect_height = 1600;
            view.max_image_rect_width = 2880;
            view.max_image_rect_height = 3200;
            view.recommended_swapchain_sample_count = 1;
            view.max_swapchain_sample_count = 4;
        }
        xr::Result::SUCCESS
    }

    unsafe fn create_session(
        &self,
        _instance: xr::Instance,
        info: *const xr::SessionCreateInfo,
        session: *mut xr::Session,
    ) -> xr::Result {
        let found = unsafe { graphics::find_binding((*info).next) };
        if found.as_ref().map(|found| found.api) != Some(self.native_api) {
            return xr::Result::ERROR_GRAPHICS_DEVICE_INVALID;
        }

        let (device, queue) = match found {
            Some(found) if found.api == ApiKind::D3D12 => {
                let binding =
                    unsafe { found.node.cast::<graphics::GraphicsBindingD3D12KHR>().as_ref() };
                (binding.device as usize, binding.queue as usize)
            }
            _ => (0, 0),
        };

        let mut state = self.state.lock();
        let handle = state.handle();
        state.sessions.insert(
            handle,
            MockSession {
                binding: found.map(|found| found.api),
                device,
                queue,
            },
        );
        state.calls.push(Call::CreateSession(handle));
        unsafe { *session = xr::Session::from_raw(handle) };
        xr::Result::SUCCESS
    }

    unsafe fn destroy_session(&self, session: xr::Session) -> xr::Result {
        let mut state = self.state.lock();
        if state.sessions.remove(&session.into_raw()).is_none() {
            return xr::Result::ERROR_HANDLE_INVALID;
        }

        state.calls.push(Call::DestroySession(session.into_raw()));
        xr::Result::SUCCESS
    }

    unsafe fn begin_session(
        &self,
        session: xr::Session,
        _info: *const xr::SessionBeginInfo,
    ) -> xr::Result {
        self.record(Call::BeginSession(session.into_raw()));
        xr::Result::SUCCESS
    }

    unsafe fn enumerate_swapchain_formats(
        &self,
        _session: xr::Session,
        capacity: u32,
        count_output: *mut u32,
        formats: *mut i64,
    ) -> xr::Result {
        match unsafe { fill_two_call(&self.formats, capacity, count_output, formats) } {
            Ok(res) => res,
            Err(err) => err.to_xr(),
        }
    }

    unsafe fn create_swapchain(
        &self,
        session: xr::Session,
        info: *const xr::SwapchainCreateInfo,
        swapchain: *mut xr::Swapchain,
    ) -> xr::Result {
        let info = unsafe { &*info };
        if !self.formats.contains(&info.format) {
            return xr::Result::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED;
        }

        let desc = ImageDesc {
            width: info.width,
            height: info.height,
            array_size: info.array_size * info.face_count,
            mip_count: info.mip_count,
            sample_count: info.sample_count,
            format: self.texture_format.unwrap_or(info.format),
        };
        let textures = (0..self.image_count)
            .map(|_| gpu::create_texture(desc))
            .collect();

        let mut state = self.state.lock();
        let handle = state.handle();
        state.swapchains.insert(
            handle,
            MockSwapchain {
                session: session.into_raw(),
                format: info.format,
                textures,
                cursor: 0,
                acquired: Vec::new(),
            },
        );
        state.calls.push(Call::CreateSwapchain(handle));
        unsafe { *swapchain = xr::Swapchain::from_raw(handle) };
        xr::Result::SUCCESS
    }

    unsafe fn destroy_swapchain(&self, swapchain: xr::Swapchain) -> xr::Result {
        let mut state = self.state.lock();
        let Some(data) = state.swapchains.remove(&swapchain.into_raw()) else {
            return xr::Result::ERROR_HANDLE_INVALID;
        };

        for texture in data.textures {
            if gpu::texture_refs(texture) > 1 {
                state.dangling_views = true;
            }
            gpu::destroy_texture(texture);
        }
        state.calls.push(Call::DestroySwapchain(swapchain.into_raw()));
        xr::Result::SUCCESS
    }

    unsafe fn enumerate_swapchain_images(
        &self,
        swapchain: xr::Swapchain,
        capacity: u32,
        count_output: *mut u32,
        images: *mut xr::SwapchainImageBaseHeader,
    ) -> xr::Result {
        let state = self.state.lock();
        let Some(data) = state.swapchains.get(&swapchain.into_raw()) else {
            return xr::Result::ERROR_HANDLE_INVALID;
        };

        let count = data.textures.len();
        unsafe { *count_output = count as u32 };
        if capacity == 0 {
            return xr::Result::SUCCESS;
        }
        if (capacity as usize) < count {
            return xr::Result::ERROR_SIZE_INSUFFICIENT;
        }

        for (i, &texture) in data.textures.iter().enumerate() {
            match self.native_api {
                ApiKind::D3D12 => {
                    let image = unsafe { &mut *images.cast::<SwapchainImageD3D12KHR>().add(i) };
                    if image.ty != xr::StructureType::SWAPCHAIN_IMAGE_D3D12_KHR {
                        return xr::Result::ERROR_VALIDATION_FAILURE;
                    }
                    image.texture = texture as *mut _;
                }
                _ => {
                    let image = unsafe { &mut *images.cast::<SwapchainImageVulkanKHR>().add(i) };
                    image.image = vk::Image::from_raw(texture as u64);
                }
            }
        }
        xr::Result::SUCCESS
    }

    unsafe fn acquire_swapchain_image(
        &self,
        swapchain: xr::Swapchain,
        _info: *const xr::SwapchainImageAcquireInfo,
        index: *mut u32,
    ) -> xr::Result {
        let mut state = self.state.lock();
        let Some(data) = state.swapchains.get_mut(&swapchain.into_raw()) else {
            return xr::Result::ERROR_HANDLE_INVALID;
        };

        unsafe { *index = data.cursor };
        data.acquired.push(data.cursor);
        data.cursor = (data.cursor + 1) % data.textures.len() as u32;
        xr::Result::SUCCESS
    }

    unsafe fn release_swapchain_image(
        &self,
        swapchain: xr::Swapchain,
        _info: *const xr::SwapchainImageReleaseInfo,
    ) -> xr::Result {
        let mut state = self.state.lock();
        let Some(data) = state.swapchains.get_mut(&swapchain.into_raw()) else {
            return xr::Result::ERROR_HANDLE_INVALID;
        };
        if data.acquired.is_empty() {
            return xr::Result::ERROR_CALL_ORDER_INVALID;
        }

        data.acquired.remove(0);
        xr::Result::SUCCESS
    }

    unsafe fn end_frame(&self, session: xr::Session, _info: *const xr::FrameEndInfo) -> xr::Result {
        self.record(Call::EndFrame(session.into_raw()));
        xr::Result::SUCCESS
    }
}

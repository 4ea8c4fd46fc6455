use core::{
    ptr,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};
use std::sync::Arc;

use ash::vk;
use openxr_sys as xr;
use parking_lot::RwLock;
use scopeguard::{ScopeGuard, guard};
use tracing::{debug, info, warn};

use super::Session;
use crate::{
    error::{LayerError, XrResultExt},
    fill_two_call,
    graphics::{SwapchainImageD3D12KHR, SwapchainImageVulkanKHR, format},
    instance::Instance,
    interop::{AppImageDesc, InteropImage},
};

const NOT_ACQUIRED: u32 = u32::MAX;

type AccessGuard<'a> = ScopeGuard<&'a AtomicBool, fn(&AtomicBool)>;

fn leave(in_use: &AtomicBool) {
    in_use.store(false, Ordering::Release);
}

/// Application images of an interop swapchain.
struct SwapchainInterop {
    desc: AppImageDesc,
    session: Arc<Session>,
    images: RwLock<Vec<InteropImage>>,
}

pub struct Swapchain {
    handle: xr::Swapchain,
    session: xr::Session,
    /// Format the application requested.
    format: i64,
    interop: Option<SwapchainInterop>,
    image_count: AtomicU32,
    acquired: AtomicU32,
    in_use: AtomicBool,
}

impl Swapchain {
    pub fn handle(&self) -> xr::Swapchain {
        self.handle
    }

    pub fn session(&self) -> xr::Session {
        self.session
    }

    pub fn format(&self) -> i64 {
        self.format
    }

    pub fn is_interop(&self) -> bool {
        self.interop.is_some()
    }

    /// Number of images, zero until first enumerated.
    pub fn image_count(&self) -> u32 {
        self.image_count.load(Ordering::Acquire)
    }

    /// Index of the most recently acquired image.
    pub fn acquired(&self) -> Option<u32> {
        Some(self.acquired.load(Ordering::Acquire)).filter(|&index| index != NOT_ACQUIRED)
    }

    /// Application image handles, in runtime order.
    pub fn app_images(&self) -> Vec<vk::Image> {
        self.interop.as_ref().map_or_else(Vec::new, |interop| {
            interop
                .images
                .read()
                .iter()
                .map(InteropImage::app_image)
                .collect()
        })
    }

    /// Mark the swapchain in use by the calling thread. Checked in debug builds only.
    fn enter(&self) -> Result<Option<AccessGuard<'_>>, LayerError> {
        if !cfg!(debug_assertions) {
            return Ok(None);
        }

        if self.in_use.swap(true, Ordering::Acquire) {
            return Err(LayerError::ConcurrentAccessViolation(self.handle.into_raw()));
        }
        Ok(Some(guard(&self.in_use, leave as fn(&AtomicBool))))
    }

    fn set_acquired(&self, index: u32) -> Result<(), LayerError> {
        let count = self.image_count();
        if count != 0 && index >= count {
            return Err(LayerError::Validation("acquired image index out of range"));
        }

        self.acquired.store(index, Ordering::Release);
        Ok(())
    }
}

impl Instance {
    /// # Safety
    /// Arguments must satisfy the `xrEnumerateSwapchainFormats` contract.
    pub unsafe fn enumerate_swapchain_formats(
        &self,
        session: xr::Session,
        capacity: u32,
        count_output: *mut u32,
        formats: *mut i64,
    ) -> Result<xr::Result, LayerError> {
        if !self
            .registry
            .session(session)
            .is_some_and(|session| session.is_interop())
        {
            return unsafe {
                self.runtime
                    .enumerate_swapchain_formats(session, capacity, count_output, formats)
            }
            .check();
        }

        let mut count = 0;
        unsafe {
            self.runtime
                .enumerate_swapchain_formats(session, 0, &mut count, ptr::null_mut())
        }
        .check()?;
        let mut runtime_formats = vec![0; count as usize];
        unsafe {
            self.runtime.enumerate_swapchain_formats(
                session,
                count,
                &mut count,
                runtime_formats.as_mut_ptr(),
            )
        }
        .check()?;
        runtime_formats.truncate(count as usize);

        let mut app_formats = Vec::with_capacity(runtime_formats.len());
        for &runtime_format in &runtime_formats {
            let Some(app_format) = format::dxgi_to_vk(runtime_format) else {
                debug!("dropping dxgi format {runtime_format} without vulkan equivalent");
                continue;
            };

            let app_format = app_format.as_raw() as i64;
            if !app_formats.contains(&app_format) {
                app_formats.push(app_format);
            }
        }

        unsafe { fill_two_call(&app_formats, capacity, count_output, formats) }
    }

    /// # Safety
    /// Arguments must satisfy the `xrCreateSwapchain` contract.
    #[tracing::instrument(skip(self, info, swapchain))]
    pub unsafe fn create_swapchain(
        &self,
        session: xr::Session,
        info: *const xr::SwapchainCreateInfo,
        swapchain: *mut xr::Swapchain,
    ) -> Result<xr::Result, LayerError> {
        let _lifecycle = self.registry.lifecycle.lock();

        let owner = self
            .registry
            .session(session)
            .ok_or(LayerError::Runtime(xr::Result::ERROR_HANDLE_INVALID))?;
        let create_info = unsafe { &*info };

        let (res, interop) = if owner.is_interop() {
            let app_format = vk::Format::from_raw(create_info.format as i32);
            let runtime_format = format::vk_to_dxgi(app_format)
                .ok_or(LayerError::UnsupportedFormatTranslation(create_info.format))?;
            let desc = AppImageDesc::from_swapchain(create_info, app_format);
            info!(
                "swapchain {}x{} layers: {} mips: {} samples: {} format: {:?} (dxgi {}) usage: {:?}",
                desc.width,
                desc.height,
                desc.array_size,
                desc.mip_count,
                desc.sample_count,
                app_format,
                runtime_format,
                desc.usage
            );

            let mut runtime_info = *create_info;
            runtime_info.format = runtime_format;
            let res = unsafe {
                self.runtime
                    .create_swapchain(session, &runtime_info, swapchain)
            }
            .check()?;

            let interop = SwapchainInterop {
                desc,
                session: owner.clone(),
                images: RwLock::new(Vec::new()),
            };
            (res, Some(interop))
        } else {
            let res = unsafe { self.runtime.create_swapchain(session, info, swapchain) }.check()?;
            (res, None)
        };

        let handle = unsafe { *swapchain };
        debug!("swapchain {:#x} created", handle.into_raw());
        self.registry.swapchains.insert(
            handle.into_raw(),
            Arc::new(Swapchain {
                handle,
                session,
                format: create_info.format,
                interop,
                image_count: AtomicU32::new(0),
                acquired: AtomicU32::new(NOT_ACQUIRED),
                in_use: AtomicBool::new(false),
            }),
        );
        owner.swapchains.lock().push(handle.into_raw());

        Ok(res)
    }

    /// # Safety
    /// No other call on the swapchain may be in progress.
    #[tracing::instrument(skip(self))]
    pub unsafe fn destroy_swapchain(
        &self,
        swapchain: xr::Swapchain,
    ) -> Result<xr::Result, LayerError> {
        let _lifecycle = self.registry.lifecycle.lock();

        if let Some(entry) = self.registry.swapchain(swapchain) {
            if let Some(owner) = self.registry.session(entry.session) {
                owner
                    .swapchains
                    .lock()
                    .retain(|&handle| handle != swapchain.into_raw());
            }
        }

        unsafe { self.release_swapchain(swapchain) }
    }

    /// Release application views, then destroy the runtime swapchain.
    /// Caller holds the lifecycle lock.
    pub(super) unsafe fn release_swapchain(
        &self,
        swapchain: xr::Swapchain,
    ) -> Result<xr::Result, LayerError> {
        let entry = self
            .registry
            .swapchains
            .remove(&swapchain.into_raw())
            .map(|(_, entry)| entry);

        if let Some(interop) = entry.as_ref().and_then(|entry| entry.interop.as_ref()) {
            let images = core::mem::take(&mut *interop.images.write());
            if let (false, Some(session)) = (images.is_empty(), interop.session.interop()) {
                if let Err(err) = session.devices.app.wait_idle() {
                    warn!("releasing images without idle application queue: {err:#}");
                }
            }
            debug!("releasing {} application images", images.len());
            drop(images);
        }

        unsafe { self.runtime.destroy_swapchain(swapchain) }.check()
    }

    /// # Safety
    /// Arguments must satisfy the `xrEnumerateSwapchainImages` contract.
    pub unsafe fn enumerate_swapchain_images(
        &self,
        swapchain: xr::Swapchain,
        capacity: u32,
        count_output: *mut u32,
        images: *mut xr::SwapchainImageBaseHeader,
    ) -> Result<xr::Result, LayerError> {
        let entry = self.registry.swapchain(swapchain);
        let Some((entry, interop)) = entry
            .as_ref()
            .and_then(|entry| Some((entry, entry.interop.as_ref()?)))
        else {
            let res = unsafe {
                self.runtime
                    .enumerate_swapchain_images(swapchain, capacity, count_output, images)
            }
            .check()?;
            if let Some(entry) = &entry {
                if capacity > 0 {
                    entry
                        .image_count
                        .store(unsafe { *count_output }, Ordering::Release);
                }
            }
            return Ok(res);
        };

        if count_output.is_null() {
            return Err(LayerError::Validation("null image count output"));
        }

        let mut count = 0;
        unsafe {
            self.runtime
                .enumerate_swapchain_images(swapchain, 0, &mut count, ptr::null_mut())
        }
        .check()?;
        unsafe { *count_output = count };
        if capacity == 0 {
            return Ok(xr::Result::SUCCESS);
        }
        if capacity < count {
            return Err(LayerError::Runtime(xr::Result::ERROR_SIZE_INSUFFICIENT));
        }

        let out = images.cast::<SwapchainImageVulkanKHR>();
        if out.is_null() {
            return Err(LayerError::Validation("null image output"));
        }
        for i in 0..count as usize {
            if unsafe { (*out.add(i)).ty } != xr::StructureType::SWAPCHAIN_IMAGE_VULKAN_KHR {
                return Err(LayerError::Validation("expected XrSwapchainImageVulkanKHR"));
            }
        }

        let mut imported = interop.images.write();
        if imported.is_empty() {
            *imported = unsafe { self.import_images(swapchain, interop, count) }?;
            entry.image_count.store(count, Ordering::Release);
        }

        for (i, image) in imported.iter().enumerate() {
            unsafe { (*out.add(i)).image = image.app_image() };
        }
        Ok(xr::Result::SUCCESS)
    }

    /// Import every runtime texture of `swapchain`. Nothing is kept on failure.
    unsafe fn import_images(
        &self,
        swapchain: xr::Swapchain,
        interop: &SwapchainInterop,
        count: u32,
    ) -> Result<Vec<InteropImage>, LayerError> {
        let session = interop
            .session
            .interop()
            .ok_or(LayerError::Validation("swapchain of a non interop session"))?;

        let mut textures = vec![SwapchainImageD3D12KHR::default(); count as usize];
        let mut count = count;
        unsafe {
            self.runtime.enumerate_swapchain_images(
                swapchain,
                count,
                &mut count,
                textures.as_mut_ptr().cast(),
            )
        }
        .check()?;
        textures.truncate(count as usize);

        let images = textures
            .iter()
            .map(|texture| unsafe {
                InteropImage::import(&session.devices, &session.fence, texture.texture, &interop.desc)
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "imported {} images of swapchain {:#x}",
            images.len(),
            swapchain.into_raw()
        );
        Ok(images)
    }

    /// # Safety
    /// Arguments must satisfy the `xrAcquireSwapchainImage` contract.
    pub unsafe fn acquire_swapchain_image(
        &self,
        swapchain: xr::Swapchain,
        info: *const xr::SwapchainImageAcquireInfo,
        index: *mut u32,
    ) -> Result<xr::Result, LayerError> {
        if index.is_null() {
            return Err(LayerError::Validation("null image index output"));
        }
        let entry = self.registry.swapchain(swapchain);
        let _access = entry.as_deref().map(Swapchain::enter).transpose()?;

        let res = unsafe { self.runtime.acquire_swapchain_image(swapchain, info, index) }
            .check()?;
        let Some(entry) = &entry else {
            return Ok(res);
        };

        let acquired = unsafe { *index };
        if let Err(err) = entry.set_acquired(acquired) {
            // the runtime image is held until released
            warn!(
                "runtime acquired image {acquired} of swapchain {:#x} with {} images",
                swapchain.into_raw(),
                entry.image_count()
            );
            let release = xr::SwapchainImageReleaseInfo {
                ty: xr::StructureType::SWAPCHAIN_IMAGE_RELEASE_INFO,
                next: ptr::null(),
            };
            let _ = unsafe { self.runtime.release_swapchain_image(swapchain, &release) };
            return Err(err);
        }
        Ok(res)
    }

    /// # Safety
    /// Arguments must satisfy the `xrReleaseSwapchainImage` contract.
    pub unsafe fn release_swapchain_image(
        &self,
        swapchain: xr::Swapchain,
        info: *const xr::SwapchainImageReleaseInfo,
    ) -> Result<xr::Result, LayerError> {
        let entry = self.registry.swapchain(swapchain);
        let _access = entry.as_deref().map(Swapchain::enter).transpose()?;

        let res = unsafe { self.runtime.release_swapchain_image(swapchain, info) }.check()?;
        if let Some(entry) = &entry {
            entry.acquired.store(NOT_ACQUIRED, Ordering::Release);
        }
        Ok(res)
    }
}

//! Software GPU implementing both sides of the bridge.
//!
//! Textures and fences live in a process wide object table keyed by fake
//! handle values. Sharing a texture hands out a new handle to the same
//! memory, so writes through the application view show up in the runtime view.

use core::{
    ffi::c_void,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};
use std::{
    collections::HashMap,
    sync::Arc,
    thread,
    time::Instant,
};

use anyhow::Context;
use ash::vk::{self, Handle};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::{
    AppDevice, AppFence, AppImage, AppImageDesc, ImageDesc, InteropProvider, RuntimeDevice,
    RuntimeFence, SessionDevices, SharedHandle,
};
use crate::graphics::{Luid, RuntimeAdapter, VulkanBinding};

/// Texture memory.
pub struct MockTexture {
    pub desc: ImageDesc,
    pub pixels: Mutex<Vec<u32>>,
}

/// Timeline fence shared by both sides.
#[derive(Default)]
pub struct MockTimeline {
    pub value: AtomicU64,
    pub queue_waits: Mutex<Vec<u64>>,
}

#[derive(Clone)]
enum Object {
    Texture(Arc<MockTexture>),
    Timeline(Arc<MockTimeline>),
}

static OBJECTS: Lazy<Mutex<HashMap<usize, Object>>> = Lazy::new(Default::default);
static NEXT_OBJECT: AtomicUsize = AtomicUsize::new(0x1000);

fn register(object: Object) -> usize {
    let raw = NEXT_OBJECT.fetch_add(0x10, Ordering::Relaxed);
    OBJECTS.lock().insert(raw, object);
    raw
}

fn release(raw: usize) {
    OBJECTS.lock().remove(&raw);
}

fn lookup(raw: usize) -> Option<Object> {
    OBJECTS.lock().get(&raw).cloned()
}

/// Allocate a runtime texture. Returns its fake `ID3D12Resource` pointer.
pub fn create_texture(desc: ImageDesc) -> usize {
    let len = (desc.width * desc.height * desc.array_size) as usize;
    register(Object::Texture(Arc::new(MockTexture {
        desc,
        pixels: Mutex::new(vec![0; len]),
    })))
}

pub fn destroy_texture(raw: usize) {
    release(raw);
}

/// Texture behind a runtime texture pointer or an application image handle.
pub fn texture(raw: usize) -> Option<Arc<MockTexture>> {
    match lookup(raw)? {
        Object::Texture(texture) => Some(texture),
        Object::Timeline(_) => None,
    }
}

/// Number of live references to the memory of a texture.
pub fn texture_refs(raw: usize) -> usize {
    texture(raw).map_or(0, |texture| Arc::strong_count(&texture) - 1)
}

fn timeline(raw: usize) -> Option<Arc<MockTimeline>> {
    match lookup(raw)? {
        Object::Timeline(timeline) => Some(timeline),
        Object::Texture(_) => None,
    }
}

/// Knobs and counters shared by the devices of a [`MockProvider`].
#[derive(Default)]
pub struct MockGpu {
    /// Application queue never reaches signaled values.
    pub stalled: AtomicBool,
    /// Fail importing once this many images are imported.
    pub fail_import_at: Mutex<Option<usize>>,
    pub images_imported: AtomicUsize,
    pub images_released: AtomicUsize,
    /// `images_released` at every application queue idle wait.
    pub idle_waits: Mutex<Vec<usize>>,
    pub sessions_opened: AtomicUsize,
    pub timeline: Mutex<Option<Arc<MockTimeline>>>,
}

/// Provider over the software GPU.
pub struct MockProvider {
    pub runtime_luid: Luid,
    pub physical_devices: Vec<(vk::PhysicalDevice, Option<Luid>)>,
    pub gpu: Arc<MockGpu>,
}

impl MockProvider {
    /// One physical device on the runtime adapter.
    pub fn new(runtime_luid: Luid) -> Self {
        Self {
            runtime_luid,
            physical_devices: vec![(vk::PhysicalDevice::from_raw(0x51), Some(runtime_luid))],
            gpu: Arc::default(),
        }
    }
}

impl InteropProvider for MockProvider {
    unsafe fn vulkan_physical_devices(
        &self,
        _instance: vk::Instance,
        _get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    ) -> anyhow::Result<Vec<(vk::PhysicalDevice, Option<Luid>)>> {
        Ok(self.physical_devices.clone())
    }

    unsafe fn open_session(
        &self,
        adapter: &RuntimeAdapter,
        binding: &VulkanBinding,
        _get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    ) -> anyhow::Result<SessionDevices> {
        self.gpu.sessions_opened.fetch_add(1, Ordering::SeqCst);

        Ok(SessionDevices {
            runtime: Box::new(MockRuntimeDevice {
                luid: adapter.luid,
                gpu: self.gpu.clone(),
            }),
            app: Box::new(MockAppDevice {
                queue: vk::Queue::from_raw(0x9000 + binding.queue_index as u64),
                gpu: self.gpu.clone(),
            }),
        })
    }
}

struct MockRuntimeDevice {
    luid: Luid,
    gpu: Arc<MockGpu>,
}

impl RuntimeDevice for MockRuntimeDevice {
    fn adapter_luid(&self) -> Luid {
        self.luid
    }

    fn device_ptr(&self) -> *mut c_void {
        0xd3d0 as *mut c_void
    }

    fn queue_ptr(&self) -> *mut c_void {
        0xd3d1 as *mut c_void
    }

    fn create_shared_fence(&self) -> anyhow::Result<(Box<dyn RuntimeFence>, SharedHandle)> {
        let timeline = Arc::new(MockTimeline::default());
        *self.gpu.timeline.lock() = Some(timeline.clone());

        let handle = register(Object::Timeline(timeline.clone()));
        Ok((
            Box::new(MockRuntimeFence { timeline }),
            SharedHandle::new(handle, release),
        ))
    }

    unsafe fn describe_image(&self, texture: *mut c_void) -> anyhow::Result<ImageDesc> {
        Ok(self::texture(texture as usize).context("unknown texture")?.desc)
    }

    unsafe fn share_image(&self, texture: *mut c_void) -> anyhow::Result<SharedHandle> {
        let memory = self::texture(texture as usize).context("unknown texture")?;
        Ok(SharedHandle::new(register(Object::Texture(memory)), release))
    }
}

struct MockRuntimeFence {
    timeline: Arc<MockTimeline>,
}

impl RuntimeFence for MockRuntimeFence {
    fn queue_wait(&self, value: u64) -> anyhow::Result<()> {
        self.timeline.queue_waits.lock().push(value);
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.timeline.value.load(Ordering::Acquire)
    }
}

struct MockAppDevice {
    queue: vk::Queue,
    gpu: Arc<MockGpu>,
}

impl AppDevice for MockAppDevice {
    fn queue(&self) -> vk::Queue {
        self.queue
    }

    fn wait_idle(&self) -> anyhow::Result<()> {
        let released = self.gpu.images_released.load(Ordering::SeqCst);
        self.gpu.idle_waits.lock().push(released);
        Ok(())
    }

    fn import_fence(&self, handle: &SharedHandle) -> anyhow::Result<Box<dyn AppFence>> {
        let timeline = timeline(handle.raw()).context("invalid fence handle")?;
        Ok(Box::new(MockAppFence {
            timeline,
            gpu: self.gpu.clone(),
        }))
    }

    fn import_image(
        &self,
        handle: &SharedHandle,
        desc: &AppImageDesc,
    ) -> anyhow::Result<Box<dyn AppImage>> {
        let imported = self.gpu.images_imported.load(Ordering::SeqCst);
        if *self.gpu.fail_import_at.lock() == Some(imported) {
            anyhow::bail!("out of device memory");
        }

        let memory = texture(handle.raw()).context("invalid texture handle")?;
        anyhow::ensure!(
            (memory.desc.width, memory.desc.height) == (desc.width, desc.height),
            "imported image size mismatch"
        );

        self.gpu.images_imported.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockAppImage {
            raw: register(Object::Texture(memory)),
            gpu: self.gpu.clone(),
        }))
    }
}

struct MockAppFence {
    timeline: Arc<MockTimeline>,
    gpu: Arc<MockGpu>,
}

impl AppFence for MockAppFence {
    fn signal_on_queue(&self, value: u64) -> anyhow::Result<()> {
        if !self.gpu.stalled.load(Ordering::SeqCst) {
            self.timeline.value.fetch_max(value, Ordering::AcqRel);
        }
        Ok(())
    }

    fn wait(&self, value: u64, timeout: Duration) -> anyhow::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.timeline.value.load(Ordering::Acquire) >= value {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

struct MockAppImage {
    raw: usize,
    gpu: Arc<MockGpu>,
}

impl AppImage for MockAppImage {
    fn handle(&self) -> vk::Image {
        vk::Image::from_raw(self.raw as u64)
    }
}

impl Drop for MockAppImage {
    fn drop(&mut self) {
        release(self.raw);
        self.gpu.images_released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::{InteropImage, SharedFence};

    fn desc() -> ImageDesc {
        ImageDesc {
            width: 4,
            height: 2,
            array_size: 1,
            mip_count: 1,
            sample_count: 1,
            format: 29,
        }
    }

    #[test]
    fn shared_memory_round_trip() {
        let provider = MockProvider::new(Luid { low: 1, high: 0 });
        let adapter = RuntimeAdapter {
            luid: provider.runtime_luid,
            min_feature_level: 0xb000,
        };
        let binding = VulkanBinding {
            instance: vk::Instance::from_raw(1),
            physical_device: vk::PhysicalDevice::from_raw(0x51),
            device: vk::Device::from_raw(2),
            queue_family_index: 0,
            queue_index: 0,
        };
        let devices = unsafe { provider.open_session(&adapter, &binding, None) }.unwrap();
        let fence = SharedFence::create(&*devices.runtime, &*devices.app).unwrap();

        let texture = create_texture(desc());
        let app_desc = AppImageDesc {
            width: 4,
            height: 2,
            array_size: 1,
            mip_count: 1,
            sample_count: 1,
            format: vk::Format::R8G8B8A8_SRGB,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            flags: vk::ImageCreateFlags::empty(),
        };
        let image =
            unsafe { InteropImage::import(&devices, &fence, texture as *mut c_void, &app_desc) }
                .unwrap();
        assert_eq!(texture_refs(texture), 2);

        let pattern = [0xff00ff00_u32, 0x00ff00ff, 1, 2, 3, 4, 5, 6];
        self::texture(image.app_image().as_raw() as usize)
            .unwrap()
            .pixels
            .lock()
            .copy_from_slice(&pattern);

        let value = fence.next_value();
        fence.app().signal_on_queue(value).unwrap();
        assert!(fence.app().wait(value, Duration::from_millis(10)).unwrap());
        fence.runtime().queue_wait(value).unwrap();
        assert_eq!(fence.runtime().completed_value(), value);

        assert_eq!(*self::texture(texture).unwrap().pixels.lock(), pattern);

        drop(image);
        assert_eq!(texture_refs(texture), 1);
        assert_eq!(provider.gpu.images_released.load(Ordering::SeqCst), 1);
        destroy_texture(texture);
    }

    #[test]
    fn stalled_queue_times_out() {
        let gpu = Arc::new(MockGpu::default());
        gpu.stalled.store(true, Ordering::SeqCst);
        let fence = MockAppFence {
            timeline: Arc::default(),
            gpu,
        };

        fence.signal_on_queue(1).unwrap();
        assert!(!fence.wait(1, Duration::from_millis(5)).unwrap());
    }
}

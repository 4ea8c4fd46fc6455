use core::ffi::c_void;

use anyhow::Context;
use tracing::{debug, info};
use windows::{
    Win32::{
        Foundation::{CloseHandle, GENERIC_ALL, HANDLE, LUID},
        Graphics::{
            Direct3D::D3D_FEATURE_LEVEL,
            Direct3D12::*,
            Dxgi::{CreateDXGIFactory1, IDXGIAdapter1, IDXGIFactory4},
        },
    },
    core::{Interface, PCWSTR},
};

use super::{ImageDesc, RuntimeDevice, RuntimeFence, SharedHandle};
use crate::graphics::{Luid, RuntimeAdapter};

fn close_handle(raw: usize) {
    unsafe {
        _ = CloseHandle(HANDLE(raw as *mut c_void));
    }
}

/// Direct3D 12 device and direct queue handed to the runtime.
pub struct D3D12Device {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    luid: Luid,
}

unsafe impl Send for D3D12Device {}
unsafe impl Sync for D3D12Device {}

impl D3D12Device {
    pub fn open(adapter: &RuntimeAdapter) -> anyhow::Result<Self> {
        unsafe {
            let factory = CreateDXGIFactory1::<IDXGIFactory4>()?;
            let dxgi_adapter = factory
                .EnumAdapterByLuid::<IDXGIAdapter1>(LUID {
                    LowPart: adapter.luid.low,
                    HighPart: adapter.luid.high,
                })
                .context("runtime adapter not found")?;

            let desc = dxgi_adapter.GetDesc1()?;
            let name_len = desc
                .Description
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(desc.Description.len());
            info!(
                "runtime adapter: {}",
                String::from_utf16_lossy(&desc.Description[..name_len])
            );

            let mut device = None;
            D3D12CreateDevice::<_, ID3D12Device>(
                &dxgi_adapter,
                D3D_FEATURE_LEVEL(adapter.min_feature_level),
                &mut device,
            )
            .context("failed to create D3D12 device")?;
            let device = device.context("D3D12CreateDevice returned no device")?;

            let queue = device
                .CreateCommandQueue::<ID3D12CommandQueue>(&D3D12_COMMAND_QUEUE_DESC {
                    Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                    Priority: D3D12_COMMAND_QUEUE_PRIORITY_NORMAL.0,
                    ..Default::default()
                })
                .context("failed to create D3D12 command queue")?;
            debug!("D3D12 device and queue created");

            Ok(Self {
                device,
                queue,
                luid: adapter.luid,
            })
        }
    }
}

impl RuntimeDevice for D3D12Device {
    fn adapter_luid(&self) -> Luid {
        self.luid
    }

    fn device_ptr(&self) -> *mut c_void {
        self.device.as_raw()
    }

    fn queue_ptr(&self) -> *mut c_void {
        self.queue.as_raw()
    }

    fn create_shared_fence(&self) -> anyhow::Result<(Box<dyn RuntimeFence>, SharedHandle)> {
        unsafe {
            let fence = self
                .device
                .CreateFence::<ID3D12Fence>(0, D3D12_FENCE_FLAG_SHARED)
                .context("failed to create shared D3D12 fence")?;
            let handle = self
                .device
                .CreateSharedHandle(&fence, None, GENERIC_ALL.0, PCWSTR::null())
                .context("failed to share D3D12 fence")?;

            Ok((
                Box::new(D3D12Fence {
                    fence,
                    queue: self.queue.clone(),
                }),
                SharedHandle::new(handle.0 as usize, close_handle),
            ))
        }
    }

    unsafe fn describe_image(&self, texture: *mut c_void) -> anyhow::Result<ImageDesc> {
        let resource = unsafe { ID3D12Resource::from_raw_borrowed(&texture) }
            .context("null runtime texture")?;
        let desc = unsafe { resource.GetDesc() };

        Ok(ImageDesc {
            width: desc.Width as u32,
            height: desc.Height,
            array_size: desc.DepthOrArraySize as u32,
            mip_count: desc.MipLevels as u32,
            sample_count: desc.SampleDesc.Count,
            format: desc.Format.0 as i64,
        })
    }

    unsafe fn share_image(&self, texture: *mut c_void) -> anyhow::Result<SharedHandle> {
        let resource = unsafe { ID3D12Resource::from_raw_borrowed(&texture) }
            .context("null runtime texture")?;
        let handle = unsafe {
            self.device
                .CreateSharedHandle(resource, None, GENERIC_ALL.0, PCWSTR::null())
        }
        .context("failed to share runtime texture")?;

        Ok(SharedHandle::new(handle.0 as usize, close_handle))
    }
}

struct D3D12Fence {
    fence: ID3D12Fence,
    queue: ID3D12CommandQueue,
}

unsafe impl Send for D3D12Fence {}
unsafe impl Sync for D3D12Fence {}

impl RuntimeFence for D3D12Fence {
    fn queue_wait(&self, value: u64) -> anyhow::Result<()> {
        unsafe { self.queue.Wait(&self.fence, value) }
            .context("failed to queue wait on shared fence")
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }
}

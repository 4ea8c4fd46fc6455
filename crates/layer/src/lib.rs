//! OpenXR API layer running Vulkan applications on Direct3D 12 runtimes.
//!
//! The layer intercepts session, swapchain and frame submission calls and
//! backs every Vulkan swapchain image with the runtime's Direct3D 12 texture
//! through shared handles.

pub mod capability;
pub mod config;
pub mod dispatch;
mod entry;
pub mod error;
pub mod graphics;
pub mod instance;
pub mod interop;
pub mod loader;
pub mod manifest;
pub mod runtime;
pub mod session;

pub use loader::negotiate_loader_api_layer_interface;

use core::{ffi::c_char, ptr, slice};

use dashmap::DashMap;
use nohash_hasher::BuildNoHashHasher;
use openxr_sys as xr;

use crate::error::LayerError;

/// Map keyed by raw OpenXR handle values. Handles are already unique integers.
pub(crate) type HandleMap<V> = DashMap<u64, V, BuildNoHashHasher<u64>>;

macro_rules! proc_table {
    ($id:expr => {
        $($proc:ident => $func:path : $proc_ty:ty),* $(,)?
    }) => {
        match $id {
            $(
                $crate::manifest::FunctionId::$proc => unsafe {
                    ::core::mem::transmute::<$proc_ty, ::openxr_sys::pfn::VoidFunction>($func)
                },
            )*
        }
    };
}
use proc_table;

macro_rules! resolve_proc {
    ($f:expr => $this:expr, $name:literal : $ty:ty) => {{
        let mut function = None;
        if $f($this, $name.as_ptr(), &mut function).into_raw() >= 0 {
            ::core::mem::transmute::<Option<::openxr_sys::pfn::VoidFunction>, Option<$ty>>(function)
        } else {
            None
        }
    }};
}
use resolve_proc;

/// Apply the OpenXR two-call idiom to `items`.
///
/// # Safety
/// `count_output` must be valid for writes and `buffer` valid for `capacity` writes.
pub(crate) unsafe fn fill_two_call<T: Copy>(
    items: &[T],
    capacity: u32,
    count_output: *mut u32,
    buffer: *mut T,
) -> Result<xr::Result, LayerError> {
    if count_output.is_null() {
        return Err(LayerError::Validation("null count output"));
    }

    unsafe { *count_output = items.len() as u32 };
    if capacity == 0 {
        return Ok(xr::Result::SUCCESS);
    }
    if (capacity as usize) < items.len() {
        return Err(LayerError::Runtime(xr::Result::ERROR_SIZE_INSUFFICIENT));
    }
    if buffer.is_null() {
        return Err(LayerError::Validation("null output buffer"));
    }

    unsafe { ptr::copy_nonoverlapping(items.as_ptr(), buffer, items.len()) };
    Ok(xr::Result::SUCCESS)
}

/// Two-call idiom for a nul terminated string output.
///
/// # Safety
/// Same as [`fill_two_call`].
pub(crate) unsafe fn fill_two_call_str(
    value: &str,
    capacity: u32,
    count_output: *mut u32,
    buffer: *mut c_char,
) -> Result<xr::Result, LayerError> {
    let bytes = value
        .bytes()
        .chain([0])
        .map(|byte| byte as c_char)
        .collect::<Vec<_>>();
    unsafe { fill_two_call(&bytes, capacity, count_output, buffer) }
}

/// Read a fixed size nul terminated OpenXR string field.
pub(crate) fn fixed_str(raw: &[c_char]) -> String {
    let bytes = unsafe { slice::from_raw_parts(raw.as_ptr().cast::<u8>(), raw.len()) };
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_call_reports_count_then_fills() {
        let items = [3_i64, 4, 5];
        let mut count = 0;
        unsafe { fill_two_call(&items, 0, &mut count, ptr::null_mut()) }.unwrap();
        assert_eq!(count, 3);

        let mut small = [0_i64; 2];
        assert!(matches!(
            unsafe { fill_two_call(&items, 2, &mut count, small.as_mut_ptr()) },
            Err(LayerError::Runtime(xr::Result::ERROR_SIZE_INSUFFICIENT))
        ));

        let mut out = [0_i64; 4];
        unsafe { fill_two_call(&items, 4, &mut count, out.as_mut_ptr()) }.unwrap();
        assert_eq!(out, [3, 4, 5, 0]);
    }

    #[test]
    fn string_output_counts_terminator() {
        let mut count = 0;
        let mut out = [1 as c_char; 4];
        unsafe { fill_two_call_str("abc", 4, &mut count, out.as_mut_ptr()) }.unwrap();
        assert_eq!(count, 4);
        assert_eq!(fixed_str(&out), "abc");
    }
}

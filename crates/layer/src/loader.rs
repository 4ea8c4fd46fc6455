//! OpenXR loader to API layer interface.

use core::{
    ffi::{CStr, c_char, c_void},
    mem, ptr, slice,
};
use std::{ffi::CString, sync::Arc};

use openxr_sys::{self as xr, pfn};
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::LayerConfig,
    entry::{self, NEXT_GET_INSTANCE_PROC_ADDR},
    error::{LayerError, XrResultExt},
    fixed_str,
    instance::{INSTANCES, Instance},
    interop::native::NativeProvider,
    manifest::{self, Variant},
    runtime::ChainedRuntime,
};

pub const CURRENT_LOADER_API_LAYER_VERSION: u32 = 1;
pub const API_LAYER_MAX_SETTINGS_PATH_SIZE: usize = 512;

const LOADER_INFO_STRUCT_VERSION: u32 = 1;
const API_LAYER_INFO_STRUCT_VERSION: u32 = 1;
const API_LAYER_CREATE_INFO_STRUCT_VERSION: u32 = 1;
const API_LAYER_NEXT_INFO_STRUCT_VERSION: u32 = 1;

/// `XrLoaderInterfaceStructs`
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderInterfaceStruct(i32);

impl LoaderInterfaceStruct {
    pub const UNINITIALIZED: Self = Self(0);
    pub const LOADER_INFO: Self = Self(1);
    pub const API_LAYER_REQUEST: Self = Self(2);
    pub const RUNTIME_REQUEST: Self = Self(3);
    pub const API_LAYER_CREATE_INFO: Self = Self(4);
    pub const API_LAYER_NEXT_INFO: Self = Self(5);
}

pub type FnCreateApiLayerInstance = unsafe extern "system" fn(
    info: *const xr::InstanceCreateInfo,
    api_layer_info: *const ApiLayerCreateInfo,
    instance: *mut xr::Instance,
) -> xr::Result;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NegotiateLoaderInfo {
    pub ty: LoaderInterfaceStruct,
    pub struct_version: u32,
    pub struct_size: usize,
    pub min_interface_version: u32,
    pub max_interface_version: u32,
    pub min_api_version: xr::Version,
    pub max_api_version: xr::Version,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct NegotiateApiLayerRequest {
    pub ty: LoaderInterfaceStruct,
    pub struct_version: u32,
    pub struct_size: usize,
    pub layer_interface_version: u32,
    pub layer_api_version: xr::Version,
    pub get_instance_proc_addr: Option<pfn::GetInstanceProcAddr>,
    pub create_api_layer_instance: Option<FnCreateApiLayerInstance>,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ApiLayerNextInfo {
    pub ty: LoaderInterfaceStruct,
    pub struct_version: u32,
    pub struct_size: usize,
    pub layer_name: [c_char; xr::MAX_API_LAYER_NAME_SIZE],
    pub next_get_instance_proc_addr: Option<pfn::GetInstanceProcAddr>,
    pub next_create_api_layer_instance: Option<FnCreateApiLayerInstance>,
    pub next: *mut ApiLayerNextInfo,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ApiLayerCreateInfo {
    pub ty: LoaderInterfaceStruct,
    pub struct_version: u32,
    pub struct_size: usize,
    pub loader_instance: *const c_void,
    pub settings_file_location: [c_char; API_LAYER_MAX_SETTINGS_PATH_SIZE],
    pub next_info: *mut ApiLayerNextInfo,
}

/// Answer the loader's negotiation request.
///
/// # Safety
/// Pointers must be null or point to valid loader structures.
pub unsafe fn negotiate_loader_api_layer_interface(
    loader_info: *const NegotiateLoaderInfo,
    layer_name: *const c_char,
    request: *mut NegotiateApiLayerRequest,
) -> xr::Result {
    trace!("xrNegotiateLoaderApiLayerInterface called");

    let (Some(loader_info), Some(request)) = (unsafe { loader_info.as_ref() }, unsafe {
        request.as_mut()
    }) else {
        error!("negotiation called with null arguments");
        return xr::Result::ERROR_INITIALIZATION_FAILED;
    };

    if loader_info.ty != LoaderInterfaceStruct::LOADER_INFO
        || loader_info.struct_version != LOADER_INFO_STRUCT_VERSION
        || loader_info.struct_size != mem::size_of::<NegotiateLoaderInfo>()
        || request.ty != LoaderInterfaceStruct::API_LAYER_REQUEST
        || request.struct_version != API_LAYER_INFO_STRUCT_VERSION
        || request.struct_size != mem::size_of::<NegotiateApiLayerRequest>()
        || loader_info.min_interface_version > CURRENT_LOADER_API_LAYER_VERSION
        || loader_info.max_interface_version < CURRENT_LOADER_API_LAYER_VERSION
    {
        error!("loader negotiation structures are invalid");
        return xr::Result::ERROR_INITIALIZATION_FAILED;
    }

    if !layer_name.is_null() {
        let name = unsafe { CStr::from_ptr(layer_name) }.to_string_lossy();
        if Variant::by_name(&name).is_none() {
            warn!("negotiating as unknown layer {name}");
        } else {
            debug!("negotiating as {name}");
        }
    }

    request.layer_interface_version = CURRENT_LOADER_API_LAYER_VERSION;
    request.layer_api_version = xr::Version::new(1, 0, 0);
    request.get_instance_proc_addr = Some(entry::get_instance_proc_addr);
    request.create_api_layer_instance = Some(create_api_layer_instance);

    xr::Result::SUCCESS
}

/// Instance extensions requested from the runtime for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionPlan {
    pub enabled: Vec<String>,
    /// Vulkan enable extensions are served by the layer over `XR_KHR_D3D12_enable`.
    pub bridged: bool,
}

/// Instance extensions to request from the runtime.
///
/// Vulkan enable extensions the runtime cannot serve are swapped for
/// `XR_KHR_D3D12_enable` when the runtime offers it.
pub fn plan_instance_extensions(requested: &[&str], runtime: &[String]) -> ExtensionPlan {
    let offers = |name: &str| runtime.iter().any(|ext| ext == name);
    let bridge = offers(manifest::D3D12_ENABLE);

    let mut enabled = Vec::with_capacity(requested.len() + 1);
    let mut bridged = false;
    for &extension in requested {
        let vulkan =
            extension == manifest::VULKAN_ENABLE || extension == manifest::VULKAN_ENABLE2;
        if vulkan && bridge && !offers(extension) {
            bridged = true;
            continue;
        }
        if !enabled.iter().any(|enabled| enabled == extension) {
            enabled.push(extension.to_string());
        }
    }

    if bridged && !enabled.iter().any(|ext| ext == manifest::D3D12_ENABLE) {
        enabled.push(manifest::D3D12_ENABLE.to_string());
    }
    ExtensionPlan { enabled, bridged }
}

/// Instance extensions the next layer offers.
unsafe fn runtime_extensions(next_gpa: pfn::GetInstanceProcAddr) -> Result<Vec<String>, LayerError> {
    let mut function = None;
    unsafe {
        next_gpa(
            xr::Instance::NULL,
            c"xrEnumerateInstanceExtensionProperties".as_ptr(),
            &mut function,
        )
    };
    let enumerate = function
        .map(|function| unsafe {
            mem::transmute::<pfn::VoidFunction, pfn::EnumerateInstanceExtensionProperties>(function)
        })
        .ok_or(LayerError::UnresolvedFunction("xrEnumerateInstanceExtensionProperties"))?;

    let mut count = 0;
    unsafe { enumerate(ptr::null(), 0, &mut count, ptr::null_mut()) }.check()?;

    let mut properties = vec![
        xr::ExtensionProperties {
            ty: xr::StructureType::EXTENSION_PROPERTIES,
            next: ptr::null_mut(),
            extension_name: [0; xr::MAX_EXTENSION_NAME_SIZE],
            extension_version: 0,
        };
        count as usize
    ];
    unsafe { enumerate(ptr::null(), count, &mut count, properties.as_mut_ptr()) }.check()?;

    Ok(properties
        .iter()
        .take(count as usize)
        .map(|properties| fixed_str(&properties.extension_name))
        .collect())
}

unsafe fn validate_create_info<'a>(
    layer_info: *const ApiLayerCreateInfo,
) -> Result<(&'a ApiLayerCreateInfo, &'a ApiLayerNextInfo), LayerError> {
    let layer_info =
        unsafe { layer_info.as_ref() }.ok_or(LayerError::Validation("null api layer info"))?;
    if layer_info.ty != LoaderInterfaceStruct::API_LAYER_CREATE_INFO
        || layer_info.struct_version != API_LAYER_CREATE_INFO_STRUCT_VERSION
        || layer_info.struct_size != mem::size_of::<ApiLayerCreateInfo>()
    {
        return Err(LayerError::Validation("invalid api layer create info"));
    }

    let next_info =
        unsafe { layer_info.next_info.as_ref() }.ok_or(LayerError::Validation("null next info"))?;
    if next_info.ty != LoaderInterfaceStruct::API_LAYER_NEXT_INFO
        || next_info.struct_version != API_LAYER_NEXT_INFO_STRUCT_VERSION
        || next_info.struct_size != mem::size_of::<ApiLayerNextInfo>()
        || next_info.next_get_instance_proc_addr.is_none()
        || next_info.next_create_api_layer_instance.is_none()
    {
        return Err(LayerError::Validation("invalid api layer next info"));
    }

    Ok((layer_info, next_info))
}

fn select_variant(layer_name: &str, config: &LayerConfig) -> Result<&'static Variant, LayerError> {
    if let Some(variant) = Variant::by_name(layer_name) {
        return Ok(variant);
    }

    config
        .variant
        .as_deref()
        .and_then(Variant::by_name)
        .ok_or(LayerError::Runtime(xr::Result::ERROR_INITIALIZATION_FAILED))
}

unsafe extern "system" fn create_api_layer_instance(
    info: *const xr::InstanceCreateInfo,
    layer_info: *const ApiLayerCreateInfo,
    instance: *mut xr::Instance,
) -> xr::Result {
    trace!("xrCreateApiLayerInstance called");

    match unsafe { try_create_instance(info, layer_info, instance) } {
        Ok(res) => res,
        Err(err) => {
            error!("xrCreateApiLayerInstance failed: {err}");
            match err {
                LayerError::Validation(_) => xr::Result::ERROR_INITIALIZATION_FAILED,
                err => err.to_xr(),
            }
        }
    }
}

#[tracing::instrument(skip_all)]
unsafe fn try_create_instance(
    info: *const xr::InstanceCreateInfo,
    layer_info: *const ApiLayerCreateInfo,
    instance: *mut xr::Instance,
) -> Result<xr::Result, LayerError> {
    let (layer_info, next_info) = unsafe { validate_create_info(layer_info) }?;
    let create_info = unsafe { info.as_ref() }.ok_or(LayerError::Validation("null create info"))?;
    if instance.is_null() {
        return Err(LayerError::Validation("null instance output"));
    }

    let mut layer = Some(next_info);
    while let Some(next) = layer {
        info!("using layer: {}", fixed_str(&next.layer_name));
        layer = unsafe { next.next.as_ref() };
    }

    let config = LayerConfig::from_env();
    let variant = select_variant(&fixed_str(&next_info.layer_name), &config)?;
    let (Some(next_gpa), Some(next_create)) = (
        next_info.next_get_instance_proc_addr,
        next_info.next_create_api_layer_instance,
    ) else {
        return Err(LayerError::Validation("invalid api layer next info"));
    };
    let _ = NEXT_GET_INSTANCE_PROC_ADDR.set(next_gpa);

    let runtime_extensions = unsafe { runtime_extensions(next_gpa) }?;
    debug!("runtime extensions: {runtime_extensions:?}");

    let requested = if create_info.enabled_extension_count == 0 {
        Vec::new()
    } else {
        unsafe {
            slice::from_raw_parts(
                create_info.enabled_extension_names,
                create_info.enabled_extension_count as usize,
            )
        }
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
    };
    for extension in &requested {
        info!("requested extension: {extension}");
    }

    let requested_refs = requested.iter().map(String::as_str).collect::<Vec<_>>();
    let plan = plan_instance_extensions(&requested_refs, &runtime_extensions);
    if !plan.bridged {
        info!("vulkan is not bridged for this instance");
    }
    let planned = plan
        .enabled
        .iter()
        .map(|name| CString::new(name.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LayerError::Validation("extension name contains nul"))?;
    let planned_ptrs = planned.iter().map(|name| name.as_ptr()).collect::<Vec<_>>();

    let mut chain_info = *create_info;
    chain_info.enabled_extension_count = planned_ptrs.len() as u32;
    chain_info.enabled_extension_names = planned_ptrs.as_ptr();

    let mut chain_layer_info = *layer_info;
    chain_layer_info.next_info = next_info.next;

    let res = unsafe { next_create(&chain_info, &chain_layer_info, instance) }.check()?;
    let handle = unsafe { *instance };

    let destroy_downstream = scopeguard::guard(handle, |handle| {
        warn!("destroying downstream instance after failed creation");
        let mut function = None;
        let res = unsafe { next_gpa(handle, c"xrDestroyInstance".as_ptr(), &mut function) };
        if let (true, Some(function)) = (res.into_raw() >= 0, function) {
            let destroy =
                unsafe { mem::transmute::<pfn::VoidFunction, pfn::DestroyInstance>(function) };
            unsafe { destroy(handle) };
        }
    });

    let runtime = Arc::new(ChainedRuntime::new(next_gpa, handle));
    let layer = Instance::new(
        handle,
        variant,
        config,
        runtime,
        Arc::new(NativeProvider::default()),
        &runtime_extensions,
        &plan,
    )?;

    info!(
        "application: {} {} engine: {} {}",
        fixed_str(&create_info.application_info.application_name),
        create_info.application_info.application_version,
        fixed_str(&create_info.application_info.engine_name),
        create_info.application_info.engine_version
    );
    layer.log_runtime_properties();

    INSTANCES.insert(handle.into_raw(), Arc::new(layer));
    scopeguard::ScopeGuard::into_inner(destroy_downstream);

    Ok(res)
}

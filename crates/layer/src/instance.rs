pub mod system;

use core::ffi::CStr;
use std::{ffi::CString, sync::Arc};

use once_cell::sync::{Lazy, OnceCell};
use openxr_sys::{self as xr, pfn};
use tracing::{debug, info, warn};

use crate::{
    capability::{self, CapabilitySet, RuntimeSurface},
    config::LayerConfig,
    dispatch::{DispatchTable, Route},
    entry,
    error::{LayerError, XrResultExt},
    graphics::{ApiKind, Negotiator},
    interop::InteropProvider,
    loader::ExtensionPlan,
    manifest::Variant,
    HandleMap,
    runtime::NextRuntime,
    session::Registry,
};

/// Live layer instances by `XrInstance`.
pub(crate) static INSTANCES: Lazy<HandleMap<Arc<Instance>>> =
    Lazy::new(HandleMap::default);

/// Owning instance of every `XrSession` created through the layer.
pub(crate) static SESSION_OWNERS: Lazy<HandleMap<Arc<Instance>>> =
    Lazy::new(HandleMap::default);

/// Owning instance of every `XrSwapchain` created through the layer.
pub(crate) static SWAPCHAIN_OWNERS: Lazy<HandleMap<Arc<Instance>>> =
    Lazy::new(HandleMap::default);

pub(crate) fn instance(handle: xr::Instance) -> Option<Arc<Instance>> {
    INSTANCES
        .get(&handle.into_raw())
        .map(|instance| instance.clone())
}

pub(crate) fn session_owner(handle: xr::Session) -> Option<Arc<Instance>> {
    SESSION_OWNERS
        .get(&handle.into_raw())
        .map(|instance| instance.clone())
}

pub(crate) fn swapchain_owner(handle: xr::Swapchain) -> Option<Arc<Instance>> {
    SWAPCHAIN_OWNERS
        .get(&handle.into_raw())
        .map(|instance| instance.clone())
}

/// Drop handle map entries of objects `instance` no longer owns.
pub(crate) fn prune_owners(instance: &Arc<Instance>) {
    SESSION_OWNERS.retain(|&handle, owner| {
        !Arc::ptr_eq(owner, instance) || instance.registry.has_session(handle)
    });
    SWAPCHAIN_OWNERS.retain(|&handle, owner| {
        !Arc::ptr_eq(owner, instance) || instance.registry.has_swapchain(handle)
    });
}

/// Layer state of one `XrInstance`.
pub struct Instance {
    pub(crate) handle: xr::Instance,
    pub(crate) variant: &'static Variant,
    pub(crate) config: LayerConfig,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) dispatch: DispatchTable,
    pub(crate) runtime: Arc<dyn NextRuntime>,
    pub(crate) negotiator: Negotiator,
    pub(crate) provider: Arc<dyn InteropProvider>,
    pub(crate) registry: Registry,
    hmd_system: OnceCell<u64>,
}

impl Instance {
    /// Resolve capabilities and build the dispatch table of a created downstream instance.
    pub fn new(
        handle: xr::Instance,
        variant: &'static Variant,
        config: LayerConfig,
        runtime: Arc<dyn NextRuntime>,
        provider: Arc<dyn InteropProvider>,
        runtime_extensions: &[String],
        extensions: &ExtensionPlan,
    ) -> Result<Self, LayerError> {
        let exposes = |name: &str| {
            CString::new(name)
                .ok()
                .and_then(|name| runtime.get_instance_proc_addr(&name))
                .is_some()
        };
        let capabilities = capability::resolve(
            variant,
            &RuntimeSurface {
                extensions: runtime_extensions,
                exposes: &exposes,
                vulkan_bridged: extensions.bridged,
            },
        )?;
        let dispatch = DispatchTable::build(&capabilities);

        let runtime_api = ApiKind::of_extensions(&extensions.enabled);
        info!(
            "variant: {} runtime api: {runtime_api:?} bridged: {}",
            variant.name, extensions.bridged
        );
        info!("advertised extensions: {:?}", capabilities.extensions);

        Ok(Self {
            handle,
            variant,
            config,
            capabilities,
            dispatch,
            runtime,
            negotiator: Negotiator::new(runtime_api, extensions.bridged),
            provider,
            registry: Registry::default(),
            hmd_system: OnceCell::new(),
        })
    }

    pub fn handle(&self) -> xr::Instance {
        self.handle
    }

    pub fn variant(&self) -> &'static Variant {
        self.variant
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Function handed out by `xrGetInstanceProcAddr` for `name`.
    pub fn resolve(&self, name: &CStr) -> Result<pfn::VoidFunction, LayerError> {
        match self.dispatch.route(name, &*self.runtime)? {
            Route::Forward(function) => Ok(function),
            Route::Override(id) | Route::OverrideForward(id) => Ok(entry::entry_point(id)),
        }
    }

    /// Tear down remaining sessions, then destroy the downstream instance.
    ///
    /// # Safety
    /// No other call on this instance may be in progress.
    #[tracing::instrument(skip(self))]
    pub unsafe fn destroy(&self) -> Result<xr::Result, LayerError> {
        for session in self.registry.session_handles() {
            warn!("destroying session {session:#x} left alive by the application");
            if let Err(err) = unsafe { self.destroy_session(xr::Session::from_raw(session)) } {
                warn!("failed to destroy session {session:#x}: {err}");
            }
        }

        debug!("destroying instance {:#x}", self.handle.into_raw());
        unsafe { self.runtime.destroy_instance(self.handle) }.check()
    }
}

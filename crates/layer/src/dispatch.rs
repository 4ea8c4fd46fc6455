//! Per instance routing of OpenXR functions.

use core::ffi::CStr;

use openxr_sys::pfn;
use tracing::debug;

use crate::{
    capability::CapabilitySet,
    error::LayerError,
    manifest::{FunctionId, Handling},
    runtime::NextRuntime,
};

/// Action taken for one OpenXR function.
#[derive(Debug, Clone, Copy)]
pub enum Route {
    /// Next layer function called with unmodified arguments.
    Forward(pfn::VoidFunction),
    /// Serviced by the layer without calling the next layer.
    Override(FunctionId),
    /// Calls the next layer, adjusting arguments or results.
    OverrideForward(FunctionId),
}

/// Routes of the intercepted functions. Immutable once built.
pub struct DispatchTable {
    routes: [Option<Route>; FunctionId::COUNT],
}

impl DispatchTable {
    pub fn build(capabilities: &CapabilitySet) -> Self {
        let mut routes = [None; FunctionId::COUNT];
        for id in capabilities.intercepted() {
            routes[id as usize] = Some(match id.handling() {
                Handling::Local => Route::Override(id),
                Handling::Chained => Route::OverrideForward(id),
            });
        }

        debug!(
            "dispatch table built, {} intercepted functions",
            routes.iter().flatten().count()
        );
        Self { routes }
    }

    pub fn lookup(&self, id: FunctionId) -> Option<Route> {
        self.routes[id as usize]
    }

    /// Route of `name`. Functions not intercepted go to the next layer when it has them.
    pub fn route(&self, name: &CStr, next: &dyn NextRuntime) -> Result<Route, LayerError> {
        let intercepted = name
            .to_str()
            .ok()
            .and_then(FunctionId::from_name)
            .and_then(|id| self.lookup(id));
        if let Some(route) = intercepted {
            return Ok(route);
        }

        next.get_instance_proc_addr(name)
            .map(Route::Forward)
            .ok_or_else(|| LayerError::FunctionNotSupported(name.to_string_lossy().into_owned()))
    }
}

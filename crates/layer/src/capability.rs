//! Resolution of what a layer variant actually intercepts on a given runtime.

use tracing::{debug, warn};

use crate::{
    error::LayerError,
    manifest::{self, FunctionId, Handling, Requirement, Variant},
};

/// What the runtime below the layer offers, queried at instance creation.
pub struct RuntimeSurface<'a> {
    /// Instance extensions of the runtime.
    pub extensions: &'a [String],

    /// Whether the next layer resolves a function name.
    pub exposes: &'a dyn Fn(&str) -> bool,

    /// Vulkan enable extensions were swapped for `XR_KHR_D3D12_enable` at instance creation.
    pub vulkan_bridged: bool,
}

impl RuntimeSurface<'_> {
    fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }

    /// Whether the layer can implement `extension` on top of this runtime.
    fn bridges(&self, extension: &str) -> bool {
        match extension {
            manifest::VULKAN_ENABLE | manifest::VULKAN_ENABLE2 => {
                self.vulkan_bridged && (self.exposes)("xrGetD3D12GraphicsRequirementsKHR")
            }
            _ => false,
        }
    }
}

/// Resolved capabilities of one instance. Read only after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    intercepted: [bool; FunctionId::COUNT],

    /// Requested functions the next layer resolves.
    pub requested: Vec<&'static str>,

    /// Extensions the instance advertises.
    pub extensions: Vec<&'static str>,
}

impl CapabilitySet {
    pub fn intercepts(&self, id: FunctionId) -> bool {
        self.intercepted[id as usize]
    }

    pub fn intercepted(&self) -> impl Iterator<Item = FunctionId> + '_ {
        FunctionId::ALL
            .iter()
            .copied()
            .filter(|&id| self.intercepts(id))
    }

    pub fn requests(&self, name: &str) -> bool {
        self.requested.iter().any(|&requested| requested == name)
    }

    pub fn advertises(&self, extension: &str) -> bool {
        self.extensions.iter().any(|&advertised| advertised == extension)
    }
}

/// Intersect a variant's declarations with what the runtime offers.
pub fn resolve(variant: &Variant, runtime: &RuntimeSurface) -> Result<CapabilitySet, LayerError> {
    let mut intercepted = [false; FunctionId::COUNT];

    for &name in variant.override_functions {
        let Some(id) = FunctionId::from_name(name) else {
            warn!("{} overrides unknown function {name}", variant.name);
            continue;
        };

        let keep = match (id.handling(), id.requirement()) {
            (Handling::Local, Requirement::Extension(extension)) => runtime.bridges(extension),
            (Handling::Local, _) => true,
            (Handling::Chained, requirement) => {
                if (runtime.exposes)(name) {
                    true
                } else if requirement == Requirement::Core {
                    return Err(LayerError::UnresolvedFunction(id.name()));
                } else {
                    warn!("{name} is not resolvable, dropping override");
                    false
                }
            }
        };

        if keep {
            intercepted[id as usize] = true;
        } else {
            debug!("not intercepting {name}");
        }
    }

    let requested = variant
        .requested_functions
        .iter()
        .copied()
        .filter(|&name| {
            let exposed = (runtime.exposes)(name);
            if !exposed {
                warn!("requested function {name} is not resolvable");
            }
            exposed
        })
        .collect();

    let extensions = variant
        .supported_extensions
        .iter()
        .copied()
        .filter(|&extension| runtime.has_extension(extension) || runtime.bridges(extension))
        .collect::<Vec<_>>();

    for extension in variant.supported_extensions {
        if !extensions.contains(extension) {
            warn!("{extension} is unavailable on this runtime");
        }
    }

    Ok(CapabilitySet {
        intercepted,
        requested,
        extensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{MBUCCHIA, NOVENDOR};

    fn d3d12_runtime() -> Vec<String> {
        vec![manifest::D3D12_ENABLE.to_string()]
    }

    #[test]
    fn vulkan_bridged_on_d3d12_runtime() {
        let extensions = d3d12_runtime();
        let exposes = |_: &str| true;
        let runtime = RuntimeSurface {
            extensions: &extensions,
            exposes: &exposes,
            vulkan_bridged: true,
        };

        let caps = resolve(&MBUCCHIA, &runtime).unwrap();
        assert!(caps.intercepts(FunctionId::CreateVulkanDeviceKHR));
        assert!(caps.intercepts(FunctionId::AcquireSwapchainImage));
        assert!(caps.intercepts(FunctionId::EnumerateViewConfigurationViews));
        assert!(!caps.intercepts(FunctionId::BeginSession));
        assert!(!caps.intercepts(FunctionId::GetOpenGLGraphicsRequirementsKHR));
        assert_eq!(
            caps.extensions,
            [manifest::VULKAN_ENABLE, manifest::VULKAN_ENABLE2, manifest::D3D12_ENABLE]
        );
        assert_eq!(caps.requested.len(), 3);
    }

    #[test]
    fn native_vulkan_runtime_is_left_alone() {
        let extensions = vec![manifest::VULKAN_ENABLE2.to_string()];
        let exposes = |_: &str| true;
        let runtime = RuntimeSurface {
            extensions: &extensions,
            exposes: &exposes,
            vulkan_bridged: false,
        };

        let caps = resolve(&NOVENDOR, &runtime).unwrap();
        assert!(!caps.intercepts(FunctionId::GetVulkanGraphicsDevice2KHR));
        assert!(caps.intercepts(FunctionId::CreateSession));
        assert_eq!(caps.extensions, [manifest::VULKAN_ENABLE2]);
    }

    #[test]
    fn unbridged_instance_forwards_vulkan() {
        let extensions = vec![
            manifest::D3D12_ENABLE.to_string(),
            manifest::VULKAN_ENABLE2.to_string(),
        ];
        let exposes = |_: &str| true;
        let runtime = RuntimeSurface {
            extensions: &extensions,
            exposes: &exposes,
            vulkan_bridged: false,
        };

        let caps = resolve(&NOVENDOR, &runtime).unwrap();
        for id in [
            FunctionId::GetVulkanGraphicsDevice2KHR,
            FunctionId::CreateVulkanDeviceKHR,
            FunctionId::GetVulkanInstanceExtensionsKHR,
        ] {
            assert!(!caps.intercepts(id), "{id:?}");
        }
        assert!(!caps.advertises(manifest::VULKAN_ENABLE));
        assert_eq!(caps.extensions, [manifest::VULKAN_ENABLE2, manifest::D3D12_ENABLE]);
    }

    #[test]
    fn missing_core_function_is_fatal() {
        let extensions = d3d12_runtime();
        let exposes = |name: &str| name != "xrEndFrame";
        let runtime = RuntimeSurface {
            extensions: &extensions,
            exposes: &exposes,
            vulkan_bridged: true,
        };

        assert!(matches!(
            resolve(&NOVENDOR, &runtime),
            Err(LayerError::UnresolvedFunction("xrEndFrame"))
        ));
    }

    #[test]
    fn optional_and_extension_functions_degrade() {
        let extensions = d3d12_runtime();
        let exposes = |name: &str| {
            name != "xrEnumerateViewConfigurationViews"
                && name != "xrGetD3D12GraphicsRequirementsKHR"
                && name != "xrGetSystemProperties"
        };
        let runtime = RuntimeSurface {
            extensions: &extensions,
            exposes: &exposes,
            vulkan_bridged: true,
        };

        let caps = resolve(&MBUCCHIA, &runtime).unwrap();
        assert!(!caps.intercepts(FunctionId::EnumerateViewConfigurationViews));
        assert!(!caps.intercepts(FunctionId::GetVulkanInstanceExtensionsKHR));
        assert!(!caps.advertises(manifest::VULKAN_ENABLE));
        assert!(caps.advertises(manifest::D3D12_ENABLE));
        assert!(!caps.requests("xrGetSystemProperties"));
        assert!(caps.intercepts(FunctionId::EndFrame));
    }
}

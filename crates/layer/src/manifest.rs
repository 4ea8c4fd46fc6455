//! Static layer manifest data: the functions each layer variant intercepts or
//! uses, and the extensions it may expose.

/// `XR_KHR_vulkan_enable`
pub const VULKAN_ENABLE: &str = "XR_KHR_vulkan_enable";
/// `XR_KHR_vulkan_enable2`
pub const VULKAN_ENABLE2: &str = "XR_KHR_vulkan_enable2";
/// `XR_KHR_D3D12_enable`
pub const D3D12_ENABLE: &str = "XR_KHR_D3D12_enable";
/// `XR_KHR_opengl_enable`
pub const OPENGL_ENABLE: &str = "XR_KHR_opengl_enable";

/// How an intercepted function is serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    /// Implemented by the layer alone.
    Local,
    /// Calls into the next layer and adjusts arguments or results.
    Chained,
}

/// What the layer needs for a function to remain intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Session/swapchain lifecycle. Instance creation fails without it.
    Core,
    /// Dropped silently when unavailable.
    Optional,
    /// Belongs to an extension and goes away together with it.
    Extension(&'static str),
}

macro_rules! functions {
    ($($id:ident => $name:literal, $handling:ident, $requirement:expr;)*) => {
        /// Identifier of every OpenXR function the layer knows how to intercept.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum FunctionId {
            $($id,)*
        }

        impl FunctionId {
            pub const ALL: &'static [FunctionId] = &[$(FunctionId::$id,)*];

            pub const COUNT: usize = Self::ALL.len();

            pub const fn name(self) -> &'static str {
                match self {
                    $(FunctionId::$id => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(FunctionId::$id),)*
                    _ => None,
                }
            }

            pub const fn handling(self) -> Handling {
                match self {
                    $(FunctionId::$id => Handling::$handling,)*
                }
            }

            pub const fn requirement(self) -> Requirement {
                match self {
                    $(FunctionId::$id => $requirement,)*
                }
            }
        }
    };
}

functions! {
    GetSystem => "xrGetSystem", Chained, Requirement::Core;
    EnumerateSwapchainFormats => "xrEnumerateSwapchainFormats", Chained, Requirement::Core;
    EnumerateViewConfigurationViews => "xrEnumerateViewConfigurationViews", Chained, Requirement::Optional;
    CreateSession => "xrCreateSession", Chained, Requirement::Core;
    DestroySession => "xrDestroySession", Chained, Requirement::Core;
    BeginSession => "xrBeginSession", Chained, Requirement::Core;
    CreateSwapchain => "xrCreateSwapchain", Chained, Requirement::Core;
    DestroySwapchain => "xrDestroySwapchain", Chained, Requirement::Core;
    EnumerateSwapchainImages => "xrEnumerateSwapchainImages", Chained, Requirement::Core;
    AcquireSwapchainImage => "xrAcquireSwapchainImage", Chained, Requirement::Core;
    ReleaseSwapchainImage => "xrReleaseSwapchainImage", Chained, Requirement::Core;
    EndFrame => "xrEndFrame", Chained, Requirement::Core;
    GetVulkanInstanceExtensionsKHR => "xrGetVulkanInstanceExtensionsKHR", Local, Requirement::Extension(VULKAN_ENABLE);
    GetVulkanDeviceExtensionsKHR => "xrGetVulkanDeviceExtensionsKHR", Local, Requirement::Extension(VULKAN_ENABLE);
    GetVulkanGraphicsDeviceKHR => "xrGetVulkanGraphicsDeviceKHR", Local, Requirement::Extension(VULKAN_ENABLE);
    GetVulkanGraphicsRequirementsKHR => "xrGetVulkanGraphicsRequirementsKHR", Local, Requirement::Extension(VULKAN_ENABLE);
    CreateVulkanInstanceKHR => "xrCreateVulkanInstanceKHR", Local, Requirement::Extension(VULKAN_ENABLE2);
    CreateVulkanDeviceKHR => "xrCreateVulkanDeviceKHR", Local, Requirement::Extension(VULKAN_ENABLE2);
    GetVulkanGraphicsDevice2KHR => "xrGetVulkanGraphicsDevice2KHR", Local, Requirement::Extension(VULKAN_ENABLE2);
    GetVulkanGraphicsRequirements2KHR => "xrGetVulkanGraphicsRequirements2KHR", Local, Requirement::Extension(VULKAN_ENABLE2);
    GetOpenGLGraphicsRequirementsKHR => "xrGetOpenGLGraphicsRequirementsKHR", Local, Requirement::Extension(OPENGL_ENABLE);
}

/// Manifest of one layer variant.
#[derive(Debug, PartialEq, Eq)]
pub struct Variant {
    /// Layer name, as written in the loader manifest.
    pub name: &'static str,

    /// Functions the variant intercepts.
    pub override_functions: &'static [&'static str],

    /// Functions the variant calls on the next layer. May repeat overrides.
    pub requested_functions: &'static [&'static str],

    /// Extensions the variant may expose.
    pub supported_extensions: &'static [&'static str],
}

const VULKAN_OVERRIDES: [&str; 9] = [
    "xrGetVulkanInstanceExtensionsKHR",
    "xrGetVulkanDeviceExtensionsKHR",
    "xrGetVulkanGraphicsDeviceKHR",
    "xrCreateVulkanInstanceKHR",
    "xrCreateVulkanDeviceKHR",
    "xrGetVulkanGraphicsDevice2KHR",
    "xrGetVulkanGraphicsRequirementsKHR",
    "xrGetVulkanGraphicsRequirements2KHR",
    "xrGetOpenGLGraphicsRequirementsKHR",
];

const REQUESTED: [&str; 3] = [
    "xrGetInstanceProperties",
    "xrGetSystemProperties",
    "xrGetViewConfigurationProperties",
];

pub const NOVENDOR: Variant = Variant {
    name: "XR_APILAYER_NOVENDOR_vulkan_d3d12_interop",
    override_functions: &[
        "xrGetSystem",
        "xrEnumerateSwapchainFormats",
        "xrCreateSession",
        "xrDestroySession",
        "xrBeginSession",
        "xrCreateSwapchain",
        "xrDestroySwapchain",
        "xrEnumerateSwapchainImages",
        "xrEndFrame",
        VULKAN_OVERRIDES[0],
        VULKAN_OVERRIDES[1],
        VULKAN_OVERRIDES[2],
        VULKAN_OVERRIDES[3],
        VULKAN_OVERRIDES[4],
        VULKAN_OVERRIDES[5],
        VULKAN_OVERRIDES[6],
        VULKAN_OVERRIDES[7],
        VULKAN_OVERRIDES[8],
    ],
    requested_functions: &REQUESTED,
    supported_extensions: &[VULKAN_ENABLE, VULKAN_ENABLE2, D3D12_ENABLE],
};

pub const MBUCCHIA: Variant = Variant {
    name: "XR_APILAYER_MBUCCHIA_vulkan_d3d12_interop",
    override_functions: &[
        "xrGetSystem",
        "xrEnumerateSwapchainFormats",
        "xrEnumerateViewConfigurationViews",
        "xrCreateSession",
        "xrDestroySession",
        "xrCreateSwapchain",
        "xrDestroySwapchain",
        "xrEnumerateSwapchainImages",
        "xrAcquireSwapchainImage",
        "xrReleaseSwapchainImage",
        "xrEndFrame",
        VULKAN_OVERRIDES[0],
        VULKAN_OVERRIDES[1],
        VULKAN_OVERRIDES[2],
        VULKAN_OVERRIDES[3],
        VULKAN_OVERRIDES[4],
        VULKAN_OVERRIDES[5],
        VULKAN_OVERRIDES[6],
        VULKAN_OVERRIDES[7],
        VULKAN_OVERRIDES[8],
    ],
    requested_functions: &REQUESTED,
    supported_extensions: &[VULKAN_ENABLE, VULKAN_ENABLE2, OPENGL_ENABLE, D3D12_ENABLE],
};

/// Every built-in variant.
pub const VARIANTS: [&Variant; 2] = [&NOVENDOR, &MBUCCHIA];

impl Variant {
    /// Find a built-in variant by its layer name.
    pub fn by_name(name: &str) -> Option<&'static Variant> {
        VARIANTS.into_iter().find(|variant| variant.name == name)
    }
}

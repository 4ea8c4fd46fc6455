//! Bit-compatible DXGI and Vulkan format pairs.

use ash::vk;

/// `DXGI_FORMAT` value as carried by OpenXR swapchain calls on Direct3D runtimes.
pub type DxgiFormat = i64;

struct FormatPair {
    dxgi: DxgiFormat,
    typeless: DxgiFormat,
    vk: vk::Format,
}

const fn pair(dxgi: DxgiFormat, typeless: DxgiFormat, vk: vk::Format) -> FormatPair {
    FormatPair { dxgi, typeless, vk }
}

// DXGI_FORMAT values from dxgiformat.h
const R32G32B32A32_TYPELESS: DxgiFormat = 1;
const R32G32B32A32_FLOAT: DxgiFormat = 2;
const R16G16B16A16_TYPELESS: DxgiFormat = 9;
const R16G16B16A16_FLOAT: DxgiFormat = 10;
const R16G16B16A16_UNORM: DxgiFormat = 11;
const R32G8X24_TYPELESS: DxgiFormat = 19;
const D32_FLOAT_S8X24_UINT: DxgiFormat = 20;
const R10G10B10A2_TYPELESS: DxgiFormat = 23;
const R10G10B10A2_UNORM: DxgiFormat = 24;
const R11G11B10_FLOAT: DxgiFormat = 26;
const R8G8B8A8_TYPELESS: DxgiFormat = 27;
const R8G8B8A8_UNORM: DxgiFormat = 28;
const R8G8B8A8_UNORM_SRGB: DxgiFormat = 29;
const R32_TYPELESS: DxgiFormat = 39;
const D32_FLOAT: DxgiFormat = 40;
const R24G8_TYPELESS: DxgiFormat = 44;
const D24_UNORM_S8_UINT: DxgiFormat = 45;
const R16_TYPELESS: DxgiFormat = 53;
const D16_UNORM: DxgiFormat = 55;
const B8G8R8A8_UNORM: DxgiFormat = 87;
const B8G8R8A8_TYPELESS: DxgiFormat = 90;
const B8G8R8A8_UNORM_SRGB: DxgiFormat = 91;

const FORMATS: [FormatPair; 15] = [
    pair(R8G8B8A8_UNORM, R8G8B8A8_TYPELESS, vk::Format::R8G8B8A8_UNORM),
    pair(R8G8B8A8_UNORM_SRGB, R8G8B8A8_TYPELESS, vk::Format::R8G8B8A8_SRGB),
    pair(B8G8R8A8_UNORM, B8G8R8A8_TYPELESS, vk::Format::B8G8R8A8_UNORM),
    pair(B8G8R8A8_UNORM_SRGB, B8G8R8A8_TYPELESS, vk::Format::B8G8R8A8_SRGB),
    pair(R16G16B16A16_FLOAT, R16G16B16A16_TYPELESS, vk::Format::R16G16B16A16_SFLOAT),
    pair(R16G16B16A16_UNORM, R16G16B16A16_TYPELESS, vk::Format::R16G16B16A16_UNORM),
    pair(R32G32B32A32_FLOAT, R32G32B32A32_TYPELESS, vk::Format::R32G32B32A32_SFLOAT),
    pair(R10G10B10A2_UNORM, R10G10B10A2_TYPELESS, vk::Format::A2B10G10R10_UNORM_PACK32),
    pair(R11G11B10_FLOAT, R11G11B10_FLOAT, vk::Format::B10G11R11_UFLOAT_PACK32),
    pair(D32_FLOAT, R32_TYPELESS, vk::Format::D32_SFLOAT),
    pair(D24_UNORM_S8_UINT, R24G8_TYPELESS, vk::Format::D24_UNORM_S8_UINT),
    pair(D16_UNORM, R16_TYPELESS, vk::Format::D16_UNORM),
    pair(D32_FLOAT_S8X24_UINT, R32G8X24_TYPELESS, vk::Format::D32_SFLOAT_S8_UINT),
    // typeless runtime formats advertised without a typed sibling
    pair(R8G8B8A8_TYPELESS, R8G8B8A8_TYPELESS, vk::Format::R8G8B8A8_UNORM),
    pair(B8G8R8A8_TYPELESS, B8G8R8A8_TYPELESS, vk::Format::B8G8R8A8_UNORM),
];

/// Vulkan format viewing the same bits as a DXGI format.
pub fn dxgi_to_vk(format: DxgiFormat) -> Option<vk::Format> {
    FORMATS
        .iter()
        .find(|pair| pair.dxgi == format)
        .map(|pair| pair.vk)
}

/// DXGI format the runtime must allocate for a Vulkan format.
pub fn vk_to_dxgi(format: vk::Format) -> Option<DxgiFormat> {
    FORMATS
        .iter()
        .find(|pair| pair.vk == format)
        .map(|pair| pair.dxgi)
}

/// Whether a runtime texture of `runtime` format can back a Vulkan image of `app` format.
pub fn is_bit_compatible(runtime: DxgiFormat, app: vk::Format) -> bool {
    FORMATS
        .iter()
        .any(|pair| pair.vk == app && (pair.dxgi == runtime || pair.typeless == runtime))
}

// Backend module - Vulkan abstraction layer
//
// Thin owning wrappers around ash handles. Each wrapper holds an
// `Arc<RenderDevice>` and releases its handle in `Drop`.

pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::RenderDevice;
pub use swapchain::Swapchain;

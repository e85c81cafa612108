//! A small Vulkan scene renderer.
//!
//! [`frame::FrameLoop`] drives the swapchain lifecycle and per-frame
//! synchronization over a [`frame::FrameBackend`]; [`renderer::VulkanBackend`]
//! is the `ash` implementation of that backend.

pub mod backend;
pub mod config;
pub mod frame;
pub mod mesh;
pub mod renderer;
pub mod scene;

// Shader module loading
//
// SPIR-V is read once at startup and kept as words, so a pipeline rebuild
// only needs to wrap it in fresh modules.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::RenderDevice;

/// Read a `.spv` file into aligned words
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {:?}", path))?;
    parse_spirv(&bytes).with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

/// Length must be a whole number of words; byte-swapped input is fixed up
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    Ok(ash::util::read_spv(&mut Cursor::new(bytes))?)
}

/// Shader module, destroyed once the pipeline that uses it is built
pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    device: Arc<RenderDevice>,
}

impl ShaderModule {
    pub fn new(device: &Arc<RenderDevice>, code: &[u32]) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        let handle = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self {
            handle,
            device: device.clone(),
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.handle, None);
        }
    }
}

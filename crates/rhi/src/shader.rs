//! Shader module management.
//!
//! This module handles SPIR-V loading and VkShaderModule creation.
//!
//! # Overview
//!
//! - [`read_file`] loads a whole file into memory
//! - [`ShaderSet`] holds the vertex and fragment bytecode of the pipeline
//! - [`Shader`] wraps VkShaderModule with stage and entry point information
//!
//! Shader modules only need to live until the pipeline that uses them has
//! been created; the pipeline builder drops them right after.

use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Reads the entire file at `path`.
///
/// # Errors
///
/// Returns [`RhiError::FileRead`] naming the path if the file cannot be
/// opened or read.
pub fn read_file(path: impl AsRef<Path>) -> RhiResult<Vec<u8>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| RhiError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Fragment (pixel) shader stage - processes each fragment
    Fragment,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// SPIR-V bytecode for the vertex and fragment stages.
#[derive(Debug, Clone, Default)]
pub struct ShaderSet {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

impl ShaderSet {
    /// Loads both stages from disk.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FileRead`] for the first file that cannot be read.
    pub fn load(vertex: impl AsRef<Path>, fragment: impl AsRef<Path>) -> RhiResult<Self> {
        Ok(Self {
            vertex: read_file(vertex)?,
            fragment: read_file(fragment)?,
        })
    }
}

/// Vulkan shader module wrapper.
///
/// Destroys the module when dropped.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    /// Creates a shader module from SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The byte length is zero or not a multiple of 4
    /// - The entry point name contains null bytes
    /// - Shader module creation fails
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(RhiError::ShaderError(format!(
                "{} SPIR-V code must be a non-empty multiple of 4 bytes, got {} bytes",
                stage,
                bytes.len()
            )));
        }

        let code: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let entry_point_cstring = CString::new(entry_point)
            .map_err(|e| RhiError::ShaderError(format!("Invalid entry point name: {}", e)))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        let module = unsafe {
            device
                .api()
                .create_shader_module(&create_info)
                .map_err(RhiError::creation("shader module"))?
        };

        info!(
            "Created {} shader module with entry point '{}'",
            stage, entry_point
        );

        Ok(Self {
            device,
            module,
            stage,
            entry_point: entry_point_cstring,
        })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Returns the shader stage.
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Returns the entry point function name.
    #[inline]
    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    /// Builds the pipeline stage description; it borrows from this shader.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.api().destroy_shader_module(self.module);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{HandleKind, MockDevice};

    const SPIRV_MAGIC: [u8; 4] = 0x0723_0203u32.to_le_bytes();

    #[test]
    fn test_shader_stage_to_vk() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn test_misaligned_bytecode_is_rejected() {
        let mock = MockDevice::new();
        let result =
            Shader::from_spirv_bytes(mock.device(), &[1, 2, 3], ShaderStage::Vertex, "main");
        assert!(matches!(result, Err(RhiError::ShaderError(_))));

        let result = Shader::from_spirv_bytes(mock.device(), &[], ShaderStage::Vertex, "main");
        assert!(matches!(result, Err(RhiError::ShaderError(_))));
        assert_eq!(mock.created_count(HandleKind::ShaderModule), 0);
    }

    #[test]
    fn test_shader_module_destroyed_on_drop() {
        let mock = MockDevice::new();
        let shader =
            Shader::from_spirv_bytes(mock.device(), &SPIRV_MAGIC, ShaderStage::Fragment, "main")
                .unwrap();
        assert_eq!(shader.entry_point(), c"main");
        assert_eq!(mock.live_count(HandleKind::ShaderModule), 1);

        drop(shader);
        assert_eq!(mock.live_count(HandleKind::ShaderModule), 0);
    }

    #[test]
    fn test_read_missing_file_names_path() {
        let path = std::env::temp_dir().join("vkframe-does-not-exist.spv");
        match read_file(&path) {
            Err(RhiError::FileRead { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected FileRead error, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_read_file_returns_contents() {
        let path = std::env::temp_dir().join(format!("vkframe-read-{}.bin", std::process::id()));
        std::fs::write(&path, SPIRV_MAGIC).unwrap();

        let bytes = read_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(bytes, SPIRV_MAGIC);
    }
}

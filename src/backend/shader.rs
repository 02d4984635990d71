// Shader module loading and management
//
// Vulkan consumes SPIR-V bytecode as an opaque blob. Blobs are read at
// runtime from shaders/ next to the executable (working directory as a
// fallback) and handed to the API unmodified.

use anyhow::{Context, Result};
use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;

use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Load a SPIR-V blob by name, e.g. "model.vert.spv"
pub fn load_shader(device: &Arc<VulkanDevice>, name: &str) -> Result<vk::ShaderModule> {
    let path = resolve_shader_path(name);
    let bytes = std::fs::read(&path)
        .with_context(|| format!("Failed to read shader file {:?}", path))?;

    log::debug!("Loaded shader {:?} ({} bytes)", path, bytes.len());
    create_shader_module(device, &bytes)
}

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &Arc<VulkanDevice>, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = spirv_words(code)?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Shaders live in shaders/ next to the executable; during development
/// (cargo run) they are found relative to the working directory instead.
fn resolve_shader_path(name: &str) -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("shaders").join(name);
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from("shaders").join(name)
}

/// Convert a byte blob to SPIR-V words, validating shape and magic
fn spirv_words(code: &[u8]) -> Result<Vec<u32>> {
    if code.len() < 4 || code.len() % 4 != 0 {
        anyhow::bail!(
            "SPIR-V blob has invalid length {} (must be a non-zero multiple of 4)",
            code.len()
        );
    }

    let words: Vec<u32> = code
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        anyhow::bail!("SPIR-V blob has wrong magic number {:#010x}", words[0]);
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_minimal_valid_blob() {
        let blob = [
            SPIRV_MAGIC.to_le_bytes(),
            0x0001_0000u32.to_le_bytes(), // version
            [0; 4],
            [0; 4],
        ]
        .concat();

        let words = spirv_words(&blob).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_truncated_blob() {
        let blob = [0x03, 0x02, 0x23];
        assert!(spirv_words(&blob).is_err());
        assert!(spirv_words(&[]).is_err());
    }

    #[test]
    fn rejects_wrong_magic() {
        let blob = 0xdead_beefu32.to_le_bytes();
        assert!(spirv_words(&blob).is_err());
    }
}

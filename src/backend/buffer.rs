// GPU buffers and the depth target
//
// Every buffer is created through a BufferKind that fixes its usage
// flags and memory location, so call sites never assemble flag soup.
// Allocation goes through the shared gpu-allocator instance.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

/// What a buffer is for; maps to usage flags and a memory location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Device-local vertex data, filled through a staging copy
    Vertex,
    /// Device-local index data, filled through a staging copy
    Index,
    /// Host-visible, rewritten every frame
    Uniform,
    /// CPU-side source for device-local uploads
    Staging,
    /// Geometry input for acceleration structure builds; host-visible
    /// and also bindable for drawing, so one copy serves both paths
    AccelerationInput,
    /// Backing storage an acceleration structure lives in
    AccelerationStorage,
    /// Build-time scratch memory for acceleration structure builds
    Scratch,
    /// Shader binding table storage for a ray tracing pipeline
    ShaderBindingTable,
}

impl BufferKind {
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferKind::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferKind::AccelerationInput => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::INDEX_BUFFER
            }
            BufferKind::AccelerationStorage => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
            BufferKind::Scratch => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
            BufferKind::ShaderBindingTable => {
                vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
        }
    }

    pub fn location(self) -> MemoryLocation {
        match self {
            BufferKind::Vertex
            | BufferKind::Index
            | BufferKind::AccelerationStorage
            | BufferKind::Scratch => MemoryLocation::GpuOnly,
            BufferKind::Uniform
            | BufferKind::Staging
            | BufferKind::AccelerationInput
            | BufferKind::ShaderBindingTable => MemoryLocation::CpuToGpu,
        }
    }

    pub fn needs_device_address(self) -> bool {
        self.usage()
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
    }
}

/// A GPU buffer paired with its allocation
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    /// Present when the kind carries SHADER_DEVICE_ADDRESS usage
    pub device_address: Option<vk::DeviceAddress>,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        kind: BufferKind,
        size: vk::DeviceSize,
        label: &str,
    ) -> Result<Self> {
        if kind.needs_device_address() && !device.ray_tracing {
            anyhow::bail!(
                "Buffer '{}' needs a device address but the device was \
                 created without ray tracing support",
                label
            );
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(kind.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .device
                .create_buffer(&buffer_info, None)
                .with_context(|| format!("Failed to create buffer '{}'", label))?
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location: kind.location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for buffer '{}'", label))?;

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .context("Failed to bind buffer memory")?;
        }

        let device_address = if kind.needs_device_address() {
            let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
            Some(unsafe { device.device.get_buffer_device_address(&info) })
        } else {
            None
        };

        Ok(Self {
            buffer,
            size,
            device_address,
            allocation: Some(allocation),
            device,
        })
    }

    /// Create a host-visible buffer and fill it with `data`
    pub fn with_data<T: Pod>(
        device: Arc<VulkanDevice>,
        kind: BufferKind,
        data: &[T],
        label: &str,
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let mut buffer = Self::new(device, kind, size, label)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Create a device-local buffer and fill it through a staging copy
    /// on a transient command buffer.
    pub fn device_local_with_data<T: Pod>(
        device: Arc<VulkanDevice>,
        pool: vk::CommandPool,
        kind: BufferKind,
        data: &[T],
        label: &str,
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let buffer = Self::new(device.clone(), kind, size, label)?;

        let staging = Self::with_data(device.clone(), BufferKind::Staging, data, "staging")?;

        device.run_transient_commands(pool, |cmd| {
            let region = vk::BufferCopy::builder().size(size).build();
            unsafe {
                device
                    .device
                    .cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            }
        })?;

        Ok(buffer)
    }

    /// Copy `data` into mapped memory. Only valid for host-visible kinds.
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    /// Byte-level variant of `write` for API structs without Pod impls
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer is not host-visible")?;

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator.lock().free(allocation);
        }
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Depth attachment; swapchain-dependent, rebuilt on every resize
pub struct DepthTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl DepthTarget {
    pub fn new(device: Arc<VulkanDevice>, extent: vk::Extent2D) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(DEPTH_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            device
                .device
                .create_image(&image_info, None)
                .context("Failed to create depth image")?
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "depth target",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate depth image memory")?;

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .context("Failed to bind depth image memory")?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            device
                .device
                .create_image_view(&view_info, None)
                .context("Failed to create depth image view")?
        };

        Ok(Self {
            image,
            view,
            allocation: Some(allocation),
            device,
        })
    }
}

impl Drop for DepthTarget {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator.lock().free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_local_kinds_have_no_host_mapping() {
        for kind in [
            BufferKind::Vertex,
            BufferKind::Index,
            BufferKind::AccelerationStorage,
            BufferKind::Scratch,
        ] {
            assert_eq!(kind.location(), MemoryLocation::GpuOnly, "{:?}", kind);
        }
        for kind in [
            BufferKind::Uniform,
            BufferKind::Staging,
            BufferKind::AccelerationInput,
            BufferKind::ShaderBindingTable,
        ] {
            assert_eq!(kind.location(), MemoryLocation::CpuToGpu, "{:?}", kind);
        }
    }

    #[test]
    fn acceleration_kinds_carry_device_address_usage() {
        for kind in [
            BufferKind::AccelerationInput,
            BufferKind::AccelerationStorage,
            BufferKind::Scratch,
            BufferKind::ShaderBindingTable,
        ] {
            assert!(kind.needs_device_address(), "{:?}", kind);
        }
        for kind in [
            BufferKind::Vertex,
            BufferKind::Index,
            BufferKind::Uniform,
            BufferKind::Staging,
        ] {
            assert!(!kind.needs_device_address(), "{:?}", kind);
        }
    }

    #[test]
    fn acceleration_input_doubles_as_draw_source() {
        let usage = BufferKind::AccelerationInput.usage();
        assert!(usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(usage
            .contains(vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR));
    }

    #[test]
    fn staging_is_transfer_source_only() {
        assert_eq!(
            BufferKind::Staging.usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }
}

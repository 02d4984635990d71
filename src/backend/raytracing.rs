// Acceleration structure provisioning for ray tracing
//
// Builds a bottom-level structure over the scene geometry and a
// top-level structure with a single instance of it. Build inputs are
// addressed through buffer device addresses; builds run on one-shot
// command buffers and block until complete.
//
// Teardown order: TLAS before BLAS, each handle before its storage.

use anyhow::{Context, Result};
use ash::vk;
use glam::Mat4;
use std::sync::Arc;

use super::buffer::{Buffer, BufferKind};
use super::VulkanDevice;

/// An acceleration structure and the buffer it lives in
pub struct AccelerationStructure {
    pub handle: vk::AccelerationStructureKHR,
    pub device_address: vk::DeviceAddress,
    _storage: Buffer,
}

/// Ray-tracing resources owned by the renderer
pub struct AccelerationContext {
    loader: ash::extensions::khr::AccelerationStructure,
    tlas: AccelerationStructure,
    blas: AccelerationStructure,
    _instance_buffer: Buffer,
    device: Arc<VulkanDevice>,
}

impl AccelerationContext {
    /// Build BLAS + TLAS over indexed triangle geometry.
    ///
    /// The vertex/index buffers must carry device addresses
    /// (BufferKind::AccelerationInput).
    pub fn new(
        device: Arc<VulkanDevice>,
        pool: vk::CommandPool,
        vertex_buffer: &Buffer,
        index_buffer: &Buffer,
        vertex_count: u32,
        index_count: u32,
        vertex_stride: vk::DeviceSize,
    ) -> Result<Self> {
        let loader = ash::extensions::khr::AccelerationStructure::new(
            &device.instance,
            &device.device,
        );

        log::info!(
            "Building acceleration structures: {} vertices, {} triangles",
            vertex_count,
            index_count / 3
        );

        let blas = Self::build_blas(
            &device,
            &loader,
            pool,
            vertex_buffer,
            index_buffer,
            vertex_count,
            index_count,
            vertex_stride,
        )?;

        let (tlas, instance_buffer) =
            Self::build_tlas(&device, &loader, pool, blas.device_address)?;

        Ok(Self {
            loader,
            tlas,
            blas,
            _instance_buffer: instance_buffer,
            device,
        })
    }

    pub fn tlas(&self) -> &AccelerationStructure {
        &self.tlas
    }

    pub fn blas(&self) -> &AccelerationStructure {
        &self.blas
    }

    #[allow(clippy::too_many_arguments)]
    fn build_blas(
        device: &Arc<VulkanDevice>,
        loader: &ash::extensions::khr::AccelerationStructure,
        pool: vk::CommandPool,
        vertex_buffer: &Buffer,
        index_buffer: &Buffer,
        vertex_count: u32,
        index_count: u32,
        vertex_stride: vk::DeviceSize,
    ) -> Result<AccelerationStructure> {
        let vertex_address = vertex_buffer
            .device_address
            .context("Vertex buffer has no device address")?;
        let index_address = index_buffer
            .device_address
            .context("Index buffer has no device address")?;

        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: vertex_address,
            })
            .vertex_stride(vertex_stride)
            .max_vertex(vertex_count.saturating_sub(1))
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: index_address,
            })
            .build();

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .build();

        Self::build_structure(
            device,
            loader,
            pool,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            geometry,
            index_count / 3,
            "blas storage",
        )
    }

    fn build_tlas(
        device: &Arc<VulkanDevice>,
        loader: &ash::extensions::khr::AccelerationStructure,
        pool: vk::CommandPool,
        blas_address: vk::DeviceAddress,
    ) -> Result<(AccelerationStructure, Buffer)> {
        let instance = vk::AccelerationStructureInstanceKHR {
            transform: transform_matrix(Mat4::IDENTITY),
            instance_custom_index_and_mask: vk::Packed24_8::new(0, 0xff),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                0,
                vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: blas_address,
            },
        };

        // The instance record is a plain repr(C) struct defined by the API
        let instance_bytes = unsafe {
            std::slice::from_raw_parts(
                &instance as *const vk::AccelerationStructureInstanceKHR as *const u8,
                std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(),
            )
        };

        let mut instance_buffer = Buffer::new(
            device.clone(),
            BufferKind::AccelerationInput,
            instance_bytes.len() as vk::DeviceSize,
            "tlas instances",
        )?;
        instance_buffer.write_bytes(instance_bytes)?;

        let instance_address = instance_buffer
            .device_address
            .context("Instance buffer has no device address")?;

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instance_address,
            })
            .build();

        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            })
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .build();

        let tlas = Self::build_structure(
            device,
            loader,
            pool,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            geometry,
            1,
            "tlas storage",
        )?;

        Ok((tlas, instance_buffer))
    }

    /// Shared size-query/create/build sequence for both levels
    fn build_structure(
        device: &Arc<VulkanDevice>,
        loader: &ash::extensions::khr::AccelerationStructure,
        pool: vk::CommandPool,
        ty: vk::AccelerationStructureTypeKHR,
        geometry: vk::AccelerationStructureGeometryKHR,
        primitive_count: u32,
        label: &str,
    ) -> Result<AccelerationStructure> {
        let geometries = [geometry];

        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(ty)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .build();

        let sizes = unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
            )
        };

        let storage = Buffer::new(
            device.clone(),
            BufferKind::AccelerationStorage,
            sizes.acceleration_structure_size,
            label,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(storage.buffer)
            .size(sizes.acceleration_structure_size)
            .ty(ty);

        let handle = unsafe {
            loader
                .create_acceleration_structure(&create_info, None)
                .context("Failed to create acceleration structure")?
        };

        let scratch = Buffer::new(
            device.clone(),
            BufferKind::Scratch,
            sizes.build_scratch_size,
            "build scratch",
        )?;
        let scratch_address = scratch
            .device_address
            .context("Scratch buffer has no device address")?;

        build_info.dst_acceleration_structure = handle;
        build_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: scratch_address,
        };

        let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(primitive_count)
            .build();

        device.run_transient_commands(pool, |cmd| unsafe {
            loader.cmd_build_acceleration_structures(cmd, &[build_info], &[&[range]]);
        })?;

        let address_info = vk::AccelerationStructureDeviceAddressInfoKHR::builder()
            .acceleration_structure(handle);
        let device_address =
            unsafe { loader.get_acceleration_structure_device_address(&address_info) };

        Ok(AccelerationStructure {
            handle,
            device_address,
            _storage: storage,
        })
    }
}

impl Drop for AccelerationContext {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        unsafe {
            self.loader
                .destroy_acceleration_structure(self.tlas.handle, None);
            self.loader
                .destroy_acceleration_structure(self.blas.handle, None);
        }
    }
}

/// Row-major 3x4 transform expected by instance records, from a
/// column-major matrix
pub fn transform_matrix(mat: Mat4) -> vk::TransformMatrixKHR {
    let c = mat.to_cols_array_2d();
    vk::TransformMatrixKHR {
        matrix: [
            c[0][0], c[1][0], c[2][0], c[3][0], //
            c[0][1], c[1][1], c[2][1], c[3][1], //
            c[0][2], c[1][2], c[2][2], c[3][2],
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn identity_transform_is_identity_rows() {
        let m = transform_matrix(Mat4::IDENTITY).matrix;
        #[rustfmt::skip]
        let expected = [
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
        ];
        assert_eq!(m, expected);
    }

    #[test]
    fn translation_lands_in_last_column() {
        let m = transform_matrix(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0))).matrix;
        assert_eq!(m[3], 1.0);
        assert_eq!(m[7], 2.0);
        assert_eq!(m[11], 3.0);
        // Rotation part stays identity
        assert_eq!(m[0], 1.0);
        assert_eq!(m[5], 1.0);
        assert_eq!(m[10], 1.0);
    }

    #[test]
    fn scale_lands_on_the_diagonal() {
        let m = transform_matrix(Mat4::from_scale(Vec3::new(2.0, 3.0, 4.0))).matrix;
        assert_eq!(m[0], 2.0);
        assert_eq!(m[5], 3.0);
        assert_eq!(m[10], 4.0);
    }
}

// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// Critical for correct and efficient multi-frame rendering

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight.
///
/// The fence gates CPU reuse of this slot's command buffer; the
/// semaphore orders image acquisition before rendering on the GPU.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    /// Re-recorded every time this slot comes around
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot passes
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                in_flight_fence: device.device.create_fence(&fence_info, None)?,
                command_buffer,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Render-finished semaphores, one per swapchain image.
///
/// Present waits on the semaphore of the image being presented, so these
/// are sized to the swapchain (not to frames in flight) and rebuilt with
/// it: image counts can change across recreation.
pub fn create_present_semaphores(
    device: &Arc<VulkanDevice>,
    count: usize,
) -> Result<Vec<vk::Semaphore>> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    (0..count)
        .map(|_| unsafe {
            device
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(Into::into)
        })
        .collect()
}

pub fn destroy_present_semaphores(device: &ash::Device, semaphores: &[vk::Semaphore]) {
    unsafe {
        for &semaphore in semaphores {
            device.destroy_semaphore(semaphore, None);
        }
    }
}

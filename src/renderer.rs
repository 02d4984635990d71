// =============================================================================
// RENDERER - owns the Vulkan object graph and drives the frame loop
// =============================================================================
//
// Bootstrap builds the graph top-down (device -> surface -> geometry ->
// descriptors -> swapchain -> pipeline -> sync); teardown runs strictly
// in reverse. Swapchain-dependent resources (image views, depth target,
// per-image present semaphores) are destroyed before the swapchain and
// recreated strictly after it.
//
// FRAME TIMELINE:
//   acquire_image -> wait_fence -> record -> submit -> present -> next_frame

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::backend::buffer::{Buffer, BufferKind, DepthTarget};
use crate::backend::raytracing::AccelerationContext;
use crate::backend::sync::{
    create_present_semaphores, destroy_present_semaphores, FrameSync,
};
use crate::backend::{pipeline, shader, surface, SurfaceState, Swapchain, VulkanDevice};
use crate::config::Config;
use crate::scene::{FrameUniforms, Mesh, Vertex};

pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // SETTINGS (copied out of Config at bootstrap)
    // ─────────────────────────────────────────────────────────────────────────
    clear_color: [f32; 4],
    max_frames_in_flight: usize,
    rotation_speed: f32,
    preferred_present_mode: vk::PresentModeKHR,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN CORE
    // ─────────────────────────────────────────────────────────────────────────
    device: Arc<VulkanDevice>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::extensions::khr::Surface,
    swapchain: Option<Swapchain>,
    depth: Option<DepthTarget>,

    // ─────────────────────────────────────────────────────────────────────────
    // PIPELINE & DESCRIPTORS
    // ─────────────────────────────────────────────────────────────────────────
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,

    // ─────────────────────────────────────────────────────────────────────────
    // GEOMETRY & UNIFORMS
    // ─────────────────────────────────────────────────────────────────────────
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    uniform_buffers: Vec<Buffer>,

    // ─────────────────────────────────────────────────────────────────────────
    // RAY TRACING (present when enabled in config)
    // ─────────────────────────────────────────────────────────────────────────
    acceleration: Option<AccelerationContext>,

    // ─────────────────────────────────────────────────────────────────────────
    // COMMANDS & SYNCHRONIZATION
    // ─────────────────────────────────────────────────────────────────────────
    command_pool: vk::CommandPool,
    /// One slot per frame in flight
    frames: Vec<FrameSync>,
    /// Render-finished semaphores, one per swapchain image
    present_done: Vec<vk::Semaphore>,
    /// Which sync slot we're currently using (0 to max_frames_in_flight-1)
    current_frame: usize,

    // Pre-allocated to avoid per-frame heap allocations
    wait_stages: [vk::PipelineStageFlags; 1],

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Set on resize or stale presentation - triggers swapchain recreation
    pub needs_resize: bool,
    /// Set when the framebuffer is 0x0 - rendering is suspended
    pub is_minimized: bool,

    start_time: Instant,
}

impl Renderer {
    /// Build the full Vulkan object graph for the given window handles.
    ///
    /// Every step propagates its error; the first failure aborts the
    /// bootstrap with context attached.
    pub fn new(
        config: &Config,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device (instance, physical device, queue, allocator)
        // ─────────────────────────────────────────────────────────────────────
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(
            &config.window.title,
            enable_validation,
            config.graphics.ray_tracing,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Surface (platform window connection)
        // ─────────────────────────────────────────────────────────────────────
        let surface = surface::create_surface(
            &device.entry,
            &device.instance,
            display_handle,
            window_handle,
        )?;
        let surface_loader =
            ash::extensions::khr::Surface::new(&device.entry, &device.instance);

        let surface_support = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )?
        };
        if !surface_support {
            anyhow::bail!("GPU doesn't support presenting to this surface");
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Command pool
        // ─────────────────────────────────────────────────────────────────────
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );
        let command_pool = unsafe {
            device
                .device
                .create_command_pool(&pool_info, None)
                .context("Failed to create command pool")?
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Scene geometry
        // ─────────────────────────────────────────────────────────────────────
        let mesh = if config.scene.model.is_empty() {
            log::info!("No model configured, using built-in cube");
            Mesh::cube()
        } else {
            Mesh::load_obj(&config.scene.model)?
        };
        let index_count = mesh.indices.len() as u32;

        // Ray tracing reads the same buffers as acceleration build input,
        // which keeps them host-visible; the plain path stages to VRAM.
        let (vertex_buffer, index_buffer) = if config.graphics.ray_tracing {
            (
                Buffer::with_data(
                    device.clone(),
                    BufferKind::AccelerationInput,
                    &mesh.vertices,
                    "vertices",
                )?,
                Buffer::with_data(
                    device.clone(),
                    BufferKind::AccelerationInput,
                    &mesh.indices,
                    "indices",
                )?,
            )
        } else {
            (
                Buffer::device_local_with_data(
                    device.clone(),
                    command_pool,
                    BufferKind::Vertex,
                    &mesh.vertices,
                    "vertices",
                )?,
                Buffer::device_local_with_data(
                    device.clone(),
                    command_pool,
                    BufferKind::Index,
                    &mesh.indices,
                    "indices",
                )?,
            )
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Uniform buffers + descriptors (one set per frame in flight)
        // ─────────────────────────────────────────────────────────────────────
        let max_frames = config.graphics.max_frames_in_flight.max(1);
        let uniform_size = std::mem::size_of::<FrameUniforms>() as vk::DeviceSize;
        let uniform_buffers = (0..max_frames)
            .map(|i| {
                Buffer::new(
                    device.clone(),
                    BufferKind::Uniform,
                    uniform_size,
                    &format!("uniforms[{}]", i),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let descriptor_set_layout = pipeline::create_descriptor_set_layout(&device)?;
        let (descriptor_pool, descriptor_sets) =
            pipeline::create_descriptor_sets(&device, descriptor_set_layout, &uniform_buffers)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Swapchain + depth target + per-image semaphores
        // ─────────────────────────────────────────────────────────────────────
        let preferred_present_mode = config.present_mode();

        let mut renderer = Self {
            clear_color: config.graphics.clear_color,
            max_frames_in_flight: max_frames,
            rotation_speed: config.scene.rotation_speed,
            preferred_present_mode,
            device: device.clone(),
            surface,
            surface_loader,
            swapchain: None,
            depth: None,
            descriptor_set_layout,
            descriptor_pool,
            descriptor_sets,
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            vertex_buffer,
            index_buffer,
            index_count,
            uniform_buffers,
            acceleration: None,
            command_pool,
            frames: Vec::new(),
            present_done: Vec::new(),
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            needs_resize: false,
            is_minimized: false,
            start_time: Instant::now(),
        };

        renderer.create_swapchain_resources(width, height)?;
        let swapchain = renderer
            .swapchain
            .as_ref()
            .context("Window is minimized at startup")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 7: Graphics pipeline (built once, against the surface format)
        // ─────────────────────────────────────────────────────────────────────
        let vert_shader = shader::load_shader(&device, "scene.vert.spv")?;
        let frag_shader = shader::load_shader(&device, "scene.frag.spv")?;

        let pipeline_result = pipeline::create_graphics_pipeline(
            &device,
            swapchain.format,
            descriptor_set_layout,
            vert_shader,
            frag_shader,
            &Vertex::binding_descriptions(),
            &Vertex::attribute_descriptions(),
        );

        // Modules are baked into the pipeline and not needed afterwards
        unsafe {
            device.device.destroy_shader_module(vert_shader, None);
            device.device.destroy_shader_module(frag_shader, None);
        }
        let (pipeline, pipeline_layout) = pipeline_result?;
        renderer.pipeline = pipeline;
        renderer.pipeline_layout = pipeline_layout;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 8: Per-frame command buffers + sync slots
        // ─────────────────────────────────────────────────────────────────────
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(max_frames as u32);
        let command_buffers = unsafe {
            device
                .device
                .allocate_command_buffers(&alloc_info)
                .context("Failed to allocate command buffers")?
        };

        renderer.frames = command_buffers
            .into_iter()
            .map(|cmd| FrameSync::new(&device, cmd))
            .collect::<Result<Vec<_>>>()?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 9: Acceleration structures (ray tracing variant)
        // ─────────────────────────────────────────────────────────────────────
        let acceleration = if config.graphics.ray_tracing {
            let context = AccelerationContext::new(
                device.clone(),
                command_pool,
                &renderer.vertex_buffer,
                &renderer.index_buffer,
                mesh.vertices.len() as u32,
                index_count,
                Vertex::STRIDE as vk::DeviceSize,
            )?;
            log::info!(
                "Acceleration structures ready (BLAS @ {:#x}, TLAS @ {:#x})",
                context.blas().device_address,
                context.tlas().device_address
            );
            Some(context)
        } else {
            None
        };
        renderer.acceleration = acceleration;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    /// Rebuild the swapchain and everything that references it.
    ///
    /// Old swapchain-dependent objects are destroyed first, the
    /// swapchain second, and the replacements strictly after the new
    /// swapchain exists.
    fn create_swapchain_resources(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        destroy_present_semaphores(&self.device.device, &self.present_done);
        self.present_done.clear();
        self.depth = None;
        // The surface can only have one swapchain at a time
        self.swapchain = None;

        let swapchain = Swapchain::new(
            self.device.clone(),
            self.surface,
            &self.surface_loader,
            width,
            height,
            self.preferred_present_mode,
        )?;

        self.depth = Some(DepthTarget::new(self.device.clone(), swapchain.extent)?);
        self.present_done = create_present_semaphores(&self.device, swapchain.images.len())?;
        self.swapchain = Some(swapchain);
        self.needs_resize = false;

        Ok(())
    }

    /// Recreate swapchain after a resize or stale presentation result
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        // All in-flight frames still reference the old resources
        self.device.wait_idle()?;
        self.create_swapchain_resources(width, height)
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. Returns false when nothing was presented
    /// (minimized, or the swapchain went stale mid-frame).
    pub fn render_frame(&mut self, width: u32, height: u32) -> Result<bool> {
        if self.needs_resize || self.is_minimized {
            if width == 0 || height == 0 {
                self.is_minimized = true;
                return Ok(false);
            }
            self.recreate_swapchain(width, height)?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let sync_handles = {
            let sync = &self.frames[self.current_frame];
            (sync.image_available, sync.in_flight_fence, sync.command_buffer)
        };
        let (image_available, in_flight_fence, cmd) = sync_handles;

        let (image_index, extent, image, view) = {
            let swapchain = self
                .swapchain
                .as_ref()
                .context("Swapchain not initialized")?;

            let (image_index, state) =
                swapchain.acquire_next_image(u64::MAX, image_available)?;

            match state {
                SurfaceState::OutOfDate => {
                    self.needs_resize = true;
                    return Ok(false);
                }
                SurfaceState::Suboptimal => self.needs_resize = true,
                SurfaceState::Optimal => {}
            }

            (
                image_index,
                swapchain.extent,
                swapchain.images[image_index as usize],
                swapchain.image_views[image_index as usize],
            )
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Wait for the previous frame that used this sync slot
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            self.device
                .device
                .wait_for_fences(&[in_flight_fence], true, u64::MAX)?;
            self.device.device.reset_fences(&[in_flight_fence])?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Record this frame's commands
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            self.device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        }
        self.record_commands(cmd, image, view, extent)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Update this frame's uniforms
        // ─────────────────────────────────────────────────────────────────────
        let elapsed = self.start_time.elapsed().as_secs_f32();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let uniforms = FrameUniforms::new(elapsed, self.rotation_speed, aspect);
        self.uniform_buffers[self.current_frame].write(&[uniforms])?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Submit
        // ─────────────────────────────────────────────────────────────────────
        let render_finished = self.present_done[image_index as usize];

        let wait_semaphores = [image_available];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                in_flight_fence,
            )?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Present
        // ─────────────────────────────────────────────────────────────────────
        let present_state = {
            let swapchain = self
                .swapchain
                .as_ref()
                .context("Swapchain not initialized")?;
            swapchain.present(
                self.device.graphics_queue,
                image_index,
                &signal_semaphores,
            )?
        };

        if present_state != SurfaceState::Optimal {
            self.needs_resize = true;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 7: Advance to next frame slot
        // ─────────────────────────────────────────────────────────────────────
        self.current_frame = (self.current_frame + 1) % self.max_frames_in_flight;

        Ok(true)
    }

    /// Record the draw commands for one frame
    fn record_commands(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let device = &self.device.device;
        let depth = self.depth.as_ref().context("Depth target not initialized")?;

        let color_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let depth_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            ..color_range
        };

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            // Both attachments are cleared, so previous contents are
            // irrelevant and the old layout can be UNDEFINED
            let to_color = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_range)
                .build();

            let to_depth = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(
                    vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(depth.image)
                .subresource_range(depth_range)
                .build();

            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_color, to_depth],
            );

            let clear_color = vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            };
            let color_attachment = vk::RenderingAttachmentInfo::builder()
                .image_view(view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear_color)
                .build();

            let depth_attachment = vk::RenderingAttachmentInfo::builder()
                .image_view(depth.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                })
                .build();

            let color_attachments = [color_attachment];
            let rendering_info = vk::RenderingInfo::builder()
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .layer_count(1)
                .color_attachments(&color_attachments)
                .depth_attachment(&depth_attachment);

            device.cmd_begin_rendering(cmd, &rendering_info);

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[self.descriptor_sets[self.current_frame]],
                &[],
            );

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                }],
            );

            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);

            device.cmd_end_rendering(cmd);

            // Presentation requires PRESENT_SRC layout
            let to_present = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::empty())
                .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_range)
                .build();

            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present],
            );

            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    /// Block until all submitted GPU work is done
    pub fn wait_idle(&self) {
        let _ = self.device.wait_idle();
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        let _ = self.device.wait_idle();

        // Acceleration structures reference geometry buffers; drop first
        self.acceleration = None;

        unsafe {
            let device = &self.device.device;

            // Destroy in reverse order of creation
            for frame in &self.frames {
                frame.destroy(device);
            }
            destroy_present_semaphores(device, &self.present_done);

            device.destroy_command_pool(self.command_pool, None);

            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }

        // Swapchain-dependent resources before the swapchain itself
        self.depth = None;
        self.swapchain = None;

        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }

        // Buffers and the device follow via their own Drop impls
        log::info!("Cleanup complete");
    }
}

//! Orbit renderer
//!
//! Draws a flattened orbit tree with one instanced draw per LOD tier. All
//! long-lived GPU memory (mesh, textures, depth images and the per-frame
//! instance buffers) is bound to the window arena the renderer owns, so it is
//! released only after the frame coordinator has drained.

use ash::{vk, Device};

use crate::config::RenderSettings;
use crate::foundation::math;
use crate::render::lifetime::ResourceId;
use crate::render::mesh::SphereLods;
use crate::render::vulkan::commands::CommandRecorder;
use crate::render::vulkan::context::VulkanContext;
use crate::render::vulkan::image::{load_texture_layers, upload_texture_array, BoundImage, Sampler};
use crate::render::vulkan::memory::{upload_buffer, Buffer, HOST_MEMORY};
use crate::render::vulkan::pipeline::{
    Framebuffer, GraphicsPipeline, PushConstants, RenderPass, ShaderModule, TextureDescriptor,
};
use crate::render::vulkan::{
    OwnedResource, Swapchain, VulkanArena, VulkanCoordinator, VulkanError, VulkanPresenter, VulkanResult,
};
use crate::scene::{Camera, InstanceData, OrbitTree, SceneFlattener, LOD_TIERS};

/// Per-tier draw ranges into the packed sphere buffers
#[derive(Debug, Clone, Copy)]
struct LodRanges {
    vertex_base: [u32; LOD_TIERS + 1],
    index_base: [u32; LOD_TIERS + 1],
}

/// Renders orbit trees to the window's swapchain
pub struct OrbitRenderer {
    device: Device,
    coordinator: VulkanCoordinator,
    resources: VulkanArena,
    flattener: SceneFlattener,
    render_pass: RenderPass,
    framebuffers: Vec<Framebuffer>,
    descriptor: TextureDescriptor,
    pipeline: GraphicsPipeline,
    vertex_buffer: ResourceId,
    index_buffer: ResourceId,
    instance_buffers: Vec<ResourceId>,
    lods: LodRanges,
    extent: vk::Extent2D,
}

impl OrbitRenderer {
    /// Build every GPU object needed to draw up to `max_instances` bodies.
    ///
    /// Uploads are recorded on `loading`; the caller tears it down once
    /// construction returns. Long-lived objects are bound to `resources`,
    /// which the renderer takes over.
    pub fn new(
        context: &VulkanContext,
        mut resources: VulkanArena,
        loading: &mut VulkanArena,
        settings: &RenderSettings,
        flattener: SceneFlattener,
        window_size: (u32, u32),
        max_instances: usize,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();

        let (width, height) = window_size;
        let swapchain = Swapchain::new(context, vk::Extent2D { width, height })?;
        let extent = swapchain.extent();
        let render_pass = RenderPass::new_forward_pass(device.clone(), swapchain.format())?;

        let mut framebuffers = Vec::with_capacity(swapchain.image_count());
        for &view in swapchain.image_views() {
            let depth = BoundImage::depth(context, extent)?;
            let depth_view = depth.view();
            resources.bind_resource(depth)?;
            framebuffers.push(Framebuffer::new(
                device.clone(),
                render_pass.handle(),
                &[view, depth_view],
                extent,
            )?);
        }

        let spheres = SphereLods::generate();
        let vertex_buffer = upload_buffer(
            context,
            loading,
            bytemuck::cast_slice(&spheres.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let vertex_buffer = resources.bind_resource(vertex_buffer)?;
        let index_buffer = upload_buffer(
            context,
            loading,
            bytemuck::cast_slice(&spheres.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        let index_buffer = resources.bind_resource(index_buffer)?;

        let [width, height] = settings.texture_size;
        let texels = load_texture_layers(&settings.textures, width, height);
        let texture = upload_texture_array(
            context,
            loading,
            &texels,
            vk::Extent2D { width, height },
            settings.textures.len() as u32,
        )?;
        let texture_view = texture.view();
        resources.bind_resource(texture)?;
        let sampler = Sampler::linear(device.clone())?;
        let sampler_handle = sampler.handle();
        resources.bind_resource(sampler)?;
        let descriptor = TextureDescriptor::new(device.clone(), texture_view, sampler_handle)?;

        let vertex_shader = ShaderModule::from_file(device.clone(), &settings.vertex_shader)?;
        let fragment_shader = ShaderModule::from_file(device.clone(), &settings.fragment_shader)?;
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            render_pass.handle(),
            &vertex_shader,
            &fragment_shader,
            descriptor.layout(),
        )?;

        let instance_bytes = (max_instances.max(1) * std::mem::size_of::<InstanceData>()) as vk::DeviceSize;
        let mut instance_buffers = Vec::with_capacity(settings.frames_in_flight);
        for _ in 0..settings.frames_in_flight {
            let buffer = Buffer::new(context, instance_bytes, vk::BufferUsageFlags::VERTEX_BUFFER, HOST_MEMORY)?;
            instance_buffers.push(resources.bind_resource(buffer)?);
        }

        let coordinator = VulkanPresenter::coordinator(context, swapchain, settings.frames_in_flight)?
            .with_wait_timeout(settings.fence_timeout_ns);

        log::info!(
            "Orbit renderer ready: {}x{}, {} frames in flight, {} instances per frame",
            extent.width,
            extent.height,
            settings.frames_in_flight,
            max_instances
        );
        Ok(Self {
            device,
            coordinator,
            resources,
            flattener,
            render_pass,
            framebuffers,
            descriptor,
            pipeline,
            vertex_buffer,
            index_buffer,
            instance_buffers,
            lods: LodRanges {
                vertex_base: spheres.vertex_base,
                index_base: spheres.index_base,
            },
            extent,
        })
    }

    /// Size of the images being presented
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Width over height of the presented images
    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }

    /// Frames presented so far
    pub fn frames_presented(&self) -> u64 {
        self.coordinator.frames_presented()
    }

    /// Flatten `tree` and present one frame of it. Returns the number of
    /// bodies drawn per LOD tier.
    pub fn draw_frame(
        &mut self,
        tree: &mut OrbitTree,
        camera: &Camera,
        time: f32,
        dt: f32,
    ) -> VulkanResult<[usize; LOD_TIERS]> {
        let scene = self.flattener.flatten(tree, camera, time, dt);

        let image_index = self.coordinator.swap_buffers()?;
        let instance_buffer = buffer(&self.resources, self.instance_buffers[self.coordinator.frame_index()])?;
        instance_buffer.write(scene.instances())?;

        let command_buffer = self.coordinator.begin_recording()?;
        let framebuffer = self
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| VulkanError::invalid(format!("no framebuffer for image {image_index}")))?;
        let push = PushConstants {
            view_proj: math::to_cols_array(&camera.view_projection()),
            camera_position: camera.position().push(1.0).into(),
        };
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        };
        let vertex_buffers = [
            buffer(&self.resources, self.vertex_buffer)?.handle(),
            instance_buffer.handle(),
        ];
        let index_buffer = buffer(&self.resources, self.index_buffer)?.handle();

        {
            let mut recorder = CommandRecorder::new(&self.device, command_buffer);
            let mut pass = recorder.begin_render_pass(
                self.render_pass.handle(),
                framebuffer.handle(),
                render_area,
                &RenderPass::clear_values(),
            );
            pass.set_viewport(&vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: self.extent.width as f32,
                height: self.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            });
            pass.set_scissor(&render_area);
            pass.bind_pipeline(self.pipeline.handle());
            pass.bind_descriptor_sets(self.pipeline.layout(), &[self.descriptor.set()]);
            pass.push_constants(
                self.pipeline.layout(),
                GraphicsPipeline::PUSH_STAGES,
                bytemuck::bytes_of(&push),
            );
            pass.bind_vertex_buffers(0, &vertex_buffers, &[0, 0]);
            pass.bind_index_buffer(index_buffer);

            let offsets = scene.lod_offsets();
            for tier in 0..LOD_TIERS {
                let count = offsets[tier + 1] - offsets[tier];
                if count == 0 {
                    continue;
                }
                pass.draw_indexed(
                    self.lods.index_base[tier + 1] - self.lods.index_base[tier],
                    count as u32,
                    self.lods.index_base[tier],
                    self.lods.vertex_base[tier] as i32,
                    offsets[tier] as u32,
                );
            }
        }

        self.coordinator.submit()?;
        self.coordinator.present()?;
        Ok(scene.tier_counts())
    }

    /// Drain the GPU, then release the swapchain and every bound resource.
    /// Calling it again is a no-op.
    pub fn teardown(&mut self) -> VulkanResult<()> {
        self.coordinator.teardown()?;
        self.resources.teardown()
    }
}

impl Drop for OrbitRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            log::error!("Orbit renderer teardown failed: {e}");
        }
    }
}

fn buffer(resources: &VulkanArena, id: ResourceId) -> VulkanResult<&Buffer> {
    resources
        .resource(id)
        .and_then(OwnedResource::as_buffer)
        .ok_or_else(|| VulkanError::invalid(format!("resource #{} is not a live buffer", id.index())))
}

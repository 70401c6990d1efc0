//! Images, views and samplers
//!
//! Covers the two images the renderer needs: the depth attachment and the
//! layered texture array that holds every body material.

use std::path::Path;

use ash::{vk, Device};

use super::commands::CommandRecorder;
use super::context::VulkanContext;
use super::memory::{allocate, staging_buffer};
use super::queue::VulkanArena;
use super::{VulkanError, VulkanResult};

/// Depth attachment format
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Material texture format
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Image with its memory and a view over every layer
pub struct BoundImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
    layers: u32,
}

impl BoundImage {
    /// Create a single-mip, optimally tiled, device-local image
    pub fn new(
        context: &VulkanContext,
        extent: vk::Extent2D,
        layers: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(layers)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&image_create_info, None).map_err(VulkanError::Api)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match allocate(context, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_type = if layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(subresource_range(aspect, layers));

        let view = unsafe {
            device
                .bind_image_memory(image, memory, 0)
                .and_then(|()| device.create_image_view(&view_info, None))
        };
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            device,
            image,
            memory,
            view,
            extent,
            layers,
        })
    }

    /// Depth attachment covering `extent`
    pub fn depth(context: &VulkanContext, extent: vk::Extent2D) -> VulkanResult<Self> {
        Self::new(
            context,
            extent,
            1,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )
    }

    /// Get the image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get the view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Size of each layer
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of array layers
    pub fn layers(&self) -> u32 {
        self.layers
    }
}

impl Drop for BoundImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Sampler wrapper with RAII cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Linear sampler that repeats horizontally and clamps at the poles
    pub fn linear(device: Device) -> VulkanResult<Self> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .max_lod(0.0);

        let sampler = unsafe { device.create_sampler(&sampler_info, None).map_err(VulkanError::Api)? };
        Ok(Self { device, sampler })
    }

    /// Get the sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags, layers: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: layers,
    }
}

/// Upload `layers` tightly packed RGBA8 images of `extent` into a sampled
/// texture array.
///
/// The copy and both layout transitions are recorded on a `loading` slot,
/// and the staging buffer is bound to `loading`.
pub fn upload_texture_array(
    context: &VulkanContext,
    loading: &mut VulkanArena,
    texels: &[u8],
    extent: vk::Extent2D,
    layers: u32,
) -> VulkanResult<BoundImage> {
    let layer_bytes = extent.width as usize * extent.height as usize * 4;
    if layers == 0 || texels.len() != layer_bytes * layers as usize {
        return Err(VulkanError::invalid(format!(
            "{} texel bytes do not fill {layers} layers of {}x{}",
            texels.len(),
            extent.width,
            extent.height
        )));
    }

    let staging = staging_buffer(context, texels)?;
    let texture = BoundImage::new(
        context,
        extent,
        layers,
        TEXTURE_FORMAT,
        vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        vk::ImageAspectFlags::COLOR,
    )?;
    let range = subresource_range(vk::ImageAspectFlags::COLOR, layers);

    let slot = loading.acquire()?;
    let mut recorder = CommandRecorder::new(context.device(), loading.recording(slot)?);

    let to_transfer = vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(texture.handle())
        .subresource_range(range)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .build();
    recorder.image_barriers(
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        &[to_transfer],
    );

    let regions: Vec<vk::BufferImageCopy> = (0..layers)
        .map(|layer| {
            vk::BufferImageCopy::builder()
                .buffer_offset(layer as vk::DeviceSize * layer_bytes as vk::DeviceSize)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: layer,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build()
        })
        .collect();
    recorder.copy_buffer_to_image(staging.handle(), texture.handle(), &regions);

    let to_shader = vk::ImageMemoryBarrier::builder()
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(texture.handle())
        .subresource_range(range)
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)
        .build();
    recorder.image_barriers(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        &[to_shader],
    );

    loading.bind_resource(staging)?;
    loading.release(slot)?;

    log::info!("Uploading {layers} texture layers of {}x{}", extent.width, extent.height);
    Ok(texture)
}

/// Decode each file at `paths` and resize it to `width` x `height` RGBA8.
///
/// Files that are missing or cannot be decoded are replaced by a placeholder
/// so a bad asset never stops the renderer from starting.
pub fn load_texture_layers<P: AsRef<Path>>(paths: &[P], width: u32, height: u32) -> Vec<u8> {
    let layer_bytes = width as usize * height as usize * 4;
    let mut texels = Vec::with_capacity(layer_bytes * paths.len());

    for path in paths {
        let path = path.as_ref();
        match image::open(path) {
            Ok(decoded) => {
                let rgba = decoded
                    .resize_exact(width, height, image::imageops::FilterType::Triangle)
                    .to_rgba8();
                texels.extend_from_slice(rgba.as_raw());
            }
            Err(e) => {
                log::warn!("Using placeholder for texture {}: {e}", path.display());
                texels.extend(placeholder_layer(width, height));
            }
        }
    }
    texels
}

/// Magenta and black checkerboard
fn placeholder_layer(width: u32, height: u32) -> impl Iterator<Item = u8> {
    const CELL: u32 = 32;
    (0..height).flat_map(move |y| {
        (0..width).flat_map(move |x| {
            if (x / CELL + y / CELL) % 2 == 0 {
                [255, 0, 255, 255]
            } else {
                [0, 0, 0, 255]
            }
        })
    })
}

//! Vulkan submission backend for resource lifetime arenas

use ash::{vk, Device};

use super::commands::{begin_one_time, CommandPool};
use super::context::{HwQueue, VulkanContext};
use super::image::{BoundImage, Sampler};
use super::memory::Buffer;
use super::sync::Fence;
use super::{VulkanError, VulkanResult};
use crate::render::lifetime::{ResourceLifetimeArena, SubmitQueue};

/// GPU object whose destruction an arena defers
pub enum OwnedResource {
    /// Buffer and its memory
    Buffer(Buffer),
    /// Image, view and memory
    Image(BoundImage),
    /// Sampler
    Sampler(Sampler),
}

impl OwnedResource {
    /// The buffer, if this is one
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }
}

impl From<Buffer> for OwnedResource {
    fn from(buffer: Buffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<BoundImage> for OwnedResource {
    fn from(image: BoundImage) -> Self {
        Self::Image(image)
    }
}

impl From<Sampler> for OwnedResource {
    fn from(sampler: Sampler) -> Self {
        Self::Sampler(sampler)
    }
}

/// Arena submitting to a Vulkan queue
pub type VulkanArena = ResourceLifetimeArena<VulkanSubmitQueue>;

/// One queue plus the command pool its arena records from
pub struct VulkanSubmitQueue {
    device: Device,
    queue: HwQueue,
    pool: CommandPool,
}

impl VulkanSubmitQueue {
    /// Submission backend for `queue`
    pub fn new(context: &VulkanContext, queue: HwQueue) -> VulkanResult<Self> {
        let device = context.raw_device();
        let pool = CommandPool::new(device.clone(), queue.family)?;
        Ok(Self { device, queue, pool })
    }

    /// Arena named `label` with `slots` recording slots on the graphics queue
    pub fn arena(context: &VulkanContext, label: &str, slots: usize) -> VulkanResult<VulkanArena> {
        let queue = Self::new(context, context.graphics_queue())?;
        ResourceLifetimeArena::new(label, queue, slots)
    }
}

impl SubmitQueue for VulkanSubmitQueue {
    type Token = Fence;
    type Recording = vk::CommandBuffer;
    type Resource = OwnedResource;

    fn create_slot(&mut self) -> VulkanResult<(vk::CommandBuffer, Fence)> {
        let command_buffer = self.pool.allocate_command_buffer()?;
        match Fence::new(self.device.clone(), true) {
            Ok(fence) => Ok((command_buffer, fence)),
            Err(e) => {
                self.pool.free_command_buffers(&[command_buffer]);
                Err(e)
            }
        }
    }

    fn reset_recording(&mut self, recording: vk::CommandBuffer) -> VulkanResult<()> {
        begin_one_time(&self.device, recording)
    }

    fn submit(&mut self, recording: vk::CommandBuffer, token: &Fence) -> VulkanResult<()> {
        let command_buffers = [recording];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        unsafe {
            self.device.end_command_buffer(recording).map_err(VulkanError::Api)?;
            self.device
                .queue_submit(self.queue.handle, &[submit_info], token.handle())
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_resource(&mut self, resource: OwnedResource) {
        drop(resource);
    }

    fn destroy_slot(&mut self, recording: vk::CommandBuffer, token: Fence) {
        self.pool.free_command_buffers(&[recording]);
        drop(token);
    }
}

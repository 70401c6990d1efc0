//! Vulkan presentation backend for frame pacing

use ash::{vk, Device};

use super::commands::{begin_one_time, CommandPool};
use super::context::{HwQueue, VulkanContext};
use super::swapchain::Swapchain;
use super::sync::{Fence, Semaphore};
use super::{VulkanError, VulkanResult};
use crate::render::frame::{FramePacingCoordinator, FrameSlot, PresentationBackend};

/// Coordinator presenting to a Vulkan swapchain
pub type VulkanCoordinator = FramePacingCoordinator<VulkanPresenter>;

/// Swapchain plus the graphics and present queues that feed it
pub struct VulkanPresenter {
    device: Device,
    graphics: HwQueue,
    present: HwQueue,
    pool: CommandPool,
    swapchain: Swapchain,
    suboptimal_reported: bool,
}

impl VulkanPresenter {
    /// Take ownership of `swapchain` and create a command pool for frame recording
    pub fn new(context: &VulkanContext, swapchain: Swapchain) -> VulkanResult<Self> {
        let device = context.raw_device();
        let graphics = context.graphics_queue();
        let pool = CommandPool::new(device.clone(), graphics.family)?;

        Ok(Self {
            device,
            graphics,
            present: context.present_queue(),
            pool,
            swapchain,
            suboptimal_reported: false,
        })
    }

    /// Coordinator driving a new presenter with `frames_in_flight` slots
    pub fn coordinator(
        context: &VulkanContext,
        swapchain: Swapchain,
        frames_in_flight: usize,
    ) -> VulkanResult<VulkanCoordinator> {
        FramePacingCoordinator::new(Self::new(context, swapchain)?, frames_in_flight)
    }

    fn note_suboptimal(&mut self, suboptimal: bool) {
        if suboptimal && !self.suboptimal_reported {
            log::warn!("Swapchain is suboptimal for the surface; continuing without recreation");
            self.suboptimal_reported = true;
        }
    }
}

impl PresentationBackend for VulkanPresenter {
    type Token = Fence;
    type CommandBuffer = vk::CommandBuffer;
    type Signal = Semaphore;

    fn create_frame_slot(&mut self) -> VulkanResult<FrameSlot<Self>> {
        let command_buffer = self.pool.allocate_command_buffer()?;
        let objects = Semaphore::new(self.device.clone()).and_then(|image_ready| {
            let render_done = Semaphore::new(self.device.clone())?;
            let token = Fence::new(self.device.clone(), true)?;
            Ok((image_ready, render_done, token))
        });

        match objects {
            Ok((image_ready, render_done, token)) => {
                Ok(FrameSlot::new(command_buffer, image_ready, render_done, token))
            }
            Err(e) => {
                self.pool.free_command_buffers(&[command_buffer]);
                Err(e)
            }
        }
    }

    fn acquire_next_image(&mut self, image_ready: &Semaphore) -> VulkanResult<u32> {
        let (image_index, suboptimal) = self.swapchain.acquire_next_image(image_ready.handle())?;
        self.note_suboptimal(suboptimal);
        Ok(image_index)
    }

    fn begin_commands(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        begin_one_time(&self.device, command_buffer)
    }

    fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        wait: &Semaphore,
        signal: &Semaphore,
        token: &Fence,
    ) -> VulkanResult<()> {
        let wait_semaphores = [wait.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [signal.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?;
            self.device
                .queue_submit(self.graphics.handle, &[submit_info], token.handle())
                .map_err(|e| VulkanError::from_wait(e, 0))
        }
    }

    fn present(&mut self, image_index: u32, wait: &Semaphore) -> VulkanResult<()> {
        let suboptimal = self
            .swapchain
            .present(self.present.handle, image_index, wait.handle())?;
        self.note_suboptimal(suboptimal);
        Ok(())
    }

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(|e| VulkanError::from_wait(e, 0)) }
    }

    fn destroy_frame_slot(&mut self, slot: FrameSlot<Self>) {
        let (command_buffer, image_ready, render_done, token) = slot.into_parts();
        self.pool.free_command_buffers(&[command_buffer]);
        drop((image_ready, render_done, token));
    }
}

//! Frame pacing
//!
//! [`FramePacingCoordinator`] keeps up to N frames in flight. Each frame slot
//! carries its own command buffer, an image-ready signal (acquire → render), a
//! render-done signal (render → present) and a completion token (device →
//! CPU). A slot walks this cycle every time it comes around:
//!
//! ```text
//! Idle ─► Wait ─► Acquired ─► Recording ─► Submitted ─► Presented ─┐
//!          ▲                                                       │
//!          └───────────────────────────────────────────────────────┘
//! ```
//!
//! `Wait` is where the CPU blocks on the slot's token, so the CPU can never
//! run more than N frames ahead of the device. Swapchain images are indexed
//! independently of frame slots; there may be more images than slots.
//!
//! Surface loss is not recovered from: an out-of-date swapchain comes back
//! as [`VulkanError::SurfaceOutOfDate`] and ends the frame loop.

use crate::render::sync::{CompletionToken, WAIT_FOREVER};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Where a frame slot is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Never used, token signaled
    Idle,
    /// Blocked on the token of this slot's previous frame
    Wait,
    /// A swapchain image has been requested for this frame
    Acquired,
    /// Commands are being recorded
    Recording,
    /// Submitted; render-done and the token are pending
    Submitted,
    /// Queued for display
    Presented,
}

/// Presentation engine and graphics queue a coordinator drives
pub trait PresentationBackend: Sized {
    /// CPU-waitable completion signal
    type Token: CompletionToken;
    /// Per-frame command buffer handle
    type CommandBuffer: Copy;
    /// GPU-side signal ordering acquire, render and present
    type Signal;

    /// Create one frame slot; its token must start signaled
    fn create_frame_slot(&mut self) -> VulkanResult<FrameSlot<Self>>;

    /// Request the next presentable image; `image_ready` fires once it can be rendered to
    fn acquire_next_image(&mut self, image_ready: &Self::Signal) -> VulkanResult<u32>;

    /// Reset `command_buffer` and open it for recording
    fn begin_commands(&mut self, command_buffer: Self::CommandBuffer) -> VulkanResult<()>;

    /// Close and submit `command_buffer`. Rendering waits on `wait`, then
    /// fires `signal`; `token` signals when the device is done.
    fn submit(
        &mut self,
        command_buffer: Self::CommandBuffer,
        wait: &Self::Signal,
        signal: &Self::Signal,
        token: &Self::Token,
    ) -> VulkanResult<()>;

    /// Queue `image_index` for display once `wait` fires
    fn present(&mut self, image_index: u32, wait: &Self::Signal) -> VulkanResult<()>;

    /// Number of presentable images
    fn image_count(&self) -> usize;

    /// Block until the device has finished all submitted work
    fn wait_idle(&mut self) -> VulkanResult<()>;

    /// Free a frame slot. Only called after `wait_idle`.
    fn destroy_frame_slot(&mut self, slot: FrameSlot<Self>);
}

/// Synchronization and recording state for one in-flight frame
pub struct FrameSlot<B: PresentationBackend> {
    command_buffer: B::CommandBuffer,
    image_ready: B::Signal,
    render_done: B::Signal,
    token: B::Token,
    state: FrameState,
}

impl<B: PresentationBackend> FrameSlot<B> {
    /// Assemble a slot from backend objects
    pub fn new(
        command_buffer: B::CommandBuffer,
        image_ready: B::Signal,
        render_done: B::Signal,
        token: B::Token,
    ) -> Self {
        Self {
            command_buffer,
            image_ready,
            render_done,
            token,
            state: FrameState::Idle,
        }
    }

    /// Take the slot apart for destruction
    pub fn into_parts(self) -> (B::CommandBuffer, B::Signal, B::Signal, B::Token) {
        (self.command_buffer, self.image_ready, self.render_done, self.token)
    }

    /// Current state
    pub fn state(&self) -> FrameState {
        self.state
    }
}

/// N-buffered acquire/record/submit/present driver
pub struct FramePacingCoordinator<B: PresentationBackend> {
    // `None` once torn down
    backend: Option<B>,
    slots: Vec<FrameSlot<B>>,
    frame_index: usize,
    image_index: Option<u32>,
    frames_presented: u64,
    wait_timeout_ns: u64,
}

impl<B: PresentationBackend> FramePacingCoordinator<B> {
    /// Create `frames_in_flight` frame slots on `backend`
    pub fn new(mut backend: B, frames_in_flight: usize) -> VulkanResult<Self> {
        if frames_in_flight == 0 {
            return Err(VulkanError::invalid("at least one frame must be allowed in flight"));
        }

        let slots = (0..frames_in_flight)
            .map(|_| backend.create_frame_slot())
            .collect::<VulkanResult<Vec<_>>>()?;

        log::info!(
            "Frame pacing: {frames_in_flight} frames in flight over {} images",
            backend.image_count()
        );

        Ok(Self {
            backend: Some(backend),
            slots,
            frame_index: 0,
            image_index: None,
            frames_presented: 0,
            wait_timeout_ns: WAIT_FOREVER,
        })
    }

    /// Bound every token wait by `timeout_ns` instead of waiting forever
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout_ns: u64) -> Self {
        self.wait_timeout_ns = timeout_ns;
        self
    }

    /// Move to the next frame slot and acquire a presentable image for it.
    ///
    /// Blocks until the device has finished the frame that last used the
    /// slot. Returns the acquired image index.
    pub fn swap_buffers(&mut self) -> VulkanResult<u32> {
        let state = self.current_slot()?.state;
        if !matches!(state, FrameState::Idle | FrameState::Presented) {
            return Err(VulkanError::invalid(format!(
                "frame {} is still {state:?}; present it before swapping",
                self.frame_index
            )));
        }
        let backend = self.backend.as_mut().ok_or_else(torn_down)?;

        self.frame_index = (self.frame_index + 1) % self.slots.len();
        self.image_index = None;
        let slot = &mut self.slots[self.frame_index];

        slot.state = FrameState::Wait;
        slot.token.wait(self.wait_timeout_ns)?;

        let image_index = backend.acquire_next_image(&slot.image_ready)?;
        slot.state = FrameState::Acquired;
        self.image_index = Some(image_index);
        Ok(image_index)
    }

    /// Open the current frame's command buffer for recording
    pub fn begin_recording(&mut self) -> VulkanResult<B::CommandBuffer> {
        self.expect_state(FrameState::Acquired, "begin recording")?;
        let backend = self.backend.as_mut().ok_or_else(torn_down)?;
        let slot = &mut self.slots[self.frame_index];

        backend.begin_commands(slot.command_buffer)?;
        slot.state = FrameState::Recording;
        Ok(slot.command_buffer)
    }

    /// Submit the current frame's commands, rearming its token
    pub fn submit(&mut self) -> VulkanResult<()> {
        self.expect_state(FrameState::Recording, "submit")?;
        let backend = self.backend.as_mut().ok_or_else(torn_down)?;
        let slot = &mut self.slots[self.frame_index];

        // On failure the slot stays Recording, so swap_buffers never waits on
        // the unsignaled token; teardown only idles the device
        slot.token.reset()?;
        backend.submit(slot.command_buffer, &slot.image_ready, &slot.render_done, &slot.token)?;
        slot.state = FrameState::Submitted;
        Ok(())
    }

    /// Queue the current image for display once rendering is done
    pub fn present(&mut self) -> VulkanResult<()> {
        self.expect_state(FrameState::Submitted, "present")?;
        let image_index = self
            .image_index
            .ok_or_else(|| VulkanError::invalid("no swapchain image acquired"))?;
        let backend = self.backend.as_mut().ok_or_else(torn_down)?;
        let slot = &mut self.slots[self.frame_index];

        backend.present(image_index, &slot.render_done)?;
        slot.state = FrameState::Presented;
        self.frames_presented += 1;
        Ok(())
    }

    /// Command buffer of the current frame
    pub fn current_command_buffer(&self) -> Option<B::CommandBuffer> {
        self.slots.get(self.frame_index).map(|s| s.command_buffer)
    }

    /// Signal fired when the current image may be rendered to
    pub fn current_image_ready(&self) -> Option<&B::Signal> {
        self.slots.get(self.frame_index).map(|s| &s.image_ready)
    }

    /// Signal fired when the current frame has finished rendering
    pub fn current_render_done(&self) -> Option<&B::Signal> {
        self.slots.get(self.frame_index).map(|s| &s.render_done)
    }

    /// Completion token of the current frame
    pub fn current_token(&self) -> Option<&B::Token> {
        self.slots.get(self.frame_index).map(|s| &s.token)
    }

    /// Swapchain image acquired for the current frame
    pub fn current_image_index(&self) -> Option<u32> {
        self.image_index
    }

    /// State of the current frame slot
    pub fn current_state(&self) -> Option<FrameState> {
        self.slots.get(self.frame_index).map(FrameSlot::state)
    }

    /// Index of the current frame slot
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.backend.as_ref().map_or(0, PresentationBackend::image_count)
    }

    /// Frames queued for display so far
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// The presentation backend, until teardown
    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    /// Wait for the device to go idle, then destroy every frame slot and the
    /// backend. Calling it again is a no-op.
    pub fn teardown(&mut self) -> VulkanResult<()> {
        let Some(mut backend) = self.backend.take() else {
            return Ok(());
        };

        backend.wait_idle()?;
        for slot in self.slots.drain(..) {
            backend.destroy_frame_slot(slot);
        }
        self.image_index = None;

        log::info!("Frame pacing torn down after {} frames", self.frames_presented);
        Ok(())
    }

    fn current_slot(&self) -> VulkanResult<&FrameSlot<B>> {
        self.slots.get(self.frame_index).ok_or_else(torn_down)
    }

    fn expect_state(&self, expected: FrameState, action: &str) -> VulkanResult<()> {
        let state = self.current_slot()?.state;
        if state == expected {
            Ok(())
        } else {
            Err(VulkanError::invalid(format!(
                "cannot {action} frame {} in state {state:?}",
                self.frame_index
            )))
        }
    }
}

impl<B: PresentationBackend> Drop for FramePacingCoordinator<B> {
    fn drop(&mut self) {
        if self.backend.is_some() {
            if let Err(e) = self.teardown() {
                log::error!("Frame pacing teardown failed: {e}");
            }
        }
    }
}

fn torn_down() -> VulkanError {
    VulkanError::invalid("frame pacing has been torn down")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{MockPresenter, QueueEvent};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn run_frame(coordinator: &mut FramePacingCoordinator<MockPresenter>) -> VulkanResult<u32> {
        let image = coordinator.swap_buffers()?;
        coordinator.begin_recording()?;
        coordinator.submit()?;
        coordinator.present()?;
        Ok(image)
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let (presenter, _gpu) = MockPresenter::immediate(3);
        assert!(matches!(
            FramePacingCoordinator::new(presenter, 0),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_frame_index_advances_before_use() {
        let (presenter, _gpu) = MockPresenter::immediate(3);
        let mut coordinator = FramePacingCoordinator::new(presenter, 2).unwrap();
        assert_eq!(coordinator.frame_index(), 0);

        let mut indices = Vec::new();
        let mut images = Vec::new();
        for _ in 0..4 {
            images.push(run_frame(&mut coordinator).unwrap());
            indices.push(coordinator.frame_index());
        }
        assert_eq!(indices, vec![1, 0, 1, 0]);
        // Images cycle over the swapchain, independently of the two slots
        assert_eq!(images, vec![0, 1, 2, 0]);
        assert_eq!(coordinator.frames_presented(), 4);
    }

    #[test]
    fn test_states_follow_the_cycle() {
        let (presenter, _gpu) = MockPresenter::manual(2);
        let mut coordinator = FramePacingCoordinator::new(presenter, 2).unwrap();
        assert_eq!(coordinator.current_state(), Some(FrameState::Idle));

        coordinator.swap_buffers().unwrap();
        assert_eq!(coordinator.current_state(), Some(FrameState::Acquired));
        coordinator.begin_recording().unwrap();
        assert_eq!(coordinator.current_state(), Some(FrameState::Recording));
        coordinator.submit().unwrap();
        assert_eq!(coordinator.current_state(), Some(FrameState::Submitted));
        assert!(!coordinator.current_token().unwrap().is_signaled().unwrap());
        coordinator.present().unwrap();
        assert_eq!(coordinator.current_state(), Some(FrameState::Presented));
    }

    #[test]
    fn test_out_of_order_calls_rejected() {
        let (presenter, _gpu) = MockPresenter::immediate(2);
        let mut coordinator = FramePacingCoordinator::new(presenter, 2).unwrap();

        assert!(coordinator.begin_recording().is_err());
        assert!(coordinator.submit().is_err());
        assert!(coordinator.present().is_err());

        coordinator.swap_buffers().unwrap();
        assert!(coordinator.present().is_err());
        assert!(matches!(
            coordinator.swap_buffers(),
            Err(VulkanError::InvalidOperation { .. })
        ));

        coordinator.begin_recording().unwrap();
        assert!(coordinator.begin_recording().is_err());
    }

    #[test]
    fn test_swap_blocks_on_frame_n_plus_one() {
        const FRAMES: usize = 2;
        let (presenter, gpu) = MockPresenter::manual(3);
        let mut coordinator = FramePacingCoordinator::new(presenter, FRAMES).unwrap();

        for _ in 0..FRAMES {
            run_frame(&mut coordinator).unwrap();
        }
        assert_eq!(gpu.pending(), FRAMES);

        let signaled = Arc::new(AtomicBool::new(false));
        let device = {
            let signaled = Arc::clone(&signaled);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                signaled.store(true, Ordering::SeqCst);
                gpu.complete_next();
            })
        };

        coordinator.swap_buffers().unwrap();
        assert!(signaled.load(Ordering::SeqCst), "swap returned before the token signaled");
        device.join().unwrap();
    }

    #[test]
    fn test_swap_times_out_without_completion() {
        let (presenter, _gpu) = MockPresenter::manual(3);
        let mut coordinator = FramePacingCoordinator::new(presenter, 2)
            .unwrap()
            .with_wait_timeout(5_000_000);

        run_frame(&mut coordinator).unwrap();
        run_frame(&mut coordinator).unwrap();
        assert!(matches!(
            coordinator.swap_buffers(),
            Err(VulkanError::WaitTimeout { .. })
        ));
    }

    #[test]
    fn test_in_flight_frames_bounded() {
        const FRAMES: usize = 2;
        let (presenter, gpu) = MockPresenter::manual(3);
        let max_pending = presenter.max_pending_handle();
        let mut coordinator = FramePacingCoordinator::new(presenter, FRAMES).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let device = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    gpu.complete_next();
                    thread::sleep(Duration::from_micros(300));
                }
            })
        };

        for _ in 0..32 {
            run_frame(&mut coordinator).unwrap();
        }
        stop.store(true, Ordering::SeqCst);
        device.join().unwrap();
        coordinator.teardown().unwrap();

        assert!(max_pending.load(Ordering::SeqCst) <= FRAMES);
    }

    #[test]
    fn test_present_gated_on_render_done() {
        let (presenter, _gpu) = MockPresenter::immediate(2);
        let log = presenter.log();
        let mut coordinator = FramePacingCoordinator::new(presenter, 2).unwrap();

        let image = run_frame(&mut coordinator).unwrap();
        let ready = coordinator.current_image_ready().unwrap().0;
        let done = coordinator.current_render_done().unwrap().0;
        let command_buffer = coordinator.current_command_buffer().unwrap();

        let events = log.events();
        let acquire = events
            .iter()
            .position(|e| *e == QueueEvent::AcquireImage { image, signal: ready })
            .unwrap();
        let submit = events
            .iter()
            .position(|e| *e == QueueEvent::SubmitFrame { command_buffer, wait: ready, signal: done })
            .unwrap();
        let present = events
            .iter()
            .position(|e| *e == QueueEvent::Present { image, wait: done })
            .unwrap();
        assert!(acquire < submit && submit < present);
    }

    #[test]
    fn test_surface_loss_is_fatal() {
        let (mut presenter, _gpu) = MockPresenter::immediate(2);
        presenter.fail_acquire_with(VulkanError::SurfaceOutOfDate);
        let mut coordinator = FramePacingCoordinator::new(presenter, 2).unwrap();

        assert!(matches!(coordinator.swap_buffers(), Err(VulkanError::SurfaceOutOfDate)));
        assert_eq!(coordinator.current_image_index(), None);
    }

    #[test]
    fn test_teardown_waits_idle_first() {
        let (presenter, _gpu) = MockPresenter::manual(2);
        let log = presenter.log();
        let mut coordinator = FramePacingCoordinator::new(presenter, 2).unwrap();
        run_frame(&mut coordinator).unwrap();

        coordinator.teardown().unwrap();
        coordinator.teardown().unwrap();

        let events = log.events();
        let idle = events.iter().position(|e| *e == QueueEvent::WaitIdle).unwrap();
        let destroyed: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, QueueEvent::DestroySlot(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(destroyed.len(), 2);
        assert!(destroyed.iter().all(|&i| i > idle));
        assert!(coordinator.swap_buffers().is_err());
        assert_eq!(coordinator.current_command_buffer(), None);
    }
}

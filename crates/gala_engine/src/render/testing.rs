//! GPU-free test doubles for the render core
//!
//! `MockToken` blocks on a condvar like a fence blocks on the device. A
//! `MockGpu` handle plays the device: it completes pending submissions in
//! order, from whichever thread the test likes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::render::frame::{FrameSlot, PresentationBackend};
use crate::render::lifetime::SubmitQueue;
use crate::render::sync::{CompletionToken, WAIT_FOREVER};
use crate::render::vulkan::{VulkanError, VulkanResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Condvar-backed completion token
#[derive(Clone)]
pub struct MockToken {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl MockToken {
    pub fn new(signaled: bool) -> Self {
        Self {
            state: Arc::new((Mutex::new(signaled), Condvar::new())),
        }
    }

    pub fn signal(&self) {
        let (flag, condvar) = &*self.state;
        *lock(flag) = true;
        condvar.notify_all();
    }
}

impl CompletionToken for MockToken {
    fn wait(&self, timeout_ns: u64) -> VulkanResult<()> {
        let (flag, condvar) = &*self.state;
        let mut signaled = lock(flag);
        if timeout_ns == WAIT_FOREVER {
            while !*signaled {
                signaled = condvar.wait(signaled).unwrap_or_else(std::sync::PoisonError::into_inner);
            }
            return Ok(());
        }

        let deadline = Instant::now() + Duration::from_nanos(timeout_ns);
        while !*signaled {
            let now = Instant::now();
            if now >= deadline {
                return Err(VulkanError::WaitTimeout { timeout_ns });
            }
            signaled = condvar
                .wait_timeout(signaled, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .0;
        }
        Ok(())
    }

    fn reset(&self) -> VulkanResult<()> {
        *lock(&self.state.0) = false;
        Ok(())
    }

    fn is_signaled(&self) -> VulkanResult<bool> {
        Ok(*lock(&self.state.0))
    }
}

/// Everything the mocks observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    CreateSlot(usize),
    ResetRecording(usize),
    Submit(usize),
    Complete(usize),
    DestroyResource(u32),
    DestroySlot(usize),
    AcquireImage { image: u32, signal: usize },
    SubmitFrame { command_buffer: usize, wait: usize, signal: usize },
    Present { image: u32, wait: usize },
    WaitIdle,
}

/// Shared, cloneable event log
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<QueueEvent>>>);

impl EventLog {
    pub fn push(&self, event: QueueEvent) {
        lock(&self.0).push(event);
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        lock(&self.0).clone()
    }
}

type Pending = Arc<Mutex<VecDeque<(usize, MockToken)>>>;

/// Simulated device completing submissions
#[derive(Clone)]
pub struct MockGpu {
    log: EventLog,
    pending: Pending,
}

impl MockGpu {
    /// Complete the oldest pending submission, if any
    pub fn complete_next(&self) -> bool {
        let next = lock(&self.pending).pop_front();
        match next {
            Some((id, token)) => {
                self.log.push(QueueEvent::Complete(id));
                token.signal();
                true
            }
            None => false,
        }
    }

    /// Complete everything pending
    pub fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.complete_next() {
            count += 1;
        }
        count
    }

    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    fn enqueue(&self, id: usize, token: MockToken, auto_complete: bool, max_pending: &AtomicUsize) {
        let depth = {
            let mut pending = lock(&self.pending);
            pending.push_back((id, token));
            pending.len()
        };
        max_pending.fetch_max(depth, Ordering::SeqCst);
        if auto_complete {
            self.complete_all();
        }
    }
}

/// `SubmitQueue` that records events instead of talking to a device
pub struct MockQueue {
    gpu: MockGpu,
    next_slot: usize,
    auto_complete: bool,
    max_pending: Arc<AtomicUsize>,
    fail_submit: Option<VulkanError>,
}

impl MockQueue {
    fn with_mode(auto_complete: bool) -> (Self, MockGpu) {
        let gpu = MockGpu {
            log: EventLog::default(),
            pending: Arc::default(),
        };
        let queue = Self {
            gpu: gpu.clone(),
            next_slot: 0,
            auto_complete,
            max_pending: Arc::default(),
            fail_submit: None,
        };
        (queue, gpu)
    }

    /// Submissions complete the moment they are made
    pub fn immediate() -> (Self, MockGpu) {
        Self::with_mode(true)
    }

    /// Submissions stay pending until the returned `MockGpu` completes them
    pub fn manual() -> (Self, MockGpu) {
        Self::with_mode(false)
    }

    pub fn log(&self) -> EventLog {
        self.gpu.log.clone()
    }

    /// Highest number of simultaneously pending submissions seen
    pub fn max_pending_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.max_pending)
    }

    /// Make the next submit fail with `error` without reaching the device
    pub fn fail_next_submit_with(&mut self, error: VulkanError) {
        self.fail_submit = Some(error);
    }
}

impl SubmitQueue for MockQueue {
    type Token = MockToken;
    type Recording = usize;
    type Resource = u32;

    fn create_slot(&mut self) -> VulkanResult<(usize, MockToken)> {
        let id = self.next_slot;
        self.next_slot += 1;
        self.gpu.log.push(QueueEvent::CreateSlot(id));
        Ok((id, MockToken::new(true)))
    }

    fn reset_recording(&mut self, recording: usize) -> VulkanResult<()> {
        self.gpu.log.push(QueueEvent::ResetRecording(recording));
        Ok(())
    }

    fn submit(&mut self, recording: usize, token: &MockToken) -> VulkanResult<()> {
        if let Some(error) = self.fail_submit.take() {
            return Err(error);
        }
        self.gpu.log.push(QueueEvent::Submit(recording));
        self.gpu
            .enqueue(recording, token.clone(), self.auto_complete, &self.max_pending);
        Ok(())
    }

    fn destroy_resource(&mut self, resource: u32) {
        self.gpu.log.push(QueueEvent::DestroyResource(resource));
    }

    fn destroy_slot(&mut self, recording: usize, _token: MockToken) {
        self.gpu.log.push(QueueEvent::DestroySlot(recording));
    }
}

/// GPU-side signal stand-in; only its identity matters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSignal(pub usize);

/// `PresentationBackend` that records events instead of presenting
pub struct MockPresenter {
    gpu: MockGpu,
    image_count: u32,
    next_image: u32,
    next_id: usize,
    auto_complete: bool,
    max_pending: Arc<AtomicUsize>,
    fail_acquire: Option<VulkanError>,
}

impl MockPresenter {
    fn with_mode(image_count: u32, auto_complete: bool) -> (Self, MockGpu) {
        let gpu = MockGpu {
            log: EventLog::default(),
            pending: Arc::default(),
        };
        let presenter = Self {
            gpu: gpu.clone(),
            image_count,
            next_image: 0,
            next_id: 0,
            auto_complete,
            max_pending: Arc::default(),
            fail_acquire: None,
        };
        (presenter, gpu)
    }

    pub fn immediate(image_count: u32) -> (Self, MockGpu) {
        Self::with_mode(image_count, true)
    }

    pub fn manual(image_count: u32) -> (Self, MockGpu) {
        Self::with_mode(image_count, false)
    }

    pub fn log(&self) -> EventLog {
        self.gpu.log.clone()
    }

    pub fn max_pending_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.max_pending)
    }

    /// Make every subsequent acquire fail with `error`
    pub fn fail_acquire_with(&mut self, error: VulkanError) {
        self.fail_acquire = Some(error);
    }

    fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl PresentationBackend for MockPresenter {
    type Token = MockToken;
    type CommandBuffer = usize;
    type Signal = MockSignal;

    fn create_frame_slot(&mut self) -> VulkanResult<FrameSlot<Self>> {
        let command_buffer = self.next_id();
        let image_ready = MockSignal(self.next_id());
        let render_done = MockSignal(self.next_id());
        Ok(FrameSlot::new(command_buffer, image_ready, render_done, MockToken::new(true)))
    }

    fn acquire_next_image(&mut self, image_ready: &MockSignal) -> VulkanResult<u32> {
        if let Some(error) = self.fail_acquire.take() {
            return Err(error);
        }
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        self.gpu.log.push(QueueEvent::AcquireImage {
            image,
            signal: image_ready.0,
        });
        Ok(image)
    }

    fn begin_commands(&mut self, command_buffer: usize) -> VulkanResult<()> {
        self.gpu.log.push(QueueEvent::ResetRecording(command_buffer));
        Ok(())
    }

    fn submit(
        &mut self,
        command_buffer: usize,
        wait: &MockSignal,
        signal: &MockSignal,
        token: &MockToken,
    ) -> VulkanResult<()> {
        self.gpu.log.push(QueueEvent::SubmitFrame {
            command_buffer,
            wait: wait.0,
            signal: signal.0,
        });
        self.gpu
            .enqueue(command_buffer, token.clone(), self.auto_complete, &self.max_pending);
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait: &MockSignal) -> VulkanResult<()> {
        self.gpu.log.push(QueueEvent::Present {
            image: image_index,
            wait: wait.0,
        });
        Ok(())
    }

    fn image_count(&self) -> usize {
        self.image_count as usize
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        self.gpu.log.push(QueueEvent::WaitIdle);
        self.gpu.complete_all();
        Ok(())
    }

    fn destroy_frame_slot(&mut self, slot: FrameSlot<Self>) {
        let (command_buffer, _, _, _) = slot.into_parts();
        self.gpu.log.push(QueueEvent::DestroySlot(command_buffer));
    }
}

//! Resource lifetime arenas
//!
//! An arena owns a small ring of recording slots bound to one queue, and a bag
//! of GPU resources that must stay alive until every submission from the
//! arena has completed. Slots cycle through the ring; a slot is only handed
//! out again once its completion token has signaled, which caps the arena's
//! in-flight work at the ring size.
//!
//! Resources are never freed individually. They are destroyed together by
//! [`ResourceLifetimeArena::teardown`], after all tokens have drained.
//!
//! An arena with zero slots is a plain tracking bag: it accepts
//! [`bind_resource`](ResourceLifetimeArena::bind_resource) and
//! [`teardown`](ResourceLifetimeArena::teardown) and rejects everything else.

use crate::render::sync::{CompletionToken, WAIT_FOREVER};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Queue backend an arena submits to
///
/// `create_slot` must hand back a token that is already signaled.
pub trait SubmitQueue {
    /// Completion token attached to each submission
    type Token: CompletionToken;
    /// Handle to one reusable recording container
    type Recording: Copy;
    /// GPU-memory-backed object the arena keeps alive
    type Resource;

    /// Allocate one recording container and its signaled token
    fn create_slot(&mut self) -> VulkanResult<(Self::Recording, Self::Token)>;

    /// Discard whatever was recorded into `recording` last time
    fn reset_recording(&mut self, recording: Self::Recording) -> VulkanResult<()>;

    /// Submit `recording`; `token` signals when the device is done with it
    fn submit(&mut self, recording: Self::Recording, token: &Self::Token) -> VulkanResult<()>;

    /// Free a tracked resource. Only called once every token has signaled.
    fn destroy_resource(&mut self, resource: Self::Resource);

    /// Free a slot. Only called once every token has signaled.
    fn destroy_slot(&mut self, recording: Self::Recording, token: Self::Token);
}

/// Index of a resource bound to an arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(usize);

impl ResourceId {
    /// Position in bind order
    pub fn index(self) -> usize {
        self.0
    }
}

struct RecordingSlot<Q: SubmitQueue> {
    recording: Q::Recording,
    token: Q::Token,
    acquired: bool,
    // Token was reset for a submission that never reached the queue
    stranded: bool,
}

/// Pool of recording slots plus deferred-destruction bag for one queue
pub struct ResourceLifetimeArena<Q: SubmitQueue> {
    label: String,
    // `None` once torn down
    queue: Option<Q>,
    slots: Vec<RecordingSlot<Q>>,
    cursor: usize,
    resources: Vec<Q::Resource>,
    wait_timeout_ns: u64,
}

impl<Q: SubmitQueue> ResourceLifetimeArena<Q> {
    /// Create an arena with `slot_count` recording slots on `queue`
    pub fn new(label: impl Into<String>, mut queue: Q, slot_count: usize) -> VulkanResult<Self> {
        let label = label.into();
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let (recording, token) = queue.create_slot()?;
            slots.push(RecordingSlot {
                recording,
                token,
                acquired: false,
                stranded: false,
            });
        }

        log::info!("Created arena '{label}' with {slot_count} recording slots");

        Ok(Self {
            label,
            queue: Some(queue),
            slots,
            cursor: 0,
            resources: Vec::with_capacity(1),
            wait_timeout_ns: WAIT_FOREVER,
        })
    }

    /// Bound every token wait by `timeout_ns` instead of waiting forever
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout_ns: u64) -> Self {
        self.wait_timeout_ns = timeout_ns;
        self
    }

    /// Hand out the next slot in the ring, ready for recording.
    ///
    /// Blocks until the device has finished the slot's previous submission.
    pub fn acquire(&mut self) -> VulkanResult<usize> {
        if self.slots.is_empty() {
            return Err(VulkanError::invalid(format!(
                "arena '{}' has no recording slots",
                self.label
            )));
        }
        let queue = self.queue.as_mut().ok_or_else(|| torn_down(&self.label))?;

        let index = self.cursor;
        let slot = &mut self.slots[index];
        if slot.awaits_device()? {
            log::debug!("Arena '{}' waiting on slot {index}", self.label);
            slot.token.wait(self.wait_timeout_ns)?;
        }
        if slot.acquired {
            log::warn!(
                "Arena '{}' slot {index} re-acquired without release; its recording is discarded",
                self.label
            );
        }
        queue.reset_recording(slot.recording)?;
        slot.acquired = true;

        self.cursor = (self.cursor + 1) % self.slots.len();
        Ok(index)
    }

    /// Recording container of an acquired slot
    pub fn recording(&self, slot: usize) -> VulkanResult<Q::Recording> {
        self.acquired_slot(slot).map(|s| s.recording)
    }

    /// Submit what was recorded into `slot` and rearm its token.
    ///
    /// A failed submission returns the slot to the ring unsubmitted; nothing
    /// will signal its token, so later waits skip it.
    pub fn release(&mut self, slot: usize) -> VulkanResult<()> {
        self.acquired_slot(slot)?;
        let queue = self.queue.as_mut().ok_or_else(|| torn_down(&self.label))?;
        let slot = &mut self.slots[slot];

        slot.acquired = false;
        slot.token.reset()?;
        slot.stranded = true;
        queue.submit(slot.recording, &slot.token)?;
        slot.stranded = false;
        Ok(())
    }

    /// Take ownership of `resource` until teardown
    pub fn bind_resource(&mut self, resource: impl Into<Q::Resource>) -> VulkanResult<ResourceId> {
        if self.queue.is_none() {
            return Err(torn_down(&self.label));
        }
        if self.resources.len() == self.resources.capacity() {
            // grow by doubling, starting from one
            self.resources.reserve_exact(self.resources.capacity().max(1));
        }
        let id = ResourceId(self.resources.len());
        self.resources.push(resource.into());
        log::debug!("Arena '{}' bound resource #{}", self.label, id.0);
        Ok(id)
    }

    /// Borrow a bound resource
    pub fn resource(&self, id: ResourceId) -> Option<&Q::Resource> {
        self.resources.get(id.0)
    }

    /// Drain every token, then destroy resources in bind order, then the slots.
    ///
    /// Must run before the device the queue belongs to is destroyed. Calling
    /// it again is a no-op.
    pub fn teardown(&mut self) -> VulkanResult<()> {
        let Some(mut queue) = self.queue.take() else {
            return Ok(());
        };

        for slot in &self.slots {
            if !slot.stranded {
                slot.token.wait(self.wait_timeout_ns)?;
            }
        }

        let resource_count = self.resources.len();
        for resource in self.resources.drain(..) {
            queue.destroy_resource(resource);
        }
        let slot_count = self.slots.len();
        for slot in self.slots.drain(..) {
            queue.destroy_slot(slot.recording, slot.token);
        }
        drop(queue);

        log::info!(
            "Arena '{}' torn down: {resource_count} resources, {slot_count} slots",
            self.label
        );
        Ok(())
    }

    /// Number of slots whose last submission has not completed
    pub fn in_flight(&self) -> VulkanResult<usize> {
        let mut count = 0;
        for slot in &self.slots {
            if slot.awaits_device()? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Number of tracked resources
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Allocated room for tracked resources
    pub fn resource_capacity(&self) -> usize {
        self.resources.capacity()
    }

    /// Number of recording slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The queue backend, until teardown
    pub fn queue(&self) -> Option<&Q> {
        self.queue.as_ref()
    }

    fn acquired_slot(&self, slot: usize) -> VulkanResult<&RecordingSlot<Q>> {
        match self.slots.get(slot) {
            Some(s) if s.acquired => Ok(s),
            Some(_) => Err(VulkanError::invalid(format!(
                "arena '{}' slot {slot} is not acquired",
                self.label
            ))),
            None => Err(VulkanError::invalid(format!(
                "arena '{}' has no slot {slot}",
                self.label
            ))),
        }
    }
}

impl<Q: SubmitQueue> RecordingSlot<Q> {
    fn awaits_device(&self) -> VulkanResult<bool> {
        Ok(!self.stranded && !self.token.is_signaled()?)
    }
}

impl<Q: SubmitQueue> Drop for ResourceLifetimeArena<Q> {
    fn drop(&mut self) {
        if self.queue.is_some() {
            log::warn!("Arena '{}' dropped without teardown", self.label);
            if let Err(e) = self.teardown() {
                log::error!("Arena '{}' teardown failed: {e}", self.label);
            }
        }
    }
}

fn torn_down(label: &str) -> VulkanError {
    VulkanError::invalid(format!("arena '{label}' has been torn down"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{MockQueue, QueueEvent};
    use ash::vk;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acquire_cycles_through_ring() {
        let (queue, _gpu) = MockQueue::immediate();
        let mut arena = ResourceLifetimeArena::new("ring", queue, 3).unwrap();

        let mut order = Vec::new();
        for _ in 0..7 {
            let slot = arena.acquire().unwrap();
            order.push(slot);
            arena.release(slot).unwrap();
        }
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_first_acquire_never_blocks() {
        let (queue, gpu) = MockQueue::manual();
        let mut arena = ResourceLifetimeArena::new("fresh", queue, 2)
            .unwrap()
            .with_wait_timeout(1_000_000);

        // Fresh tokens are pre-signaled, nothing has completed on the device
        assert_eq!(arena.acquire().unwrap(), 0);
        assert_eq!(arena.acquire().unwrap(), 1);
        assert_eq!(gpu.pending(), 0);
    }

    #[test]
    fn test_reused_slot_waits_for_completion() {
        let (queue, gpu) = MockQueue::manual();
        let mut arena = ResourceLifetimeArena::new("blocking", queue, 1).unwrap();

        let slot = arena.acquire().unwrap();
        arena.release(slot).unwrap();
        assert_eq!(arena.in_flight().unwrap(), 1);

        let completed = Arc::new(AtomicBool::new(false));
        let worker = {
            let gpu = gpu.clone();
            let completed = Arc::clone(&completed);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                completed.store(true, Ordering::SeqCst);
                gpu.complete_all();
            })
        };

        assert_eq!(arena.acquire().unwrap(), 0);
        assert!(completed.load(Ordering::SeqCst));
        worker.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_surfaces_error() {
        let (queue, _gpu) = MockQueue::manual();
        let mut arena = ResourceLifetimeArena::new("timeout", queue, 1)
            .unwrap()
            .with_wait_timeout(5_000_000);

        let slot = arena.acquire().unwrap();
        arena.release(slot).unwrap();
        assert!(matches!(
            arena.acquire(),
            Err(VulkanError::WaitTimeout { timeout_ns: 5_000_000 })
        ));
    }

    #[test]
    fn test_in_flight_never_exceeds_slot_count() {
        const SLOTS: usize = 3;
        let (queue, gpu) = MockQueue::manual();
        let max_pending = queue.max_pending_handle();
        let mut arena = ResourceLifetimeArena::new("bounded", queue, SLOTS).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let device = {
            let gpu = gpu.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    gpu.complete_next();
                    thread::sleep(Duration::from_micros(300));
                }
                gpu.complete_all();
            })
        };

        for _ in 0..64 {
            let slot = arena.acquire().unwrap();
            arena.release(slot).unwrap();
            assert!(arena.in_flight().unwrap() <= SLOTS);
        }
        stop.store(true, Ordering::SeqCst);
        device.join().unwrap();
        arena.teardown().unwrap();

        let observed = max_pending.load(Ordering::SeqCst);
        assert!(observed >= 1);
        assert!(observed <= SLOTS, "{observed} submissions in flight");
    }

    #[test]
    fn test_teardown_waits_before_destroying() {
        let (queue, gpu) = MockQueue::manual();
        let log = queue.log();
        let mut arena = ResourceLifetimeArena::new("ordering", queue, 2).unwrap();
        arena.bind_resource(10_u32).unwrap();
        arena.bind_resource(11_u32).unwrap();

        for _ in 0..2 {
            let slot = arena.acquire().unwrap();
            arena.release(slot).unwrap();
        }

        let device = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            gpu.complete_all();
        });
        arena.teardown().unwrap();
        device.join().unwrap();

        let events = log.events();
        let last_complete = events
            .iter()
            .rposition(|e| matches!(e, QueueEvent::Complete(_)))
            .unwrap();
        let first_destroy = events
            .iter()
            .position(|e| matches!(e, QueueEvent::DestroyResource(_) | QueueEvent::DestroySlot(_)))
            .unwrap();
        assert!(last_complete < first_destroy);

        let destroyed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::DestroyResource(_) | QueueEvent::DestroySlot(_)))
            .cloned()
            .collect();
        assert_eq!(
            destroyed,
            vec![
                QueueEvent::DestroyResource(10),
                QueueEvent::DestroyResource(11),
                QueueEvent::DestroySlot(0),
                QueueEvent::DestroySlot(1),
            ]
        );
    }

    #[test]
    fn test_failed_submit_does_not_strand_teardown() {
        crate::foundation::logging::init_for_tests();
        let (mut queue, gpu) = MockQueue::manual();
        queue.fail_next_submit_with(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        let log = queue.log();
        let mut arena = ResourceLifetimeArena::new("stranded", queue, 1).unwrap();
        arena.bind_resource(4_u32).unwrap();

        let slot = arena.acquire().unwrap();
        assert!(matches!(
            arena.release(slot),
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert_eq!(arena.in_flight().unwrap(), 0);

        // The slot goes back into the ring and submits normally next time
        let slot = arena.acquire().unwrap();
        arena.release(slot).unwrap();
        assert_eq!(arena.in_flight().unwrap(), 1);
        gpu.complete_all();

        arena.teardown().unwrap();
        assert!(log.events().contains(&QueueEvent::DestroyResource(4)));
    }

    #[test]
    fn test_failed_submit_then_teardown_returns() {
        let (mut queue, _gpu) = MockQueue::manual();
        queue.fail_next_submit_with(VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        let mut arena = ResourceLifetimeArena::new("abandoned", queue, 2).unwrap();

        let slot = arena.acquire().unwrap();
        assert!(arena.release(slot).is_err());

        // Nothing reached the device, so the default unbounded wait must not block
        arena.teardown().unwrap();
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (queue, _gpu) = MockQueue::immediate();
        let log = queue.log();
        let mut arena = ResourceLifetimeArena::new("twice", queue, 1).unwrap();
        arena.bind_resource(1_u32).unwrap();

        arena.teardown().unwrap();
        arena.teardown().unwrap();
        drop(arena);

        let destroys = log
            .events()
            .iter()
            .filter(|e| matches!(e, QueueEvent::DestroyResource(_)))
            .count();
        assert_eq!(destroys, 1);
    }

    #[test]
    fn test_drop_runs_teardown() {
        let (queue, _gpu) = MockQueue::immediate();
        let log = queue.log();
        {
            let mut arena = ResourceLifetimeArena::new("dropped", queue, 1).unwrap();
            arena.bind_resource(7_u32).unwrap();
        }
        assert!(log.events().contains(&QueueEvent::DestroyResource(7)));
    }

    #[test]
    fn test_zero_slot_arena_is_a_tracking_bag() {
        let (queue, _gpu) = MockQueue::immediate();
        let log = queue.log();
        let mut arena = ResourceLifetimeArena::new("bag", queue, 0).unwrap();

        assert!(matches!(arena.acquire(), Err(VulkanError::InvalidOperation { .. })));
        let id = arena.bind_resource(3_u32).unwrap();
        assert_eq!(arena.resource(id), Some(&3));
        assert_eq!(arena.in_flight().unwrap(), 0);

        arena.teardown().unwrap();
        assert!(log.events().contains(&QueueEvent::DestroyResource(3)));
    }

    #[test]
    fn test_resource_capacity_doubles() {
        let (queue, _gpu) = MockQueue::immediate();
        let mut arena = ResourceLifetimeArena::new("growth", queue, 0).unwrap();
        assert_eq!(arena.resource_capacity(), 1);

        let mut capacities = Vec::new();
        for i in 0..9_u32 {
            arena.bind_resource(i).unwrap();
            capacities.push(arena.resource_capacity());
        }
        assert_eq!(capacities, vec![1, 2, 4, 4, 8, 8, 8, 8, 16]);
        assert_eq!(arena.resource_count(), 9);
    }

    #[test]
    fn test_release_requires_acquire() {
        let (queue, _gpu) = MockQueue::immediate();
        let mut arena = ResourceLifetimeArena::new("misuse", queue, 2).unwrap();

        assert!(matches!(arena.release(0), Err(VulkanError::InvalidOperation { .. })));
        assert!(matches!(arena.release(5), Err(VulkanError::InvalidOperation { .. })));
        assert!(arena.recording(1).is_err());

        let slot = arena.acquire().unwrap();
        assert_eq!(arena.recording(slot).unwrap(), slot);
        arena.release(slot).unwrap();
        assert!(arena.release(slot).is_err());
    }

    #[test]
    fn test_wrapping_onto_open_slot_discards_its_recording() {
        crate::foundation::logging::init_for_tests();
        let (queue, _gpu) = MockQueue::immediate();
        let log = queue.log();
        let mut arena = ResourceLifetimeArena::new("wrap", queue, 1).unwrap();

        assert_eq!(arena.acquire().unwrap(), 0);
        assert_eq!(arena.acquire().unwrap(), 0);
        arena.release(0).unwrap();

        let events = log.events();
        let resets = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::ResetRecording(0)))
            .count();
        assert_eq!(resets, 2);
        assert_eq!(events.iter().filter(|e| matches!(e, QueueEvent::Submit(_))).count(), 1);
    }

    #[test]
    fn test_torn_down_arena_rejects_work() {
        let (queue, _gpu) = MockQueue::immediate();
        let mut arena = ResourceLifetimeArena::new("closed", queue, 1).unwrap();
        arena.teardown().unwrap();

        assert!(arena.acquire().is_err());
        assert!(arena.bind_resource(1_u32).is_err());
        assert!(arena.queue().is_none());
    }
}

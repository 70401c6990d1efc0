//! Buffers and device memory
//!
//! Each buffer gets its own allocation. Device-local data goes through a
//! host-visible staging buffer that is owned by the loading arena until the
//! copy has completed.

use ash::{vk, Device};
use bytemuck::Pod;

use super::commands::CommandRecorder;
use super::context::VulkanContext;
use super::queue::VulkanArena;
use super::{VulkanError, VulkanResult};

/// Host-visible and coherent, for CPU-written data
pub const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a buffer backed by a dedicated allocation
    pub fn new(
        context: &VulkanContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = match allocate(context, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        unsafe {
            if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
                return Err(VulkanError::Api(e));
            }
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
        })
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write<T: Pod>(&self, data: &[T]) -> VulkanResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::invalid(format!(
                "write of {} bytes into a {}-byte buffer",
                bytes.len(),
                self.size
            )));
        }
        if bytes.is_empty() {
            return Ok(());
        }

        unsafe {
            let mapped = self
                .device
                .map_memory(self.memory, 0, bytes.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Allocate memory satisfying `requirements` with the given properties
pub fn allocate(
    context: &VulkanContext,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        &context.physical_device().memory_properties,
        requirements.memory_type_bits,
        properties,
    )?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { context.device().allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
}

/// Index of the first memory type allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Host-visible buffer filled with `bytes`
pub fn staging_buffer(context: &VulkanContext, bytes: &[u8]) -> VulkanResult<Buffer> {
    let staging = Buffer::new(
        context,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        HOST_MEMORY,
    )?;
    staging.write(bytes)?;
    Ok(staging)
}

/// Device-local buffer initialized with `bytes`.
///
/// The copy is recorded on a `loading` slot, and the staging buffer is bound
/// to `loading`, so it lives until that arena is torn down.
pub fn upload_buffer(
    context: &VulkanContext,
    loading: &mut VulkanArena,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> VulkanResult<Buffer> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = staging_buffer(context, bytes)?;
    let buffer = Buffer::new(
        context,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let slot = loading.acquire()?;
    let mut recorder = CommandRecorder::new(context.device(), loading.recording(slot)?);
    recorder.copy_buffer(staging.handle(), buffer.handle(), size);
    loading.bind_resource(staging)?;
    loading.release(slot)?;

    log::debug!("Uploading {size} bytes to device-local buffer");
    Ok(buffer)
}

// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images and their backing memory.
use crate::error::{FatalDeviceError, VkResultExt};
use crate::layout::COLOR_RANGE;
use ash::vk;

pub fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, FatalDeviceError> {
    (0..mem.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && mem.memory_types[i as usize].property_flags.contains(required)
        })
        .ok_or(FatalDeviceError::NoMemoryType {
            type_bits,
            required,
        })
}

unsafe fn allocate(
    device: &ash::Device,
    mem: &vk::PhysicalDeviceMemoryProperties,
    req: vk::MemoryRequirements,
    props: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory, FatalDeviceError> {
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: find_memory_type(mem, req.memory_type_bits, props)?,
        ..Default::default()
    };
    unsafe { device.allocate_memory(&mai, None) }.or_fatal("vkAllocateMemory")
}

/// # Safety
/// `mem` must describe the physical device `device` was created from.
pub unsafe fn create_buffer_and_memory(
    device: &ash::Device,
    mem: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory), FatalDeviceError> {
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    unsafe {
        let buf = device.create_buffer(&bci, None).or_fatal("vkCreateBuffer")?;
        let req = device.get_buffer_memory_requirements(buf);
        let memory = match allocate(device, mem, req, props) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_buffer(buf, None);
                return Err(e);
            }
        };
        device
            .bind_buffer_memory(buf, memory, 0)
            .or_fatal("vkBindBufferMemory")?;
        Ok((buf, memory))
    }
}

/// Host-visible, coherent buffer mapped for its whole lifetime.
pub struct MappedBuffer {
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    ptr: *mut u8,
    size: usize,
}

impl MappedBuffer {
    /// # Safety
    /// See [`create_buffer_and_memory`].
    pub unsafe fn new(
        device: &ash::Device,
        mem: &vk::PhysicalDeviceMemoryProperties,
        size: usize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, FatalDeviceError> {
        unsafe {
            let (buffer, memory) = create_buffer_and_memory(
                device,
                mem,
                size as vk::DeviceSize,
                usage,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            let ptr = device
                .map_memory(memory, 0, size as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .or_fatal("vkMapMemory")?;
            Ok(Self {
                buffer,
                memory,
                ptr: ptr.cast(),
                size,
            })
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Copies `bytes` to the start of the buffer; longer input is truncated.
    ///
    /// # Safety
    /// The GPU must not be reading the buffer.
    pub unsafe fn write(&self, bytes: &[u8]) {
        let len = bytes.len().min(self.size);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr, len) };
    }

    /// # Safety
    /// No pending GPU work may reference the buffer.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.unmap_memory(self.memory);
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Device-local 2D color image with one view.
pub struct ImageAlloc {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl ImageAlloc {
    /// # Safety
    /// See [`create_buffer_and_memory`].
    pub unsafe fn new(
        device: &ash::Device,
        mem: &vk::PhysicalDeviceMemoryProperties,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self, FatalDeviceError> {
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        unsafe {
            let image = device.create_image(&ici, None).or_fatal("vkCreateImage")?;
            let req = device.get_image_memory_requirements(image);
            let memory = match allocate(device, mem, req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
                Ok(m) => m,
                Err(e) => {
                    device.destroy_image(image, None);
                    return Err(e);
                }
            };
            device
                .bind_image_memory(image, memory, 0)
                .or_fatal("vkBindImageMemory")?;

            let view_ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                subresource_range: COLOR_RANGE,
                ..Default::default()
            };
            let view = device
                .create_image_view(&view_ci, None)
                .or_fatal("vkCreateImageView")?;
            Ok(Self {
                image,
                memory,
                view,
            })
        }
    }

    /// # Safety
    /// No pending GPU work may reference the image.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Records `record` into a throwaway command buffer, submits it and waits
/// for the queue to drain.
///
/// # Safety
/// `pool` must belong to `queue`'s family on `device`.
pub unsafe fn one_shot<F>(
    device: &ash::Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    record: F,
) -> Result<(), FatalDeviceError>
where
    F: FnOnce(vk::CommandBuffer) -> Result<(), FatalDeviceError>,
{
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    unsafe {
        let cmd = device
            .allocate_command_buffers(&ai)
            .or_fatal("vkAllocateCommandBuffers")?[0];
        let result = (|| {
            device
                .begin_command_buffer(cmd, &bi)
                .or_fatal("vkBeginCommandBuffer")?;
            record(cmd)?;
            device
                .end_command_buffer(cmd)
                .or_fatal("vkEndCommandBuffer")?;
            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            device
                .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
                .or_fatal("vkQueueSubmit")?;
            device.queue_wait_idle(queue).or_fatal("vkQueueWaitIdle")
        })();
        device.free_command_buffers(pool, std::slice::from_ref(&cmd));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in p.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        p
    }

    #[test]
    fn picks_first_allowed_type_with_all_flags() {
        use vk::MemoryPropertyFlags as M;
        let p = props(&[
            M::DEVICE_LOCAL,
            M::HOST_VISIBLE,
            M::HOST_VISIBLE | M::HOST_COHERENT,
            M::HOST_VISIBLE | M::HOST_COHERENT | M::HOST_CACHED,
        ]);
        let host = M::HOST_VISIBLE | M::HOST_COHERENT;
        assert_eq!(find_memory_type(&p, 0b1111, host).unwrap(), 2);
        assert_eq!(find_memory_type(&p, 0b1000, host).unwrap(), 3);
        assert_eq!(find_memory_type(&p, 0b0001, M::DEVICE_LOCAL).unwrap(), 0);
    }

    #[test]
    fn no_matching_type_is_an_error() {
        use vk::MemoryPropertyFlags as M;
        let p = props(&[M::DEVICE_LOCAL, M::HOST_VISIBLE]);
        assert!(matches!(
            find_memory_type(&p, 0b01, M::HOST_VISIBLE),
            Err(FatalDeviceError::NoMemoryType { type_bits: 0b01, .. })
        ));
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Frame slots and the frame counter that drives them.
use crate::alloc::MappedBuffer;
use crate::error::{FatalDeviceError, VkResultExt};
use ash::vk;
use thiserror::Error;

pub const FRAMES_IN_FLIGHT: usize = 2;

/// Monotonic frame counter. Picks the slot to record into and which half of
/// the feedback pair is written versus sampled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCursor {
    index: u64,
}

impl FrameCursor {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn slot(&self) -> usize {
        (self.index % FRAMES_IN_FLIGHT as u64) as usize
    }

    /// Feedback buffer rendered into this frame.
    pub fn write(&self) -> usize {
        (self.index % 2) as usize
    }

    /// Feedback buffer sampled as `iChannel1` this frame.
    pub fn read(&self) -> usize {
        1 - self.write()
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("frame slot {slot} is still in flight with frame {frame}")]
pub struct SlotInFlight {
    pub slot: usize,
    pub frame: u64,
}

/// CPU-side record of which slots have work the GPU may still be running.
/// A slot is only claimed again after its fence has been waited on.
#[derive(Clone, Copy, Debug, Default)]
pub struct SlotLedger {
    in_flight: [Option<u64>; FRAMES_IN_FLIGHT],
}

impl SlotLedger {
    /// The slot's fence has signaled.
    pub fn retire(&mut self, slot: usize) {
        self.in_flight[slot] = None;
    }

    pub fn claim(&mut self, slot: usize, frame: u64) -> Result<(), SlotInFlight> {
        if let Some(frame) = self.in_flight[slot] {
            return Err(SlotInFlight { slot, frame });
        }
        self.in_flight[slot] = Some(frame);
        Ok(())
    }

    /// Claims `slot` for `frame`, then runs `submit`, which resets the
    /// slot's fence and queues the recorded work. Nothing runs when the
    /// slot is still claimed, so a fence is only ever reset on its way into
    /// a submission.
    pub fn submit<E: From<SlotInFlight>>(
        &mut self,
        slot: usize,
        frame: u64,
        submit: impl FnOnce() -> Result<(), E>,
    ) -> Result<(), E> {
        self.claim(slot, frame)?;
        submit()
    }

    pub fn in_flight(&self, slot: usize) -> Option<u64> {
        self.in_flight[slot]
    }
}

pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub uniforms: MappedBuffer,
    /// Reallocated whenever the pipeline's set layout changes.
    pub descriptor_set: vk::DescriptorSet,
}

impl FrameSlot {
    /// # Safety
    /// `pool` must have been created on `device` with resettable buffers.
    pub unsafe fn new(
        device: &ash::Device,
        pool: vk::CommandPool,
        uniforms: MappedBuffer,
    ) -> Result<Self, FatalDeviceError> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on a fresh slot returns at once.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        unsafe {
            let cmd = device
                .allocate_command_buffers(&alloc_info)
                .or_fatal("vkAllocateCommandBuffers")?[0];
            Ok(Self {
                cmd,
                image_available: device
                    .create_semaphore(&sem_ci, None)
                    .or_fatal("vkCreateSemaphore")?,
                in_flight: device
                    .create_fence(&fence_ci, None)
                    .or_fatal("vkCreateFence")?,
                uniforms,
                descriptor_set: vk::DescriptorSet::null(),
            })
        }
    }

    /// # Safety
    /// The slot's fence must have signaled.
    pub unsafe fn destroy(&self, device: &ash::Device, pool: vk::CommandPool) {
        unsafe {
            device.free_command_buffers(pool, std::slice::from_ref(&self.cmd));
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight, None);
            self.uniforms.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_alternates_and_never_aliases() {
        let mut c = FrameCursor::default();
        for n in 0..6u64 {
            assert_eq!(c.index(), n);
            assert_eq!(c.write(), (n % 2) as usize);
            assert_eq!(c.read(), 1 - (n % 2) as usize);
            assert_ne!(c.read(), c.write());
            c.advance();
        }
    }

    #[test]
    fn last_frame_output_is_next_frame_input() {
        let mut c = FrameCursor::default();
        let written = c.write();
        c.advance();
        assert_eq!(c.read(), written);
    }

    #[test]
    fn slots_rotate_through_two() {
        let mut c = FrameCursor::default();
        let slots: Vec<_> = (0..5)
            .map(|_| {
                let s = c.slot();
                c.advance();
                s
            })
            .collect();
        assert_eq!(slots, [0, 1, 0, 1, 0]);
    }

    #[test]
    fn slot_is_reused_only_after_its_fence() {
        let mut ledger = SlotLedger::default();
        ledger.claim(0, 0).unwrap();
        ledger.claim(1, 1).unwrap();
        assert_eq!(
            ledger.claim(0, 2),
            Err(SlotInFlight { slot: 0, frame: 0 })
        );
        ledger.retire(0);
        ledger.claim(0, 2).unwrap();
        assert_eq!(ledger.in_flight(0), Some(2));
        assert_eq!(ledger.in_flight(1), Some(1));
    }

    #[test]
    fn skipped_frame_leaves_slot_free() {
        // Fence waited, acquire came back out of date: nothing was claimed.
        let mut ledger = SlotLedger::default();
        ledger.claim(0, 0).unwrap();
        ledger.retire(0);
        assert_eq!(ledger.in_flight(0), None);
        ledger.claim(0, 2).unwrap();
        assert_eq!(ledger.in_flight(0), Some(2));
    }

    #[test]
    fn fence_reset_only_runs_on_the_submit_path() {
        let mut ledger = SlotLedger::default();
        let mut resets = 0;

        // Recording failed: the frame never reaches `submit`, the slot stays
        // free and its fence stays signaled for teardown.
        ledger.retire(0);
        assert_eq!(ledger.in_flight(0), None);

        ledger
            .submit(0, 0, || {
                resets += 1;
                Ok::<(), SlotInFlight>(())
            })
            .unwrap();
        assert_eq!((resets, ledger.in_flight(0)), (1, Some(0)));

        // Slot still claimed: the fence must not be touched.
        let err = ledger.submit(0, 2, || {
            resets += 1;
            Ok::<(), SlotInFlight>(())
        });
        assert_eq!(err, Err(SlotInFlight { slot: 0, frame: 0 }));
        assert_eq!(resets, 1);
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Image layout tracking.
//!
//! Every image the engine touches carries the layout it will be in when the
//! next recorded command executes. Layouts only change through [`Transition`],
//! which owns the access and stage masks for each allowed move. The tracked
//! layout is never read back from the GPU.
use crate::error::UnsupportedLayoutTransition;
use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageState {
    Undefined,
    TransferDst,
    TransferSrc,
    ShaderRead,
    ColorAttachment,
    PresentSrc,
}

impl ImageState {
    pub const fn layout(self) -> vk::ImageLayout {
        match self {
            ImageState::Undefined => vk::ImageLayout::UNDEFINED,
            ImageState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageState::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageState::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageState::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The allowed layout moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    UndefinedToTransferDst,
    UndefinedToShaderRead,
    TransferDstToShaderRead,
    ShaderReadToColorAttachment,
    ColorAttachmentToShaderRead,
    ShaderReadToTransferSrc,
    TransferSrcToShaderRead,
    TransferDstToPresentSrc,
}

impl Transition {
    pub const ALL: [Transition; 8] = [
        Transition::UndefinedToTransferDst,
        Transition::UndefinedToShaderRead,
        Transition::TransferDstToShaderRead,
        Transition::ShaderReadToColorAttachment,
        Transition::ColorAttachmentToShaderRead,
        Transition::ShaderReadToTransferSrc,
        Transition::TransferSrcToShaderRead,
        Transition::TransferDstToPresentSrc,
    ];

    pub fn between(from: ImageState, to: ImageState) -> Result<Self, UnsupportedLayoutTransition> {
        use ImageState as S;
        Ok(match (from, to) {
            (S::Undefined, S::TransferDst) => Transition::UndefinedToTransferDst,
            (S::Undefined, S::ShaderRead) => Transition::UndefinedToShaderRead,
            (S::TransferDst, S::ShaderRead) => Transition::TransferDstToShaderRead,
            (S::ShaderRead, S::ColorAttachment) => Transition::ShaderReadToColorAttachment,
            (S::ColorAttachment, S::ShaderRead) => Transition::ColorAttachmentToShaderRead,
            (S::ShaderRead, S::TransferSrc) => Transition::ShaderReadToTransferSrc,
            (S::TransferSrc, S::ShaderRead) => Transition::TransferSrcToShaderRead,
            (S::TransferDst, S::PresentSrc) => Transition::TransferDstToPresentSrc,
            _ => return Err(UnsupportedLayoutTransition { from, to }),
        })
    }

    pub const fn old_state(self) -> ImageState {
        match self {
            Transition::UndefinedToTransferDst | Transition::UndefinedToShaderRead => {
                ImageState::Undefined
            }
            Transition::TransferDstToShaderRead | Transition::TransferDstToPresentSrc => {
                ImageState::TransferDst
            }
            Transition::ShaderReadToColorAttachment | Transition::ShaderReadToTransferSrc => {
                ImageState::ShaderRead
            }
            Transition::ColorAttachmentToShaderRead => ImageState::ColorAttachment,
            Transition::TransferSrcToShaderRead => ImageState::TransferSrc,
        }
    }

    pub const fn new_state(self) -> ImageState {
        match self {
            Transition::UndefinedToTransferDst => ImageState::TransferDst,
            Transition::UndefinedToShaderRead
            | Transition::TransferDstToShaderRead
            | Transition::ColorAttachmentToShaderRead
            | Transition::TransferSrcToShaderRead => ImageState::ShaderRead,
            Transition::ShaderReadToColorAttachment => ImageState::ColorAttachment,
            Transition::ShaderReadToTransferSrc => ImageState::TransferSrc,
            Transition::TransferDstToPresentSrc => ImageState::PresentSrc,
        }
    }

    pub fn masks(self) -> BarrierMasks {
        use vk::AccessFlags as A;
        use vk::PipelineStageFlags as P;
        let (src_access, dst_access, src_stage, dst_stage) = match self {
            // Source stage chains with the acquire semaphore wait.
            Transition::UndefinedToTransferDst => (
                A::empty(),
                A::TRANSFER_WRITE,
                P::COLOR_ATTACHMENT_OUTPUT,
                P::TRANSFER,
            ),
            Transition::UndefinedToShaderRead => (
                A::empty(),
                A::SHADER_READ,
                P::TOP_OF_PIPE,
                P::FRAGMENT_SHADER,
            ),
            Transition::TransferDstToShaderRead => (
                A::TRANSFER_WRITE,
                A::SHADER_READ,
                P::TRANSFER,
                P::FRAGMENT_SHADER,
            ),
            Transition::ShaderReadToColorAttachment => (
                A::SHADER_READ,
                A::COLOR_ATTACHMENT_WRITE,
                P::FRAGMENT_SHADER,
                P::COLOR_ATTACHMENT_OUTPUT,
            ),
            Transition::ColorAttachmentToShaderRead => (
                A::COLOR_ATTACHMENT_WRITE,
                A::SHADER_READ,
                P::COLOR_ATTACHMENT_OUTPUT,
                P::FRAGMENT_SHADER,
            ),
            Transition::ShaderReadToTransferSrc => (
                A::SHADER_READ,
                A::TRANSFER_READ,
                P::FRAGMENT_SHADER,
                P::TRANSFER,
            ),
            Transition::TransferSrcToShaderRead => (
                A::TRANSFER_READ,
                A::SHADER_READ,
                P::TRANSFER,
                P::FRAGMENT_SHADER,
            ),
            Transition::TransferDstToPresentSrc => (
                A::TRANSFER_WRITE,
                A::empty(),
                P::TRANSFER,
                P::BOTTOM_OF_PIPE,
            ),
        };
        BarrierMasks {
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        }
    }
}

/// A single-mip, single-layer color image and the layout it is tracked in.
#[derive(Clone, Copy, Debug)]
pub struct TrackedImage {
    image: vk::Image,
    state: ImageState,
}

impl TrackedImage {
    pub fn new(image: vk::Image, state: ImageState) -> Self {
        Self { image, state }
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    /// Drops the contents: the next transition starts from `Undefined`.
    pub fn discard(&mut self) {
        self.state = ImageState::Undefined;
    }

    /// Plans the move to `to`. The tracked state advances only when a
    /// barrier exists for the pair.
    pub fn transition(
        &mut self,
        to: ImageState,
    ) -> Result<(Transition, vk::ImageMemoryBarrier<'static>), UnsupportedLayoutTransition> {
        let t = Transition::between(self.state, to)?;
        let m = t.masks();
        let barrier = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: m.src_access,
            dst_access_mask: m.dst_access,
            old_layout: t.old_state().layout(),
            new_layout: t.new_state().layout(),
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: self.image,
            subresource_range: COLOR_RANGE,
            ..Default::default()
        };
        self.state = to;
        Ok((t, barrier))
    }
}

pub const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Records the barrier moving `image` to `to`.
///
/// # Safety
/// `cmd` must be in the recording state on `device`.
pub unsafe fn record_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: &mut TrackedImage,
    to: ImageState,
) -> Result<(), UnsupportedLayoutTransition> {
    let (t, barrier) = image.transition(to)?;
    let m = t.masks();
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            m.src_stage,
            m.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
    }
    Ok(())
}

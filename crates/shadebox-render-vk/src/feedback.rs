// SPDX-License-Identifier: CEPL-1.0
//! The double-buffered feedback canvas and the render pass that draws into it.
use crate::alloc::{one_shot, ImageAlloc};
use crate::device::DeviceContext;
use crate::error::{FatalDeviceError, VkResultExt};
use crate::layout::{record_transition, ImageState, TrackedImage};
use ash::vk;

pub const FEEDBACK_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Single color attachment whose layout is COLOR_ATTACHMENT_OPTIMAL on both
/// ends, so the pass itself never changes layouts.
///
/// # Safety
/// `device` must be a live device.
pub unsafe fn create_render_pass(device: &ash::Device) -> Result<vk::RenderPass, FatalDeviceError> {
    let attachment = vk::AttachmentDescription {
        format: FEEDBACK_FORMAT,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &attachment,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&ci, None) }.or_fatal("vkCreateRenderPass")
}

pub struct FeedbackImage {
    pub alloc: ImageAlloc,
    pub tracked: TrackedImage,
    pub framebuffer: vk::Framebuffer,
}

/// `feedback[0]` and `feedback[1]`, sized to the swapchain. Lives and dies
/// with the swapchain it was created for.
pub struct FeedbackPair {
    pub images: [FeedbackImage; 2],
    pub sampler: vk::Sampler,
}

impl FeedbackPair {
    /// Creates both images and leaves them in `ShaderRead`, ready to be
    /// sampled by the first frame.
    ///
    /// # Safety
    /// `render_pass` must come from [`create_render_pass`] on `ctx.device`.
    pub unsafe fn new(
        ctx: &DeviceContext,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> Result<Self, FatalDeviceError> {
        let device = &ctx.device;
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;

        let make = || -> Result<FeedbackImage, FatalDeviceError> {
            unsafe {
                let alloc = ImageAlloc::new(device, &ctx.mem_props, extent, FEEDBACK_FORMAT, usage)?;
                let fb_ci = vk::FramebufferCreateInfo {
                    s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                    render_pass,
                    attachment_count: 1,
                    p_attachments: &alloc.view,
                    width: extent.width,
                    height: extent.height,
                    layers: 1,
                    ..Default::default()
                };
                let framebuffer = device
                    .create_framebuffer(&fb_ci, None)
                    .or_fatal("vkCreateFramebuffer")?;
                Ok(FeedbackImage {
                    tracked: TrackedImage::new(alloc.image, ImageState::Undefined),
                    alloc,
                    framebuffer,
                })
            }
        };
        let mut images = [make()?, make()?];

        let sampler_ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ..Default::default()
        };
        let sampler = unsafe { device.create_sampler(&sampler_ci, None) }
            .or_fatal("vkCreateSampler")?;

        unsafe {
            one_shot(device, ctx.queue, ctx.cmd_pool, |cmd| {
                for img in images.iter_mut() {
                    record_transition(device, cmd, &mut img.tracked, ImageState::ShaderRead)?;
                }
                Ok(())
            })?;
        }

        Ok(Self { images, sampler })
    }

    pub fn view(&self, i: usize) -> vk::ImageView {
        self.images[i].alloc.view
    }

    /// # Safety
    /// No pending GPU work may reference either image.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.sampler, None);
            for img in &self.images {
                device.destroy_framebuffer(img.framebuffer, None);
                img.alloc.destroy(device);
            }
        }
    }
}

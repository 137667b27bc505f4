// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan frame engine: one full-screen fragment pass into a ping-pong
//! feedback pair, blitted to the swapchain every frame.
use anyhow::{Context, Result};
use ash::khr::swapchain as khr_swapchain;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use shadebox_render::spirv::SpirvModule;
use shadebox_render::{
    InstallError, PipelineRebuildError, ProgramSink, RenderSize, Renderer, ShaderProgram,
    UniformBlock, UniformState,
};
use std::time::Instant;
use tracing::info;

mod alloc;
mod device;
pub mod error;
mod feedback;
pub mod frame;
pub mod layout;
pub mod pipeline;
mod swapchain;
mod texture;

use crate::alloc::MappedBuffer;
use crate::device::DeviceContext;
use crate::error::VkResultExt;
use crate::feedback::{create_render_pass, FeedbackPair};
use crate::frame::{FrameCursor, FrameSlot, SlotLedger, FRAMES_IN_FLIGHT};
use crate::layout::{record_transition, ImageState};
use crate::pipeline::{Active, Pipeline, QUAD_VERTICES};
use crate::swapchain::Swapchain;
use crate::texture::StaticTexture;

pub use crate::error::{FatalDeviceError, PipelineBuildError, UnsupportedLayoutTransition};

const BUILTIN_VERTEX: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/fullscreen.vert.spv"));

const CLEAR: vk::ClearValue = vk::ClearValue {
    color: vk::ClearColorValue {
        float32: [0.0, 0.0, 0.0, 1.0],
    },
};

pub struct VkRenderer {
    ctx: DeviceContext,
    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    feedback: FeedbackPair,
    pipeline: Active<Pipeline>,
    builtin_vertex: SpirvModule,
    texture: StaticTexture,

    desc_pool: vk::DescriptorPool,
    slots: Vec<FrameSlot>,
    ledger: SlotLedger,
    cursor: FrameCursor,

    /// Last non-empty surface size, used when the swapchain is rebuilt.
    surface_size: RenderSize,
    paused: bool,
    start: Instant,
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle(); a fence reset by a failed frame never signals, so
//   slot fences are not waited individually
// - Frame slots (command buffers, semaphores, fences, mapped UBOs), then
//   the descriptor pool their sets came from
// - Pipeline, static texture, feedback pair, render pass
// - Swapchain BEFORE device
// - Command pool, device, surface, messenger, instance (DeviceContext)
impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;

            // 1) QUIESCE DEVICE
            d.device_wait_idle().ok();

            // 2) FRAME SLOTS, THEN THE POOL THEIR SETS CAME FROM
            for s in &self.slots {
                s.destroy(d, self.ctx.cmd_pool);
            }
            d.destroy_descriptor_pool(self.desc_pool, None);

            // 3) PIPELINE, TEXTURE, FEEDBACK, RENDER PASS
            self.pipeline.get().destroy(d);
            self.texture.destroy(d);
            self.feedback.destroy(d);
            d.destroy_render_pass(self.render_pass, None);

            // 4) SWAPCHAIN BEFORE DEVICE
            self.swapchain.destroy(d);

            // 5) DEVICE, SURFACE, INSTANCE
            self.ctx.destroy();
        }
    }
}

unsafe fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool, FatalDeviceError> {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: FRAMES_IN_FLIGHT as u32,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 2 * FRAMES_IN_FLIGHT as u32,
        },
    ];
    let pool_ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: FRAMES_IN_FLIGHT as u32,
        pool_size_count: pool_sizes.len() as u32,
        p_pool_sizes: pool_sizes.as_ptr(),
        ..Default::default()
    };
    unsafe { device.create_descriptor_pool(&pool_ci, None) }.or_fatal("vkCreateDescriptorPool")
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    program: &ShaderProgram,
) -> Result<VkRenderer> {
    // 1) Instance, surface, device, queue, command pool
    let ctx = unsafe { DeviceContext::new(window, display) }?;

    // 2) Swapchain
    let loader = khr_swapchain::Device::new(&ctx.instance, &ctx.device);
    let swapchain = unsafe { Swapchain::new(&ctx, loader, size, vk::SwapchainKHR::null()) }?;

    // 3) Render pass + feedback pair (left in ShaderRead)
    let render_pass = unsafe { create_render_pass(&ctx.device) }?;
    let feedback = unsafe { FeedbackPair::new(&ctx, render_pass, swapchain.extent) }?;

    // 4) Pipeline for the initial program
    let builtin_vertex =
        SpirvModule::from_bytes(BUILTIN_VERTEX).context("built-in vertex shader")?;
    let pipeline = unsafe { pipeline::build(&ctx.device, render_pass, program, &builtin_vertex) }
        .with_context(|| format!("pipeline for `{}`", program.name))?;

    // 5) iChannel0
    let texture = unsafe { StaticTexture::load(&ctx, program.texture.as_deref()) }?;

    // 6) Frame slots, each with its own mapped uniform buffer
    let desc_pool = unsafe { create_descriptor_pool(&ctx.device) }?;
    let mut slots = Vec::with_capacity(FRAMES_IN_FLIGHT);
    for _ in 0..FRAMES_IN_FLIGHT {
        let uniforms = unsafe {
            MappedBuffer::new(
                &ctx.device,
                &ctx.mem_props,
                UniformBlock::SIZE,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )
        }?;
        slots.push(unsafe { FrameSlot::new(&ctx.device, ctx.cmd_pool, uniforms) }?);
    }

    let mut renderer = VkRenderer {
        ctx,
        swapchain,
        render_pass,
        feedback,
        pipeline: Active::new(pipeline),
        builtin_vertex,
        texture,
        desc_pool,
        slots,
        ledger: SlotLedger::default(),
        cursor: FrameCursor::default(),
        surface_size: size,
        paused: size.is_empty(),
        start: Instant::now(),
    };

    // 7) Descriptor sets against the pipeline's set layout
    unsafe { renderer.allocate_descriptor_sets() }?;
    Ok(renderer)
}

fn fatal(e: FatalDeviceError) -> InstallError {
    InstallError::Fatal(e.into())
}

impl VkRenderer {
    /// Resets the pool and allocates one set per slot from the active
    /// pipeline's layout. Writes bindings 0 and 1; binding 2 is written
    /// every frame.
    unsafe fn allocate_descriptor_sets(&mut self) -> Result<(), FatalDeviceError> {
        let d = &self.ctx.device;
        let layouts = [self.pipeline.get().set_layout; FRAMES_IN_FLIGHT];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.desc_pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = unsafe {
            d.reset_descriptor_pool(self.desc_pool, vk::DescriptorPoolResetFlags::empty())
                .or_fatal("vkResetDescriptorPool")?;
            d.allocate_descriptor_sets(&alloc)
                .or_fatal("vkAllocateDescriptorSets")?
        };

        let buffer_infos: Vec<_> = self
            .slots
            .iter()
            .map(|s| vk::DescriptorBufferInfo {
                buffer: s.uniforms.buffer,
                offset: 0,
                range: s.uniforms.size() as vk::DeviceSize,
            })
            .collect();
        let texture_info = vk::DescriptorImageInfo {
            sampler: self.texture.sampler,
            image_view: self.texture.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let mut writes = Vec::with_capacity(2 * FRAMES_IN_FLIGHT);
        for (i, &set) in sets.iter().enumerate() {
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &buffer_infos[i],
                ..Default::default()
            });
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 1,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: &texture_info,
                ..Default::default()
            });
        }
        unsafe { d.update_descriptor_sets(&writes, &[]) };

        for (slot, set) in self.slots.iter_mut().zip(sets) {
            slot.descriptor_set = set;
        }
        Ok(())
    }

    /// Points binding 2 of `slot` at `feedback[read]`.
    unsafe fn write_feedback_binding(&self, slot: usize, read: usize) {
        let info = vk::DescriptorImageInfo {
            sampler: self.feedback.sampler,
            image_view: self.feedback.view(read),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: self.slots[slot].descriptor_set,
            dst_binding: 2,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &info,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .update_descriptor_sets(std::slice::from_ref(&write), &[])
        };
    }

    /// Records one frame into `cmd`. The swapchain image must already be
    /// discarded.
    unsafe fn record_frame(
        &mut self,
        cmd: vk::CommandBuffer,
        image_index: usize,
    ) -> Result<(), FatalDeviceError> {
        let d = &self.ctx.device;
        let write = self.cursor.write();
        let extent = self.swapchain.extent;
        let pipeline = self.pipeline.get();
        let set = self.slots[self.cursor.slot()].descriptor_set;
        let target = &mut self.feedback.images[write];
        let swap = &mut self.swapchain.images[image_index];

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        let area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .or_fatal("vkResetCommandBuffer")?;
            d.begin_command_buffer(cmd, &begin)
                .or_fatal("vkBeginCommandBuffer")?;

            // 1) feedback[write]: ShaderRead -> ColorAttachment
            record_transition(d, cmd, &mut target.tracked, ImageState::ColorAttachment)?;

            // 2) full-screen pass into feedback[write], sampling feedback[read]
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.render_pass,
                framebuffer: target.framebuffer,
                render_area: area,
                clear_value_count: 1,
                p_clear_values: &CLEAR,
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle);
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
            d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout,
                0,
                std::slice::from_ref(&set),
                &[],
            );
            d.cmd_draw(cmd, QUAD_VERTICES, 1, 0, 0);
            d.cmd_end_render_pass(cmd);

            // 3) feedback[write]: ColorAttachment -> ShaderRead -> TransferSrc
            record_transition(d, cmd, &mut target.tracked, ImageState::ShaderRead)?;
            record_transition(d, cmd, &mut target.tracked, ImageState::TransferSrc)?;

            // 4) swapchain image: Undefined -> TransferDst, 1:1 blit
            record_transition(d, cmd, swap, ImageState::TransferDst)?;
            let layers = vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            };
            let corner = vk::Offset3D {
                x: extent.width as i32,
                y: extent.height as i32,
                z: 1,
            };
            let blit = vk::ImageBlit {
                src_subresource: layers,
                src_offsets: [vk::Offset3D::default(), corner],
                dst_subresource: layers,
                dst_offsets: [vk::Offset3D::default(), corner],
            };
            d.cmd_blit_image(
                cmd,
                target.tracked.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swap.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&blit),
                vk::Filter::NEAREST,
            );

            // 5) swapchain -> PresentSrc; feedback[write] back to ShaderRead
            record_transition(d, cmd, swap, ImageState::PresentSrc)?;
            record_transition(d, cmd, &mut target.tracked, ImageState::ShaderRead)?;

            d.end_command_buffer(cmd).or_fatal("vkEndCommandBuffer")?;
        }
        Ok(())
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait this slot's fence (unbounded)
    // 2) acquire; OUT_OF_DATE recreates the swapchain and skips the frame
    // 3) uniforms into this slot's buffer, binding 2 -> feedback[read]
    // 4) re-record
    // 5) reset the fence (only once recording succeeded), then submit:
    //    wait image-available, signal the image's render-finished + fence
    // 6) present: wait the image's render-finished
    // 7) advance the frame counter
    unsafe fn render_frame(
        &mut self,
        input: &mut UniformState,
        window: RenderSize,
    ) -> Result<(), FatalDeviceError> {
        let slot = self.cursor.slot();
        let FrameSlot {
            cmd,
            image_available,
            in_flight,
            ..
        } = self.slots[slot];

        // 1) Wait
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[in_flight], true, u64::MAX)
                .or_fatal("vkWaitForFences")?;
        }
        self.ledger.retire(slot);

        // 2) Acquire
        let acquired = unsafe {
            self.swapchain.loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };
        let image_index = match acquired {
            Ok((index, _suboptimal)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                info!("vk: swapchain out of date on acquire, skipping frame");
                return unsafe { self.recreate_swapchain() };
            }
            Err(result) => {
                return Err(FatalDeviceError::Vk {
                    op: "vkAcquireNextImageKHR",
                    result,
                })
            }
        };
        // Contents are fully overwritten by the blit.
        self.swapchain.images[image_index as usize].discard();
        let render_finished = self.swapchain.render_finished(image_index);

        // 3) Uniforms
        let extent = self.swapchain.extent;
        let block = input.snapshot(
            self.start.elapsed().as_secs_f32(),
            RenderSize::new(extent.width, extent.height),
            window,
        );
        unsafe {
            self.slots[slot].uniforms.write(bytemuck::bytes_of(&block));
            self.write_feedback_binding(slot, self.cursor.read());
        }

        // 4) Record
        unsafe { self.record_frame(cmd, image_index as usize) }?;

        // 5) Reset + submit. An unsubmitted frame leaves the fence signaled.
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &render_finished,
            ..Default::default()
        };
        let ctx = &self.ctx;
        self.ledger.submit(slot, self.cursor.index(), || unsafe {
            ctx.device
                .reset_fences(&[in_flight])
                .or_fatal("vkResetFences")?;
            ctx.device
                .queue_submit(ctx.queue, std::slice::from_ref(&submit), in_flight)
                .or_fatal("vkQueueSubmit")
        })?;

        // 6) Present
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        let presented = unsafe {
            self.swapchain
                .loader
                .queue_present(self.ctx.queue, &present)
        };

        // 7) Advance
        self.cursor.advance();

        match presented {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                info!("vk: swapchain suboptimal or out of date on present, recreating");
                unsafe { self.recreate_swapchain() }
            }
            Err(result) => Err(FatalDeviceError::Vk {
                op: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    // STRICT ORDER (recreate):
    // 1) device_wait_idle()
    // 2) NEW swapchain from the old one, then destroy the old one
    // 3) NEW feedback pair at the new extent, then destroy the old pair
    // Each old object stays owned until its replacement exists.
    unsafe fn recreate_swapchain(&mut self) -> Result<(), FatalDeviceError> {
        if self.surface_size.is_empty() {
            return Ok(());
        }

        // 1) Idle
        self.ctx.wait_idle()?;

        // 2) Swapchain
        let loader = self.swapchain.loader.clone();
        let next = unsafe {
            Swapchain::new(&self.ctx, loader, self.surface_size, self.swapchain.handle)
        }?;
        let old = std::mem::replace(&mut self.swapchain, next);
        unsafe { old.destroy(&self.ctx.device) };

        // 3) Feedback pair
        let next = unsafe { FeedbackPair::new(&self.ctx, self.render_pass, self.swapchain.extent) }?;
        let old = std::mem::replace(&mut self.feedback, next);
        unsafe { old.destroy(&self.ctx.device) };

        info!(
            "vk: recreated swapchain at {}x{}",
            self.swapchain.extent.width, self.swapchain.extent.height
        );
        Ok(())
    }

    unsafe fn install_program(&mut self, program: &ShaderProgram) -> Result<(), InstallError> {
        let rejected = |e: PipelineBuildError| -> InstallError {
            if e.is_device_loss() {
                InstallError::Fatal(e.into())
            } else {
                PipelineRebuildError {
                    shader: program.name.clone(),
                    source: Box::new(e),
                }
                .into()
            }
        };

        // 1) Structural checks, no GPU involved
        pipeline::stage_modules(program, &self.builtin_vertex).map_err(rejected)?;

        // 2) Drain the device: the old pipeline and sets may be in use
        self.ctx.wait_idle().map_err(fatal)?;

        // 3) Build the new pipeline; the old one is destroyed only on success
        let d = &self.ctx.device;
        let render_pass = self.render_pass;
        let builtin = &self.builtin_vertex;
        self.pipeline
            .try_replace(
                |_| unsafe { pipeline::build(d, render_pass, program, builtin) },
                |old| unsafe { old.destroy(d) },
            )
            .map_err(rejected)?;

        // 4) iChannel0, if the new shader wants a different image
        if self.texture.source() != program.texture.as_deref() {
            let next = unsafe { StaticTexture::load(&self.ctx, program.texture.as_deref()) }
                .map_err(fatal)?;
            let old = std::mem::replace(&mut self.texture, next);
            unsafe { old.destroy(d) };
        }

        // 5) Sets against the new layout
        unsafe { self.allocate_descriptor_sets() }.map_err(fatal)?;
        info!("vk: installed shader `{}`", program.name);
        Ok(())
    }
}

impl ProgramSink for VkRenderer {
    fn install(&mut self, program: &ShaderProgram) -> Result<(), InstallError> {
        unsafe { self.install_program(program) }
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        program: &ShaderProgram,
    ) -> Result<Self> {
        unsafe { build_renderer(window, display, size, program) }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            if !self.paused {
                info!("vk: resize to 0x0 → paused=true");
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!("vk: resize to {}x{} → paused=false", size.width, size.height);
        }
        self.paused = false;
        self.surface_size = size;
        unsafe { self.recreate_swapchain() }?;
        Ok(())
    }

    fn render(&mut self, input: &mut UniformState, window: RenderSize) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        unsafe { self.render_frame(input, window) }?;
        Ok(())
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! GPU side of `iChannel0`.
use crate::alloc::{create_buffer_and_memory, one_shot, ImageAlloc};
use crate::device::DeviceContext;
use crate::error::{FatalDeviceError, VkResultExt};
use crate::layout::{record_transition, ImageState, TrackedImage};
use ash::vk;
use shadebox_render::TexturePixels;
use std::path::{Path, PathBuf};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Linear filtering, repeat addressing, anisotropic when available.
pub fn sampler_info(max_anisotropy: Option<f32>) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: max_anisotropy.is_some().into(),
        max_anisotropy: max_anisotropy.unwrap_or(1.0),
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        compare_op: vk::CompareOp::ALWAYS,
        ..Default::default()
    }
}

pub struct StaticTexture {
    alloc: ImageAlloc,
    pub sampler: vk::Sampler,
    /// Path the texture was requested from; `None` for the gradient.
    source: Option<PathBuf>,
}

impl StaticTexture {
    /// Uploads `pixels` through a staging buffer and leaves the image in
    /// `ShaderRead`.
    ///
    /// # Safety
    /// `ctx` must be live.
    pub unsafe fn upload(
        ctx: &DeviceContext,
        pixels: &TexturePixels,
        source: Option<&Path>,
    ) -> Result<Self, FatalDeviceError> {
        let device = &ctx.device;
        let extent = vk::Extent2D {
            width: pixels.width,
            height: pixels.height,
        };
        unsafe {
            let alloc = ImageAlloc::new(
                device,
                &ctx.mem_props,
                extent,
                TEXTURE_FORMAT,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            )?;

            // 1) staging buffer (HOST_VISIBLE|COHERENT)
            let size = pixels.rgba.len() as vk::DeviceSize;
            let (staging, staging_mem) = create_buffer_and_memory(
                device,
                &ctx.mem_props,
                size,
                vk::BufferUsageFlags::TRANSFER_SRC,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            let ptr = device
                .map_memory(staging_mem, 0, size, vk::MemoryMapFlags::empty())
                .or_fatal("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(pixels.rgba.as_ptr(), ptr.cast::<u8>(), pixels.rgba.len());
            device.unmap_memory(staging_mem);

            // 2) Undefined -> TransferDst, copy, TransferDst -> ShaderRead
            let mut tracked = TrackedImage::new(alloc.image, ImageState::Undefined);
            let copied = one_shot(device, ctx.queue, ctx.cmd_pool, |cmd| {
                record_transition(device, cmd, &mut tracked, ImageState::TransferDst)?;
                let region = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D::default(),
                    image_extent: vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    },
                };
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging,
                    alloc.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                );
                record_transition(device, cmd, &mut tracked, ImageState::ShaderRead)?;
                Ok(())
            });

            // 3) staging is gone either way
            device.destroy_buffer(staging, None);
            device.free_memory(staging_mem, None);
            if let Err(e) = copied {
                alloc.destroy(device);
                return Err(e);
            }

            let sampler = match device
                .create_sampler(&sampler_info(ctx.max_anisotropy), None)
                .or_fatal("vkCreateSampler")
            {
                Ok(s) => s,
                Err(e) => {
                    alloc.destroy(device);
                    return Err(e);
                }
            };

            Ok(Self {
                alloc,
                sampler,
                source: source.map(Path::to_path_buf),
            })
        }
    }

    /// Decodes `path` (or falls back to the gradient) and uploads the result.
    /// The requested path is remembered even when decoding failed, so a
    /// broken file is not retried on every switch.
    ///
    /// # Safety
    /// `ctx` must be live.
    pub unsafe fn load(ctx: &DeviceContext, path: Option<&Path>) -> Result<Self, FatalDeviceError> {
        let pixels = TexturePixels::load_or_gradient(path);
        unsafe { Self::upload(ctx, &pixels, path) }
    }

    pub fn view(&self) -> vk::ImageView {
        self.alloc.view
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// # Safety
    /// No pending GPU work may reference the texture.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_sampler(self.sampler, None);
            self.alloc.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_repeats_and_enables_anisotropy_when_supported() {
        let on = sampler_info(Some(16.0));
        assert_eq!(on.anisotropy_enable, vk::TRUE);
        assert_eq!(on.max_anisotropy, 16.0);
        assert_eq!(on.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(on.mag_filter, vk::Filter::LINEAR);

        let off = sampler_info(None);
        assert_eq!(off.anisotropy_enable, vk::FALSE);
        assert_eq!(off.max_anisotropy, 1.0);
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain.
//!
//! The engine never renders into swapchain images directly; each frame blits
//! the feedback image in. Images therefore need TRANSFER_DST and no views.
use crate::device::DeviceContext;
use crate::error::{FatalDeviceError, VkResultExt};
use crate::layout::{ImageState, TrackedImage};
use ash::khr::swapchain;
use ash::vk;
use shadebox_render::RenderSize;
use tracing::info;

pub struct Swapchain {
    pub loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<TrackedImage>,
    /// One per image: a present may still hold the semaphore when the
    /// frame slot that signaled it comes round again.
    render_finished: Vec<vk::Semaphore>,
}

fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}

fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// `B8G8R8A8_SRGB` with the sRGB color space when offered, otherwise
/// whatever the driver lists first.
pub fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// The semaphore a submit signals and the present of `image_index` waits on.
/// Keyed by image, never by frame slot.
fn semaphore_for_image(semaphores: &[vk::Semaphore], image_index: u32) -> vk::Semaphore {
    semaphores[image_index as usize]
}

/// One more than the minimum, capped by the maximum (0 means no cap).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

impl Swapchain {
    /// Creates a chain for `size`, retiring `old` if given. The caller
    /// destroys `old` afterwards.
    ///
    /// # Safety
    /// Nothing may be using `old` on the GPU.
    pub unsafe fn new(
        ctx: &DeviceContext,
        loader: swapchain::Device,
        size: RenderSize,
        old: vk::SwapchainKHR,
    ) -> Result<Self, FatalDeviceError> {
        let sl = &ctx.surface_loader;
        let (caps, formats) = unsafe {
            (
                sl.get_physical_device_surface_capabilities(ctx.phys, ctx.surface)
                    .or_fatal("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                sl.get_physical_device_surface_formats(ctx.phys, ctx.surface)
                    .or_fatal("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
            )
        };
        if !caps
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            return Err(FatalDeviceError::NoTransferDst);
        }
        let surf_format = pick_surface_format(&formats).ok_or(FatalDeviceError::Vk {
            op: "vkGetPhysicalDeviceSurfaceFormatsKHR",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;
        // FIFO is the one mode every surface supports.
        let present_mode = vk::PresentModeKHR::FIFO;
        let extent = extent_from_caps(&caps, size);
        let min_count = image_count(&caps);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };
        let (handle, images) = unsafe {
            let handle = loader
                .create_swapchain(&swap_info, None)
                .or_fatal("vkCreateSwapchainKHR")?;
            let images = match loader.get_swapchain_images(handle) {
                Ok(images) => images,
                Err(result) => {
                    loader.destroy_swapchain(handle, None);
                    return Err(FatalDeviceError::Vk {
                        op: "vkGetSwapchainImagesKHR",
                        result,
                    });
                }
            };
            (handle, images)
        };

        let sem_ci = vk::SemaphoreCreateInfo::default();
        let mut render_finished = Vec::with_capacity(images.len());
        for _ in 0..images.len() {
            match unsafe { ctx.device.create_semaphore(&sem_ci, None) } {
                Ok(sem) => render_finished.push(sem),
                Err(result) => {
                    unsafe {
                        for sem in render_finished {
                            ctx.device.destroy_semaphore(sem, None);
                        }
                        loader.destroy_swapchain(handle, None);
                    }
                    return Err(FatalDeviceError::Vk {
                        op: "vkCreateSemaphore",
                        result,
                    });
                }
            }
        }

        info!(
            "vk: swapchain {} / present_mode {}, extent {}x{}, images {}",
            fmt_name(surf_format.format),
            pm_name(present_mode),
            extent.width,
            extent.height,
            images.len()
        );

        Ok(Self {
            loader,
            handle,
            extent,
            images: images
                .into_iter()
                .map(|i| TrackedImage::new(i, ImageState::Undefined))
                .collect(),
            render_finished,
        })
    }

    /// `image_index` comes from a successful acquire on this chain.
    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        semaphore_for_image(&self.render_finished, image_index)
    }

    /// # Safety
    /// Nothing may be using the chain on the GPU.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            for &sem in &self.render_finished {
                device.destroy_semaphore(sem, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_srgb_else_first() {
        let srgb = sf(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let unorm = sf(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let rgba = sf(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let pick = |formats: &[vk::SurfaceFormatKHR]| pick_surface_format(formats).map(|f| f.format);
        assert_eq!(pick(&[unorm, srgb]), Some(srgb.format));
        assert_eq!(pick(&[rgba, unorm]), Some(rgba.format));
        assert_eq!(pick(&[]), None);
    }

    #[test]
    fn render_finished_follows_the_image_not_the_slot() {
        use crate::frame::FrameCursor;
        use ash::vk::Handle;
        let sems: Vec<vk::Semaphore> = (1..=3).map(vk::Semaphore::from_raw).collect();
        // Frames 0 and 2 share slot 0 but present different images.
        let mut cursor = FrameCursor::default();
        let mut used = Vec::new();
        for image in [0u32, 1, 2, 0] {
            used.push((cursor.write(), semaphore_for_image(&sems, image)));
            cursor.advance();
        }
        assert_eq!(used[0].0, used[2].0);
        assert_ne!(used[0].1, used[2].1);
        assert_eq!(used[3].1, sems[0]);
        assert_eq!(used[2].1, sems[2]);
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let caps = |min, max| vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        };
        assert_eq!(image_count(&caps(2, 0)), 3);
        assert_eq!(image_count(&caps(2, 8)), 3);
        assert_eq!(image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn extent_follows_surface_unless_free_sized() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        let want = RenderSize::new(1280, 720);
        assert_eq!(extent_from_caps(&caps, want).width, 800);

        caps.current_extent.width = u32::MAX;
        let e = extent_from_caps(&caps, RenderSize::new(9000, 720));
        assert_eq!((e.width, e.height), (4096, 720));
    }
}

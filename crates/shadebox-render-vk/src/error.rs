// SPDX-License-Identifier: CEPL-1.0
//! Error kinds owned by the Vulkan backend.
//!
//! [`FatalDeviceError`] ends the frame loop. [`PipelineBuildError`] is
//! recoverable unless the device itself went away.
use crate::frame::SlotInFlight;
use crate::layout::ImageState;
use ash::vk;
use shadebox_render::{ShaderStage, SpirvError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FatalDeviceError {
    #[error("could not load the Vulkan loader")]
    Loader(#[source] ash::LoadingError),
    #[error("no physical device has a queue family with graphics and present support")]
    NoSuitableDevice,
    #[error("surface does not allow TRANSFER_DST swapchain images")]
    NoTransferDst,
    #[error("no memory type with {required:?} in type bits {type_bits:#b}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
    #[error("{op} failed")]
    Vk {
        op: &'static str,
        #[source]
        result: vk::Result,
    },
    #[error(transparent)]
    Layout(#[from] UnsupportedLayoutTransition),
    #[error(transparent)]
    SlotReuse(#[from] SlotInFlight),
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("no barrier is defined for image layout {from:?} -> {to:?}")]
pub struct UnsupportedLayoutTransition {
    pub from: ImageState,
    pub to: ImageState,
}

#[derive(Debug, Error)]
pub enum PipelineBuildError {
    #[error("{stage} stage is not compatible with this pipeline")]
    Stage {
        stage: ShaderStage,
        #[source]
        source: SpirvError,
    },
    #[error("{op} failed")]
    Vk {
        op: &'static str,
        #[source]
        result: vk::Result,
    },
}

impl PipelineBuildError {
    /// The device is gone; nothing built on it afterwards can succeed.
    pub fn is_device_loss(&self) -> bool {
        matches!(
            self,
            PipelineBuildError::Vk {
                result: vk::Result::ERROR_DEVICE_LOST,
                ..
            }
        )
    }
}

/// Tags a raw `vk::Result` with the call that produced it.
pub trait VkResultExt<T> {
    fn or_fatal(self, op: &'static str) -> Result<T, FatalDeviceError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn or_fatal(self, op: &'static str) -> Result<T, FatalDeviceError> {
        self.map_err(|result| FatalDeviceError::Vk { op, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_loss_is_fatal_for_pipelines() {
        let lost = PipelineBuildError::Vk {
            op: "vkCreateGraphicsPipelines",
            result: vk::Result::ERROR_DEVICE_LOST,
        };
        let oom = PipelineBuildError::Vk {
            op: "vkCreateGraphicsPipelines",
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        };
        let stage = PipelineBuildError::Stage {
            stage: ShaderStage::Fragment,
            source: SpirvError::BadMagic { found: 0 },
        };
        assert!(lost.is_device_loss());
        assert!(!oom.is_device_loss());
        assert!(!stage.is_device_loss());
    }

    #[test]
    fn or_fatal_keeps_the_call_site() {
        let r: Result<(), vk::Result> = Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        match r.or_fatal("vkCreateDevice") {
            Err(FatalDeviceError::Vk { op, result }) => {
                assert_eq!(op, "vkCreateDevice");
                assert_eq!(result, vk::Result::ERROR_INITIALIZATION_FAILED);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

use ash::vk;
use thiserror::Error as ThisError;

use crate::{BindingType, BufferHandle};

/// Failure kinds of the render pipeline.
///
/// Functions return `anyhow::Result`; callers that need the kind recover it with
/// `error.downcast_ref::<vulkan::Error>()`. None of these are worth retrying.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Missing required device capability: {0}")]
    Configuration(String),
    #[error("Failed to allocate device memory: {0}")]
    Allocation(String),
    #[error("Failed to upload buffer data: {0}")]
    Upload(String),
    #[error("Failed to build acceleration structure: {0}")]
    AccelBuild(String),
    #[error("Failed to dispatch compute work: {0}")]
    Dispatch(String),
    #[error("Buffer memory is not host visible")]
    NotHostVisible,
    #[error("Binding slot {slot} is declared as {declared:?} but was written with {written:?}")]
    SlotTypeMismatch {
        slot: u32,
        declared: BindingType,
        written: BindingType,
    },
    #[error("Binding slot {0} was never declared")]
    UnknownSlot(u32),
    #[error("Binding slot {0} is named more than once")]
    DuplicateSlot(u32),
    #[error("Binding slot {0} was not written before dispatch")]
    UnwrittenSlot(u32),
    #[error("Buffer is missing usage flags {0:?}")]
    MissingUsage(vk::BufferUsageFlags),
    #[error("Invalid acceleration structure builder state: {0}")]
    InvalidState(String),
    #[error("{0:?} does not refer to a live buffer")]
    StaleHandle(BufferHandle),
}

//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No GPU with Vulkan 1.3 plus graphics and present queues
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// A bounded wait expired. Callers treat this as device loss.
    #[error("Timed out after {timeout_ns} ns waiting for {what}")]
    FenceTimeout { what: &'static str, timeout_ns: u64 },

    /// The retry on a fresh pool failed as well.
    #[error("Descriptor allocation failed after {attempts} attempts")]
    DescriptorPoolExhausted { attempts: u32 },

    /// A host write that does not fit the buffer, or a buffer the host
    /// cannot map
    #[error("Buffer write rejected: {0}")]
    BufferWrite(String),

    /// An operation arrived in a state that cannot serve it
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl RhiError {
    /// The two results a full descriptor pool reports. Anything else from
    /// `vkAllocateDescriptorSets` is not worth a retry.
    pub fn is_pool_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pool_results_count_as_exhaustion() {
        assert!(RhiError::from(vk::Result::ERROR_OUT_OF_POOL_MEMORY).is_pool_exhaustion());
        assert!(RhiError::from(vk::Result::ERROR_FRAGMENTED_POOL).is_pool_exhaustion());
        assert!(!RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_pool_exhaustion());
        assert!(!RhiError::DescriptorPoolExhausted { attempts: 2 }.is_pool_exhaustion());
    }

    #[test]
    fn test_timeout_names_what_it_waited_on() {
        let err = RhiError::FenceTimeout {
            what: "frame fence",
            timeout_ns: 1_000_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 1000000000 ns waiting for frame fence"
        );
    }
}

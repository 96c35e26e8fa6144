//! Blocking one-off GPU submissions.
//!
//! [`ImmediateExecutor`] owns a dedicated command buffer and fence outside
//! the frame ring. `run` records the caller's commands, submits them without
//! semaphore dependencies and blocks until the GPU finished. It stalls the
//! pipeline, so it belongs in startup uploads and rare one-off work, not in
//! per-frame recording.
//!
//! [`ImmediateExecutor::upload_buffer`] builds on `run` to fill device-local
//! buffers through a temporary host-visible staging buffer.

use ash::vk;
use inflight_rhi::backend::{BufferDesc, FenceWait, GpuDevice, MemoryLocation};
use inflight_rhi::{RhiError, RhiResult};
use tracing::{debug, error};

use crate::deletion_queue::{DeferredAction, DeletionQueue};

#[derive(Debug)]
pub struct ImmediateExecutor {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

impl ImmediateExecutor {
    /// Creates the executor and registers its objects with `teardown`.
    pub fn new<D: GpuDevice + ?Sized>(device: &D, teardown: &mut DeletionQueue) -> RhiResult<Self> {
        let command_pool = device.create_command_pool()?;
        teardown.push(DeferredAction::CommandPool(command_pool));
        let command_buffer = device.allocate_command_buffer(command_pool)?;

        let fence = device.create_fence(true)?;
        teardown.push(DeferredAction::Fence(fence));

        debug!("Immediate executor ready");
        Ok(Self {
            command_pool,
            command_buffer,
            fence,
        })
    }

    /// Records `work`, submits it and waits without a time bound.
    ///
    /// The fence wait can still fail if the device is lost; that is
    /// returned and must be treated as fatal.
    pub fn run<D, F, R>(&mut self, device: &D, work: F) -> RhiResult<R>
    where
        D: GpuDevice + ?Sized,
        F: FnOnce(vk::CommandBuffer) -> R,
    {
        let cmd = self.command_buffer;

        device.reset_fence(self.fence)?;
        device.reset_command_buffer(cmd)?;
        device.begin_command_buffer(cmd)?;

        let result = work(cmd);

        device.end_command_buffer(cmd)?;
        device.submit(cmd, &[], &[], self.fence)?;

        match device.wait_for_fence(self.fence, u64::MAX)? {
            FenceWait::Signaled => Ok(result),
            FenceWait::TimedOut => {
                error!("Immediate submission never completed");
                Err(RhiError::FenceTimeout {
                    what: "immediate submission",
                    timeout_ns: u64::MAX,
                })
            }
        }
    }

    /// Creates a GPU-only buffer with `usage` (plus `TRANSFER_DST`) holding
    /// `data`, copied in from a staging buffer that is destroyed once the
    /// copy finished. The caller owns the returned buffer.
    ///
    /// If the copy never completes, both buffers go to `cleanup` instead,
    /// since the GPU may still be reading them.
    pub fn upload_buffer<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        cleanup: &mut DeletionQueue,
    ) -> RhiResult<vk::Buffer> {
        if data.is_empty() {
            return Err(RhiError::InvalidState("upload of zero bytes".into()));
        }
        let size = data.len() as vk::DeviceSize;

        let staging = device.create_buffer(&BufferDesc::staging(size))?;
        if let Err(err) = device.write_buffer(staging, 0, data) {
            device.destroy_buffer(staging);
            return Err(err);
        }

        let buffer = match device.create_buffer(&BufferDesc {
            size,
            usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
            location: MemoryLocation::GpuOnly,
        }) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.destroy_buffer(staging);
                return Err(err);
            }
        };

        match self.run(device, |cmd| device.copy_buffer(cmd, staging, buffer, size)) {
            Ok(()) => {
                device.destroy_buffer(staging);
                debug!(?buffer, size, "Uploaded buffer through staging");
                Ok(buffer)
            }
            Err(err) => {
                cleanup.push(DeferredAction::Buffer(buffer));
                cleanup.push(DeferredAction::Buffer(staging));
                Err(err)
            }
        }
    }

    #[inline]
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    #[inline]
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }
}

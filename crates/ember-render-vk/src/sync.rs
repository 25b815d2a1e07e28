// SPDX-License-Identifier: CEPL-1.0
//! The sync gate: one fence and two semaphores that keep at most one frame
//! in flight and order acquire → render → present on the GPU.
//!
//! Spreading this over N frames would mean an array of gates indexed by
//! `frame % N`, each keeping the same wait/reset/submit contract.

use ash::khr::swapchain;
use ash::prelude::VkResult;
use ash::vk;

use crate::error::{Result, VkError, VkResultExt};

/// Classify the raw result of `vkAcquireNextImageKHR`.
pub fn acquire_outcome(res: VkResult<(u32, bool)>, timeout_ns: u64) -> Result<AcquireOutcome> {
    match res {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(VkError::Timeout {
            what: "acquire_next_image",
            timeout_ns,
        }),
        Err(e) => Err(VkError::from_vk("acquire_next_image", e)),
    }
}

/// Classify the raw result of `vkQueuePresentKHR`; `Ok(true)` is suboptimal.
pub fn present_outcome(res: VkResult<bool>) -> Result<PresentOutcome> {
    match res {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
        Err(e) => Err(VkError::from_vk("queue_present", e)),
    }
}

/// Classify the raw result of a bounded `vkWaitForFences`.
pub fn fence_wait(res: VkResult<()>, timeout_ns: u64) -> Result<()> {
    match res {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(VkError::Timeout {
            what: "wait_for_fences",
            timeout_ns,
        }),
        Err(e) => Err(VkError::from_vk("wait_for_fences", e)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `suboptimal` images are still valid targets; the swapchain should be
    /// rebuilt once this frame has been presented.
    Acquired { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface. Nothing was acquired
    /// and nothing was signaled.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out-of-date or suboptimal; rebuild before the next acquire.
    Stale,
}

/// CPU-side record of the frame fence.
///
/// The fence is created signaled, so the very first wait succeeds. After a
/// wait + reset it is unsignaled until a submit hands it back to the GPU;
/// waiting again before that would block forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceLedger {
    armed: bool,
}

impl Default for FenceLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceLedger {
    pub const fn new() -> Self {
        Self { armed: true }
    }

    /// Whether a wait is currently allowed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn check_wait(&self) -> Result<()> {
        if self.armed {
            Ok(())
        } else {
            Err(VkError::FenceNotArmed)
        }
    }

    /// The fence was waited on and reset.
    pub fn consumed(&mut self) {
        self.armed = false;
    }

    /// A submit will signal the fence.
    pub fn submitted(&mut self) {
        self.armed = true;
    }
}

pub struct SyncGate {
    fence: vk::Fence,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    ledger: FenceLedger,
}

impl SyncGate {
    /// A gate holding no objects; `destroy` on it is a no-op.
    pub const fn empty() -> Self {
        Self {
            fence: vk::Fence::null(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            ledger: FenceLedger::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fence == vk::Fence::null()
    }

    /// # Safety
    /// `device` must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        let fence = unsafe { device.create_fence(&fence_ci, None) }.during("create_fence")?;
        let image_available = match unsafe { device.create_semaphore(&sem_ci, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe { device.destroy_fence(fence, None) };
                return Err(VkError::from_vk("create_semaphore", e));
            }
        };
        let render_finished = match unsafe { device.create_semaphore(&sem_ci, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_fence(fence, None);
                }
                return Err(VkError::from_vk("create_semaphore", e));
            }
        };

        Ok(Self {
            fence,
            image_available,
            render_finished,
            ledger: FenceLedger::new(),
        })
    }

    /// Ask the presentation engine for the next image, blocking for at most
    /// `timeout_ns`. The acquire semaphore is signaled once the image is
    /// actually free.
    ///
    /// # Safety
    /// `loader` and `swapchain` must be valid, and the acquire semaphore
    /// must be unsignaled with no signal pending. The frame loop only
    /// ensures that the previous acquire was consumed by a submit; because
    /// the fence is waited on after this call, that submit's wait on the
    /// semaphore may still be executing on the GPU when it is signaled
    /// again. Validation layers can report this.
    pub unsafe fn acquire_next(
        &self,
        loader: &swapchain::Device,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        let res = unsafe {
            loader.acquire_next_image(swapchain, timeout_ns, self.image_available, vk::Fence::null())
        };
        acquire_outcome(res, timeout_ns)
    }

    /// Block until the previous frame's GPU work is done, then reset the
    /// fence. Past this point the command buffer may be re-recorded.
    ///
    /// # Safety
    /// `device` must be the device the gate was created on.
    pub unsafe fn wait_and_reset(&mut self, device: &ash::Device, timeout_ns: u64) -> Result<()> {
        self.ledger.check_wait()?;
        fence_wait(
            unsafe { device.wait_for_fences(&[self.fence], true, timeout_ns) },
            timeout_ns,
        )?;
        unsafe { device.reset_fences(&[self.fence]) }.during("reset_fences")?;
        self.ledger.consumed();
        Ok(())
    }

    /// Submit `cmd`: it waits on the acquire semaphore at color output,
    /// signals render-done for present, and signals the frame fence.
    ///
    /// # Safety
    /// `cmd` must be fully recorded and `queue` must belong to `device`.
    pub unsafe fn submit(
        &mut self,
        device: &ash::Device,
        queue: vk::Queue,
        cmd: vk::CommandBuffer,
    ) -> Result<()> {
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &self.render_finished,
            ..Default::default()
        };
        unsafe { device.queue_submit(queue, std::slice::from_ref(&submit), self.fence) }
            .during("queue_submit")?;
        self.ledger.submitted();
        Ok(())
    }

    /// Queue `index` for presentation once rendering has finished.
    ///
    /// # Safety
    /// `index` must have been acquired from `swapchain` and submitted.
    pub unsafe fn present(
        &self,
        loader: &swapchain::Device,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        index: u32,
    ) -> Result<PresentOutcome> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &self.render_finished,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &index,
            ..Default::default()
        };

        present_outcome(unsafe { loader.queue_present(queue, &present) })
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.render_finished != vk::Semaphore::null() {
                device.destroy_semaphore(self.render_finished, None);
            }
            if self.image_available != vk::Semaphore::null() {
                device.destroy_semaphore(self.image_available, None);
            }
            if self.fence != vk::Fence::null() {
                device.destroy_fence(self.fence, None);
            }
        }
        *self = Self::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_fence_can_be_waited_once() {
        let mut ledger = FenceLedger::new();
        assert!(ledger.check_wait().is_ok());
        ledger.consumed();
        assert!(matches!(ledger.check_wait(), Err(VkError::FenceNotArmed)));
    }

    #[test]
    fn submit_rearms_the_fence() {
        let mut ledger = FenceLedger::default();
        for _ in 0..4 {
            ledger.check_wait().unwrap();
            ledger.consumed();
            assert!(!ledger.is_armed());
            ledger.submitted();
            assert!(ledger.is_armed());
        }
    }

    #[test]
    fn empty_gate_holds_no_objects() {
        let gate = SyncGate::empty();
        assert!(gate.is_empty());
        assert_eq!(gate.image_available, vk::Semaphore::null());
        assert_eq!(gate.render_finished, vk::Semaphore::null());
        assert!(gate.ledger.is_armed());
    }

    #[test]
    fn acquire_results_are_classified() {
        assert_eq!(
            acquire_outcome(Ok((2, false)), 1).unwrap(),
            AcquireOutcome::Acquired {
                index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            acquire_outcome(Ok((0, true)), 1).unwrap(),
            AcquireOutcome::Acquired {
                index: 0,
                suboptimal: true
            }
        );
        assert_eq!(
            acquire_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), 1).unwrap(),
            AcquireOutcome::OutOfDate
        );
    }

    #[test]
    fn acquire_timeout_and_not_ready_are_timeouts() {
        for raw in [vk::Result::TIMEOUT, vk::Result::NOT_READY] {
            match acquire_outcome(Err(raw), 5) {
                Err(VkError::Timeout { what, timeout_ns }) => {
                    assert_eq!(what, "acquire_next_image");
                    assert_eq!(timeout_ns, 5);
                }
                other => panic!("{raw:?} gave {other:?}"),
            }
        }
    }

    #[test]
    fn acquire_device_loss_and_other_errors_keep_their_kind() {
        assert!(matches!(
            acquire_outcome(Err(vk::Result::ERROR_DEVICE_LOST), 1),
            Err(VkError::DeviceLost("acquire_next_image"))
        ));
        assert!(matches!(
            acquire_outcome(Err(vk::Result::ERROR_SURFACE_LOST_KHR), 1),
            Err(VkError::Vulkan {
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
                ..
            })
        ));
    }

    #[test]
    fn suboptimal_or_out_of_date_present_is_stale() {
        assert_eq!(present_outcome(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(present_outcome(Ok(true)).unwrap(), PresentOutcome::Stale);
        assert_eq!(
            present_outcome(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::Stale
        );
    }

    #[test]
    fn present_failures_are_errors() {
        assert!(matches!(
            present_outcome(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(VkError::DeviceLost("queue_present"))
        ));
        assert!(matches!(
            present_outcome(Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)),
            Err(VkError::Vulkan { what: "queue_present", .. })
        ));
    }

    #[test]
    fn fence_wait_results_are_classified() {
        assert!(fence_wait(Ok(()), 1).is_ok());
        assert!(matches!(
            fence_wait(Err(vk::Result::TIMEOUT), 7),
            Err(VkError::Timeout {
                what: "wait_for_fences",
                timeout_ns: 7
            })
        ));
        assert!(matches!(
            fence_wait(Err(vk::Result::ERROR_DEVICE_LOST), 1),
            Err(VkError::DeviceLost("wait_for_fences"))
        ));
        assert!(matches!(
            fence_wait(Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY), 1),
            Err(VkError::Vulkan { .. })
        ));
    }

    #[test]
    fn repeated_submits_do_not_stack() {
        let mut ledger = FenceLedger::new();
        ledger.submitted();
        ledger.submitted();
        ledger.consumed();
        assert!(ledger.check_wait().is_err());
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! The frame loop and the swapchain rebuild state machine.
//!
//! [`FrameLoop`] only decides *what* happens in which order; the GPU work is
//! done by a [`FrameBackend`]. In the renderer that is
//! [`crate::context::FrameContext`].

use ember_render::FrameStatus;
use tracing::{debug, info};

use crate::error::Result;
use crate::sync::{AcquireOutcome, PresentOutcome};

/// Frames per radian of the clear-color pulse.
const PULSE_PERIOD: f32 = 120.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    Valid,
    /// Must be rebuilt before the next acquire.
    Invalidated,
    Rebuilding,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    /// The surface has no area (minimized); try again on a later frame.
    Deferred,
}

/// The per-frame operations, in the order [`FrameLoop::draw_frame`] issues
/// them.
pub trait FrameBackend {
    fn acquire(&mut self) -> Result<AcquireOutcome>;
    fn wait_and_reset(&mut self) -> Result<()>;
    fn record(&mut self, image_index: u32, clear: [f32; 4]) -> Result<()>;
    fn submit(&mut self) -> Result<()>;
    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;
    /// Drain the device, tear the swapchain generation down and build a new
    /// one against freshly queried surface capabilities.
    fn rebuild(&mut self) -> Result<RebuildOutcome>;
}

pub struct FrameLoop {
    state: SwapchainState,
    frame_number: u64,
    clear: [f32; 4],
    pulse: bool,
}

impl FrameLoop {
    pub fn new(clear: [f32; 4], pulse: bool) -> Self {
        Self {
            state: SwapchainState::Valid,
            frame_number: 0,
            clear,
            pulse,
        }
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
    }

    pub fn set_pulse(&mut self, on: bool) {
        self.pulse = on;
    }

    /// External resize or present-mode change.
    pub fn invalidate(&mut self) {
        if self.state == SwapchainState::Valid {
            self.state = SwapchainState::Invalidated;
        }
    }

    /// Clear color for the current frame; the blue channel pulses with the
    /// frame counter when enabled.
    pub fn clear_color(&self) -> [f32; 4] {
        let mut rgba = self.clear;
        if self.pulse {
            rgba[2] = (self.frame_number as f32 / PULSE_PERIOD).sin().abs();
        }
        rgba
    }

    /// Run one frame: acquire → wait/reset → record → submit → present.
    ///
    /// A stale swapchain is never an error here. At acquire it abandons the
    /// frame and rebuilds right away; at present it schedules a rebuild for
    /// the start of the next call.
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameStatus> {
        if self.state != SwapchainState::Valid && !self.rebuild(backend)? {
            return Ok(FrameStatus::Skipped);
        }

        let (index, suboptimal) = match backend.acquire()? {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("acquire: swapchain out of date, frame {} dropped", self.frame_number);
                self.state = SwapchainState::Invalidated;
                self.rebuild(backend)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        backend.wait_and_reset()?;
        backend.record(index, self.clear_color())?;
        backend.submit()?;
        let presented = backend.present(index)?;

        if suboptimal || presented == PresentOutcome::Stale {
            debug!(
                "frame {}: swapchain stale (suboptimal acquire: {suboptimal}), rebuild scheduled",
                self.frame_number
            );
            self.state = SwapchainState::Invalidated;
        }

        self.frame_number += 1;
        Ok(FrameStatus::Presented)
    }

    /// Returns whether the swapchain is usable afterwards.
    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B) -> Result<bool> {
        self.state = SwapchainState::Rebuilding;
        match backend.rebuild() {
            Ok(RebuildOutcome::Rebuilt) => {
                self.state = SwapchainState::Valid;
                Ok(true)
            }
            Ok(RebuildOutcome::Deferred) => {
                info!("surface has no area, rebuild deferred");
                self.state = SwapchainState::Invalidated;
                Ok(false)
            }
            Err(e) => {
                self.state = SwapchainState::Invalidated;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VkError;
    use crate::sync::FenceLedger;
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        Acquire,
        WaitAndReset,
        Record(u32),
        Submit,
        Present(u32),
        Rebuild,
    }

    /// Handles are `(generation, slot)` pairs so stale references show up.
    #[derive(Default)]
    struct Generation {
        images: Vec<(u32, usize)>,
        views: Vec<(u32, usize)>,
        framebuffers: Vec<(u32, usize)>,
    }

    struct MockBackend {
        calls: Vec<Call>,
        acquires: VecDeque<Result<AcquireOutcome>>,
        presents: VecDeque<PresentOutcome>,
        fence: FenceLedger,
        generation: u32,
        live: Generation,
        image_count: usize,
        surface_empty: bool,
        pending_image: Option<u32>,
    }

    impl MockBackend {
        fn new(image_count: usize) -> Self {
            let mut mock = MockBackend {
                calls: Vec::new(),
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                fence: FenceLedger::new(),
                generation: 0,
                live: Generation::default(),
                image_count,
                surface_empty: false,
                pending_image: None,
            };
            mock.build_generation();
            mock
        }

        fn build_generation(&mut self) {
            let g = self.generation;
            let n = self.image_count;
            self.live = Generation {
                images: (0..n).map(|i| (g, i)).collect(),
                views: (0..n).map(|i| (g, i)).collect(),
                framebuffers: (0..n).map(|i| (g, i)).collect(),
            };
        }

        fn assert_consistent(&self) {
            let n = self.live.images.len();
            assert_eq!(self.live.views.len(), n);
            assert_eq!(self.live.framebuffers.len(), n);
            for i in 0..n {
                let expect = (self.generation, i);
                assert_eq!(self.live.images[i], expect);
                assert_eq!(self.live.views[i], expect);
                assert_eq!(self.live.framebuffers[i], expect);
            }
        }

        fn count(&self, call: fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| call(c)).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn acquire(&mut self) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire);
            let outcome = self.acquires.pop_front().unwrap_or(Ok(AcquireOutcome::Acquired {
                index: (self.calls.len() % self.live.images.len()) as u32,
                suboptimal: false,
            }))?;
            if let AcquireOutcome::Acquired { index, .. } = outcome {
                assert!((index as usize) < self.live.images.len());
                self.pending_image = Some(index);
            }
            Ok(outcome)
        }

        fn wait_and_reset(&mut self) -> Result<()> {
            self.calls.push(Call::WaitAndReset);
            self.fence.check_wait()?;
            self.fence.consumed();
            Ok(())
        }

        fn record(&mut self, image_index: u32, _clear: [f32; 4]) -> Result<()> {
            self.calls.push(Call::Record(image_index));
            assert_eq!(self.pending_image, Some(image_index));
            assert!(self.live.framebuffers.get(image_index as usize).is_some());
            Ok(())
        }

        fn submit(&mut self) -> Result<()> {
            self.calls.push(Call::Submit);
            self.fence.submitted();
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(image_index));
            assert_eq!(self.pending_image.take(), Some(image_index));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn rebuild(&mut self) -> Result<RebuildOutcome> {
            self.calls.push(Call::Rebuild);
            if self.surface_empty {
                return Ok(RebuildOutcome::Deferred);
            }
            self.live = Generation::default();
            self.pending_image = None;
            self.generation += 1;
            self.build_generation();
            Ok(RebuildOutcome::Rebuilt)
        }
    }

    fn acquired(index: u32) -> Result<AcquireOutcome> {
        Ok(AcquireOutcome::Acquired {
            index,
            suboptimal: false,
        })
    }

    #[test]
    fn frame_steps_run_in_order() {
        let mut backend = MockBackend::new(3);
        backend.acquires.push_back(acquired(1));
        let mut frames = FrameLoop::new([0.0; 4], false);

        let status = frames.draw_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(
            backend.calls,
            vec![
                Call::Acquire,
                Call::WaitAndReset,
                Call::Record(1),
                Call::Submit,
                Call::Present(1),
            ]
        );
        assert_eq!(frames.frame_number(), 1);
        assert_eq!(frames.state(), SwapchainState::Valid);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_and_skips() {
        let mut backend = MockBackend::new(3);
        backend.acquires.push_back(Ok(AcquireOutcome::OutOfDate));
        let mut frames = FrameLoop::new([0.0; 4], false);

        let status = frames.draw_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Skipped);
        assert_eq!(backend.calls, vec![Call::Acquire, Call::Rebuild]);
        assert_eq!(frames.state(), SwapchainState::Valid);
        assert_eq!(frames.frame_number(), 0);
        backend.assert_consistent();

        // the fence was never touched, so the next frame can wait on it
        let status = frames.draw_frame(&mut backend).unwrap();
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild)), 1);
    }

    #[test]
    fn stale_present_rebuilds_before_next_acquire() {
        let mut backend = MockBackend::new(2);
        backend.presents.push_back(PresentOutcome::Stale);
        let mut frames = FrameLoop::new([0.0; 4], false);

        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert_eq!(frames.state(), SwapchainState::Invalidated);
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild)), 0);

        backend.calls.clear();
        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert_eq!(backend.calls[0], Call::Rebuild);
        assert_eq!(backend.calls[1], Call::Acquire);
        assert_eq!(frames.state(), SwapchainState::Valid);
    }

    #[test]
    fn suboptimal_acquire_still_presents_then_rebuilds() {
        let mut backend = MockBackend::new(3);
        backend.acquires.push_back(Ok(AcquireOutcome::Acquired {
            index: 2,
            suboptimal: true,
        }));
        let mut frames = FrameLoop::new([0.0; 4], false);

        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert!(backend.calls.contains(&Call::Present(2)));
        assert_eq!(frames.state(), SwapchainState::Invalidated);

        frames.draw_frame(&mut backend).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild)), 1);
    }

    #[test]
    fn resize_rebuilds_lazily() {
        let mut backend = MockBackend::new(3);
        let mut frames = FrameLoop::new([0.0; 4], false);
        frames.invalidate();
        frames.invalidate();
        assert!(backend.calls.is_empty());

        frames.draw_frame(&mut backend).unwrap();
        assert_eq!(backend.calls[..2], [Call::Rebuild, Call::Acquire]);
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild)), 1);
    }

    #[test]
    fn empty_surface_defers_rebuild() {
        let mut backend = MockBackend::new(3);
        backend.surface_empty = true;
        let mut frames = FrameLoop::new([0.0; 4], false);
        frames.invalidate();

        for _ in 0..3 {
            assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Skipped);
            assert_eq!(frames.state(), SwapchainState::Invalidated);
        }
        assert_eq!(backend.count(|c| matches!(c, Call::Acquire)), 0);

        backend.surface_empty = false;
        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert_eq!(frames.state(), SwapchainState::Valid);
    }

    #[test]
    fn image_count_change_keeps_arrays_aligned() {
        let mut backend = MockBackend::new(3);
        let mut frames = FrameLoop::new([0.0; 4], false);
        frames.draw_frame(&mut backend).unwrap();

        backend.image_count = 2;
        backend.acquires.push_back(Ok(AcquireOutcome::OutOfDate));
        backend.acquires.push_back(acquired(1));
        frames.draw_frame(&mut backend).unwrap();
        frames.draw_frame(&mut backend).unwrap();

        assert_eq!(backend.live.images.len(), 2);
        backend.assert_consistent();
    }

    #[test]
    fn mixed_staleness_never_double_waits_the_fence() {
        let mut backend = MockBackend::new(3);
        let mut frames = FrameLoop::new([0.0; 4], true);

        for i in 0..60u32 {
            match i % 7 {
                0 => backend.acquires.push_back(Ok(AcquireOutcome::OutOfDate)),
                3 => backend.presents.push_back(PresentOutcome::Stale),
                5 => frames.invalidate(),
                _ => {}
            }
            backend.image_count = 2 + (i as usize % 3);
            frames.draw_frame(&mut backend).unwrap();
            backend.assert_consistent();
        }

        let waits = backend.count(|c| matches!(c, Call::WaitAndReset));
        let submits = backend.count(|c| matches!(c, Call::Submit));
        assert_eq!(waits, submits);
        assert_eq!(frames.frame_number(), submits as u64);
    }

    #[test]
    fn fatal_acquire_error_propagates() {
        let mut backend = MockBackend::new(3);
        backend.acquires.push_back(Err(VkError::Timeout {
            what: "acquire_next_image",
            timeout_ns: 1,
        }));
        let mut frames = FrameLoop::new([0.0; 4], false);

        let err = frames.draw_frame(&mut backend).unwrap_err();
        assert!(matches!(err, VkError::Timeout { .. }));
        assert_eq!(backend.calls, vec![Call::Acquire]);
    }

    #[test]
    fn pulse_drives_blue_channel_only() {
        let mut backend = MockBackend::new(3);
        let mut frames = FrameLoop::new([0.25, 0.5, 0.75, 1.0], true);
        assert_eq!(frames.clear_color(), [0.25, 0.5, 0.0, 1.0]);

        for _ in 0..180 {
            frames.draw_frame(&mut backend).unwrap();
        }
        let rgba = frames.clear_color();
        assert_eq!(&rgba[..2], &[0.25, 0.5]);
        assert!((rgba[2] - 1.5f32.sin().abs()).abs() < 1e-6);

        frames.set_pulse(false);
        assert_eq!(frames.clear_color(), [0.25, 0.5, 0.75, 1.0]);
    }
}

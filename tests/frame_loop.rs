// Frame loop state machine against a scripted GPU

use anyhow::Result;
use ash::vk;
use std::collections::VecDeque;

use scene_renderer::backend::selector::{QueueFamilies, SwapchainSupport};
use scene_renderer::backend::swapchain::{AcquireOutcome, PresentOutcome, SwapchainPlan};
use scene_renderer::frame::{ChainState, FrameBackend, FrameLoop, FrameStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    WaitIdle,
    Destroy,
    Query,
    Build(u32, u32),
    Acquire(u32),
    /// Work submitted earlier for this image finished while we waited
    GpuComplete(usize),
    WaitFence(usize),
    Record(usize),
    Submit(usize),
    Present(usize),
}

struct MockGpu {
    framebuffer: vk::Extent2D,
    /// Surface leaves the extent to the application
    sentinel_extent: bool,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    events: Vec<Event>,
    created: usize,
    destroyed: usize,
    live: bool,
    in_flight: Vec<bool>,
    next_image: u32,
}

impl MockGpu {
    fn new(width: u32, height: u32) -> Self {
        Self {
            framebuffer: vk::Extent2D { width, height },
            sentinel_extent: true,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            events: Vec::new(),
            created: 0,
            destroyed: 0,
            live: false,
            in_flight: Vec::new(),
            next_image: 0,
        }
    }

    fn with_fixed_extent(mut self) -> Self {
        self.sentinel_extent = false;
        self
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.framebuffer = vk::Extent2D { width, height };
    }

    fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

impl FrameBackend for MockGpu {
    fn wait_idle(&mut self) -> Result<()> {
        self.events.push(Event::WaitIdle);
        for busy in &mut self.in_flight {
            *busy = false;
        }
        Ok(())
    }

    fn framebuffer_size(&self) -> vk::Extent2D {
        self.framebuffer
    }

    fn query_surface(&mut self) -> Result<SwapchainSupport> {
        self.events.push(Event::Query);

        let current_extent = if self.sentinel_extent {
            vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            }
        } else {
            self.framebuffer
        };

        Ok(SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        })
    }

    fn queue_families(&self) -> QueueFamilies {
        QueueFamilies {
            graphics: 0,
            present: 0,
        }
    }

    fn build_chain(&mut self, plan: &SwapchainPlan) -> Result<usize> {
        if self.live {
            anyhow::bail!("previous chain was never destroyed");
        }
        self.events
            .push(Event::Build(plan.extent.width, plan.extent.height));
        self.created += 1;
        self.live = true;
        self.in_flight = vec![false; plan.image_count as usize];
        self.next_image = 0;
        Ok(plan.image_count as usize)
    }

    fn destroy_chain(&mut self) {
        self.events.push(Event::Destroy);
        if self.live {
            self.destroyed += 1;
            self.live = false;
        }
    }

    fn acquire_next_image(&mut self) -> Result<AcquireOutcome> {
        let outcome = match self.acquire_script.pop_front() {
            Some(outcome) => outcome,
            None => {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.in_flight.len() as u32;
                AcquireOutcome::Ready {
                    image_index,
                    suboptimal: false,
                }
            }
        };
        if let AcquireOutcome::Ready { image_index, .. } = outcome {
            self.events.push(Event::Acquire(image_index));
        }
        Ok(outcome)
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        if self.in_flight[slot] {
            self.events.push(Event::GpuComplete(slot));
            self.in_flight[slot] = false;
        }
        self.events.push(Event::WaitFence(slot));
        Ok(())
    }

    fn record_slot(&mut self, slot: usize, _extent: vk::Extent2D) -> Result<()> {
        if self.in_flight[slot] {
            anyhow::bail!("recording into image {} while the GPU still uses it", slot);
        }
        self.events.push(Event::Record(slot));
        Ok(())
    }

    fn submit_slot(&mut self, slot: usize) -> Result<()> {
        self.events.push(Event::Submit(slot));
        self.in_flight[slot] = true;
        Ok(())
    }

    fn present(&mut self, slot: usize) -> Result<PresentOutcome> {
        self.events.push(Event::Present(slot));
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }
}

fn size(extent: vk::Extent2D) -> (u32, u32) {
    (extent.width, extent.height)
}

fn active_loop(width: u32, height: u32) -> FrameLoop<MockGpu> {
    let mut frame_loop = FrameLoop::new(MockGpu::new(width, height));
    frame_loop.create().unwrap();
    frame_loop.backend_mut().take_events();
    frame_loop
}

#[test]
fn test_create_builds_active_chain() {
    let mut frame_loop = FrameLoop::new(MockGpu::new(800, 600));
    assert_eq!(frame_loop.state(), ChainState::Uninitialized);

    frame_loop.create().unwrap();

    assert_eq!(frame_loop.state(), ChainState::Active);
    assert_eq!(size(frame_loop.extent()), (800, 600));
    assert_eq!(frame_loop.image_count(), 3);
    assert_eq!(
        frame_loop.backend_mut().take_events(),
        vec![Event::Query, Event::Build(800, 600)]
    );
}

#[test]
fn test_create_twice_is_rejected() {
    let mut frame_loop = active_loop(800, 600);
    assert!(frame_loop.create().is_err());
    assert_eq!(frame_loop.backend().created, 1);
}

#[test]
fn test_draw_before_create_fails() {
    let mut frame_loop = FrameLoop::new(MockGpu::new(800, 600));
    assert!(frame_loop.draw_frame().is_err());
}

#[test]
fn test_recreate_tears_down_in_order() {
    let mut frame_loop = active_loop(800, 600);

    frame_loop.recreate().unwrap();

    assert_eq!(
        frame_loop.backend_mut().take_events(),
        vec![
            Event::WaitIdle,
            Event::Destroy,
            Event::Query,
            Event::Build(800, 600)
        ]
    );
}

#[test]
fn test_repeated_recreate_is_stable() {
    let mut frame_loop = active_loop(800, 600);

    frame_loop.recreate().unwrap();
    frame_loop.recreate().unwrap();

    assert_eq!(frame_loop.state(), ChainState::Active);
    assert_eq!(size(frame_loop.extent()), (800, 600));

    let gpu = frame_loop.backend();
    assert_eq!(gpu.created, 3);
    assert_eq!(gpu.destroyed, 2);
    assert!(gpu.live);
}

#[test]
fn test_frame_steps_run_in_order() {
    let mut frame_loop = active_loop(800, 600);

    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Presented);
    assert_eq!(
        frame_loop.backend_mut().take_events(),
        vec![
            Event::Acquire(0),
            Event::WaitFence(0),
            Event::Record(0),
            Event::Submit(0),
            Event::Present(0)
        ]
    );
}

#[test]
fn test_fence_gate_waits_for_previous_use_of_image() {
    let mut frame_loop = active_loop(800, 600);

    // Three images: frames 0..3 hit 0, 1, 2, then 0 again
    for _ in 0..4 {
        assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Presented);
    }

    let events = frame_loop.backend_mut().take_events();
    let reacquire = events
        .iter()
        .rposition(|e| *e == Event::Acquire(0))
        .unwrap();
    let tail = &events[reacquire..];
    assert_eq!(
        tail,
        &[
            Event::Acquire(0),
            Event::GpuComplete(0),
            Event::WaitFence(0),
            Event::Record(0),
            Event::Submit(0),
            Event::Present(0)
        ]
    );
    assert!(!events[..reacquire].contains(&Event::GpuComplete(0)));
}

#[test]
fn test_resize_triggers_recreate_at_new_size() {
    let mut frame_loop = active_loop(800, 600);
    assert!(!frame_loop.should_recreate());

    frame_loop.backend_mut().resize(1024, 768);
    assert!(frame_loop.should_recreate());

    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(size(frame_loop.extent()), (1024, 768));
    assert!(!frame_loop.should_recreate());

    // The resized frame was still shown before the rebuild
    let events = frame_loop.backend_mut().take_events();
    let present = events.iter().position(|e| *e == Event::Present(0)).unwrap();
    assert_eq!(
        &events[present + 1..],
        &[
            Event::WaitIdle,
            Event::Destroy,
            Event::Query,
            Event::Build(1024, 768)
        ]
    );
}

#[test]
fn test_resize_beyond_bounds_is_clamped() {
    let mut frame_loop = active_loop(800, 600);

    frame_loop.backend_mut().resize(5000, 3000);
    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(size(frame_loop.extent()), (4096, 3000));

    // Clamped extent matches what a rebuild would produce, so no churn
    assert!(!frame_loop.should_recreate());
    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Presented);
}

#[test]
fn test_resize_with_surface_dictated_extent() {
    let mut frame_loop = FrameLoop::new(MockGpu::new(800, 600).with_fixed_extent());
    frame_loop.create().unwrap();

    frame_loop.backend_mut().resize(1024, 768);
    assert!(frame_loop.should_recreate());
    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(size(frame_loop.extent()), (1024, 768));
}

#[test]
fn test_out_of_date_acquire_aborts_frame() {
    let mut frame_loop = active_loop(800, 600);
    frame_loop
        .backend_mut()
        .acquire_script
        .push_back(AcquireOutcome::OutOfDate);

    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(frame_loop.state(), ChainState::Active);
    assert_eq!(
        frame_loop.backend_mut().take_events(),
        vec![
            Event::WaitIdle,
            Event::Destroy,
            Event::Query,
            Event::Build(800, 600)
        ]
    );

    // Next frame runs normally on the new chain
    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Presented);
}

#[test]
fn test_suboptimal_acquire_presents_then_recreates() {
    let mut frame_loop = active_loop(800, 600);
    frame_loop
        .backend_mut()
        .acquire_script
        .push_back(AcquireOutcome::Ready {
            image_index: 1,
            suboptimal: true,
        });

    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Recreated);

    let events = frame_loop.backend_mut().take_events();
    assert!(events.contains(&Event::Present(1)));
    assert_eq!(events.last(), Some(&Event::Build(800, 600)));
}

#[test]
fn test_suboptimal_or_out_of_date_present_recreates() {
    for outcome in [PresentOutcome::Suboptimal, PresentOutcome::OutOfDate] {
        let mut frame_loop = active_loop(800, 600);
        frame_loop.backend_mut().present_script.push_back(outcome);

        assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Recreated);
        assert_eq!(frame_loop.backend().created, 2);
        assert_eq!(frame_loop.backend().destroyed, 1);
    }
}

#[test]
fn test_acquired_index_out_of_range_fails() {
    let mut frame_loop = active_loop(800, 600);
    frame_loop
        .backend_mut()
        .acquire_script
        .push_back(AcquireOutcome::Ready {
            image_index: 7,
            suboptimal: false,
        });

    assert!(frame_loop.draw_frame().is_err());
    assert!(!frame_loop
        .backend()
        .events
        .iter()
        .any(|e| matches!(e, Event::Record(_))));
}

#[test]
fn test_minimized_window_skips_and_defers_rebuild() {
    let mut frame_loop = active_loop(800, 600);

    frame_loop.backend_mut().resize(0, 0);
    assert!(!frame_loop.should_recreate());
    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Skipped);

    // A rebuild requested while minimized leaves the old chain in place
    frame_loop.recreate().unwrap();
    assert_eq!(frame_loop.state(), ChainState::Active);
    assert!(frame_loop.backend_mut().take_events().is_empty());

    frame_loop.backend_mut().resize(640, 480);
    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(size(frame_loop.extent()), (640, 480));
    assert_eq!(frame_loop.backend().created, 2);
    assert_eq!(frame_loop.backend().destroyed, 1);
}

#[test]
fn test_create_while_minimized_builds_on_first_frame() {
    let mut frame_loop = FrameLoop::new(MockGpu::new(0, 0));

    frame_loop.create().unwrap();
    assert_eq!(frame_loop.state(), ChainState::Uninitialized);
    assert_eq!(frame_loop.backend().created, 0);

    frame_loop.backend_mut().resize(800, 600);
    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(frame_loop.state(), ChainState::Active);
    assert_eq!(frame_loop.backend().destroyed, 0);

    assert_eq!(frame_loop.draw_frame().unwrap(), FrameStatus::Presented);
}

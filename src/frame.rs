// =============================================================================
// FRAME LOOP - Swapchain lifecycle and per-frame synchronization
// =============================================================================
//
// `FrameLoop` decides *when* the chain is built, torn down and rebuilt and
// in which order a frame's steps run. `FrameBackend` performs each step on
// the GPU; tests drive the same state machine with a mock backend.
//
// FRAME FLOW:
// 1. Acquire next image (signals `image_available`)
// 2. Wait on that image's fence, then reset it
// 3. Record: render pass, per-object uniform update + draw
// 4. Submit (waits `image_available`, signals `render_finished` + fence)
// 5. Present (waits `render_finished`)
// 6. Rebuild the chain if the surface went out of date, became suboptimal
//    or no longer matches the framebuffer size

use anyhow::{Context, Result};
use ash::vk;

use crate::backend::selector::{QueueFamilies, SwapchainSupport};
use crate::backend::swapchain::{AcquireOutcome, ExtentBounds, PresentOutcome, SwapchainPlan};

/// GPU side of the frame loop. Slots are swapchain image indices.
pub trait FrameBackend {
    fn wait_idle(&mut self) -> Result<()>;

    /// Current drawable size of the window in pixels
    fn framebuffer_size(&self) -> vk::Extent2D;

    fn query_surface(&mut self) -> Result<SwapchainSupport>;

    fn queue_families(&self) -> QueueFamilies;

    /// Create the swapchain and everything sized by it. Returns the number
    /// of images actually created.
    fn build_chain(&mut self, plan: &SwapchainPlan) -> Result<usize>;

    /// Release everything `build_chain` created. The device is idle.
    fn destroy_chain(&mut self);

    fn acquire_next_image(&mut self) -> Result<AcquireOutcome>;

    /// Block until the last submission for `slot` has finished, then rearm
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    fn record_slot(&mut self, slot: usize, extent: vk::Extent2D) -> Result<()>;

    fn submit_slot(&mut self, slot: usize) -> Result<()>;

    fn present(&mut self, slot: usize) -> Result<PresentOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Uninitialized,
    Active,
    Recreating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Image rendered and queued for presentation
    Presented,
    /// The chain was rebuilt; the frame may or may not have been shown
    Recreated,
    /// Window has no area, nothing was done
    Skipped,
}

fn is_empty(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

pub struct FrameLoop<B: FrameBackend> {
    backend: B,
    state: ChainState,
    extent: vk::Extent2D,
    bounds: Option<ExtentBounds>,
    image_count: usize,
    /// A rebuild was wanted while the window had no area
    pending_rebuild: bool,
}

impl<B: FrameBackend> FrameLoop<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: ChainState::Uninitialized,
            extent: vk::Extent2D::default(),
            bounds: None,
            image_count: 0,
            pending_rebuild: false,
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.image_count
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Build the first chain. A window with no area defers this to the
    /// first frame drawn after it regains a size.
    pub fn create(&mut self) -> Result<()> {
        if self.state != ChainState::Uninitialized {
            anyhow::bail!("Swapchain already created");
        }
        self.rebuild()
    }

    /// Tear down and rebuild the chain. Synchronous: the state is `Active`
    /// again when this returns successfully.
    pub fn recreate(&mut self) -> Result<()> {
        self.rebuild()
    }

    fn rebuild(&mut self) -> Result<()> {
        let framebuffer = self.backend.framebuffer_size();
        if is_empty(framebuffer) {
            log::debug!("Window has no area, deferring swapchain rebuild");
            self.pending_rebuild = true;
            return Ok(());
        }

        if self.state == ChainState::Active {
            self.state = ChainState::Recreating;
            self.backend.wait_idle()?;
            self.backend.destroy_chain();
        }

        let support = self.backend.query_surface()?;
        let plan = SwapchainPlan::new(&support, self.backend.queue_families(), framebuffer)?;
        let image_count = self.backend.build_chain(&plan)?;

        let recreated = self.state == ChainState::Recreating;
        self.extent = plan.extent;
        self.bounds = plan.bounds;
        self.image_count = image_count;
        self.pending_rebuild = false;
        self.state = ChainState::Active;

        if recreated {
            log::info!(
                "Swapchain recreated: {}x{}, {} images",
                plan.extent.width,
                plan.extent.height,
                image_count
            );
        }
        Ok(())
    }

    /// The framebuffer, clamped as a rebuild would clamp it, no longer
    /// matches the chain's extent.
    pub fn should_recreate(&self) -> bool {
        let framebuffer = self.backend.framebuffer_size();
        if is_empty(framebuffer) {
            return false;
        }
        let target = match self.bounds {
            Some(bounds) => bounds.clamp(framebuffer),
            None => framebuffer,
        };
        (target.width, target.height) != (self.extent.width, self.extent.height)
    }

    pub fn draw_frame(&mut self) -> Result<FrameStatus> {
        if is_empty(self.backend.framebuffer_size()) {
            return Ok(FrameStatus::Skipped);
        }
        if self.pending_rebuild {
            self.rebuild()?;
            return Ok(FrameStatus::Recreated);
        }
        if self.state != ChainState::Active {
            anyhow::bail!("draw_frame called before the swapchain was created");
        }

        // Step 1: Acquire
        let (image_index, acquire_suboptimal) = match self.backend.acquire_next_image()? {
            AcquireOutcome::Ready { image_index, suboptimal } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.recreate()?;
                return Ok(FrameStatus::Recreated);
            }
        };
        let slot = image_index as usize;
        if slot >= self.image_count {
            anyhow::bail!(
                "Acquired image {} but the chain has {} images",
                image_index,
                self.image_count
            );
        }

        // Step 2: Fence gate
        self.backend.wait_for_slot(slot)?;

        // Step 3: Record
        self.backend
            .record_slot(slot, self.extent)
            .with_context(|| format!("Failed to record commands for image {}", slot))?;

        // Step 4: Submit
        self.backend.submit_slot(slot)?;

        // Step 5: Present
        let presented = self.backend.present(slot)?;

        // Step 6: Recover
        let needs_rebuild = acquire_suboptimal
            || presented != PresentOutcome::Presented
            || self.should_recreate();
        if needs_rebuild {
            log::debug!(
                "Rebuilding swapchain (acquire suboptimal: {}, present: {:?})",
                acquire_suboptimal,
                presented
            );
            self.recreate()?;
            return Ok(FrameStatus::Recreated);
        }

        Ok(FrameStatus::Presented)
    }
}

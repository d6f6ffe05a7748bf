/// View - one presentation surface and its frame state machine
///
/// A View owns the swapchain of one surface together with everything sized
/// after it: the render pass, one framebuffer, fence and command list per
/// swapchain image, the depth image and (with MSAA) the multisample color
/// image. Resize and out-of-date events rebuild all of it; the surface itself
/// survives.
///
/// Frame flow:
///
/// ```text
/// Uninitialized -> Initialized -> Acquired -> Recording -> Submitted
///                             \-> AcquireFailed      \-> (abort_frame) Initialized
/// ```

use std::sync::Arc;
use glam::Mat4;

use crate::config::{Config, SampleCount};
use crate::error::Result;
use crate::gpu::{
    AcquireResult, ClearValue, CommandList, Extent2D, Fence, Framebuffer, FramebufferDesc,
    GraphicsDevice, ImageFormat, PipelineStage, PresentResult, QueueKind, Rect2D, RenderPass,
    RenderPassLayout, Semaphore, Submission, Surface, Swapchain, SwapchainDesc, Viewport,
};
use crate::resource::Image;
use crate::{engine_bail, engine_bail_warn, engine_debug, engine_info, engine_warn};

/// Frame state of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// No swapchain (never created, zero-sized surface, or destroyed)
    Uninitialized,
    /// Swapchain ready, no frame in progress
    Initialized,
    /// The last acquire returned no image
    AcquireFailed,
    /// An image was acquired and may be recorded
    Acquired,
    /// Commands are being recorded for the acquired image
    Recording,
    /// The frame was submitted (and presented)
    Submitted,
}

/// Result of `submit_command_buffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented; the swapchain still matches the surface
    Presented,
    /// Presented; the swapchain is rebuilt before the next frame
    Suboptimal,
    /// Not presented; the swapchain is rebuilt before the next frame
    OutOfDate,
}

/// Per-view settings taken from the renderer configuration
#[derive(Debug, Clone, Copy)]
pub struct ViewDesc {
    pub vsync: bool,
    pub samples: SampleCount,
    pub depth_format: ImageFormat,
    pub clear_color: [f32; 4],
    pub acquire_timeout_ns: u64,
    pub out_of_date_backoff: std::time::Duration,
    /// Swapchains with more images are rejected
    pub max_image_count: u32,
}

impl ViewDesc {
    pub fn from_config(config: &Config) -> Self {
        Self {
            vsync: config.vsync,
            samples: config.samples,
            depth_format: ImageFormat::D32_FLOAT,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            acquire_timeout_ns: config.acquire_timeout_ns,
            out_of_date_backoff: config.out_of_date_backoff,
            max_image_count: config.max_swapchain_images,
        }
    }
}

/// Swapchain color format assumed before the first swapchain exists
const DEFAULT_COLOR_FORMAT: ImageFormat = ImageFormat::B8G8R8A8_SRGB;

/// Presentation target of one window
pub struct View {
    name: String,
    device: Arc<dyn GraphicsDevice>,
    surface: Arc<dyn Surface>,
    desc: ViewDesc,

    swapchain: Option<Box<dyn Swapchain>>,
    render_pass: Option<Arc<dyn RenderPass>>,
    framebuffers: Vec<Arc<dyn Framebuffer>>,
    depth: Option<Image>,
    multisample: Option<Image>,

    /// One per swapchain image, created signaled
    fences: Vec<Box<dyn Fence>>,
    command_lists: Vec<Box<dyn CommandList>>,
    image_available: Box<dyn Semaphore>,
    render_finished: Box<dyn Semaphore>,
    /// Image whose submission must finish before the semaphores are reused
    last_submitted: Option<usize>,

    extent: Extent2D,
    /// Surface extent the current swapchain was requested for
    surface_extent: Extent2D,
    state: ViewState,
    needs_recreate: bool,
    view_matrix: Option<Mat4>,
    recreations: u32,
}

impl View {
    /// Create a view and its first swapchain
    ///
    /// A surface that is currently zero-sized leaves the view uninitialized;
    /// the swapchain is created once the surface has a size.
    pub fn new(device: Arc<dyn GraphicsDevice>, name: &str, surface: Arc<dyn Surface>, desc: ViewDesc) -> Result<Self> {
        let image_available = device.create_semaphore()?;
        let render_finished = device.create_semaphore()?;

        let mut view = Self {
            name: name.to_string(),
            device,
            surface,
            desc,
            swapchain: None,
            render_pass: None,
            framebuffers: Vec::new(),
            depth: None,
            multisample: None,
            fences: Vec::new(),
            command_lists: Vec::new(),
            image_available,
            render_finished,
            last_submitted: None,
            extent: Extent2D::default(),
            surface_extent: Extent2D::default(),
            state: ViewState::Uninitialized,
            needs_recreate: false,
            view_matrix: None,
            recreations: 0,
        };
        view.recreate_swapchain()?;
        Ok(view)
    }

    // ===== SWAPCHAIN LIFECYCLE =====

    /// Compare the surface extent with the swapchain extent
    ///
    /// # Returns
    ///
    /// `true` when the swapchain must be recreated before drawing (size
    /// change, or a previous suboptimal/out-of-date result). The caller
    /// recreates it and skips drawing this view for the current tick.
    pub fn update_extent(&mut self) -> bool {
        let current = self.surface.current_extent();
        if current != self.surface_extent {
            engine_debug!("nebula::View", "View '{}': surface {}x{} -> {}x{}",
                self.name, self.surface_extent.width, self.surface_extent.height, current.width, current.height);
            self.needs_recreate = true;
        }
        self.needs_recreate
    }

    /// Rebuild swapchain, framebuffers and attachments at the surface extent
    ///
    /// # Returns
    ///
    /// `false` when the surface is zero-sized (minimized window); the view
    /// keeps its old swapchain and stays unable to draw until the next call.
    pub fn recreate_swapchain(&mut self) -> Result<bool> {
        let extent = self.surface.current_extent();
        if extent.is_empty() {
            engine_debug!("nebula::View", "View '{}': surface is zero-sized, swapchain not recreated", self.name);
            self.surface_extent = extent;
            self.needs_recreate = true;
            return Ok(false);
        }

        self.wait_for_frames()?;
        self.framebuffers.clear();

        self.surface_extent = extent;
        let old = self.swapchain.take();
        let retired = old.is_some();
        let swapchain = self.device.create_swapchain(
            self.surface.as_ref(),
            &SwapchainDesc { extent, vsync: self.desc.vsync },
            old,
        )?;
        let extent = swapchain.extent();
        if swapchain.image_count() > self.desc.max_image_count {
            engine_bail!("nebula::View", "View '{}': swapchain has {} images, at most {} are supported",
                self.name, swapchain.image_count(), self.desc.max_image_count);
        }

        let layout = RenderPassLayout {
            color_format: swapchain.format(),
            depth_format: self.desc.depth_format,
            samples: self.desc.samples,
        };
        let render_pass = match self.render_pass.take() {
            Some(render_pass) if render_pass.layout() == layout => render_pass,
            _ => self.device.create_render_pass(&layout)?,
        };

        match self.depth.as_mut() {
            Some(depth) => depth.recreate(extent)?,
            None => {
                self.depth = Some(Image::depth(
                    self.device.clone(),
                    &format!("{}_depth", self.name),
                    extent,
                    self.desc.depth_format,
                    self.desc.samples,
                )?);
            }
        }
        if self.desc.samples.is_multisampled() {
            match self.multisample.as_mut() {
                Some(image) => image.recreate(extent)?,
                None => {
                    self.multisample = Some(Image::multisample(
                        self.device.clone(),
                        &format!("{}_msaa", self.name),
                        extent,
                        layout.color_format,
                        self.desc.samples,
                    )?);
                }
            }
        }

        let image_count = swapchain.image_count();
        let mut framebuffers = Vec::with_capacity(image_count as usize);
        {
            let depth = match self.depth.as_ref() {
                Some(depth) => depth.gpu()?.clone(),
                None => engine_bail!("nebula::View", "View '{}': depth image missing", self.name),
            };
            let multisample = match self.multisample.as_ref() {
                Some(image) => Some(image.gpu()?.clone()),
                None => None,
            };
            for image_index in 0..image_count {
                framebuffers.push(self.device.create_framebuffer(&FramebufferDesc {
                    render_pass: render_pass.as_ref(),
                    swapchain: swapchain.as_ref(),
                    image_index,
                    depth: depth.as_ref(),
                    multisample: multisample.as_deref(),
                })?);
            }
        }

        while self.fences.len() < image_count as usize {
            self.fences.push(self.device.create_fence(true)?);
            self.command_lists.push(self.device.create_command_list()?);
        }
        self.fences.truncate(image_count as usize);
        self.command_lists.truncate(image_count as usize);

        self.swapchain = Some(swapchain);
        self.render_pass = Some(render_pass);
        self.framebuffers = framebuffers;
        self.extent = extent;
        self.last_submitted = None;
        self.needs_recreate = false;
        self.state = ViewState::Initialized;
        if retired {
            self.recreations += 1;
        }

        engine_info!("nebula::View", "View '{}': swapchain {}x{} with {} image(s){}",
            self.name, extent.width, extent.height, image_count, if retired { " (recreated)" } else { "" });
        Ok(true)
    }

    /// Block until every submitted frame of this view has finished
    fn wait_for_frames(&self) -> Result<()> {
        for fence in &self.fences {
            if !fence.wait(u64::MAX)? {
                engine_bail!("nebula::View", "View '{}': frame fence never signaled", self.name);
            }
        }
        Ok(())
    }

    // ===== FRAME =====

    /// Acquire the next swapchain image
    ///
    /// # Returns
    ///
    /// `None` when no image can be drawn this tick: the swapchain is out of
    /// date (recreated before the next frame), acquisition timed out, or the
    /// view has no swapchain. A returned image's previous submission has
    /// finished, so its per-image data may be overwritten.
    pub fn acquire_next_image_index(&mut self) -> Result<Option<u32>> {
        if self.swapchain.is_none() {
            self.state = ViewState::AcquireFailed;
            return Ok(None);
        }

        // The semaphore pair is shared by all frames: the previous frame must
        // have consumed it before it is signaled again.
        if let Some(previous) = self.last_submitted {
            if !self.fences[previous].wait(u64::MAX)? {
                engine_bail!("nebula::View", "View '{}': fence of image {} never signaled", self.name, previous);
            }
        }

        let Some(swapchain) = self.swapchain.as_mut() else {
            return Ok(None);
        };
        match swapchain.acquire_next_image(self.desc.acquire_timeout_ns, self.image_available.as_ref())? {
            AcquireResult::Acquired { image_index, suboptimal } => {
                if suboptimal {
                    engine_debug!("nebula::View", "View '{}': suboptimal acquire, recreating next frame", self.name);
                    self.needs_recreate = true;
                }
                let Some(fence) = self.fences.get(image_index as usize) else {
                    engine_bail!("nebula::View", "View '{}': acquired image index {} out of range", self.name, image_index);
                };
                if !fence.wait(u64::MAX)? {
                    engine_bail!("nebula::View", "View '{}': fence of image {} never signaled", self.name, image_index);
                }
                self.state = ViewState::Acquired;
                Ok(Some(image_index))
            }
            AcquireResult::OutOfDate => {
                engine_debug!("nebula::View", "View '{}': swapchain out of date on acquire", self.name);
                self.needs_recreate = true;
                self.state = ViewState::AcquireFailed;
                Ok(None)
            }
            AcquireResult::Timeout => {
                engine_warn!("nebula::View", "View '{}': no swapchain image within {} ns",
                    self.name, self.desc.acquire_timeout_ns);
                self.state = ViewState::AcquireFailed;
                Ok(None)
            }
        }
    }

    /// Start recording into the command list of an acquired image
    ///
    /// Begins the command list and the render pass and sets a full-extent
    /// viewport and scissor. The image's fence stays signaled until submit.
    pub fn begin_command_buffer(&mut self, image_index: u32) -> Result<&mut dyn CommandList> {
        if self.state != ViewState::Acquired {
            engine_bail_warn!("nebula::View", "View '{}': begin_command_buffer in state {:?}", self.name, self.state);
        }
        let index = image_index as usize;
        let (Some(render_pass), Some(framebuffer)) = (self.render_pass.as_ref(), self.framebuffers.get(index)) else {
            engine_bail_warn!("nebula::View", "View '{}': image index {} out of range", self.name, image_index);
        };

        let mut clear_values = Vec::with_capacity(3);
        if self.multisample.is_some() {
            clear_values.push(ClearValue::Color(self.desc.clear_color));
        }
        clear_values.push(ClearValue::DepthStencil { depth: 1.0, stencil: 0 });
        clear_values.push(ClearValue::Color(self.desc.clear_color));

        let cmd = self.command_lists[index].as_mut();
        cmd.begin()?;
        cmd.begin_render_pass(render_pass.as_ref(), framebuffer.as_ref(), self.extent, &clear_values)?;
        cmd.set_viewport(Viewport::from_extent(self.extent))?;
        cmd.set_scissor(Rect2D { x: 0, y: 0, width: self.extent.width, height: self.extent.height })?;

        self.state = ViewState::Recording;
        Ok(cmd)
    }

    /// Close the recording, submit it and present the image
    ///
    /// The submission waits for image-available at the color output stage,
    /// signals render-finished and the image's fence; presentation waits for
    /// render-finished. Suboptimal and out-of-date presents schedule a
    /// swapchain rebuild; out-of-date additionally sleeps for the configured
    /// backoff.
    pub fn submit_command_buffer(&mut self, image_index: u32) -> Result<PresentOutcome> {
        if self.state != ViewState::Recording {
            engine_bail_warn!("nebula::View", "View '{}': submit_command_buffer in state {:?}", self.name, self.state);
        }
        let index = image_index as usize;

        let cmd = self.command_lists[index].as_mut();
        cmd.end_render_pass()?;
        cmd.end()?;

        self.fences[index].reset()?;
        let lists = [self.command_lists[index].as_ref()];
        self.device.submit(&Submission {
            queue: QueueKind::Graphics,
            command_lists: &lists,
            wait: &[(self.image_available.as_ref(), PipelineStage::ColorAttachmentOutput)],
            signal: &[self.render_finished.as_ref()],
            fence: Some(self.fences[index].as_ref()),
        })?;
        self.last_submitted = Some(index);
        self.state = ViewState::Submitted;

        let Some(swapchain) = self.swapchain.as_mut() else {
            engine_bail!("nebula::View", "View '{}': swapchain vanished during the frame", self.name);
        };
        match swapchain.present(image_index, self.render_finished.as_ref())? {
            PresentResult::Optimal => Ok(PresentOutcome::Presented),
            PresentResult::Suboptimal => {
                engine_debug!("nebula::View", "View '{}': suboptimal present, recreating next frame", self.name);
                self.needs_recreate = true;
                Ok(PresentOutcome::Suboptimal)
            }
            PresentResult::OutOfDate => {
                engine_debug!("nebula::View", "View '{}': swapchain out of date on present", self.name);
                self.needs_recreate = true;
                std::thread::sleep(self.desc.out_of_date_backoff);
                Ok(PresentOutcome::OutOfDate)
            }
        }
    }

    /// Abandon the frame of an acquired image after recording failed
    ///
    /// The partial recording is discarded and an empty submission consumes
    /// the image-available signal and re-signals the image's fence. The image
    /// is not presented; the swapchain is rebuilt before the next frame.
    pub fn abort_frame(&mut self, image_index: u32) -> Result<()> {
        if !matches!(self.state, ViewState::Acquired | ViewState::Recording) {
            engine_bail_warn!("nebula::View", "View '{}': abort_frame in state {:?}", self.name, self.state);
        }
        let index = image_index as usize;
        if index >= self.fences.len() {
            engine_bail_warn!("nebula::View", "View '{}': image index {} out of range", self.name, image_index);
        }

        self.command_lists[index].reset()?;
        self.fences[index].reset()?;
        self.device.submit(&Submission {
            queue: QueueKind::Graphics,
            command_lists: &[],
            wait: &[(self.image_available.as_ref(), PipelineStage::ColorAttachmentOutput)],
            signal: &[],
            fence: Some(self.fences[index].as_ref()),
        })?;
        self.last_submitted = Some(index);
        self.needs_recreate = true;
        self.state = ViewState::Initialized;
        engine_warn!("nebula::View", "View '{}': frame on image {} abandoned", self.name, image_index);
        Ok(())
    }

    /// Release every GPU object of the view except the surface
    pub fn destroy(&mut self) {
        if self.state == ViewState::Uninitialized && self.swapchain.is_none() {
            return;
        }
        if let Err(e) = self.wait_for_frames() {
            engine_warn!("nebula::View", "View '{}': {}", self.name, e);
        }
        self.framebuffers.clear();
        self.command_lists.clear();
        self.fences.clear();
        self.multisample = None;
        self.depth = None;
        self.render_pass = None;
        self.swapchain = None;
        self.last_submitted = None;
        self.state = ViewState::Uninitialized;
        engine_debug!("nebula::View", "View '{}' destroyed", self.name);
    }

    // ===== CAMERA =====

    /// Override the renderer's view matrix for this view (`None` restores it)
    pub fn set_view_matrix(&mut self, view: Option<Mat4>) {
        self.view_matrix = view;
    }

    pub fn view_matrix(&self) -> Option<Mat4> {
        self.view_matrix
    }

    // ===== ACCESSORS =====

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn surface(&self) -> &Arc<dyn Surface> {
        &self.surface
    }

    pub fn image_count(&self) -> u32 {
        self.swapchain.as_ref().map(|swapchain| swapchain.image_count()).unwrap_or(0)
    }

    /// True when the next tick rebuilds the swapchain
    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    /// Number of swapchain rebuilds after the first creation
    pub fn swapchain_recreations(&self) -> u32 {
        self.recreations
    }

    /// Attachment layout material pipelines must be built against
    pub fn render_pass_layout(&self) -> RenderPassLayout {
        RenderPassLayout {
            color_format: self
                .swapchain
                .as_ref()
                .map(|swapchain| swapchain.format())
                .unwrap_or(DEFAULT_COLOR_FORMAT),
            depth_format: self.desc.depth_format,
            samples: self.desc.samples,
        }
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
#[path = "view_tests.rs"]
mod tests;

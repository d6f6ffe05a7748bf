/// Mock GraphicsDevice for unit tests (no GPU required)
///
/// Every call is recorded as a string in a shared log so tests can assert on
/// what reached the "GPU". All buffers are backed by real host memory; buffer
/// copies are applied when recorded so tests can inspect device-local bytes.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use rustc_hash::FxHashMap;

use crate::config::SampleCount;
use crate::engine_bail;
use crate::error::{Error, Result};
use crate::gpu::*;

/// Shared call log
pub type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, entry: String) {
    log.lock().unwrap().push(entry);
}

// ============================================================================
// Mock Buffer
// ============================================================================

pub struct MockBuffer {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory: DeviceMemoryInfo,
    data: Box<[UnsafeCell<u8>]>,
}

// Test-only: host memory is accessed through raw pointers like mapped GPU memory
unsafe impl Send for MockBuffer {}
unsafe impl Sync for MockBuffer {}

impl MockBuffer {
    fn new(desc: &BufferDesc, memory: DeviceMemoryInfo) -> Self {
        let data = (0..desc.size).map(|_| UnsafeCell::new(0u8)).collect();
        Self {
            name: desc.name.clone(),
            size: desc.size,
            usage: desc.usage,
            memory,
            data,
        }
    }

    fn ptr(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }

    /// Copy of `len` bytes at `offset`
    pub fn read(&self, offset: u64, len: u64) -> Vec<u8> {
        let mut out = vec![0u8; len as usize];
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr().add(offset as usize), out.as_mut_ptr(), len as usize);
        }
        out
    }

    /// Downcast a buffer created by the mock device
    pub fn from_dyn(buffer: &dyn Buffer) -> &MockBuffer {
        unsafe { &*(buffer as *const dyn Buffer as *const MockBuffer) }
    }
}

impl Buffer for MockBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn memory(&self) -> DeviceMemoryInfo {
        self.memory
    }

    fn mapped_ptr(&self) -> Option<*mut u8> {
        if self.memory.properties.contains(MemoryPropertyFlags::HOST_VISIBLE) {
            Some(self.ptr())
        } else {
            None
        }
    }
}

// ============================================================================
// Mock Image
// ============================================================================

pub struct MockImage {
    pub desc: ImageDesc,
    pub memory: DeviceMemoryInfo,
}

impl MockImage {
    pub fn from_dyn(image: &dyn GpuImage) -> &MockImage {
        unsafe { &*(image as *const dyn GpuImage as *const MockImage) }
    }
}

impl GpuImage for MockImage {
    fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    fn memory(&self) -> DeviceMemoryInfo {
        self.memory
    }

    fn has_sampler(&self) -> bool {
        self.desc.kind.has_sampler()
    }
}

// ============================================================================
// Mock Shader
// ============================================================================

pub struct MockShader {
    pub name: String,
    pub reflection: ShaderReflection,
}

impl ShaderModule for MockShader {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> ShaderStage {
        self.reflection.stage
    }

    fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}

fn ubo(set: u32, binding: u32, name: &str, stages: ShaderStageFlags) -> ReflectedBinding {
    ReflectedBinding {
        set,
        binding,
        name: name.to_string(),
        descriptor_type: DescriptorType::UniformBuffer,
        count: 1,
        stages,
    }
}

fn sampler(binding: u32, name: &str) -> ReflectedBinding {
    ReflectedBinding {
        set: 1,
        binding,
        name: name.to_string(),
        descriptor_type: DescriptorType::CombinedImageSampler,
        count: 1,
        stages: ShaderStageFlags::FRAGMENT,
    }
}

/// Reflection of the default PBR shader pair
pub fn pbr_reflection(stage: ShaderStage) -> ShaderReflection {
    match stage {
        ShaderStage::Vertex => ShaderReflection {
            stage,
            entry_point: "main".to_string(),
            bindings: vec![ubo(0, 0, "camera", ShaderStageFlags::VERTEX)],
            push_constants: vec![PushConstantRange {
                stages: ShaderStageFlags::VERTEX,
                offset: 0,
                size: 64,
            }],
            inputs: vec![
                ReflectedInput { location: 0, name: "inPosition".into(), format: VertexFormat::R32G32B32_SFLOAT },
                ReflectedInput { location: 1, name: "inNormal".into(), format: VertexFormat::R32G32B32_SFLOAT },
                ReflectedInput { location: 2, name: "inTexCoord".into(), format: VertexFormat::R32G32_SFLOAT },
                ReflectedInput { location: 3, name: "inColor".into(), format: VertexFormat::R32G32B32A32_SFLOAT },
            ],
        },
        ShaderStage::Fragment => ShaderReflection {
            stage,
            entry_point: "main".to_string(),
            bindings: vec![
                ubo(0, 0, "camera", ShaderStageFlags::FRAGMENT),
                ubo(1, 0, "material", ShaderStageFlags::FRAGMENT),
                sampler(1, "baseColorTexture"),
                sampler(2, "metallicRoughnessTexture"),
                sampler(3, "normalTexture"),
                sampler(4, "emissiveTexture"),
            ],
            push_constants: vec![],
            inputs: vec![],
        },
    }
}

// ============================================================================
// Mock descriptors
// ============================================================================

pub struct MockDescriptorSetLayout {
    pub desc: DescriptorSetLayoutDesc,
}

impl DescriptorSetLayout for MockDescriptorSetLayout {
    fn desc(&self) -> &DescriptorSetLayoutDesc {
        &self.desc
    }
}

pub struct MockDescriptorSet {
    pub id: u32,
    pub set_index: u32,
    log: CallLog,
}

impl DescriptorSet for MockDescriptorSet {
    fn set_index(&self) -> u32 {
        self.set_index
    }

    fn update(&self, writes: &[DescriptorWrite]) -> Result<()> {
        for write in writes {
            let target = match &write.resource {
                DescriptorResource::Buffer { buffer, offset, range } => format!(
                    "buffer={}@{}+{}",
                    MockBuffer::from_dyn(*buffer).name, offset, range
                ),
                DescriptorResource::Image { image } => format!("image={}", image.desc().name),
            };
            record(
                &self.log,
                format!("write_descriptor(set#{}, set={}, binding={}, {})", self.id, self.set_index, write.binding, target),
            );
        }
        Ok(())
    }
}

pub struct MockDescriptorPool {
    pub desc: DescriptorPoolDesc,
    allocated: u32,
    next_id: Arc<AtomicU32>,
    log: CallLog,
}

impl DescriptorPool for MockDescriptorPool {
    fn desc(&self) -> &DescriptorPoolDesc {
        &self.desc
    }

    fn allocate(&mut self, layouts: &[&dyn DescriptorSetLayout]) -> Result<Option<Vec<Box<dyn DescriptorSet>>>> {
        if self.allocated + layouts.len() as u32 > self.desc.max_sets {
            record(&self.log, "allocate_descriptor_sets: exhausted".to_string());
            return Ok(None);
        }
        self.allocated += layouts.len() as u32;
        record(&self.log, format!("allocate_descriptor_sets({})", layouts.len()));
        Ok(Some(
            layouts
                .iter()
                .map(|layout| {
                    Box::new(MockDescriptorSet {
                        id: self.next_id.fetch_add(1, Ordering::Relaxed),
                        set_index: layout.desc().set,
                        log: self.log.clone(),
                    }) as Box<dyn DescriptorSet>
                })
                .collect(),
        ))
    }
}

// ============================================================================
// Mock pipeline / render pass / framebuffer
// ============================================================================

pub struct MockPipeline {
    pub name: String,
    pub layout: RenderPassLayout,
    pub push_constants: Vec<PushConstantRange>,
}

impl Pipeline for MockPipeline {
    fn render_pass_layout(&self) -> RenderPassLayout {
        self.layout
    }

    fn push_constants(&self) -> &[PushConstantRange] {
        &self.push_constants
    }
}

pub struct MockRenderPass {
    pub layout: RenderPassLayout,
}

impl RenderPass for MockRenderPass {
    fn layout(&self) -> RenderPassLayout {
        self.layout
    }
}

pub struct MockFramebuffer {
    pub extent: Extent2D,
}

impl Framebuffer for MockFramebuffer {
    fn extent(&self) -> Extent2D {
        self.extent
    }
}

// ============================================================================
// Mock CommandList
// ============================================================================

pub struct MockCommandList {
    pub commands: Vec<String>,
    log: CallLog,
}

impl MockCommandList {
    fn push(&mut self, command: String) {
        record(&self.log, format!("cmd:{}", command));
        self.commands.push(command);
    }
}

impl CommandList for MockCommandList {
    fn begin(&mut self) -> Result<()> {
        self.commands.clear();
        self.push("begin".to_string());
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.push("end".to_string());
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.commands.clear();
        self.push("reset".to_string());
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        _render_pass: &dyn RenderPass,
        _framebuffer: &dyn Framebuffer,
        extent: Extent2D,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        self.push(format!("begin_render_pass({}x{}, clears={})", extent.width, extent.height, clear_values.len()));
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.push("end_render_pass".to_string());
        Ok(())
    }

    fn set_viewport(&mut self, _viewport: Viewport) -> Result<()> {
        self.push("set_viewport".to_string());
        Ok(())
    }

    fn set_scissor(&mut self, _scissor: Rect2D) -> Result<()> {
        self.push("set_scissor".to_string());
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> Result<()> {
        let pipeline = unsafe { &*(pipeline as *const dyn Pipeline as *const MockPipeline) };
        self.push(format!("bind_pipeline({})", pipeline.name));
        Ok(())
    }

    fn bind_descriptor_sets(
        &mut self,
        _pipeline: &dyn Pipeline,
        first_set: u32,
        sets: &[&dyn DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        self.push(format!("bind_descriptor_sets(first={}, count={}, dynamic={:?})", first_set, sets.len(), dynamic_offsets));
        Ok(())
    }

    fn push_constants(&mut self, _pipeline: &dyn Pipeline, _stages: ShaderStageFlags, offset: u32, data: &[u8]) -> Result<()> {
        self.push(format!("push_constants({}, {})", offset, data.len()));
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, buffer: &dyn Buffer, offset: u64) -> Result<()> {
        self.push(format!("bind_vertex_buffer({}, {})", MockBuffer::from_dyn(buffer).name, offset));
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, index_type: IndexType) -> Result<()> {
        self.push(format!("bind_index_buffer({}, {}, {:?})", MockBuffer::from_dyn(buffer).name, offset, index_type));
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        self.push(format!("draw({}, {})", vertex_count, first_vertex));
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) -> Result<()> {
        self.push(format!("draw_indexed({}, {}, {})", index_count, first_index, vertex_offset));
        Ok(())
    }

    fn copy_buffer(&mut self, src: &dyn Buffer, src_offset: u64, dst: &dyn Buffer, dst_offset: u64, size: u64) -> Result<()> {
        let src = MockBuffer::from_dyn(src);
        let dst = MockBuffer::from_dyn(dst);
        if src_offset + size > src.size || dst_offset + size > dst.size {
            engine_bail!("nebula::mock", "copy_buffer out of range");
        }
        unsafe {
            std::ptr::copy(src.ptr().add(src_offset as usize), dst.ptr().add(dst_offset as usize), size as usize);
        }
        self.push(format!("copy_buffer({}+{} -> {}+{}, {})", src.name, src_offset, dst.name, dst_offset, size));
        Ok(())
    }

    fn copy_buffer_to_image(&mut self, src: &dyn Buffer, src_offset: u64, dst: &dyn GpuImage) -> Result<()> {
        self.push(format!(
            "copy_buffer_to_image({}+{} -> {})",
            MockBuffer::from_dyn(src).name, src_offset, dst.desc().name
        ));
        Ok(())
    }

    fn transition_image(&mut self, image: &dyn GpuImage, old: ImageLayout, new: ImageLayout) -> Result<()> {
        self.push(format!("transition_image({}, {:?} -> {:?})", image.desc().name, old, new));
        Ok(())
    }
}

// ============================================================================
// Mock sync
// ============================================================================

pub struct MockFence {
    signaled: AtomicBool,
}

impl Fence for MockFence {
    fn wait(&self, _timeout_ns: u64) -> Result<bool> {
        Ok(self.signaled.load(Ordering::Acquire))
    }

    fn reset(&self) -> Result<()> {
        self.signaled.store(false, Ordering::Release);
        Ok(())
    }

    fn is_signaled(&self) -> Result<bool> {
        Ok(self.signaled.load(Ordering::Acquire))
    }
}

pub struct MockSemaphore;

impl Semaphore for MockSemaphore {}

// ============================================================================
// Mock Surface / Swapchain
// ============================================================================

/// Surface whose extent tests can change to simulate a window resize
pub struct MockSurface {
    extent: Mutex<Extent2D>,
}

impl MockSurface {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self { extent: Mutex::new(Extent2D::new(width, height)) })
    }

    pub fn resize(&self, width: u32, height: u32) {
        *self.extent.lock().unwrap() = Extent2D::new(width, height);
    }
}

impl Surface for MockSurface {
    fn current_extent(&self) -> Extent2D {
        *self.extent.lock().unwrap()
    }
}

/// Scripted acquire/present results shared between the device and its swapchains
#[derive(Default)]
pub struct SwapchainScript {
    pub acquire: VecDeque<AcquireResult>,
    pub present: VecDeque<PresentResult>,
}

pub struct MockSwapchain {
    pub extent: Extent2D,
    pub image_count: u32,
    next_image: u32,
    script: Arc<Mutex<SwapchainScript>>,
    log: CallLog,
}

impl Swapchain for MockSwapchain {
    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn extent(&self) -> Extent2D {
        self.extent
    }

    fn format(&self) -> ImageFormat {
        ImageFormat::B8G8R8A8_SRGB
    }

    fn acquire_next_image(&mut self, _timeout_ns: u64, _signal: &dyn Semaphore) -> Result<AcquireResult> {
        let scripted = self.script.lock().unwrap().acquire.pop_front();
        let result = scripted.unwrap_or_else(|| {
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            AcquireResult::Acquired { image_index, suboptimal: false }
        });
        record(&self.log, format!("acquire -> {:?}", result));
        Ok(result)
    }

    fn present(&mut self, image_index: u32, _wait: &dyn Semaphore) -> Result<PresentResult> {
        let result = self.script.lock().unwrap().present.pop_front().unwrap_or(PresentResult::Optimal);
        record(&self.log, format!("present({}) -> {:?}", image_index, result));
        Ok(result)
    }
}

// ============================================================================
// Mock GraphicsDevice
// ============================================================================

/// Mock device that tracks every call without a GPU
pub struct MockDevice {
    pub log: CallLog,
    pub limits: DeviceLimits,
    pub script: Arc<Mutex<SwapchainScript>>,
    /// Reflection overrides keyed by shader name
    pub reflections: Mutex<FxHashMap<String, ShaderReflection>>,
    next_set_id: Arc<AtomicU32>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(Vec::new())),
            limits: DeviceLimits::default(),
            script: Arc::new(Mutex::new(SwapchainScript::default())),
            reflections: Mutex::new(FxHashMap::default()),
            next_set_id: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Snapshot of the call log
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Number of log entries starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|call| call.starts_with(prefix)).count()
    }

    /// Log entries starting with `prefix`
    pub fn calls_with(&self, prefix: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn script_acquire(&self, result: AcquireResult) {
        self.script.lock().unwrap().acquire.push_back(result);
    }

    pub fn script_present(&self, result: PresentResult) {
        self.script.lock().unwrap().present.push_back(result);
    }

    fn record(&self, entry: String) {
        record(&self.log, entry);
    }
}

impl GraphicsDevice for MockDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo { name: "Mock GPU".to_string(), device_type: DeviceType::Discrete }
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn memory_types(&self) -> Vec<MemoryType> {
        vec![
            MemoryType { properties: MemoryPropertyFlags::DEVICE_LOCAL, heap_index: 0 },
            MemoryType {
                properties: MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                heap_index: 1,
            },
        ]
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>> {
        let memory_type_index = select_memory_type(&self.memory_types(), 0b11, desc.memory)
            .ok_or(Error::OutOfMemory)?;
        self.record(format!("create_buffer({}, {})", desc.name, desc.size));
        let memory = DeviceMemoryInfo { size: desc.size, memory_type_index, properties: desc.memory };
        Ok(Arc::new(MockBuffer::new(desc, memory)))
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn GpuImage>> {
        self.record(format!("create_image({}, {:?}, {}x{})", desc.name, desc.kind, desc.width, desc.height));
        let memory = DeviceMemoryInfo {
            size: desc.pixel_data_size(),
            memory_type_index: 0,
            properties: desc.kind.memory_properties(),
        };
        Ok(Arc::new(MockImage { desc: desc.clone(), memory }))
    }

    fn create_shader_module(&self, name: &str, code: &[u8], stage: ShaderStage) -> Result<Arc<dyn ShaderModule>> {
        if code.is_empty() {
            return Err(Error::InvalidShader(format!("'{}' is empty", name)));
        }
        self.record(format!("create_shader_module({}, {:?})", name, stage));
        let reflection = self
            .reflections
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| pbr_reflection(stage));
        Ok(Arc::new(MockShader { name: name.to_string(), reflection }))
    }

    fn create_descriptor_set_layout(&self, desc: &DescriptorSetLayoutDesc) -> Result<Arc<dyn DescriptorSetLayout>> {
        self.record(format!("create_descriptor_set_layout(set={}, bindings={})", desc.set, desc.bindings.len()));
        Ok(Arc::new(MockDescriptorSetLayout { desc: desc.clone() }))
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> Result<Box<dyn DescriptorPool>> {
        self.record(format!("create_descriptor_pool(max_sets={})", desc.max_sets));
        Ok(Box::new(MockDescriptorPool {
            desc: desc.clone(),
            allocated: 0,
            next_id: self.next_set_id.clone(),
            log: self.log.clone(),
        }))
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<Arc<dyn Pipeline>> {
        self.record(format!("create_pipeline({}, samples={})", desc.name, desc.render_pass.samples.count()));
        Ok(Arc::new(MockPipeline {
            name: desc.name.to_string(),
            layout: desc.render_pass,
            push_constants: desc.push_constants.clone(),
        }))
    }

    fn create_render_pass(&self, layout: &RenderPassLayout) -> Result<Arc<dyn RenderPass>> {
        self.record(format!("create_render_pass({:?})", layout.color_format));
        Ok(Arc::new(MockRenderPass { layout: *layout }))
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>> {
        if desc.render_pass.layout().samples != SampleCount::S1 && desc.multisample.is_none() {
            engine_bail!("nebula::mock", "multisampled render pass without a multisample image");
        }
        self.record(format!("create_framebuffer({})", desc.image_index));
        Ok(Arc::new(MockFramebuffer { extent: desc.swapchain.extent() }))
    }

    fn create_command_list(&self) -> Result<Box<dyn CommandList>> {
        Ok(Box::new(MockCommandList { commands: Vec::new(), log: self.log.clone() }))
    }

    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>> {
        Ok(Box::new(MockFence { signaled: AtomicBool::new(signaled) }))
    }

    fn create_semaphore(&self) -> Result<Box<dyn Semaphore>> {
        Ok(Box::new(MockSemaphore))
    }

    fn create_swapchain(
        &self,
        _surface: &dyn Surface,
        desc: &SwapchainDesc,
        old: Option<Box<dyn Swapchain>>,
    ) -> Result<Box<dyn Swapchain>> {
        self.record(format!(
            "create_swapchain({}x{}, retired={})",
            desc.extent.width, desc.extent.height, old.is_some()
        ));
        Ok(Box::new(MockSwapchain {
            extent: desc.extent,
            image_count: 3,
            next_image: 0,
            script: self.script.clone(),
            log: self.log.clone(),
        }))
    }

    fn submit(&self, submission: &Submission) -> Result<()> {
        self.record(format!(
            "submit({:?}, lists={}, waits={}, signals={})",
            submission.queue,
            submission.command_lists.len(),
            submission.wait.len(),
            submission.signal.len()
        ));
        if let Some(fence) = submission.fence {
            let fence = unsafe { &*(fence as *const dyn Fence as *const MockFence) };
            fence.signaled.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.record("wait_idle".to_string());
        Ok(())
    }
}

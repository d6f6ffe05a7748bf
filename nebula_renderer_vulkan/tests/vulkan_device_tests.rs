//! Integration tests for VulkanDevice
//!
//! These tests require a GPU and are marked with #[ignore].
//! Run with: cargo test --test vulkan_device_tests -- --ignored


use gpu_test_utils::{spirv_bytes, test_device, test_surface, EMPTY_FRAGMENT, VEC3_VERTEX};
use nebula_renderer::nebula::gpu::{
    submit_and_wait, AcquireResult, BufferDesc, BufferUsage, DescriptorPoolDesc, DescriptorSetLayoutDesc,
    DescriptorType, GraphicsDevice, ImageDesc, ImageFormat, ImageKind, MemoryPropertyFlags, QueueKind,
    ReflectedBinding, ShaderStage, ShaderStageFlags, SwapchainDesc, VertexFormat,
};
use nebula_renderer::nebula::{Error, SampleCount};
use serial_test::serial;

fn host_buffer(name: &str, size: u64, usage: BufferUsage) -> BufferDesc {
    BufferDesc {
        name: name.to_string(),
        size,
        usage,
        memory: MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
    }
}

fn image_desc(name: &str, kind: ImageKind, width: u32, height: u32, format: ImageFormat) -> ImageDesc {
    ImageDesc {
        name: name.to_string(),
        kind,
        width,
        height,
        format,
        samples: SampleCount::S1,
    }
}

// ============================================================================
// DEVICE
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_device_info_and_limits() {
    let device = test_device();

    assert!(!device.info().name.is_empty());
    let limits = device.limits();
    assert!(limits.min_uniform_buffer_offset_alignment.is_power_of_two());
    assert!(limits.non_coherent_atom_size > 0);
    assert!(limits.max_push_constants_size >= 128);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_memory_types_include_host_visible() {
    let device = test_device();
    let types = device.memory_types();

    assert!(!types.is_empty());
    assert!(types.iter().any(|ty| ty.properties.is_host_coherent()));
    assert!(types.iter().any(|ty| ty.properties.contains(MemoryPropertyFlags::DEVICE_LOCAL)));
}

// ============================================================================
// BUFFERS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_host_buffer_is_mapped() {
    let device = test_device();
    let desc = host_buffer("mapped", 1024, BufferUsage::UNIFORM);
    let buffer = device.create_buffer(&desc).unwrap();

    assert_eq!(buffer.size(), 1024);
    assert_eq!(buffer.usage(), BufferUsage::UNIFORM);
    assert!(buffer.memory().size >= 1024);
    assert!(buffer.mapped_ptr().is_some());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_device_local_buffer_is_not_mapped() {
    let device = test_device();
    let buffer = device
        .create_buffer(&BufferDesc {
            name: "device_local".to_string(),
            size: 4096,
            usage: BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
            memory: MemoryPropertyFlags::DEVICE_LOCAL,
        })
        .unwrap();

    assert!(buffer.mapped_ptr().is_none());
    assert!(buffer.memory().properties.contains(MemoryPropertyFlags::DEVICE_LOCAL));
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_zero_sized_buffer_is_rejected() {
    let device = test_device();
    let desc = host_buffer("empty", 0, BufferUsage::UNIFORM);
    assert!(matches!(device.create_buffer(&desc), Err(Error::InvalidResource(_))));
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_copy_buffer_roundtrip() {
    let device = test_device();
    let src = device
        .create_buffer(&host_buffer("copy_src", 256, BufferUsage::TRANSFER_SRC))
        .unwrap();
    let dst = device
        .create_buffer(&host_buffer("copy_dst", 256, BufferUsage::TRANSFER_DST))
        .unwrap();

    let pattern: Vec<u8> = (0..=255).collect();
    unsafe {
        std::ptr::copy_nonoverlapping(pattern.as_ptr(), src.mapped_ptr().unwrap(), pattern.len());
    }

    submit_and_wait(device.as_ref(), QueueKind::Transfer, |cmd| {
        cmd.copy_buffer(src.as_ref(), 64, dst.as_ref(), 0, 128)
    })
    .unwrap();

    let copied = unsafe { std::slice::from_raw_parts(dst.mapped_ptr().unwrap(), 128) };
    assert_eq!(copied, &pattern[64..192]);
}

// ============================================================================
// IMAGES
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_texture_has_sampler() {
    let device = test_device();
    let texture = device
        .create_image(&image_desc("texture", ImageKind::Texture, 64, 32, ImageFormat::R8G8B8A8_SRGB))
        .unwrap();

    assert!(texture.has_sampler());
    assert_eq!(texture.desc().width, 64);
    assert!(texture.memory().size >= texture.desc().pixel_data_size());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_depth_image_has_no_sampler() {
    let device = test_device();
    let depth = device
        .create_image(&image_desc("depth", ImageKind::Depth, 800, 600, ImageFormat::D32_FLOAT))
        .unwrap();

    assert!(!depth.has_sampler());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_cubemap_requires_square_faces() {
    let device = test_device();

    let cubemap = device
        .create_image(&image_desc("sky", ImageKind::Cubemap, 16, 16, ImageFormat::R8G8B8A8_UNORM))
        .unwrap();
    assert!(cubemap.has_sampler());

    let result = device.create_image(&image_desc("bad_sky", ImageKind::Cubemap, 16, 8, ImageFormat::R8G8B8A8_UNORM));
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_zero_extent_image_is_rejected() {
    let device = test_device();
    let result = device.create_image(&image_desc("flat", ImageKind::Texture, 0, 4, ImageFormat::R8G8B8A8_UNORM));
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

// ============================================================================
// SHADERS / DESCRIPTORS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_shader_module_reflects_inputs() {
    let device = test_device();
    let module = device
        .create_shader_module("vec3.vert", &spirv_bytes(VEC3_VERTEX), ShaderStage::Vertex)
        .unwrap();

    assert_eq!(module.name(), "vec3.vert");
    assert_eq!(module.stage(), ShaderStage::Vertex);
    assert_eq!(module.reflection().inputs.len(), 1);
    assert_eq!(module.reflection().inputs[0].format, VertexFormat::R32G32B32_SFLOAT);

    let fragment = device
        .create_shader_module("empty.frag", &spirv_bytes(EMPTY_FRAGMENT), ShaderStage::Fragment)
        .unwrap();
    assert!(fragment.reflection().bindings.is_empty());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_shader_module_rejects_garbage() {
    let device = test_device();
    let result = device.create_shader_module("garbage", b"definitely not spirv!!!!", ShaderStage::Fragment);
    assert!(matches!(result, Err(Error::InvalidShader(_))));
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_descriptor_pool_exhaustion_returns_none() {
    let device = test_device();
    let layout_desc = DescriptorSetLayoutDesc {
        set: 0,
        bindings: vec![ReflectedBinding {
            set: 0,
            binding: 0,
            name: "camera".to_string(),
            descriptor_type: DescriptorType::UniformBuffer,
            count: 1,
            stages: ShaderStageFlags::VERTEX,
        }],
    };
    let layout = device.create_descriptor_set_layout(&layout_desc).unwrap();
    let mut pool = device
        .create_descriptor_pool(&DescriptorPoolDesc::for_instances(std::slice::from_ref(&layout_desc), 1))
        .unwrap();

    let first = pool.allocate(&[layout.as_ref()]).unwrap();
    assert_eq!(first.as_ref().map(|sets| sets.len()), Some(1));
    assert_eq!(first.unwrap()[0].set_index(), 0);

    let second = pool.allocate(&[layout.as_ref()]).unwrap();
    assert!(second.is_none());
}

// ============================================================================
// SYNC / SWAPCHAIN
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_fence_states() {
    let device = test_device();

    let signaled = device.create_fence(true).unwrap();
    assert!(signaled.is_signaled().unwrap());
    assert!(signaled.wait(0).unwrap());

    signaled.reset().unwrap();
    assert!(!signaled.is_signaled().unwrap());
    assert!(!signaled.wait(0).unwrap());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_swapchain_acquire() {
    let device = test_device();
    let surface = test_surface();
    let extent = surface.current_extent();

    let mut swapchain = device
        .create_swapchain(surface.as_ref(), &SwapchainDesc { extent, vsync: true }, None)
        .unwrap();
    assert!(swapchain.image_count() >= 2);
    assert!(!swapchain.extent().is_empty());

    let image_available = device.create_semaphore().unwrap();
    match swapchain.acquire_next_image(u64::MAX, image_available.as_ref()).unwrap() {
        AcquireResult::Acquired { image_index, .. } => assert!(image_index < swapchain.image_count()),
        other => panic!("unexpected acquire result {:?}", other),
    }

    // Recreate, retiring the old swapchain
    let recreated = device
        .create_swapchain(surface.as_ref(), &SwapchainDesc { extent, vsync: false }, Some(swapchain))
        .unwrap();
    assert!(recreated.image_count() >= 2);
    device.wait_idle().unwrap();
}

//! Unit tests for Image creation, upload ordering and placeholder fallback

use std::sync::Arc;
use crate::asset::DecodedImage;
use crate::config::SampleCount;
use crate::gpu::mock_device::MockDevice;
use crate::gpu::*;
use crate::resource::buffer_pool::BufferPool;
use crate::resource::image::*;

fn setup() -> (Arc<MockDevice>, Arc<dyn GraphicsDevice>, BufferPool) {
    let mock = MockDevice::new();
    let device: Arc<dyn GraphicsDevice> = mock.clone();
    let staging = BufferPool::allocate(
        device.clone(),
        "staging",
        MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        BufferUsage::TRANSFER_SRC,
        1024 * 1024,
    )
    .unwrap();
    (mock, device, staging)
}

fn solid(width: u32, height: u32) -> DecodedImage {
    DecodedImage { width, height, channels: 4, pixels: vec![200; (width * height * 4) as usize] }
}

// ============================================================================
// ATTACHMENTS
// ============================================================================

#[test]
fn test_depth_image_creation() {
    let (mock, device, _staging) = setup();

    let depth = Image::depth(device, "depth", Extent2D::new(800, 600), ImageFormat::D32_FLOAT, SampleCount::S1).unwrap();

    assert_eq!(depth.kind(), ImageKind::Depth);
    assert_eq!(depth.extent(), Extent2D::new(800, 600));
    assert_eq!(depth.layout(), ImageLayout::Undefined);
    assert!(!depth.gpu().unwrap().has_sampler());
    assert_eq!(mock.calls_with("create_image"), vec!["create_image(depth, Depth, 800x600)".to_string()]);
    assert_eq!(mock.count("submit"), 0);
}

#[test]
fn test_attachment_kind_required_for_create() {
    let (_mock, device, _staging) = setup();
    let desc = ImageDesc {
        name: "tex".into(),
        kind: ImageKind::Texture,
        width: 4,
        height: 4,
        format: ImageFormat::R8G8B8A8_SRGB,
        samples: SampleCount::S1,
    };
    assert!(Image::create(device, desc).is_err());
}

#[test]
fn test_recreate_rebuilds_at_new_extent() {
    let (mock, device, _staging) = setup();
    let mut msaa = Image::multisample(device, "msaa", Extent2D::new(100, 100), ImageFormat::B8G8R8A8_SRGB, SampleCount::S4).unwrap();

    msaa.recreate(Extent2D::new(200, 50)).unwrap();

    assert_eq!(msaa.extent(), Extent2D::new(200, 50));
    assert_eq!(msaa.gpu().unwrap().desc().samples, SampleCount::S4);
    assert_eq!(mock.count("create_image(msaa"), 2);
}

#[test]
fn test_destroyed_image_rejects_use() {
    let (_mock, device, _staging) = setup();
    let mut depth = Image::depth(device, "depth", Extent2D::new(8, 8), ImageFormat::D32_FLOAT, SampleCount::S1).unwrap();

    depth.destroy();

    assert!(!depth.is_alive());
    assert!(depth.gpu().is_err());
}

// ============================================================================
// TEXTURE UPLOAD
// ============================================================================

#[test]
fn test_texture_upload_uses_two_semaphore_handoff() {
    let (mock, device, staging) = setup();

    let texture = Image::texture(device, &staging, "albedo", ImageKind::Texture, &solid(4, 4), 64).unwrap();

    assert_eq!(texture.layout(), ImageLayout::ShaderReadOnly);
    assert!(!texture.is_placeholder());
    assert!(texture.gpu().unwrap().has_sampler());

    let submits = mock.calls_with("submit");
    assert_eq!(
        submits,
        vec![
            "submit(Transfer, lists=1, waits=0, signals=1)".to_string(),
            "submit(Transfer, lists=1, waits=1, signals=1)".to_string(),
            "submit(Transfer, lists=1, waits=1, signals=0)".to_string(),
        ]
    );

    let commands: Vec<String> = mock
        .calls_with("cmd:")
        .into_iter()
        .filter(|c| c != "cmd:begin" && c != "cmd:end")
        .collect();
    assert_eq!(
        commands,
        vec![
            "cmd:transition_image(albedo, Undefined -> TransferDst)".to_string(),
            "cmd:copy_buffer_to_image(staging_pool+0 -> albedo)".to_string(),
            "cmd:transition_image(albedo, TransferDst -> ShaderReadOnly)".to_string(),
        ]
    );
    assert_eq!(staging.live_count(), 0);
}

#[test]
fn test_cubemap_has_six_layers() {
    let (_mock, device, staging) = setup();
    let pixels = DecodedImage { width: 2, height: 2, channels: 4, pixels: vec![1; 2 * 2 * 4 * 6] };

    let cube = Image::texture(device, &staging, "sky", ImageKind::Cubemap, &pixels, 64).unwrap();

    assert!(!cube.is_placeholder());
    assert_eq!(cube.desc().kind.layer_count(), 6);
    assert_eq!(cube.desc().kind.view_type(), ImageViewType::Cube);
}

#[test]
fn test_invalid_pixels_fall_back_to_checkerboard() {
    let (mock, device, staging) = setup();
    let broken = DecodedImage { width: 4, height: 4, channels: 4, pixels: vec![0; 10] };

    let texture = Image::texture(device, &staging, "broken", ImageKind::Texture, &broken, 16).unwrap();

    assert!(texture.is_placeholder());
    assert_eq!(texture.extent(), Extent2D::new(16, 16));
    assert_eq!(texture.layout(), ImageLayout::ShaderReadOnly);
    assert_eq!(mock.count("create_image(broken, Texture, 16x16)"), 1);
}

#[test]
fn test_placeholder_texture() {
    let (_mock, device, staging) = setup();

    let placeholder = Image::placeholder(device, &staging, 64).unwrap();

    assert!(placeholder.is_placeholder());
    assert_eq!(placeholder.name(), "placeholder");
    assert_eq!(placeholder.extent(), Extent2D::new(64, 64));
}

#[test]
fn test_texture_larger_than_staging_fails() {
    let (_mock, device, _) = setup();
    let tiny_staging = BufferPool::allocate(
        device.clone(),
        "staging",
        MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        BufferUsage::TRANSFER_SRC,
        16,
    )
    .unwrap();

    let result = Image::texture(device, &tiny_staging, "big", ImageKind::Texture, &solid(8, 8), 64);
    assert!(matches!(result, Err(crate::error::Error::OutOfSpace { .. })));
}

#[test]
fn test_texture_cannot_be_recreated() {
    let (_mock, device, staging) = setup();
    let mut texture = Image::texture(device, &staging, "albedo", ImageKind::Texture, &solid(2, 2), 64).unwrap();
    assert!(texture.recreate(Extent2D::new(4, 4)).is_err());
}

#[test]
fn test_record_transition_tracks_layout() {
    let (mock, device, _staging) = setup();
    let mut depth = Image::depth(device.clone(), "depth", Extent2D::new(8, 8), ImageFormat::D32_FLOAT, SampleCount::S1).unwrap();
    let mut cmd = device.create_command_list().unwrap();

    depth.record_transition(cmd.as_mut(), ImageLayout::DepthStencilAttachment).unwrap();

    assert_eq!(depth.layout(), ImageLayout::DepthStencilAttachment);
    assert_eq!(mock.count("cmd:transition_image(depth, Undefined -> DepthStencilAttachment)"), 1);
}

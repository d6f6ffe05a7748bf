//! Unit tests for renderer <-> Vulkan conversions
//!
//! Pure mapping functions, no GPU required.

use ash::vk;
use gpu_allocator::MemoryLocation;
use nebula_renderer::nebula::gpu::{
    BufferUsage, DescriptorType, ImageAspect, ImageFormat, ImageKind, ImageLayout,
    MemoryPropertyFlags, ShaderStageFlags, VertexFormat,
};
use nebula_renderer::nebula::{DebugSeverity, SampleCount};
use crate::conversion::*;

// ============================================================================
// FORMATS
// ============================================================================

#[test]
fn test_image_formats_map_both_ways() {
    let formats = [
        ImageFormat::R8G8B8A8_SRGB,
        ImageFormat::R8G8B8A8_UNORM,
        ImageFormat::B8G8R8A8_SRGB,
        ImageFormat::B8G8R8A8_UNORM,
        ImageFormat::D16_UNORM,
        ImageFormat::D32_FLOAT,
        ImageFormat::D24_UNORM_S8_UINT,
    ];
    for format in formats {
        assert_eq!(image_format_from_vk(image_format_to_vk(format)), Some(format));
    }
    assert_eq!(image_format_to_vk(ImageFormat::D32_FLOAT), vk::Format::D32_SFLOAT);
}

#[test]
fn test_unknown_surface_format_is_none() {
    assert_eq!(image_format_from_vk(vk::Format::A2B10G10R10_UNORM_PACK32), None);
}

#[test]
fn test_vertex_formats() {
    assert_eq!(vertex_format_to_vk(VertexFormat::R32G32B32_SFLOAT), vk::Format::R32G32B32_SFLOAT);
    assert_eq!(vertex_format_to_vk(VertexFormat::R32G32_SFLOAT), vk::Format::R32G32_SFLOAT);
    assert_eq!(vertex_format_to_vk(VertexFormat::R32G32B32A32_UINT), vk::Format::R32G32B32A32_UINT);
    assert_eq!(vertex_format_to_vk(VertexFormat::R32_SINT), vk::Format::R32_SINT);
}

// ============================================================================
// USAGE / MEMORY
// ============================================================================

#[test]
fn test_geometry_pool_usage() {
    let flags = buffer_usage_to_vk(BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::TRANSFER_DST);
    assert_eq!(
        flags,
        vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
    );
}

#[test]
fn test_image_kind_usage_and_aspect() {
    assert_eq!(
        image_usage_to_vk(ImageKind::Texture.usage()),
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
    );
    assert_eq!(
        image_usage_to_vk(ImageKind::Multisample.usage()),
        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
    );
    assert_eq!(aspect_to_vk(ImageAspect::DEPTH | ImageAspect::STENCIL),
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
}

#[test]
fn test_memory_location_for_properties() {
    assert_eq!(memory_location(MemoryPropertyFlags::DEVICE_LOCAL), MemoryLocation::GpuOnly);
    assert_eq!(
        memory_location(MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT),
        MemoryLocation::CpuToGpu
    );
    assert_eq!(
        memory_location(MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED),
        MemoryLocation::GpuToCpu
    );
}

#[test]
fn test_memory_properties_from_vk() {
    let properties = memory_properties_from_vk(
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    );
    assert!(properties.is_host_coherent());
    assert!(!properties.contains(MemoryPropertyFlags::DEVICE_LOCAL));
}

// ============================================================================
// SHADERS / PIPELINE STATE
// ============================================================================

#[test]
fn test_descriptor_types() {
    assert_eq!(descriptor_type_to_vk(DescriptorType::UniformBuffer), vk::DescriptorType::UNIFORM_BUFFER);
    assert_eq!(descriptor_type_to_vk(DescriptorType::StorageBuffer), vk::DescriptorType::STORAGE_BUFFER);
    assert_eq!(
        descriptor_type_to_vk(DescriptorType::UniformBufferDynamic),
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
    );
    assert_eq!(
        descriptor_type_to_vk(DescriptorType::CombinedImageSampler),
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER
    );
}

#[test]
fn test_stage_flags() {
    assert_eq!(stage_flags_to_vk(ShaderStageFlags::NONE), vk::ShaderStageFlags::empty());
    assert_eq!(
        stage_flags_to_vk(ShaderStageFlags::VERTEX_FRAGMENT),
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
    );
}

#[test]
fn test_sample_counts() {
    assert_eq!(sample_count_to_vk(SampleCount::S1), vk::SampleCountFlags::TYPE_1);
    assert_eq!(sample_count_to_vk(SampleCount::S8), vk::SampleCountFlags::TYPE_8);
}

#[test]
fn test_upload_transition_masks() {
    let (src_access, src_stage) = layout_access(ImageLayout::Undefined);
    let (dst_access, dst_stage) = layout_access(ImageLayout::TransferDst);
    assert_eq!(src_access, vk::AccessFlags::empty());
    assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    assert_eq!(dst_access, vk::AccessFlags::TRANSFER_WRITE);
    assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

    let (read_access, read_stage) = layout_access(ImageLayout::ShaderReadOnly);
    assert_eq!(read_access, vk::AccessFlags::SHADER_READ);
    assert_eq!(read_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    assert_eq!(image_layout_to_vk(ImageLayout::ShaderReadOnly), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
}

// ============================================================================
// QUEUES
// ============================================================================

#[test]
fn test_transfer_queue_separate_when_family_has_two() {
    assert_eq!(graphics_family_queues(2), (2, 1));
    assert_eq!(graphics_family_queues(16), (2, 1));
}

#[test]
fn test_transfer_queue_shared_when_family_has_one() {
    assert_eq!(graphics_family_queues(1), (1, 0));
}

// ============================================================================
// DEBUG
// ============================================================================

#[test]
fn test_debug_severity_flags() {
    assert_eq!(debug_severity_flags(DebugSeverity::ErrorsOnly), vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
    let all = debug_severity_flags(DebugSeverity::All);
    assert!(all.contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
    assert!(!debug_severity_flags(DebugSeverity::ErrorsAndWarnings)
        .contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
}

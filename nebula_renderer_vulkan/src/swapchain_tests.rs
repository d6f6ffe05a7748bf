use super::*;

fn capabilities(min_count: u32, max_count: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: min_count,
        max_image_count: max_count,
        current_extent: current,
        min_image_extent: vk::Extent2D { width: 1, height: 1 },
        max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
        ..Default::default()
    }
}

fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
    vk::SurfaceFormatKHR {
        format,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }
}

// ============================================================================
// SURFACE FORMAT
// ============================================================================

#[test]
fn test_surface_format_prefers_srgb() {
    let formats = [
        surface_format(vk::Format::B8G8R8A8_UNORM),
        surface_format(vk::Format::B8G8R8A8_SRGB),
    ];
    let chosen = choose_surface_format(&formats).unwrap();
    assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
}

#[test]
fn test_surface_format_falls_back_to_known_format() {
    let formats = [
        surface_format(vk::Format::A2B10G10R10_UNORM_PACK32),
        surface_format(vk::Format::B8G8R8A8_UNORM),
    ];
    let chosen = choose_surface_format(&formats).unwrap();
    assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
}

#[test]
fn test_surface_format_none_when_nothing_usable() {
    assert!(choose_surface_format(&[]).is_none());
    assert!(choose_surface_format(&[surface_format(vk::Format::A2B10G10R10_UNORM_PACK32)]).is_none());
}

// ============================================================================
// PRESENT MODE
// ============================================================================

#[test]
fn test_present_mode_vsync_is_fifo() {
    let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
    assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
}

#[test]
fn test_present_mode_without_vsync() {
    let all = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
    assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);

    let no_mailbox = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
    assert_eq!(choose_present_mode(&no_mailbox, false), vk::PresentModeKHR::IMMEDIATE);

    let fifo_only = [vk::PresentModeKHR::FIFO];
    assert_eq!(choose_present_mode(&fifo_only, false), vk::PresentModeKHR::FIFO);
}

// ============================================================================
// EXTENT / IMAGE COUNT
// ============================================================================

#[test]
fn test_extent_uses_fixed_surface_extent() {
    let caps = capabilities(2, 3, vk::Extent2D { width: 800, height: 600 });
    let extent = choose_extent(&caps, Extent2D::new(1024, 768));
    assert_eq!(extent, vk::Extent2D { width: 800, height: 600 });
}

#[test]
fn test_extent_clamps_requested_size() {
    let caps = capabilities(2, 3, vk::Extent2D { width: u32::MAX, height: u32::MAX });
    assert_eq!(
        choose_extent(&caps, Extent2D::new(1024, 768)),
        vk::Extent2D { width: 1024, height: 768 }
    );
    assert_eq!(
        choose_extent(&caps, Extent2D::new(8192, 0)),
        vk::Extent2D { width: 4096, height: 1 }
    );
}

#[test]
fn test_image_count_one_above_minimum() {
    let current = vk::Extent2D { width: 800, height: 600 };
    assert_eq!(choose_image_count(&capabilities(2, 8, current)), 3);
    assert_eq!(choose_image_count(&capabilities(3, 3, current)), 3);
    // No maximum
    assert_eq!(choose_image_count(&capabilities(2, 0, current)), 3);
}

/// View module - per-surface swapchain and frame state

pub mod view;

pub use view::{PresentOutcome, View, ViewDesc, ViewState};

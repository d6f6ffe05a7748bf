/// Asset module - model graph types and CPU image decoding

pub mod model;
pub mod decoder;

pub use model::*;
pub use decoder::*;

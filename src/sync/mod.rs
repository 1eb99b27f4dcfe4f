pub mod dead_letter;
pub mod engine;

pub use dead_letter::*;
pub use engine::*;

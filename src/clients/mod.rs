pub mod embeddings;
pub mod keyword;
pub mod vector;

pub use embeddings::*;
pub use keyword::*;
pub use vector::*;

pub mod clients;
pub mod collection;
pub mod config;
pub mod fusion;
pub mod handlers;
pub mod identity;
pub mod mapping;
pub mod metrics;
pub mod models;
pub mod processing;
pub mod sync;

#[cfg(test)]
mod test_support;

// Convenient re-exports for tests and external callers
pub use clients::*;
pub use collection::*;
pub use config::*;
pub use fusion::*;
pub use handlers::*;
pub use identity::*;
pub use mapping::*;
pub use models::*;
pub use processing::*;
pub use sync::*;

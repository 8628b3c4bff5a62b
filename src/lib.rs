// Library interface for Jobfront
// This allows integration tests and external code to use Jobfront's modules

pub mod access;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod http;
pub mod key;
pub mod logging;
pub mod registry;
pub mod render;
pub mod result;

// Re-export commonly used types
pub use cache::{create_cache, MemoryCache, ResultCache};
pub use dispatch::Dispatcher;
pub use engine::{Engine, EntityKind};
pub use key::ResultKey;
pub use registry::EntityRegistry;
pub use result::ExecutionResult;

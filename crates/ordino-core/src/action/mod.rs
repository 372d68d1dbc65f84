//! Executor contract and registry.
//!
//! - `executor` - the [`ActionExecutor`] trait all capabilities implement
//! - `boxed` - object-safe wrapper so heterogeneous executors share a registry
//! - `registry` - name-indexed executor lookup used by the engine
//! - `builtin` - context-only executors that ship with the engine

pub mod boxed;
pub mod builtin;
pub mod executor;
pub mod registry;

pub use boxed::BoxActionExecutor;
pub use executor::ActionExecutor;
pub use registry::ExecutorRegistry;

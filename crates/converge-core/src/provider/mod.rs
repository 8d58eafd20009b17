//! Provider client implementations
//!
//! The core only talks to [`ProviderClient`](crate::traits::ProviderClient).
//! Real API bindings live outside this crate; [`MemoryProvider`] simulates
//! an eventually-consistent account for tests and demos.

pub mod memory;

pub use memory::MemoryProvider;

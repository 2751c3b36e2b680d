//! Shared per-context state registries.
//!
//! These maps are the only cross-context shared mutable state in the engine.
//! Every mutation is atomic per key (a single operation under the registry's
//! lock), so concurrent per-context loops never observe a partial update to
//! another context's entry.

pub mod connectivity;
pub mod informers;
pub mod resource;

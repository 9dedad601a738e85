//! Per-architecture model wiring over the graph (spec §1's out-of-scope
//! note: treated as a `BlockBuilder` interface, one concrete
//! implementation provided here).

pub mod llama;

pub use llama::{BlockBuilder, LlamaBlockBuilder};

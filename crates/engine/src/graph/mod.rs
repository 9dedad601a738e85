//! The lazy tensor computation graph (spec §2.B, §3, §4.B).

pub mod builder;
pub mod exec;
pub mod node;
pub mod reset;
pub mod weights;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub use node::{
    ActivationKind, BinaryOp, BroadcastInfo, GemmScales, GraphNode, NodeId, OpKind, ReduceOp,
    ScalarOp,
};

use crate::buffer::{Buffer, BufferDesc};
use crate::error::Result;
use weights::WeightMapping;

/// Per-node elapsed time and output shape summary, recorded when a
/// `Profile` sink is supplied to `execute` (spec §4.B).
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    pub node_id: NodeId,
    pub op_name: &'static str,
    pub elapsed: std::time::Duration,
    pub output_shape: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub entries: Vec<ProfileEntry>,
}

/// Owns the node arena, the weight mmap holders and the weight cache
/// (spec §3's `Graph`). Nodes are addressed by `NodeId`, a plain index
/// into `nodes` — the graph never hands out pointers.
pub struct Graph {
    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) weight_mappings: Vec<WeightMapping>,
    pub(crate) weight_cache: HashMap<PathBuf, NodeId>,
    pub(crate) external_inputs: HashSet<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            weight_mappings: Vec::new(),
            weight_cache: HashMap::new(),
            external_inputs: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut GraphNode {
        &mut self.nodes[id.0]
    }

    pub fn desc(&self, id: NodeId) -> &BufferDesc {
        &self.nodes[id.0].output_desc
    }

    pub(crate) fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len())
    }

    pub(crate) fn push(&mut self, op: OpKind, inputs: Vec<NodeId>, desc: BufferDesc) -> NodeId {
        let id = self.next_id();
        self.nodes.push(GraphNode::new(id, op, inputs, desc));
        id
    }

    /// Registers `id` as externally owned — its buffer is supplied by
    /// the caller rather than allocated by `execute`, and it survives
    /// a soft reset (spec §3 lifecycle).
    pub fn mark_external_input(&mut self, id: NodeId, data: Buffer) {
        self.nodes[id.0].output = data;
        self.external_inputs.insert(id);
    }

    /// `mmap_weights(path)`: consults the cache first; on miss, maps the
    /// file, creates an INPUT node over the mapped payload, and records
    /// it. Two calls with the same path return the same id and never
    /// produce two distinct mmaps (invariant 4). Paths are used
    /// byte-identical, uncanonicalized, per spec §9's cache-coherence
    /// note.
    pub fn mmap_weights(&mut self, path: &Path) -> Result<NodeId> {
        if let Some(&id) = self.weight_cache.get(path) {
            return Ok(id);
        }
        let (desc, mapping) = weights::map_weight_file(path)?;
        // SAFETY: `mapping` is pushed into `self.weight_mappings` below
        // and lives exactly as long as `self`, which the node borrows.
        let buffer = unsafe { weights::borrow_payload(&mapping) };
        let id = self.push(OpKind::Input, Vec::new(), desc);
        self.nodes[id.0].output = buffer;
        self.weight_mappings.push(mapping);
        self.weight_cache.insert(path.to_path_buf(), id);
        self.external_inputs.insert(id);
        Ok(id)
    }

    pub fn is_weight(&self, id: NodeId) -> bool {
        self.weight_cache.values().any(|&w| w == id)
    }

    /// Creates an INPUT node carrying caller-supplied data for exactly
    /// this step (token ids, KV-cache context read back as a tensor).
    /// Unlike [`Graph::mark_external_input`] this does NOT register the
    /// node as preserved across `soft_reset` — per-step inputs are
    /// reclaimed along with the activations computed from them, the
    /// same as the original buffers they are views over.
    pub fn new_input(&mut self, desc: BufferDesc, data: Buffer) -> NodeId {
        let id = self.push(OpKind::Input, Vec::new(), desc);
        self.nodes[id.0].output = data;
        id
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

//! Soft and hard reset (spec §4.B, §9 open question #2).
//!
//! The source this spec was distilled from preserved nodes by
//! `id <= max(preserved_id)`, which only happens to be correct while
//! the preserved set is dense at the low end of the id range. This
//! tracks the preserved set explicitly instead, so renumbering is
//! correct even if non-weight nodes are ever created early.

use std::collections::HashMap;

use super::node::NodeId;
use super::Graph;

impl Graph {
    /// Preserves exactly `{INPUT nodes with external data} ∪ {nodes in
    /// weight cache}`; everything else is dropped and `next_node_id` is
    /// reset to one past the highest preserved id.
    pub fn soft_reset(&mut self) {
        let mut preserved: Vec<NodeId> = self.external_inputs.iter().copied().collect();
        preserved.sort();
        preserved.dedup();

        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        let mut kept = Vec::with_capacity(preserved.len());
        for (new_idx, &old_id) in preserved.iter().enumerate() {
            let new_id = NodeId(new_idx);
            remap.insert(old_id, new_id);
            let mut node = self.nodes[old_id.0].clone();
            node.id = new_id;
            kept.push(node);
        }

        self.nodes = kept;
        self.external_inputs = preserved.iter().map(|old| remap[old]).collect();
        let mut new_cache = HashMap::new();
        for (path, old_id) in self.weight_cache.drain() {
            if let Some(&new_id) = remap.get(&old_id) {
                new_cache.insert(path, new_id);
            }
        }
        self.weight_cache = new_cache;
    }

    /// Drops all nodes and unmaps every weight file.
    pub fn hard_reset(&mut self) {
        self.nodes.clear();
        self.weight_mappings.clear();
        self.weight_cache.clear();
        self.external_inputs.clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::buffer::{Buffer, BufferDesc, OwnedData};
    use crate::graph::{BinaryOp, Graph};
    use crate::precision::Precision;

    fn scalar_input(graph: &mut Graph, value: f32) -> super::NodeId {
        let desc = BufferDesc::new(vec![1], Precision::F32);
        graph.new_input(desc, Buffer::Owned(OwnedData::F32(vec![value])))
    }

    #[test]
    fn soft_reset_preserves_external_inputs_and_drops_activations() {
        let mut graph = Graph::new();
        let weight = scalar_input(&mut graph, 1.0);
        graph.mark_external_input(weight, Buffer::Owned(OwnedData::F32(vec![1.0])));

        let per_step = scalar_input(&mut graph, 2.0);
        let activation = graph
            .build_elementwise_binary(BinaryOp::Add, weight, per_step)
            .unwrap();

        assert_eq!(graph.len(), 3);
        graph.soft_reset();

        // Only the externally-marked node survives; the per-step input
        // and the activation computed from it are both dropped.
        assert_eq!(graph.len(), 1);
        let remapped = super::NodeId(0);
        assert_eq!(graph.node(remapped).output.view().to_f32_vec(None), vec![1.0]);
        let _ = activation;
    }

    #[test]
    fn hard_reset_clears_weight_cache_too() {
        let mut graph = Graph::new();
        let weight = scalar_input(&mut graph, 1.0);
        graph.mark_external_input(weight, Buffer::Owned(OwnedData::F32(vec![1.0])));
        assert_eq!(graph.len(), 1);

        graph.hard_reset();
        assert_eq!(graph.len(), 0);
        assert!(graph.weight_cache.is_empty());
        assert!(graph.external_inputs.is_empty());
    }
}

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{
    graph::Graph,
    node::NodeId,
    op::CustomAggregator,
    signature::{AssetFile, SignatureDef},
    value::ValueId,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// A graph together with the metadata that travels with it into a bundle.
#[derive(Default, Clone, Debug)]
pub struct Model {
    pub graph: Graph,
    pub signatures: BTreeMap<String, SignatureDef>,
    pub tags: BTreeSet<String>,
    pub asset_files: Vec<AssetFile>,
}

impl Model {
    pub fn get_value_users(&self) -> FxHashMap<ValueId, FxHashSet<NodeId>> {
        let mut value_users: FxHashMap<ValueId, FxHashSet<NodeId>> = FxHashMap::default();

        for (node_id, node) in self.graph.live_nodes() {
            for &input in node.inputs.iter() {
                value_users.entry(input).or_default().insert(node_id);
            }
        }

        value_users
    }

    pub fn get_value_parents(&self) -> FxHashMap<ValueId, NodeId> {
        let mut value_parents = FxHashMap::default();

        for (node_id, node) in self.graph.live_nodes() {
            for &output in node.outputs.iter() {
                value_parents.insert(output, node_id);
            }
        }

        value_parents
    }

    /// Returns live nodes in a topological order. Ties are broken by insertion order, so the
    /// result is deterministic for a given graph.
    pub fn topo_sort_nodes(&self) -> Vec<NodeId> {
        let value_parents = self.get_value_parents();
        let value_users = self.get_value_users();

        let mut nodes = vec![];
        let mut num_node_inputs = FxHashMap::default();
        let mut que = VecDeque::new();

        for (id, node) in self.graph.live_nodes() {
            let pending = node
                .inputs
                .iter()
                .filter(|input| value_parents.contains_key(input))
                .collect::<FxHashSet<_>>()
                .len();
            num_node_inputs.insert(id, pending);
            if pending == 0 {
                que.push_back(id);
            }
        }

        while let Some(id) = que.pop_front() {
            nodes.push(id);
            let mut ready = vec![];
            for output in self.graph.nodes[id].outputs.iter() {
                let Some(users) = value_users.get(output) else {
                    continue;
                };
                for &user in users {
                    let Some(n) = num_node_inputs.get_mut(&user) else {
                        continue;
                    };
                    *n -= 1;
                    if *n == 0 {
                        ready.push(user);
                    }
                }
            }
            ready.sort_by_key(|id| id.index());
            que.extend(ready);
        }

        nodes
    }

    /// Returns the nodes whose outputs (transitively) feed any of `values`.
    pub fn reachable_nodes(&self, values: &[ValueId]) -> FxHashSet<NodeId> {
        let value_parents = self.get_value_parents();
        let mut reachable = FxHashSet::default();
        let mut visited_vals = FxHashSet::default();
        let mut worklist = values.to_vec();

        while let Some(val) = worklist.pop() {
            if !visited_vals.insert(val) {
                continue;
            }
            let Some(&parent) = value_parents.get(&val) else {
                continue;
            };
            if reachable.insert(parent) {
                worklist.extend(self.graph.nodes[parent].inputs.iter().copied());
            }
        }

        reachable
    }

    /// Iterates over custom aggregator nodes in insertion order.
    pub fn aggregators(&self) -> impl Iterator<Item = (NodeId, &CustomAggregator)> {
        self.graph
            .live_nodes()
            .filter_map(|(id, node)| node.op.as_aggregator().map(|agg| (id, agg)))
    }
}

use rustc_hash::FxHashMap as HashMap;

use crate::{
    node::{Node, NodeArena, NodeId},
    tensor::Tensor,
    value::{ValueArena, ValueId},
};

#[derive(Default, Clone, Debug)]
pub struct Graph {
    pub nodes: NodeArena,
    pub values: ValueArena,
    pub inits: HashMap<ValueId, Tensor>,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
}

impl Graph {
    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.alloc(node)
    }

    /// Iterates over live nodes in insertion order.
    pub fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().filter(|(_, node)| !node.deleted)
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.live_nodes()
            .find(|(_, node)| node.name.as_deref() == Some(name))
            .map(|(id, _)| id)
    }
}

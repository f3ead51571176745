pub mod assign_ids;
pub mod dump_tensor;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::model::Model;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("Custom aggregator id '{id}' is shared by '{first}' and '{second}'")]
    DuplicateAggregatorId {
        id: String,
        first: String,
        second: String,
    },

    #[error("Node name '{0}' is not unique")]
    DuplicateNodeName(String),
}

/// Checks that named nodes have unique names.
pub fn verify_node_names(model: &Model) -> Result<(), TransformError> {
    let mut seen = FxHashSet::default();
    for (_, node) in model.graph.live_nodes() {
        if let Some(name) = node.name.as_deref() {
            if !seen.insert(name) {
                return Err(TransformError::DuplicateNodeName(name.to_string()));
            }
        }
    }
    Ok(())
}

/// Checks that no two aggregators share a non-empty id and returns the ids in use.
pub fn verify_aggregator_ids(model: &Model) -> Result<FxHashSet<String>, TransformError> {
    let mut owners: FxHashMap<&str, String> = FxHashMap::default();
    for (node_id, agg) in model.aggregators() {
        if agg.id.is_empty() {
            continue;
        }
        let name = model.graph.nodes[node_id].display_name(node_id);
        if let Some(first) = owners.get(agg.id.as_str()) {
            return Err(TransformError::DuplicateAggregatorId {
                id: agg.id.clone(),
                first: first.clone(),
                second: name,
            });
        }
        owners.insert(&agg.id, name);
    }
    Ok(owners.into_keys().map(str::to_string).collect())
}

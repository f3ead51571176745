use std::time::Instant;

use rustc_hash::FxHashSet;
use sha1::{Digest, Sha1};

use crate::{
    model::Model,
    node::NodeId,
    transform::{verify_aggregator_ids, verify_node_names, TransformError},
};

/// Number of hex digits kept from the digest.
const ID_LEN: usize = 16;

/// Gives every custom aggregator without an id a unique one. Existing ids are kept, so
/// running this on an already-assigned model is a no-op. Returns the number of new ids.
///
/// Ids are derived from the node name, which makes them independent of node order and
/// reproducible across runs over the same graph.
pub fn assign_aggregator_ids(model: &mut Model) -> Result<usize, TransformError> {
    let start = Instant::now();

    verify_node_names(model)?;
    let mut taken = verify_aggregator_ids(model)?;

    let pending = model
        .aggregators()
        .filter(|(_, agg)| agg.id.is_empty())
        .map(|(id, _)| id)
        .collect::<Vec<NodeId>>();

    for &node_id in &pending {
        let seed = model.graph.nodes[node_id].display_name(node_id);
        let id = fresh_id(&seed, &taken);
        log::debug!("assign id {id} to {seed}");
        taken.insert(id.clone());
        if let Some(agg) = model.graph.nodes[node_id].op.as_aggregator_mut() {
            agg.id = id;
        }
    }

    let count = pending.len();
    log::info!("assign_aggregator_ids({count}): {:?}", start.elapsed());

    Ok(count)
}

fn fresh_id(seed: &str, taken: &FxHashSet<String>) -> String {
    let mut salt = 0usize;
    loop {
        let id = if salt == 0 {
            hash_id(seed)
        } else {
            hash_id(&format!("{seed}#{salt}"))
        };
        if !taken.contains(&id) {
            return id;
        }
        salt += 1;
    }
}

fn hash_id(input: &str) -> String {
    let digest = Sha1::digest(input.as_bytes());
    digest
        .iter()
        .take(ID_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect()
}

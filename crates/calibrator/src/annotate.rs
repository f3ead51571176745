use std::time::Instant;

use quantcal_core::model::Model;
use rustc_hash::FxHashMap;

use crate::statistics::CalibrationRange;

/// Writes `min` / `max` into every aggregator whose id has a range. Aggregators without a
/// range keep their attributes. Returns the number of annotated aggregators.
pub fn write_back(model: &mut Model, ranges: &FxHashMap<String, CalibrationRange>) -> usize {
    let start = Instant::now();
    let mut count = 0;

    for (_, node) in model.graph.nodes.iter_mut() {
        if node.deleted {
            continue;
        }
        let Some(agg) = node.op.as_aggregator_mut() else {
            continue;
        };
        let Some(range) = ranges.get(&agg.id) else {
            continue;
        };
        agg.min = Some(range.min);
        agg.max = Some(range.max);
        count += 1;
    }

    log::info!("write_back({count}): {:?}", start.elapsed());

    count
}

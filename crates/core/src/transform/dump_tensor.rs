use std::time::Instant;

use crate::model::Model;

/// File name the dump nodes of a quantized model write to.
pub const QUANTIZED_TENSOR_DATA: &str = "quantized_tensor_data.pb";

/// File name the dump nodes of the unquantized model write to.
pub const UNQUANTIZED_TENSOR_DATA: &str = "unquantized_tensor_data.pb";

/// Sets `enabled` on every `DumpTensor` node. Returns the number of dump nodes.
pub fn enable_dump_tensor(model: &mut Model) -> usize {
    let start = Instant::now();
    let mut count = 0;

    for (_, node) in model.graph.nodes.iter_mut() {
        if node.deleted {
            continue;
        }
        if let Some(dump) = node.op.as_dump_tensor_mut() {
            dump.enabled = true;
            count += 1;
        }
    }

    log::info!("enable_dump_tensor({count}): {:?}", start.elapsed());
    count
}

/// Points every `DumpTensor` node at [`QUANTIZED_TENSOR_DATA`]. Returns the number of dump nodes.
pub fn change_dump_tensor_file_name(model: &mut Model) -> usize {
    let start = Instant::now();
    let mut count = 0;

    for (_, node) in model.graph.nodes.iter_mut() {
        if node.deleted {
            continue;
        }
        if let Some(dump) = node.op.as_dump_tensor_mut() {
            dump.file_name = QUANTIZED_TENSOR_DATA.to_string();
            count += 1;
        }
    }

    log::info!("change_dump_tensor_file_name({count}): {:?}", start.elapsed());
    count
}

use std::{fs, path::Path};

use prost::Message;
use quantcal_core::{bundle::proto::TensorProto, op::DumpTensor, tensor::Tensor};
use quantcal_session::SessionError;

/// Writes `tensor` to `<log_dir_path>/<file_name>`, replacing any previous dump.
pub(super) fn dump_tensor(dump: &DumpTensor, tensor: &Tensor) -> Result<(), SessionError> {
    let dir = Path::new(&dump.log_dir_path);
    fs::create_dir_all(dir)?;
    let proto = TensorProto::from_tensor(dump.node_name.as_str(), tensor);
    fs::write(dir.join(&dump.file_name), proto.encode_to_vec())?;
    log::debug!("dump {} ({}) to {}", dump.node_name, dump.func_name, dir.display());
    Ok(())
}

use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
    time::Instant,
};

use prost::Message;
use thiserror::Error;

use crate::{
    bundle::{
        proto::{
            attribute_proto::Value as AttrValue, AssetFileDefProto, AttributeProto, DimProto,
            GraphProto, ModelBundleProto, NodeProto, SignatureDefProto, TensorInfoProto,
            TensorProto,
        },
        ASSETS_DIRECTORY, MODEL_FILE_NAME,
    },
    dim::Dimension,
    model::Model,
    op::Attribute,
    signature::{SignatureDef, TensorSpec},
};

#[derive(Error, Debug)]
pub enum BundleSaveError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("Destination '{0}' already exists and is not empty")]
    DestinationExists(PathBuf),

    #[error("Bundle must carry at least one tag")]
    NoTags,

    #[error("Signature '{signature}' refers to unknown value '{value}'")]
    UnknownSignatureValue { signature: String, value: String },

    #[error("Asset file '{0}' does not exist")]
    MissingAsset(PathBuf),

    #[error("Failed to encode bundle: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Writes `model` as a bundle at `dst`.
///
/// The bundle is assembled in a temporary directory next to `dst` and moved into place at
/// the end, so on failure `dst` is left as it was. Asset files listed in the model are
/// copied from `<src>/assets`.
pub fn save_bundle(
    dst: impl AsRef<Path>,
    model: &Model,
    src: impl AsRef<Path>,
    tags: &BTreeSet<String>,
    signatures: &BTreeMap<String, SignatureDef>,
) -> Result<(), BundleSaveError> {
    let start = Instant::now();
    let dst = dst.as_ref();
    let src = src.as_ref();

    if tags.is_empty() {
        return Err(BundleSaveError::NoTags);
    }
    if dst.exists() && (!dst.is_dir() || fs::read_dir(dst)?.next().is_some()) {
        return Err(BundleSaveError::DestinationExists(dst.to_path_buf()));
    }

    let bundle = encode_bundle(model, tags, signatures)?;
    let mut buf = Vec::with_capacity(bundle.encoded_len());
    bundle.encode(&mut buf)?;

    let parent = match dst.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".bundle-")
        .tempdir_in(&parent)?;

    fs::write(staging.path().join(MODEL_FILE_NAME), buf)?;
    if !model.asset_files.is_empty() {
        let assets_dst = staging.path().join(ASSETS_DIRECTORY);
        fs::create_dir_all(&assets_dst)?;
        for asset in &model.asset_files {
            let from = src.join(ASSETS_DIRECTORY).join(&asset.filename);
            if !from.is_file() {
                return Err(BundleSaveError::MissingAsset(from));
            }
            fs::copy(&from, assets_dst.join(&asset.filename))?;
        }
    }

    if dst.exists() {
        fs::remove_dir(dst)?;
    }
    let staged = staging.keep();
    if let Err(e) = fs::rename(&staged, dst) {
        let _ = fs::remove_dir_all(&staged);
        return Err(e.into());
    }

    log::info!("save_bundle({}): {:?}", dst.display(), start.elapsed());

    Ok(())
}

/// Encodes `model` with the given tags and signatures in place of its own.
pub fn encode_bundle(
    model: &Model,
    tags: &BTreeSet<String>,
    signatures: &BTreeMap<String, SignatureDef>,
) -> Result<ModelBundleProto, BundleSaveError> {
    let mut signature_def = BTreeMap::new();
    for (key, sig) in signatures {
        for spec in sig.inputs.values().chain(sig.outputs.values()) {
            if model.graph.values.get(&spec.name).is_none() {
                return Err(BundleSaveError::UnknownSignatureValue {
                    signature: key.clone(),
                    value: spec.name.clone(),
                });
            }
        }
        signature_def.insert(key.clone(), encode_signature(sig));
    }

    Ok(ModelBundleProto {
        graph: Some(encode_graph(model)),
        signature_def,
        tags: tags.iter().cloned().collect(),
        asset_file_def: model
            .asset_files
            .iter()
            .map(|a| AssetFileDefProto {
                filename: a.filename.clone(),
                tensor_name: a.tensor_name.clone(),
            })
            .collect(),
    })
}

fn encode_graph(model: &Model) -> GraphProto {
    let graph = &model.graph;
    let mut graph_proto = GraphProto::default();

    let mut inits = graph.inits.iter().collect::<Vec<_>>();
    inits.sort_by_key(|(id, _)| id.index());
    for (&id, tensor) in inits {
        graph_proto
            .initializer
            .push(TensorProto::from_tensor(graph.values.name(id), tensor));
    }

    for (vals, proto) in [
        (&graph.inputs, &mut graph_proto.input),
        (&graph.outputs, &mut graph_proto.output),
    ] {
        proto.extend(vals.iter().map(|&id| graph.values.name(id).to_string()));
    }

    // Insertion order is kept so that node indices survive a save/load cycle.
    for (_, node) in graph.live_nodes() {
        let attribute = node
            .op
            .attributes()
            .into_iter()
            .map(|(name, attr)| {
                let value = match attr {
                    Attribute::Bool(b) => AttrValue::B(b),
                    Attribute::Int(i) => AttrValue::I(i),
                    Attribute::Float(f) => AttrValue::F(f),
                    Attribute::String(s) => AttrValue::S(s),
                };
                (name.to_string(), AttributeProto { value: Some(value) })
            })
            .collect();
        graph_proto.node.push(NodeProto {
            name: node.name.clone(),
            op_type: node.op.name().to_string(),
            input: node
                .inputs
                .iter()
                .map(|&id| graph.values.name(id).to_string())
                .collect(),
            output: node
                .outputs
                .iter()
                .map(|&id| graph.values.name(id).to_string())
                .collect(),
            attribute,
        });
    }

    graph_proto
}

fn encode_signature(sig: &SignatureDef) -> SignatureDefProto {
    fn encode_specs(
        specs: &BTreeMap<String, TensorSpec>,
    ) -> BTreeMap<String, TensorInfoProto> {
        specs
            .iter()
            .map(|(key, spec)| {
                let info = TensorInfoProto {
                    name: spec.name.clone(),
                    dtype: spec.shape.elem_ty.into(),
                    dim: spec
                        .shape
                        .dims
                        .iter()
                        .map(|d| match d {
                            Dimension::Fixed(n) => DimProto {
                                size: *n as i64,
                                name: String::new(),
                            },
                            Dimension::Dynamic(name) => DimProto {
                                size: -1,
                                name: name.clone(),
                            },
                        })
                        .collect(),
                };
                (key.clone(), info)
            })
            .collect()
    }

    SignatureDefProto {
        inputs: encode_specs(&sig.inputs),
        outputs: encode_specs(&sig.outputs),
        method_name: sig.method_name.clone(),
    }
}

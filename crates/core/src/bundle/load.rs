use std::{collections::BTreeMap, fs, io, path::Path, time::Instant};

use prost::{DecodeError, Message};
use thiserror::Error;

use crate::{
    bundle::{
        proto::{
            attribute_proto::Value as AttrValue, elem_type_from_i32, GraphProto,
            ModelBundleProto, SignatureDefProto, TensorInfoProto,
        },
        MODEL_FILE_NAME,
    },
    dim::Dimension,
    graph::Graph,
    model::Model,
    node::Node,
    op::{Attribute, Op, OpError},
    signature::{AssetFile, SignatureDef, TensorSpec},
    tensor::TypedShape,
};

#[derive(Error, Debug)]
pub enum BundleLoadError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("Bundle is invalid: {0}")]
    InvalidBundle(#[from] DecodeError),

    #[error("Bundle does not contain any graph")]
    NoGraph,

    #[error("{0}")]
    Op(#[from] OpError),

    #[error("Attribute '{0}' has no value")]
    EmptyAttribute(String),

    #[error("Tensor '{0}' is malformed")]
    InvalidTensor(String),

    #[error("Unknown data type {1} in signature '{0}'")]
    UnknownDataType(String, i32),
}

/// Reads the bundle directory at `path`.
pub fn load_bundle(path: impl AsRef<Path>) -> Result<Model, BundleLoadError> {
    let start = Instant::now();
    let buf = fs::read(path.as_ref().join(MODEL_FILE_NAME))?;
    let model = decode_bundle(ModelBundleProto::decode(buf.as_slice())?)?;
    log::info!("load_bundle({}): {:?}", path.as_ref().display(), start.elapsed());
    Ok(model)
}

pub fn decode_bundle(bundle: ModelBundleProto) -> Result<Model, BundleLoadError> {
    let graph = decode_graph(bundle.graph.ok_or(BundleLoadError::NoGraph)?)?;

    let mut signatures = BTreeMap::new();
    for (key, sig) in bundle.signature_def {
        signatures.insert(key.clone(), decode_signature(&key, sig)?);
    }

    Ok(Model {
        graph,
        signatures,
        tags: bundle.tags.into_iter().collect(),
        asset_files: bundle
            .asset_file_def
            .into_iter()
            .map(|a| AssetFile {
                filename: a.filename,
                tensor_name: a.tensor_name,
            })
            .collect(),
    })
}

fn decode_graph(graph_proto: GraphProto) -> Result<Graph, BundleLoadError> {
    let mut graph = Graph::default();

    for init in &graph_proto.initializer {
        let tensor = init
            .to_tensor()
            .ok_or_else(|| BundleLoadError::InvalidTensor(init.name.clone()))?;
        let val = graph.values.new_val_named(init.name.as_str());
        graph.inits.insert(val, tensor);
    }

    for name in &graph_proto.input {
        let val = graph.values.new_val_named(name.as_str());
        graph.inputs.push(val);
    }
    for name in &graph_proto.output {
        let val = graph.values.new_val_named(name.as_str());
        graph.outputs.push(val);
    }

    for node_proto in graph_proto.node {
        let mut attrs = BTreeMap::new();
        for (name, attr) in node_proto.attribute {
            let value = match attr.value {
                Some(AttrValue::B(b)) => Attribute::Bool(b),
                Some(AttrValue::I(i)) => Attribute::Int(i),
                Some(AttrValue::F(f)) => Attribute::Float(f),
                Some(AttrValue::S(s)) => Attribute::String(s),
                None => return Err(BundleLoadError::EmptyAttribute(name)),
            };
            attrs.insert(name, value);
        }

        let mut node = Node::new(Op::from_parts(&node_proto.op_type, &attrs)?);
        node.name = node_proto.name;
        for input in &node_proto.input {
            node.inputs.push(graph.values.new_val_named(input.as_str()));
        }
        for output in &node_proto.output {
            node.outputs.push(graph.values.new_val_named(output.as_str()));
        }
        graph.add_node(node);
    }

    Ok(graph)
}

fn decode_signature(key: &str, sig: SignatureDefProto) -> Result<SignatureDef, BundleLoadError> {
    let decode_specs = |specs: BTreeMap<String, TensorInfoProto>| {
        specs
            .into_iter()
            .map(|(k, info)| {
                let elem_ty = elem_type_from_i32(info.dtype)
                    .ok_or_else(|| BundleLoadError::UnknownDataType(key.to_string(), info.dtype))?;
                let dims = info
                    .dim
                    .into_iter()
                    .map(|d| match d.size {
                        size if size >= 0 => Dimension::Fixed(size as usize),
                        _ => Dimension::Dynamic(d.name),
                    })
                    .collect();
                Ok((k, TensorSpec::new(info.name, TypedShape::new(dims, elem_ty))))
            })
            .collect::<Result<BTreeMap<_, _>, BundleLoadError>>()
    };

    Ok(SignatureDef {
        inputs: decode_specs(sig.inputs)?,
        outputs: decode_specs(sig.outputs)?,
        method_name: sig.method_name,
    })
}

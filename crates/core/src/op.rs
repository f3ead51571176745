use std::{borrow::Cow, collections::BTreeMap};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Identity,
    Add,
    Sub,
    Mul,
    Div,
    MatMul,
    ReLU,
    ReLU6,
    Sigmoid,
    Tanh,
    Softmax(Softmax),
    CustomAggregator(CustomAggregator),
    DumpTensor(DumpTensor),
}

/// <https://github.com/onnx/onnx/blob/main/docs/Operators.md#Softmax>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Softmax {
    pub axis: i64,
}

/// Statistics collector inserted before quantizable ops. Passes its input through unchanged.
///
/// `id` is empty until identity assignment runs. `min`/`max` are filled in by calibration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomAggregator {
    pub id: String,
    pub min: Option<f32>,
    pub max: Option<f32>,
}

/// Debug sink that writes its input to `<log_dir_path>/<file_name>` when `enabled`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DumpTensor {
    pub enabled: bool,
    pub file_name: String,
    pub log_dir_path: String,
    pub func_name: String,
    pub node_name: String,
}

/// Untyped attribute value, used when a node is encoded into a bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    Float(f32),
    String(String),
}

#[derive(Debug, Error)]
pub enum OpError {
    #[error("Unknown op type '{0}'")]
    UnknownOp(String),

    #[error("Attribute '{attr}' of '{op}' is missing or has the wrong type")]
    BadAttribute { op: &'static str, attr: &'static str },
}

impl Default for Softmax {
    fn default() -> Self {
        Self { axis: -1 }
    }
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Identity => "Identity",
            Op::Add => "Add",
            Op::Sub => "Sub",
            Op::Mul => "Mul",
            Op::Div => "Div",
            Op::MatMul => "MatMul",
            Op::ReLU => "Relu",
            Op::ReLU6 => "Relu6",
            Op::Sigmoid => "Sigmoid",
            Op::Tanh => "Tanh",
            Op::Softmax(_) => "Softmax",
            Op::CustomAggregator(_) => "CustomAggregator",
            Op::DumpTensor(_) => "DumpTensor",
        }
    }

    pub fn as_aggregator(&self) -> Option<&CustomAggregator> {
        match self {
            Op::CustomAggregator(agg) => Some(agg),
            _ => None,
        }
    }

    pub fn as_aggregator_mut(&mut self) -> Option<&mut CustomAggregator> {
        match self {
            Op::CustomAggregator(agg) => Some(agg),
            _ => None,
        }
    }

    pub fn as_dump_tensor_mut(&mut self) -> Option<&mut DumpTensor> {
        match self {
            Op::DumpTensor(dump) => Some(dump),
            _ => None,
        }
    }

    /// Returns the attributes of this op by name. Unset optional attributes are omitted.
    pub fn attributes(&self) -> BTreeMap<&'static str, Attribute> {
        let mut attrs = BTreeMap::new();
        match self {
            Op::Softmax(Softmax { axis }) => {
                attrs.insert("axis", Attribute::Int(*axis));
            }
            Op::CustomAggregator(CustomAggregator { id, min, max }) => {
                attrs.insert("id", Attribute::String(id.clone()));
                if let Some(min) = min {
                    attrs.insert("min", Attribute::Float(*min));
                }
                if let Some(max) = max {
                    attrs.insert("max", Attribute::Float(*max));
                }
            }
            Op::DumpTensor(dump) => {
                attrs.insert("enabled", Attribute::Bool(dump.enabled));
                attrs.insert("file_name", Attribute::String(dump.file_name.clone()));
                attrs.insert("log_dir_path", Attribute::String(dump.log_dir_path.clone()));
                attrs.insert("func_name", Attribute::String(dump.func_name.clone()));
                attrs.insert("node_name", Attribute::String(dump.node_name.clone()));
            }
            _ => {}
        }
        attrs
    }

    /// Reconstructs an op from its type name and attributes.
    pub fn from_parts(op_type: &str, attrs: &BTreeMap<String, Attribute>) -> Result<Self, OpError> {
        let op = match op_type {
            "Identity" => Op::Identity,
            "Add" => Op::Add,
            "Sub" => Op::Sub,
            "Mul" => Op::Mul,
            "Div" => Op::Div,
            "MatMul" => Op::MatMul,
            "Relu" => Op::ReLU,
            "Relu6" => Op::ReLU6,
            "Sigmoid" => Op::Sigmoid,
            "Tanh" => Op::Tanh,
            "Softmax" => Op::Softmax(Softmax {
                axis: match attrs.get("axis") {
                    Some(Attribute::Int(axis)) => *axis,
                    None => -1,
                    Some(_) => return Err(bad("Softmax", "axis")),
                },
            }),
            "CustomAggregator" => Op::CustomAggregator(CustomAggregator {
                id: match attrs.get("id") {
                    Some(Attribute::String(id)) => id.clone(),
                    None => String::new(),
                    Some(_) => return Err(bad("CustomAggregator", "id")),
                },
                min: opt_float(attrs, "min")?,
                max: opt_float(attrs, "max")?,
            }),
            "DumpTensor" => Op::DumpTensor(DumpTensor {
                enabled: match attrs.get("enabled") {
                    Some(Attribute::Bool(enabled)) => *enabled,
                    None => false,
                    Some(_) => return Err(bad("DumpTensor", "enabled")),
                },
                file_name: string(attrs, "file_name")?.into_owned(),
                log_dir_path: string(attrs, "log_dir_path")?.into_owned(),
                func_name: string(attrs, "func_name")?.into_owned(),
                node_name: string(attrs, "node_name")?.into_owned(),
            }),
            other => return Err(OpError::UnknownOp(other.to_string())),
        };
        Ok(op)
    }
}

fn bad(op: &'static str, attr: &'static str) -> OpError {
    OpError::BadAttribute { op, attr }
}

fn opt_float(attrs: &BTreeMap<String, Attribute>, name: &'static str) -> Result<Option<f32>, OpError> {
    match attrs.get(name) {
        Some(Attribute::Float(f)) => Ok(Some(*f)),
        None => Ok(None),
        Some(_) => Err(bad("CustomAggregator", name)),
    }
}

fn string<'a>(
    attrs: &'a BTreeMap<String, Attribute>,
    name: &'static str,
) -> Result<Cow<'a, str>, OpError> {
    match attrs.get(name) {
        Some(Attribute::String(s)) => Ok(Cow::Borrowed(s)),
        None => Ok(Cow::Borrowed("")),
        Some(_) => Err(bad("DumpTensor", name)),
    }
}

#[test]
fn attributes_round_trip() {
    let ops = [
        Op::Softmax(Softmax { axis: 1 }),
        Op::CustomAggregator(CustomAggregator {
            id: "0a1b".into(),
            min: Some(-1.5),
            max: None,
        }),
        Op::DumpTensor(DumpTensor {
            enabled: true,
            file_name: "unquantized_tensor_data.pb".into(),
            log_dir_path: "/tmp/dumps/composite_conv2d_0".into(),
            func_name: "composite_conv2d_fn_1".into(),
            node_name: "Conv2D".into(),
        }),
        Op::Tanh,
    ];
    for op in ops {
        let attrs = op
            .attributes()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(Op::from_parts(op.name(), &attrs).unwrap(), op);
    }
}

#[test]
fn unknown_op_is_rejected() {
    assert!(matches!(
        Op::from_parts("Conv2D", &BTreeMap::new()),
        Err(OpError::UnknownOp(name)) if name == "Conv2D"
    ));
}

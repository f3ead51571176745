use std::collections::BTreeMap;

use crate::tensor::TypedShape;

/// A named entry point into the graph.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureDef {
    pub inputs: BTreeMap<String, TensorSpec>,
    pub outputs: BTreeMap<String, TensorSpec>,
    pub method_name: String,
}

/// Binds a signature key to a graph value by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: TypedShape,
}

/// An asset file shipped alongside the graph, relative to the bundle's `assets` directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetFile {
    pub filename: String,
    pub tensor_name: String,
}

impl SignatureDef {
    pub fn with_input(mut self, key: impl Into<String>, spec: TensorSpec) -> Self {
        self.inputs.insert(key.into(), spec);
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, spec: TensorSpec) -> Self {
        self.outputs.insert(key.into(), spec);
        self
    }
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, shape: TypedShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }
}

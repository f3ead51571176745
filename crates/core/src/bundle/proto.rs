//! Wire format of a model bundle.

use std::collections::BTreeMap;

use crate::{
    dim::FixedDimensions,
    tensor::{Tensor, TensorData, TensorElemType},
};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModelBundleProto {
    #[prost(message, optional, tag = "1")]
    pub graph: Option<GraphProto>,
    #[prost(btree_map = "string, message", tag = "2")]
    pub signature_def: BTreeMap<String, SignatureDefProto>,
    #[prost(string, repeated, tag = "3")]
    pub tags: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub asset_file_def: Vec<AssetFileDefProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GraphProto {
    #[prost(message, repeated, tag = "1")]
    pub node: Vec<NodeProto>,
    #[prost(message, repeated, tag = "2")]
    pub initializer: Vec<TensorProto>,
    #[prost(string, repeated, tag = "3")]
    pub input: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub output: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeProto {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, tag = "2")]
    pub op_type: String,
    #[prost(string, repeated, tag = "3")]
    pub input: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub output: Vec<String>,
    #[prost(btree_map = "string, message", tag = "5")]
    pub attribute: BTreeMap<String, AttributeProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttributeProto {
    #[prost(oneof = "attribute_proto::Value", tags = "1, 2, 3, 4")]
    pub value: Option<attribute_proto::Value>,
}

pub mod attribute_proto {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(bool, tag = "1")]
        B(bool),
        #[prost(int64, tag = "2")]
        I(i64),
        #[prost(float, tag = "3")]
        F(f32),
        #[prost(string, tag = "4")]
        S(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, repeated, tag = "2")]
    pub dims: Vec<i64>,
    #[prost(int32, tag = "3")]
    pub data_type: i32,
    #[prost(float, repeated, tag = "4")]
    pub float_data: Vec<f32>,
    #[prost(int32, repeated, tag = "5")]
    pub int32_data: Vec<i32>,
    #[prost(int64, repeated, tag = "6")]
    pub int64_data: Vec<i64>,
    #[prost(bool, repeated, tag = "7")]
    pub bool_data: Vec<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignatureDefProto {
    #[prost(btree_map = "string, message", tag = "1")]
    pub inputs: BTreeMap<String, TensorInfoProto>,
    #[prost(btree_map = "string, message", tag = "2")]
    pub outputs: BTreeMap<String, TensorInfoProto>,
    #[prost(string, tag = "3")]
    pub method_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorInfoProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub dtype: i32,
    #[prost(message, repeated, tag = "3")]
    pub dim: Vec<DimProto>,
}

/// `size == -1` marks a dynamic dimension named `name`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DimProto {
    #[prost(int64, tag = "1")]
    pub size: i64,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AssetFileDefProto {
    #[prost(string, tag = "1")]
    pub filename: String,
    #[prost(string, tag = "2")]
    pub tensor_name: String,
}

pub const DT_FLOAT: i32 = 1;
pub const DT_INT32: i32 = 3;
pub const DT_INT64: i32 = 9;
pub const DT_BOOL: i32 = 10;

impl From<TensorElemType> for i32 {
    fn from(ty: TensorElemType) -> Self {
        match ty {
            TensorElemType::F32 => DT_FLOAT,
            TensorElemType::I32 => DT_INT32,
            TensorElemType::I64 => DT_INT64,
            TensorElemType::Bool => DT_BOOL,
        }
    }
}

pub fn elem_type_from_i32(dtype: i32) -> Option<TensorElemType> {
    match dtype {
        DT_FLOAT => Some(TensorElemType::F32),
        DT_INT32 => Some(TensorElemType::I32),
        DT_INT64 => Some(TensorElemType::I64),
        DT_BOOL => Some(TensorElemType::Bool),
        _ => None,
    }
}

impl TensorProto {
    pub fn from_tensor(name: impl Into<String>, tensor: &Tensor) -> Self {
        let mut proto = TensorProto {
            name: name.into(),
            dims: tensor.dims().to_i64_vec(),
            data_type: tensor.elem_ty().into(),
            ..Default::default()
        };
        match tensor.raw() {
            TensorData::F32(v) => proto.float_data = v.clone(),
            TensorData::I32(v) => proto.int32_data = v.clone(),
            TensorData::I64(v) => proto.int64_data = v.clone(),
            TensorData::Bool(v) => proto.bool_data = v.clone(),
        }
        proto
    }

    /// Returns `None` on an unknown data type or when the element count disagrees with `dims`.
    pub fn to_tensor(&self) -> Option<Tensor> {
        if self.dims.iter().any(|&d| d < 0) {
            return None;
        }
        let dims = FixedDimensions::from_i64(&self.dims);
        let data = match elem_type_from_i32(self.data_type)? {
            TensorElemType::F32 => TensorData::F32(self.float_data.clone()),
            TensorElemType::I32 => TensorData::I32(self.int32_data.clone()),
            TensorElemType::I64 => TensorData::I64(self.int64_data.clone()),
            TensorElemType::Bool => TensorData::Bool(self.bool_data.clone()),
        };
        let tensor = Tensor::from_data(dims, data);
        tensor.verify().then_some(tensor)
    }
}

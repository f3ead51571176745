pub mod bundle;
pub mod dim;
pub mod graph;
pub mod model;
pub mod node;
pub mod op;
pub mod signature;
pub mod tensor;
pub mod transform;
pub mod value;

//! Boundary to the engine that executes a model on concrete inputs.

use std::{borrow::Cow, collections::BTreeSet, path::Path};

use quantcal_core::{
    bundle::BundleLoadError,
    dim::FixedDimensions,
    tensor::{Tensor, TensorElemType, TypedShape},
};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Inputs of a signature, keyed by signature input key.
pub type Feeds = FxHashMap<String, Tensor>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Input '{key}' expects {expected:?} but got {actual_ty:?}{actual_dims:?}")]
    Shape {
        key: String,
        expected: TypedShape,
        actual_ty: TensorElemType,
        actual_dims: FixedDimensions,
    },

    #[error("Signature '{0}' does not exist")]
    UnknownSignature(String),

    #[error("Signature '{signature}' has no input '{key}'")]
    UnknownInput { signature: String, key: String },

    #[error("Input '{0}' is not fed")]
    MissingInput(String),

    #[error("Value '{0}' does not exist")]
    UnknownValue(String),

    #[error("Value '{0}' was not computed")]
    NotComputed(String),

    #[error("{op} does not support {ty:?}")]
    ElemType { op: &'static str, ty: TensorElemType },

    #[error("Model tags {found:?} do not match {requested:?}")]
    TagsMismatch {
        requested: BTreeSet<String>,
        found: BTreeSet<String>,
    },

    #[error("Load: {0}")]
    Load(#[from] BundleLoadError),

    #[error("Io: {0}")]
    Io(#[from] std::io::Error),

    /// General error messages raised by kernels.
    #[error("Something went wrong: {0}")]
    Message(Cow<'static, str>),
}

pub trait Session {
    /// Runs `signature_key` with `feeds` bound to its inputs and returns the values named
    /// in `fetches`, in the same order.
    fn run(
        &self,
        signature_key: &str,
        feeds: &Feeds,
        fetches: &[&str],
    ) -> Result<Vec<Tensor>, SessionError>;
}

/// Opens a session on a bundle on disk.
pub trait SessionLoader {
    type Session: Session;

    fn load(&self, model_path: &Path, tags: &BTreeSet<String>)
        -> Result<Self::Session, SessionError>;
}

impl<F, S> SessionLoader for F
where
    F: Fn(&Path, &BTreeSet<String>) -> Result<S, SessionError>,
    S: Session,
{
    type Session = S;

    fn load(&self, model_path: &Path, tags: &BTreeSet<String>) -> Result<S, SessionError> {
        self(model_path, tags)
    }
}

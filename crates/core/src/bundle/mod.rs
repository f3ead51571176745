//! Persisted model bundles: `<dir>/saved_model.pb` plus copied `<dir>/assets/*`.

pub mod load;
pub mod proto;
pub mod save;

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use crate::{model::Model, signature::SignatureDef};

pub use load::{load_bundle, BundleLoadError};
pub use save::{save_bundle, BundleSaveError};

pub const MODEL_FILE_NAME: &str = "saved_model.pb";
pub const ASSETS_DIRECTORY: &str = "assets";

/// Persists a model as a bundle. Implementations must leave `dst` untouched on failure.
pub trait BundleWriter {
    fn write(
        &self,
        dst: &Path,
        model: &Model,
        src: &Path,
        tags: &BTreeSet<String>,
        signatures: &BTreeMap<String, SignatureDef>,
    ) -> Result<(), BundleSaveError>;
}

/// Writes bundles to the local file system with [`save_bundle`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryBundleWriter;

impl BundleWriter for DirectoryBundleWriter {
    fn write(
        &self,
        dst: &Path,
        model: &Model,
        src: &Path,
        tags: &BTreeSet<String>,
        signatures: &BTreeMap<String, SignatureDef>,
    ) -> Result<(), BundleSaveError> {
        save_bundle(dst, model, src, tags, signatures)
    }
}

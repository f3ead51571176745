use quantcal_core::{bundle::BundleSaveError, tensor::TensorElemType, transform::TransformError};
use quantcal_session::SessionError;
use thiserror::Error;

use crate::dataset::DatasetError;

#[derive(Debug, Error)]
pub enum CalibrationError {
    // Precondition violations.
    #[error("No signature keys were given")]
    NoSignatureKeys,

    #[error("Signature '{0}' does not exist in the model")]
    UnknownSignature(String),

    #[error("Signature '{0}' is listed more than once")]
    DuplicateSignatureKey(String),

    #[error("No representative dataset for signature '{0}'")]
    MissingDataset(String),

    #[error("Custom aggregator '{0}' has no id")]
    MissingAggregatorId(String),

    #[error("Custom aggregator '{0}' has no input")]
    MalformedAggregator(String),

    #[error("Invalid calibration options: {0}")]
    InvalidOptions(String),

    #[error("Transform: {0}")]
    Transform(#[from] TransformError),

    // Execution failures.
    #[error("Execution: {0}")]
    Execution(#[from] SessionError),

    #[error("Dataset: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Custom aggregator '{id}' observed {ty:?}; only f32 is supported")]
    UnsupportedObservation { id: String, ty: TensorElemType },

    #[error("Cannot merge statistics of '{0}' collected with different settings")]
    IncompatibleStatistics(String),

    // Soft failures.
    #[error("Custom aggregator '{0}' has no statistics")]
    MissingStatistics(String),

    // Export failures.
    #[error("Export: {0}")]
    Export(#[from] BundleSaveError),
}

impl CalibrationError {
    /// True for errors caused by malformed input rather than by running the model.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            Self::NoSignatureKeys
                | Self::UnknownSignature(_)
                | Self::DuplicateSignatureKey(_)
                | Self::MissingDataset(_)
                | Self::MissingAggregatorId(_)
                | Self::MalformedAggregator(_)
                | Self::InvalidOptions(_)
                | Self::Transform(_)
        )
    }
}

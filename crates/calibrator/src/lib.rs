//! Calibration stage of post-training quantization: runs representative data through an
//! instrumented model, accumulates per-aggregator ranges and writes them back.

pub mod annotate;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod histogram;
pub mod library;
pub mod options;
pub mod statistics;

pub use dataset::{ExecutionMode, RepresentativeDataset, RepresentativeDatasetOrMapping, Sample};
pub use error::CalibrationError;
pub use library::{Calibrated, Calibrator, Diagnostic, FunctionLibrary};
pub use options::{CalibrationMethod, CalibrationOptions};
pub use statistics::{CalibrationRange, StatisticsAccumulator};

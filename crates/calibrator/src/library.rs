use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use quantcal_core::{
    bundle::{BundleWriter, DirectoryBundleWriter},
    model::Model,
    signature::SignatureDef,
    transform::{assign_ids::assign_aggregator_ids, dump_tensor, verify_aggregator_ids},
};
use quantcal_session::SessionLoader;

use crate::{
    annotate::write_back,
    dataset::{ExecutionMode, RepresentativeDatasetOrMapping},
    error::CalibrationError,
    executor::CalibrationExecutor,
    options::CalibrationOptions,
    statistics::StatisticsAccumulator,
};

/// Non-fatal findings of a calibration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The aggregator was not exercised by any calibrated signature and keeps its attributes.
    MissingStatistics { id: String, node_name: String },
}

/// Result of [`FunctionLibrary::run_calibration`].
#[derive(Debug, Clone)]
pub struct Calibrated {
    pub model: Model,
    pub diagnostics: Vec<Diagnostic>,
}

/// Operations the host pipeline dispatches to. None of them modify the model passed in.
pub trait FunctionLibrary {
    fn assign_ids_to_custom_aggregator_ops(&self, model: &Model) -> Result<Model, CalibrationError>;

    /// Runs the bundle at `model_path` on the representative dataset of every signature in
    /// `signature_keys` and writes the collected ranges into a copy of `model`.
    #[allow(clippy::too_many_arguments)]
    fn run_calibration(
        &self,
        model_path: &Path,
        signature_keys: &[String],
        tags: &BTreeSet<String>,
        model: &Model,
        options: &CalibrationOptions,
        force_graph_mode_calibration: bool,
        dataset: RepresentativeDatasetOrMapping<'_>,
    ) -> Result<Calibrated, CalibrationError>;

    fn enable_dump_tensor(&self, model: &Model) -> Model;

    fn change_dump_tensor_file_name(&self, model: &Model) -> Model;

    fn save_exported_model(
        &self,
        dst: &Path,
        model: &Model,
        src: &Path,
        tags: &BTreeSet<String>,
        signatures: &BTreeMap<String, SignatureDef>,
    ) -> Result<(), CalibrationError>;
}

/// [`FunctionLibrary`] on top of a session loader and a bundle writer.
pub struct Calibrator<L, W = DirectoryBundleWriter> {
    loader: L,
    writer: W,
}

impl<L: SessionLoader> Calibrator<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            writer: DirectoryBundleWriter,
        }
    }
}

impl<L: SessionLoader, W: BundleWriter> Calibrator<L, W> {
    pub fn with_writer<W2: BundleWriter>(self, writer: W2) -> Calibrator<L, W2> {
        Calibrator {
            loader: self.loader,
            writer,
        }
    }

    fn missing_statistics(model: &Model, missing: &[String]) -> Vec<Diagnostic> {
        model
            .aggregators()
            .filter(|(_, agg)| missing.contains(&agg.id))
            .map(|(node_id, agg)| {
                let node_name = model.graph.nodes[node_id].display_name(node_id);
                log::warn!(
                    "Custom aggregator '{node_name}' ({}) has no statistics; left unannotated",
                    agg.id
                );
                Diagnostic::MissingStatistics {
                    id: agg.id.clone(),
                    node_name,
                }
            })
            .collect()
    }
}

impl<L: SessionLoader, W: BundleWriter> FunctionLibrary for Calibrator<L, W> {
    fn assign_ids_to_custom_aggregator_ops(&self, model: &Model) -> Result<Model, CalibrationError> {
        let mut model = model.clone();
        assign_aggregator_ids(&mut model)?;
        Ok(model)
    }

    fn run_calibration(
        &self,
        model_path: &Path,
        signature_keys: &[String],
        tags: &BTreeSet<String>,
        model: &Model,
        options: &CalibrationOptions,
        force_graph_mode_calibration: bool,
        dataset: RepresentativeDatasetOrMapping<'_>,
    ) -> Result<Calibrated, CalibrationError> {
        options.validate()?;
        if signature_keys.is_empty() {
            return Err(CalibrationError::NoSignatureKeys);
        }
        let mut seen = BTreeSet::new();
        for key in signature_keys {
            if !model.signatures.contains_key(key) {
                return Err(CalibrationError::UnknownSignature(key.clone()));
            }
            if !seen.insert(key) {
                return Err(CalibrationError::DuplicateSignatureKey(key.clone()));
            }
        }
        require_aggregator_ids(model)?;
        let datasets = dataset.into_mapping(signature_keys)?;

        let session = self.loader.load(model_path, tags)?;
        let mode = ExecutionMode::from_force_graph_mode(force_graph_mode_calibration);
        let executor = CalibrationExecutor::new(model, &session, options);

        let mut acc = StatisticsAccumulator::new(options);
        for (key, dataset) in datasets {
            acc.merge(executor.run(&key, dataset, mode)?)?;
        }

        let ids = model
            .aggregators()
            .map(|(_, agg)| agg.id.as_str())
            .filter(|id| !id.is_empty())
            .collect::<Vec<_>>();
        let (ranges, missing) = acc.finalize_all(ids);

        let mut calibrated = model.clone();
        write_back(&mut calibrated, &ranges);
        let diagnostics = Self::missing_statistics(model, &missing);

        Ok(Calibrated {
            model: calibrated,
            diagnostics,
        })
    }

    fn enable_dump_tensor(&self, model: &Model) -> Model {
        let mut model = model.clone();
        dump_tensor::enable_dump_tensor(&mut model);
        model
    }

    fn change_dump_tensor_file_name(&self, model: &Model) -> Model {
        let mut model = model.clone();
        dump_tensor::change_dump_tensor_file_name(&mut model);
        model
    }

    fn save_exported_model(
        &self,
        dst: &Path,
        model: &Model,
        src: &Path,
        tags: &BTreeSet<String>,
        signatures: &BTreeMap<String, SignatureDef>,
    ) -> Result<(), CalibrationError> {
        require_aggregator_ids(model)?;
        self.writer.write(dst, model, src, tags, signatures)?;
        log::info!("save_exported_model: {}", dst.display());
        Ok(())
    }
}

/// Every live aggregator must carry an id, and ids must be unique.
fn require_aggregator_ids(model: &Model) -> Result<(), CalibrationError> {
    verify_aggregator_ids(model)?;
    if let Some((node_id, _)) = model.aggregators().find(|(_, agg)| agg.id.is_empty()) {
        return Err(CalibrationError::MissingAggregatorId(
            model.graph.nodes[node_id].display_name(node_id),
        ));
    }
    Ok(())
}

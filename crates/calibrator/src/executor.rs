use std::time::Instant;

use quantcal_core::model::Model;
use quantcal_session::{Session, SessionError};
use rayon::iter::{ParallelBridge, ParallelIterator};

use crate::{
    dataset::{Batches, ExecutionMode, RepresentativeDataset, Sample},
    error::CalibrationError,
    options::CalibrationOptions,
    statistics::StatisticsAccumulator,
};

/// An aggregator to read back, and the graph value flowing into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub id: String,
    pub value: String,
}

/// Drives batches of a representative dataset through a session and collects what every
/// reachable aggregator sees.
pub struct CalibrationExecutor<'a, S> {
    model: &'a Model,
    session: &'a S,
    options: &'a CalibrationOptions,
}

impl<'a, S: Session> CalibrationExecutor<'a, S> {
    pub fn new(model: &'a Model, session: &'a S, options: &'a CalibrationOptions) -> Self {
        Self {
            model,
            session,
            options,
        }
    }

    /// Lists the aggregators that the outputs of `signature_key` depend on, in graph order.
    pub fn plan(&self, signature_key: &str) -> Result<Vec<Observation>, CalibrationError> {
        let graph = &self.model.graph;
        let sig = self
            .model
            .signatures
            .get(signature_key)
            .ok_or_else(|| CalibrationError::UnknownSignature(signature_key.to_string()))?;
        let outputs = sig
            .outputs
            .values()
            .map(|spec| {
                graph
                    .values
                    .get(&spec.name)
                    .ok_or_else(|| SessionError::UnknownValue(spec.name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let reachable = self.model.reachable_nodes(&outputs);

        let mut plan = vec![];
        for (node_id, agg) in self.model.aggregators() {
            if !reachable.contains(&node_id) {
                continue;
            }
            let node = &graph.nodes[node_id];
            if agg.id.is_empty() {
                return Err(CalibrationError::MissingAggregatorId(
                    node.display_name(node_id),
                ));
            }
            let &input = node
                .inputs
                .first()
                .ok_or_else(|| CalibrationError::MalformedAggregator(node.display_name(node_id)))?;
            plan.push(Observation {
                id: agg.id.clone(),
                value: graph.values.name(input).to_string(),
            });
        }
        Ok(plan)
    }

    /// Runs every batch of `dataset` in order. The first failure aborts the run and drops
    /// whatever was collected so far.
    pub fn run(
        &self,
        signature_key: &str,
        dataset: RepresentativeDataset<'_>,
        mode: ExecutionMode,
    ) -> Result<StatisticsAccumulator, CalibrationError> {
        let plan = self.plan(signature_key)?;
        let fetches = plan.iter().map(|o| o.value.as_str()).collect::<Vec<_>>();
        let mut acc = StatisticsAccumulator::new(self.options);

        let start = Instant::now();
        let mut count = 0;
        for batch in Batches::new(dataset, mode, self.options.batch_size) {
            self.observe(signature_key, &plan, &fetches, &batch?, &mut acc)?;
            log::debug!("calibrate({signature_key}): batch {count} done");
            count += 1;
        }
        log::info!(
            "calibrate({signature_key}, {count} batches, {} aggregators): {:?}",
            plan.len(),
            start.elapsed()
        );

        Ok(acc)
    }

    fn observe(
        &self,
        signature_key: &str,
        plan: &[Observation],
        fetches: &[&str],
        batch: &Sample,
        acc: &mut StatisticsAccumulator,
    ) -> Result<(), CalibrationError> {
        let observed = self.session.run(signature_key, batch, fetches)?;
        if observed.len() != plan.len() {
            return Err(SessionError::Message(
                format!(
                    "fetched {} values but {} were requested",
                    observed.len(),
                    plan.len()
                )
                .into(),
            )
            .into());
        }
        for (obs, tensor) in plan.iter().zip(observed.iter()) {
            acc.update(&obs.id, tensor)?;
        }
        Ok(())
    }
}

impl<'a, S: Session + Sync> CalibrationExecutor<'a, S> {
    /// Like [`Self::run`], but executes batches on the rayon thread pool. Every batch is
    /// folded into its own accumulator and the shards are merged afterwards.
    pub fn run_parallel(
        &self,
        signature_key: &str,
        dataset: RepresentativeDataset<'_>,
        mode: ExecutionMode,
    ) -> Result<StatisticsAccumulator, CalibrationError> {
        let plan = self.plan(signature_key)?;
        let fetches = plan.iter().map(|o| o.value.as_str()).collect::<Vec<_>>();

        let start = Instant::now();
        let acc = Batches::new(dataset, mode, self.options.batch_size)
            .par_bridge()
            .map(|batch| -> Result<_, CalibrationError> {
                let mut shard = StatisticsAccumulator::new(self.options);
                self.observe(signature_key, &plan, &fetches, &batch?, &mut shard)?;
                Ok(shard)
            })
            .try_reduce(
                || StatisticsAccumulator::new(self.options),
                |mut acc, shard| -> Result<_, CalibrationError> {
                    acc.merge(shard)?;
                    Ok(acc)
                },
            )?;
        log::info!(
            "calibrate_parallel({signature_key}, {} aggregators): {:?}",
            plan.len(),
            start.elapsed()
        );

        Ok(acc)
    }
}

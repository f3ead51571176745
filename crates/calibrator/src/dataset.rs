use std::{borrow::Cow, collections::BTreeSet};

use quantcal_core::tensor::Tensor;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::error::CalibrationError;

/// One element of a representative dataset: signature input key -> tensor.
pub type Sample = FxHashMap<String, Tensor>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Samples of one batch disagree on input keys: {0:?} vs {1:?}")]
    InconsistentKeys(BTreeSet<String>, BTreeSet<String>),

    #[error("Samples of input '{0}' cannot be stacked into one batch")]
    Unstackable(String),

    #[error("{0}")]
    Message(Cow<'static, str>),
}

/// A lazily consumed, possibly unbounded sequence of samples.
pub struct RepresentativeDataset<'a> {
    samples: Box<dyn Iterator<Item = Result<Sample, DatasetError>> + Send + 'a>,
}

impl<'a> RepresentativeDataset<'a> {
    pub fn new<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = Result<Sample, DatasetError>>,
        I::IntoIter: Send + 'a,
    {
        Self {
            samples: Box::new(samples.into_iter()),
        }
    }

    pub fn from_samples<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = Sample>,
        I::IntoIter: Send + 'a,
    {
        Self::new(samples.into_iter().map(Ok))
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }
}

impl Iterator for RepresentativeDataset<'_> {
    type Item = Result<Sample, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.samples.next()
    }
}

/// Either one dataset shared by the single signature being calibrated, or one dataset per
/// signature key.
pub enum RepresentativeDatasetOrMapping<'a> {
    Dataset(RepresentativeDataset<'a>),
    Mapping(FxHashMap<String, RepresentativeDataset<'a>>),
}

impl<'a> RepresentativeDatasetOrMapping<'a> {
    /// Pairs every signature key with its dataset, in the order of `signature_keys`.
    pub fn into_mapping(
        self,
        signature_keys: &[String],
    ) -> Result<Vec<(String, RepresentativeDataset<'a>)>, CalibrationError> {
        match self {
            Self::Dataset(dataset) => match signature_keys {
                [key] => Ok(vec![(key.clone(), dataset)]),
                [] => Err(CalibrationError::NoSignatureKeys),
                _ => Err(CalibrationError::InvalidOptions(format!(
                    "a single dataset cannot serve {} signatures; pass a mapping",
                    signature_keys.len()
                ))),
            },
            Self::Mapping(mut mapping) => {
                let mut pairs = Vec::with_capacity(signature_keys.len());
                for key in signature_keys {
                    let dataset = mapping
                        .remove(key)
                        .ok_or_else(|| CalibrationError::MissingDataset(key.clone()))?;
                    pairs.push((key.clone(), dataset));
                }
                for unused in mapping.keys() {
                    log::warn!("Representative dataset for '{unused}' is not used");
                }
                Ok(pairs)
            }
        }
    }
}

impl<'a> From<RepresentativeDataset<'a>> for RepresentativeDatasetOrMapping<'a> {
    fn from(dataset: RepresentativeDataset<'a>) -> Self {
        Self::Dataset(dataset)
    }
}

/// How samples are handed to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Consecutive samples are stacked along the leading axis into batches.
    Graph,
    /// Every sample is executed on its own.
    PerExample,
}

impl ExecutionMode {
    pub fn from_force_graph_mode(force_graph_mode_calibration: bool) -> Self {
        if force_graph_mode_calibration {
            Self::Graph
        } else {
            Self::PerExample
        }
    }
}

/// Adapts a dataset into the batches that are actually executed.
pub struct Batches<'a> {
    samples: RepresentativeDataset<'a>,
    batch_size: usize,
}

impl<'a> Batches<'a> {
    pub fn new(samples: RepresentativeDataset<'a>, mode: ExecutionMode, batch_size: usize) -> Self {
        let batch_size = match mode {
            ExecutionMode::Graph => batch_size.max(1),
            ExecutionMode::PerExample => 1,
        };
        Self {
            samples,
            batch_size,
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = Result<Sample, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch_size == 1 {
            return self.samples.next();
        }

        let mut chunk = Vec::with_capacity(self.batch_size);
        while chunk.len() < self.batch_size {
            match self.samples.next() {
                Some(Ok(sample)) => chunk.push(sample),
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }
        if chunk.is_empty() {
            return None;
        }
        Some(stack(&chunk))
    }
}

fn stack(samples: &[Sample]) -> Result<Sample, DatasetError> {
    let keys = |s: &Sample| s.keys().cloned().collect::<BTreeSet<_>>();
    let first = &samples[0];
    for sample in &samples[1..] {
        if sample.len() != first.len() || sample.keys().any(|k| !first.contains_key(k)) {
            return Err(DatasetError::InconsistentKeys(keys(first), keys(sample)));
        }
    }

    let mut batch = Sample::default();
    for key in first.keys() {
        let tensors = samples.iter().map(|s| &s[key]).collect::<Vec<_>>();
        let stacked = Tensor::concat_leading(&tensors)
            .ok_or_else(|| DatasetError::Unstackable(key.clone()))?;
        batch.insert(key.clone(), stacked);
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(v: f32) -> Sample {
        let mut s = Sample::default();
        s.insert("x".into(), Tensor::new(vec![1, 2].into(), vec![v, -v]));
        s
    }

    #[test]
    fn graph_mode_stacks_samples() {
        let dataset = RepresentativeDataset::from_samples((0..5).map(|i| sample(i as f32)));
        let batches = Batches::new(dataset, ExecutionMode::Graph, 2)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let dims = batches
            .iter()
            .map(|b| b["x"].dims().as_slice().to_vec())
            .collect::<Vec<_>>();
        assert_eq!(dims, vec![vec![2, 2], vec![2, 2], vec![1, 2]]);
        assert_eq!(batches[1]["x"].data::<f32>(), &[2.0, -2.0, 3.0, -3.0]);
    }

    #[test]
    fn per_example_mode_ignores_batch_size() {
        let dataset = RepresentativeDataset::from_samples((0..3).map(|i| sample(i as f32)));
        assert_eq!(Batches::new(dataset, ExecutionMode::PerExample, 8).count(), 3);
    }

    #[test]
    fn unstackable_samples() {
        let mut odd = Sample::default();
        odd.insert("x".into(), Tensor::zeros::<f32>(vec![1, 3].into()));
        let dataset = RepresentativeDataset::from_samples(vec![sample(1.0), odd]);
        let mut batches = Batches::new(dataset, ExecutionMode::Graph, 2);
        assert!(matches!(
            batches.next(),
            Some(Err(DatasetError::Unstackable(key))) if key == "x"
        ));
    }

    #[test]
    fn dataset_errors_pass_through() {
        let dataset = RepresentativeDataset::new(vec![
            Ok(sample(1.0)),
            Err(DatasetError::Message("corrupt record".into())),
        ]);
        let mut batches = Batches::new(dataset, ExecutionMode::Graph, 4);
        assert!(matches!(batches.next(), Some(Err(DatasetError::Message(_)))));
    }

    #[test]
    fn mapping_resolution() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let single = RepresentativeDatasetOrMapping::from(RepresentativeDataset::empty());
        assert!(matches!(
            single.into_mapping(&keys),
            Err(CalibrationError::InvalidOptions(_))
        ));

        let mut mapping = FxHashMap::default();
        mapping.insert("a".to_string(), RepresentativeDataset::empty());
        assert!(matches!(
            RepresentativeDatasetOrMapping::Mapping(mapping).into_mapping(&keys),
            Err(CalibrationError::MissingDataset(key)) if key == "b"
        ));

        let mut mapping = FxHashMap::default();
        mapping.insert("b".to_string(), RepresentativeDataset::empty());
        mapping.insert("a".to_string(), RepresentativeDataset::empty());
        let pairs = RepresentativeDatasetOrMapping::Mapping(mapping)
            .into_mapping(&keys)
            .unwrap();
        assert_eq!(
            pairs.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}

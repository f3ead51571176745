use quantcal_core::tensor::Tensor;
use rustc_hash::FxHashMap;

use crate::{
    error::CalibrationError,
    histogram::{finite_min_max, Histogram},
    options::{CalibrationMethod, CalibrationOptions},
};

/// Range written back into an aggregator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationRange {
    pub min: f32,
    pub max: f32,
}

/// Running summary of everything one aggregator observed.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationStatistics {
    MinMax {
        min: f32,
        max: f32,
    },
    AverageMinMax {
        min_sum: f64,
        max_sum: f64,
        num_batches: u64,
    },
    Histogram(Histogram),
}

impl CalibrationStatistics {
    pub fn new(options: &CalibrationOptions) -> Self {
        match options.method {
            CalibrationMethod::MinMax => Self::MinMax {
                min: f32::INFINITY,
                max: f32::NEG_INFINITY,
            },
            CalibrationMethod::AverageMinMax => Self::AverageMinMax {
                min_sum: 0.0,
                max_sum: 0.0,
                num_batches: 0,
            },
            CalibrationMethod::HistogramPercentile | CalibrationMethod::HistogramMseSymmetric => {
                Self::Histogram(Histogram::new(options.num_bins))
            }
        }
    }

    /// Folds one batch into the summary. Non-finite values are skipped.
    pub fn update(&mut self, values: &[f32]) {
        match self {
            Self::MinMax { min, max } => {
                if let Some((lo, hi)) = finite_min_max(values) {
                    *min = min.min(lo);
                    *max = max.max(hi);
                }
            }
            Self::AverageMinMax {
                min_sum,
                max_sum,
                num_batches,
            } => {
                if let Some((lo, hi)) = finite_min_max(values) {
                    *min_sum += lo as f64;
                    *max_sum += hi as f64;
                    *num_batches += 1;
                }
            }
            Self::Histogram(hist) => hist.observe(values),
        }
    }

    /// Returns `false` (and leaves `self` untouched) when the summaries are of different kinds.
    pub fn merge(&mut self, other: &Self) -> bool {
        match (self, other) {
            (Self::MinMax { min, max }, Self::MinMax { min: o_min, max: o_max }) => {
                *min = min.min(*o_min);
                *max = max.max(*o_max);
            }
            (
                Self::AverageMinMax {
                    min_sum,
                    max_sum,
                    num_batches,
                },
                Self::AverageMinMax {
                    min_sum: o_min_sum,
                    max_sum: o_max_sum,
                    num_batches: o_num_batches,
                },
            ) => {
                *min_sum += o_min_sum;
                *max_sum += o_max_sum;
                *num_batches += o_num_batches;
            }
            (Self::Histogram(hist), Self::Histogram(o_hist))
                if hist.num_bins() == o_hist.num_bins() =>
            {
                hist.merge(o_hist)
            }
            _ => return false,
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::MinMax { min, max } => min > max,
            Self::AverageMinMax { num_batches, .. } => *num_batches == 0,
            Self::Histogram(hist) => hist.is_empty(),
        }
    }

    pub fn finalize(&self, options: &CalibrationOptions) -> Option<CalibrationRange> {
        if self.is_empty() {
            return None;
        }
        let (min, max) = match self {
            Self::MinMax { min, max } => (*min, *max),
            Self::AverageMinMax {
                min_sum,
                max_sum,
                num_batches,
            } => (
                (min_sum / *num_batches as f64) as f32,
                (max_sum / *num_batches as f64) as f32,
            ),
            Self::Histogram(hist) => match options.method {
                CalibrationMethod::HistogramMseSymmetric => hist.mse_symmetric_range()?,
                _ => hist.percentile_range(options.min_percentile, options.max_percentile)?,
            },
        };
        Some(CalibrationRange { min, max })
    }
}

/// Per aggregator id summaries of one calibration session.
#[derive(Debug, Clone)]
pub struct StatisticsAccumulator {
    options: CalibrationOptions,
    statistics: FxHashMap<String, CalibrationStatistics>,
}

impl StatisticsAccumulator {
    pub fn new(options: &CalibrationOptions) -> Self {
        Self {
            options: options.clone(),
            statistics: FxHashMap::default(),
        }
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.statistics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.statistics.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CalibrationStatistics> {
        self.statistics.get(id)
    }

    /// Folds `observation` into the summary of `id`, creating it on first sight. Observations
    /// without any finite element leave the accumulator unchanged.
    pub fn update(&mut self, id: &str, observation: &Tensor) -> Result<(), CalibrationError> {
        let values = observation
            .try_data::<f32>()
            .ok_or_else(|| CalibrationError::UnsupportedObservation {
                id: id.to_string(),
                ty: observation.elem_ty(),
            })?;
        if finite_min_max(values).is_none() {
            return Ok(());
        }

        if let Some(stats) = self.statistics.get_mut(id) {
            stats.update(values);
        } else {
            let mut stats = CalibrationStatistics::new(&self.options);
            stats.update(values);
            self.statistics.insert(id.to_string(), stats);
        }
        Ok(())
    }

    /// Merges the summaries of `other` into `self`. The result does not depend on which side
    /// observed what.
    pub fn merge(&mut self, other: StatisticsAccumulator) -> Result<(), CalibrationError> {
        for (id, stats) in other.statistics {
            match self.statistics.get_mut(&id) {
                Some(mine) => {
                    if !mine.merge(&stats) {
                        return Err(CalibrationError::IncompatibleStatistics(id));
                    }
                }
                None => {
                    if std::mem::discriminant(&stats)
                        != std::mem::discriminant(&CalibrationStatistics::new(&self.options))
                    {
                        return Err(CalibrationError::IncompatibleStatistics(id));
                    }
                    self.statistics.insert(id, stats);
                }
            }
        }
        Ok(())
    }

    pub fn finalize(&self, id: &str) -> Result<CalibrationRange, CalibrationError> {
        self.statistics
            .get(id)
            .and_then(|stats| stats.finalize(&self.options))
            .ok_or_else(|| CalibrationError::MissingStatistics(id.to_string()))
    }

    /// Finalizes every id in `ids`. Returns the ranges and, in order, the ids without any
    /// statistics.
    pub fn finalize_all<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> (FxHashMap<String, CalibrationRange>, Vec<String>) {
        let mut ranges = FxHashMap::default();
        let mut missing = vec![];
        for id in ids {
            match self.finalize(id) {
                Ok(range) => {
                    ranges.insert(id.to_string(), range);
                }
                Err(_) => missing.push(id.to_string()),
            }
        }
        (ranges, missing)
    }
}

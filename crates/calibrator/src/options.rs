use crate::error::CalibrationError;

/// Upper bound on `num_bins`. Histograms allocate one counter per bin.
pub const MAX_NUM_BINS: usize = 1 << 16;

/// How the per-node range is derived from the observed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CalibrationMethod {
    /// Global minimum and maximum over all observations.
    #[default]
    MinMax,
    /// Mean of the per-batch minimum and maximum.
    AverageMinMax,
    /// Range between two percentiles of a histogram of all observations.
    HistogramPercentile,
    /// Symmetric range minimizing the estimated 8-bit quantization error.
    HistogramMseSymmetric,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOptions {
    pub method: CalibrationMethod,
    /// Resolution of the histogram used by the histogram methods.
    pub num_bins: usize,
    pub min_percentile: f32,
    pub max_percentile: f32,
    /// Number of samples stacked into one batch in graph mode.
    pub batch_size: usize,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            method: CalibrationMethod::MinMax,
            num_bins: 512,
            min_percentile: 0.001,
            max_percentile: 99.999,
            batch_size: 1,
        }
    }
}

impl CalibrationOptions {
    pub fn new(method: CalibrationMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    pub fn with_num_bins(mut self, num_bins: usize) -> Self {
        self.num_bins = num_bins;
        self
    }

    pub fn with_percentiles(mut self, min_percentile: f32, max_percentile: f32) -> Self {
        self.min_percentile = min_percentile;
        self.max_percentile = max_percentile;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn uses_histogram(&self) -> bool {
        matches!(
            self.method,
            CalibrationMethod::HistogramPercentile | CalibrationMethod::HistogramMseSymmetric
        )
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let invalid = |reason: &str| Err(CalibrationError::InvalidOptions(reason.to_string()));
        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.uses_histogram() && !(1..=MAX_NUM_BINS).contains(&self.num_bins) {
            return invalid("num_bins must be between 1 and 65536");
        }
        if !(0.0..=100.0).contains(&self.min_percentile)
            || !(0.0..=100.0).contains(&self.max_percentile)
            || self.min_percentile > self.max_percentile
        {
            return invalid("percentiles must satisfy 0 <= min <= max <= 100");
        }
        Ok(())
    }
}

#[test]
fn validate() {
    assert!(CalibrationOptions::default().validate().is_ok());
    assert!(CalibrationOptions::default()
        .with_batch_size(0)
        .validate()
        .is_err());
    assert!(CalibrationOptions::new(CalibrationMethod::HistogramPercentile)
        .with_num_bins(0)
        .validate()
        .is_err());
    assert!(CalibrationOptions::new(CalibrationMethod::HistogramMseSymmetric)
        .with_num_bins(MAX_NUM_BINS)
        .validate()
        .is_ok());
    assert!(matches!(
        CalibrationOptions::new(CalibrationMethod::HistogramPercentile)
            .with_num_bins(MAX_NUM_BINS + 1)
            .validate(),
        Err(CalibrationError::InvalidOptions(_))
    ));
    assert!(CalibrationOptions::default()
        .with_percentiles(60.0, 40.0)
        .validate()
        .is_err());
    assert!(CalibrationOptions::default()
        .with_percentiles(0.0, 101.0)
        .validate()
        .is_err());
}

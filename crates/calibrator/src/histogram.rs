/// Smallest bin width is `2^MIN_WIDTH_EXP`.
const MIN_WIDTH_EXP: i32 = -60;

/// Keeps bin indices within the exactly representable integer range of `f64`.
const MANTISSA_BITS: i32 = 52;

/// Number of quantization steps the symmetric MSE search assumes.
const NUM_QUANT_STEPS: f64 = 255.0;

/// A histogram whose bins are aligned at zero and whose bin width is a power of two.
///
/// The width only depends on the observed minimum and maximum, and coarsening a histogram by
/// a power of two maps every bin onto exactly one coarser bin. Observing the same multiset of
/// values therefore produces the same histogram regardless of batching or merge order.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    num_bins: usize,
    width_exp: i32,
    /// Index of `counts[0]`. Bin `k` covers `[k * width, (k + 1) * width)`.
    lower: i64,
    counts: Vec<u64>,
    min: f32,
    max: f32,
    total: u64,
}

impl Histogram {
    pub fn new(num_bins: usize) -> Self {
        Self {
            num_bins: num_bins.max(1),
            width_exp: MIN_WIDTH_EXP,
            lower: 0,
            counts: vec![],
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            total: 0,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn bin_width(&self) -> f64 {
        2f64.powi(self.width_exp)
    }

    /// Adds every finite value of `values`.
    pub fn observe(&mut self, values: &[f32]) {
        let Some((lo, hi)) = finite_min_max(values) else {
            return;
        };
        let (min, max) = (self.min.min(lo), self.max.max(hi));
        self.rescale(self.width_exp_for(min, max));
        self.min = min;
        self.max = max;
        self.cover(self.bin_index(min), self.bin_index(max));

        for &x in values.iter().filter(|x| x.is_finite()) {
            let idx = self.bin_index(x) - self.lower;
            self.counts[idx as usize] += 1;
            self.total += 1;
        }
    }

    /// Adds the counts of `other`. Both histograms must have the same `num_bins`.
    pub fn merge(&mut self, other: &Histogram) {
        debug_assert_eq!(self.num_bins, other.num_bins);
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }

        let (min, max) = (self.min.min(other.min), self.max.max(other.max));
        let width_exp = self.width_exp_for(min, max).max(other.width_exp);
        self.rescale(width_exp);
        let mut other = other.clone();
        other.rescale(width_exp);

        self.min = min;
        self.max = max;
        self.cover(self.bin_index(min), self.bin_index(max));
        let offset = (other.lower - self.lower) as usize;
        for (i, c) in other.counts.iter().enumerate() {
            self.counts[offset + i] += c;
        }
        self.total += other.total;
    }

    /// Returns the range between the `min_percentile`-th and the `max_percentile`-th
    /// percentile, clamped to the observed minimum and maximum.
    pub fn percentile_range(&self, min_percentile: f32, max_percentile: f32) -> Option<(f32, f32)> {
        if self.is_empty() {
            return None;
        }
        let total = self.total as f64;
        let lo_target = total * min_percentile as f64 / 100.0;
        let hi_target = total * max_percentile as f64 / 100.0;
        let width = self.bin_width();

        let mut lo = None;
        let mut hi = None;
        let mut cumulative = 0u64;
        for (i, &c) in self.counts.iter().enumerate() {
            cumulative += c;
            let k = (self.lower + i as i64) as f64;
            if lo.is_none() && cumulative as f64 >= lo_target {
                lo = Some(k * width);
            }
            if cumulative as f64 >= hi_target {
                hi = Some((k + 1.0) * width);
                break;
            }
        }

        let lo = lo.map_or(self.min, |lo| (lo as f32).max(self.min));
        let hi = hi.map_or(self.max, |hi| (hi as f32).min(self.max));
        Some((lo.min(hi), hi))
    }

    /// Searches for the symmetric range `[-c, c]` that minimizes the estimated squared error of
    /// quantizing the observed values to 8 bits. Rounding error is `step^2 / 12` per value inside
    /// the range and clipping error is the squared distance to `c` for values outside of it.
    pub fn mse_symmetric_range(&self) -> Option<(f32, f32)> {
        if self.is_empty() {
            return None;
        }
        let max_abs = (self.min as f64).abs().max((self.max as f64).abs());
        if max_abs == 0.0 {
            return Some((0.0, 0.0));
        }

        let width = self.bin_width();
        let mids = self
            .counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(|(i, &c)| {
                let mid = ((self.lower + i as i64) as f64 + 0.5) * width;
                (mid.abs().min(max_abs), c as f64)
            })
            .collect::<Vec<_>>();

        let mut best = (f64::INFINITY, max_abs);
        for k in 1..=self.num_bins {
            let c = max_abs * k as f64 / self.num_bins as f64;
            let step = 2.0 * c / NUM_QUANT_STEPS;
            let rounding = step * step / 12.0;
            let error = mids
                .iter()
                .map(|&(mid, n)| {
                    if mid <= c {
                        n * rounding
                    } else {
                        n * (mid - c) * (mid - c)
                    }
                })
                .sum::<f64>();
            if error < best.0 {
                best = (error, c);
            }
        }

        let c = best.1 as f32;
        Some((-c, c))
    }

    fn width_exp_for(&self, min: f32, max: f32) -> i32 {
        let (min, max) = (min as f64, max as f64);
        let range = max - min;
        let max_abs = min.abs().max(max.abs());
        let mut exp = self.width_exp;
        if range > 0.0 {
            exp = exp.max((range / self.num_bins as f64).log2().ceil() as i32);
        }
        if max_abs > 0.0 {
            exp = exp.max(max_abs.log2().ceil() as i32 - MANTISSA_BITS);
        }
        exp
    }

    fn bin_index(&self, x: f32) -> i64 {
        (x as f64 * 2f64.powi(-self.width_exp)).floor() as i64
    }

    /// Coarsens the bins to width `2^width_exp`.
    fn rescale(&mut self, width_exp: i32) {
        if width_exp <= self.width_exp {
            return;
        }
        let shift = ((width_exp - self.width_exp) as u32).min(63);
        self.width_exp = width_exp;
        if self.counts.is_empty() {
            return;
        }

        let upper = self.lower + self.counts.len() as i64 - 1;
        let new_lower = self.lower >> shift;
        let mut counts = vec![0; ((upper >> shift) - new_lower + 1) as usize];
        for (i, &c) in self.counts.iter().enumerate() {
            let idx = (self.lower + i as i64) >> shift;
            counts[(idx - new_lower) as usize] += c;
        }
        self.lower = new_lower;
        self.counts = counts;
    }

    /// Grows `counts` so that bins `lo..=hi` exist.
    fn cover(&mut self, lo: i64, hi: i64) {
        if self.counts.is_empty() {
            self.lower = lo;
            self.counts = vec![0; (hi - lo + 1) as usize];
            return;
        }
        if lo < self.lower {
            let mut counts = vec![0; (self.lower - lo) as usize];
            counts.append(&mut self.counts);
            self.counts = counts;
            self.lower = lo;
        }
        let upper = self.lower + self.counts.len() as i64 - 1;
        if hi > upper {
            self.counts.resize(self.counts.len() + (hi - upper) as usize, 0);
        }
    }
}

pub(crate) fn finite_min_max(values: &[f32]) -> Option<(f32, f32)> {
    values
        .iter()
        .filter(|x| x.is_finite())
        .fold(None, |acc, &x| match acc {
            None => Some((x, x)),
            Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
        })
}

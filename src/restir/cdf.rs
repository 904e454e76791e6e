//! Cumulative distribution over light contribution weights.

/// Discrete distribution sampled by inversion.
#[derive(Debug, Clone, Default)]
pub struct Cdf {
    /// Normalized running sums, `cumulative[i]` = P(index <= i).
    cumulative: Vec<f32>,
    pmf: Vec<f32>,
    total: f32,
}

impl Cdf {
    /// Build from non-negative weights. Falls back to uniform if every weight is zero.
    pub fn build(weights: impl IntoIterator<Item = f32>) -> Self {
        let mut cdf = Self::default();
        cdf.rebuild(weights);
        cdf
    }

    /// Rebuild in place, reusing the allocations.
    pub fn rebuild(&mut self, weights: impl IntoIterator<Item = f32>) {
        self.pmf.clear();
        self.pmf
            .extend(weights.into_iter().map(|w| if w.is_finite() { w.max(0.0) } else { 0.0 }));
        let n = self.pmf.len();
        self.total = self.pmf.iter().sum();
        if !(self.total > 0.0) {
            self.pmf.iter_mut().for_each(|p| *p = 1.0);
            self.total = n as f32;
        }

        let inv_total = 1.0 / self.total;
        self.cumulative.clear();
        self.cumulative.reserve(n);
        let mut running = 0.0f32;
        for p in &mut self.pmf {
            *p *= inv_total;
            running += *p;
            self.cumulative.push(running);
        }
        if let Some(last) = self.cumulative.last_mut() {
            *last = 1.0;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pmf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pmf.is_empty()
    }

    /// Sum of the weights the distribution was built from.
    #[inline]
    pub fn total(&self) -> f32 {
        self.total
    }

    /// Probability of drawing `index`.
    #[inline]
    pub fn pmf(&self, index: usize) -> f32 {
        self.pmf.get(index).copied().unwrap_or(0.0)
    }

    /// Draw an index for `u` in `[0, 1)`. Returns `None` on an empty distribution.
    #[inline]
    pub fn sample(&self, u: f32) -> Option<usize> {
        if self.cumulative.is_empty() {
            return None;
        }
        let index = self.cumulative.partition_point(|&c| c <= u);
        let mut index = index.min(self.cumulative.len() - 1);
        // Skip zero-probability entries that share a cumulative value.
        while self.pmf[index] == 0.0 && index + 1 < self.pmf.len() {
            index += 1;
        }
        Some(index)
    }

    pub fn size_in_bytes(&self) -> usize {
        (self.cumulative.capacity() + self.pmf.capacity()) * std::mem::size_of::<f32>()
    }
}

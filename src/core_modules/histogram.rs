// THEORY:
// A `Histogram` lives through three stages inside one tile:
//
// 1.  **Generate**: count how many of the tile's pixels fall in each bin.
// 2.  **Clip**: cap every bin at the clip limit and hand the clipped-off counts
//     back to the other bins. This is what limits contrast amplification in flat
//     regions; the total count never changes.
// 3.  **Map**: turn the counts into a cumulative transfer function scaled onto
//     the picture's intensity range. After this stage each entry is an output
//     intensity rather than a count.
//
// The same vector is reused for all three stages, so a tile owns exactly one
// allocation for its histogram.

use crate::core_modules::lookup_table::LookupTable;
use crate::core_modules::pixel_buffer::{GrayPicture, View};

/// Per-bin counts, or after `map` the per-bin output intensities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    bins: Vec<u64>,
}

impl Histogram {
    /// An empty histogram with `bin_count` zeroed bins.
    pub fn new(bin_count: usize) -> Self {
        Self {
            bins: vec![0; bin_count],
        }
    }

    pub fn from_bins(bins: Vec<u64>) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    #[inline]
    pub fn value(&self, bin: usize) -> u64 {
        self.bins[bin]
    }

    /// Sum over all bins.
    pub fn total(&self) -> u64 {
        self.bins.iter().sum()
    }

    /// Counts every pixel of `view` into the bin the lookup table assigns it.
    pub fn generate(&mut self, picture: &GrayPicture, view: &View, lut: &LookupTable) {
        for row in 0..view.height {
            for &pixel in picture.view_row(view, row) {
                self.bins[lut.bin(pixel)] += 1;
            }
        }
    }

    /// Caps every bin at `limit` and redistributes the excess over the bins.
    ///
    /// The first pass gives each bin an even share of the excess, filling bins
    /// that cannot take the whole share up to `limit`. The second pass walks the
    /// bins that still have headroom and hands out what is left in steps. Only
    /// when every bin sits at `limit` is the remainder spread over all bins,
    /// so the total is always preserved.
    pub fn clip(&mut self, limit: u64) {
        let bin_count = self.bins.len() as u64;
        if bin_count == 0 {
            return;
        }

        let mut excess: u64 = self.bins.iter().map(|&c| c.saturating_sub(limit)).sum();
        if excess == 0 {
            return;
        }

        let increment = excess / bin_count;
        for count in self.bins.iter_mut() {
            if *count > limit {
                *count = limit;
            } else if *count + increment > limit {
                excess -= limit - *count;
                *count = limit;
            } else {
                excess -= increment;
                *count += increment;
            }
        }

        while excess > 0 {
            let step = (1 + excess / bin_count).max(1);
            let mut progressed = false;

            for count in self.bins.iter_mut() {
                if excess == 0 {
                    break;
                }
                let headroom = limit.saturating_sub(*count);
                if headroom == 0 {
                    continue;
                }
                let add = step.min(headroom).min(excess);
                *count += add;
                excess -= add;
                progressed = true;
            }

            if !progressed {
                break;
            }
        }

        if excess > 0 {
            // limit * bin_count is below the total; nothing can stay bounded.
            let share = excess / bin_count;
            let rest = (excess % bin_count) as usize;
            for (i, count) in self.bins.iter_mut().enumerate() {
                *count += share + u64::from(i < rest);
            }
        }
    }

    /// Replaces the counts with a cumulative transfer function onto `[min, max]`.
    ///
    /// `width * height` is the number of pixels the histogram was built from.
    /// The scale is a single-precision ratio and every product is truncated,
    /// so the result is non-decreasing and never leaves `[min, max]`.
    pub fn map(&mut self, min: u8, max: u8, width: u32, height: u32) {
        let pixel_count = width as u64 * height as u64;
        if pixel_count == 0 {
            self.bins.fill(min as u64);
            return;
        }

        let scale = (max as f32 - min as f32) / pixel_count as f32;
        let mut sum: u64 = 0;

        for count in self.bins.iter_mut() {
            sum += *count;
            let value = min as u64 + (sum as f32 * scale) as u64;
            *count = value.min(max as u64);
        }
    }
}

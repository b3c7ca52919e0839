// THEORY:
// The lookup table quantizes raw 8-bit intensities into histogram bins. It is
// built once per run from the picture's observed range and then shared,
// read-only, by every tile (to fill histograms) and every interpolation region
// (to find which mapped value applies to a raw pixel).
//
// Intensities are grouped into bins of `1 + (max - min) / bin_count` levels,
// counted from `color_min`. The whole observed range `[color_min, color_max]`,
// both ends included, gets a bin below `bin_count`. Values outside the range
// saturate to the first or last occupied bin so the table is defined everywhere.

/// Maps an 8-bit intensity to a histogram bin index.
#[derive(Debug, Clone)]
pub struct LookupTable {
    bins: [u8; 256],
    bin_count: usize,
}

impl LookupTable {
    /// Builds the table for intensities observed in `[color_min, color_max]`.
    ///
    /// `bin_count` must lie in `1..=256`; the pipeline validates this before
    /// any table is built.
    pub fn new(color_min: u8, color_max: u8, bin_count: usize) -> Self {
        debug_assert!((1..=256).contains(&bin_count));
        debug_assert!(color_min <= color_max);

        let bin_size = 1 + (color_max - color_min) as usize / bin_count;
        let mut bins = [0u8; 256];

        for (intensity, bin) in bins.iter_mut().enumerate() {
            let clamped = intensity.clamp(color_min as usize, color_max as usize);
            *bin = ((clamped - color_min as usize) / bin_size) as u8;
        }

        Self { bins, bin_count }
    }

    /// Bin index for a raw intensity.
    #[inline]
    pub fn bin(&self, intensity: u8) -> usize {
        self.bins[intensity as usize] as usize
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }
}

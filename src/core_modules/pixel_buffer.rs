// THEORY:
// The `pixel_buffer` module owns the only mutable resource of an equalization
// run: the grayscale matrix. Everything else in the engine (tiles, interpolation
// regions) refers to it through `View`s, plain index descriptors holding an
// offset and a size. A view never copies pixels and never owns them; it is
// resolved against the picture only at the moment a row is needed.
//
// Key architectural principles:
// 1.  **Single Owner**: `GrayPicture` is moved into the pipeline for the run and
//     handed back afterwards, so the in-place semantics of the equalization are
//     visible to the caller without any hidden copies.
// 2.  **Index Views**: Windows are described by `(x, y, width, height)` rather
//     than by aliased slices. Disjointness is a property of the descriptors and
//     is checked once, at construction time, by `ensure_partition`.
// 3.  **Observed Range**: The picture carries the minimum and maximum intensity
//     it actually contains; the lookup table and the histogram mapping are built
//     from this range.

use crate::error::{ClaheError, Result};

/// An owned 8-bit grayscale matrix stored row-major, plus its observed
/// intensity range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayPicture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    color_min: u8,
    color_max: u8,
}

impl GrayPicture {
    /// Wraps a raw row-major buffer and scans it for its intensity range.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let (color_min, color_max) = intensity_range(&pixels);
        Self::with_range(width, height, pixels, color_min, color_max)
    }

    /// Wraps a raw buffer whose intensity range is already known.
    pub fn with_range(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        color_min: u8,
        color_max: u8,
    ) -> Result<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(ClaheError::DimensionMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        if color_min > color_max {
            return Err(ClaheError::invalid(
                "color_min",
                format!("{color_min} is above color_max {color_max}"),
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
            color_min,
            color_max,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_min(&self) -> u8 {
        self.color_min
    }

    pub fn color_max(&self) -> u8 {
        self.color_max
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// One row of `view`, borrowed straight from the backing buffer.
    pub fn view_row(&self, view: &View, row: u32) -> &[u8] {
        let start = (view.y + row) as usize * self.width as usize + view.x as usize;
        &self.pixels[start..start + view.width as usize]
    }

    /// Overwrites the window described by `view` with a row-major `patch`.
    pub(crate) fn write_window(&mut self, view: &View, patch: &[u8]) -> Result<()> {
        if patch.len() != view.area() {
            return Err(ClaheError::DimensionMismatch {
                expected: view.area(),
                actual: patch.len(),
            });
        }
        if view.width == 0 {
            return Ok(());
        }
        let stride = self.width as usize;
        for (row, src) in patch.chunks_exact(view.width as usize).enumerate() {
            let start = (view.y as usize + row) * stride + view.x as usize;
            self.pixels[start..start + src.len()].copy_from_slice(src);
        }
        Ok(())
    }
}

/// Smallest and largest intensity in `pixels`; `(0, 0)` when empty.
pub fn intensity_range(pixels: &[u8]) -> (u8, u8) {
    if pixels.is_empty() {
        return (0, 0);
    }
    pixels
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)))
}

/// A non-owning rectangular window into a `GrayPicture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct View {
    /// Column of the top-left pixel.
    pub x: u32,
    /// Row of the top-left pixel.
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl View {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Number of pixels inside the window.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Checks that `views` cover `[0, width) × [0, height)` exactly once: no pixel
/// is left out, none is claimed twice, and no view reaches outside.
pub fn ensure_partition<'a>(
    views: impl IntoIterator<Item = &'a View>,
    width: u32,
    height: u32,
) -> Result<()> {
    let mut coverage = vec![0u8; width as usize * height as usize];

    for view in views {
        if view.x + view.width > width || view.y + view.height > height {
            return Err(ClaheError::Partition(format!(
                "window {view:?} leaves the {width}x{height} area"
            )));
        }
        for y in view.y..view.y + view.height {
            let row = y as usize * width as usize;
            for x in view.x..view.x + view.width {
                let cell = &mut coverage[row + x as usize];
                if *cell != 0 {
                    return Err(ClaheError::Partition(format!(
                        "pixel ({x}, {y}) is claimed twice"
                    )));
                }
                *cell = 1;
            }
        }
    }

    match coverage.iter().position(|&c| c == 0) {
        Some(index) => Err(ClaheError::Partition(format!(
            "pixel ({}, {}) is not covered",
            index % width as usize,
            index / width as usize
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn from_raw_scans_range() {
        let picture = GrayPicture::from_raw(2, 2, vec![40, 7, 200, 90]).unwrap();
        assert_eq!(picture.color_min(), 7);
        assert_eq!(picture.color_max(), 200);
    }

    #[test]
    fn single_pixel_sets_both_bounds() {
        let picture = GrayPicture::from_raw(1, 1, vec![128]).unwrap();
        assert_eq!((picture.color_min(), picture.color_max()), (128, 128));
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        let err = GrayPicture::from_raw(3, 3, vec![0; 8]).unwrap_err();
        assert!(matches!(
            err,
            ClaheError::DimensionMismatch {
                expected: 9,
                actual: 8
            }
        ));
    }

    #[test]
    fn with_range_rejects_inverted_range() {
        let err = GrayPicture::with_range(1, 1, vec![5], 10, 4).unwrap_err();
        assert!(matches!(err, ClaheError::InvalidParameter { name: "color_min", .. }));
    }

    #[test]
    fn view_rows_follow_stride() {
        let pixels: Vec<u8> = (0..16).collect();
        let picture = GrayPicture::from_raw(4, 4, pixels).unwrap();
        let view = View::new(1, 2, 2, 2);
        assert_eq!(picture.view_row(&view, 0), &[9, 10]);
        assert_eq!(picture.view_row(&view, 1), &[13, 14]);
    }

    #[test]
    fn write_window_touches_only_the_window() {
        let mut picture = GrayPicture::from_raw(3, 3, vec![0; 9]).unwrap();
        picture
            .write_window(&View::new(1, 1, 2, 2), &[1, 2, 3, 4])
            .unwrap();
        assert_eq!(picture.pixels(), &[0, 0, 0, 0, 1, 2, 0, 3, 4]);
    }

    #[test]
    fn partition_accepts_exact_tiling() {
        let views = [
            View::new(0, 0, 2, 3),
            View::new(2, 0, 1, 3),
            View::new(0, 3, 3, 1),
        ];
        ensure_partition(&views, 3, 4).unwrap();
    }

    #[test]
    fn partition_reports_overlap_and_gap() {
        let overlapping = [View::new(0, 0, 2, 2), View::new(1, 0, 1, 2)];
        assert!(matches!(
            ensure_partition(&overlapping, 2, 2),
            Err(ClaheError::Partition(_))
        ));

        let gappy = [View::new(0, 0, 1, 2)];
        assert!(matches!(
            ensure_partition(&gappy, 2, 2),
            Err(ClaheError::Partition(_))
        ));
    }
}

// THEORY:
// Interpolation regions are where the tile histograms turn into output pixels.
// Their grid is offset by half a tile from the tile grid: region corners sit at
// tile centres, so a pixel inside a region is blended from the four tiles whose
// centres surround it. That blending is what removes the block edges plain
// per-tile equalization would leave behind.
//
// Key architectural principles:
// 1.  **Half-size Borders**: The first and last row/column of regions lie
//     between a tile centre and the picture edge. They are half a tile thick and
//     refer to the same tile on both sides along that axis, which reduces the
//     bilinear blend to a linear one (or, in corners, to a plain lookup).
// 2.  **Countdown Dependencies**: Every region starts with four outstanding
//     dependencies, one per corner reference, and registers itself with each
//     referenced tile. A repeated reference registers twice, so the countdown
//     always reaches zero exactly when the last needed histogram is published.
// 3.  **Disjoint Output**: Region windows partition the tiled area. Every tile
//     whose pixels overlap a region's window is among that region's
//     dependencies, so a region never writes pixels a pending tile still reads.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core_modules::lookup_table::LookupTable;
use crate::core_modules::pixel_buffer::{GrayPicture, View};
use crate::core_modules::tile::TileGrid;
use crate::error::{ClaheError, Result};

/// Number of tile references (and therefore notifications) per region.
pub const REGION_DEPENDENCIES: usize = 4;

/// An output window blended from up to four neighbouring tiles.
#[derive(Debug)]
pub struct InterpolationRegion {
    /// The pixels this region writes.
    pub view: View,
    pub top_left: usize,
    pub top_right: usize,
    pub bottom_left: usize,
    pub bottom_right: usize,
    pending: AtomicUsize,
}

impl InterpolationRegion {
    fn new(view: View, top: u32, bottom: u32, left: u32, right: u32, tiles: &TileGrid) -> Self {
        Self {
            view,
            top_left: tiles.index(left, top),
            top_right: tiles.index(right, top),
            bottom_left: tiles.index(left, bottom),
            bottom_right: tiles.index(right, bottom),
            pending: AtomicUsize::new(REGION_DEPENDENCIES),
        }
    }

    /// The four tile references in registration order.
    pub fn dependencies(&self) -> [usize; REGION_DEPENDENCIES] {
        [
            self.top_left,
            self.top_right,
            self.bottom_left,
            self.bottom_right,
        ]
    }

    /// Records one finished dependency. Returns `true` for the notification
    /// that brings the countdown to zero.
    pub fn notify(&self) -> bool {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "region at {:?} notified too often", self.view);
        previous == 1
    }

    pub fn is_ready(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    /// Computes the equalized value of every pixel in the window, row-major.
    ///
    /// Each raw pixel is looked up in the four corner histograms and blended
    /// with integer weights proportional to its distance from the opposite
    /// edges; the division truncates.
    pub fn interpolate(
        &self,
        picture: &GrayPicture,
        lut: &LookupTable,
        tiles: &TileGrid,
    ) -> Result<Vec<u8>> {
        if !self.is_ready() {
            return Err(ClaheError::WorkerPool(format!(
                "region at {:?} scheduled before its tiles finished",
                self.view
            )));
        }

        let histogram = |index: usize| {
            tiles
                .get(index)
                .and_then(|tile| tile.histogram())
                .ok_or_else(|| {
                    ClaheError::WorkerPool(format!("histogram of tile {index} is missing"))
                })
        };
        let top_left = histogram(self.top_left)?;
        let top_right = histogram(self.top_right)?;
        let bottom_left = histogram(self.bottom_left)?;
        let bottom_right = histogram(self.bottom_right)?;

        let width = self.view.width as u64;
        let height = self.view.height as u64;
        let pixel_count = width * height;
        let mut output = Vec::with_capacity(self.view.area());

        for y in 0..self.view.height {
            let row = picture.view_row(&self.view, y);
            let y = y as u64;
            let inverse_y = height - y;

            for (x, &raw) in row.iter().enumerate() {
                let x = x as u64;
                let inverse_x = width - x;
                let bin = lut.bin(raw);

                let top = inverse_x * top_left.value(bin) + x * top_right.value(bin);
                let bottom = inverse_x * bottom_left.value(bin) + x * bottom_right.value(bin);
                let value = (inverse_y * top + y * bottom) / pixel_count;

                output.push(value.min(u8::MAX as u64) as u8);
            }
        }

        Ok(output)
    }
}

/// All interpolation regions of one run, `(count_x + 1) * (count_y + 1)` of
/// them, stored row-major.
#[derive(Debug)]
pub struct RegionGrid {
    regions: Vec<InterpolationRegion>,
}

/// Extent and tile references of one region row or column.
struct Span {
    offset: u32,
    size: u32,
    first: u32,
    second: u32,
}

/// Splits one axis of `tile_count` tiles of `tile_size` pixels into
/// `tile_count + 1` spans: a leading half tile, full tiles between tile centres
/// and a trailing remainder, which together cover `tile_count * tile_size`.
fn spans(tile_count: u32, tile_size: u32) -> Vec<Span> {
    let half = tile_size / 2;
    let mut offset = 0;
    (0..=tile_count)
        .map(|i| {
            let (size, first, second) = if i == 0 {
                (half, 0, 0)
            } else if i == tile_count {
                (tile_size - half, tile_count - 1, tile_count - 1)
            } else {
                (tile_size, i - 1, i)
            };
            let span = Span {
                offset,
                size,
                first,
                second,
            };
            offset += size;
            span
        })
        .collect()
}

impl RegionGrid {
    /// Builds the region grid over `tiles` and registers every region with the
    /// four tiles it depends on. Must run before any tile starts.
    pub fn new(tiles: &mut TileGrid, tile_width: u32, tile_height: u32) -> Self {
        let columns = spans(tiles.count_x(), tile_width);
        let rows = spans(tiles.count_y(), tile_height);

        let mut regions = Vec::with_capacity(columns.len() * rows.len());
        for row in &rows {
            for column in &columns {
                let view = View::new(column.offset, row.offset, column.size, row.size);
                let region = InterpolationRegion::new(
                    view,
                    row.first,
                    row.second,
                    column.first,
                    column.second,
                    tiles,
                );

                let index = regions.len();
                for tile in region.dependencies() {
                    if let Some(tile) = tiles.get_mut(tile) {
                        tile.please_notify(index);
                    }
                }
                regions.push(region);
            }
        }

        Self { regions }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&InterpolationRegion> {
        self.regions.get(index)
    }

    /// Forwards a tile-completion signal to region `index`. Returns `true` if
    /// that region is now ready to interpolate.
    pub fn notify(&self, index: usize) -> bool {
        self.regions.get(index).is_some_and(|region| region.notify())
    }

    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.regions.iter().map(|region| &region.view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::pixel_buffer::ensure_partition;
    use crate::core_modules::tile::MappingParameters;
    use pretty_assertions::assert_eq;

    #[test]
    fn regions_partition_the_tiled_area() {
        for &(cx, cy, tw, th) in &[(1, 1, 8, 8), (4, 4, 25, 25), (3, 5, 7, 3), (2, 1, 1, 9), (6, 2, 5, 1)] {
            let mut tiles = TileGrid::new(cx, cy, tw, th);
            let regions = RegionGrid::new(&mut tiles, tw, th);
            assert_eq!(regions.len(), ((cx + 1) * (cy + 1)) as usize);
            ensure_partition(regions.views(), cx * tw, cy * th).unwrap();
        }
    }

    #[test]
    fn border_regions_are_half_size_with_repeated_references() {
        let mut tiles = TileGrid::new(3, 2, 10, 6);
        let regions = RegionGrid::new(&mut tiles, 10, 6);

        let corner = regions.get(0).unwrap();
        assert_eq!(corner.view, View::new(0, 0, 5, 3));
        assert_eq!(corner.dependencies(), [0, 0, 0, 0]);

        // Top edge, between tile columns 0 and 1.
        let top = regions.get(1).unwrap();
        assert_eq!(top.view, View::new(5, 0, 10, 3));
        assert_eq!(top.dependencies(), [0, 1, 0, 1]);

        // Interior: second region row, second column.
        let interior = regions.get(5).unwrap();
        assert_eq!(interior.view, View::new(5, 3, 10, 6));
        assert_eq!(interior.dependencies(), [0, 1, 3, 4]);

        let last = regions.get(regions.len() - 1).unwrap();
        assert_eq!(last.view, View::new(25, 9, 5, 3));
        assert_eq!(last.dependencies(), [5, 5, 5, 5]);
    }

    #[test]
    fn every_registration_is_matched_by_a_reference() {
        let mut tiles = TileGrid::new(3, 3, 4, 4);
        let regions = RegionGrid::new(&mut tiles, 4, 4);

        let registrations: usize = tiles.iter().map(|t| t.audience().len()).sum();
        assert_eq!(registrations, regions.len() * REGION_DEPENDENCIES);

        // The top-left corner tile serves the corner region four times.
        let corner_tile = tiles.get(0).unwrap();
        assert_eq!(corner_tile.audience().iter().filter(|&&r| r == 0).count(), 4);
    }

    #[test]
    fn countdown_fires_on_the_fourth_notification() {
        let mut tiles = TileGrid::new(2, 2, 2, 2);
        let regions = RegionGrid::new(&mut tiles, 2, 2);

        assert!(!regions.notify(4));
        assert!(!regions.notify(4));
        assert!(!regions.notify(4));
        assert!(!regions.get(4).unwrap().is_ready());
        assert!(regions.notify(4));
        assert!(regions.get(4).unwrap().is_ready());
    }

    #[test]
    fn interpolate_refuses_to_run_early() {
        let picture = GrayPicture::from_raw(2, 2, vec![0; 4]).unwrap();
        let lut = LookupTable::new(0, 0, 128);
        let mut tiles = TileGrid::new(1, 1, 2, 2);
        let regions = RegionGrid::new(&mut tiles, 2, 2);

        let result = regions.get(0).unwrap().interpolate(&picture, &lut, &tiles);
        assert!(matches!(result, Err(ClaheError::WorkerPool(_))));
    }

    #[test]
    fn interpolation_blends_horizontally_between_two_tiles() {
        // Left tile all 0, right tile all 200: the mapped histograms differ.
        let width = 8;
        let height = 2;
        let pixels = (0..height)
            .flat_map(|_| (0..width).map(|x| if x < 4 { 0 } else { 200 }))
            .collect();
        let picture = GrayPicture::from_raw(width, height, pixels).unwrap();
        let lut = LookupTable::new(0, 200, 128);
        let params = MappingParameters {
            clip_limit: 1000,
            color_min: 0,
            color_max: 200,
        };

        let mut tiles = TileGrid::new(2, 1, 4, 2);
        let regions = RegionGrid::new(&mut tiles, 4, 2);
        for index in 0..tiles.len() {
            tiles
                .get(index)
                .unwrap()
                .calculate_histogram(&picture, &lut, &params, &regions, |_| {})
                .unwrap();
        }

        // Middle region of the top row spans x = 2..6, one row high.
        let region = regions.get(1).unwrap();
        assert_eq!(region.view, View::new(2, 0, 4, 1));
        let output = region.interpolate(&picture, &lut, &tiles).unwrap();

        let bin_0 = lut.bin(0);
        let bin_200 = lut.bin(200);
        let left_0 = tiles.get(0).unwrap().histogram().unwrap().value(bin_0);
        let right_0 = tiles.get(1).unwrap().histogram().unwrap().value(bin_0);
        let left_200 = tiles.get(0).unwrap().histogram().unwrap().value(bin_200);
        let right_200 = tiles.get(1).unwrap().histogram().unwrap().value(bin_200);

        let expected: Vec<u8> = (0..4u64)
            .map(|x| {
                let (l, r) = if x < 2 { (left_0, right_0) } else { (left_200, right_200) };
                (((4 - x) * l + x * r) / 4) as u8
            })
            .collect();
        assert_eq!(output, expected);
    }
}

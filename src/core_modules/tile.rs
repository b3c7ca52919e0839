// THEORY:
// A `Tile` is the unit of histogram work. The picture is cut into a grid of
// equally sized, disjoint tiles; each computes the clipped, mapped histogram of
// its own pixels and publishes it exactly once. Tiles never wait on anything
// and never write to the picture, so every tile can run in parallel.
//
// Each tile also carries its "audience": the interpolation regions that need
// its histogram. A region that refers to the same tile more than once (borders
// and corners) appears in the audience once per reference, so the region's
// countdown receives as many notifications as it expects.

use std::sync::OnceLock;

use crate::core_modules::histogram::Histogram;
use crate::core_modules::interpolation_region::RegionGrid;
use crate::core_modules::lookup_table::LookupTable;
use crate::core_modules::pixel_buffer::{GrayPicture, View};
use crate::error::{ClaheError, Result};

/// Read-only settings every tile of one run shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingParameters {
    /// Absolute per-bin clip limit.
    pub clip_limit: u64,
    pub color_min: u8,
    pub color_max: u8,
}

/// One rectangular block of the picture and its histogram.
#[derive(Debug)]
pub struct Tile {
    /// Where the tile reads its pixels from.
    pub view: View,
    histogram: OnceLock<Histogram>,
    /// Region indices to notify once the histogram is published.
    audience: Vec<usize>,
}

impl Tile {
    pub fn new(view: View) -> Self {
        Self {
            view,
            histogram: OnceLock::new(),
            audience: Vec::new(),
        }
    }

    /// Registers `region` for one notification when this tile completes.
    pub fn please_notify(&mut self, region: usize) {
        self.audience.push(region);
    }

    pub fn audience(&self) -> &[usize] {
        &self.audience
    }

    /// The mapped histogram, once `calculate_histogram` has run.
    pub fn histogram(&self) -> Option<&Histogram> {
        self.histogram.get()
    }

    /// Generates, clips and maps this tile's histogram, then notifies every
    /// registered region. `on_ready` is called for each region whose last
    /// outstanding dependency was this tile.
    pub fn calculate_histogram(
        &self,
        picture: &GrayPicture,
        lut: &LookupTable,
        params: &MappingParameters,
        regions: &RegionGrid,
        mut on_ready: impl FnMut(usize),
    ) -> Result<()> {
        let mut histogram = Histogram::new(lut.bin_count());
        histogram.generate(picture, &self.view, lut);
        histogram.clip(params.clip_limit);
        histogram.map(
            params.color_min,
            params.color_max,
            self.view.width,
            self.view.height,
        );

        self.histogram.set(histogram).map_err(|_| {
            ClaheError::WorkerPool(format!("tile at {:?} computed twice", self.view))
        })?;

        for &region in &self.audience {
            if regions.notify(region) {
                on_ready(region);
            }
        }
        Ok(())
    }
}

/// The full grid of tiles, stored row-major.
#[derive(Debug)]
pub struct TileGrid {
    tiles: Vec<Tile>,
    count_x: u32,
    count_y: u32,
}

impl TileGrid {
    /// Cuts `count_x * count_y` disjoint tiles of `tile_width * tile_height`
    /// pixels, starting at the top-left corner of the picture.
    pub fn new(count_x: u32, count_y: u32, tile_width: u32, tile_height: u32) -> Self {
        let mut tiles = Vec::with_capacity(count_x as usize * count_y as usize);
        for y in 0..count_y {
            for x in 0..count_x {
                tiles.push(Tile::new(View::new(
                    x * tile_width,
                    y * tile_height,
                    tile_width,
                    tile_height,
                )));
            }
        }
        Self {
            tiles,
            count_x,
            count_y,
        }
    }

    pub fn count_x(&self) -> u32 {
        self.count_x
    }

    pub fn count_y(&self) -> u32 {
        self.count_y
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Row-major index of the tile in column `x`, row `y`.
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.count_x as usize + x as usize
    }

    pub fn get(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Tile> {
        self.tiles.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }
}

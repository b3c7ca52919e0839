// THEORY:
// The `pipeline` module is the top-level API of the equalization engine. The
// `ClahePipeline` plays the coordinator: it validates the request, plans the tile
// geometry, builds the lookup table and the tile/region dependency graph, hands
// the tiles to the worker pool and waits until every interpolation region has
// reported back. The returned picture is the input picture, equalized in place
// over the tiled area.
//
// Pixels to the right of `tiles_x * tile_width` or below
// `tiles_y * tile_height` (the remainder when the picture does not divide
// evenly) are passed through untouched. This is a known limitation of the
// tiling, not something the pipeline tries to paper over.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::core_modules::interpolation_region::RegionGrid;
use crate::core_modules::lookup_table::LookupTable;
use crate::core_modules::pixel_buffer::{GrayPicture, View, ensure_partition};
use crate::core_modules::tile::{MappingParameters, TileGrid};
use crate::error::{ClaheError, Result};
use crate::parallel_pipeline::{EqualizationRun, Job, WorkerPool, collect_regions};

/// Bin counts below this are raised to it.
pub const MIN_BIN_COUNT: usize = 128;
/// Lookup table entries are 8-bit bin indices.
pub const MAX_BIN_COUNT: usize = 256;

/// Configuration for the ClahePipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaheConfig {
    /// Number of tiles along the x axis.
    pub tiles_x: u32,
    /// Number of tiles along the y axis.
    pub tiles_y: u32,
    /// Relative clip limit. The absolute per-bin limit is this factor times the
    /// average bin count of a tile.
    pub clip_limit: f32,
    /// Histogram bins per tile. Raised to `MIN_BIN_COUNT` when lower.
    pub bin_count: usize,
    /// Upper bound on concurrently running jobs. `None` uses one worker per
    /// logical CPU.
    pub workers: Option<usize>,
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            tiles_x: 64,
            tiles_y: 64,
            clip_limit: 16.0,
            bin_count: MIN_BIN_COUNT,
            workers: None,
        }
    }
}

/// The validated layout of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Effective bin count after clamping.
    pub bin_count: usize,
    /// Absolute per-bin clip limit.
    pub clip_limit: u64,
}

impl TileGeometry {
    /// Checks `config` against a `width * height` picture and derives tile size,
    /// bin count and absolute clip limit.
    pub fn plan(config: &ClaheConfig, width: u32, height: u32) -> Result<Self> {
        if config.tiles_x < 1 {
            return Err(ClaheError::invalid("tiles_x", "must be at least 1"));
        }
        if config.tiles_y < 1 {
            return Err(ClaheError::invalid("tiles_y", "must be at least 1"));
        }
        if config.tiles_x > width {
            return Err(ClaheError::invalid(
                "tiles_x",
                format!("{} tiles do not fit in {width} columns", config.tiles_x),
            ));
        }
        if config.tiles_y > height {
            return Err(ClaheError::invalid(
                "tiles_y",
                format!("{} tiles do not fit in {height} rows", config.tiles_y),
            ));
        }
        if !config.clip_limit.is_finite() || config.clip_limit < 0.0 {
            return Err(ClaheError::invalid(
                "clip_limit",
                format!("{} is not a non-negative number", config.clip_limit),
            ));
        }
        if config.bin_count > MAX_BIN_COUNT {
            return Err(ClaheError::invalid(
                "bin_count",
                format!("{} exceeds {MAX_BIN_COUNT}", config.bin_count),
            ));
        }

        let bin_count = config.bin_count.max(MIN_BIN_COUNT);
        let tile_width = width / config.tiles_x;
        let tile_height = height / config.tiles_y;

        // Average bin count is taken in integers before scaling.
        let average_bin = (tile_width as u64 * tile_height as u64) / bin_count as u64;
        let clip_limit = (config.clip_limit * average_bin as f32) as u64;

        Ok(Self {
            tiles_x: config.tiles_x,
            tiles_y: config.tiles_y,
            tile_width,
            tile_height,
            bin_count,
            clip_limit,
        })
    }

    /// Width of the area the tiles cover.
    pub fn covered_width(&self) -> u32 {
        self.tiles_x * self.tile_width
    }

    pub fn covered_height(&self) -> u32 {
        self.tiles_y * self.tile_height
    }

    pub fn region_count(&self) -> usize {
        (self.tiles_x as usize + 1) * (self.tiles_y as usize + 1)
    }
}

/// The coordinator of an adaptive equalization.
pub struct ClahePipeline {
    config: ClaheConfig,
}

impl ClahePipeline {
    pub fn new(config: ClaheConfig) -> Self {
        Self { config }
    }

    /// Number of workers a run will use.
    pub fn worker_count(&self) -> usize {
        self.config.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Equalizes `picture` and hands it back.
    ///
    /// Fails with `ClaheError::InvalidParameter` before any work is scheduled
    /// if the configuration does not fit the picture.
    #[instrument(skip_all, fields(width = picture.width(), height = picture.height()))]
    pub async fn equalize(&self, picture: GrayPicture) -> Result<GrayPicture> {
        let geometry = TileGeometry::plan(&self.config, picture.width(), picture.height())?;
        let started = Instant::now();

        if geometry.covered_width() < picture.width() || geometry.covered_height() < picture.height()
        {
            warn!(
                covered_width = geometry.covered_width(),
                covered_height = geometry.covered_height(),
                "picture does not divide into whole tiles; remainder is left unprocessed"
            );
        }

        let lut = LookupTable::new(picture.color_min(), picture.color_max(), geometry.bin_count);
        let params = MappingParameters {
            clip_limit: geometry.clip_limit,
            color_min: picture.color_min(),
            color_max: picture.color_max(),
        };

        let mut tiles = TileGrid::new(
            geometry.tiles_x,
            geometry.tiles_y,
            geometry.tile_width,
            geometry.tile_height,
        );
        let regions = RegionGrid::new(&mut tiles, geometry.tile_width, geometry.tile_height);

        if cfg!(debug_assertions) {
            let tile_views: Vec<View> = tiles.iter().map(|tile| tile.view).collect();
            ensure_partition(&tile_views, geometry.covered_width(), geometry.covered_height())?;
            ensure_partition(
                regions.views(),
                geometry.covered_width(),
                geometry.covered_height(),
            )?;
        }

        let tile_count = tiles.len();
        let region_count = regions.len();
        debug_assert_eq!(region_count, geometry.region_count());

        let run = Arc::new(EqualizationRun {
            picture,
            lut,
            params,
            tiles,
            regions,
        });

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(self.worker_count(), Arc::clone(&run), done_tx);
        info!(
            tiles_x = geometry.tiles_x,
            tiles_y = geometry.tiles_y,
            tile_width = geometry.tile_width,
            tile_height = geometry.tile_height,
            clip_limit = geometry.clip_limit,
            workers = pool.worker_count(),
            "equalizing"
        );

        let submitted = (0..tile_count).try_for_each(|index| pool.submit(Job::Tile(index)));
        let outputs = match submitted {
            Ok(()) => collect_regions(&mut done_rx, region_count).await,
            Err(err) => Err(err),
        };
        pool.shutdown().await?;
        let outputs = outputs?;
        debug!(tiles = tile_count, regions = outputs.len(), "all regions finished");

        let mut picture = match Arc::try_unwrap(run) {
            Ok(run) => run.picture,
            Err(shared) => shared.picture.clone(),
        };
        for output in &outputs {
            picture.write_window(&output.view, &output.pixels)?;
        }

        info!(elapsed = ?started.elapsed(), "equalization finished");
        Ok(picture)
    }
}

/// Equalizes `picture` with `config` on the current tokio runtime.
pub async fn equalize_adaptive(picture: GrayPicture, config: &ClaheConfig) -> Result<GrayPicture> {
    ClahePipeline::new(config.clone()).equalize(picture).await
}

/// Blocking variant of `equalize_adaptive` for callers without a runtime.
///
/// Must not be called from inside a tokio runtime.
pub fn equalize_adaptive_blocking(picture: GrayPicture, config: &ClaheConfig) -> Result<GrayPicture> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(equalize_adaptive(picture, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(tiles_x: u32, tiles_y: u32) -> ClaheConfig {
        ClaheConfig {
            tiles_x,
            tiles_y,
            workers: Some(2),
            ..ClaheConfig::default()
        }
    }

    #[test]
    fn defaults_match_cli_defaults() {
        let config = ClaheConfig::default();
        assert_eq!((config.tiles_x, config.tiles_y), (64, 64));
        assert_eq!(config.clip_limit, 16.0);
        assert_eq!(config.bin_count, 128);
    }

    #[test]
    fn plan_derives_sizes_and_limit() {
        let geometry = TileGeometry::plan(&config(4, 4), 100, 100).unwrap();
        assert_eq!(geometry.tile_width, 25);
        assert_eq!(geometry.tile_height, 25);
        // 625 / 128 = 4, times 16.
        assert_eq!(geometry.clip_limit, 64);
        assert_eq!(geometry.region_count(), 25);
    }

    #[test]
    fn plan_keeps_limits_of_very_large_tiles() {
        // One 100000x100000 tile: 10^10 / 128 = 78125000 per bin, times 64.
        let cfg = ClaheConfig {
            clip_limit: 64.0,
            ..config(1, 1)
        };
        let geometry = TileGeometry::plan(&cfg, 100_000, 100_000).unwrap();
        assert_eq!(geometry.clip_limit, 5_000_000_000);
    }

    #[test]
    fn plan_raises_small_bin_counts() {
        let mut cfg = config(2, 2);
        cfg.bin_count = 16;
        let geometry = TileGeometry::plan(&cfg, 64, 64).unwrap();
        assert_eq!(geometry.bin_count, 128);
    }

    #[test]
    fn plan_rejects_bad_parameters() {
        let cases = [
            (config(0, 4), "tiles_x"),
            (config(4, 0), "tiles_y"),
            (config(11, 1), "tiles_x"),
            (config(1, 11), "tiles_y"),
            (
                ClaheConfig {
                    clip_limit: -1.0,
                    ..config(1, 1)
                },
                "clip_limit",
            ),
            (
                ClaheConfig {
                    clip_limit: f32::NAN,
                    ..config(1, 1)
                },
                "clip_limit",
            ),
            (
                ClaheConfig {
                    bin_count: 300,
                    ..config(1, 1)
                },
                "bin_count",
            ),
        ];

        for (cfg, field) in cases {
            match TileGeometry::plan(&cfg, 10, 10) {
                Err(ClaheError::InvalidParameter { name, .. }) => assert_eq!(name, field),
                other => panic!("expected InvalidParameter for {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_clip_factor_is_accepted() {
        let cfg = ClaheConfig {
            clip_limit: 0.0,
            ..config(2, 2)
        };
        assert_eq!(TileGeometry::plan(&cfg, 32, 32).unwrap().clip_limit, 0);
    }

    #[test]
    fn worker_count_is_at_least_one() {
        let mut cfg = config(1, 1);
        cfg.workers = Some(0);
        assert_eq!(ClahePipeline::new(cfg).worker_count(), 1);
        assert!(ClahePipeline::new(ClaheConfig::default()).worker_count() >= 1);
    }

    #[tokio::test]
    async fn remainder_pixels_pass_through() {
        // 10x7 with 3x2 tiles: tiles are 3x3, covering 9x6.
        let pixels: Vec<u8> = (0..70).map(|i| (i * 3) as u8).collect();
        let picture = GrayPicture::from_raw(10, 7, pixels.clone()).unwrap();
        let output = ClahePipeline::new(config(3, 2))
            .equalize(picture)
            .await
            .unwrap();

        for y in 0..7u32 {
            for x in 0..10u32 {
                if x >= 9 || y >= 6 {
                    let i = (y * 10 + x) as usize;
                    assert_eq!(output.pixels()[i], pixels[i], "pixel ({x}, {y})");
                }
            }
        }
    }

    #[tokio::test]
    async fn invalid_request_fails_before_work() {
        let picture = GrayPicture::from_raw(4, 4, vec![0; 16]).unwrap();
        let result = ClahePipeline::new(config(5, 1)).equalize(picture).await;
        assert!(matches!(
            result,
            Err(ClaheError::InvalidParameter { name: "tiles_x", .. })
        ));
    }

    #[test]
    fn blocking_wrapper_runs_without_runtime() {
        let picture = GrayPicture::from_raw(8, 8, vec![77; 64]).unwrap();
        let output = equalize_adaptive_blocking(picture, &config(2, 2)).unwrap();
        assert!(output.pixels().iter().all(|&p| p == 77));
    }
}

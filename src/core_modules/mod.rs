pub mod histogram;
pub mod interpolation_region;
pub mod lookup_table;
pub mod pixel_buffer;
pub mod tile;
pub mod utils;

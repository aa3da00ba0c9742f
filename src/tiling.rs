//! Tiling schemes of the OGC well-known tile matrix sets

use crate::crs::Crs;
use crate::error::{Result, XcubeError};
use std::f64::consts::PI;

/// Tile width and height in pixels
pub const TILE_SIZE: usize = 256;

/// Standardized rendering pixel size in metres
pub const STANDARD_PIXEL_SIZE: f64 = 0.00028;

/// WGS 84 semi-major axis in metres
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Metres per degree along the equator
pub const METERS_PER_DEGREE: f64 = 2.0 * PI * EARTH_RADIUS / 360.0;

/// Half the extent of the web mercator projection
pub const WEB_MERCATOR_EXTENT: f64 = PI * EARTH_RADIUS;

/// A tiling scheme with a fixed number of level-zero tiles,
/// each level doubling the tile counts of the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct TilingScheme {
    pub identifier: &'static str,
    pub crs: Crs,
    /// URN of the well-known scale set
    pub well_known_scale_set: &'static str,
    /// Number of tiles `(x, y)` at level 0
    pub num_level_zero_tiles: (usize, usize),
    pub tile_size: usize,
    /// `(x_min, y_min, x_max, y_max)` in CRS units
    pub bbox: (f64, f64, f64, f64),
}

impl TilingScheme {
    /// Geographic scheme with 2 x 1 tiles at level 0
    pub fn world_crs84_quad() -> Self {
        Self {
            identifier: "WorldCRS84Quad",
            crs: Crs::Crs84,
            well_known_scale_set: "urn:ogc:def:wkss:OGC:1.0:GoogleCRS84Quad",
            num_level_zero_tiles: (2, 1),
            tile_size: TILE_SIZE,
            bbox: (-180.0, -90.0, 180.0, 90.0),
        }
    }

    /// Web mercator scheme with a single tile at level 0
    pub fn world_web_mercator_quad() -> Self {
        Self {
            identifier: "WorldWebMercatorQuad",
            crs: Crs::WEB_MERCATOR,
            well_known_scale_set: "urn:ogc:def:wkss:OGC:1.0:GoogleMapsCompatible",
            num_level_zero_tiles: (1, 1),
            tile_size: TILE_SIZE,
            bbox: (
                -WEB_MERCATOR_EXTENT,
                -WEB_MERCATOR_EXTENT,
                WEB_MERCATOR_EXTENT,
                WEB_MERCATOR_EXTENT,
            ),
        }
    }

    /// Look up a scheme by identifier or CRS name
    pub fn for_name(name: &str) -> Result<Self> {
        match name {
            "WorldCRS84Quad" | "CRS84" | "OGC:CRS84" | "EPSG:4326" => Ok(Self::world_crs84_quad()),
            "WorldWebMercatorQuad" | "EPSG:3857" => Ok(Self::world_web_mercator_quad()),
            _ => Err(XcubeError::InvalidValue(format!(
                "unknown tiling scheme {name:?}"
            ))),
        }
    }

    pub fn is_geographic(&self) -> bool {
        self.crs.is_geographic()
    }

    /// Metres per CRS unit
    pub fn meters_per_unit(&self) -> f64 {
        if self.is_geographic() {
            METERS_PER_DEGREE
        } else {
            1.0
        }
    }

    /// Number of tiles `(x, y)` at a level
    pub fn num_tiles(&self, level: usize) -> (usize, usize) {
        let factor = 1usize << level;
        (
            self.num_level_zero_tiles.0 * factor,
            self.num_level_zero_tiles.1 * factor,
        )
    }

    /// Pixel size in CRS units at a level
    pub fn resolution(&self, level: usize) -> f64 {
        let (x_min, _, x_max, _) = self.bbox;
        let (num_tiles_x, _) = self.num_tiles(level);
        (x_max - x_min) / (num_tiles_x * self.tile_size) as f64
    }

    /// Scale denominator of a level for 0.28 mm pixels
    pub fn scale_denominator(&self, level: usize) -> f64 {
        self.resolution(level) * self.meters_per_unit() / STANDARD_PIXEL_SIZE
    }

    /// Upper left corner `(x, y)` in CRS units
    pub fn top_left_corner(&self) -> (f64, f64) {
        (self.bbox.0, self.bbox.3)
    }

    /// Bounding box of tile `(x, y)` at level `z`, rows counted from the top
    pub fn tile_bbox(&self, x: usize, y: usize, z: usize) -> Result<(f64, f64, f64, f64)> {
        let (num_tiles_x, num_tiles_y) = self.num_tiles(z);
        if x >= num_tiles_x || y >= num_tiles_y {
            return Err(XcubeError::OutOfBounds(format!(
                "tile ({x}, {y}) does not exist at level {z}"
            )));
        }
        let tile_extent = self.resolution(z) * self.tile_size as f64;
        let (x_min, y_max) = self.top_left_corner();
        let x0 = x_min + x as f64 * tile_extent;
        let y1 = y_max - y as f64 * tile_extent;
        Ok((x0, y1 - tile_extent, x0 + tile_extent, y1))
    }

    /// Smallest level whose pixel size is not coarser than `resolution_meters`
    fn level_for_resolution(&self, resolution_meters: f64) -> usize {
        let res_0 = self.resolution(0) * self.meters_per_unit();
        if resolution_meters >= res_0 {
            return 0;
        }
        let level = (res_0 / resolution_meters).log2();
        // tolerate rounding noise of exact powers of two
        let rounded = level.round();
        if (level - rounded).abs() < 1e-6 {
            rounded as usize
        } else {
            level.ceil() as usize
        }
    }

    /// Range of levels `(min, max)` needed to show a dataset with the
    /// given finest and coarsest pixel sizes.
    ///
    /// `geographic` tells whether the resolutions are in degrees, otherwise
    /// they are in metres.
    pub fn get_levels_for_resolution(
        &self,
        finest_res: f64,
        coarsest_res: f64,
        geographic: bool,
    ) -> Result<(usize, usize)> {
        if !(finest_res > 0.0 && coarsest_res >= finest_res) {
            return Err(XcubeError::InvalidValue(format!(
                "invalid resolutions {finest_res} and {coarsest_res}"
            )));
        }
        let to_meters = if geographic { METERS_PER_DEGREE } else { 1.0 };
        Ok((
            self.level_for_resolution(coarsest_res * to_meters),
            self.level_for_resolution(finest_res * to_meters),
        ))
    }

    /// Tile matrix identifier of a level, e.g. `"3"`
    pub fn tile_matrix_id(&self, level: usize) -> String {
        level.to_string()
    }

    /// URN of the scheme's CRS as used in WMTS documents
    pub fn crs_urn(&self) -> String {
        self.crs.urn()
    }
}

//! Grid mappings: the relation between pixel indices and CRS coordinates
//!
//! Only regular grids are modelled, i.e. grids whose x and y coordinates are
//! 1-D and equidistant.

pub mod bboxes;
pub mod helpers;

pub use bboxes::{compute_ij_bboxes, compute_xy_bbox};
pub use helpers::{from_lon_360, round_to_fraction, snap_to_int, to_lon_360};

use crate::crs::Crs;
use crate::cube::Dataset;
use crate::error::{Result, XcubeError};
use log::warn;

/// Default maximum tile size used when none is given
pub const DEFAULT_TILE_SIZE: usize = 512;

/// Relative tolerance for equidistant coordinates
const REGULARITY_TOLERANCE: f64 = 1e-6;

/// Regular grid mapping of a dataset's spatial dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct GridMapping {
    /// Image size `(width, height)`
    pub size: (usize, usize),
    /// Tile size `(width, height)`
    pub tile_size: (usize, usize),
    /// `(x_min, y_min, x_max, y_max)` of the pixel boundaries
    pub xy_bbox: (f64, f64, f64, f64),
    /// Pixel size `(x_res, y_res)`, always positive
    pub xy_res: (f64, f64),
    pub crs: Crs,
    /// Whether the j index grows with y
    pub is_j_axis_up: bool,
    /// Names of the x and y dimensions
    pub xy_dim_names: (String, String),
}

impl GridMapping {
    /// Create a regular grid mapping from its lower left corner
    pub fn regular(
        size: (usize, usize),
        xy_min: (f64, f64),
        xy_res: (f64, f64),
        crs: Crs,
    ) -> Result<Self> {
        if size.0 == 0 || size.1 == 0 {
            return Err(XcubeError::InvalidValue(
                "grid size must be positive".to_string(),
            ));
        }
        if !(xy_res.0 > 0.0 && xy_res.1 > 0.0) {
            return Err(XcubeError::InvalidValue(
                "grid resolution must be positive".to_string(),
            ));
        }
        let (x_name, y_name) = crs.default_xy_dim_names();
        Ok(Self {
            size,
            tile_size: default_tile_size(size),
            xy_bbox: (
                xy_min.0,
                xy_min.1,
                xy_min.0 + size.0 as f64 * xy_res.0,
                xy_min.1 + size.1 as f64 * xy_res.1,
            ),
            xy_res,
            crs,
            is_j_axis_up: false,
            xy_dim_names: (x_name.to_string(), y_name.to_string()),
        })
    }

    /// Create a grid mapping from 1-D pixel-centre coordinates
    pub fn from_coords(
        x: &[f64],
        y: &[f64],
        crs: Crs,
        tile_size: Option<(usize, usize)>,
    ) -> Result<Self> {
        if x.len() < 2 || y.len() < 2 {
            return Err(XcubeError::InvalidValue(
                "x and y coordinates must have at least two values".to_string(),
            ));
        }

        let mut x = x.to_vec();
        if crs.is_geographic() && !is_regular(&x) {
            // Grids crossing the anti-meridian become regular in [0, 360]
            let x_360: Vec<f64> = x.iter().map(|v| to_lon_360(*v)).collect();
            if is_regular(&x_360) {
                x = x_360;
            }
        }
        if !is_regular(&x) {
            return Err(XcubeError::InvalidValue(
                "x coordinates must be equidistant".to_string(),
            ));
        }
        if !is_regular(y) {
            return Err(XcubeError::InvalidValue(
                "y coordinates must be equidistant".to_string(),
            ));
        }

        let x_res = x[1] - x[0];
        if x_res <= 0.0 {
            return Err(XcubeError::InvalidValue(
                "x coordinates must be increasing".to_string(),
            ));
        }
        let y_step = y[1] - y[0];
        let y_res = y_step.abs();
        let (y_first, y_last) = (y[0], y[y.len() - 1]);
        let size = (x.len(), y.len());
        let (x_name, y_name) = crs.default_xy_dim_names();
        Ok(Self {
            size,
            tile_size: clamp_tile_size(tile_size.unwrap_or_else(|| default_tile_size(size)), size),
            xy_bbox: (
                snap_to_int(x[0] - x_res / 2.0),
                snap_to_int(y_first.min(y_last) - y_res / 2.0),
                snap_to_int(x[x.len() - 1] + x_res / 2.0),
                snap_to_int(y_first.max(y_last) + y_res / 2.0),
            ),
            xy_res: (x_res, y_res),
            crs,
            is_j_axis_up: y_step > 0.0,
            xy_dim_names: (x_name.to_string(), y_name.to_string()),
        })
    }

    /// Derive the grid mapping from a dataset's spatial coordinates.
    ///
    /// `lon`/`lat` coordinates are preferred over `x`/`y`. The CRS is read
    /// from the `spatial_ref`/`crs_wkt`/`crs` attribute of a `crs` or
    /// `spatial_ref` variable, defaulting to geographic WGS 84.
    pub fn from_dataset(dataset: &Dataset, tile_size: Option<(usize, usize)>) -> Result<Self> {
        let crs = crs_from_dataset(dataset);
        let names = [("lon", "lat"), ("x", "y"), ("longitude", "latitude")];
        let (x_name, y_name) = names
            .iter()
            .find(|(x, y)| {
                dataset.coords.get(*x).is_some_and(|v| v.ndim() == 1)
                    && dataset.coords.get(*y).is_some_and(|v| v.ndim() == 1)
            })
            .ok_or_else(|| {
                XcubeError::NotFound("cannot find grid mapping in dataset".to_string())
            })?;
        let x = dataset.coord_values(x_name)?;
        let y = dataset.coord_values(y_name)?;
        let mut gm = Self::from_coords(&x, &y, crs, tile_size)?;
        gm.xy_dim_names = (x_name.to_string(), y_name.to_string());
        Ok(gm)
    }

    pub fn width(&self) -> usize {
        self.size.0
    }

    pub fn height(&self) -> usize {
        self.size.1
    }

    pub fn x_min(&self) -> f64 {
        self.xy_bbox.0
    }

    pub fn y_min(&self) -> f64 {
        self.xy_bbox.1
    }

    pub fn x_max(&self) -> f64 {
        self.xy_bbox.2
    }

    pub fn y_max(&self) -> f64 {
        self.xy_bbox.3
    }

    /// Pixel-centre x coordinates
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.size.0)
            .map(|i| self.x_min() + self.xy_res.0 * (i as f64 + 0.5))
            .collect()
    }

    /// Pixel-centre y coordinates in j order
    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.size.1)
            .map(|j| {
                let offset = self.xy_res.1 * (j as f64 + 0.5);
                if self.is_j_axis_up {
                    self.y_min() + offset
                } else {
                    self.y_max() - offset
                }
            })
            .collect()
    }

    /// Pixel box `(i_min, j_min, i_max, j_max)`, upper bounds exclusive,
    /// covering `xy_bbox`, or `None` if it does not intersect the grid
    pub fn ij_bbox_from_xy_bbox(
        &self,
        xy_bbox: (f64, f64, f64, f64),
        xy_border: f64,
        ij_border: usize,
    ) -> Option<(usize, usize, usize, usize)> {
        let (x0, y0, x1, y1) = xy_bbox;
        let (x0, y0, x1, y1) = (
            x0.min(x1) - xy_border,
            y0.min(y1) - xy_border,
            x0.max(x1) + xy_border,
            y0.max(y1) + xy_border,
        );
        let (w, h) = (self.size.0 as f64, self.size.1 as f64);
        let (x_res, y_res) = self.xy_res;

        let i_min = snap_to_int((x0 - self.x_min()) / x_res).floor().clamp(0.0, w);
        let i_max = snap_to_int((x1 - self.x_min()) / x_res).ceil().clamp(0.0, w);
        let (j_min, j_max) = if self.is_j_axis_up {
            (
                snap_to_int((y0 - self.y_min()) / y_res).floor(),
                snap_to_int((y1 - self.y_min()) / y_res).ceil(),
            )
        } else {
            (
                snap_to_int((self.y_max() - y1) / y_res).floor(),
                snap_to_int((self.y_max() - y0) / y_res).ceil(),
            )
        };
        let (j_min, j_max) = (j_min.clamp(0.0, h), j_max.clamp(0.0, h));
        if i_min >= i_max || j_min >= j_max {
            return None;
        }
        let (i_min, j_min) = (i_min as usize, j_min as usize);
        let (i_max, j_max) = (i_max as usize, j_max as usize);
        Some((
            i_min.saturating_sub(ij_border),
            j_min.saturating_sub(ij_border),
            (i_max + ij_border).min(self.size.0),
            (j_max + ij_border).min(self.size.1),
        ))
    }

    /// Grid mapping with pixels `factor` times larger (factor > 1 downsamples)
    pub fn scale(&self, x_factor: f64, y_factor: f64) -> Result<Self> {
        if !(x_factor > 0.0 && y_factor > 0.0) {
            return Err(XcubeError::InvalidValue(
                "scale factors must be positive".to_string(),
            ));
        }
        let width = ((self.size.0 as f64 / x_factor).round() as usize).max(1);
        let height = ((self.size.1 as f64 / y_factor).round() as usize).max(1);
        let (x_min, y_min, x_max, y_max) = self.xy_bbox;
        Ok(Self {
            size: (width, height),
            tile_size: clamp_tile_size(self.tile_size, (width, height)),
            xy_res: ((x_max - x_min) / width as f64, (y_max - y_min) / height as f64),
            ..self.clone()
        })
    }

    /// Grid mapping of pyramid level `level`, the stride-`2^level` subset
    pub fn derive_for_level(&self, level: usize) -> Self {
        let factor = 1usize << level;
        let width = self.size.0.div_ceil(factor);
        let height = self.size.1.div_ceil(factor);
        let xy_res = (self.xy_res.0 * factor as f64, self.xy_res.1 * factor as f64);
        let (x_min, y_min, _, y_max) = self.xy_bbox;
        let xy_bbox = if self.is_j_axis_up {
            (x_min, y_min, x_min + width as f64 * xy_res.0, y_min + height as f64 * xy_res.1)
        } else {
            (x_min, y_max - height as f64 * xy_res.1, x_min + width as f64 * xy_res.0, y_max)
        };
        Self {
            size: (width, height),
            tile_size: clamp_tile_size(self.tile_size, (width, height)),
            xy_bbox,
            xy_res,
            ..self.clone()
        }
    }

    /// Number of pyramid levels until a level is smaller than one tile
    pub fn num_levels(&self) -> usize {
        let (mut w, mut h) = self.size;
        let (tw, th) = self.tile_size;
        let mut num_levels = 1;
        // a single pixel cannot be halved any further
        while w > 1 || h > 1 {
            w = (w + 1) / 2;
            h = (h + 1) / 2;
            if w < tw || h < th {
                break;
            }
            num_levels += 1;
        }
        num_levels
    }

    /// Spatial resolutions (x) of all pyramid levels
    pub fn level_resolutions(&self) -> Vec<f64> {
        (0..self.num_levels())
            .map(|level| self.xy_res.0 * (1usize << level) as f64)
            .collect()
    }

    /// Bounding box in WGS 84 degrees, for geographic grids only
    pub fn geographic_bbox(&self) -> Option<(f64, f64, f64, f64)> {
        if !self.crs.is_geographic() {
            return None;
        }
        let (x_min, y_min, x_max, y_max) = self.xy_bbox;
        Some((from_lon_360(x_min), y_min, from_lon_360(x_max), y_max))
    }
}

fn is_regular(values: &[f64]) -> bool {
    if values.len() < 2 {
        return true;
    }
    let step = values[1] - values[0];
    if step == 0.0 || !step.is_finite() {
        return false;
    }
    let tolerance = REGULARITY_TOLERANCE * step.abs();
    values
        .windows(2)
        .all(|pair| ((pair[1] - pair[0]) - step).abs() <= tolerance)
}

fn default_tile_size(size: (usize, usize)) -> (usize, usize) {
    (size.0.min(DEFAULT_TILE_SIZE), size.1.min(DEFAULT_TILE_SIZE))
}

fn clamp_tile_size(tile_size: (usize, usize), size: (usize, usize)) -> (usize, usize) {
    (tile_size.0.clamp(1, size.0.max(1)), tile_size.1.clamp(1, size.1.max(1)))
}

/// CRS declared by a dataset's `crs` or `spatial_ref` variable
pub fn crs_from_dataset(dataset: &Dataset) -> Crs {
    for var_name in ["crs", "spatial_ref"] {
        let Some(var) = dataset.variable(var_name) else {
            continue;
        };
        for attr_name in ["spatial_ref", "crs_wkt", "crs"] {
            if let Some(text) = var.attr_str(attr_name) {
                match Crs::parse(text) {
                    Ok(crs) => return crs,
                    Err(e) => warn!("ignoring CRS of variable {var_name:?}: {e}"),
                }
            }
        }
    }
    Crs::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{new_cube, NewCubeParams};

    #[test]
    fn test_from_coords() {
        let x: Vec<f64> = (0..360).map(|i| -179.5 + i as f64).collect();
        let y: Vec<f64> = (0..180).map(|j| 89.5 - j as f64).collect();
        let gm = GridMapping::from_coords(&x, &y, Crs::WGS84, Some((90, 90))).unwrap();
        assert_eq!(gm.size, (360, 180));
        assert_eq!(gm.tile_size, (90, 90));
        assert_eq!(gm.xy_bbox, (-180.0, -90.0, 180.0, 90.0));
        assert_eq!(gm.xy_res, (1.0, 1.0));
        assert!(!gm.is_j_axis_up);
        assert_eq!(gm.y_coords()[0], 89.5);
    }

    #[test]
    fn test_from_coords_irregular() {
        let x = [0.0, 1.0, 2.5];
        let y = [0.0, 1.0];
        assert!(GridMapping::from_coords(&x, &y, Crs::WGS84, None).is_err());
        assert!(GridMapping::from_coords(&[0.0], &y, Crs::WGS84, None).is_err());
        assert!(GridMapping::from_coords(&[2.0, 1.0], &y, Crs::WGS84, None).is_err());
    }

    #[test]
    fn test_from_coords_antimeridian() {
        let x = [178.5, 179.5, -179.5, -178.5];
        let y = [0.5, 1.5];
        let gm = GridMapping::from_coords(&x, &y, Crs::WGS84, None).unwrap();
        assert_eq!(gm.xy_bbox, (178.0, 0.0, 182.0, 2.0));
        assert_eq!(gm.geographic_bbox(), Some((178.0, 0.0, -178.0, 2.0)));
        assert!(gm.is_j_axis_up);
    }

    #[test]
    fn test_from_dataset() {
        let ds = new_cube(&NewCubeParams::default()).unwrap();
        let gm = GridMapping::from_dataset(&ds, None).unwrap();
        assert_eq!(gm.size, (360, 180));
        assert_eq!(gm.tile_size, (360, 180));
        assert_eq!(gm.crs, Crs::WGS84);
        assert!(gm.is_j_axis_up);
        assert_eq!(gm.xy_dim_names, ("lon".to_string(), "lat".to_string()));

        let params = NewCubeParams {
            x_name: "x".to_string(),
            y_name: "y".to_string(),
            x_start: 0.0,
            y_start: 0.0,
            spatial_res: 100.0,
            width: 10,
            height: 10,
            crs: Crs::Epsg(32632),
            ..NewCubeParams::default()
        };
        let ds = new_cube(&params).unwrap();
        let gm = GridMapping::from_dataset(&ds, None).unwrap();
        assert_eq!(gm.crs, Crs::Epsg(32632));
        assert_eq!(gm.xy_bbox, (0.0, 0.0, 1000.0, 1000.0));

        assert!(GridMapping::from_dataset(&Dataset::new(), None).is_err());
    }

    #[test]
    fn test_ij_bbox_from_xy_bbox() {
        let gm = GridMapping::regular((360, 180), (-180.0, -90.0), (1.0, 1.0), Crs::WGS84).unwrap();
        assert_eq!(
            gm.ij_bbox_from_xy_bbox((-180.0, -90.0, 180.0, 90.0), 0.0, 0),
            Some((0, 0, 360, 180))
        );
        assert_eq!(
            gm.ij_bbox_from_xy_bbox((0.0, 80.0, 10.5, 90.0), 0.0, 0),
            Some((180, 0, 191, 10))
        );
        assert_eq!(
            gm.ij_bbox_from_xy_bbox((0.0, 80.0, 10.5, 90.0), 0.0, 2),
            Some((178, 0, 193, 12))
        );
        assert_eq!(gm.ij_bbox_from_xy_bbox((200.0, 0.0, 210.0, 10.0), 0.0, 0), None);

        let mut up = gm.clone();
        up.is_j_axis_up = true;
        assert_eq!(
            up.ij_bbox_from_xy_bbox((0.0, 80.0, 10.5, 90.0), 0.0, 0),
            Some((180, 170, 191, 180))
        );
    }

    #[test]
    fn test_scale_and_levels() {
        let gm = GridMapping::regular((360, 180), (-180.0, -90.0), (1.0, 1.0), Crs::WGS84).unwrap();
        let scaled = gm.scale(2.0, 2.0).unwrap();
        assert_eq!(scaled.size, (180, 90));
        assert_eq!(scaled.xy_res, (2.0, 2.0));
        assert_eq!(scaled.xy_bbox, gm.xy_bbox);
        assert!(gm.scale(0.0, 1.0).is_err());

        let level = gm.derive_for_level(2);
        assert_eq!(level.size, (90, 45));
        assert_eq!(level.xy_res, (4.0, 4.0));
        assert_eq!(level.xy_bbox, (-180.0, -90.0, 180.0, 90.0));
    }

    #[test]
    fn test_num_levels() {
        let mut gm = GridMapping::regular((4000, 2000), (0.0, 0.0), (1.0, 1.0), Crs::WGS84).unwrap();
        gm.tile_size = (512, 512);
        // 2000, 1000, 500
        assert_eq!(gm.num_levels(), 2);
        gm.tile_size = (250, 250);
        assert_eq!(gm.num_levels(), 4);
        gm.tile_size = (4000, 2000);
        assert_eq!(gm.num_levels(), 1);
        assert_eq!(gm.level_resolutions(), vec![1.0]);
    }

    #[test]
    fn test_num_levels_single_pixel_tiles() {
        let x: Vec<f64> = (0..8).map(|i| i as f64 + 0.5).collect();
        let y: Vec<f64> = (0..8).map(|j| j as f64 + 0.5).collect();
        let gm = GridMapping::from_coords(&x, &y, Crs::WGS84, Some((1, 1))).unwrap();
        // 8, 4, 2, 1
        assert_eq!(gm.num_levels(), 4);

        let mut gm = GridMapping::regular((8, 1), (0.0, 0.0), (1.0, 1.0), Crs::WGS84).unwrap();
        gm.tile_size = (1, 1);
        assert_eq!(gm.num_levels(), 4);
        gm.size = (1, 1);
        assert_eq!(gm.num_levels(), 1);
    }
}

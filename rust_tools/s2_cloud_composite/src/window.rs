use crate::error::{CompositeError, Result};
use crate::io::RasterMetadata;
use geo::Rect;
use log::debug;

/// Pixel box `[x_min, x_max) x [y_min, y_max)` on a raster grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub x_min: usize,
    pub y_min: usize,
    pub x_max: usize,
    pub y_max: usize,
}

impl PixelWindow {
    /// Smallest window covering `envelope` (in the grid's CRS), clamped to
    /// the raster. Only north-up grids are supported.
    pub fn from_bounds(grid: &RasterMetadata, envelope: &Rect<f64>) -> Result<Self> {
        let gt = &grid.geotransform;
        if gt[2] != 0.0 || gt[4] != 0.0 {
            return Err(CompositeError::CrsError(
                "rotated geotransforms are not supported".to_string(),
            ));
        }

        // Fractional pixel coordinates of the envelope corners
        let col_a = (envelope.min().x - gt[0]) / gt[1];
        let col_b = (envelope.max().x - gt[0]) / gt[1];
        let row_a = (envelope.min().y - gt[3]) / gt[5];
        let row_b = (envelope.max().y - gt[3]) / gt[5];

        let col_lo = col_a.min(col_b).floor();
        let col_hi = col_a.max(col_b).ceil();
        let row_lo = row_a.min(row_b).floor();
        let row_hi = row_a.max(row_b).ceil();

        let width = grid.width as f64;
        let height = grid.height as f64;
        if col_hi <= 0.0 || row_hi <= 0.0 || col_lo >= width || row_lo >= height {
            return Err(CompositeError::RoiOutsideRaster);
        }

        let window = Self {
            x_min: col_lo.max(0.0) as usize,
            y_min: row_lo.max(0.0) as usize,
            x_max: col_hi.min(width) as usize,
            y_max: row_hi.min(height) as usize,
        };

        if window.width() == 0 || window.height() == 0 {
            return Err(CompositeError::RoiOutsideRaster);
        }

        debug!(
            "Read window: x=[{}-{}), y=[{}-{}) of {}x{}",
            window.x_min, window.x_max, window.y_min, window.y_max, grid.width, grid.height
        );

        Ok(window)
    }

    pub fn width(&self) -> usize {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> usize {
        self.y_max - self.y_min
    }

    /// Grid metadata of the sub-raster covered by this window.
    pub fn metadata(&self, base: &RasterMetadata) -> RasterMetadata {
        let gt = &base.geotransform;
        let x = self.x_min as f64;
        let y = self.y_min as f64;
        let origin_x = gt[0] + x * gt[1] + y * gt[2];
        let origin_y = gt[3] + x * gt[4] + y * gt[5];

        RasterMetadata {
            width: self.width(),
            height: self.height(),
            geotransform: [origin_x, gt[1], gt[2], origin_y, gt[4], gt[5]],
            ..base.clone()
        }
    }
}

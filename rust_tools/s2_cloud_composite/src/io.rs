use crate::error::{CompositeError, Result};
use crate::window::PixelWindow;
use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DriverManager, Metadata};
use geo::{Coord, Rect};
use log::{debug, info};
use ndarray::Array2;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub geotransform: [f64; 6],
    pub projection: String,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl RasterMetadata {
    /// Georeferenced coordinates of the center of pixel `(row, col)`.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let gt = &self.geotransform;
        let px = col as f64 + 0.5;
        let py = row as f64 + 0.5;
        (gt[0] + px * gt[1] + py * gt[2], gt[3] + px * gt[4] + py * gt[5])
    }

    /// Bounding rectangle of the raster in its own CRS.
    pub fn footprint(&self) -> Rect<f64> {
        let gt = &self.geotransform;
        let w = self.width as f64;
        let h = self.height as f64;
        let corners = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
            .map(|(px, py)| (gt[0] + px * gt[1] + py * gt[2], gt[3] + px * gt[4] + py * gt[5]));

        let min_x = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    }

    /// Same size, geotransform (to a sub-pixel tolerance) and projection.
    pub fn same_grid(&self, other: &RasterMetadata) -> bool {
        let tolerance = 1e-6 * self.pixel_width.max(self.pixel_height);
        self.width == other.width
            && self.height == other.height
            && self.projection == other.projection
            && self
                .geotransform
                .iter()
                .zip(other.geotransform.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    #[cfg(test)]
    pub fn for_tests(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            geotransform: [0.0, 10.0, 0.0, 0.0, 0.0, -10.0],
            projection: String::new(),
            pixel_width: 10.0,
            pixel_height: 10.0,
        }
    }
}

/// Extract metadata from a dataset without reading any pixels
pub fn extract_metadata_from_dataset(dataset: &Dataset) -> Result<RasterMetadata> {
    let (width, height) = dataset.raster_size();

    if width == 0 || height == 0 {
        return Err(CompositeError::InvalidDimensions(width, height));
    }

    let geotransform = dataset.geo_transform()?;
    let pixel_width = geotransform[1].abs();
    let pixel_height = geotransform[5].abs();

    if pixel_width <= 0.0 {
        return Err(CompositeError::InvalidPixelSize(pixel_width));
    }

    debug!("Raster dimensions: {}x{}", width, height);
    debug!("Pixel size: {:.6} x {:.6}", pixel_width, pixel_height);

    Ok(RasterMetadata {
        width,
        height,
        geotransform,
        projection: dataset.projection(),
        pixel_width,
        pixel_height,
    })
}

/// Read one band inside `window` as integers
pub fn read_band_window(
    dataset: &Dataset,
    band_index: usize,
    window: &PixelWindow,
) -> Result<Array2<i32>> {
    let rasterband = dataset.rasterband(band_index)?;

    debug!(
        "Reading band {}: offset=({},{}), size=({},{})",
        band_index, window.x_min, window.y_min, window.width(), window.height()
    );

    let buffer = rasterband.read_as::<i32>(
        (window.x_min as isize, window.y_min as isize),
        (window.width(), window.height()),
        (window.width(), window.height()),
        None,
    )?;

    let data_vec: Vec<i32> = buffer.into_iter().collect();
    let data = Array2::from_shape_vec((window.height(), window.width()), data_vec)?;

    Ok(data)
}

/// Nodata value of a band as an integer pixel value.
///
/// A nodata value that is not integral can never match an integer pixel and
/// is reported as absent.
pub fn band_nodata(dataset: &Dataset, band_index: usize) -> Result<Option<i32>> {
    let value = dataset.rasterband(band_index)?.no_data_value();
    Ok(value
        .filter(|v| v.fract() == 0.0 && *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX))
        .map(|v| v as i32))
}

/// Create a GeoTIFF with `num_bands` bands of type `T` on the grid of `metadata`
pub fn create_output_dataset<T: GdalType>(
    path: &Path,
    metadata: &RasterMetadata,
    num_bands: usize,
    options: Vec<String>,
) -> Result<Dataset> {
    info!("Creating output dataset: {}", path.display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;

    let mut dataset = if options.is_empty() {
        driver.create_with_band_type::<T, _>(path, metadata.width, metadata.height, num_bands)?
    } else {
        let mut gdal_options = CslStringList::new();
        for opt in options {
            gdal_options.add_string(&opt)?;
        }

        driver.create_with_band_type_with_options::<T, _>(
            path,
            metadata.width,
            metadata.height,
            num_bands,
            &gdal_options,
        )?
    };

    dataset.set_geo_transform(&metadata.geotransform)?;
    if !metadata.projection.is_empty() {
        dataset.set_projection(&metadata.projection)?;
    }

    Ok(dataset)
}

/// Write a full-size array into band `band_index` (1-based)
pub fn write_band<T: GdalType + Copy>(
    dataset: &mut Dataset,
    band_index: usize,
    data: &Array2<T>,
) -> Result<()> {
    let (height, width) = data.dim();
    let mut raster_band = dataset.rasterband(band_index)?;

    // Logical iteration order is row-major regardless of memory layout
    let values: Vec<T> = data.iter().copied().collect();
    let mut buffer = Buffer::new((width, height), values);
    raster_band.write((0, 0), (width, height), &mut buffer)?;

    debug!("Wrote band {} ({}x{})", band_index, width, height);
    Ok(())
}

/// Write named float bands as a multi-band GeoTIFF with `NaN` nodata.
///
/// `tags` become dataset-level metadata items. The dataset is returned open
/// so callers can add overviews.
pub fn write_multiband_output(
    path: &Path,
    bands: &[(String, Array2<f32>)],
    metadata: &RasterMetadata,
    options: Vec<String>,
    tags: &[(&str, String)],
) -> Result<Dataset> {
    let mut dataset = create_output_dataset::<f32>(path, metadata, bands.len(), options)?;

    for (key, value) in tags {
        dataset.set_metadata_item(key, value, "")?;
    }

    for (i, (name, data)) in bands.iter().enumerate() {
        let band_index = i + 1;
        write_band(&mut dataset, band_index, data)?;

        let mut raster_band = dataset.rasterband(band_index)?;
        raster_band.set_description(name)?;
        raster_band.set_no_data_value(Some(f64::NAN))?;
    }

    info!("Successfully wrote {} bands to {}", bands.len(), path.display());
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_center_north_up() {
        let grid = RasterMetadata {
            geotransform: [500000.0, 10.0, 0.0, 2600000.0, 0.0, -10.0],
            ..RasterMetadata::for_tests(100, 100)
        };
        assert_eq!(grid.pixel_center(0, 0), (500005.0, 2599995.0));
        assert_eq!(grid.pixel_center(2, 3), (500035.0, 2599975.0));
    }

    #[test]
    fn test_footprint() {
        let grid = RasterMetadata {
            geotransform: [100.0, 10.0, 0.0, 500.0, 0.0, -10.0],
            ..RasterMetadata::for_tests(20, 5)
        };
        let fp = grid.footprint();
        assert_eq!(fp.min(), Coord { x: 100.0, y: 450.0 });
        assert_eq!(fp.max(), Coord { x: 300.0, y: 500.0 });
    }

    #[test]
    fn test_same_grid() {
        let a = RasterMetadata::for_tests(10, 10);
        let mut b = a.clone();
        assert!(a.same_grid(&b));

        b.geotransform[0] += 1e-9;
        assert!(a.same_grid(&b));

        b.geotransform[0] += 5.0;
        assert!(!a.same_grid(&b));

        let c = RasterMetadata::for_tests(10, 11);
        assert!(!a.same_grid(&c));
    }
}

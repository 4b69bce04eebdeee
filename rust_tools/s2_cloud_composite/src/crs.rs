use crate::error::{CompositeError, Result};
use crate::io::RasterMetadata;
use crate::roi::Roi;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use geo::{Coord, LineString, Polygon};
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrsKind {
    Geographic, // lat/lon in degrees
    Projected,  // linear units, e.g. UTM meters
    Unknown,
}

/// Classify the CRS described by `projection_wkt`
pub fn detect_crs_kind(projection_wkt: &str) -> CrsKind {
    if projection_wkt.is_empty() {
        warn!("Raster has no projection, assuming ROI coordinates match the grid");
        return CrsKind::Unknown;
    }

    let spatial_ref = match SpatialRef::from_wkt(projection_wkt) {
        Ok(sr) => sr,
        Err(e) => {
            warn!("Failed to parse projection WKT: {}", e);
            return CrsKind::Unknown;
        }
    };

    if spatial_ref.is_geographic() {
        info!("Geographic CRS detected (lat/lon)");
        CrsKind::Geographic
    } else if spatial_ref.is_projected() {
        info!(
            "Projected CRS detected (linear units={:.6})",
            spatial_ref.linear_units()
        );
        CrsKind::Projected
    } else {
        warn!("Unknown CRS type");
        CrsKind::Unknown
    }
}

fn wgs84() -> Result<SpatialRef> {
    let mut srs = SpatialRef::from_epsg(4326)?;
    // x=lon, y=lat regardless of the EPSG axis order
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(srs)
}

/// Express the ROI polygon in the CRS of a raster.
///
/// Rasters without a projection are assumed to already be in lon/lat.
pub fn project_roi(roi: &Roi, projection_wkt: &str) -> Result<Polygon<f64>> {
    if projection_wkt.is_empty() {
        return Ok(roi.polygon().clone());
    }

    let source = wgs84()?;
    let mut target = SpatialRef::from_wkt(projection_wkt)
        .map_err(|e| CompositeError::CrsError(format!("invalid raster projection: {}", e)))?;
    target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

    if source == target {
        debug!("Raster is in WGS84, ROI used as-is");
        return Ok(roi.polygon().clone());
    }

    let transform = CoordTransform::new(&source, &target)?;

    let ring = roi.polygon().exterior();
    let mut xs: Vec<f64> = ring.coords().map(|c| c.x).collect();
    let mut ys: Vec<f64> = ring.coords().map(|c| c.y).collect();
    let mut zs = vec![0.0_f64; xs.len()];
    transform
        .transform_coords(&mut xs, &mut ys, &mut zs)
        .map_err(|e| CompositeError::CrsError(format!("ROI transform failed: {}", e)))?;

    let projected: LineString<f64> = xs
        .into_iter()
        .zip(ys)
        .map(|(x, y)| Coord { x, y })
        .collect();

    debug!("Projected ROI ring: {:?}", projected.0);
    Ok(Polygon::new(projected, vec![]))
}

/// Length of one degree of latitude
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Approximate ground size of one pixel of `grid`, in meters.
///
/// Geographic grids are converted at the latitude of the raster center.
pub fn pixel_size_meters(grid: &RasterMetadata) -> f64 {
    let size = (grid.pixel_width * grid.pixel_height).sqrt();

    match detect_crs_kind(&grid.projection) {
        CrsKind::Geographic => {
            let (_, lat) = grid.pixel_center(grid.height / 2, grid.width / 2);
            let x = grid.pixel_width * METERS_PER_DEGREE * lat.to_radians().cos();
            let y = grid.pixel_height * METERS_PER_DEGREE;
            (x * y).sqrt()
        }
        CrsKind::Projected => {
            let units = SpatialRef::from_wkt(&grid.projection)
                .map(|sr| sr.linear_units())
                .unwrap_or(1.0);
            size * units
        }
        CrsKind::Unknown => {
            warn!("Unknown CRS, assuming pixel size {:.6} is in meters", size);
            size
        }
    }
}

/// Radius in (fractional) cells for a radius given in meters
pub fn radius_in_cells(radius_meters: f64, pixel_size_meters: f64) -> f64 {
    let cells = radius_meters / pixel_size_meters;
    info!(
        "Radius: {} meters = {:.2} cells (pixel size: {:.3} m)",
        radius_meters, cells, pixel_size_meters
    );
    cells
}

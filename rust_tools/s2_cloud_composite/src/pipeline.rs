use crate::classify;
use crate::cog;
use crate::composite::{self, Reducer};
use crate::config::RunConfig;
use crate::crs;
use crate::error::{CompositeError, Result};
use crate::filter::{self, SceneFilter};
use crate::indices;
use crate::io;
use crate::mask::{self, MaskedImage};
use crate::roi::{self, Roi};
use crate::scene::{self, SceneHeader};
use crate::visualize::{self, MapDescriptor};
use crate::window::PixelWindow;
use geo::{BoundingRect, Polygon, Rect};
use log::{info, warn};
use rayon::prelude::*;
use std::path::PathBuf;

/// Where a run writes its products.
#[derive(Debug, Clone)]
pub struct RunOutputs {
    pub composite: PathBuf,
    pub quicklook: Option<PathBuf>,
    pub indices: Option<PathBuf>,
    pub classes: Option<PathBuf>,
    pub map_json: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Files that carried scene metadata
    pub scenes_found: usize,
    pub scenes_used: Vec<String>,
    pub width: usize,
    pub height: usize,
    /// Share of ROI pixels with data after masking
    pub valid_fraction: f64,
}

/// Headers of every readable scene. Files without scene metadata (such as
/// products of an earlier run) are skipped.
fn read_headers(paths: &[PathBuf], config: &RunConfig) -> Result<Vec<SceneHeader>> {
    let mut headers = Vec::with_capacity(paths.len());
    for path in paths {
        match scene::read_scene_header(path, config) {
            Ok(header) => headers.push(header),
            Err(CompositeError::MissingMetadata { key, .. }) => {
                warn!("Skipping {}: no {} metadata", path.display(), key);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(headers)
}

fn check_common_projection(headers: &[SceneHeader]) -> Result<()> {
    let Some(first) = headers.first() else {
        return Ok(());
    };
    match headers
        .iter()
        .find(|h| h.metadata.projection != first.metadata.projection)
    {
        Some(other) => Err(CompositeError::GridMismatch(other.id.clone())),
        None => Ok(()),
    }
}

/// ROI polygon and its envelope in the CRS described by `projection`.
fn roi_in(roi: &Roi, projection: &str) -> Result<(Polygon<f64>, Rect<f64>)> {
    let polygon = crs::project_roi(roi, projection)?;
    let envelope = polygon
        .bounding_rect()
        .ok_or_else(|| CompositeError::InvalidRoi("empty polygon".to_string()))?;
    Ok((polygon, envelope))
}

/// Query, mask, composite, clip and write.
pub fn run(config: &RunConfig, inputs: &[PathBuf], outputs: &RunOutputs) -> Result<RunSummary> {
    let roi = config.validate()?;

    // Collection query
    let paths = scene::discover_scenes(inputs)?;
    let headers = read_headers(&paths, config)?;
    let scenes_found = headers.len();
    if headers.is_empty() {
        return Err(CompositeError::NoScenes(paths.len()));
    }

    let dated = SceneFilter::from_config(config).apply(headers)?;
    let mut kept = filter::retain_overlapping(dated, |projection| Ok(roi_in(&roi, projection)?.1))?;
    if config.reducer == Reducer::LeastCloudy {
        filter::sort_by_cloudiness(&mut kept);
        kept.truncate(1);
    }
    check_common_projection(&kept)?;

    let grid = kept[0].metadata.clone();
    if let Some(other) = kept.iter().find(|h| !h.metadata.same_grid(&grid)) {
        return Err(CompositeError::GridMismatch(other.id.clone()));
    }
    crs::detect_crs_kind(&grid.projection);
    let (roi_native, envelope) = roi_in(&roi, &grid.projection)?;
    let window = PixelWindow::from_bounds(&grid, &envelope)?;

    // Per-scene masking
    info!("Reading and masking {} scene(s)", kept.len());
    let images: Vec<MaskedImage> = kept
        .par_iter()
        .map(|header| {
            let image = scene::read_scene(header, &window)?;
            mask::mask_scene(&image, &config.qa_band, config.reflectance_scale)
        })
        .collect::<Result<Vec<_>>>()?;

    // Composite and clip
    let mut result = composite::composite(&images, config.reducer)?;
    let roi_mask = roi::roi_pixel_mask(&roi_native, &result.grid)?;
    composite::clip(&mut result, &roi_mask)?;
    let valid_fraction = composite::valid_fraction(&result, &roi_mask);
    info!("{:.1}% of the ROI has cloud-free data", valid_fraction * 100.0);
    if valid_fraction == 0.0 {
        warn!("Composite is empty inside the ROI");
    }

    // Outputs
    let (width, height) = (result.grid.width, result.grid.height);
    let options = cog::create_dataset_options(&config.output, width, height);
    let tags = [
        ("DATASET", config.dataset.clone()),
        ("START_DATE", config.start_date.to_string()),
        ("END_DATE", config.end_date.to_string()),
        ("REDUCER", config.reducer.to_string()),
        ("SCENE_COUNT", result.scene_ids.len().to_string()),
        ("SCENES", result.scene_ids.join(",")),
    ];
    let mut dataset =
        io::write_multiband_output(&outputs.composite, &result.bands, &result.grid, options.clone(), &tags)?;
    if config.output.overviews {
        cog::build_overviews(&mut dataset)?;
    }

    if outputs.indices.is_some() || outputs.classes.is_some() {
        let index_bands = indices::compute_all(&result);

        if let Some(path) = &outputs.indices {
            if index_bands.is_empty() {
                warn!("No spectral index could be computed, skipping {}", path.display());
            } else {
                io::write_multiband_output(path, &index_bands, &result.grid, options.clone(), &tags)?;
            }
        }

        if let Some(path) = &outputs.classes {
            let raw = classify::classify(&index_bands)?;
            let radius = crs::radius_in_cells(
                config.classification.focal_radius_m,
                crs::pixel_size_meters(&result.grid),
            );
            let mut classes = classify::focal_mode(&raw, radius)?;
            classify::clip_classes(&mut classes, &roi_mask)?;
            classify::write_classification(path, &classes, &result.grid, options.clone())?;
        }
    }

    if let Some(path) = &outputs.quicklook {
        let rgba = visualize::render_rgb(&result, &config.visualization)?;
        visualize::write_quicklook(path, &rgba, &result.grid, options)?;
    }

    if let Some(path) = &outputs.map_json {
        let layer_path = outputs.quicklook.as_deref().unwrap_or(outputs.composite.as_path());
        let mut descriptor = MapDescriptor::new(config, &roi, Some(layer_path))?;
        if let Some(classes_path) = &outputs.classes {
            descriptor = descriptor.with_classes(config, Some(classes_path.as_path()));
        }
        descriptor.write(path)?;
    }

    Ok(RunSummary {
        scenes_found,
        scenes_used: result.scene_ids,
        width,
        height,
        valid_fraction,
    })
}

use crate::config::OutputConfig;
use crate::error::{CompositeError, Result};
use gdal::Dataset;
use log::{debug, info};

/// Validate compression type
pub fn validate_compression(compression: &str) -> Result<()> {
    let valid_types = ["DEFLATE", "LZW", "ZSTD", "NONE"];
    if !valid_types.contains(&compression) {
        return Err(CompositeError::InvalidCompression(compression.to_string()));
    }
    Ok(())
}

/// Validate tile size (must be multiple of 16)
pub fn validate_tile_size(tile_size: usize) -> Result<()> {
    if tile_size == 0 || tile_size % 16 != 0 {
        return Err(CompositeError::InvalidTileSize(tile_size));
    }
    Ok(())
}

/// GTiff creation options for tiled, compressed output.
///
/// Tiling is skipped when the raster is smaller than one tile, since GDAL
/// rejects block sizes larger than the image for tiny ROI crops.
pub fn create_dataset_options(output: &OutputConfig, width: usize, height: usize) -> Vec<String> {
    let mut options = vec![
        format!("COMPRESS={}", output.compression),
        "BIGTIFF=IF_SAFER".to_string(),
    ];
    if width >= output.tile_size && height >= output.tile_size {
        options.push("TILED=YES".to_string());
        options.push(format!("BLOCKXSIZE={}", output.tile_size));
        options.push(format!("BLOCKYSIZE={}", output.tile_size));
    }
    options
}

/// Overview factors (powers of 2) until the smaller side drops below 256.
pub fn overview_levels(width: usize, height: usize) -> Vec<i32> {
    let min_dim = width.min(height);
    let mut levels = Vec::new();
    let mut level = 2;
    while min_dim / level >= 256 {
        levels.push(level as i32);
        level *= 2;
    }
    levels
}

/// Build internal overviews with AVERAGE resampling
pub fn build_overviews(dataset: &mut Dataset) -> Result<()> {
    let (width, height) = dataset.raster_size();
    let levels = overview_levels(width, height);

    if levels.is_empty() {
        debug!("Raster too small for overviews ({}x{}), skipping", width, height);
        return Ok(());
    }

    info!("Creating {} overview levels: {:?}", levels.len(), levels);

    // Empty band list means all bands
    dataset.build_overviews("AVERAGE", &levels, &[])?;
    Ok(())
}

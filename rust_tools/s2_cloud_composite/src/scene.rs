use crate::config::RunConfig;
use crate::error::{CompositeError, Result};
use crate::io::{self, RasterMetadata};
use crate::window::PixelWindow;
use chrono::NaiveDate;
use gdal::{Dataset, Metadata};
use log::{debug, info, warn};
use ndarray::Array2;
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata items that may carry the acquisition date, most specific first.
const DATE_KEYS: [&str; 3] = ["SENSING_DATE", "DATATAKE_SENSING_START", "PRODUCT_START_TIME"];

/// Everything known about a scene file before reading pixels.
#[derive(Debug, Clone)]
pub struct SceneHeader {
    pub path: PathBuf,
    pub id: String,
    pub date: NaiveDate,
    pub cloudy_pct: f64,
    pub band_names: Vec<String>,
    pub metadata: RasterMetadata,
}

/// One integer band of a scene and the value its file marks as no data.
#[derive(Debug, Clone)]
pub struct SceneBand {
    pub name: String,
    pub data: Array2<i32>,
    pub nodata: Option<i32>,
}

impl SceneBand {
    /// True where the pixel holds a real value.
    pub fn has_data(&self, value: i32) -> bool {
        self.nodata != Some(value)
    }
}

/// Integer bands of one scene, read inside a window.
#[derive(Debug, Clone)]
pub struct SceneImage {
    pub id: String,
    pub date: NaiveDate,
    pub cloudy_pct: f64,
    pub bands: Vec<SceneBand>,
    pub grid: RasterMetadata,
}

impl SceneImage {
    pub fn band(&self, name: &str) -> Option<&SceneBand> {
        self.bands.iter().find(|band| band.name == name)
    }
}

fn is_geotiff(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
        .unwrap_or(false)
}

/// Expand directories into their GeoTIFF files (sorted); files are kept as given.
pub fn discover_scenes(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut scenes = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && is_geotiff(path))
                .collect();
            found.sort();
            debug!("{}: {} GeoTIFF file(s)", input.display(), found.len());
            scenes.extend(found);
        } else {
            scenes.push(input.clone());
        }
    }

    info!("Discovered {} scene file(s)", scenes.len());
    Ok(scenes)
}

/// Parse the leading `YYYY-MM-DD` of a metadata timestamp.
fn parse_metadata_date(value: &str) -> Option<NaiveDate> {
    let head = value.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Find a Sentinel-2 style `YYYYMMDDT` token in a file name, e.g.
/// `S2A_MSIL2A_20260103T051211_N0511_R033_T44QNF.tif`.
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    name.split(|c: char| c == '_' || c == '.' || c == '-')
        .find_map(|token| {
            let digits = token.get(..8)?;
            let rest = token.get(8..)?;
            if !rest.starts_with('T') || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
        })
}

fn scene_date(dataset: &Dataset, path: &Path) -> Result<NaiveDate> {
    for key in DATE_KEYS {
        if let Some(value) = dataset.metadata_item(key, "") {
            match parse_metadata_date(&value) {
                Some(date) => return Ok(date),
                None => warn!("{}: unparsable {}='{}'", path.display(), key, value),
            }
        }
    }

    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(date_from_file_name)
        .ok_or_else(|| CompositeError::MissingMetadata {
            key: DATE_KEYS[0].to_string(),
            path: path.display().to_string(),
        })
}

fn scene_cloud_percentage(dataset: &Dataset, path: &Path, key: &str) -> Result<f64> {
    dataset
        .metadata_item(key, "")
        .and_then(|value| value.trim().parse::<f64>().ok())
        .ok_or_else(|| CompositeError::MissingMetadata {
            key: key.to_string(),
            path: path.display().to_string(),
        })
}

/// Band names from band descriptions, falling back to the configured order.
fn band_names(dataset: &Dataset, fallback: &[String], path: &Path) -> Result<Vec<String>> {
    let count = dataset.raster_count();
    let mut names = Vec::with_capacity(count);

    for index in 1..=count {
        let description = dataset.rasterband(index)?.description()?;
        names.push(description.trim().to_string());
    }

    if names.iter().all(|name| !name.is_empty()) {
        return Ok(names);
    }

    if fallback.len() < count {
        return Err(CompositeError::MissingMetadata {
            key: "band descriptions".to_string(),
            path: path.display().to_string(),
        });
    }

    debug!("{}: no band descriptions, using configured band order", path.display());
    Ok(fallback[..count].to_vec())
}

/// Open a scene and read its header without touching pixel data.
pub fn read_scene_header(path: &Path, config: &RunConfig) -> Result<SceneHeader> {
    let dataset = Dataset::open(path)?;
    let metadata = io::extract_metadata_from_dataset(&dataset)?;

    let id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("scene")
        .to_string();

    let header = SceneHeader {
        path: path.to_path_buf(),
        date: scene_date(&dataset, path)?,
        cloudy_pct: scene_cloud_percentage(&dataset, path, &config.cloud_metadata_key)?,
        band_names: band_names(&dataset, &config.band_order, path)?,
        metadata,
        id,
    };

    debug!(
        "Scene {}: date={}, cloud={:.2}%, bands={:?}",
        header.id, header.date, header.cloudy_pct, header.band_names
    );
    Ok(header)
}

/// Read every band of a scene inside `window`.
pub fn read_scene(header: &SceneHeader, window: &PixelWindow) -> Result<SceneImage> {
    let dataset = Dataset::open(&header.path)?;

    let bands = header
        .band_names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            Ok(SceneBand {
                name: name.clone(),
                data: io::read_band_window(&dataset, i + 1, window)?,
                nodata: io::band_nodata(&dataset, i + 1)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SceneImage {
        id: header.id.clone(),
        date: header.date,
        cloudy_pct: header.cloudy_pct,
        bands,
        grid: window.metadata(&header.metadata),
    })
}

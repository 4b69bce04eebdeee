use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Band '{band}' not found in {source_name}")]
    MissingBand { band: String, source_name: String },

    #[error("Metadata '{key}' missing or unreadable in {path}")]
    MissingMetadata { key: String, path: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid region of interest: {0}")]
    InvalidRoi(String),

    #[error("Region of interest does not overlap the raster grid")]
    RoiOutsideRaster,

    #[error("No scenes left after filtering ({0} candidates)")]
    NoScenes(usize),

    #[error("Scene {0} is not on the same grid as the rest of the collection")]
    GridMismatch(String),

    #[error("Input raster has invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error("Pixel size is non-positive: {0}")]
    InvalidPixelSize(f64),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(String),

    #[error("Invalid tile size: {0} (must be multiple of 16)")]
    InvalidTileSize(usize),

    #[error("CRS error: {0}")]
    CrsError(String),
}

pub type Result<T> = std::result::Result<T, CompositeError>;

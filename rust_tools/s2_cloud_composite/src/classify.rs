//! Rule-based land-cover classes from spectral indices.
//!
//! Each pixel is assigned one of eight classes by thresholding its index
//! values, then the class raster is smoothed with a circular majority filter.

use crate::error::{CompositeError, Result};
use crate::indices::SpectralIndex;
use crate::io::{self, RasterMetadata};
use gdal::raster::{ColorEntry, ColorTable, PaletteInterpretation};
use gdal::{Dataset, Metadata};
use log::{debug, info};
use ndarray::{Array2, Zip};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;

/// Class value of pixels without data
pub const NODATA_CLASS: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LandCover {
    DeepWater = 0,
    Wetland = 1,
    DenseForest = 2,
    MixedForest = 3,
    Grassland = 4,
    Buildings = 5,
    Roads = 6,
    BareSoil = 7,
}

impl LandCover {
    pub const ALL: [LandCover; 8] = [
        LandCover::DeepWater,
        LandCover::Wetland,
        LandCover::DenseForest,
        LandCover::MixedForest,
        LandCover::Grassland,
        LandCover::Buildings,
        LandCover::Roads,
        LandCover::BareSoil,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            LandCover::DeepWater => "Deep Water",
            LandCover::Wetland => "Wetland/Shallow Water",
            LandCover::DenseForest => "Dense Forest",
            LandCover::MixedForest => "Mixed Forest",
            LandCover::Grassland => "Grassland",
            LandCover::Buildings => "Buildings",
            LandCover::Roads => "Roads",
            LandCover::BareSoil => "Bare Soil",
        }
    }

    /// Display color as RGB bytes
    pub fn rgb(self) -> [u8; 3] {
        match self {
            LandCover::DeepWater => [0x00, 0x00, 0x8b],
            LandCover::Wetland => [0x00, 0xce, 0xd1],
            LandCover::DenseForest => [0x00, 0x64, 0x00],
            LandCover::MixedForest => [0x22, 0x8b, 0x22],
            LandCover::Grassland => [0x9a, 0xcd, 0x32],
            LandCover::Buildings => [0xcd, 0x85, 0x3f],
            LandCover::Roads => [0x40, 0x40, 0x40],
            LandCover::BareSoil => [0xd2, 0xb4, 0x8c],
        }
    }

    /// Display color as `#rrggbb`
    pub fn color(self) -> String {
        let [r, g, b] = self.rgb();
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }
}

/// The index values one pixel is classified from.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexValues {
    pub ndvi: f64,
    pub evi: f64,
    pub savi: f64,
    pub ndre: f64,
    pub mndwi: f64,
    pub ndbi: f64,
    pub bsi: f64,
    pub brightness: f64,
}

/// Index bands the classifier reads, in `IndexValues` field order.
const REQUIRED: [SpectralIndex; 8] = [
    SpectralIndex::Ndvi,
    SpectralIndex::Evi,
    SpectralIndex::Savi,
    SpectralIndex::Ndre,
    SpectralIndex::Mndwi,
    SpectralIndex::Ndbi,
    SpectralIndex::Bsi,
    SpectralIndex::Brightness,
];

impl IndexValues {
    fn all_finite(&self) -> bool {
        [
            self.ndvi,
            self.evi,
            self.savi,
            self.ndre,
            self.mndwi,
            self.ndbi,
            self.bsi,
            self.brightness,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Class of one pixel, or `None` when any index is missing.
///
/// Rules are tried from the highest precedence down: water, forest,
/// grassland, built-up surfaces, bare soil. Pixels matching no rule fall
/// back to bare soil.
pub fn classify_pixel(v: &IndexValues) -> Option<LandCover> {
    if !v.all_finite() {
        return None;
    }

    let class = if v.mndwi > 0.3 {
        LandCover::DeepWater
    } else if v.mndwi > 0.1 {
        LandCover::Wetland
    } else if v.evi > 0.4 && v.ndre > 0.3 {
        LandCover::DenseForest
    } else if v.ndvi > 0.4 && v.evi <= 0.4 {
        LandCover::MixedForest
    } else if v.savi > 0.15 && v.savi <= 0.35 && v.ndvi <= 0.4 {
        LandCover::Grassland
    } else if v.ndbi > 0.0 && v.ndvi < 0.1 {
        if v.brightness > 0.08 {
            LandCover::Buildings
        } else {
            LandCover::Roads
        }
    } else {
        // Matches `bsi > 0.1 && ndvi < 0.15` as well as the fallback
        LandCover::BareSoil
    };

    Some(class)
}

fn find_layer<'a>(indices: &'a [(String, Array2<f32>)], index: SpectralIndex) -> Result<&'a Array2<f32>> {
    indices
        .iter()
        .find(|(name, _)| name == index.name())
        .map(|(_, data)| data)
        .ok_or_else(|| CompositeError::MissingBand {
            band: index.name().to_string(),
            source_name: "spectral indices".to_string(),
        })
}

/// Classify every pixel of a set of index rasters.
///
/// Pixels with any `NaN` index get `NODATA_CLASS`.
pub fn classify(indices: &[(String, Array2<f32>)]) -> Result<Array2<u8>> {
    let layers = REQUIRED
        .iter()
        .map(|&index| find_layer(indices, index))
        .collect::<Result<Vec<_>>>()?;

    let mut classes = Array2::<u8>::from_elem(layers[0].dim(), NODATA_CLASS);

    Zip::indexed(&mut classes).par_for_each(|(row, col), out| {
        let at = |i: usize| f64::from(layers[i][[row, col]]);
        let values = IndexValues {
            ndvi: at(0),
            evi: at(1),
            savi: at(2),
            ndre: at(3),
            mndwi: at(4),
            ndbi: at(5),
            bsi: at(6),
            brightness: at(7),
        };
        if let Some(class) = classify_pixel(&values) {
            *out = class.value();
        }
    });

    let counts = class_histogram(&classes);
    for class in LandCover::ALL {
        debug!("{}: {} pixel(s)", class.name(), counts[class.value() as usize]);
    }
    info!(
        "Classified {} pixel(s) into {} land-cover classes",
        counts.iter().sum::<usize>(),
        LandCover::ALL.len()
    );

    Ok(classes)
}

/// Pixel count per class value, nodata excluded
pub fn class_histogram(classes: &Array2<u8>) -> [usize; 8] {
    let mut counts = [0usize; 8];
    for &value in classes.iter() {
        if let Some(count) = counts.get_mut(value as usize) {
            *count += 1;
        }
    }
    counts
}

/// Majority filter over a circle of `radius_cells` cells.
///
/// A cell is in the window when its center lies within the radius of the
/// window center. Nodata cells are ignored and stay nodata.
pub fn focal_mode(classes: &Array2<u8>, radius_cells: f64) -> Result<Array2<u8>> {
    if !(radius_cells >= 0.0) {
        return Err(CompositeError::InvalidConfig(format!(
            "focal radius must be zero or positive, got {} cells",
            radius_cells
        )));
    }

    let reach = radius_cells.floor() as usize;
    if reach == 0 {
        info!("Focal radius below one cell, classes left unsmoothed");
        return Ok(classes.clone());
    }

    let (nrows, ncols) = classes.dim();

    // Process rows in parallel
    let rows: Vec<Vec<u8>> = (0..nrows)
        .into_par_iter()
        .map(|row| {
            (0..ncols)
                .map(|col| window_mode(classes, row, col, radius_cells, reach))
                .collect()
        })
        .collect();

    let flat: Vec<u8> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((nrows, ncols), flat)?)
}

/// Most frequent class in the circular window around `(center_row, center_col)`.
/// Ties go to the lowest class value.
fn window_mode(data: &Array2<u8>, center_row: usize, center_col: usize, radius: f64, reach: usize) -> u8 {
    if data[[center_row, center_col]] == NODATA_CLASS {
        return NODATA_CLASS;
    }

    let (nrows, ncols) = data.dim();
    let mut counts = [0u32; 8];

    let row_min = center_row.saturating_sub(reach);
    let row_max = (center_row + reach + 1).min(nrows);
    let col_min = center_col.saturating_sub(reach);
    let col_max = (center_col + reach + 1).min(ncols);
    let radius_sq = radius * radius;

    for r in row_min..row_max {
        for c in col_min..col_max {
            let dr = r as f64 - center_row as f64;
            let dc = c as f64 - center_col as f64;
            if dr * dr + dc * dc > radius_sq {
                continue;
            }
            if let Some(count) = counts.get_mut(data[[r, c]] as usize) {
                *count += 1;
            }
        }
    }

    let mut best = 0;
    for class in 1..counts.len() {
        if counts[class] > counts[best] {
            best = class;
        }
    }
    best as u8
}

/// Set every pixel outside `inside` to nodata.
pub fn clip_classes(classes: &mut Array2<u8>, inside: &Array2<bool>) -> Result<()> {
    if classes.dim() != inside.dim() {
        return Err(CompositeError::InvalidDimensions(inside.ncols(), inside.nrows()));
    }
    Zip::from(classes).and(inside).for_each(|class, &keep| {
        if !keep {
            *class = NODATA_CLASS;
        }
    });
    Ok(())
}

/// One legend row of the classified layer
#[derive(Debug, Clone, Serialize)]
pub struct LegendEntry {
    pub class: u8,
    pub name: String,
    pub color: String,
}

pub fn legend() -> Vec<LegendEntry> {
    LandCover::ALL
        .iter()
        .map(|&class| LegendEntry {
            class: class.value(),
            name: class.name().to_string(),
            color: class.color(),
        })
        .collect()
}

/// Write the class raster as a paletted byte GeoTIFF.
///
/// Class names are stored as `CLASS_<n>` metadata items.
pub fn write_classification(
    path: &Path,
    classes: &Array2<u8>,
    grid: &RasterMetadata,
    options: Vec<String>,
) -> Result<Dataset> {
    let mut dataset = io::create_output_dataset::<u8>(path, grid, 1, options)?;
    io::write_band(&mut dataset, 1, classes)?;

    for class in LandCover::ALL {
        dataset.set_metadata_item(&format!("CLASS_{}", class.value()), class.name(), "")?;
    }

    {
        let mut band = dataset.rasterband(1)?;
        band.set_description("land_cover")?;
        band.set_no_data_value(Some(f64::from(NODATA_CLASS)))?;

        let mut palette = ColorTable::new(PaletteInterpretation::Rgba);
        for class in LandCover::ALL {
            let [r, g, b] = class.rgb();
            let entry = ColorEntry::rgba(i16::from(r), i16::from(g), i16::from(b), 255);
            palette.set_color_entry(u16::from(class.value()), &entry);
        }
        band.set_color_table(&palette);
    }

    info!("Wrote land-cover classes: {}", path.display());
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn class_of(v: IndexValues) -> LandCover {
        classify_pixel(&v).unwrap()
    }

    #[test]
    fn test_water_rules() {
        let deep = IndexValues {
            mndwi: 0.5,
            ..Default::default()
        };
        assert_eq!(class_of(deep), LandCover::DeepWater);

        let shallow = IndexValues {
            mndwi: 0.2,
            ..Default::default()
        };
        assert_eq!(class_of(shallow), LandCover::Wetland);

        // Upper bound of the wetland band is inclusive, lower bound exclusive
        assert_eq!(
            class_of(IndexValues { mndwi: 0.3, ..Default::default() }),
            LandCover::Wetland
        );
        assert_eq!(
            class_of(IndexValues { mndwi: 0.1, ..Default::default() }),
            LandCover::BareSoil
        );
    }

    #[test]
    fn test_forest_rules() {
        let dense = IndexValues {
            evi: 0.5,
            ndre: 0.4,
            ndvi: 0.8,
            ..Default::default()
        };
        assert_eq!(class_of(dense), LandCover::DenseForest);

        let mixed = IndexValues {
            ndvi: 0.5,
            evi: 0.3,
            ..Default::default()
        };
        assert_eq!(class_of(mixed), LandCover::MixedForest);

        // High EVI without red-edge support is neither forest class
        let neither = IndexValues {
            ndvi: 0.5,
            evi: 0.5,
            ndre: 0.2,
            savi: 0.5,
            ..Default::default()
        };
        assert_eq!(class_of(neither), LandCover::BareSoil);
    }

    #[test]
    fn test_grassland_rule() {
        let grass = IndexValues {
            savi: 0.2,
            ndvi: 0.3,
            ..Default::default()
        };
        assert_eq!(class_of(grass), LandCover::Grassland);

        let too_green = IndexValues {
            savi: 0.4,
            ndvi: 0.3,
            ..Default::default()
        };
        assert_eq!(class_of(too_green), LandCover::BareSoil);
    }

    #[test]
    fn test_built_up_rules() {
        let built = IndexValues {
            ndbi: 0.2,
            ndvi: 0.05,
            brightness: 0.12,
            ..Default::default()
        };
        assert_eq!(class_of(built), LandCover::Buildings);

        let road = IndexValues {
            brightness: 0.08,
            ..built
        };
        assert_eq!(class_of(road), LandCover::Roads);
    }

    #[test]
    fn test_bare_soil_rule_and_fallback() {
        let soil = IndexValues {
            bsi: 0.2,
            ndvi: 0.1,
            ..Default::default()
        };
        assert_eq!(class_of(soil), LandCover::BareSoil);
        assert_eq!(class_of(IndexValues::default()), LandCover::BareSoil);
    }

    #[test]
    fn test_precedence_order() {
        // Water wins over dense forest
        let flooded_forest = IndexValues {
            mndwi: 0.35,
            evi: 0.6,
            ndre: 0.5,
            ..Default::default()
        };
        assert_eq!(class_of(flooded_forest), LandCover::DeepWater);

        // Wetland wins over built-up
        let wet_built = IndexValues {
            mndwi: 0.2,
            ndbi: 0.3,
            ndvi: 0.0,
            brightness: 0.2,
            ..Default::default()
        };
        assert_eq!(class_of(wet_built), LandCover::Wetland);

        // Grassland wins over buildings
        let grassy_built = IndexValues {
            savi: 0.2,
            ndvi: 0.05,
            ndbi: 0.2,
            brightness: 0.2,
            ..Default::default()
        };
        assert_eq!(class_of(grassy_built), LandCover::Grassland);

        // Built-up wins over bare soil
        let built_soil = IndexValues {
            ndbi: 0.1,
            ndvi: 0.0,
            bsi: 0.3,
            brightness: 0.05,
            ..Default::default()
        };
        assert_eq!(class_of(built_soil), LandCover::Roads);
    }

    #[test]
    fn test_nan_is_unclassified() {
        let v = IndexValues {
            ndvi: f64::NAN,
            ..Default::default()
        };
        assert_eq!(classify_pixel(&v), None);
    }

    fn layers(values: IndexValues) -> Vec<(String, Array2<f32>)> {
        let fields = [
            values.ndvi,
            values.evi,
            values.savi,
            values.ndre,
            values.mndwi,
            values.ndbi,
            values.bsi,
            values.brightness,
        ];
        REQUIRED
            .iter()
            .zip(fields)
            .map(|(index, v)| (index.name().to_string(), arr2(&[[v as f32, f32::NAN]])))
            .collect()
    }

    #[test]
    fn test_classify_raster() {
        let water = IndexValues {
            mndwi: 0.6,
            ..Default::default()
        };
        let classes = classify(&layers(water)).unwrap();
        assert_eq!(classes, arr2(&[[0, NODATA_CLASS]]));
        assert_eq!(class_histogram(&classes), [1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_classify_needs_every_index() {
        let mut indices = layers(IndexValues::default());
        indices.retain(|(name, _)| name != "NDRE");
        let err = classify(&indices).unwrap_err();
        assert!(matches!(err, CompositeError::MissingBand { ref band, .. } if band == "NDRE"));
    }

    #[test]
    fn test_focal_mode_uses_circle() {
        // At 1.2 cells the corners (distance 1.41) fall outside the window
        let data = arr2(&[[2, 3, 2], [3, 2, 3], [2, 3, 2]]);
        let smoothed = focal_mode(&data, 1.2).unwrap();
        assert_eq!(smoothed[[1, 1]], 3);

        // A 1.5 cell radius takes in the corners
        let smoothed = focal_mode(&data, 1.5).unwrap();
        assert_eq!(smoothed[[1, 1]], 2);
    }

    #[test]
    fn test_focal_mode_tie_goes_to_lowest_class() {
        let data = arr2(&[[7, 1, 7], [5, 5, 6], [7, 1, 7]]);
        // Window: 1, 1, 5, 5, 6
        assert_eq!(window_mode(&data, 1, 1, 1.0, 1), 1);
    }

    #[test]
    fn test_focal_mode_skips_nodata() {
        let n = NODATA_CLASS;
        let data = arr2(&[[n, n, n], [n, 4, 4], [n, 4, n]]);
        let smoothed = focal_mode(&data, 1.0).unwrap();
        assert_eq!(smoothed[[1, 1]], 4);
        assert_eq!(smoothed[[0, 0]], n);
        assert_eq!(smoothed[[2, 2]], n);
    }

    #[test]
    fn test_focal_mode_sub_cell_radius_is_identity() {
        let data = arr2(&[[0, 1], [2, 3]]);
        assert_eq!(focal_mode(&data, 0.6).unwrap(), data);
        assert!(focal_mode(&data, f64::NAN).is_err());
    }

    #[test]
    fn test_clip_classes() {
        let mut classes = arr2(&[[1, 2], [3, 4]]);
        clip_classes(&mut classes, &arr2(&[[true, false], [false, true]])).unwrap();
        assert_eq!(classes, arr2(&[[1, NODATA_CLASS], [NODATA_CLASS, 4]]));
    }

    #[test]
    fn test_legend_matches_palette() {
        let legend = legend();
        assert_eq!(legend.len(), 8);
        assert_eq!(legend[0].name, "Deep Water");
        assert_eq!(legend[0].color, "#00008b");
        assert_eq!(legend[6].color, "#404040");
        assert_eq!(legend[7].class, 7);
        assert_eq!(legend[7].color, "#d2b48c");
    }
}

use crate::error::{CompositeError, Result};
use crate::io::RasterMetadata;
use crate::scene::{SceneBand, SceneImage};
use chrono::NaiveDate;
use log::debug;
use ndarray::{Array2, Zip};
use rayon::prelude::*;

/// Sentinel-2 QA60 cloud flags.
///
/// Bit 10 marks opaque clouds and bit 11 marks cirrus. The positions are the
/// documented QA60 layout; nothing checks that the band actually follows it,
/// so feeding another bitfield yields a meaningless (but valid) mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudMask;

impl CloudMask {
    pub const OPAQUE_CLOUD: i32 = 1 << 10;
    pub const CIRRUS: i32 = 1 << 11;

    /// True when neither cloud flag is set.
    pub fn is_clear(qa: i32) -> bool {
        (qa & Self::OPAQUE_CLOUD) == 0 && (qa & Self::CIRRUS) == 0
    }

    /// Per-pixel usability mask for a QA raster.
    pub fn mask_raster(qa: &Array2<i32>) -> Array2<bool> {
        qa.mapv(Self::is_clear)
    }
}

/// A scene after cloud masking: reflectance as fractions, `NaN` where masked.
#[derive(Debug, Clone)]
pub struct MaskedImage {
    pub id: String,
    pub date: NaiveDate,
    pub cloudy_pct: f64,
    pub bands: Vec<(String, Array2<f32>)>,
    pub grid: RasterMetadata,
}

impl MaskedImage {
    pub fn band(&self, name: &str) -> Option<&Array2<f32>> {
        self.bands
            .iter()
            .find(|(band_name, _)| band_name == name)
            .map(|(_, data)| data)
    }

    /// Number of pixels that survived the mask (measured on the first band).
    pub fn clear_pixels(&self) -> usize {
        self.bands
            .first()
            .map(|(_, data)| data.iter().filter(|v| !v.is_nan()).count())
            .unwrap_or(0)
    }
}

/// Mask clouds and cirrus in `scene` and rescale every other band by `scale`.
///
/// Pixels a band marks as nodata are masked in that band; nodata in the QA
/// band masks every band. The QA band is consumed here and does not appear
/// in the output.
pub fn mask_scene(scene: &SceneImage, qa_band: &str, scale: f64) -> Result<MaskedImage> {
    let qa = scene.band(qa_band).ok_or_else(|| CompositeError::MissingBand {
        band: qa_band.to_string(),
        source_name: scene.id.clone(),
    })?;

    let mut clear = CloudMask::mask_raster(&qa.data);
    Zip::from(&mut clear)
        .and(&qa.data)
        .for_each(|ok, &value| *ok = *ok && qa.has_data(value));

    let bands: Vec<(String, Array2<f32>)> = scene
        .bands
        .par_iter()
        .filter(|band| band.name != qa_band)
        .map(|band| (band.name.clone(), apply_mask(band, &clear, scale)))
        .collect();

    let masked = MaskedImage {
        id: scene.id.clone(),
        date: scene.date,
        cloudy_pct: scene.cloudy_pct,
        bands,
        grid: scene.grid.clone(),
    };

    debug!(
        "Masked scene {}: {}/{} pixels clear",
        masked.id,
        masked.clear_pixels(),
        qa.data.len()
    );

    Ok(masked)
}

fn apply_mask(band: &SceneBand, clear: &Array2<bool>, scale: f64) -> Array2<f32> {
    Zip::from(&band.data).and(clear).map_collect(|&value, &ok| {
        if ok && band.has_data(value) {
            (f64::from(value) / scale) as f32
        } else {
            f32::NAN
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn scene_with(qa: SceneBand, red: SceneBand) -> SceneImage {
        let (height, width) = qa.data.dim();
        SceneImage {
            id: "S2_TEST".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            cloudy_pct: 4.2,
            bands: vec![red, qa],
            grid: RasterMetadata::for_tests(width, height),
        }
    }

    fn band(name: &str, data: Array2<i32>, nodata: Option<i32>) -> SceneBand {
        SceneBand {
            name: name.to_string(),
            data,
            nodata,
        }
    }

    fn scene(qa: Array2<i32>, red: Array2<i32>) -> SceneImage {
        scene_with(band("QA60", qa, None), band("B4", red, None))
    }

    #[test]
    fn test_clear_when_both_bits_unset() {
        assert!(CloudMask::is_clear(0));
        // Other bits are irrelevant
        assert!(CloudMask::is_clear(0b11_1111_1111));
        assert!(CloudMask::is_clear(1 << 12));
    }

    #[test]
    fn test_masked_when_cloud_bit_set() {
        assert!(!CloudMask::is_clear(1024));
        assert!(!CloudMask::is_clear(1024 | 0b1011));
    }

    #[test]
    fn test_masked_when_cirrus_bit_set() {
        assert!(!CloudMask::is_clear(2048));
        assert!(!CloudMask::is_clear(2048 | 1 << 13));
    }

    #[test]
    fn test_masked_when_both_bits_set() {
        assert!(!CloudMask::is_clear(3072));
    }

    #[test]
    fn test_exhaustive_low_bits() {
        for qa in 0..(1 << 14) {
            let expected = qa & (1 << 10) == 0 && qa & (1 << 11) == 0;
            assert_eq!(CloudMask::is_clear(qa), expected, "qa={}", qa);
        }
    }

    #[test]
    fn test_mask_scene_rescales_and_masks() {
        let qa = arr2(&[[0, 1024], [2048, 3072]]);
        let red = arr2(&[[4096, 5000], [6000, 7000]]);
        let masked = mask_scene(&scene(qa, red), "QA60", 10000.0).unwrap();

        assert_eq!(masked.bands.len(), 1);
        let b4 = masked.band("B4").unwrap();
        assert!((b4[[0, 0]] - 0.4096).abs() < 1e-6);
        assert!(b4[[0, 1]].is_nan());
        assert!(b4[[1, 0]].is_nan());
        assert!(b4[[1, 1]].is_nan());
        assert_eq!(masked.clear_pixels(), 1);
    }

    #[test]
    fn test_mask_scene_leaves_input_untouched() {
        let qa = arr2(&[[1024, 0]]);
        let red = arr2(&[[100, 200]]);
        let input = scene(qa, red.clone());
        let _ = mask_scene(&input, "QA60", 10000.0).unwrap();
        assert_eq!(input.band("B4").unwrap().data, red);
    }

    #[test]
    fn test_band_nodata_is_masked_under_clear_qa() {
        let qa = band("QA60", arr2(&[[0, 0, 1024]]), None);
        let red = band("B4", arr2(&[[0, 1500, 0]]), Some(0));
        let masked = mask_scene(&scene_with(qa, red), "QA60", 10000.0).unwrap();

        let b4 = masked.band("B4").unwrap();
        assert!(b4[[0, 0]].is_nan());
        assert!((b4[[0, 1]] - 0.15).abs() < 1e-6);
        assert!(b4[[0, 2]].is_nan());
        assert_eq!(masked.clear_pixels(), 1);
    }

    #[test]
    fn test_qa_nodata_masks_every_band() {
        let qa = band("QA60", arr2(&[[0, 65535]]), Some(65535));
        let red = band("B4", arr2(&[[1200, 1300]]), None);
        let masked = mask_scene(&scene_with(qa, red), "QA60", 10000.0).unwrap();

        let b4 = masked.band("B4").unwrap();
        assert!((b4[[0, 0]] - 0.12).abs() < 1e-6);
        assert!(b4[[0, 1]].is_nan());
    }

    #[test]
    fn test_zero_without_nodata_is_reflectance() {
        let qa = arr2(&[[0]]);
        let red = arr2(&[[0]]);
        let masked = mask_scene(&scene(qa, red), "QA60", 10000.0).unwrap();
        assert_eq!(masked.band("B4").unwrap()[[0, 0]], 0.0);
    }

    #[test]
    fn test_mask_scene_missing_qa_band() {
        let qa = arr2(&[[0]]);
        let red = arr2(&[[1]]);
        let err = mask_scene(&scene(qa, red), "SCL", 10000.0).unwrap_err();
        assert!(matches!(err, CompositeError::MissingBand { ref band, .. } if band == "SCL"));
    }
}

//! GDAL engine tests against the real command-line tools.
//!
//! These need GDAL (and for the filters, SAGA) on `PATH` and are ignored by
//! default. Run them with `cargo test -- --ignored`.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use strecha_core::engine::{
    AlgebraJob, BoundaryConversionJob, ByteConversionJob, ClipJob, DataType, RasterBinding,
    RescaleJob, SlopeJob, TranslateJob, ZonalStatsJob,
};
use strecha_core::{BandRef, EngineConfig, GdalEngine, RasterEngine, RasterExpression};

/// 4x4 elevation grid, one no-data cell (row 2, column 2).
const DEM_GRID: &str = "ncols 4
nrows 4
xllcorner 0
yllcorner 0
cellsize 1
NODATA_value -9999
100 101 102 103
101 102 103 104
102 103 -9999 105
103 104 105 106
";

const CRS: &str = "EPSG:5514";

/// Cell index of the no-data cell in row-major order.
const NODATA_CELL: usize = 10;

fn engine() -> GdalEngine {
    GdalEngine::new(EngineConfig::default())
}

/// Converts the ASCII grid to a GeoTIFF.
async fn dem_tiff(engine: &GdalEngine, dir: &Path) -> PathBuf {
    let grid = dir.join("dem.asc");
    std::fs::write(&grid, DEM_GRID).unwrap();
    engine
        .translate(TranslateJob {
            input: grid,
            output: dir.join("dem.tif"),
            output_type: Some(DataType::Float32),
            ..TranslateJob::default()
        })
        .await
        .unwrap()
}

/// Writes a one-square polygon mask and converts it the way a boundary is.
async fn square_mask(engine: &GdalEngine, dir: &Path, min: f64, max: f64) -> PathBuf {
    let geojson = dir.join("square.geojson");
    let ring = format!("[[{min},{min}],[{max},{min}],[{max},{max}],[{min},{max}],[{min},{min}]]");
    std::fs::write(
        &geojson,
        format!(
            r#"{{"type":"FeatureCollection","features":[{{"type":"Feature","properties":{{}},"geometry":{{"type":"Polygon","coordinates":[{ring}]}}}}]}}"#
        ),
    )
    .unwrap();

    engine
        .convert_boundary(BoundaryConversionJob {
            input: geojson,
            output: dir.join("obvod.shp"),
            crs: CRS.to_string(),
            skip_failures: true,
        })
        .await
        .unwrap()
}

async fn clip(engine: &GdalEngine, dem: &Path, mask: &Path, output: PathBuf) -> PathBuf {
    engine
        .clip_by_mask(ClipJob {
            input: dem.to_path_buf(),
            mask: mask.to_path_buf(),
            output,
            crs: CRS.to_string(),
            crop_to_cutline: true,
            nodata: Some(-9999.0),
        })
        .await
        .unwrap()
}

/// Cells of band 1 with the raster size and no-data value.
fn read_band(path: &Path) -> (Vec<f64>, (usize, usize), Option<f64>) {
    let dataset = gdal::Dataset::open(path).unwrap();
    let band = dataset.rasterband(1).unwrap();
    let nodata = band.no_data_value();
    let buffer = band.read_band_as::<f64>().unwrap();
    (buffer.data().to_vec(), dataset.raster_size(), nodata)
}

fn valid_range(cells: &[f64], nodata: Option<f64>) -> (f64, f64) {
    cells
        .iter()
        .copied()
        .filter(|value| Some(*value) != nodata && !value.is_nan())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), value| {
            (lo.min(value), hi.max(value))
        })
}

#[tokio::test]
#[ignore]
async fn test_validate_finds_gdal() {
    engine().validate().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_translate_and_probe() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let dem = dem_tiff(&engine, dir.path()).await;

    let info = engine.probe_raster(&dem).await.unwrap();
    assert_eq!((info.width, info.height), (4, 4));
    assert_eq!(info.band_count(), 1);
    assert_eq!(info.bands[0].data_type, Some(DataType::Float32));
    assert_eq!(info.bands[0].nodata, Some(-9999.0));
}

#[tokio::test]
#[ignore]
async fn test_clip_to_covering_mask_keeps_every_cell() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let dem = dem_tiff(&engine, dir.path()).await;
    let mask = square_mask(&engine, dir.path(), 0.0, 4.0).await;

    let clipped = clip(&engine, &dem, &mask, dir.path().join("clipped_dem.tif")).await;

    let (cells, size, nodata) = read_band(&clipped);
    assert_eq!(size, (4, 4));
    assert_eq!(nodata, Some(-9999.0));
    assert_eq!(cells[0], 100.0);
    assert_eq!(cells[NODATA_CELL], -9999.0);
    assert_eq!(cells.iter().filter(|value| **value != -9999.0).count(), 15);

    let mask_info = engine.probe_vector(&mask).await.unwrap();
    assert_eq!(mask_info.feature_count, 1);
}

#[tokio::test]
#[ignore]
async fn test_clip_to_inner_mask_reduces_extent() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let dem = dem_tiff(&engine, dir.path()).await;
    let mask = square_mask(&engine, dir.path(), 1.0, 3.0).await;

    let clipped = clip(&engine, &dem, &mask, dir.path().join("clipped_dem.tif")).await;

    let (cells, size, _) = read_band(&clipped);
    assert_eq!(size, (2, 2));
    assert_eq!(cells, vec![102.0, 103.0, 103.0, -9999.0]);
}

#[tokio::test]
#[ignore]
async fn test_zonal_median_over_known_polygon() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let dem = dem_tiff(&engine, dir.path()).await;
    let mask = square_mask(&engine, dir.path(), 0.0, 4.0).await;
    let clipped = clip(&engine, &dem, &mask, dir.path().join("clipped_dem.tif")).await;

    let result = engine
        .zonal_median(ZonalStatsJob {
            raster: clipped,
            band: 1,
            zones: mask,
            output: dir.path().join("stats.gpkg"),
            column_prefix: "_".to_string(),
        })
        .await
        .unwrap();

    // 15 valid cells, the eighth smallest is 103
    assert_eq!(result.feature_count, 1);
    assert_eq!(result.median, Some(103.0));
    assert!(result.layer.exists());
}

#[tokio::test]
#[ignore]
async fn test_normalize_rescale_and_byte() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let dem = dem_tiff(&engine, dir.path()).await;

    let normalized = engine
        .raster_algebra(AlgebraJob {
            inputs: vec![RasterBinding::new('A', &dem)],
            expression: RasterExpression::normalize(BandRef { raster: 'A', band: 1 }, 103.0),
            output: dir.path().join("normalized.tif"),
            output_type: DataType::Float32,
            nodata: Some(-9999.0),
        })
        .await
        .unwrap();

    let (cells, _, nodata) = read_band(&normalized);
    assert_eq!(cells[0], -3.0);
    assert_eq!(cells[15], 3.0);
    assert_eq!(nodata, Some(-9999.0));
    assert_eq!(cells[NODATA_CELL], -9999.0);

    let rescaled = engine
        .rescale(RescaleJob {
            input: normalized,
            output: dir.path().join("rescaled.tif"),
            band: 1,
            out_min: 0.0,
            out_max: 255.0,
        })
        .await
        .unwrap();

    let (cells, _, nodata) = read_band(&rescaled);
    let (min, max) = valid_range(&cells, nodata);
    assert!(min.abs() < 1e-3, "rescaled minimum {min}");
    assert!((max - 255.0).abs() < 1e-3, "rescaled maximum {max}");

    let byte = engine
        .to_byte(ByteConversionJob {
            input: rescaled,
            output: dir.path().join("dem_8bit.tif"),
            nodata: 255,
        })
        .await
        .unwrap();

    let info = engine.probe_raster(&byte).await.unwrap();
    assert_eq!(info.bands[0].data_type, Some(DataType::Byte));
    assert_eq!(info.bands[0].nodata, Some(255.0));

    let (cells, _, _) = read_band(&byte);
    assert_eq!(cells[0], 0.0);
    assert_eq!(cells[NODATA_CELL], 255.0);
    assert!(cells.iter().all(|value| (0.0..=255.0).contains(value)));
}

#[tokio::test]
#[ignore]
async fn test_slope() {
    let dir = TempDir::new().unwrap();
    let engine = engine();
    let dem = dem_tiff(&engine, dir.path()).await;

    let slope = engine
        .slope(SlopeJob {
            input: dem,
            output: dir.path().join("slope.tif"),
            band: 1,
        })
        .await
        .unwrap();

    let info = engine.probe_raster(&slope).await.unwrap();
    assert_eq!((info.width, info.height), (4, 4));
}

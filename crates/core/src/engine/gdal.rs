//! GDAL/SAGA command-line engine implementation.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::config::EngineConfig;
use super::error::EngineError;
use super::traits::RasterEngine;
use super::types::{
    AlgebraJob, BandInfo, BoundaryConversionJob, ByteConversionJob, ClipJob, DataType, MergeJob,
    RankFilterJob, RasterBinding, RasterInfo, ResamplingFilterJob, ResamplingOutputs, RescaleJob,
    SlopeJob, TranslateJob, VectorInfo, ZonalStatsJob, ZonalStatsResult,
};
use crate::expression::{format_literal, BandRef, RasterExpression};

/// Engine that shells out to the GDAL utilities and `saga_cmd`.
pub struct GdalEngine {
    config: EngineConfig,
}

impl GdalEngine {
    /// Creates a new engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Creates an engine with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs an external tool and returns its stdout.
    ///
    /// The child is killed when the timeout elapses.
    async fn run_tool(&self, tool: &Path, args: &[String]) -> Result<String, EngineError> {
        let label = tool_label(tool);
        debug!(tool = %label, args = ?args, "Running external tool");

        let child = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::ToolNotFound {
                        path: tool.to_path_buf(),
                    }
                } else {
                    EngineError::Io(e)
                }
            })?;

        let timeout_duration = Duration::from_secs(self.config.timeout_secs);
        let output = match timeout(timeout_duration, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EngineError::Timeout {
                    tool: label,
                    timeout_secs: self.config.timeout_secs,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EngineError::command_failed(
                label,
                format!("exited with code: {:?}", output.status.code()),
                if stderr.is_empty() { None } else { Some(stderr) },
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Builds ogr2ogr arguments for the boundary conversion.
    fn build_boundary_args(job: &BoundaryConversionJob) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            "ESRI Shapefile".to_string(),
            "-s_srs".to_string(),
            job.crs.clone(),
            "-t_srs".to_string(),
            job.crs.clone(),
            "-nlt".to_string(),
            "POLYGON".to_string(),
        ];
        if job.skip_failures {
            args.push("-skipfailures".to_string());
        }
        // destination before source
        args.push(path_arg(&job.output));
        args.push(path_arg(&job.input));
        args
    }

    /// Builds gdalwarp arguments for clipping by a mask.
    fn build_clip_args(job: &ClipJob) -> Vec<String> {
        let mut args = vec![
            "-overwrite".to_string(),
            "-s_srs".to_string(),
            job.crs.clone(),
            "-t_srs".to_string(),
            job.crs.clone(),
            "-of".to_string(),
            "GTiff".to_string(),
            "-cutline".to_string(),
            path_arg(&job.mask),
        ];
        if job.crop_to_cutline {
            args.push("-crop_to_cutline".to_string());
        }
        if let Some(nodata) = job.nodata {
            args.extend(["-dstnodata".to_string(), nodata_arg(nodata)]);
        }
        args.push(path_arg(&job.input));
        args.push(path_arg(&job.output));
        args
    }

    /// Builds gdal_calc.py arguments.
    ///
    /// Each bound raster may be read through a single band only.
    fn build_algebra_args(job: &AlgebraJob) -> Result<Vec<String>, EngineError> {
        if job.inputs.is_empty() {
            return Err(EngineError::invalid_job("raster algebra needs at least one input"));
        }

        let mut bands: BTreeMap<char, u32> = BTreeMap::new();
        for BandRef { raster, band } in job.expression.band_refs() {
            if !job.inputs.iter().any(|binding| binding.name == raster) {
                return Err(EngineError::invalid_job(format!(
                    "expression references unbound raster {raster}"
                )));
            }
            if let Some(previous) = bands.insert(raster, band) {
                if previous != band {
                    return Err(EngineError::invalid_job(format!(
                        "raster {raster} is read through bands {previous} and {band}"
                    )));
                }
            }
        }

        let mut args = vec![format!("--calc={}", job.expression.to_gdal_calc())];
        for RasterBinding { name, path } in &job.inputs {
            if !name.is_ascii_uppercase() {
                return Err(EngineError::invalid_job(format!(
                    "invalid raster variable name {name:?}"
                )));
            }
            args.extend([format!("-{name}"), path_arg(path)]);
            args.push(format!("--{name}_band={}", bands.get(name).copied().unwrap_or(1)));
        }
        args.push(format!("--outfile={}", path_arg(&job.output)));
        args.push(format!("--type={}", job.output_type.gdal_name()));
        if let Some(nodata) = job.nodata {
            args.push(format!("--NoDataValue={}", nodata_arg(nodata)));
        }
        args.extend([
            "--format=GTiff".to_string(),
            "--overwrite".to_string(),
            "--quiet".to_string(),
        ]);
        Ok(args)
    }

    /// Builds saga_cmd arguments for the rank filter.
    fn build_rank_filter_args(&self, job: &RankFilterJob) -> Vec<String> {
        vec![
            self.config.saga_filter_library.clone(),
            self.config.rank_filter_tool.clone(),
            "-INPUT".to_string(),
            path_arg(&job.input),
            "-RESULT".to_string(),
            path_arg(&job.output),
            "-KERNEL_TYPE".to_string(),
            job.kernel.saga_index().to_string(),
            "-KERNEL_RADIUS".to_string(),
            job.radius.to_string(),
            "-RANK".to_string(),
            format_literal(job.rank),
        ]
    }

    /// Builds saga_cmd arguments for the resampling filter.
    fn build_resampling_filter_args(&self, job: &ResamplingFilterJob) -> Vec<String> {
        vec![
            self.config.saga_filter_library.clone(),
            self.config.resampling_filter_tool.clone(),
            "-GRID".to_string(),
            path_arg(&job.input),
            "-LOPASS".to_string(),
            path_arg(&job.lopass),
            "-HIPASS".to_string(),
            path_arg(&job.hipass),
            "-SCALE".to_string(),
            format_literal(job.scale),
        ]
    }

    /// Builds gdal_translate arguments.
    fn build_translate_args(job: &TranslateJob) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(driver) = driver_for(&job.output) {
            args.extend(["-of".to_string(), driver.to_string()]);
        }
        for band in &job.bands {
            args.extend(["-b".to_string(), band.to_string()]);
        }
        if let Some(output_type) = job.output_type {
            args.extend(["-ot".to_string(), output_type.gdal_name().to_string()]);
        }
        if let Some(nodata) = job.nodata {
            args.extend(["-a_nodata".to_string(), nodata_arg(nodata)]);
        }
        for option in &job.creation_options {
            args.extend(["-co".to_string(), option.clone()]);
        }
        args.push(path_arg(&job.input));
        args.push(path_arg(&job.output));
        args
    }

    /// Builds gdaldem arguments for the slope.
    fn build_slope_args(job: &SlopeJob) -> Vec<String> {
        vec![
            "slope".to_string(),
            path_arg(&job.input),
            path_arg(&job.output),
            "-b".to_string(),
            job.band.to_string(),
            "-compute_edges".to_string(),
            "-of".to_string(),
            "GTiff".to_string(),
        ]
    }

    /// Builds gdal_merge.py arguments.
    fn build_merge_args(job: &MergeJob) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            path_arg(&job.output),
            "-of".to_string(),
            "GTiff".to_string(),
        ];
        if job.separate {
            args.push("-separate".to_string());
        }
        args.extend(["-ot".to_string(), job.output_type.gdal_name().to_string()]);
        args.extend(job.inputs.iter().map(|input| path_arg(input)));
        args
    }

    /// Builds the ogr2ogr arguments writing the statistics layer.
    fn build_stats_layer_args(job: &ZonalStatsJob, median: Option<f64>) -> Vec<String> {
        let source_layer = file_stem(&job.zones);
        let value = median.map(format_literal).unwrap_or_else(|| "NULL".to_string());
        vec![
            "-f".to_string(),
            "GPKG".to_string(),
            "-dialect".to_string(),
            "SQLite".to_string(),
            "-sql".to_string(),
            format!(
                "SELECT *, {value} AS \"{}\" FROM \"{source_layer}\"",
                job.median_column()
            ),
            "-nln".to_string(),
            file_stem(&job.output),
            path_arg(&job.output),
            path_arg(&job.zones),
        ]
    }

    /// Parses `gdalinfo -json` output.
    fn parse_raster_info(path: &Path, output: &str) -> Result<RasterInfo, EngineError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct GdalInfo {
            size: Vec<u64>,
            #[serde(default)]
            coordinate_system: Option<CoordinateSystem>,
            #[serde(default)]
            bands: Vec<GdalBand>,
        }

        #[derive(Deserialize)]
        struct CoordinateSystem {
            wkt: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct GdalBand {
            band: u32,
            #[serde(rename = "type")]
            data_type: Option<String>,
            no_data_value: Option<serde_json::Value>,
            minimum: Option<f64>,
            maximum: Option<f64>,
            computed_min: Option<f64>,
            computed_max: Option<f64>,
        }

        let info: GdalInfo = serde_json::from_str(output).map_err(|e| EngineError::ParseError {
            what: "gdalinfo output".to_string(),
            reason: e.to_string(),
        })?;

        let (width, height) = match info.size.as_slice() {
            [width, height] => (*width, *height),
            other => {
                return Err(EngineError::ParseError {
                    what: "gdalinfo output".to_string(),
                    reason: format!("expected [width, height], got {other:?}"),
                })
            }
        };

        let bands = info
            .bands
            .into_iter()
            .map(|band| BandInfo {
                index: band.band,
                data_type: band.data_type.as_deref().and_then(DataType::from_gdal_name),
                // NaN no-data is written as a string
                nodata: band.no_data_value.and_then(|value| match value {
                    serde_json::Value::Number(n) => n.as_f64(),
                    serde_json::Value::String(s) => s.parse::<f64>().ok(),
                    _ => None,
                }),
                minimum: band.minimum.or(band.computed_min),
                maximum: band.maximum.or(band.computed_max),
            })
            .collect();

        Ok(RasterInfo {
            path: path.to_path_buf(),
            width,
            height,
            bands,
            crs_wkt: info
                .coordinate_system
                .and_then(|crs| crs.wkt)
                .filter(|wkt| !wkt.is_empty()),
        })
    }

    /// Parses `ogrinfo -json -so` output; the first layer describes the
    /// dataset.
    fn parse_vector_info(path: &Path, output: &str) -> Result<VectorInfo, EngineError> {
        let layer = parse_ogrinfo(output)?
            .layers
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ParseError {
                what: "ogrinfo output".to_string(),
                reason: "no layers".to_string(),
            })?;
        let feature_count = layer.feature_count.ok_or_else(|| EngineError::ParseError {
            what: "ogrinfo output".to_string(),
            reason: "no feature count".to_string(),
        })?;

        Ok(VectorInfo {
            path: path.to_path_buf(),
            layer_name: layer.name,
            feature_count,
            geometry_type: layer
                .geometry_fields
                .into_iter()
                .find_map(|field| field.geometry_type),
        })
    }

    /// Parses `ogrinfo -json -features` output.
    ///
    /// Returns the number of features and the value of `column` in the last
    /// feature that carries one.
    fn parse_feature_values(
        output: &str,
        column: &str,
    ) -> Result<(u64, Option<f64>), EngineError> {
        let features: Vec<OgrFeature> = parse_ogrinfo(output)?
            .layers
            .into_iter()
            .flat_map(|layer| layer.features)
            .collect();

        let value = features
            .iter()
            .filter_map(|feature| match feature.properties.get(column)? {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            })
            .last();

        Ok((features.len() as u64, value))
    }

    /// Reads the raster statistics through `gdalinfo -json -stats`.
    async fn band_statistics(&self, path: &Path, band: u32) -> Result<(f64, f64), EngineError> {
        let args = vec!["-json".to_string(), "-stats".to_string(), path_arg(path)];
        let stdout = self.run_tool(&self.config.gdalinfo_path, &args).await?;
        let info = Self::parse_raster_info(path, &stdout)?;
        let band_info = info.band(band).ok_or_else(|| {
            EngineError::invalid_dataset(path, format!("band {band} does not exist"))
        })?;
        match (band_info.minimum, band_info.maximum) {
            (Some(min), Some(max)) => Ok((min, max)),
            _ => Err(EngineError::invalid_dataset(
                path,
                format!("no statistics for band {band}"),
            )),
        }
    }
}

#[async_trait]
impl RasterEngine for GdalEngine {
    fn name(&self) -> &str {
        "gdal"
    }

    async fn validate(&self) -> Result<(), EngineError> {
        for tool in self.config.tool_paths() {
            let result = Command::new(tool)
                .arg("--version")
                .stdin(Stdio::null())
                .output()
                .await;

            // only availability matters, not the exit code
            if let Err(e) = result {
                if e.kind() == std::io::ErrorKind::NotFound {
                    return Err(EngineError::ToolNotFound { path: tool.clone() });
                }
                return Err(EngineError::Io(e));
            }
        }

        let version = ::gdal::version::version_info("VERSION_NUM");
        if !supports_json_vector_info(&version) {
            return Err(EngineError::UnsupportedGdal {
                version: ::gdal::version::version_info("RELEASE_NAME"),
            });
        }

        Ok(())
    }

    async fn probe_raster(&self, path: &Path) -> Result<RasterInfo, EngineError> {
        ensure_input(path)?;
        let args = vec!["-json".to_string(), path_arg(path)];
        let stdout = self.run_tool(&self.config.gdalinfo_path, &args).await?;
        Self::parse_raster_info(path, &stdout)
    }

    async fn probe_vector(&self, path: &Path) -> Result<VectorInfo, EngineError> {
        ensure_input(path)?;
        let args = vec!["-json".to_string(), "-so".to_string(), path_arg(path)];
        let stdout = self.run_tool(&self.config.ogrinfo_path, &args).await?;
        Self::parse_vector_info(path, &stdout)
    }

    async fn convert_boundary(&self, job: BoundaryConversionJob) -> Result<PathBuf, EngineError> {
        ensure_input(&job.input)?;
        prepare_output(&job.output).await?;
        self.run_tool(&self.config.ogr2ogr_path, &Self::build_boundary_args(&job))
            .await?;
        ensure_output(job.output)
    }

    async fn clip_by_mask(&self, job: ClipJob) -> Result<PathBuf, EngineError> {
        ensure_input(&job.input)?;
        ensure_input(&job.mask)?;
        prepare_output(&job.output).await?;
        self.run_tool(&self.config.gdalwarp_path, &Self::build_clip_args(&job))
            .await?;
        ensure_output(job.output)
    }

    async fn zonal_median(&self, job: ZonalStatsJob) -> Result<ZonalStatsResult, EngineError> {
        ensure_input(&job.raster)?;
        ensure_input(&job.zones)?;
        prepare_output(&job.output).await?;

        // the raster is already cropped to the mask, so valid cells are the zone
        let raster = job.raster.clone();
        let band = job.band;
        let (values, nodata) =
            tokio::task::spawn_blocking(move || read_band_values(&raster, band))
                .await
                .map_err(std::io::Error::other)??;
        let median = valid_median(values, nodata);
        debug!(raster = %job.raster.display(), band, ?median, "Computed zonal median");

        self.run_tool(
            &self.config.ogr2ogr_path,
            &Self::build_stats_layer_args(&job, median),
        )
        .await?;
        let layer = ensure_output(job.output.clone())?;

        let dump_args = vec!["-json".to_string(), "-features".to_string(), path_arg(&layer)];
        let dump = self.run_tool(&self.config.ogrinfo_path, &dump_args).await?;
        let (feature_count, median) = Self::parse_feature_values(&dump, &job.median_column())?;

        Ok(ZonalStatsResult {
            layer,
            feature_count,
            median,
        })
    }

    async fn raster_algebra(&self, job: AlgebraJob) -> Result<PathBuf, EngineError> {
        let args = Self::build_algebra_args(&job)?;
        for binding in &job.inputs {
            ensure_input(&binding.path)?;
        }
        prepare_output(&job.output).await?;
        self.run_tool(&self.config.gdal_calc_path, &args).await?;
        ensure_output(job.output)
    }

    async fn rank_filter(&self, job: RankFilterJob) -> Result<PathBuf, EngineError> {
        ensure_input(&job.input)?;
        prepare_output(&job.output).await?;
        self.run_tool(&self.config.saga_cmd_path, &self.build_rank_filter_args(&job))
            .await?;
        ensure_output(job.output)
    }

    async fn resampling_filter(
        &self,
        job: ResamplingFilterJob,
    ) -> Result<ResamplingOutputs, EngineError> {
        ensure_input(&job.input)?;
        prepare_output(&job.lopass).await?;
        prepare_output(&job.hipass).await?;
        self.run_tool(
            &self.config.saga_cmd_path,
            &self.build_resampling_filter_args(&job),
        )
        .await?;
        Ok(ResamplingOutputs {
            lopass: ensure_output(job.lopass)?,
            hipass: ensure_output(job.hipass)?,
        })
    }

    async fn translate(&self, job: TranslateJob) -> Result<PathBuf, EngineError> {
        ensure_input(&job.input)?;
        prepare_output(&job.output).await?;
        self.run_tool(
            &self.config.gdal_translate_path,
            &Self::build_translate_args(&job),
        )
        .await?;
        ensure_output(job.output)
    }

    async fn rescale(&self, job: RescaleJob) -> Result<PathBuf, EngineError> {
        ensure_input(&job.input)?;
        let (min, max) = self.band_statistics(&job.input, job.band).await?;
        debug!(input = %job.input.display(), min, max, "Rescaling band");

        let band = BandRef {
            raster: 'A',
            band: job.band,
        };
        self.raster_algebra(AlgebraJob {
            inputs: vec![RasterBinding::new('A', &job.input)],
            expression: RasterExpression::linear_rescale(band, min, max, job.out_min, job.out_max),
            output: job.output,
            output_type: DataType::Float32,
            nodata: None,
        })
        .await
    }

    async fn to_byte(&self, job: ByteConversionJob) -> Result<PathBuf, EngineError> {
        self.raster_algebra(AlgebraJob {
            inputs: vec![RasterBinding::new('A', &job.input)],
            expression: RasterExpression::band('A', 1).clamp(0.0, 255.0),
            output: job.output,
            output_type: DataType::Byte,
            nodata: Some(f64::from(job.nodata)),
        })
        .await
    }

    async fn slope(&self, job: SlopeJob) -> Result<PathBuf, EngineError> {
        ensure_input(&job.input)?;
        prepare_output(&job.output).await?;
        self.run_tool(&self.config.gdaldem_path, &Self::build_slope_args(&job))
            .await?;
        ensure_output(job.output)
    }

    async fn merge(&self, job: MergeJob) -> Result<PathBuf, EngineError> {
        if job.inputs.is_empty() {
            return Err(EngineError::invalid_job("merge needs at least one input"));
        }
        for input in &job.inputs {
            ensure_input(input)?;
        }
        prepare_output(&job.output).await?;
        self.run_tool(&self.config.gdal_merge_path, &Self::build_merge_args(&job))
            .await?;
        ensure_output(job.output)
    }
}

#[derive(Deserialize)]
struct OgrInfo {
    #[serde(default)]
    layers: Vec<OgrLayer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OgrLayer {
    name: Option<String>,
    feature_count: Option<u64>,
    #[serde(default)]
    geometry_fields: Vec<OgrGeometryField>,
    #[serde(default)]
    features: Vec<OgrFeature>,
}

#[derive(Deserialize)]
struct OgrGeometryField {
    #[serde(rename = "type")]
    geometry_type: Option<String>,
}

#[derive(Deserialize)]
struct OgrFeature {
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

fn parse_ogrinfo(output: &str) -> Result<OgrInfo, EngineError> {
    serde_json::from_str(output).map_err(|e| EngineError::ParseError {
        what: "ogrinfo output".to_string(),
        reason: e.to_string(),
    })
}

/// `ogrinfo -json` needs GDAL 3.7.
fn supports_json_vector_info(version_num: &str) -> bool {
    version_num
        .trim()
        .parse::<u32>()
        .is_ok_and(|num| num >= 3_070_000)
}

/// Reads every cell of one band together with its no-data value.
fn read_band_values(path: &Path, band: u32) -> Result<(Vec<f64>, Option<f64>), EngineError> {
    let dataset = ::gdal::Dataset::open(path)?;
    if band == 0 {
        return Err(EngineError::invalid_dataset(path, "band indices start at 1"));
    }
    let raster_band = dataset.rasterband(band as usize)?;
    let nodata = raster_band.no_data_value();
    let buffer = raster_band.read_band_as::<f64>()?;
    Ok((buffer.data().to_vec(), nodata))
}

/// Median of the cells that carry data; the mean of the middle pair for an
/// even count.
fn valid_median(mut values: Vec<f64>, nodata: Option<f64>) -> Option<f64> {
    values.retain(|value| !value.is_nan() && nodata.map_or(true, |nodata| *value != nodata));
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn tool_label(tool: &Path) -> String {
    tool.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| tool.to_string_lossy().to_string())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn nodata_arg(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{value:?}")
    }
}

/// GDAL driver matching the output extension.
fn driver_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_string_lossy().to_ascii_lowercase();
    match extension.as_str() {
        "tif" | "tiff" => Some("GTiff"),
        "sdat" => Some("SAGA"),
        "asc" => Some("AAIGrid"),
        "gpkg" => Some("GPKG"),
        _ => None,
    }
}

/// The dataset file plus the sidecars its driver writes next to it.
fn stale_paths(path: &Path) -> Vec<PathBuf> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let sidecars: &[&str] = match extension.as_str() {
        "shp" => &["shx", "dbf", "prj", "cpg", "qix"],
        "sdat" => &["sgrd", "mgrd", "prj"],
        "asc" => &["prj"],
        _ => &[],
    };

    let mut paths = vec![path.to_path_buf()];
    paths.extend(sidecars.iter().map(|ext| path.with_extension(ext)));
    let mut aux = path.as_os_str().to_os_string();
    aux.push(".aux.xml");
    paths.push(PathBuf::from(aux));
    paths
}

async fn remove_stale(path: &Path) -> Result<(), EngineError> {
    for stale in stale_paths(path) {
        match tokio::fs::remove_file(&stale).await {
            Ok(()) => debug!(path = %stale.display(), "Removed stale output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(EngineError::Io(e)),
        }
    }
    Ok(())
}

/// Creates the parent directory and removes a previous output.
async fn prepare_output(path: &Path) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    remove_stale(path).await
}

fn ensure_input(path: &Path) -> Result<(), EngineError> {
    if !path.exists() {
        return Err(EngineError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn ensure_output(path: PathBuf) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        return Err(EngineError::MissingOutput { path });
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::KernelShape;

    #[test]
    fn test_build_boundary_args() {
        let job = BoundaryConversionJob {
            input: PathBuf::from("/data/obvod.dxf"),
            output: PathBuf::from("/out/obvod.shp"),
            crs: "EPSG:5514".to_string(),
            skip_failures: true,
        };
        let args = GdalEngine::build_boundary_args(&job);

        assert_eq!(&args[..2], &["-f", "ESRI Shapefile"]);
        assert!(args.windows(2).any(|w| w == ["-nlt", "POLYGON"]));
        assert!(args.windows(2).any(|w| w == ["-t_srs", "EPSG:5514"]));
        assert!(args.contains(&"-skipfailures".to_string()));
        // ogr2ogr takes the destination first
        assert_eq!(args[args.len() - 2], "/out/obvod.shp");
        assert_eq!(args[args.len() - 1], "/data/obvod.dxf");
    }

    #[test]
    fn test_build_clip_args() {
        let job = ClipJob {
            input: PathBuf::from("/data/dem.tif"),
            mask: PathBuf::from("/out/obvod.shp"),
            output: PathBuf::from("/out/clipped_dem.tif"),
            crs: "EPSG:5514".to_string(),
            crop_to_cutline: true,
            nodata: Some(-9999.0),
        };
        let args = GdalEngine::build_clip_args(&job);

        assert!(args.windows(2).any(|w| w == ["-cutline", "/out/obvod.shp"]));
        assert!(args.contains(&"-crop_to_cutline".to_string()));
        assert!(args.windows(2).any(|w| w == ["-dstnodata", "-9999.0"]));
        assert_eq!(args.last().unwrap(), "/out/clipped_dem.tif");
    }

    #[test]
    fn test_build_algebra_args_renders_median() {
        let job = AlgebraJob {
            inputs: vec![RasterBinding::new('A', "/out/clipped_dem.tif")],
            expression: RasterExpression::normalize(BandRef { raster: 'A', band: 1 }, 287.125),
            output: PathBuf::from("/out/normalized_dem.tif"),
            output_type: DataType::Float32,
            nodata: None,
        };
        let args = GdalEngine::build_algebra_args(&job).unwrap();

        assert_eq!(args[0], "--calc=(A - 287.125)");
        assert!(args.contains(&"--A_band=1".to_string()));
        assert!(args.contains(&"--outfile=/out/normalized_dem.tif".to_string()));
        assert!(args.contains(&"--type=Float32".to_string()));
        assert!(!args.iter().any(|arg| arg.starts_with("--NoDataValue")));
    }

    #[test]
    fn test_build_algebra_args_unbound_raster() {
        let job = AlgebraJob {
            inputs: vec![RasterBinding::new('A', "/a.tif")],
            expression: RasterExpression::band('B', 1),
            output: PathBuf::from("/out.tif"),
            output_type: DataType::Float32,
            nodata: None,
        };
        let err = GdalEngine::build_algebra_args(&job).unwrap_err();
        assert!(matches!(err, EngineError::InvalidJob { .. }));
    }

    #[test]
    fn test_build_algebra_args_conflicting_bands() {
        let job = AlgebraJob {
            inputs: vec![RasterBinding::new('A', "/a.tif")],
            expression: RasterExpression::band('A', 1).add(RasterExpression::band('A', 2)),
            output: PathBuf::from("/out.tif"),
            output_type: DataType::Float32,
            nodata: None,
        };
        assert!(GdalEngine::build_algebra_args(&job).is_err());
    }

    #[test]
    fn test_build_rank_filter_args() {
        let engine = GdalEngine::with_defaults();
        let job = RankFilterJob {
            input: PathBuf::from("/out/normalized_dem.tif"),
            output: PathBuf::from("/out/filtered_dem_rank.sdat"),
            radius: 2,
            rank: 50.0,
            kernel: KernelShape::Square,
        };
        let args = engine.build_rank_filter_args(&job);

        assert_eq!(&args[..2], &["grid_filter", "9"]);
        assert!(args.windows(2).any(|w| w == ["-KERNEL_TYPE", "0"]));
        assert!(args.windows(2).any(|w| w == ["-KERNEL_RADIUS", "2"]));
        assert!(args.windows(2).any(|w| w == ["-RANK", "50.0"]));
    }

    #[test]
    fn test_build_resampling_filter_args() {
        let engine = GdalEngine::with_defaults();
        let job = ResamplingFilterJob {
            input: PathBuf::from("/out/normalized_dem.tif"),
            lopass: PathBuf::from("/out/filtered_dem_lopass.sdat"),
            hipass: PathBuf::from("/out/filtered_dem_hipass.sdat"),
            scale: 1.0,
        };
        let args = engine.build_resampling_filter_args(&job);

        assert_eq!(&args[..2], &["grid_filter", "11"]);
        assert!(args.windows(2).any(|w| w == ["-HIPASS", "/out/filtered_dem_hipass.sdat"]));
        assert!(args.windows(2).any(|w| w == ["-SCALE", "1.0"]));
    }

    #[test]
    fn test_build_translate_args() {
        let job = TranslateJob {
            input: PathBuf::from("/data/ortofoto.tif"),
            output: PathBuf::from("/out/ortofoto_rgb.tif"),
            bands: vec![1, 2, 3],
            output_type: None,
            nodata: None,
            creation_options: vec!["COMPRESS=DEFLATE".to_string()],
        };
        let args = GdalEngine::build_translate_args(&job);

        assert_eq!(&args[..2], &["-of", "GTiff"]);
        let bands: Vec<&String> = args
            .windows(2)
            .filter(|w| w[0] == "-b")
            .map(|w| &w[1])
            .collect();
        assert_eq!(bands, ["1", "2", "3"]);
        assert!(args.windows(2).any(|w| w == ["-co", "COMPRESS=DEFLATE"]));
        assert!(!args.contains(&"-ot".to_string()));
    }

    #[test]
    fn test_build_slope_args() {
        let job = SlopeJob {
            input: PathBuf::from("/out/filtered_dem_hipass.tif"),
            output: PathBuf::from("/out/slope.tif"),
            band: 1,
        };
        let args = GdalEngine::build_slope_args(&job);
        assert_eq!(args[0], "slope");
        assert!(args.contains(&"-compute_edges".to_string()));
    }

    #[test]
    fn test_build_merge_args_preserves_order() {
        let job = MergeJob {
            inputs: vec![
                PathBuf::from("/out/ortofoto_rgb.tif"),
                PathBuf::from("/out/slope_8bit.tif"),
                PathBuf::from("/out/dem_8bit.tif"),
                PathBuf::from("/out/tir_r.tif"),
            ],
            output: PathBuf::from("/out/result.tif"),
            separate: true,
            output_type: DataType::Byte,
        };
        let args = GdalEngine::build_merge_args(&job);

        assert!(args.contains(&"-separate".to_string()));
        assert!(args.windows(2).any(|w| w == ["-ot", "Byte"]));
        assert_eq!(
            &args[args.len() - 4..],
            &[
                "/out/ortofoto_rgb.tif",
                "/out/slope_8bit.tif",
                "/out/dem_8bit.tif",
                "/out/tir_r.tif"
            ]
        );
    }

    #[test]
    fn test_build_stats_layer_args() {
        let job = ZonalStatsJob {
            raster: PathBuf::from("/out/clipped_dem.tif"),
            band: 1,
            zones: PathBuf::from("/out/obvod.shp"),
            output: PathBuf::from("/out/stats.gpkg"),
            column_prefix: "_".to_string(),
        };
        let args = GdalEngine::build_stats_layer_args(&job, Some(412.5));
        assert!(args.contains(&"SELECT *, 412.5 AS \"_median\" FROM \"obvod\"".to_string()));
        assert!(args.windows(2).any(|w| w == ["-nln", "stats"]));

        let args = GdalEngine::build_stats_layer_args(&job, None);
        assert!(args.contains(&"SELECT *, NULL AS \"_median\" FROM \"obvod\"".to_string()));
    }

    #[test]
    fn test_parse_raster_info() {
        let json = r#"{
            "description": "clipped_dem.tif",
            "driverShortName": "GTiff",
            "size": [120, 80],
            "coordinateSystem": {
                "wkt": "PROJCRS[\"S-JTSK / Krovak East North\"]"
            },
            "bands": [
                {
                    "band": 1,
                    "block": [120, 16],
                    "type": "Float32",
                    "colorInterpretation": "Gray",
                    "noDataValue": -9999.0,
                    "minimum": 281.5,
                    "maximum": 297.25
                }
            ]
        }"#;

        let info = GdalEngine::parse_raster_info(Path::new("clipped_dem.tif"), json).unwrap();
        assert_eq!(info.width, 120);
        assert_eq!(info.height, 80);
        assert_eq!(info.band_count(), 1);
        let band = info.band(1).unwrap();
        assert_eq!(band.data_type, Some(DataType::Float32));
        assert_eq!(band.nodata, Some(-9999.0));
        assert_eq!(band.minimum, Some(281.5));
        assert_eq!(band.maximum, Some(297.25));
        assert!(info.crs_wkt.unwrap().contains("Krovak"));
    }

    #[test]
    fn test_parse_raster_info_nan_nodata() {
        let json = r#"{
            "size": [2, 2],
            "bands": [
                {"band": 1, "type": "Float32", "noDataValue": "nan", "computedMin": 1.0, "computedMax": 4.0},
                {"band": 2, "type": "Byte"}
            ]
        }"#;

        let info = GdalEngine::parse_raster_info(Path::new("x.tif"), json).unwrap();
        assert!(info.bands[0].nodata.unwrap().is_nan());
        assert_eq!(info.bands[0].minimum, Some(1.0));
        assert_eq!(info.bands[1].nodata, None);
        assert!(info.crs_wkt.is_none());
    }

    #[test]
    fn test_parse_raster_info_invalid() {
        let err = GdalEngine::parse_raster_info(Path::new("x.tif"), "ERROR 4").unwrap_err();
        assert!(matches!(err, EngineError::ParseError { .. }));
    }

    #[test]
    fn test_parse_vector_info() {
        let output = r#"{
            "description": "/out/obvod.shp",
            "driverShortName": "ESRI Shapefile",
            "layers": [
                {
                    "name": "obvod",
                    "metadata": {"": {"DBF_DATE_LAST_UPDATE": "2024-05-02"}},
                    "geometryFields": [
                        {"name": "", "type": "Polygon", "nullable": true}
                    ],
                    "featureCount": 3,
                    "fields": []
                }
            ]
        }"#;
        let info = GdalEngine::parse_vector_info(Path::new("/out/obvod.shp"), output).unwrap();
        assert_eq!(info.layer_name.as_deref(), Some("obvod"));
        assert_eq!(info.feature_count, 3);
        assert_eq!(info.geometry_type.as_deref(), Some("Polygon"));
    }

    #[test]
    fn test_parse_vector_info_without_count() {
        let result = GdalEngine::parse_vector_info(
            Path::new("x.shp"),
            r#"{"layers": [{"name": "x"}]}"#,
        );
        assert!(result.is_err());

        let result = GdalEngine::parse_vector_info(Path::new("x.shp"), r#"{"layers": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_vector_info_text_output() {
        let err = GdalEngine::parse_vector_info(Path::new("x.shp"), "Layer name: x\n").unwrap_err();
        assert!(matches!(err, EngineError::ParseError { .. }));
    }

    #[test]
    fn test_parse_feature_values_last_wins() {
        let output = r#"{
            "layers": [
                {
                    "name": "stats",
                    "featureCount": 2,
                    "features": [
                        {"type": "Feature", "fid": 1, "properties": {"Layer": "0", "_median": 287.5}},
                        {"type": "Feature", "fid": 2, "properties": {"Layer": "0", "_median": 291.75}}
                    ]
                }
            ]
        }"#;
        let (count, value) = GdalEngine::parse_feature_values(output, "_median").unwrap();
        assert_eq!(count, 2);
        assert_eq!(value, Some(291.75));
    }

    #[test]
    fn test_parse_feature_values_null() {
        let output = r#"{"layers": [{"name": "stats", "features": [
            {"type": "Feature", "properties": {"_median": null}}
        ]}]}"#;
        let (count, value) = GdalEngine::parse_feature_values(output, "_median").unwrap();
        assert_eq!(count, 1);
        assert_eq!(value, None);

        let output = r#"{"layers": [{"name": "stats", "featureCount": 0}]}"#;
        let (count, value) = GdalEngine::parse_feature_values(output, "_median").unwrap();
        assert_eq!(count, 0);
        assert_eq!(value, None);
    }

    #[test]
    fn test_supports_json_vector_info() {
        assert!(supports_json_vector_info("3080400"));
        assert!(supports_json_vector_info("3070000"));
        assert!(!supports_json_vector_info("3060300"));
        assert!(!supports_json_vector_info(""));
    }

    #[test]
    fn test_valid_median_skips_nodata() {
        let cells = vec![100.0, 101.0, 102.0, -9999.0, 103.0, 104.0, f64::NAN];
        assert_eq!(valid_median(cells, Some(-9999.0)), Some(102.0));
    }

    #[test]
    fn test_valid_median_even_count() {
        assert_eq!(valid_median(vec![4.0, 1.0, 3.0, 2.0], None), Some(2.5));
    }

    #[test]
    fn test_valid_median_no_data_cells() {
        assert_eq!(valid_median(vec![-9999.0, -9999.0], Some(-9999.0)), None);
        assert_eq!(valid_median(Vec::new(), None), None);
        assert_eq!(valid_median(vec![f64::NAN, 7.0], Some(f64::NAN)), Some(7.0));
    }

    #[test]
    fn test_stale_paths() {
        let paths = stale_paths(Path::new("/out/obvod.shp"));
        assert!(paths.contains(&PathBuf::from("/out/obvod.dbf")));
        assert!(paths.contains(&PathBuf::from("/out/obvod.shx")));
        assert!(paths.contains(&PathBuf::from("/out/obvod.shp.aux.xml")));

        let paths = stale_paths(Path::new("/out/filtered_dem_hipass.sdat"));
        assert!(paths.contains(&PathBuf::from("/out/filtered_dem_hipass.sgrd")));

        assert_eq!(stale_paths(Path::new("/out/result.tif")).len(), 2);
    }

    #[test]
    fn test_driver_for() {
        assert_eq!(driver_for(Path::new("a.TIF")), Some("GTiff"));
        assert_eq!(driver_for(Path::new("a.sdat")), Some("SAGA"));
        assert_eq!(driver_for(Path::new("a")), None);
    }

    #[tokio::test]
    async fn test_prepare_output_removes_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("obvod.shp");
        std::fs::write(&output, b"old").unwrap();
        std::fs::write(dir.path().join("obvod.dbf"), b"old").unwrap();

        prepare_output(&output).await.unwrap();
        assert!(!output.exists());
        assert!(!dir.path().join("obvod.dbf").exists());
    }

    #[tokio::test]
    async fn test_missing_input() {
        let engine = GdalEngine::with_defaults();
        let err = engine
            .probe_raster(Path::new("/nonexistent/dem.tif"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InputNotFound { .. }));
    }

    #[tokio::test]
    async fn test_validate_reports_missing_tool() {
        let mut config = EngineConfig::default()
            .with_saga_cmd(PathBuf::from("/nonexistent/saga_cmd"));
        config.gdal_translate_path = PathBuf::from("/nonexistent/gdal_translate");

        let engine = GdalEngine::new(config);
        let err = engine.validate().await.unwrap_err();
        assert!(matches!(err, EngineError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_run_tool_failure_captures_exit() {
        let engine = GdalEngine::with_defaults();
        let err = engine
            .run_tool(Path::new("false"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_run_tool_failure_message_includes_stderr() {
        let engine = GdalEngine::with_defaults();
        let args = vec![
            "-c".to_string(),
            "echo 'ERROR 1: Unable to open datasource' >&2; exit 1".to_string(),
        ];
        let err = engine.run_tool(Path::new("sh"), &args).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "sh failed: exited with code: Some(1): ERROR 1: Unable to open datasource"
        );
    }

    #[tokio::test]
    async fn test_run_tool_timeout() {
        let engine = GdalEngine::new(EngineConfig::default().with_timeout(1));
        let err = engine
            .run_tool(Path::new("sleep"), &["5".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { timeout_secs: 1, .. }));
    }
}

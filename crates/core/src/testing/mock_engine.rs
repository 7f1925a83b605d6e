//! Mock raster engine for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::{
    AlgebraJob, BandInfo, BoundaryConversionJob, ByteConversionJob, ClipJob, DataType,
    EngineError, MergeJob, RankFilterJob, RasterEngine, RasterInfo, ResamplingFilterJob,
    ResamplingOutputs, RescaleJob, SlopeJob, TranslateJob, VectorInfo, ZonalStatsJob,
    ZonalStatsResult,
};
use crate::expression::RasterExpression;

/// Side length of every mock raster.
const MOCK_SIZE: u64 = 64;

/// Engine operations that produce files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ConvertBoundary,
    ClipByMask,
    ZonalMedian,
    RasterAlgebra,
    RankFilter,
    ResamplingFilter,
    Translate,
    Rescale,
    ToByte,
    Slope,
    Merge,
}

/// A recorded engine call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub operation: Operation,
    pub inputs: Vec<PathBuf>,
    /// Primary output path.
    pub output: PathBuf,
    /// Expression of a raster algebra call.
    pub expression: Option<RasterExpression>,
}

/// Dataset written by the mock, stored as `key=value` lines.
#[derive(Debug, Clone, PartialEq)]
enum MockDataset {
    Raster { bands: usize, data_type: DataType },
    Vector { features: u64 },
}

impl MockDataset {
    fn render(&self, source: &str) -> String {
        match self {
            Self::Raster { bands, data_type } => format!(
                "kind=raster\nbands={}\ntype={}\nsource={}\n",
                bands,
                data_type.gdal_name(),
                source
            ),
            Self::Vector { features } => {
                format!("kind=vector\nfeatures={}\nsource={}\n", features, source)
            }
        }
    }

    fn parse(contents: &str) -> Option<Self> {
        let fields: HashMap<&str, &str> = contents
            .lines()
            .filter_map(|line| line.split_once('='))
            .collect();
        match *fields.get("kind")? {
            "raster" => Some(Self::Raster {
                bands: fields.get("bands")?.parse().ok()?,
                data_type: fields
                    .get("type")
                    .and_then(|name| DataType::from_gdal_name(name))
                    .unwrap_or(DataType::Float32),
            }),
            "vector" => Some(Self::Vector {
                features: fields.get("features")?.parse().ok()?,
            }),
            _ => None,
        }
    }
}

/// Mock implementation of the RasterEngine trait.
///
/// Writes small text datasets instead of real rasters, so runs are fast and
/// deterministic:
/// - Track engine calls for assertions
/// - Fail selected operations
/// - Write unreadable outputs for selected file names
/// - Control the zonal median and feature count
///
/// # Example
///
/// ```rust,ignore
/// use strecha_core::testing::{fixtures, MockRasterEngine, Operation};
///
/// let engine = MockRasterEngine::new();
/// engine.set_median(Some(412.0)).await;
/// engine.fail_operation(Operation::RankFilter, "saga_cmd crashed").await;
///
/// let runner = PipelineRunner::new(&config, engine.clone())?;
/// let inputs = fixtures::run_inputs(dir.path()).await?;
/// let result = runner.run(&inputs, &out).await?;
///
/// assert_eq!(engine.operation_count(Operation::Merge).await, 0);
/// ```
#[derive(Debug, Clone)]
pub struct MockRasterEngine {
    /// Recorded calls.
    operations: Arc<RwLock<Vec<RecordedOperation>>>,
    /// Operations that fail with the given message.
    failures: Arc<RwLock<HashMap<Operation, String>>>,
    /// Output file names written as empty files.
    invalid_outputs: Arc<RwLock<HashSet<String>>>,
    /// Median reported by zonal statistics.
    median: Arc<RwLock<Option<f64>>>,
    /// Feature count reported by zonal statistics.
    zonal_features: Arc<RwLock<u64>>,
}

impl Default for MockRasterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRasterEngine {
    /// Create a new mock engine.
    pub fn new() -> Self {
        Self {
            operations: Arc::new(RwLock::new(Vec::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            invalid_outputs: Arc::new(RwLock::new(HashSet::new())),
            median: Arc::new(RwLock::new(Some(312.5))),
            zonal_features: Arc::new(RwLock::new(1)),
        }
    }

    /// Get all recorded calls.
    pub async fn recorded_operations(&self) -> Vec<RecordedOperation> {
        self.operations.read().await.clone()
    }

    /// Number of calls of one operation.
    pub async fn operation_count(&self, operation: Operation) -> usize {
        self.operations
            .read()
            .await
            .iter()
            .filter(|recorded| recorded.operation == operation)
            .count()
    }

    /// Expressions passed to raster algebra, in call order.
    pub async fn recorded_expressions(&self) -> Vec<RasterExpression> {
        self.operations
            .read()
            .await
            .iter()
            .filter_map(|recorded| recorded.expression.clone())
            .collect()
    }

    /// Clear recorded calls.
    pub async fn clear_recorded(&self) {
        self.operations.write().await.clear();
    }

    /// Make every call of an operation fail.
    pub async fn fail_operation(&self, operation: Operation, message: impl Into<String>) {
        self.failures.write().await.insert(operation, message.into());
    }

    /// Clear all configured failures.
    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// Write an empty file whenever an output has this file name.
    pub async fn set_invalid_output(&self, file_name: impl Into<String>) {
        self.invalid_outputs.write().await.insert(file_name.into());
    }

    pub async fn set_median(&self, median: Option<f64>) {
        *self.median.write().await = median;
    }

    pub async fn set_zonal_feature_count(&self, count: u64) {
        *self.zonal_features.write().await = count;
    }

    /// Record the call, then apply a configured failure and check inputs.
    async fn begin(
        &self,
        operation: Operation,
        inputs: &[&Path],
        output: &Path,
        expression: Option<&RasterExpression>,
    ) -> Result<(), EngineError> {
        self.operations.write().await.push(RecordedOperation {
            operation,
            inputs: inputs.iter().map(|path| path.to_path_buf()).collect(),
            output: output.to_path_buf(),
            expression: expression.cloned(),
        });

        if let Some(message) = self.failures.read().await.get(&operation) {
            return Err(EngineError::command_failed(
                format!("mock {:?}", operation),
                message.clone(),
                None,
            ));
        }

        for input in inputs {
            if !input.exists() {
                return Err(EngineError::InputNotFound {
                    path: input.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    async fn write(
        &self,
        path: &Path,
        dataset: MockDataset,
        source: &str,
    ) -> Result<PathBuf, EngineError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let contents = if self.invalid_outputs.read().await.contains(&file_name) {
            String::new()
        } else {
            dataset.render(source)
        };
        tokio::fs::write(path, contents).await?;
        Ok(path.to_path_buf())
    }

    /// Band count of a mock raster, 1 for anything else.
    async fn bands_of(path: &Path) -> usize {
        match read_dataset(path).await {
            Some(MockDataset::Raster { bands, .. }) => bands,
            _ => 1,
        }
    }
}

async fn read_dataset(path: &Path) -> Option<MockDataset> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    MockDataset::parse(&contents)
}

async fn read_existing(path: &Path) -> Result<Option<MockDataset>, EngineError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(MockDataset::parse(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EngineError::InputNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RasterEngine for MockRasterEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn validate(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn probe_raster(&self, path: &Path) -> Result<RasterInfo, EngineError> {
        match read_existing(path).await? {
            Some(MockDataset::Raster { bands, data_type }) => Ok(RasterInfo {
                path: path.to_path_buf(),
                width: MOCK_SIZE,
                height: MOCK_SIZE,
                bands: (1..=bands as u32)
                    .map(|index| BandInfo {
                        index,
                        data_type: Some(data_type),
                        nodata: None,
                        minimum: None,
                        maximum: None,
                    })
                    .collect(),
                crs_wkt: None,
            }),
            _ => Err(EngineError::invalid_dataset(path, "not a raster")),
        }
    }

    async fn probe_vector(&self, path: &Path) -> Result<VectorInfo, EngineError> {
        match read_existing(path).await? {
            Some(MockDataset::Vector { features }) => Ok(VectorInfo {
                path: path.to_path_buf(),
                layer_name: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
                feature_count: features,
                geometry_type: Some("Polygon".to_string()),
            }),
            _ => Err(EngineError::invalid_dataset(path, "not a vector layer")),
        }
    }

    async fn convert_boundary(&self, job: BoundaryConversionJob) -> Result<PathBuf, EngineError> {
        self.begin(Operation::ConvertBoundary, &[job.input.as_path()], &job.output, None)
            .await?;
        let features = match read_dataset(&job.input).await {
            Some(MockDataset::Vector { features }) => features,
            _ => 1,
        };
        self.write(&job.output, MockDataset::Vector { features }, "convert_boundary")
            .await
    }

    async fn clip_by_mask(&self, job: ClipJob) -> Result<PathBuf, EngineError> {
        self.begin(Operation::ClipByMask, &[job.input.as_path(), job.mask.as_path()], &job.output, None)
            .await?;
        let bands = Self::bands_of(&job.input).await;
        self.write(
            &job.output,
            MockDataset::Raster {
                bands,
                data_type: DataType::Float32,
            },
            "clip_by_mask",
        )
        .await
    }

    async fn zonal_median(&self, job: ZonalStatsJob) -> Result<ZonalStatsResult, EngineError> {
        self.begin(Operation::ZonalMedian, &[job.raster.as_path(), job.zones.as_path()], &job.output, None)
            .await?;
        let feature_count = *self.zonal_features.read().await;
        let median = *self.median.read().await;
        self.write(
            &job.output,
            MockDataset::Vector {
                features: feature_count,
            },
            "zonal_median",
        )
        .await?;
        Ok(ZonalStatsResult {
            layer: job.output,
            feature_count,
            median,
        })
    }

    async fn raster_algebra(&self, job: AlgebraJob) -> Result<PathBuf, EngineError> {
        let inputs: Vec<&Path> = job.inputs.iter().map(|b| b.path.as_path()).collect();
        self.begin(
            Operation::RasterAlgebra,
            &inputs,
            &job.output,
            Some(&job.expression),
        )
        .await?;
        self.write(
            &job.output,
            MockDataset::Raster {
                bands: 1,
                data_type: job.output_type,
            },
            &job.expression.to_gdal_calc(),
        )
        .await
    }

    async fn rank_filter(&self, job: RankFilterJob) -> Result<PathBuf, EngineError> {
        self.begin(Operation::RankFilter, &[job.input.as_path()], &job.output, None)
            .await?;
        self.write(
            &job.output,
            MockDataset::Raster {
                bands: 1,
                data_type: DataType::Float32,
            },
            "rank_filter",
        )
        .await
    }

    async fn resampling_filter(
        &self,
        job: ResamplingFilterJob,
    ) -> Result<ResamplingOutputs, EngineError> {
        self.begin(Operation::ResamplingFilter, &[job.input.as_path()], &job.hipass, None)
            .await?;
        let dataset = MockDataset::Raster {
            bands: 1,
            data_type: DataType::Float32,
        };
        let lopass = self.write(&job.lopass, dataset.clone(), "lopass").await?;
        let hipass = self.write(&job.hipass, dataset, "hipass").await?;
        Ok(ResamplingOutputs { lopass, hipass })
    }

    async fn translate(&self, job: TranslateJob) -> Result<PathBuf, EngineError> {
        self.begin(Operation::Translate, &[job.input.as_path()], &job.output, None)
            .await?;
        let available = Self::bands_of(&job.input).await;
        if let Some(band) = job.bands.iter().find(|band| **band as usize > available) {
            return Err(EngineError::command_failed(
                "mock translate",
                format!("band {} requested, input has {}", band, available),
                None,
            ));
        }
        let bands = if job.bands.is_empty() {
            available
        } else {
            job.bands.len()
        };
        self.write(
            &job.output,
            MockDataset::Raster {
                bands,
                data_type: job.output_type.unwrap_or(DataType::Byte),
            },
            "translate",
        )
        .await
    }

    async fn rescale(&self, job: RescaleJob) -> Result<PathBuf, EngineError> {
        self.begin(Operation::Rescale, &[job.input.as_path()], &job.output, None)
            .await?;
        self.write(
            &job.output,
            MockDataset::Raster {
                bands: 1,
                data_type: DataType::Float32,
            },
            "rescale",
        )
        .await
    }

    async fn to_byte(&self, job: ByteConversionJob) -> Result<PathBuf, EngineError> {
        self.begin(Operation::ToByte, &[job.input.as_path()], &job.output, None)
            .await?;
        self.write(
            &job.output,
            MockDataset::Raster {
                bands: 1,
                data_type: DataType::Byte,
            },
            "to_byte",
        )
        .await
    }

    async fn slope(&self, job: SlopeJob) -> Result<PathBuf, EngineError> {
        self.begin(Operation::Slope, &[job.input.as_path()], &job.output, None)
            .await?;
        self.write(
            &job.output,
            MockDataset::Raster {
                bands: 1,
                data_type: DataType::Float32,
            },
            "slope",
        )
        .await
    }

    async fn merge(&self, job: MergeJob) -> Result<PathBuf, EngineError> {
        let inputs: Vec<&Path> = job.inputs.iter().map(PathBuf::as_path).collect();
        self.begin(Operation::Merge, &inputs, &job.output, None)
            .await?;
        let mut bands = 0;
        for input in &job.inputs {
            bands += Self::bands_of(input).await;
        }
        if !job.separate {
            bands = 1;
        }
        self.write(
            &job.output,
            MockDataset::Raster {
                bands,
                data_type: job.output_type,
            },
            "merge",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_translate_selects_bands() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ortofoto.tif");
        fixtures::write_raster(&input, 4).await.unwrap();

        let engine = MockRasterEngine::new();
        let output = engine
            .translate(TranslateJob {
                input,
                output: dir.path().join("rgb.tif"),
                bands: vec![1, 2, 3],
                ..TranslateJob::default()
            })
            .await
            .unwrap();

        let info = engine.probe_raster(&output).await.unwrap();
        assert_eq!(info.band_count(), 3);
        assert_eq!(engine.operation_count(Operation::Translate).await, 1);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockRasterEngine::new();
        let result = engine
            .slope(SlopeJob {
                input: dir.path().join("missing.tif"),
                output: dir.path().join("slope.tif"),
                band: 1,
            })
            .await;
        assert!(matches!(result, Err(EngineError::InputNotFound { .. })));
    }

    #[tokio::test]
    async fn test_error_injection() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dem.tif");
        fixtures::write_raster(&input, 1).await.unwrap();

        let engine = MockRasterEngine::new();
        engine.fail_operation(Operation::Slope, "boom").await;
        let result = engine
            .slope(SlopeJob {
                input,
                output: dir.path().join("slope.tif"),
                band: 1,
            })
            .await;
        assert!(matches!(result, Err(EngineError::CommandFailed { .. })));

        // the failed call is still recorded
        assert_eq!(engine.operation_count(Operation::Slope).await, 1);
    }

    #[tokio::test]
    async fn test_invalid_output_does_not_probe() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dem.tif");
        fixtures::write_raster(&input, 1).await.unwrap();

        let engine = MockRasterEngine::new();
        engine.set_invalid_output("slope.tif").await;
        let output = engine
            .slope(SlopeJob {
                input,
                output: dir.path().join("slope.tif"),
                band: 1,
            })
            .await
            .unwrap();

        assert!(output.exists());
        assert!(matches!(
            engine.probe_raster(&output).await,
            Err(EngineError::InvalidDataset { .. })
        ));
    }

    #[tokio::test]
    async fn test_merge_stacks_bands() {
        let dir = tempfile::tempdir().unwrap();
        let rgb = dir.path().join("rgb.tif");
        let tir = dir.path().join("tir.tif");
        fixtures::write_raster(&rgb, 3).await.unwrap();
        fixtures::write_raster(&tir, 1).await.unwrap();

        let engine = MockRasterEngine::new();
        let output = engine
            .merge(MergeJob {
                inputs: vec![rgb, tir],
                output: dir.path().join("result.tif"),
                separate: true,
                output_type: DataType::Byte,
            })
            .await
            .unwrap();

        let info = engine.probe_raster(&output).await.unwrap();
        assert_eq!(info.band_count(), 4);
        assert_eq!(info.bands[0].data_type, Some(DataType::Byte));
    }

    #[test]
    fn test_dataset_parse() {
        let dataset = MockDataset::Vector { features: 3 };
        assert_eq!(MockDataset::parse(&dataset.render("x")), Some(dataset));
        assert_eq!(MockDataset::parse(""), None);
        assert_eq!(MockDataset::parse("DXF"), None);
    }
}

//! Pipeline runner implementation.

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::artifact::{Artifact, ArtifactKind, ArtifactTable};
use crate::config::Config;
use crate::engine::{
    AlgebraJob, BoundaryConversionJob, ByteConversionJob, ClipJob, DataType, MergeJob,
    RankFilterJob, RasterBinding, RasterEngine, RasterInfo, ResamplingFilterJob, RescaleJob,
    SlopeJob, TranslateJob, ZonalStatsJob,
};
use crate::expression::{BandRef, RasterExpression};
use crate::registry::{LayerRegistry, NoopRegistry};

use super::config::{DemBranchSource, ErrorPolicy, PipelineConfig, StatisticPolicy};
use super::definition::PipelineDefinition;
use super::error::{PipelineError, StageError};
use super::types::{
    PipelineProgress, RunInputs, RunResult, SkipReason, StageId, StageOutcome, StageReport,
    StageStatus, ZonalStatistic,
};

/// Artifacts of a completed stage; the primary artifact comes first.
#[derive(Debug, Clone)]
struct StageOutput {
    artifacts: Vec<Artifact>,
    statistic: Option<ZonalStatistic>,
}

impl StageOutput {
    fn single(artifact: Artifact) -> Self {
        Self {
            artifacts: vec![artifact],
            statistic: None,
        }
    }
}

/// Executes the enabled stages of a [`PipelineDefinition`] against a
/// [`RasterEngine`], one at a time.
///
/// A failed stage never aborts the run unless the error policy says so;
/// stages reading from it are reported as skipped.
pub struct PipelineRunner<E: RasterEngine> {
    crs: String,
    config: PipelineConfig,
    definition: PipelineDefinition,
    engine: Arc<E>,
    registry: Arc<dyn LayerRegistry>,
    progress_tx: Option<mpsc::Sender<PipelineProgress>>,
}

impl<E: RasterEngine> PipelineRunner<E> {
    /// Creates a runner for the configured variant.
    pub fn new(config: &Config, engine: E) -> Result<Self, PipelineError> {
        let definition = PipelineDefinition::from_config(&config.pipeline)?;
        Ok(Self {
            crs: config.crs.clone(),
            config: config.pipeline.clone(),
            definition,
            engine: Arc::new(engine),
            registry: Arc::new(NoopRegistry),
            progress_tx: None,
        })
    }

    /// Sets the registry produced layers are announced to.
    pub fn with_registry(mut self, registry: Arc<dyn LayerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the channel receiving progress events.
    pub fn with_progress(mut self, progress_tx: mpsc::Sender<PipelineProgress>) -> Self {
        self.progress_tx = Some(progress_tx);
        self
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Runs every enabled stage and reports each one.
    ///
    /// Only setup failures (the output directory) are returned as errors.
    pub async fn run(
        &self,
        inputs: &RunInputs,
        output_dir: &Path,
    ) -> Result<RunResult, PipelineError> {
        let started_at = Utc::now();
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| PipelineError::OutputDirectory {
                path: output_dir.to_path_buf(),
                source,
            })?;

        info!(
            "Starting {} pipeline in {} ({} stages, elevation from {:?})",
            self.definition.variant().as_str(),
            output_dir.display(),
            self.definition.stages().len(),
            self.definition.branch_source()
        );

        let table = ArtifactTable::new(output_dir);
        if let Err(e) = self.registry.clear().await {
            warn!("Failed to clear layer registry: {}", e);
        }
        if self.config.register_inputs {
            self.register_inputs(inputs).await;
        }

        let stages = self.definition.stages();
        let total = stages.len();
        let mut outputs: HashMap<StageId, StageOutput> = HashMap::new();
        let mut aborted_after: Option<StageId> = None;
        let mut reports = Vec::with_capacity(total);

        for (index, stage) in stages.iter().copied().enumerate() {
            let stage_started = Utc::now();
            let clock = Instant::now();

            let outcome = match self.skip_reason(stage, inputs, &outputs, aborted_after) {
                Some(reason) => {
                    warn!("[{}/{}] {} skipped: {}", index + 1, total, stage, reason);
                    StageOutcome::Skipped { reason }
                }
                None => {
                    self.send_progress(PipelineProgress::StageStarted {
                        stage,
                        index,
                        total,
                    })
                    .await;

                    match self.execute(stage, inputs, &table, &outputs).await {
                        Ok(output) => {
                            let artifacts = output.artifacts.clone();
                            let statistic = output.statistic.clone();
                            info!(
                                "[{}/{}] {} completed: {}",
                                index + 1,
                                total,
                                stage,
                                artifacts[0].path.display()
                            );
                            self.register_output(stage, &output).await;
                            outputs.insert(stage, output);
                            StageOutcome::Completed {
                                artifacts,
                                statistic,
                            }
                        }
                        Err(e) => {
                            error!("[{}/{}] {} failed: {}", index + 1, total, stage, e);
                            if self.config.error_policy == ErrorPolicy::Abort {
                                aborted_after = Some(stage);
                            }
                            StageOutcome::Failed { error: e }
                        }
                    }
                }
            };

            self.send_progress(PipelineProgress::StageFinished {
                stage,
                status: outcome.status(),
            })
            .await;

            reports.push(StageReport {
                stage,
                outcome,
                started_at: stage_started,
                duration_ms: clock.elapsed().as_millis() as u64,
            });
        }

        let count = |status: StageStatus| {
            reports
                .iter()
                .filter(|report: &&StageReport| report.outcome.status() == status)
                .count()
        };
        let (completed, failed, skipped) = (
            count(StageStatus::Completed),
            count(StageStatus::Failed),
            count(StageStatus::Skipped),
        );
        self.send_progress(PipelineProgress::RunCompleted {
            completed,
            failed,
            skipped,
        })
        .await;

        if failed == 0 && skipped == 0 {
            info!("Pipeline finished: all {} stages completed", completed);
        } else {
            warn!(
                "Pipeline finished: {} completed, {} failed, {} skipped",
                completed, failed, skipped
            );
        }

        Ok(RunResult {
            output_dir: output_dir.to_path_buf(),
            variant: self.definition.variant(),
            dem_branch_source: self.definition.branch_source(),
            started_at,
            finished_at: Utc::now(),
            stages: reports,
            terminal_stages: self.definition.terminal_stages(),
        })
    }

    /// Decides whether a stage must be skipped before calling the engine.
    fn skip_reason(
        &self,
        stage: StageId,
        inputs: &RunInputs,
        outputs: &HashMap<StageId, StageOutput>,
        aborted_after: Option<StageId>,
    ) -> Option<SkipReason> {
        if let Some(after) = aborted_after {
            return Some(SkipReason::Aborted { after });
        }

        if let Some(input) = stage.required_input() {
            if inputs.optional(input).is_none() {
                return Some(SkipReason::MissingInput {
                    input: input.to_string(),
                });
            }
        }

        let missing: Vec<StageId> = self
            .definition
            .dependencies(stage)
            .into_iter()
            .filter(|dependency| !outputs.contains_key(dependency))
            .collect();
        if missing.is_empty() {
            None
        } else {
            Some(SkipReason::MissingDependency { stages: missing })
        }
    }

    async fn execute(
        &self,
        stage: StageId,
        inputs: &RunInputs,
        table: &ArtifactTable,
        outputs: &HashMap<StageId, StageOutput>,
    ) -> Result<StageOutput, StageError> {
        let config = &self.config;
        let upstream = |dependency: StageId| -> Result<&Artifact, StageError> {
            outputs
                .get(&dependency)
                .and_then(|output| output.artifacts.first())
                .ok_or(StageError::MissingOutput(dependency))
        };

        match stage {
            StageId::SelectRgb => {
                let orthophoto = inputs
                    .orthophoto
                    .clone()
                    .ok_or(StageError::MissingInput("orthophoto"))?;
                let artifact = table.rgb();
                self.engine
                    .translate(TranslateJob {
                        input: orthophoto,
                        output: artifact.path.clone(),
                        bands: config.rgb_bands.clone(),
                        ..TranslateJob::default()
                    })
                    .await?;
                let info = self.validate_raster(&artifact).await?;
                expect_bands(&info, config.rgb_bands.len())?;
                Ok(StageOutput::single(artifact))
            }

            StageId::ConvertBoundary => {
                let artifact = table.mask();
                self.engine
                    .convert_boundary(BoundaryConversionJob {
                        input: inputs.boundary.clone(),
                        output: artifact.path.clone(),
                        crs: self.crs.clone(),
                        skip_failures: true,
                    })
                    .await?;
                self.validate(&artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::ClipDem => {
                let mask = upstream(StageId::ConvertBoundary)?;
                let artifact = table.clipped_dem();
                self.engine
                    .clip_by_mask(ClipJob {
                        input: inputs.dem.clone(),
                        mask: mask.path.clone(),
                        output: artifact.path.clone(),
                        crs: self.crs.clone(),
                        crop_to_cutline: true,
                        nodata: Some(config.clip_nodata),
                    })
                    .await?;
                self.validate(&artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::ZonalMedian => {
                let mask = upstream(StageId::ConvertBoundary)?;
                let clipped = upstream(StageId::ClipDem)?;
                let artifact = table.stats();
                let job = ZonalStatsJob {
                    raster: clipped.path.clone(),
                    band: config.statistic_band,
                    zones: mask.path.clone(),
                    output: artifact.path.clone(),
                    column_prefix: config.statistic_column_prefix.clone(),
                };
                let (median, feature_count) = match self.engine.zonal_median(job).await {
                    Ok(result) => (
                        result.median.filter(|_| result.feature_count > 0),
                        Ok(result.feature_count),
                    ),
                    Err(e) if config.statistic_policy == StatisticPolicy::Fallback => {
                        (None, Err(e))
                    }
                    Err(e) => return Err(e.into()),
                };

                let (value, degraded) = match (median, &feature_count) {
                    (Some(median), _) => {
                        info!("Zonal median of {}: {}", clipped.name, median);
                        (median, false)
                    }
                    (None, Err(e)) => {
                        warn!(
                            "Statistics layer failed to load ({}); using fallback median {}",
                            e, config.fallback_median
                        );
                        (config.fallback_median, true)
                    }
                    (None, Ok(count)) => {
                        let reason = if *count == 0 {
                            "statistics layer has no features"
                        } else {
                            "no feature carries a median"
                        };
                        if config.statistic_policy == StatisticPolicy::Fail {
                            return Err(StageError::DegenerateStatistic {
                                path: artifact.path.clone(),
                                reason: reason.to_string(),
                            });
                        }
                        warn!("{}; using fallback median {}", reason, config.fallback_median);
                        (config.fallback_median, true)
                    }
                };

                let statistic = ZonalStatistic {
                    value,
                    degraded,
                    feature_count: feature_count.unwrap_or(0),
                    layer: artifact.clone(),
                };
                Ok(StageOutput {
                    artifacts: vec![artifact],
                    statistic: Some(statistic),
                })
            }

            StageId::NormalizeDem => {
                let clipped = upstream(StageId::ClipDem)?;
                let median = outputs
                    .get(&StageId::ZonalMedian)
                    .and_then(|output| output.statistic.as_ref())
                    .map(|statistic| statistic.value)
                    .ok_or(StageError::MissingOutput(StageId::ZonalMedian))?;
                let artifact = table.normalized_dem();
                self.engine
                    .raster_algebra(AlgebraJob {
                        inputs: vec![RasterBinding::new('A', &clipped.path)],
                        expression: RasterExpression::normalize(
                            BandRef {
                                raster: 'A',
                                band: config.statistic_band,
                            },
                            median,
                        ),
                        output: artifact.path.clone(),
                        output_type: DataType::Float32,
                        nodata: Some(config.clip_nodata),
                    })
                    .await?;
                self.validate(&artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::RankFilter => {
                let normalized = upstream(StageId::NormalizeDem)?;
                let artifact = table.rank_filtered();
                self.engine
                    .rank_filter(RankFilterJob {
                        input: normalized.path.clone(),
                        output: artifact.path.clone(),
                        radius: config.rank_filter.radius,
                        rank: config.rank_filter.rank,
                        kernel: config.rank_filter.kernel,
                    })
                    .await?;
                self.validate(&artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::TranslateRank => {
                let filtered = upstream(StageId::RankFilter)?;
                let artifact = table.rank_filtered_tiff();
                self.to_geotiff(filtered, &artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::RescaleDem => {
                let source = upstream(match self.definition.branch_source() {
                    DemBranchSource::RankFilter => StageId::TranslateRank,
                    DemBranchSource::HighPass => StageId::TranslateHighPass,
                })?;
                let artifact = table.rescaled_dem();
                self.engine
                    .rescale(RescaleJob {
                        input: source.path.clone(),
                        output: artifact.path.clone(),
                        band: 1,
                        out_min: config.rescale.min,
                        out_max: config.rescale.max,
                    })
                    .await?;
                self.validate(&artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::DemTo8Bit => {
                let rescaled = upstream(StageId::RescaleDem)?;
                let artifact = table.dem_8bit();
                self.to_byte(rescaled, &artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::ResamplingFilter => {
                let normalized = upstream(StageId::NormalizeDem)?;
                let hipass = table.hipass();
                let lopass = table.lopass();
                self.engine
                    .resampling_filter(ResamplingFilterJob {
                        input: normalized.path.clone(),
                        lopass: lopass.path.clone(),
                        hipass: hipass.path.clone(),
                        scale: config.resampling_filter.scale,
                    })
                    .await?;
                // the low-pass output is never read downstream
                self.validate(&hipass).await?;
                Ok(StageOutput {
                    artifacts: vec![hipass, lopass],
                    statistic: None,
                })
            }

            StageId::TranslateHighPass => {
                let hipass = upstream(StageId::ResamplingFilter)?;
                let artifact = table.hipass_tiff();
                self.to_geotiff(hipass, &artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::Slope => {
                let hipass = upstream(StageId::TranslateHighPass)?;
                let artifact = table.slope();
                self.engine
                    .slope(SlopeJob {
                        input: hipass.path.clone(),
                        output: artifact.path.clone(),
                        band: config.slope_band,
                    })
                    .await?;
                self.validate(&artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::SlopeTo8Bit => {
                let slope = upstream(StageId::Slope)?;
                let artifact = table.slope_8bit();
                self.to_byte(slope, &artifact).await?;
                Ok(StageOutput::single(artifact))
            }

            StageId::SelectThermal => {
                let thermal = inputs
                    .thermal
                    .clone()
                    .ok_or(StageError::MissingInput("thermal"))?;
                let artifact = table.thermal_band();
                self.engine
                    .translate(TranslateJob {
                        input: thermal,
                        output: artifact.path.clone(),
                        bands: vec![config.thermal_band],
                        ..TranslateJob::default()
                    })
                    .await?;
                let info = self.validate_raster(&artifact).await?;
                expect_bands(&info, 1)?;
                Ok(StageOutput::single(artifact))
            }

            StageId::Merge => {
                // band order: RGB, slope, elevation, thermal
                let sources = [
                    upstream(StageId::SelectRgb)?,
                    upstream(StageId::SlopeTo8Bit)?,
                    upstream(StageId::DemTo8Bit)?,
                    upstream(StageId::SelectThermal)?,
                ];
                let artifact = table.result();
                self.engine
                    .merge(MergeJob {
                        inputs: sources.iter().map(|source| source.path.clone()).collect(),
                        output: artifact.path.clone(),
                        separate: true,
                        output_type: DataType::Byte,
                    })
                    .await?;
                let info = self.validate_raster(&artifact).await?;
                expect_bands(&info, config.rgb_bands.len() + 3)?;
                Ok(StageOutput::single(artifact))
            }
        }
    }

    /// SAGA grid to compressed Float32 GeoTIFF.
    async fn to_geotiff(&self, input: &Artifact, output: &Artifact) -> Result<(), StageError> {
        self.engine
            .translate(TranslateJob {
                input: input.path.clone(),
                output: output.path.clone(),
                output_type: Some(DataType::Float32),
                creation_options: self.config.creation_options.clone(),
                ..TranslateJob::default()
            })
            .await?;
        self.validate(output).await
    }

    async fn to_byte(&self, input: &Artifact, output: &Artifact) -> Result<(), StageError> {
        self.engine
            .to_byte(ByteConversionJob {
                input: input.path.clone(),
                output: output.path.clone(),
                nodata: self.config.byte_nodata,
            })
            .await?;
        self.validate(output).await
    }

    /// Checks that an artifact opens and is not empty.
    async fn validate(&self, artifact: &Artifact) -> Result<(), StageError> {
        match artifact.kind {
            ArtifactKind::Raster => self.validate_raster(artifact).await.map(|_| ()),
            ArtifactKind::Vector => {
                let info = self
                    .engine
                    .probe_vector(&artifact.path)
                    .await
                    .map_err(|e| StageError::invalid_artifact(&artifact.path, e.to_string()))?;
                if info.feature_count == 0 {
                    return Err(StageError::invalid_artifact(
                        &artifact.path,
                        "layer has no features",
                    ));
                }
                Ok(())
            }
            ArtifactKind::Table => Ok(()),
        }
    }

    async fn validate_raster(&self, artifact: &Artifact) -> Result<RasterInfo, StageError> {
        let info = self
            .engine
            .probe_raster(&artifact.path)
            .await
            .map_err(|e| StageError::invalid_artifact(&artifact.path, e.to_string()))?;
        if info.is_empty() {
            return Err(StageError::invalid_artifact(
                &artifact.path,
                format!("empty raster ({}x{}, {} bands)", info.width, info.height, info.band_count()),
            ));
        }
        Ok(info)
    }

    async fn register_output(&self, stage: StageId, output: &StageOutput) {
        let (Some(name), Some(artifact)) = (stage.display_name(), output.artifacts.first()) else {
            return;
        };
        if !artifact.exists() {
            warn!("Not registering {}: {} is missing", name, artifact.path.display());
            return;
        }
        if let Err(e) = self.registry.register(artifact, name).await {
            warn!("Failed to register layer {}: {}", name, e);
        }
    }

    async fn register_inputs(&self, inputs: &RunInputs) {
        let mut layers = vec![
            (Artifact::vector("boundary", &inputs.boundary), "boundary"),
            (Artifact::raster("dem", &inputs.dem), "DEM"),
        ];
        if let Some(path) = &inputs.orthophoto {
            layers.push((Artifact::raster("orthophoto", path), "ortofoto"));
        }
        if let Some(path) = &inputs.thermal {
            layers.push((Artifact::raster("thermal", path), "TIR"));
        }

        for (artifact, name) in layers {
            if !artifact.exists() {
                warn!("Input {} not found: {}", name, artifact.path.display());
                continue;
            }
            if let Err(e) = self.registry.register(&artifact, name).await {
                warn!("Failed to register input {}: {}", name, e);
            }
        }
    }

    async fn send_progress(&self, event: PipelineProgress) {
        if let Some(tx) = &self.progress_tx {
            // a dropped receiver must not stop the run
            let _ = tx.send(event).await;
        }
    }
}

fn expect_bands(info: &RasterInfo, expected: usize) -> Result<(), StageError> {
    if info.band_count() != expected {
        return Err(StageError::BandCountMismatch {
            expected,
            actual: info.band_count(),
        });
    }
    Ok(())
}

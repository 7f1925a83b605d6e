//! Ordered stage list of a run.

use serde::Serialize;

use super::config::{CompositeBranches, DemBranchSource, PipelineConfig, PipelineVariant};
use super::error::DefinitionError;
use super::types::StageId;

/// Which stages run, and in what order, for one variant and branch mapping.
///
/// Construction checks that every stage's dependencies are enabled and
/// listed before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineDefinition {
    variant: PipelineVariant,
    branch_source: DemBranchSource,
    stages: Vec<StageId>,
}

impl PipelineDefinition {
    /// Definition with every branch of the variant enabled.
    pub fn new(
        variant: PipelineVariant,
        branch_source: DemBranchSource,
    ) -> Result<Self, DefinitionError> {
        Self::with_branches(variant, branch_source, CompositeBranches::default())
    }

    pub fn with_branches(
        variant: PipelineVariant,
        branch_source: DemBranchSource,
        branches: CompositeBranches,
    ) -> Result<Self, DefinitionError> {
        let composite = variant == PipelineVariant::Composite;
        let enabled = |stage: &StageId| match stage {
            StageId::SelectRgb => composite && branches.rgb,
            StageId::SelectThermal => composite && branches.thermal,
            StageId::Merge => composite && branches.merge,
            StageId::RankFilter | StageId::TranslateRank => {
                branch_source == DemBranchSource::RankFilter
            }
            _ => true,
        };

        let mut stages: Vec<StageId> = StageId::all().into_iter().filter(enabled).collect();

        if branch_source == DemBranchSource::HighPass {
            // the elevation branch now reads the converted high-pass raster
            stages.retain(|stage| !matches!(stage, StageId::RescaleDem | StageId::DemTo8Bit));
            let at = stages
                .iter()
                .position(|stage| *stage == StageId::TranslateHighPass)
                .map_or(stages.len(), |index| index + 1);
            stages.insert(at, StageId::RescaleDem);
            stages.insert(at + 1, StageId::DemTo8Bit);
        }

        Self::with_stages(variant, branch_source, stages)
    }

    /// Definition for a pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, DefinitionError> {
        Self::with_branches(config.variant, config.branch_source(), config.branches)
    }

    /// Definition from an explicit stage list.
    pub fn with_stages(
        variant: PipelineVariant,
        branch_source: DemBranchSource,
        stages: Vec<StageId>,
    ) -> Result<Self, DefinitionError> {
        for (index, stage) in stages.iter().enumerate() {
            if stages[..index].contains(stage) {
                return Err(DefinitionError::Duplicate(*stage));
            }
            for dependency in stage.dependencies(branch_source) {
                match stages.iter().position(|s| *s == dependency) {
                    None => {
                        return Err(DefinitionError::DisabledDependency {
                            stage: *stage,
                            dependency,
                        })
                    }
                    Some(position) if position > index => {
                        return Err(DefinitionError::OutOfOrder {
                            stage: *stage,
                            dependency,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self {
            variant,
            branch_source,
            stages,
        })
    }

    pub fn variant(&self) -> PipelineVariant {
        self.variant
    }

    pub fn branch_source(&self) -> DemBranchSource {
        self.branch_source
    }

    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    pub fn is_enabled(&self, stage: StageId) -> bool {
        self.stages.contains(&stage)
    }

    pub fn dependencies(&self, stage: StageId) -> Vec<StageId> {
        stage.dependencies(self.branch_source)
    }

    /// Enabled stages no other enabled stage reads from.
    pub fn terminal_stages(&self) -> Vec<StageId> {
        self.stages
            .iter()
            .copied()
            .filter(|stage| {
                !self
                    .stages
                    .iter()
                    .any(|other| self.dependencies(*other).contains(stage))
            })
            .collect()
    }
}

//! Pipeline builder with validation.
//!
//! Stands in for the DSL layer: it turns stage, job and need definitions into
//! a [`Pipeline`], expanding bridge matrices and resolving needs by name.

use super::{integrity, Pipeline};
use crate::bridge::matrix::{self, Matrix, MAX_MATRIX_INSTANCES};
use crate::core::{Processable, ProcessableId, When};
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Definition of one job or bridge before expansion.
#[derive(Debug, Clone)]
pub struct ProcessableSpec {
    /// Job name.
    pub name: String,
    /// Stage name.
    pub stage: String,
    /// Trigger policy.
    pub when: When,
    /// Whether a failure is discounted.
    pub allow_failure: bool,
    /// Names of needed jobs; `Some` switches to DAG scheduling.
    pub needs: Option<Vec<String>>,
    /// Delay of a `delayed` job.
    pub start_in: Option<Duration>,
    /// Automatic retries.
    pub retries: u32,
    /// Whether the unit triggers a downstream pipeline.
    pub bridge: bool,
    /// `parallel.matrix` of a bridge.
    pub matrix: Option<Matrix>,
}

impl ProcessableSpec {
    /// Creates a job definition.
    #[must_use]
    pub fn job(name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            when: When::OnSuccess,
            allow_failure: false,
            needs: None,
            start_in: None,
            retries: 0,
            bridge: false,
            matrix: None,
        }
    }

    /// Creates a bridge definition.
    #[must_use]
    pub fn bridge(name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            bridge: true,
            ..Self::job(name, stage)
        }
    }

    /// Sets the trigger policy.
    #[must_use]
    pub fn when(mut self, when: When) -> Self {
        self.when = when;
        self
    }

    /// Marks the job as allowed to fail.
    #[must_use]
    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Declares needs; an empty list runs the job at pipeline start.
    #[must_use]
    pub fn needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs = Some(needs.into_iter().map(Into::into).collect());
        self
    }

    /// Makes the job `delayed` by `start_in`.
    #[must_use]
    pub fn delayed(mut self, start_in: Duration) -> Self {
        self.when = When::Delayed;
        self.start_in = Some(start_in);
        self
    }

    /// Sets the number of automatic retries.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the `parallel.matrix` of a bridge.
    #[must_use]
    pub fn matrix(mut self, matrix: Matrix) -> Self {
        self.matrix = Some(matrix);
        self
    }

    fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Job name cannot be empty"));
        }
        if self.when == When::Delayed && self.start_in.is_none() {
            return Err(invalid(&self.name, "is delayed but has no start_in", "BUILD-003-DELAY"));
        }
        if self.start_in.is_some() && self.when != When::Delayed {
            return Err(invalid(&self.name, "has start_in but is not delayed", "BUILD-003-DELAY"));
        }
        if self.matrix.is_some() && !self.bridge {
            return Err(invalid(&self.name, "uses parallel.matrix but is not a bridge", "BUILD-004-MATRIX"));
        }
        if self
            .needs
            .as_ref()
            .is_some_and(|needs| needs.iter().any(|need| *need == self.name))
        {
            return Err(invalid(&self.name, "cannot need itself", "BUILD-007-SELF_NEED"));
        }
        Ok(())
    }
}

fn invalid(name: &str, problem: &str, code: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!("Job '{name}' {problem}"))
        .with_processables(vec![name.to_string()])
        .with_error_info(ContractErrorInfo::new(code, format!("'{name}' {problem}")))
}

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<String>,
    specs: Vec<ProcessableSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            specs: Vec::new(),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, name: impl Into<String>) -> Self {
        self.stages.push(name.into());
        self
    }

    /// Appends several stages in order.
    #[must_use]
    pub fn stages<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds a job or bridge definition.
    #[must_use]
    pub fn add(mut self, spec: ProcessableSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Shorthand for a plain `on_success` job.
    #[must_use]
    pub fn job(self, name: impl Into<String>, stage: impl Into<String>) -> Self {
        self.add(ProcessableSpec::job(name, stage))
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty pipeline, duplicate stage or job names,
    /// unknown stages or needs, needs on later stages, invalid delay or matrix
    /// settings, and dependency cycles.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() || self.specs.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages or jobs")
                .with_error_info(
                    ContractErrorInfo::new("BUILD-005-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one stage and one job before building."),
                ));
        }

        let mut seen_stages = HashSet::new();
        if let Some(duplicate) = self.stages.iter().find(|s| !seen_stages.insert(s.as_str())) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{duplicate}' is declared twice"
            )));
        }

        let mut pipeline = Pipeline::new(self.name, self.stages);
        // Name (base or instance) -> lineages it resolves to.
        let mut by_name: HashMap<String, Vec<ProcessableId>> = HashMap::new();
        let mut expanded: Vec<(ProcessableSpec, Vec<Processable>)> = Vec::new();

        for spec in self.specs {
            spec.validate()?;
            let stage_index = pipeline.stage_index_of(&spec.stage).ok_or_else(|| {
                PipelineValidationError::new(format!(
                    "Job '{}' uses unknown stage '{}'",
                    spec.name, spec.stage
                ))
                .with_processables(vec![spec.name.clone()])
                .with_error_info(ContractErrorInfo::new(
                    "BUILD-002-UNKNOWN_STAGE",
                    format!("Stage '{}' not found", spec.stage),
                ))
            })?;

            let units = instantiate(&spec, stage_index)?;
            for unit in &units {
                if by_name.contains_key(&unit.name) {
                    return Err(PipelineValidationError::new(format!(
                        "Job '{}' is defined twice",
                        unit.name
                    ))
                    .with_processables(vec![unit.name.clone()]));
                }
                by_name.insert(unit.name.clone(), vec![unit.lineage]);
            }
            if spec.matrix.is_some() {
                if by_name.contains_key(&spec.name) {
                    return Err(PipelineValidationError::new(format!(
                        "Job '{}' is defined twice",
                        spec.name
                    ))
                    .with_processables(vec![spec.name.clone()]));
                }
                by_name.insert(spec.name.clone(), units.iter().map(|u| u.lineage).collect());
            }
            expanded.push((spec, units));
        }

        for (spec, units) in expanded {
            let needs = spec
                .needs
                .as_ref()
                .map(|names| resolve_needs(&spec.name, names, &by_name))
                .transpose()?;
            for unit in units {
                pipeline.push(match &needs {
                    Some(lineages) => unit.with_needs(lineages.iter().copied()),
                    None => unit,
                });
            }
        }

        check_need_stages(&pipeline)?;
        integrity::verify(&pipeline)?;
        Ok(pipeline)
    }
}

/// Turns one definition into its processables: one job, one bridge, or one
/// bridge per matrix instance.
fn instantiate(
    spec: &ProcessableSpec,
    stage_index: u32,
) -> Result<Vec<Processable>, PipelineValidationError> {
    let configure = |unit: Processable| {
        let unit = unit
            .with_when(spec.when)
            .with_allow_failure(spec.allow_failure)
            .with_retries(spec.retries);
        match spec.start_in {
            Some(start_in) => unit.with_start_in(start_in),
            None => unit,
        }
    };

    if !spec.bridge {
        return Ok(vec![configure(Processable::job(
            &spec.name,
            &spec.stage,
            stage_index,
        ))]);
    }

    let Some(matrix_config) = &spec.matrix else {
        return Ok(vec![configure(Processable::bridge(
            &spec.name,
            &spec.stage,
            stage_index,
            Vec::new(),
        ))]);
    };

    let instances = matrix::expand(&spec.name, matrix_config);
    if instances.is_empty() || instances.len() > MAX_MATRIX_INSTANCES {
        return Err(invalid(
            &spec.name,
            &format!(
                "expands into {} instances; a matrix needs between 1 and {MAX_MATRIX_INSTANCES}",
                instances.len()
            ),
            "BUILD-004-MATRIX",
        ));
    }

    Ok(instances
        .into_iter()
        .map(|instance| {
            configure(Processable::bridge(
                instance.name,
                &spec.stage,
                stage_index,
                instance.bindings,
            ))
        })
        .collect())
}

fn resolve_needs(
    name: &str,
    needs: &[String],
    by_name: &HashMap<String, Vec<ProcessableId>>,
) -> Result<Vec<ProcessableId>, PipelineValidationError> {
    let mut resolved = Vec::new();
    for need in needs {
        let lineages = by_name.get(need).ok_or_else(|| {
            PipelineValidationError::new(format!("Job '{name}' needs unknown job '{need}'"))
                .with_processables(vec![name.to_string(), need.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "BUILD-001-UNKNOWN_NEED",
                        format!("Need '{need}' not found"),
                    )
                    .with_context_entry("job", name),
                )
        })?;
        for lineage in lineages {
            if !resolved.contains(lineage) {
                resolved.push(*lineage);
            }
        }
    }
    Ok(resolved)
}

/// Needs may only point at jobs of the same or an earlier stage.
fn check_need_stages(pipeline: &Pipeline) -> Result<(), PipelineValidationError> {
    for processable in pipeline.latest() {
        for need in &processable.needs {
            let Some(needed) = pipeline.latest_of(*need) else {
                continue;
            };
            if needed.stage_index > processable.stage_index {
                return Err(PipelineValidationError::new(format!(
                    "Job '{}' in stage '{}' needs '{}' from the later stage '{}'",
                    processable.name, processable.stage, needed.name, needed.stage
                ))
                .with_processables(vec![processable.name.clone(), needed.name.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "BUILD-006-NEED_ORDER",
                        "A need points at a later stage",
                    )
                    .with_fix_hint("Move the needed job to the same or an earlier stage."),
                ));
            }
        }
    }
    Ok(())
}

//! Pipeline domain model

use crate::core::{
    config::{compile_pattern, ConfigError, PipelineConfig},
    stage::Stage,
    trigger::{NamePattern, TriggerEvent, TriggerPredicate},
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A validated, immutable pipeline definition
///
/// Shared read-only (behind an `Arc`) by every run of the pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    pub version: Option<String>,

    pub trigger: TriggerPredicate,

    /// Variables exported to every stage
    pub variables: BTreeMap<String, String>,

    /// Stages in declaration order
    stages: Vec<Stage>,

    index: HashMap<String, usize>,

    /// Stage execution order (topological sort)
    execution_order: Vec<String>,
}

impl Pipeline {
    /// Create a pipeline from configuration; the configuration is validated first
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let stages: Vec<Stage> = config
            .stages
            .iter()
            .map(|stage_config| Stage::from_config(stage_config, config.default_timeout_secs))
            .collect();

        let trigger = TriggerPredicate {
            repository: match &config.trigger.repository {
                Some(pattern) => compile_pattern(pattern)?,
                None => NamePattern::Any,
            },
            branch: match &config.trigger.branch {
                Some(pattern) => compile_pattern(pattern)?,
                None => NamePattern::Any,
            },
            events: config.trigger.events.clone(),
        };

        Ok(Self::new(
            config.name.clone(),
            config.version.clone(),
            trigger,
            config.variables.clone(),
            stages,
        ))
    }

    fn new(
        name: String,
        version: Option<String>,
        trigger: TriggerPredicate,
        variables: BTreeMap<String, String>,
        stages: Vec<Stage>,
    ) -> Self {
        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        let execution_order = Self::topological_sort(&stages);

        Pipeline {
            name,
            version,
            trigger,
            variables,
            stages,
            index,
            execution_order,
        }
    }

    /// Get a stage by ID
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// Stages in declaration order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Check whether an event starts this pipeline
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        self.trigger.matches(event)
    }

    /// Calculate topological sort of stages based on dependencies
    ///
    /// Ties are broken by declaration order. Assumes the graph is acyclic,
    /// which the loader guarantees.
    fn topological_sort(stages: &[Stage]) -> Vec<String> {
        let by_id: HashMap<&str, &Stage> = stages.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut result = Vec::with_capacity(stages.len());
        let mut visited = HashSet::new();

        for stage in stages {
            Self::visit(&stage.id, &by_id, &mut visited, &mut result);
        }

        result
    }

    fn visit<'a>(
        stage_id: &'a str,
        stages: &HashMap<&'a str, &'a Stage>,
        visited: &mut HashSet<&'a str>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(stage_id) {
            return;
        }

        if let Some(&stage) = stages.get(stage_id) {
            for dep in &stage.dependencies {
                Self::visit(dep, stages, visited, result);
            }
        }

        result.push(stage_id.to_string());
    }
}

//! Stage execution context - the environment a stage's commands see

use crate::core::{pipeline::Pipeline, stage::Stage, trigger::TriggerEvent};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Variables and metadata handed to the executor for one stage
///
/// Later layers override earlier ones: pipeline variables, then stage
/// `env`, then the `CONDUIT_*` run metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageContext {
    pub env: BTreeMap<String, String>,
}

impl StageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context for `stage` in run `run_id`
    pub fn for_stage(
        pipeline: &Pipeline,
        stage: &Stage,
        run_id: Uuid,
        trigger: &TriggerEvent,
    ) -> Self {
        let mut context = Self::new();

        context.env.extend(pipeline.variables.clone());
        context.env.extend(stage.env.clone());

        context.set("CONDUIT", "true");
        context.set("CONDUIT_RUN_ID", run_id.to_string());
        context.set("CONDUIT_PIPELINE", &pipeline.name);
        context.set("CONDUIT_STAGE", &stage.id);
        context.set("CONDUIT_REPOSITORY", &trigger.repository);
        context.set("CONDUIT_BRANCH", &trigger.branch);
        context.set("CONDUIT_COMMIT", &trigger.commit);
        context.set("CONDUIT_ACTOR", &trigger.actor);
        context.set("CONDUIT_EVENT", &trigger.kind);

        context
    }

    /// Set a variable
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }
}

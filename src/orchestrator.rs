//! Run orchestration.
//!
//! Fans entities out to their applicable tools with two independent
//! bounds: a worker pool limiting simultaneous entity-level runs, and a
//! per-entity limit on simultaneous tool invocations. Every invocation
//! has its own timeout and yields exactly one [`RunResult`].

use crate::analysis::Aggregator;
use crate::config::OrchestratorConfig;
use crate::error::{RunError, StoreError, ToolError};
use crate::models::{Entity, ProjectRunSummary, RunCounts, RunOutcome, RunResult, RunSummary};
use crate::registry::ToolRegistry;
use crate::store::Store;
use crate::tools::ToolAdapter;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Limits and policy for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Simultaneous entity-level runs.
    pub worker_pool: usize,
    /// Simultaneous tool invocations per entity; 0 means no limit.
    pub per_entity_concurrency: usize,
    pub default_timeout: Duration,
    pub retry_backoff: Duration,
    pub include_premium: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for RunOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            worker_pool: config.worker_pool.max(1),
            per_entity_concurrency: config.per_entity_concurrency,
            default_timeout: config.default_timeout(),
            retry_backoff: config.retry_backoff(),
            include_premium: config.include_premium,
        }
    }
}

/// Coordinates tool execution for entities and projects.
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    store: Arc<dyn Store>,
    aggregator: Aggregator,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(registry: Arc<ToolRegistry>, store: Arc<dyn Store>, options: RunOptions) -> Self {
        Self {
            aggregator: Aggregator::new(Arc::clone(&store)),
            registry,
            store,
            options,
        }
    }

    /// Resolve an entity through the store and run it.
    pub async fn run_entity_by_id(
        &self,
        entity_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let entity = self.store.get_entity(entity_id).await?;
        if entity.is_archived() {
            return Err(StoreError::EntityArchived(entity_id).into());
        }
        Ok(self.run_entity(&entity, cancel).await)
    }

    /// Run every live entity of a project through the worker pool.
    ///
    /// Once `cancel` fires no new invocation starts; those still pending
    /// are reported as skipped. Recorded findings are kept.
    pub async fn run_project(
        &self,
        project_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ProjectRunSummary, RunError> {
        let project = self.store.get_project(project_id).await?;
        if project.archived {
            return Err(RunError::ProjectArchived(project_id));
        }

        let entities = self.store.list_entities(project_id, true).await?;
        info!(
            "Running project '{}' ({} entities, pool of {})",
            project.name,
            entities.len(),
            self.options.worker_pool
        );

        let started_at = Utc::now();
        let start = Instant::now();

        let mut indexed: Vec<(usize, RunSummary)> = stream::iter(entities.iter().enumerate())
            .map(|(index, entity)| async move { (index, self.run_entity(entity, cancel).await) })
            .buffer_unordered(self.options.worker_pool.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        let summaries: Vec<RunSummary> = indexed.into_iter().map(|(_, s)| s).collect();
        let mut totals = RunCounts::default();
        for summary in &summaries {
            totals.merge(&summary.counts);
        }

        let summary = ProjectRunSummary {
            project_id,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            entities: summaries,
            totals,
            cancelled: cancel.is_cancelled(),
        };

        info!(
            "Project run finished: {} success, {} failure, {} timeout, {} skipped, {} findings",
            totals.success,
            totals.failure,
            totals.timeout,
            totals.skipped,
            summary.findings_created()
        );
        Ok(summary)
    }

    /// Run every applicable tool against one entity.
    ///
    /// Invocations not yet started when `cancel` fires are skipped.
    pub async fn run_entity(&self, entity: &Entity, cancel: &CancellationToken) -> RunSummary {
        let tools = self.registry.tools_for(entity.entity_type);
        debug!(entity_id = %entity.id, "{} has {} applicable tools", entity.describe(), tools.len());

        let limit = match self.options.per_entity_concurrency {
            0 => tools.len().max(1),
            n => n,
        };

        // Completion order is arbitrary; report in registration order.
        let mut indexed: Vec<(usize, RunResult)> = stream::iter(tools.iter().enumerate())
            .map(|(index, tool)| async move {
                (index, self.invoke(entity, tool.as_ref(), cancel).await)
            })
            .buffer_unordered(limit)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);

        RunSummary::from_results(entity, indexed.into_iter().map(|(_, r)| r).collect())
    }

    /// One (entity, tool) invocation, always producing a result.
    async fn invoke(
        &self,
        entity: &Entity,
        tool: &dyn ToolAdapter,
        cancel: &CancellationToken,
    ) -> RunResult {
        let descriptor = tool.descriptor();
        let start = Instant::now();

        let skipped = |detail: &str| RunResult {
            entity_id: entity.id,
            tool_name: descriptor.name.clone(),
            outcome: RunOutcome::Skipped,
            error_detail: Some(detail.to_string()),
            duration_ms: 0,
            attempts: 0,
            finding_id: None,
        };

        if descriptor.premium_only && !self.options.include_premium {
            return log_result(entity, skipped("premium tool"));
        }
        if cancel.is_cancelled() {
            return log_result(entity, skipped("cancelled"));
        }

        let timeout = descriptor.timeout.unwrap_or(self.options.default_timeout);
        let mut attempts = 0;

        let outcome = match entity.entity_type.validate_value(&entity.value) {
            Err(reason) => Err(ToolError::InvalidInput(reason)),
            Ok(()) => loop {
                attempts += 1;
                let result = match tokio::time::timeout(timeout, tool.run(&entity.value, timeout)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout(timeout)),
                };

                match result {
                    Err(ref e)
                        if e.is_transient()
                            && descriptor.idempotent
                            && attempts == 1
                            && !cancel.is_cancelled() =>
                    {
                        warn!(
                            entity_id = %entity.id,
                            tool = %descriptor.name,
                            "Transient failure, retrying once: {}",
                            e
                        );
                        tokio::time::sleep(self.options.retry_backoff).await;
                    }
                    other => break other,
                }
            },
        };

        let (outcome, error_detail, finding_id) = match outcome {
            Ok(payload) => match self.aggregator.record(entity, descriptor, payload).await {
                Ok(finding) => (RunOutcome::Success, None, Some(finding.id)),
                Err(e) => (
                    RunOutcome::Failure,
                    Some(format!("failed to record finding: {}", e)),
                    None,
                ),
            },
            Err(e @ ToolError::Timeout(_)) => (RunOutcome::Timeout, Some(e.to_string()), None),
            Err(e) => (RunOutcome::Failure, Some(e.to_string()), None),
        };

        log_result(
            entity,
            RunResult {
                entity_id: entity.id,
                tool_name: descriptor.name.clone(),
                outcome,
                error_detail,
                duration_ms: start.elapsed().as_millis() as u64,
                attempts,
                finding_id,
            },
        )
    }
}

fn log_result(entity: &Entity, result: RunResult) -> RunResult {
    let detail = result.error_detail.as_deref().unwrap_or("");
    match result.outcome {
        RunOutcome::Success => info!(
            entity_id = %entity.id,
            tool = %result.tool_name,
            duration_ms = result.duration_ms,
            "{} {} on {}",
            result.outcome.emoji(),
            result.tool_name,
            entity.describe()
        ),
        RunOutcome::Failure | RunOutcome::Timeout => warn!(
            entity_id = %entity.id,
            tool = %result.tool_name,
            duration_ms = result.duration_ms,
            "{} {} on {}: {}",
            result.outcome.emoji(),
            result.tool_name,
            entity.describe(),
            detail
        ),
        RunOutcome::Skipped => debug!(
            entity_id = %entity.id,
            tool = %result.tool_name,
            "{} skipped on {}: {}",
            result.tool_name,
            entity.describe(),
            detail
        ),
    }
    result
}

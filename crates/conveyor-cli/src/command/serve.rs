//! `conveyor serve`: runs the workers until a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use conveyor_nats::NatsClient;
use conveyor_runtime::dispatch::ActionRegistry;
use conveyor_runtime::engine::{DefinitionStore, InMemoryDefinitionStore};
use conveyor_worker::pipeline::{WorkerHandles, WorkerState};

use crate::config::ServeArgs;
use crate::shutdown::{drain, stop_requested};
use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    validate(&args)?;
    log_config(&args);

    let topology = args
        .topology
        .topology()
        .context("invalid topology configuration")?;

    let definitions = InMemoryDefinitionStore::load_dir(&args.definitions_dir)
        .await
        .with_context(|| {
            format!(
                "failed to load workflow definitions from {}",
                args.definitions_dir.display()
            )
        })?;

    let mut registry = ActionRegistry::with_builtins();
    args.http
        .register(&mut registry)
        .context("failed to register HTTP action handlers")?;
    warn_unhandled_types(&definitions, &registry).await?;

    let nats = NatsClient::connect(args.nats.clone())
        .await
        .context("failed to connect to NATS")?;
    let latency = nats.ping().await.context("NATS health check failed")?;
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        latency_ms = latency.as_millis(),
        "NATS connection healthy"
    );
    nats.ensure_topology(&topology)
        .await
        .context("failed to provision queue topology")?;

    let state = WorkerState::build(
        nats,
        topology,
        Arc::new(definitions),
        registry,
        args.dead_letter.clone(),
        args.worker.clone(),
    )
    .await
    .context("failed to create worker state")?;

    let workers = WorkerHandles::spawn(&state);
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        "Conveyor workers running"
    );

    let cause = stop_requested(&workers).await;
    drain(workers, Duration::from_secs(args.shutdown_timeout_secs))
        .await
        .context("worker failed")?;

    if cause.is_failure() {
        anyhow::bail!("a worker stopped before shutdown was requested");
    }
    Ok(())
}

fn validate(args: &ServeArgs) -> anyhow::Result<()> {
    args.nats.validate().context("invalid NATS configuration")?;
    args.worker
        .validate()
        .context("invalid worker configuration")?;
    args.dead_letter
        .validate()
        .context("invalid dead-letter configuration")?;
    if !args.http.action_endpoints.is_empty() {
        args.worker
            .check_handler_timeout(args.http.timeout())
            .context("invalid HTTP configuration")?;
    }
    Ok(())
}

fn log_config(args: &ServeArgs) {
    tracing::info!(
        target: TRACING_TARGET_CONFIG,
        definitions_dir = %args.definitions_dir.display(),
        nats_servers = ?args.nats.servers(),
        max_concurrent_steps = args.worker.max_concurrent_steps,
        dispatch_timeout_secs = args.worker.dispatch_timeout_secs,
        ack_wait_secs = args.worker.ack_wait_secs,
        retry_delay_secs = args.dead_letter.retry_delay_secs,
        max_retries = args.dead_letter.max_retries,
        http_endpoints = args.http.action_endpoints.len(),
        "Worker configuration"
    );
}

/// Warns about step types that no registered handler serves.
///
/// Runs reaching such a step are rejected with `UnknownActionType`.
async fn warn_unhandled_types(
    definitions: &InMemoryDefinitionStore,
    registry: &ActionRegistry,
) -> anyhow::Result<()> {
    for id in definitions.ids() {
        let definition = definitions.get(id).await?;
        for node in definition
            .nodes
            .iter()
            .filter(|node| !registry.contains(&node.step_type))
        {
            tracing::warn!(
                target: TRACING_TARGET_CONFIG,
                workflow_id = %id,
                step_id = %node.id,
                step_type = %node.step_type,
                "No action handler registered for step type"
            );
        }
    }
    Ok(())
}

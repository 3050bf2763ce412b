//! `conveyor invoke`: publishes a run invocation.

use anyhow::Context;
use conveyor_nats::NatsClient;
use conveyor_runtime::engine::Outbox;
use conveyor_runtime::execution::{RunId, RunInvocation};
use conveyor_worker::NatsOutbox;
use serde_json::{Map, Value};

use crate::TRACING_TARGET_CONFIG;
use crate::config::InvokeArgs;

pub async fn run(args: InvokeArgs) -> anyhow::Result<()> {
    let payload = parse_payload(&args.payload)?;
    let topology = args
        .topology
        .topology()
        .context("invalid topology configuration")?;
    args.nats
        .validate()
        .context("invalid NATS configuration")?;

    let run_id = args.run_id.map_or_else(RunId::generate, RunId::new);
    let invocation =
        RunInvocation::new(args.workflow_id.as_str(), payload).with_run_id(run_id.clone());

    let nats = NatsClient::connect(args.nats)
        .await
        .context("failed to connect to NATS")?;
    nats.ensure_topology(&topology)
        .await
        .context("failed to provision queue topology")?;

    NatsOutbox::new(&nats, &topology)
        .publish_invocation(&invocation)
        .await
        .context("failed to publish run invocation")?;

    tracing::info!(
        target: TRACING_TARGET_CONFIG,
        workflow_id = %invocation.workflow_id,
        run_id = %run_id,
        route = %topology.invoker,
        "Run invocation published"
    );
    println!("{run_id}");
    Ok(())
}

/// Parses the payload argument, which must be a JSON object.
fn parse_payload(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("payload is not valid JSON")? {
        Value::Object(payload) => Ok(payload),
        other => anyhow::bail!("payload must be a JSON object, got {other}"),
    }
}

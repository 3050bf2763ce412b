//! `conveyor log`: prints the execution log of a run from the run ledger.

use std::path::Path;

use anyhow::Context;
use conveyor_nats::NatsClient;
use conveyor_runtime::definition::WorkflowDefinition;
use conveyor_runtime::engine::RunLedger;
use conveyor_runtime::execution::{ExecutionLogEntry, RunId, RunStatus};
use conveyor_worker::KvRunLedger;

use crate::TRACING_TARGET_CONFIG;
use crate::config::LogArgs;

pub async fn run(args: LogArgs) -> anyhow::Result<()> {
    args.nats
        .validate()
        .context("invalid NATS configuration")?;
    let run_id = RunId::new(args.run_id);
    let definition = match &args.definition {
        Some(path) => Some(load_definition(path).await?),
        None => None,
    };

    let nats = NatsClient::connect(args.nats)
        .await
        .context("failed to connect to NATS")?;
    let ledger = KvRunLedger::new(&nats)
        .await
        .context("failed to open the run ledger")?;

    let entries = ledger
        .entries(&run_id)
        .await
        .with_context(|| format!("failed to read the execution log of run {run_id}"))?;
    if entries.is_empty() && definition.is_none() {
        anyhow::bail!("no execution log recorded for run {run_id}");
    }

    tracing::debug!(
        target: TRACING_TARGET_CONFIG,
        run_id = %run_id,
        entries = entries.len(),
        "Execution log reassembled"
    );
    print!("{}", render(&entries)?);
    if let Some(definition) = definition {
        let status = RunStatus::from_log(&definition, &entries);
        eprintln!("run {run_id} of {}: {status}", definition.id);
    }
    Ok(())
}

async fn load_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a workflow definition", path.display()))
}

/// One JSON document per entry, in execution order.
fn render(entries: &[ExecutionLogEntry]) -> anyhow::Result<String> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conveyor_runtime::definition::StepType;

    use super::*;

    #[test]
    fn test_render_one_line_per_entry() {
        let entries = [
            ExecutionLogEntry::success("start".into(), StepType::Trigger, Duration::ZERO),
            ExecutionLogEntry::failure(
                "alert".into(),
                StepType::SlackAlert,
                Duration::from_millis(12),
                "rate_limited",
            ),
        ];

        let rendered = render(&entries).unwrap();
        let lines: Vec<serde_json::Value> = rendered
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["nodeId"], "start");
        assert_eq!(lines[1]["status"], "failed");
        assert_eq!(lines[1]["error"], "rate_limited");
    }
}

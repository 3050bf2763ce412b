//! `conveyor validate`: checks workflow definition files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use conveyor_runtime::definition::WorkflowDefinition;

use crate::config::ValidateArgs;

pub async fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let mut files = Vec::new();
    for path in &args.paths {
        files.extend(definition_files(path).await?);
    }

    let mut failures = 0usize;
    for file in &files {
        match check(file).await {
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
            }
            Err(err) => {
                failures += 1;
                println!("error {}: {err:#}", file.display());
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} definitions are invalid", files.len());
    }
    Ok(())
}

/// Expands a path into the definition files it names.
async fn definition_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file = entry.path();
        if file.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

/// Validates one file, returning the report lines.
async fn check(file: &Path) -> anyhow::Result<Vec<String>> {
    let bytes = tokio::fs::read(file).await?;
    let definition: WorkflowDefinition =
        serde_json::from_slice(&bytes).context("not a workflow definition")?;
    let report = definition.validate()?;

    let mut lines = vec![format!(
        "ok {} '{}' v{} ({} nodes)",
        file.display(),
        definition.id,
        definition.version,
        definition.nodes.len()
    )];
    lines.extend(
        report
            .warnings
            .iter()
            .map(|warning| format!("  warning: {warning}")),
    );
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"{
        "id": "follow-up",
        "name": "Meeting follow-up",
        "version": "1.2.0",
        "nodes": [
            { "id": "start", "type": "trigger", "next_steps": [{ "id": "alert", "type": "slack-alert" }] },
            { "id": "alert", "type": "slack-alert", "next_steps": [{ "id": "gone", "type": "email-send" }] }
        ]
    }"#;

    #[tokio::test]
    async fn test_check_reports_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("follow-up.json");
        std::fs::write(&file, DEFINITION).unwrap();

        let lines = check(&file).await.unwrap();
        assert!(lines[0].starts_with("ok"));
        assert!(lines[0].contains("(2 nodes)"));
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("gone"));
    }

    #[tokio::test]
    async fn test_directory_expansion_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.json"), DEFINITION).unwrap();
        std::fs::write(dir.path().join("bad.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = definition_files(dir.path()).await.unwrap();
        assert_eq!(files.len(), 2);

        let args = ValidateArgs {
            paths: vec![dir.path().to_path_buf()],
        };
        assert!(run(args).await.is_err());
    }
}

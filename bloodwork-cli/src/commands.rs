//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use anyhow::Context;
use bloodwork_core::config::{load_config, workspace_config_path, write_default_config};
use bloodwork_core::{Address, DispatchResult, Pipeline, RawDocument};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Analyze {
            file,
            to,
            no_email,
            model,
            json,
        } => {
            let request = AnalyzeRequest {
                file,
                to,
                no_email,
                model,
                json,
            };
            handle_analyze(request, workspace).await
        }
        Commands::Config { action } => handle_config(action, workspace).await,
    }
}

struct AnalyzeRequest {
    file: PathBuf,
    to: Option<String>,
    no_email: bool,
    model: Option<String>,
    json: bool,
}

async fn handle_analyze(request: AnalyzeRequest, workspace: &Path) -> anyhow::Result<()> {
    let destination = request
        .to
        .as_deref()
        .map(Address::parse)
        .transpose()
        .context("Invalid --to address")?;

    let bytes = tokio::fs::read(&request.file)
        .await
        .with_context(|| format!("Failed to read {}", request.file.display()))?;

    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = request.model {
        config.llm.model = model;
    }
    if request.no_email {
        config.email.enabled = false;
    }

    info!(
        file = %request.file.display(),
        provider = %config.llm.provider,
        model = %config.llm.model,
        "Analyzing report"
    );
    let pipeline = Pipeline::from_config(&config).context("Failed to set up pipeline")?;
    let outcome = pipeline
        .run(RawDocument::new(bytes), destination.as_ref())
        .await
        .with_context(|| format!("Could not read text from {}", request.file.display()))?;

    if request.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.text());
    }

    match &outcome.dispatch {
        DispatchResult::Delivered { .. } => {
            if let Some(address) = &destination {
                eprintln!("Report mailed to {}", address);
            }
        }
        DispatchResult::Failed { reason } => {
            warn!(reason = %reason, "Report could not be mailed");
        }
        DispatchResult::Skipped { reason } => {
            if destination.is_some() {
                eprintln!("Mail not sent: {}", reason);
            }
        }
    }
    Ok(())
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let path = write_default_config(workspace)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            for warning in config.validate() {
                warn!("{}", warning);
            }
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn analyze(file: PathBuf, to: Option<&str>) -> Commands {
        Commands::Analyze {
            file,
            to: to.map(str::to_string),
            no_email: true,
            model: None,
            json: false,
        }
    }

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".bloodwork").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: bloodwork_core::PipelineConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.llm.model, "gemini-1.5-flash");
        assert_eq!(parsed.email.smtp_port, 587);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".bloodwork").join("config.toml");
        std::fs::write(&config_path, "[llm]\nmodel = \"gemini-1.5-pro\"\n").unwrap();

        // Second init must not overwrite the edited file.
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("gemini-1.5-pro"));
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_analyze_rejects_bad_address() {
        let dir = TempDir::new().unwrap();
        let report = dir.path().join("report.txt");
        std::fs::write(&report, "Hemoglobin 9.8 g/dL").unwrap();

        let err = handle_command(analyze(report, Some("not-an-address")), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid --to address"));
    }

    #[tokio::test]
    async fn test_analyze_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = handle_command(analyze(dir.path().join("absent.pdf"), None), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}

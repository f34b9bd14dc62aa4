use anyhow::{bail, Context};
use bridge_core::{Actor, MemoryStore, Orchestrator, RuleHint};
use bridge_mapping::{Direction, MappingStore, RuleSet};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bridge")]
#[command(about = "HL7 v2 / FHIR R4 transformation bridge CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an HL7 v2 message and print its tree as JSON
    Parse {
        /// File holding the raw message
        file: PathBuf,
    },
    /// Load a rule set and validate every rule in it
    ValidateRules {
        /// YAML rule set
        rules: PathBuf,
    },
    /// Transform a message with a rule set
    Transform {
        /// YAML rule set
        #[arg(long)]
        rules: PathBuf,
        /// hl7-to-fhir or fhir-to-hl7
        #[arg(long)]
        direction: Direction,
        /// Rule message type, overriding detection (requires --version)
        #[arg(long, requires = "version")]
        message_type: Option<String>,
        /// Rule version, overriding detection (requires --message-type)
        #[arg(long, requires = "message_type")]
        version: Option<String>,
        /// Identity recorded on the transformation log
        #[arg(long)]
        actor: Option<String>,
        /// File holding the HL7 message or FHIR JSON
        file: PathBuf,
    },
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

async fn mapping_store(rules: &Path) -> anyhow::Result<Arc<MappingStore>> {
    let rule_set = RuleSet::from_path(rules)
        .with_context(|| format!("failed to load rule set {}", rules.display()))?;
    Ok(Arc::new(MappingStore::new(Arc::new(rule_set)).await?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { file } => {
            let message = hl7::parse(&read(&file)?)?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
        Commands::ValidateRules { rules } => {
            let store = mapping_store(&rules).await?;
            let errors = store.validate_all().await?;
            if !errors.is_empty() {
                for error in &errors {
                    eprintln!("{error}");
                }
                bail!("{} invalid rule(s) in {}", errors.len(), rules.display());
            }
            println!("All rules in {} are valid.", rules.display());
        }
        Commands::Transform {
            rules,
            direction,
            message_type,
            version,
            actor,
            file,
        } => {
            let orchestrator =
                Orchestrator::new(mapping_store(&rules).await?, Arc::new(MemoryStore::new()));
            let hint = match (message_type, version) {
                (Some(message_type), Some(version)) => Some(RuleHint::new(message_type, version)),
                _ => None,
            };
            let actor = actor.map(Actor::new).transpose()?;

            let result = orchestrator
                .transform(&read(&file)?, direction, hint.as_ref(), actor.as_ref())
                .await?;

            if let Some(output) = &result.output {
                println!("{}", output.render()?);
            }
            eprintln!("rule: {}", result.rule_id);
            eprintln!("status: {}", result.status);
            for warning in &result.warnings {
                eprintln!("warning: {warning}");
            }
            for error in &result.errors {
                eprintln!("error: {error}");
            }
        }
    }

    Ok(())
}

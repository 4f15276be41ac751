use shardfuse::cli::{Cli, Commands, ConfigAction};
use shardfuse::config::Config;
use shardfuse::error::{Result, ShardfuseError};
use shardfuse::index::MemoryIndex;
use shardfuse::search::{IndexAlias, ScoreMethod, SearchRequest};
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    // Parse CLI arguments
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Search {
            request,
            shards,
            score,
            summary,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_search(&config, &request, &shards, score, summary).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardfuse=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_search(
    config: &Config,
    request_path: &Path,
    shard_paths: &[PathBuf],
    score: Option<String>,
    summary: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(request_path).map_err(|e| ShardfuseError::Io {
        source: e,
        context: format!("Failed to read request file: {:?}", request_path),
    })?;
    let mut request: SearchRequest =
        serde_json::from_str(&content).map_err(|e| ShardfuseError::Json {
            source: e,
            context: format!("Failed to parse request in {:?}", request_path),
        })?;
    if let Some(score) = score {
        request.score = score.parse::<ScoreMethod>()?;
    }

    let mut alias = IndexAlias::with_config("cli", config);
    for path in shard_paths {
        alias.add_index(MemoryIndex::load(path)?);
    }

    let result = alias.search(&mut request).await?;

    if summary {
        print!("{}", result.describe());
    } else {
        let json = serde_json::to_string_pretty(&result).map_err(|e| ShardfuseError::Json {
            source: e,
            context: "Failed to serialize search result".to_string(),
        })?;
        println!("{}", json);
    }
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Profiles: {}", config.profiles.len());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let mut config = Config::load_or_default(config_path.as_deref())?;
    if let Some(profile) = profile {
        config.apply_profile(&profile)?;
        tracing::debug!("Applied profile '{}'", profile);
    }
    Ok(config)
}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voice_orchestrator::daemon::{build_encoder, build_gateway, build_store};
use voice_orchestrator::semantic::CacheLookup;
use voice_orchestrator::tools::ToolRegistry;
use voice_orchestrator::{Config, Daemon, Sanitizer, SemanticCache, SemanticRouter, TeachOutcome};

/// Voice orchestrator - resolves spoken commands into smart home actions
#[derive(Parser)]
#[command(name = "orchestrator", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/voice-orchestrator/config.toml)
    #[arg(short, long, env = "ORCHESTRATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Teach the router an example phrase for a route
    Teach {
        /// Route name (e.g. "media")
        route: String,
        /// Example utterance
        utterance: String,
    },
    /// Show how the cache and router would treat a phrase
    Lookup {
        /// Phrase to look up
        text: String,
    },
    /// Run the sanitizer against the current device vocabulary
    Sanitize {
        /// Transcript to correct
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,voice_orchestrator=info",
        1 => "info,voice_orchestrator=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Teach { route, utterance } => teach(&config, &route, &utterance).await,
            Command::Lookup { text } => lookup(&config, &text).await,
            Command::Sanitize { text } => sanitize(&config, &text).await,
        };
    }

    tracing::info!(
        mqtt = %config.mqtt.host,
        llm = %config.llm.model,
        embedding = %config.embedding.model,
        "starting voice orchestrator"
    );

    let daemon = Daemon::new(config).await?;
    daemon.run().await?;

    Ok(())
}

async fn load_router(config: &Config) -> anyhow::Result<SemanticRouter> {
    Ok(SemanticRouter::load(
        build_encoder(config)?,
        build_store(config)?,
        &config.storage.routes_key,
        config.resolver.router_threshold,
    )
    .await?)
}

/// Teach a route offline and persist the table
async fn teach(config: &Config, route: &str, utterance: &str) -> anyhow::Result<()> {
    let router = load_router(config).await?;

    match router.teach(route, utterance).await? {
        TeachOutcome::Learned { route, utterance } => {
            println!("learned '{utterance}' for route '{route}'");
        }
        TeachOutcome::AlreadyKnown { route, utterance } => {
            println!("'{utterance}' already belongs to route '{route}'");
        }
        TeachOutcome::Conflict {
            existing_route,
            utterance,
        } => anyhow::bail!("'{utterance}' already triggers route '{existing_route}'"),
    }

    Ok(())
}

/// Print the cache and router decisions for a phrase
async fn lookup(config: &Config, text: &str) -> anyhow::Result<()> {
    let registry = match &config.resolver.tools_file {
        Some(path) => ToolRegistry::load(path)?,
        None => ToolRegistry::embedded_default()?,
    };
    let encoder = build_encoder(config)?;
    let store = build_store(config)?;

    let cache = SemanticCache::load(
        encoder.clone(),
        store.clone(),
        &config.storage.cache_key,
        registry.exact_only_names(),
    )
    .await?;
    let router = SemanticRouter::load(
        encoder,
        store,
        &config.storage.routes_key,
        config.resolver.router_threshold,
    )
    .await?;

    match cache.get(text, config.resolver.cache_threshold).await? {
        CacheLookup::Hit(hit) => println!(
            "cache:  hit '{}' -> {} {} (score {:.3})",
            hit.utterance,
            hit.tool,
            serde_json::Value::Object(hit.args),
            hit.score
        ),
        CacheLookup::Miss { best_score } => println!(
            "cache:  miss (best score {best_score:.3}, threshold {:.2})",
            config.resolver.cache_threshold
        ),
    }

    match router.match_details(text).await? {
        Some(m) => {
            let decision = if m.score >= router.threshold() {
                "match"
            } else {
                "below threshold"
            };
            println!(
                "router: {decision} '{}' via '{}' (score {:.3})",
                m.route, m.phrase, m.score
            );
        }
        None => println!("router: no routes"),
    }

    Ok(())
}

/// Sanitize a transcript against the gateway vocabulary
async fn sanitize(config: &Config, text: &str) -> anyhow::Result<()> {
    let sanitizer = Sanitizer::new(
        config.resolver.sanitizer_threshold,
        config.resolver.min_vocabulary_len,
    );
    let gateway = build_gateway(config)?;
    sanitizer.replace_vocabulary(gateway.voice_vocabulary().await);

    println!("vocabulary: {} entries", sanitizer.vocabulary_len());
    println!("{}", sanitizer.sanitize(text));
    Ok(())
}

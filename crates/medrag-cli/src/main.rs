use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use medrag_ai::{AnswerEngine, EngineContext, LLMProvider, LLMProviderFactory, LlmBackend};
use medrag_core::{ConfigManager, MedragConfig, MetadataCatalog, ProductId, VectorStore};
use medrag_vector::{
    EmbeddingProvider, FilterCompiler, OllamaEmbeddingProvider, ProductDetector, QdrantStore,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

mod logging;

#[derive(Parser)]
#[command(name = "medrag")]
#[command(about = "Answer questions about medicinal products from their indexed documentation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: ./.medrag.toml, then ~/.medrag/config.toml)
    #[arg(short, long, global = true, env = "MEDRAG_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "pretty")]
    output: OutputFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to the console only
    #[arg(long, global = true)]
    no_log_file: bool,

    /// Directory for rotated log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question; products are detected unless given explicitly
    Ask {
        query: String,

        /// Restrict retrieval to these product ids (repeatable)
        #[arg(short, long = "product")]
        products: Vec<String>,

        /// Restrict retrieval to one strength
        #[arg(short, long)]
        strength: Option<String>,
    },

    /// Show which catalog products a question mentions
    Detect { query: String },

    /// Print the filter compiled for products and strength
    Filter {
        #[arg(short, long = "product")]
        products: Vec<String>,

        #[arg(short, long)]
        strength: Option<String>,
    },

    /// Check the LLM, the embedding service and the collection
    Status,

    /// Write a default configuration file
    InitConfig {
        /// Target path
        #[arg(default_value = ".medrag.toml")]
        path: PathBuf,
    },
}

#[derive(Serialize)]
struct SourceSummary {
    node_id: String,
    score: f32,
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct AskResult {
    mode: &'static str,
    response: String,
    elapsed: String,
    elapsed_seconds: f64,
    sources: Vec<SourceSummary>,
}

#[derive(Serialize)]
struct DetectResult {
    products: Vec<String>,
    context: String,
}

#[derive(Serialize)]
struct ServiceStatus {
    name: String,
    available: bool,
    detail: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match execute(&cli).await {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn execute(cli: &Cli) -> Result<serde_json::Value> {
    if let Commands::InitConfig { path } = &cli.command {
        return execute_init_config(path);
    }

    let manager = ConfigManager::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let config = manager.config();

    let _guard = logging::init(logging::LogSettings {
        config: &config.logging,
        verbose: cli.verbose,
        file: !cli.no_log_file,
        directory: cli.log_dir.as_deref(),
    })?;
    if let Some(path) = manager.config_path() {
        info!(path = %path.display(), "Using configuration file");
    }

    match &cli.command {
        Commands::Ask {
            query,
            products,
            strength,
        } => execute_ask(config, query, products, strength.clone()).await,
        Commands::Detect { query } => execute_detect(config, query),
        Commands::Filter { products, strength } => {
            execute_filter(config, products, strength.as_deref())
        }
        Commands::Status => execute_status(config).await,
        Commands::InitConfig { path } => execute_init_config(path),
    }
}

fn product_set(products: &[String]) -> BTreeSet<ProductId> {
    products
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(ProductId::new)
        .collect()
}

async fn execute_ask(
    config: &MedragConfig,
    query: &str,
    products: &[String],
    strength: Option<String>,
) -> Result<serde_json::Value> {
    let ctx = EngineContext::from_config(config).context("Failed to initialise engine")?;
    let engine = AnswerEngine::new(Arc::new(ctx));

    let (mode, product_override) = if products.is_empty() {
        ("auto", None)
    } else {
        ("filtered", Some(product_set(products)))
    };
    let result = engine.answer(query, product_override, strength).await?;

    let output = AskResult {
        mode,
        elapsed: result.elapsed_display(),
        elapsed_seconds: result.elapsed_seconds,
        sources: result
            .sources
            .into_iter()
            .map(|s| SourceSummary {
                node_id: s.node_id,
                score: s.score,
                metadata: s.metadata,
            })
            .collect(),
        response: result.response,
    };
    Ok(serde_json::to_value(output)?)
}

fn load_catalog(config: &MedragConfig) -> Result<Arc<MetadataCatalog>> {
    let path = config
        .catalog
        .path
        .as_ref()
        .context("catalog.path is not configured")?;
    Ok(Arc::new(MetadataCatalog::from_path(path)?))
}

fn execute_detect(config: &MedragConfig, query: &str) -> Result<serde_json::Value> {
    let detector = ProductDetector::new(load_catalog(config)?);
    let detection = detector.detect(query);

    let output = DetectResult {
        products: detection
            .products
            .iter()
            .map(|p| p.as_str().to_string())
            .collect(),
        context: detection.context,
    };
    Ok(serde_json::to_value(output)?)
}

fn execute_filter(
    config: &MedragConfig,
    products: &[String],
    strength: Option<&str>,
) -> Result<serde_json::Value> {
    let compiler = FilterCompiler::from_config(&config.filter);
    Ok(match compiler.compile(&product_set(products), strength) {
        Some(filter) => serde_json::json!({ "filter": serde_json::to_value(&filter)? }),
        None => serde_json::json!({ "filter": null, "note": "no filter, search is unrestricted" }),
    })
}

async fn execute_status(config: &MedragConfig) -> Result<serde_json::Value> {
    let mut services = Vec::new();

    let backend = LlmBackend::resolve(&config.llm);
    let llm = LLMProviderFactory::create_for_backend(&backend, &config.llm)?;
    services.push(ServiceStatus {
        name: format!("llm ({})", backend.kind()),
        available: llm.is_available().await,
        detail: llm.model_name().to_string(),
    });

    let embedder = OllamaEmbeddingProvider::new((&config.embedding).into());
    services.push(ServiceStatus {
        name: "embedding".to_string(),
        available: embedder.is_available().await,
        detail: format!(
            "{} ({} dims)",
            config.embedding.model,
            embedder.embedding_dimension()
        ),
    });

    let collection = config.vector_store.collection.clone().unwrap_or_default();
    let store = QdrantStore::from_config(&config.vector_store)?;
    let (available, detail) = match store.attach(&collection).await {
        Ok(info) => (
            true,
            format!(
                "{} points, vector size {}",
                info.points_count
                    .map_or_else(|| "?".to_string(), |n| n.to_string()),
                info.vector_size
                    .map_or_else(|| "?".to_string(), |n| n.to_string())
            ),
        ),
        Err(e) => (false, e.to_string()),
    };
    services.push(ServiceStatus {
        name: format!("collection '{}' at {}", collection, store.uri()),
        available,
        detail,
    });

    Ok(serde_json::to_value(services)?)
}

fn execute_init_config(path: &Path) -> Result<serde_json::Value> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    ConfigManager::create_default_config(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(serde_json::json!({ "written": path.display().to_string() }))
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value, 0);
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) if s.contains('\n') => {
                        println!("{}{}:", indent, key_colored);
                        for line in s.lines() {
                            println!("{}  {}", indent, line.green());
                        }
                    }
                    serde_json::Value::String(s) => {
                        println!("{}{}: {}", indent, key_colored, s.green());
                    }
                    serde_json::Value::Number(n) => {
                        println!("{}{}: {}", indent, key_colored, n.to_string().yellow());
                    }
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}{}: {}", indent, key_colored, val_colored);
                    }
                    serde_json::Value::Null => {
                        println!("{}{}: {}", indent, key_colored, "none".dimmed());
                    }
                    nested => {
                        println!("{}{}:", indent, key_colored);
                        print_pretty(nested, depth + 1);
                    }
                }
            }
        }
        serde_json::Value::Array(arr) if arr.is_empty() => {
            println!("{}{}", indent, "(none)".dimmed());
        }
        serde_json::Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("{}{}{}:", indent, "Item ".cyan(), (i + 1).to_string().yellow());
                print_pretty(item, depth + 1);
            }
        }
        other => {
            println!("{}{}", indent, other);
        }
    }
}

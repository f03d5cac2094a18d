use lexcol::cli::{Cli, Commands, ConfigAction};
use lexcol::config::{expand_tilde, Config};
use lexcol::context::{render_context, ContextAssembler, RerankedChunk};
use lexcol::error::{LexError, Result};
use lexcol::graph::{normalize_document_id, CitationGraph};
use lexcol::router::NamespaceRouter;
use lexcol::service::{IpcClient, IpcMessage, IpcResponse, Service};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve => cmd_serve(cli.config)?,
        Commands::Status => cmd_remote(cli.config, IpcMessage::Status)?,
        Commands::Stats => cmd_remote(cli.config, IpcMessage::Stats)?,
        Commands::Stop => cmd_remote(cli.config, IpcMessage::Stop)?,
        Commands::Route { query } => cmd_route(cli.config, &query)?,
        Commands::Lookup { document, json } => cmd_lookup(cli.config, &document, json)?,
        Commands::Related { ids, limit } => cmd_related(cli.config, &ids, limit)?,
        Commands::Assemble {
            file,
            retrieved,
            budget,
            json,
        } => cmd_assemble(cli.config, &file, retrieved, budget, json)?,
        Commands::Config { action } => cmd_config(cli.config, action)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "lexcol=debug" } else { "lexcol=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| LexError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    tracing::info!("Configuration loaded successfully");

    runtime()?.block_on(async {
        let service = Service::new(&config)?;
        println!("✓ Serving on {}", service.socket_path().display());
        service.run_foreground().await
    })
}

fn cmd_remote(config_path: Option<PathBuf>, message: IpcMessage) -> Result<()> {
    let config = load_config(config_path)?;
    let client = IpcClient::new(expand_tilde(&config.service.socket_path));

    let response = runtime()?.block_on(client.send(&message))?;
    print_response(&response)
}

fn print_response(response: &IpcResponse) -> Result<()> {
    let marker = if response.success { "✓" } else { "✗" };
    if let Some(message) = &response.message {
        println!("{} {}", marker, message);
    }
    if let Some(data) = &response.data {
        println!("{}", to_pretty_json(data)?);
    }
    Ok(())
}

fn cmd_route(config_path: Option<PathBuf>, query: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let router = NamespaceRouter::from_config(&config.router)?;

    match router.classify(query) {
        Some(classifier) => println!("Classifier: {}", classifier.name),
        None => println!("Classifier: none (default collection first)"),
    }

    println!("\nSearch order:");
    for (position, collection) in router.prioritize_collections(query).iter().enumerate() {
        println!(
            "  {}. {:<16} weight {:.2}",
            position + 1,
            collection,
            router.merge_weight(position)
        );
    }

    Ok(())
}

fn load_graph(config: &Config) -> Result<CitationGraph> {
    CitationGraph::load_or_empty(&expand_tilde(&config.graph.path))
}

fn cmd_lookup(config_path: Option<PathBuf>, document: &str, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let graph = load_graph(&config)?;
    let view = graph.lookup(document);

    if json {
        println!("{}", to_pretty_json(&view)?);
        return Ok(());
    }

    println!("Document: {}", view.center);
    println!("\nNodes ({}):", view.nodes.len());
    for node in &view.nodes {
        let marker = if node.center { "*" } else { " " };
        println!(" {} {} [{}]", marker, node.label, node.id);
    }
    println!("\nEdges ({}):", view.edges.len());
    for edge in &view.edges {
        println!("  {} -{}-> {}", edge.source_id, edge.relation, edge.target_id);
    }

    Ok(())
}

fn cmd_related(config_path: Option<PathBuf>, ids: &[String], limit: Option<usize>) -> Result<()> {
    let config = load_config(config_path)?;
    let graph = load_graph(&config)?;

    for raw in ids {
        let id = normalize_document_id(raw);
        let summaries = graph.related_summaries(&id, limit.unwrap_or(usize::MAX));

        if summaries.is_empty() {
            println!("{}: no related documents", id);
            continue;
        }

        println!("{}:", id);
        for summary in &summaries {
            println!("  {}", summary.describe());
        }
    }

    Ok(())
}

fn cmd_assemble(
    config_path: Option<PathBuf>,
    file: &Path,
    retrieved: Option<usize>,
    budget: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(budget) = budget {
        config.context.token_budget = budget;
    }

    let content = std::fs::read_to_string(file).map_err(|e| LexError::Io {
        source: e,
        context: format!("Failed to read chunks file: {:?}", file),
    })?;
    let chunks: Vec<RerankedChunk> = serde_json::from_str(&content).map_err(|e| LexError::Json {
        source: e,
        context: format!("Failed to parse chunks file: {:?}", file),
    })?;

    let graph = Arc::new(load_graph(&config)?);
    let assembler = ContextAssembler::new(graph, &config.context);
    let context = assembler.assemble(&chunks, retrieved.unwrap_or(chunks.len()));

    if json {
        println!("{}", to_pretty_json(&context)?);
        return Ok(());
    }

    println!("{}", render_context(&context));
    println!("\nSources:");
    for source in &context.sources {
        println!(
            "  - {} ({}) {}",
            source.title,
            source.legal_state.label(),
            source.link
        );
    }
    let debug = &context.debug;
    println!(
        "\n{} chunks retrieved, {} after reranking, {} documents, {} included, ~{} tokens{}",
        debug.chunks_retrieved,
        debug.chunks_after_reranking,
        debug.unique_articles,
        debug.articles_included,
        debug.tokens_used,
        if debug.budget_exhausted {
            " (budget reached)"
        } else {
            ""
        }
    );

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path)?;
            let value = serde_json::to_value(&config).map_err(|e| LexError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            match section {
                Some(section) => match value.get(&section) {
                    Some(section_value) => println!("{}", to_pretty_json(section_value)?),
                    None => {
                        return Err(LexError::Config(format!(
                            "Unknown config section: {}",
                            section
                        )))
                    }
                },
                None => println!("{}", to_pretty_json(&value)?),
            }
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
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

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'lexcol config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| LexError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

//! sf: command-line client for the shapeflow backend

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use shapeflow_core::config::{ClientConfig, LogFormat};
use shapeflow_core::logging::init_logging;
use shapeflow_core::store::StoreSnapshot;
use shapeflow_core::{AnalyzerConfig, AnalyzerId, ShapeflowClient};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "sf", version)]
#[command(about = "Queue, launch and monitor shapeflow video analyzers.")]
struct Cli {
    /// Backend base URL (overrides the config file)
    #[arg(long, global = true, env = "SHAPEFLOW_URL", value_name = "URL")]
    url: Option<String>,

    /// Path to a shapeflow.toml config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `shapeflow_core=trace`
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the backend until Ctrl-C, printing state changes and notices
    Watch,
    /// Sync once and print the queue
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Initialize and launch an analyzer from a JSON config file
    Init {
        #[arg(id = "analyzer_config", value_name = "CONFIG_JSON")]
        config: PathBuf,
    },
    /// Close an analyzer
    Close { id: String },
    /// Start the queue runner
    Start,
    /// Stop the queue runner
    Stop,
    /// Analyze one analyzer outside the queue
    Analyze { id: String },
    /// Cancel a running analysis
    Cancel { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(remediation) = err
                .downcast_ref::<shapeflow_core::Error>()
                .and_then(shapeflow_core::Error::remediation)
            {
                eprint!("{}", remediation.render_plain());
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(url) = &cli.url {
        config.backend.url.clone_from(url);
    }
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate().map_err(shapeflow_core::Error::from)?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    init_logging(&config.logging).map_err(shapeflow_core::Error::from)?;
    debug!(url = %config.backend.url, "Configuration loaded");

    match cli.command {
        Commands::Watch => watch(&config).await,
        Commands::Status { json } => status(&config, json).await,
        Commands::Init { config: path } => {
            let analyzer_config = read_analyzer_config(&path)?;
            let client = ShapeflowClient::connect(&config)?;
            let id = client.actions().init(analyzer_config).await?;
            println!("{id}");
            Ok(())
        }
        Commands::Close { id } => {
            let client = ShapeflowClient::connect(&config)?;
            let id = AnalyzerId::from(id);
            if !client.actions().close(&id).await? {
                bail!("backend refused to close analyzer {id}");
            }
            println!("closed {id}");
            Ok(())
        }
        Commands::Start => {
            let client = ShapeflowClient::connect(&config)?;
            client.sync().sync_once().await?;
            let state = client.actions().start_queue().await?;
            println!("queue {state}");
            Ok(())
        }
        Commands::Stop => {
            let client = ShapeflowClient::connect(&config)?;
            let state = client.actions().stop_queue().await?;
            println!("queue {state}");
            Ok(())
        }
        Commands::Analyze { id } => {
            let client = ShapeflowClient::connect(&config)?;
            let id = AnalyzerId::from(id);
            if !client.actions().analyze(&id).await? {
                bail!("backend refused to analyze {id}");
            }
            println!("analyzing {id}");
            Ok(())
        }
        Commands::Cancel { id } => {
            let client = ShapeflowClient::connect(&config)?;
            let id = AnalyzerId::from(id);
            let canceled = client.actions().cancel(&id).await?;
            println!("{}", if canceled { "canceled" } else { "nothing to cancel" });
            Ok(())
        }
    }
}

fn read_analyzer_config(path: &Path) -> anyhow::Result<AnalyzerConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(shapeflow_core::Error::from)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .map_err(shapeflow_core::Error::from)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

async fn status(config: &ClientConfig, json: bool) -> anyhow::Result<()> {
    let client = ShapeflowClient::connect(config)?;
    client.sync().sync_once().await?;
    let snapshot = client.snapshot().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", render_snapshot(&snapshot));
    }
    Ok(())
}

async fn watch(config: &ClientConfig) -> anyhow::Result<()> {
    let client = ShapeflowClient::connect(config)?;
    client.sync().start_loop();
    info!(url = %config.backend.url, "Watching backend, Ctrl-C to stop");

    let mut ticker = tokio::time::interval(config.sync.interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut previous: Option<StoreSnapshot> = None;
    let mut seen_notices: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let snapshot = client.snapshot().await;
                for line in describe_changes(previous.as_ref(), &snapshot, &mut seen_notices) {
                    println!("{line}");
                }
                previous = Some(snapshot);
            }
        }
    }

    client.sync().shutdown().await;
    Ok(())
}

fn render_snapshot(snapshot: &StoreSnapshot) -> String {
    let mut out = format!(
        "queue: {}  backend: {}\n",
        snapshot.queue_state,
        if snapshot.connection.connected {
            "connected"
        } else {
            "disconnected"
        }
    );
    if snapshot.analyzers.is_empty() {
        out.push_str("  (no analyzers)\n");
    }
    for analyzer in &snapshot.analyzers {
        let state = analyzer
            .state
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        let progress = analyzer
            .progress
            .map(|p| format!(" {:.0}%", p * 100.0))
            .unwrap_or_default();
        out.push_str(&format!(
            "  {}  {}  {state}{progress}\n",
            analyzer.id, analyzer.name
        ));
    }
    if !snapshot.notices.is_empty() {
        out.push_str("notices:\n");
        for notice in &snapshot.notices {
            match &notice.analyzer_name {
                Some(name) => out.push_str(&format!("  - [{name}] {}\n", notice.message)),
                None => out.push_str(&format!("  - {}\n", notice.message)),
            }
        }
    }
    out
}

fn describe_changes(
    previous: Option<&StoreSnapshot>,
    current: &StoreSnapshot,
    seen_notices: &mut HashSet<String>,
) -> Vec<String> {
    let mut lines = Vec::new();

    let was_connected = previous.is_some_and(|p| p.connection.connected);
    if previous.is_none() || was_connected != current.connection.connected {
        lines.push(if current.connection.connected {
            "backend connected".to_string()
        } else {
            "backend disconnected".to_string()
        });
    }
    if previous.is_none_or(|p| p.queue_state != current.queue_state) {
        lines.push(format!("queue {}", current.queue_state));
    }

    for analyzer in &current.analyzers {
        let before = previous.and_then(|p| p.analyzers.iter().find(|a| a.id == analyzer.id));
        match before {
            None => lines.push(format!("+ {} ({})", analyzer.name, analyzer.id)),
            Some(before) if before.state != analyzer.state => {
                if let Some(state) = analyzer.state {
                    lines.push(format!("{}: {state}", analyzer.name));
                }
            }
            Some(_) => {}
        }
    }
    if let Some(previous) = previous {
        for gone in previous
            .analyzers
            .iter()
            .filter(|a| !current.analyzers.iter().any(|c| c.id == a.id))
        {
            lines.push(format!("- {} ({})", gone.name, gone.id));
        }
    }

    for notice in &current.notices {
        if seen_notices.insert(notice.uuid.clone()) {
            match &notice.analyzer_name {
                Some(name) => lines.push(format!("! [{name}] {}", notice.message)),
                None => lines.push(format!("! {}", notice.message)),
            }
        }
    }
    lines
}

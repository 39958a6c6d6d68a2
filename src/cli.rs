use crate::config::{EngineConfig, load_config};
use crate::engine::ConversationGraph;
use crate::layout_dump::{LayoutDump, write_layout_dump};
use crate::snapshot::{load_snapshot, parse_snapshot, write_snapshot};
use crate::viewport::{Camera, ViewportSize};
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "convgraph", version, about = "Lay out, cull and search conversation graph snapshots")]
pub struct Args {
    /// Config JSON file (layout metrics, undo window, viewport buffer)
    #[arg(short = 'c', long = "configFile", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a global layout and print the layout dump
    Layout {
        #[command(flatten)]
        io: IoArgs,
    },
    /// Print ids of nodes inside the viewport as a JSON array
    Visible {
        #[command(flatten)]
        io: IoArgs,
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        #[arg(long = "offset-x", default_value_t = 0.0, allow_hyphen_values = true)]
        offset_x: f64,
        #[arg(long = "offset-y", default_value_t = 0.0, allow_hyphen_values = true)]
        offset_y: f64,
        #[arg(short = 'w', long, default_value_t = 1200.0)]
        width: f64,
        #[arg(short = 'H', long, default_value_t = 800.0)]
        height: f64,
    },
    /// Print ids of nodes whose content matches the query as a JSON array
    Search {
        #[command(flatten)]
        io: IoArgs,
        #[arg(short = 'q', long)]
        query: String,
    },
    /// Validate, lay out and re-serialize a snapshot
    Normalize {
        #[command(flatten)]
        io: IoArgs,
    },
}

#[derive(ClapArgs, Debug)]
pub struct IoArgs {
    /// Snapshot file or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file. Defaults to stdout if omitted.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

pub fn run() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    execute(args.command, config)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn execute(command: Command, config: EngineConfig) -> Result<()> {
    match command {
        Command::Layout { io } => {
            let mut graph = read_graph(io.input.as_deref(), config)?;
            graph.flush_layout();
            match io.output.as_deref() {
                Some(path) => write_layout_dump(path, &graph)
                    .with_context(|| format!("failed to write layout dump {}", path.display())),
                None => write_json(None, &LayoutDump::from_graph(&graph)),
            }
        }
        Command::Visible {
            io,
            scale,
            offset_x,
            offset_y,
            width,
            height,
        } => {
            let graph = read_graph(io.input.as_deref(), config)?;
            let camera = Camera {
                scale,
                offset_x,
                offset_y,
            };
            let ids = graph.visible_node_ids(camera, ViewportSize { width, height });
            write_json(io.output.as_deref(), &ids)
        }
        Command::Search { io, query } => {
            let mut graph = read_graph(io.input.as_deref(), config)?;
            let matches = graph.search(&query).to_vec();
            write_json(io.output.as_deref(), &matches)
        }
        Command::Normalize { io } => {
            let mut graph = read_graph(io.input.as_deref(), config)?;
            graph.flush_layout();
            let snapshot = graph.to_snapshot();
            match io.output.as_deref() {
                Some(path) => write_snapshot(path, &snapshot)
                    .with_context(|| format!("failed to write snapshot {}", path.display())),
                None => write_json(None, &snapshot),
            }
        }
    }
}

fn read_graph(path: Option<&Path>, config: EngineConfig) -> Result<ConversationGraph> {
    let snapshot = match path {
        Some(path) if path != Path::new("-") => load_snapshot(path)
            .with_context(|| format!("failed to load snapshot {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            parse_snapshot(&buf).context("failed to load snapshot from stdin")?
        }
    };
    Ok(ConversationGraph::from_snapshot(snapshot, config))
}

fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    match path {
        Some(path) => std::fs::write(path, json)?,
        None => io::stdout().write_all(json.as_bytes())?,
    }
    Ok(())
}

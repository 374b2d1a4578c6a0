//! SpecImpact CLI - Command-line interface for SpecImpact
//!
//! Builds the impact graph from a facts file, keeps its snapshot under
//! `.specimpact/`, answers impact queries and serves the graph.

use clap::{Parser, Subcommand};
use colored::Colorize;
use specimpact_graph::NodeKind;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod diff;

#[derive(Parser)]
#[command(name = "specimpact")]
#[command(author = "SpecImpact Contributors")]
#[command(version)]
#[command(about = "Which specs, code and tests does a change touch?", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root holding the .specimpact directory
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize SpecImpact in the project root
    Init,

    /// Build the graph from a facts file and save the snapshot
    Build {
        /// Facts document with "nodes" and "edges"
        #[arg(short, long)]
        facts: PathBuf,
    },

    /// Show everything affected by a change
    Impact {
        /// Changed spec, code or test ids
        ids: Vec<String>,

        /// Read changed files from a unified git diff
        #[arg(long)]
        diff: Option<PathBuf>,

        /// Maximum hops from a changed id
        #[arg(short, long)]
        depth: Option<usize>,

        /// Also follow suggested links
        #[arg(long)]
        suggested: bool,

        /// Output as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Show the specs a code file implements
    SpecsFor {
        /// Code file id
        file: String,

        /// Follow dependency chains
        #[arg(long)]
        transitive: bool,

        /// Output as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Show the code that implements a spec
    CodeFor {
        /// Spec id
        spec: String,

        /// Output as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Select the tests to run for a change
    TestsFor {
        /// Changed ids
        ids: Vec<String>,

        /// Read changed files from a unified git diff
        #[arg(long)]
        diff: Option<PathBuf>,

        /// Output as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Apply an incremental update to the saved graph
    Update {
        /// Update document (changed and deleted ids, new facts)
        #[arg(short, long)]
        changes: PathBuf,

        /// Re-read facts for the changed ids from this file
        #[arg(short, long)]
        facts: Option<PathBuf>,
    },

    /// Export the graph to JSON
    Export {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only export nodes of this kind
        #[arg(short, long)]
        kind: Option<NodeKind>,

        /// Only export the neighbourhood of this node
        #[arg(long)]
        focal: Option<String>,

        /// Neighbourhood depth for --focal
        #[arg(short, long)]
        depth: Option<usize>,

        /// Indent the output
        #[arg(long)]
        pretty: bool,
    },

    /// Replace the saved graph with an exported document
    Import {
        /// Export document to read
        file: PathBuf,
    },

    /// Show graph status and statistics
    Status,

    /// Start the WebSocket server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = specimpact_server::DEFAULT_PORT)]
        port: u16,

        /// Headless mode: bind to 0.0.0.0 for remote access
        #[arg(long)]
        headless: bool,
    },

    /// Start the MCP server on stdio
    Mcp,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging; stdout stays clean for JSON and MCP
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let root = cli.root.as_path();
    let result = match cli.command {
        Commands::Init => commands::init(root),
        Commands::Build { facts } => commands::build(root, &facts),
        Commands::Impact {
            ids,
            diff,
            depth,
            suggested,
            json,
        } => commands::impact(root, ids, diff.as_deref(), depth, suggested, json),
        Commands::SpecsFor {
            file,
            transitive,
            json,
        } => commands::specs_for(root, &file, transitive, json),
        Commands::CodeFor { spec, json } => commands::code_for(root, &spec, json),
        Commands::TestsFor { ids, diff, json } => {
            commands::tests_for(root, ids, diff.as_deref(), json)
        }
        Commands::Update { changes, facts } => commands::update(root, &changes, facts.as_deref()),
        Commands::Export {
            output,
            kind,
            focal,
            depth,
            pretty,
        } => commands::export(root, output.as_deref(), kind, focal, depth, pretty),
        Commands::Import { file } => commands::import(root, &file),
        Commands::Status => commands::status(root),
        Commands::Serve { port, headless } => commands::serve(root, port, headless).await,
        Commands::Mcp => commands::mcp(root).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

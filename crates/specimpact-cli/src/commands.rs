//! CLI command implementations.

use crate::diff::changed_files;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use specimpact_graph::{
    CancellationToken, ExportOptions, FactsFile, GraphBuilder, GraphConfig, GraphHandle,
    GraphStore, ImpactSeverity, ImpactedNode, IncrementalUpdate, NodeKind, SnapshotStore,
};
use specimpact_mcp::McpServer;
use specimpact_server::{ImpactServer, ServerConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

const STATE_DIR: &str = ".specimpact";

/// Paths under `<root>/.specimpact`.
struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn new(root: &Path) -> Self {
        Self {
            dir: root.join(STATE_DIR),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join("graph.db")
    }

    fn config(&self) -> Result<GraphConfig> {
        Ok(GraphConfig::load(self.config_path())?)
    }

    fn snapshots(&self) -> Result<SnapshotStore> {
        fs::create_dir_all(&self.dir)?;
        Ok(SnapshotStore::open(self.snapshot_path())?)
    }

    /// Loads the saved graph, failing when nothing has been built yet.
    fn load_graph(&self) -> Result<GraphStore> {
        match self.snapshots()?.load()? {
            Some(graph) => Ok(graph),
            None => Err(format!(
                "No graph found in {}. Run `specimpact build --facts <file>` first",
                self.dir.display()
            )
            .into()),
        }
    }
}

/// Merges ids from the command line with the files named in a diff.
fn collect_changed(ids: Vec<String>, diff: Option<&Path>) -> Result<Vec<String>> {
    let mut changed = ids;
    if let Some(path) = diff {
        let text = fs::read_to_string(path)?;
        let files = changed_files(&text);
        debug!("{} files changed in {}", files.len(), path.display());
        changed.extend(files);
    }
    changed.sort();
    changed.dedup();

    if changed.is_empty() {
        return Err("No changed ids given (pass ids or --diff <file>)".into());
    }
    Ok(changed)
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(message);
    Ok(spinner)
}

/// Initialize SpecImpact in a project root.
pub fn init(root: &Path) -> Result<()> {
    let workspace = Workspace::new(root);

    if workspace.config_path().exists() {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    fs::create_dir_all(&workspace.dir)?;
    GraphConfig::default().save(workspace.config_path())?;

    println!("{} Initialized SpecImpact in {}", "✓".green(), root.display());
    println!(
        "  Run {} to build the graph",
        "specimpact build --facts <file>".cyan()
    );

    Ok(())
}

/// Build the graph from a facts file and save it.
pub fn build(root: &Path, facts: &Path) -> Result<()> {
    let workspace = Workspace::new(root);
    let config = workspace.config()?;
    let start = Instant::now();

    println!("{}", "Building impact graph...".cyan());
    let spinner = spinner("Reading facts...")?;

    let builder = GraphBuilder::new(config).with_source(FactsFile::new(facts));
    let graph = match builder.build(&CancellationToken::new()) {
        Ok(graph) => graph,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e.into());
        }
    };

    spinner.set_message("Saving snapshot...");
    workspace.snapshots()?.save(&graph)?;
    spinner.finish_and_clear();

    let stats = graph.stats();
    println!(
        "{} Built graph ({} nodes, {} edges) in {}ms",
        "✓".green(),
        stats.node_count.to_string().cyan(),
        stats.edge_count.to_string().cyan(),
        start.elapsed().as_millis()
    );
    if stats.suggested_edges > 0 {
        println!(
            "  {} {} links below the {} confidence threshold are suggested",
            "⚠".yellow(),
            stats.suggested_edges,
            stats.threshold
        );
    }

    Ok(())
}

fn print_nodes(title: &str, nodes: &[ImpactedNode]) {
    println!("{} ({})", title.bold(), nodes.len());
    if nodes.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for node in nodes {
        let confidence = format!("{:.2}", node.confidence);
        let confidence = match node.severity {
            ImpactSeverity::Direct => confidence.red(),
            ImpactSeverity::Transitive => confidence.yellow(),
            ImpactSeverity::Distant => confidence.dimmed(),
        };
        print!(
            "  • {} {} {}",
            node.id.cyan(),
            confidence,
            format!("({} hop, via {})", node.hops, node.via).dimmed()
        );
        if node.suggested {
            print!(" {}", "[suggested]".yellow());
        }
        println!();
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Show everything a change affects.
pub fn impact(
    root: &Path,
    ids: Vec<String>,
    diff: Option<&Path>,
    depth: Option<usize>,
    suggested: bool,
    json: bool,
) -> Result<()> {
    let changed = collect_changed(ids, diff)?;
    let graph = Workspace::new(root).load_graph()?;
    let depth = depth.unwrap_or(graph.config().default_depth);
    let include_suggested = suggested || graph.config().include_suggested;

    let start = Instant::now();
    let impact = graph.query_impact(&changed, depth, include_suggested);
    let elapsed = start.elapsed().as_millis();

    if json {
        return print_json(&serde_json::json!({
            "changed": changed,
            "depth": depth,
            "specs": impact.specs,
            "code": impact.code,
            "tests": impact.tests,
            "totalAffected": impact.total(),
            "queryTime": elapsed as u64
        }));
    }

    println!("{}", "Impact".yellow().bold());
    println!("Changed: {}", changed.join(", ").cyan());
    println!(
        "Total: {} affected within {} hops",
        impact.total().to_string().bold(),
        depth
    );
    println!();
    print_nodes("Specs", &impact.specs);
    println!();
    print_nodes("Code", &impact.code);
    println!();
    print_nodes("Tests", &impact.tests);
    println!();
    println!("Query time: {}ms", elapsed);

    Ok(())
}

/// Show the specs a code file implements.
pub fn specs_for(root: &Path, file: &str, transitive: bool, json: bool) -> Result<()> {
    let graph = Workspace::new(root).load_graph()?;
    let specs = graph.query_specs_for_code(file, transitive)?;

    if json {
        return print_json(&specs);
    }
    print_nodes(&format!("Specs for {}", file), &specs);
    Ok(())
}

/// Show the code that implements a spec.
pub fn code_for(root: &Path, spec: &str, json: bool) -> Result<()> {
    let graph = Workspace::new(root).load_graph()?;
    let code = graph.query_code_for_spec(spec)?;

    if json {
        return print_json(&code);
    }
    print_nodes(&format!("Code for {}", spec), &code);
    Ok(())
}

/// Select the tests to run for a change.
pub fn tests_for(root: &Path, ids: Vec<String>, diff: Option<&Path>, json: bool) -> Result<()> {
    let changed = collect_changed(ids, diff)?;
    let graph = Workspace::new(root).load_graph()?;
    let tests = graph.query_tests_for_change(&changed);

    if json {
        return print_json(&tests);
    }
    print_nodes("Tests to run", &tests);
    Ok(())
}

/// Apply an incremental update to the saved graph.
pub fn update(root: &Path, changes: &Path, facts: Option<&Path>) -> Result<()> {
    let workspace = Workspace::new(root);
    let mut update: IncrementalUpdate = serde_json::from_str(&fs::read_to_string(changes)?)?;

    if let Some(facts) = facts {
        let builder = GraphBuilder::new(workspace.config()?).with_source(FactsFile::new(facts));
        update = builder.refresh(update)?;
    }

    let snapshots = workspace.snapshots()?;
    let mut graph = match snapshots.load()? {
        Some(graph) => graph,
        None => return Err("No graph found. Run `specimpact build --facts <file>` first".into()),
    };

    let summary = graph.update_incremental(update)?;
    snapshots.save(&graph)?;

    println!(
        "{} Updated graph: {} edges removed, {} nodes removed, {} nodes and {} edges upserted",
        "✓".green(),
        summary.edges_removed,
        summary.nodes_removed,
        summary.nodes_upserted,
        summary.edges_upserted
    );
    Ok(())
}

/// Export the saved graph.
pub fn export(
    root: &Path,
    output: Option<&Path>,
    kind: Option<NodeKind>,
    focal: Option<String>,
    depth: Option<usize>,
    pretty: bool,
) -> Result<()> {
    let graph = Workspace::new(root).load_graph()?;

    let mut options = ExportOptions::default();
    if pretty {
        options = options.pretty();
    }
    if let Some(kind) = kind {
        options = options.kind(kind);
    }
    if let Some(focal) = focal {
        options = options.focal(focal, depth);
    }

    let bytes = graph.export(&options)?;
    match output {
        Some(path) => {
            fs::write(path, &bytes)?;
            println!("{} Exported to {}", "✓".green(), path.display());
        }
        None => println!("{}", String::from_utf8_lossy(&bytes)),
    }
    Ok(())
}

/// Replace the saved graph with an export document.
pub fn import(root: &Path, file: &Path) -> Result<()> {
    let workspace = Workspace::new(root);
    let config = workspace.config()?;
    let graph = GraphStore::import(&fs::read(file)?, &config)?;

    workspace.snapshots()?.save(&graph)?;
    println!(
        "{} Imported {} nodes and {} edges from {}",
        "✓".green(),
        graph.node_count(),
        graph.edge_count(),
        file.display()
    );
    Ok(())
}

/// Show graph status.
pub fn status(root: &Path) -> Result<()> {
    let workspace = Workspace::new(root);

    if !workspace.dir.exists() {
        println!("{} SpecImpact not initialized in this directory", "✗".red());
        println!("  Run {} to initialize", "specimpact init".cyan());
        return Ok(());
    }

    println!("{}", "SpecImpact Status".cyan().bold());
    println!();

    let Some(graph) = workspace.snapshots()?.load()? else {
        println!("  {} no graph built yet", "Graph:".dimmed());
        return Ok(());
    };

    let stats = graph.stats();
    println!("  {} {}", "Nodes:".dimmed(), stats.node_count);
    for (kind, count) in &stats.by_kind {
        println!("    {} {}", format!("{}:", kind).dimmed(), count);
    }
    println!("  {} {}", "Edges:".dimmed(), stats.edge_count);
    for (relationship, count) in &stats.by_relationship {
        println!("    {} {}", format!("{}:", relationship).dimmed(), count);
    }
    println!("  {} {}", "Manual links:".dimmed(), stats.manual_edges);
    println!(
        "  {} {} edges, {} nodes",
        "Suggested:".dimmed(),
        stats.suggested_edges,
        stats.suggested_nodes
    );
    println!("  {} {}", "Threshold:".dimmed(), stats.threshold);

    Ok(())
}

/// Start the WebSocket server over the saved graph.
pub async fn serve(root: &Path, port: u16, headless: bool) -> Result<()> {
    let bind_addr = if headless { "0.0.0.0" } else { "127.0.0.1" };

    if headless {
        println!("{}", "Starting SpecImpact server in headless mode...".cyan());
    } else {
        println!("{}", "Starting SpecImpact server...".cyan());
    }

    let workspace = Workspace::new(root);
    let snapshots = workspace.snapshots()?;
    let graph = match snapshots.load()? {
        Some(graph) => graph,
        None => {
            println!("{} No graph built yet, serving an empty one", "⚠".yellow());
            GraphStore::with_config(&workspace.config()?)
        }
    };
    println!(
        "{} Loaded graph ({} nodes, {} edges)",
        "✓".green(),
        graph.node_count(),
        graph.edge_count()
    );

    let addr = format!("{}:{}", bind_addr, port).parse()?;
    let config = ServerConfig { addr };
    let server = ImpactServer::new(GraphHandle::new(graph), config);
    let handle = server.graph();

    println!("{} Listening on ws://{}:{}", "✓".green(), bind_addr, port);
    if headless {
        println!("  Headless mode: accepting connections from any host");
    }
    println!("  Press {} to stop", "Ctrl+C".cyan());

    tokio::select! {
        result = server.run() => {
            result.map_err(|e| e.to_string())?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down, saving snapshot");
            snapshots.save(&handle.read())?;
            println!("{} Saved graph", "✓".green());
        }
    }

    Ok(())
}

/// Start the MCP server on stdio. Nothing but protocol goes to stdout.
pub async fn mcp(root: &Path) -> Result<()> {
    let graph = Workspace::new(root).load_graph()?;
    eprintln!(
        "{} SpecImpact MCP server ({} nodes, {} edges)",
        "✓".green(),
        graph.node_count(),
        graph.edge_count()
    );

    let server = McpServer::new(GraphHandle::new(graph));
    server.run_stdio().await.map_err(|e| e.to_string())?;
    Ok(())
}

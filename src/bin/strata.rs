use clap::{Parser, Subcommand};
use serde::Serialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use strata_oplog::{
    CreateNode, FileStore, Node, NodeId, OpKind, OpStore, Operation, Session, SessionConfig,
    SessionError, StoreError, Timestamp,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

const DEFAULT_DIR: &str = ".strata";

#[derive(Parser)]
#[command(author, version, about = "Outline tree backed by an append-only operation log", long_about = None)]
struct Cli {
    /// Store directory (defaults to ./.strata)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// JSON file overriding session settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an empty outline
    Init,
    /// Add a node (appended to the end of its parent unless --after is given)
    Add {
        text: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Replace a node's text
    Edit { node: String, text: String },
    /// Move a node under a new parent (root when omitted)
    Mv {
        node: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        after: Option<String>,
    },
    /// Tombstone a node
    Rm { node: String },
    /// Bring back a tombstoned node
    Restore { node: String },
    /// Set a node's status
    Status { node: String, status: String },
    /// Add a tag
    Tag { node: String, tag: String },
    /// Remove a tag
    Untag { node: String, tag: String },
    /// Set a due date in epoch milliseconds, or clear it when omitted
    Due { node: String, at: Option<Timestamp> },
    /// Toggle a node's collapsed flag
    Collapse { node: String },
    /// Print the outline
    Show {
        #[arg(long)]
        json: bool,
        /// Include tombstoned nodes
        #[arg(long)]
        all: bool,
    },
    /// Print the operation log
    Log {
        #[arg(long)]
        json: bool,
    },
    /// Snapshot the current tree and drop the operations it covers
    Compact,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("no outline at {}; run `strata init` first", .0.display())]
    NotInitialized(PathBuf),
    #[error("no node matches {0:?}")]
    NoSuchNode(String),
    #[error("{0:?} matches more than one node")]
    AmbiguousNode(String),
    #[error("invalid config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShownNode<'a> {
    depth: usize,
    #[serde(flatten)]
    node: &'a Node,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("STRATA_LOG")
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let dir = match cli.dir {
        Some(dir) => dir,
        None => env::current_dir()
            .map_err(StoreError::from)?
            .join(DEFAULT_DIR),
    };

    if matches!(cli.command, Commands::Init) && !FileStore::exists(&dir) {
        FileStore::open(&dir)?;
        println!("Initialized outline at {}", dir.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let mut session = open_session(&dir, config)?;

    match cli.command {
        Commands::Init => {
            println!("Already initialized at {}", dir.display());
            Ok(())
        }
        Commands::Add {
            text,
            parent,
            after,
            status,
            tags,
        } => add_command(&mut session, text, parent, after, status, tags),
        Commands::Edit { node, text } => {
            let node = resolve(&session, &node)?;
            session.submit(OpKind::update_text(node, text))?;
            Ok(())
        }
        Commands::Mv {
            node,
            parent,
            after,
        } => {
            let node = resolve(&session, &node)?;
            let parent = resolve_opt(&session, parent.as_deref())?;
            let after = resolve_opt(&session, after.as_deref())?;
            match after {
                Some(after) => session.move_node(node, parent, Some(after))?,
                None => {
                    let pos = session.state().rank_last(parent).map_err(SessionError::from)?;
                    session.submit(OpKind::move_to(node, parent, pos))?
                }
            };
            Ok(())
        }
        Commands::Rm { node } => {
            let node = resolve(&session, &node)?;
            session.delete_node(node)?;
            Ok(())
        }
        Commands::Restore { node } => {
            let node = resolve(&session, &node)?;
            session.restore_node(node)?;
            Ok(())
        }
        Commands::Status { node, status } => {
            let node = resolve(&session, &node)?;
            session.set_status(node, status)?;
            Ok(())
        }
        Commands::Tag { node, tag } => {
            let node = resolve(&session, &node)?;
            session.add_tag(node, tag)?;
            Ok(())
        }
        Commands::Untag { node, tag } => {
            let node = resolve(&session, &node)?;
            session.remove_tag(node, tag)?;
            Ok(())
        }
        Commands::Due { node, at } => {
            let node = resolve(&session, &node)?;
            session.set_due_date(node, at)?;
            Ok(())
        }
        Commands::Collapse { node } => {
            let node = resolve(&session, &node)?;
            session.toggle_collapsed(node)?;
            Ok(())
        }
        Commands::Show { json, all } => show_command(&session, json, all),
        Commands::Log { json } => log_command(&session, json),
        Commands::Compact => {
            session.snapshot_now()?;
            let dropped = session.store_mut().compact()?;
            println!(
                "Compacted: snapshot at seq {}, dropped {dropped} operations",
                session.state().last_seq()
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig, CliError> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let text = fs::read_to_string(path).map_err(|err| CliError::Config {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|err| CliError::Config {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn open_session(dir: &Path, config: SessionConfig) -> Result<Session<FileStore>, CliError> {
    if !FileStore::exists(dir) {
        return Err(CliError::NotInitialized(dir.to_path_buf()));
    }
    let store = FileStore::open(dir)?;
    Ok(Session::init(store, config)?)
}

fn add_command(
    session: &mut Session<FileStore>,
    text: String,
    parent: Option<String>,
    after: Option<String>,
    status: Option<String>,
    tags: Vec<String>,
) -> Result<(), CliError> {
    let parent = resolve_opt(session, parent.as_deref())?;
    let after = resolve_opt(session, after.as_deref())?;
    let pos = match after {
        Some(after) => session.state().rank_after(parent, Some(after)),
        None => session.state().rank_last(parent),
    }
    .map_err(SessionError::from)?;

    let mut create = CreateNode::new(parent, pos).with_text(text).with_tags(tags);
    if let Some(status) = status {
        create = create.with_status(status);
    }
    let node_id = create.node_id;
    session.submit(create.into())?;
    println!("{node_id}");
    Ok(())
}

fn show_command(session: &Session<FileStore>, json: bool, all: bool) -> Result<(), CliError> {
    let state = session.state();
    let outline = if all {
        state.outline_all()
    } else {
        state.outline()
    };

    if json {
        let nodes: Vec<ShownNode<'_>> = outline
            .iter()
            .map(|entry| ShownNode {
                depth: entry.depth,
                node: entry.node,
            })
            .collect();
        let output = serde_json::json!({
            "lastSeq": state.last_seq(),
            "nodes": nodes,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if outline.is_empty() {
        println!("Outline is empty.");
        return Ok(());
    }
    for entry in outline {
        println!("{}", render_line(entry.depth, entry.node));
    }
    Ok(())
}

fn render_line(depth: usize, node: &Node) -> String {
    let mut line = format!(
        "{}- [{}] {}",
        "  ".repeat(depth),
        node.status,
        node.title()
    );
    for tag in &node.tags {
        line.push_str(&format!(" #{tag}"));
    }
    if node.collapsed {
        line.push_str(" (collapsed)");
    }
    if node.deleted {
        line.push_str(" (deleted)");
    }
    line.push_str(&format!("  {}", short_id(node.id)));
    line
}

fn log_command(session: &Session<FileStore>, json: bool) -> Result<(), CliError> {
    let ops: Vec<Operation> = session.store().load_ops_since(0)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ops)?);
        return Ok(());
    }
    for op in &ops {
        println!(
            "{:>6}  {:<16} {}  ts={}",
            op.seq,
            op.op_type().as_str(),
            short_id(op.node_id()),
            op.ts
        );
    }
    Ok(())
}

fn short_id(id: NodeId) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Accepts a full node id or any unique prefix of its hex form.
fn resolve(session: &Session<FileStore>, text: &str) -> Result<NodeId, CliError> {
    if let Ok(id) = text.parse::<NodeId>()
        && session.state().contains(id)
    {
        return Ok(id);
    }
    let needle = text.replace('-', "").to_ascii_lowercase();
    if needle.is_empty() {
        return Err(CliError::NoSuchNode(text.to_string()));
    }
    let mut matches = session
        .state()
        .iter()
        .filter(|node| node.id.simple().to_string().starts_with(&needle))
        .map(|node| node.id);
    match (matches.next(), matches.next()) {
        (Some(id), None) => Ok(id),
        (Some(_), Some(_)) => Err(CliError::AmbiguousNode(text.to_string())),
        (None, _) => Err(CliError::NoSuchNode(text.to_string())),
    }
}

fn resolve_opt(session: &Session<FileStore>, text: Option<&str>) -> Result<Option<NodeId>, CliError> {
    text.map(|text| resolve(session, text)).transpose()
}

//! eventgit command-line interface
//!
//! Operates on a directory-backed repository (`--repo`, default
//! `.eventgit`). Remotes are other repository directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use eventgit::config::CONFIG_FILE;
use eventgit::{
    Event, EventRegistry, FileStore, MergeOutcome, Remote, Repository, RepositoryConfig, StorageError,
    VcsError, VcsResult,
};

#[derive(Parser)]
#[command(name = "eventgit", about = "Version control for JSON objects", version)]
struct Cli {
    /// Repository directory
    #[arg(long, global = true, default_value = ".eventgit")]
    repo: PathBuf,

    /// Operate on this branch instead of the default one
    #[arg(long, short, global = true)]
    branch: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new repository
    Init {
        /// Scope mixed into commit ids (default: a fresh ULID)
        #[arg(long)]
        scope: Option<String>,

        /// Author recorded on commits
        #[arg(long)]
        author: Option<String>,

        /// Name of the default branch
        #[arg(long, default_value = "main")]
        default_branch: String,
    },

    /// Show the checked-out commit and working state summary
    Status,

    /// Show first-parent history
    Log {
        /// Maximum number of commits
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show a commit record
    Show {
        #[arg(default_value = "HEAD")]
        revision: String,
    },

    /// Print the materialized state at a revision
    State {
        #[arg(default_value = "HEAD")]
        revision: String,
    },

    /// Create or delete a branch
    Branch {
        name: String,

        /// Delete instead of create
        #[arg(long, short)]
        delete: bool,
    },

    /// List branches and tags
    Branches,

    /// Tag the current commit
    Tag { name: String },

    /// Apply one event, or a JSON array of events from a file, and commit
    Apply {
        /// Event name
        #[arg(required_unless_present = "file")]
        event: Option<String>,

        /// Event payload as JSON
        #[arg(default_value = "{}")]
        payload: String,

        /// File holding `[{"name": ..., "payload": ...}, ...]`
        #[arg(long, short, conflicts_with = "event")]
        file: Option<PathBuf>,

        /// Commit message
        #[arg(long, short)]
        message: Option<String>,
    },

    /// Merge a revision into the current branch
    Merge { source: String },

    /// Push the current branch to a remote repository directory
    Push {
        remote: PathBuf,

        /// Name used for tracking refs
        #[arg(long, default_value = "origin")]
        name: String,

        /// Overwrite a diverged remote branch
        #[arg(long)]
        force: bool,
    },

    /// Fast-forward the current branch from a remote repository directory
    Pull {
        remote: PathBuf,

        #[arg(long, default_value = "origin")]
        name: String,
    },

    /// Update tracking refs from a remote repository directory
    Fetch {
        remote: PathBuf,

        #[arg(long, default_value = "origin")]
        name: String,
    },

    /// Snapshot the current commit
    Snapshot {
        /// Ignore the minimum snapshot interval
        #[arg(long)]
        force: bool,
    },

    /// Collect old snapshots
    Gc {
        /// Recent snapshots to keep (default: from config)
        #[arg(long)]
        keep: Option<usize>,

        /// Report without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Show repository statistics and snapshot coverage
    Stats,

    /// Compare the states at two revisions
    Diff {
        from: String,

        #[arg(default_value = "HEAD")]
        to: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        for hint in e.suggestions() {
            eprintln!("  hint: {}", hint);
        }
        std::process::exit(e.exit_code());
    }
}

fn run(cli: &Cli) -> VcsResult<()> {
    match &cli.command {
        Command::Init {
            scope,
            author,
            default_branch,
        } => init(cli, scope.as_deref(), author.as_deref(), default_branch),
        Command::Status => {
            let repo = open(cli)?;
            println!("On {}", repo.head());
            println!("Commit: {}", repo.commit_id());
            println!("Entries: {}", repo.state().len());
            println!("Meta keys: {}", repo.state().meta.len());
            Ok(())
        }
        Command::Log { limit } => {
            let repo = open(cli)?;
            for commit in repo.log(*limit)? {
                println!(
                    "{} {} {} ({})",
                    commit.id.short(),
                    commit.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    commit.summary(),
                    commit.author
                );
            }
            Ok(())
        }
        Command::Show { revision } => {
            let commit = open(cli)?.show(revision)?;
            print_json(&commit)
        }
        Command::State { revision } => {
            let state = open(cli)?.state_at(revision)?;
            print_json(&state)
        }
        Command::Branch { name, delete } => {
            let repo = open(cli)?;
            if *delete {
                repo.delete_branch(name)?;
                println!("Deleted branch {}", name);
            } else {
                let repo = repo.branch(name)?;
                println!("Created branch {} at {}", name, repo.commit_id().short());
            }
            Ok(())
        }
        Command::Branches => {
            let repo = open(cli)?;
            for r in repo.branches()? {
                let marker = if repo.branch_name() == Some(&r.name) { "*" } else { " " };
                println!("{} {} {}", marker, r.name, r.commit_id.short());
            }
            for r in repo.tags()? {
                println!("  tag {} {}", r.name, r.commit_id.short());
            }
            Ok(())
        }
        Command::Tag { name } => {
            let tag = open(cli)?.tag(name)?;
            println!("Tagged {} as {}", tag.commit_id.short(), tag.name);
            Ok(())
        }
        Command::Apply {
            event,
            payload,
            file,
            message,
        } => {
            let events = match (event, file) {
                (_, Some(path)) => read_events(path)?,
                (Some(name), None) => vec![Event::new(name.as_str(), parse_json(payload)?)],
                (None, None) => {
                    return Err(VcsError::Config("an event name or --file is required".to_string()))
                }
            };
            let mut repo = open(cli)?;
            for event in events {
                repo = repo.apply(event)?;
            }
            let repo = repo.commit(message.as_deref())?;
            println!("[{}] {}", repo.head(), repo.commit_id().short());
            Ok(())
        }
        Command::Merge { source } => {
            let (repo, outcome) = open(cli)?.merge(source)?;
            match outcome {
                MergeOutcome::UpToDate => println!("Already up to date"),
                MergeOutcome::FastForward { from, to } => {
                    println!("Fast-forward {}..{}", from.short(), to.short())
                }
                MergeOutcome::Merged { commit, .. } => {
                    println!("Merged {} into {} as {}", source, repo.head(), commit.short())
                }
            }
            Ok(())
        }
        Command::Push { remote, name, force } => {
            let report = open(cli)?.push(&open_remote(name, remote)?, *force)?;
            println!("{}", report);
            Ok(())
        }
        Command::Pull { remote, name } => {
            let (_, report) = open(cli)?.pull(&open_remote(name, remote)?)?;
            println!("{}", report);
            Ok(())
        }
        Command::Fetch { remote, name } => {
            let report = open(cli)?.fetch(&open_remote(name, remote)?)?;
            println!("{}", report);
            Ok(())
        }
        Command::Snapshot { force } => {
            let repo = open(cli)?;
            if *force {
                println!("Snapshot {}", repo.force_snapshot()?.short());
            } else {
                match repo.snapshot()? {
                    Some(state_id) => println!("Snapshot {}", state_id.short()),
                    None => println!("Skipped: a snapshot is within the minimum interval"),
                }
            }
            Ok(())
        }
        Command::Gc { keep, dry_run } => {
            let repo = open(cli)?;
            let report = if *dry_run {
                repo.gc_dry_run(*keep)?
            } else {
                repo.gc(*keep)?
            };
            println!("{}", report);
            Ok(())
        }
        Command::Stats => {
            let repo = open(cli)?;
            println!("{}", repo.stats()?);
            let coverage = repo.coverage()?;
            println!(
                "  Max Replay Distance: {}\n  Avg Replay Distance: {:.1}",
                coverage.max_replay_distance, coverage.avg_replay_distance
            );
            for recommendation in coverage.recommendations {
                println!("  hint: {}", recommendation);
            }
            Ok(())
        }
        Command::Diff { from, to } => {
            println!("{}", open(cli)?.diff(from, to)?);
            Ok(())
        }
    }
}

fn init(cli: &Cli, scope: Option<&str>, author: Option<&str>, default_branch: &str) -> VcsResult<()> {
    let mut config = match scope {
        Some(scope) => RepositoryConfig::new(scope),
        None => RepositoryConfig::generated(),
    };
    if let Some(author) = author {
        config = config.author(author);
    }
    config = config.default_branch(default_branch);
    config.validate()?;

    let store = FileStore::init(&cli.repo)?;
    config.save(cli.repo.join(CONFIG_FILE))?;
    let repo = Repository::init(Arc::new(store), Arc::new(EventRegistry::with_builtins()), config)?;
    println!(
        "Initialized repository in {} on {} at {}",
        cli.repo.display(),
        repo.head(),
        repo.commit_id().short()
    );
    Ok(())
}

fn open(cli: &Cli) -> VcsResult<Repository> {
    let store = FileStore::open(&cli.repo)?;
    let config = RepositoryConfig::load(cli.repo.join(CONFIG_FILE))?;
    let repo = Repository::open(Arc::new(store), Arc::new(EventRegistry::with_builtins()), config)?;
    match &cli.branch {
        Some(branch) => repo.checkout(branch),
        None => Ok(repo),
    }
}

fn open_remote(name: &str, path: &Path) -> VcsResult<Remote> {
    let store = FileStore::open(path)?;
    Ok(Remote::new(name, Arc::new(store)))
}

fn parse_json(text: &str) -> VcsResult<Value> {
    Ok(serde_json::from_str(text).map_err(StorageError::from)?)
}

fn read_events(path: &Path) -> VcsResult<Vec<Event>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text).map_err(StorageError::from)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> VcsResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(StorageError::from)?;
    println!("{}", text);
    Ok(())
}

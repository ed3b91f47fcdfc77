//! reposync - manifest-driven multi-repository sync
//!
//! Main entry point for the reposync CLI.

use anyhow::Context;
use clap::{Parser, Subcommand};
use reposync::config::{validate_config_result, ReposyncConfig};
use reposync::logging::{self, Verbosity};
use reposync::manifest::Manifest;
use reposync::project::ProjectManager;
use reposync::report::ConsoleReporter;
use reposync::sync::{ProjectState, SyncEngine, SyncOptions};
use reposync::workspace::Workspace;
use reposync::ReposyncError;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// reposync - keep a tree of git repositories in step with a manifest
#[derive(Parser, Debug)]
#[command(name = "reposync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Manifest file (default: .repo/manifest.xml, else the configured manifest)
    #[arg(short, long, global = true)]
    manifest: Option<PathBuf>,

    /// Path to config file (default: .repo/reposync.yaml, then ~/.config/reposync/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch and check out every project in the manifest
    Sync(SyncArgs),

    /// List projects as `path : name`
    List {
        /// Restrict to these groups (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        groups: Vec<String>,
    },

    /// Print the resolved manifest
    Manifest {
        /// Emit JSON instead of XML
        #[arg(long)]
        json: bool,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct SyncArgs {
    /// Projects to sync, by name or path (default: all)
    projects: Vec<String>,

    /// Parallel jobs for both phases
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Parallel fetch jobs
    #[arg(long)]
    jobs_network: Option<usize>,

    /// Parallel checkout jobs
    #[arg(long)]
    jobs_checkout: Option<usize>,

    /// Fetch only
    #[arg(short = 'n', long)]
    network_only: bool,

    /// Check out only, using what is already fetched
    #[arg(short = 'l', long)]
    local_only: bool,

    /// Stop at the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Discard local changes that block checkout
    #[arg(long)]
    force_sync: bool,

    /// Prune checkouts even when they have uncommitted changes
    #[arg(long)]
    force_remove_dirty: bool,

    /// Keep checkouts of projects removed from the manifest
    #[arg(long)]
    no_prune: bool,

    /// Restrict to these groups (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    groups: Vec<String>,

    /// Use the manifest server's approved manifest
    #[arg(short = 's', long)]
    smart_sync: bool,

    /// Use the manifest server's manifest for this tag
    #[arg(short = 't', long)]
    smart_tag: Option<String>,

    /// Fetch only projects the manifest server reports as changed
    #[arg(long)]
    hyper_sync: bool,

    /// Pin revisions from the superproject
    #[arg(long)]
    use_superproject: bool,

    /// Branch sent to the manifest server
    #[arg(long)]
    manifest_branch: Option<String>,

    #[arg(short, long)]
    quiet: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let verbosity = match cli.command {
        Commands::Sync(ref args) => Verbosity::from_flags(args.quiet, args.verbose),
        _ => Verbosity::default(),
    };
    if let Err(e) = logging::init(verbosity) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("cannot read current directory")?;
    let workspace = Workspace::find(&cwd).unwrap_or_else(|| Workspace::new(&cwd));

    let config = match cli.config {
        Some(ref path) => ReposyncConfig::load(path)?,
        None => ReposyncConfig::load_for(&workspace)?,
    };
    validate_config_result(&config)?;

    let manifest_path = cli
        .manifest
        .clone()
        .unwrap_or_else(|| default_manifest_path(&workspace, &config));

    match cli.command {
        Commands::Sync(args) => {
            let options = sync_options(&config, args);
            let runner = Arc::new(gitcmd::Git::new()?);
            let mut engine = SyncEngine::new(workspace, manifest_path, runner)
                .with_reporter(Arc::new(ConsoleReporter));

            let cancel = engine.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Interrupted, stopping after running jobs finish");
                    cancel.cancel();
                }
            });

            match engine.sync(options).await {
                Ok(summary) => {
                    tracing::info!(
                        pruned = summary.pruned,
                        fetched = summary.fetched,
                        checked_out = summary.checked_out,
                        "Sync complete"
                    );
                    for (path, state) in &summary.states {
                        tracing::debug!(path = %path, state = %state, "Project state");
                    }
                }
                Err(ReposyncError::SyncFailed { failed }) => {
                    eprintln!();
                    eprintln!("Failing projects:");
                    for message in engine.errors() {
                        eprintln!("  {}", message);
                    }
                    let unfinished: Vec<_> = engine
                        .project_states()
                        .into_iter()
                        .filter(|(_, state)| *state != ProjectState::Synced)
                        .collect();
                    if !unfinished.is_empty() {
                        eprintln!("Not synced:");
                        for (path, state) in unfinished {
                            eprintln!("  {:<40} {}", path, state);
                        }
                    }
                    anyhow::bail!("sync failed for {} project(s)", failed);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::List { groups } => {
            let manifest = Manifest::from_file(&manifest_path, &groups)
                .with_context(|| format!("loading {}", manifest_path.display()))?;
            let runner = Arc::new(gitcmd::Git::new()?);
            let manager = ProjectManager::new(Arc::new(manifest), workspace, runner);
            for project in manager.projects() {
                println!("{} : {}", project.relpath, project.name);
            }
        }

        Commands::Manifest { json, output } => {
            let manifest = Manifest::from_file(&manifest_path, &[])
                .with_context(|| format!("loading {}", manifest_path.display()))?;
            let rendered = if json {
                manifest.to_json()?
            } else {
                manifest.to_xml()?
            };
            match output {
                Some(path) => std::fs::write(&path, rendered)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => print!("{}", rendered),
            }
        }
    }

    Ok(())
}

/// `.repo/manifest.xml` when present, otherwise the configured manifest under `.repo/manifests/`
fn default_manifest_path(workspace: &Workspace, config: &ReposyncConfig) -> PathBuf {
    let linked = workspace.manifest_path(None);
    if linked.exists() {
        linked
    } else {
        workspace.manifest_path(Some(&config.manifest_name))
    }
}

fn sync_options(config: &ReposyncConfig, args: SyncArgs) -> SyncOptions {
    let mut options = SyncOptions::from_config(config);

    if let Some(jobs) = args.jobs {
        options.jobs_network = jobs.max(1);
        options.jobs_checkout = jobs.max(1);
    }
    if let Some(jobs) = args.jobs_network {
        options.jobs_network = jobs.max(1);
    }
    if let Some(jobs) = args.jobs_checkout {
        options.jobs_checkout = jobs.max(1);
    }

    options.projects = args.projects;
    options.network_only = args.network_only;
    options.local_only = args.local_only;
    options.fail_fast = args.fail_fast;
    options.force_sync = args.force_sync;
    options.force_remove_dirty = args.force_remove_dirty;
    options.prune = !args.no_prune;
    options.groups = args.groups;
    options.smart_sync = args.smart_sync;
    options.smart_tag = args.smart_tag;
    options.hyper_sync = args.hyper_sync;
    options.use_superproject = options.use_superproject || args.use_superproject;
    options.manifest_branch = args.manifest_branch;
    options.quiet = args.quiet;
    options.verbose = args.verbose;
    options
}

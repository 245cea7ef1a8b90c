use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nntp_poster::{Config, PostError, PostSource, Poster, RunOptions, RunSummary};

/// Post binary files to Usenet with yEnc encoding.
#[derive(Debug, Parser)]
#[command(name = "nntp-poster", version)]
#[command(about = "Post directories or files to a newsgroup; -f posts files under one subject.")]
struct Cli {
    /// Config file. Default: ~/.nntp-poster.toml
    #[arg(long, short = 'c', value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Post the given files under this subject instead of posting directories.
    #[arg(long = "files", short = 'f', value_name = "SUBJECT")]
    subject: Option<String>,

    /// Newsgroup or alias to post to. Default: posting.default_group
    #[arg(long, short = 'g', value_name = "GROUP")]
    group: Option<String>,

    /// Debug logging.
    #[arg(long, short = 'd')]
    debug: bool,

    /// Do not print the progress line.
    #[arg(long)]
    no_progress: bool,

    /// Directories to post, or files with -f.
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,
}

impl Cli {
    /// Keep only paths of the kind this mode posts
    fn valid_paths(&self) -> Vec<PathBuf> {
        let want_files = self.subject.is_some();
        self.paths
            .iter()
            .filter(|path| {
                let ok = if want_files { path.is_file() } else { path.is_dir() };
                if !ok {
                    let kind = if want_files { "file" } else { "directory" };
                    error!("\"{}\" is not a {}!", path.display(), kind);
                }
                ok
            })
            .cloned()
            .collect()
    }

    fn source(&self, paths: Vec<PathBuf>) -> PostSource {
        match &self.subject {
            Some(title) => PostSource::Files {
                title: title.clone(),
                files: paths,
            },
            None => PostSource::Directories(paths),
        }
    }
}

/// Map a finished run to the process outcome
///
/// Only setup failures end the process with an error. A run that lost every
/// connection has already flushed its NZB and is reported in the log.
fn finish(outcome: nntp_poster::Result<RunSummary>) -> Result<()> {
    match outcome {
        Ok(summary) => {
            for nzb in &summary.nzb_files {
                info!("NZB written to {}", nzb.display());
            }
            Ok(())
        }
        Err(PostError::AllConnectionsFailed) => {
            error!("Posting stopped: {}", PostError::AllConnectionsFailed);
            Ok(())
        }
        Err(e) => Err(e).context("posting failed"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "nntp_poster=debug" } else { "nntp_poster=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path().context("could not determine the home directory")?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let newsgroup = config
        .resolve_newsgroup(cli.group.as_deref())
        .context("failed to pick a newsgroup")?;

    let paths = cli.valid_paths();
    if paths.is_empty() {
        bail!("nothing to post");
    }
    let source = cli.source(paths);
    let options = RunOptions {
        show_progress: !cli.no_progress,
    };

    info!("Posting to {}", newsgroup);
    let poster = Poster::new(config);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;
    finish(runtime.block_on(poster.post(&newsgroup, &source, options)))
}

//! Posting runs: inputs to articles to a finished pool

use tracing::{info, warn};

use crate::chunker::{Chunker, PostSource};
use crate::config::Config;
use crate::error::Result;
use crate::nzb::NzbRegistry;
use crate::pool::{RunOptions, Scheduler};
use crate::stats::RunSummary;

/// Posts batches of files with one configuration
///
/// # Example
///
/// ```no_run
/// use nntp_poster::{Config, PostSource, Poster, RunOptions};
/// use std::path::PathBuf;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::load(&PathBuf::from("nntp-poster.toml"))?;
/// let newsgroup = config.resolve_newsgroup(None)?;
/// let poster = Poster::new(config);
///
/// let summary = poster
///     .post(
///         &newsgroup,
///         &PostSource::Directories(vec![PathBuf::from("Holiday Photos")]),
///         RunOptions::default(),
///     )
///     .await?;
/// println!("{}", summary.completion_line());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Poster {
    config: Config,
}

impl Poster {
    /// Create a poster for `config`
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Post everything in `source` to `newsgroups` (comma-separated)
    ///
    /// # Errors
    ///
    /// Fails before connecting if the configuration is invalid or no input
    /// yields an article, and afterwards only if every connection is lost for
    /// good. Individual rejected or abandoned articles are counted in the
    /// summary instead.
    pub async fn post(
        &self,
        newsgroups: &str,
        source: &PostSource,
        options: RunOptions,
    ) -> Result<RunSummary> {
        self.config.validate()?;
        let server = &self.config.server;
        let posting = &self.config.posting;

        let articles = Chunker::new(posting, &server.host, newsgroups).build(source)?;
        let registry = NzbRegistry::new(
            posting.generate_nzbs,
            &posting.from,
            newsgroups,
            &posting.nzb_dir,
        );

        let scheduler =
            Scheduler::start(server, posting.line_length, articles, registry, options).await?;
        let summary = scheduler.run().await?;

        info!("{}", summary.completion_line());
        if summary.articles_rejected > 0 || summary.articles_abandoned > 0 {
            warn!(
                "{} article(s) rejected by the server, {} abandoned",
                summary.articles_rejected, summary.articles_abandoned
            );
        }
        Ok(summary)
    }
}

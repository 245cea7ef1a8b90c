//! Connection pool and the single-threaded posting loop
//!
//! The [`Scheduler`] owns every [`Connection`], the article queue and the
//! [`LoopContext`] they share. Each loop iteration polls all sockets with a
//! zero timeout, dispatches readiness, pairs idle connections with queued
//! articles in FIFO order and, twice a second, retries dropped connections
//! and reports progress.

use std::collections::VecDeque;
use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::article::Article;
use crate::config::ServerConfig;
use crate::connection::{tls_config, Connection, Endpoint, SessionSettings};
use crate::error::{PostError, Result};
use crate::nzb::NzbRegistry;
use crate::poller::{self, Poller};
use crate::stats::{RunSummary, TransferStats};

/// How often reconnects are checked and progress is reported
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_millis(500);

/// Pause when an iteration found nothing to do
pub const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Options that affect reporting, not posting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Redraw a progress line on stdout
    pub show_progress: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            show_progress: true,
        }
    }
}

/// State shared by all connections, passed to them on every event
#[derive(Debug)]
pub struct LoopContext {
    /// Ids of connections ready for an article, oldest first
    pub idle: VecDeque<usize>,
    /// Sockets to poll
    pub poller: Poller,
    /// Posted Message-IDs for NZB output
    pub registry: NzbRegistry,
    /// Transfer counters
    pub stats: TransferStats,
    /// Time at the start of the current iteration
    pub now: Instant,
}

impl LoopContext {
    /// Create a context for a run starting at `now`
    pub fn new(registry: NzbRegistry, now: Instant) -> Self {
        Self {
            idle: VecDeque::new(),
            poller: Poller::new(),
            registry,
            stats: TransferStats::new(now),
            now,
        }
    }
}

/// Snapshot of how the pool's connections are occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    /// Connections waiting for an article
    pub idle: usize,
    /// Connections with an article in flight
    pub busy: usize,
    /// Connections closed for the rest of the run
    pub closed: usize,
}

/// Pop the next (connection, article) pair if both queues have one
fn next_pair<T>(idle: &mut VecDeque<usize>, queue: &mut VecDeque<T>) -> Option<(usize, T)> {
    if idle.is_empty() || queue.is_empty() {
        return None;
    }
    Some((idle.pop_front()?, queue.pop_front()?))
}

/// Drives a fixed pool of connections until the article queue is drained
#[derive(Debug)]
pub struct Scheduler {
    connections: Vec<Connection>,
    queue: VecDeque<Article>,
    shared: LoopContext,
    options: RunOptions,
    started: Instant,
    last_maintenance: Instant,
}

impl Scheduler {
    /// Open `server.connections` connections for posting `articles`
    ///
    /// Every connection starts a non-blocking connect immediately; connect
    /// failures only schedule a retry.
    ///
    /// # Errors
    ///
    /// Fails if the server name cannot be resolved or the bind address is
    /// invalid.
    pub async fn start(
        server: &ServerConfig,
        line_length: usize,
        articles: VecDeque<Article>,
        registry: NzbRegistry,
        options: RunOptions,
    ) -> Result<Self> {
        let addr = tokio::net::lookup_host((server.host.as_str(), server.port))
            .await?
            .next()
            .ok_or_else(|| {
                PostError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("No address resolved for {}", server.host),
                ))
            })?;

        let endpoint = Arc::new(Endpoint {
            host: server.host.clone(),
            addr,
            bind: server.bind_socket_addr()?,
            tls: server.tls.then(|| tls_config(server.allow_insecure_tls)),
            reconnect_delay: server.reconnect_delay(),
            session: SessionSettings {
                username: server.username.clone(),
                password: server.password.clone(),
                line_length,
            },
        });

        info!(
            "Posting {} article(s) to {}:{} over {} connection(s)",
            articles.len(),
            server.host,
            server.port,
            server.connections
        );

        let now = Instant::now();
        let mut scheduler = Self {
            connections: (0..server.connections)
                .map(|id| Connection::new(id, Arc::clone(&endpoint)))
                .collect(),
            queue: articles,
            shared: LoopContext::new(registry, now),
            options,
            started: now,
            last_maintenance: now,
        };
        for connection in &mut scheduler.connections {
            connection.connect(&mut scheduler.shared);
        }
        Ok(scheduler)
    }

    /// Articles not yet handed to a connection
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Current occupancy of the pool
    pub fn counts(&self) -> PoolCounts {
        PoolCounts {
            idle: self.shared.idle.len(),
            busy: self.connections.iter().filter(|c| c.is_busy()).count(),
            closed: self
                .connections
                .iter()
                .filter(|c| c.is_closed_for_good())
                .count(),
        }
    }

    /// Articles queued or in flight on a connection
    pub fn remaining(&self) -> usize {
        self.queued() + self.counts().busy
    }

    fn live_connections(&self) -> usize {
        self.connections.len() - self.counts().closed
    }

    /// Nothing queued and every live connection back in the idle list
    fn is_finished(&self) -> bool {
        self.queue.is_empty() && self.shared.idle.len() == self.live_connections()
    }

    /// Run until every article is posted, rejected or abandoned
    ///
    /// # Errors
    ///
    /// Returns [`PostError::AllConnectionsFailed`] when every connection has
    /// been closed for good while articles remain. Collected NZB entries are
    /// still written in that case.
    pub async fn run(mut self) -> Result<RunSummary> {
        let outcome = loop {
            let dispatched = self.tick();

            if self.is_finished() {
                break Ok(());
            }
            if self.live_connections() == 0 {
                break Err(PostError::AllConnectionsFailed);
            }

            if dispatched > 0 {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        };

        if self.options.show_progress {
            println!();
        }
        let summary = self.finish();
        outcome.map(|()| summary)
    }

    /// One loop iteration without sleeping; returns the number of events
    fn tick(&mut self) -> usize {
        self.shared.now = Instant::now();

        let events = self.shared.poller.poll(&mut self.connections);
        let dispatched = events.len();
        for event in events {
            if let Some(connection) = self.connections.get_mut(event.token) {
                poller::dispatch(connection, &mut self.shared, event.readiness);
            }
        }

        self.assign_idle();

        if self.shared.now.duration_since(self.last_maintenance) >= MAINTENANCE_INTERVAL {
            self.last_maintenance = self.shared.now;
            for connection in &mut self.connections {
                connection.reconnect_check(&mut self.shared);
            }
            self.report_progress();
        }

        let counts = self.counts();
        debug_assert!(counts.idle + counts.busy <= self.connections.len());
        dispatched
    }

    fn assign_idle(&mut self) {
        while let Some((id, article)) = next_pair(&mut self.shared.idle, &mut self.queue) {
            let Some(connection) = self.connections.get_mut(id) else {
                self.queue.push_front(article);
                continue;
            };
            if let Err(article) = connection.post_article(article) {
                warn!("{}: listed idle but not ready, requeueing article", id);
                self.queue.push_front(article);
            }
        }
    }

    fn report_progress(&self) {
        let left = self.remaining();
        let rate = self.shared.stats.rate(self.shared.now) / 1024.0;
        debug!("{} article(s) remaining - {:.1}KB/s", left, rate);
        if self.options.show_progress {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "\r{} article(s) remaining - {:.1}KB/s", left, rate);
            let _ = stdout.flush();
        }
    }

    fn finish(&mut self) -> RunSummary {
        for connection in &mut self.connections {
            connection.shutdown(&mut self.shared);
        }

        if self.shared.registry.is_enabled()
            && self.shared.registry.has_pending()
            && let Err(e) = self.shared.registry.flush()
        {
            error!("NZB generation failed: {}", e);
        }

        let stats = &self.shared.stats;
        RunSummary {
            bytes_posted: stats.bytes,
            elapsed: self.started.elapsed(),
            articles_posted: stats.posted,
            articles_rejected: stats.rejected,
            articles_abandoned: stats.abandoned + self.queued(),
            nzb_files: self.shared.registry.written().to_vec(),
        }
    }
}

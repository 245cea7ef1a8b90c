//! One pooled NNTP posting connection
//!
//! A [`Connection`] owns its socket and a [`Session`]. The scheduler polls it
//! through [`Source`] and hands it readiness through [`EventHandler`]; all
//! shared state arrives as the [`LoopContext`] argument.

mod session;
mod state;
mod transport;

pub use session::{Disposition, Session, SessionSettings, POST_CHUNK_SIZE};
pub use state::{transition, ConnectionState, Credentials, Mode, Step};
pub use transport::{tls_config, Transport};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Context;
use std::time::{Duration, Instant};

use rustls::ClientConfig;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::article::Article;
use crate::commands;
use crate::poller::{EventHandler, Readiness, Source};
use crate::pool::LoopContext;

/// Bytes requested per socket read
const READ_SIZE: usize = 16 * 1024;

/// Where and how every connection of a run connects
#[derive(Debug)]
pub struct Endpoint {
    /// Server host name, used for TLS SNI and logging
    pub host: String,
    /// Resolved server address
    pub addr: SocketAddr,
    /// Local address to bind before connecting
    pub bind: Option<SocketAddr>,
    /// TLS client configuration, `None` for cleartext
    pub tls: Option<Arc<ClientConfig>>,
    /// Wait before reconnecting after a transport failure
    pub reconnect_delay: Duration,
    /// Login and encoding settings
    pub session: SessionSettings,
}

#[derive(Debug)]
enum Link {
    Disconnected,
    Connecting(TcpStream),
    Connected(Transport),
}

/// A pooled connection and its protocol session
#[derive(Debug)]
pub struct Connection {
    id: usize,
    endpoint: Arc<Endpoint>,
    link: Link,
    session: Session,
    reconnect_at: Option<Instant>,
    closed_for_good: bool,
}

impl Connection {
    /// Create a disconnected connection
    pub fn new(id: usize, endpoint: Arc<Endpoint>) -> Self {
        Self {
            id,
            endpoint,
            link: Link::Disconnected,
            session: Session::new(id),
            reconnect_at: None,
            closed_for_good: false,
        }
    }

    /// Connection id (also its poller token)
    pub fn id(&self) -> usize {
        self.id
    }

    /// Transport-level state
    pub fn state(&self) -> ConnectionState {
        match self.link {
            Link::Disconnected => ConnectionState::Disconnected,
            Link::Connecting(_) => ConnectionState::Connecting,
            Link::Connected(_) => ConnectionState::Connected,
        }
    }

    /// Protocol mode of the session
    pub fn mode(&self) -> Mode {
        self.session.mode()
    }

    /// Whether an article is in flight
    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    /// Closed without reconnect (authentication failure)
    pub fn is_closed_for_good(&self) -> bool {
        self.closed_for_good
    }

    /// Start a non-blocking connect
    ///
    /// Failure to even start schedules a reconnect; it is never fatal.
    pub fn connect(&mut self, ctx: &mut LoopContext) {
        let endpoint = Arc::clone(&self.endpoint);
        match transport::start_connect(self.id, endpoint.addr, endpoint.bind) {
            Ok(stream) => {
                debug!("{}: connecting to {} ({})", self.id, endpoint.host, endpoint.addr);
                self.link = Link::Connecting(stream);
                self.reconnect_at = None;
                ctx.poller.register(self.id);
            }
            Err(e) => self.close(ctx, &e.to_string(), true),
        }
    }

    /// Reconnect if disconnected and the reconnect delay has passed
    pub fn reconnect_check(&mut self, ctx: &mut LoopContext) {
        if self.closed_for_good || !matches!(self.link, Link::Disconnected) {
            return;
        }
        if self.reconnect_at.is_none_or(|at| ctx.now >= at) {
            self.connect(ctx);
        }
    }

    /// Give `article` to this connection
    ///
    /// Hands the article back if the connection is not idle.
    pub fn post_article(&mut self, article: Article) -> Result<(), Article> {
        self.session.assign(article)
    }

    /// Close the socket and reset all per-connection state
    ///
    /// An in-flight article is abandoned. With `reconnect` a new connect is
    /// scheduled after the configured delay; without it the connection stays
    /// closed for the rest of the run.
    pub fn close(&mut self, ctx: &mut LoopContext, reason: &str, reconnect: bool) {
        ctx.poller.deregister(self.id);
        ctx.idle.retain(|&id| id != self.id);

        if let Some(article) = self.session.reset() {
            warn!(
                "{}: abandoning {} part {}",
                self.id,
                article.info().filename,
                article.part()
            );
            ctx.stats.abandoned += 1;
        }
        self.link = Link::Disconnected;

        if reconnect {
            warn!("{}: {}!", self.id, reason);
            self.reconnect_at = Some(ctx.now + self.endpoint.reconnect_delay);
        } else {
            warn!("{}: Connection closed: {}", self.id, reason);
            self.reconnect_at = None;
            self.closed_for_good = true;
        }
    }

    /// Say goodbye at the end of a run, best effort
    pub fn shutdown(&mut self, ctx: &mut LoopContext) {
        if let Link::Connected(transport) = &mut self.link {
            debug!("{}: > QUIT", self.id);
            let _ = transport.write(commands::quit().as_bytes());
            let _ = transport.flush();
        }
        ctx.poller.deregister(self.id);
        self.link = Link::Disconnected;
    }

    fn finish_connect(&mut self, ctx: &mut LoopContext) {
        let Link::Connecting(stream) = std::mem::replace(&mut self.link, Link::Disconnected) else {
            return;
        };

        match transport::connect_result(&stream) {
            Ok(true) => {}
            Ok(false) => {
                self.link = Link::Connecting(stream);
                return;
            }
            Err(e) => return self.close(ctx, &e.to_string(), true),
        }

        match Transport::establish(stream, self.endpoint.tls.as_ref(), &self.endpoint.host) {
            Ok(transport) => {
                debug!("{}: connected!", self.id);
                self.session.reset();
                self.link = Link::Connected(transport);
            }
            Err(e) => self.close(ctx, &e.to_string(), true),
        }
    }

    fn write_pending(&mut self, ctx: &mut LoopContext) {
        let Link::Connected(transport) = &mut self.link else {
            return;
        };

        let result = match transport.flush() {
            Err(e) => Err(e),
            Ok(()) if !self.session.wants_write() => Ok(()),
            Ok(()) => match transport.write(self.session.pending()) {
                Ok(n) => {
                    self.session.consume(n, ctx);
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
                Err(e) => Err(e),
            },
        };

        if let Err(e) = result {
            self.close(ctx, &e.to_string(), true);
        }
    }

    /// Read until the socket would block; the flag reports end of stream
    fn read_available(&mut self) -> io::Result<(Vec<u8>, bool)> {
        let Link::Connected(transport) = &mut self.link else {
            return Ok((Vec::new(), false));
        };

        let mut data = Vec::new();
        let mut buf = [0u8; READ_SIZE];
        loop {
            match transport.read(&mut buf) {
                Ok(0) => return Ok((data, true)),
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok((data, false)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl Source for Connection {
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> io::Result<Readiness> {
        match &self.link {
            Link::Disconnected => Ok(Readiness::default()),
            Link::Connecting(stream) => transport::poll_connect(stream, cx),
            Link::Connected(transport) => transport.poll_ready(cx, self.session.wants_write()),
        }
    }
}

impl EventHandler<LoopContext> for Connection {
    fn on_readable(&mut self, ctx: &mut LoopContext) {
        let (data, eof) = match self.read_available() {
            Ok(read) => read,
            Err(e) => return self.on_error(ctx, e),
        };

        // lines that arrived together with the FIN still count
        if !data.is_empty() {
            let endpoint = Arc::clone(&self.endpoint);
            if let Disposition::Close { reason, reconnect } =
                self.session.receive(&data, &endpoint.session, ctx)
            {
                return self.close(ctx, &reason, reconnect);
            }
        }
        if eof {
            self.close(ctx, "connection closed by server", true);
        }
    }

    fn on_writable(&mut self, ctx: &mut LoopContext) {
        match self.link {
            Link::Disconnected => {}
            Link::Connecting(_) => self.finish_connect(ctx),
            Link::Connected(_) => self.write_pending(ctx),
        }
    }

    fn on_error(&mut self, ctx: &mut LoopContext, error: io::Error) {
        self.close(ctx, &error.to_string(), true);
    }
}

//! Zero-timeout readiness polling over registered sources
//!
//! Sources are addressed by token (their index in the scheduler's connection
//! list). Polling never parks: each source is asked for its readiness with a
//! no-op waker and the loop itself decides when to sleep.

use std::collections::BTreeSet;
use std::io;
use std::task::{Context, Waker};

/// Readiness reported for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// Input is buffered, or the peer closed
    pub readable: bool,
    /// A write would make progress (or a pending connect resolved)
    pub writable: bool,
}

impl Readiness {
    /// Nothing to do
    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// A readiness notification for one token
#[derive(Debug)]
pub struct Event {
    /// Token of the source
    pub token: usize,
    /// What the source is ready for, or the error it hit
    pub readiness: io::Result<Readiness>,
}

/// Something that can report readiness without blocking
pub trait Source {
    /// Report current readiness
    ///
    /// Only interests the source currently has are reported: a source with
    /// nothing to send must not report `writable`.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> io::Result<Readiness>;
}

/// Reaction to readiness events, with access to the loop's shared state `C`
pub trait EventHandler<C> {
    /// Input is available
    fn on_readable(&mut self, ctx: &mut C);
    /// Output can be written
    fn on_writable(&mut self, ctx: &mut C);
    /// The source failed
    fn on_error(&mut self, ctx: &mut C, error: io::Error);
}

/// Registry of tokens to poll
#[derive(Debug, Default)]
pub struct Poller {
    registered: BTreeSet<usize>,
}

impl Poller {
    /// Create an empty poller
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `token`
    pub fn register(&mut self, token: usize) {
        self.registered.insert(token);
    }

    /// Stop polling `token`; unknown tokens are ignored
    pub fn deregister(&mut self, token: usize) {
        self.registered.remove(&token);
    }

    /// Whether `token` is registered
    pub fn is_registered(&self, token: usize) -> bool {
        self.registered.contains(&token)
    }

    /// Poll every registered source once, returning the ones with events
    ///
    /// Tokens without a matching entry in `sources` are skipped.
    pub fn poll<S: Source>(&self, sources: &mut [S]) -> Vec<Event> {
        let mut cx = Context::from_waker(Waker::noop());
        self.registered
            .iter()
            .filter_map(|&token| {
                let source = sources.get_mut(token)?;
                match source.poll_ready(&mut cx) {
                    Ok(readiness) if readiness.is_empty() => None,
                    readiness => Some(Event { token, readiness }),
                }
            })
            .collect()
    }
}

/// Deliver one event to its handler: errors first, then reads, then writes
pub fn dispatch<C, H: EventHandler<C>>(handler: &mut H, ctx: &mut C, readiness: io::Result<Readiness>) {
    match readiness {
        Err(error) => handler.on_error(ctx, error),
        Ok(readiness) => {
            if readiness.readable {
                handler.on_readable(ctx);
            }
            if readiness.writable {
                handler.on_writable(ctx);
            }
        }
    }
}

#![doc = include_str!("../README.md")]

/// Article descriptors and on-demand preparation
pub mod article;
/// Input filtering and splitting files into articles
pub mod chunker;
/// NNTP command builders
pub mod commands;
mod config;
/// Pooled NNTP posting connections
pub mod connection;
mod error;
/// Positioned reads shared between connections
pub mod filewrap;
/// NZB manifest generation
pub mod nzb;
/// Zero-timeout readiness polling
pub mod poller;
mod pool;
mod poster;
mod response;
/// Throughput accounting and formatting
pub mod stats;
/// yEnc binary encoding/decoding for Usenet
pub mod yenc;

pub use article::{Article, ArticleHeaders, FileInfo, SubjectTemplate};
pub use chunker::{Chunker, PostSource};
pub use config::{Config, PostingConfig, ServerConfig};
pub use error::{PostError, Result};
pub use filewrap::FileWrap;
pub use nzb::{Nzb, NzbFile, NzbRegistry, NzbSegment};
pub use pool::{LoopContext, PoolCounts, RunOptions, Scheduler};
pub use poster::Poster;
pub use response::{codes, extract_message_id, parse_status, NntpResponse};
pub use stats::{nice_size, nice_time, RunSummary};
pub use yenc::{decode as yenc_decode, encode as yenc_encode, YencEncoded};

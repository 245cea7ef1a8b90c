use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info};

use super::{safe_filename, Nzb, NzbFile, NzbSegment};
use crate::article::Article;
use crate::error::Result;

/// Subject entry collected while posting
#[derive(Debug)]
struct PendingFile {
    subject: String,
    date: i64,
    segments: Vec<NzbSegment>,
}

/// Everything remembered for one directory title
///
/// Entries are kept after a flush so that a later flush of the same title
/// rewrites the complete NZB instead of only the newest segments.
#[derive(Debug)]
struct TitleBatch {
    title: String,
    files: Vec<PendingFile>,
    by_subject: HashMap<String, usize>,
    dirty: bool,
}

impl TitleBatch {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            files: Vec::new(),
            by_subject: HashMap::new(),
            dirty: false,
        }
    }

    fn file_for(&mut self, subject: String) -> &mut PendingFile {
        let index = match self.by_subject.get(&subject) {
            Some(&index) => index,
            None => {
                self.files.push(PendingFile {
                    subject: subject.clone(),
                    date: Utc::now().timestamp(),
                    segments: Vec::new(),
                });
                self.by_subject.insert(subject, self.files.len() - 1);
                self.files.len() - 1
            }
        };
        &mut self.files[index]
    }
}

/// Collects posted Message-IDs and writes one NZB per source directory
///
/// Entries are grouped by directory title, then by subject. When an article
/// from another title is remembered, the active title is flushed first. Near a
/// directory boundary, articles from two titles can interleave; every flush
/// writes all entries of its title, so nothing written earlier is lost.
#[derive(Debug)]
pub struct NzbRegistry {
    enabled: bool,
    poster: String,
    groups: Vec<String>,
    out_dir: PathBuf,
    batches: Vec<TitleBatch>,
    by_title: HashMap<String, usize>,
    current: Option<usize>,
    written: Vec<PathBuf>,
}

impl NzbRegistry {
    /// Create a registry; a disabled one ignores everything
    pub fn new(enabled: bool, poster: &str, newsgroups: &str, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            poster: poster.to_string(),
            groups: newsgroups
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect(),
            out_dir: out_dir.into(),
            batches: Vec::new(),
            by_title: HashMap::new(),
            current: None,
            written: Vec::new(),
        }
    }

    /// Whether NZB generation is on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether entries are waiting to be flushed
    pub fn has_pending(&self) -> bool {
        self.batches.iter().any(|batch| batch.dirty)
    }

    /// NZB files written so far, each listed once
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Record that `article` went on the wire with `size` prepared bytes
    ///
    /// # Errors
    ///
    /// Fails only if a directory change forces a flush and that flush fails;
    /// the article is recorded either way.
    pub fn remember(&mut self, article: &Article, size: usize) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let title = article.info().dirname.as_str();
        let index = match self.by_title.get(title) {
            Some(&index) => index,
            None => {
                self.batches.push(TitleBatch::new(title));
                self.by_title.insert(title.to_string(), self.batches.len() - 1);
                self.batches.len() - 1
            }
        };

        let mut flushed = Ok(());
        if self.current != Some(index) {
            flushed = self.flush().map(|_| ());
            self.current = Some(index);
        }

        let id = article.message_id();
        let id = id
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(id);
        let batch = &mut self.batches[index];
        batch.file_for(article.subject_key()).segments.push(NzbSegment {
            bytes: size as u64,
            number: article.part(),
            message_id: id.to_string(),
        });
        batch.dirty = true;

        flushed
    }

    /// Snapshot of the active title's entries as an NZB document
    pub fn build(&self) -> Nzb {
        let Some(batch) = self.current.and_then(|index| self.batches.get(index)) else {
            return Nzb::default();
        };
        let files = batch
            .files
            .iter()
            .map(|pending| {
                let mut segments = pending.segments.clone();
                segments.sort_by_key(|s| s.number);
                NzbFile {
                    poster: self.poster.clone(),
                    date: pending.date,
                    subject: pending.subject.clone(),
                    groups: self.groups.clone(),
                    segments,
                }
            })
            .collect();
        Nzb { files }
    }

    /// Write the active title to `<out_dir>/<title>.nzb`
    ///
    /// The file holds every entry remembered for the title, including those
    /// of earlier flushes. Returns the written path, or `None` when nothing
    /// new was pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the XML cannot be rendered or written. The title
    /// stays pending in that case.
    pub fn flush(&mut self) -> Result<Option<PathBuf>> {
        let Some(batch) = self.current.and_then(|index| self.batches.get(index)) else {
            return Ok(None);
        };
        if !batch.dirty {
            return Ok(None);
        }

        let path = self.out_dir.join(format!("{}.nzb", safe_filename(&batch.title)));
        debug!("Begin generation of {}", path.display());

        let comment = format!(
            "Generated by nntp-poster v{} at {}",
            env!("CARGO_PKG_VERSION"),
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        std::fs::write(&path, self.build().to_xml(&comment)?)?;

        if let Some(batch) = self.current.and_then(|index| self.batches.get_mut(index)) {
            batch.dirty = false;
        }
        info!("Successfully generated the nzb file {}", path.display());
        if !self.written.contains(&path) {
            self.written.push(path.clone());
        }
        Ok(Some(path))
    }
}

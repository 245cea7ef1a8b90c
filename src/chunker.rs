//! Turning input paths into the ordered article queue

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::article::{self, Article, ArticleHeaders, FileInfo, SubjectTemplate, POSTER_ID};
use crate::config::PostingConfig;
use crate::error::{PostError, Result};
use crate::filewrap::FileWrap;

/// Marker file that is never posted
pub const SENTINEL_FILENAME: &str = ".nntp-poster";

/// What to post
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostSource {
    /// Each directory is one batch titled with the directory's name
    Directories(Vec<PathBuf>),
    /// One batch of explicit files under a caller-chosen title
    Files {
        /// Title used in every subject
        title: String,
        /// Files to post
        files: Vec<PathBuf>,
    },
}

/// A file that passed input filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoodFile {
    /// Absolute path
    pub path: PathBuf,
    /// Base file name
    pub name: String,
    /// Size in bytes, always > 0
    pub size: u64,
}

/// Keep regular, non-empty files that are not skip-listed, sorted by path
pub fn filter_good_files<I>(paths: I, skip_filenames: &[String]) -> Vec<GoodFile>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut good: Vec<GoodFile> = paths
        .into_iter()
        .filter_map(|path| {
            let path = std::path::absolute(&path).unwrap_or(path);
            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    return None;
                }
            };
            if !metadata.is_file() {
                return None;
            }
            let name = path.file_name()?.to_string_lossy().into_owned();
            if name == SENTINEL_FILENAME || skip_filenames.iter().any(|s| *s == name) {
                debug!("Skipping {}: skip-listed", path.display());
                return None;
            }
            if metadata.len() == 0 {
                debug!("Skipping {}: empty", path.display());
                return None;
            }
            Some(GoodFile {
                path,
                name,
                size: metadata.len(),
            })
        })
        .collect();

    good.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.name.cmp(&b.name)));
    good
}

/// `[begin, end)` ranges of each part of a file of `size` bytes
pub fn part_ranges(size: u64, article_size: u64) -> impl Iterator<Item = (u64, u64)> {
    let parts = size.div_ceil(article_size.max(1));
    (0..parts).map(move |i| (i * article_size, size.min((i + 1) * article_size)))
}

/// Builds articles for one run
#[derive(Debug)]
pub struct Chunker<'a> {
    posting: &'a PostingConfig,
    host: &'a str,
    newsgroups: &'a str,
}

impl<'a> Chunker<'a> {
    /// Create a chunker; `host` seeds synthesized Message-IDs
    pub fn new(posting: &'a PostingConfig, host: &'a str, newsgroups: &'a str) -> Self {
        Self {
            posting,
            host,
            newsgroups,
        }
    }

    /// Build the full article queue for `source`
    ///
    /// # Errors
    ///
    /// Returns [`PostError::NothingToPost`] if no input yields an article.
    pub fn build(&self, source: &PostSource) -> Result<VecDeque<Article>> {
        let mut articles = VecDeque::new();

        match source {
            PostSource::Files { title, files } => {
                let good = filter_good_files(files.iter().cloned(), &self.posting.skip_filenames);
                self.add_batch(title, &good, &mut articles);
            }
            PostSource::Directories(dirs) => {
                for dir in dirs {
                    let dir = std::path::absolute(dir).unwrap_or_else(|_| dir.clone());
                    let Some(title) = dir.file_name().map(|n| n.to_string_lossy().into_owned())
                    else {
                        warn!("Skipping {}: no directory name", dir.display());
                        continue;
                    };
                    let entries = match list_dir(&dir) {
                        Ok(entries) => entries,
                        Err(e) => {
                            warn!("Skipping {}: {}", dir.display(), e);
                            continue;
                        }
                    };
                    let good = filter_good_files(entries, &self.posting.skip_filenames);
                    self.add_batch(&title, &good, &mut articles);
                }
            }
        }

        if articles.is_empty() {
            return Err(PostError::NothingToPost);
        }
        Ok(articles)
    }

    fn add_batch(&self, title: &str, files: &[GoodFile], out: &mut VecDeque<Article>) {
        let article_size = self.posting.article_size;
        let prefix = Some(self.posting.subject_prefix.as_str());

        for (index, file) in files.iter().enumerate() {
            let parts = u32::try_from(file.size.div_ceil(article_size.max(1))).unwrap_or(u32::MAX);
            let info = Arc::new(FileInfo {
                dirname: title.to_string(),
                filename: file.name.clone(),
                filepath: file.path.clone(),
                filesize: file.size,
                parts,
            });
            debug!("File info: {:?}", info);

            let subject = Arc::new(SubjectTemplate::new(
                prefix,
                title,
                index + 1,
                files.len(),
                &file.name,
                parts,
            ));
            let wrap = Arc::new(FileWrap::new(&file.path, parts));

            for (part, (begin, end)) in (1..).zip(part_ranges(file.size, article_size)) {
                let headers = ArticleHeaders {
                    from: self.posting.from.clone(),
                    newsgroups: self.newsgroups.to_string(),
                    subject: subject.render(part),
                    message_id: article::new_message_id(part, self.host),
                    poster: POSTER_ID.to_string(),
                };
                out.push_back(Article::new(
                    Arc::clone(&wrap),
                    Arc::clone(&info),
                    Arc::clone(&subject),
                    part,
                    begin,
                    end,
                    headers,
                ));
            }
        }
    }
}

fn list_dir(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect()
}

//! Articles: one yEnc-encoded part of one file
//!
//! An [`Article`] starts as a cheap descriptor (file range, subject, headers)
//! and is materialized into its wire form by [`Article::prepare`] only once
//! the server has agreed to accept it.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::filewrap::FileWrap;
use crate::yenc;

/// Value of the `X-Newsposter` header
pub const POSTER_ID: &str = concat!("nntp-poster ", env!("CARGO_PKG_VERSION"));

/// Facts about the file an article belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Title of the batch the file is posted under (directory name or `-f` subject)
    pub dirname: String,
    /// Base file name, as announced in `=ybegin name=`
    pub filename: String,
    /// Absolute path of the file
    pub filepath: PathBuf,
    /// File size in bytes
    pub filesize: u64,
    /// Number of parts the file is split into
    pub parts: u32,
}

/// Subject line shared by every part of one file
///
/// Renders as `[prefix ]title [NN/TT] - "filename" yEnc (PPP/parts)`, where the
/// file and part numbers are zero-padded to the width of their totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectTemplate {
    head: String,
    parts: u32,
    part_width: usize,
}

impl SubjectTemplate {
    /// Build the template for file `file_num` of `file_count` in a batch
    pub fn new(
        prefix: Option<&str>,
        title: &str,
        file_num: usize,
        file_count: usize,
        filename: &str,
        parts: u32,
    ) -> Self {
        let file_width = digits(file_count as u64);
        let mut head = String::new();
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            head.push_str(prefix);
            head.push(' ');
        }
        let _ = write!(
            head,
            "{title} [{file_num:0file_width$}/{file_count}] - \"{filename}\" yEnc "
        );
        Self {
            head,
            parts,
            part_width: digits(u64::from(parts)),
        }
    }

    /// Subject of part `part` (1-based)
    pub fn render(&self, part: u32) -> String {
        format!(
            "{}({:0width$}/{})",
            self.head,
            part,
            self.parts,
            width = self.part_width
        )
    }
}

fn digits(n: u64) -> usize {
    n.max(1).ilog10() as usize + 1
}

/// Headers written at the top of every article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleHeaders {
    /// `From:` header
    pub from: String,
    /// `Newsgroups:` header (comma-separated)
    pub newsgroups: String,
    /// `Subject:` header
    pub subject: String,
    /// `Message-ID:` header, including angle brackets
    pub message_id: String,
    /// `X-Newsposter:` header
    pub poster: String,
}

impl ArticleHeaders {
    fn write_to(&self, out: &mut Vec<u8>) {
        for (name, value) in [
            ("From", &self.from),
            ("Newsgroups", &self.newsgroups),
            ("Subject", &self.subject),
            ("Message-ID", &self.message_id),
            ("X-Newsposter", &self.poster),
        ] {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
    }
}

/// Generate a Message-ID of the form `<uuid.part@host>`
pub fn new_message_id(part: u32, host: &str) -> String {
    format!("<{}.{}@{}>", Uuid::new_v4().simple(), part, host)
}

/// One part of one file, ready to be posted
#[derive(Debug)]
pub struct Article {
    file: Arc<FileWrap>,
    info: Arc<FileInfo>,
    subject: Arc<SubjectTemplate>,
    begin: u64,
    end: u64,
    part: u32,
    /// Article headers
    pub headers: ArticleHeaders,
    prepared: Option<Vec<u8>>,
    hint_applied: bool,
}

impl Article {
    /// Describe part `part` covering bytes `begin..end` of `file`
    pub fn new(
        file: Arc<FileWrap>,
        info: Arc<FileInfo>,
        subject: Arc<SubjectTemplate>,
        part: u32,
        begin: u64,
        end: u64,
        headers: ArticleHeaders,
    ) -> Self {
        Self {
            file,
            info,
            subject,
            begin,
            end,
            part,
            headers,
            prepared: None,
            hint_applied: false,
        }
    }

    /// Start offset (inclusive)
    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// End offset (exclusive)
    pub fn end(&self) -> u64 {
        self.end
    }

    /// 1-based part number
    pub fn part(&self) -> u32 {
        self.part
    }

    /// File this article belongs to
    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Shared reader for the source file
    pub fn file(&self) -> &Arc<FileWrap> {
        &self.file
    }

    /// Subject every part of this file is grouped under in an NZB
    pub fn subject_key(&self) -> String {
        self.subject.render(1)
    }

    /// Current Message-ID, including angle brackets
    pub fn message_id(&self) -> &str {
        &self.headers.message_id
    }

    /// Replace the Message-ID with one suggested by the server
    ///
    /// Only the first hint is taken, and only while the article is unprepared.
    /// Returns whether the hint was applied.
    pub fn apply_message_id_hint(&mut self, message_id: &str) -> bool {
        if self.hint_applied || self.prepared.is_some() {
            return false;
        }
        self.headers.message_id = message_id.to_string();
        self.hint_applied = true;
        true
    }

    /// Whether [`prepare`](Self::prepare) has already run
    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    /// Read, encode and frame the article, returning its size in bytes
    ///
    /// The result excludes the terminating `.` line. Calling this again
    /// returns the size of the existing buffer.
    ///
    /// # Errors
    ///
    /// Fails if the file range cannot be read or `line_length` is invalid.
    pub fn prepare(&mut self, line_length: usize) -> Result<usize> {
        if let Some(prepared) = &self.prepared {
            return Ok(prepared.len());
        }

        let data = self.file.read_part(self.begin, self.end)?;

        let mut out = Vec::with_capacity(data.len() + data.len() / 16 + 1024);
        self.headers.write_to(&mut out);
        let _ = write!(
            ByteWriter(&mut out),
            "=ybegin part={} total={} line={} size={} name={}\r\n=ypart begin={} end={}\r\n",
            self.part,
            self.info.parts,
            line_length,
            self.info.filesize,
            self.info.filename,
            self.begin + 1,
            self.end,
        );
        let crc = yenc::encode_into(&mut out, &data, line_length)?;
        let _ = write!(
            ByteWriter(&mut out),
            "=yend size={} part={} pcrc32={:08x}\r\n",
            self.end - self.begin,
            self.part,
            crc,
        );

        let size = out.len();
        self.prepared = Some(out);
        Ok(size)
    }

    /// Prepared wire bytes, if [`prepare`](Self::prepare) has run
    pub fn prepared_body(&self) -> Option<&[u8]> {
        self.prepared.as_deref()
    }
}

/// `fmt::Write` over a byte buffer
struct ByteWriter<'a>(&'a mut Vec<u8>);

impl std::fmt::Write for ByteWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article_over(data: &[u8], begin: u64, end: u64, part: u32, parts: u32) -> (Article, PathBuf) {
        let path = std::env::temp_dir().join(format!("article-{}.bin", Uuid::new_v4()));
        std::fs::write(&path, data).unwrap();
        let info = Arc::new(FileInfo {
            dirname: "Holiday".to_string(),
            filename: "photo.jpg".to_string(),
            filepath: path.clone(),
            filesize: data.len() as u64,
            parts,
        });
        let subject = Arc::new(SubjectTemplate::new(None, "Holiday", 1, 1, "photo.jpg", parts));
        let headers = ArticleHeaders {
            from: "poster <poster@example.com>".to_string(),
            newsgroups: "alt.binaries.test".to_string(),
            subject: subject.render(part),
            message_id: new_message_id(part, "news.example.com"),
            poster: POSTER_ID.to_string(),
        };
        let file = Arc::new(FileWrap::new(&path, parts));
        (Article::new(file, info, subject, part, begin, end, headers), path)
    }

    #[test]
    fn test_subject_padding() {
        let template = SubjectTemplate::new(Some("[01/10]"), "Holiday", 3, 12, "photo.jpg", 150);
        assert_eq!(
            template.render(7),
            "[01/10] Holiday [03/12] - \"photo.jpg\" yEnc (007/150)"
        );
        assert_eq!(
            template.render(150),
            "[01/10] Holiday [03/12] - \"photo.jpg\" yEnc (150/150)"
        );
    }

    #[test]
    fn test_subject_without_prefix() {
        let template = SubjectTemplate::new(Some(""), "t", 1, 9, "a.bin", 1);
        assert_eq!(template.render(1), "t [1/9] - \"a.bin\" yEnc (1/1)");
    }

    #[test]
    fn test_message_id_format() {
        let id = new_message_id(4, "news.example.com");
        assert!(id.starts_with('<'));
        assert!(id.ends_with(".4@news.example.com>"));
        assert_ne!(id, new_message_id(4, "news.example.com"));
    }

    #[test]
    fn test_prepare_frames_and_encodes() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let (mut article, path) = article_over(&data, 500, 1000, 2, 2);

        let size = article.prepare(128).unwrap();
        let body = article.prepared_body().unwrap();
        assert_eq!(size, body.len());

        let text = String::from_utf8_lossy(body);
        assert!(text.starts_with("From: poster <poster@example.com>\r\nNewsgroups: alt.binaries.test\r\n"));
        assert!(text.contains("Subject: Holiday [1/1] - \"photo.jpg\" yEnc (2/2)\r\n"));
        assert!(text.contains(&format!("X-Newsposter: {POSTER_ID}\r\n\r\n")));
        assert!(text.contains("=ybegin part=2 total=2 line=128 size=1000 name=photo.jpg\r\n"));
        assert!(text.contains("=ypart begin=501 end=1000\r\n"));
        let trailer = format!(
            "=yend size=500 part=2 pcrc32={}\r\n",
            yenc::crc32_hex(&data[500..])
        );
        assert!(text.ends_with(&trailer));

        // data lines sit between =ypart and =yend
        let start = find(body, b"end=1000\r\n") + b"end=1000\r\n".len();
        let stop = find(body, b"=yend ");
        assert_eq!(yenc::decode(&body[start..stop]).unwrap(), &data[500..]);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_message_id_hint_applied_once() {
        let (mut article, path) = article_over(b"abc", 0, 3, 1, 1);
        assert!(article.apply_message_id_hint("<first@server>"));
        assert!(!article.apply_message_id_hint("<second@server>"));
        assert_eq!(article.message_id(), "<first@server>");

        article.prepare(128).unwrap();
        let text = String::from_utf8_lossy(article.prepared_body().unwrap()).into_owned();
        assert!(text.contains("Message-ID: <first@server>\r\n"));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_hint_rejected_after_prepare() {
        let (mut article, path) = article_over(b"abc", 0, 3, 1, 1);
        let original = article.message_id().to_string();
        article.prepare(128).unwrap();
        assert!(!article.apply_message_id_hint("<late@server>"));
        assert_eq!(article.message_id(), original);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_prepare_missing_file() {
        let (mut article, path) = article_over(b"abc", 0, 3, 1, 1);
        std::fs::remove_file(&path).unwrap();
        assert!(article.prepare(128).is_err());
        assert!(!article.is_prepared());
    }

    fn find(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap()
    }
}

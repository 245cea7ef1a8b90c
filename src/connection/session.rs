//! Socket-free NNTP session: line framing, the mode machine and body streaming

use tracing::{debug, error, warn};

use super::state::{transition, Credentials, Mode, Step};
use crate::article::Article;
use crate::commands;
use crate::pool::LoopContext;
use crate::response::NntpResponse;

/// Bytes of prepared article moved into the write buffer at a time
pub const POST_CHUNK_SIZE: usize = 256 * 1024;

/// Login and encoding settings shared by every session of a run
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    /// AUTHINFO user; empty means no authentication
    pub username: String,
    /// AUTHINFO password
    pub password: String,
    /// yEnc line length used when preparing articles
    pub line_length: usize,
}

impl SessionSettings {
    fn credentials(&self) -> Credentials {
        Credentials {
            username: !self.username.is_empty(),
            password: !self.password.is_empty(),
        }
    }
}

/// What the owning connection has to do after input was processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Carry on
    Keep,
    /// Close the socket
    Close {
        /// Logged reason
        reason: String,
        /// Schedule a reconnect after the configured delay
        reconnect: bool,
    },
}

/// Protocol state of one connection, independent of the socket
#[derive(Debug)]
pub struct Session {
    id: usize,
    mode: Mode,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    write_pos: usize,
    article: Option<Article>,
    body_pos: usize,
}

impl Session {
    /// Fresh session waiting for a greeting
    pub fn new(id: usize) -> Self {
        Self {
            id,
            mode: Mode::Auth,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            write_pos: 0,
            article: None,
            body_pos: 0,
        }
    }

    /// Current protocol mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether an article is owned
    pub fn is_busy(&self) -> bool {
        self.article.is_some()
    }

    /// The article being posted, if any
    pub fn article(&self) -> Option<&Article> {
        self.article.as_ref()
    }

    /// Whether unsent bytes are buffered
    pub fn wants_write(&self) -> bool {
        self.write_pos < self.write_buf.len()
    }

    /// Unsent bytes
    pub fn pending(&self) -> &[u8] {
        &self.write_buf[self.write_pos..]
    }

    /// Drop all state, handing back the in-flight article if there was one
    pub fn reset(&mut self) -> Option<Article> {
        self.mode = Mode::Auth;
        self.read_buf.clear();
        self.write_buf.clear();
        self.write_pos = 0;
        self.body_pos = 0;
        self.article.take()
    }

    fn send(&mut self, data: &[u8]) {
        self.write_buf.extend_from_slice(data);
    }

    /// Take ownership of `article` and send `POST`
    ///
    /// Hands the article back if the session is not idle.
    pub fn assign(&mut self, article: Article) -> Result<(), Article> {
        if self.mode != Mode::Command || self.article.is_some() {
            return Err(article);
        }
        debug!(
            "{}: > POST ({} part {})",
            self.id,
            article.info().filename,
            article.part()
        );
        self.article = Some(article);
        self.mode = Mode::PostInit;
        self.send(commands::post().as_bytes());
        Ok(())
    }

    /// Record that `n` pending bytes were written
    ///
    /// Once the buffer drains while streaming, the next chunk of the prepared
    /// body (or the terminating `.` line) is queued.
    pub fn consume(&mut self, n: usize, ctx: &mut LoopContext) {
        self.write_pos = (self.write_pos + n).min(self.write_buf.len());
        if self.mode == Mode::PostData {
            ctx.stats.bytes += n as u64;
        }
        if self.write_pos == self.write_buf.len() {
            self.write_buf.clear();
            self.write_pos = 0;
            if self.mode == Mode::PostData {
                self.queue_body_chunk();
            }
        }
    }

    fn queue_body_chunk(&mut self) {
        let Some(body) = self.article.as_ref().and_then(Article::prepared_body) else {
            return;
        };
        if self.body_pos < body.len() {
            let end = (self.body_pos + POST_CHUNK_SIZE).min(body.len());
            self.write_buf.extend_from_slice(&body[self.body_pos..end]);
            self.body_pos = end;
        } else {
            self.write_buf.extend_from_slice(commands::END_OF_ARTICLE);
            self.mode = Mode::PostDone;
        }
    }

    /// Feed bytes read from the socket
    ///
    /// Complete CRLF lines are handled in order; a trailing partial line is
    /// kept for the next call.
    pub fn receive(
        &mut self,
        data: &[u8],
        settings: &SessionSettings,
        ctx: &mut LoopContext,
    ) -> Disposition {
        self.read_buf.extend_from_slice(data);

        let mut start = 0;
        while let Some(offset) = self.read_buf[start..].windows(2).position(|w| w == b"\r\n") {
            let line = String::from_utf8_lossy(&self.read_buf[start..start + offset]).into_owned();
            start += offset + 2;

            let disposition = self.handle_line(&line, settings, ctx);
            if disposition != Disposition::Keep {
                return disposition;
            }
        }
        self.read_buf.drain(..start);
        Disposition::Keep
    }

    fn handle_line(
        &mut self,
        line: &str,
        settings: &SessionSettings,
        ctx: &mut LoopContext,
    ) -> Disposition {
        let id = self.id;
        debug!("{}: < {}", id, line);

        let response = NntpResponse::parse(line);
        let step = match &response {
            Some(response) => transition(self.mode, response.code, settings.credentials()),
            None => Step::Unrecognized,
        };

        match step {
            Step::SendUser => {
                self.send(commands::authinfo_user(&settings.username).as_bytes());
                debug!("{}: > AUTHINFO USER {}", id, settings.username);
            }
            Step::SendPass => {
                self.send(commands::authinfo_pass(&settings.password).as_bytes());
                debug!("{}: > AUTHINFO PASS ********", id);
            }
            Step::Ready => self.become_idle(ctx),
            Step::Fatal(reason) => {
                return Disposition::Close {
                    reason: reason.to_string(),
                    reconnect: false,
                };
            }
            Step::SendArticle => {
                if let Some(response) = &response {
                    return self.start_article(response, settings, ctx);
                }
            }
            Step::PostRefused => {
                warn!("{}: posting not allowed - {}", id, line);
                ctx.stats.rejected += 1;
                self.become_idle(ctx);
            }
            Step::Posted => {
                if let Some(article) = &self.article {
                    debug!("{}: posted {}", id, article.message_id());
                }
                ctx.stats.posted += 1;
                self.become_idle(ctx);
            }
            Step::Rejected => {
                warn!("{}: posting failed - {}", id, line);
                ctx.stats.rejected += 1;
                self.become_idle(ctx);
            }
            Step::Unrecognized => {
                warn!("{}: unknown response while {:?} - \"{}\"", id, self.mode, line);
            }
        }
        Disposition::Keep
    }

    /// Back to [`Mode::Command`], releasing any article, and join the idle list
    fn become_idle(&mut self, ctx: &mut LoopContext) {
        self.article = None;
        self.body_pos = 0;
        self.mode = Mode::Command;
        ctx.idle.push_back(self.id);
        debug!("{}: ready.", self.id);
    }

    fn start_article(
        &mut self,
        response: &NntpResponse,
        settings: &SessionSettings,
        ctx: &mut LoopContext,
    ) -> Disposition {
        let id = self.id;
        let Some(article) = self.article.as_mut() else {
            warn!("{}: 340 without an article - \"{}\"", id, response.message);
            return Disposition::Keep;
        };

        if let Some(hint) = response.message_id()
            && article.apply_message_id_hint(hint)
        {
            debug!("{}: changing Message-ID to {}", id, hint);
        }

        let size = match article.prepare(settings.line_length) {
            Ok(size) => size,
            Err(e) => {
                // mid-POST there is no way back to a clean command state
                return Disposition::Close {
                    reason: format!(
                        "cannot prepare {} part {}: {}",
                        article.info().filename,
                        article.part(),
                        e
                    ),
                    reconnect: true,
                };
            }
        };

        if let Err(e) = ctx.registry.remember(article, size) {
            error!("{}: NZB generation failed: {}", id, e);
        }

        self.mode = Mode::PostData;
        self.body_pos = 0;
        if !self.wants_write() {
            self.queue_body_chunk();
        }
        Disposition::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{ArticleHeaders, FileInfo, SubjectTemplate, POSTER_ID};
    use crate::filewrap::FileWrap;
    use crate::nzb::NzbRegistry;
    use crate::yenc;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Instant;

    fn ctx() -> LoopContext {
        LoopContext::new(NzbRegistry::new(false, "p", "g", "."), Instant::now())
    }

    fn settings(username: &str, password: &str) -> SessionSettings {
        SessionSettings {
            username: username.to_string(),
            password: password.to_string(),
            line_length: 128,
        }
    }

    fn article_with(data: &[u8]) -> (Article, PathBuf) {
        let path = std::env::temp_dir().join(format!("session-{}.bin", uuid::Uuid::new_v4()));
        std::fs::write(&path, data).unwrap();
        let info = Arc::new(FileInfo {
            dirname: "dir".to_string(),
            filename: "f.bin".to_string(),
            filepath: path.clone(),
            filesize: data.len() as u64,
            parts: 1,
        });
        let subject = Arc::new(SubjectTemplate::new(None, "dir", 1, 1, "f.bin", 1));
        let headers = ArticleHeaders {
            from: "p@example.com".to_string(),
            newsgroups: "alt.test".to_string(),
            subject: subject.render(1),
            message_id: "<orig@host>".to_string(),
            poster: POSTER_ID.to_string(),
        };
        let file = Arc::new(FileWrap::new(&path, 1));
        (
            Article::new(file, info, subject, 1, 0, data.len() as u64, headers),
            path,
        )
    }

    /// Write everything the session queues, as a socket would
    fn drain(session: &mut Session, ctx: &mut LoopContext) -> Vec<u8> {
        let mut out = Vec::new();
        while session.wants_write() {
            let chunk = session.pending().to_vec();
            out.extend_from_slice(&chunk);
            session.consume(chunk.len(), ctx);
        }
        out
    }

    #[test]
    fn test_greeting_without_credentials_goes_idle() {
        let mut ctx = ctx();
        let mut session = Session::new(3);
        assert_eq!(session.receive(b"200 welcome\r\n", &settings("", ""), &mut ctx), Disposition::Keep);
        assert_eq!(session.mode(), Mode::Command);
        assert_eq!(ctx.idle, [3]);
    }

    #[test]
    fn test_partial_lines_are_buffered() {
        let mut ctx = ctx();
        let mut session = Session::new(0);
        let creds = settings("user", "secret");

        session.receive(b"200 news.exam", &creds, &mut ctx);
        assert!(!session.wants_write());
        session.receive(b"ple.com ready\r\n381 more", &creds, &mut ctx);
        assert_eq!(drain(&mut session, &mut ctx), b"AUTHINFO USER user\r\n");

        session.receive(b"\r\n", &creds, &mut ctx);
        assert_eq!(drain(&mut session, &mut ctx), b"AUTHINFO PASS secret\r\n");

        session.receive(b"281 ok\r\n", &creds, &mut ctx);
        assert_eq!(session.mode(), Mode::Command);
        assert_eq!(ctx.idle, [0]);
    }

    #[test]
    fn test_auth_failures_are_fatal() {
        let mut ctx = ctx();
        let mut session = Session::new(0);
        let disposition = session.receive(b"200 hi\r\n381 pass?\r\n", &settings("user", ""), &mut ctx);
        assert_eq!(
            disposition,
            Disposition::Close {
                reason: "need password".to_string(),
                reconnect: false
            }
        );

        let mut session = Session::new(1);
        let creds = settings("user", "bad");
        session.receive(b"200 hi\r\n381 pass?\r\n", &creds, &mut ctx);
        let disposition = session.receive(b"502 denied\r\n", &creds, &mut ctx);
        assert!(matches!(disposition, Disposition::Close { reconnect: false, .. }));
        assert!(ctx.idle.is_empty());
    }

    #[test]
    fn test_unknown_response_parks() {
        let mut ctx = ctx();
        let mut session = Session::new(0);
        session.receive(b"hello there\r\n400 busy\r\n", &settings("", ""), &mut ctx);
        assert_eq!(session.mode(), Mode::Auth);
        assert!(ctx.idle.is_empty());
    }

    #[test]
    fn test_full_post_cycle() {
        let data: Vec<u8> = (0..=255u8).cycle().take(600 * 1024).collect();
        let (article, path) = article_with(&data);
        let mut ctx = ctx();
        let creds = settings("", "");
        let mut session = Session::new(0);

        session.receive(b"200 hi\r\n", &creds, &mut ctx);
        ctx.idle.clear();
        session.assign(article).unwrap();
        assert_eq!(session.mode(), Mode::PostInit);
        assert_eq!(drain(&mut session, &mut ctx), b"POST\r\n");

        session.receive(b"340 send it <hint.1@server>\r\n", &creds, &mut ctx);
        assert_eq!(session.mode(), Mode::PostData);
        assert_eq!(session.article().unwrap().message_id(), "<hint.1@server>");
        assert!(session.pending().len() <= POST_CHUNK_SIZE);

        let wire = drain(&mut session, &mut ctx);
        assert_eq!(session.mode(), Mode::PostDone);
        assert!(wire.ends_with(b"\r\n.\r\n"));
        let body = session.article().unwrap().prepared_body().unwrap().to_vec();
        assert_eq!(&wire[..wire.len() - 3], &body[..]);
        assert_eq!(ctx.stats.bytes, body.len() as u64);
        assert!(String::from_utf8_lossy(&wire).contains("Message-ID: <hint.1@server>\r\n"));

        let start = find(&wire, b"end=614400\r\n") + b"end=614400\r\n".len();
        let stop = find(&wire, b"=yend ");
        assert_eq!(yenc::decode(&wire[start..stop]).unwrap(), data);

        session.receive(b"240 article posted\r\n", &creds, &mut ctx);
        assert_eq!(session.mode(), Mode::Command);
        assert!(!session.is_busy());
        assert_eq!(ctx.idle, [0]);
        assert_eq!(ctx.stats.posted, 1);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_rejections_release_article() {
        let (article, path) = article_with(b"abc");
        let mut ctx = ctx();
        let creds = settings("", "");
        let mut session = Session::new(0);
        session.receive(b"200 hi\r\n", &creds, &mut ctx);
        session.assign(article).unwrap();

        session.receive(b"440 posting not permitted\r\n", &creds, &mut ctx);
        assert!(!session.is_busy());
        assert_eq!(session.mode(), Mode::Command);
        assert_eq!(ctx.stats.rejected, 1);

        let (article, _) = article_with(b"def");
        let second = article.info().filepath.clone();
        session.assign(article).unwrap();
        session.receive(b"340 go\r\n", &creds, &mut ctx);
        drain(&mut session, &mut ctx);
        session.receive(b"441 posting failed\r\n", &creds, &mut ctx);
        assert!(!session.is_busy());
        assert_eq!(ctx.stats.rejected, 2);
        assert_eq!(ctx.idle, [0, 0, 0]);

        std::fs::remove_file(path).unwrap();
        std::fs::remove_file(second).unwrap();
    }

    #[test]
    fn test_assign_requires_idle() {
        let (article, path) = article_with(b"abc");
        let mut session = Session::new(0);
        let article = session.assign(article).unwrap_err();
        let mut ctx = ctx();
        session.receive(b"200 hi\r\n", &settings("", ""), &mut ctx);
        session.assign(article).unwrap();
        let (other, other_path) = article_with(b"x");
        assert!(session.assign(other).is_err());

        assert!(session.reset().is_some());
        assert_eq!(session.mode(), Mode::Auth);
        assert!(!session.wants_write());

        std::fs::remove_file(path).unwrap();
        std::fs::remove_file(other_path).unwrap();
    }

    #[test]
    fn test_unreadable_file_closes_with_reconnect() {
        let (article, path) = article_with(b"abc");
        std::fs::remove_file(&path).unwrap();
        let mut ctx = ctx();
        let creds = settings("", "");
        let mut session = Session::new(0);
        session.receive(b"200 hi\r\n", &creds, &mut ctx);
        session.assign(article).unwrap();
        drain(&mut session, &mut ctx);

        let disposition = session.receive(b"340 go\r\n", &creds, &mut ctx);
        assert!(matches!(disposition, Disposition::Close { reconnect: true, .. }));
        assert!(session.is_busy());
    }

    fn find(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap()
    }
}

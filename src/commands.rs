//! NNTP command builders

/// Build AUTHINFO USER command
pub fn authinfo_user(username: &str) -> String {
    format!("AUTHINFO USER {}\r\n", username)
}

/// Build AUTHINFO PASS command
pub fn authinfo_pass(password: &str) -> String {
    format!("AUTHINFO PASS {}\r\n", password)
}

/// Build POST command (RFC 3977 §6.3.1)
///
/// Server responds with 340 if ready to accept. After 340 the client sends
/// the article terminated by [`END_OF_ARTICLE`].
pub fn post() -> &'static str {
    "POST\r\n"
}

/// Build QUIT command
pub fn quit() -> &'static str {
    "QUIT\r\n"
}

/// Terminator line sent after the article body
pub const END_OF_ARTICLE: &[u8] = b".\r\n";

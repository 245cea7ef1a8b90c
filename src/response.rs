//! NNTP status lines and response codes

/// One NNTP status line: 3-digit code plus the free-form text after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NntpResponse {
    /// 3-digit NNTP response code
    pub code: u16,
    /// Status message from server
    pub message: String,
}

impl NntpResponse {
    /// Parse a status line (without its CRLF)
    ///
    /// Returns `None` when the line does not start with three ASCII digits.
    pub fn parse(line: &str) -> Option<Self> {
        let code = parse_status(line)?;
        let message = line.get(4..).unwrap_or_default().to_string();
        Some(Self { code, message })
    }

    /// Message-ID suggested by the server, if the text carries one
    pub fn message_id(&self) -> Option<&str> {
        extract_message_id(&self.message)
    }
}

/// Parse the status code at the start of a response line
pub fn parse_status(line: &str) -> Option<u16> {
    let digits = line.as_bytes().get(..3)?;
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    line[..3].parse().ok()
}

/// Find the first `<local@domain>` token in `text`
///
/// Servers that pick the Message-ID themselves announce it in the 340 line,
/// e.g. `340 Ok, recommended message-ID <abc.123@host>`.
pub fn extract_message_id(text: &str) -> Option<&str> {
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        let candidate = &rest[start..];
        let Some(end) = candidate.find('>') else {
            return None;
        };
        let id = &candidate[..=end];
        let inner = &id[1..id.len() - 1];
        if let Some((local, domain)) = inner.split_once('@')
            && !local.is_empty()
            && !domain.is_empty()
            && !inner.contains(char::is_whitespace)
            && !inner.contains('<')
        {
            return Some(id);
        }
        rest = &candidate[1..];
    }
    None
}

/// NNTP response codes used while posting (RFC 3977, RFC 4643)
pub mod codes {
    /// Server ready, posting allowed
    pub const READY_POSTING_ALLOWED: u16 = 200;
    /// Server ready, no posting
    pub const READY_NO_POSTING: u16 = 201;
    /// Authentication accepted
    pub const AUTH_ACCEPTED: u16 = 281;
    /// Send article to be posted
    pub const SEND_ARTICLE: u16 = 340;
    /// Continue with authentication
    pub const AUTH_CONTINUE: u16 = 381;
    /// Posting not permitted (RFC 3977 Section 6.3.1)
    pub const POSTING_NOT_PERMITTED: u16 = 440;
    /// Authentication rejected
    pub const AUTH_REJECTED: u16 = 481;
    /// Access denied / command unavailable
    pub const ACCESS_DENIED: u16 = 502;
}

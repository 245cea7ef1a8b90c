//! Connection states and the response-code transition table

use crate::response::codes;

/// Transport-level state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; a reconnect may be scheduled
    Disconnected,
    /// Non-blocking connect in progress
    Connecting,
    /// Socket (and TLS, if any) established
    Connected,
}

/// Protocol mode of a connected session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Waiting for the greeting or for authentication replies
    Auth,
    /// Idle, ready for an article
    Command,
    /// `POST` sent, waiting for 340
    PostInit,
    /// Streaming the article body
    PostData,
    /// Body terminated, waiting for the posting result
    PostDone,
}

/// Which credentials the session has available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credentials {
    /// A username is configured
    pub username: bool,
    /// A password is configured
    pub password: bool,
}

/// Action the session must take for a response line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send `AUTHINFO USER`, stay in [`Mode::Auth`]
    SendUser,
    /// Send `AUTHINFO PASS`, stay in [`Mode::Auth`]
    SendPass,
    /// Enter [`Mode::Command`] and join the idle list
    Ready,
    /// Close for good, no reconnect
    Fatal(&'static str),
    /// 340: prepare the article and start streaming
    SendArticle,
    /// 440 to `POST`: release the article, back to idle
    PostRefused,
    /// 2xx after the body: release the article, back to idle
    Posted,
    /// 44x after the body: release the article, back to idle
    Rejected,
    /// No table entry for this (mode, code); stay where we are
    Unrecognized,
}

/// Look up the step for `code` received in `mode`
pub fn transition(mode: Mode, code: u16, credentials: Credentials) -> Step {
    match (mode, code) {
        (Mode::Auth, codes::READY_POSTING_ALLOWED | codes::READY_NO_POSTING) => {
            if credentials.username {
                Step::SendUser
            } else {
                Step::Ready
            }
        }
        (Mode::Auth, codes::AUTH_CONTINUE) => {
            if credentials.password {
                Step::SendPass
            } else {
                Step::Fatal("need password")
            }
        }
        (Mode::Auth, codes::AUTH_ACCEPTED) => Step::Ready,
        (Mode::Auth, codes::ACCESS_DENIED | codes::AUTH_REJECTED) => {
            Step::Fatal("authentication failure")
        }
        (Mode::PostInit, codes::SEND_ARTICLE) => Step::SendArticle,
        (Mode::PostInit, codes::POSTING_NOT_PERMITTED) => Step::PostRefused,
        (Mode::PostDone, 200..=299) => Step::Posted,
        (Mode::PostDone, 440..=449) => Step::Rejected,
        _ => Step::Unrecognized,
    }
}

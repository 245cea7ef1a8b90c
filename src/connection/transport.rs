//! Non-blocking byte transport: plain TCP or rustls over TCP
//!
//! All I/O goes through `try_read`/`try_write`, so every call returns
//! immediately with data, progress, or `WouldBlock`. TLS is driven sans-io:
//! records are shuttled between the socket and the rustls session by hand.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{PostError, Result};
use crate::poller::Readiness;

/// Send buffer sizes tried in order before connecting
const SEND_BUFFER_SIZES: [usize; 4] = [1 << 17, 1 << 16, 1 << 15, 1 << 14];

/// Create a socket and start a non-blocking connect to `addr`
///
/// The returned stream is usually still connecting; completion is signalled
/// by write readiness and checked with [`connect_result`].
pub fn start_connect(id: usize, addr: SocketAddr, bind: Option<SocketAddr>) -> io::Result<TcpStream> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;

    // Larger send buffers keep big article bodies flowing
    for size in SEND_BUFFER_SIZES {
        if socket.set_send_buffer_size(size).is_ok() {
            break;
        }
    }
    match socket.send_buffer_size() {
        Ok(actual) => debug!("{}: SO_SNDBUF is {}", id, actual),
        Err(e) => warn!("{}: Failed to query send buffer size: {}", id, e),
    }

    if let Some(bind) = bind {
        socket.bind(&bind.into())?;
    }

    socket.set_nonblocking(true)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if connect_in_progress(&e) => {}
        Err(e) => return Err(e),
    }

    TcpStream::from_std(socket.into())
}

#[cfg(unix)]
fn connect_in_progress(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINPROGRESS) || e.kind() == io::ErrorKind::WouldBlock
}

#[cfg(not(unix))]
fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

/// Outcome of a pending connect once the socket reports writable
///
/// `Ok(true)` means connected, `Ok(false)` means still in progress.
pub fn connect_result(stream: &TcpStream) -> io::Result<bool> {
    if let Some(e) = stream.take_error()? {
        return Err(e);
    }
    match stream.peer_addr() {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}

/// Poll one readiness direction, mapping pending to `false`
fn ready(poll: Poll<io::Result<()>>) -> io::Result<bool> {
    match poll {
        Poll::Ready(Ok(())) => Ok(true),
        Poll::Ready(Err(e)) => Err(e),
        Poll::Pending => Ok(false),
    }
}

/// Write readiness of a socket that is still connecting
pub fn poll_connect(stream: &TcpStream, cx: &mut Context<'_>) -> io::Result<Readiness> {
    Ok(Readiness {
        readable: false,
        writable: ready(stream.poll_write_ready(cx))?,
    })
}

/// `Read`/`Write` over a tokio socket without blocking or registering wakers
struct TryIo<'a>(&'a TcpStream);

impl Read for TryIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for TryIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Established byte stream to the server
#[derive(Debug)]
pub enum Transport {
    /// Cleartext TCP
    Plain(TcpStream),
    /// TLS client session over TCP
    Tls(Box<TlsStream>),
}

/// rustls client session paired with its socket
#[derive(Debug)]
pub struct TlsStream {
    tcp: TcpStream,
    tls: ClientConnection,
}

impl Transport {
    /// Wrap a connected socket, starting the TLS handshake if `tls` is set
    pub fn establish(
        stream: TcpStream,
        tls: Option<&Arc<ClientConfig>>,
        host: &str,
    ) -> Result<Self> {
        let Some(config) = tls else {
            return Ok(Self::Plain(stream));
        };

        let server_name = ServerName::try_from(host)
            .map_err(|e| PostError::Tls(format!("Invalid domain: {}", e)))?
            .to_owned();
        let tls = ClientConnection::new(Arc::clone(config), server_name)
            .map_err(|e| PostError::Tls(e.to_string()))?;
        let mut stream = TlsStream { tcp: stream, tls };
        // ClientHello
        stream.flush_tls()?;
        Ok(Self::Tls(Box::new(stream)))
    }

    /// Readiness of the underlying socket; writes are polled only if wanted
    pub fn poll_ready(&self, cx: &mut Context<'_>, want_write: bool) -> io::Result<Readiness> {
        let (tcp, want_write) = match self {
            Self::Plain(tcp) => (tcp, want_write),
            Self::Tls(s) => (&s.tcp, want_write || s.tls.wants_write()),
        };
        Ok(Readiness {
            readable: ready(tcp.poll_read_ready(cx))?,
            writable: want_write && ready(tcp.poll_write_ready(cx))?,
        })
    }

    /// Read decrypted bytes; `Ok(0)` means the peer closed
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(tcp) => tcp.try_read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }

    /// Write bytes, returning how many were accepted
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(tcp) => tcp.try_write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    /// Push out any TLS records still buffered
    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(_) => Ok(()),
            Self::Tls(s) => s.flush_tls(),
        }
    }
}

impl TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.tls.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            // No plaintext buffered, pull another record off the socket
            if self.tls.read_tls(&mut TryIo(&self.tcp))? == 0 {
                return Ok(0);
            }
            self.tls
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            // Handshake messages and alerts may need answering
            self.flush_tls()?;
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.flush_tls()?;
        let n = self.tls.writer().write(buf)?;
        self.flush_tls()?;
        if n == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(n)
    }

    fn flush_tls(&mut self) -> io::Result<()> {
        while self.tls.wants_write() {
            match self.tls.write_tls(&mut TryIo(&self.tcp)) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Dangerous certificate verifier that accepts all certificates
///
/// **Security Warning:** This verifier disables all certificate validation,
/// making connections vulnerable to man-in-the-middle attacks. Only use this
/// with servers you trust on a secure network.
#[derive(Debug)]
struct DangerousAcceptAnyCertificate;

impl ServerCertVerifier for DangerousAcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

/// Client configuration shared by every TLS connection of a run
///
/// Trusts the bundled webpki roots, or anything at all when
/// `allow_insecure` is set.
pub fn tls_config(allow_insecure: bool) -> Arc<ClientConfig> {
    let _ = CryptoProvider::install_default(ring::default_provider());

    let config = if allow_insecure {
        warn!("TLS certificate validation disabled - connection vulnerable to MITM attacks");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };
    Arc::new(config)
}

//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Rcconf.
//
// Rcconf is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Rcconf is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Rcconf. If not, see <http://www.gnu.org/licenses/>.

//! Connectivity checks of the IMAP and SMTP endpoints a configuration names.
//!
//! A probe connects, negotiates TLS the way the webmail application would
//! given the endpoint's TLS options, reads the server's capabilities, then
//! disconnects politely. It never logs in.

use std::io::{self, Read, Write};
use std::mem;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;
use openssl::ssl::{
    HandshakeError, SslConnector, SslMethod, SslStream, SslVerifyMode,
};
use thiserror::Error;

use crate::config::endpoint::{Endpoint, Protocol, Security, TlsOptions};

mod imap;
mod smtp;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lines longer than this are treated as a protocol violation.
const MAX_LINE: usize = 65536;

/// `X509_V_ERR_DEPTH_ZERO_SELF_SIGNED_CERT` and
/// `X509_V_ERR_SELF_SIGNED_CERT_IN_CHAIN`.
const SELF_SIGNED_ERRORS: &[i32] = &[18, 19];

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },
    #[error("{0} does not resolve to any address")]
    NoAddress(String),
    #[error("connection failed: {0}")]
    Connect(io::Error),
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("connection closed by the server")]
    Closed,
    #[error(transparent)]
    Io(io::Error),
    #[error("TLS setup failed: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error("TLS handshake failed: {0}")]
    Handshake(openssl::ssl::Error),
    #[error("server does not offer STARTTLS")]
    StartTlsNotOffered,
    #[error("server sent unencrypted data after accepting STARTTLS")]
    StartTlsInjection,
    #[error("server rejected {command}: {response}")]
    Rejected {
        command: &'static str,
        response: String,
    },
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                Error::Timeout
            }
            _ => Error::Io(e),
        }
    }
}

/// What a successful probe learnt about the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub greeting: String,
    /// The negotiated TLS version, if the session was encrypted.
    pub tls_version: Option<&'static str>,
    /// Capabilities (IMAP) or extensions (SMTP) advertised once any TLS
    /// negotiation was complete.
    pub capabilities: Vec<String>,
}

/// Probe `endpoint`, giving up on any single network operation after
/// `timeout`.
pub fn probe(endpoint: &Endpoint, timeout: Duration) -> Result<Outcome, Error> {
    debug!("{}: probing ({})", endpoint, endpoint.security);
    match endpoint.protocol {
        Protocol::Imap => imap::probe(endpoint, timeout),
        Protocol::Smtp => smtp::probe(endpoint, timeout),
    }
}

/// Strip `prefix` from `s`, ignoring ASCII case.
fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    match s.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => {
            Some(&s[prefix.len()..])
        }
        _ => None,
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
    Closed,
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Stream::Plain(ref mut s) => s.read(buf),
            Stream::Tls(ref mut s) => s.read(buf),
            Stream::Closed => Ok(0),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Stream::Plain(ref mut s) => s.write(buf),
            Stream::Tls(ref mut s) => s.write(buf),
            Stream::Closed => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Stream::Plain(ref mut s) => s.flush(),
            Stream::Tls(ref mut s) => s.flush(),
            Stream::Closed => Ok(()),
        }
    }
}

/// A line-oriented connection to a server, which may be upgraded to TLS.
struct Connection {
    stream: Stream,
    buffer: Vec<u8>,
    peer: String,
    host: String,
    tls: TlsOptions,
}

impl Connection {
    /// Connect to `endpoint`, completing the TLS handshake first if the
    /// endpoint uses implicit TLS.
    fn open(endpoint: &Endpoint, timeout: Duration) -> Result<Self, Error> {
        let addresses = (&*endpoint.host, endpoint.port)
            .to_socket_addrs()
            .map_err(|e| Error::Resolve {
                host: endpoint.host.clone(),
                source: e,
            })?;

        let mut last_error = None;
        let mut stream = None;
        for address in addresses {
            debug!("{}: connecting to {}", endpoint, address);
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!("{}: {}: {}", endpoint, address, e);
                    last_error = Some(e);
                }
            }
        }

        let stream = match (stream, last_error) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(Error::Connect(e)),
            (None, None) => {
                return Err(Error::NoAddress(endpoint.host.clone()))
            }
        };
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let mut connection = Connection {
            stream: Stream::Plain(stream),
            buffer: Vec::new(),
            peer: endpoint.to_string(),
            host: endpoint.host.clone(),
            tls: endpoint.tls.clone(),
        };
        if Security::Implicit == endpoint.security {
            connection.start_tls()?;
        }
        Ok(connection)
    }

    fn read_line(&mut self) -> Result<String, Error> {
        loop {
            if let Some(ix) = self.buffer.iter().position(|&b| b'\n' == b) {
                let line = self.buffer.drain(..=ix).collect::<Vec<u8>>();
                let line = String::from_utf8_lossy(&line)
                    .trim_end_matches(&['\r', '\n'][..])
                    .to_owned();
                debug!("{} S: {}", self.peer, line);
                return Ok(line);
            }

            if self.buffer.len() > MAX_LINE {
                return Err(Error::Protocol(format!(
                    "line longer than {} bytes",
                    MAX_LINE
                )));
            }

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk)?;
            if 0 == n {
                return Err(Error::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), Error> {
        debug!("{} C: {}", self.peer, line);
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        Ok(())
    }

    /// Perform the TLS handshake over the current plain connection.
    fn start_tls(&mut self) -> Result<(), Error> {
        // Anything already buffered was sent in the clear after the server
        // agreed to switch to TLS.
        if !self.buffer.is_empty() {
            return Err(Error::StartTlsInjection);
        }

        let tcp = match mem::replace(&mut self.stream, Stream::Closed) {
            Stream::Plain(tcp) => tcp,
            other => {
                self.stream = other;
                return Err(Error::Protocol(
                    "TLS requested on a connection that is not plain"
                        .to_owned(),
                ));
            }
        };

        let ssl = handshake(tcp, &self.host, &self.tls)?;
        debug!(
            "{}: {} established with {}",
            self.peer,
            ssl.ssl().version_str(),
            ssl.ssl()
                .current_cipher()
                .map(|c| c.name())
                .unwrap_or("unknown cipher"),
        );
        self.stream = Stream::Tls(ssl);
        Ok(())
    }

    fn tls_version(&self) -> Option<&'static str> {
        match self.stream {
            Stream::Tls(ref s) => Some(s.ssl().version_str()),
            _ => None,
        }
    }
}

fn connector(tls: &TlsOptions) -> Result<SslConnector, Error> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;
    if let Some(ref cafile) = tls.cafile {
        builder.set_ca_file(cafile)?;
    }

    if !tls.verify_peer {
        builder.set_verify(SslVerifyMode::NONE);
    } else if tls.allow_self_signed {
        builder.set_verify_callback(SslVerifyMode::PEER, |ok, ctx| {
            ok || SELF_SIGNED_ERRORS.contains(&ctx.error().as_raw())
        });
    }

    Ok(builder.build())
}

fn handshake(
    tcp: TcpStream,
    host: &str,
    tls: &TlsOptions,
) -> Result<SslStream<TcpStream>, Error> {
    let mut config = connector(tls)?.configure()?;
    config.set_verify_hostname(tls.verify_peer && tls.verify_peer_name);

    let name = tls.peer_name.as_deref().unwrap_or(host);
    config.connect(name, tcp).map_err(|e| match e {
        HandshakeError::SetupFailure(es) => Error::Ssl(es),
        HandshakeError::Failure(f) => Error::Handshake(f.into_error()),
        // Only happens when the read timeout expires mid-handshake
        HandshakeError::WouldBlock(_) => Error::Timeout,
    })
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;
    use std::thread;

    use openssl::ssl::SslAcceptor;

    use super::*;
    use crate::test_data::{CERTIFICATE, CERTIFICATE_PRIVATE_KEY};

    /// Play the server side of one conversation over `stream`.
    ///
    /// It sends `greeting`, then answers each line it receives with the
    /// reply of the first entry whose key prefixes the line, or nothing. It
    /// returns every line it received.
    fn converse(
        stream: &mut (impl Read + Write),
        greeting: &str,
        replies: &[(&str, &str)],
    ) -> Vec<String> {
        let mut received = Vec::new();
        if stream.write_all(greeting.as_bytes()).is_err() {
            return received;
        }

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte) {
                Ok(1) => (),
                _ => break,
            }
            if b'\n' != byte[0] {
                line.push(byte[0]);
                continue;
            }

            let text = String::from_utf8_lossy(&line).trim_end().to_owned();
            line.clear();
            if let Some(&(_, reply)) =
                replies.iter().find(|&&(key, _)| text.starts_with(key))
            {
                if stream.write_all(reply.as_bytes()).is_err() {
                    break;
                }
            }
            received.push(text);
        }

        received
    }

    /// Run a fake plain-text server for one connection.
    fn fake_server(
        greeting: &'static str,
        replies: &'static [(&'static str, &'static str)],
    ) -> (u16, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            converse(&mut stream, greeting, replies)
        });

        (port, handle)
    }

    /// Run a fake server for one connection which speaks TLS from the first
    /// byte, presenting the self-signed test certificate.
    ///
    /// Returns nothing if the handshake fails.
    fn fake_tls_server(
        greeting: &'static str,
        replies: &'static [(&'static str, &'static str)],
    ) -> (u16, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(TIMEOUT)).unwrap();

            let mut acceptor =
                SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())
                    .unwrap();
            acceptor.set_private_key(&CERTIFICATE_PRIVATE_KEY).unwrap();
            acceptor.set_certificate(&CERTIFICATE).unwrap();
            let acceptor = acceptor.build();

            match acceptor.accept(stream) {
                Ok(mut stream) => converse(&mut stream, greeting, replies),
                Err(_) => Vec::new(),
            }
        });

        (port, handle)
    }

    fn endpoint(protocol: Protocol, port: u16, security: Security) -> Endpoint {
        Endpoint {
            labels: vec!["test".to_owned()],
            protocol,
            host: "127.0.0.1".to_owned(),
            port,
            security,
            tls: TlsOptions::default(),
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn imap_plain() {
        crate::init_test_log();
        let (port, server) = fake_server(
            "* OK [CAPABILITY IMAP4rev1] test ready\r\n",
            &[
                (
                    "a2 CAPABILITY",
                    "* CAPABILITY IMAP4rev1 AUTH=PLAIN\r\na2 OK done\r\n",
                ),
                ("a3 LOGOUT", "* BYE see you\r\na3 OK bye\r\n"),
            ],
        );

        let outcome =
            probe(&endpoint(Protocol::Imap, port, Security::Plain), TIMEOUT)
                .unwrap();
        assert_eq!("* OK [CAPABILITY IMAP4rev1] test ready", outcome.greeting);
        assert_eq!(None, outcome.tls_version);
        assert_eq!(vec!["IMAP4rev1", "AUTH=PLAIN"], outcome.capabilities);

        assert_eq!(vec!["a2 CAPABILITY", "a3 LOGOUT"], server.join().unwrap());
    }

    #[test]
    fn imap_rejecting_greeting() {
        let (port, _server) = fake_server("* BYE too busy\r\n", &[]);
        assert_matches!(
            Err(Error::Protocol(..)),
            probe(&endpoint(Protocol::Imap, port, Security::Plain), TIMEOUT)
        );
    }

    #[test]
    fn imap_without_starttls() {
        let (port, server) = fake_server(
            "* OK ready\r\n",
            &[("a0 CAPABILITY", "* CAPABILITY IMAP4rev1\r\na0 OK done\r\n")],
        );

        assert_matches!(
            Err(Error::StartTlsNotOffered),
            probe(
                &endpoint(Protocol::Imap, port, Security::StartTls),
                TIMEOUT
            )
        );
        assert_eq!(vec!["a0 CAPABILITY"], server.join().unwrap());
    }

    #[test]
    fn imap_starttls_refused() {
        let (port, _server) = fake_server(
            "* OK ready\r\n",
            &[
                (
                    "a0 CAPABILITY",
                    "* CAPABILITY IMAP4rev1 STARTTLS\r\na0 OK done\r\n",
                ),
                ("a1 STARTTLS", "a1 NO not today\r\n"),
            ],
        );

        match probe(&endpoint(Protocol::Imap, port, Security::StartTls), TIMEOUT)
        {
            Err(Error::Rejected { command, response }) => {
                assert_eq!("STARTTLS", command);
                assert_eq!("NO not today", response);
            }
            r => panic!("unexpected result: {:?}", r),
        }
    }

    #[test]
    fn smtp_plain() {
        crate::init_test_log();
        let (port, server) = fake_server(
            "220 test ESMTP ready\r\n",
            &[
                ("EHLO ", "250-test\r\n250-PIPELINING\r\n250 8BITMIME\r\n"),
                ("QUIT", "221 bye\r\n"),
            ],
        );

        let outcome =
            probe(&endpoint(Protocol::Smtp, port, Security::Plain), TIMEOUT)
                .unwrap();
        assert_eq!("220 test ESMTP ready", outcome.greeting);
        assert_eq!(vec!["PIPELINING", "8BITMIME"], outcome.capabilities);

        let received = server.join().unwrap();
        assert_eq!(2, received.len());
        assert!(received[0].starts_with("EHLO "));
        assert_eq!("QUIT", received[1]);
    }

    #[test]
    fn smtp_without_starttls() {
        let (port, server) = fake_server(
            "220 test ESMTP\r\n",
            &[("EHLO ", "250-test\r\n250 8BITMIME\r\n")],
        );

        assert_matches!(
            Err(Error::StartTlsNotOffered),
            probe(
                &endpoint(Protocol::Smtp, port, Security::StartTls),
                TIMEOUT
            )
        );
        let received = server.join().unwrap();
        assert_eq!(1, received.len());
        assert!(received[0].starts_with("EHLO "));
    }

    #[test]
    fn smtp_starttls_refused() {
        let (port, _server) = fake_server(
            "220 test ESMTP\r\n",
            &[
                ("EHLO ", "250-test\r\n250 STARTTLS\r\n"),
                ("STARTTLS", "454 TLS not available\r\n"),
            ],
        );

        assert_matches!(
            Err(Error::Rejected {
                command: "STARTTLS",
                ..
            }),
            probe(
                &endpoint(Protocol::Smtp, port, Security::StartTls),
                TIMEOUT
            )
        );
    }

    #[test]
    fn smtp_unavailable_greeting() {
        let (port, _server) =
            fake_server("554 no service for you\r\n", &[]);
        assert_matches!(
            Err(Error::Rejected {
                command: "connection",
                ..
            }),
            probe(&endpoint(Protocol::Smtp, port, Security::Plain), TIMEOUT)
        );
    }

    #[test]
    fn connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        assert_matches!(
            Err(Error::Connect(..)),
            probe(&endpoint(Protocol::Imap, port, Security::Plain), TIMEOUT)
        );
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(2));
            drop(stream);
        });

        assert_matches!(
            Err(Error::Timeout),
            probe(
                &endpoint(Protocol::Smtp, port, Security::Plain),
                Duration::from_millis(200)
            )
        );
        server.join().unwrap();
    }

    #[test]
    fn imap_data_injected_before_tls() {
        let (port, _server) = fake_server(
            "* OK ready\r\n",
            &[
                (
                    "a0 CAPABILITY",
                    "* CAPABILITY IMAP4rev1 STARTTLS\r\na0 OK done\r\n",
                ),
                ("a1 STARTTLS", "a1 OK\r\n* injected\r\n"),
            ],
        );

        assert_matches!(
            Err(Error::StartTlsInjection),
            probe(
                &endpoint(Protocol::Imap, port, Security::StartTls),
                TIMEOUT
            )
        );
    }

    #[test]
    fn smtp_data_injected_before_tls() {
        let (port, _server) = fake_server(
            "220 test ESMTP\r\n",
            &[
                ("EHLO ", "250-test\r\n250 STARTTLS\r\n"),
                ("STARTTLS", "220 go\r\n250 x\r\n"),
            ],
        );

        assert_matches!(
            Err(Error::StartTlsInjection),
            probe(
                &endpoint(Protocol::Smtp, port, Security::StartTls),
                TIMEOUT
            )
        );
    }

    #[test]
    fn verify_modes_follow_tls_options() {
        let mode = |tls: TlsOptions| {
            connector(&tls).unwrap().configure().unwrap().verify_mode()
        };

        assert_eq!(SslVerifyMode::PEER, mode(TlsOptions::default()));
        assert_eq!(
            SslVerifyMode::NONE,
            mode(TlsOptions {
                verify_peer: false,
                ..TlsOptions::default()
            })
        );
        assert_eq!(
            SslVerifyMode::PEER,
            mode(TlsOptions {
                allow_self_signed: true,
                ..TlsOptions::default()
            })
        );
    }

    const TLS_REPLIES: &[(&str, &str)] = &[
        ("a2 CAPABILITY", "* CAPABILITY IMAP4rev1\r\na2 OK done\r\n"),
        ("a3 LOGOUT", "* BYE\r\na3 OK bye\r\n"),
    ];

    fn implicit_tls(port: u16, tls: TlsOptions) -> Endpoint {
        Endpoint {
            tls,
            ..endpoint(Protocol::Imap, port, Security::Implicit)
        }
    }

    #[test]
    fn self_signed_certificate_rejected_by_default() {
        crate::init_test_log();
        let (port, server) = fake_tls_server("* OK tls ready\r\n", TLS_REPLIES);

        assert_matches!(
            Err(Error::Handshake(..)),
            probe(&implicit_tls(port, TlsOptions::default()), TIMEOUT)
        );
        assert!(server.join().unwrap().is_empty());
    }

    #[test]
    fn self_signed_certificate_allowed() {
        crate::init_test_log();
        let (port, server) = fake_tls_server("* OK tls ready\r\n", TLS_REPLIES);

        let outcome = probe(
            &implicit_tls(
                port,
                TlsOptions {
                    allow_self_signed: true,
                    // The certificate names localhost, not 127.0.0.1
                    verify_peer_name: false,
                    ..TlsOptions::default()
                },
            ),
            TIMEOUT,
        )
        .unwrap();
        assert_eq!("* OK tls ready", outcome.greeting);
        assert!(outcome.tls_version.is_some());
        assert_eq!(vec!["IMAP4rev1"], outcome.capabilities);
        assert_eq!(vec!["a2 CAPABILITY", "a3 LOGOUT"], server.join().unwrap());
    }

    #[test]
    fn unverified_peer_accepted() {
        let (port, server) = fake_tls_server("* OK tls ready\r\n", TLS_REPLIES);

        let outcome = probe(
            &implicit_tls(
                port,
                TlsOptions {
                    verify_peer: false,
                    ..TlsOptions::default()
                },
            ),
            TIMEOUT,
        )
        .unwrap();
        assert!(outcome.tls_version.is_some());
        assert_eq!(2, server.join().unwrap().len());
    }

    #[test]
    fn prefix_stripping() {
        assert_eq!(
            Some("IMAP4rev1"),
            strip_prefix_ci("* capability IMAP4rev1", "* CAPABILITY ")
        );
        assert_eq!(None, strip_prefix_ci("* OK", "* CAPABILITY "));
    }
}

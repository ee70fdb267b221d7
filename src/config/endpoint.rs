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

//! Extraction of the IMAP and SMTP endpoints an effective configuration
//! points at.

use std::fmt;

use thiserror::Error;

use super::value::{Array, Value};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("empty host name")]
    EmptyHost,
    #[error("unsupported scheme '{0}://'")]
    UnsupportedScheme(String),
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("unterminated '[' in host '{0}'")]
    UnterminatedBracket(String),
    #[error("{0}: no host configured")]
    MissingHost(String),
    #[error("{option}: expected {expected}, got {got}")]
    WrongType {
        option: String,
        expected: &'static str,
        got: &'static str,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    Imap,
    Smtp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Protocol::Imap => write!(f, "imap"),
            Protocol::Smtp => write!(f, "smtp"),
        }
    }
}

/// How a connection to an endpoint gets (or doesn't get) TLS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte.
    Implicit,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    Plain,
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Security::Implicit => write!(f, "tls"),
            Security::StartTls => write!(f, "starttls"),
            Security::Plain => write!(f, "plain"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    /// `ssl://`
    Ssl,
    /// `tls://`
    Tls,
}

/// A parsed host option such as `ssl://mail.example.com:993`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostSpec {
    pub scheme: Option<Scheme>,
    pub host: String,
    pub port: Option<u16>,
}

pub fn parse_host(s: &str) -> Result<HostSpec, Error> {
    let (scheme, rest) = match s.find("://") {
        Some(ix) => {
            let scheme = match &*s[..ix].to_ascii_lowercase() {
                "ssl" => Scheme::Ssl,
                "tls" => Scheme::Tls,
                _ => return Err(Error::UnsupportedScheme(s[..ix].to_owned())),
            };
            (Some(scheme), &s[ix + 3..])
        }
        None => (None, s),
    };

    let (host, port) = if rest.starts_with('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| Error::UnterminatedBracket(s.to_owned()))?;
        let after = &rest[end + 1..];
        let port = if after.is_empty() {
            None
        } else if after.starts_with(':') {
            Some(&after[1..])
        } else {
            return Err(Error::InvalidPort(after.to_owned()));
        };
        (&rest[1..end], port)
    } else {
        match rest.rfind(':') {
            Some(ix) => (&rest[..ix], Some(&rest[ix + 1..])),
            None => (rest, None),
        }
    };

    if host.is_empty() {
        return Err(Error::EmptyHost);
    }

    let port = match port {
        None => None,
        Some(p) => match p.parse::<u16>() {
            Ok(p) if p > 0 => Some(p),
            _ => return Err(Error::InvalidPort(p.to_owned())),
        },
    };

    Ok(HostSpec {
        scheme,
        host: host.to_owned(),
        port,
    })
}

/// The subset of PHP stream TLS context options that affect whether a
/// connection succeeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsOptions {
    pub verify_peer: bool,
    pub verify_peer_name: bool,
    pub allow_self_signed: bool,
    pub peer_name: Option<String>,
    pub cafile: Option<String>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        TlsOptions {
            verify_peer: true,
            verify_peer_name: true,
            allow_self_signed: false,
            peer_name: None,
            cafile: None,
        }
    }
}

impl TlsOptions {
    /// Read TLS options from a `*_conn_options` value.
    ///
    /// The `ssl` sub-array is used if present, else `tls`. Anything of the
    /// wrong shape is ignored and the default used in its place; validation
    /// reports such values separately.
    pub fn from_conn_options(conn_options: Option<&Value>) -> Self {
        let mut tls = TlsOptions::default();

        let context = conn_options.and_then(Value::as_array).and_then(|a| {
            a.get("ssl")
                .or_else(|| a.get("tls"))
                .and_then(Value::as_array)
        });
        let context = match context {
            Some(c) => c,
            None => return tls,
        };

        let flag = |name: &str, default: bool| {
            context.get(name).and_then(Value::as_bool).unwrap_or(default)
        };
        tls.verify_peer = flag("verify_peer", tls.verify_peer);
        tls.verify_peer_name = flag("verify_peer_name", tls.verify_peer_name);
        tls.allow_self_signed =
            flag("allow_self_signed", tls.allow_self_signed);
        tls.peer_name = context
            .get("peer_name")
            .and_then(Value::as_str)
            .map(str::to_owned);
        tls.cafile = context
            .get("cafile")
            .and_then(Value::as_str)
            .map(str::to_owned);
        tls
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Where this endpoint is configured: `default` for the global options,
    /// otherwise the `mail_domain` entries routing to it.
    pub labels: Vec<String>,
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub tls: TlsOptions,
}

impl Endpoint {
    fn same_target(&self, other: &Endpoint) -> bool {
        self.protocol == other.protocol
            && self.host == other.host
            && self.port == other.port
            && self.security == other.security
            && self.tls == other.tls
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{} [{}]:{}", self.protocol, self.host, self.port)
        } else {
            write!(f, "{} {}:{}", self.protocol, self.host, self.port)
        }
    }
}

pub const DEFAULT_LABEL: &str = "default";

/// The security a connection gets when the host option has no scheme.
fn implied_security(protocol: Protocol, port: u16) -> Security {
    match (protocol, port) {
        (Protocol::Imap, 993) | (Protocol::Smtp, 465) => Security::Implicit,
        (Protocol::Imap, 143) | (Protocol::Smtp, 587) => Security::StartTls,
        _ => Security::Plain,
    }
}

fn default_port(protocol: Protocol, scheme: Option<Scheme>) -> u16 {
    match (protocol, scheme) {
        (Protocol::Imap, Some(Scheme::Ssl)) => 993,
        (Protocol::Imap, _) => 143,
        (Protocol::Smtp, Some(Scheme::Ssl)) => 465,
        (Protocol::Smtp, _) => 587,
    }
}

fn string_option<'a>(
    options: &'a Array,
    option: &str,
    context: &str,
) -> Result<Option<&'a str>, Error> {
    match options.get(option) {
        None | Some(&Value::Null) => Ok(None),
        Some(&Value::Str(ref s)) => Ok(Some(s.as_str())),
        Some(v) => Err(Error::WrongType {
            option: format!("{}{}", context, option),
            expected: "a string",
            got: v.kind_name(),
        }),
    }
}

fn port_option(
    options: &Array,
    option: &str,
    context: &str,
) -> Result<Option<u16>, Error> {
    match options.get(option) {
        None | Some(&Value::Null) => Ok(None),
        Some(&Value::Int(i)) if i > 0 && i <= 65535 => Ok(Some(i as u16)),
        Some(&Value::Int(i)) => Err(Error::InvalidPort(i.to_string())),
        Some(v) => Err(Error::WrongType {
            option: format!("{}{}", context, option),
            expected: "an integer",
            got: v.kind_name(),
        }),
    }
}

fn build(
    label: &str,
    protocol: Protocol,
    host: &str,
    port: Option<u16>,
    tls: &TlsOptions,
) -> Result<Endpoint, Error> {
    let spec = parse_host(host)?;
    let port = spec
        .port
        .or(port)
        .unwrap_or_else(|| default_port(protocol, spec.scheme));
    let security = match spec.scheme {
        Some(Scheme::Ssl) => Security::Implicit,
        Some(Scheme::Tls) => Security::StartTls,
        None => implied_security(protocol, port),
    };

    Ok(Endpoint {
        labels: vec![label.to_owned()],
        protocol,
        host: spec.host,
        port,
        security,
        tls: tls.clone(),
    })
}

fn add(endpoints: &mut Vec<Endpoint>, endpoint: Endpoint) {
    if let Some(existing) =
        endpoints.iter_mut().find(|e| e.same_target(&endpoint))
    {
        existing.labels.extend(endpoint.labels);
    } else {
        endpoints.push(endpoint);
    }
}

/// Collect the distinct endpoints named by an effective option mapping.
///
/// The global endpoints come from `imap_host` (or `default_host`) with
/// `default_port`, and `smtp_host` (or `smtp_server`) with `smtp_port`.
/// Each `mail_domain` route contributes its own hosts and ports, using the
/// global connection options. Endpoints that coincide are merged, keeping
/// every label.
pub fn endpoints(options: &Array) -> Result<Vec<Endpoint>, Error> {
    let imap_tls =
        TlsOptions::from_conn_options(options.get("imap_conn_options"));
    let smtp_tls =
        TlsOptions::from_conn_options(options.get("smtp_conn_options"));
    let mut endpoints = Vec::new();

    let imap_host = match string_option(options, "imap_host", "")? {
        Some(h) => Some(h),
        None => string_option(options, "default_host", "")?,
    };
    if let Some(host) = imap_host {
        let port = port_option(options, "default_port", "")?;
        add(
            &mut endpoints,
            build(DEFAULT_LABEL, Protocol::Imap, host, port, &imap_tls)?,
        );
    }

    let smtp_host = match string_option(options, "smtp_host", "")? {
        Some(h) => Some(h),
        None => string_option(options, "smtp_server", "")?,
    };
    if let Some(host) = smtp_host {
        let port = port_option(options, "smtp_port", "")?;
        add(
            &mut endpoints,
            build(DEFAULT_LABEL, Protocol::Smtp, host, port, &smtp_tls)?,
        );
    }

    let routes = match options.get("mail_domain") {
        None | Some(&Value::Null) => return Ok(endpoints),
        Some(&Value::Array(ref routes)) => routes,
        Some(v) => {
            return Err(Error::WrongType {
                option: "mail_domain".to_owned(),
                expected: "a map",
                got: v.kind_name(),
            })
        }
    };

    for (domain, route) in routes.iter() {
        let domain = domain.to_string();
        let context = format!("mail_domain.{}.", domain);
        let route = route.as_array().ok_or_else(|| Error::WrongType {
            option: format!("mail_domain.{}", domain),
            expected: "a map",
            got: route.kind_name(),
        })?;

        for &(protocol, host_option, port_option_name, tls) in &[
            (Protocol::Imap, "imap_host", "imap_port", &imap_tls),
            (Protocol::Smtp, "smtp_host", "smtp_port", &smtp_tls),
        ] {
            let host = string_option(route, host_option, &context)?
                .ok_or_else(|| {
                    Error::MissingHost(format!("{}{}", context, host_option))
                })?;
            let port = port_option(route, port_option_name, &context)?;
            add(&mut endpoints, build(&domain, protocol, host, port, tls)?);
        }
    }

    Ok(endpoints)
}

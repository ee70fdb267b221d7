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

//! Checks of documents and effective mappings against the option schema and
//! the deployment's own rules.
//!
//! Nothing here stops at the first problem. Every check appends to a
//! `Report`, and the caller decides what to do with errors and warnings.

use std::collections::BTreeSet;
use std::fmt;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

use super::document::Document;
use super::endpoint;
use super::layer::Resolution;
use super::schema::{self, Kind};
use super::value::{Array, Key, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// The document the problem was found in, or `effective`.
    pub source: String,
    pub option: String,
    pub line: Option<u32>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        write!(f, ": {}: {}: {}", self.severity, self.option, self.message)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Report {
    diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn errors(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warnings(&self) -> usize {
        self.count(Severity::Warning)
    }

    #[cfg(test)]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| severity == d.severity)
            .count()
    }
}

/// Deployment rules that vary between profiles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Policy {
    /// Report unknown option names as warnings instead of errors.
    pub allow_unknown_options: bool,
    /// If set, `mail_domain` must route exactly these domains.
    pub expected_domains: Option<Vec<String>>,
}

pub const EFFECTIVE: &str = "effective";

lazy_static! {
    static ref DOMAIN: Regex = Regex::new(
        "^(?i)[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\
         (\\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)+$"
    )
    .unwrap();
    static ref PLUGIN_NAME: Regex = Regex::new("^[a-z0-9_]+$").unwrap();
    static ref LANGUAGE: Regex = Regex::new("^[a-z]{2,3}(_[A-Z]{2})?$").unwrap();
    static ref TIMEZONE: Regex =
        Regex::new("^(UTC|auto|[A-Z][A-Za-z_-]+(/[A-Za-z0-9_+-]+)+)$")
            .unwrap();
    static ref URL: Regex = Regex::new("^(?i)https?://[^\\s/]+\\S*$").unwrap();
    static ref DSN: Regex =
        Regex::new("^(?P<driver>[a-z0-9]+)://(?P<rest>.*)$").unwrap();
    static ref NETWORK_DSN: Regex =
        Regex::new("^([^@/]*@)?[^@/]+/[^/?]+(\\?.*)?$").unwrap();
    static ref OCTAL_MODE: Regex = Regex::new("^0?[0-7]{3}$").unwrap();
}

pub const DSN_DRIVERS: &[&str] = &["sqlite", "mysql", "pgsql", "sqlsrv", "oracle"];

const ROUTE_KEYS: &[&str] = &["imap_host", "imap_port", "smtp_host", "smtp_port"];

const TLS_FLAGS: &[&str] = &[
    "verify_peer",
    "verify_peer_name",
    "allow_self_signed",
    "SNI_enabled",
    "disable_compression",
    "capture_peer_cert",
];

const TLS_STRINGS: &[&str] = &[
    "peer_name",
    "cafile",
    "capath",
    "local_cert",
    "local_pk",
    "passphrase",
    "ciphers",
];

const TLS_OTHER: &[&str] = &["verify_depth", "crypto_method", "security_level"];

/// Where diagnostics for the option being checked go.
struct Checker<'a> {
    report: &'a mut Report,
    source: &'a str,
    option: String,
    line: Option<u32>,
}

impl Checker<'_> {
    fn emit(&mut self, severity: Severity, message: String) {
        self.report.push(Diagnostic {
            severity,
            source: self.source.to_owned(),
            option: self.option.clone(),
            line: self.line,
            message,
        });
    }

    fn error(&mut self, message: impl Into<String>) {
        self.emit(Severity::Error, message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.emit(Severity::Warning, message.into());
    }

    /// Run `f` with diagnostics attributed to `option.sub`.
    fn nested(&mut self, sub: &str, f: impl FnOnce(&mut Self)) {
        let len = self.option.len();
        self.option.push('.');
        self.option.push_str(sub);
        f(self);
        self.option.truncate(len);
    }

    fn mismatch(&mut self, expected: &str, got: &Value) {
        self.error(format!("expected {}, got {}", expected, got.kind_name()));
    }
}

/// Check every option `document` defines.
pub fn validate_document(
    document: &Document,
    policy: &Policy,
    report: &mut Report,
) {
    for (key, value) in document.options().iter() {
        let option = key.to_string();
        let mut checker = Checker {
            report: &mut *report,
            source: document.name(),
            line: document.line_of(&option),
            option,
        };

        match schema::lookup(&checker.option) {
            None if policy.allow_unknown_options => {
                checker.warn("unknown option")
            }
            None => checker.error("unknown option"),
            Some(kind) => {
                if check_kind(&mut checker, kind, value) {
                    check_option(&mut checker, value);
                }
            }
        }
    }
}

/// Check the rules that only make sense for the complete, layered
/// configuration.
pub fn validate_effective(
    resolution: &Resolution,
    policy: &Policy,
    report: &mut Report,
) {
    if is_unset(resolution.get("db_dsnw")) {
        effective(report, "db_dsnw").error("required option is not set");
    }
    if is_unset(resolution.get("imap_host"))
        && is_unset(resolution.get("default_host"))
    {
        effective(report, "default_host").error("no IMAP host is configured");
    }
    if is_unset(resolution.get("smtp_host"))
        && is_unset(resolution.get("smtp_server"))
    {
        effective(report, "smtp_host").error("no SMTP host is configured");
    }

    if let Some(ref expected) = policy.expected_domains {
        let expected = expected.iter().map(|s| &**s).collect::<BTreeSet<_>>();
        let actual = resolution
            .get("mail_domain")
            .and_then(Value::as_array)
            .map(|routes| {
                routes
                    .keys()
                    .map(|k| k.to_string())
                    .collect::<BTreeSet<_>>()
            })
            .unwrap_or_default();

        let mut checker = effective(report, "mail_domain");
        for missing in expected.iter().filter(|d| !actual.contains(**d)) {
            checker.error(format!("expected domain {} is not routed", missing));
        }
        for extra in actual.iter().filter(|d| !expected.contains(&***d)) {
            checker.error(format!("domain {} is routed but not expected", extra));
        }
    }

    let plugins = resolution
        .get("plugins")
        .and_then(Value::as_array)
        .map(|a| a.values().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    for &(plugin, option) in
        &[("password", "password_driver"), ("carddav", "carddav_url")]
    {
        if plugins.contains(&plugin) && is_unset(resolution.get(option)) {
            effective(report, option).warn(format!(
                "the {} plugin is enabled but {} is not set",
                plugin, option
            ));
        }
    }
}

fn effective<'a>(report: &'a mut Report, option: &str) -> Checker<'a> {
    Checker {
        report,
        source: EFFECTIVE,
        option: option.to_owned(),
        line: None,
    }
}

fn is_unset(value: Option<&Value>) -> bool {
    value.map_or(true, Value::is_empty)
}

fn in_set(set: &[&str], s: &str) -> bool {
    set.iter().any(|c| c.eq_ignore_ascii_case(s))
}

/// Check `value` against `kind`. Returns whether the value had the right
/// shape for the option-specific rules to apply.
fn check_kind(checker: &mut Checker<'_>, kind: Kind, value: &Value) -> bool {
    // Null leaves the application default in place
    if Value::Null == *value {
        return true;
    }

    match (kind, value) {
        (Kind::Any, _) => (),
        (Kind::Bool, &Value::Bool(_)) => (),
        (Kind::Int, &Value::Int(_)) => (),
        (Kind::PositiveInt, &Value::Int(i)) => {
            if i <= 0 {
                checker.error(format!("must be positive, got {}", i));
            }
        }
        (Kind::Port, &Value::Int(i)) => check_port(checker, i),
        (Kind::Str, &Value::Str(_)) => (),
        (Kind::Url, &Value::Str(ref s)) => {
            if !s.is_empty() && !URL.is_match(s) {
                checker.error(format!("'{}' is not an http(s) URL", s));
            }
        }
        (Kind::Dsn, &Value::Str(ref s)) => check_dsn(checker, s),
        (Kind::Host, &Value::Str(ref s)) => check_host(checker, s),
        (Kind::Choice(set), &Value::Str(ref s)) => {
            if !in_set(set, s) {
                checker.error(format!(
                    "unknown value '{}', expected one of: {}",
                    s,
                    set.join(", ")
                ));
            }
        }
        (Kind::Suggest(set), &Value::Str(ref s)) => {
            if !in_set(set, s) {
                checker.warn(format!(
                    "unrecognised value '{}', known values are: {}",
                    s,
                    set.join(", ")
                ));
            }
        }
        (Kind::ChoiceOrFalse(_), &Value::Bool(false)) => (),
        (Kind::ChoiceOrFalse(set), &Value::Str(ref s)) => {
            if !in_set(set, s) {
                checker.error(format!(
                    "unknown value '{}', expected false or one of: {}",
                    s,
                    set.join(", ")
                ));
            }
        }
        (Kind::Constant(_), &Value::Int(_)) => (),
        (Kind::Constant(set), &Value::Const(ref c)) => {
            if !set.contains(&&**c) {
                checker.error(format!("unknown constant {}", c));
            }
        }
        (Kind::StringList, &Value::Array(ref a)) => check_string_list(checker, a),
        (Kind::ConnOptions, &Value::Array(ref a)) => {
            check_conn_options(checker, a)
        }
        (Kind::DomainRoutes, &Value::Array(ref a)) => {
            check_domain_routes(checker, a)
        }

        (Kind::Bool, v) => {
            checker.mismatch("a boolean", v);
            return false;
        }
        (Kind::Int, v) | (Kind::PositiveInt, v) | (Kind::Port, v) => {
            checker.mismatch("an integer", v);
            return false;
        }
        (Kind::Str, v)
        | (Kind::Url, v)
        | (Kind::Dsn, v)
        | (Kind::Host, v)
        | (Kind::Choice(_), v)
        | (Kind::Suggest(_), v) => {
            checker.mismatch("a string", v);
            return false;
        }
        (Kind::ChoiceOrFalse(_), v) => {
            checker.mismatch("a string or false", v);
            return false;
        }
        (Kind::Constant(_), v) => {
            checker.mismatch("a constant or integer", v);
            return false;
        }
        (Kind::StringList, v) => {
            checker.mismatch("a list", v);
            return false;
        }
        (Kind::ConnOptions, v) | (Kind::DomainRoutes, v) => {
            checker.mismatch("a map", v);
            return false;
        }
    }

    true
}

/// Rules tied to particular options rather than to their kind.
fn check_option(checker: &mut Checker<'_>, value: &Value) {
    let option = checker.option.clone();
    match &*option {
        "enable_installer" => {
            if Value::Bool(false) != *value {
                checker.error(
                    "the installer must be disabled with an explicit false",
                );
            }
        }
        "force_https" => {
            if Value::Bool(false) == *value {
                checker.warn("HTTPS is not enforced");
            }
        }
        "language" => {
            if let Some(s) = value.as_str() {
                if !LANGUAGE.is_match(s) {
                    checker.warn(format!(
                        "'{}' does not look like a locale such as en_US",
                        s
                    ));
                }
            }
        }
        "timezone" => {
            if let Some(s) = value.as_str() {
                if !TIMEZONE.is_match(s) {
                    checker.warn(format!(
                        "'{}' does not look like a time zone such as \
                         Europe/Warsaw",
                        s
                    ));
                }
            }
        }
        "des_key" => {
            if let Some(s) = value.as_str() {
                if 24 != s.len() {
                    checker.warn(format!(
                        "should be exactly 24 characters, got {}",
                        s.len()
                    ));
                }
            }
        }
        _ => (),
    }
}

fn check_port(checker: &mut Checker<'_>, port: i64) {
    if port < 1 || port > 65535 {
        checker.error(format!("port {} is outside 1-65535", port));
    }
}

fn check_host(checker: &mut Checker<'_>, host: &str) {
    if let Err(e) = endpoint::parse_host(host) {
        checker.error(format!("invalid host '{}': {}", host, e));
    }
}

fn check_dsn(checker: &mut Checker<'_>, dsn: &str) {
    let captures = match DSN.captures(dsn) {
        Some(c) => c,
        None => {
            checker.error("not a DSN of the form driver://...");
            return;
        }
    };

    let driver = &captures["driver"];
    let rest = &captures["rest"];
    if !DSN_DRIVERS.contains(&driver) {
        checker.error(format!(
            "unknown database driver '{}', expected one of: {}",
            driver,
            DSN_DRIVERS.join(", ")
        ));
        return;
    }

    if "sqlite" != driver {
        if !NETWORK_DSN.is_match(rest) {
            checker.error(format!(
                "{} DSN must be of the form {}://[user[:pass]@]host/database",
                driver, driver
            ));
        }
        return;
    }

    let (path, params) = match rest.find('?') {
        Some(ix) => (&rest[..ix], &rest[ix + 1..]),
        None => (rest, ""),
    };
    // The first slash ends the (empty) host part, so an absolute database
    // path needs another one: sqlite:////path/to/db
    match path.find('/') {
        Some(ix) if path[ix + 1..].starts_with('/') => (),
        Some(ix) => checker.error(format!(
            "sqlite path '{}' is not absolute",
            &path[ix + 1..]
        )),
        None => checker.error(format!(
            "sqlite DSN '{}' has no database path",
            dsn
        )),
    }

    for param in params.split('&').filter(|p| !p.is_empty()) {
        let mut parts = param.splitn(2, '=');
        let name = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        if "mode" == name && !OCTAL_MODE.is_match(value) {
            checker.error(format!("sqlite mode '{}' is not octal", value));
        }
    }
}

fn check_string_list(checker: &mut Checker<'_>, list: &Array) {
    if !list.is_list() {
        checker.error("must be a list without explicit keys");
    }

    let mut seen = BTreeSet::new();
    for value in list.values() {
        let name = match *value {
            Value::Str(ref s) if !s.is_empty() => s,
            Value::Str(_) => {
                checker.error("contains an empty name");
                continue;
            }
            ref v => {
                checker.mismatch("a string entry", v);
                continue;
            }
        };

        if !seen.insert(name) {
            checker.error(format!("'{}' is listed more than once", name));
        }
        if !PLUGIN_NAME.is_match(name) {
            checker.warn(format!("'{}' is not a conventional name", name));
        }
    }
}

fn check_conn_options(checker: &mut Checker<'_>, options: &Array) {
    for (key, value) in options.iter() {
        let key = key.to_string();
        match &*key {
            "ssl" | "tls" => checker.nested(&key, |checker| match *value {
                Value::Array(ref context) => check_tls_context(checker, context),
                ref v => checker.mismatch("a map", v),
            }),
            "socket" => checker.nested(&key, |checker| {
                if value.as_array().is_none() {
                    checker.mismatch("a map", value);
                }
            }),
            _ => checker.error(format!(
                "unknown context '{}', expected ssl, tls or socket",
                key
            )),
        }
    }
}

fn check_tls_context(checker: &mut Checker<'_>, context: &Array) {
    for (key, value) in context.iter() {
        let key = key.to_string();
        checker.nested(&key, |checker| {
            if TLS_FLAGS.contains(&&*key) {
                if value.as_bool().is_none() {
                    checker.mismatch("a boolean", value);
                }
            } else if TLS_STRINGS.contains(&&*key) {
                if value.as_str().is_none() {
                    checker.mismatch("a string", value);
                }
            } else if !TLS_OTHER.contains(&&*key) {
                checker.warn("unknown TLS context option");
            }
        });
    }

    if Some(&Value::Bool(false)) == context.get("verify_peer") {
        checker.warn("peer certificate verification is disabled");
    } else if Some(&Value::Bool(false)) == context.get("verify_peer_name") {
        checker.warn("peer name verification is disabled");
    }
}

fn check_domain_routes(checker: &mut Checker<'_>, routes: &Array) {
    for (domain, route) in routes.iter() {
        let domain = match *domain {
            Key::Str(ref d) => d,
            Key::Int(i) => {
                checker.error(format!("entry {} is not keyed by a domain", i));
                continue;
            }
        };

        checker.nested(domain, |checker| {
            if !DOMAIN.is_match(domain) {
                checker.error("not a valid domain name");
            }

            let route = match *route {
                Value::Array(ref r) => r,
                ref v => return checker.mismatch("a map", v),
            };

            for &required in ROUTE_KEYS {
                if is_unset(route.get(required)) {
                    checker.error(format!("{} is missing or empty", required));
                }
            }

            for (key, value) in route.iter() {
                let key = key.to_string();
                checker.nested(&key, |checker| match &*key {
                    "imap_host" | "smtp_host" => {
                        check_kind(checker, Kind::Host, value);
                    }
                    "imap_port" | "smtp_port" => {
                        check_kind(checker, Kind::Port, value);
                    }
                    _ => checker.warn("unknown routing option"),
                });
            }
        });
    }
}

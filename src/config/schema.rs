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

//! The table of option names the webmail application recognises, and what
//! kind of value each takes.
//!
//! This is not the full set the application supports; it is the set this
//! deployment uses plus the options an operator is likely to reach for. An
//! option missing from here is reported as unknown, which is how typos are
//! caught, since the application itself silently ignores unknown keys.

use std::collections::HashMap;

use lazy_static::lazy_static;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Bool,
    Int,
    PositiveInt,
    /// An integer in 1..=65535.
    Port,
    Str,
    /// Empty, or an `http://` or `https://` URL.
    Url,
    /// A database DSN.
    Dsn,
    /// A host name, optionally with `ssl://` or `tls://` and a `:port`.
    Host,
    /// A case-insensitive string from the set; anything else is an error.
    Choice(&'static [&'static str]),
    /// Like `Choice`, but other values only earn a warning.
    Suggest(&'static [&'static str]),
    /// `false`, or a `Choice` from the set.
    ChoiceOrFalse(&'static [&'static str]),
    /// A bare constant from the set, or an integer.
    Constant(&'static [&'static str]),
    /// A list of distinct non-empty strings.
    StringList,
    /// PHP stream context options (`ssl`, `tls`, `socket` sub-arrays).
    ConnOptions,
    /// Per-domain IMAP/SMTP routing table.
    DomainRoutes,
    Any,
}

pub const AUTH_TYPES: &[&str] = &[
    "LOGIN",
    "PLAIN",
    "CRAM-MD5",
    "DIGEST-MD5",
    "GSSAPI",
    "XOAUTH2",
    "OAUTHBEARER",
    "AUTH",
    "CHECK",
];

pub const SESSION_STORAGES: &[&str] =
    &["db", "memcache", "memcached", "redis", "php"];

pub const LOG_DRIVERS: &[&str] = &["file", "syslog", "stdout"];

pub const SPELLCHECK_ENGINES: &[&str] = &["googie", "pspell", "enchant", "atd"];

pub const CACHE_BACKENDS: &[&str] = &["db", "apc", "memcache", "memcached", "redis"];

pub const FRAME_OPTIONS: &[&str] = &["sameorigin", "deny"];

pub const SYSLOG_FACILITIES: &[&str] = &[
    "LOG_AUTH",
    "LOG_AUTHPRIV",
    "LOG_CRON",
    "LOG_DAEMON",
    "LOG_KERN",
    "LOG_LOCAL0",
    "LOG_LOCAL1",
    "LOG_LOCAL2",
    "LOG_LOCAL3",
    "LOG_LOCAL4",
    "LOG_LOCAL5",
    "LOG_LOCAL6",
    "LOG_LOCAL7",
    "LOG_LPR",
    "LOG_MAIL",
    "LOG_NEWS",
    "LOG_SYSLOG",
    "LOG_USER",
    "LOG_UUCP",
];

pub const PASSWORD_DRIVERS: &[&str] = &[
    "chpasswd",
    "cpanel",
    "directadmin",
    "domainfactory",
    "dovecot_passwdfile",
    "expect",
    "gearman",
    "hmail",
    "httpapi",
    "kpasswd",
    "ldap",
    "ldap_exop",
    "ldap_simple",
    "mailcow",
    "miab",
    "modoboa",
    "pam",
    "plesk",
    "poppassd",
    "pw_usermod",
    "sasl",
    "smb",
    "sql",
    "tinycp",
    "virtualmin",
    "vpopmaild",
    "ximss",
    "xmail",
];

lazy_static! {
    static ref OPTIONS: HashMap<&'static str, Kind> = {
        use self::Kind::*;

        let mut m = HashMap::new();
        // Database
        m.insert("db_dsnw", Dsn);
        m.insert("db_dsnr", Any);
        m.insert("db_prefix", Str);
        // IMAP
        m.insert("default_host", Host);
        m.insert("imap_host", Host);
        m.insert("default_port", Port);
        m.insert("imap_conn_options", ConnOptions);
        m.insert("imap_auth_type", Suggest(AUTH_TYPES));
        m.insert("imap_cache", Suggest(CACHE_BACKENDS));
        m.insert("messages_cache", Bool);
        m.insert("imap_timeout", Int);
        // SMTP
        m.insert("smtp_host", Host);
        m.insert("smtp_server", Host);
        m.insert("smtp_port", Port);
        m.insert("smtp_conn_options", ConnOptions);
        m.insert("smtp_auth_type", Suggest(AUTH_TYPES));
        m.insert("smtp_user", Str);
        m.insert("smtp_pass", Str);
        m.insert("smtp_timeout", Int);
        // Session
        m.insert("session_lifetime", PositiveInt);
        m.insert("session_storage", Choice(SESSION_STORAGES));
        m.insert("ip_check", Bool);
        m.insert("login_rate_limit", Int);
        m.insert("des_key", Str);
        // UI
        m.insert("language", Str);
        m.insert("timezone", Str);
        m.insert("skin", Str);
        m.insert("product_name", Str);
        m.insert("default_charset", Str);
        m.insert("draft_autosave", Int);
        m.insert("spellcheck_engine", Suggest(SPELLCHECK_ENGINES));
        m.insert("username_domain", Any);
        // Security
        m.insert("enable_installer", Bool);
        m.insert("force_https", Bool);
        m.insert("use_https", Bool);
        m.insert("support_url", Url);
        m.insert("x_frame_options", ChoiceOrFalse(FRAME_OPTIONS));
        m.insert("dkim_public_key", Str);
        // Plugins and their options
        m.insert("plugins", StringList);
        m.insert("password_driver", Suggest(PASSWORD_DRIVERS));
        m.insert("password_dovecot_method", Str);
        m.insert("password_dovecot_host", Str);
        m.insert("password_dovecot_port", Port);
        m.insert("password_minimum_length", PositiveInt);
        m.insert("password_confirm_current", Bool);
        m.insert("carddav_url", Url);
        m.insert("managesieve_host", Host);
        m.insert("managesieve_port", Port);
        m.insert("managesieve_conn_options", ConnOptions);
        m.insert("archive_mbox", Str);
        m.insert("markasjunk_learning_driver", Str);
        // Routing
        m.insert("mail_domain", DomainRoutes);
        // Logging
        m.insert("log_driver", Choice(LOG_DRIVERS));
        m.insert("log_dir", Str);
        m.insert("temp_dir", Str);
        m.insert("syslog_facility", Constant(SYSLOG_FACILITIES));
        m.insert("syslog_id", Str);
        m
    };
}

/// Look up the kind of value `option` takes, or `None` if it is not a
/// recognised option.
pub fn lookup(option: &str) -> Option<Kind> {
    OPTIONS.get(option).copied()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::document::Document;
    use crate::test_data::*;

    #[test]
    fn shipped_documents_use_only_known_options() {
        for &(name, text) in &[
            ("config.php", BASE_CONFIG),
            ("minimal-config.php", MINIMAL_CONFIG),
            ("ssl-conn.php", TLS_OVERRIDE),
        ] {
            let document = Document::parse(name, text).unwrap();
            for option in document.option_names() {
                assert!(
                    lookup(option).is_some(),
                    "{} uses unknown option {}",
                    name,
                    option,
                );
            }
        }
    }

    #[test]
    fn lookup_kinds() {
        assert_eq!(Some(Kind::Port), lookup("smtp_port"));
        assert_eq!(Some(Kind::DomainRoutes), lookup("mail_domain"));
        assert_eq!(None, lookup("smtp_prot"));
    }
}

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

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;
use thiserror::Error;

use super::syntax::{self, Target};
use super::value::{Array, Key, Value};
use crate::support::error::Error as LoadError;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] syntax::Error),
    #[error("line {line}: option '{name}' already defined on line {first_line}")]
    DuplicateOption {
        name: String,
        first_line: u32,
        line: u32,
    },
    #[error("line {line}: $config is initialised more than once")]
    DuplicateInitialiser { line: u32 },
    #[error("line {line}: $config is initialised after options were assigned")]
    LateInitialiser { line: u32 },
    #[error("line {line}: $config must be initialised with an array")]
    InitialiserNotArray { line: u32 },
    #[error("line {line}: option names must be strings, got key {key}")]
    NonStringOption { line: u32, key: i64 },
}

/// One configuration document: a mapping from option name to value.
///
/// Every key of `options` is a `Key::Str`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    name: String,
    options: Array,
    lines: BTreeMap<String, u32>,
}

impl Document {
    /// Parse `text` as a document. `name` is only used for reporting.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, Error> {
        let mut options = Array::new();
        let mut lines = BTreeMap::<String, u32>::new();
        let mut initialised = false;

        for statement in syntax::parse_document(text)? {
            let line = statement.line;
            match statement.target {
                Target::Whole => {
                    if initialised {
                        return Err(Error::DuplicateInitialiser { line });
                    }
                    if !options.is_empty() {
                        return Err(Error::LateInitialiser { line });
                    }
                    initialised = true;

                    let initial = match statement.value {
                        Value::Array(a) => a,
                        _ => return Err(Error::InitialiserNotArray { line }),
                    };

                    for (key, value) in initial {
                        match key {
                            Key::Str(name) => {
                                lines.insert(name.clone(), line);
                                options.insert(Key::Str(name), value);
                            }
                            Key::Int(key) => {
                                return Err(Error::NonStringOption {
                                    line,
                                    key,
                                })
                            }
                        }
                    }
                }

                Target::Option(name) => {
                    if let Some(&first_line) = lines.get(&name) {
                        return Err(Error::DuplicateOption {
                            name,
                            first_line,
                            line,
                        });
                    }

                    lines.insert(name.clone(), line);
                    options.insert(Key::Str(name), statement.value);
                }
            }
        }

        Ok(Self {
            name: name.into(),
            options,
            lines,
        })
    }

    /// Read and parse the document at `path`.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path).map_err(|e| LoadError::Read {
            path: path.to_owned(),
            source: e,
        })?;

        let document = Self::parse(path.display().to_string(), &text)
            .map_err(|e| LoadError::Document {
                path: path.to_owned(),
                source: e,
            })?;
        debug!(
            "loaded {} option(s) from {}",
            document.options.len(),
            path.display(),
        );
        Ok(document)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Array {
        &self.options
    }

    pub fn get(&self, option: &str) -> Option<&Value> {
        self.options.get(option)
    }

    /// The line on which `option` was defined, if known.
    pub fn line_of(&self, option: &str) -> Option<u32> {
        self.lines.get(option).copied()
    }

    /// Option names in definition order.
    pub fn option_names(&self) -> impl Iterator<Item = &str> {
        self.options.keys().filter_map(|k| match *k {
            Key::Str(ref s) => Some(&**s),
            Key::Int(_) => None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data::*;

    #[test]
    fn parse_shipped_documents() {
        let base = Document::parse("config.php", BASE_CONFIG).unwrap();
        assert_eq!(Some(&Value::Int(993)), base.get("default_port"));
        assert_eq!(Some(&Value::Int(587)), base.get("smtp_port"));
        assert_eq!(
            Some(&Value::Const("LOG_MAIL".to_owned())),
            base.get("syslog_facility"),
        );
        assert_eq!(Some(5), base.line_of("db_dsnw"));
        assert_eq!(Some("db_dsnw"), base.option_names().next());

        let minimal =
            Document::parse("minimal-config.php", MINIMAL_CONFIG).unwrap();
        assert_eq!(14, minimal.options().len());
        assert_eq!(Some(&Value::str("UTC")), minimal.get("timezone"));

        let tls = Document::parse("ssl-conn.php", TLS_OVERRIDE).unwrap();
        assert_eq!(
            vec!["imap_conn_options", "smtp_conn_options"],
            tls.option_names().collect::<Vec<_>>(),
        );
    }

    #[test]
    fn duplicate_options_rejected() {
        assert_eq!(
            Err(Error::DuplicateOption {
                name: "smtp_port".to_owned(),
                first_line: 2,
                line: 4,
            }),
            Document::parse(
                "dup",
                "<?php\n$config['smtp_port'] = 587;\n\
                 $config['smtp_host'] = 'x';\n$config['smtp_port'] = 465;\n",
            ),
        );

        assert_eq!(
            Err(Error::DuplicateOption {
                name: "language".to_owned(),
                first_line: 1,
                line: 2,
            }),
            Document::parse(
                "dup",
                "$config = ['language' => 'en_US'];\n\
                 $config['language'] = 'pl_PL';",
            ),
        );
    }

    #[test]
    fn initialiser_rules() {
        assert_eq!(
            Err(Error::DuplicateInitialiser { line: 2 }),
            Document::parse("x", "$config = [];\n$config = [];"),
        );
        assert_eq!(
            Err(Error::LateInitialiser { line: 2 }),
            Document::parse("x", "$config['a'] = 1;\n$config = [];"),
        );
        assert_eq!(
            Err(Error::InitialiserNotArray { line: 1 }),
            Document::parse("x", "$config = 'no';"),
        );
        assert_eq!(
            Err(Error::NonStringOption { line: 1, key: 0 }),
            Document::parse("x", "$config = ['a'];"),
        );
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.php");
        fs::write(&path, "<?php\n$config['a'] = ;\n").unwrap();

        match Document::load(&path) {
            Err(LoadError::Document {
                path: p,
                source: Error::Syntax(syntax::Error::Syntax { line: 2, .. }),
            }) => assert_eq!(path, p),
            r => panic!("unexpected result: {:?}", r),
        }

        assert_matches!(
            Err(LoadError::Read { .. }),
            Document::load(&dir.path().join("missing.php"))
        );
    }
}

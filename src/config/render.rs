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

//! Writes option mappings back out as documents the webmail application can
//! load.

use std::fmt::Write as _;

use super::value::{Array, Key, Value};

const INDENT: &str = "    ";

/// Render `options` as a complete document.
///
/// Each line of `header` becomes a `//` comment at the top. Options with
/// integer keys are skipped, since they cannot be assigned by name.
pub fn render_document(options: &Array, header: &[String]) -> String {
    let mut out = String::new();
    out.push_str("<?php\n\n");
    for line in header {
        if line.is_empty() {
            out.push_str("//\n");
        } else {
            out.push_str("// ");
            out.push_str(line);
            out.push('\n');
        }
    }
    if !header.is_empty() {
        out.push('\n');
    }

    out.push_str("$config = [];\n");
    if !options.is_empty() {
        out.push('\n');
    }

    for (key, value) in options.iter() {
        let name = match *key {
            Key::Str(ref name) => name,
            Key::Int(_) => continue,
        };

        out.push_str("$config[");
        write_string(&mut out, name);
        out.push_str("] = ");
        write_value(&mut out, value, 0);
        out.push_str(";\n");
    }

    out
}

fn write_string(out: &mut String, s: &str) {
    out.push('\'');
    for ch in s.chars() {
        if '\\' == ch || '\'' == ch {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
}

fn write_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    match *value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Str(ref s) => write_string(out, s),
        Value::Const(ref c) => out.push_str(c),
        Value::Array(ref a) if a.is_empty() => out.push_str("[]"),
        Value::Array(ref a) => {
            let list = a.is_list();
            out.push_str("[\n");
            for (key, value) in a.iter() {
                write_indent(out, depth + 1);
                if !list {
                    match *key {
                        Key::Int(i) => {
                            let _ = write!(out, "{}", i);
                        }
                        Key::Str(ref s) => write_string(out, s),
                    }
                    out.push_str(" => ");
                }
                write_value(out, value, depth + 1);
                out.push_str(",\n");
            }
            write_indent(out, depth);
            out.push(']');
        }
    }
}

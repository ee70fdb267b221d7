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

//! Parser for the subset of PHP that Roundcube configuration files are
//! written in.
//!
//! A document is an optional `<?php` opener, a sequence of statements, and an
//! optional `?>` closer followed only by whitespace. Two statement forms are
//! understood:
//!
//! ```text
//! $config = array(...);            // initialiser
//! $config['option'] = <value>;     // keyed assignment
//! ```
//!
//! Values are literals only: strings, integers, `true`/`false`/`null`, bare
//! constants like `LOG_MAIL`, and `array(...)`/`[...]` with optional
//! `key =>` entries. Double-quoted strings are accepted but may not
//! interpolate variables, since nothing here evaluates PHP.
//!
//! Once a parser has committed to a construct (e.g. after an opening quote or
//! bracket), failures are turned into `nom::Err::Failure` so that the error
//! location reported is where the construct actually went wrong rather than
//! where it started.

use std::str;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_until, take_while, take_while1},
    character::complete::{anychar, char, digit1, multispace1},
    combinator::{cut, map, map_res, opt, recognize},
    error::ErrorKind,
    multi::{fold_many0, many0, separated_list},
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};
use thiserror::Error;

use super::value::{Array, Key, Value};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("line {line}, column {column}: expected {expected}")]
    Syntax {
        line: u32,
        column: u32,
        expected: &'static str,
    },
    #[error("line {line}: cannot assign ${name}, only $config")]
    UnsupportedVariable { line: u32, name: String },
    #[error(
        "line {line}, column {column}: no integer key is left to append to \
         the array"
    )]
    KeysExhausted { line: u32, column: u32 },
}

/// What a statement assigns to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// `$config = ...`
    Whole,
    /// `$config['name'] = ...`
    Option(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    /// 1-based line on which the statement starts.
    pub line: u32,
    pub target: Target,
    pub value: Value,
}

/// Parse a whole document into its statements, in order.
pub fn parse_document(text: &str) -> Result<Vec<Statement>, Error> {
    let mut i = text.strip_prefix('\u{feff}').unwrap_or(text);

    i = expect(text, i, ws, "whitespace")?.0;
    if let Ok((rest, _)) = php_open(i) {
        i = rest;
    }

    let mut statements = Vec::new();
    loop {
        i = expect(text, i, ws, "whitespace")?.0;
        if i.is_empty() {
            break;
        }

        if let Some(tail) = i.strip_prefix("?>") {
            let trailing = tail.trim_start();
            if !trailing.is_empty() {
                return Err(syntax_error(
                    text,
                    trailing,
                    "end of document after '?>'",
                ));
            }
            break;
        }

        let (rest, statement) = statement(text, i)?;
        statements.push(statement);
        i = rest;
    }

    Ok(statements)
}

/// Parse a single value, such as `array('a', 'b')`, with nothing else around
/// it but whitespace and comments.
pub fn parse_value(text: &str) -> Result<Value, Error> {
    let (i, v) = expect(text, text, value, "a value")?;
    let (i, _) = expect(text, i, ws, "whitespace")?;
    if i.is_empty() {
        Ok(v)
    } else {
        Err(syntax_error(text, i, "end of value"))
    }
}

fn statement<'a>(
    text: &str,
    i: &'a str,
) -> Result<(&'a str, Statement), Error> {
    let (line, _) = position(text, i);

    let (i, name) = expect(
        text,
        i,
        preceded(char('$'), identifier),
        "'$config'",
    )?;
    if "config" != name {
        return Err(Error::UnsupportedVariable {
            line,
            name: name.to_owned(),
        });
    }

    let (i, option) = expect(
        text,
        i,
        opt(delimited(sym("["), preceded(ws, string), sym("]"))),
        "'[' or '='",
    )?;
    let (i, _) = expect(text, i, sym("="), "'='")?;
    let (i, value) = expect(text, i, value, "a value")?;
    let (i, _) = expect(text, i, sym(";"), "';'")?;

    let target = match option {
        Some(name) => Target::Option(name),
        None => Target::Whole,
    };

    Ok((
        i,
        Statement {
            line,
            target,
            value,
        },
    ))
}

fn expect<'a, O>(
    text: &str,
    i: &'a str,
    parser: impl Fn(&'a str) -> IResult<&'a str, O>,
    expected: &'static str,
) -> Result<(&'a str, O), Error> {
    parser(i).map_err(|e| match e {
        nom::Err::Failure((rest, ErrorKind::TooLarge)) => {
            let (line, column) = position(text, rest);
            Error::KeysExhausted { line, column }
        }
        nom::Err::Error((rest, _)) | nom::Err::Failure((rest, _)) => {
            syntax_error(text, rest, expected)
        }
        nom::Err::Incomplete(_) => syntax_error(text, "", expected),
    })
}

fn syntax_error(text: &str, rest: &str, expected: &'static str) -> Error {
    let (line, column) = position(text, rest);
    Error::Syntax {
        line,
        column,
        expected,
    }
}

/// Returns the 1-based line and column at which `rest` (a suffix of `text`)
/// starts.
fn position(text: &str, rest: &str) -> (u32, u32) {
    let consumed = &text[..text.len() - rest.len()];
    let line = consumed.matches('\n').count() + 1;
    let column = consumed
        .rsplit('\n')
        .next()
        .map_or(0, |l| l.chars().count())
        + 1;
    (line as u32, column as u32)
}

// ==================== LEXICAL PARSERS ====================

fn php_open(i: &str) -> IResult<&str, &str> {
    terminated(tag_no_case("<?php"), multispace1)(i)
}

fn line_comment(i: &str) -> IResult<&str, ()> {
    map(pair(alt((tag("//"), tag("#"))), opt(is_not("\n"))), |_| ())(i)
}

fn block_comment(i: &str) -> IResult<&str, ()> {
    map(delimited(tag("/*"), take_until("*/"), tag("*/")), |_| ())(i)
}

/// Whitespace and comments. Always succeeds.
fn ws(i: &str) -> IResult<&str, ()> {
    map(
        many0(alt((map(multispace1, |_| ()), line_comment, block_comment))),
        |_| (),
    )(i)
}

fn sym<'a>(s: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    preceded(ws, tag(s))
}

fn identifier(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || '_' == c),
        take_while(|c: char| c.is_ascii_alphanumeric() || '_' == c),
    ))(i)
}

fn drop_backslash(s: &str) -> &str {
    &s[1..]
}

fn single_quoted(i: &str) -> IResult<&str, String> {
    preceded(
        char('\''),
        cut(terminated(
            fold_many0(
                alt((
                    // Only \\ and \' are escapes; the backslash is dropped.
                    map(alt((tag("\\\\"), tag("\\'"))), drop_backslash),
                    is_not("\\'"),
                    tag("\\"),
                )),
                String::new(),
                |mut accum: String, piece: &str| {
                    accum.push_str(piece);
                    accum
                },
            ),
            char('\''),
        )),
    )(i)
}

fn double_quoted_escape(c: char) -> String {
    match c {
        'n' => "\n".to_owned(),
        't' => "\t".to_owned(),
        'r' => "\r".to_owned(),
        'v' => "\x0B".to_owned(),
        'e' => "\x1B".to_owned(),
        'f' => "\x0C".to_owned(),
        '\\' | '$' | '"' => c.to_string(),
        // PHP leaves unrecognised escapes alone, backslash included.
        _ => format!("\\{}", c),
    }
}

fn double_quoted(i: &str) -> IResult<&str, String> {
    preceded(
        char('"'),
        cut(terminated(
            fold_many0(
                alt((
                    map(is_not("\\\"$"), str::to_owned),
                    map(preceded(char('\\'), anychar), double_quoted_escape),
                )),
                String::new(),
                |mut accum: String, piece: String| {
                    accum.push_str(&piece);
                    accum
                },
            ),
            char('"'),
        )),
    )(i)
}

fn string(i: &str) -> IResult<&str, String> {
    alt((single_quoted, double_quoted))(i)
}

fn parse_int(s: &str) -> Result<i64, std::num::ParseIntError> {
    let (negative, digits) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    // PHP reads a leading 0 as octal, which matters for things like file
    // modes.
    let (radix, digits) = if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    // Keep the sign attached so that i64::MIN does not overflow
    if negative {
        i64::from_str_radix(&format!("-{}", digits), radix)
    } else {
        i64::from_str_radix(digits, radix)
    }
}

fn integer(i: &str) -> IResult<&str, i64> {
    map_res(
        recognize(pair(opt(alt((char('-'), char('+')))), digit1)),
        parse_int,
    )(i)
}

// ==================== VALUE PARSERS ====================

fn bare_word(i: &str) -> IResult<&str, Value> {
    map(identifier, |word: &str| {
        if word.eq_ignore_ascii_case("true") {
            Value::Bool(true)
        } else if word.eq_ignore_ascii_case("false") {
            Value::Bool(false)
        } else if word.eq_ignore_ascii_case("null") {
            Value::Null
        } else {
            Value::Const(word.to_owned())
        }
    })(i)
}

/// PHP converts string keys that look like canonical integers to integer
/// keys.
fn canonical_key(s: String) -> Key {
    match s.parse::<i64>() {
        Ok(i) if i.to_string() == s => Key::Int(i),
        _ => Key::Str(s),
    }
}

fn array_key(i: &str) -> IResult<&str, Key> {
    alt((map(integer, Key::Int), map(string, canonical_key)))(i)
}

fn array_entry(i: &str) -> IResult<&str, (Option<Key>, Value)> {
    pair(opt(terminated(preceded(ws, array_key), sym("=>"))), value)(i)
}

/// An array entry along with the input it starts at.
fn located_entry(i: &str) -> IResult<&str, (&str, Option<Key>, Value)> {
    let (i, _) = ws(i)?;
    let (rest, (key, value)) = array_entry(i)?;
    Ok((rest, (i, key, value)))
}

fn array_entries(i: &str) -> IResult<&str, Array> {
    let (rest, entries) = terminated(
        separated_list(sym(","), located_entry),
        opt(sym(",")),
    )(i)?;

    let mut array = Array::new();
    for (at, key, value) in entries {
        match key {
            Some(key) => {
                array.insert(key, value);
            }
            None => {
                if array.push(value).is_err() {
                    return Err(nom::Err::Failure((at, ErrorKind::TooLarge)));
                }
            }
        }
    }
    Ok((rest, array))
}

fn array_long(i: &str) -> IResult<&str, Array> {
    preceded(
        pair(tag_no_case("array"), preceded(ws, char('('))),
        cut(terminated(array_entries, sym(")"))),
    )(i)
}

fn array_short(i: &str) -> IResult<&str, Array> {
    preceded(char('['), cut(terminated(array_entries, sym("]"))))(i)
}

fn value(i: &str) -> IResult<&str, Value> {
    preceded(
        ws,
        alt((
            map(array_long, Value::Array),
            map(array_short, Value::Array),
            map(string, Value::Str),
            map(integer, Value::Int),
            bare_word,
        )),
    )(i)
}

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

use std::time::Duration;

use super::{Connection, Error, Outcome};
use crate::config::endpoint::{Endpoint, Security};

/// One SMTP reply, possibly spanning several lines.
struct Reply {
    code: u16,
    /// The text of each line, without the code.
    lines: Vec<String>,
}

impl Reply {
    fn text(&self) -> String {
        format!("{} {}", self.code, self.lines.join(" ")).trim().to_owned()
    }
}

pub(super) fn probe(
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<Outcome, Error> {
    let mut conn = Connection::open(endpoint, timeout)?;

    let greeting = read_reply(&mut conn)?;
    if 220 != greeting.code {
        return Err(Error::Rejected {
            command: "connection",
            response: greeting.text(),
        });
    }

    let mut extensions = ehlo(&mut conn)?;

    if Security::StartTls == endpoint.security {
        if !extensions.iter().any(|e| e.eq_ignore_ascii_case("STARTTLS")) {
            return Err(Error::StartTlsNotOffered);
        }

        conn.write_line("STARTTLS")?;
        let reply = read_reply(&mut conn)?;
        if 220 != reply.code {
            return Err(Error::Rejected {
                command: "STARTTLS",
                response: reply.text(),
            });
        }

        conn.start_tls()?;
        extensions = ehlo(&mut conn)?;
    }

    let _ = conn.write_line("QUIT").and_then(|_| read_reply(&mut conn));

    Ok(Outcome {
        greeting: greeting.text(),
        tls_version: conn.tls_version(),
        capabilities: extensions,
    })
}

fn read_reply(conn: &mut Connection) -> Result<Reply, Error> {
    let mut code = None;
    let mut lines = Vec::new();

    loop {
        let line = conn.read_line()?;
        let this_code = match line.get(..3).map(str::parse::<u16>) {
            Some(Ok(c)) => c,
            _ => return Err(Error::Protocol(line)),
        };

        match code {
            None => code = Some(this_code),
            Some(c) if c != this_code => return Err(Error::Protocol(line)),
            Some(_) => (),
        }

        let more = Some(&b'-') == line.as_bytes().get(3);
        lines.push(line.get(4..).unwrap_or("").to_owned());
        if !more {
            return Ok(Reply {
                code: this_code,
                lines,
            });
        }
    }
}

/// Send `EHLO` and return the advertised extension keywords.
fn ehlo(conn: &mut Connection) -> Result<Vec<String>, Error> {
    conn.write_line(&format!("EHLO {}", helo_name()))?;
    let reply = read_reply(conn)?;
    if 250 != reply.code {
        return Err(Error::Rejected {
            command: "EHLO",
            response: reply.text(),
        });
    }

    // The first line is the server's name and greeting
    Ok(reply
        .lines
        .iter()
        .skip(1)
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_owned)
        .collect())
}

fn helo_name() -> String {
    let mut buf = [0u8; 256];
    nix::unistd::gethostname(&mut buf)
        .ok()
        .and_then(|name| name.to_str().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or("localhost")
        .to_owned()
}

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

use super::{strip_prefix_ci, Connection, Error, Outcome};
use crate::config::endpoint::{Endpoint, Security};

pub(super) fn probe(
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<Outcome, Error> {
    let mut conn = Connection::open(endpoint, timeout)?;

    let greeting = conn.read_line()?;
    if strip_prefix_ci(&greeting, "* OK").is_none()
        && strip_prefix_ci(&greeting, "* PREAUTH").is_none()
    {
        return Err(Error::Protocol(greeting));
    }

    if Security::StartTls == endpoint.security {
        let capabilities = capability(&mut conn, "a0")?;
        if !capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case("STARTTLS"))
        {
            return Err(Error::StartTlsNotOffered);
        }

        let (_, status) = command(&mut conn, "a1", "STARTTLS")?;
        expect_ok("STARTTLS", status)?;
        conn.start_tls()?;
    }

    // Capabilities may change after STARTTLS, so only these count
    let capabilities = capability(&mut conn, "a2")?;

    // The server may just hang up, which is fine
    let _ = command(&mut conn, "a3", "LOGOUT");

    Ok(Outcome {
        greeting,
        tls_version: conn.tls_version(),
        capabilities,
    })
}

/// Send a tagged command and read up to its completion.
///
/// Returns the untagged responses and the completion status without the
/// tag.
fn command(
    conn: &mut Connection,
    tag: &str,
    command: &str,
) -> Result<(Vec<String>, String), Error> {
    conn.write_line(&format!("{} {}", tag, command))?;

    let mut untagged = Vec::new();
    loop {
        let line = conn.read_line()?;
        if let Some(status) = line
            .strip_prefix(tag)
            .and_then(|rest| rest.strip_prefix(' '))
        {
            return Ok((untagged, status.to_owned()));
        }

        if !line.starts_with("* ") {
            return Err(Error::Protocol(line));
        }
        untagged.push(line);
    }
}

fn expect_ok(command: &'static str, status: String) -> Result<(), Error> {
    if strip_prefix_ci(&status, "OK").is_some() {
        Ok(())
    } else {
        Err(Error::Rejected {
            command,
            response: status,
        })
    }
}

fn capability(conn: &mut Connection, tag: &str) -> Result<Vec<String>, Error> {
    let (untagged, status) = command(conn, tag, "CAPABILITY")?;
    expect_ok("CAPABILITY", status)?;

    Ok(untagged
        .iter()
        .filter_map(|line| strip_prefix_ci(line, "* CAPABILITY "))
        .flat_map(|caps| caps.split_whitespace())
        .map(str::to_owned)
        .collect())
}

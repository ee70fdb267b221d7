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

use log::{error, info};

use super::main::*;
use crate::config::endpoint::{self, Endpoint, Protocol, DEFAULT_LABEL};
use crate::probe;
use crate::support::error::Error;
use crate::support::sysexits::*;

pub(super) fn probe(context: &Context, cmd: ProbeSubcommand) {
    let target = context
        .target(cmd.layers.profile.as_deref(), cmd.layers.files)
        .unwrap_or_else(|e| die!(e.sysexit(), "{}", e));
    let resolution = resolve(&target);

    let endpoints = match endpoint::endpoints(resolution.options()) {
        Ok(endpoints) => endpoints,
        Err(e) => {
            let e = Error::from(e);
            die!(e.sysexit(), "{}: {}", target.name, e)
        }
    };

    let endpoints = match cmd.domain {
        None => endpoints,
        Some(ref domain) => routed_for(endpoints, domain),
    };
    if endpoints.is_empty() {
        die!(
            EX_USAGE,
            "{}: no IMAP or SMTP endpoints to probe",
            target.name
        );
    }

    let timeout = cmd
        .timeout
        .map(Duration::from_secs)
        .unwrap_or(probe::DEFAULT_TIMEOUT);
    let width = endpoints
        .iter()
        .map(|e| e.to_string().len())
        .max()
        .unwrap_or(0);

    let mut failed = false;
    for endpoint in &endpoints {
        info!("probing {} ({})", endpoint, endpoint.security);
        let status = match probe::probe(endpoint, timeout) {
            Ok(outcome) => match outcome.tls_version {
                Some(version) => {
                    format!("ok    {}, {}", version, outcome.greeting)
                }
                None => format!("ok    {}", outcome.greeting),
            },
            Err(e) => {
                error!("{}: {}", endpoint, e);
                failed = true;
                format!("FAIL  {}", e)
            }
        };

        println!(
            "{:width$}  {:8}  {}",
            endpoint.to_string(),
            endpoint.security.to_string(),
            status,
            width = width,
        );
    }

    if failed {
        EX_UNAVAILABLE.exit();
    }
}

/// Select the endpoints a user of `domain` would be connected to.
///
/// For each protocol, these are the endpoints routed for `domain` if any
/// are, else the global ones.
fn routed_for(endpoints: Vec<Endpoint>, domain: &str) -> Vec<Endpoint> {
    let labelled = |protocol: Protocol, label: &str| {
        endpoints
            .iter()
            .filter(|e| {
                e.protocol == protocol
                    && e.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
            })
            .cloned()
            .collect::<Vec<_>>()
    };

    let mut selected = Vec::new();
    for &protocol in &[Protocol::Imap, Protocol::Smtp] {
        let mut routed = labelled(protocol, domain);
        if routed.is_empty() {
            routed = labelled(protocol, DEFAULT_LABEL);
        }
        selected.extend(routed);
    }
    selected
}

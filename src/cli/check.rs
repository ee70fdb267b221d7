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

use super::main::*;
use crate::config;
use crate::config::layer;
use crate::config::validate::{validate_document, validate_effective, Report};
use crate::support::error::Error;
use crate::support::sysexits::*;

pub(super) fn check(context: &Context, cmd: CheckSubcommand) {
    let targets = if !cmd.files.is_empty() {
        context.target(None, cmd.files).map(|t| vec![t])
    } else if cmd.profile.is_empty() {
        context.all_targets()
    } else {
        cmd.profile
            .iter()
            .map(|p| context.target(Some(p.as_str()), vec![]))
            .collect()
    };
    let targets = match targets {
        Ok(t) => t,
        Err(e) => die!(e.sysexit(), "{}", e),
    };

    let mut failed = false;
    for target in &targets {
        let report = match check_target(target) {
            Ok(report) => report,
            Err(e) => die!(e.sysexit(), "{}: {}", target.name, e),
        };

        println!("{}:", target.heading());
        for diagnostic in report.iter() {
            println!("  {}", diagnostic);
        }

        let errors = report.errors();
        let warnings = report.warnings();
        if 0 == errors && (0 == warnings || !cmd.strict) {
            println!("  OK ({} warning(s))", warnings);
        } else {
            println!("  FAILED ({} error(s), {} warning(s))", errors, warnings);
            failed = true;
        }
    }

    if failed {
        EX_CONFIG.exit();
    }
}

/// Validate every document of `target` and the configuration they layer
/// into.
pub(super) fn check_target(target: &Target) -> Result<Report, Error> {
    let documents = config::load_all(&target.layers)?;

    let mut report = Report::default();
    for document in &documents {
        validate_document(document, &target.policy, &mut report);
    }
    validate_effective(
        &layer::resolve(&documents),
        &target.policy,
        &mut report,
    );

    Ok(report)
}

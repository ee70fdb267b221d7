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

use std::path::PathBuf;

use structopt::StructOpt;

use crate::config;
use crate::config::document::Document;
use crate::config::layer::{self, Resolution};
use crate::config::validate::Policy;
use crate::support::error::Error;
use crate::support::logging;
use crate::support::sysexits::*;
use crate::support::system_config::{self, LoadedManifest};

/// Load, layer, validate and probe Roundcube configuration documents.
///
/// The documents making up each deployment are named by a manifest,
/// `rcconf.toml`, which lists the documents each profile layers in order.
/// Later documents override options set by earlier ones, replacing the
/// whole value.
#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Options {
    #[structopt(flatten)]
    global: GlobalOptions,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Default)]
struct GlobalOptions {
    /// The manifest naming the deployment profiles
    /// [default: ./rcconf.toml or /etc/rcconf/rcconf.toml]
    #[structopt(long, global = true, parse(from_os_str))]
    manifest: Option<PathBuf>,

    /// Log what is being loaded and overridden to standard error.
    #[structopt(short, long, global = true)]
    verbose: bool,

    /// Log to syslog (facility LOG_MAIL) instead of standard error.
    #[structopt(long, global = true)]
    syslog: bool,
}

#[derive(StructOpt)]
enum Command {
    Check(CheckSubcommand),
    Show(ShowSubcommand),
    Merge(MergeSubcommand),
    Diff(DiffSubcommand),
    Probe(ProbeSubcommand),
}

/// Which documents to layer.
#[derive(StructOpt, Default)]
pub(super) struct LayerOptions {
    /// Use the layers of this manifest profile. Optional if the manifest has
    /// only one.
    #[structopt(short, long)]
    pub(super) profile: Option<String>,

    /// Documents to layer, in order, instead of a profile.
    #[structopt(parse(from_os_str), conflicts_with = "profile")]
    pub(super) files: Vec<PathBuf>,
}

/// Validate documents and the configurations they layer into.
///
/// Every document is checked for unknown options, values of the wrong kind,
/// out-of-range ports, malformed hosts and database DSNs, duplicate plugins,
/// and an enabled installer. The effective configuration of each profile is
/// then checked for required options and the domains it routes.
///
/// Exits with status 78 (EX_CONFIG) if any errors are found, or with
/// --strict, any warnings.
#[derive(StructOpt)]
pub(super) struct CheckSubcommand {
    /// Check this profile. Can be passed multiple times.
    /// [default: every profile]
    #[structopt(short, long, number_of_values(1))]
    pub(super) profile: Vec<String>,

    /// Fail on warnings as well as errors.
    #[structopt(long)]
    pub(super) strict: bool,

    /// Documents to check as one layered configuration, instead of profiles.
    #[structopt(parse(from_os_str), conflicts_with = "profile")]
    pub(super) files: Vec<PathBuf>,
}

/// Print the effective configuration.
#[derive(StructOpt)]
pub(super) struct ShowSubcommand {
    #[structopt(flatten)]
    pub(super) layers: LayerOptions,

    /// Show which document supplied each option, and what it overrode.
    #[structopt(long)]
    pub(super) origin: bool,
}

/// Write the effective configuration as a single document.
///
/// The result can be loaded by the webmail application in place of the
/// layered documents.
#[derive(StructOpt)]
pub(super) struct MergeSubcommand {
    #[structopt(flatten)]
    pub(super) layers: LayerOptions,

    /// Write the document here instead of to standard output.
    #[structopt(short, long, parse(from_os_str))]
    pub(super) output: Option<PathBuf>,
}

/// Compare the effective configurations of two profiles.
///
/// Options only in the first profile are prefixed with '-', options only in
/// the second with '+', and options whose values differ are shown with both
/// values.
#[derive(StructOpt)]
pub(super) struct DiffSubcommand {
    pub(super) first: String,
    pub(super) second: String,
}

/// Connect to the IMAP and SMTP servers a configuration names.
///
/// Each distinct endpoint is connected to with the TLS settings the
/// configuration gives it, including STARTTLS where the port implies it. The
/// probe reads the server's greeting and capabilities, then disconnects
/// without logging in.
///
/// Exits with status 69 (EX_UNAVAILABLE) if any endpoint fails.
#[derive(StructOpt)]
pub(super) struct ProbeSubcommand {
    #[structopt(flatten)]
    pub(super) layers: LayerOptions,

    /// Only probe the endpoints routed for this domain.
    #[structopt(long)]
    pub(super) domain: Option<String>,

    /// Seconds to wait for each network operation. [default: 10]
    #[structopt(long)]
    pub(super) timeout: Option<u64>,
}

/// A sequence of documents to layer and the policy to check the result
/// against.
#[derive(Debug)]
pub(super) struct Target {
    pub(super) name: String,
    /// The profile's description from the manifest, if any.
    pub(super) description: String,
    pub(super) layers: Vec<PathBuf>,
    pub(super) policy: Policy,
}

pub(super) struct Context {
    pub(super) manifest: Option<LoadedManifest>,
}

impl Context {
    /// Select the layers named on the command line, or those of `profile`.
    pub(super) fn target(
        &self,
        profile: Option<&str>,
        files: Vec<PathBuf>,
    ) -> Result<Target, Error> {
        if !files.is_empty() {
            let policy = match self.manifest {
                Some(ref manifest) => manifest.policy(None)?,
                None => Policy::default(),
            };
            return Ok(Target {
                name: "command line".to_owned(),
                description: String::new(),
                layers: files,
                policy,
            });
        }

        let manifest = self.manifest.as_ref().ok_or(Error::NoManifest)?;
        let profile = match profile {
            Some(profile) => profile,
            None => manifest.default_profile()?,
        };

        Ok(Target {
            name: profile.to_owned(),
            description: manifest.profile(profile)?.description.clone(),
            layers: manifest.layers(profile)?,
            policy: manifest.policy(Some(profile))?,
        })
    }

    /// A target for every profile in the manifest.
    pub(super) fn all_targets(&self) -> Result<Vec<Target>, Error> {
        let manifest = self.manifest.as_ref().ok_or(Error::NoManifest)?;
        let targets = manifest
            .profile_names()
            .map(|name| self.target(Some(name), vec![]))
            .collect::<Result<Vec<_>, _>>()?;
        if targets.is_empty() {
            return Err(Error::NoProfiles);
        }
        Ok(targets)
    }
}

impl Target {
    /// The name to introduce the target's results with.
    pub(super) fn heading(&self) -> String {
        if self.description.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.description)
        }
    }
}

/// Load the documents of `target`, exiting on failure.
pub(super) fn load(target: &Target) -> Vec<Document> {
    config::load_all(&target.layers)
        .unwrap_or_else(|e| die!(e.sysexit(), "{}: {}", target.name, e))
}

/// Load and layer the documents of `target`, exiting on failure.
pub(super) fn resolve(target: &Target) -> Resolution {
    layer::resolve(&load(target))
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let manifest =
        match system_config::locate(options.global.manifest.as_deref()) {
            Some(path) => match LoadedManifest::load(&path) {
                Ok(manifest) => Some(manifest),
                Err(e) => die!(e.sysexit(), "{}", e),
            },
            None => None,
        };

    let log_config = manifest.as_ref().and_then(LoadedManifest::log_config);
    if let Err(e) = logging::init(
        options.global.syslog,
        options.global.verbose,
        log_config.as_deref(),
    ) {
        die!(e.sysexit(), "{}", e);
    }

    if let Some(ref manifest) = manifest {
        log::debug!("using manifest {}", manifest.path().display());
    }

    let context = Context { manifest };
    match options.command {
        Command::Check(cmd) => super::check::check(&context, cmd),
        Command::Show(cmd) => super::show::show(&context, cmd),
        Command::Merge(cmd) => super::show::merge(&context, cmd),
        Command::Diff(cmd) => super::show::diff(&context, cmd),
        Command::Probe(cmd) => super::probe::probe(&context, cmd),
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;

    fn shipped() -> Context {
        Context {
            manifest: Some(
                LoadedManifest::load(Path::new(
                    system_config::MANIFEST_NAME,
                ))
                .unwrap(),
            ),
        }
    }

    #[test]
    fn command_line_parses() {
        let options = Options::from_iter_safe(&[
            "rcconf",
            "check",
            "--strict",
            "-p",
            "full",
            "--profile",
            "minimal",
            "--manifest",
            "/etc/x.toml",
        ])
        .unwrap();
        assert_eq!(
            Some(PathBuf::from("/etc/x.toml")),
            options.global.manifest
        );
        match options.command {
            Command::Check(cmd) => {
                assert!(cmd.strict);
                assert_eq!(vec!["full", "minimal"], cmd.profile);
                assert!(cmd.files.is_empty());
            }
            _ => panic!("wrong subcommand"),
        }

        let options = Options::from_iter_safe(&[
            "rcconf", "-v", "probe", "a.php", "b.php", "--timeout", "3",
        ])
        .unwrap();
        assert!(options.global.verbose);
        match options.command {
            Command::Probe(cmd) => {
                assert_eq!(Some(3), cmd.timeout);
                assert_eq!(
                    vec![PathBuf::from("a.php"), PathBuf::from("b.php")],
                    cmd.layers.files,
                );
            }
            _ => panic!("wrong subcommand"),
        }

        assert!(Options::from_iter_safe(&[
            "rcconf", "show", "-p", "full", "a.php"
        ])
        .is_err());
        assert!(Options::from_iter_safe(&["rcconf", "diff", "full"]).is_err());
    }

    #[test]
    fn targets_from_shipped_manifest() {
        let context = shipped();

        let full = context.target(Some("full"), vec![]).unwrap();
        assert_eq!("full", full.name);
        assert_eq!(
            "full (Full configuration for both hosted domains)",
            full.heading(),
        );
        assert_eq!(2, full.layers.len());
        assert!(full.layers[0].ends_with("config/roundcube/config.php"));
        assert!(full.layers[1].ends_with("config/roundcube/ssl-conn.php"));

        assert_matches!(Err(Error::AmbiguousProfile), context.target(None, vec![]));

        let names = context
            .all_targets()
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect::<Vec<_>>();
        assert_eq!(vec!["full", "minimal"], names);

        let files = context
            .target(None, vec![PathBuf::from("x.php")])
            .unwrap();
        assert_eq!(vec![PathBuf::from("x.php")], files.layers);
        assert_eq!("command line", files.heading());
    }

    #[test]
    fn files_work_without_manifest() {
        let context = Context { manifest: None };
        let target = context
            .target(None, vec![PathBuf::from("x.php")])
            .unwrap();
        assert_eq!(Policy::default(), target.policy);
        assert_matches!(Err(Error::NoManifest), context.target(None, vec![]));
        assert_matches!(Err(Error::NoManifest), context.all_targets());
    }
}

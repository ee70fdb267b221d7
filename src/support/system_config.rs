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
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::Error;
use crate::config::validate::Policy;

pub const MANIFEST_NAME: &str = "rcconf.toml";
pub const SYSTEM_MANIFEST: &str = "/etc/rcconf/rcconf.toml";

/// The deployment manifest.
///
/// This is stored in a file named `rcconf.toml`, typically at the root of the
/// repository holding the configuration documents. It names the deployment
/// profiles, each of which is an ordered list of documents to layer, and the
/// policy their effective configurations are checked against.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Manifest {
    /// A log4rs configuration file to use when not running interactively,
    /// relative to the manifest.
    #[serde(default)]
    pub log_config: Option<PathBuf>,

    /// Rules applying to every profile unless the profile overrides them.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// The deployment profiles, by name.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// If true, options not in the schema only produce warnings.
    ///
    /// This is useful when a plugin brings options of its own.
    pub allow_unknown_options: bool,

    /// The domains `mail_domain` must route, if set.
    pub expected_domains: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Profile {
    #[serde(default)]
    pub description: String,

    /// The documents to load, in the order they are applied. Later documents
    /// override options set by earlier ones.
    pub layers: Vec<PathBuf>,

    /// Overrides `policy.expected_domains` for this profile. An empty list
    /// means the profile must not route any domains.
    #[serde(default)]
    pub expected_domains: Option<Vec<String>>,
}

/// A manifest together with the location it was loaded from.
#[derive(Clone, Debug)]
pub struct LoadedManifest {
    path: PathBuf,
    root: PathBuf,
    manifest: Manifest,
}

/// Find the manifest to use.
///
/// An explicitly given path is always used. Otherwise, `rcconf.toml` in the
/// current directory is preferred over the system-wide one.
pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(explicit) = explicit {
        return Some(explicit.to_owned());
    }

    [Path::new(MANIFEST_NAME), Path::new(SYSTEM_MANIFEST)]
        .iter()
        .find(|p| p.is_file())
        .map(|p| p.to_path_buf())
}

impl LoadedManifest {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|e| Error::Read {
            path: path.to_owned(),
            source: e,
        })?;
        let manifest: Manifest =
            toml::from_str(&text).map_err(|e| Error::Manifest {
                path: path.to_owned(),
                source: e,
            })?;

        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                parent.to_owned()
            }
            _ => PathBuf::from("."),
        };

        debug!(
            "loaded manifest {} with {} profile(s)",
            path.display(),
            manifest.profiles.len()
        );

        Ok(LoadedManifest {
            path: path.to_owned(),
            root,
            manifest,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.manifest.profiles.keys().map(|k| &**k)
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, Error> {
        self.manifest
            .profiles
            .get(name)
            .ok_or_else(|| Error::UnknownProfile(name.to_owned()))
    }

    /// The profile to use when none was named: the only one there is.
    pub fn default_profile(&self) -> Result<&str, Error> {
        let mut names = self.profile_names();
        match (names.next(), names.next()) {
            (Some(name), None) => Ok(name),
            (None, _) => Err(Error::NoProfiles),
            (Some(_), Some(_)) => Err(Error::AmbiguousProfile),
        }
    }

    /// The paths of the documents `profile` layers, in order.
    pub fn layers(&self, profile: &str) -> Result<Vec<PathBuf>, Error> {
        let layers = &self.profile(profile)?.layers;
        if layers.is_empty() {
            return Err(Error::EmptyProfile(profile.to_owned()));
        }

        Ok(layers.iter().map(|p| self.root.join(p)).collect())
    }

    /// The validation policy for `profile`, or the manifest-wide policy if
    /// `None`.
    pub fn policy(&self, profile: Option<&str>) -> Result<Policy, Error> {
        let mut policy = Policy {
            allow_unknown_options: self.manifest.policy.allow_unknown_options,
            expected_domains: self.manifest.policy.expected_domains.clone(),
        };

        if let Some(profile) = profile {
            if let Some(ref domains) = self.profile(profile)?.expected_domains
            {
                policy.expected_domains = Some(domains.clone());
            }
        }

        Ok(policy)
    }

    pub fn log_config(&self) -> Option<PathBuf> {
        self.manifest
            .log_config
            .as_ref()
            .map(|p| self.root.join(p))
    }
}

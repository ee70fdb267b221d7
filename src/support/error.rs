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

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::sysexits::*;
use crate::config::{document, endpoint};

#[derive(Error, Debug)]
pub enum Error {
    #[error("error reading '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("error in '{}': {source}", .path.display())]
    Document {
        path: PathBuf,
        source: document::Error,
    },
    #[error("error writing '{}': {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("error in manifest '{}': {source}", .path.display())]
    Manifest {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no manifest found; use --manifest or pass the documents to load")]
    NoManifest,
    #[error("the manifest defines no profiles")]
    NoProfiles,
    #[error("no profile named '{0}' in the manifest")]
    UnknownProfile(String),
    #[error("the manifest has several profiles; choose one with --profile")]
    AmbiguousProfile,
    #[error("profile '{0}' has no layers")]
    EmptyProfile(String),
    #[error(transparent)]
    Endpoint(#[from] endpoint::Error),
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl Error {
    /// The exit status a command failing with this error should use.
    pub fn sysexit(&self) -> Sysexit {
        match *self {
            Error::Read { ref source, .. }
                if io::ErrorKind::NotFound == source.kind() =>
            {
                EX_NOINPUT
            }
            Error::Read { .. } => EX_IOERR,
            Error::Document { .. } => EX_DATAERR,
            Error::Write { .. } => EX_CANTCREAT,
            Error::Manifest { .. }
            | Error::NoManifest
            | Error::NoProfiles
            | Error::UnknownProfile(..)
            | Error::EmptyProfile(..)
            | Error::Endpoint(..) => EX_CONFIG,
            Error::AmbiguousProfile => EX_USAGE,
            Error::Logging(..) => EX_SOFTWARE,
        }
    }
}

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

//! Roundcube configuration documents: parsing, layering, validation,
//! endpoint extraction and rendering.

pub mod document;
pub mod endpoint;
pub mod layer;
pub mod render;
pub mod schema;
pub mod syntax;
pub mod validate;
pub mod value;

use std::path::PathBuf;

use self::document::Document;
use crate::support::error::Error;

/// Load each of `paths`, in order, stopping at the first failure.
pub fn load_all(paths: &[PathBuf]) -> Result<Vec<Document>, Error> {
    paths.iter().map(|p| Document::load(p)).collect()
}

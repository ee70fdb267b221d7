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

//! The subset of `sysexits.h` codes rcconf exits with.
//!
//! Scripts driving a deployment rely on these to tell a malformed document
//! from a failed check or an unreachable server.

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

/// Bad command line.
pub const EX_USAGE: Sysexit = Sysexit(64);
/// A document could not be parsed.
pub const EX_DATAERR: Sysexit = Sysexit(65);
/// A document does not exist.
pub const EX_NOINPUT: Sysexit = Sysexit(66);
/// A probed server could not be reached or misbehaved.
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_CANTCREAT: Sysexit = Sysexit(73);
pub const EX_IOERR: Sysexit = Sysexit(74);
/// Validation failed, or the manifest is unusable.
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }
}

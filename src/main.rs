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

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

macro_rules! die {
    ($ex:expr, $($stuff:tt)*) => {{
        eprintln!($($stuff)*);
        $ex.exit()
    }}
}

mod cli;
mod config;
mod probe;
mod support;

#[cfg(test)]
mod test_data;

fn main() {
    cli::main::main();
}

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        let _ = support::logging::init_console(true);
    })
}

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

use std::fs;
use std::io::{self, Write};

use super::main::*;
use crate::config::layer::Resolution;
use crate::config::render::render_document;
use crate::config::value::Array;
use crate::support::error::Error;

fn select(context: &Context, layers: LayerOptions) -> Target {
    context
        .target(layers.profile.as_deref(), layers.files)
        .unwrap_or_else(|e| die!(e.sysexit(), "{}", e))
}

pub(super) fn show(context: &Context, cmd: ShowSubcommand) {
    let target = select(context, cmd.layers);
    let resolution = resolve(&target);

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    for line in show_lines(&resolution, cmd.origin) {
        // Quietly stop if the reader went away
        if writeln!(stdout, "{}", line).is_err() {
            return;
        }
    }
}

fn show_lines(resolution: &Resolution, origin: bool) -> Vec<String> {
    let mut lines = resolution
        .options()
        .iter()
        .map(|(key, value)| {
            let name = key.to_string();
            match resolution.origin_of(&name) {
                Some(layer) if origin => {
                    format!("{} = {}  # {}", name, value, layer)
                }
                _ => format!("{} = {}", name, value),
            }
        })
        .collect::<Vec<_>>();

    if origin {
        let layers = resolution.layers();
        for o in resolution.overrides() {
            lines.push(format!(
                "# {} from {} is overridden by {}",
                o.option, layers[o.replaced], layers[o.by]
            ));
        }
    }

    lines
}

pub(super) fn merge(context: &Context, cmd: MergeSubcommand) {
    let target = select(context, cmd.layers);
    let resolution = resolve(&target);

    let mut header = vec![
        format!("Generated by rcconf from '{}'. Do not edit.", target.name),
        String::new(),
        "Layers, in order:".to_owned(),
    ];
    header.extend(
        target
            .layers
            .iter()
            .map(|p| format!("  {}", p.display())),
    );
    let text = render_document(resolution.options(), &header);

    match cmd.output {
        None => print!("{}", text),
        Some(path) => {
            if let Err(e) = fs::write(&path, text) {
                let e = Error::Write { path, source: e };
                die!(e.sysexit(), "{}", e);
            }
            log::info!("wrote {}", path.display());
        }
    }
}

pub(super) fn diff(context: &Context, cmd: DiffSubcommand) {
    let first = context
        .target(Some(cmd.first.as_str()), vec![])
        .unwrap_or_else(|e| die!(e.sysexit(), "{}", e));
    let second = context
        .target(Some(cmd.second.as_str()), vec![])
        .unwrap_or_else(|e| die!(e.sysexit(), "{}", e));

    for line in diff_lines(
        resolve(&first).options(),
        resolve(&second).options(),
    ) {
        println!("{}", line);
    }
}

fn diff_lines(first: &Array, second: &Array) -> Vec<String> {
    let mut lines = Vec::new();

    for (key, value) in first.iter() {
        match second.get_key(key) {
            None => lines.push(format!("- {} = {}", key, value)),
            Some(other) if other != value => {
                lines.push(format!("- {} = {}", key, value));
                lines.push(format!("+ {} = {}", key, other));
            }
            Some(_) => (),
        }
    }

    for (key, value) in second.iter() {
        if first.get_key(key).is_none() {
            lines.push(format!("+ {} = {}", key, value));
        }
    }

    lines
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::document::Document;
    use crate::config::layer::resolve;
    use crate::test_data::*;

    fn doc(name: &str, text: &str) -> Document {
        Document::parse(name, text).unwrap()
    }

    #[test]
    fn origins_and_overrides() {
        let resolution = resolve(&[
            doc("a.php", "$config['x'] = 1; $config['y'] = 'y';"),
            doc("b.php", "$config['x'] = [true];"),
        ]);

        assert_eq!(
            vec!["x = [true]", "y = \"y\""],
            show_lines(&resolution, false),
        );
        assert_eq!(
            vec![
                "x = [true]  # b.php",
                "y = \"y\"  # a.php",
                "# x from a.php is overridden by b.php",
            ],
            show_lines(&resolution, true),
        );
    }

    #[test]
    fn differences() {
        let first = doc(
            "a",
            "$config['same'] = 1; $config['changed'] = 'a'; \
             $config['gone'] = false;",
        );
        let second =
            doc("b", "$config['changed'] = 'b'; $config['new'] = null; \
                      $config['same'] = 1;");

        assert_eq!(
            vec![
                "- changed = \"a\"",
                "+ changed = \"b\"",
                "- gone = false",
                "+ new = null",
            ],
            diff_lines(first.options(), second.options()),
        );
    }

    #[test]
    fn minimal_is_not_a_layer_of_full() {
        let full = resolve(&[
            doc("config.php", BASE_CONFIG),
            doc("ssl-conn.php", TLS_OVERRIDE),
        ]);
        let minimal = resolve(&[
            doc("minimal-config.php", MINIMAL_CONFIG),
            doc("ssl-conn.php", TLS_OVERRIDE),
        ]);

        let lines = diff_lines(full.options(), minimal.options());
        // Options the minimal profile lacks entirely
        assert!(lines.iter().any(|l| l.starts_with("- mail_domain = ")));
        assert!(lines.iter().any(|l| l.starts_with("- carddav_url = ")));
        // Options both set, differently
        assert!(lines.contains(&"- timezone = \"Europe/Warsaw\"".to_owned()));
        assert!(lines.contains(&"+ timezone = \"UTC\"".to_owned()));
    }
}

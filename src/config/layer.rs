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

//! Resolution of an ordered sequence of documents into the effective option
//! mapping.
//!
//! This is a shallow overwrite: each option in a later document replaces the
//! option of the same name from earlier documents wholesale. In particular,
//! an override of `imap_conn_options` replaces the entire nested array; it
//! is not merged key-by-key with what came before. This matches how the
//! webmail application applies `$config` assignments from successive files.

use std::collections::BTreeMap;

use log::debug;

use super::document::Document;
use super::value::{Array, Key, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Override {
    pub option: String,
    /// Index of the layer whose value was replaced.
    pub replaced: usize,
    /// Index of the layer that replaced it.
    pub by: usize,
}

/// The effective option mapping and where each option came from.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    layers: Vec<String>,
    options: Array,
    origin: BTreeMap<String, usize>,
    overrides: Vec<Override>,
}

/// Resolve `documents`, in order, into a single mapping.
pub fn resolve(documents: &[Document]) -> Resolution {
    let mut resolution = Resolution::default();

    for (layer, document) in documents.iter().enumerate() {
        resolution.layers.push(document.name().to_owned());

        for (key, value) in document.options().iter() {
            let name = match *key {
                Key::Str(ref name) => name,
                Key::Int(_) => continue,
            };

            resolution.options.insert(key.clone(), value.clone());
            if let Some(replaced) =
                resolution.origin.insert(name.clone(), layer)
            {
                debug!(
                    "{}: '{}' overrides the value from {}",
                    document.name(),
                    name,
                    resolution.layers[replaced],
                );
                resolution.overrides.push(Override {
                    option: name.clone(),
                    replaced,
                    by: layer,
                });
            }
        }
    }

    resolution
}

impl Resolution {
    /// Names of the layers, in application order.
    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn options(&self) -> &Array {
        &self.options
    }

    pub fn get(&self, option: &str) -> Option<&Value> {
        self.options.get(option)
    }

    /// The name of the layer that supplied the effective value of `option`.
    pub fn origin_of(&self, option: &str) -> Option<&str> {
        self.origin
            .get(option)
            .map(|&layer| &*self.layers[layer])
    }

    pub fn overrides(&self) -> &[Override] {
        &self.overrides
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data::*;

    fn doc(name: &str, text: &str) -> Document {
        Document::parse(name, text).unwrap()
    }

    #[test]
    fn later_layers_win() {
        let resolution = resolve(&[
            doc("a", "$config['x'] = 1; $config['y'] = 2;"),
            doc("b", "$config['z'] = 3; $config['x'] = 4;"),
        ]);

        assert_eq!(Some(&Value::Int(4)), resolution.get("x"));
        assert_eq!(Some(&Value::Int(2)), resolution.get("y"));
        assert_eq!(Some(&Value::Int(3)), resolution.get("z"));
        assert_eq!(Some("b"), resolution.origin_of("x"));
        assert_eq!(Some("a"), resolution.origin_of("y"));
        assert_eq!(None, resolution.origin_of("nope"));

        // Overridden keys keep their first position
        let names = resolution
            .options()
            .keys()
            .map(|k| k.to_string())
            .collect::<Vec<_>>();
        assert_eq!(vec!["x", "y", "z"], names);

        assert_eq!(
            &[Override {
                option: "x".to_owned(),
                replaced: 0,
                by: 1,
            }][..],
            resolution.overrides(),
        );
    }

    #[test]
    fn empty_input_resolves_to_nothing() {
        let resolution = resolve(&[]);
        assert!(resolution.options().is_empty());
        assert!(resolution.layers().is_empty());
    }

    #[test]
    fn nested_maps_are_replaced_whole() {
        let resolution = resolve(&[
            doc(
                "base",
                "$config['imap_conn_options'] = \
                 ['ssl' => ['verify_peer' => true, 'cafile' => '/ca.pem']];",
            ),
            doc(
                "override",
                "$config['imap_conn_options'] = \
                 ['ssl' => ['verify_peer' => false]];",
            ),
        ]);

        let ssl = resolution
            .get("imap_conn_options")
            .and_then(Value::as_array)
            .and_then(|a| a.get("ssl"))
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(Some(&Value::Bool(false)), ssl.get("verify_peer"));
        assert_eq!(None, ssl.get("cafile"));
    }

    #[test]
    fn tls_override_disables_peer_verification() {
        let resolution = resolve(&[
            doc("config.php", BASE_CONFIG),
            doc("ssl-conn.php", TLS_OVERRIDE),
        ]);

        for (option, transport) in &[
            ("imap_conn_options", "ssl"),
            ("smtp_conn_options", "tls"),
        ] {
            let tls = resolution
                .get(option)
                .and_then(Value::as_array)
                .and_then(|a| a.get(transport))
                .and_then(Value::as_array)
                .unwrap();
            assert_eq!(Some(&Value::Bool(false)), tls.get("verify_peer"));
            assert_eq!(
                Some(&Value::Bool(false)),
                tls.get("verify_peer_name")
            );
            assert_eq!(
                Some(&Value::Bool(true)),
                tls.get("allow_self_signed")
            );
            assert_eq!(Some("ssl-conn.php"), resolution.origin_of(option));
        }

        // The base's smtp 'ssl' sub-array is gone, not merged
        assert_eq!(
            None,
            resolution
                .get("smtp_conn_options")
                .and_then(Value::as_array)
                .and_then(|a| a.get("ssl")),
        );
        assert_eq!(2, resolution.overrides().len());
        assert_eq!(Some("config.php"), resolution.origin_of("plugins"));
    }
}

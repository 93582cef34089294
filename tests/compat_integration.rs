//! Integration tests for compatibility gating across plugin imports.

use std::collections::BTreeMap;

use serde_json::json;

use weft::compat::{is_schema_subset, is_topological_subset, Compatibility};
use weft::core::manifest::parse_manifest;
use weft::core::types::PluginName;
use weft::schema::ManifestIndex;

fn plugin(name: &str) -> PluginName {
    PluginName::new(name).unwrap()
}

fn index_from(jsons: &[&str]) -> ManifestIndex {
    let mut index = ManifestIndex::new();
    for json in jsons {
        index.insert(parse_manifest(json).unwrap());
    }
    index
}

fn palette(version: &str, with_alpha: bool) -> String {
    let alpha = if with_alpha {
        r#","alpha": { "kind": "primitive", "primitive": "float", "nullable": true }"#
    } else {
        ""
    };
    format!(
        r#"{{
            "name": "palette",
            "version": "{version}",
            "store": {{
                "colors": {{
                    "kind": "set",
                    "values": {{
                        "kind": "object",
                        "fields": {{
                            "id": {{
                                "kind": "primitive",
                                "primitive": "string",
                                "is_key": true
                            }}
                            {alpha}
                        }}
                    }},
                    "emptyable": true
                }}
            }}
        }}"#,
    )
}

fn theme(version: &str, palette_req: &str) -> String {
    format!(
        r#"{{
            "name": "theme",
            "version": "{version}",
            "imports": {{ "palette": "{palette_req}" }},
            "store": {{
                "rules": {{
                    "kind": "set",
                    "values": {{
                        "kind": "object",
                        "fields": {{
                            "name": {{
                                "kind": "primitive",
                                "primitive": "string",
                                "is_key": true
                            }},
                            "color": {{
                                "kind": "ref",
                                "target": "$(palette).colors",
                                "nullable": true,
                                "on_delete": "nullify"
                            }}
                        }}
                    }},
                    "emptyable": true
                }}
            }}
        }}"#,
    )
}

#[test]
fn upstream_addition_keeps_dependent_compatible() {
    let old = index_from(&[&palette("0.1.0", false), &theme("0.1.0", "^0.1")]);
    let new = index_from(&[&palette("0.2.0", true), &theme("0.1.0", "^0.2")]);

    let verdict = is_schema_subset(&old, &new, &plugin("theme")).unwrap();
    assert!(verdict.is_compatible());
}

#[test]
fn upstream_breakage_is_attributed_to_the_upstream_plugin() {
    // The new palette silently drops the hex field, which theme never
    // references directly; theme's own graph is untouched.
    let palette_with_hex = r#"{
        "name": "palette",
        "version": "0.1.0",
        "store": {
            "colors": {
                "kind": "set",
                "values": {
                    "kind": "object",
                    "fields": {
                        "id": { "kind": "primitive", "primitive": "string", "is_key": true },
                        "hex": { "kind": "primitive", "primitive": "string" }
                    }
                },
                "emptyable": true
            }
        }
    }"#;
    let old = index_from(&[palette_with_hex, &theme("0.1.0", "^0.1")]);
    let new = index_from(&[&palette("0.2.0", false), &theme("0.1.0", "^0.2")]);

    let verdict = is_schema_subset(&old, &new, &plugin("theme")).unwrap();
    let Compatibility::Incompatible {
        plugin: offender,
        version,
        reason,
    } = verdict
    else {
        panic!("expected incompatible");
    };
    assert_eq!(offender, plugin("palette"));
    assert_eq!(version.to_string(), "0.2.0");
    assert!(reason.contains("hex"));
}

#[test]
fn dropped_upstream_plugin_breaks_the_dependent() {
    let old = index_from(&[&palette("0.1.0", false), &theme("0.1.0", "^0.1")]);
    // New side has a theme with no palette import and no palette
    // manifest at all.
    let standalone_theme = r#"{
        "name": "theme",
        "version": "0.2.0",
        "store": {
            "rules": {
                "kind": "set",
                "values": {
                    "kind": "object",
                    "fields": {
                        "name": {
                            "kind": "primitive",
                            "primitive": "string",
                            "is_key": true
                        },
                        "color": {
                            "kind": "ref",
                            "target": "$(theme).rules",
                            "nullable": true,
                            "on_delete": "nullify"
                        }
                    }
                },
                "emptyable": true
            }
        }
    }"#;
    let new = index_from(&[standalone_theme]);

    let verdict = is_schema_subset(&old, &new, &plugin("theme")).unwrap();
    let Compatibility::Incompatible { plugin: offender, .. } = verdict else {
        panic!("expected incompatible");
    };
    // Either the retyped ref on theme or the dropped palette is a
    // legitimate first finding; both name a real offender.
    assert!(offender == plugin("palette") || offender == plugin("theme"));
}

#[test]
fn topological_subset_spans_schema_and_state() {
    let old = index_from(&[&palette("0.1.0", false)]);
    let new = index_from(&[&palette("0.2.0", true)]);

    let old_states = BTreeMap::from([(
        plugin("palette"),
        json!({ "colors": [ { "id": "red" }, { "id": "green" } ] }),
    )]);

    // All old keys survive alongside a new one.
    let grown = BTreeMap::from([(
        plugin("palette"),
        json!({ "colors": [
            { "id": "red", "alpha": 0.5 },
            { "id": "green" },
            { "id": "blue" }
        ] }),
    )]);
    assert!(
        is_topological_subset(&old, &old_states, &new, &grown, &plugin("palette"))
            .unwrap()
            .is_compatible()
    );

    // Losing green breaks the subset even though the schema grew.
    let shrunk = BTreeMap::from([(
        plugin("palette"),
        json!({ "colors": [ { "id": "red" } ] }),
    )]);
    let verdict =
        is_topological_subset(&old, &old_states, &new, &shrunk, &plugin("palette")).unwrap();
    let Compatibility::Incompatible { reason, .. } = verdict else {
        panic!("expected incompatible");
    };
    assert!(reason.contains("green"));
}

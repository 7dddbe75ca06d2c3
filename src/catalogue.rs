//! Component J: the offline device-interface catalogue generator
//! (`spec.md` §6) — reads a `PrefabData.json` dump of known devices and
//! emits a Rust source fragment declaring one interface descriptor per thing,
//! plus a `Mode` enum for things whose modes are well-formed identifiers.
//! Peripheral to the compiler core; gated behind the `catalogue` feature.

use std::fmt::Write as _;

use itertools::Itertools;
use serde::Deserialize;
use thiserror::Error;

/// One entry of `PrefabData.json` (`spec.md` §6: "a list of things with
/// `prefabName`, `prefabHash`, optional `modes`, `logic.logicTypes[]`,
/// `logic.logicSlotTypes[]`").
#[derive(Debug, Clone, Deserialize)]
pub struct PrefabEntry {
    #[serde(rename = "prefabName")]
    pub prefab_name: String,
    #[serde(rename = "prefabHash")]
    pub prefab_hash: i64,
    #[serde(default)]
    pub modes: Vec<PrefabMode>,
    #[serde(default)]
    pub logic: PrefabLogic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrefabMode {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrefabLogic {
    #[serde(rename = "logicTypes", default)]
    pub logic_types: Vec<String>,
    #[serde(rename = "logicSlotTypes", default)]
    pub logic_slot_types: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("malformed PrefabData.json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Generate one Rust source fragment covering every entry in `data`
/// (`spec.md` §6: "emits a file of interface declarations and a `Mode` enum
/// per thing when modes are non-numeric well-formed identifiers"). Entries
/// are rendered sorted by prefab name, for deterministic output regardless
/// of the source JSON's array order.
pub fn generate(data: &[PrefabEntry]) -> String {
    let mut out = String::new();
    writeln!(out, "// Generated by catgen from PrefabData.json — do not hand-edit.").unwrap();
    writeln!(out).unwrap();

    for entry in data.iter().sorted_by(|a, b| a.prefab_name.cmp(&b.prefab_name)) {
        render_entry(&mut out, entry);
    }
    out
}

/// Parse a `PrefabData.json` document (`spec.md` §6's input shape).
pub fn parse_prefab_data(json: &str) -> Result<Vec<PrefabEntry>, CatalogueError> {
    Ok(serde_json::from_str(json)?)
}

fn render_entry(out: &mut String, entry: &PrefabEntry) {
    let ident = to_pascal_case(&entry.prefab_name);

    writeln!(out, "/// `{}` (hash {}).", entry.prefab_name, entry.prefab_hash).unwrap();
    writeln!(out, "pub struct {ident};").unwrap();
    writeln!(out).unwrap();

    writeln!(out, "impl {ident} {{").unwrap();
    writeln!(out, "    pub const PREFAB_HASH: i64 = {};", entry.prefab_hash).unwrap();
    if !entry.logic.logic_types.is_empty() {
        let types = entry.logic.logic_types.iter().map(|t| format!("\"{t}\"")).join(", ");
        writeln!(out, "    pub const LOGIC_TYPES: &'static [&'static str] = &[{types}];").unwrap();
    }
    if !entry.logic.logic_slot_types.is_empty() {
        let types = entry.logic.logic_slot_types.iter().map(|t| format!("\"{t}\"")).join(", ");
        writeln!(out, "    pub const LOGIC_SLOT_TYPES: &'static [&'static str] = &[{types}];").unwrap();
    }
    writeln!(out, "}}").unwrap();
    writeln!(out).unwrap();

    if let Some(mode_enum) = render_mode_enum(&ident, &entry.modes) {
        out.push_str(&mode_enum);
        writeln!(out).unwrap();
    }
}

/// A `Mode` enum is only emitted when every mode name is a well-formed,
/// non-numeric Rust identifier (`spec.md` §6) — a device whose modes are
/// just raw numbers (or otherwise unusable as variant names) gets no enum,
/// silently, matching the original generator's behaviour.
fn render_mode_enum(ident: &str, modes: &[PrefabMode]) -> Option<String> {
    if modes.is_empty() || !modes.iter().all(|m| is_well_formed_identifier(&m.name)) {
        return None;
    }
    let mut out = String::new();
    writeln!(out, "#[derive(Debug, Clone, Copy, PartialEq, Eq)]").unwrap();
    writeln!(out, "pub enum {ident}Mode {{").unwrap();
    for mode in modes {
        writeln!(out, "    {} = {},", to_pascal_case(&mode.name), mode.value).unwrap();
    }
    writeln!(out, "}}").unwrap();
    Some(out)
}

fn is_well_formed_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && name.parse::<i64>().is_err()
}

fn to_pascal_case(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_prefab_data_document() {
        let json = r#"[
            {
                "prefabName": "StructureGasSensor",
                "prefabHash": -321,
                "logic": { "logicTypes": ["PressureInternal", "On"] }
            }
        ]"#;
        let data = parse_prefab_data(json).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].prefab_name, "StructureGasSensor");
        assert!(data[0].modes.is_empty());
    }

    #[test]
    fn generates_a_struct_and_const_logic_types_per_entry() {
        let entry = PrefabEntry {
            prefab_name: "StructureGasSensor".into(),
            prefab_hash: -321,
            modes: vec![],
            logic: PrefabLogic {
                logic_types: vec!["PressureInternal".into(), "On".into()],
                logic_slot_types: vec![],
            },
        };
        let out = generate(&[entry]);
        assert!(out.contains("pub struct StructureGasSensor;"));
        assert!(out.contains("pub const PREFAB_HASH: i64 = -321;"));
        assert!(out.contains(r#"pub const LOGIC_TYPES: &'static [&'static str] = &["PressureInternal", "On"];"#));
    }

    #[test]
    fn emits_a_mode_enum_when_every_mode_name_is_a_well_formed_identifier() {
        let entry = PrefabEntry {
            prefab_name: "StructureAutoMiner".into(),
            prefab_hash: 1,
            modes: vec![
                PrefabMode { name: "Idle".into(), value: 0 },
                PrefabMode { name: "Mining".into(), value: 1 },
            ],
            logic: PrefabLogic::default(),
        };
        let out = generate(&[entry]);
        assert!(out.contains("pub enum StructureAutoMinerMode {"));
        assert!(out.contains("Idle = 0,"));
        assert!(out.contains("Mining = 1,"));
    }

    #[test]
    fn skips_the_mode_enum_when_a_mode_name_is_not_a_well_formed_identifier() {
        let entry = PrefabEntry {
            prefab_name: "StructureWeird".into(),
            prefab_hash: 2,
            modes: vec![PrefabMode { name: "3rd-mode".into(), value: 3 }],
            logic: PrefabLogic::default(),
        };
        let out = generate(&[entry]);
        assert!(!out.contains("Mode {"));
    }

    #[test]
    fn entries_are_rendered_in_sorted_order_regardless_of_input_order() {
        let a = PrefabEntry {
            prefab_name: "Zebra".into(),
            prefab_hash: 1,
            modes: vec![],
            logic: PrefabLogic::default(),
        };
        let b = PrefabEntry {
            prefab_name: "Alpha".into(),
            prefab_hash: 2,
            modes: vec![],
            logic: PrefabLogic::default(),
        };
        let out = generate(&[a, b]);
        assert!(out.find("struct Alpha").unwrap() < out.find("struct Zebra").unwrap());
    }

    #[test]
    fn malformed_json_surfaces_as_a_catalogue_error() {
        let err = parse_prefab_data("{ not json").unwrap_err();
        assert!(matches!(err, CatalogueError::Json(_)));
    }
}

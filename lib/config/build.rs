use std::{collections::BTreeMap, env, fs, path::PathBuf};

use serde::Deserialize;

/// One architecture section of `flags.json`.
#[derive(Deserialize)]
struct ArchFlags {
    #[serde(flatten)]
    values: BTreeMap<String, String>,
}

fn parse_value(key: &str, raw: &str) -> usize {
    let clean = raw.trim().replace('_', "");
    let parsed = match clean.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => clean.parse::<usize>(),
    };
    parsed.unwrap_or_else(|err| panic!("Invalid value '{}' for flag '{}': {:?}", raw, key, err))
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let flags_path = PathBuf::from(manifest_dir).join("../../flags.json");
    let flags_str = fs::read_to_string(&flags_path).unwrap();
    let flagmap: BTreeMap<String, ArchFlags> = serde_json::from_str(&flags_str).unwrap();
    let flags = match flagmap.get(target_arch.as_str()) {
        Some(value) => value,
        None => panic!("Unknown Architecture '{}'.", target_arch),
    };
    make_flags(flags);
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../flags.json");
}

fn make_flags(flags: &ArchFlags) {
    let mut s = String::from("");
    for (key, raw) in &flags.values {
        s += format!("pub const {}: usize = {};\n", key, parse_value(key, raw)).as_str();
    }
    let out_dir = env::var("OUT_DIR").unwrap();
    let path = PathBuf::from(out_dir).join("build_flags.rs");
    fs::write(path, s).unwrap();
}

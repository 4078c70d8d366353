use std::{collections::BTreeMap, env, fs, path::PathBuf};

use serde::Deserialize;

/// A flag is either a JSON integer or a decimal / `0x` hex string.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlagValue {
    Number(u64),
    Text(String),
}

type Platforms = BTreeMap<String, BTreeMap<String, FlagValue>>;

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();
    let flags_path = PathBuf::from(&manifest_dir).join("../../platform_flags.json");
    let flags_str = fs::read_to_string(&flags_path).unwrap();
    let platforms: Platforms = serde_json::from_str(&flags_str).unwrap();
    if platforms.is_empty() {
        panic!("No platform declared in platform_flags.json.");
    }
    fs::write(PathBuf::from(out_dir).join("platform_flags.rs"), make_flags(&platforms)).unwrap();
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../platform_flags.json");
}

fn parse_value(platform: &str, key: &str, value: &FlagValue) -> u64 {
    let raw = match value {
        FlagValue::Number(value) => return *value,
        FlagValue::Text(raw) => raw,
    };
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse::<u64>(),
    };
    match parsed {
        Ok(value) => value,
        Err(_) => panic!("{platform}.{key}: '{raw}' is not an integer"),
    }
}

fn make_flags(platforms: &Platforms) -> String {
    let mut s = String::from("// Generated from platform_flags.json.\n");
    for (platform, flags) in platforms {
        s += &format!("pub mod {platform} {{\n");
        for (key, raw) in flags {
            let value = parse_value(platform, key, raw);
            s += &format!("    pub const {key}: u64 = {value:#x};\n");
        }
        s += "}\n";
    }
    s
}

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct DefaultsSection {
    orientation: Option<String>,
    enabled: Option<bool>,
    alignment: Option<u64>,
}

#[derive(Deserialize, Default)]
struct MetadataSection {
    sentinel: Option<u64>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    defaults: DefaultsSection,
    #[serde(default)]
    metadata: MetadataSection,
}

struct ResolvedConfig {
    /// 0 = trailing guard, 1 = leading guard. Mirrors `Orientation as u8`.
    orientation: u8,
    enabled: bool,
    alignment: u64,
    sentinel: u64,
}

fn resolve_config(cfg: &Config) -> ResolvedConfig {
    let orientation = match cfg.defaults.orientation.as_deref().unwrap_or("trailing") {
        "trailing" => 0,
        "leading" => 1,
        other => panic!(
            "defaults.orientation must be \"trailing\" or \"leading\", got {:?}",
            other
        ),
    };
    let enabled = cfg.defaults.enabled.unwrap_or(true);
    let sentinel = cfg.metadata.sentinel.unwrap_or(0xdead_beef);

    let word: u64 = env::var("CARGO_CFG_TARGET_POINTER_WIDTH")
        .ok()
        .and_then(|bits| bits.parse::<u64>().ok())
        .map_or(8, |bits| bits / 8);
    let alignment = cfg.defaults.alignment.unwrap_or(2 * word);
    assert!(
        alignment.is_power_of_two() && alignment <= 4096,
        "defaults.alignment must be a power of two no larger than 4096, got {}",
        alignment
    );

    assert!(sentinel != 0, "metadata.sentinel must be non-zero");
    if env::var("CARGO_CFG_TARGET_POINTER_WIDTH").as_deref() == Ok("32") {
        assert!(
            sentinel <= u32::MAX as u64,
            "metadata.sentinel ({:#x}) does not fit a 32-bit word",
            sentinel
        );
    }

    ResolvedConfig {
        orientation,
        enabled,
        alignment,
        sentinel,
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/pagefence.toml", manifest_dir)
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const SENTINEL: usize = {:#x};\n\
         pub const DEFAULT_ORIENTATION: u8 = {};\n\
         pub const DEFAULT_ENABLED: bool = {};\n\
         pub const DEFAULT_ALIGNMENT: usize = {};\n",
        cfg.sentinel, cfg.orientation, cfg.enabled, cfg.alignment,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=PAGEFENCE_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("PAGEFENCE_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");
    let resolved = resolve_config(&config);

    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}

use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub threads_per_core: usize,
    pub logging: TrafficLoggingConfig,
    pub patterns: Vec<TrafficPatternSpec>,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        // every thread stores its global id into the private, mesh and global regions
        let store_gid = |name: &str, base: u64| TrafficPatternSpec {
            name: name.to_string(),
            kind: "global_id".to_string(),
            op: "write".to_string(),
            base,
            ..TrafficPatternSpec::default()
        };
        Self {
            threads_per_core: 64,
            logging: TrafficLoggingConfig::default(),
            patterns: vec![
                store_gid("private_gid_w", 0),
                store_gid("mesh_gid_w", 0x8000),
                store_gid("global_gid_w", 0xC000),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficLoggingConfig {
    pub print_traffic_lines: bool,
}

impl Default for TrafficLoggingConfig {
    fn default() -> Self {
        Self {
            print_traffic_lines: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficPatternSpec {
    pub name: String,
    pub kind: String,
    pub op: String,
    pub base: u64,
    pub stride: u64,
    /// Address window of a random pattern, in words from `base`.
    pub span: u64,
    pub seed: u64,
}

impl Default for TrafficPatternSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: String::new(),
            op: "read".to_string(),
            base: 0,
            stride: 1,
            span: 0x100,
            seed: 0,
        }
    }
}

//! Layered YAML configuration: deep-merge, canonicalize, hash, type.
//!
//! One strategy file (plus optional env overlays) holds tiers, weights, and
//! thresholds for the whole pipeline. Files are merged in order, the merged
//! value is canonicalized to sorted-key JSON and SHA-256 hashed, and the
//! hash is recorded on every run row so a run is reproducible from config
//! alone.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub mod strategy;

pub use strategy::{
    ExecutionConfig, ForecastConfig, GateMode, MonitorConfig, MonteCarloDefaults, PortfolioConfig,
    QualityConfig, RiskLimitsConfig, ScreenerConfig, SignalWeights, StrategyConfig, Tier,
    UniverseConfig,
};

/// Environment profile selected by `KITE_ENV` (defaults to `dev`).
pub const ENV_PROFILE: &str = "KITE_ENV";

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Load the layered files and deserialize the typed [`StrategyConfig`].
pub fn load_strategy(paths: &[&str]) -> Result<(StrategyConfig, LoadedConfig)> {
    let loaded = load_layered_yaml(paths)?;
    let cfg: StrategyConfig = serde_json::from_value(loaded.config_json.clone())
        .context("strategy config does not match schema")?;
    cfg.validate()?;
    Ok((cfg, loaded))
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn later_layer_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(&dir, "base.yaml", "a: 1\nnested:\n  x: 1\n  y: 2\n");
        let over = write_yaml(&dir, "over.yaml", "nested:\n  y: 3\n");
        let loaded = load_layered_yaml(&[&base, &over]).unwrap();
        assert_eq!(loaded.config_json.pointer("/a").unwrap(), 1);
        assert_eq!(loaded.config_json.pointer("/nested/x").unwrap(), 1);
        assert_eq!(loaded.config_json.pointer("/nested/y").unwrap(), 3);
    }

    #[test]
    fn hash_is_order_insensitive_for_keys() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_yaml(&dir, "a.yaml", "b: 2\na: 1\n");
        let b = write_yaml(&dir, "b.yaml", "a: 1\nb: 2\n");
        let ha = load_layered_yaml(&[&a]).unwrap().config_hash;
        let hb = load_layered_yaml(&[&b]).unwrap().config_hash;
        assert_eq!(ha, hb, "canonicalization must erase key order");
    }

    #[test]
    fn hash_changes_with_value() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_yaml(&dir, "a.yaml", "a: 1\n");
        let b = write_yaml(&dir, "b.yaml", "a: 2\n");
        let ha = load_layered_yaml(&[&a]).unwrap().config_hash;
        let hb = load_layered_yaml(&[&b]).unwrap().config_hash;
        assert_ne!(ha, hb);
    }

    #[test]
    fn missing_file_errors_with_path() {
        let err = load_layered_yaml(&["/nonexistent/kite.yaml"]).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/kite.yaml"));
    }

    #[test]
    fn defaulted_strategy_loads_from_empty_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(&dir, "base.yaml", "{}\n");
        let (cfg, _) = load_strategy(&[&base]).unwrap();
        assert!(cfg.portfolio.tiers.len() >= 1);
    }
}

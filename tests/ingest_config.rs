// tests/ingest_config.rs
use chronicle_ingest::ingest::config::IngestConfig;
use std::path::PathBuf;
use std::{env, fs};

const ENV_KEYS: &[&str] = &[
    "INGEST_CONFIG_PATH",
    "INGEST_SOURCES_DIR",
    "INGEST_STORE_PATH",
    "INGEST_CONCURRENCY",
    "INGEST_INTERVAL_SECS",
];

fn clear_env() {
    for k in ENV_KEYS {
        env::remove_var(k);
    }
}

#[test]
fn parse_toml_and_json_paths() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("ingest.toml");
    fs::write(
        &p_toml,
        r#"
sources_dir = "tsv"
concurrency = 0
lane_window_days = 45
"#,
    )
    .unwrap();
    let t = IngestConfig::load_from(&p_toml).unwrap();
    assert_eq!(t.sources_dir, PathBuf::from("tsv"));
    assert_eq!(t.concurrency, 1, "zero concurrency is clamped");
    assert_eq!(t.lane_window_days, 45);

    let p_json = dir.path().join("ingest.json");
    fs::write(&p_json, r#"{"store_path": "db/events.json", "interval_secs": 600}"#).unwrap();
    let j = IngestConfig::load_from(&p_json).unwrap();
    assert_eq!(j.store_path, PathBuf::from("db/events.json"));
    assert_eq!(j.interval_secs, 600);
    assert_eq!(j.concurrency, 4);

    let p_bad = dir.path().join("broken.toml");
    fs::write(&p_bad, "concurrency = [").unwrap();
    assert!(IngestConfig::load_from(&p_bad).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the repo's own config/ is not picked up.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) Nothing at all: defaults
    let d = IngestConfig::load_default().unwrap();
    assert_eq!(d, IngestConfig::default());

    // 2) TOML fallback in ./config/
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("ingest.toml"), "concurrency = 2\n").unwrap();
    assert_eq!(IngestConfig::load_default().unwrap().concurrency, 2);

    // 3) The env path wins over the fallback
    let p_env = tmp.path().join("custom.json");
    fs::write(&p_env, r#"{"concurrency": 6}"#).unwrap();
    env::set_var("INGEST_CONFIG_PATH", p_env.display().to_string());
    assert_eq!(IngestConfig::load_default().unwrap().concurrency, 6);

    // 4) A dangling env path is an error
    env::set_var("INGEST_CONFIG_PATH", tmp.path().join("missing.toml"));
    assert!(IngestConfig::load_default().is_err());

    clear_env();
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_apply_on_top_of_file() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    env::set_var("INGEST_SOURCES_DIR", " /srv/sources ");
    env::set_var("INGEST_STORE_PATH", "/srv/events.json");
    env::set_var("INGEST_CONCURRENCY", "8");
    env::set_var("INGEST_INTERVAL_SECS", "not-a-number");
    let cfg = IngestConfig::load_default().unwrap();
    assert_eq!(cfg.sources_dir, PathBuf::from("/srv/sources"));
    assert_eq!(cfg.store_path, PathBuf::from("/srv/events.json"));
    assert_eq!(cfg.concurrency, 8);
    assert_eq!(cfg.interval_secs, 0, "unparseable override is ignored");

    clear_env();
    env::set_current_dir(&old).unwrap();
}

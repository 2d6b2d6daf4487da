use std::sync::Mutex;

use tempfile::NamedTempFile;

use sitewatch::config::SitewatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SITEWATCH_CONFIG",
        "SITEWATCH_DB_PATH",
        "SITEWATCH_DATA_DIR",
        "SITEWATCH_API_ADDR",
        "SITEWATCH_RECOGNIZER_URL",
        "SITEWATCH_MAPPER_URL",
        "SITEWATCH_INTERVAL_SECS",
        "SITEWATCH_COOLDOWN_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "sitewatch_prod.db",
        "data_dir": "/var/lib/sitewatch",
        "api": {
            "addr": "0.0.0.0:9100"
        },
        "collaborators": {
            "recognizer_url": "http://vision.internal/analyze",
            "mapper_url": "http://osha.internal/map"
        },
        "monitoring": {
            "analysis_interval_seconds": 2.0,
            "cooldown_seconds": 120.0,
            "clip_before_seconds": 10.0,
            "clip_after_seconds": 20.0
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SITEWATCH_CONFIG", file.path());
    std::env::set_var("SITEWATCH_API_ADDR", "127.0.0.1:9200");
    std::env::set_var("SITEWATCH_COOLDOWN_SECS", "60");

    let cfg = SitewatchConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "sitewatch_prod.db");
    assert_eq!(cfg.data_dir, std::path::PathBuf::from("/var/lib/sitewatch"));
    assert_eq!(cfg.api_addr, "127.0.0.1:9200");
    assert_eq!(cfg.recognizer_url, "http://vision.internal/analyze");
    assert_eq!(cfg.mapper_url, "http://osha.internal/map");
    assert_eq!(cfg.monitoring.analysis_interval_s, 2.0);
    assert_eq!(cfg.monitoring.cooldown_s, 60.0);
    assert_eq!(cfg.monitoring.clip_before_s, 10.0);
    assert_eq!(cfg.monitoring.clip_after_s, 20.0);

    clear_env();
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SitewatchConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "sitewatch.db");
    assert_eq!(cfg.api_addr, "127.0.0.1:8750");
    assert_eq!(cfg.monitoring.analysis_interval_s, 1.5);
    assert_eq!(cfg.monitoring.cooldown_s, 300.0);
}

#[test]
fn rejects_non_positive_interval() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SITEWATCH_INTERVAL_SECS", "0");
    assert!(SitewatchConfig::load().is_err());
    std::env::set_var("SITEWATCH_INTERVAL_SECS", "not-a-number");
    assert!(SitewatchConfig::load().is_err());

    clear_env();
}

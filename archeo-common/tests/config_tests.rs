//! Config file resolution tests
//!
//! Tests that touch ARCHEO_CONFIG are #[serial] to avoid ENV races.

use archeo_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
#[serial]
fn test_cli_path_wins_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/archeo-env.toml");

    let resolved = resolve_config_path(Some(Path::new("/tmp/archeo-cli.toml")), CONFIG_ENV_VAR);

    env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/archeo-cli.toml")));
}

#[test]
#[serial]
fn test_env_var_used_without_cli() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/archeo-env.toml");

    let resolved = resolve_config_path(None, CONFIG_ENV_VAR);

    env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/archeo-env.toml")));
}

#[test]
#[serial]
fn test_blank_env_var_is_ignored() {
    env::set_var(CONFIG_ENV_VAR, "   ");

    let resolved = resolve_config_path(None, CONFIG_ENV_VAR);

    env::remove_var(CONFIG_ENV_VAR);
    assert_ne!(resolved, Some(PathBuf::from("   ")));
}

use super::types::{Config, ProxyConfig, WatcherConfig};

use anyhow::{Result, bail};
use std::collections::HashSet;

/// Lowest port the proxy accepts for either side of the connection.
pub const MIN_PORT: u16 = 2000;

/// Highest port the proxy accepts for either side of the connection.
pub const MAX_PORT: u16 = u16::MAX;

pub fn validate_config(config: &Config) -> Result<()> {
    if config.root_dir.is_empty() {
        bail!("root directory required. use '.' for the current working directory");
    }

    let mut names = HashSet::new();
    for watcher in &config.watchers {
        validate_watcher(watcher)?;

        if !names.insert(watcher.name.as_str()) {
            bail!("two watchers with the same name: {}", watcher.name);
        }
    }

    validate_proxy(&config.proxy)
}

pub fn validate_watcher(watcher: &WatcherConfig) -> Result<()> {
    if watcher.name.is_empty() {
        bail!("watcher requires a name");
    }

    if watcher.file_types.is_empty() && watcher.file_names.is_empty() {
        bail!("{}: at least one file type or file name is required", watcher.name);
    }

    if watcher.tasks.is_empty() && watcher.service.is_empty() {
        bail!("{}: at least one task or service is required", watcher.name);
    }

    Ok(())
}

pub fn validate_proxy(proxy: &ProxyConfig) -> Result<()> {
    if !proxy.enabled {
        return Ok(());
    }

    if !(MIN_PORT..=MAX_PORT).contains(&proxy.app_port) {
        bail!("app_port must be between {MIN_PORT} and {MAX_PORT}");
    }

    if !(MIN_PORT..=MAX_PORT).contains(&proxy.proxy_port) {
        bail!("proxy_port must be between {MIN_PORT} and {MAX_PORT}");
    }

    if proxy.app_port == proxy.proxy_port {
        bail!("app_port and proxy_port must be different");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(name: &str) -> WatcherConfig {
        WatcherConfig {
            name: name.to_string(),
            file_types: vec![".rs".to_string()],
            tasks: vec!["cargo build".to_string()],
            ..WatcherConfig::default()
        }
    }

    fn config(watchers: Vec<WatcherConfig>) -> Config {
        Config {
            watchers,
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&config(vec![watcher("a"), watcher("b")])).is_ok());
        assert!(validate_config(&config(vec![])).is_ok());
    }

    #[test]
    fn test_default_template_is_incomplete() {
        let err = validate_config(&Config::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "watcher: at least one file type or file name is required"
        );
    }

    #[test]
    fn test_root_dir_required() {
        let mut cfg = config(vec![]);
        cfg.root_dir.clear();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_duplicate_watcher_names() {
        let err = validate_config(&config(vec![watcher("a"), watcher("a")])).unwrap_err();
        assert_eq!(err.to_string(), "two watchers with the same name: a");
    }

    #[test]
    fn test_watcher_rules() {
        let mut w = watcher("");
        assert_eq!(validate_watcher(&w).unwrap_err().to_string(), "watcher requires a name");

        w.name = "w".to_string();
        w.file_types.clear();
        assert!(validate_watcher(&w).is_err());

        w.file_names = vec!["main.go".to_string()];
        assert!(validate_watcher(&w).is_ok());

        w.tasks.clear();
        assert_eq!(
            validate_watcher(&w).unwrap_err().to_string(),
            "w: at least one task or service is required"
        );

        w.service = "./tmp/main".to_string();
        assert!(validate_watcher(&w).is_ok());
    }

    #[test]
    fn test_proxy_rules() {
        let mut proxy = ProxyConfig {
            enabled: false,
            app_port: 80,
            proxy_port: 80,
        };
        assert!(validate_proxy(&proxy).is_ok(), "disabled proxy is never checked");

        proxy.enabled = true;
        assert!(validate_proxy(&proxy).unwrap_err().to_string().starts_with("app_port"));

        proxy.app_port = 8000;
        assert!(validate_proxy(&proxy).unwrap_err().to_string().starts_with("proxy_port"));

        proxy.proxy_port = 8000;
        assert_eq!(
            validate_proxy(&proxy).unwrap_err().to_string(),
            "app_port and proxy_port must be different"
        );

        proxy.proxy_port = 8001;
        assert!(validate_proxy(&proxy).is_ok());
    }
}

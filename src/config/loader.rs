use super::types::{Config, JSON_CONFIG, TOML_CONFIG, YAML_CONFIG};
use super::validation::validate_config;

use anyhow::{Context, anyhow, bail};
use std::fs;
use std::path::{Path, PathBuf};

/// Supported configuration file formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Picks the format of a configuration file from its extension.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            Some(ext) => Err(anyhow!("please use .json, .yaml, or .toml, not .{ext}")),
            None => Err(anyhow!(
                "please use .json, .yaml, or .toml, '{}' has no extension",
                path.display()
            )),
        }
    }

    /// Parses the extension argument of `eavesdrop init`. An empty string means JSON.
    pub fn from_extension(ext: &str) -> anyhow::Result<Self> {
        match ext {
            "" | "json" | ".json" => Ok(Self::Json),
            "yaml" | ".yaml" | "yml" | ".yml" => Ok(Self::Yaml),
            "toml" | ".toml" => Ok(Self::Toml),
            _ => Err(anyhow!("invalid extension: {ext}")),
        }
    }

    /// Conventional file name for this format.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Json => JSON_CONFIG,
            Self::Yaml => YAML_CONFIG,
            Self::Toml => TOML_CONFIG,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
        }
    }
}

/// Load and validate configuration from a JSON, YAML or TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;

    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {} config", format.label()))?;

    load_config_from_str(&content, format)
}

/// Load and validate configuration from a string
pub fn load_config_from_str(content: &str, format: ConfigFormat) -> anyhow::Result<Config> {
    let config: Config = match format {
        ConfigFormat::Json => serde_json::from_str(content)
            .context("failed to unmarshal json to config")?,
        ConfigFormat::Yaml => {
            if content.trim().is_empty() {
                bail!("yaml config is empty");
            }
            serde_yaml::from_str(content).context("failed to unmarshal yaml to config")?
        }
        ConfigFormat::Toml => {
            if content.trim().is_empty() {
                bail!("toml config is empty");
            }
            toml::from_str(content).context("failed to unmarshal toml to config")?
        }
    };

    validate_config(&config).context("validation error")?;

    Ok(config)
}

/// Write the default configuration to `out_dir` in the format named by `ext`.
///
/// Returns the path of the written file.
pub fn generate_config<P: AsRef<Path>>(out_dir: P, ext: &str) -> anyhow::Result<PathBuf> {
    let format = ConfigFormat::from_extension(ext)?;
    let path = out_dir.as_ref().join(format.file_name());
    let config = Config::default();

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)
            .context("failed to marshal config to json")?,
        ConfigFormat::Yaml => {
            serde_yaml::to_string(&config).context("failed to marshal config to yaml")?
        }
        ConfigFormat::Toml => {
            toml::to_string_pretty(&config).context("failed to marshal config to toml")?
        }
    };

    fs::write(&path, content)
        .with_context(|| format!("failed to write config to {} file", format.label()))?;

    Ok(path)
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub provider: Option<ProviderConfig>,
    pub cache: Option<CacheConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub requests_per_second: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: Option<String>,
    pub ttl_days: Option<u64>,
}

/// Platform config directory path: `<config_dir>/tunedex/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tunedex").join("config.toml"))
}

/// Load config by cascading CWD `.tunedex.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".tunedex.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        provider: Some(ProviderConfig {
            base_url: overlay
                .provider
                .as_ref()
                .and_then(|p| p.base_url.clone())
                .or_else(|| base.provider.as_ref().and_then(|p| p.base_url.clone())),
            timeout_secs: overlay
                .provider
                .as_ref()
                .and_then(|p| p.timeout_secs)
                .or_else(|| base.provider.as_ref().and_then(|p| p.timeout_secs)),
            requests_per_second: overlay
                .provider
                .as_ref()
                .and_then(|p| p.requests_per_second)
                .or_else(|| {
                    base.provider
                        .as_ref()
                        .and_then(|p| p.requests_per_second)
                }),
        }),
        cache: Some(CacheConfig {
            path: overlay
                .cache
                .as_ref()
                .and_then(|c| c.path.clone())
                .or_else(|| base.cache.as_ref().and_then(|c| c.path.clone())),
            ttl_days: overlay
                .cache
                .as_ref()
                .and_then(|c| c.ttl_days)
                .or_else(|| base.cache.as_ref().and_then(|c| c.ttl_days)),
        }),
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(path)
}

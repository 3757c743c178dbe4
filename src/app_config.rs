//! Application configuration loading for CLI defaults.
//!
//! The file is a flat `key = value` list (a TOML subset). Values from the
//! file are applied over [`PipelineConfig::default`]; CLI flags are applied
//! last by the runtime.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fetchjob_core::PipelineConfig;

/// File configuration; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Base download folder.
    pub download_folder: Option<PathBuf>,
    /// Global chunk count (-1 unlimited).
    pub chunks: Option<i32>,
    /// Skip existing files instead of renaming.
    pub skip_existing: Option<bool>,
    /// Resolver probe depth; 0 disables redirect following.
    pub max_redirects: Option<u32>,
    /// Allow the premium → free fallback.
    pub fallback: Option<bool>,
    /// Octal mode for package folders.
    pub folder_permissions: Option<u32>,
    /// Octal mode for finished files.
    pub file_permissions: Option<u32>,
    /// Bytes read by the integrity scan.
    pub scan_read_limit: Option<u64>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Applies the keys that are set onto `config`.
    pub fn apply_to(&self, config: &mut PipelineConfig) {
        if let Some(folder) = &self.download_folder {
            config.download_folder.clone_from(folder);
        }
        if let Some(chunks) = self.chunks {
            config.chunks = chunks;
        }
        if let Some(skip_existing) = self.skip_existing {
            config.skip_existing = skip_existing;
        }
        if let Some(max_redirects) = self.max_redirects {
            config.max_redirects = max_redirects;
        }
        if let Some(fallback) = self.fallback {
            config.fallback = fallback;
        }
        if self.folder_permissions.is_some() {
            config.folder_permissions = self.folder_permissions;
        }
        if self.file_permissions.is_some() {
            config.file_permissions = self.file_permissions;
        }
        if let Some(limit) = self.scan_read_limit {
            config.scan_read_limit = limit;
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout_secs = secs;
        }
        if let Some(secs) = self.read_timeout_secs {
            config.read_timeout_secs = secs;
        }
    }

    /// Validates the file values by applying them to the defaults.
    pub fn validate(&self) -> Result<()> {
        let mut config = PipelineConfig::default();
        self.apply_to(&mut config);
        config.validate()?;
        Ok(())
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

impl LoadedConfig {
    /// Returns true when a file was found and parsed.
    #[must_use]
    pub fn loaded_from_file(&self) -> bool {
        self.config.is_some()
    }
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/fetchjob/config.toml`
/// 2. `$HOME/.config/fetchjob/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("fetchjob")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("fetchjob")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` (which must exist) or the default path if present.
pub fn load_file_config_from(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "download_folder" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.download_folder = Some(PathBuf::from(parsed));
            }
            "chunks" => {
                let parsed = parse_integer_i64(value).with_context(invalid)?;
                let chunks = i32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("chunks out of range for i32"))
                    .with_context(invalid)?;
                cfg.chunks = Some(chunks);
            }
            "skip_existing" => {
                cfg.skip_existing = Some(parse_boolean(value).with_context(invalid)?);
            }
            "max_redirects" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("max_redirects out of range for u32"))
                    .with_context(invalid)?;
                cfg.max_redirects = Some(n);
            }
            "fallback" => {
                cfg.fallback = Some(parse_boolean(value).with_context(invalid)?);
            }
            "folder_permissions" => {
                cfg.folder_permissions = Some(parse_mode(value).with_context(invalid)?);
            }
            "file_permissions" => {
                cfg.file_permissions = Some(parse_mode(value).with_context(invalid)?);
            }
            "scan_read_limit" => {
                cfg.scan_read_limit = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            unknown => {
                bail!(
                    "Unknown configuration key: '{}' on line {}",
                    unknown,
                    line_index + 1
                );
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_i64(raw_value: &str) -> Result<i64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    Ok(token.parse::<i64>()?)
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

/// Octal file mode, quoted (`"755"`, `"0o644"`) so it is not read as decimal.
fn parse_mode(raw_value: &str) -> Result<u32> {
    let literal = parse_string_literal(raw_value)?;
    let digits = literal.trim_start_matches("0o");
    if digits.is_empty() {
        bail!("Expected an octal mode such as \"755\"");
    }
    u32::from_str_radix(digits, 8).context("Expected an octal mode such as \"755\"")
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            "download_folder = \"/srv/dl\"\nchunks = 4\nskip_existing = true\n",
        )
        .unwrap();
        assert_eq!(cfg.download_folder, Some(PathBuf::from("/srv/dl")));
        assert_eq!(cfg.chunks, Some(4));
        assert_eq!(cfg.skip_existing, Some(true));
        assert_eq!(cfg.fallback, None);
    }

    #[test]
    fn test_parse_config_all_fields() {
        let raw = r#"
# fetchjob defaults
download_folder = "dl" # inline comment
chunks = -1
skip_existing = false
max_redirects = 0
fallback = false
folder_permissions = "755"
file_permissions = "0o644"
scan_read_limit = 4096
connect_timeout_secs = 10
read_timeout_secs = 60
"#;
        let cfg = parse_config_str(raw).unwrap();
        assert_eq!(cfg.chunks, Some(-1));
        assert_eq!(cfg.max_redirects, Some(0));
        assert_eq!(cfg.folder_permissions, Some(0o755));
        assert_eq!(cfg.file_permissions, Some(0o644));
        assert_eq!(cfg.scan_read_limit, Some(4096));

        let mut config = PipelineConfig::default();
        cfg.apply_to(&mut config);
        assert_eq!(config.download_folder, PathBuf::from("dl"));
        assert!(!config.fallback);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.read_timeout_secs, 60);
    }

    #[test]
    fn test_parse_config_rejects_unknown_key() {
        let err = parse_config_str("concurrency = 4").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"), "{err}");
    }

    #[test]
    fn test_parse_config_rejects_bad_syntax_and_values() {
        assert!(parse_config_str("chunks").is_err());
        assert!(parse_config_str("skip_existing = yes").is_err());
        assert!(parse_config_str("download_folder = dl").is_err());
        assert!(parse_config_str("file_permissions = \"9\"").is_err());

        let err = parse_config_str("chunks = x").unwrap_err();
        assert!(
            format!("{err:#}").contains("Invalid `chunks` value on line 1"),
            "{err:#}"
        );
    }

    #[test]
    fn test_parse_config_validates_ranges() {
        let err = parse_config_str("chunks = 0").unwrap_err();
        assert!(err.to_string().contains("`chunks`"), "{err}");
        assert!(parse_config_str("read_timeout_secs = 0").is_err());
        assert!(parse_config_str("max_redirects = 51").is_err());
    }

    #[test]
    fn test_strip_inline_comment_respects_strings() {
        assert_eq!(strip_inline_comment("a = \"x#y\" # c"), "a = \"x#y\" ");
        assert_eq!(strip_inline_comment("# only"), "");
    }

    #[test]
    fn test_load_explicit_config_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "fallback = false\n").unwrap();

        let loaded = load_file_config_from(Some(&path)).unwrap();
        assert!(loaded.loaded_from_file());
        assert_eq!(loaded.config.unwrap().fallback, Some(false));

        let missing = temp_dir.path().join("missing.toml");
        assert!(load_file_config_from(Some(&missing)).is_err());
    }
}

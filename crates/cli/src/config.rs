//! Configuration file and API key handling.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use llm::AnthropicConfig;
use pipeline::PipelineConfig;
use serde::Deserialize;
use tracing::debug;

/// Configuration file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = ".affiant/config.toml";

/// Where `save-key` stores the API key.
pub const DEFAULT_KEY_PATH: &str = ".affiant/api_key";

/// Prompt directory used when neither the flag nor the file names one.
pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

/// Contents of `config.toml`. Every section is optional.
///
/// ```toml
/// prompts_dir = "prompts"
///
/// [pipeline]
/// max_iterations = 3
///
/// [pipeline.generation]
/// max_output_tokens = 4096
/// temperature = 0.0
///
/// [anthropic]
/// model = "claude-sonnet-4-20250514"
/// max_retries = 2
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub prompts_dir: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub anthropic: AnthropicConfig,
}

impl FileConfig {
    /// Parses a TOML document.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration file")
    }

    /// Loads `explicit`, or the default path if it exists.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = explicit.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
        match fs::read_to_string(path) {
            Ok(text) => {
                debug!(path = %path.display(), "Loaded configuration file");
                Self::parse(&text).with_context(|| format!("in {}", path.display()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound && explicit.is_none() => {
                Ok(Self::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config file {}", path.display()))
            }
        }
    }
}

/// Picks the API key: the flag or environment value first, then the key
/// file.
pub fn resolve_api_key(explicit: Option<String>, key_file: &Path) -> anyhow::Result<String> {
    if let Some(key) = explicit.filter(|k| !k.trim().is_empty()) {
        return Ok(key.trim().to_string());
    }
    match fs::read_to_string(key_file) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        Ok(_) => bail!("API key file {} is empty", key_file.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => bail!(
            "no API key found: set ANTHROPIC_API_KEY or run `affiant save-key <key>`"
        ),
        Err(e) => {
            Err(e).with_context(|| format!("failed to read API key file {}", key_file.display()))
        }
    }
}

/// Writes the key file, readable by the owner only on Unix.
pub fn save_api_key(key: &str, key_file: &Path) -> anyhow::Result<()> {
    let key = key.trim();
    if key.is_empty() {
        bail!("refusing to save an empty API key");
    }
    if let Some(parent) = key_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(key_file, key)
        .with_context(|| format!("failed to write {}", key_file.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(key_file, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {}", key_file.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = FileConfig::parse("").expect("valid");
        assert_eq!(config, FileConfig::default());
        assert_eq!(config.pipeline.max_iterations, 3);
        assert_eq!(config.anthropic.model, llm::DEFAULT_MODEL);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = FileConfig::parse(
            r#"
            prompts_dir = "my-prompts"

            [pipeline]
            max_iterations = 5

            [pipeline.generation]
            temperature = 0.2

            [anthropic]
            max_retries = 0
            "#,
        )
        .expect("valid");

        assert_eq!(config.prompts_dir, Some(PathBuf::from("my-prompts")));
        assert_eq!(config.pipeline.max_iterations, 5);
        assert_eq!(config.pipeline.generation.temperature.as_f64(), 0.2);
        assert_eq!(config.pipeline.generation.max_output_tokens.as_u32(), 4096);
        assert_eq!(config.anthropic.max_retries, 0);
        assert_eq!(config.anthropic.timeout_secs, 120);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(FileConfig::parse("max_iteration = 3").is_err());
    }

    #[test]
    fn test_out_of_range_temperature_fails_validation() {
        let config = FileConfig::parse("[pipeline.generation]\ntemperature = 1.5").expect("parses");
        assert!(config.pipeline.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        assert!(FileConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_explicit_key_wins_over_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key_file = dir.path().join("api_key");
        fs::write(&key_file, "from-file\n").expect("write");

        assert_eq!(
            resolve_api_key(Some("from-env".to_string()), &key_file).expect("key"),
            "from-env"
        );
        assert_eq!(resolve_api_key(None, &key_file).expect("key"), "from-file");
        assert_eq!(
            resolve_api_key(Some("  ".to_string()), &key_file).expect("key"),
            "from-file"
        );
    }

    #[test]
    fn test_missing_key_mentions_save_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = resolve_api_key(None, &dir.path().join("api_key")).unwrap_err();
        assert!(err.to_string().contains("save-key"));
    }

    #[test]
    fn test_save_key_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key_file = dir.path().join(".affiant").join("api_key");

        save_api_key(" sk-ant-123 \n", &key_file).expect("saved");

        assert_eq!(fs::read_to_string(&key_file).expect("read"), "sk-ant-123");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&key_file).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        assert!(save_api_key("   ", &key_file).is_err());
    }
}

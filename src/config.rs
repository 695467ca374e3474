//! TOML configuration parsing and validation.
//!
//! Every option affects exactly the component named by its section:
//! `[codebook]` and `[responses]` the CSV loaders, `[gateway]` the model
//! gateway, `[context_selection]` the context selector, `[batch]` the
//! orchestrator, `[audit]` the audit log, `[output]` the result writers,
//! and `[prompt]` the prompt builder.
//!
//! See [`load_config`] for validation rules.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rag_coder_core::prompt::Instructions;
use rag_coder_core::retry::RetryPolicy;
use rag_coder_core::select::SelectionParams;
use rag_coder_core::CodingError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub codebook: CodebookConfig,
    pub responses: ResponsesConfig,
    pub output: OutputConfig,
    pub audit: AuditConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub context_selection: ContextSelectionConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodebookConfig {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_code_id_column")]
    pub id_column: String,
    #[serde(default = "default_label_column")]
    pub label_column: String,
    #[serde(default = "default_description_column")]
    pub description_column: String,
    /// Optional column holding `|`-separated example excerpts.
    #[serde(default)]
    pub examples_column: Option<String>,
    /// Optional file of already-coded examples (`response_text`, `label`).
    #[serde(default)]
    pub examples_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResponsesConfig {
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_response_id_column")]
    pub id_column: String,
    #[serde(default = "default_text_column")]
    pub text_column: String,
}

fn default_delimiter() -> char {
    ';'
}
fn default_code_id_column() -> String {
    "code_id".to_string()
}
fn default_label_column() -> String {
    "label".to_string()
}
fn default_description_column() -> String {
    "description".to_string()
}
fn default_response_id_column() -> String {
    "response_id".to_string()
}
fn default_text_column() -> String {
    "response_text".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub error_report_path: Option<PathBuf>,
    /// Delimiter of both result files. Defaults to `responses.delimiter`.
    #[serde(default)]
    pub delimiter: Option<char>,
}

impl OutputConfig {
    /// Error report path, defaulting to `<output stem>.errors.csv`.
    pub fn error_report_path(&self) -> PathBuf {
        match &self.error_report_path {
            Some(p) => p.clone(),
            None => {
                let stem = self
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "coded".to_string());
                self.path.with_file_name(format!("{}.errors.csv", stem))
            }
        }
    }
}

impl Config {
    /// Delimiter for the result files as a CSV byte.
    ///
    /// Validation guarantees the character fits in one byte.
    pub fn output_delimiter(&self) -> u8 {
        let delimiter = self.output.delimiter.unwrap_or(self.responses.delimiter);
        u8::try_from(delimiter).unwrap_or(b';')
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    pub log_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause before every request, to stay under coarse rate limits.
    #[serde(default)]
    pub min_request_interval_ms: u64,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Gemini content filters, sent as `safetySettings`. Ignored by other providers.
    #[serde(default)]
    pub safety_settings: Vec<SafetySetting>,
}

/// One Gemini harm category and the threshold at which it blocks.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    32_000
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_jitter() -> bool {
    true
}

impl GatewayConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            jitter: self.jitter,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextSelectionConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_max_full_codebook")]
    pub max_full_codebook: usize,
}

impl Default for ContextSelectionConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            max_full_codebook: default_max_full_codebook(),
        }
    }
}

fn default_k() -> usize {
    8
}
fn default_max_full_codebook() -> usize {
    40
}

impl ContextSelectionConfig {
    pub fn params(&self) -> SelectionParams {
        SelectionParams {
            k: self.k,
            max_full_codebook: self.max_full_codebook,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Wall-clock budget for the whole batch, in seconds.
    #[serde(default)]
    pub time_budget_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            time_budget_secs: None,
        }
    }
}

fn default_concurrency_limit() -> usize {
    4
}

impl BatchConfig {
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptConfig {
    #[serde(default)]
    pub instructions: Option<String>,
}

impl PromptConfig {
    pub fn instructions(&self) -> Instructions {
        match &self.instructions {
            Some(text) => Instructions::new(text.clone()),
            None => Instructions::default(),
        }
    }
}

/// Read, parse, and validate a configuration file.
///
/// Validation failures are reported as [`CodingError::Config`].
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| CodingError::Config(format!("failed to parse {}: {}", path.display(), e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> std::result::Result<(), CodingError> {
    let bail = |msg: String| -> std::result::Result<(), CodingError> {
        Err(CodingError::Config(msg))
    };

    if config.context_selection.k == 0 {
        return bail("context_selection.k must be >= 1".into());
    }
    if config.batch.concurrency_limit == 0 {
        return bail("batch.concurrency_limit must be >= 1".into());
    }
    if config.batch.time_budget_secs == Some(0) {
        return bail("batch.time_budget_secs must be > 0 when set".into());
    }
    if config.gateway.backoff_base_ms == 0 {
        return bail("gateway.backoff_base_ms must be >= 1".into());
    }
    if config.gateway.backoff_max_ms < config.gateway.backoff_base_ms {
        return bail("gateway.backoff_max_ms must be >= gateway.backoff_base_ms".into());
    }
    if config.gateway.timeout_secs == 0 {
        return bail("gateway.timeout_secs must be > 0".into());
    }

    match config.gateway.provider.as_str() {
        "gemini" | "openai" | "ollama" => {}
        other => {
            return bail(format!(
                "Unknown gateway provider: '{}'. Must be gemini, openai, or ollama.",
                other
            ))
        }
    }
    if config.gateway.model.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return bail(format!(
            "gateway.model must be specified when provider is '{}'",
            config.gateway.provider
        ));
    }

    let delimiters = [
        ("codebook.delimiter", Some(config.codebook.delimiter)),
        ("responses.delimiter", Some(config.responses.delimiter)),
        ("output.delimiter", config.output.delimiter),
    ];
    for (key, delimiter) in delimiters {
        if let Some(c) = delimiter {
            if !c.is_ascii() {
                return bail(format!("{} '{}' must be a single-byte character", key, c));
            }
        }
    }
    if config
        .gateway
        .safety_settings
        .iter()
        .any(|s| s.category.trim().is_empty() || s.threshold.trim().is_empty())
    {
        return bail("gateway.safety_settings entries need a category and a threshold".into());
    }

    if config.codebook.id_column.trim().is_empty()
        || config.responses.id_column.trim().is_empty()
        || config.responses.text_column.trim().is_empty()
    {
        return bail("column names must not be empty".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[codebook]
path = "codebook.csv"

[responses]
path = "responses.csv"

[output]
path = "out/coded.csv"

[audit]
log_path = "out/audit.sqlite"

[gateway]
provider = "gemini"
model = "gemini-1.5-pro"
"#;

    fn parse(extra: &str) -> std::result::Result<Config, CodingError> {
        let cfg: Config = toml::from_str(&format!("{MINIMAL}{extra}")).unwrap();
        validate(&cfg).map(|_| cfg)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.codebook.delimiter, ';');
        assert_eq!(cfg.codebook.id_column, "code_id");
        assert_eq!(cfg.responses.text_column, "response_text");
        assert_eq!(cfg.gateway.max_retries, 3);
        assert_eq!(cfg.context_selection.k, 8);
        assert_eq!(cfg.batch.concurrency_limit, 4);
        assert!(cfg.batch.time_budget().is_none());
        assert_eq!(cfg.prompt.instructions(), Instructions::default());
    }

    #[test]
    fn error_report_path_defaults_next_to_output() {
        let cfg = parse("").unwrap();
        assert_eq!(
            cfg.output.error_report_path(),
            PathBuf::from("out/coded.errors.csv")
        );
    }

    #[test]
    fn output_delimiter_follows_responses_unless_set() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.output_delimiter(), b';');

        let text = MINIMAL.replace(
            "path = \"responses.csv\"\n",
            "path = \"responses.csv\"\ndelimiter = \"\\t\"\n",
        );
        let cfg: Config = toml::from_str(&text).unwrap();
        assert_eq!(cfg.output_delimiter(), b'\t');

        let text = text.replace(
            "path = \"out/coded.csv\"\n",
            "path = \"out/coded.csv\"\ndelimiter = \",\"\n",
        );
        let cfg: Config = toml::from_str(&text).unwrap();
        assert_eq!(cfg.output_delimiter(), b',');
    }

    #[test]
    fn multibyte_delimiter_rejected() {
        let text = MINIMAL.replace(
            "path = \"out/coded.csv\"\n",
            "path = \"out/coded.csv\"\ndelimiter = \"§\"\n",
        );
        let cfg: Config = toml::from_str(&text).unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("output.delimiter"));
    }

    #[test]
    fn safety_settings_parse() {
        let cfg = parse(
            "\n[[gateway.safety_settings]]\ncategory = \"HARM_CATEGORY_HARASSMENT\"\nthreshold = \"BLOCK_NONE\"\n",
        )
        .unwrap();
        assert_eq!(
            cfg.gateway.safety_settings,
            vec![SafetySetting {
                category: "HARM_CATEGORY_HARASSMENT".into(),
                threshold: "BLOCK_NONE".into(),
            }]
        );
    }

    #[test]
    fn retry_policy_from_gateway() {
        let cfg = parse("").unwrap();
        let policy = cfg.gateway.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_base, Duration::from_millis(1000));
    }

    #[test]
    fn zero_k_rejected() {
        let err = parse("[context_selection]\nk = 0\n").unwrap_err();
        assert!(err.to_string().contains("context_selection.k"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = parse("[batch]\nconcurrency_limit = 0\n").unwrap_err();
        assert!(err.to_string().contains("concurrency_limit"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let text = MINIMAL.replace("\"gemini\"", "\"bard\"");
        let cfg: Config = toml::from_str(&text).unwrap();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("Unknown gateway provider"));
    }

    #[test]
    fn missing_model_rejected() {
        let text = MINIMAL.replace("model = \"gemini-1.5-pro\"\n", "");
        let cfg: Config = toml::from_str(&text).unwrap();
        assert!(matches!(validate(&cfg), Err(CodingError::Config(_))));
    }

    #[test]
    fn backoff_max_below_base_rejected() {
        let text = MINIMAL.replace(
            "model = \"gemini-1.5-pro\"\n",
            "model = \"m\"\nbackoff_base_ms = 500\nbackoff_max_ms = 100\n",
        );
        let cfg: Config = toml::from_str(&text).unwrap();
        assert!(validate(&cfg).is_err());
    }
}

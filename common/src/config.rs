use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where frames come from. `url` may be empty; the console then waits for
/// an explicit `load` command instead of binding a stream at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_poll_fps")]
    pub poll_fps: f64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Frames wider than this are downscaled before re-encoding.
    #[serde(default = "default_max_width")]
    pub max_width: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_frame_prompt")]
    pub frame_prompt: String,
    #[serde(default = "default_recap_prompt")]
    pub recap_prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            mode: default_mode(),
            poll_fps: default_poll_fps(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            max_width: default_max_width(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_poll_fps() -> f64 {
    1.0
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_max_width() -> u32 {
    1280
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_frame_prompt() -> String {
    "Describe what is happening in this video frame in one or two sentences. \
     Focus on the content being shown, not on image quality."
        .into()
}
fn default_recap_prompt() -> String {
    "The following are chronological summaries of key moments captured from a \
     live stream. Write one short paragraph that summarizes the stream so far."
        .into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str("[summarizer]\napi_key = \"test-key\"\n").unwrap();
        assert_eq!(config.stream.mode, "mjpeg");
        assert!(config.stream.url.is_empty());
        assert_eq!(config.capture.jpeg_quality, 80);
        assert_eq!(config.capture.max_width, 1280);
        assert_eq!(config.summarizer.api_key, "test-key");
        assert_eq!(config.summarizer.model, "gemini-2.0-flash");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config: Config = toml::from_str(
            "[stream]\n\
             url = \"http://cam.local/stream\"\n\
             mode = \"polling\"\n\
             poll_fps = 0.5\n\
             [capture]\n\
             jpeg_quality = 60\n\
             [summarizer]\n\
             api_key = \"k\"\n\
             model = \"gemini-2.5-pro\"\n",
        )
        .unwrap();
        assert_eq!(config.stream.url, "http://cam.local/stream");
        assert_eq!(config.stream.mode, "polling");
        assert_eq!(config.stream.poll_fps, 0.5);
        assert_eq!(config.capture.jpeg_quality, 60);
        assert_eq!(config.summarizer.model, "gemini-2.5-pro");
    }

    #[test]
    fn missing_api_key_is_a_parse_error() {
        let result: Result<Config, _> = toml::from_str("[summarizer]\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load("/nonexistent/stream-recap.toml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile(_, _)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let path =
            std::env::temp_dir().join(format!("stream-recap-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[summarizer\napi_key = ").unwrap();
        let err = Config::load(path.to_str().unwrap()).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

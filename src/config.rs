//! Converter configuration
//!
//! Settings come from an optional TOML file and are then overridden by the
//! command line.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "audio-transcoder.toml";

/// Output codec selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputCodec {
    #[default]
    Opus,
    Flac,
    Aac,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Complete converter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Codec to convert to
    pub codec: OutputCodec,

    /// Target bitrate in bps for lossy codecs; codec default when unset
    pub bitrate: Option<u64>,

    /// Extension of files picked up in directory conversion (default "mp3")
    pub source_extension: Option<String>,

    /// Replace outputs that already exist
    pub overwrite: bool,

    /// Write a JSON run report here when set
    pub report: Option<PathBuf>,

    pub logging: LoggingConfig,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            codec: OutputCodec::default(),
            bitrate: None,
            source_extension: None,
            overwrite: false,
            report: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ConverterConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConverterConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Apply command-line overrides.
    pub fn merge_cli(mut self, cli: &Cli) -> Self {
        if let Some(codec) = cli.codec {
            self.codec = codec;
        }
        if cli.bitrate.is_some() {
            self.bitrate = cli.bitrate;
        }
        if let Some(ext) = &cli.source_extension {
            self.source_extension = Some(ext.clone());
        }
        if cli.overwrite {
            self.overwrite = true;
        }
        if cli.report.is_some() {
            self.report = cli.report.clone();
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.bitrate {
            return Err("bitrate must be greater than zero".to_string());
        }
        if let Some(ext) = &self.source_extension {
            if ext.trim_start_matches('.').is_empty() {
                return Err("source_extension must not be empty".to_string());
            }
        }
        Ok(())
    }
}

/// Batch audio transcoder.
#[derive(Parser, Debug, Clone)]
#[command(name = "audio-transcoder")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML).
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output codec.
    #[arg(long, value_enum)]
    pub codec: Option<OutputCodec>,

    /// Target bitrate in bits per second.
    #[arg(short = 'b', long)]
    pub bitrate: Option<u64>,

    /// Extension of source files converted from directories.
    #[arg(long)]
    pub source_extension: Option<String>,

    /// Replace existing output files.
    #[arg(long)]
    pub overwrite: bool,

    /// Write a JSON run report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Output directory, or output file when converting a single file.
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Input files or directories.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ConverterConfig::default();
        assert_eq!(config.codec, OutputCodec::Opus);
        assert_eq!(config.bitrate, None);
        assert!(!config.overwrite);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(
            temp_file,
            "codec = \"flac\"\n\n[logging]\nformat = \"json\"\n"
        )
        .unwrap();

        let config = ConverterConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.codec, OutputCodec::Flac);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.source_extension, None);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let config = ConverterConfig {
            codec: OutputCodec::Aac,
            bitrate: Some(192_000),
            source_extension: Some("wav".into()),
            overwrite: true,
            ..Default::default()
        };
        let temp_file = NamedTempFile::new().unwrap();
        config.to_file(temp_file.path()).unwrap();
        let loaded = ConverterConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "codec = [not toml").unwrap();
        assert!(ConverterConfig::from_file(temp_file.path()).is_err());
        assert!(ConverterConfig::from_file("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = Cli::parse_from([
            "audio-transcoder",
            "--codec",
            "aac",
            "--bitrate",
            "96000",
            "--output",
            "/tmp/out",
            "a.mp3",
            "music/",
        ]);
        assert_eq!(cli.inputs.len(), 2);
        let config = ConverterConfig::default().merge_cli(&cli);
        assert_eq!(config.codec, OutputCodec::Aac);
        assert_eq!(config.bitrate, Some(96_000));
        assert!(!config.overwrite);
    }

    #[test]
    fn test_validate() {
        let config = ConverterConfig {
            bitrate: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = ConverterConfig {
            source_extension: Some(".".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

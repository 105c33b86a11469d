//! Configuration module for the wrap studio service

use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};
use std::path::PathBuf;

/// Main application settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub templates: TemplateSettings,
    #[serde(default)]
    pub segmentation: SegmentationSettings,
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Template library configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSettings {
    pub path: PathBuf,
}

/// Segmentation defaults applied to every loaded template
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Average RGB above this value counts as open surface
    pub threshold: u8,
    /// Mask fill color (`#rgb`, `#rrggbb` or `#rrggbbaa`)
    pub fill_color: String,
    /// Line-art guide color
    pub line_color: String,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        SegmentationSettings {
            threshold: 200,
            fill_color: "#4a90d9".to_string(),
            line_color: "#d3d3d3".to_string(),
        }
    }
}

/// Export surface limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Largest raster surface (in pixels) the engine will allocate
    pub max_surface_pixels: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            max_surface_pixels: 64_000_000,
        }
    }
}

/// Outbound image fetch configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            timeout_secs: 30,
            user_agent: format!("wrap-studio/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Settings {
    /// Load configuration from files and environment variables
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables (prefixed with WRAP_)
    /// 2. config/local.toml (gitignored)
    /// 3. config/default.toml
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let defaults = Settings::default();

        let builder = Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port as i64)?
            .set_default("templates.path", defaults.templates.path.to_string_lossy().to_string())?
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local overrides (gitignored)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment variables (WRAP_SERVER__PORT, etc.)
            .add_source(environment());

        builder.build()?.try_deserialize()
    }
}

/// `WRAP_` prefix, `__` between section and key
fn environment() -> Environment {
    Environment::with_prefix("WRAP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: None,
            },
            templates: TemplateSettings {
                path: PathBuf::from("assets/templates"),
            },
            segmentation: SegmentationSettings::default(),
            export: ExportSettings::default(),
            fetch: FetchSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.segmentation.threshold, 200);
        assert_eq!(settings.export.max_surface_pixels, 64_000_000);
    }

    #[test]
    fn test_partial_sections_fall_back_to_defaults() {
        let settings: Settings = Config::builder()
            .set_default("server.host", "127.0.0.1").unwrap()
            .set_default("server.port", 9000).unwrap()
            .set_default("templates.path", "templates").unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.segmentation.fill_color, "#4a90d9");
        assert_eq!(settings.fetch.timeout_secs, 30);
    }

    #[test]
    fn test_environment_override_names() {
        let vars: config::Map<String, String> = [
            ("WRAP_SERVER__PORT", "9100"),
            ("WRAP_SERVER__HOST", "127.0.0.1"),
            ("WRAP_TEMPLATES__PATH", "/srv/templates"),
            ("WRAP_SEGMENTATION__THRESHOLD", "180"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let settings: Settings = Config::builder()
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.templates.path, PathBuf::from("/srv/templates"));
        assert_eq!(settings.segmentation.threshold, 180);
    }

    #[test]
    fn test_partial_fetch_section_keeps_user_agent() {
        let settings: Settings = Config::builder()
            .set_default("server.host", "127.0.0.1").unwrap()
            .set_default("server.port", 9000).unwrap()
            .set_default("templates.path", "templates").unwrap()
            .set_override("fetch.timeout_secs", 5).unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.fetch.timeout_secs, 5);
        assert!(settings.fetch.user_agent.starts_with("wrap-studio/"));
    }
}

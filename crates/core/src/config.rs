//! Application configuration.
//!
//! Settings are read from a TOML file: the path in `VKFRAME_CONFIG` if set,
//! otherwise `vkframe.toml` in the working directory. Every section and field
//! is optional and falls back to its default.
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [renderer]
//! enable_validation = true
//! device_extensions = ["VK_KHR_swapchain"]
//!
//! [renderer.uniforms]
//! enabled = true
//! spin_degrees_per_sec = 30.0
//!
//! [log]
//! filter = "info,vkframe_rhi=trace"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::logging::LogConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "VKFRAME_CONFIG";
/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "vkframe.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub log: LogConfig,
    pub stats: StatsConfig,
}

/// `[window]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            title: "vkframe".to_string(),
        }
    }
}

/// `[renderer]` section.
///
/// Layer and extension lists are handed to instance creation and adapter
/// selection as given.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Defaults to on in debug builds.
    pub enable_validation: bool,
    pub validation_layers: Vec<String>,
    /// Device extensions an adapter must support; all are enabled.
    pub device_extensions: Vec<String>,
    /// SPIR-V vertex shader.
    pub vertex_shader: PathBuf,
    /// SPIR-V fragment shader.
    pub fragment_shader: PathBuf,
    pub uniforms: UniformsConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            device_extensions: vec!["VK_KHR_swapchain".to_string()],
            vertex_shader: PathBuf::from("shaders/shader.vert.spv"),
            fragment_shader: PathBuf::from("shaders/shader.frag.spv"),
            uniforms: UniformsConfig::default(),
        }
    }
}

/// `[renderer.uniforms]` section.
///
/// When enabled, every swapchain image gets a uniform buffer holding the
/// projection, view and model matrices, bound at set 0, binding 0. The
/// vertex shader must declare that block (see `shaders/mvp.vert`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UniformsConfig {
    pub enabled: bool,
    /// Rotation of the model around the view axis.
    pub spin_degrees_per_sec: f32,
}

impl Default for UniformsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            spin_degrees_per_sec: 45.0,
        }
    }
}

/// `[stats]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Seconds between frame-rate reports.
    pub report_interval_secs: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 2.0,
        }
    }
}

impl StatsConfig {
    /// Reporting interval; the default is used for negative or non-finite values.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.report_interval_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(Self::default().report_interval_secs))
    }
}

impl AppConfig {
    /// Loads the configuration from [`Self::path`].
    ///
    /// # Errors
    ///
    /// A missing `vkframe.toml` yields the defaults, but a missing file named
    /// by `VKFRAME_CONFIG` is an [`Error::Io`]. A malformed file is an
    /// [`Error::Config`].
    pub fn load() -> Result<Self> {
        let path = Self::path();
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&path, &text),
            Err(e)
                if e.kind() == std::io::ErrorKind::NotFound
                    && std::env::var_os(CONFIG_ENV).is_none() =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads and parses the file at `path`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(path, &text)
    }

    /// Config file location: `VKFRAME_CONFIG` or `vkframe.toml`.
    pub fn path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Parses TOML text; `path` is used only in error messages.
    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config {
                path: path.to_path_buf(),
                message: format!(
                    "window size must be non-zero, got {}x{}",
                    self.window.width, self.window.height
                ),
            });
        }
        if !self.renderer.uniforms.spin_degrees_per_sec.is_finite() {
            return Err(Error::Config {
                path: path.to_path_buf(),
                message: "renderer.uniforms.spin_degrees_per_sec must be finite".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<AppConfig> {
        AppConfig::parse(Path::new("test.toml"), text)
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        assert_eq!(parse("").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
            [window]
            width = 1280

            [renderer]
            enable_validation = false
            device_extensions = ["VK_KHR_swapchain", "VK_KHR_maintenance1"]

            [log]
            filter = "warn"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 768);
        assert!(!config.renderer.enable_validation);
        assert_eq!(config.renderer.device_extensions.len(), 2);
        assert_eq!(
            config.renderer.validation_layers,
            vec!["VK_LAYER_KHRONOS_validation".to_string()]
        );
        assert_eq!(config.log.filter, "warn");
        assert_eq!(config.stats, StatsConfig::default());
        assert!(!config.renderer.uniforms.enabled);
    }

    #[test]
    fn test_uniforms_section() {
        let config = parse(
            r#"
            [renderer]
            vertex_shader = "shaders/mvp.vert.spv"

            [renderer.uniforms]
            enabled = true
            spin_degrees_per_sec = 30.0
            "#,
        )
        .unwrap();

        assert!(config.renderer.uniforms.enabled);
        assert_eq!(config.renderer.uniforms.spin_degrees_per_sec, 30.0);
        assert_eq!(
            config.renderer.vertex_shader,
            PathBuf::from("shaders/mvp.vert.spv")
        );
        assert_eq!(
            config.renderer.fragment_shader,
            PathBuf::from("shaders/shader.frag.spv")
        );
    }

    #[test]
    fn test_non_finite_spin_is_rejected() {
        assert!(matches!(
            parse("[renderer.uniforms]\nspin_degrees_per_sec = nan"),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let err = parse("[window]\nwidth = \"wide\"").unwrap_err();
        match err {
            Error::Config { path, .. } => assert_eq!(path, PathBuf::from("test.toml")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_zero_window_size_is_rejected() {
        assert!(matches!(
            parse("[window]\nheight = 0"),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_stats_interval_falls_back_on_bad_values() {
        let stats = StatsConfig {
            report_interval_secs: -1.0,
        };
        assert_eq!(stats.interval(), Duration::from_secs(2));

        let stats = StatsConfig {
            report_interval_secs: 0.5,
        };
        assert_eq!(stats.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_from_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("vkframe-config-does-not-exist.toml");
        assert!(matches!(AppConfig::load_from(&path), Err(Error::Io(_))));
    }
}

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerSetting {
    #[default]
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSetting {
    #[default]
    System,
    FixedStep(Duration),
}

/// Fully validated preview settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewConfig {
    pub window: WindowConfig,
    pub render: RenderConfig,
    pub scene: SceneConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// `None` renders on every display refresh.
    pub fps: Option<f32>,
    pub power: PowerSetting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub rotation_step: f32,
    pub fov_degrees: f32,
    pub camera_distance: f32,
    pub clear_color: [f64; 4],
    pub clock: ClockSetting,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig {
                width: default_width(),
                height: default_height(),
                title: default_title(),
            },
            render: RenderConfig {
                fps: None,
                power: PowerSetting::Low,
            },
            scene: SceneConfig {
                rotation_step: default_rotation_step(),
                fov_degrees: default_fov(),
                camera_distance: default_camera_distance(),
                clear_color: default_clear_color(),
                clock: ClockSetting::System,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    window: RawWindow,
    #[serde(default)]
    render: RawRender,
    #[serde(default)]
    scene: RawScene,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWindow {
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
    #[serde(default = "default_title")]
    title: String,
}

impl Default for RawWindow {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRender {
    #[serde(default)]
    fps: Option<f32>,
    #[serde(default)]
    power: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScene {
    #[serde(default = "default_rotation_step")]
    rotation_step: f32,
    #[serde(default = "default_fov")]
    fov_degrees: f32,
    #[serde(default = "default_camera_distance")]
    camera_distance: f32,
    #[serde(default = "default_clear_color")]
    clear_color: [f64; 4],
    #[serde(default)]
    clock: Option<String>,
}

impl Default for RawScene {
    fn default() -> Self {
        Self {
            rotation_step: default_rotation_step(),
            fov_degrees: default_fov(),
            camera_distance: default_camera_distance(),
            clear_color: default_clear_color(),
            clock: None,
        }
    }
}

fn default_width() -> u32 {
    400
}

fn default_height() -> u32 {
    400
}

fn default_title() -> String {
    "shadergen preview".to_string()
}

fn default_rotation_step() -> f32 {
    0.01
}

fn default_fov() -> f32 {
    75.0
}

fn default_camera_distance() -> f32 {
    3.0
}

fn default_clear_color() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn parse_power(raw: &str) -> Result<PowerSetting, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" | "low-power" => Ok(PowerSetting::Low),
        "high" | "high-performance" => Ok(PowerSetting::High),
        other => Err(ConfigError::Invalid(format!(
            "render.power must be 'low' or 'high', got '{other}'"
        ))),
    }
}

fn parse_clock(raw: &str) -> Result<ClockSetting, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("system") {
        return Ok(ClockSetting::System);
    }
    let step = humantime::parse_duration(trimmed).map_err(|err| {
        ConfigError::Invalid(format!(
            "scene.clock must be 'system' or a duration such as '16ms', got '{trimmed}': {err}"
        ))
    })?;
    if step.is_zero() {
        return Err(ConfigError::Invalid(
            "scene.clock fixed step must be greater than zero".into(),
        ));
    }
    Ok(ClockSetting::FixedStep(step))
}

impl PreviewConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(input)?;
        let config = Self {
            window: WindowConfig {
                width: raw.window.width,
                height: raw.window.height,
                title: raw.window.title,
            },
            render: RenderConfig {
                fps: raw.render.fps.filter(|fps| *fps > 0.0),
                power: raw
                    .render
                    .power
                    .as_deref()
                    .map(parse_power)
                    .transpose()?
                    .unwrap_or_default(),
            },
            scene: SceneConfig {
                rotation_step: raw.scene.rotation_step,
                fov_degrees: raw.scene.fov_degrees,
                camera_distance: raw.scene.camera_distance,
                clear_color: raw.scene.clear_color,
                clock: raw
                    .scene
                    .clock
                    .as_deref()
                    .map(parse_clock)
                    .transpose()?
                    .unwrap_or_default(),
            },
        };
        if let Some(fps) = raw.render.fps {
            if fps < 0.0 || !fps.is_finite() {
                return Err(ConfigError::Invalid("render.fps must be >= 0".into()));
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if !self.scene.rotation_step.is_finite() {
            return Err(ConfigError::Invalid(
                "scene.rotation_step must be a finite number".into(),
            ));
        }

        if !(self.scene.fov_degrees > 0.0 && self.scene.fov_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "scene.fov_degrees must be between 0 and 180, got {}",
                self.scene.fov_degrees
            )));
        }

        if !(self.scene.camera_distance.is_finite() && self.scene.camera_distance > 0.0) {
            return Err(ConfigError::Invalid(
                "scene.camera_distance must be greater than zero".into(),
            ));
        }

        if self
            .scene
            .clear_color
            .iter()
            .any(|channel| !(0.0..=1.0).contains(channel))
        {
            return Err(ConfigError::Invalid(
                "scene.clear_color channels must be within 0.0..=1.0".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[window]
width = 1280
height = 720
title = "torus lab"

[render]
fps = 30
power = "high"

[scene]
rotation_step = 0.02
clear_color = [0.1, 0.1, 0.1, 1.0]
clock = "16ms"
"#;

    #[test]
    fn parses_sample_config() {
        let config = PreviewConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.title, "torus lab");
        assert_eq!(config.render.fps, Some(30.0));
        assert_eq!(config.render.power, PowerSetting::High);
        assert_eq!(config.scene.rotation_step, 0.02);
        assert_eq!(config.scene.fov_degrees, 75.0);
        assert_eq!(
            config.scene.clock,
            ClockSetting::FixedStep(Duration::from_millis(16))
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = PreviewConfig::from_toml_str("").unwrap();
        assert_eq!(config, PreviewConfig::default());
    }

    #[test]
    fn zero_fps_means_uncapped() {
        let config = PreviewConfig::from_toml_str("[render]\nfps = 0\n").unwrap();
        assert_eq!(config.render.fps, None);
    }

    #[test]
    fn rejects_unknown_power() {
        let err = PreviewConfig::from_toml_str("[render]\npower = \"turbo\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_clock() {
        let err = PreviewConfig::from_toml_str("[scene]\nclock = \"whenever\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = PreviewConfig::from_toml_str("[scene]\nclock = \"0s\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = PreviewConfig::from_toml_str("[window]\nwidth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = PreviewConfig::from_toml_str("[scene]\nfov_degrees = 190.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = PreviewConfig::from_toml_str("[window\nwidth = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = PreviewConfig::from_toml_str("[window]\ndepth = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

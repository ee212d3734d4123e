use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use sceneconfig::{ClockSetting, PowerSetting, PreviewConfig, SceneConfig};
use shaderscene::{
    ClockMode, GpuPowerPreference, HeadlessDevice, PipelineError, RenderDevice, RuntimeConfig,
    RuntimeError, SceneLifecycleController, SceneOptions, SceneRuntime, ShaderSubmission,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{CheckArgs, PreviewArgs};
use crate::response::parse_submission;

const DEFAULT_FILTER: &str = "warn,shadergen=info,shaderscene=info,naga=error,wgpu=error";
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

pub fn initialise_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn load_config(path: Option<&Path>) -> Result<PreviewConfig> {
    let Some(path) = path else {
        return Ok(PreviewConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = PreviewConfig::from_toml_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded preview config");
    Ok(config)
}

/// Compiles a submission against a [`HeadlessDevice`].
///
/// Exit code 1 means the shaders were rejected, 2 means the file could not be
/// read or decoded.
pub fn check(config: &PreviewConfig, args: &CheckArgs) -> Result<ExitCode> {
    let submission = match load_submission(&args.file) {
        Ok(submission) => submission,
        Err(err) => {
            eprintln!("error: {err:#}");
            return Ok(ExitCode::from(2));
        }
    };

    let device = HeadlessDevice::new(config.window.width, config.window.height);
    let mut controller = SceneLifecycleController::new(device, scene_options(&config.scene));
    match controller.submit(&submission) {
        Ok(()) => {
            println!(
                "ok shape={} programs={} meshes={}",
                submission.shape,
                controller.device().live_programs(),
                controller.device().live_meshes()
            );
            controller
                .teardown()
                .context("failed to release checked scene")?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::from(1))
        }
    }
}

/// Opens the preview window and keeps it alive until the user closes it.
pub fn preview(config: &PreviewConfig, args: PreviewArgs) -> Result<()> {
    let mut runtime_config = runtime_config(config);
    if let Some(fps) = args.fps {
        runtime_config.target_fps = (fps > 0.0).then_some(fps);
    }
    if let Some(size) = args.size {
        runtime_config.surface_size = size;
    }

    let submission = load_submission(&args.file)?;
    let runtime = SceneRuntime::spawn(runtime_config).context("failed to open preview window")?;

    let mut last_modified = modified_time(&args.file);
    if let Err(err) = submit(&runtime, submission) {
        if !args.watch {
            runtime.shutdown()?;
            return Err(err).context("initial submission failed");
        }
        tracing::error!(error = %err, "initial submission failed; waiting for changes");
    }

    while runtime.is_running() {
        thread::sleep(WATCH_INTERVAL);
        if !args.watch {
            continue;
        }

        let modified = modified_time(&args.file);
        if modified.is_none() || modified == last_modified {
            continue;
        }
        last_modified = modified;

        match load_submission(&args.file) {
            Ok(submission) => match submit(&runtime, submission) {
                Ok(()) => {}
                Err(RuntimeError::Closed) => break,
                Err(err) => tracing::error!(error = %err, "resubmission failed"),
            },
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "skipping unreadable update"),
        }
    }

    runtime.shutdown()
}

fn submit(runtime: &SceneRuntime, submission: ShaderSubmission) -> Result<(), RuntimeError> {
    let shape = submission.shape;
    match runtime.submit(submission.clone()) {
        Err(RuntimeError::Pipeline(PipelineError::ResetRequired)) => {
            tracing::warn!("previous scene failed to tear down; resetting device resources");
            runtime.reset()?;
            runtime.submit(submission)?;
        }
        other => other?,
    }
    tracing::info!(%shape, "scene rebuilt");
    Ok(())
}

fn load_submission(path: &Path) -> Result<ShaderSubmission> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_submission(&text).with_context(|| format!("failed to decode {}", path.display()))
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn scene_options(scene: &SceneConfig) -> SceneOptions {
    SceneOptions {
        rotation_step: scene.rotation_step,
        fov_degrees: scene.fov_degrees,
        camera_distance: scene.camera_distance,
        clear_color: scene.clear_color,
        clock: match scene.clock {
            ClockSetting::System => ClockMode::System,
            ClockSetting::FixedStep(step) => ClockMode::FixedStep(step),
        },
    }
}

fn runtime_config(config: &PreviewConfig) -> RuntimeConfig {
    RuntimeConfig {
        surface_size: (config.window.width, config.window.height),
        title: config.window.title.clone(),
        power: match config.render.power {
            PowerSetting::Low => GpuPowerPreference::Low,
            PowerSetting::High => GpuPowerPreference::High,
        },
        target_fps: config.render.fps,
        options: scene_options(&config.scene),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_default_scene_options() {
        let config = PreviewConfig::default();
        assert_eq!(scene_options(&config.scene), SceneOptions::default());
        let runtime = runtime_config(&config);
        assert_eq!(runtime.surface_size, (400, 400));
        assert_eq!(runtime.target_fps, None);
        assert_eq!(runtime.power, GpuPowerPreference::Low);
    }

    #[test]
    fn maps_fixed_step_clock_and_power() {
        let config = PreviewConfig::from_toml_str(
            "[render]\nfps = 30\npower = \"high\"\n[scene]\nclock = \"20ms\"\n",
        )
        .unwrap();
        let runtime = runtime_config(&config);
        assert_eq!(runtime.power, GpuPowerPreference::High);
        assert_eq!(runtime.target_fps, Some(30.0));
        assert_eq!(
            runtime.options.clock,
            ClockMode::FixedStep(Duration::from_millis(20))
        );
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/shadergen.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}

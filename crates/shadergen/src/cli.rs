use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "shadergen",
    author,
    version,
    about = "Compile and preview generated background/object shader pairs"
)]
pub struct Cli {
    /// TOML file with window, render, and scene settings.
    #[arg(long, global = true, value_name = "FILE", env = "SHADERGEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a submission without opening a window and report diagnostics.
    Check(CheckArgs),
    /// Render a submission in a desktop window.
    Preview(PreviewArgs),
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Submission JSON (either a scene submission or a generator response).
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Parser, Debug)]
pub struct PreviewArgs {
    /// Submission JSON (either a scene submission or a generator response).
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Rebuild the scene whenever the file changes on disk.
    #[arg(long)]
    pub watch: bool,

    /// Frame-rate cap; 0 renders on every display refresh.
    #[arg(long, value_name = "FPS", value_parser = parse_fps)]
    pub fps: Option<f32>,

    /// Window size in physical pixels.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_dimensions)]
    pub size: Option<(u32, u32)>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_fps(value: &str) -> Result<f32, String> {
    let fps: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame rate '{value}'"))?;
    if !fps.is_finite() || fps < 0.0 {
        return Err(format!("frame rate must be >= 0, got {fps}"));
    }
    Ok(fps)
}

fn parse_dimensions(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{trimmed}'"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in '{trimmed}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in '{trimmed}'"))?;
    if width == 0 || height == 0 {
        return Err("window dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dimensions() {
        assert_eq!(parse_dimensions("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_dimensions(" 640X480 ").unwrap(), (640, 480));
        assert!(parse_dimensions("1280").is_err());
        assert!(parse_dimensions("0x720").is_err());
        assert!(parse_dimensions("widexhigh").is_err());
    }

    #[test]
    fn parses_fps() {
        assert_eq!(parse_fps("30").unwrap(), 30.0);
        assert_eq!(parse_fps("0").unwrap(), 0.0);
        assert!(parse_fps("-1").is_err());
        assert!(parse_fps("fast").is_err());
    }

    #[test]
    fn preview_flags_parse() {
        let cli = Cli::try_parse_from([
            "shadergen",
            "preview",
            "scene.json",
            "--watch",
            "--fps",
            "24",
            "--size",
            "800x600",
        ])
        .unwrap();
        match cli.command {
            Command::Preview(args) => {
                assert!(args.watch);
                assert_eq!(args.fps, Some(24.0));
                assert_eq!(args.size, Some((800, 600)));
                assert_eq!(args.file, PathBuf::from("scene.json"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}

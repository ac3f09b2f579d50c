use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::error;
use wgsl_video_filter::config::{FilterConfig, parse_section};

/// Re-encode a video with a WGSL fragment shader applied to every frame.
#[derive(Parser, Debug)]
#[command(name = "wvf")]
#[command(about = "🎬 Apply a WGSL fragment-shader filter to a video")]
#[command(
    long_about = "Decode a video, run every frame through a user-supplied WGSL fragment shader \
on the GPU, and re-encode the result. Non-video streams are copied through unchanged."
)]
struct Args {
    /// Input video file
    input: PathBuf,

    /// WGSL fragment shader file (must define fs_main)
    shader: PathBuf,

    /// Output video file; the container format follows the extension
    output: PathBuf,

    /// Output width; 0 or omitted derives it from the source
    new_width: Option<u32>,

    /// Output height; 0 or omitted derives it from the source
    new_height: Option<u32>,

    /// Include only this source range (microseconds, half-open; repeatable)
    #[arg(long = "section", value_name = "START:END")]
    sections: Vec<String>,

    /// Run decoder, converter, and encoder on their own threads
    #[arg(long)]
    threaded: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if !args.input.exists() {
        eprintln!("video file {} does not exist", args.input.display());
        return ExitCode::from(1);
    }
    if !args.shader.exists() {
        eprintln!("fragment shader file {} does not exist", args.shader.display());
        return ExitCode::from(1);
    }

    // The working directory moves to the executable's directory below, so
    // pin the user's paths first.
    let input = absolutize(&args.input);
    let shader = absolutize(&args.shader);
    let output = absolutize(&args.output);
    setup_environment();

    let mut sections = Vec::new();
    for text in &args.sections {
        match parse_section(text) {
            Ok(section) => sections.push(section),
            Err(message) => {
                eprintln!("{message}");
                return ExitCode::from(1);
            }
        }
    }

    let config = FilterConfig::new(
        input,
        shader,
        output,
        args.new_width.filter(|w| *w > 0),
        args.new_height.filter(|h| *h > 0),
        sections,
        args.threaded,
    );
    if let Err(message) = config.validate() {
        eprintln!("{message}");
        return ExitCode::from(1);
    }

    match wgsl_video_filter::filter_video(config.to_filter_options()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}: {e}", e.category());
            ExitCode::from(e.exit_code().clamp(0, 255) as u8)
        }
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Matches the runtime environment the pipeline expects: run from the
/// executable's directory, and a UTF-8 code page on Windows consoles so
/// shader diagnostics print intact.
fn setup_environment() {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let _ = std::env::set_current_dir(dir);
        }
    }

    #[cfg(windows)]
    {
        let _ = std::process::Command::new("cmd")
            .args(["/C", "chcp", "65001"])
            .status();
    }
}

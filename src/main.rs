//! wavetrace CLI - render the demo scene with the CPU backend.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use wavetrace::backend::cpu::CpuBackend;
use wavetrace::backend::RayTracingBackend;
use wavetrace::scene::cornell::{cornell_box, CornellOptions};
use wavetrace::{logging, WaveFrontRenderer, WaveFrontSettings};

struct RenderArgs {
    width: Option<u32>,
    height: Option<u32>,
    frames: u32,
    depth: Option<u32>,
    output: PathBuf,
    settings: Option<PathBuf>,
    fog: Option<f32>,
    blend: bool,
}

impl Default for RenderArgs {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            frames: 16,
            depth: None,
            output: PathBuf::from("wavetrace.png"),
            settings: None,
            fog: None,
            blend: true,
        }
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut verbosity = 0u8;
    let mut quiet = false;
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => verbosity = verbosity.max(2),
            "-vv" | "--trace" => verbosity = 3,
            "-q" | "--quiet" => quiet = true,
            _ => filtered_args.push(arg),
        }
    }
    let _guard = logging::init(logging::level_for(verbosity.max(1), quiet));

    if filtered_args.is_empty() {
        print_usage(&args[0]);
        return Ok(());
    }

    match filtered_args[0] {
        "render" | "r" => cmd_render(parse_render_args(&filtered_args[1..])?),
        "settings" | "s" => cmd_settings(),
        "help" | "h" | "-h" | "--help" => {
            print_usage(&args[0]);
            Ok(())
        }
        other => {
            print_usage(&args[0]);
            bail!("unknown command: {other}")
        }
    }
}

fn print_usage(prog: &str) {
    println!(
        "wavetrace {} (built {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("WAVETRACE_BUILD_DATE"),
        env!("WAVETRACE_BUILD_TIME")
    );
    println!();
    println!("Usage: {} [options] <command> [args]", prog);
    println!();
    println!("Commands:");
    println!("  r, render    Render the Cornell box and write a PNG");
    println!("  s, settings  Print the effective settings as JSON");
    println!("  h, help      Show this help");
    println!();
    println!("Render arguments:");
    println!("  --width N --height N   Render and output resolution");
    println!("  --frames N             Frames to accumulate (default 16)");
    println!("  --depth N              Maximum path depth");
    println!("  --fog DENSITY          Fill the box with a homogeneous medium");
    println!("  --no-blend             Keep only the last frame");
    println!("  --settings FILE        Load settings JSON");
    println!("  --output FILE          PNG path (default wavetrace.png)");
    println!();
    println!("Options:");
    println!("  -v, --verbose  Debug output");
    println!("  -vv, --trace   Trace output (very verbose)");
    println!("  -q, --quiet    Suppress output");
    println!();
    println!("Set WAVETRACE_TRACE=1 to record a Chrome trace to trace.json.");
}

fn parse_render_args(args: &[&str]) -> Result<RenderArgs> {
    let mut out = RenderArgs::default();
    let mut it = args.iter();
    while let Some(&arg) = it.next() {
        let mut value = || {
            it.next()
                .copied()
                .with_context(|| format!("{arg} expects a value"))
        };
        match arg {
            "--width" => out.width = Some(value()?.parse().context("--width")?),
            "--height" => out.height = Some(value()?.parse().context("--height")?),
            "--frames" => out.frames = value()?.parse().context("--frames")?,
            "--depth" => out.depth = Some(value()?.parse().context("--depth")?),
            "--fog" => out.fog = Some(value()?.parse().context("--fog")?),
            "--output" | "-o" => out.output = PathBuf::from(value()?),
            "--settings" => out.settings = Some(PathBuf::from(value()?)),
            "--no-blend" => out.blend = false,
            other => bail!("unknown render argument: {other}"),
        }
    }
    if out.frames == 0 {
        bail!("--frames must be at least 1");
    }
    Ok(out)
}

fn load_settings(path: Option<&PathBuf>) -> Result<WaveFrontSettings> {
    match path {
        Some(path) => WaveFrontSettings::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(WaveFrontSettings::load()),
    }
}

fn cmd_settings() -> Result<()> {
    let settings = WaveFrontSettings::load();
    if let Some(path) = WaveFrontSettings::default_path() {
        println!("# {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn cmd_render(args: RenderArgs) -> Result<()> {
    let mut settings = load_settings(args.settings.as_ref())?;
    if let Some(w) = args.width {
        settings.render_resolution[0] = w;
        settings.output_resolution[0] = w;
    }
    if let Some(h) = args.height {
        settings.render_resolution[1] = h;
        settings.output_resolution[1] = h;
    }
    if let Some(depth) = args.depth {
        settings.max_depth = depth;
    }
    settings.blend_output = args.blend;
    settings.validate().context("invalid settings")?;

    let backend: Arc<dyn RayTracingBackend> = Arc::new(CpuBackend::new());
    let mut renderer = WaveFrontRenderer::new(Arc::clone(&backend), settings)?;
    let scene = cornell_box(
        &renderer.resources(),
        CornellOptions {
            fog_density: args.fog,
        },
    )?;
    renderer.set_scene(scene);

    let start = Instant::now();
    renderer.start_rendering()?;

    // This thread owns the presentation side: drain deferred work, collect frames.
    let mut last_seen = 0;
    let mut presented = 0;
    while presented < args.frames {
        renderer.perform_deferred_operations();
        if let Some(frame) = renderer.wait_for_frame(last_seen, Duration::from_millis(10)) {
            presented += (frame.frame_id - last_seen) as u32;
            last_seen = frame.frame_id;
        }
        if start.elapsed() > Duration::from_secs(600) {
            bail!("gave up after {presented} frames");
        }
    }
    renderer.stop_rendering()?;
    let elapsed = start.elapsed();

    let frame = renderer.output_pixels();
    image::save_buffer(
        &args.output,
        &frame.pixels,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
    )
    .with_context(|| format!("writing {}", args.output.display()))?;

    println!("Wrote {} ({}x{})", args.output.display(), frame.width, frame.height);
    println!(
        "Frames: {} in {:.2}s ({:.1} ms/frame)",
        last_seen,
        elapsed.as_secs_f64(),
        elapsed.as_secs_f64() * 1000.0 / last_seen.max(1) as f64
    );
    if let Some(report) = renderer.last_frame_report() {
        println!(
            "Last frame: {} depth passes, {} rays, {} shadow rays, {} lights",
            report.depth_passes, report.rays_traced, report.shadow_rays, report.light_count
        );
    }
    let stats = renderer.last_frame_stats();
    println!("Stage timings (frame {}):", stats.id);
    for (stage, duration) in &stats.timings {
        println!("  {:<16} {:>8.2} ms", stage, duration.as_secs_f64() * 1000.0);
    }
    Ok(())
}

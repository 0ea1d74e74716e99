// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Prism sandbox
// Renders the raytraced triangle headlessly and optionally saves the last frame.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use prism_core::renderer::api::RaytracingSettings;
use prism_infra::SoftwareBackend;
use prism_lanes::RaytracingRenderer;

#[derive(Parser, Debug)]
#[command(version, about = "Renders the raytraced triangle sample")]
struct Args {
    /// JSON settings file. Missing fields take their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output width, overriding the settings file.
    #[arg(long)]
    width: Option<u32>,

    /// Output height, overriding the settings file.
    #[arg(long)]
    height: Option<u32>,

    /// Number of frames to render.
    #[arg(short, long, default_value_t = 3)]
    frames: u32,

    /// Fence wait timeout in milliseconds, overriding the settings file.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Writes the last presented frame to this PNG file.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn load_settings(args: &Args) -> Result<RaytracingSettings> {
    let mut settings = match &args.config {
        Some(path) => RaytracingSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => RaytracingSettings::default(),
    };
    if let Some(width) = args.width {
        settings.width = width;
    }
    if let Some(height) = args.height {
        settings.height = height;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        settings.fence_timeout_ms = timeout_ms;
    }
    settings.validate()?;
    Ok(settings)
}

fn run(args: &Args) -> Result<()> {
    let settings = load_settings(args)?;
    let backend = Arc::new(SoftwareBackend::new());
    let mut renderer = RaytracingRenderer::new(
        backend.clone(),
        settings,
        SoftwareBackend::hello_triangle_library(),
    );
    renderer
        .initialize()
        .context("initializing the raytracing renderer")?;

    let start = Instant::now();
    for _ in 0..args.frames {
        renderer.render_frame()?;
        let stats = renderer.last_stats();
        log::debug!(
            "Frame {}: fence {}, back buffer {}, wait {:.2} ms, record {:.2} ms, submit {:.2} ms",
            stats.frame_number,
            stats.fence_value,
            stats.back_buffer_index,
            stats.cpu_wait_time_ms,
            stats.cpu_record_time_ms,
            stats.cpu_submit_time_ms
        );
    }
    renderer.wait_for_gpu()?;
    let elapsed = start.elapsed();
    log::info!(
        "Rendered {} frames in {:.2} ms ({} rays per frame)",
        args.frames,
        elapsed.as_secs_f64() * 1000.0,
        renderer.last_stats().rays_dispatched
    );

    if let Some(path) = &args.output {
        let Some(frame) = backend.present_monitor().and_then(|m| m.last_frame()) else {
            bail!("no frame was presented");
        };
        let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.pixels)
            .context("presented frame has an unexpected size")?;
        image
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        log::info!("Saved frame {} to {}", frame.present_count, path.display());
    }

    renderer.shutdown()?;
    Ok(())
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    run(&args)
}

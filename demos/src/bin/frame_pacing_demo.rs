//! # Frame Pacing Demo
//!
//! Headless run of the Lantern frame loop over the dummy backend.
//!
//! Each frame renders a scene pass into an offscreen color target and a
//! compose pass into the backbuffer. Window resizes and stale swapchains
//! are scripted so the recreation path runs too.
//!
//! ```bash
//! # Triple buffering with a GPU that finishes work only when waited on
//! frame_pacing_demo --frames-in-flight 3 --timeline deferred
//!
//! # Simulated GPU thread, resize every 40 frames
//! frame_pacing_demo --timeline manual --resize-every 40 --frames 200
//! ```

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use lantern_graphics::backend::{DummyBackend, DummyRecorder, GpuTimeline, ScriptedResult};
use lantern_graphics::frame_loop::SwapchainImage;
use lantern_graphics::types::{Extent2d, ImageHandle, ImageViewHandle, TextureFormat};
use lantern_graphics::{
    FrameConfig, FrameLoop, FrameOutcome, FrameTarget, GraphicsError, RenderGraph,
    SurfaceRecreator, SwapchainInfo,
};

/// Simulated GPU behavior for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliTimeline {
    /// Work completes at submit; the CPU never waits.
    #[default]
    Immediate,
    /// Work completes only when the CPU waits on it.
    Deferred,
    /// A background thread completes one submission per tick.
    Manual,
}

impl From<CliTimeline> for GpuTimeline {
    fn from(cli: CliTimeline) -> Self {
        match cli {
            CliTimeline::Immediate => GpuTimeline::Immediate,
            CliTimeline::Deferred => GpuTimeline::Deferred,
            CliTimeline::Manual => GpuTimeline::Manual,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "frame_pacing_demo", version, about = "Headless Lantern frame loop")]
struct Args {
    /// Number of frames to run.
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Frames the CPU may record ahead of the GPU.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    frames_in_flight: u32,

    /// Swapchain image count.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    image_count: u32,

    /// Simulated GPU timeline.
    #[arg(long, value_enum, default_value_t = CliTimeline::Immediate)]
    timeline: CliTimeline,

    /// GPU tick for the manual timeline, in milliseconds.
    #[arg(long, default_value_t = 2)]
    gpu_tick_ms: u64,

    /// Send a window resize every N frames (0 disables).
    #[arg(long, default_value_t = 50)]
    resize_every: u64,

    /// Report the swapchain out of date on acquire every N frames (0 disables).
    #[arg(long, default_value_t = 75)]
    out_of_date_every: u64,

    /// Initial surface width.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Initial surface height.
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Fence wait timeout in milliseconds (0 waits forever).
    #[arg(long, default_value_t = 1000)]
    fence_timeout_ms: u64,
}

const SWAPCHAIN_FORMAT: TextureFormat = TextureFormat::Bgra8UnormSrgb;
const SCENE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Stands in for the window system: hands out fresh raw handles on every
/// recreation and keeps the offscreen scene target sized to the swapchain.
struct HeadlessSurface {
    backend: Arc<DummyBackend>,
    image_count: u32,
    next_handle: u64,
    scene_color: SwapchainImage,
    scene_extent: Extent2d,
}

impl HeadlessSurface {
    fn new(backend: Arc<DummyBackend>, image_count: u32, extent: Extent2d) -> Self {
        let mut surface = Self {
            backend,
            image_count,
            next_handle: 1,
            scene_color: SwapchainImage {
                image: ImageHandle::NULL,
                view: ImageViewHandle::NULL,
            },
            scene_extent: extent,
        };
        surface.scene_color = surface.allocate();
        surface
    }

    fn allocate(&mut self) -> SwapchainImage {
        let raw = self.next_handle;
        self.next_handle += 2;
        SwapchainImage {
            image: ImageHandle::from_raw(raw),
            view: ImageViewHandle::from_raw(raw + 1),
        }
    }

    fn swapchain(&mut self, extent: Extent2d) -> SwapchainInfo {
        SwapchainInfo {
            extent,
            format: SWAPCHAIN_FORMAT,
            images: (0..self.image_count).map(|_| self.allocate()).collect(),
        }
    }
}

impl SurfaceRecreator for HeadlessSurface {
    fn recreate_swapchain(&mut self, extent: Extent2d) -> Result<SwapchainInfo, GraphicsError> {
        self.backend.set_image_count(self.image_count);
        Ok(self.swapchain(extent))
    }

    fn recreate_dependent_images(
        &mut self,
        info: &SwapchainInfo,
        format_changed: bool,
    ) -> Result<(), GraphicsError> {
        if info.extent != self.scene_extent || format_changed {
            self.scene_color = self.allocate();
            self.scene_extent = info.extent;
            log::debug!(
                "Scene color reallocated at {}x{}",
                info.extent.width,
                info.extent.height
            );
        }
        Ok(())
    }
}

/// Scene pass into the offscreen target, then compose into the backbuffer.
fn populate(
    graph: &mut RenderGraph<'static>,
    target: &FrameTarget,
    scene_color: SwapchainImage,
    scene_extent: Extent2d,
) {
    graph.import_texture(
        "SceneColor",
        scene_color.image,
        scene_color.view,
        scene_extent,
        SCENE_FORMAT,
    );
    graph.import_backbuffer(
        "BackBuffer",
        target.image,
        target.view,
        target.extent,
        target.format,
    );

    let frame = target.frame_number;
    graph.add_pass(
        "scene",
        |pass| {
            pass.writes("SceneColor");
        },
        move |ctx| {
            if let Some(recorder) = ctx.recorder_as::<DummyRecorder>() {
                recorder.mark(format!("scene #{frame}"));
            }
        },
    );
    graph.add_pass(
        "compose",
        |pass| {
            pass.reads("SceneColor").writes("BackBuffer");
        },
        |_| {},
    );
}

/// Alternate between two sizes so every scripted resize changes the extent.
fn resized(extent: Extent2d, base: Extent2d) -> Extent2d {
    if extent == base {
        Extent2d::new(base.width * 3 / 4, base.height * 3 / 4)
    } else {
        base
    }
}

/// Per-run counters reported at exit.
#[derive(Debug, Default)]
struct Totals {
    presented: u64,
    abandoned: u64,
    barriers: usize,
}

fn drive(
    args: &Args,
    backend: &DummyBackend,
    frame_loop: &mut FrameLoop,
    graph: &mut RenderGraph<'static>,
    surface: &mut HeadlessSurface,
) -> Result<Totals, GraphicsError> {
    let base = Extent2d::new(args.width, args.height);
    let mut totals = Totals::default();

    for frame in 1..=args.frames {
        if args.resize_every > 0 && frame % args.resize_every == 0 {
            let next = resized(frame_loop.swapchain().extent, base);
            log::info!("Frame {}: window resized to {}x{}", frame, next.width, next.height);
            frame_loop.on_resize_event(next.width, next.height);
        }
        if args.out_of_date_every > 0 && frame % args.out_of_date_every == 0 {
            log::info!("Frame {}: swapchain reported out of date", frame);
            backend.script_acquire(ScriptedResult::OutOfDate);
        }

        let scene_color = surface.scene_color;
        let scene_extent = surface.scene_extent;
        let outcome = frame_loop.run_frame(graph, surface, |graph, target| {
            populate(graph, target, scene_color, scene_extent)
        })?;

        match outcome {
            FrameOutcome::Presented(report) => {
                totals.presented += 1;
                totals.barriers += report.graph.barriers_emitted;
                log::trace!(
                    "Frame {}: {} image {} blocked={} {:?}",
                    frame,
                    report.slot,
                    report.image_index,
                    report.slot_wait_blocked,
                    report.present
                );
            }
            FrameOutcome::Recreated => {
                totals.abandoned += 1;
                log::debug!("Frame {} abandoned; swapchain recreated", frame);
            }
        }
    }

    frame_loop.shutdown()?;
    Ok(totals)
}

fn run(args: &Args) -> Result<(), GraphicsError> {
    let base = Extent2d::new(args.width, args.height);
    let backend = Arc::new(DummyBackend::with_timeline(args.timeline.into()));
    backend.set_image_count(args.image_count);

    let config = FrameConfig::default()
        .with_frames_in_flight(args.frames_in_flight as usize)
        .with_resize_debounce(Duration::ZERO)
        .with_fence_timeout(
            (args.fence_timeout_ms > 0).then(|| Duration::from_millis(args.fence_timeout_ms)),
        );

    let mut surface = HeadlessSurface::new(backend.clone(), args.image_count, base);
    let swapchain = surface.swapchain(base);
    let mut frame_loop = FrameLoop::new(backend.clone(), swapchain, config.clone())?;
    let mut graph = RenderGraph::from_config(&config);

    // The manual timeline needs someone to play the GPU
    let stop = Arc::new(AtomicBool::new(false));
    let gpu_thread = (args.timeline == CliTimeline::Manual).then(|| {
        let backend = backend.clone();
        let stop = stop.clone();
        let tick = Duration::from_millis(args.gpu_tick_ms);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                thread::sleep(tick);
                backend.complete_next();
            }
            backend.complete_all();
        })
    });

    let start = Instant::now();
    let result = drive(args, &backend, &mut frame_loop, &mut graph, &mut surface);

    stop.store(true, Ordering::Release);
    if let Some(handle) = gpu_thread
        && handle.join().is_err()
    {
        log::error!("GPU thread panicked");
    }
    let totals = result?;

    let stats = frame_loop.stats();
    let elapsed = start.elapsed();
    log::info!(
        "{} frames presented, {} abandoned in {:.2?} ({:.1} fps)",
        totals.presented,
        totals.abandoned,
        elapsed,
        totals.presented as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    log::info!(
        "Waits: {} slot, {} image; {} stale swapchain events, {} recreations",
        stats.slot_waits_blocked,
        stats.image_waits_blocked,
        stats.stale_swapchain_events,
        frame_loop.recreations()
    );
    log::info!("{} barriers recorded", totals.barriers);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    lantern_graphics::init();

    let args = Args::parse();
    log::info!("{:?}", args);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Frame loop failed: {}", e);
            let mut source = e.source();
            while let Some(cause) = source {
                log::error!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_counts_rejected() {
        for flag in ["--frames-in-flight", "--image-count"] {
            let result = Args::try_parse_from(["frame_pacing_demo", flag, "0"]);
            assert!(result.is_err(), "{flag} 0 was accepted");
        }
    }

    #[test]
    fn test_short_run_presents_every_frame() {
        let args = Args::try_parse_from([
            "frame_pacing_demo",
            "--frames",
            "10",
            "--frames-in-flight",
            "1",
            "--image-count",
            "2",
            "--resize-every",
            "0",
            "--out-of-date-every",
            "0",
        ])
        .unwrap();
        assert_eq!(args.frames_in_flight, 1);
        assert!(run(&args).is_ok());
    }
}

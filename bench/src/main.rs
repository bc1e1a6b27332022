use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Context as _;
use clap::Parser;
use overpaint::{
    Block, Compositor, CompositorOpts, FrameInputs, InvalidationKind, PixmapSurface, Rect,
    Rgba8Premul, SceneTree, Viewport, VisualId,
};
use serde_json::json;

/// Synthetic editor-like frame loop for the compositor.
#[derive(Parser, Debug)]
#[command(name = "overpaint-bench")]
struct BenchArgs {
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Number of document lines in the scene.
    #[arg(long, default_value_t = 400)]
    lines: usize,
    #[arg(long, default_value_t = 600)]
    frames: u64,
    /// Lines recolored per frame.
    #[arg(long, default_value_t = 2)]
    edits_per_frame: usize,
    /// Move one line every N frames (0 disables).
    #[arg(long, default_value_t = 30)]
    move_every: u64,
    /// Toggle the caret every N frames (0 disables).
    #[arg(long, default_value_t = 15)]
    blink_every: u64,
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
    /// Compositor options JSON file; flags below override it.
    #[arg(long)]
    opts: Option<PathBuf>,
    #[arg(long)]
    no_cache: bool,
    #[arg(long)]
    no_dirty_regions: bool,
    #[arg(long)]
    always_draw: bool,
    /// Write the last frame as PNG.
    #[arg(long)]
    png: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
}

struct EditorScene {
    tree: SceneTree<Block>,
    lines: Vec<VisualId>,
    caret: VisualId,
    line_height: f64,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let args = BenchArgs::parse();
    if args.width == 0 || args.height == 0 {
        anyhow::bail!("--width/--height must be > 0");
    }
    if args.lines == 0 {
        anyhow::bail!("--lines must be >= 1");
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    let mut opts = match &args.opts {
        Some(path) => {
            let s = std::fs::read_to_string(path)
                .with_context(|| format!("read opts '{}'", path.display()))?;
            CompositorOpts::from_json_str(&s)
                .with_context(|| format!("parse opts '{}'", path.display()))?
        }
        None => CompositorOpts::default(),
    };
    if args.no_cache {
        opts = opts.with_caching(false);
    }
    if args.no_dirty_regions {
        opts = opts.with_dirty_region_drawing(false);
    }
    if args.always_draw {
        opts = opts.with_always_draw(true);
    }
    let opts = opts.apply_env_overrides();

    let viewport = Viewport::new(args.width, args.height);
    let mut scene = build_scene(&args)?;
    let mut compositor = Compositor::new(opts.clone(), viewport)?;
    let mut target = PixmapSurface::new(args.width, args.height)?;
    let mut rng = args.seed;

    eprintln!(
        "bench: {frames} frames, {lines} lines, {w}x{h}, caching={cache}, dirty_regions={dirty}, always_draw={always} ({profile} build)",
        frames = args.frames,
        lines = args.lines,
        w = args.width,
        h = args.height,
        cache = opts.enable_caching,
        dirty = opts.enable_dirty_region_drawing,
        always = opts.always_draw,
        profile = if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    );

    let mut draw_times = Vec::<Duration>::with_capacity(args.frames as usize);
    let wall = Instant::now();
    for frame in 0..args.frames {
        mutate(&mut scene, &args, frame, &mut rng)?;
        let events = scene.tree.drain_events();
        compositor.handle_events(&mut scene.tree, events);

        let inputs = FrameInputs {
            caret_blink_active: args.blink_every > 0,
            ..FrameInputs::idle(viewport)
        };
        if compositor.should_draw(&inputs) {
            let t = Instant::now();
            compositor.draw(&scene.tree, &mut target)?;
            draw_times.push(t.elapsed());
        }
    }
    let wall = wall.elapsed();

    if let Some(path) = &args.png {
        let mut straight = target.data().to_vec();
        unpremultiply_in_place(&mut straight);
        let img = image::RgbaImage::from_raw(args.width, args.height, straight)
            .ok_or_else(|| anyhow::anyhow!("pixmap size does not match {}x{}", args.width, args.height))?;
        img.save(path)
            .with_context(|| format!("write png '{}'", path.display()))?;
    }

    draw_times.sort();
    let summary = json!({
        "frames": args.frames,
        "lines": args.lines,
        "wall_ms": ms(wall),
        "draw_ms": {
            "p50": ms(percentile(&draw_times, 0.50)),
            "p90": ms(percentile(&draw_times, 0.90)),
            "p99": ms(percentile(&draw_times, 0.99)),
            "total": ms(draw_times.iter().sum()),
        },
        "opts": opts,
        "metrics": compositor.metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn build_scene(args: &BenchArgs) -> anyhow::Result<EditorScene> {
    let w = f64::from(args.width);
    let h = f64::from(args.height);
    let mut tree = SceneTree::new();
    let root = tree.set_root(Block::new(
        Rect::new(0.0, 0.0, w, h),
        Rgba8Premul::opaque(250, 250, 250),
    ))?;

    let toolbar = tree.insert(
        root,
        Block::new(Rect::new(0.0, 0.0, w, 32.0), Rgba8Premul::opaque(230, 230, 235)),
    )?;
    for i in 0..8 {
        let x = 8.0 + f64::from(i) * 36.0;
        tree.insert(
            toolbar,
            Block::new(Rect::new(x, 4.0, x + 28.0, 28.0), Rgba8Premul::opaque(90, 110, 160))
                .with_cost(4),
        )?;
    }

    let sidebar = tree.insert(
        root,
        Block::new(Rect::new(0.0, 32.0, 200.0, h), Rgba8Premul::opaque(40, 44, 52)),
    )?;
    for i in 0..24 {
        let y = 40.0 + f64::from(i) * 20.0;
        tree.insert(
            sidebar,
            Block::new(Rect::new(12.0, y, 180.0, y + 14.0), Rgba8Premul::opaque(150, 150, 160)),
        )?;
    }

    let doc_rect = Rect::new(200.0, 32.0, w, h);
    let doc = tree.insert(root, Block::container(doc_rect).with_clip(doc_rect))?;
    let line_height = ((h - 32.0) / args.lines as f64).clamp(1.0, 18.0);
    let mut lines = Vec::with_capacity(args.lines);
    for i in 0..args.lines {
        let y = 32.0 + i as f64 * line_height;
        let len = 120.0 + (mix64(i as u64) % 600) as f64;
        lines.push(tree.insert(
            doc,
            Block::new(
                Rect::new(216.0, y + 2.0, (216.0 + len).min(w), y + line_height - 2.0),
                Rgba8Premul::opaque(30, 30, 30),
            )
            .with_cost(3),
        )?);
    }
    let caret = tree.insert(
        doc,
        Block::new(
            Rect::new(216.0, 34.0, 218.0, 32.0 + line_height),
            Rgba8Premul::opaque(0, 90, 200),
        ),
    )?;
    tree.drain_events();

    Ok(EditorScene {
        tree,
        lines,
        caret,
        line_height,
    })
}

fn mutate(scene: &mut EditorScene, args: &BenchArgs, frame: u64, rng: &mut u64) -> anyhow::Result<()> {
    for _ in 0..args.edits_per_frame {
        let line = scene.lines[(next(rng) % scene.lines.len() as u64) as usize];
        let v = next(rng);
        scene.tree.update(line, InvalidationKind::Render, |b| {
            b.fill = Some(Rgba8Premul::opaque(v as u8 % 96, (v >> 8) as u8 % 96, (v >> 16) as u8 % 96));
        })?;
    }

    if args.move_every > 0 && frame % args.move_every == args.move_every - 1 {
        let line = scene.lines[(next(rng) % scene.lines.len() as u64) as usize];
        let dx = (next(rng) % 40) as f64 - 20.0;
        scene.tree.update(line, InvalidationKind::Arrange, |b| {
            let r = b.rect;
            b.set_rect(Rect::new(
                (r.x0 + dx).max(216.0),
                r.y0,
                (r.x1 + dx).max(240.0),
                r.y1,
            ));
        })?;
    }

    if args.blink_every > 0 && frame % args.blink_every == 0 {
        let row = (next(rng) % scene.lines.len() as u64) as f64;
        let y = 32.0 + row * scene.line_height;
        let line_height = scene.line_height;
        scene.tree.update(scene.caret, InvalidationKind::Arrange, |b| {
            b.visible = !b.visible;
            b.set_rect(Rect::new(216.0, y + 2.0, 218.0, y + line_height));
        })?;
    }
    Ok(())
}

/// PNG stores straight alpha; the pixmap holds premultiplied bytes.
fn unpremultiply_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        if a == 0 {
            px[..3].fill(0);
            continue;
        }
        for c in &mut px[..3] {
            *c = ((u16::from(*c) * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let n = sorted.len();
    let rank = (p * (n as f64)).ceil().clamp(1.0, n as f64) as usize;
    sorted[rank - 1]
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn next(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    mix64(*state)
}

fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

use super::*;
use crate::cache::policy::CachePolicyOpts;
use crate::cache::store::CacheCounters;
use crate::foundation::core::{Affine, Rgba8Premul, VisualId};
use crate::foundation::error::OverpaintError;
use crate::render::pixmap::PixmapSurface;
use crate::render::surface::DrawSurface;
use crate::scene::tree::SceneTree;
use crate::scene::visual::{Block, Visual};
use crate::schedule::scheduler::DrawReasons;

const WHITE: Rgba8Premul = Rgba8Premul::opaque(255, 255, 255);
const RED: Rgba8Premul = Rgba8Premul::opaque(255, 0, 0);
const BLUE: Rgba8Premul = Rgba8Premul::opaque(0, 0, 255);

fn rect(x: f64, y: f64, w: f64, h: f64) -> Rect {
    Rect::new(x, y, x + w, y + h)
}

fn vp() -> Viewport {
    Viewport::new(64, 64)
}

fn no_cache_policy() -> CachePolicyOpts {
    CachePolicyOpts {
        min_subtree_visuals: usize::MAX,
        ..CachePolicyOpts::default()
    }
}

/// Caches from the first frame a subtree is seen.
fn eager() -> CompositorOpts {
    CompositorOpts::default().with_cache_policy(CachePolicyOpts {
        min_stable_frames: 0,
        ..CachePolicyOpts::default()
    })
}

fn compositor(opts: CompositorOpts) -> Compositor<PixmapSurface> {
    Compositor::new(opts, vp()).unwrap()
}

/// One driver tick: feed events, ask, draw if asked.
fn tick<V: Visual>(
    c: &mut Compositor<PixmapSurface>,
    tree: &mut SceneTree<V>,
    target: &mut PixmapSurface,
) -> Option<FrameStats> {
    let events = tree.drain_events();
    c.handle_events(tree, events);
    if !c.should_draw(&FrameInputs::idle(vp())) {
        return None;
    }
    Some(c.draw(&*tree, target).unwrap())
}

struct Scene {
    tree: SceneTree,
    a: VisualId,
    b: VisualId,
}

fn scene() -> Scene {
    let mut tree = SceneTree::new();
    let root = tree
        .set_root(Block::container(rect(0.0, 0.0, 64.0, 64.0)))
        .unwrap();
    let a = tree.insert(root, Block::new(rect(4.0, 4.0, 8.0, 8.0), RED)).unwrap();
    let b = tree
        .insert(root, Block::new(rect(40.0, 40.0, 8.0, 8.0), BLUE))
        .unwrap();
    Scene { tree, a, b }
}

#[test]
fn first_frame_is_full_then_idle_ticks_skip() {
    let mut s = scene();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default().with_cache_policy(no_cache_policy()));

    let stats = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(stats.strategy, DrawStrategy::FullFrame);
    assert!(stats.reasons.contains(DrawReasons::RESIZE));
    assert!(matches!(stats.sync, SyncOutcome::Rebuilt { nodes: 3 }));
    assert_eq!(stats.nodes_painted, 3);
    assert_eq!(target.pixel(5, 5), Some(RED));
    assert_eq!(target.pixel(30, 30), Some(WHITE));

    assert!(tick(&mut c, &mut s.tree, &mut target).is_none());
    assert!(tick(&mut c, &mut s.tree, &mut target).is_none());
    let m = c.metrics();
    assert_eq!(m.draw_executed_frames, 1);
    assert_eq!(m.draw_skipped_frames, 2);
    assert_eq!(target.state_depth(), 0);
    assert!(!target.is_batch_open());
}

#[test]
fn moved_block_repaints_old_and_new_regions() {
    let mut s = scene();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default().with_cache_policy(no_cache_policy()));
    tick(&mut c, &mut s.tree, &mut target).unwrap();

    s.tree
        .update(s.a, InvalidationKind::Arrange, |b| {
            b.set_rect(rect(20.0, 4.0, 8.0, 8.0))
        })
        .unwrap();
    let stats = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(stats.strategy, DrawStrategy::DirtyRegions);
    assert_eq!(stats.region_count, 2);
    assert!(stats.reasons.contains(DrawReasons::LAYOUT_INVALIDATED));
    // Root in both regions, the moved block in its new one; the blue block is culled.
    assert_eq!(stats.nodes_painted, 3);
    assert_eq!(stats.nodes_culled, 3);
    assert_eq!(target.pixel(5, 5), Some(WHITE));
    assert_eq!(target.pixel(21, 5), Some(RED));
    assert_eq!(target.pixel(41, 41), Some(BLUE));
    assert!(!c.dirty().is_dirty());
}

#[test]
fn paint_only_change_prefers_the_dirty_hint() {
    let mut s = scene();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default());
    tick(&mut c, &mut s.tree, &mut target).unwrap();

    let hint = rect(5.0, 5.0, 2.0, 2.0);
    s.tree
        .update(s.a, InvalidationKind::Render, |b| {
            b.fill = Some(BLUE);
            b.set_dirty_hint(hint);
        })
        .unwrap();
    let events = s.tree.drain_events();
    c.handle_events(&mut s.tree, events);
    assert_eq!(c.dirty().regions(), &[hint]);

    s.tree
        .update(s.a, InvalidationKind::Render, |_| ())
        .unwrap();
    let events = s.tree.drain_events();
    c.handle_events(&mut s.tree, events);
    assert_eq!(c.dirty().region_count(), 1);
    assert_eq!(c.dirty().regions()[0], rect(4.0, 4.0, 8.0, 8.0));
}

#[test]
fn unattributed_invalidation_repaints_everything() {
    let mut s = scene();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default());
    tick(&mut c, &mut s.tree, &mut target).unwrap();

    s.tree.invalidate_unattributed(InvalidationKind::Render);
    let stats = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(stats.strategy, DrawStrategy::FullFrame);
    assert_eq!(stats.full_frame_reason, Some(FullFrameReason::Unattributed));
}

#[test]
fn hidden_visuals_damage_once_and_then_stay_quiet() {
    let mut s = scene();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default().with_cache_policy(no_cache_policy()));
    tick(&mut c, &mut s.tree, &mut target).unwrap();

    s.tree
        .update(s.b, InvalidationKind::Render, |b| b.visible = false)
        .unwrap();
    let stats = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(stats.region_count, 1);
    assert!(matches!(stats.sync, SyncOutcome::Rebuilt { nodes: 2 }));
    assert_eq!(target.pixel(41, 41), Some(WHITE));

    s.tree
        .update(s.b, InvalidationKind::Arrange, |b| {
            b.set_rect(rect(0.0, 0.0, 64.0, 64.0))
        })
        .unwrap();
    let events = s.tree.drain_events();
    c.handle_events(&mut s.tree, events);
    assert!(!c.dirty().is_dirty());
}

struct Grouped {
    tree: SceneTree,
    a: VisualId,
    b: VisualId,
    c: VisualId,
    d: VisualId,
}

/// Root, a cacheable panel holding `a` and `b`, and two root-level markers over the panel.
fn grouped() -> Grouped {
    let mut tree = SceneTree::new();
    let root = tree
        .set_root(Block::container(rect(0.0, 0.0, 64.0, 64.0)))
        .unwrap();
    let panel = tree
        .insert(root, Block::container(rect(0.0, 0.0, 48.0, 48.0)))
        .unwrap();
    let a = tree.insert(panel, Block::new(rect(4.0, 4.0, 8.0, 8.0), RED)).unwrap();
    let b = tree
        .insert(panel, Block::new(rect(40.0, 40.0, 8.0, 8.0), BLUE))
        .unwrap();
    let c = tree.insert(root, Block::new(rect(20.0, 2.0, 4.0, 4.0), RED)).unwrap();
    let d = tree.insert(root, Block::new(rect(2.0, 30.0, 4.0, 4.0), RED)).unwrap();
    Grouped { tree, a, b, c, d }
}

#[test]
fn cached_subtree_is_blitted_on_unchanged_frames() {
    let mut s = grouped();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(eager());

    let first = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(first.cache.misses, 1);
    assert_eq!(first.nodes_painted, 3);
    assert_eq!(first.nodes_from_cache, 2);
    assert_eq!(first.nodes_rasterized, 3);
    assert_eq!(target.pixel(5, 5), Some(RED));

    c.request_full_redraw();
    let second = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(second.cache.hits, 1);
    assert_eq!(second.cache.misses, 0);
    assert_eq!(second.nodes_rasterized, 0);
    assert_eq!(target.pixel(41, 41), Some(BLUE));

    s.tree
        .update(s.a, InvalidationKind::Render, |b| b.fill = Some(BLUE))
        .unwrap();
    let third = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(third.cache.rebuilds, 1);
    assert_eq!(third.cache.hits, 0);
    assert_eq!(third.nodes_rasterized, 3);
    assert_eq!(target.pixel(5, 5), Some(BLUE));

    let m = c.metrics();
    assert_eq!((m.cache.hits, m.cache.misses, m.cache.rebuilds), (1, 1, 1));
    assert_eq!(m.nodes_rasterized, 6);
}

#[test]
fn root_is_never_cached() {
    let mut s = scene();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(eager());
    let stats = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(stats.nodes_painted, 3);
    assert_eq!(stats.nodes_rasterized, 0);
    assert!(c.cache().is_empty());
}

#[test]
fn subtrees_edited_every_frame_are_painted_live() {
    let mut s = grouped();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default());

    let first = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(first.nodes_painted, 6);
    assert!(c.cache().is_empty());

    for fill in [BLUE, RED, BLUE] {
        s.tree
            .update(s.a, InvalidationKind::Render, |b| b.fill = Some(fill))
            .unwrap();
        let stats = tick(&mut c, &mut s.tree, &mut target).unwrap();
        assert_eq!(stats.cache, CacheCounters::default());
        assert_eq!(stats.nodes_rasterized, 0);
        assert_eq!(target.pixel(5, 5), Some(fill));
    }

    // One quiet frame later the panel is cached, then reused.
    c.request_full_redraw();
    let settled = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(settled.cache.misses, 1);
    assert_eq!(settled.nodes_rasterized, 3);
    c.request_full_redraw();
    let reused = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(reused.cache.hits, 1);
    assert_eq!(target.pixel(5, 5), Some(BLUE));
}

#[test]
fn one_cache_outcome_per_visual_across_regions() {
    let mut s = grouped();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(eager());
    tick(&mut c, &mut s.tree, &mut target).unwrap();

    // Two disjoint regions over the panel; the panel itself is unchanged.
    for id in [s.c, s.d] {
        s.tree
            .update(id, InvalidationKind::Render, |b| b.fill = Some(WHITE))
            .unwrap();
    }
    let stats = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(stats.strategy, DrawStrategy::DirtyRegions);
    assert_eq!(stats.region_count, 2);
    assert_eq!(target.stats().blits, 3);
    assert_eq!(stats.cache.hits, 1);

    // Rebuilt while drawing the first region, reused by the second.
    for id in [s.a, s.b] {
        s.tree
            .update(id, InvalidationKind::Render, |b| b.fill = Some(RED))
            .unwrap();
    }
    let stats = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(stats.region_count, 2);
    assert_eq!(stats.cache.rebuilds, 1);
    assert_eq!(stats.cache.hits, 0);
    assert_eq!(stats.nodes_rasterized, 3);
    assert_eq!(target.pixel(41, 41), Some(RED));

    let m = c.metrics();
    assert_eq!((m.cache.hits, m.cache.misses, m.cache.rebuilds), (1, 1, 1));
}

#[test]
fn device_change_drops_caches() {
    let mut s = grouped();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(eager());
    tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(c.cache().len(), 1);

    let lost = Viewport {
        device_generation: 1,
        ..vp()
    };
    assert!(c.should_draw(&FrameInputs::idle(lost)));
    assert!(c.cache().is_empty());
    assert_eq!(c.dirty().full_frame_reason(), Some(FullFrameReason::DeviceChanged));
}

#[test]
fn disabled_caching_forces_full_frame_path() {
    let mut s = scene();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default().with_caching(false));
    tick(&mut c, &mut s.tree, &mut target).unwrap();

    s.tree
        .update(s.a, InvalidationKind::Render, |b| b.fill = Some(BLUE))
        .unwrap();
    let stats = tick(&mut c, &mut s.tree, &mut target).unwrap();
    assert_eq!(stats.strategy, DrawStrategy::FullFrame);
    assert_eq!(stats.nodes_painted, 3);
    assert!(c.cache().is_empty());
}

#[test]
fn unmeasured_visuals_are_always_painted() {
    let mut tree = SceneTree::new();
    let root = tree
        .set_root(Block::container(rect(0.0, 0.0, 64.0, 64.0)))
        .unwrap();
    let a = tree.insert(root, Block::new(rect(4.0, 4.0, 8.0, 8.0), RED)).unwrap();
    tree.insert(root, Block::new(rect(40.0, 40.0, 8.0, 8.0), BLUE).unmeasured())
        .unwrap();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default().with_cache_policy(no_cache_policy()));
    let first = tick(&mut c, &mut tree, &mut target).unwrap();
    assert_eq!(first.uninitialized_bounds_fallbacks, 1);

    tree.update(a, InvalidationKind::Render, |b| b.fill = Some(BLUE))
        .unwrap();
    let stats = tick(&mut c, &mut tree, &mut target).unwrap();
    assert_eq!(stats.strategy, DrawStrategy::DirtyRegions);
    assert_eq!(stats.uninitialized_bounds_fallbacks, 1);
    assert_eq!(stats.nodes_painted, 3);
}

#[test]
fn transformed_subtrees_paint_in_root_space() {
    let mut tree = SceneTree::new();
    let root = tree
        .set_root(Block::container(rect(0.0, 0.0, 64.0, 64.0)))
        .unwrap();
    let group = tree
        .insert(
            root,
            Block::container(rect(0.0, 0.0, 8.0, 8.0))
                .with_transform(Affine::translate((16.0, 16.0))),
        )
        .unwrap();
    tree.insert(group, Block::new(rect(0.0, 0.0, 8.0, 8.0), RED))
        .unwrap();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default().with_cache_policy(no_cache_policy()));
    tick(&mut c, &mut tree, &mut target).unwrap();
    assert_eq!(target.pixel(17, 17), Some(RED));
    assert_eq!(target.pixel(1, 1), Some(WHITE));
}

struct Faulty {
    block: Block,
    fail: bool,
}

impl Visual for Faulty {
    fn bounds_in_root(&self) -> Option<Rect> {
        self.block.bounds_in_root()
    }

    fn clip(&self) -> Option<Rect> {
        self.block.clip()
    }

    fn draw(&self, surface: &mut dyn DrawSurface) -> OverpaintResult<()> {
        if self.fail {
            return Err(OverpaintError::draw("faulty visual"));
        }
        self.block.draw(surface)
    }
}

#[test]
fn failed_draw_unwinds_and_keeps_damage() {
    let mut tree = SceneTree::new();
    let root = tree
        .set_root(Faulty {
            block: Block::container(rect(0.0, 0.0, 64.0, 64.0)),
            fail: false,
        })
        .unwrap();
    let bad = tree
        .insert(
            root,
            Faulty {
                block: Block::new(rect(4.0, 4.0, 8.0, 8.0), RED)
                    .with_clip(rect(0.0, 0.0, 32.0, 32.0)),
                fail: true,
            },
        )
        .unwrap();
    let mut target = PixmapSurface::new(64, 64).unwrap();
    let mut c = compositor(CompositorOpts::default().with_cache_policy(no_cache_policy()));

    let events = tree.drain_events();
    c.handle_events(&mut tree, events);
    assert!(c.should_draw(&FrameInputs::idle(vp())));
    let err = c.draw(&tree, &mut target).unwrap_err();
    assert!(matches!(err, OverpaintError::Draw(_)));
    assert_eq!(target.state_depth(), 0);
    assert!(!target.is_batch_open());
    assert!(c.dirty().is_full_frame_dirty());
    assert_eq!(c.metrics().frames_failed, 1);

    tree.update(bad, InvalidationKind::Render, |v| v.fail = false)
        .unwrap();
    let stats = tick(&mut c, &mut tree, &mut target).unwrap();
    assert_eq!(stats.strategy, DrawStrategy::FullFrame);
    assert_eq!(target.pixel(5, 5), Some(RED));
}

//! Overpaint is a retained-mode UI compositor.
//!
//! It flattens a live scene graph into a retained render list, accumulates damaged screen
//! regions, decides once per tick whether a frame is needed, and paints either the whole frame or
//! only the damaged regions, replacing expensive subtrees with cached offscreen blits where the
//! cache policy allows.
//!
//! - Describe the scene through [`Visual`] and [`VisualTree`] (or use [`SceneTree`])
//! - Feed [`SceneEvent`]s to a [`Compositor`]
//! - Each tick call [`Compositor::should_draw`] and, when it returns `true`,
//!   [`Compositor::draw`] into a [`RenderTarget`] such as [`PixmapSurface`]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

pub(crate) mod cache;
pub(crate) mod compose;
pub(crate) mod damage;
pub(crate) mod render;
pub(crate) mod retained;
pub(crate) mod schedule;
pub(crate) mod scene;

pub use crate::foundation::core::{
    Affine, Point, Rect, Rgba8Premul, Size, Vec2, Viewport, VisualId,
};
pub use crate::foundation::error::{OverpaintError, OverpaintResult};

pub use crate::cache::policy::{
    CacheContext, CachePolicy, CachePolicyOpts, CacheStamp, DefaultCachePolicy,
    snapped_cache_bounds,
};
pub use crate::cache::store::{CacheCounters, CacheEntry, CacheOutcome, RenderCacheStore};
pub use crate::compose::compositor::Compositor;
pub use crate::compose::metrics::{CompositorMetrics, DrawStrategy, FrameStats};
pub use crate::compose::opts::CompositorOpts;
pub use crate::damage::tracker::{DirtyRegionOpts, DirtyRegionTracker, FullFrameReason};
pub use crate::render::pixmap::{DEFAULT_MAX_TEXTURE_DIMENSION, PixmapSurface, PixmapSurfaceStats};
pub use crate::render::surface::{BatchState, BlendMode, DrawSurface, RenderTarget, Sampler};
pub use crate::retained::list::{
    RenderList, RenderNode, RenderStateStep, RenderStateSteps, SubtreeExtent, SyncOutcome,
    is_effectively_visible, live_subtree_bounds, live_subtree_extent,
};
pub use crate::schedule::scheduler::{
    DrawReasons, FrameDecision, FrameInputs, FrameScheduler, SchedulerCounters,
};
pub use crate::scene::events::{Invalidation, InvalidationKind, SceneEvent, StructureChange};
pub use crate::scene::tree::SceneTree;
pub use crate::scene::visual::{Block, Visual, VisualTree};

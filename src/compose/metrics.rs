use crate::cache::store::CacheCounters;
use crate::damage::tracker::FullFrameReason;
use crate::retained::list::SyncOutcome;
use crate::schedule::scheduler::DrawReasons;

/// How a frame was painted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub enum DrawStrategy {
    /// Whole surface cleared and every node visited.
    #[default]
    FullFrame,
    /// Each damaged region clipped, cleared and repainted.
    DirtyRegions,
}

/// Statistics for one successful draw.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct FrameStats {
    /// 1-based index among successful draws.
    pub frame: u64,
    /// Reasons reported by the scheduler for this frame.
    pub reasons: DrawReasons,
    /// Strategy chosen.
    pub strategy: DrawStrategy,
    /// Why the frame was full-frame dirty, if it was.
    pub full_frame_reason: Option<FullFrameReason>,
    /// What render-list synchronization did.
    pub sync: SyncOutcome,
    /// Damaged regions drawn (0 on the full-frame path).
    pub region_count: usize,
    /// Fraction of the viewport that was damaged.
    pub dirty_coverage: f64,
    /// Nodes visited by the walk, summed over regions.
    pub nodes_visited: u64,
    /// Nodes painted live.
    pub nodes_painted: u64,
    /// Nodes skipped because their subtree missed the region.
    pub nodes_culled: u64,
    /// Nodes skipped because an ancestor's cache was blitted.
    pub nodes_from_cache: u64,
    /// Nodes painted into offscreen caches while creating or rebuilding them.
    pub nodes_rasterized: u64,
    /// Cache activity during this frame.
    pub cache: CacheCounters,
    /// Live paints of nodes with no known bounds.
    pub uninitialized_bounds_fallbacks: u64,
    /// Wall time spent in `draw`.
    pub elapsed_us: u64,
}

/// Cumulative compositor counters, owned by one compositor instance.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct CompositorMetrics {
    /// Ticks where the scheduler decided to draw.
    pub draw_executed_frames: u64,
    /// Ticks where the scheduler decided to skip.
    pub draw_skipped_frames: u64,
    /// Draws that completed successfully.
    pub frames_drawn: u64,
    /// Draws that returned an error.
    pub frames_failed: u64,
    /// Frames painted on the full-frame path.
    pub full_frame_draws: u64,
    /// Frames painted region by region.
    pub region_draws: u64,
    /// Full render-list rebuilds.
    pub list_rebuilds: u64,
    /// Nodes painted live.
    pub nodes_painted: u64,
    /// Nodes culled by region tests.
    pub nodes_culled: u64,
    /// Nodes painted into offscreen caches.
    pub nodes_rasterized: u64,
    /// Cache activity since creation.
    pub cache: CacheCounters,
    /// Live paints of nodes with no known bounds.
    pub uninitialized_bounds_fallbacks: u64,
    /// Statistics of the last successful draw.
    pub last_frame: Option<FrameStats>,
}

impl CompositorMetrics {
    pub(crate) fn record_frame(&mut self, stats: &FrameStats) {
        self.frames_drawn += 1;
        match stats.strategy {
            DrawStrategy::FullFrame => self.full_frame_draws += 1,
            DrawStrategy::DirtyRegions => self.region_draws += 1,
        }
        self.nodes_painted += stats.nodes_painted;
        self.nodes_culled += stats.nodes_culled;
        self.nodes_rasterized += stats.nodes_rasterized;
        self.uninitialized_bounds_fallbacks += stats.uninitialized_bounds_fallbacks;
        self.last_frame = Some(stats.clone());
    }
}

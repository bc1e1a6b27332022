use crate::foundation::core::Viewport;
use crate::scene::events::InvalidationKind;

bitflags::bitflags! {
    /// Why a frame is being drawn. Empty means nothing requires a draw.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    #[serde(transparent)]
    pub struct DrawReasons: u32 {
        /// Viewport size or device changed since the last drawn frame.
        const RESIZE = 1 << 0;
        /// A measure or arrange invalidation is pending.
        const LAYOUT_INVALIDATED = 1 << 1;
        /// A paint invalidation, damage, or explicit redraw request is pending.
        const RENDER_INVALIDATED = 1 << 2;
        /// An animation is running.
        const ANIMATION_ACTIVE = 1 << 3;
        /// A text caret is blinking.
        const CARET_BLINK_ACTIVE = 1 << 4;
    }
}

/// Per-tick state supplied by the frame driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameInputs {
    /// Current viewport and device identity.
    pub viewport: Viewport,
    /// Any animation needs a new frame.
    pub animations_active: bool,
    /// A caret blink timer is running.
    pub caret_blink_active: bool,
}

impl FrameInputs {
    /// Inputs with no animation activity.
    pub fn idle(viewport: Viewport) -> Self {
        Self {
            viewport,
            animations_active: false,
            caret_blink_active: false,
        }
    }
}

/// Outcome of [`FrameScheduler::evaluate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FrameDecision {
    /// Whether to draw this tick.
    pub draw: bool,
    /// Everything that asked for the draw.
    pub reasons: DrawReasons,
}

/// Frame counters kept by the scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerCounters {
    /// Ticks that decided to draw.
    pub draw_executed_frames: u64,
    /// Ticks that decided to skip.
    pub draw_skipped_frames: u64,
}

/// Decides once per tick whether a frame must be drawn.
///
/// Invalidation flags are sticky: they are cleared only by [`FrameScheduler::on_draw_completed`],
/// so a failed draw is retried on the next tick.
#[derive(Debug, Clone, Default)]
pub struct FrameScheduler {
    always_draw: bool,
    conditional: bool,
    last_drawn_viewport: Option<Viewport>,
    must_draw: bool,
    measure_invalid: bool,
    arrange_invalid: bool,
    render_invalid: bool,
    last_reasons: DrawReasons,
    counters: SchedulerCounters,
}

impl FrameScheduler {
    /// Scheduler with the compatibility toggles.
    ///
    /// `conditional == false` draws every tick, as does `always_draw == true`.
    pub fn new(conditional: bool, always_draw: bool) -> Self {
        Self {
            always_draw,
            conditional,
            ..Self::default()
        }
    }

    /// Update the compatibility toggles.
    pub fn set_toggles(&mut self, conditional: bool, always_draw: bool) {
        self.conditional = conditional;
        self.always_draw = always_draw;
    }

    /// Record an invalidation reason.
    pub fn note_invalidation(&mut self, kind: InvalidationKind) {
        match kind {
            InvalidationKind::Measure => self.measure_invalid = true,
            InvalidationKind::Arrange => self.arrange_invalid = true,
            InvalidationKind::Render => self.render_invalid = true,
        }
    }

    /// Record a structural change, which implies both layout and paint.
    pub fn note_structure_changed(&mut self) {
        self.measure_invalid = true;
        self.render_invalid = true;
    }

    /// Force the next tick to draw.
    pub fn request_redraw(&mut self) {
        self.must_draw = true;
    }

    /// Decide whether to draw this tick.
    pub fn evaluate(&mut self, inputs: &FrameInputs, has_damage: bool) -> FrameDecision {
        let mut reasons = DrawReasons::empty();
        if self.last_drawn_viewport != Some(inputs.viewport) {
            reasons |= DrawReasons::RESIZE;
        }
        if self.measure_invalid || self.arrange_invalid {
            reasons |= DrawReasons::LAYOUT_INVALIDATED;
        }
        if self.must_draw || self.render_invalid || has_damage {
            reasons |= DrawReasons::RENDER_INVALIDATED;
        }
        if inputs.animations_active {
            reasons |= DrawReasons::ANIMATION_ACTIVE;
        }
        if inputs.caret_blink_active {
            reasons |= DrawReasons::CARET_BLINK_ACTIVE;
        }

        let draw = !self.conditional || self.always_draw || !reasons.is_empty();
        if draw {
            self.counters.draw_executed_frames += 1;
        } else {
            self.counters.draw_skipped_frames += 1;
        }
        self.last_reasons = reasons;
        FrameDecision { draw, reasons }
    }

    /// Clear sticky flags after a successful draw into `viewport`.
    pub fn on_draw_completed(&mut self, viewport: Viewport) {
        self.last_drawn_viewport = Some(viewport);
        self.must_draw = false;
        self.measure_invalid = false;
        self.arrange_invalid = false;
        self.render_invalid = false;
    }

    /// Reasons computed by the last [`Self::evaluate`].
    pub fn last_reasons(&self) -> DrawReasons {
        self.last_reasons
    }

    /// Viewport of the last successful draw.
    pub fn last_drawn_viewport(&self) -> Option<Viewport> {
        self.last_drawn_viewport
    }

    /// Executed/skipped counters.
    pub fn counters(&self) -> SchedulerCounters {
        self.counters
    }
}

#[cfg(test)]
#[path = "../../tests/unit/schedule/scheduler.rs"]
mod tests;

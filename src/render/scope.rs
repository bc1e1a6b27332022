use smallvec::SmallVec;

use crate::foundation::core::{Affine, Rect};
use crate::foundation::error::OverpaintResult;
use crate::render::surface::{BatchState, DrawSurface};
use crate::retained::list::{RenderNode, RenderStateStep};
use crate::scene::visual::Visual;

#[derive(Clone, Copy)]
enum Pushed {
    Clip,
    Transform,
}

/// Clip/transform pushes that are popped in reverse order when the scope drops, including on
/// early `?` returns and unwinding.
pub(crate) struct StateScope<'a, D: DrawSurface + ?Sized> {
    surface: &'a mut D,
    pushed: SmallVec<[Pushed; 8]>,
}

impl<'a, D: DrawSurface + ?Sized> StateScope<'a, D> {
    pub(crate) fn new(surface: &'a mut D) -> Self {
        Self {
            surface,
            pushed: SmallVec::new(),
        }
    }

    pub(crate) fn apply(&mut self, step: &RenderStateStep) {
        match *step {
            RenderStateStep::Clip(rect) => self.push_clip(rect),
            RenderStateStep::Transform(t) => self.push_transform(t),
        }
    }

    pub(crate) fn apply_all(&mut self, steps: &[RenderStateStep]) {
        for step in steps {
            self.apply(step);
        }
    }

    pub(crate) fn push_clip(&mut self, rect: Rect) {
        self.surface.push_clip(rect);
        self.pushed.push(Pushed::Clip);
    }

    pub(crate) fn push_transform(&mut self, transform: Affine) {
        self.surface.push_transform(transform);
        self.pushed.push(Pushed::Transform);
    }

    pub(crate) fn surface(&mut self) -> &mut D {
        &mut *self.surface
    }
}

impl<D: DrawSurface + ?Sized> Drop for StateScope<'_, D> {
    fn drop(&mut self) {
        while let Some(p) = self.pushed.pop() {
            match p {
                Pushed::Clip => self.surface.pop_clip(),
                Pushed::Transform => self.surface.pop_transform(),
            }
        }
    }
}

/// An open batch, closed when dropped.
pub(crate) struct BatchScope<'a, D: DrawSurface + ?Sized> {
    surface: &'a mut D,
}

impl<'a, D: DrawSurface + ?Sized> BatchScope<'a, D> {
    pub(crate) fn begin(surface: &'a mut D, state: BatchState) -> Self {
        surface.begin_batch(state);
        Self { surface }
    }

    pub(crate) fn surface(&mut self) -> &mut D {
        &mut *self.surface
    }
}

impl<D: DrawSurface + ?Sized> Drop for BatchScope<'_, D> {
    fn drop(&mut self) {
        self.surface.end_batch();
    }
}

/// Paint one node live with its full render-state steps applied around the draw call.
pub(crate) fn paint_node(
    node: &RenderNode,
    visual: &dyn Visual,
    surface: &mut dyn DrawSurface,
) -> OverpaintResult<()> {
    let mut scope = StateScope::new(surface);
    scope.apply_all(&node.render_state_steps);
    visual.draw(scope.surface())
}

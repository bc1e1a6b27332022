use crate::foundation::core::{Affine, Rect, Rgba8Premul, VisualId};
use crate::foundation::error::OverpaintResult;
use crate::render::surface::DrawSurface;

/// A node of the scene graph as seen by the compositor.
///
/// `draw` paints in the coordinate space established by the render-state steps of the visual and
/// its ancestors. `bounds_in_root` must cover every pixel `draw` can touch, expressed in root
/// (device) space; `None` means "not measured yet" and disables culling for the node.
pub trait Visual {
    /// Local visibility flag. A hidden visual hides its whole subtree.
    fn is_visible(&self) -> bool {
        true
    }

    /// Bounding rectangle in root space.
    fn bounds_in_root(&self) -> Option<Rect>;

    /// Clip applied to this visual and its descendants, in the parent's coordinate space.
    fn clip(&self) -> Option<Rect> {
        None
    }

    /// Transform applied to this visual and its descendants, after its clip.
    fn transform(&self) -> Option<Affine> {
        None
    }

    /// Paint the visual.
    fn draw(&self, surface: &mut dyn DrawSurface) -> OverpaintResult<()>;

    /// Relative paint cost, summed per subtree by the cache policy.
    fn paint_cost(&self) -> u32 {
        1
    }

    /// Consume a precise damage rectangle (root space) for the last paint-only change.
    fn take_dirty_bounds_hint(&mut self) -> Option<Rect> {
        None
    }
}

/// Parent/child traversal over a scene graph.
pub trait VisualTree {
    /// Root visual, if the tree is attached.
    fn root(&self) -> Option<VisualId>;

    /// Look up a visual.
    fn visual(&self, id: VisualId) -> Option<&dyn Visual>;

    /// Mutable lookup, used to consume dirty-bounds hints.
    fn visual_mut(&mut self, id: VisualId) -> Option<&mut dyn Visual>;

    /// Parent of `id`; `None` for the root and for unknown ids.
    fn parent(&self, id: VisualId) -> Option<VisualId>;

    /// Children of `id` in paint order (back to front).
    fn children(&self, id: VisualId) -> &[VisualId];
}

/// A rectangle-filling visual, the basic building block of [`crate::SceneTree`] scenes.
///
/// `rect` is painted in the visual's local space; `root_bounds` is what the layout system reports.
/// [`Block::new`] keeps both equal, which is exact for untransformed trees.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    /// Painted rectangle in local space.
    pub rect: Rect,
    /// Reported root-space bounds.
    pub root_bounds: Option<Rect>,
    /// Fill color; `None` paints nothing.
    pub fill: Option<Rgba8Premul>,
    /// Local visibility.
    pub visible: bool,
    /// Optional clip (parent space).
    pub clip: Option<Rect>,
    /// Optional transform.
    pub transform: Option<Affine>,
    /// Paint cost reported to the cache policy.
    pub cost: u32,
    #[serde(skip)]
    dirty_hint: Option<Rect>,
}

impl Block {
    /// Opaque or translucent filled rectangle.
    pub fn new(rect: Rect, fill: Rgba8Premul) -> Self {
        Self {
            rect,
            root_bounds: Some(rect),
            fill: Some(fill),
            visible: true,
            clip: None,
            transform: None,
            cost: 1,
            dirty_hint: None,
        }
    }

    /// Unfilled container occupying `rect`.
    pub fn container(rect: Rect) -> Self {
        Self {
            fill: None,
            ..Self::new(rect, Rgba8Premul::TRANSPARENT)
        }
    }

    /// Builder: clip descendants to `clip`.
    pub fn with_clip(mut self, clip: Rect) -> Self {
        self.clip = Some(clip);
        self
    }

    /// Builder: apply `transform`; `root_bounds` is recomputed from `rect`.
    pub fn with_transform(mut self, transform: Affine) -> Self {
        self.transform = Some(transform);
        self.root_bounds = Some(transform.transform_rect_bbox(self.rect));
        self
    }

    /// Builder: paint cost.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Builder: report no bounds, as an unmeasured element would.
    pub fn unmeasured(mut self) -> Self {
        self.root_bounds = None;
        self
    }

    /// Move/resize; keeps `root_bounds` in sync for untransformed blocks.
    pub fn set_rect(&mut self, rect: Rect) {
        self.rect = rect;
        self.root_bounds = Some(match self.transform {
            Some(t) => t.transform_rect_bbox(rect),
            None => rect,
        });
    }

    /// Record a precise damage rectangle for the next paint-only invalidation.
    pub fn set_dirty_hint(&mut self, rect: Rect) {
        self.dirty_hint = Some(rect);
    }
}

impl Visual for Block {
    fn is_visible(&self) -> bool {
        self.visible
    }

    fn bounds_in_root(&self) -> Option<Rect> {
        self.root_bounds
    }

    fn clip(&self) -> Option<Rect> {
        self.clip
    }

    fn transform(&self) -> Option<Affine> {
        self.transform
    }

    fn draw(&self, surface: &mut dyn DrawSurface) -> OverpaintResult<()> {
        if let Some(fill) = self.fill {
            surface.fill_rect(self.rect, fill);
        }
        Ok(())
    }

    fn paint_cost(&self) -> u32 {
        self.cost
    }

    fn take_dirty_bounds_hint(&mut self) -> Option<Rect> {
        self.dirty_hint.take()
    }
}

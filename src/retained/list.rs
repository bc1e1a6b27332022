use std::collections::HashMap;
use std::ops::Range;

use smallvec::SmallVec;

use crate::damage::tracker::{DirtyRegionTracker, FullFrameReason};
use crate::foundation::core::{Affine, Rect, VisualId, non_empty, union_opt};
use crate::foundation::hash::StableHasher;
use crate::scene::events::InvalidationKind;
use crate::scene::visual::{Visual, VisualTree};

/// One clip or transform applied before painting a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RenderStateStep {
    /// Intersect the clip with a rectangle in the current coordinate space.
    Clip(Rect),
    /// Pre-multiply the current transform.
    Transform(Affine),
}

/// Ancestor steps followed by a node's own steps.
pub type RenderStateSteps = SmallVec<[RenderStateStep; 4]>;

/// A visible visual, flattened into paint order.
#[derive(Clone, Debug)]
pub struct RenderNode {
    /// Owning visual; also the render-cache key.
    pub visual: VisualId,
    /// Index of the parent node; `None` for the root.
    pub parent_index: Option<usize>,
    /// Distance from the root.
    pub depth: u32,
    /// The visual and all of its ancestors are visible.
    pub is_effectively_visible: bool,
    /// Root-space bounds; `None` while unmeasured or zero-sized.
    pub bounds: Option<Rect>,
    /// Union of the bounds in this subtree.
    pub subtree_bounds: Option<Rect>,
    /// Some node in this subtree has no bounds, so the subtree can never be culled.
    pub subtree_has_unbounded: bool,
    /// Clip/transform steps applied around this node's paint, ancestors first.
    pub render_state_steps: RenderStateSteps,
    /// `render_state_steps[..local_render_state_start]` are inherited from ancestors.
    pub local_render_state_start: usize,
    /// One past the last descendant.
    pub subtree_end: usize,
    /// Bumped whenever anything in the subtree repaints.
    pub subtree_render_version: u64,
    /// Bumped whenever anything in the subtree is re-laid-out.
    pub subtree_layout_version: u64,
    /// Hash of `render_state_steps`.
    pub render_state_signature: u64,
    /// This visual's paint cost.
    pub paint_cost: u32,
    /// Nodes in this subtree, including this one.
    pub subtree_visual_count: usize,
    /// Sum of paint costs in this subtree.
    pub subtree_cost: u64,
}

impl RenderNode {
    /// Steps inherited from ancestors.
    pub fn ancestor_steps(&self) -> &[RenderStateStep] {
        &self.render_state_steps[..self.local_render_state_start]
    }

    /// Steps contributed by this node.
    pub fn own_steps(&self) -> &[RenderStateStep] {
        &self.render_state_steps[self.local_render_state_start..]
    }

    /// Whether the node's own clip or transform is present.
    pub fn has_own_clip(&self) -> bool {
        self.own_steps()
            .iter()
            .any(|s| matches!(s, RenderStateStep::Clip(_)))
    }

    /// Whether any transform (own or inherited) applies to the node.
    pub fn has_transform(&self) -> bool {
        self.render_state_steps
            .iter()
            .any(|s| matches!(s, RenderStateStep::Transform(_)))
    }
}

/// What [`RenderList::synchronize`] had to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum SyncOutcome {
    /// Nothing was pending.
    Unchanged,
    /// Invalidated subtrees were revalidated in place.
    Refreshed {
        /// Nodes revisited.
        nodes: usize,
    },
    /// The list was rebuilt from the tree.
    Rebuilt {
        /// Nodes in the new list.
        nodes: usize,
    },
}

/// The tree no longer matches the list shape; only a rebuild can fix it.
#[derive(Debug)]
struct Drift;

/// Flattened, pre-order list of the visible scene.
///
/// Descendants of the node at index `i` occupy exactly `i + 1 .. nodes[i].subtree_end`.
#[derive(Debug)]
pub struct RenderList {
    nodes: Vec<RenderNode>,
    index_by_visual: HashMap<VisualId, usize>,
    next_stamp: u64,
    needs_rebuild: bool,
    pending: Vec<VisualId>,
    rebuilds: u64,
}

impl Default for RenderList {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            index_by_visual: HashMap::new(),
            next_stamp: 1,
            needs_rebuild: true,
            pending: Vec::new(),
            rebuilds: 0,
        }
    }
}

impl RenderList {
    /// Empty list; the first synchronize rebuilds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes in paint order.
    pub fn nodes(&self) -> &[RenderNode] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the list has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position of a visual in the list.
    pub fn index_of(&self, id: VisualId) -> Option<usize> {
        self.index_by_visual.get(&id).copied()
    }

    /// Whether a visual is listed (i.e. effectively visible at the last sync).
    pub fn contains(&self, id: VisualId) -> bool {
        self.index_by_visual.contains_key(&id)
    }

    /// Full rebuilds performed so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Whether the next synchronize will rebuild.
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    /// Force a full rebuild on the next synchronize.
    pub fn mark_structure_changed(&mut self) {
        self.needs_rebuild = true;
    }

    /// Indices of the direct children of `index`.
    pub fn child_indices(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let end = self.nodes.get(index).map_or(index, |n| n.subtree_end);
        let mut k = index + 1;
        std::iter::from_fn(move || {
            if k >= end {
                return None;
            }
            let cur = k;
            k = self.nodes[cur].subtree_end;
            Some(cur)
        })
    }

    fn bump_stamp(&mut self) -> u64 {
        let s = self.next_stamp;
        self.next_stamp += 1;
        s
    }

    /// Give `index` and all its ancestors a fresh render (and optionally layout) stamp.
    fn bump_chain(&mut self, index: usize, layout: bool) {
        let stamp = self.bump_stamp();
        let mut cur = Some(index);
        while let Some(i) = cur {
            let n = &mut self.nodes[i];
            n.subtree_render_version = stamp;
            if layout {
                n.subtree_layout_version = stamp;
            }
            cur = n.parent_index;
        }
    }

    /// Record an invalidation: stamps of the node and its ancestors move forward and the node is
    /// revalidated on the next synchronize. Unlisted visuals bump their nearest listed ancestor.
    pub fn note_invalidated<T: VisualTree + ?Sized>(
        &mut self,
        tree: &T,
        id: VisualId,
        kind: InvalidationKind,
    ) {
        if let Some(i) = self.index_of(id) {
            self.bump_chain(i, kind.is_layout());
            self.pending.push(id);
            return;
        }
        let mut cur = tree.parent(id);
        while let Some(p) = cur {
            if let Some(i) = self.index_of(p) {
                self.bump_chain(i, true);
                self.pending.push(p);
                return;
            }
            cur = tree.parent(p);
        }
    }

    /// Bump the chains of both parents of a structural change, so cached ancestors rebuild.
    pub fn note_structure_changed(
        &mut self,
        old_parent: Option<VisualId>,
        new_parent: Option<VisualId>,
    ) {
        for p in [old_parent, new_parent].into_iter().flatten() {
            if let Some(i) = self.index_of(p) {
                self.bump_chain(i, true);
            }
        }
        self.needs_rebuild = true;
    }

    /// Bring the list up to date with `tree`.
    ///
    /// Rebuilds after structural changes; otherwise revalidates pending subtrees, adding damage
    /// for any bounds or render-state change it finds. If the tree turns out to have changed shape
    /// without notice, the list is rebuilt and the whole frame is damaged.
    #[tracing::instrument(level = "debug", skip_all, fields(nodes = self.nodes.len()))]
    pub fn synchronize<T: VisualTree + ?Sized>(
        &mut self,
        tree: &T,
        dirty: &mut DirtyRegionTracker,
    ) -> SyncOutcome {
        if !self.needs_rebuild {
            match self.refresh_pending(tree, dirty) {
                Ok(0) => return SyncOutcome::Unchanged,
                Ok(nodes) => return SyncOutcome::Refreshed { nodes },
                Err(Drift) => {
                    tracing::debug!("render list drifted from scene; rebuilding");
                    dirty.mark_full_frame_dirty(FullFrameReason::StructureChanged);
                }
            }
        }
        self.rebuild(tree, dirty);
        SyncOutcome::Rebuilt {
            nodes: self.nodes.len(),
        }
    }

    fn rebuild<T: VisualTree + ?Sized>(&mut self, tree: &T, dirty: &mut DirtyRegionTracker) {
        let old_nodes = std::mem::take(&mut self.nodes);
        let old_index = std::mem::take(&mut self.index_by_visual);
        self.pending.clear();
        self.needs_rebuild = false;
        self.rebuilds += 1;

        if let Some(root) = tree.root()
            && is_effectively_visible(tree, root)
        {
            self.push_subtree(tree, root, None, 0, &old_nodes, &old_index);
        }
        let len = self.nodes.len();
        self.recompute_aggregates(0..len);

        if self.rebuilds > 1 {
            // Visuals that appeared, vanished, or changed while unlisted are damaged here.
            for old in &old_nodes {
                if !self.index_by_visual.contains_key(&old.visual) {
                    damage_bounds(dirty, old.bounds);
                }
            }
            let mut changed = Vec::new();
            for i in 0..len {
                let n = &self.nodes[i];
                let old = old_index.get(&n.visual).map(|&oi| &old_nodes[oi]);
                let same_node = old.is_some_and(|o| {
                    o.bounds == n.bounds && o.render_state_signature == n.render_state_signature
                });
                if !same_node {
                    if let Some(o) = old {
                        damage_bounds(dirty, o.bounds);
                    }
                    damage_bounds(dirty, n.bounds);
                }
                let same_children = old_index.get(&n.visual).is_some_and(|&oi| {
                    child_visuals(&old_nodes, oi).eq(child_visuals(&self.nodes, i))
                });
                if !same_node || !same_children {
                    changed.push(i);
                }
            }
            // Fresh stamps make cached ancestors repaint.
            for i in changed {
                self.bump_chain(i, true);
            }
        }
        tracing::debug!(nodes = len, "render list rebuilt");
    }

    fn push_subtree<T: VisualTree + ?Sized>(
        &mut self,
        tree: &T,
        id: VisualId,
        parent_index: Option<usize>,
        depth: u32,
        old_nodes: &[RenderNode],
        old_index: &HashMap<VisualId, usize>,
    ) {
        let Some(visual) = tree.visual(id) else {
            return;
        };
        if !visual.is_visible() {
            return;
        }

        let index = self.nodes.len();
        let inherited = parent_index.map(|p| self.nodes[p].render_state_steps.as_slice());
        let (steps, local_start) = compose_steps(inherited.unwrap_or(&[]), visual);
        let (render_version, layout_version) = match old_index.get(&id) {
            Some(&oi) => (
                old_nodes[oi].subtree_render_version,
                old_nodes[oi].subtree_layout_version,
            ),
            None => {
                let s = self.bump_stamp();
                (s, s)
            }
        };

        self.nodes.push(RenderNode {
            visual: id,
            parent_index,
            depth,
            is_effectively_visible: true,
            bounds: visual.bounds_in_root().and_then(non_empty),
            subtree_bounds: None,
            subtree_has_unbounded: false,
            render_state_signature: steps_signature(&steps),
            render_state_steps: steps,
            local_render_state_start: local_start,
            subtree_end: index + 1,
            subtree_render_version: render_version,
            subtree_layout_version: layout_version,
            paint_cost: visual.paint_cost(),
            subtree_visual_count: 1,
            subtree_cost: 0,
        });
        self.index_by_visual.insert(id, index);

        for &child in tree.children(id) {
            self.push_subtree(tree, child, Some(index), depth + 1, old_nodes, old_index);
        }
        self.nodes[index].subtree_end = self.nodes.len();
    }

    /// Recompute subtree aggregates for a contiguous subtree range, children before parents.
    fn recompute_aggregates(&mut self, range: Range<usize>) {
        for n in &mut self.nodes[range.clone()] {
            n.subtree_bounds = n.bounds;
            n.subtree_has_unbounded = n.bounds.is_none();
            n.subtree_visual_count = 1;
            n.subtree_cost = u64::from(n.paint_cost);
        }
        for j in range.clone().rev() {
            if j == range.start {
                continue;
            }
            let Some(p) = self.nodes[j].parent_index else {
                continue;
            };
            let child = self.nodes[j].clone_aggregates();
            self.nodes[p].fold_child(child);
        }
    }

    /// Recompute aggregates of every ancestor of `index` from their direct children.
    fn recompute_ancestors(&mut self, index: usize) {
        let mut cur = self.nodes[index].parent_index;
        while let Some(a) = cur {
            let mut acc = Aggregates {
                bounds: self.nodes[a].bounds,
                has_unbounded: self.nodes[a].bounds.is_none(),
                count: 1,
                cost: u64::from(self.nodes[a].paint_cost),
            };
            for c in self.child_indices(a) {
                acc.fold(self.nodes[c].clone_aggregates());
            }
            self.nodes[a].set_aggregates(acc);
            cur = self.nodes[a].parent_index;
        }
    }

    fn refresh_pending<T: VisualTree + ?Sized>(
        &mut self,
        tree: &T,
        dirty: &mut DirtyRegionTracker,
    ) -> Result<usize, Drift> {
        let pending = std::mem::take(&mut self.pending);
        let mut roots: Vec<usize> = pending.iter().filter_map(|&id| self.index_of(id)).collect();
        roots.sort_unstable();
        roots.dedup();

        let mut covered_end = 0;
        let mut refreshed = 0;
        for i in roots {
            if i < covered_end {
                continue;
            }
            self.refresh_subtree(tree, i, dirty)?;
            covered_end = self.nodes[i].subtree_end;
            refreshed += covered_end - i;
        }
        Ok(refreshed)
    }

    fn refresh_subtree<T: VisualTree + ?Sized>(
        &mut self,
        tree: &T,
        i: usize,
        dirty: &mut DirtyRegionTracker,
    ) -> Result<(), Drift> {
        let end = self.nodes[i].subtree_end;
        let before: Vec<(Option<Rect>, Option<Rect>, u64)> = self.nodes[i..end]
            .iter()
            .map(|n| (n.bounds, n.subtree_bounds, n.render_state_signature))
            .collect();
        let inherited = match self.nodes[i].parent_index {
            Some(p) => self.nodes[p].render_state_steps.clone(),
            None => RenderStateSteps::new(),
        };

        let id = self.nodes[i].visual;
        let mut cursor = i;
        self.revalidate(tree, id, &inherited, &mut cursor)?;
        if cursor != end {
            return Err(Drift);
        }
        self.recompute_aggregates(i..end);
        self.recompute_ancestors(i);

        let mut changed = Vec::new();
        for (k, (old_bounds, old_subtree, old_sig)) in before.into_iter().enumerate() {
            let j = i + k;
            let n = &self.nodes[j];
            if n.render_state_signature != old_sig {
                dirty.add_bounds_change(old_subtree, n.subtree_bounds);
                changed.push(j);
            } else if n.bounds != old_bounds {
                dirty.add_bounds_change(old_bounds, n.bounds);
                changed.push(j);
            }
        }
        for j in changed {
            self.bump_chain(j, true);
        }
        Ok(())
    }

    /// Walk the tree under `id` in lockstep with the list, refreshing per-node data.
    fn revalidate<T: VisualTree + ?Sized>(
        &mut self,
        tree: &T,
        id: VisualId,
        inherited: &[RenderStateStep],
        cursor: &mut usize,
    ) -> Result<(), Drift> {
        let j = *cursor;
        if self.nodes.get(j).is_none_or(|n| n.visual != id) {
            return Err(Drift);
        }
        let visual = tree.visual(id).ok_or(Drift)?;
        if !visual.is_visible() {
            return Err(Drift);
        }

        let (steps, local_start) = compose_steps(inherited, visual);
        let n = &mut self.nodes[j];
        n.bounds = visual.bounds_in_root().and_then(non_empty);
        n.paint_cost = visual.paint_cost();
        n.render_state_signature = steps_signature(&steps);
        n.local_render_state_start = local_start;
        n.render_state_steps = steps.clone();
        *cursor += 1;

        for &child in tree.children(id) {
            let child_visual = tree.visual(child).ok_or(Drift)?;
            if !child_visual.is_visible() {
                continue;
            }
            self.revalidate(tree, child, &steps, cursor)?;
        }
        if self.nodes[j].subtree_end != *cursor {
            return Err(Drift);
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct Aggregates {
    bounds: Option<Rect>,
    has_unbounded: bool,
    count: usize,
    cost: u64,
}

impl Aggregates {
    fn fold(&mut self, child: Aggregates) {
        self.bounds = union_opt(self.bounds, child.bounds);
        self.has_unbounded |= child.has_unbounded;
        self.count += child.count;
        self.cost = self.cost.saturating_add(child.cost);
    }
}

impl RenderNode {
    fn clone_aggregates(&self) -> Aggregates {
        Aggregates {
            bounds: self.subtree_bounds,
            has_unbounded: self.subtree_has_unbounded,
            count: self.subtree_visual_count,
            cost: self.subtree_cost,
        }
    }

    fn set_aggregates(&mut self, a: Aggregates) {
        self.subtree_bounds = a.bounds;
        self.subtree_has_unbounded = a.has_unbounded;
        self.subtree_visual_count = a.count;
        self.subtree_cost = a.cost;
    }

    fn fold_child(&mut self, child: Aggregates) {
        let mut acc = self.clone_aggregates();
        acc.fold(child);
        self.set_aggregates(acc);
    }
}

/// A node without bounds paints somewhere unknown, so it damages the whole frame.
fn damage_bounds(dirty: &mut DirtyRegionTracker, bounds: Option<Rect>) {
    match bounds {
        Some(r) => dirty.add_dirty_region(r),
        None => dirty.mark_full_frame_dirty(FullFrameReason::UnknownBounds),
    }
}

fn child_visuals(nodes: &[RenderNode], index: usize) -> impl Iterator<Item = VisualId> + '_ {
    let end = nodes[index].subtree_end;
    let mut k = index + 1;
    std::iter::from_fn(move || {
        if k >= end {
            return None;
        }
        let cur = k;
        k = nodes[cur].subtree_end;
        Some(nodes[cur].visual)
    })
}

/// Inherited steps, then the visual's clip, then its transform.
fn compose_steps(inherited: &[RenderStateStep], visual: &dyn Visual) -> (RenderStateSteps, usize) {
    let mut steps = RenderStateSteps::from_slice(inherited);
    let local_start = steps.len();
    if let Some(clip) = visual.clip() {
        steps.push(RenderStateStep::Clip(clip));
    }
    if let Some(transform) = visual.transform() {
        steps.push(RenderStateStep::Transform(transform));
    }
    (steps, local_start)
}

pub(crate) fn steps_signature(steps: &[RenderStateStep]) -> u64 {
    let mut h = StableHasher::new();
    h.write_u32(steps.len() as u32);
    for step in steps {
        match *step {
            RenderStateStep::Clip(r) => {
                h.write_u8(1);
                for v in [r.x0, r.y0, r.x1, r.y1] {
                    h.write_f64(v);
                }
            }
            RenderStateStep::Transform(a) => {
                h.write_u8(2);
                for v in a.as_coeffs() {
                    h.write_f64(v);
                }
            }
        }
    }
    h.finish()
}

/// The visual and every ancestor up to the tree root are visible.
pub fn is_effectively_visible<T: VisualTree + ?Sized>(tree: &T, id: VisualId) -> bool {
    let mut cur = id;
    loop {
        match tree.visual(cur) {
            Some(v) if v.is_visible() => {}
            _ => return false,
        }
        match tree.parent(cur) {
            Some(p) => cur = p,
            None => return tree.root() == Some(cur),
        }
    }
}

/// Union of the bounds of the visible part of the subtree rooted at `id`, read live from the
/// tree. `id` itself is assumed effectively visible.
pub fn live_subtree_bounds<T: VisualTree + ?Sized>(tree: &T, id: VisualId) -> Option<Rect> {
    live_subtree_extent(tree, id).bounds
}

/// Bounds of a subtree plus whether any visible node in it reports none.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SubtreeExtent {
    /// Union of the known bounds.
    pub bounds: Option<Rect>,
    /// Some node had no bounds, so `bounds` may not cover everything it paints.
    pub has_unbounded: bool,
}

impl SubtreeExtent {
    /// Extent recorded on a listed node at its last synchronization.
    pub fn of_node(node: &RenderNode) -> Self {
        Self {
            bounds: node.subtree_bounds,
            has_unbounded: node.subtree_has_unbounded,
        }
    }
}

/// Live [`SubtreeExtent`] of the visible part of the subtree rooted at `id`.
pub fn live_subtree_extent<T: VisualTree + ?Sized>(tree: &T, id: VisualId) -> SubtreeExtent {
    let mut acc = SubtreeExtent::default();
    let mut stack = vec![id];
    while let Some(cur) = stack.pop() {
        let Some(v) = tree.visual(cur) else {
            continue;
        };
        if !v.is_visible() {
            continue;
        }
        match v.bounds_in_root().and_then(non_empty) {
            Some(b) => acc.bounds = union_opt(acc.bounds, Some(b)),
            None => acc.has_unbounded = true,
        }
        stack.extend(tree.children(cur).iter().copied());
    }
    acc
}

#[cfg(test)]
#[path = "../../tests/unit/retained/list.rs"]
mod tests;

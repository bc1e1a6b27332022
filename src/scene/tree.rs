use std::collections::HashMap;

use crate::foundation::core::VisualId;
use crate::foundation::error::{OverpaintError, OverpaintResult};
use crate::scene::events::{Invalidation, InvalidationKind, SceneEvent, StructureChange};
use crate::scene::visual::{Block, Visual, VisualTree};

struct SceneSlot<V> {
    visual: V,
    parent: Option<VisualId>,
    children: Vec<VisualId>,
}

/// Arena-backed scene graph that records an event for every mutation.
///
/// Mutations apply immediately; the matching [`SceneEvent`]s queue up until
/// [`SceneTree::drain_events`] hands them to a compositor.
pub struct SceneTree<V = Block> {
    slots: HashMap<VisualId, SceneSlot<V>>,
    root: Option<VisualId>,
    next_id: u64,
    events: Vec<SceneEvent>,
}

impl<V> Default for SceneTree<V> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            root: None,
            next_id: 1,
            events: Vec::new(),
        }
    }
}

impl<V: Visual> SceneTree<V> {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of visuals in the tree.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the tree has no visuals.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether `id` is part of the tree.
    pub fn contains(&self, id: VisualId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Typed access to a visual.
    pub fn get(&self, id: VisualId) -> Option<&V> {
        self.slots.get(&id).map(|s| &s.visual)
    }

    fn alloc_id(&mut self) -> VisualId {
        let id = VisualId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Attach the root visual.
    pub fn set_root(&mut self, visual: V) -> OverpaintResult<VisualId> {
        if self.root.is_some() {
            return Err(OverpaintError::validation("scene tree already has a root"));
        }
        let id = self.alloc_id();
        self.slots.insert(
            id,
            SceneSlot {
                visual,
                parent: None,
                children: Vec::new(),
            },
        );
        self.root = Some(id);
        self.events.push(
            StructureChange {
                element: id,
                old_parent: None,
                new_parent: None,
            }
            .into(),
        );
        Ok(id)
    }

    /// Append `visual` as the last (front-most) child of `parent`.
    pub fn insert(&mut self, parent: VisualId, visual: V) -> OverpaintResult<VisualId> {
        let at = self.children(parent).len();
        self.insert_at(parent, at, visual)
    }

    /// Insert `visual` at `index` among the children of `parent`.
    pub fn insert_at(
        &mut self,
        parent: VisualId,
        index: usize,
        visual: V,
    ) -> OverpaintResult<VisualId> {
        let Some(p) = self.slots.get(&parent) else {
            return Err(OverpaintError::validation(format!(
                "unknown parent visual {}",
                parent.0
            )));
        };
        if index > p.children.len() {
            return Err(OverpaintError::validation(format!(
                "child index {index} out of range for visual {}",
                parent.0
            )));
        }
        let id = self.alloc_id();
        self.slots.insert(
            id,
            SceneSlot {
                visual,
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        if let Some(p) = self.slots.get_mut(&parent) {
            p.children.insert(index, id);
        }
        self.events.push(
            StructureChange {
                element: id,
                old_parent: None,
                new_parent: Some(parent),
            }
            .into(),
        );
        Ok(id)
    }

    /// Detach and drop `id` with its whole subtree, returning the detached visual.
    pub fn remove(&mut self, id: VisualId) -> OverpaintResult<V> {
        let Some(slot) = self.slots.get(&id) else {
            return Err(OverpaintError::validation(format!(
                "unknown visual {}",
                id.0
            )));
        };
        let parent = slot.parent;
        if let Some(p) = parent.and_then(|p| self.slots.get_mut(&p)) {
            p.children.retain(|&c| c != id);
        }
        if self.root == Some(id) {
            self.root = None;
        }

        let mut stack = vec![id];
        let mut detached = None;
        while let Some(cur) = stack.pop() {
            if let Some(slot) = self.slots.remove(&cur) {
                stack.extend(slot.children.iter().copied());
                if cur == id {
                    detached = Some(slot.visual);
                }
            }
        }

        self.events.push(
            StructureChange {
                element: id,
                old_parent: parent,
                new_parent: None,
            }
            .into(),
        );
        detached.ok_or_else(|| OverpaintError::validation(format!("unknown visual {}", id.0)))
    }

    /// Move `id` (with its subtree) to the end of `new_parent`'s children.
    pub fn reparent(&mut self, id: VisualId, new_parent: VisualId) -> OverpaintResult<()> {
        if !self.slots.contains_key(&id) || !self.slots.contains_key(&new_parent) {
            return Err(OverpaintError::validation("reparent of unknown visual"));
        }
        if self.root == Some(id) {
            return Err(OverpaintError::validation("cannot reparent the root visual"));
        }
        let mut cur = Some(new_parent);
        while let Some(c) = cur {
            if c == id {
                return Err(OverpaintError::validation(
                    "reparent would create a cycle",
                ));
            }
            cur = self.parent(c);
        }

        let old_parent = self.parent(id);
        if let Some(p) = old_parent.and_then(|p| self.slots.get_mut(&p)) {
            p.children.retain(|&c| c != id);
        }
        if let Some(p) = self.slots.get_mut(&new_parent) {
            p.children.push(id);
        }
        if let Some(s) = self.slots.get_mut(&id) {
            s.parent = Some(new_parent);
        }
        self.events.push(
            StructureChange {
                element: id,
                old_parent,
                new_parent: Some(new_parent),
            }
            .into(),
        );
        Ok(())
    }

    /// Mutate a visual and record an invalidation of `kind` for it.
    pub fn update<R>(
        &mut self,
        id: VisualId,
        kind: InvalidationKind,
        f: impl FnOnce(&mut V) -> R,
    ) -> OverpaintResult<R> {
        let Some(slot) = self.slots.get_mut(&id) else {
            return Err(OverpaintError::validation(format!(
                "unknown visual {}",
                id.0
            )));
        };
        let out = f(&mut slot.visual);
        self.events.push(Invalidation::new(kind, id).into());
        Ok(out)
    }

    /// Record an invalidation without mutating anything.
    pub fn invalidate(&mut self, id: VisualId, kind: InvalidationKind) {
        self.events.push(Invalidation::new(kind, id).into());
    }

    /// Record an invalidation with no known originator.
    pub fn invalidate_unattributed(&mut self, kind: InvalidationKind) {
        self.events.push(Invalidation::unattributed(kind).into());
    }

    /// Take all queued events in the order they were raised.
    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }
}

impl<V: Visual> VisualTree for SceneTree<V> {
    fn root(&self) -> Option<VisualId> {
        self.root
    }

    fn visual(&self, id: VisualId) -> Option<&dyn Visual> {
        self.slots.get(&id).map(|s| &s.visual as &dyn Visual)
    }

    fn visual_mut(&mut self, id: VisualId) -> Option<&mut dyn Visual> {
        self.slots
            .get_mut(&id)
            .map(|s| &mut s.visual as &mut dyn Visual)
    }

    fn parent(&self, id: VisualId) -> Option<VisualId> {
        self.slots.get(&id).and_then(|s| s.parent)
    }

    fn children(&self, id: VisualId) -> &[VisualId] {
        self.slots
            .get(&id)
            .map(|s| s.children.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
#[path = "../../tests/unit/scene/tree.rs"]
mod tests;

use super::*;
use crate::damage::tracker::DirtyRegionOpts;
use crate::foundation::core::{Rgba8Premul, Viewport};
use crate::scene::tree::SceneTree;
use crate::scene::visual::Block;

const GRAY: Rgba8Premul = Rgba8Premul::opaque(128, 128, 128);

fn rect(x: f64, y: f64, w: f64, h: f64) -> Rect {
    Rect::new(x, y, x + w, y + h)
}

fn dirty() -> DirtyRegionTracker {
    DirtyRegionTracker::new(Viewport::new(200, 200), DirtyRegionOpts::default())
}

struct Fixture {
    tree: SceneTree,
    root: VisualId,
    a: VisualId,
    a1: VisualId,
    a2: VisualId,
    b: VisualId,
}

fn fixture() -> Fixture {
    let mut tree = SceneTree::new();
    let root = tree.set_root(Block::container(rect(0.0, 0.0, 200.0, 200.0))).unwrap();
    let a = tree.insert(root, Block::new(rect(0.0, 0.0, 50.0, 50.0), GRAY)).unwrap();
    let a1 = tree.insert(a, Block::new(rect(5.0, 5.0, 10.0, 10.0), GRAY)).unwrap();
    let a2 = tree.insert(a, Block::new(rect(20.0, 5.0, 10.0, 10.0), GRAY)).unwrap();
    let b = tree.insert(root, Block::new(rect(100.0, 100.0, 20.0, 20.0), GRAY)).unwrap();
    tree.drain_events();
    Fixture {
        tree,
        root,
        a,
        a1,
        a2,
        b,
    }
}

fn synced(f: &Fixture) -> RenderList {
    let mut list = RenderList::new();
    let mut d = dirty();
    assert_eq!(
        list.synchronize(&f.tree, &mut d),
        SyncOutcome::Rebuilt { nodes: 5 }
    );
    list
}

#[test]
fn pre_order_with_contiguous_subtrees() {
    let f = fixture();
    let list = synced(&f);
    let order: Vec<VisualId> = list.nodes().iter().map(|n| n.visual).collect();
    assert_eq!(order, vec![f.root, f.a, f.a1, f.a2, f.b]);

    let ends: Vec<usize> = list.nodes().iter().map(|n| n.subtree_end).collect();
    assert_eq!(ends, vec![5, 4, 3, 4, 5]);
    assert_eq!(list.nodes()[2].parent_index, Some(1));
    assert_eq!(list.nodes()[2].depth, 2);
    assert_eq!(list.child_indices(0).collect::<Vec<_>>(), vec![1, 4]);
    assert_eq!(list.nodes()[0].subtree_visual_count, 5);
    assert_eq!(list.nodes()[1].subtree_cost, 3);
}

#[test]
fn hidden_subtrees_are_skipped() {
    let mut f = fixture();
    f.tree.update(f.a, InvalidationKind::Render, |b| b.visible = false).unwrap();
    let mut list = RenderList::new();
    list.synchronize(&f.tree, &mut dirty());
    let order: Vec<VisualId> = list.nodes().iter().map(|n| n.visual).collect();
    assert_eq!(order, vec![f.root, f.b]);
    assert!(!list.contains(f.a1));
    assert!(list.nodes().iter().all(|n| n.is_effectively_visible));
}

#[test]
fn steps_inherit_ancestor_then_own() {
    let mut f = fixture();
    f.tree
        .update(f.a, InvalidationKind::Render, |b| {
            b.clip = Some(rect(0.0, 0.0, 40.0, 40.0))
        })
        .unwrap();
    f.tree
        .update(f.a1, InvalidationKind::Render, |b| {
            b.transform = Some(Affine::translate((1.0, 2.0)))
        })
        .unwrap();
    let list = synced(&f);
    let a1 = &list.nodes()[2];
    assert_eq!(
        a1.render_state_steps.as_slice(),
        &[
            RenderStateStep::Clip(rect(0.0, 0.0, 40.0, 40.0)),
            RenderStateStep::Transform(Affine::translate((1.0, 2.0))),
        ]
    );
    assert_eq!(a1.local_render_state_start, 1);
    assert_eq!(a1.ancestor_steps().len(), 1);
    assert!(a1.has_transform());
    assert!(!a1.has_own_clip());
    assert!(list.nodes()[1].has_own_clip());
    assert_ne!(
        a1.render_state_signature,
        list.nodes()[3].render_state_signature
    );
    assert_eq!(
        list.nodes()[3].render_state_signature,
        list.nodes()[1].render_state_signature
    );
}

#[test]
fn subtree_bounds_union_and_unbounded_flag() {
    let mut f = fixture();
    f.tree
        .update(f.a2, InvalidationKind::Arrange, |b| b.root_bounds = None)
        .unwrap();
    let list = synced(&f);
    assert_eq!(list.nodes()[0].subtree_bounds, Some(rect(0.0, 0.0, 200.0, 200.0)));
    assert_eq!(list.nodes()[3].bounds, None);
    assert!(list.nodes()[3].subtree_has_unbounded);
    assert!(list.nodes()[1].subtree_has_unbounded);
    assert!(list.nodes()[0].subtree_has_unbounded);
    assert!(!list.nodes()[4].subtree_has_unbounded);
    assert_eq!(list.nodes()[1].subtree_bounds, Some(rect(0.0, 0.0, 50.0, 50.0)));
}

#[test]
fn refresh_damages_old_and_new_bounds() {
    let mut f = fixture();
    let mut list = synced(&f);
    let before = list.nodes()[0].subtree_layout_version;

    f.tree
        .update(f.b, InvalidationKind::Arrange, |b| {
            b.set_rect(rect(150.0, 10.0, 20.0, 20.0))
        })
        .unwrap();
    list.note_invalidated(&f.tree, f.b, InvalidationKind::Arrange);

    let mut d = dirty();
    assert_eq!(
        list.synchronize(&f.tree, &mut d),
        SyncOutcome::Refreshed { nodes: 1 }
    );
    assert_eq!(
        d.regions(),
        &[rect(100.0, 100.0, 20.0, 20.0), rect(150.0, 10.0, 20.0, 20.0)]
    );
    assert_eq!(list.nodes()[4].bounds, Some(rect(150.0, 10.0, 20.0, 20.0)));
    assert!(list.nodes()[0].subtree_layout_version > before);
    assert_eq!(list.synchronize(&f.tree, &mut d), SyncOutcome::Unchanged);
}

#[test]
fn render_invalidation_leaves_layout_version() {
    let f = fixture();
    let mut list = synced(&f);
    let n = list.nodes()[2].clone();
    list.note_invalidated(&f.tree, f.a1, InvalidationKind::Render);
    assert!(list.nodes()[2].subtree_render_version > n.subtree_render_version);
    assert_eq!(list.nodes()[2].subtree_layout_version, n.subtree_layout_version);
    assert_eq!(
        list.nodes()[1].subtree_render_version,
        list.nodes()[2].subtree_render_version
    );
    assert!(list.nodes()[4].subtree_render_version < list.nodes()[2].subtree_render_version);
}

#[test]
fn stamps_survive_rebuild_unless_membership_changed() {
    let mut f = fixture();
    let mut list = synced(&f);
    list.note_invalidated(&f.tree, f.a1, InvalidationKind::Render);
    let a1_before = list.nodes()[2].subtree_render_version;
    let b_before = list.nodes()[4].subtree_render_version;

    let c = f.tree.insert(f.b, Block::new(rect(101.0, 101.0, 2.0, 2.0), GRAY)).unwrap();
    list.note_structure_changed(None, Some(f.b));
    assert_eq!(
        list.synchronize(&f.tree, &mut dirty()),
        SyncOutcome::Rebuilt { nodes: 6 }
    );
    assert_eq!(list.nodes()[2].subtree_render_version, a1_before);
    assert!(list.nodes()[4].subtree_render_version > b_before);
    assert_eq!(list.index_of(c), Some(5));
    assert_eq!(list.rebuild_count(), 2);
}

#[test]
fn undeclared_shape_change_escalates_to_full_rebuild() {
    let mut f = fixture();
    let mut list = synced(&f);
    f.tree.insert(f.a, Block::new(rect(30.0, 30.0, 5.0, 5.0), GRAY)).unwrap();
    list.note_invalidated(&f.tree, f.a, InvalidationKind::Measure);

    let mut d = dirty();
    assert_eq!(
        list.synchronize(&f.tree, &mut d),
        SyncOutcome::Rebuilt { nodes: 6 }
    );
    assert!(d.is_full_frame_dirty());
}

#[test]
fn invalidating_an_unlisted_visual_bumps_nearest_listed_ancestor() {
    let mut f = fixture();
    f.tree.update(f.a, InvalidationKind::Render, |b| b.visible = false).unwrap();
    let mut list = RenderList::new();
    list.synchronize(&f.tree, &mut dirty());
    let root_before = list.nodes()[0].subtree_layout_version;

    list.note_invalidated(&f.tree, f.a2, InvalidationKind::Render);
    assert!(list.nodes()[0].subtree_layout_version > root_before);
}

#[test]
fn live_helpers_follow_visibility() {
    let mut f = fixture();
    assert!(is_effectively_visible(&f.tree, f.a1));
    assert_eq!(
        live_subtree_bounds(&f.tree, f.a),
        Some(rect(0.0, 0.0, 50.0, 50.0))
    );
    f.tree.update(f.a, InvalidationKind::Render, |b| b.visible = false).unwrap();
    assert!(!is_effectively_visible(&f.tree, f.a1));
    assert!(!is_effectively_visible(&f.tree, VisualId(404)));
}

#[test]
fn live_extent_flags_unmeasured_descendants() {
    let mut f = fixture();
    let extent = live_subtree_extent(&f.tree, f.a);
    assert!(!extent.has_unbounded);

    f.tree
        .insert(f.a, Block::new(rect(0.0, 0.0, 1.0, 1.0), GRAY).unmeasured())
        .unwrap();
    let extent = live_subtree_extent(&f.tree, f.a);
    assert!(extent.has_unbounded);
    assert_eq!(extent.bounds, Some(rect(0.0, 0.0, 50.0, 50.0)));

    let list = synced_after_insert(&f);
    let a = list.index_of(f.a).unwrap();
    assert_eq!(SubtreeExtent::of_node(&list.nodes()[a]), extent);
}

fn synced_after_insert(f: &Fixture) -> RenderList {
    let mut list = RenderList::new();
    list.synchronize(&f.tree, &mut dirty());
    list
}

#[test]
fn rebuild_damages_visuals_that_changed_while_unlisted() {
    let mut f = fixture();
    let mut list = synced(&f);
    f.tree.update(f.a, InvalidationKind::Render, |b| b.visible = false).unwrap();
    list.mark_structure_changed();
    let mut d = dirty();
    list.synchronize(&f.tree, &mut d);
    assert!(!list.contains(f.a1));
    assert_eq!(d.regions(), &[rect(0.0, 0.0, 50.0, 50.0)]);

    f.tree
        .update(f.a1, InvalidationKind::Arrange, |b| {
            b.set_rect(rect(150.0, 150.0, 10.0, 10.0))
        })
        .unwrap();
    f.tree.update(f.a, InvalidationKind::Render, |b| b.visible = true).unwrap();
    list.mark_structure_changed();
    let mut d = dirty();
    list.synchronize(&f.tree, &mut d);
    assert!(list.contains(f.a1));
    assert!(d.regions().contains(&rect(150.0, 150.0, 10.0, 10.0)));
}

use super::*;

const RED: Rgba8Premul = Rgba8Premul::opaque(255, 0, 0);
const BLUE: Rgba8Premul = Rgba8Premul::opaque(0, 0, 255);

#[test]
fn zero_sized_surface_is_rejected() {
    assert!(matches!(
        PixmapSurface::new(0, 4),
        Err(OverpaintError::Surface(_))
    ));
    assert!(PixmapSurface::new(70_000, 1).is_err());
}

#[test]
fn fill_respects_clip_and_transform() {
    let mut s = PixmapSurface::new(8, 8).unwrap();
    s.begin_batch(BatchState::default());
    s.push_transform(Affine::translate((2.0, 2.0)));
    s.push_clip(Rect::new(0.0, 0.0, 2.0, 2.0));
    s.fill_rect(Rect::new(0.0, 0.0, 8.0, 8.0), RED);
    s.pop_clip();
    s.pop_transform();
    s.end_batch();

    assert_eq!(s.pixel(2, 2), Some(RED));
    assert_eq!(s.pixel(3, 3), Some(RED));
    assert_eq!(s.pixel(4, 4), Some(Rgba8Premul::TRANSPARENT));
    assert_eq!(s.pixel(1, 1), Some(Rgba8Premul::TRANSPARENT));
    assert_eq!(s.state_depth(), 0);
    assert_eq!(s.stats().max_state_depth, 2);
}

#[test]
fn clear_only_touches_current_clip() {
    let mut s = PixmapSurface::new(4, 4).unwrap();
    s.clear(BLUE);
    s.push_clip(Rect::new(1.0, 1.0, 3.0, 3.0));
    s.clear(RED);
    s.pop_clip();

    assert_eq!(s.pixel(0, 0), Some(BLUE));
    assert_eq!(s.pixel(1, 1), Some(RED));
    assert_eq!(s.pixel(2, 2), Some(RED));
    assert_eq!(s.pixel(3, 3), Some(BLUE));
}

#[test]
fn blit_ignores_transform_but_honors_clip() {
    let mut src = PixmapSurface::new(2, 2).unwrap();
    src.fill_rect(Rect::new(0.0, 0.0, 2.0, 2.0), RED);

    let mut dst = PixmapSurface::new(6, 6).unwrap();
    dst.push_transform(Affine::translate((3.0, 3.0)));
    dst.push_clip(Rect::new(-3.0, -3.0, 0.0, 0.0));
    dst.blit(&src, Point::new(2.0, 2.0));
    dst.pop_clip();
    dst.pop_transform();

    assert_eq!(dst.pixel(2, 2), Some(RED));
    assert_eq!(dst.pixel(3, 3), Some(Rgba8Premul::TRANSPARENT));
    assert_eq!(dst.pixel(5, 5), Some(Rgba8Premul::TRANSPARENT));
}

#[test]
fn blit_clips_negative_origin() {
    let mut src = PixmapSurface::new(3, 3).unwrap();
    src.fill_rect(Rect::new(0.0, 0.0, 3.0, 3.0), BLUE);
    let mut dst = PixmapSurface::new(4, 4).unwrap();
    dst.blit(&src, Point::new(-2.0, -2.0));
    assert_eq!(dst.pixel(0, 0), Some(BLUE));
    assert_eq!(dst.pixel(1, 1), Some(Rgba8Premul::TRANSPARENT));
}

#[test]
fn offscreen_respects_max_texture_dimension() {
    let s = PixmapSurface::with_max_texture_dimension(4, 4, 16).unwrap();
    assert!(s.create_offscreen(16, 16).is_ok());
    assert!(s.create_offscreen(17, 2).is_err());
}

#[test]
fn copy_blend_replaces_translucent_pixels() {
    let mut s = PixmapSurface::new(2, 1).unwrap();
    s.clear(BLUE);
    let half = Rgba8Premul::from_straight_rgba(255, 0, 0, 128);
    s.begin_batch(BatchState {
        blend: BlendMode::Copy,
        ..BatchState::default()
    });
    s.fill_rect(Rect::new(0.0, 0.0, 1.0, 1.0), half);
    s.end_batch();
    assert_eq!(s.pixel(0, 0), Some(half));
    assert_eq!(s.pixel(1, 0), Some(BLUE));
}

#[test]
#[should_panic(expected = "begin_batch while a batch is open")]
fn nested_batches_fail_fast() {
    let mut s = PixmapSurface::new(1, 1).unwrap();
    s.begin_batch(BatchState::default());
    s.begin_batch(BatchState::default());
}

#[test]
#[should_panic(expected = "popped out of order")]
fn mismatched_pop_fails_fast() {
    let mut s = PixmapSurface::new(1, 1).unwrap();
    s.push_clip(Rect::new(0.0, 0.0, 1.0, 1.0));
    s.pop_transform();
}

fn rotated_square() -> (Affine, Rect) {
    (
        Affine::rotate_about(std::f64::consts::FRAC_PI_4, Point::new(50.0, 50.0)),
        Rect::new(30.0, 30.0, 70.0, 70.0),
    )
}

#[test]
fn rotated_fill_covers_only_the_diamond() {
    let (rotation, square) = rotated_square();
    let mut s = PixmapSurface::new(100, 100).unwrap();
    s.push_transform(rotation);
    s.fill_rect(square, RED);
    s.pop_transform();

    assert_eq!(s.pixel(50, 50), Some(RED));
    assert_eq!(s.pixel(50, 25), Some(RED));
    assert_eq!(s.pixel(25, 25), Some(Rgba8Premul::TRANSPARENT));
    assert_eq!(s.pixel(74, 74), Some(Rgba8Premul::TRANSPARENT));
}

#[test]
fn rotated_clip_limits_fill_clear_and_blit() {
    let (rotation, square) = rotated_square();
    let mut src = PixmapSurface::new(100, 100).unwrap();
    src.clear(BLUE);

    let mut s = PixmapSurface::new(100, 100).unwrap();
    s.begin_batch(BatchState::default());
    s.push_transform(rotation);
    s.push_clip(square);
    s.push_transform(rotation.inverse());
    s.fill_rect(Rect::new(0.0, 0.0, 100.0, 50.0), RED);
    s.blit(&src, Point::new(0.0, 50.0));
    s.pop_transform();
    s.pop_clip();
    s.pop_transform();
    s.end_batch();

    assert_eq!(s.pixel(50, 30), Some(RED));
    assert_eq!(s.pixel(50, 70), Some(BLUE));
    assert_eq!(s.pixel(25, 25), Some(Rgba8Premul::TRANSPARENT));
    assert_eq!(s.pixel(25, 75), Some(Rgba8Premul::TRANSPARENT));

    s.push_transform(rotation);
    s.push_clip(square);
    s.clear(Rgba8Premul::TRANSPARENT);
    s.pop_clip();
    s.pop_transform();
    assert_eq!(s.pixel(50, 30), Some(Rgba8Premul::TRANSPARENT));
    assert_eq!(s.state_depth(), 0);
}

#[test]
fn fills_inside_a_batch_land_at_end_batch() {
    let mut s = PixmapSurface::new(4, 4).unwrap();
    s.begin_batch(BatchState::default());
    s.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), RED);
    assert_eq!(s.pixel(1, 1), Some(Rgba8Premul::TRANSPARENT));
    s.fill_rect(Rect::new(1.0, 1.0, 2.0, 2.0), BLUE);
    s.end_batch();

    assert_eq!(s.pixel(0, 0), Some(RED));
    assert_eq!(s.pixel(1, 1), Some(BLUE));
    assert_eq!(s.stats().flushes, 1);
}

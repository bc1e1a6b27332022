use super::*;

#[test]
fn defaults_validate() {
    let opts = CompositorOpts::default();
    opts.validate().unwrap();
    assert!(opts.enable_caching);
    assert!(opts.conditional_scheduling);
    assert!(!opts.always_draw);
    assert_eq!(opts.dirty_region_opts(), DirtyRegionOpts::default());
}

#[test]
fn partial_json_keeps_defaults() {
    let opts = CompositorOpts::from_json_str(
        r#"{ "enable_caching": false, "cache_policy": { "min_subtree_visuals": 8 } }"#,
    )
    .unwrap();
    assert!(!opts.enable_caching);
    assert!(opts.enable_dirty_region_drawing);
    assert_eq!(opts.cache_policy.min_subtree_visuals, 8);
    assert_eq!(
        opts.cache_policy.max_texture_dimension,
        CachePolicyOpts::default().max_texture_dimension
    );
}

#[test]
fn json_round_trips_through_serde() {
    let opts = CompositorOpts::default()
        .with_background(Rgba8Premul::opaque(1, 2, 3))
        .with_max_dirty_regions(4);
    let s = serde_json::to_string(&opts).unwrap();
    assert_eq!(CompositorOpts::from_json_str(&s).unwrap(), opts);
}

#[test]
fn invalid_values_are_rejected() {
    assert!(CompositorOpts::default().with_max_dirty_regions(0).validate().is_err());
    assert!(
        CompositorOpts::default()
            .with_full_frame_coverage_threshold(1.5)
            .validate()
            .is_err()
    );
    assert!(
        CompositorOpts::default()
            .with_full_frame_coverage_threshold(f64::NAN)
            .validate()
            .is_err()
    );
    let err = CompositorOpts::from_json_str(r#"{ "max_dirty_regions": 0 }"#).unwrap_err();
    assert!(matches!(err, OverpaintError::Validation(_)));
    assert!(CompositorOpts::from_json_str("not json").is_err());
}

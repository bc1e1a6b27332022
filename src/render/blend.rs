pub(crate) type PremulRgba8 = [u8; 4];

/// Porter-Duff source-over on premultiplied pixels.
pub(crate) fn over(dst: PremulRgba8, src: PremulRgba8) -> PremulRgba8 {
    let sa = src[3];
    if sa == 0 {
        return dst;
    }
    if sa == 255 {
        return src;
    }

    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255(u16::from(dst[3]), inv));
    for i in 0..3 {
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(src[i], dc);
    }
    out
}

/// Source-over a packed rgba8 row onto another of equal length.
pub(crate) fn over_row(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&out);
    }
}

/// Scale a premultiplied pixel by `coverage` (0..=255).
pub(crate) fn scale(px: PremulRgba8, coverage: u8) -> PremulRgba8 {
    match coverage {
        255 => px,
        0 => [0; 4],
        _ => px.map(|c| mul_div255(u16::from(c), u16::from(coverage))),
    }
}

/// Move `dst` toward `src` by `coverage`; full coverage replaces `dst`.
pub(crate) fn lerp(dst: PremulRgba8, src: PremulRgba8, coverage: u8) -> PremulRgba8 {
    match coverage {
        255 => src,
        0 => dst,
        _ => {
            let inv = 255 - u16::from(coverage);
            let mut out = [0u8; 4];
            for i in 0..4 {
                out[i] = add_sat_u8(
                    mul_div255(u16::from(src[i]), u16::from(coverage)),
                    mul_div255(u16::from(dst[i]), inv),
                );
            }
            out
        }
    }
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

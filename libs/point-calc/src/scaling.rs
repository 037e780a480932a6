//! Linear scaling and rounding

/// Map `value` from `[input_min, input_max]` onto `[scale_min, scale_max]`
///
/// The result is clamped to the output range. The value passes through
/// unchanged when a bound is missing or either range is degenerate.
pub fn scale(
    value: f64,
    input_min: Option<f64>,
    input_max: Option<f64>,
    scale_min: Option<f64>,
    scale_max: Option<f64>,
) -> f64 {
    let Some((in_lo, in_hi, out_lo, out_hi)) = bounds(input_min, input_max, scale_min, scale_max)
    else {
        return value;
    };

    let scaled = (value - in_lo) / (in_hi - in_lo) * (out_hi - out_lo) + out_lo;
    scaled.clamp(out_lo.min(out_hi), out_lo.max(out_hi))
}

/// Inverse of [`scale`], used on the write path
///
/// Maps an output-range value back into the input range. No clamping is
/// applied: the caller writes exactly what the inverse map yields.
pub fn unscale(
    value: f64,
    input_min: Option<f64>,
    input_max: Option<f64>,
    scale_min: Option<f64>,
    scale_max: Option<f64>,
) -> f64 {
    let Some((in_lo, in_hi, out_lo, out_hi)) = bounds(input_min, input_max, scale_min, scale_max)
    else {
        return value;
    };

    (value - out_lo) / (out_hi - out_lo) * (in_hi - in_lo) + in_lo
}

fn bounds(
    input_min: Option<f64>,
    input_max: Option<f64>,
    scale_min: Option<f64>,
    scale_max: Option<f64>,
) -> Option<(f64, f64, f64, f64)> {
    let (in_lo, in_hi, out_lo, out_hi) = (input_min?, input_max?, scale_min?, scale_max?);
    if in_lo == in_hi || out_lo == out_hi {
        return None;
    }
    Some((in_lo, in_hi, out_lo, out_hi))
}

/// Round to `places` decimals, half away from zero
pub fn round_to(value: f64, places: i32) -> f64 {
    let places = places.clamp(0, 15);
    let factor = 10_f64.powi(places);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

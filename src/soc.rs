//! State-of-charge estimation for Elektra

/// Estimate the state-of-charge percentage added during a session.
///
/// Formula: `(energy_kwh * efficiency) / usable_capacity_kwh * 100`,
/// clamped to [0, 100].
///
/// Returns `None` when no vehicle is resolved for the session (capacity
/// unknown) or the capacity is non-positive; an unknown SoC is reported as
/// unavailable, not as zero.
pub fn estimate_soc_added(
    energy_kwh: f64,
    efficiency: Option<f64>,
    usable_capacity_kwh: Option<f64>,
) -> Option<f64> {
    let efficiency = efficiency?;
    let capacity = usable_capacity_kwh?;
    if capacity <= 0.0 {
        return None;
    }
    Some(((energy_kwh * efficiency) / capacity * 100.0).clamp(0.0, 100.0))
}

use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits. Used for every
/// quantity, price and money amount so settlement is bit-for-bit reproducible.
pub type Fixed64 = I32F32;

/// Ticks are the atomic unit of simulated time (seconds in the stock catalogs).
pub type Ticks = u64;

/// Seconds per hour; converts `power_kw * dt` into kWh.
pub const SECONDS_PER_HOUR: u32 = 3600;

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display and export.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Convert an f64 to Fixed64, or `None` if it is NaN, infinite or out of
/// range.
#[inline]
pub fn checked_f64_to_fixed64(v: f64) -> Option<Fixed64> {
    Fixed64::checked_from_num(v)
}

/// Energy drawn by a load of `power_kw` over `dt` ticks, in kWh, or `None`
/// if it leaves the `Fixed64` range.
///
/// Multiplies before dividing so whole-hour spans stay exact.
#[inline]
pub fn energy_kwh(power_kw: Fixed64, dt: Ticks) -> Option<Fixed64> {
    if power_kw == Fixed64::ZERO {
        return Some(Fixed64::ZERO);
    }
    power_kw
        .checked_mul(Fixed64::checked_from_num(dt)?)?
        .checked_div(Fixed64::from_num(SECONDS_PER_HOUR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed64_basic_arithmetic() {
        let a = f64_to_fixed64(1.5);
        let b = f64_to_fixed64(2.0);
        assert_eq!(fixed64_to_f64(a + b), 3.5);
    }

    #[test]
    fn fixed64_multiplication() {
        let a = f64_to_fixed64(4.0);
        let b = f64_to_fixed64(3.0);
        assert_eq!(fixed64_to_f64(a * b), 12.0);
    }

    #[test]
    fn energy_for_one_hour_is_exact() {
        let kwh = energy_kwh(Fixed64::from_num(45), 3600);
        assert_eq!(kwh, Some(Fixed64::from_num(45)));
    }

    #[test]
    fn energy_for_one_second_is_close() {
        let kwh = fixed64_to_f64(energy_kwh(Fixed64::from_num(36), 1).unwrap());
        assert!((kwh - 0.01).abs() < 1e-8, "got {kwh}");
    }

    #[test]
    fn energy_out_of_range_is_none() {
        assert_eq!(energy_kwh(Fixed64::MAX, 3600), None);
        assert_eq!(energy_kwh(Fixed64::ONE, u64::MAX), None);
        assert_eq!(energy_kwh(Fixed64::ZERO, u64::MAX), Some(Fixed64::ZERO));
    }

    #[test]
    fn checked_conversion_rejects_out_of_range() {
        assert_eq!(checked_f64_to_fixed64(2.5), Some(Fixed64::from_num(2.5)));
        assert_eq!(checked_f64_to_fixed64(3e9), None);
        assert_eq!(checked_f64_to_fixed64(f64::NAN), None);
    }
}

//! IEEE-754 double arithmetic under the four programmable rounding modes,
//! computed in software from the round-to-nearest result and its exact
//! error term.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    Nearest = 0,
    Down = 1,
    Up = 2,
    Zero = 3,
}

impl Default for RoundingMode {
    fn default() -> RoundingMode {
        RoundingMode::Nearest
    }
}

impl RoundingMode {
    pub fn from_bits(bits: u64) -> RoundingMode {
        match bits & 3 {
            0 => RoundingMode::Nearest,
            1 => RoundingMode::Down,
            2 => RoundingMode::Up,
            _ => RoundingMode::Zero,
        }
    }

    /// MXCSR value for this mode with all exceptions masked, flush to zero
    /// and denormals are zero set.
    pub fn mxcsr(self) -> u32 {
        0x9FC0 | (self as u32) << 13
    }
}

fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

/// Moves the nearest-rounded `r` one ulp in the direction required by
/// `mode`, given the sign of `exact - r`.
fn adjust(r: f64, err_sign: i32, mode: RoundingMode) -> f64 {
    if err_sign == 0 || mode == RoundingMode::Nearest {
        return r;
    }
    match mode {
        RoundingMode::Up if err_sign > 0 => next_up(r),
        RoundingMode::Down if err_sign < 0 => next_down(r),
        RoundingMode::Zero if err_sign > 0 && r < 0.0 => next_up(r),
        RoundingMode::Zero if err_sign < 0 && r > 0.0 => next_down(r),
        _ => r,
    }
}

fn overflow(r: f64, mode: RoundingMode) -> f64 {
    match mode {
        RoundingMode::Nearest => r,
        RoundingMode::Zero => f64::MAX.copysign(r),
        RoundingMode::Up if r < 0.0 => -f64::MAX,
        RoundingMode::Down if r > 0.0 => f64::MAX,
        _ => r,
    }
}

fn sign_of(x: f64) -> i32 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

pub fn add(a: f64, b: f64, mode: RoundingMode) -> f64 {
    let s = a + b;
    if s.is_infinite() && a.is_finite() && b.is_finite() {
        return overflow(s, mode);
    }
    if !s.is_finite() {
        return s;
    }
    if s == 0.0 {
        //exact cancellation is -0 when rounding down, unless both operands are +0
        if mode == RoundingMode::Down && (a != 0.0 || a.is_sign_negative() || b.is_sign_negative()) {
            return -0.0;
        }
        return s;
    }
    let bb = s - a;
    let err = (a - (s - bb)) + (b - bb);
    adjust(s, sign_of(err), mode)
}

pub fn sub(a: f64, b: f64, mode: RoundingMode) -> f64 {
    add(a, -b, mode)
}

pub fn mul(a: f64, b: f64, mode: RoundingMode) -> f64 {
    let p = a * b;
    if p.is_infinite() && a.is_finite() && b.is_finite() {
        return overflow(p, mode);
    }
    if !p.is_finite() || p == 0.0 {
        return p;
    }
    let err = a.mul_add(b, -p);
    adjust(p, sign_of(err), mode)
}

pub fn div(a: f64, b: f64, mode: RoundingMode) -> f64 {
    let q = a / b;
    if q.is_infinite() && a.is_finite() && b != 0.0 {
        return overflow(q, mode);
    }
    if !q.is_finite() || q == 0.0 {
        return q;
    }
    let rem = (-q).mul_add(b, a);
    adjust(q, sign_of(rem) * sign_of(b), mode)
}

pub fn sqrt(a: f64, mode: RoundingMode) -> f64 {
    let s = a.sqrt();
    if !s.is_finite() || s == 0.0 {
        return s;
    }
    let rem = (-s).mul_add(s, a);
    adjust(s, sign_of(rem), mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [RoundingMode; 4] = [
        RoundingMode::Nearest,
        RoundingMode::Down,
        RoundingMode::Up,
        RoundingMode::Zero,
    ];

    #[test]
    fn test_exact_results_ignore_mode() {
        for &m in MODES.iter() {
            assert_eq!(add(1.5, 2.25, m), 3.75);
            assert_eq!(mul(3.0, -4.0, m), -12.0);
            assert_eq!(div(1.0, 4.0, m), 0.25);
            assert_eq!(sqrt(16.0, m), 4.0);
        }
    }

    #[test]
    fn test_inexact_add() {
        let tiny = f64::EPSILON / 4.0;
        assert_eq!(add(1.0, tiny, RoundingMode::Nearest), 1.0);
        assert_eq!(add(1.0, tiny, RoundingMode::Down), 1.0);
        assert_eq!(add(1.0, tiny, RoundingMode::Up), next_up(1.0));
        assert_eq!(add(1.0, tiny, RoundingMode::Zero), 1.0);
        assert_eq!(add(-1.0, -tiny, RoundingMode::Down), next_down(-1.0));
        assert_eq!(add(-1.0, -tiny, RoundingMode::Zero), -1.0);
        assert_eq!(sub(1.0, tiny, RoundingMode::Down), next_down(1.0));
    }

    #[test]
    fn test_division_directions() {
        let down = div(1.0, 3.0, RoundingMode::Down);
        let up = div(1.0, 3.0, RoundingMode::Up);
        assert_eq!(next_up(down), up);
        assert_eq!(div(1.0, 3.0, RoundingMode::Zero), down);
        assert_eq!(div(-1.0, 3.0, RoundingMode::Zero), -down);
        assert_eq!(div(-1.0, 3.0, RoundingMode::Down), -up);
        assert_eq!(div(1.0, -3.0, RoundingMode::Up), -down);
    }

    #[test]
    fn test_sqrt_and_mul_directions() {
        let down = sqrt(2.0, RoundingMode::Down);
        let up = sqrt(2.0, RoundingMode::Up);
        assert_eq!(next_up(down), up);
        assert_eq!(sqrt(2.0, RoundingMode::Zero), down);

        let a = 1.0 + f64::EPSILON;
        let down = mul(a, a, RoundingMode::Down);
        let up = mul(a, a, RoundingMode::Up);
        assert_eq!(next_up(down), up);
    }

    #[test]
    fn test_signed_zero() {
        assert!(add(1.0, -1.0, RoundingMode::Down).is_sign_negative());
        assert!(add(1.0, -1.0, RoundingMode::Up).is_sign_positive());
        assert!(add(0.0, 0.0, RoundingMode::Down).is_sign_positive());
        assert!(add(0.0, -0.0, RoundingMode::Down).is_sign_negative());
        assert!(sub(2.0, 2.0, RoundingMode::Zero).is_sign_positive());
    }

    #[test]
    fn test_overflow() {
        assert_eq!(add(f64::MAX, f64::MAX, RoundingMode::Zero), f64::MAX);
        assert_eq!(mul(f64::MAX, 2.0, RoundingMode::Down), f64::MAX);
        assert_eq!(mul(f64::MAX, 2.0, RoundingMode::Up), f64::INFINITY);
        assert_eq!(mul(f64::MAX, -2.0, RoundingMode::Up), -f64::MAX);
    }

    #[test]
    fn test_mxcsr() {
        assert_eq!(RoundingMode::Nearest.mxcsr(), 0x9FC0);
        assert_eq!(RoundingMode::Zero.mxcsr(), 0xFFC0);
        assert_eq!(RoundingMode::from_bits(6), RoundingMode::Up);
    }
}

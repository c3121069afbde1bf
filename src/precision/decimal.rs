//! Arbitrary-precision decimal floating point
//!
//! A value is `mantissa * 10^exponent` with an attached working precision in
//! significant digits. Arithmetic rounds half-even to the larger precision of
//! its operands; presentation rounding is the only place another mode applies.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::OnceLock;

/// Rounding policy applied at the presentation boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Banker's rounding: ties go to the even neighbour
    #[default]
    HalfEven,
    HalfUp,
    HalfDown,
    /// Toward zero
    Down,
    /// Away from zero
    Up,
    Floor,
    Ceiling,
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HalfEven => "half_even",
            Self::HalfUp => "half_up",
            Self::HalfDown => "half_down",
            Self::Down => "down",
            Self::Up => "up",
            Self::Floor => "floor",
            Self::Ceiling => "ceiling",
        };
        write!(f, "{name}")
    }
}

const POW10_TABLE_SIZE: usize = 320;

fn pow10(k: u64) -> BigUint {
    static TABLE: OnceLock<Vec<BigUint>> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut v = Vec::with_capacity(POW10_TABLE_SIZE);
        let mut p = BigUint::one();
        for _ in 0..POW10_TABLE_SIZE {
            v.push(p.clone());
            p *= 10u32;
        }
        v
    });
    match table.get(k as usize) {
        Some(p) => p.clone(),
        None => BigUint::from(10u32).pow(k as u32),
    }
}

fn digit_count(m: &BigUint) -> u64 {
    if m.is_zero() {
        return 1;
    }
    m.to_str_radix(10).len() as u64
}

/// Strip trailing zeros so every value has one canonical representation
fn canonical(mut mantissa: BigInt, mut exponent: i64) -> (BigInt, i64) {
    if mantissa.is_zero() {
        return (mantissa, 0);
    }
    let ten = BigInt::from(10u32);
    loop {
        let (q, r) = mantissa.div_rem(&ten);
        if !r.is_zero() {
            break;
        }
        mantissa = q;
        exponent += 1;
    }
    (mantissa, exponent)
}

fn round_parts(mantissa: BigInt, exponent: i64, prec: u32, mode: RoundingMode) -> (BigInt, i64) {
    if mantissa.is_zero() {
        return (mantissa, 0);
    }
    let prec = prec.max(1) as u64;
    let nd = digit_count(mantissa.magnitude());
    if nd <= prec {
        return canonical(mantissa, exponent);
    }
    let drop = nd - prec;
    let divisor = pow10(drop);
    let negative = mantissa.is_negative();
    let (mut q, r) = mantissa.magnitude().div_rem(&divisor);

    let increment = if r.is_zero() {
        false
    } else {
        match mode {
            RoundingMode::Down => false,
            RoundingMode::Up => true,
            RoundingMode::Floor => negative,
            RoundingMode::Ceiling => !negative,
            RoundingMode::HalfUp | RoundingMode::HalfDown | RoundingMode::HalfEven => {
                let twice: BigUint = &r << 1usize;
                match twice.cmp(&divisor) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => match mode {
                        RoundingMode::HalfUp => true,
                        RoundingMode::HalfDown => false,
                        _ => q.is_odd(),
                    },
                }
            }
        }
    };
    if increment {
        q += 1u32;
    }
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    canonical(BigInt::from_biguint(sign, q), exponent + drop as i64)
}

/// Arbitrary-precision decimal value
#[derive(Clone)]
pub struct Decimal {
    mantissa: BigInt,
    exponent: i64,
    prec: u32,
}

impl Decimal {
    // =========================================================================
    // CONSTRUCTION
    // =========================================================================

    /// Build from raw parts, rounding half-even to `prec` digits
    pub fn from_parts(mantissa: BigInt, exponent: i64, prec: u32) -> Self {
        let (mantissa, exponent) = round_parts(mantissa, exponent, prec, RoundingMode::HalfEven);
        Self {
            mantissa,
            exponent,
            prec: prec.max(1),
        }
    }

    pub fn zero(prec: u32) -> Self {
        Self {
            mantissa: BigInt::zero(),
            exponent: 0,
            prec: prec.max(1),
        }
    }

    pub fn one(prec: u32) -> Self {
        Self::from_i64(1, prec)
    }

    pub fn from_i64(value: i64, prec: u32) -> Self {
        Self::from_parts(BigInt::from(value), 0, prec)
    }

    pub fn from_u64(value: u64, prec: u32) -> Self {
        Self::from_parts(BigInt::from(value), 0, prec)
    }

    pub fn from_bigint(value: BigInt, prec: u32) -> Self {
        Self::from_parts(value, 0, prec)
    }

    /// Exact conversion of the shortest decimal that round-trips `value`
    ///
    /// `0.1_f64` becomes exactly `0.1`, not the binary expansion. Returns
    /// `None` for NaN and infinities.
    pub fn from_f64(value: f64, prec: u32) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        if value == 0.0 {
            return Some(Self::zero(prec));
        }
        Self::parse(&format!("{value:e}"), prec)
    }

    /// Parse plain or scientific decimal notation
    pub fn parse(text: &str, prec: u32) -> Option<Self> {
        let text = text.trim();
        let (body, exp_part) = match text.find(|c: char| c == 'e' || c == 'E') {
            Some(pos) => (&text[..pos], Some(&text[pos + 1..])),
            None => (text, None),
        };
        let (negative, digits) = match body.as_bytes().first()? {
            b'-' => (true, &body[1..]),
            b'+' => (false, &body[1..]),
            _ => (false, body),
        };
        let (int_part, frac_part) = match digits.find('.') {
            Some(pos) => (&digits[..pos], &digits[pos + 1..]),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let mut exponent: i64 = match exp_part {
            Some(e) => e.parse().ok()?,
            None => 0,
        };
        exponent -= frac_part.len() as i64;
        let all_digits = format!("{int_part}{frac_part}");
        let magnitude = BigUint::parse_bytes(all_digits.as_bytes(), 10)?;
        let sign = if negative { Sign::Minus } else { Sign::Plus };
        Some(Self::from_parts(
            BigInt::from_biguint(sign, magnitude),
            exponent,
            prec,
        ))
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    pub fn prec(&self) -> u32 {
        self.prec
    }

    pub fn mantissa(&self) -> &BigInt {
        &self.mantissa
    }

    pub fn exponent(&self) -> i64 {
        self.exponent
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa.is_negative()
    }

    pub fn is_positive(&self) -> bool {
        self.mantissa.is_positive()
    }

    pub fn signum(&self) -> i32 {
        if self.mantissa.is_zero() {
            0
        } else if self.mantissa.is_negative() {
            -1
        } else {
            1
        }
    }

    /// Number of significant digits in the stored mantissa
    pub fn significant_digits(&self) -> u32 {
        digit_count(self.mantissa.magnitude()) as u32
    }

    /// Exponent of the leading digit: `floor(log10(|x|))`
    pub fn adjusted_exponent(&self) -> i64 {
        self.exponent + digit_count(self.mantissa.magnitude()) as i64 - 1
    }

    pub fn is_integer(&self) -> bool {
        self.exponent >= 0 || self.mantissa.is_zero()
    }

    pub fn to_f64(&self) -> f64 {
        if self.is_zero() {
            return 0.0;
        }
        format!("{}e{}", self.mantissa, self.exponent)
            .parse()
            .unwrap_or(f64::NAN)
    }

    /// Exact integer value, if this is an integer that fits
    pub fn to_i64(&self) -> Option<i64> {
        if !self.is_integer() {
            return None;
        }
        if self.exponent > 18 {
            return None;
        }
        let scaled = &self.mantissa * BigInt::from_biguint(Sign::Plus, pow10(self.exponent as u64));
        scaled.to_i64()
    }

    // =========================================================================
    // PRECISION & ROUNDING
    // =========================================================================

    /// Same value carried at a different working precision
    pub fn with_prec(&self, prec: u32) -> Self {
        Self::from_parts(self.mantissa.clone(), self.exponent, prec)
    }

    /// Round to `digits` significant digits with an explicit mode
    pub fn round_sig(&self, digits: u32, mode: RoundingMode) -> Self {
        let (mantissa, exponent) = round_parts(self.mantissa.clone(), self.exponent, digits, mode);
        Self {
            mantissa,
            exponent,
            prec: self.prec,
        }
    }

    /// Largest integer not greater than self
    pub fn floor(&self) -> Self {
        if self.exponent >= 0 {
            return self.clone();
        }
        let divisor = BigInt::from_biguint(Sign::Plus, pow10((-self.exponent) as u64));
        let q = self.mantissa.div_floor(&divisor);
        let (mantissa, exponent) = canonical(q, 0);
        Self {
            mantissa,
            exponent,
            prec: self.prec,
        }
    }

    pub fn abs(&self) -> Self {
        Self {
            mantissa: self.mantissa.abs(),
            exponent: self.exponent,
            prec: self.prec,
        }
    }

    /// Exact multiplication by a power of ten
    pub fn mul_pow10(&self, k: i64) -> Self {
        if self.is_zero() {
            return self.clone();
        }
        Self {
            mantissa: self.mantissa.clone(),
            exponent: self.exponent + k,
            prec: self.prec,
        }
    }

    /// Exact halving (x * 5 / 10), then rounded to the working precision
    pub fn half(&self) -> Self {
        Self::from_parts(&self.mantissa * 5, self.exponent - 1, self.prec)
    }

    /// Square root rounded to the working precision; `None` for negatives
    pub fn sqrt(&self) -> Option<Self> {
        if self.is_negative() {
            return None;
        }
        if self.is_zero() {
            return Some(self.clone());
        }
        let p = self.prec as i64;
        let nd = digit_count(self.mantissa.magnitude()) as i64;
        let mut shift = (2 * p + 2 - nd).max(0);
        if (self.exponent - shift).rem_euclid(2) != 0 {
            shift += 1;
        }
        let n = self.mantissa.magnitude() * pow10(shift as u64);
        let root = n.sqrt();
        let exact = &root * &root == n;
        let mut mantissa = BigInt::from_biguint(Sign::Plus, root);
        let mut exponent = (self.exponent - shift) / 2;
        if !exact {
            // sticky digit keeps half-even rounding honest
            mantissa = mantissa * 10 + 1;
            exponent -= 1;
        }
        Some(Self::from_parts(mantissa, exponent, self.prec))
    }

    /// Integer power by repeated squaring
    pub fn powi(&self, n: i64) -> Self {
        let prec = self.prec;
        if n == 0 {
            return Self::one(prec);
        }
        let mut base = self.with_prec(prec + 2);
        let mut acc = Self::one(prec + 2);
        let mut k = n.unsigned_abs();
        while k > 0 {
            if k & 1 == 1 {
                acc = &acc * &base;
            }
            k >>= 1;
            if k > 0 {
                base = &base * &base;
            }
        }
        let result = if n < 0 { &Self::one(prec + 2) / &acc } else { acc };
        result.with_prec(prec)
    }

    // =========================================================================
    // PRESENTATION
    // =========================================================================

    /// Plain notation for moderate magnitudes, scientific otherwise
    fn render(&self) -> String {
        if self.is_zero() {
            return "0".to_string();
        }
        let digits = self.mantissa.magnitude().to_str_radix(10);
        render_parts(self.is_negative(), digits, self.exponent)
    }

    /// Round to `digits` significant digits and render
    pub fn to_sig_string(&self, digits: u32, mode: RoundingMode) -> String {
        self.round_sig(digits, mode).render()
    }

    /// Like [`Decimal::to_sig_string`] but a fractional value keeps its
    /// trailing zeros, so exactly `digits` significant digits are written
    pub fn to_fixed_sig_string(&self, digits: u32, mode: RoundingMode) -> String {
        let rounded = self.round_sig(digits, mode);
        if rounded.is_zero() || rounded.is_integer() {
            return rounded.render();
        }
        let mut shown = rounded.mantissa.magnitude().to_str_radix(10);
        let pad = (digits as usize).saturating_sub(shown.len());
        shown.push_str(&"0".repeat(pad));
        render_parts(rounded.is_negative(), shown, rounded.exponent - pad as i64)
    }
}

/// Significant digits written in a decimal literal, trailing zeros included
pub fn written_digits(text: &str) -> u32 {
    let significand = text.split(['e', 'E']).next().unwrap_or("");
    let count = significand
        .chars()
        .filter(char::is_ascii_digit)
        .skip_while(|&c| c == '0')
        .count();
    count.max(1) as u32
}

fn render_parts(negative: bool, digits: String, exponent: i64) -> String {
    let nd = digits.len() as i64;
    let adjusted = exponent + nd - 1;
    let sign = if negative { "-" } else { "" };

    if exponent >= 0 && adjusted < 21 {
        return format!("{sign}{digits}{}", "0".repeat(exponent as usize));
    }
    if exponent < 0 && adjusted >= -7 {
        let point = nd + exponent;
        return if point > 0 {
            let (head, tail) = digits.split_at(point as usize);
            format!("{sign}{head}.{tail}")
        } else {
            format!("{sign}0.{}{digits}", "0".repeat((-point) as usize))
        };
    }
    let (lead, rest) = digits.split_at(1);
    if rest.is_empty() {
        format!("{sign}{lead}e{adjusted}")
    } else {
        format!("{sign}{lead}.{rest}e{adjusted}")
    }
}

// =============================================================================
// ARITHMETIC
// =============================================================================

fn aligned(a: &Decimal, b: &Decimal) -> (BigInt, BigInt, i64) {
    let e = a.exponent.min(b.exponent);
    let ma = &a.mantissa * BigInt::from_biguint(Sign::Plus, pow10((a.exponent - e) as u64));
    let mb = &b.mantissa * BigInt::from_biguint(Sign::Plus, pow10((b.exponent - e) as u64));
    (ma, mb, e)
}

fn add_impl(a: &Decimal, b: &Decimal) -> Decimal {
    let prec = a.prec.max(b.prec);
    if a.is_zero() {
        return b.with_prec(prec);
    }
    if b.is_zero() {
        return a.with_prec(prec);
    }
    // An operand below the last retained digit cannot change the rounded sum
    let gap = a.adjusted_exponent() - b.adjusted_exponent();
    if gap > prec as i64 + 2 {
        return a.with_prec(prec);
    }
    if -gap > prec as i64 + 2 {
        return b.with_prec(prec);
    }
    let (ma, mb, e) = aligned(a, b);
    Decimal::from_parts(ma + mb, e, prec)
}

fn sub_impl(a: &Decimal, b: &Decimal) -> Decimal {
    add_impl(a, &-b)
}

fn mul_impl(a: &Decimal, b: &Decimal) -> Decimal {
    let prec = a.prec.max(b.prec);
    Decimal::from_parts(&a.mantissa * &b.mantissa, a.exponent + b.exponent, prec)
}

fn div_impl(a: &Decimal, b: &Decimal) -> Decimal {
    assert!(!b.is_zero(), "decimal division by zero");
    let prec = a.prec.max(b.prec);
    if a.is_zero() {
        return Decimal::zero(prec);
    }
    let na = digit_count(a.mantissa.magnitude()) as i64;
    let nb = digit_count(b.mantissa.magnitude()) as i64;
    let shift = (prec as i64 + 2 + nb - na).max(0);
    let numerator = &a.mantissa * BigInt::from_biguint(Sign::Plus, pow10(shift as u64));
    let (mut q, r) = numerator.div_rem(&b.mantissa);
    let mut exponent = a.exponent - b.exponent - shift;
    if !r.is_zero() {
        // sticky digit in the direction of the true quotient
        let sticky = if (r.is_negative()) != (b.mantissa.is_negative()) { -1 } else { 1 };
        q = q * 10 + sticky;
        exponent -= 1;
    }
    Decimal::from_parts(q, exponent, prec)
}

macro_rules! forward_binop {
    ($imp:ident, $method:ident, $func:ident) => {
        impl $imp<&Decimal> for &Decimal {
            type Output = Decimal;
            fn $method(self, rhs: &Decimal) -> Decimal {
                $func(self, rhs)
            }
        }
        impl $imp<Decimal> for Decimal {
            type Output = Decimal;
            fn $method(self, rhs: Decimal) -> Decimal {
                $func(&self, &rhs)
            }
        }
        impl $imp<&Decimal> for Decimal {
            type Output = Decimal;
            fn $method(self, rhs: &Decimal) -> Decimal {
                $func(&self, rhs)
            }
        }
        impl $imp<Decimal> for &Decimal {
            type Output = Decimal;
            fn $method(self, rhs: Decimal) -> Decimal {
                $func(self, &rhs)
            }
        }
        impl $imp<i64> for &Decimal {
            type Output = Decimal;
            fn $method(self, rhs: i64) -> Decimal {
                $func(self, &Decimal::from_i64(rhs, self.prec))
            }
        }
        impl $imp<i64> for Decimal {
            type Output = Decimal;
            fn $method(self, rhs: i64) -> Decimal {
                $func(&self, &Decimal::from_i64(rhs, self.prec))
            }
        }
    };
}

forward_binop!(Add, add, add_impl);
forward_binop!(Sub, sub, sub_impl);
forward_binop!(Mul, mul, mul_impl);
forward_binop!(Div, div, div_impl);

impl Neg for &Decimal {
    type Output = Decimal;
    fn neg(self) -> Decimal {
        Decimal {
            mantissa: -&self.mantissa,
            exponent: self.exponent,
            prec: self.prec,
        }
    }
}

impl Neg for Decimal {
    type Output = Decimal;
    fn neg(self) -> Decimal {
        Decimal {
            mantissa: -self.mantissa,
            exponent: self.exponent,
            prec: self.prec,
        }
    }
}

// =============================================================================
// ORDERING (by value; working precision is ignored)
// =============================================================================

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (sa, sb) = (self.signum(), other.signum());
        if sa != sb {
            return sa.cmp(&sb);
        }
        if sa == 0 {
            return Ordering::Equal;
        }
        let (ea, eb) = (self.adjusted_exponent(), other.adjusted_exponent());
        if ea != eb {
            let by_magnitude = ea.cmp(&eb);
            return if sa > 0 { by_magnitude } else { by_magnitude.reverse() };
        }
        let (ma, mb, _) = aligned(self, other);
        ma.cmp(&mb)
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({} @{})", self.render(), self.prec)
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let parsed = Decimal::parse(&text, u32::MAX)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid decimal: {text}")))?;
        let prec = parsed.significant_digits().max(1);
        Ok(parsed.with_prec(prec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::parse(s, 30).unwrap()
    }

    #[test]
    fn test_parse_and_render() {
        assert_eq!(d("123.4500").to_string(), "123.45");
        assert_eq!(d("-0.000123").to_string(), "-0.000123");
        assert_eq!(d("1.5e-12").to_string(), "1.5e-12");
        assert_eq!(d("2E3").to_string(), "2000");
        assert_eq!(d("0").to_string(), "0");
        assert!(Decimal::parse("1.2.3", 10).is_none());
        assert!(Decimal::parse("abc", 10).is_none());
    }

    #[test]
    fn test_fixed_sig_string_keeps_trailing_zeros() {
        let mode = RoundingMode::HalfEven;
        assert_eq!(d("0.23019964108").to_fixed_sig_string(12, mode), "0.230199641080");
        assert_eq!(d("-2.5").to_fixed_sig_string(4, mode), "-2.500");
        assert_eq!(d("1.5e-12").to_fixed_sig_string(3, mode), "1.50e-12");
        assert_eq!(d("27").to_fixed_sig_string(20, mode), "27");
        assert_eq!(d("0.125").to_fixed_sig_string(2, mode), "0.12");
        assert_eq!(written_digits("0.230199641080"), 12);
        assert_eq!(written_digits("-1.50e-12"), 3);
        assert_eq!(written_digits("0"), 1);
    }

    #[test]
    fn test_from_f64_is_shortest_decimal() {
        let x = Decimal::from_f64(0.1, 30).unwrap();
        assert_eq!(x, d("0.1"));
        assert!(Decimal::from_f64(f64::NAN, 30).is_none());
        assert_eq!(Decimal::from_f64(-2.5e-8, 30).unwrap().to_string(), "-2.5e-8");
    }

    #[test]
    fn test_arithmetic_exact_when_possible() {
        assert_eq!(&d("0.1") + &d("0.2"), d("0.3"));
        assert_eq!(&d("1.5") * &d("-4"), d("-6"));
        assert_eq!(&d("1") - &d("1"), Decimal::zero(30));
    }

    #[test]
    fn test_division_rounds_half_even() {
        let third = &Decimal::one(10) / &Decimal::from_i64(3, 10);
        assert_eq!(third.to_string(), "0.3333333333");
        let two_thirds = &Decimal::from_i64(2, 10) / &Decimal::from_i64(3, 10);
        assert_eq!(two_thirds.to_string(), "0.6666666667");
    }

    #[test]
    fn test_presentation_rounding_modes() {
        let x = d("2.5");
        assert_eq!(x.to_sig_string(1, RoundingMode::HalfEven), "2");
        assert_eq!(x.to_sig_string(1, RoundingMode::HalfUp), "3");
        assert_eq!(x.to_sig_string(1, RoundingMode::HalfDown), "2");
        let y = d("-2.1");
        assert_eq!(y.to_sig_string(1, RoundingMode::Floor), "-3");
        assert_eq!(y.to_sig_string(1, RoundingMode::Ceiling), "-2");
        assert_eq!(y.to_sig_string(1, RoundingMode::Up), "-3");
        assert_eq!(y.to_sig_string(1, RoundingMode::Down), "-2");
    }

    #[test]
    fn test_sqrt() {
        let two = Decimal::from_i64(2, 40);
        let root = two.sqrt().unwrap();
        assert_eq!(
            root.to_sig_string(30, RoundingMode::HalfEven),
            "1.41421356237309504880168872421"
        );
        assert_eq!(d("0.0625").sqrt().unwrap(), d("0.25"));
        assert!(d("-1").sqrt().is_none());
    }

    #[test]
    fn test_ordering_ignores_precision() {
        let a = Decimal::from_i64(5, 3);
        let b = Decimal::from_i64(5, 40);
        assert_eq!(a, b);
        assert!(d("-3") < d("-2.5"));
        assert!(d("1e-30") > Decimal::zero(5));
        assert!(d("999") < d("1000"));
    }

    #[test]
    fn test_negligible_addend_keeps_precision_bounded() {
        let big = Decimal::one(20);
        let tiny = d("1e-500");
        assert_eq!(&big + &tiny, big);
    }

    #[test]
    fn test_powi_and_floor() {
        assert_eq!(d("1.1").powi(2), d("1.21"));
        assert_eq!(d("2").powi(-2), d("0.25"));
        assert_eq!(d("-2.5").floor(), d("-3"));
        assert_eq!(d("7.9").floor().to_i64(), Some(7));
    }

    #[test]
    fn test_serde_as_string() {
        let x = d("0.34659350708733");
        let json = serde_json::to_string(&x).unwrap();
        assert_eq!(json, "\"0.34659350708733\"");
        let back: Decimal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, x);
    }
}

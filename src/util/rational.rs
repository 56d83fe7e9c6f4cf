//! Rational numbers for frame rates and track time bases

use std::fmt;

/// A rational number represented as numerator/denominator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    /// Create a new rational number, reduced to lowest terms
    pub fn new(num: i64, den: i64) -> Self {
        let mut r = Rational { num, den };
        r.reduce();
        r
    }

    /// Create a rational from an integer
    pub fn from_int(n: i64) -> Self {
        Rational { num: n, den: 1 }
    }

    /// Convert to floating point
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// True if the value is exactly zero
    pub fn is_zero(self) -> bool {
        self.num == 0
    }

    /// Invert the rational number
    pub fn invert(self) -> Self {
        Rational::new(self.den, self.num)
    }

    fn reduce(&mut self) {
        if self.den == 0 {
            return;
        }

        let gcd = Self::gcd(self.num.abs(), self.den.abs());
        if gcd > 1 {
            self.num /= gcd;
            self.den /= gcd;
        }

        // Keep the denominator positive
        if self.den < 0 {
            self.num = -self.num;
            self.den = -self.den;
        }
    }

    fn gcd(mut a: i64, mut b: i64) -> i64 {
        while b != 0 {
            let t = b;
            b = a % b;
            a = t;
        }
        a
    }
}

impl Default for Rational {
    fn default() -> Self {
        Rational { num: 0, den: 1 }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction() {
        let r = Rational::new(24000, 1001000);
        assert_eq!(r.num, 24);
        assert_eq!(r.den, 1001);
    }

    #[test]
    fn test_negative_denominator() {
        let r = Rational::new(1, -2);
        assert_eq!(r.num, -1);
        assert_eq!(r.den, 2);
    }

    #[test]
    fn test_to_f64() {
        assert_eq!(Rational::new(1, 4).to_f64(), 0.25);
        assert_eq!(Rational::new(5, 0).to_f64(), 0.0);
    }
}

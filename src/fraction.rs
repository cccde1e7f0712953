use std::fmt;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Fraction used for timing settings
///
/// Frame intervals are expressed in seconds, so 30 frames per second is `1/30`.
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    /// Returns a fraction representation
    ///
    /// # Arguments
    ///
    /// * `num` - Numerator
    /// * `denom` - Denominator
    ///
    /// # Example
    ///
    /// ```
    /// use uvccam::Fraction;
    /// let frac = Fraction::new(1, 30);
    /// ```
    pub fn new(num: u32, denom: u32) -> Self {
        Fraction {
            numerator: num,
            denominator: denom,
        }
    }

    /// Frame interval of a given frame rate
    pub fn from_fps(fps: u32) -> Self {
        Fraction::new(1, fps.max(1))
    }

    /// Frames per second described by this interval, rounded to the nearest integer.
    ///
    /// Returns 0 for degenerate intervals.
    pub fn fps(&self) -> u32 {
        if self.numerator == 0 || self.denominator == 0 {
            return 0;
        }

        ((self.denominator as f64 / self.numerator as f64) + 0.5) as u32
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[cfg(feature = "v4l2")]
impl From<v4l2_sys::v4l2_fract> for Fraction {
    fn from(frac: v4l2_sys::v4l2_fract) -> Self {
        Self {
            numerator: frac.numerator,
            denominator: frac.denominator,
        }
    }
}

#[cfg(feature = "v4l2")]
impl From<Fraction> for v4l2_sys::v4l2_fract {
    fn from(fraction: Fraction) -> Self {
        Self {
            numerator: fraction.numerator,
            denominator: fraction.denominator,
        }
    }
}

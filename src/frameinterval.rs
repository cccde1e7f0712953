use std::fmt;

use crate::{fourcc::FourCC, fraction::Fraction};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Frame interval description as returned by VIDIOC_ENUM_FRAMEINTERVALS
pub struct FrameInterval {
    pub index: u32,
    pub fourcc: FourCC,
    pub width: u32,
    pub height: u32,
    pub interval: FrameIntervalEnum,
}

impl fmt::Display for FrameInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.interval.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameIntervalEnum {
    Discrete(Fraction),
    Stepwise(Stepwise),
}

impl FrameIntervalEnum {
    /// Whole frame rates covered by this interval, fastest first for ranges
    pub fn to_fps(&self) -> Vec<u32> {
        match self {
            Self::Discrete(frac) => match frac.fps() {
                0 => Vec::new(),
                fps => vec![fps],
            },
            Self::Stepwise(stepwise) => {
                // the shortest interval is the highest rate
                let fastest = stepwise.min.fps();
                let slowest = stepwise.max.fps().max(1);
                if fastest == 0 {
                    return Vec::new();
                }

                (slowest.min(fastest)..=fastest).rev().collect()
            }
        }
    }
}

impl fmt::Display for FrameIntervalEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameIntervalEnum::Discrete(val) => write!(f, "Discrete({})", val)?,
            FrameIntervalEnum::Stepwise(val) => write!(f, "Stepwise({})", val)?,
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stepwise {
    /// Minimum frame interval (in seconds).
    pub min: Fraction,
    /// Maximum frame interval (in seconds).
    pub max: Fraction,
    /// Frame interval step size (in seconds).
    pub step: Fraction,
}

impl fmt::Display for Stepwise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} with step {}", self.min, self.max, self.step)?;
        Ok(())
    }
}

#[cfg(feature = "v4l2")]
impl TryFrom<v4l2_sys::v4l2_frmivalenum> for FrameInterval {
    type Error = String;

    fn try_from(desc: v4l2_sys::v4l2_frmivalenum) -> Result<Self, Self::Error> {
        use v4l2_sys::*;

        let interval = unsafe {
            // Unsafe because of access to union __bindgen_anon_1
            match desc.type_ {
                v4l2_frmivaltypes_V4L2_FRMIVAL_TYPE_DISCRETE => {
                    FrameIntervalEnum::Discrete(Fraction::from(desc.__bindgen_anon_1.discrete))
                }
                v4l2_frmivaltypes_V4L2_FRMIVAL_TYPE_CONTINUOUS
                | v4l2_frmivaltypes_V4L2_FRMIVAL_TYPE_STEPWISE => {
                    FrameIntervalEnum::Stepwise(Stepwise {
                        min: Fraction::from(desc.__bindgen_anon_1.stepwise.min),
                        max: Fraction::from(desc.__bindgen_anon_1.stepwise.max),
                        step: Fraction::from(desc.__bindgen_anon_1.stepwise.step),
                    })
                }
                typ => return Err(format!("Unknown frame interval type: {}", typ)),
            }
        };

        Ok(FrameInterval {
            index: desc.index,
            fourcc: FourCC::from(desc.pixel_format),
            width: desc.width,
            height: desc.height,
            interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_interval_rate() {
        let interval = FrameIntervalEnum::Discrete(Fraction::new(1, 15));
        assert_eq!(interval.to_fps(), vec![15]);
    }

    #[test]
    fn stepwise_interval_rates() {
        let interval = FrameIntervalEnum::Stepwise(Stepwise {
            min: Fraction::new(1, 30),
            max: Fraction::new(1, 25),
            step: Fraction::new(1, 1),
        });
        assert_eq!(interval.to_fps(), vec![30, 29, 28, 27, 26, 25]);
    }
}

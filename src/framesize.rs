use std::fmt;

use crate::fourcc::FourCC;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Frame size description as returned by VIDIOC_ENUM_FRAMESIZES
pub struct FrameSize {
    pub index: u32,
    pub fourcc: FourCC,
    pub size: FrameSizeEnum,
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.size.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSizeEnum {
    Discrete(Discrete),
    Stepwise(Stepwise),
}

impl FrameSizeEnum {
    /// Expands the size into every discrete resolution it describes
    ///
    /// Continuous ranges report a step of 1 which would produce millions of entries, so the grid
    /// is coarsened to at most 64 steps per axis while always keeping both endpoints.
    pub fn to_discrete(&self) -> Vec<Discrete> {
        match self {
            Self::Discrete(discrete) => vec![*discrete],
            Self::Stepwise(stepwise) => {
                let widths = axis(stepwise.min_width, stepwise.max_width, stepwise.step_width);
                let heights = axis(stepwise.min_height, stepwise.max_height, stepwise.step_height);

                let mut discrete = Vec::with_capacity(widths.len() * heights.len());
                for &width in &widths {
                    for &height in &heights {
                        discrete.push(Discrete { width, height });
                    }
                }

                discrete
            }
        }
    }
}

fn axis(min: u32, max: u32, step: u32) -> Vec<u32> {
    const MAX_STEPS: u32 = 64;

    if max <= min {
        return vec![min];
    }

    let step = step.max(1).max((max - min) / MAX_STEPS);
    let mut values: Vec<u32> = (min..=max).step_by(step as usize).collect();
    if values.last() != Some(&max) {
        values.push(max);
    }
    values
}

impl fmt::Display for FrameSizeEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSizeEnum::Discrete(val) => write!(f, "Discrete({})", val)?,
            FrameSizeEnum::Stepwise(val) => write!(f, "Stepwise({})", val)?,
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Discrete {
    /// Width of the frame (in pixels).
    pub width: u32,
    /// Height of the frame (in pixels).
    pub height: u32,
}

impl Discrete {
    pub fn new(width: u32, height: u32) -> Self {
        Discrete { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Discrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stepwise {
    /// Minimum frame width (in pixels).
    pub min_width: u32,
    /// Maximum frame width (in pixels).
    pub max_width: u32,
    /// Frame width step size (in pixels).
    pub step_width: u32,
    /// Minimum frame height (in pixels).
    pub min_height: u32,
    /// Maximum frame height (in pixels).
    pub max_height: u32,
    /// Frame height step size (in pixels).
    pub step_height: u32,
}

impl fmt::Display for Stepwise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} - {}x{} with step {}/{}",
            self.min_width,
            self.min_height,
            self.max_width,
            self.max_height,
            self.step_width,
            self.step_height,
        )?;
        Ok(())
    }
}

#[cfg(feature = "v4l2")]
impl TryFrom<v4l2_sys::v4l2_frmsizeenum> for FrameSize {
    type Error = String;

    fn try_from(desc: v4l2_sys::v4l2_frmsizeenum) -> Result<Self, Self::Error> {
        use v4l2_sys::*;

        let size = unsafe {
            // Unsafe because of access to union __bindgen_anon_1
            match desc.type_ {
                v4l2_frmsizetypes_V4L2_FRMSIZE_TYPE_DISCRETE => FrameSizeEnum::Discrete(Discrete {
                    width: desc.__bindgen_anon_1.discrete.width,
                    height: desc.__bindgen_anon_1.discrete.height,
                }),
                v4l2_frmsizetypes_V4L2_FRMSIZE_TYPE_STEPWISE
                | v4l2_frmsizetypes_V4L2_FRMSIZE_TYPE_CONTINUOUS => {
                    FrameSizeEnum::Stepwise(Stepwise {
                        min_width: desc.__bindgen_anon_1.stepwise.min_width,
                        max_width: desc.__bindgen_anon_1.stepwise.max_width,
                        step_width: desc.__bindgen_anon_1.stepwise.step_width,
                        min_height: desc.__bindgen_anon_1.stepwise.min_height,
                        max_height: desc.__bindgen_anon_1.stepwise.max_height,
                        step_height: desc.__bindgen_anon_1.stepwise.step_height,
                    })
                }
                typ => return Err(format!("Unknown frame size type: {}", typ)),
            }
        };

        Ok(FrameSize {
            index: desc.index,
            fourcc: FourCC::from(desc.pixel_format),
            size,
        })
    }
}

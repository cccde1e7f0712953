//! Capability enumeration for a single negotiation.

use std::collections::HashMap;

use tracing::debug;

use crate::driver::Handle;
use crate::error::{Error, Result};
use crate::format::Description;
use crate::fourcc::FourCC;
use crate::framesize::Discrete;

/// Caches what a device advertises
///
/// Each query hits the driver once, later calls with the same arguments are answered from
/// memory. A catalog lives for one negotiation, so it never goes stale.
#[derive(Debug, Default)]
pub struct FormatCatalog {
    formats: Option<Vec<Description>>,
    sizes: HashMap<FourCC, Vec<Discrete>>,
    rates: HashMap<(FourCC, Discrete), Vec<u32>>,
}

impl FormatCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pixel formats in driver order
    ///
    /// Fails with [`Error::Enumeration`] when the driver reports nothing.
    pub fn formats(&mut self, handle: &Handle) -> Result<&[Description]> {
        if self.formats.is_none() {
            let formats = handle
                .driver()
                .enum_formats(handle.fd())
                .map_err(|e| Error::Enumeration(e.to_string()))?;
            if formats.is_empty() {
                return Err(Error::Enumeration(format!(
                    "{} advertises no capture formats",
                    handle.path().display()
                )));
            }

            debug!(
                device = %handle.path().display(),
                count = formats.len(),
                "enumerated formats"
            );
            self.formats = Some(formats);
        }

        Ok(self.formats.as_deref().unwrap_or_default())
    }

    /// Discrete frame sizes for a pixel format, stepwise ranges expanded
    ///
    /// A driver that cannot enumerate sizes yields an empty list.
    pub fn sizes(&mut self, handle: &Handle, fourcc: FourCC) -> &[Discrete] {
        self.sizes.entry(fourcc).or_insert_with(|| {
            match handle.driver().enum_framesizes(handle.fd(), fourcc) {
                Ok(sizes) => {
                    let mut discrete = Vec::new();
                    for size in sizes.iter().flat_map(|s| s.size.to_discrete()) {
                        if !discrete.contains(&size) {
                            discrete.push(size);
                        }
                    }
                    discrete
                }
                Err(e) => {
                    debug!(%fourcc, error = %e, "no frame sizes");
                    Vec::new()
                }
            }
        })
    }

    /// Whole frame rates for a pixel format and size, in driver order
    ///
    /// A driver that cannot enumerate intervals yields an empty list.
    pub fn rates(&mut self, handle: &Handle, fourcc: FourCC, size: Discrete) -> &[u32] {
        self.rates.entry((fourcc, size)).or_insert_with(|| {
            match handle
                .driver()
                .enum_frameintervals(handle.fd(), fourcc, size.width, size.height)
            {
                Ok(intervals) => {
                    let mut rates = Vec::new();
                    for fps in intervals.iter().flat_map(|i| i.interval.to_fps()) {
                        if !rates.contains(&fps) {
                            rates.push(fps);
                        }
                    }
                    rates
                }
                Err(e) => {
                    debug!(%fourcc, width = size.width, height = size.height, error = %e, "no frame intervals");
                    Vec::new()
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::driver::fake::{FakeDevice, FakeDriver};
    use crate::framesize::{FrameSizeEnum, Stepwise};

    fn handle(device: FakeDevice) -> (Arc<FakeDriver>, Handle) {
        let driver = Arc::new(FakeDriver::new().with_device("/dev/video0", device));
        let handle = Handle::open(driver.clone(), Path::new("/dev/video0")).unwrap();
        (driver, handle)
    }

    #[test]
    fn formats_in_driver_order() {
        let (_driver, handle) = handle(
            FakeDevice::new()
                .with_format(FourCC::MJPG, &[(1280, 720)], &[30])
                .with_format(FourCC::YUYV, &[(640, 480)], &[30]),
        );

        let mut catalog = FormatCatalog::new();
        let formats = catalog.formats(&handle).unwrap();
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].fourcc, FourCC::MJPG);
        assert!(formats[0].is_compressed());
        assert_eq!(formats[1].fourcc, FourCC::YUYV);
    }

    #[test]
    fn empty_enumeration_is_an_error() {
        let (_driver, handle) = handle(
            FakeDevice::new()
                .with_format(FourCC::YUYV, &[(640, 480)], &[30])
                .failing_enumeration(),
        );

        let mut catalog = FormatCatalog::new();
        assert!(matches!(
            catalog.formats(&handle),
            Err(Error::Enumeration(_))
        ));
    }

    #[test]
    fn sizes_and_rates() {
        let (_driver, handle) = handle(FakeDevice::new().with_format(
            FourCC::YUYV,
            &[(640, 480), (320, 240)],
            &[30, 15, 30],
        ));

        let mut catalog = FormatCatalog::new();
        assert_eq!(
            catalog.sizes(&handle, FourCC::YUYV),
            &[Discrete::new(640, 480), Discrete::new(320, 240)]
        );
        assert!(catalog.sizes(&handle, FourCC::MJPG).is_empty());
        assert_eq!(
            catalog.rates(&handle, FourCC::YUYV, Discrete::new(640, 480)),
            &[30, 15]
        );
    }

    #[test]
    fn stepwise_sizes_are_expanded() {
        let stepwise = FrameSizeEnum::Stepwise(Stepwise {
            min_width: 160,
            max_width: 640,
            step_width: 160,
            min_height: 120,
            max_height: 480,
            step_height: 120,
        });
        let (_driver, handle) =
            handle(FakeDevice::new().with_format_sizes(FourCC::YUYV, vec![stepwise], &[30]));

        let mut catalog = FormatCatalog::new();
        let sizes = catalog.sizes(&handle, FourCC::YUYV);
        assert_eq!(sizes.len(), 16);
        assert!(sizes.contains(&Discrete::new(640, 480)));
        assert!(sizes.contains(&Discrete::new(160, 120)));
    }
}

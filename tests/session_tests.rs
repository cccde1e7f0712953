//! Integration tests for a single capture session.

use std::sync::Arc;
use std::time::Duration;

use uvccam::driver::fake::{FakeDevice, FakeDriver, FakeFrame};
use uvccam::session::Tick;
use uvccam::{CaptureSession, Config, Error, FourCC, Requested, State};

const THRESHOLD: u32 = 10;

fn config() -> Config {
    Config::default()
        .with_dequeue_timeout(Duration::from_millis(1))
        .with_bad_frame_threshold(THRESHOLD)
}

fn start(device: FakeDevice, requested: Requested) -> (Arc<FakeDriver>, CaptureSession) {
    let driver = Arc::new(FakeDriver::new().with_device("/dev/video0", device));
    let mut session = CaptureSession::new(0, requested, driver.clone(), &config());
    session.open_and_start().unwrap();
    (driver, session)
}

#[test]
fn test_first_compressed_format_wins() {
    let device = FakeDevice::new()
        .with_format(FourCC::H264, &[(1920, 1080)], &[30])
        .with_format(FourCC::MJPG, &[(1920, 1080)], &[30]);
    let (_driver, session) = start(device, Requested::new(1920, 1080, 30));

    assert_eq!(session.state(), State::Streaming);
    let negotiated = session.negotiated().unwrap();
    assert_eq!(negotiated.fourcc, FourCC::H264);
    assert!(negotiated.compressed);
}

#[test]
fn test_preferred_format_wins() {
    let device = FakeDevice::new()
        .with_format(FourCC::MJPG, &[(640, 480)], &[30])
        .with_format(FourCC::YUYV, &[(640, 480)], &[30]);
    let (_driver, session) = start(device, Requested::new(640, 480, 30));
    assert_eq!(session.negotiated().unwrap().fourcc, FourCC::YUYV);

    let device = FakeDevice::new()
        .with_format(FourCC::MJPG, &[(640, 480)], &[30])
        .with_format(FourCC::YUYV, &[(640, 480)], &[30]);
    let driver = Arc::new(FakeDriver::new().with_device("/dev/video0", device));
    let config = config().with_preferred_format(FourCC::MJPG);
    let mut session = CaptureSession::new(0, Requested::new(640, 480, 30), driver, &config);
    assert_eq!(session.open_and_start().unwrap().fourcc, FourCC::MJPG);
}

#[test]
fn test_closest_size_and_rate() {
    let device = FakeDevice::new().with_format(
        FourCC::YUYV,
        &[(1280, 720), (640, 480), (320, 240)],
        &[30, 20, 10],
    );
    let (_driver, session) = start(device, Requested::new(700, 500, 15));

    let negotiated = session.negotiated().unwrap();
    assert_eq!((negotiated.width, negotiated.height), (640, 480));
    // 15 sits between 10 and 20, the faster rate is taken
    assert_eq!(negotiated.rate, 20);
}

#[test]
fn test_unspecified_size_uses_driver_default() {
    let device = FakeDevice::new()
        .with_format(FourCC::YUYV, &[(320, 240), (640, 480)], &[30, 60]);
    let (_driver, session) = start(device, Requested::new(0, 0, 0));

    let negotiated = session.negotiated().unwrap();
    assert_eq!((negotiated.width, negotiated.height), (320, 240));
    assert_eq!(negotiated.rate, 60);
}

#[test]
fn test_threshold_bad_frames_enter_error() {
    let device = FakeDevice::new().with_format(FourCC::YUYV, &[(4, 2)], &[30]);
    let (driver, mut session) = start(device, Requested::new(4, 2, 30));

    for _ in 0..THRESHOLD - 1 {
        assert_eq!(session.tick().unwrap(), Tick::Bad);
    }
    assert!(matches!(session.tick(), Err(Error::HealthDegraded(THRESHOLD))));
    assert_eq!(session.state(), State::Error);
    assert!(session.queue().is_empty());

    session.teardown().unwrap();
    assert_eq!(session.state(), State::Closed);
    assert_eq!(driver.open_handles(), 0);
    assert_eq!(driver.mapped_buffers(), 0);
}

#[test]
fn test_good_frame_resets_counter() {
    let frames = std::iter::repeat(FakeFrame::Corrupt)
        .take(THRESHOLD as usize - 1)
        .chain([FakeFrame::yuyv(4, 2)]);
    let device = FakeDevice::new()
        .with_format(FourCC::YUYV, &[(4, 2)], &[30])
        .with_frames(frames);
    let (_driver, mut session) = start(device, Requested::new(4, 2, 30));

    for _ in 0..THRESHOLD - 1 {
        assert_eq!(session.tick().unwrap(), Tick::Bad);
    }
    assert_eq!(session.tick().unwrap(), Tick::Frame);
    assert_eq!(session.consecutive_bad_frames(), 0);
    assert_eq!(session.state(), State::Streaming);
    assert_eq!(session.queue().len(), 1);
}

#[test]
fn test_huffman_insertion() {
    let jpeg = vec![
        0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02, 0x55, 0xFF, 0xD9,
    ];
    let device = FakeDevice::new()
        .with_format(FourCC::MJPG, &[(640, 480)], &[30])
        .with_frames([FakeFrame::Ready(jpeg.clone()), FakeFrame::Ready(jpeg.clone())]);
    let driver = Arc::new(FakeDriver::new().with_device("/dev/video0", device));

    let config = config().with_huffman_insertion(true);
    let mut session = CaptureSession::new(0, Requested::new(640, 480, 30), driver, &config);
    session.open_and_start().unwrap();

    assert_eq!(session.tick().unwrap(), Tick::Frame);
    let frame = session.queue().pop().unwrap();
    assert_eq!(frame.data.len(), jpeg.len() + uvccam::codec::HUFFMAN_TABLE_SIZE);
    assert_eq!(&frame.data[2..4], &[0xFF, 0xC4]);
}

#[test]
fn test_drop_tears_down() {
    let device = FakeDevice::new()
        .with_format(FourCC::YUYV, &[(4, 2)], &[30])
        .with_default_frame(FakeFrame::yuyv(4, 2));
    let (driver, mut session) = start(device, Requested::new(4, 2, 30));
    assert_eq!(session.tick().unwrap(), Tick::Frame);

    let queue = session.queue();
    drop(session);
    assert_eq!(driver.open_handles(), 0);
    assert_eq!(driver.mapped_buffers(), 0);

    // frames already published outlive the session
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_out_of_order_calls_are_rejected() {
    let device = FakeDevice::new().with_format(FourCC::YUYV, &[(4, 2)], &[30]);
    let driver = Arc::new(FakeDriver::new().with_device("/dev/video0", device));
    let mut session = CaptureSession::new(0, Requested::new(4, 2, 30), driver.clone(), &config());

    assert!(matches!(
        session.negotiate(),
        Err(Error::InvalidTransition {
            from: State::Closed,
            to: State::Negotiating
        })
    ));
    assert!(session.start().is_err());
    assert!(session.tick().is_err());

    session.open().unwrap();
    assert!(session.open().is_err());
    session.teardown().unwrap();
    assert_eq!(driver.open_handles(), 0);
}

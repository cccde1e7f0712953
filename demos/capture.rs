use std::env;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;
use uvccam::{CaptureSessionManager, Config};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let index: i32 = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);
    println!("Using camera: {}\n", index);

    // Capture 60 frames by default
    let count = 60;

    let manager = CaptureSessionManager::with_v4l2(Config::default());
    let negotiated = match manager.try_open(index, 1280, 720, 30) {
        Ok(negotiated) => negotiated,
        Err(e) => {
            eprintln!("cannot open camera {}: {}", index, e);
            return;
        }
    };
    println!("Negotiated format:");
    println!("  fourcc     : {}", negotiated.fourcc);
    println!("  size       : {}x{}", negotiated.width, negotiated.height);
    println!("  rate       : {}", negotiated.rate);
    println!("  compressed : {}", negotiated.compressed);
    println!();

    let start = Instant::now();
    let mut frames = 0;
    let mut bytes = 0;
    while frames < count && start.elapsed() < Duration::from_secs(10) {
        match manager.get_frame(index) {
            Some(frame) => {
                frames += 1;
                bytes += frame.len();
                println!(
                    "Frame {:>4}  sequence {:>6}  {} bytes",
                    frames,
                    frame.sequence,
                    frame.len()
                );
            }
            None => std::thread::sleep(Duration::from_millis(5)),
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!();
    println!("FPS: {:.1}", frames as f64 / elapsed);
    println!("MB/s: {:.2}", bytes as f64 / 1_048_576.0 / elapsed);
    if let Some(status) = manager.status(index) {
        println!("Dropped: {}", status.frames_dropped);
    }

    manager.close(index);
}

use std::path::Path;
use std::sync::Arc;

use uvccam::driver::v4l2::V4l2Driver;
use uvccam::{device, Config, FormatCatalog, Handle};

fn main() {
    let config = Config::default();
    let driver = Arc::new(V4l2Driver::new());

    for node in device::enum_devices(&config) {
        println!("{}: {}", node.index(), node.path().display());
        if let Err(e) = print_formats(driver.clone(), node.path()) {
            println!("  not a capture device ({})", e);
        }
        println!();
    }
}

fn print_formats(driver: Arc<V4l2Driver>, path: &Path) -> uvccam::Result<()> {
    let handle = Handle::open(driver, path)?;
    let mut catalog = FormatCatalog::new();

    let formats = catalog.formats(&handle)?.to_vec();
    for format in formats {
        println!("  {} ({})", format.fourcc, format.description);
        let sizes = catalog.sizes(&handle, format.fourcc).to_vec();
        for size in sizes {
            let rates = catalog.rates(&handle, format.fourcc, size);
            println!("    {:>9}  {:?} fps", size.to_string(), rates);
        }
    }

    Ok(())
}

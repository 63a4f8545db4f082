//! `touchgate probe`: open the input device and report what it supports.

use anyhow::Result;
use std::path::PathBuf;

use crate::socket::protocol::DeviceInfo;

/// How long the optional test tap holds.
#[cfg(any(target_os = "linux", target_os = "android"))]
const PROBE_TAP_HOLD: std::time::Duration = std::time::Duration::from_millis(60);

/// Open `device` (or the first capable one), print its capabilities, and
/// optionally perform a plain tap at device coordinates.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn run(device: Option<PathBuf>, screen: Option<(i32, i32)>, tap: Option<(i32, i32)>) -> Result<()> {
    use crate::device::{EvdevTarget, InjectionTarget};

    let mut target = EvdevTarget::new(device, screen, std::time::Duration::ZERO);
    target.initialize()?;
    print!("{}", describe(&target.device_info()));

    if let Some((x, y)) = tap {
        target.tap(x, y, PROBE_TAP_HOLD)?;
        println!("tapped at ({x}, {y})");
    }
    target.close();
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn run(_device: Option<PathBuf>, _screen: Option<(i32, i32)>, _tap: Option<(i32, i32)>) -> Result<()> {
    anyhow::bail!("Input device probing needs Linux or Android")
}

/// Human-readable capability summary.
pub fn describe(info: &DeviceInfo) -> String {
    format!(
        "device:      {}\n\
         screen:      {}x{}\n\
         x range:     0..={}\n\
         y range:     0..={}\n\
         pressure:    0..={}\n\
         touch major: 0..={}\n",
        info.device_path,
        info.screen_width,
        info.screen_height,
        info.max_x,
        info.max_y,
        info.max_pressure,
        info.max_touch_major
    )
}

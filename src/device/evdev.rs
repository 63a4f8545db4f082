//! Raw evdev touchscreen backend.
//!
//! Writes kernel `input_event` records straight to a `/dev/input/event*`
//! node. Exclusivity is an advisory `flock(LOCK_EX)` on the node, so two
//! injectors never interleave gestures on the same device. Capabilities
//! come from the `EVIOCGBIT` and `EVIOCGABS` ioctls.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::InjectionTarget;
use crate::input::{abs, ev, InputEvent};
use crate::socket::protocol::DeviceInfo;

/// Directory scanned when no device path is configured.
const INPUT_DIR: &str = "/dev/input";

// ─── ioctl numbers ─────────────────────────────────────────────────────────

const IOC_READ: u32 = 2;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;

/// Linux `_IOC(dir, type, nr, size)` for the common (x86/ARM) layout.
const fn ioc(dir: u32, ty: u8, nr: u32, size: usize) -> u32 {
    (dir << IOC_DIRSHIFT) | ((ty as u32) << IOC_TYPESHIFT) | (nr << IOC_NRSHIFT) | ((size as u32) << IOC_SIZESHIFT)
}

/// `EVIOCGBIT(ev, len)`: event codes supported for event type `ev`.
const fn eviocgbit(event_type: u16, len: usize) -> u32 {
    ioc(IOC_READ, b'E', 0x20 + event_type as u32, len)
}

/// `EVIOCGABS(abs)`: range of one absolute axis.
const fn eviocgabs(axis: u16) -> u32 {
    ioc(IOC_READ, b'E', 0x40 + axis as u32, std::mem::size_of::<libc::input_absinfo>())
}

/// Bytes needed for an `EV_ABS` capability bitmap.
const ABS_BITS_LEN: usize = (abs::MAX as usize + 1).div_ceil(8);

fn test_bit(bits: &[u8], bit: u16) -> bool {
    let bit = bit as usize;
    bits.get(bit / 8).is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
}

// ─── Target ────────────────────────────────────────────────────────────────

/// Exclusive writer to one evdev multi-touch device.
#[derive(Debug)]
pub struct EvdevTarget {
    /// Node to open; probed from `/dev/input` when `None`.
    configured_path: Option<PathBuf>,
    /// Display size when it differs from the axis range.
    screen_override: Option<(i32, i32)>,
    /// Pause after each `SYN_REPORT`.
    event_interval: Duration,
    file: Option<File>,
    info: DeviceInfo,
}

impl EvdevTarget {
    /// Target for `device` (or the first capable device when `None`).
    pub fn new(device: Option<PathBuf>, screen_override: Option<(i32, i32)>, event_interval: Duration) -> Self {
        Self {
            configured_path: device,
            screen_override,
            event_interval,
            file: None,
            info: DeviceInfo::default(),
        }
    }

    /// Open `path` for writing and take the exclusive lock.
    fn open_exclusive(path: &Path) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open input device: {}", path.display()))?;

        // SAFETY: `file` owns a valid open descriptor for the duration of the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            bail!("Input device {} is in use by another injector: {err}", path.display());
        }
        Ok(file)
    }

    /// Whether the open device reports `ABS_MT_POSITION_X`.
    fn is_multitouch(file: &File) -> bool {
        let mut bits = [0u8; ABS_BITS_LEN];
        // SAFETY: the request size encoded in the ioctl number matches `bits`,
        // which outlives the call.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), eviocgbit(ev::ABS, bits.len()) as _, bits.as_mut_ptr()) };
        rc >= 0 && test_bit(&bits, abs::MT_POSITION_X)
    }

    /// Maximum of `axis`, or `None` when the device lacks it.
    fn axis_max(file: &File, axis: u16) -> Option<i32> {
        let mut info = libc::input_absinfo {
            value: 0,
            minimum: 0,
            maximum: 0,
            fuzz: 0,
            flat: 0,
            resolution: 0,
        };
        // SAFETY: EVIOCGABS writes exactly one `input_absinfo` into `info`.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), eviocgabs(axis) as _, std::ptr::addr_of_mut!(info)) };
        (rc >= 0).then_some(info.maximum)
    }

    /// First `/dev/input/event*` node that is a multi-touch device and not
    /// locked by someone else.
    fn probe() -> Result<(PathBuf, File)> {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(INPUT_DIR)
            .with_context(|| format!("Failed to list {INPUT_DIR}"))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("event"))
            })
            .collect();
        candidates.sort();

        for path in candidates {
            let file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => file,
                Err(e) => {
                    log::debug!("[device] skipping {}: {e}", path.display());
                    continue;
                }
            };
            if !Self::is_multitouch(&file) {
                continue;
            }
            drop(file);
            match Self::open_exclusive(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) => log::warn!("[device] {e:#}"),
            }
        }
        bail!("No multi-touch input device found under {INPUT_DIR}")
    }

    fn write_group(file: &mut File, group: &[libc::input_event]) -> std::io::Result<()> {
        let len = std::mem::size_of_val(group);
        // SAFETY: `input_event` is a plain C struct with no padding-sensitive
        // invariants; viewing the slice as bytes for the write is sound.
        let bytes = unsafe { std::slice::from_raw_parts(group.as_ptr().cast::<u8>(), len) };
        file.write_all(bytes)
    }
}

fn to_kernel(event: InputEvent) -> libc::input_event {
    libc::input_event {
        // The kernel stamps injected events itself.
        time: libc::timeval { tv_sec: 0, tv_usec: 0 },
        type_: event.event_type,
        code: event.code,
        value: event.value,
    }
}

impl InjectionTarget for EvdevTarget {
    fn initialize(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let (path, file) = match &self.configured_path {
            Some(path) => {
                let file = Self::open_exclusive(path)?;
                if !Self::is_multitouch(&file) {
                    bail!("{} is not a multi-touch device (no ABS_MT_POSITION_X)", path.display());
                }
                (path.clone(), file)
            }
            None => Self::probe()?,
        };

        let max_x = Self::axis_max(&file, abs::MT_POSITION_X)
            .with_context(|| format!("Failed to read X range of {}", path.display()))?;
        let max_y = Self::axis_max(&file, abs::MT_POSITION_Y)
            .with_context(|| format!("Failed to read Y range of {}", path.display()))?;
        let max_pressure = Self::axis_max(&file, abs::MT_PRESSURE).unwrap_or(0);
        let max_touch_major = Self::axis_max(&file, abs::MT_TOUCH_MAJOR).unwrap_or(0);
        let (screen_width, screen_height) = self.screen_override.unwrap_or((max_x + 1, max_y + 1));

        self.info = DeviceInfo {
            device_path: path.to_string_lossy().into_owned(),
            screen_width,
            screen_height,
            max_x,
            max_y,
            max_pressure,
            max_touch_major,
        };
        self.file = Some(file);

        log::info!(
            "[device] opened {} (x 0..={max_x}, y 0..={max_y}, pressure 0..={max_pressure}, screen {screen_width}x{screen_height})",
            path.display()
        );
        Ok(())
    }

    fn inject_events(&mut self, events: &[InputEvent]) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            bail!("Input device is not open");
        };

        let mut group = Vec::with_capacity(8);
        for event in events {
            group.push(to_kernel(*event));
            if event.is_syn_report() {
                Self::write_group(file, &group).context("Failed to write input events")?;
                group.clear();
                std::thread::sleep(self.event_interval);
            }
        }
        // A trailing partial packet is still written; the caller owns framing.
        if !group.is_empty() {
            Self::write_group(file, &group).context("Failed to write input events")?;
        }
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            // SAFETY: `file` is still open here; dropping it afterwards closes the fd.
            unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
            log::info!("[device] released {}", self.info.device_path);
        }
    }
}

impl Drop for EvdevTarget {
    fn drop(&mut self) {
        self.close();
    }
}

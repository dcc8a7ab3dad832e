//! Global input hook reading evdev devices
//!
//! Reads keyboard and mouse events directly from `/dev/input/event*`, so
//! it works under X11, Wayland and on a bare console alike.
//!
//! # Requirements
//! - User must be in the `input` group: `sudo usermod -aG input $USER`
//! - Log out and back in after adding to group
//!
//! Pointer coordinates are accumulated from relative motion starting at
//! the origin; evdev has no notion of the compositor's cursor position.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use evdev::{Device, InputEventKind, Key as EvKey, RelativeAxisType, Synchronization};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use tracing::{debug, error, info, warn};

use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::events::{Event, MouseButton};
use crate::hotkey::{Key, Side};

/// How long a reader waits for input before checking the stop flag
const READ_POLL_MS: i32 = 100;

/// Reader threads over every matching input device
pub(crate) struct Hook {
    running: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
}

impl Hook {
    /// Open every readable keyboard/mouse device and start one reader each
    pub fn install(event_tx: mpsc::Sender<Event>, config: &DetectorConfig) -> Result<Self, DetectorError> {
        let devices: Vec<(PathBuf, Device)> = evdev::enumerate()
            .filter(|(_, device)| {
                (config.keyboard && is_keyboard(device)) || (config.mouse && is_mouse(device))
            })
            .collect();

        if devices.is_empty() {
            return Err(DetectorError::HookInstall(
                "no readable keyboard or mouse under /dev/input - is the user in the `input` group?"
                    .to_string(),
            ));
        }

        let running = Arc::new(AtomicBool::new(true));
        let pointer = Arc::new(Mutex::new(Pointer::default()));
        let mut hook = Self {
            running: Arc::clone(&running),
            readers: Vec::with_capacity(devices.len()),
        };

        for (path, device) in devices {
            if let Err(e) = set_nonblocking(&device) {
                warn!(?path, error = %e, "cannot make input device non-blocking, skipping");
                continue;
            }
            info!(
                ?path,
                name = device.name().unwrap_or("unknown"),
                "listening on input device"
            );
            let decoder = Decoder {
                pointer: Arc::clone(&pointer),
                keyboard: config.keyboard,
                mouse: config.mouse,
            };
            let event_tx = event_tx.clone();
            let reader_running = Arc::clone(&running);

            let spawned = thread::Builder::new()
                .name("keynet-evdev".to_string())
                .spawn(move || read_device(path, device, decoder, event_tx, reader_running));
            match spawned {
                Ok(reader) => hook.readers.push(reader),
                Err(e) => {
                    hook.uninstall();
                    return Err(DetectorError::ThreadSpawn(e.to_string()));
                }
            }
        }

        if hook.readers.is_empty() {
            return Err(DetectorError::HookInstall(
                "no input device could be opened for reading".to_string(),
            ));
        }
        Ok(hook)
    }

    /// Stop every reader and wait for it to close its device
    pub fn uninstall(self) {
        self.running.store(false, Ordering::SeqCst);
        let count = self.readers.len();
        for reader in self.readers {
            if reader.join().is_err() {
                error!("evdev reader panicked");
            }
        }
        debug!(devices = count, "evdev readers stopped");
    }
}

fn is_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .map_or(false, |keys| keys.contains(EvKey::KEY_A) && keys.contains(EvKey::KEY_ENTER))
}

fn is_mouse(device: &Device) -> bool {
    device
        .supported_keys()
        .map_or(false, |keys| keys.contains(EvKey::BTN_LEFT))
        || device
            .supported_relative_axes()
            .map_or(false, |axes| axes.contains(RelativeAxisType::REL_WHEEL))
}

/// Put the device fd in non-blocking mode so reads never park the reader
fn set_nonblocking(device: &impl AsRawFd) -> nix::Result<()> {
    let fd = device.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Wait up to [`READ_POLL_MS`] for the device to become readable
fn wait_readable(device: &impl AsRawFd) -> nix::Result<bool> {
    // SAFETY: the fd is owned by `device`, which outlives this call
    let fd = unsafe { BorrowedFd::borrow_raw(device.as_raw_fd()) };
    let mut fds = [PollFd::new(&fd, PollFlags::POLLIN)];
    match poll(&mut fds, READ_POLL_MS) {
        Ok(ready) => Ok(ready > 0),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_device(
    path: PathBuf,
    mut device: Device,
    decoder: Decoder,
    event_tx: mpsc::Sender<Event>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match wait_readable(&device) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!(?path, error = %e, "input device poll failed, dropping device");
                return;
            }
        }
        let events = match device.fetch_events() {
            Ok(events) => events,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                warn!(?path, ?e, "input device read failed, dropping device");
                return;
            }
        };
        for raw in events {
            if let Some(event) = decoder.decode(raw.kind(), raw.value()) {
                if event_tx.send(event).is_err() {
                    return;
                }
            }
        }
    }
    debug!(?path, "evdev reader stopped");
}

/// Accumulated pointer position
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Pointer {
    x: f64,
    y: f64,
    /// Moved since the last sync report
    moved: bool,
}

/// Turns raw evdev events into [`Event`]s
struct Decoder {
    pointer: Arc<Mutex<Pointer>>,
    keyboard: bool,
    mouse: bool,
}

impl Decoder {
    fn position(&self) -> Pointer {
        *self.pointer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode(&self, kind: InputEventKind, value: i32) -> Option<Event> {
        match kind {
            InputEventKind::Key(key) => {
                // 0 = release, 1 = press, 2 = autorepeat
                let pressed = match value {
                    0 => false,
                    1 | 2 => true,
                    _ => return None,
                };
                if let Some(button) = mouse_button(key) {
                    if !self.mouse || value == 2 {
                        return None;
                    }
                    let at = self.position();
                    return Some(Event::click(button, at.x, at.y, pressed));
                }
                if !self.keyboard {
                    return None;
                }
                let name = key_name(key)?;
                Some(Event::sided_key(name, key_side(key), pressed))
            }
            InputEventKind::RelAxis(axis) if self.mouse => {
                let delta = f64::from(value);
                let mut pointer = self.pointer.lock().unwrap_or_else(PoisonError::into_inner);
                match axis {
                    RelativeAxisType::REL_X => {
                        pointer.x = (pointer.x + delta).max(0.0);
                        pointer.moved = true;
                        None
                    }
                    RelativeAxisType::REL_Y => {
                        pointer.y = (pointer.y + delta).max(0.0);
                        pointer.moved = true;
                        None
                    }
                    RelativeAxisType::REL_WHEEL => Some(Event::scroll(pointer.x, pointer.y, 0.0, delta)),
                    RelativeAxisType::REL_HWHEEL => Some(Event::scroll(pointer.x, pointer.y, delta, 0.0)),
                    _ => None,
                }
            }
            // X and Y of one motion arrive separately; report the move once
            // the frame is complete
            InputEventKind::Synchronization(Synchronization::SYN_REPORT) if self.mouse => {
                let mut pointer = self.pointer.lock().unwrap_or_else(PoisonError::into_inner);
                if !pointer.moved {
                    return None;
                }
                pointer.moved = false;
                Some(Event::mouse_move(pointer.x, pointer.y))
            }
            _ => None,
        }
    }
}

fn mouse_button(key: EvKey) -> Option<MouseButton> {
    match key {
        EvKey::BTN_LEFT => Some(MouseButton::Left),
        EvKey::BTN_RIGHT => Some(MouseButton::Right),
        EvKey::BTN_MIDDLE => Some(MouseButton::Middle),
        other if (0x113..=0x117).contains(&other.code()) => Some(MouseButton::Other(other.code())),
        _ => None,
    }
}

/// Name for an evdev key, e.g. `KEY_LEFTCTRL` -> `ctrl`.
///
/// Non-keyboard buttons (joystick, digitizer) have no name.
fn key_name(key: EvKey) -> Option<Key> {
    let debug_name = format!("{:?}", key);
    let name = debug_name.strip_prefix("KEY_")?;
    Some(Key::new(name))
}

/// Which copy of a doubled modifier `key` is
fn key_side(key: EvKey) -> Option<Side> {
    match key {
        EvKey::KEY_LEFTCTRL | EvKey::KEY_LEFTSHIFT | EvKey::KEY_LEFTALT | EvKey::KEY_LEFTMETA => {
            Some(Side::Left)
        }
        EvKey::KEY_RIGHTCTRL | EvKey::KEY_RIGHTSHIFT | EvKey::KEY_RIGHTALT | EvKey::KEY_RIGHTMETA => {
            Some(Side::Right)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::events::Payload;

    #[test]
    fn test_idle_fd_never_parks_reader() {
        let (mut reader, mut writer) = UnixStream::pair().unwrap();
        set_nonblocking(&reader).unwrap();

        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let started = Instant::now();
        assert!(!wait_readable(&reader).unwrap());
        assert!(started.elapsed() < Duration::from_secs(1));

        writer.write_all(b"x").unwrap();
        assert!(wait_readable(&reader).unwrap());
    }

    fn decoder() -> Decoder {
        Decoder {
            pointer: Arc::new(Mutex::new(Pointer::default())),
            keyboard: true,
            mouse: true,
        }
    }

    #[test]
    fn test_key_names() {
        assert_eq!(key_name(EvKey::KEY_A), Some(Key::new("a")));
        assert_eq!(key_name(EvKey::KEY_LEFTCTRL), Some(Key::new("ctrl")));
        assert_eq!(key_name(EvKey::KEY_RIGHTCTRL), Some(Key::new("ctrl")));
        assert_eq!(key_name(EvKey::KEY_ESC), Some(Key::new("esc")));
        assert_eq!(key_name(EvKey::BTN_LEFT), None);
    }

    #[test]
    fn test_decode_key_press_release_repeat() {
        let decoder = decoder();
        let press = decoder.decode(InputEventKind::Key(EvKey::KEY_X), 1).unwrap();
        assert_eq!(press.payload, Payload::KeyPress {
                key: Key::new("x"),
                side: None,
            });

        let repeat = decoder.decode(InputEventKind::Key(EvKey::KEY_X), 2).unwrap();
        assert_eq!(repeat.payload, Payload::KeyPress {
                key: Key::new("x"),
                side: None,
            });

        let release = decoder.decode(InputEventKind::Key(EvKey::KEY_X), 0).unwrap();
        assert_eq!(release.payload, Payload::KeyRelease {
                key: Key::new("x"),
                side: None,
            });

        assert!(decoder.decode(InputEventKind::Key(EvKey::KEY_X), 7).is_none());
    }

    #[test]
    fn test_decode_click_at_accumulated_position() {
        let decoder = decoder();
        assert!(decoder.decode(InputEventKind::RelAxis(RelativeAxisType::REL_X), 30).is_none());
        assert!(decoder.decode(InputEventKind::RelAxis(RelativeAxisType::REL_Y), 12).is_none());
        assert!(decoder.decode(InputEventKind::RelAxis(RelativeAxisType::REL_X), -50).is_none());

        let click = decoder.decode(InputEventKind::Key(EvKey::BTN_LEFT), 1).unwrap();
        assert_eq!(
            click.payload,
            Payload::MouseClick {
                button: MouseButton::Left,
                x: 0.0,
                y: 12.0,
                pressed: true,
            }
        );
    }

    #[test]
    fn test_decode_sided_modifiers() {
        let decoder = decoder();
        let left = decoder.decode(InputEventKind::Key(EvKey::KEY_LEFTCTRL), 1).unwrap();
        assert_eq!(left.key(), Some(&Key::new("ctrl")));
        assert_eq!(left.side(), Some(Side::Left));

        let right = decoder.decode(InputEventKind::Key(EvKey::KEY_RIGHTALT), 0).unwrap();
        assert_eq!(right.key(), Some(&Key::new("alt")));
        assert_eq!(right.side(), Some(Side::Right));

        // Arrow keys are not sided modifiers
        let arrow = decoder.decode(InputEventKind::Key(EvKey::KEY_LEFT), 1).unwrap();
        assert_eq!(arrow.side(), None);
    }

    #[test]
    fn test_decode_move_on_sync() {
        let decoder = decoder();
        let sync = InputEventKind::Synchronization(Synchronization::SYN_REPORT);
        assert!(decoder.decode(sync, 0).is_none());

        decoder.decode(InputEventKind::RelAxis(RelativeAxisType::REL_X), 8);
        decoder.decode(InputEventKind::RelAxis(RelativeAxisType::REL_Y), 3);
        let moved = decoder.decode(sync, 0).unwrap();
        assert_eq!(moved.payload, Payload::MouseMove { x: 8.0, y: 3.0 });

        // Nothing moved since the last frame
        assert!(decoder.decode(sync, 0).is_none());
    }

    #[test]
    fn test_decode_scroll() {
        let decoder = decoder();
        let scroll = decoder
            .decode(InputEventKind::RelAxis(RelativeAxisType::REL_WHEEL), -1)
            .unwrap();
        assert_eq!(
            scroll.payload,
            Payload::MouseScroll {
                x: 0.0,
                y: 0.0,
                dx: 0.0,
                dy: -1.0,
            }
        );
    }

    #[test]
    fn test_decode_respects_config() {
        let mut decoder = Decoder {
            keyboard: false,
            ..decoder()
        };
        assert!(decoder.decode(InputEventKind::Key(EvKey::KEY_A), 1).is_none());
        assert!(decoder.decode(InputEventKind::Key(EvKey::BTN_RIGHT), 1).is_some());

        decoder.mouse = false;
        assert!(decoder.decode(InputEventKind::Key(EvKey::BTN_RIGHT), 1).is_none());
        decoder.decode(InputEventKind::RelAxis(RelativeAxisType::REL_X), 5);
        assert!(decoder
            .decode(InputEventKind::Synchronization(Synchronization::SYN_REPORT), 0)
            .is_none());
        assert!(decoder
            .decode(InputEventKind::RelAxis(RelativeAxisType::REL_WHEEL), 1)
            .is_none());
    }
}

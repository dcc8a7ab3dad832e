//! Global input hook using macOS CGEventTap
//!
//! The tap runs on a dedicated thread with its own CFRunLoop and forwards
//! decoded events over a channel. Requires the Accessibility permission
//! (System Settings > Privacy & Security > Accessibility).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
};
use tracing::{error, info, warn};

use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::events::{Event, MouseButton};
use crate::hotkey::{Key, Side};

/// How long each CFRunLoop slice runs before the stop flag is checked
const RUN_LOOP_SLICE: Duration = Duration::from_millis(100);

type Ready = mpsc::SyncSender<Result<(), DetectorError>>;

/// An installed event tap and the thread running its run loop
pub(crate) struct Hook {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Hook {
    /// Create the event tap and wait until it is enabled
    pub fn install(event_tx: mpsc::Sender<Event>, config: &DetectorConfig) -> Result<Self, DetectorError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let interest = events_of_interest(config);

        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("keynet-event-tap".to_string())
                .spawn(move || {
                    info!("event tap thread started");
                    run_event_tap(event_tx, running, interest, ready_tx);
                    info!("event tap thread stopped");
                })
                .map_err(|e| DetectorError::ThreadSpawn(e.to_string()))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { running, thread }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DetectorError::HookInstall(
                    "event tap thread exited during setup".to_string(),
                ))
            }
        }
    }

    /// Stop the run loop and tear the tap down
    pub fn uninstall(self) {
        self.running.store(false, Ordering::SeqCst);
        if self.thread.join().is_err() {
            error!("event tap thread panicked");
        }
    }
}

fn events_of_interest(config: &DetectorConfig) -> Vec<CGEventType> {
    let mut interest = Vec::new();
    if config.keyboard {
        interest.extend([
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ]);
    }
    if config.mouse {
        interest.extend([
            CGEventType::LeftMouseDown,
            CGEventType::LeftMouseUp,
            CGEventType::RightMouseDown,
            CGEventType::RightMouseUp,
            CGEventType::OtherMouseDown,
            CGEventType::OtherMouseUp,
            CGEventType::MouseMoved,
            CGEventType::LeftMouseDragged,
            CGEventType::RightMouseDragged,
            CGEventType::OtherMouseDragged,
            CGEventType::ScrollWheel,
        ]);
    }
    interest
}

/// Run the CFRunLoop with the event tap until `running` is cleared
fn run_event_tap(
    event_tx: mpsc::Sender<Event>,
    running: Arc<AtomicBool>,
    interest: Vec<CGEventType>,
    ready: Ready,
) {
    // CGEventTap callback - must be fast and non-blocking
    let callback = move |_proxy: CGEventTapProxy, event_type: CGEventType, event: &CGEvent| -> Option<CGEvent> {
        match event_type {
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!("event tap disabled by the system, events may be missed");
            }
            _ => {
                if let Some(decoded) = decode(event_type, event) {
                    let _ = event_tx.send(decoded);
                }
            }
        }
        Some(event.clone())
    };

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        interest,
        callback,
    ) {
        Ok(tap) => tap,
        Err(()) => {
            error!("failed to create event tap - is Accessibility permission granted?");
            let _ = ready.send(Err(DetectorError::HookInstall(
                "failed to create event tap - check Accessibility permissions".to_string(),
            )));
            return;
        }
    };

    let Ok(run_loop_source) = tap.mach_port.create_runloop_source(0) else {
        let _ = ready.send(Err(DetectorError::HookInstall(
            "failed to create run loop source for event tap".to_string(),
        )));
        return;
    };

    unsafe {
        CFRunLoop::get_current().add_source(&run_loop_source, kCFRunLoopCommonModes);
    }
    tap.enable();

    info!("event tap created and enabled");
    let _ = ready.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_LOOP_SLICE, true);
        }
    }

    // Tap and run loop source are released when they go out of scope
}

/// Decode a raw tap event; anything unrecognized is dropped
fn decode(event_type: CGEventType, event: &CGEvent) -> Option<Event> {
    match event_type {
        CGEventType::KeyDown | CGEventType::KeyUp => {
            let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
            let key = Key::new(keycode_name(code)?);
            Some(if matches!(event_type, CGEventType::KeyDown) {
                Event::key_press(key)
            } else {
                Event::key_release(key)
            })
        }
        CGEventType::FlagsChanged => {
            let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
            let pressed = modifier_down(code, event.get_flags())?;
            let key = Key::new(keycode_name(code)?);
            Some(Event::sided_key(key, modifier_side(code), pressed))
        }
        CGEventType::MouseMoved
        | CGEventType::LeftMouseDragged
        | CGEventType::RightMouseDragged
        | CGEventType::OtherMouseDragged => {
            let point = event.location();
            Some(Event::mouse_move(point.x, point.y))
        }
        CGEventType::LeftMouseDown
        | CGEventType::LeftMouseUp
        | CGEventType::RightMouseDown
        | CGEventType::RightMouseUp
        | CGEventType::OtherMouseDown
        | CGEventType::OtherMouseUp => {
            let point = event.location();
            let (button, pressed) = match event_type {
                CGEventType::LeftMouseDown => (MouseButton::Left, true),
                CGEventType::LeftMouseUp => (MouseButton::Left, false),
                CGEventType::RightMouseDown => (MouseButton::Right, true),
                CGEventType::RightMouseUp => (MouseButton::Right, false),
                _ => {
                    let number =
                        event.get_integer_value_field(EventField::MOUSE_EVENT_BUTTON_NUMBER);
                    let button = match number {
                        2 => MouseButton::Middle,
                        n => MouseButton::Other(u16::try_from(n).ok()?),
                    };
                    (button, matches!(event_type, CGEventType::OtherMouseDown))
                }
            };
            Some(Event::click(button, point.x, point.y, pressed))
        }
        CGEventType::ScrollWheel => {
            let point = event.location();
            let dy = event.get_integer_value_field(EventField::SCROLL_WHEEL_EVENT_DELTA_AXIS_1);
            let dx = event.get_integer_value_field(EventField::SCROLL_WHEEL_EVENT_DELTA_AXIS_2);
            Some(Event::scroll(point.x, point.y, dx as f64, dy as f64))
        }
        _ => None,
    }
}

// Device-dependent modifier bits (IOKit NX_DEVICE*KEYMASK); they tell the
// left and right copies of a modifier apart
const DEVICE_LEFT_CTRL: u64 = 0x0000_0001;
const DEVICE_LEFT_SHIFT: u64 = 0x0000_0002;
const DEVICE_RIGHT_SHIFT: u64 = 0x0000_0004;
const DEVICE_LEFT_CMD: u64 = 0x0000_0008;
const DEVICE_RIGHT_CMD: u64 = 0x0000_0010;
const DEVICE_LEFT_ALT: u64 = 0x0000_0020;
const DEVICE_RIGHT_ALT: u64 = 0x0000_0040;
const DEVICE_RIGHT_CTRL: u64 = 0x0000_2000;

/// Whether the modifier behind a FlagsChanged keycode is now down
fn modifier_down(code: u16, flags: CGEventFlags) -> Option<bool> {
    let mask = match code {
        59 => DEVICE_LEFT_CTRL,
        62 => DEVICE_RIGHT_CTRL,
        56 => DEVICE_LEFT_SHIFT,
        60 => DEVICE_RIGHT_SHIFT,
        55 => DEVICE_LEFT_CMD,
        54 => DEVICE_RIGHT_CMD,
        58 => DEVICE_LEFT_ALT,
        61 => DEVICE_RIGHT_ALT,
        57 => CGEventFlags::CGEventFlagAlphaShift.bits(),
        _ => return None,
    };
    Some(flags.bits() & mask != 0)
}

/// Which copy of a doubled modifier a keycode is
fn modifier_side(code: u16) -> Option<Side> {
    match code {
        55 | 56 | 58 | 59 => Some(Side::Left),
        54 | 60 | 61 | 62 => Some(Side::Right),
        _ => None,
    }
}

/// Name for an ANSI-layout virtual keycode
fn keycode_name(code: u16) -> Option<&'static str> {
    let name = match code {
        0 => "a",
        1 => "s",
        2 => "d",
        3 => "f",
        4 => "h",
        5 => "g",
        6 => "z",
        7 => "x",
        8 => "c",
        9 => "v",
        11 => "b",
        12 => "q",
        13 => "w",
        14 => "e",
        15 => "r",
        16 => "y",
        17 => "t",
        18 => "1",
        19 => "2",
        20 => "3",
        21 => "4",
        22 => "6",
        23 => "5",
        24 => "=",
        25 => "9",
        26 => "7",
        27 => "-",
        28 => "8",
        29 => "0",
        30 => "]",
        31 => "o",
        32 => "u",
        33 => "[",
        34 => "i",
        35 => "p",
        36 => "enter",
        37 => "l",
        38 => "j",
        39 => "'",
        40 => "k",
        41 => ";",
        42 => "\\",
        43 => ",",
        44 => "/",
        45 => "n",
        46 => "m",
        47 => ".",
        48 => "tab",
        49 => "space",
        50 => "`",
        51 => "backspace",
        53 => "esc",
        54 | 55 => "cmd",
        56 | 60 => "shift",
        57 => "caps_lock",
        58 | 61 => "alt",
        59 | 62 => "ctrl",
        96 => "f5",
        97 => "f6",
        98 => "f7",
        99 => "f3",
        100 => "f8",
        101 => "f9",
        103 => "f11",
        109 => "f10",
        111 => "f12",
        115 => "home",
        116 => "page_up",
        117 => "delete",
        118 => "f4",
        119 => "end",
        120 => "f2",
        121 => "page_down",
        122 => "f1",
        123 => "left",
        124 => "right",
        125 => "down",
        126 => "up",
        _ => return None,
    };
    Some(name)
}

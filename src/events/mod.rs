//! Events module: the uniform event model produced by every source
//!
//! Each [`Event`] carries a millisecond timestamp and a tagged payload.
//! Events serialize to flat JSON objects, e.g.
//! `{"timestamp_ms":1700000000000,"type":"key_press","key":"a"}`.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::DetectorError;
use crate::hotkey::{Key, Side};

/// A single input or system event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Milliseconds since the Unix epoch when the event was observed
    pub timestamp_ms: u64,

    #[serde(flatten)]
    pub payload: Payload,
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A key went down (also sent for autorepeat)
    KeyPress {
        key: Key,
        /// Set for modifiers the backend can tell apart
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side: Option<Side>,
    },

    /// A key went up
    KeyRelease {
        key: Key,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side: Option<Side>,
    },

    /// A mouse button was pressed or released at a screen position
    MouseClick {
        button: MouseButton,
        x: f64,
        y: f64,
        pressed: bool,
    },

    /// The pointer moved
    MouseMove { x: f64, y: f64 },

    /// The scroll wheel moved
    MouseScroll { x: f64, y: f64, dx: f64, dy: f64 },

    /// System output volume or mute state changed
    VolumeChange {
        /// Volume level in percent, 0-100
        level: u8,
        muted: bool,
    },
}

/// Mouse buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u16),
}

/// The kind of an event, used as the registration key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    KeyPress,
    KeyRelease,
    Click,
    Move,
    Scroll,
    VolumeChange,
}

impl EventKind {
    /// Every event kind
    pub const ALL: [EventKind; 6] = [
        EventKind::KeyPress,
        EventKind::KeyRelease,
        EventKind::Click,
        EventKind::Move,
        EventKind::Scroll,
        EventKind::VolumeChange,
    ];

    /// The registration name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::KeyPress => "key_press",
            EventKind::KeyRelease => "key_release",
            EventKind::Click => "click",
            EventKind::Move => "move",
            EventKind::Scroll => "scroll",
            EventKind::VolumeChange => "volume_change",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "key_press" => Ok(EventKind::KeyPress),
            "key_release" => Ok(EventKind::KeyRelease),
            "click" | "mouse_click" => Ok(EventKind::Click),
            "move" | "mouse_move" => Ok(EventKind::Move),
            "scroll" | "mouse_scroll" => Ok(EventKind::Scroll),
            "volume_change" => Ok(EventKind::VolumeChange),
            other => Err(DetectorError::UnknownEventKind(other.to_string())),
        }
    }
}

impl Event {
    /// Create an event stamped with the current time
    pub fn now(payload: Payload) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            timestamp_ms,
            payload,
        }
    }

    pub fn key_press(key: impl Into<Key>) -> Self {
        Self::sided_key(key, None, true)
    }

    pub fn key_release(key: impl Into<Key>) -> Self {
        Self::sided_key(key, None, false)
    }

    /// A key event that records which copy of a doubled key it came from
    pub fn sided_key(key: impl Into<Key>, side: Option<Side>, pressed: bool) -> Self {
        let key = key.into();
        Self::now(if pressed {
            Payload::KeyPress { key, side }
        } else {
            Payload::KeyRelease { key, side }
        })
    }

    pub fn click(button: MouseButton, x: f64, y: f64, pressed: bool) -> Self {
        Self::now(Payload::MouseClick {
            button,
            x,
            y,
            pressed,
        })
    }

    pub fn mouse_move(x: f64, y: f64) -> Self {
        Self::now(Payload::MouseMove { x, y })
    }

    pub fn scroll(x: f64, y: f64, dx: f64, dy: f64) -> Self {
        Self::now(Payload::MouseScroll { x, y, dx, dy })
    }

    pub fn volume(level: u8, muted: bool) -> Self {
        Self::now(Payload::VolumeChange {
            level: level.min(100),
            muted,
        })
    }

    /// The kind used to look up plain registrations
    pub fn kind(&self) -> EventKind {
        match self.payload {
            Payload::KeyPress { .. } => EventKind::KeyPress,
            Payload::KeyRelease { .. } => EventKind::KeyRelease,
            Payload::MouseClick { .. } => EventKind::Click,
            Payload::MouseMove { .. } => EventKind::Move,
            Payload::MouseScroll { .. } => EventKind::Scroll,
            Payload::VolumeChange { .. } => EventKind::VolumeChange,
        }
    }

    /// The key for keyboard events
    pub fn key(&self) -> Option<&Key> {
        match &self.payload {
            Payload::KeyPress { key, .. } | Payload::KeyRelease { key, .. } => Some(key),
            _ => None,
        }
    }

    /// The side of a doubled key, when the backend reported one
    pub fn side(&self) -> Option<Side> {
        match self.payload {
            Payload::KeyPress { side, .. } | Payload::KeyRelease { side, .. } => side,
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::KeyPress { key, .. } => write!(f, "KEY_PRESS {}", key),
            Payload::KeyRelease { key, .. } => write!(f, "KEY_RELEASE {}", key),
            Payload::MouseClick {
                button,
                x,
                y,
                pressed,
            } => {
                let action = if *pressed { "down" } else { "up" };
                write!(f, "CLICK {:?} {} at ({:.0}, {:.0})", button, action, x, y)
            }
            Payload::MouseMove { x, y } => write!(f, "MOVE ({:.0}, {:.0})", x, y),
            Payload::MouseScroll { dx, dy, .. } => write!(f, "SCROLL ({}, {})", dx, dy),
            Payload::VolumeChange { level, muted } => {
                write!(f, "VOLUME_CHANGE {}%", level)?;
                if *muted {
                    write!(f, " (muted)")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event {
            timestamp_ms: 1500,
            payload: Payload::KeyPress {
                key: Key::new("A"),
                side: None,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"key_press\""));
        assert!(json.contains("\"key\":\"a\""));
        assert!(json.contains("1500"));
        assert!(!json.contains("side"));
    }

    #[test]
    fn test_sided_key_serialization() {
        let event = Event::sided_key("rightctrl", Some(Side::Right), false);
        assert_eq!(event.kind(), EventKind::KeyRelease);
        assert_eq!(event.side(), Some(Side::Right));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"key\":\"ctrl\""));
        assert!(json.contains("\"side\":\"right\""));
    }

    #[test]
    fn test_mouse_move_event() {
        let event = Event::mouse_move(12.0, 34.0);
        assert_eq!(event.kind(), EventKind::Move);
        assert_eq!(event.to_string(), "MOVE (12, 34)");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"mouse_move\""));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"timestamp_ms":10,"type":"volume_change","level":40,"muted":true}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), EventKind::VolumeChange);
        assert!(matches!(
            event.payload,
            Payload::VolumeChange {
                level: 40,
                muted: true
            }
        ));
    }

    #[test]
    fn test_kind_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert_eq!("mouse_click".parse::<EventKind>().unwrap(), EventKind::Click);
        assert_eq!("mouse_move".parse::<EventKind>().unwrap(), EventKind::Move);
        assert!(matches!(
            "battery".parse::<EventKind>(),
            Err(DetectorError::UnknownEventKind(name)) if name == "battery"
        ));
    }

    #[test]
    fn test_event_kind_and_key() {
        let press = Event::key_press("ctrl_l");
        assert_eq!(press.kind(), EventKind::KeyPress);
        assert_eq!(press.key(), Some(&Key::new("ctrl")));

        let click = Event::click(MouseButton::Left, 1.0, 2.0, true);
        assert_eq!(click.kind(), EventKind::Click);
        assert!(click.key().is_none());
    }

    #[test]
    fn test_volume_clamped() {
        let event = Event::volume(150, false);
        assert!(matches!(event.payload, Payload::VolumeChange { level: 100, .. }));
        assert_eq!(event.to_string(), "VOLUME_CHANGE 100%");
    }
}

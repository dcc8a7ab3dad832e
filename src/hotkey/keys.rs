//! Key identifiers and hotkey sets
//!
//! Keys are normalized lowercase names so that the same physical key
//! reported by different backends (or typed by the caller with a
//! different spelling) compares equal.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DetectorError;

/// A normalized key identifier such as `"a"`, `"ctrl"` or `"f5"`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Key(String);

impl Key {
    /// Create a key from any spelling, applying alias normalization
    pub fn new(name: impl AsRef<str>) -> Self {
        let lower = name.as_ref().trim().to_lowercase();
        let canonical = match lower.as_str() {
            "control" | "ctrl_l" | "ctrl_r" | "leftctrl" | "rightctrl" | "lctrl" | "rctrl" => {
                "ctrl"
            }
            "option" | "alt_l" | "alt_r" | "alt_gr" | "leftalt" | "rightalt" | "lalt" | "ralt" => {
                "alt"
            }
            "shift_l" | "shift_r" | "leftshift" | "rightshift" | "lshift" | "rshift" => "shift",
            "command" | "cmd_l" | "cmd_r" | "meta" | "leftmeta" | "rightmeta" | "super"
            | "win" | "windows" => "cmd",
            "return" => "enter",
            "escape" => "esc",
            "capslock" => "caps_lock",
            "spacebar" => "space",
            _ => return Self(lower),
        };
        Self(canonical.to_string())
    }

    /// The normalized name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}

/// Which physical copy of a doubled key (ctrl, shift, alt, cmd) an event
/// came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// A set of keys that must all be held at the same time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hotkey {
    keys: BTreeSet<Key>,
}

impl Hotkey {
    /// Build a hotkey from any collection of key names.
    ///
    /// Duplicates collapse; an empty set is rejected.
    pub fn new<I, K>(keys: I) -> Result<Self, DetectorError>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        let keys: BTreeSet<Key> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return Err(DetectorError::EmptyHotkey);
        }
        Ok(Self { keys })
    }

    /// Keys in this hotkey, in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// Check whether every key of this hotkey is in `held`
    pub fn is_satisfied_by(&self, held: &HeldKeys) -> bool {
        self.keys.iter().all(|key| held.contains(key))
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.keys.iter().map(Key::as_str).collect();
        write!(f, "{}", parts.join("+"))
    }
}

/// Tracks which keys are currently pressed.
///
/// A key stays held while any of its physical copies is down, so
/// releasing left ctrl while right ctrl is held keeps `ctrl` held.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeldKeys {
    keys: BTreeMap<Key, BTreeSet<Option<Side>>>,
}

impl HeldKeys {
    /// Record a key-down; returns false if that copy was already held
    pub fn press(&mut self, key: &Key, side: Option<Side>) -> bool {
        self.keys.entry(key.clone()).or_default().insert(side)
    }

    /// Record a key-up; returns false if the key was not held.
    ///
    /// A release without a side clears every copy of the key. A sided
    /// release also clears a press that arrived without a side.
    pub fn release(&mut self, key: &Key, side: Option<Side>) -> bool {
        let Some(copies) = self.keys.get_mut(key) else {
            return false;
        };
        let removed = match side {
            None => {
                copies.clear();
                true
            }
            Some(_) => {
                let sided = copies.remove(&side);
                copies.remove(&None) || sided
            }
        };
        if copies.is_empty() {
            self.keys.remove(key);
        }
        removed
    }

    /// Check if no keys are held
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Check if a specific key is held
    pub fn contains(&self, key: &Key) -> bool {
        self.keys.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_aliases() {
        assert_eq!(Key::new("Control"), Key::new("ctrl"));
        assert_eq!(Key::new("ctrl_l"), Key::new("ctrl"));
        assert_eq!(Key::new("LEFTCTRL"), Key::new("ctrl"));
        assert_eq!(Key::new("option").as_str(), "alt");
        assert_eq!(Key::new("super").as_str(), "cmd");
        assert_eq!(Key::new("Return").as_str(), "enter");
        assert_eq!(Key::new(" A ").as_str(), "a");
    }

    #[test]
    fn test_empty_hotkey_rejected() {
        let keys: Vec<&str> = Vec::new();
        assert!(matches!(Hotkey::new(keys), Err(DetectorError::EmptyHotkey)));
    }

    #[test]
    fn test_hotkey_display_sorted() {
        let hotkey = Hotkey::new(["x", "ctrl", "x"]).unwrap();
        assert_eq!(hotkey.to_string(), "ctrl+x");
    }

    #[test]
    fn test_hotkey_satisfied_in_any_order() {
        let hotkey = Hotkey::new(["ctrl", "x"]).unwrap();
        let mut held = HeldKeys::default();

        held.press(&Key::new("x"), None);
        assert!(!hotkey.is_satisfied_by(&held));

        held.press(&Key::new("control"), None);
        assert!(hotkey.is_satisfied_by(&held));

        held.press(&Key::new("shift"), None);
        assert!(hotkey.is_satisfied_by(&held));

        held.release(&Key::new("x"), None);
        assert!(!hotkey.is_satisfied_by(&held));
    }

    #[test]
    fn test_held_keys_press_release() {
        let mut held = HeldKeys::default();
        assert!(held.is_empty());
        assert!(held.press(&Key::new("a"), None));
        assert!(!held.press(&Key::new("a"), None));
        assert!(held.contains(&Key::new("A")));
        assert!(held.release(&Key::new("a"), None));
        assert!(!held.release(&Key::new("a"), None));
        assert!(held.is_empty());
    }

    #[test]
    fn test_key_serde_normalizes() {
        let key: Key = serde_json::from_str("\"Command\"").unwrap();
        assert_eq!(key.as_str(), "cmd");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"cmd\"");
    }

    #[test]
    fn test_held_keys_track_both_sides() {
        let ctrl = Key::new("ctrl");
        let mut held = HeldKeys::default();

        held.press(&ctrl, Some(Side::Left));
        held.press(&ctrl, Some(Side::Right));
        assert!(held.release(&ctrl, Some(Side::Left)));
        assert!(held.contains(&ctrl));

        assert!(held.release(&ctrl, Some(Side::Right)));
        assert!(held.is_empty());
    }

    #[test]
    fn test_unsided_release_clears_all_copies() {
        let shift = Key::new("shift");
        let mut held = HeldKeys::default();

        held.press(&shift, Some(Side::Left));
        held.press(&shift, Some(Side::Right));
        assert!(held.release(&shift, None));
        assert!(!held.contains(&shift));
    }

    #[test]
    fn test_side_serde() {
        assert_eq!(serde_json::to_string(&Side::Left).unwrap(), "\"left\"");
    }
}

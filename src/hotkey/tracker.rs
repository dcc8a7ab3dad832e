//! Held-key tracking and hotkey edge detection
//!
//! A hotkey fires once when its key set becomes fully held and stays
//! "active" until one of its keys is released, so holding the combo (or
//! key autorepeat) does not fire it again.

use std::collections::HashSet;
use std::hash::Hash;

use tracing::debug;

use super::keys::{HeldKeys, Hotkey, Key, Side};

/// Tracks held keys and which hotkeys are currently active.
///
/// `T` identifies a single hotkey spec across calls.
#[derive(Debug)]
pub struct HotkeyTracker<T> {
    held: HeldKeys,
    active: HashSet<T>,
}

impl<T: Copy + Eq + Hash + std::fmt::Debug> HotkeyTracker<T> {
    pub fn new() -> Self {
        Self {
            held: HeldKeys::default(),
            active: HashSet::new(),
        }
    }

    /// Currently held keys
    #[cfg(test)]
    pub fn held(&self) -> &HeldKeys {
        &self.held
    }

    /// Record a key-down and return the specs that just became satisfied
    pub fn key_down<'a, I>(&mut self, key: &Key, side: Option<Side>, specs: I) -> Vec<T>
    where
        I: IntoIterator<Item = (T, &'a Hotkey)>,
    {
        self.held.press(key, side);

        let mut fired = Vec::new();
        for (id, hotkey) in specs {
            if hotkey.is_satisfied_by(&self.held) && self.active.insert(id) {
                debug!(?id, %hotkey, "hotkey satisfied");
                fired.push(id);
            }
        }
        fired
    }

    /// Record a key-up and clear every spec that is no longer satisfied.
    ///
    /// Specs missing from `specs` (removed registrations) are dropped too.
    pub fn key_up<'a, I>(&mut self, key: &Key, side: Option<Side>, specs: I)
    where
        I: IntoIterator<Item = (T, &'a Hotkey)>,
    {
        self.held.release(key, side);

        let still_active: HashSet<T> = specs
            .into_iter()
            .filter(|(id, hotkey)| self.active.contains(id) && hotkey.is_satisfied_by(&self.held))
            .map(|(id, _)| id)
            .collect();

        self.active.retain(|id| still_active.contains(id));
    }

    /// Check if a spec is currently active
    #[cfg(test)]
    pub fn is_active(&self, id: T) -> bool {
        self.active.contains(&id)
    }
}

impl<T: Copy + Eq + Hash + std::fmt::Debug> Default for HotkeyTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctrl_x() -> Hotkey {
        Hotkey::new(["ctrl", "x"]).unwrap()
    }

    #[test]
    fn test_fires_once_while_held() {
        let hotkey = ctrl_x();
        let mut tracker = HotkeyTracker::new();

        assert!(tracker.key_down(&Key::new("ctrl"), None, [(1, &hotkey)]).is_empty());
        assert_eq!(tracker.key_down(&Key::new("x"), None, [(1, &hotkey)]), vec![1]);
        assert!(tracker.is_active(1));

        // Autorepeat and unrelated keys do not refire
        assert!(tracker.key_down(&Key::new("x"), None, [(1, &hotkey)]).is_empty());
        assert!(tracker.key_down(&Key::new("shift"), None, [(1, &hotkey)]).is_empty());
    }

    #[test]
    fn test_press_order_irrelevant() {
        let hotkey = ctrl_x();
        let mut tracker = HotkeyTracker::new();

        assert!(tracker.key_down(&Key::new("x"), None, [(7, &hotkey)]).is_empty());
        assert_eq!(tracker.key_down(&Key::new("ctrl"), None, [(7, &hotkey)]), vec![7]);
    }

    #[test]
    fn test_release_rearms() {
        let hotkey = ctrl_x();
        let mut tracker = HotkeyTracker::new();

        tracker.key_down(&Key::new("ctrl"), None, [(1, &hotkey)]);
        tracker.key_down(&Key::new("x"), None, [(1, &hotkey)]);

        tracker.key_up(&Key::new("x"), None, [(1, &hotkey)]);
        assert!(!tracker.is_active(1));
        assert!(tracker.held().contains(&Key::new("ctrl")));

        assert_eq!(tracker.key_down(&Key::new("x"), None, [(1, &hotkey)]), vec![1]);
    }

    #[test]
    fn test_unrelated_release_keeps_active() {
        let hotkey = ctrl_x();
        let mut tracker = HotkeyTracker::new();

        tracker.key_down(&Key::new("shift"), None, [(1, &hotkey)]);
        tracker.key_down(&Key::new("ctrl"), None, [(1, &hotkey)]);
        tracker.key_down(&Key::new("x"), None, [(1, &hotkey)]);

        tracker.key_up(&Key::new("shift"), None, [(1, &hotkey)]);
        assert!(tracker.is_active(1));
        assert!(tracker.key_down(&Key::new("x"), None, [(1, &hotkey)]).is_empty());
    }

    #[test]
    fn test_independent_specs() {
        let a = ctrl_x();
        let b = Hotkey::new(["ctrl"]).unwrap();
        let mut tracker = HotkeyTracker::new();

        assert_eq!(tracker.key_down(&Key::new("ctrl"), None, [(1, &a), (2, &b)]), vec![2]);
        assert_eq!(tracker.key_down(&Key::new("x"), None, [(1, &a), (2, &b)]), vec![1]);

        tracker.key_up(&Key::new("x"), None, [(1, &a), (2, &b)]);
        assert!(!tracker.is_active(1));
        assert!(tracker.is_active(2));
    }

    #[test]
    fn test_other_side_keeps_modifier_held() {
        let hotkey = ctrl_x();
        let ctrl = Key::new("ctrl");
        let mut tracker = HotkeyTracker::new();

        tracker.key_down(&ctrl, Some(Side::Left), [(1, &hotkey)]);
        tracker.key_down(&ctrl, Some(Side::Right), [(1, &hotkey)]);
        tracker.key_up(&ctrl, Some(Side::Left), [(1, &hotkey)]);

        // Right ctrl is still down
        assert_eq!(tracker.key_down(&Key::new("x"), None, [(1, &hotkey)]), vec![1]);
    }
}

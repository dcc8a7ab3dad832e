//! System volume monitor
//!
//! There is no portable change notification for output volume, so this
//! samples it on an interval with the platform's command-line tool and
//! emits a `VolumeChange` whenever level or mute state differ from the
//! previous sample. Sampling pauses while nobody listens for volume
//! changes; the first sample after a pause is always reported.

use std::io;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::DetectorError;
use crate::events::Event;

/// A sampled volume reading: level in percent and mute state
type Reading = (u8, bool);

pub(crate) struct VolumeMonitor {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl VolumeMonitor {
    pub fn spawn(
        event_tx: mpsc::Sender<Event>,
        interval: Duration,
        wanted: Arc<AtomicBool>,
    ) -> Result<Self, DetectorError> {
        let (stop_tx, stop_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("keynet-volume".to_string())
            .spawn(move || {
                debug!(?interval, "volume monitor started");
                run_monitor(event_tx, stop_rx, interval, &wanted, read_volume);
                debug!("volume monitor stopped");
            })
            .map_err(|e| DetectorError::ThreadSpawn(e.to_string()))?;

        Ok(Self { stop_tx, thread })
    }

    /// Signal the monitor and wait for it to exit.
    ///
    /// Returns after the in-flight sample (if any) finishes.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            warn!("volume monitor thread panicked");
        }
    }
}

fn run_monitor<F>(
    event_tx: mpsc::Sender<Event>,
    stop_rx: mpsc::Receiver<()>,
    interval: Duration,
    wanted: &AtomicBool,
    mut sample: F,
) where
    F: FnMut() -> io::Result<Option<Reading>>,
{
    let mut last: Option<Reading> = None;

    loop {
        if !wanted.load(Ordering::SeqCst) {
            last = None;
        } else {
            match sample() {
                Ok(Some(reading)) if last != Some(reading) => {
                    last = Some(reading);
                    let (level, muted) = reading;
                    if event_tx.send(Event::volume(level, muted)).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("volume tool not found, volume monitoring disabled");
                    return;
                }
                Err(e) => debug!(?e, "volume sample failed"),
            }
        }

        match stop_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            _ => return,
        }
    }
}

#[cfg(target_os = "linux")]
fn read_volume() -> io::Result<Option<Reading>> {
    let output = Command::new("amixer").args(["get", "Master"]).output()?;
    Ok(parse_amixer(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(target_os = "macos")]
fn read_volume() -> io::Result<Option<Reading>> {
    let level = osascript("output volume of (get volume settings)")?;
    let muted = osascript("output muted of (get volume settings)")?;
    Ok(parse_osascript(&level, &muted))
}

#[cfg(target_os = "macos")]
fn osascript(script: &str) -> io::Result<String> {
    let output = Command::new("osascript").args(["-e", script]).output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn read_volume() -> io::Result<Option<Reading>> {
    tracing::info!("volume monitoring is not supported on this platform");
    Err(io::Error::from(io::ErrorKind::NotFound))
}

/// Parse `amixer get Master` output.
///
/// Uses the first line carrying a percentage, e.g.
/// `  Front Left: Playback 45875 [70%] [on]`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_amixer(output: &str) -> Option<Reading> {
    let line = output.lines().find(|line| line.contains('%'))?;
    let start = line.find('[')? + 1;
    let end = start + line[start..].find('%')?;
    let level: u8 = line[start..end].trim().parse().ok()?;
    let muted = line.to_lowercase().contains("[off]");
    Some((level.min(100), muted))
}

/// Parse the two `osascript` answers (volume level and muted flag)
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) fn parse_osascript(level: &str, muted: &str) -> Option<Reading> {
    let level: u8 = level.trim().parse().ok()?;
    let muted = muted.trim().eq_ignore_ascii_case("true");
    Some((level.min(100), muted))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AMIXER_ON: &str = "Simple mixer control 'Master',0
  Capabilities: pvolume pswitch pswitch-joined
  Playback channels: Front Left - Front Right
  Limits: Playback 0 - 65536
  Mono:
  Front Left: Playback 45875 [70%] [on]
  Front Right: Playback 45875 [70%] [on]
";

    #[test]
    fn test_parse_amixer_level() {
        assert_eq!(parse_amixer(AMIXER_ON), Some((70, false)));
    }

    #[test]
    fn test_parse_amixer_muted() {
        let output = AMIXER_ON.replace("[on]", "[off]");
        assert_eq!(parse_amixer(&output), Some((70, true)));
    }

    #[test]
    fn test_parse_amixer_garbage() {
        assert_eq!(parse_amixer(""), None);
        assert_eq!(parse_amixer("Front Left: Playback [abc%]"), None);
        assert_eq!(parse_amixer("no percentages here"), None);
    }

    #[test]
    fn test_parse_osascript() {
        assert_eq!(parse_osascript("42\n", "false\n"), Some((42, false)));
        assert_eq!(parse_osascript("0", "true"), Some((0, true)));
        assert_eq!(parse_osascript("missing value", "false"), None);
    }

    fn spawn_counting(
        wanted: Arc<AtomicBool>,
        readings: Vec<Reading>,
    ) -> (mpsc::Receiver<Event>, mpsc::Sender<()>, Arc<std::sync::Mutex<usize>>, thread::JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let samples = Arc::new(std::sync::Mutex::new(0));
        let thread = {
            let samples = Arc::clone(&samples);
            thread::spawn(move || {
                let sample = move || {
                    let mut count = samples.lock().unwrap();
                    let reading = readings.get(*count).or(readings.last()).copied();
                    *count += 1;
                    Ok::<_, io::Error>(reading)
                };
                run_monitor(event_tx, stop_rx, Duration::from_millis(5), &wanted, sample);
            })
        };
        (event_rx, stop_tx, samples, thread)
    }

    #[test]
    fn test_no_sampling_without_listeners() {
        let wanted = Arc::new(AtomicBool::new(false));
        let (events, stop, samples, thread) = spawn_counting(Arc::clone(&wanted), vec![(40, false)]);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(*samples.lock().unwrap(), 0);
        assert!(events.try_recv().is_err());

        wanted.store(true, Ordering::SeqCst);
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.to_string(), "VOLUME_CHANGE 40%");

        stop.send(()).unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn test_only_changes_reported() {
        let wanted = Arc::new(AtomicBool::new(true));
        let (events, stop, _samples, thread) =
            spawn_counting(wanted, vec![(40, false), (40, false), (55, false), (55, true)]);

        let levels: Vec<String> = (0..3)
            .map(|_| events.recv_timeout(Duration::from_secs(2)).unwrap().to_string())
            .collect();
        assert_eq!(
            levels,
            vec!["VOLUME_CHANGE 40%", "VOLUME_CHANGE 55%", "VOLUME_CHANGE 55% (muted)"]
        );
        assert!(events.recv_timeout(Duration::from_millis(50)).is_err());

        stop.send(()).unwrap();
        thread.join().unwrap();
    }
}

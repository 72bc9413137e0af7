//! Scan throttling: skip background scans of directories indexed moments
//! ago, keyed by `(source, root_id, normalized dir)`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use crate::roots::resolve_lenient;

#[derive(Debug, Default)]
struct ThrottleState {
    /// Set only when metadata extraction completed for the directory.
    manual: HashMap<String, Instant>,
    /// Set for every scheduled/executed background scan.
    recent: HashMap<String, Instant>,
}

#[derive(Debug)]
pub struct ScanThrottle {
    state: Mutex<ThrottleState>,
    grace_s: f64,
    max_entry_age_s: f64,
}

fn scan_key(directory: &str, source: &str, root_id: Option<&str>) -> String {
    let normalized = if directory.is_empty() {
        String::new()
    } else {
        resolve_lenient(Path::new(directory))
            .to_string_lossy()
            .into_owned()
    };
    format!("{source}|{}|{normalized}", root_id.unwrap_or(""))
}

impl ScanThrottle {
    pub fn new(grace_s: f64) -> Self {
        ScanThrottle {
            state: Mutex::new(ThrottleState::default()),
            grace_s,
            max_entry_age_s: (grace_s * 5.0).max(600.0),
        }
    }

    /// Record a completed index of a directory. Only counts toward the
    /// grace window when metadata extraction also completed.
    pub fn mark_directory_indexed(
        &self,
        directory: &str,
        source: &str,
        root_id: Option<&str>,
        metadata_complete: bool,
    ) {
        if !metadata_complete {
            return;
        }
        let key = scan_key(directory, source, root_id);
        let mut state = self.state.lock().expect("throttle lock");
        state.manual.insert(key, Instant::now());
        self.cleanup_locked(&mut state);
    }

    /// Record any scheduled/executed background scan, regardless of
    /// metadata completeness. Prevents repeated fast scans of an empty DB.
    pub fn mark_directory_scanned(
        &self,
        directory: &str,
        source: &str,
        root_id: Option<&str>,
    ) {
        let key = scan_key(directory, source, root_id);
        let mut state = self.state.lock().expect("throttle lock");
        state.recent.insert(key, Instant::now());
        self.cleanup_locked(&mut state);
    }

    /// True when a recent index of the same directory/source/root falls
    /// inside the grace window.
    pub fn should_skip_background_scan(
        &self,
        directory: &str,
        source: &str,
        root_id: Option<&str>,
        include_recent: bool,
    ) -> bool {
        let key = scan_key(directory, source, root_id);
        let mut state = self.state.lock().expect("throttle lock");
        let at = match state.manual.get(&key) {
            Some(at) => *at,
            None if include_recent => match state.recent.get(&key) {
                Some(at) => *at,
                None => return false,
            },
            None => return false,
        };
        let age = at.elapsed().as_secs_f64();
        if age < self.grace_s {
            return true;
        }
        if age > self.max_entry_age_s {
            state.manual.remove(&key);
            state.recent.remove(&key);
        }
        false
    }

    fn cleanup_locked(&self, state: &mut ThrottleState) {
        let max_age = self.max_entry_age_s;
        state
            .manual
            .retain(|_, at| at.elapsed().as_secs_f64() < max_age);
        state
            .recent
            .retain(|_, at| at.elapsed().as_secs_f64() < max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_only_inside_grace_window() {
        let throttle = ScanThrottle::new(30.0);
        assert!(!throttle.should_skip_background_scan("/out", "output", None, false));

        throttle.mark_directory_indexed("/out", "output", None, true);
        assert!(throttle.should_skip_background_scan("/out", "output", None, false));
        // Different source is a different key.
        assert!(!throttle.should_skip_background_scan("/out", "input", None, false));
    }

    #[test]
    fn incomplete_metadata_does_not_mark() {
        let throttle = ScanThrottle::new(30.0);
        throttle.mark_directory_indexed("/out", "output", None, false);
        assert!(!throttle.should_skip_background_scan("/out", "output", None, false));

        // But a plain scan mark is visible via include_recent.
        throttle.mark_directory_scanned("/out", "output", None);
        assert!(!throttle.should_skip_background_scan("/out", "output", None, false));
        assert!(throttle.should_skip_background_scan("/out", "output", None, true));
    }

    #[test]
    fn zero_grace_never_skips() {
        let throttle = ScanThrottle::new(0.0);
        throttle.mark_directory_indexed("/out", "output", None, true);
        assert!(!throttle.should_skip_background_scan("/out", "output", None, false));
    }
}

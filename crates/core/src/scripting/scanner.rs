//! Hot-reload scanning
//!
//! Walks the script directory and diffs modification times against the
//! loaded modules. Traversal is sorted per directory, so discovery order is
//! stable across passes and platforms.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use walkdir::WalkDir;

/// A script file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub mtime: SystemTime,
}

/// What a pass should do with a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAction {
    /// Not loaded yet
    Load,
    /// Loaded, but the file on disk is newer
    Reload,
}

/// Work decided by one pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    pub actions: Vec<(Candidate, ScanAction)>,
    /// Loaded modules whose file no longer exists
    pub missing: Vec<PathBuf>,
}

impl ScanPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.missing.is_empty()
    }
}

/// Outcome of one pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub loaded: Vec<PathBuf>,
    pub reloaded: Vec<PathBuf>,
    pub unloaded: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl ScanReport {
    /// Whether the pass changed nothing
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
            && self.reloaded.is_empty()
            && self.unloaded.is_empty()
            && self.failed.is_empty()
    }
}

/// Find every file under `root` with `extension`, in traversal order
///
/// Unreadable entries (permission denied, vanished files) are skipped.
pub fn discover(root: &Path, extension: &str) -> Vec<Candidate> {
    let mut found = Vec::new();

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.depth() == 0 {
                    tracing::debug!("Script directory {:?} not readable: {}", root, err);
                } else {
                    tracing::debug!("Skipping unreadable entry: {}", err);
                }
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) != Some(extension) {
            continue;
        }

        let mtime = match entry.metadata().map(|meta| meta.modified()) {
            Ok(Ok(mtime)) => mtime,
            Ok(Err(err)) => {
                tracing::debug!("No modification time for {:?}: {}", entry.path(), err);
                continue;
            }
            Err(err) => {
                tracing::debug!("Skipping {:?}: {}", entry.path(), err);
                continue;
            }
        };

        found.push(Candidate {
            path: entry.into_path(),
            mtime,
        });
    }

    found
}

/// Diff what is on disk against what is loaded
pub fn plan(loaded: &[(PathBuf, SystemTime)], candidates: Vec<Candidate>, unload_missing: bool) -> ScanPlan {
    let missing = if unload_missing {
        loaded
            .iter()
            .filter(|(path, _)| !candidates.iter().any(|c| &c.path == path))
            .map(|(path, _)| path.clone())
            .collect()
    } else {
        Vec::new()
    };

    let actions = candidates
        .into_iter()
        .filter_map(|candidate| {
            match loaded.iter().find(|(path, _)| *path == candidate.path) {
                None => Some((candidate, ScanAction::Load)),
                Some((_, mtime)) if candidate.mtime > *mtime => Some((candidate, ScanAction::Reload)),
                Some(_) => None,
            }
        })
        .collect();

    ScanPlan { actions, missing }
}

/// Lets a pass through at most once per interval
#[derive(Debug, Clone)]
pub struct ScanThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ScanThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a pass may run at `now`; if so, starts the next interval
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Count the current instant as a pass
    pub fn reset(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::temp_path;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn candidate(path: &str, secs: u64) -> Candidate {
        Candidate {
            path: PathBuf::from(path),
            mtime: at(secs),
        }
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let root = temp_path("discover");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("b.lua"), "").unwrap();
        std::fs::write(root.join("a.lua"), "").unwrap();
        std::fs::write(root.join("notes.txt"), "").unwrap();
        std::fs::write(root.join("sub").join("c.lua"), "").unwrap();

        let found: Vec<PathBuf> = discover(&root, "lua").into_iter().map(|c| c.path).collect();
        assert_eq!(
            found,
            vec![
                root.join("a.lua"),
                root.join("b.lua"),
                root.join("sub").join("c.lua"),
            ]
        );

        std::fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_discover_missing_root_is_empty() {
        assert!(discover(&temp_path("absent"), "lua").is_empty());
    }

    #[test]
    fn test_plan_load_reload_skip() {
        let loaded = vec![(PathBuf::from("a.lua"), at(10)), (PathBuf::from("b.lua"), at(10))];
        let candidates = vec![candidate("a.lua", 11), candidate("b.lua", 10), candidate("c.lua", 1)];

        let plan = plan(&loaded, candidates, true);
        assert_eq!(
            plan.actions,
            vec![
                (candidate("a.lua", 11), ScanAction::Reload),
                (candidate("c.lua", 1), ScanAction::Load),
            ]
        );
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn test_plan_unchanged_is_empty() {
        let loaded = vec![(PathBuf::from("a.lua"), at(10))];
        assert!(plan(&loaded, vec![candidate("a.lua", 10)], true).is_empty());
    }

    #[test]
    fn test_plan_missing_respects_setting() {
        let loaded = vec![(PathBuf::from("gone.lua"), at(10))];
        assert_eq!(plan(&loaded, Vec::new(), true).missing, vec![PathBuf::from("gone.lua")]);
        assert!(plan(&loaded, Vec::new(), false).is_empty());
    }

    #[test]
    fn test_throttle() {
        let mut throttle = ScanThrottle::new(Duration::from_millis(500));
        let start = Instant::now();

        assert!(throttle.ready(start));
        assert!(!throttle.ready(start + Duration::from_millis(499)));
        assert!(throttle.ready(start + Duration::from_millis(500)));
        assert!(!throttle.ready(start + Duration::from_millis(600)));
    }
}

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use agbridge_core::humanize_age;
use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

pub const SESSIONS_DIR_ENV: &str = "AGBRIDGE_SESSIONS_DIR";
pub const DISCOVERY_CACHE_TTL: Duration = Duration::from_secs(60);

const SESSION_FILE_NAME: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Stat-level facts about one session file. The file body is never read.
pub struct SessionMetadata {
    pub id: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub age: String,
}

#[derive(Debug)]
struct CachedListing {
    sessions: Vec<SessionMetadata>,
    captured_at: Instant,
}

#[derive(Debug)]
/// Lists sessions across ordered search roots with a short-lived cache.
pub struct SessionDiscovery {
    roots: Vec<PathBuf>,
    ttl: Duration,
    cache: Mutex<Option<CachedListing>>,
}

impl Default for SessionDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionDiscovery {
    /// Uses the environment override followed by the platform default.
    pub fn new() -> Self {
        Self::with_roots(default_search_roots())
    }

    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            ttl: DISCOVERY_CACHE_TTL,
            cache: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Returns every session, newest first.
    pub fn discover(&self) -> Vec<SessionMetadata> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(listing) = cache.as_ref() {
            if listing.captured_at.elapsed() < self.ttl {
                return listing.sessions.clone();
            }
        }

        let sessions = scan_roots(&self.roots, Utc::now());
        tracing::debug!(
            sessions = sessions.len(),
            roots = self.roots.len(),
            "rebuilt session listing"
        );
        *cache = Some(CachedListing {
            sessions: sessions.clone(),
            captured_at: Instant::now(),
        });
        sessions
    }

    pub fn latest(&self) -> Option<SessionMetadata> {
        self.discover().into_iter().next()
    }

    pub fn by_id(&self, id: &str) -> Option<SessionMetadata> {
        self.discover().into_iter().find(|session| session.id == id)
    }

    /// Drops the cached listing so the next call rescans.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Search roots in priority order: `AGBRIDGE_SESSIONS_DIR`, then the
/// platform default for the running OS.
pub fn default_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(dir) = std::env::var_os(SESSIONS_DIR_ENV).filter(|dir| !dir.is_empty()) {
        roots.push(PathBuf::from(dir));
    }
    let appdata = std::env::var_os("APPDATA").map(PathBuf::from);
    if let Some(dir) = platform_sessions_dir(
        std::env::consts::OS,
        dirs::home_dir().as_deref(),
        appdata.as_deref(),
    ) {
        if !roots.contains(&dir) {
            roots.push(dir);
        }
    }
    roots
}

pub fn platform_sessions_dir(
    os: &str,
    home: Option<&Path>,
    appdata: Option<&Path>,
) -> Option<PathBuf> {
    match os {
        "linux" => Some(home?.join(".config").join("Antigravity").join("sessions")),
        "macos" => Some(
            home?
                .join("Library")
                .join("Application Support")
                .join("Antigravity")
                .join("sessions"),
        ),
        "windows" => {
            let base = match appdata {
                Some(appdata) => appdata.to_path_buf(),
                None => home?.join("AppData").join("Roaming"),
            };
            Some(base.join("Antigravity").join("sessions"))
        }
        _ => None,
    }
}

fn scan_roots(roots: &[PathBuf], now: DateTime<Utc>) -> Vec<SessionMetadata> {
    let mut seen = HashSet::new();
    let mut sessions = Vec::new();
    for root in roots {
        for session in scan_root(root, now) {
            if seen.insert(session.id.clone()) {
                sessions.push(session);
            }
        }
    }
    sessions.sort_by(|left, right| {
        right
            .modified
            .cmp(&left.modified)
            .then_with(|| left.id.cmp(&right.id))
    });
    sessions
}

fn scan_root(root: &Path, now: DateTime<Utc>) -> Vec<SessionMetadata> {
    if !root.is_dir() {
        return Vec::new();
    }
    let mut sessions = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::debug!(root = %root.display(), %error, "skipping unreadable session entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(id) = candidate_id(entry.path(), entry.depth()) else {
            continue;
        };
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::debug!(path = %entry.path().display(), %error, "skipping session without metadata");
                continue;
            }
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified = DateTime::<Utc>::from(modified);
        sessions.push(SessionMetadata {
            id,
            path: entry.path().to_path_buf(),
            modified,
            size: metadata.len(),
            age: humanize_age(modified, now),
        });
    }
    sessions
}

fn candidate_id(path: &Path, depth: usize) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    if file_name.starts_with('.') {
        return None;
    }
    match depth {
        1 => file_name
            .strip_suffix(".json")
            .filter(|stem| !stem.is_empty())
            .map(str::to_string),
        2 if file_name == SESSION_FILE_NAME => path
            .parent()?
            .file_name()?
            .to_str()
            .filter(|name| !name.starts_with('.'))
            .map(str::to_string),
        _ => None,
    }
}

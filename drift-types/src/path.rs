//! Stochastic search for filesystem paths matching a set of constraints.
//!
//! Listing a whole container filesystem to pick one path is slow and heavily
//! biased towards large directories, so paths are found with a random walk
//! instead. At every directory a weighted coin decides whether to stop and
//! pick an entry from the current directory or to descend into a random
//! subdirectory. The stop probability grows on every descent and on every
//! backtrack, which bounds the walk.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NoPathCause, ValueError};
use crate::host::GenContext;
use crate::value::{Value, ValueType};

pub const DESCENT_FACTOR: f64 = 1.5;
pub const BACKTRACK_FACTOR: f64 = 2.0;
pub const INITIAL_STOP_CHANCE: f64 = 0.005;
/// Whole-walk attempts before giving up with cause 3.
pub const WALK_ATTEMPTS: usize = 100;

/// Where the agent binary is mounted inside containers.
pub const AGENT_DIR: &str = "/usr/lib/drift";

/// Volatile, pseudo and system paths that are never handed out.
pub const IGNORE_PATTERN: &str = r"^/(tmp|proc|mnt|run|dev|lib\w*|sys|usr/lib/drift)(/|$)|\.socket$";

/// Paths whose removal would break the container or the session.
pub const PROTECT_PATTERN: &str =
    r"^/(etc$|etc/hostname$|sbin|usr/sbin|usr/lib|boot|bin|usr/bin|root/\.ssh$)";

/// Directories that deletable picks must never contain.
pub const PROTECTED_ANCHORS: [&str; 9] = [
    "/etc",
    "/bin",
    "/sbin",
    "/boot",
    "/usr/bin",
    "/usr/sbin",
    "/usr/lib",
    "/root/.ssh",
    AGENT_DIR,
];

static DEFAULT_POLICY: Lazy<PathPolicy> = Lazy::new(|| PathPolicy {
    root: PathBuf::from("/"),
    ignore: Regex::new(IGNORE_PATTERN).expect("ignore pattern compiles"),
    protect: Regex::new(PROTECT_PATTERN).expect("protect pattern compiles"),
    anchors: PROTECTED_ANCHORS.iter().map(PathBuf::from).collect(),
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::File => f.write_str("file"),
            FileType::Directory => f.write_str("directory"),
        }
    }
}

/// The concrete constraints of a single walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathConstraints {
    pub existing: bool,
    pub file_type: FileType,
    pub deletable: bool,
    /// Only meaningful for directories.
    pub empty: bool,
}

impl fmt::Display for PathConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "existing={}, filetype={}, deletable={}, empty={}",
            self.existing, self.file_type, self.deletable, self.empty
        )
    }
}

/// Root of the walk plus the two deny lists.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    root: PathBuf,
    ignore: Regex,
    protect: Regex,
    anchors: Vec<PathBuf>,
}

impl PathPolicy {
    pub fn new(
        root: impl Into<PathBuf>,
        ignore: &str,
        protect: &str,
        anchors: Vec<PathBuf>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            root: root.into(),
            ignore: Regex::new(ignore)?,
            protect: Regex::new(protect)?,
            anchors,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.is_match(&path.to_string_lossy())
    }

    pub fn is_protected(&self, path: &Path) -> bool {
        self.protect.is_match(&path.to_string_lossy())
    }

    /// True when `dir` is, or is an ancestor of, a protected anchor.
    pub fn contains_protected(&self, dir: &Path) -> bool {
        self.anchors.iter().any(|anchor| anchor.starts_with(dir))
    }

    fn admissible(&self, path: &Path, constraints: &PathConstraints) -> bool {
        if self.is_ignored(path) || self.is_protected(path) {
            return false;
        }
        !(constraints.deletable && self.contains_protected(path))
    }

    /// One walk from the root. Fails with cause 1 or 2 when backtracking
    /// runs past the root.
    pub fn walk(
        &self,
        constraints: &PathConstraints,
        rng: &mut dyn RngCore,
    ) -> Result<PathBuf, ValueError> {
        let mut dir = self.root.clone();
        let mut stop_chance = INITIAL_STOP_CHANCE;

        loop {
            let stop = rng.gen_bool(stop_chance);
            let listing = self.list(&dir);

            let cause = if stop {
                if !constraints.existing {
                    if let Some(path) = self.fresh_name(&dir, rng) {
                        return Ok(path);
                    }
                    NoPathCause::EmptyAtStop
                } else {
                    let candidates = self.candidates(&dir, &listing, constraints);
                    if let Some(pick) = candidates.choose(rng) {
                        return Ok(pick.clone());
                    }
                    NoPathCause::EmptyAtStop
                }
            } else if let Some(next) = listing.dirs.choose(rng) {
                dir = next.clone();
                stop_chance = bound(stop_chance * DESCENT_FACTOR);
                continue;
            } else {
                NoPathCause::NoDirectoryToDescend
            };

            // backtrack
            if dir == self.root {
                return Err(ValueError::NoPath {
                    constraints: *constraints,
                    cause,
                });
            }
            dir = match dir.parent() {
                Some(parent) => parent.to_path_buf(),
                None => self.root.clone(),
            };
            stop_chance = bound(stop_chance * BACKTRACK_FACTOR);
        }
    }

    fn candidates(
        &self,
        dir: &Path,
        listing: &Listing,
        constraints: &PathConstraints,
    ) -> Vec<PathBuf> {
        let wants_empty_dir = constraints.file_type == FileType::Directory && constraints.empty;
        // An empty directory we stopped in is itself a candidate.
        if wants_empty_dir
            && dir != self.root
            && listing.is_empty()
            && self.admissible(dir, constraints)
        {
            return vec![dir.to_path_buf()];
        }

        let entries = match constraints.file_type {
            FileType::Directory => &listing.dirs,
            FileType::File => &listing.files,
        };
        entries
            .iter()
            .filter(|path| self.admissible(path, constraints))
            .filter(|path| !wants_empty_dir || is_empty_dir(path))
            .cloned()
            .collect()
    }

    fn fresh_name(&self, dir: &Path, rng: &mut dyn RngCore) -> Option<PathBuf> {
        for _ in 0..16 {
            let len = rng.gen_range(5..15);
            let name: String = (0..len).map(|_| rng.sample(Alphanumeric) as char).collect();
            let path = dir.join(name);
            if fs::symlink_metadata(&path).is_err() && !self.is_ignored(&path) && !self.is_protected(&path) {
                return Some(path);
            }
        }
        None
    }

    /// Subdirectories (ignore-list applied) and regular files of `dir`.
    /// Symlinks are never listed. Unreadable directories list as empty.
    fn list(&self, dir: &Path) -> Listing {
        let mut listing = Listing::default();
        let Ok(entries) = fs::read_dir(dir) else {
            return listing;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                if !self.is_ignored(&path) {
                    listing.dirs.push(path);
                }
            } else if file_type.is_file() {
                listing.files.push(path);
            }
        }
        // read_dir order is filesystem dependent
        listing.dirs.sort();
        listing.files.sort();
        listing
    }
}

impl Default for PathPolicy {
    fn default() -> Self {
        DEFAULT_POLICY.clone()
    }
}

#[derive(Debug, Default)]
struct Listing {
    dirs: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

impl Listing {
    fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Clamps a probability to `[0, 1]`.
fn bound(p: f64) -> f64 {
    p.clamp(0.0, 1.0)
}

/// Generator for a path; unset options are rolled per call.
#[derive(Debug, Clone, Default)]
pub struct PathType {
    pub existing: Option<bool>,
    pub file_type: Option<FileType>,
    pub deletable: bool,
    pub empty: bool,
    pub policy: PathPolicy,
}

impl PathType {
    pub fn new(policy: PathPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn existing(mut self, existing: bool) -> Self {
        self.existing = Some(existing);
        self
    }

    pub fn file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    pub fn deletable(mut self, deletable: bool) -> Self {
        self.deletable = deletable;
        self
    }

    pub fn empty(mut self, empty: bool) -> Self {
        self.empty = empty;
        self
    }

    fn roll(&self, rng: &mut dyn RngCore) -> PathConstraints {
        let existing = self.existing.unwrap_or_else(|| rng.gen_bool(0.5));
        let file_type = self.file_type.unwrap_or_else(|| {
            if rng.gen_bool(0.5) {
                FileType::File
            } else {
                FileType::Directory
            }
        });
        PathConstraints {
            existing,
            file_type,
            deletable: self.deletable,
            empty: self.empty && file_type == FileType::Directory,
        }
    }

    pub fn generate_path(&self, rng: &mut dyn RngCore) -> Result<PathBuf, ValueError> {
        let constraints = self.roll(rng);
        for _ in 0..WALK_ATTEMPTS {
            match self.policy.walk(&constraints, rng) {
                Ok(path) => return Ok(path),
                Err(ValueError::NoPath { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        log::debug!("Path walk gave up after {WALK_ATTEMPTS} attempts: {constraints}");
        Err(ValueError::NoPath {
            constraints,
            cause: NoPathCause::RetriesExhausted,
        })
    }
}

impl ValueType for PathType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        let path = self.generate_path(ctx.rng)?;
        Ok(Value::Path(path.to_string_lossy().into_owned()))
    }

    fn describe(&self) -> String {
        format!(
            "path under {} (existing={:?}, filetype={:?}, deletable={}, empty={})",
            self.policy.root().display(),
            self.existing,
            self.file_type,
            self.deletable,
            self.empty
        )
    }
}

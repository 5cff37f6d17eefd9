use std::fmt;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::host::GenContext;
use crate::path::{FileType, PathPolicy, PathType};
use crate::target::Target;
use crate::value::{Value, ValueType};

/// Symlink source re-rolls before giving up.
const SOURCE_ATTEMPTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    File,
    Directory,
    #[serde(rename = "link")]
    Symlink,
    Absent,
}

impl FileState {
    pub const ALL: [FileState; 4] = [
        FileState::File,
        FileState::Directory,
        FileState::Symlink,
        FileState::Absent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::File => "file",
            FileState::Directory => "directory",
            FileState::Symlink => "link",
            FileState::Absent => "absent",
        }
    }

    pub fn transform(&self, target: Target) -> String {
        target.quote(self.as_str())
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A path together with the kind of object expected at it. Symlinks also
/// carry their source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathState {
    pub path: String,
    pub state: FileState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

impl PathState {
    pub fn new(path: impl Into<String>, state: FileState) -> Self {
        Self {
            path: path.into(),
            state,
            src: None,
        }
    }

    pub fn symlink(dest: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            path: dest.into(),
            state: FileState::Symlink,
            src: Some(src.into()),
        }
    }

    pub fn absent(path: impl Into<String>) -> Self {
        Self::new(path, FileState::Absent)
    }

    /// Renders the path itself; the state is rendered by the wrapper.
    pub fn transform(&self, target: Target) -> String {
        target.quote(&self.path)
    }

    pub fn transform_src(&self, target: Target) -> Option<String> {
        self.src.as_deref().map(|src| target.quote(src))
    }
}

impl fmt::Display for PathState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.src {
            Some(src) => write!(f, "[{}] [dst] {} [src] {}", self.state, self.path, src),
            None => write!(f, "[{}] {}", self.state, self.path),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathStateType {
    pub policy: PathPolicy,
}

impl PathStateType {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }

    fn symlink(&self, ctx: &mut GenContext<'_>) -> Result<PathState, ValueError> {
        let file_type = *[FileType::File, FileType::Directory]
            .choose(ctx.rng)
            .unwrap_or(&FileType::File);
        // an existing destination is replaced by the link
        let dest = PathType::new(self.policy.clone())
            .file_type(file_type)
            .empty(file_type == FileType::Directory)
            .deletable(true)
            .generate_path(ctx.rng)?;
        let src_type = PathType::new(self.policy.clone())
            .existing(true)
            .file_type(file_type);

        for _ in 0..SOURCE_ATTEMPTS {
            let src = src_type.generate_path(ctx.rng)?;
            if src != dest {
                return Ok(PathState::symlink(
                    dest.to_string_lossy(),
                    src.to_string_lossy(),
                ));
            }
        }
        Err(ValueError::NoCandidate {
            constraints: format!("symlink source distinct from {}", dest.display()),
        })
    }
}

impl ValueType for PathStateType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        let state = *FileState::ALL.choose(ctx.rng).unwrap_or(&FileState::File);
        let path_state = match state {
            FileState::Symlink => self.symlink(ctx)?,
            FileState::File | FileState::Directory | FileState::Absent => {
                let mut path_type = PathType::new(self.policy.clone())
                    .deletable(state == FileState::Absent);
                path_type.file_type = match state {
                    FileState::File => Some(FileType::File),
                    FileState::Directory => Some(FileType::Directory),
                    _ => None,
                };
                let path = path_type.generate_path(ctx.rng)?;
                PathState::new(path.to_string_lossy(), state)
            }
        };
        Ok(Value::PathState(path_state))
    }

    fn describe(&self) -> String {
        format!("path state under {}", self.policy.root().display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StaticHost;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;

    fn policy(root: &std::path::Path) -> PathPolicy {
        PathPolicy::new(root, "^$", "^$", Vec::new()).unwrap()
    }

    #[test]
    fn test_symlink_source_differs_from_destination() {
        let dir = tempfile::tempdir().unwrap();
        // a single file and a single empty dir keep collisions likely
        fs::write(dir.path().join("only"), "x").unwrap();
        fs::create_dir(dir.path().join("box")).unwrap();

        let generator = PathStateType::new(policy(dir.path()));
        let host = StaticHost::default();
        let mut rng = StdRng::seed_from_u64(42);
        let mut links = 0;
        for _ in 0..200 {
            let mut ctx = GenContext::new(&mut rng, &host);
            match generator.symlink(&mut ctx) {
                Ok(state) => {
                    links += 1;
                    assert_eq!(state.state, FileState::Symlink);
                    assert_ne!(Some(state.path.as_str()), state.src.as_deref());
                }
                Err(e) => assert!(e.is_generation_failure(), "{e}"),
            }
        }
        assert!(links > 0);
    }

    #[test]
    fn test_display_and_transform() {
        let link = PathState::symlink("/srv/a", "/srv/b");
        assert_eq!(link.to_string(), "[link] [dst] /srv/a [src] /srv/b");
        assert_eq!(link.transform(Target::Ansible), "'/srv/a'");
        assert_eq!(link.transform_src(Target::Pyinfra).as_deref(), Some("\"/srv/b\""));
        assert_eq!(FileState::Symlink.transform(Target::Ansible), "'link'");
    }
}

use std::fs;
use std::os::unix::fs::MetadataExt;

use drift_types::{
    Definition, FileState, Group, GroupType, Host, Mode, ModeType, PathPolicy, PathState,
    PathStateType, State, Target, User, UserType, Value,
};

use super::{ensure_supported, field, VerifyOptions, Wrapper};
use crate::errors::WrapperError;
use crate::identifier::Identifier;

/// Files, directories and symlinks with ownership and mode.
#[derive(Debug, Clone, Default)]
pub struct File {
    policy: PathPolicy,
}

impl File {
    pub const NAME: &'static str = "file";

    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }

    fn render_ansible(&self, path: &PathState, s: &Rendered) -> String {
        let target = Target::Ansible;
        match path.state {
            FileState::Symlink => format!(
                "ansible.builtin.file:\n  dest: {}\n  src: {}\n  force: true\n  state: {}\n  owner: {}\n  group: {}\n  mode: {}\n",
                path.transform(target),
                path.transform_src(target).unwrap_or_default(),
                path.state.transform(target),
                s.owner,
                s.group,
                s.mode,
            ),
            _ => {
                let state = match path.state {
                    FileState::File => target.quote("touch"),
                    other => other.transform(target),
                };
                format!(
                    "ansible.builtin.file:\n  path: {}\n  state: {}\n  owner: {}\n  group: {}\n  mode: {}\n",
                    path.transform(target),
                    state,
                    s.owner,
                    s.group,
                    s.mode,
                )
            }
        }
    }

    fn render_pyinfra(&self, path: &PathState, s: &Rendered) -> String {
        let target = Target::Pyinfra;
        match path.state {
            FileState::Symlink => format!(
                "files.link(\n    path={},\n    target={},\n    present=True,\n    user={},\n    group={},\n    force=True,\n)\n",
                path.transform(target),
                path.transform_src(target).unwrap_or_default(),
                s.owner,
                s.group,
            ),
            FileState::Directory => format!(
                "files.directory(\n    path={},\n    present=True,\n    user={},\n    group={},\n    mode={},\n)\n",
                path.transform(target),
                s.owner,
                s.group,
                s.mode,
            ),
            FileState::File | FileState::Absent => format!(
                "files.file(\n    path={},\n    present={},\n    user={},\n    group={},\n    mode={},\n)\n",
                path.transform(target),
                if path.state == FileState::Absent { "False" } else { "True" },
                s.owner,
                s.group,
                s.mode,
            ),
        }
    }

    /// Reads what is at `path` now. `None` when nothing can be observed.
    fn observe(path: &str, host: &dyn Host) -> Option<State> {
        let link_meta = fs::symlink_metadata(path).ok()?;
        let (path_state, meta) = if link_meta.file_type().is_symlink() {
            let src = fs::read_link(path).ok()?;
            // ownership and mode are those of the link target
            let meta = fs::metadata(path).ok()?;
            (
                PathState::symlink(path, src.to_string_lossy()),
                meta,
            )
        } else if link_meta.is_dir() {
            (PathState::new(path, FileState::Directory), link_meta)
        } else {
            (PathState::new(path, FileState::File), link_meta)
        };

        let owner = host
            .user_by_uid(meta.uid())
            .unwrap_or_else(|| User::new(meta.uid().to_string(), meta.uid()));
        let group = host
            .group_by_gid(meta.gid())
            .unwrap_or_else(|| Group::new(meta.gid().to_string(), meta.gid()));

        Some(
            State::new()
                .with("path", Value::PathState(path_state))
                .with("owner", Value::User(owner))
                .with("group", Value::Group(group))
                .with("mode", Value::Mode(Mode::parse(meta.mode()))),
        )
    }
}

struct Rendered {
    owner: String,
    group: String,
    mode: String,
}

impl Wrapper for File {
    fn identifier(&self) -> Identifier {
        Identifier::new(Self::NAME)
    }

    fn definition(&self) -> Definition {
        Definition::new()
            .field("path", PathStateType::new(self.policy.clone()))
            .field("owner", UserType)
            .field("group", GroupType)
            .field("mode", ModeType)
    }

    fn supported_targets(&self) -> &'static [Target] {
        &[Target::Ansible, Target::Pyinfra]
    }

    fn transform(&self, target: Target, state: &State) -> Result<String, WrapperError> {
        ensure_supported(self, target)?;
        let path = field(self, state, "path")?
            .as_path_state()
            .ok_or_else(|| WrapperError::MissingField {
                wrapper: self.identifier(),
                field: "path".to_string(),
            })?;
        let rendered = Rendered {
            owner: field(self, state, "owner")?.transform(target)?,
            group: field(self, state, "group")?.transform(target)?,
            mode: field(self, state, "mode")?.transform(target)?,
        };
        Ok(match target {
            Target::Ansible => self.render_ansible(path, &rendered),
            Target::Pyinfra => self.render_pyinfra(path, &rendered),
        })
    }

    fn verify(&self, expected: &State, host: &dyn Host, _options: &VerifyOptions) -> State {
        let Some(path) = expected.get("path").and_then(Value::as_path_state) else {
            log::warn!("File verify called without a path field: {expected}");
            return expected.clone();
        };

        match Self::observe(&path.path, host) {
            Some(observed) => observed,
            None => {
                log::debug!("{} is not observable, reporting it absent", path.path);
                let mut absent = expected.clone();
                absent.insert("path", Value::PathState(PathState::absent(path.path.clone())));
                absent
            }
        }
    }
}

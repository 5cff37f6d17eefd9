use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::host::GenContext;
use crate::target::Target;
use crate::value::{Value, ValueType};

/// Number of distinct permission triples (8 per subject).
pub const MODE_SPACE: u32 = 512;

const READ: u32 = 0o4;
const WRITE: u32 = 0o2;
const EXECUTE: u32 = 0o1;

/// Read/write/execute flags for one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permission {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permission {
    /// Tests the three flag bits of a subject, `shift` selecting the subject.
    fn parse(raw: u32, shift: u32) -> Self {
        Self {
            read: raw & (READ << shift) != 0,
            write: raw & (WRITE << shift) != 0,
            execute: raw & (EXECUTE << shift) != 0,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.read {
            bits |= READ;
        }
        if self.write {
            bits |= WRITE;
        }
        if self.execute {
            bits |= EXECUTE;
        }
        bits
    }
}

/// A file permission mode as user/group/other triples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Mode {
    pub user: Permission,
    pub group: Permission,
    pub other: Permission,
}

impl Mode {
    /// Decodes an `st_mode` style bit field. File type, setuid, setgid and
    /// sticky bits are ignored.
    pub fn parse(raw: u32) -> Self {
        Self {
            user: Permission::parse(raw, 6),
            group: Permission::parse(raw, 3),
            other: Permission::parse(raw, 0),
        }
    }

    pub fn to_bits(&self) -> u32 {
        (self.user.bits() << 6) | (self.group.bits() << 3) | self.other.bits()
    }

    /// Three digit octal form, e.g. `644`.
    pub fn octal(&self) -> String {
        format!("{:03o}", self.to_bits())
    }

    pub fn transform(&self, target: Target) -> String {
        match target {
            Target::Ansible => format!("'0{}'", self.octal()),
            Target::Pyinfra => format!("\"{}\"", self.octal()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0{}", self.octal())
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.octal()
    }
}

impl TryFrom<String> for Mode {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let bits = u32::from_str_radix(raw.trim_start_matches("0o"), 8)
            .map_err(|e| format!("invalid mode '{raw}': {e}"))?;
        if bits >= MODE_SPACE {
            return Err(format!("mode '{raw}' carries bits beyond rwx"));
        }
        Ok(Mode::parse(bits))
    }
}

/// Uniform over all 512 modes.
#[derive(Debug, Default)]
pub struct ModeType;

impl ValueType for ModeType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        Ok(Value::Mode(Mode::parse(ctx.rng.gen_range(0..MODE_SPACE))))
    }

    fn describe(&self) -> String {
        "mode".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_ignores_file_type_and_special_bits() {
        // regular file, setuid, rw-r--r--
        let mode = Mode::parse(0o100000 | 0o4000 | 0o644);
        assert_eq!(mode.octal(), "644");
        assert!(mode.user.read && mode.user.write && !mode.user.execute);
        assert!(mode.other.read && !mode.other.write);
    }

    #[test]
    fn test_transform_per_target() {
        let mode = Mode::parse(0o750);
        assert_eq!(mode.transform(Target::Ansible), "'0750'");
        assert_eq!(mode.transform(Target::Pyinfra), "\"750\"");
    }

    #[test]
    fn test_serde_uses_octal_string() {
        let mode = Mode::parse(0o604);
        let json = serde_json::to_string(&mode).unwrap();
        assert_eq!(json, "\"604\"");
        let back: Mode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mode);
        assert!(serde_json::from_str::<Mode>("\"1777\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_inverts_bits(bits in 0u32..MODE_SPACE) {
            let mode = Mode::parse(bits);
            prop_assert_eq!(mode.to_bits(), bits);
            prop_assert_eq!(Mode::parse(mode.to_bits()), mode);
        }
    }
}

//! Command line flags layered over an optional TOML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use drift_types::Target;
use drift_wrappers::VerifyOptions;
use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;

use crate::docker::BaseImage;
use crate::execution::TestMode;

/// Process exit code for invalid configuration.
pub const CONFIG_EXIT_CODE: i32 = 2;

const DEFAULT_ROUNDS: usize = 2;
const DEFAULT_WRAPPERS_PER_ROUND: usize = 10;

/// Error types for configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for drift
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Mutually exclusive options were combined
    #[error("Conflicting options: {0}")]
    Conflict(String),

    /// Neither unit nor differential testing was requested
    #[error("Choose a mode with --unit <TARGET> or --differential <FIRST> <SECOND>, or pass --replay <FILE>")]
    MissingMode,

    /// Differential testing against the same tool twice
    #[error("Differential testing needs two different targets, got {0} twice")]
    SameTargets(Target),

    /// A value is out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Parser, Debug, Default)]
#[command(name = "drift", version, about = "Unit and differential fuzzing of IaC tools")]
pub struct Cli {
    /// TOML file providing defaults for the flags below
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Number of rounds to perform [default: 2]
    #[arg(long)]
    pub rounds: Option<usize>,

    /// Maximum number of wrappers executed in each round [default: 10]
    #[arg(long)]
    pub wrappers_per_round: Option<usize>,

    /// Base image to use. Chosen randomly each round when omitted
    #[arg(long, value_enum)]
    pub base_image: Option<BaseImage>,

    /// Check that one tool reaches the generated state
    #[arg(long, value_name = "TARGET")]
    pub unit: Option<Target>,

    /// Check that two tools reach the same state
    #[arg(long, num_args = 2, value_names = ["FIRST", "SECOND"])]
    pub differential: Option<Vec<Target>>,

    /// Re-run a saved .drift history, pausing after each wrapper
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    /// Do not pause for acknowledgment after an error
    #[arg(long)]
    pub continue_on_error: bool,

    /// Pause after every wrapper
    #[arg(long)]
    pub step: bool,

    /// Reuse base images from earlier runs and keep them afterwards
    #[arg(long)]
    pub keep_base_images: bool,

    /// Rebuild the base image every round
    #[arg(long)]
    pub no_image_cache: bool,

    /// Where incident files are written [default: errors]
    #[arg(long)]
    pub errors_dir: Option<PathBuf>,

    /// Directory holding the base image Dockerfiles [default: images]
    #[arg(long)]
    pub images_dir: Option<PathBuf>,

    /// Private key the tools log in with; its .pub is baked into images
    /// [default: ssh-keys/id_rsa]
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,

    /// drift-agent binary mounted into containers [default: next to drift]
    #[arg(long)]
    pub agent_path: Option<PathBuf>,

    /// ansible-playbook executable [default: ansible-playbook]
    #[arg(long, value_name = "PROGRAM")]
    pub ansible_program: Option<String>,

    /// pyinfra executable [default: pyinfra]
    #[arg(long, value_name = "PROGRAM")]
    pub pyinfra_program: Option<String>,

    /// Skip re-running `systemctl enable` while verifying services
    #[arg(long)]
    pub no_enable_probe: bool,

    /// error, warn, info, debug or trace [default: info]
    #[arg(long)]
    pub log_level: Option<String>,

    /// Plain log output instead of the status display
    #[arg(long)]
    pub plain: bool,
}

/// Contents of a `drift.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub rounds: Option<usize>,
    pub wrappers_per_round: Option<usize>,
    pub base_image: Option<BaseImage>,
    pub unit: Option<Target>,
    pub differential: Option<[Target; 2]>,
    pub continue_on_error: Option<bool>,
    pub step: Option<bool>,
    pub keep_base_images: Option<bool>,
    pub image_cache: Option<bool>,
    pub errors_dir: Option<PathBuf>,
    pub images_dir: Option<PathBuf>,
    pub ssh_key: Option<PathBuf>,
    pub agent_path: Option<PathBuf>,
    pub ansible_program: Option<String>,
    pub pyinfra_program: Option<String>,
    pub probe_enable_quirk: Option<bool>,
    pub log_level: Option<String>,
    pub plain: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Validated settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub rounds: usize,
    pub wrappers_per_round: usize,
    pub base_image: Option<BaseImage>,
    /// `None` only when replaying, which takes the mode from the history
    pub mode: Option<TestMode>,
    pub replay: Option<PathBuf>,
    pub continue_on_error: bool,
    pub step: bool,
    pub keep_base_images: bool,
    pub image_cache: bool,
    pub errors_dir: PathBuf,
    pub images_dir: PathBuf,
    pub ssh_key: PathBuf,
    pub agent_path: PathBuf,
    pub ansible_program: String,
    pub pyinfra_program: String,
    pub verify: VerifyOptions,
    pub log_level: LevelFilter,
    pub plain: bool,
}

impl Settings {
    /// Reads the config file named by `cli`, if any, and merges it.
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    /// Flags win over file values, file values over defaults.
    pub fn merge(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let rounds = cli.rounds.or(file.rounds).unwrap_or(DEFAULT_ROUNDS);
        if rounds == 0 {
            return Err(ConfigError::Invalid {
                field: "rounds",
                reason: "must be at least 1".to_string(),
            });
        }
        let wrappers_per_round = cli
            .wrappers_per_round
            .or(file.wrappers_per_round)
            .unwrap_or(DEFAULT_WRAPPERS_PER_ROUND);
        if wrappers_per_round == 0 {
            return Err(ConfigError::Invalid {
                field: "wrappers_per_round",
                reason: "must be at least 1".to_string(),
            });
        }

        let differential = match cli.differential {
            Some(targets) => match targets.as_slice() {
                [first, second] => Some([*first, *second]),
                _ => {
                    return Err(ConfigError::Invalid {
                        field: "differential",
                        reason: "expects exactly two targets".to_string(),
                    })
                }
            },
            None => None,
        };
        // A mode given on the command line replaces the file's mode entirely
        let (unit, differential) = if cli.unit.is_some() || differential.is_some() {
            (cli.unit, differential)
        } else {
            (file.unit, file.differential)
        };

        let base_image = cli.base_image.or(file.base_image);
        let mode = match (&cli.replay, unit, differential) {
            (Some(_), None, None) => {
                if base_image.is_some() {
                    return Err(ConfigError::Conflict(
                        "--replay uses the base image recorded in the history".to_string(),
                    ));
                }
                None
            }
            (Some(_), _, _) => {
                return Err(ConfigError::Conflict(
                    "--replay takes its mode from the history file".to_string(),
                ))
            }
            (None, Some(_), Some(_)) => {
                return Err(ConfigError::Conflict(
                    "--unit and --differential are mutually exclusive".to_string(),
                ))
            }
            (None, Some(target), None) => Some(TestMode::Unit { target }),
            (None, None, Some([first, second])) => {
                if first == second {
                    return Err(ConfigError::SameTargets(first));
                }
                Some(TestMode::Differential { first, second })
            }
            (None, None, None) => return Err(ConfigError::MissingMode),
        };

        let raw_level = cli.log_level.or(file.log_level).unwrap_or_else(|| "info".to_string());
        let log_level = LevelFilter::from_str(&raw_level).map_err(|_| ConfigError::Invalid {
            field: "log_level",
            reason: format!("unknown level '{raw_level}'"),
        })?;

        let agent_path = match cli.agent_path.or(file.agent_path) {
            Some(path) => path,
            None => default_agent_binary(),
        };

        Ok(Self {
            rounds,
            wrappers_per_round,
            base_image,
            mode,
            replay: cli.replay,
            continue_on_error: cli.continue_on_error || file.continue_on_error.unwrap_or(false),
            step: cli.step || file.step.unwrap_or(false),
            keep_base_images: cli.keep_base_images || file.keep_base_images.unwrap_or(false),
            image_cache: !cli.no_image_cache && file.image_cache.unwrap_or(true),
            errors_dir: cli.errors_dir.or(file.errors_dir).unwrap_or_else(|| PathBuf::from("errors")),
            images_dir: cli.images_dir.or(file.images_dir).unwrap_or_else(|| PathBuf::from("images")),
            ssh_key: cli
                .ssh_key
                .or(file.ssh_key)
                .unwrap_or_else(|| PathBuf::from("ssh-keys/id_rsa")),
            agent_path,
            ansible_program: cli
                .ansible_program
                .or(file.ansible_program)
                .unwrap_or_else(|| "ansible-playbook".to_string()),
            pyinfra_program: cli
                .pyinfra_program
                .or(file.pyinfra_program)
                .unwrap_or_else(|| "pyinfra".to_string()),
            verify: VerifyOptions {
                probe_enable_quirk: !cli.no_enable_probe && file.probe_enable_quirk.unwrap_or(true),
            },
            log_level,
            plain: cli.plain || file.plain.unwrap_or(false),
        })
    }
}

/// `drift-agent` next to the running executable.
fn default_agent_binary() -> PathBuf {
    std::env::current_exe()
        .map(|exe| exe.with_file_name("drift-agent"))
        .unwrap_or_else(|_| PathBuf::from("drift-agent"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("drift").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_unit_mode_with_defaults() {
        let settings = Settings::merge(parse(&["--unit", "ansible"]), FileConfig::default()).unwrap();
        assert_eq!(
            settings.mode,
            Some(TestMode::Unit {
                target: Target::Ansible
            })
        );
        assert_eq!(settings.rounds, 2);
        assert_eq!(settings.wrappers_per_round, 10);
        assert!(settings.image_cache);
        assert!(settings.verify.probe_enable_quirk);
        assert_eq!(settings.log_level, LevelFilter::Info);
        assert_eq!(settings.errors_dir, PathBuf::from("errors"));
        assert_eq!(settings.ansible_program, "ansible-playbook");
        assert_eq!(settings.pyinfra_program, "pyinfra");
    }

    #[test]
    fn test_tool_programs_layer_like_other_values() {
        let file: FileConfig = toml::from_str("pyinfra_program = \"/opt/venv/bin/pyinfra\"").unwrap();
        let settings = Settings::merge(
            parse(&["--unit", "ansible", "--ansible-program", "/usr/local/bin/ansible-playbook"]),
            file,
        )
        .unwrap();
        assert_eq!(settings.ansible_program, "/usr/local/bin/ansible-playbook");
        assert_eq!(settings.pyinfra_program, "/opt/venv/bin/pyinfra");
    }

    #[test]
    fn test_differential_mode() {
        let settings = Settings::merge(
            parse(&["--differential", "ansible", "pyinfra", "--base-image", "ubuntu-22-04"]),
            FileConfig::default(),
        )
        .unwrap();
        assert_eq!(
            settings.mode,
            Some(TestMode::Differential {
                first: Target::Ansible,
                second: Target::Pyinfra
            })
        );
        assert_eq!(settings.base_image, Some(BaseImage::Ubuntu2204));
    }

    #[test]
    fn test_invalid_combinations() {
        let both = Settings::merge(
            parse(&["--unit", "ansible", "--differential", "ansible", "pyinfra"]),
            FileConfig::default(),
        );
        assert!(matches!(both, Err(ConfigError::Conflict(_))));

        let neither = Settings::merge(parse(&[]), FileConfig::default());
        assert!(matches!(neither, Err(ConfigError::MissingMode)));

        let same = Settings::merge(parse(&["--differential", "pyinfra", "pyinfra"]), FileConfig::default());
        assert!(matches!(same, Err(ConfigError::SameTargets(Target::Pyinfra))));

        let replay_with_mode = Settings::merge(
            parse(&["--replay", "errors/x.drift", "--unit", "ansible"]),
            FileConfig::default(),
        );
        assert!(matches!(replay_with_mode, Err(ConfigError::Conflict(_))));

        let zero_rounds = Settings::merge(parse(&["--unit", "ansible", "--rounds", "0"]), FileConfig::default());
        assert!(matches!(zero_rounds, Err(ConfigError::Invalid { field: "rounds", .. })));

        let level = Settings::merge(parse(&["--unit", "ansible", "--log-level", "loud"]), FileConfig::default());
        assert!(matches!(level, Err(ConfigError::Invalid { field: "log_level", .. })));
    }

    #[test]
    fn test_replay_alone_is_valid() {
        let settings = Settings::merge(parse(&["--replay", "errors/x.drift"]), FileConfig::default()).unwrap();
        assert!(settings.mode.is_none());
        assert_eq!(settings.replay, Some(PathBuf::from("errors/x.drift")));
    }

    #[test]
    fn test_file_values_layer_under_flags() {
        let file: FileConfig = toml::from_str(
            r#"
rounds = 7
differential = ["pyinfra", "ansible"]
image_cache = false
probe_enable_quirk = false
log_level = "debug"
"#,
        )
        .unwrap();
        let settings = Settings::merge(parse(&["--rounds", "3"]), file).unwrap();
        assert_eq!(settings.rounds, 3);
        assert_eq!(
            settings.mode,
            Some(TestMode::Differential {
                first: Target::Pyinfra,
                second: Target::Ansible
            })
        );
        assert!(!settings.image_cache);
        assert!(!settings.verify.probe_enable_quirk);
        assert_eq!(settings.log_level, LevelFilter::Debug);
    }

    #[test]
    fn test_cli_mode_replaces_file_mode() {
        let file: FileConfig = toml::from_str("unit = \"ansible\"").unwrap();
        let settings = Settings::merge(parse(&["--differential", "ansible", "pyinfra"]), file).unwrap();
        assert!(matches!(settings.mode, Some(TestMode::Differential { .. })));
    }

    #[test]
    fn test_unknown_file_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("roundz = 1").is_err());
    }

    #[test]
    fn test_resolve_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.toml");
        fs::write(&path, "unit = \"pyinfra\"\nwrappers_per_round = 4\n").unwrap();
        let cli = parse(&["--config", path.to_str().unwrap()]);
        let settings = Settings::resolve(cli).unwrap();
        assert_eq!(settings.wrappers_per_round, 4);

        let missing = parse(&["--config", "/nonexistent/drift.toml", "--unit", "ansible"]);
        assert!(matches!(Settings::resolve(missing), Err(ConfigError::Read { .. })));
    }
}

//! Values, states and generators shared by the drift agent and fuzzer.

pub mod account;
pub mod error;
pub mod host;
pub mod mode;
pub mod path;
pub mod path_state;
pub mod postgres;
pub mod service;
pub mod state;
pub mod target;
pub mod value;

pub use account::{Group, GroupType, User, UserType};
pub use error::{HostError, NoPathCause, ValueError};
pub use host::{CommandOutput, GenContext, Host, StaticHost};
pub use mode::{Mode, ModeType, Permission};
pub use path::{FileType, PathConstraints, PathPolicy, PathType};
pub use path_state::{FileState, PathState, PathStateType};
pub use postgres::{DbNameType, DbState, DbStateType, PostgresDb, PostgresDbType, PostgresUri, PostgresUriType};
pub use service::{ServiceNameType, ServiceState, ServiceStateType, ServiceStatus, ServiceUnit, UnitFile};
pub use state::{Definition, FieldDiff, State};
pub use target::Target;
pub use value::{BoolType, Value, ValueType};

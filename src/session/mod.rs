//! Multi-session lifecycle: registry, cooldown locks, delayed tasks, local
//! credential workspaces, and the manager driving each session's state machine.

pub mod error;
pub mod lock;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod types;
pub mod validate;
pub mod workspace;

pub use error::SessionError;
pub use lock::ConnectionLocks;
pub use manager::{ClearOutcome, PairingOutcome, SessionManager};
pub use registry::SessionRegistry;
pub use scheduler::{ScheduledTask, TaskKey, TaskKind, TaskScheduler};
pub use types::{SessionRecord, SessionStatus, SessionView};
pub use validate::{normalize_phone, recipient_jid, validate_session_id};
pub use workspace::{CredentialWorkspace, WorkspaceError};

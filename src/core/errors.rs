//! Error taxonomy shared by all core services.
//!
//! Service operations return [`CcsError`]; the CLI boundary maps each
//! error's [`ErrorKind`] to an exit code. Best-effort cleanup never
//! replaces a primary outcome with its own failure.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classification used for exit codes and surfacing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: invalid name, malformed tier, unsupported provider.
    Validation,
    /// The operation collides with existing state.
    Conflict,
    /// A referenced profile, variant, or file does not exist.
    NotFound,
    /// A filesystem read, write, or rename failed.
    Io,
    /// A child process or external binary failed.
    External,
    /// A race or stale artifact that callers handle internally.
    Transient,
}

impl ErrorKind {
    /// Process exit code for this kind at the CLI boundary.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Validation => 5,
            Self::Conflict | Self::NotFound => 2,
            Self::Io | Self::Transient => 1,
            Self::External => 4,
        }
    }
}

/// Errors produced by the profile, variant, session, and resolver services.
#[derive(Debug, Error)]
pub enum CcsError {
    /// A profile name failed validation.
    #[error("Invalid profile name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// A context group failed validation.
    #[error("Invalid context group '{group}': {reason}")]
    InvalidContextGroup {
        /// The rejected group.
        group: String,
        /// Why the group is invalid.
        reason: String,
    },

    /// A profile with this name already exists.
    #[error("Profile '{name}' already exists")]
    ProfileExists {
        /// The conflicting name.
        name: String,
    },

    /// Two names collapse to the same on-disk directory.
    #[error("Profile '{name}' conflicts with existing profile '{existing}' (same on-disk name)")]
    FilesystemCollision {
        /// The new name.
        name: String,
        /// The already-stored name it collides with.
        existing: String,
    },

    /// A referenced profile does not exist.
    #[error("Profile '{name}' not found")]
    ProfileNotFound {
        /// The missing name.
        name: String,
    },

    /// A variant exists but is not of the expected kind.
    #[error("Variant '{name}' is a {actual} variant, expected {expected}")]
    VariantKindMismatch {
        /// The variant name.
        name: String,
        /// The kind the operation requires.
        expected: &'static str,
        /// The kind actually stored.
        actual: &'static str,
    },

    /// A composite tier definition is invalid.
    #[error("Invalid {tier} tier: {reason}")]
    InvalidTier {
        /// The tier being validated.
        tier: String,
        /// Why the tier is invalid.
        reason: String,
    },

    /// The provider is not in the supported set.
    #[error("Unknown provider '{provider}' (supported: {supported})")]
    UnknownProvider {
        /// The rejected provider string.
        provider: String,
        /// Comma-separated supported providers.
        supported: String,
    },

    /// The provider requires the plus CLIProxy backend.
    #[error("Provider '{provider}' is not available on the original CLIProxy backend")]
    ProviderNeedsPlus {
        /// The plus-only provider.
        provider: String,
    },

    /// Composite variants require the unified store.
    #[error("Composite variants require the unified config (run with config.yaml or CCS_UNIFIED=1)")]
    CompositeNeedsUnified,

    /// No free port in the allocation range.
    #[error("No free CLIProxy port in {low}..={high}")]
    NoFreePort {
        /// Lowest candidate port.
        low: u16,
        /// Highest candidate port.
        high: u16,
    },

    /// A variant cannot be removed while its proxy has live sessions.
    #[error(
        "CLIProxy on port {port} has {sessions} active session(s); close them or run 'ccs cliproxy stop --port {port}' first"
    )]
    PortBusy {
        /// The busy port.
        port: u16,
        /// Number of live sessions.
        sessions: usize,
    },

    /// The port is held by a process that is not CLIProxy.
    #[error("Port {port} is held by another program ({program})")]
    ForeignListener {
        /// The probed port.
        port: u16,
        /// Name of the foreign process.
        program: String,
    },

    /// A generic validation failure with a human message.
    #[error("{message}")]
    Validation {
        /// Human-readable description.
        message: String,
    },

    /// A filesystem operation failed.
    #[error("{path}: {source}")]
    Io {
        /// The path the operation touched.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A persisted file could not be parsed.
    #[error("Failed to parse {path}: {message}")]
    Parse {
        /// The unparseable file.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// A child CLI or the proxy binary failed.
    #[error("{message}")]
    External {
        /// Human-readable description.
        message: String,
    },

    /// A race or stale artifact; handled internally, never surfaced.
    #[error("{message}")]
    Transient {
        /// Human-readable description.
        message: String,
    },
}

impl CcsError {
    /// Build an IO error with path context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a parse error with path context.
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build a generic validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// The coarse classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName { .. }
            | Self::InvalidContextGroup { .. }
            | Self::InvalidTier { .. }
            | Self::UnknownProvider { .. }
            | Self::ProviderNeedsPlus { .. }
            | Self::CompositeNeedsUnified
            | Self::FilesystemCollision { .. }
            | Self::Validation { .. } => ErrorKind::Validation,
            Self::ProfileExists { .. } | Self::PortBusy { .. } | Self::ForeignListener { .. } => {
                ErrorKind::Conflict
            }
            Self::ProfileNotFound { .. } | Self::VariantKindMismatch { .. } => ErrorKind::NotFound,
            Self::Io { .. } | Self::Parse { .. } | Self::NoFreePort { .. } => ErrorKind::Io,
            Self::External { .. } => ErrorKind::External,
            Self::Transient { .. } => ErrorKind::Transient,
        }
    }

    /// Exit code the CLI uses for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

/// Result alias used across the service layer.
pub type Result<T> = std::result::Result<T, CcsError>;

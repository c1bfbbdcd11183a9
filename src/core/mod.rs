//! Core domain types: profiles, variants, thinking levels, and errors.

/// Domain error taxonomy with exit-code mapping.
pub mod errors;
/// Account profiles, name rules, and context normalization.
pub mod profile;
/// Thinking-budget levels and layered configuration.
pub mod thinking;
/// Single-provider and composite variant records.
pub mod variant;

pub use errors::{CcsError, ErrorKind, Result};
pub use profile::{
    AccountRecord, ContextMode, ContextPolicy, ContinuityMode, DEFAULT_CONTEXT_GROUP,
    normalize_context_group, sanitize_name, validate_profile_name,
};
pub use thinking::{MAX_THINKING_BUDGET, ThinkingConfig, ThinkingLevel, ThinkingMode, TierDefaults};
pub use variant::{
    ALL_TIERS, CompositeTag, CompositeTiers, CompositeVariant, FallbackSpec, SingleVariant, Target,
    TierName, TierPatch, TierSpec, TiersPatch, VariantRecord,
};

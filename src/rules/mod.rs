// Rule engine - role-specific per-note transformations
// Melody, bass and inner catalogues plus the duration safety pass

pub mod bass;
pub mod context;
pub mod inner;
pub mod manager;
pub mod melody;
pub mod params;
pub mod rule;
pub mod validation;

pub use context::{ExpressionStrengths, InterpretationContext, DEFAULT_TIMING_RANGE_BEATS};
pub use manager::{RuleManager, RuleOverride, RuleStats, RulesConfig};
pub use params::{ParamValue, RuleParams};
pub use rule::{NoteCursor, Rule, RuleError, RuleKind, RuleState};
pub use validation::{validate_voices, DurationCorrection, ValidationConfig, ValidationReport};

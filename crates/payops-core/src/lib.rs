//! PayOps Core - decision core of the payment operations agent
//!
//! Everything a cycle decides, with no async and no side effects:
//! - Reduces a window of payment events to an [`Aggregate`]
//! - Classifies the aggregate with an ordered rule list
//! - Nudges confidence from recent lessons
//! - Applies the guardrail to produce a [`Disposition`]
//! - Describes the cycle's output as a [`CycleReport`]
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use payops_core::prelude::*;
//!
//! let now = Utc::now();
//! let events: Vec<PaymentEvent> = (0..20)
//!     .map(|_| PaymentEvent::new("HDFC", "VISA", "UPI", ErrorCode::Success, 120, now))
//!     .collect();
//!
//! let window = aggregate(&events, now, 60);
//! let decision = diagnose(&window, &[]);
//! let disposition = Guardrail::default().evaluate(&decision, window.total_count);
//!
//! assert_eq!(decision.diagnosis, Diagnosis::NormalVariance);
//! assert_eq!(disposition, Disposition::Monitor);
//! ```

#![warn(unreachable_pub)]

pub mod aggregate;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod feedback;
pub mod guardrail;
pub mod report;
pub mod types;

pub use aggregate::{aggregate, Aggregate, DEFAULT_WINDOW_SECS};
pub use config::{
    ActionConfig, AgentConfig, AggregationConfig, ControlConfig, FeedbackConfig,
    GuardrailConfig, HistoryConfig, RuleThresholds, SourceConfig, VolumeBreachPolicy,
};
pub use diagnosis::{diagnose, DiagnosisEngine, Rule, RULES};
pub use error::{ConfigError, InputError};
pub use guardrail::{Assessment, GuardReason, Guardrail};
pub use report::CycleReport;
pub use types::{
    ActionTarget, Decision, Diagnosis, Dimension, Disposition, ErrorCode, Lesson, LessonId,
    LessonOutcome, PaymentEvent, ProposedAction, RuleId,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with PayOps Core
    pub use crate::{
        aggregate, diagnose, AgentConfig, Aggregate, CycleReport, Decision, Diagnosis,
        DiagnosisEngine, Disposition, ErrorCode, Guardrail, Lesson, LessonOutcome, PaymentEvent,
        ProposedAction,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

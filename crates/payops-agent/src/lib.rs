//! PayOps Agent - runtime for the payment operations agent
//!
//! Wires the decision core to the outside world:
//! - Pulls traffic windows from a [`SignalSource`]
//! - Reads and appends lessons through a [`LessonStore`]
//! - Dispatches executed actions to a [`PaymentOps`] backend
//! - Runs the periodic [`ControlLoop`]
//!
//! # Example
//!
//! ```rust,no_run
//! use payops_agent::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::new().with_max_cycles(3);
//! let source = Arc::new(SyntheticSource::new(config.source.clone(), config.aggregation.window_secs));
//! let store = Arc::new(MemoryLessonStore::new());
//!
//! let mut control = ControlLoop::new(config, source, store, Arc::new(TracingOps))?;
//! let summary = control.run(std::future::pending()).await;
//!
//! println!("ran {} cycles", summary.cycles);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod control;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod memory;
pub mod source;

pub use control::{ControlLoop, LoopSummary};
pub use dispatch::{
    ActionParams, DispatchOutcome, Dispatcher, OpsAck, PaymentOps, Severity, TracingOps,
};
pub use error::{AgentError, DispatchError, OpsError, SourceError, StoreError};
pub use history::{JsonlLessonStore, LessonSeq, LessonStore, MemoryLessonStore};
pub use memory::{CycleRecord, ShortTermMemory};
pub use source::{SignalSource, SignalWindow, SyntheticSource};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running the agent
    pub use crate::{
        ControlLoop, JsonlLessonStore, LessonStore, LoopSummary, MemoryLessonStore, PaymentOps,
        SignalSource, SignalWindow, SyntheticSource, TracingOps,
    };
    pub use payops_core::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

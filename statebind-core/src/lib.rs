//! # statebind-core
//!
//! Machine execution engine for statebind.
//!
//! This crate provides:
//! - Machine definition parsing and validation
//! - Guard expression evaluation
//! - Context store and state cell with change notification
//! - Transition resolution, entry/exit actions and effects
//! - Computed properties derived from context and props
//!
//! ```
//! use statebind_core::{Machine, Service};
//!
//! let machine = Machine::from_json(&serde_json::json!({
//!     "initial": "unchecked",
//!     "context": {"checked": false},
//!     "states": {
//!         "unchecked": {"on": {"CHECK": "checked"}},
//!         "checked": {"on": {"UNCHECK": "unchecked"}}
//!     }
//! }))
//! .unwrap();
//!
//! let service = Service::new(machine).unwrap();
//! service.start();
//! service.send("CHECK");
//! assert_eq!(service.get_snapshot(), "checked");
//! ```

pub mod actor;
pub mod computed;
pub mod context;
pub mod definition;
pub mod effect;
pub mod error;
pub mod event;
pub mod guard;
pub mod machine;
pub mod service;
pub mod state;
mod subscription;

pub use actor::Actor;
pub use computed::{Computed, ComputedParams};
pub use context::{Context, ContextChange};
pub use definition::{
    ActionDecl, ActionRef, EffectRef, MachineDefinition, StateNode, TagSet, TransitionConfig,
    TransitionSpec,
};
pub use effect::Cleanup;
pub use error::CoreError;
pub use event::{Event, EventView};
pub use guard::{FieldSource, GuardExpr, Root};
pub use machine::{Implementations, Machine, MachineBuilder};
pub use service::{MachineStatus, Params, Refs, Scope, Sender, Service, ServiceBuilder};
pub use state::StateCell;
pub use subscription::Subscription;

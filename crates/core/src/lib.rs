#![forbid(unsafe_code)]

pub mod flow;
pub mod model;
pub mod registry;
pub mod time;

pub use flow::{
    BranchCondition, BranchRule, DelayPolicy, FlowController, Pace, Transition, TransitionKind,
};
pub use registry::{PageRegistry, RegistryError, UnitDefinition};
pub use time::Clock;

pub mod events;
pub mod machine;
pub mod regions;

pub use events::{Effect, MachineEvent};
pub use machine::{CompositeState, ProcessEventResult, SessionContext, SessionStateMachine};
pub use regions::{LeadershipState, LinkState, StorageState};

mod assigner;
mod lifecycle;

pub use assigner::{AssignedId, EntityKind, IdentifierAssigner};
pub use lifecycle::{
    EntityFrameState, FrameReport, LifecycleState, LifecycleTracker, TrackedEntity,
};

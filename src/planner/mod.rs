//! AI trip planner sessions streamed over `/planner`.

pub mod event;
pub mod model;
pub mod reducer;
pub mod tracker;

pub use event::{PlannerEvent, PlannerEventKind};
pub use model::{PlannerDraft, PlannerInput, PlannerSession, PlannerSnapshot, PlannerStatus};
pub use reducer::{PlannerEffect, PlannerMsg, PlannerState};
pub use tracker::PlannerTracker;

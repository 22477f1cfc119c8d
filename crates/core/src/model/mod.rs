mod event;
mod ids;
mod page;
mod progress;
mod step_data;

pub use event::{TransitionEvent, TransitionRequest};
pub use ids::{ActivityId, ModuleId, ParseIdError, UnitId};
pub use page::{PageDescriptor, RenderHandle};
pub use progress::{ProgressError, ProgressPatch, UnitProgress};
pub use step_data::StepData;

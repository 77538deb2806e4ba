pub mod drift;
pub mod pres;

pub use drift::{DriftCompensator, DriftState};
pub use pres::{PresState, PresentationCompensator};

//! Numeric control algorithms
//!
//! Pure state machines with no store or repository access; the
//! processors own the wiring.

mod pid;
mod relay;
mod schmitt;
pub mod stats;

pub use pid::PidController;
pub use relay::{RelayTuner, TuningSafety};
pub use schmitt::SchmittTrigger;

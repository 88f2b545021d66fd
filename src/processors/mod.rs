//! Memory processors
//!
//! One module per memory kind. Each processor owns its per-block
//! runtime state, fans out across its blocks inside a cycle, and
//! publishes outputs through the write dispatcher only.

mod alarm;
mod comparison;
mod conditional;
mod deadband;
mod min_max;
mod moving_average;
mod pid;
mod rate_of_change;
mod schedule;
mod statistical;
mod totalizer;
mod write_action;

pub use alarm::AlarmProcessor;
pub use comparison::ComparisonProcessor;
pub use conditional::ConditionalProcessor;
pub use deadband::DeadbandProcessor;
pub use min_max::MinMaxProcessor;
pub use moving_average::MovingAverageProcessor;
pub use pid::PidProcessor;
pub use rate_of_change::RateOfChangeProcessor;
pub use schedule::ScheduleProcessor;
pub use statistical::StatisticalProcessor;
pub use totalizer::TotalizerProcessor;
pub use write_action::WriteActionProcessor;

pub mod icons;
pub mod report;
pub mod run_progress;

pub use report::{render_report, render_statuses, render_waves};
pub use run_progress::{RunUI, UiMode};

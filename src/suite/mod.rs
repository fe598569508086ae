pub mod analysis;
pub mod report;
pub mod runner;
pub mod types;

pub use analysis::{RunSummary, summarize_run};
pub use report::{SuiteReport, VariantRun};
pub use runner::SuiteRunner;
pub use types::{SuiteConfig, SuiteError, SuiteResult, VariantConfig};

pub mod ports;
pub mod capture_use_case;
pub mod silver_use_case;
pub mod report_use_case;

pub use capture_use_case::CaptureUseCase;
pub use report_use_case::{QualityReport, ReportUseCase};
pub use silver_use_case::{RunAudit, RunCounts, SilverOutput, SilverSettings, SilverUseCase};

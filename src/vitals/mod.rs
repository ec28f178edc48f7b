pub mod extract;
pub mod pipeline;
pub mod range;
pub mod record;

pub use extract::extract_vital_signs;
pub use pipeline::{PipelineConfig, VitalsPipeline};
pub use record::{SessionSummary, VitalRecord};

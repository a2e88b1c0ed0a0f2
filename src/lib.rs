// Library exports for the command-line tool and embedding applications
pub mod cli;
pub mod config_file;
pub mod error;
pub mod image_processing;
pub mod json_output;
pub mod ledger;
pub mod orchestrator;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config_file::PipelineConfig;
pub use error::{PersistenceError, ProcessingError, RunError, StoreError};
pub use image_processing::{
    CropStrategy, ImageTransformPipeline, OutputFormat, PersonLocator, ProcessingOptions,
    ResizeFit, SourceItem, TransformResult,
};
pub use json_output::JsonMessage;
pub use ledger::SessionResultLedger;
pub use orchestrator::BatchOrchestrator;

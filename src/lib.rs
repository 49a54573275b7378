pub mod audio;
pub mod cancel;
pub mod config;
pub mod error;
pub mod mux;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod subtitle;
pub mod translate;
pub mod workspace;

pub use cancel::CancelToken;
pub use config::Config;
pub use error::{Result, SubgenError};
pub use pipeline::{
    new_operation_id, GenerateOptions, MergeOptions, Orchestrator, TranslateResult,
};
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSender, Stage};
pub use registry::ProcessRegistry;

//! Service layer: external collaborators and the takeoff orchestration
//! pipeline that coordinates them.

pub mod fetch;
pub mod pipeline;
pub mod render;
pub mod scale_detector;
pub mod takeoff_agent;
pub mod tools;
pub mod vision;

pub use fetch::{BlueprintFetcher, HttpBlueprintFetcher};
pub use pipeline::{TakeoffEvent, TakeoffPipeline};
pub use render::{PageRenderer, PdfiumRenderer};
pub use vision::{OpenAiVisionClient, VisionModel};

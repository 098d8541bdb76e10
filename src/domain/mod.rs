//! Request-scoped value objects for blueprint analysis.
//!
//! Nothing in here survives past the HTTP response; there is no persistence
//! layer behind these types.

pub mod blueprint;
pub mod takeoff;

pub use blueprint::{BlueprintSource, MediaKind, PdfInfo, RenderedPage, ScaleDetection, ScaleInfo, ScaleSource};
pub use takeoff::{MeasurementCategory, TakeoffItem, TakeoffRequest, TakeoffResult};

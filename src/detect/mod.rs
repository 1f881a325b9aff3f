mod backend;
mod backends;
mod labels;
mod registry;
mod result;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{ScriptedBackend, StubBackend};
pub use labels::{load_labels, COCO_LABELS};
pub use registry::BackendRegistry;
pub use result::{label_set, BoundingBox, DetectedLabelSet, Detection};

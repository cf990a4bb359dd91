mod backend;
pub mod backends;
pub mod model;
mod registry;
mod result;

pub use backend::{Detector, ModelLoader};
pub use backends::{CpuDetector, CpuLoader, StubDetector, StubLoader};
pub use model::{ModelCache, ModelRef, TensorLayout};
pub use registry::BackendRegistry;
pub use result::{Detection, DetectionBatch, NormalizedBox, PixelRect};

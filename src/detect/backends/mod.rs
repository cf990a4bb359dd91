pub mod cpu;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use cpu::{CpuDetector, CpuLoader};
pub use stub::{StubDetector, StubLoader};

#[cfg(feature = "backend-tract")]
pub use tract::{TractDetector, TractLoader};

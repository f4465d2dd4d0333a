use anyhow::Result;

use crate::detect::result::{Detection, ObjectClass};
use crate::frame::Frame;

/// Object detector backend.
///
/// One detector instance is loaded at process start and shared by every
/// session, so `detect` takes `&self` and implementations must be `Sync`.
/// Detection is synchronous and stateless across calls: anything that needs
/// history across frames belongs in a `Tracker`.
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame, keeping only objects whose class is in `classes`.
    fn detect(&self, frame: &Frame, classes: &[ObjectClass]) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once when the model is loaded.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

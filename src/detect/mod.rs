mod backend;
pub mod backends;
mod model;
mod result;

pub use backend::Detector;
pub use backends::BlobBackend;
pub use model::ModelSlot;
pub use result::{BoundingBox, Detection, ObjectClass};

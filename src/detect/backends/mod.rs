pub mod blob;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use blob::BlobBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

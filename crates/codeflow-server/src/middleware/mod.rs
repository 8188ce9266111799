pub mod correlation;
pub mod signature;

pub use correlation::{correlate_requests, CorrelationId};
pub use signature::{SignatureLayer, SignatureVerifier};

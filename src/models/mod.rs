mod api;

pub use api::{Envelope, EnvelopeData, ErrorBody, ErrorDetail};

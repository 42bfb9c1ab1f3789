pub mod client;
pub mod error;
pub mod types;

pub use client::{http_client, BuildClient, BuildService};
pub use error::RemoteError;
pub use types::{BuildStatus, SpecItem, SpecPayload, SubmissionHandle};

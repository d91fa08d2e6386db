//! Data model for harvested permit records and their delivery envelope.

mod payload;
mod project;

pub use payload::{DeliveryPayload, RunMetadata};
pub use project::{ProjectRecord, RunBatch, ACTIVE_TAG, ARCHIVED_TAG};

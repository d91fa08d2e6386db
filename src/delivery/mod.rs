//! Delivery of harvested records to a remote HTTP endpoint.

pub mod client;
pub mod http;

pub use client::{DeliveryClient, DeliveryConfig, DeliveryError, DeliveryOutcome, DeliveryReceipt};
pub use http::{HttpClient, HttpOptions, HttpRequest, HttpResponse, RequestBody};

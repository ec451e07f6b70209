//! Core domain logic for the ingestion worker.
//!
//! Houses the Payload Validator (C4) and the Error Router (cross-cutting):
//! the two pieces of business logic that sit above the pure [`ingest_types`]
//! model but below any IO.

pub mod error_router;
pub mod validator;

pub use error_router::{route_failure, FailureContext, RoutedFailure};
pub use validator::{validate_and_extract, PayloadSummary, ValidationError};

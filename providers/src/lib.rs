//! Transport clients for the ingestion worker's external collaborators:
//! the object store (C3), the stream bus (C7), and the optional external
//! NLP collaborator (C6). All HTTP clients share the bounded retry/backoff
//! discipline in [`retry`].

pub mod nlp;
pub mod object_store;
pub mod retry;
pub mod stream_bus;

pub use nlp::{NlpClient, NlpClientError, NlpResult, TurnPayload};
pub use object_store::{FetchedObject, ObjectStoreClient, ObjectStoreError};
pub use stream_bus::{StreamBusClient, StreamBusError, StreamMessage};

//! Request and response marshalling for planned API operations.
//!
//! This crate turns an [`OperationPlan`](opmarshal_core::OperationPlan) and
//! the runtime values of one call into a transport-ready request, and turns
//! the received response back into decoded values, typed errors or a stream
//! of server-sent events. It performs no network I/O itself.
//!
//! ## Features
//!
//! - Parameter serialization for path, query, header and cookie locations
//!   with every OpenAPI style, plus whole-query-string parameters
//! - Request bodies as JSON, form, multipart, XML, JSON Lines and JSON text sequences
//! - Response variant negotiation from `Accept` preferences
//! - Content-type driven decoding and declared error mapping
//! - Incremental server-sent events decoding with cancellation
//! - Security credentials for API keys and HTTP bearer/basic schemes
//!
//! ## Example
//!
//! ```ignore
//! use opmarshal_client::{CallArgs, Marshaller};
//!
//! let marshaller = Marshaller::builder("https://api.example.com")
//!     .transform("wrap", wrap)
//!     .build()?;
//!
//! // Build the request and send it with any HTTP client
//! let args = CallArgs::new()
//!     .param("petId", 42)
//!     .security("bearerAuth", token);
//! let request = marshaller.build_request(&plan, &args)?.into_http()?;
//! let response = send(request).await?;
//!
//! let pet = marshaller.consume_response(&plan, args.get_accept(), response)?;
//! println!("Response: {:?}", pet.into_inner());
//! ```
//!
//! ## Event Stream Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use opmarshal_client::CancelToken;
//!
//! let cancel = CancelToken::new();
//! let mut events = marshaller.consume_stream(&plan, response, cancel.clone()).await?;
//!
//! while let Some(result) = events.next().await {
//!     match result {
//!         Ok(event) => println!("Got event: {event}"),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! ```
//!
//! ## Stream Cancellation
//!
//! Dropping a [`Streaming`] drops the response body. Calling
//! [`CancelToken::cancel`] from another task wakes a consumer blocked on the
//! next read; the stream then yields [`ApiError::Cancelled`] once and ends.

mod builder;
mod cancel;
mod error;
mod error_parser;
mod marshaller;
mod negotiate;
mod options;
mod param;
pub mod request;
pub mod response;
mod streaming;
mod xml;

pub use builder::{BuildError, MarshallerBuilder};
pub use cancel::CancelToken;
pub use error::{ApiError, TransportError};
pub use marshaller::Marshaller;
pub use options::CallArgs;
pub use param::{SerializedParameter, serialize as serialize_parameter};
pub use streaming::Streaming;

// Re-export from request module
pub use request::{BoundarySource, EncodedBody, FixedBoundary, RandomBoundary, RequestDescriptor, encode_body};

// Re-export from response module
pub use response::{ApiResponse, DecoderState, Metadata, Payload, SseDecoder, decode_body};

pub use negotiate::{accept_header, select as select_variant};
pub use xml::{TEXT_KEY, from_xml, to_xml};

// Re-export core types that users need
pub use opmarshal_core::{ErrorKind, OperationPlan, PlanError, RuleRegistry};

pub use bytes::Bytes;

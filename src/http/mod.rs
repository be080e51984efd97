//! HTTP plumbing: request/response values, the transport primitive and the
//! adapter-based client.

pub mod client;
pub mod transport;
pub mod types;

pub use client::{Adapter, ClientResponse, ClientSlot, HttpClient, RequestConfig, TransportAdapter};
pub use transport::{ReqwestTransport, Transport, TransportError};
pub use types::{Body, Headers, Request, RequestBody, RequestInit, Resource, Response};

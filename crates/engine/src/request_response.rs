// SPDX-License-Identifier: Apache-2.0

//! The capability seam a component uses to issue a correlated broker request (§4.6).
//!
//! `conduit-engine` only specifies the contract: a component that wants to call out over the
//! broker and await a correlated reply holds an `Arc<dyn RequestResponseClient>`, handed to it by
//! `conduit-controller` via [`crate::component::Component::attach_request_response`] when its
//! declaration carries a `broker_request_response` block. The correlation machinery itself — the
//! metadata stack, the pending-request cache, the reply reader thread — is controller-side, since
//! it needs a live broker adapter and a cache service, neither of which this crate knows about.

use crate::error::ComponentError;
use crate::message::Message;
use std::time::Duration;

/// Parameters to a single `do_broker_request_response` call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Whether to expect a sequence of chunks rather than a single reply.
    pub stream: bool,
    /// Expression evaluated against each reply; truthy marks the final chunk of a stream.
    /// Ignored when `stream` is `false` (a non-streaming request always completes on its first
    /// reply).
    pub streaming_complete_expression: Option<String>,
}

/// One reply delivered to the caller, with a flag marking stream completion.
#[derive(Debug)]
pub struct ResponseChunk {
    /// The decoded reply, wrapped the same way an inbound broker message would be.
    pub message: Message,
    /// `true` for a non-streaming reply's only chunk, or a streaming reply whose
    /// `streaming_complete_expression` evaluated truthy.
    pub is_last: bool,
}

/// A live, in-flight request a caller polls for chunks.
///
/// Each call to [`Self::recv`] resets the timeout budget from the moment it is called, mirroring
/// the spec's "most recent enqueue time" semantics: a slow but steadily-streaming reply never
/// spuriously times out, only a reply that stalls entirely does.
pub trait ResponseReceiver: Send {
    /// Blocks up to `timeout` for the next chunk. `Ok(None)` means the stream ended without a
    /// final chunk being marked (the underlying request entry expired or was cancelled); `Err`
    /// surfaces a timeout or transport failure as a processing error.
    fn recv(&mut self, timeout: Duration) -> Result<Option<ResponseChunk>, ComponentError>;
}

/// Issues broker requests and hands back a receiver for the correlated reply stream.
///
/// Implemented by `conduit-controller`'s `BrokerRequestResponseController`; injected into a
/// component via [`crate::component::Component::attach_request_response`].
pub trait RequestResponseClient: Send + Sync {
    /// Sends `message` as a request and returns a receiver for its reply (or reply stream).
    fn request(
        &self,
        message: Message,
        options: RequestOptions,
    ) -> Result<Box<dyn ResponseReceiver>, ComponentError>;
}

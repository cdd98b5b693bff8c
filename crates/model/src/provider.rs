use std::error::Error;
use std::sync::Arc;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
///
/// The runtime only looks at [`kind`](Self::kind) to classify a failed
/// model call; the message ends up in the recorded step.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A model-call collaborator, registered with the runtime under the name
/// that agents put in [`ModelConfig::provider`](crate::ModelConfig).
///
/// A provider receives the complete prompt of every turn, including the
/// agent's [`ModelConfig`](crate::ModelConfig), so one provider instance
/// can serve any number of agents and tasks concurrently. It must not
/// retry on its own.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The streamed response of one request.
    type Response: ModelResponse<Error = Self::Error>;

    /// Starts a request. The returned future owns everything it needs, so
    /// it can outlive the borrow of `req`.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}

/// Lets one provider be registered in several runners.
impl<P: ModelProvider> ModelProvider for Arc<P> {
    type Error = P::Error;
    type Response = P::Response;

    #[inline]
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        P::send_request(self, req)
    }
}

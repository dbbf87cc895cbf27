pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

use colloquy_core::error::ColloquyError;

/// Map a failed send or body read. Timeouts and refused connections are
/// reported as unavailable so the retry layer can tell them apart.
pub(crate) fn transport_error(e: reqwest::Error) -> ColloquyError {
    if e.is_timeout() || e.is_connect() {
        ColloquyError::LlmUnavailable(e.to_string())
    } else {
        ColloquyError::LlmRequest(e.to_string())
    }
}

/// A non-2xx response, keeping the status code.
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> ColloquyError {
    ColloquyError::LlmHttp {
        status: status.as_u16(),
        body,
    }
}

/// Client-level configuration for the call machinery.
///
/// Endpoint selection and failover policy consult `endpoints`; the timeout
/// bounds one synchronous call attempt (asynchronous deadlines are the
/// transport's responsibility).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service endpoints in failover order. The first entry is the primary.
    pub endpoints: Vec<String>,
    /// Deadline for one synchronous call attempt in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            call_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    /// Configuration for a single endpoint with default timeouts.
    #[must_use]
    pub fn single_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoints: vec![endpoint.into()],
            ..Self::default()
        }
    }
}

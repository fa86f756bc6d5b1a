use std::time::Duration;

use hearth::Constraints;

/// Server tuning, supplied once at construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub constraints: Constraints,
    /// Size of each connection's receive buffer, no single request line or header may be longer.
    ///
    /// See [`line_capacity`] for a size that fits every line `constraints` accepts.
    pub recv_buffer_len: usize,
    /// Longest time a single poll blocks for.
    pub poll_timeout: Duration,
    /// Connections without activity for this long are closed, `None` keeps them open forever.
    pub idle_timeout: Option<Duration>,
    /// Readiness events handled per poll.
    pub max_events: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let constraints = Constraints::default();

        Self {
            constraints,
            recv_buffer_len: line_capacity(&constraints),
            poll_timeout: Duration::from_secs(1),
            idle_timeout: Some(Duration::from_secs(30)),
            max_events: 128,
        }
    }
}

/// Receive buffer size holding the longest request line or header line `constraints` allow.
pub fn line_capacity(constraints: &Constraints) -> usize {
    // "OPTIONS " before the target, " HTTP/1.1\r\n" after it
    let request_line = constraints.max_uri_len + 19;
    // ": " between name and value, and the CRLF
    let header_line = constraints.max_header_len + 4;

    request_line.max(header_line)
}

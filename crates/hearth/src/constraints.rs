/// Limits applied to every parsed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    /// Longest accepted request target, in bytes.
    pub max_uri_len: usize,
    /// Most header lines accepted per request.
    pub max_headers: usize,
    /// Longest accepted header, name and value combined, in bytes.
    pub max_header_len: usize,
    /// Bodies must be strictly shorter than this, in bytes.
    pub max_body_len: usize,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_uri_len: 2048,
            max_headers: 64,
            max_header_len: 8192,
            max_body_len: 1 << 20,
        }
    }
}

use bytes::{BufMut, Bytes, BytesMut};

use crate::{HeaderError, HeaderMap, Method, Version};

/// Response to a request, filled in by handlers and written out by the server.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Add a header to the response.
    ///
    /// `Content-Length` is always written by the server, a value set here is ignored.
    pub fn set_header(&mut self, key: &str, value: &str) -> Result<(), HeaderError> {
        self.headers.set(key, value)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Restore the defaults for the next request, keeping header storage.
    pub fn reset(&mut self) {
        self.status = 200;
        self.headers.reset();
        self.body = Bytes::new();
    }

    /// Serialize the response to a request of `method` and `version`.
    pub fn write_to(&self, method: Method, version: Version, data: &mut BytesMut) {
        data.put(version.as_str().as_bytes());
        data.put_u8(b' ');
        data.put(self.status.to_string().as_bytes());
        data.put_u8(b' ');
        data.put(reason(self.status).as_bytes());
        data.put(&b"\r\n"[..]);

        for (key, values) in &self.headers {
            if key.eq_ignore_ascii_case("Content-Length") {
                continue;
            }

            // Written oldest first, the order they were set in
            let mut values: Vec<_> = values.iter().collect();
            values.reverse();
            for value in values {
                data.put(key.as_bytes());
                data.put(&b": "[..]);
                data.put(value.as_bytes());
                data.put(&b"\r\n"[..]);
            }
        }

        data.put(&b"Content-Length: "[..]);
        let length = self.body.len().to_string();
        data.put(length.as_bytes());
        data.put(&b"\r\n\r\n"[..]);

        if method != Method::Head {
            data.put(self.body.clone());
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// Reason phrase for a status code.
pub fn reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Content Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

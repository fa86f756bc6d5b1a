use hearth::{Request, Response};

/// Request callback, invoked on the event loop thread.
///
/// Implementations fill in `response`, which the server sends once the call returns. Handlers
/// must not block, every other connection waits while one runs.
pub trait Handler {
    fn handle(&mut self, request: &Request, response: &mut Response);
}

impl<F> Handler for F
where
    F: FnMut(&Request, &mut Response),
{
    fn handle(&mut self, request: &Request, response: &mut Response) {
        self(request, response)
    }
}

/// Default error handler, answers with `400 Bad Request`.
#[derive(Default, Debug, Clone, Copy)]
pub struct BadRequest;

impl Handler for BadRequest {
    fn handle(&mut self, _request: &Request, response: &mut Response) {
        response.set_status(400);
    }
}

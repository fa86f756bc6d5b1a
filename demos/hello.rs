use anyhow::Error;
use hearth::{Request, Response};
use hearth_mio::{Server, ServerConfig};
use tracing::{event, Level};

fn main() -> Result<(), Error> {
    devutils::init_logging()?;

    let mut server = Server::bind("127.0.0.1:1234", ServerConfig::default(), hello)?;
    server.run()?;

    Ok(())
}

fn hello(request: &Request, response: &mut Response) {
    event!(Level::INFO, uri = request.uri(), "received request");

    for (key, values) in request.headers() {
        for value in values {
            println!("HEADER: {}: {}", key, value);
        }
    }

    if let Err(error) = response.set_header("Content-Type", "text/html") {
        event!(Level::WARN, ?error, "failed to set header");
    }
    response.set_body(RESPONSE);
}

const RESPONSE: &str = "<!DOCTYPE html><html><body><h1>Hello, World!</h1></body></html>";

use anyhow::Error;
use hearth::{Request, Response};
use hearth_mio::{Server, ServerConfig};
use tracing::{event, Level};

/// Echoes request bodies back, and answers malformed requests with the parse position.
fn main() -> Result<(), Error> {
    devutils::init_logging()?;

    let error_handler = |request: &Request, response: &mut Response| {
        response.set_status(400);
        response.set_body(format!("bad request, stopped at {:?}\n", request.state()));
    };

    let mut server = Server::bind("127.0.0.1:1234", ServerConfig::default(), echo)?
        .with_error_handler(error_handler);
    server.run()?;

    Ok(())
}

fn echo(request: &Request, response: &mut Response) {
    event!(
        Level::INFO,
        method = %request.method(),
        len = request.body().len(),
        "echoing"
    );

    response.set_body(request.body().to_vec());
}

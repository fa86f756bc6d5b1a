use std::{
    io::{ErrorKind, Read, Write},
    net::TcpStream,
    time::Duration,
};

use anyhow::{bail, Context as _, Error};
use hearth_mio::{Handler, Server, ServerConfig};

const TURN: Duration = Duration::from_millis(5);
const MAX_TURNS: usize = 400;

pub fn given_server<H>(config: ServerConfig, handler: H) -> Result<Server<H>, Error>
where
    H: Handler,
{
    Server::bind("127.0.0.1:0", config, handler)
}

pub fn given_client<H, E>(server: &mut Server<H, E>) -> Result<TcpStream, Error>
where
    H: Handler,
    E: Handler,
{
    let expected = server.connections().len() + 1;

    let client = TcpStream::connect(server.local_addr()).context("failed to connect")?;
    client.set_nonblocking(true)?;

    when_turned_until(server, |server| server.connections().len() == expected)?;

    Ok(client)
}

pub fn when_sent(client: &mut TcpStream, data: &[u8]) -> Result<(), Error> {
    client.set_nonblocking(false)?;
    client.write_all(data)?;
    client.set_nonblocking(true)?;
    Ok(())
}

/// Turn the server until `done` holds.
pub fn when_turned_until<H, E, F>(server: &mut Server<H, E>, mut done: F) -> Result<(), Error>
where
    H: Handler,
    E: Handler,
    F: FnMut(&Server<H, E>) -> bool,
{
    for _ in 0..MAX_TURNS {
        server.turn(TURN)?;
        if done(&*server) {
            return Ok(());
        }
    }

    bail!("condition not reached")
}

/// Turn the server until `count` complete responses arrived at the client.
pub fn then_responses<H, E>(
    server: &mut Server<H, E>,
    client: &mut TcpStream,
    count: usize,
) -> Result<Vec<String>, Error>
where
    H: Handler,
    E: Handler,
{
    let mut data = Vec::new();
    let mut buffer = [0; 1024];

    for _ in 0..MAX_TURNS {
        server.turn(TURN)?;

        match client.read(&mut buffer) {
            Ok(0) => break,
            Ok(len) => data.extend_from_slice(&buffer[..len]),
            Err(error) if error.kind() == ErrorKind::WouldBlock => {}
            Err(error) => return Err(error.into()),
        }

        let responses = split_responses(&data);
        if responses.len() >= count {
            return Ok(responses);
        }
    }

    bail!(
        "expected {} responses, got {:?}",
        count,
        String::from_utf8_lossy(&data)
    )
}

pub fn then_response<H, E>(server: &mut Server<H, E>, client: &mut TcpStream) -> Result<String, Error>
where
    H: Handler,
    E: Handler,
{
    let mut responses = then_responses(server, client, 1)?;
    Ok(responses.remove(0))
}

/// Turn the server until the client sees the connection closed.
pub fn then_closed<H, E>(server: &mut Server<H, E>, client: &mut TcpStream) -> Result<(), Error>
where
    H: Handler,
    E: Handler,
{
    let mut buffer = [0; 1024];

    for _ in 0..MAX_TURNS {
        server.turn(TURN)?;

        match client.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(error) if error.kind() == ErrorKind::WouldBlock => {}
            Err(error) if error.kind() == ErrorKind::ConnectionReset => return Ok(()),
            Err(error) => return Err(error.into()),
        }
    }

    bail!("connection not closed")
}

/// Split complete responses, framed by their `Content-Length`.
fn split_responses(mut data: &[u8]) -> Vec<String> {
    let mut responses = Vec::new();

    while let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
        let head = String::from_utf8_lossy(&data[..end]);
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);

        let total = end + 4 + length;
        if data.len() < total {
            break;
        }

        responses.push(String::from_utf8_lossy(&data[..total]).into_owned());
        data = &data[total..];
    }

    responses
}

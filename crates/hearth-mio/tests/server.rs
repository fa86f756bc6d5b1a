mod utils;

use std::{thread, time::Duration};

use anyhow::Error;
use hearth::{Constraints, Request, Response};
use hearth_mio::ServerConfig;
use tracing_test::traced_test;

use crate::utils::{
    given_client, given_server, then_closed, then_response, then_responses, when_sent,
    when_turned_until,
};

fn echo_uri(request: &Request, response: &mut Response) {
    response.set_body(format!("{} {}", request.method(), request.uri()));
}

#[test]
#[traced_test]
fn serves_request() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let mut client = given_client(&mut server)?;

    when_sent(&mut client, b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let response = then_response(&mut server, &mut client)?;

    assert_eq!(
        response,
        "HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nGET /hello"
    );

    Ok(())
}

#[test]
#[traced_test]
fn handler_sets_status_and_headers() -> Result<(), Error> {
    let handler = |_: &Request, response: &mut Response| {
        response.set_status(404);
        response.set_header("Content-Type", "text/plain").unwrap();
        response.set_body("missing");
    };
    let mut server = given_server(ServerConfig::default(), handler)?;
    let mut client = given_client(&mut server)?;

    when_sent(&mut client, b"GET /nope HTTP/1.1\r\n\r\n")?;
    let response = then_response(&mut server, &mut client)?;

    assert_eq!(
        response,
        "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 7\r\n\r\nmissing"
    );

    Ok(())
}

#[test]
#[traced_test]
fn request_split_across_reads() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let mut client = given_client(&mut server)?;

    when_sent(&mut client, b"GET /split HT")?;
    for _ in 0..10 {
        server.turn(Duration::from_millis(5))?;
    }
    when_sent(&mut client, b"TP/1.1\r\nHost: x\r\n\r\n")?;
    let response = then_response(&mut server, &mut client)?;

    assert!(response.ends_with("\r\n\r\nGET /split"), "{:?}", response);

    Ok(())
}

#[test]
#[traced_test]
fn body_is_passed_to_handler() -> Result<(), Error> {
    let handler = |request: &Request, response: &mut Response| {
        response.set_body(request.body().to_vec());
    };
    let mut server = given_server(ServerConfig::default(), handler)?;
    let mut client = given_client(&mut server)?;

    when_sent(
        &mut client,
        b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
    )?;
    let response = then_response(&mut server, &mut client)?;

    assert!(response.ends_with("\r\n\r\nhello world"), "{:?}", response);

    Ok(())
}

#[test]
#[traced_test]
fn malformed_request_gets_bad_request() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let mut client = given_client(&mut server)?;

    when_sent(&mut client, b"BREW /pot HTTP/1.1\r\n\r\n")?;
    let response = then_response(&mut server, &mut client)?;

    assert_eq!(response, "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n");

    // The connection stays usable
    when_sent(&mut client, b"GET /after HTTP/1.1\r\n\r\n")?;
    let response = then_response(&mut server, &mut client)?;
    assert!(response.ends_with("GET /after"), "{:?}", response);

    Ok(())
}

#[test]
#[traced_test]
fn oversized_body_closes_connection() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let mut client = given_client(&mut server)?;

    when_sent(
        &mut client,
        b"POST /upload HTTP/1.1\r\nContent-Length: 2000000\r\n\r\nfirst part",
    )?;
    let response = then_response(&mut server, &mut client)?;
    assert_eq!(response, "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n");

    // The rest of the body would otherwise be read as requests
    then_closed(&mut server, &mut client)?;
    assert!(server.connections().is_empty());

    Ok(())
}

#[test]
#[traced_test]
fn longest_allowed_uri_accepted_by_default() -> Result<(), Error> {
    let config = ServerConfig::default();
    let uri = format!("/{}", "a".repeat(config.constraints.max_uri_len - 1));
    let mut server = given_server(config, echo_uri)?;
    let mut client = given_client(&mut server)?;

    let request = format!("GET {} HTTP/1.1\r\nHost: x\r\n\r\n", uri);
    when_sent(&mut client, request.as_bytes())?;
    let response = then_response(&mut server, &mut client)?;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{:?}", response);
    assert!(response.ends_with(&format!("GET {}", uri)));

    Ok(())
}

#[test]
#[traced_test]
fn custom_error_handler() -> Result<(), Error> {
    let config = ServerConfig {
        constraints: Constraints {
            max_uri_len: 8,
            ..Constraints::default()
        },
        ..ServerConfig::default()
    };
    let error_handler = |_: &Request, response: &mut Response| {
        response.set_status(414);
        response.set_body("too long");
    };
    let mut server = given_server(config, echo_uri)?.with_error_handler(error_handler);
    let mut client = given_client(&mut server)?;

    when_sent(&mut client, b"GET /a-very-long-path HTTP/1.1\r\n\r\n")?;
    let response = then_response(&mut server, &mut client)?;

    assert_eq!(
        response,
        "HTTP/1.1 414 URI Too Long\r\nContent-Length: 8\r\n\r\ntoo long"
    );

    Ok(())
}

#[test]
#[traced_test]
fn keep_alive_serves_sequential_requests() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let mut client = given_client(&mut server)?;

    for uri in ["/one", "/two", "/three"] {
        let request = format!("GET {} HTTP/1.1\r\n\r\n", uri);
        when_sent(&mut client, request.as_bytes())?;

        let response = then_response(&mut server, &mut client)?;
        assert!(response.ends_with(&format!("GET {}", uri)), "{:?}", response);
    }

    assert_eq!(server.connections().len(), 1);

    Ok(())
}

#[test]
#[traced_test]
fn pipelined_requests_answered_in_order() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let mut client = given_client(&mut server)?;

    when_sent(
        &mut client,
        b"GET /a HTTP/1.1\r\n\r\nPUT /b HTTP/1.1\r\nContent-Length: 2\r\n\r\nhiDELETE /c HTTP/1.1\r\n\r\n",
    )?;
    let responses = then_responses(&mut server, &mut client, 3)?;

    assert!(responses[0].ends_with("GET /a"));
    assert!(responses[1].ends_with("PUT /b"));
    assert!(responses[2].ends_with("DELETE /c"));

    Ok(())
}

#[test]
#[traced_test]
fn connection_close_is_honored() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let mut client = given_client(&mut server)?;

    when_sent(&mut client, b"GET /bye HTTP/1.1\r\nConnection: close\r\n\r\n")?;
    let response = then_response(&mut server, &mut client)?;
    assert!(response.ends_with("GET /bye"));

    then_closed(&mut server, &mut client)?;
    assert!(server.connections().is_empty());

    Ok(())
}

#[test]
#[traced_test]
fn http10_closes_after_response() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let mut client = given_client(&mut server)?;

    when_sent(&mut client, b"GET /old HTTP/1.0\r\n\r\n")?;
    let response = then_response(&mut server, &mut client)?;
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"), "{:?}", response);

    then_closed(&mut server, &mut client)?;

    Ok(())
}

#[test]
#[traced_test]
fn peer_disconnect_drops_connection() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let client = given_client(&mut server)?;

    drop(client);
    when_turned_until(&mut server, |server| server.connections().is_empty())?;

    Ok(())
}

#[test]
#[traced_test]
fn idle_connection_times_out() -> Result<(), Error> {
    let config = ServerConfig {
        idle_timeout: Some(Duration::from_millis(50)),
        ..ServerConfig::default()
    };
    let mut server = given_server(config, echo_uri)?;
    let mut client = given_client(&mut server)?;

    thread::sleep(Duration::from_millis(100));
    then_closed(&mut server, &mut client)?;
    assert!(server.connections().is_empty());

    Ok(())
}

#[test]
#[traced_test]
fn pool_grows_past_initial_slots() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;

    let mut clients = Vec::new();
    for _ in 0..12 {
        clients.push(given_client(&mut server)?);
    }
    assert_eq!(server.connections().len(), 12);
    assert_eq!(server.connections().capacity(), 16);

    for (i, client) in clients.iter_mut().enumerate() {
        let request = format!("GET /{} HTTP/1.1\r\n\r\n", i);
        when_sent(client, request.as_bytes())?;
    }
    for (i, client) in clients.iter_mut().enumerate() {
        let response = then_response(&mut server, client)?;
        assert!(response.ends_with(&format!("GET /{}", i)), "{:?}", response);
    }

    Ok(())
}

#[test]
#[traced_test]
fn closed_server_stops_turning() -> Result<(), Error> {
    let mut server = given_server(ServerConfig::default(), echo_uri)?;
    let _client = given_client(&mut server)?;

    server.close();

    assert!(!server.is_listening());
    assert!(server.connections().is_empty());
    assert!(server.turn(Duration::from_millis(1)).is_err());

    Ok(())
}

//! HTTPS integration tests
//!
//! The server side is an OpenSSL acceptor with a certificate generated at
//! test time, so verification only succeeds when the test trusts it.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};

use snapwire::{CachePolicy, Client, ClientConfig, Error, Method, Request};

fn self_signed() -> (X509, PKey<Private>) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    let san = SubjectAlternativeName::new()
        .dns("localhost")
        .ip("127.0.0.1")
        .build(&builder.x509v3_context(None, None))
        .unwrap();
    builder.append_extension(san).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

/// Serve `body` over TLS to every request on up to `connections` connections
fn start_tls_server(
    cert: &X509,
    key: &PKey<Private>,
    connections: usize,
    body: &'static str,
) -> SocketAddr {
    start_tls_server_closing_after(cert, key, connections, body, usize::MAX)
}

/// Like `start_tls_server`, but each connection is shut down with
/// close_notify once it has answered `per_connection` requests
fn start_tls_server_closing_after(
    cert: &X509,
    key: &PKey<Private>,
    connections: usize,
    body: &'static str,
    per_connection: usize,
) -> SocketAddr {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor.set_private_key(key).unwrap();
    acceptor.set_certificate(cert).unwrap();
    let acceptor = acceptor.build();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        for stream in listener.incoming().take(connections) {
            let Ok(stream) = stream else { break };
            let acceptor = acceptor.clone();
            thread::spawn(move || {
                // Handshake failures are expected in the verification tests.
                let Ok(tls) = acceptor.accept(stream) else { return };
                let mut reader = BufReader::new(tls);
                for _ in 0..per_connection {
                    let mut content_length = 0;
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 {
                        return;
                    }
                    loop {
                        let mut header = String::new();
                        if reader.read_line(&mut header).unwrap_or(0) == 0 {
                            return;
                        }
                        let header = header.trim_end();
                        if header.is_empty() {
                            break;
                        }
                        if let Some((name, value)) = header.split_once(':') {
                            if name.eq_ignore_ascii_case("content-length") {
                                content_length = value.trim().parse().unwrap_or(0);
                            }
                        }
                    }
                    let mut request_body = vec![0u8; content_length];
                    if reader.read_exact(&mut request_body).is_err() {
                        return;
                    }

                    let answer = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    if reader.get_mut().write_all(answer.as_bytes()).is_err() {
                        return;
                    }
                }
                let _ = reader.get_mut().shutdown();
            });
        }
    });

    addr
}

#[test]
fn test_https_without_verification() {
    let (cert, key) = self_signed();
    let addr = start_tls_server(&cert, &key, 1, "secure hello");

    let config = ClientConfig::builder().verify(false).build().unwrap();
    let client = Client::with_config(config).unwrap();

    let url = format!("https://localhost:{}/", addr.port());
    let request = Request::builder(Method::Get, url.clone())
        .cache_policy(CachePolicy::Never)
        .build();
    let first = client.execute(request).unwrap();
    assert_eq!(first.text(), "secure hello");

    // Same connection, served by the single accepted stream.
    let second = client
        .execute(Request::builder(Method::Post, url).body("x").build())
        .unwrap();
    assert_eq!(second.text(), "secure hello");
    assert_eq!(client.pool_stats().active, 1);
}

#[test]
fn test_idle_connection_closed_by_server_is_not_reused() {
    let (cert, key) = self_signed();
    let addr = start_tls_server_closing_after(&cert, &key, 2, "fresh", 1);

    let config = ClientConfig::builder().verify(false).build().unwrap();
    let client = Client::with_config(config).unwrap();
    let url = format!("https://localhost:{}/", addr.port());
    let request = || {
        Request::builder(Method::Get, url.clone())
            .cache_policy(CachePolicy::Never)
            .build()
    };

    assert_eq!(client.execute(request()).unwrap().text(), "fresh");

    // Let close_notify and the FIN reach the idle connection.
    thread::sleep(Duration::from_millis(300));

    let second = client.execute(request());
    assert_eq!(second.unwrap().text(), "fresh");
    assert_eq!(client.pool_stats().active, 1);
}

#[test]
fn test_untrusted_certificate_is_rejected() {
    let (cert, key) = self_signed();
    let addr = start_tls_server(&cert, &key, 1, "unreachable");

    let client = Client::new();
    let result = client.get(&format!("https://localhost:{}/", addr.port()));

    assert!(matches!(result, Err(Error::ConnectionFailed(_))));
    assert_eq!(client.pool_stats().active, 0);
}

#[test]
fn test_request_level_verify_override() {
    let (cert, key) = self_signed();
    let addr = start_tls_server(&cert, &key, 1, "override");

    let client = Client::new();
    let request = Request::builder(Method::Get, format!("https://localhost:{}/", addr.port()))
        .verify(false)
        .build();

    assert_eq!(client.execute(request).unwrap().text(), "override");
}

#[test]
fn test_trusted_ca_file() {
    let (cert, key) = self_signed();
    let addr = start_tls_server(&cert, &key, 1, "trusted");

    let mut ca_file = tempfile::NamedTempFile::new().unwrap();
    ca_file.write_all(&cert.to_pem().unwrap()).unwrap();
    ca_file.flush().unwrap();

    let config = ClientConfig::builder().ca_file(ca_file.path()).build().unwrap();
    let client = Client::with_config(config).unwrap();

    let response = client
        .get(&format!("https://localhost:{}/", addr.port()))
        .unwrap();
    assert_eq!(response.text(), "trusted");
}

#[test]
fn test_missing_ca_file_is_a_tls_error() {
    let (cert, key) = self_signed();
    let addr = start_tls_server(&cert, &key, 1, "never");

    let config = ClientConfig::builder()
        .ca_file("/nonexistent/snapwire-ca.pem")
        .build()
        .unwrap();
    let client = Client::with_config(config).unwrap();

    let result = client.get(&format!("https://localhost:{}/", addr.port()));
    assert!(matches!(result, Err(Error::Tls(_))));
}

//! TLS support for HTTPS connections
//!
//! The TLS implementation uses the session operations abstraction pattern:
//!
//! 1. `TlsConfig` holds client settings (minimum version, extra trust roots)
//! 2. `TlsConnector` runs the handshake with or without verification
//! 3. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//!
//! All HTTP code above the session layer is unchanged for TLS.
//!
//! # Examples
//!
//! ```no_run
//! use snapwire::http::tls::{TlsConfig, TlsVersion};
//! use snapwire::http::HttpSession;
//! use std::net::TcpStream;
//! use std::time::Duration;
//!
//! let config = TlsConfig {
//!     min_version: TlsVersion::Tls13,
//!     ..Default::default()
//! };
//! let connector = config.connector().unwrap();
//!
//! let tcp_stream = TcpStream::connect("example.com:443").unwrap();
//! let tls = connector
//!     .connect(tcp_stream, "example.com", true, Some(Duration::from_secs(5)))
//!     .unwrap();
//! let session = HttpSession::new(tls);
//! ```

pub mod config;
pub mod session;

pub use config::{TlsConfig, TlsConnector, TlsError, TlsVersion};
pub use session::TlsSessionOps;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

#[cfg(test)]
pub(crate) mod test_cert {
    //! Throwaway server identity for handshake tests

    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::hash::MessageDigest;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::ssl::{SslAcceptor, SslMethod};
    use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
    use openssl::x509::{X509NameBuilder, X509};

    /// Self-signed certificate for `localhost` and 127.0.0.1
    pub(crate) fn self_signed() -> (X509, PKey<Private>) {
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

    pub(crate) fn self_signed_acceptor() -> SslAcceptor {
        let (cert, key) = self_signed();
        let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        acceptor.set_private_key(&key).unwrap();
        acceptor.set_certificate(&cert).unwrap();
        acceptor.check_private_key().unwrap();
        acceptor.build()
    }
}

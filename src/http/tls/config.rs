//! TLS configuration
//!
//! [`TlsConfig`] is plain data carried by the client configuration.
//! [`TlsConnector`] is the OpenSSL context built from it, shared by every
//! TLS connection the pool opens.

use super::session::TlsSessionOps;
use openssl::ssl::{HandshakeError, SslConnector, SslMethod, SslVerifyMode};
use std::io;
use std::net::TcpStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,
}

/// Client TLS settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Lowest protocol version offered
    pub min_version: TlsVersion,
    /// PEM bundle trusted in addition to the system roots
    pub ca_file: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            min_version: TlsVersion::Tls12,
            ca_file: None,
        }
    }
}

impl TlsConfig {
    /// Build the OpenSSL connector for these settings
    pub fn connector(&self) -> Result<TlsConnector, TlsError> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())?;
        builder.set_min_proto_version(Some(self.min_version.to_openssl_version()))?;

        if let Some(ref ca_file) = self.ca_file {
            builder.set_ca_file(ca_file)?;
        }

        Ok(TlsConnector {
            connector: builder.build(),
        })
    }
}

/// Shared client context; cheap to use from many threads
#[derive(Clone)]
pub struct TlsConnector {
    connector: SslConnector,
}

impl TlsConnector {
    /// Run the client handshake over `stream`
    ///
    /// SNI carries `host` unless it is an IP literal. With `verify` unset,
    /// neither the certificate chain nor the hostname is checked.
    pub fn connect(
        &self,
        stream: TcpStream,
        host: &str,
        verify: bool,
        timeout: Option<Duration>,
    ) -> Result<TlsSessionOps, TlsError> {
        let timeout = timeout.filter(|d| !d.is_zero());
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;

        let mut config = self.connector.configure()?;
        if !verify {
            config.set_verify_hostname(false);
            config.set_verify(SslVerifyMode::NONE);
        }

        match config.connect(host, stream) {
            Ok(stream) => Ok(TlsSessionOps::new(stream)),
            Err(HandshakeError::SetupFailure(e)) => Err(TlsError::OpenSsl(e)),
            Err(HandshakeError::Failure(mid)) | Err(HandshakeError::WouldBlock(mid)) => {
                let timed_out = mid.error().io_error().is_some_and(|e| {
                    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
                });
                if timed_out {
                    return Err(TlsError::HandshakeTimeout);
                }
                Err(TlsError::HandshakeFailed(mid.error().to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!("TLSv1.2".parse::<TlsVersion>().unwrap(), TlsVersion::Tls12);
        assert_eq!("tlsv1.3".parse::<TlsVersion>().unwrap(), TlsVersion::Tls13);
        assert_eq!("TLS1.0".parse::<TlsVersion>().unwrap(), TlsVersion::Tls10);
        assert!("invalid".parse::<TlsVersion>().is_err());
    }

    #[test]
    fn test_default_config_builds_connector() {
        let config = TlsConfig::default();
        assert_eq!(config.min_version, TlsVersion::Tls12);
        assert!(config.connector().is_ok());
    }

    #[test]
    fn test_missing_ca_file_is_rejected() {
        let config = TlsConfig {
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        assert!(matches!(config.connector(), Err(TlsError::OpenSsl(_))));
    }
}

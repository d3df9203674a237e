//! Certificates for QUIC listeners.

use std::fs::File;
use std::io::BufReader;

use camino::Utf8Path;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use super::errors::TransportError;

/// Certificate chain and private key presented by QUIC listeners.
#[derive(Debug)]
pub struct QuicIdentity {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl QuicIdentity {
    /// Loads a PEM certificate chain and private key.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when either file cannot be read or holds
    /// no usable entry.
    pub fn from_pem_files(cert_path: &Utf8Path, key_path: &Utf8Path) -> Result<Self, TransportError> {
        let tls_file = |path: &Utf8Path| {
            File::open(path)
                .map(BufReader::new)
                .map_err(|source| TransportError::TlsFile {
                    path: path.to_string(),
                    source,
                })
        };

        let mut reader = tls_file(cert_path)?;
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TransportError::TlsFile {
                path: cert_path.to_string(),
                source,
            })?;
        if certs.is_empty() {
            return Err(TransportError::TlsMissing {
                what: "certificates",
                path: cert_path.to_string(),
            });
        }

        let mut reader = tls_file(key_path)?;
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|source| TransportError::TlsFile {
                path: key_path.to_string(),
                source,
            })?
            .ok_or_else(|| TransportError::TlsMissing {
                what: "private key",
                path: key_path.to_string(),
            })?;
        Ok(Self { certs, key })
    }

    /// Generates a self-signed certificate for `localhost`, for development.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SelfSigned`] when generation fails.
    pub fn self_signed() -> Result<Self, TransportError> {
        let self_signed_error = |error: &dyn std::fmt::Display| TransportError::SelfSigned {
            message: error.to_string(),
        };
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
            .map_err(|error| self_signed_error(&error))?;
        let cert_der =
            CertificateDer::from(cert.serialize_der().map_err(|error| self_signed_error(&error))?);
        let key_der = PrivatePkcs8KeyDer::from(cert.get_key_pair().serialize_der());
        Ok(Self {
            certs: vec![cert_der],
            key: key_der.into(),
        })
    }

    /// Certificate chain, leaf first.
    #[must_use]
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    pub(super) fn server_config(&self) -> Result<quinn::ServerConfig, TransportError> {
        quinn::ServerConfig::with_single_cert(self.certs.clone(), self.key.clone_key())
            .map_err(|source| TransportError::Tls { source })
    }
}

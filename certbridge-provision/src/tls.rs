//! Secure channel configuration handed to the transport that owns the listener

use openssl::pkey::PKey;
use openssl::x509::X509;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::fmt;
use std::sync::Arc;

use crate::error::{ProvisionError, Result};

/// PEM material for a listener that only accepts CA-issued clients
#[derive(Clone)]
pub struct SecureServerConfig {
    pub server_key: Vec<u8>,
    pub server_cert: Vec<u8>,
    pub ca_cert: Vec<u8>,
    pub request_cert: bool,
    pub reject_unauthorized: bool,
}

impl fmt::Debug for SecureServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureServerConfig")
            .field("server_key", &"<redacted>")
            .field("server_cert_len", &self.server_cert.len())
            .field("ca_cert_len", &self.ca_cert.len())
            .field("request_cert", &self.request_cert)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .finish()
    }
}

impl SecureServerConfig {
    /// Build a rustls server configuration that verifies clients against the CA
    pub fn to_rustls_server_config(&self) -> Result<ServerConfig> {
        let ca = pem_certificate_to_der(&self.ca_cert)?;
        let cert = pem_certificate_to_der(&self.server_cert)?;
        let key = PKey::private_key_from_pem(&self.server_key)?.private_key_to_pkcs8()?;

        let builder = ServerConfig::builder();
        let builder = if self.request_cert {
            let mut roots = RootCertStore::empty();
            roots
                .add(ca)
                .map_err(|e| ProvisionError::Tls(format!("Invalid CA certificate: {e}")))?;
            let mut verifier = WebPkiClientVerifier::builder(Arc::new(roots));
            if !self.reject_unauthorized {
                verifier = verifier.allow_unauthenticated();
            }
            let verifier = verifier
                .build()
                .map_err(|e| ProvisionError::Tls(format!("Client verifier: {e}")))?;
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };

        builder
            .with_single_cert(
                vec![cert],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)),
            )
            .map_err(|e| ProvisionError::Tls(format!("Server certificate: {e}")))
    }
}

fn pem_certificate_to_der(pem: &[u8]) -> Result<CertificateDer<'static>> {
    Ok(CertificateDer::from(X509::from_pem(pem)?.to_der()?))
}

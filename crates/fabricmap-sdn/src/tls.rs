//! TLS client configuration for `https` controller URLs.
//!
//! `cert_path` follows the controller configuration convention:
//!
//! - absent: verify against the Mozilla root store
//! - empty string: do not verify the controller certificate
//! - a path: verify against the PEM CA bundle at that path

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tracing::warn;

use crate::error::{SdnError, SdnResult};

pub fn client_config(cert_path: Option<&str>) -> SdnResult<Arc<rustls::ClientConfig>> {
    let builder = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| SdnError::Tls(format!("tls protocol version error: {e}")))?;

    let config = match cert_path {
        None => {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        Some("") => {
            warn!("SDN controller certificate verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
                .with_no_client_auth()
        }
        Some(path) => builder
            .with_root_certificates(load_roots(path)?)
            .with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

fn load_roots(path: &str) -> SdnResult<rustls::RootCertStore> {
    let file = File::open(path).map_err(|e| SdnError::Tls(format!("{path}: {e}")))?;
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
        let cert = cert.map_err(|e| SdnError::Tls(format!("{path}: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| SdnError::Tls(format!("{path}: {e}")))?;
    }
    if roots.is_empty() {
        return Err(SdnError::Tls(format!("{path}: no certificates found")));
    }
    Ok(roots)
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

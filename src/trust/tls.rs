use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{trace, warn};

use super::SslContext;
use crate::conn::VerifyMode;
use crate::Error;

/// The lowest TLS protocol version a connection will negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum TlsVersion {
    /// TLS 1.2 and newer.
    #[default]
    Tls12,

    /// TLS 1.3 only.
    Tls13,
}

impl TlsVersion {
    fn versions(self) -> &'static [&'static rustls::SupportedProtocolVersion] {
        static TLS12_AND_UP: &[&rustls::SupportedProtocolVersion] =
            &[&rustls::version::TLS13, &rustls::version::TLS12];
        static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

        match self {
            TlsVersion::Tls12 => TLS12_AND_UP,
            TlsVersion::Tls13 => TLS13_ONLY,
        }
    }
}

/// The process default crypto provider, or the one selected by crate features.
#[allow(unreachable_code)]
fn crypto_provider() -> Result<Arc<CryptoProvider>, Error> {
    if let Some(provider) = CryptoProvider::get_default() {
        return Ok(provider.clone());
    }

    #[cfg(feature = "tls-ring")]
    return Ok(Arc::new(rustls::crypto::ring::default_provider()));

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    return Ok(Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    Err(Error::Config(
        "no TLS crypto provider is installed or enabled".into(),
    ))
}

/// Build the client configuration for one connection.
///
/// Protocol versions and cipher suites come from the connection settings;
/// trust roots, client identity and verification mode from the trust context.
pub(crate) fn client_config(
    ssl: &SslContext,
    min_version: TlsVersion,
    cipher_suites: Option<&[String]>,
) -> Result<Arc<ClientConfig>, Error> {
    let mut provider = (*crypto_provider()?).clone();

    if let Some(names) = cipher_suites {
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            names.iter().any(|wanted| wanted.eq_ignore_ascii_case(&name))
        });

        if provider.cipher_suites.is_empty() {
            return Err(Error::Config(format!(
                "none of the configured cipher suites are supported: {}",
                names.join(", ")
            )));
        }
    }

    let provider = Arc::new(provider);
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(min_version.versions())?;

    let builder = match ssl.verify_mode() {
        VerifyMode::Peer => {
            let mut roots = RootCertStore::empty();
            let (added, ignored) = roots.add_parsable_certificates(ssl.roots().iter().cloned());
            if ignored > 0 {
                warn!(added, ignored, "some trust roots could not be parsed");
            }
            trace!(roots = added, "verifying peers");
            builder.with_root_certificates(roots)
        }
        VerifyMode::None => {
            trace!("peer verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        }
    };

    let config = match ssl.client_identity() {
        Some(identity) => builder.with_client_auth_cert(identity.certs(), identity.key())?,
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// Server certificate verifier for `VerifyMode::None`.
///
/// Handshake signatures are still checked so the session keys are bound to the
/// presented certificate, but the certificate itself is not.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

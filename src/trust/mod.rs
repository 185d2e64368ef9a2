//! Trust contexts: how connections to a site must be authenticated.
//!
//! The pool never validates trust itself. It remembers which context a
//! connection was last used with, and only hands a cached connection to a
//! caller whose context is equivalent. Equivalence is structural: a context
//! rebuilt from the same configuration reuses the same connections.

use std::fmt;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::conn::{HttpConnection, VerifyMode};
use crate::Error;

pub(crate) mod tls;

pub use self::tls::TlsVersion;

/// A caller-supplied trust policy for connections of type `C`.
pub trait TrustContext<C>: Clone + Send + Sync + 'static {
    /// Attach this context's verification settings to a new, unstarted
    /// connection.
    fn setup_connection(&self, connection: &mut C) -> Result<(), Error>;

    /// Whether a connection validated under `other` may serve a caller
    /// presenting `self`.
    fn is_equivalent(&self, other: &Self) -> bool;
}

/// The certificate and key a client presents to the server.
#[derive(Clone)]
pub struct ClientIdentity {
    certs: Arc<[CertificateDer<'static>]>,
    key: Arc<PrivateKeyDer<'static>>,
}

impl ClientIdentity {
    /// A certificate chain, leaf first, and its private key.
    pub fn new(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self {
            certs: certs.into(),
            key: Arc::new(key),
        }
    }

    pub(crate) fn certs(&self) -> Vec<CertificateDer<'static>> {
        self.certs.to_vec()
    }

    pub(crate) fn key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}

impl PartialEq for ClientIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.certs == other.certs && self.key.secret_der() == other.key.secret_der()
    }
}

impl Eq for ClientIdentity {}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("certs", &self.certs.len())
            .finish_non_exhaustive()
    }
}

/// TLS trust settings: trust roots, client identity and verification mode.
#[derive(Clone, PartialEq, Eq)]
pub struct SslContext {
    roots: Arc<[CertificateDer<'static>]>,
    client_identity: Option<ClientIdentity>,
    verify_mode: VerifyMode,
}

impl SslContext {
    /// Verify peers against `roots`.
    pub fn new(roots: Vec<CertificateDer<'static>>) -> Self {
        Self {
            roots: roots.into(),
            client_identity: None,
            verify_mode: VerifyMode::Peer,
        }
    }

    /// Verify peers against the platform's trust store.
    ///
    /// Certificates the platform store fails to load are logged and skipped.
    pub fn system() -> Self {
        let loaded = rustls_native_certs::load_native_certs();
        for error in &loaded.errors {
            tracing::warn!(%error, "failed to load a system root certificate");
        }
        Self::new(loaded.certs)
    }

    /// Accept any peer certificate.
    ///
    /// Connections made under this context are never pooled.
    pub fn insecure() -> Self {
        Self {
            roots: Arc::from(Vec::new()),
            client_identity: None,
            verify_mode: VerifyMode::None,
        }
    }

    /// Present `identity` when the server asks for a client certificate.
    pub fn with_client_identity(mut self, identity: ClientIdentity) -> Self {
        self.client_identity = Some(identity);
        self
    }

    /// The trust roots.
    pub fn roots(&self) -> &[CertificateDer<'static>] {
        &self.roots
    }

    /// The client identity, if any.
    pub fn client_identity(&self) -> Option<&ClientIdentity> {
        self.client_identity.as_ref()
    }

    /// How peers are verified.
    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }
}

impl fmt::Debug for SslContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslContext")
            .field("roots", &self.roots.len())
            .field("client_identity", &self.client_identity)
            .field("verify_mode", &self.verify_mode)
            .finish()
    }
}

/// Verifies connections to one host under an [`SslContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verifier {
    hostname: String,
    ssl_context: SslContext,
}

impl Verifier {
    /// Verify `hostname` under `ssl_context`.
    pub fn new(hostname: impl Into<String>, ssl_context: SslContext) -> Self {
        Self {
            hostname: hostname.into(),
            ssl_context,
        }
    }

    /// The host name certificates are checked against.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The trust settings.
    pub fn ssl_context(&self) -> &SslContext {
        &self.ssl_context
    }
}

impl TrustContext<HttpConnection> for Verifier {
    fn setup_connection(&self, connection: &mut HttpConnection) -> Result<(), Error> {
        connection.set_trust(self.hostname.clone(), self.ssl_context.clone());
        Ok(())
    }

    fn is_equivalent(&self, other: &Self) -> bool {
        self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(byte: u8) -> CertificateDer<'static> {
        CertificateDer::from(vec![0x30, byte])
    }

    #[test]
    fn reconstructed_contexts_are_equivalent() {
        let a = Verifier::new("puppet", SslContext::new(vec![cert(1), cert(2)]));
        let b = Verifier::new("puppet", SslContext::new(vec![cert(1), cert(2)]));
        assert!(a.is_equivalent(&b));
        assert!(b.is_equivalent(&a));
    }

    #[test]
    fn different_roots_are_not_equivalent() {
        let a = Verifier::new("puppet", SslContext::new(vec![cert(1)]));
        let b = Verifier::new("puppet", SslContext::new(vec![cert(2)]));
        assert!(!a.is_equivalent(&b));
    }

    #[test]
    fn insecure_is_not_equivalent_to_verified() {
        let a = Verifier::new("puppet", SslContext::new(Vec::new()));
        let b = Verifier::new("puppet", SslContext::insecure());
        assert!(!a.is_equivalent(&b));
        assert_eq!(b.ssl_context().verify_mode(), VerifyMode::None);
    }

    #[test]
    fn client_identity_participates_in_equivalence() {
        let key = || PrivateKeyDer::Pkcs8(vec![1, 2, 3].into());
        let identity = ClientIdentity::new(vec![cert(9)], key());

        let plain = Verifier::new("puppet", SslContext::new(vec![cert(1)]));
        let with_identity = Verifier::new(
            "puppet",
            SslContext::new(vec![cert(1)]).with_client_identity(identity.clone()),
        );
        let same_identity = Verifier::new(
            "puppet",
            SslContext::new(vec![cert(1)])
                .with_client_identity(ClientIdentity::new(vec![cert(9)], key())),
        );

        assert!(!plain.is_equivalent(&with_identity));
        assert!(with_identity.is_equivalent(&same_identity));
    }

    #[test]
    fn debug_does_not_print_key_material() {
        let identity = ClientIdentity::new(
            vec![cert(9)],
            PrivateKeyDer::Pkcs8(vec![0xde, 0xad].into()),
        );
        let dbg = format!("{:?}", SslContext::new(vec![]).with_client_identity(identity));
        assert!(dbg.contains("ClientIdentity"));
        assert!(!dbg.contains("222"));
    }
}

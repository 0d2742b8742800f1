//! TLS material and handshake options.

use std::fmt;

use serde::Deserialize;
use zeroize::Zeroizing;

use super::de;
use crate::core::constants::{DEFAULT_CIPHERS, DEFAULT_GROUPS};
use crate::core::error::{QuicError, QuicResult};

/// Kind of key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Asymmetric private key.
    Private,
    /// Asymmetric public key.
    Public,
    /// Symmetric secret.
    Secret,
}

/// DER-encoded key. The bytes are wiped on drop.
#[derive(Clone, Deserialize)]
#[serde(from = "KeyObjectRepr")]
pub struct KeyObject {
    kind: KeyKind,
    der: Zeroizing<Vec<u8>>,
}

#[derive(Deserialize)]
struct KeyObjectRepr {
    kind: KeyKind,
    der: Vec<u8>,
}

impl From<KeyObjectRepr> for KeyObject {
    fn from(repr: KeyObjectRepr) -> Self {
        Self {
            kind: repr.kind,
            der: Zeroizing::new(repr.der),
        }
    }
}

impl KeyObject {
    /// Private key from DER bytes.
    pub fn private(der: impl Into<Vec<u8>>) -> Self {
        Self::new(KeyKind::Private, der)
    }

    /// Key of any kind from DER bytes.
    pub fn new(kind: KeyKind, der: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            der: Zeroizing::new(der.into()),
        }
    }

    /// Key kind.
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// DER bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

impl fmt::Debug for KeyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyObject")
            .field("kind", &self.kind)
            .field("len", &self.der.len())
            .finish()
    }
}

/// TLS options of a session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsOptions {
    /// Server name indication.
    #[serde(alias = "servername")]
    #[serde(deserialize_with = "de::present")]
    pub sni: Option<String>,
    /// Application protocol.
    #[serde(deserialize_with = "de::present")]
    pub alpn: Option<String>,
    /// Colon-separated TLS 1.3 cipher suites.
    pub ciphers: String,
    /// Colon-separated key exchange groups.
    pub groups: String,
    /// Emit key log lines.
    pub keylog: bool,
    /// Request and verify a client certificate.
    pub verify_client: bool,
    /// Trace the TLS handshake.
    pub tls_trace: bool,
    /// Check that keys match their certificates.
    pub verify_private_key: bool,
    /// Private keys.
    pub keys: Vec<KeyObject>,
    /// Certificate chain, DER.
    pub certs: Vec<Vec<u8>>,
    /// Trust anchors, DER.
    pub ca: Vec<Vec<u8>>,
    /// Revocation lists, DER.
    pub crl: Vec<Vec<u8>>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            sni: None,
            alpn: None,
            ciphers: DEFAULT_CIPHERS.to_string(),
            groups: DEFAULT_GROUPS.to_string(),
            keylog: false,
            verify_client: false,
            tls_trace: false,
            verify_private_key: false,
            keys: Vec::new(),
            certs: Vec::new(),
            ca: Vec::new(),
            crl: Vec::new(),
        }
    }
}

impl TlsOptions {
    /// Check key kinds. Key contents are the engine's business.
    pub fn validate(&self) -> QuicResult<()> {
        if let Some(key) = self.keys.iter().find(|key| key.kind != KeyKind::Private) {
            return Err(QuicError::invalid_value(
                "options.tls.keys",
                format!("expected a private key, got {:?}", key.kind),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let tls = TlsOptions::default();
        assert_eq!(tls.ciphers, DEFAULT_CIPHERS);
        assert_eq!(tls.groups, DEFAULT_GROUPS);
        assert!(tls.validate().is_ok());
    }

    #[test]
    fn test_keys_must_be_private() {
        let mut tls = TlsOptions {
            keys: vec![KeyObject::private(vec![1, 2, 3])],
            ..TlsOptions::default()
        };
        assert!(tls.validate().is_ok());

        tls.keys.push(KeyObject::new(KeyKind::Public, vec![4]));
        assert!(tls.validate().unwrap_err().is_argument_error());
    }

    #[test]
    fn test_from_json() {
        let tls: TlsOptions = serde_json::from_value(json!({
            "servername": "example.com",
            "alpn": "h3",
            "keys": [{ "kind": "private", "der": [1, 2] }],
            "certs": [[3, 4]],
        }))
        .unwrap();
        assert_eq!(tls.sni.as_deref(), Some("example.com"));
        assert_eq!(tls.keys[0].der(), &[1, 2]);
        assert_eq!(tls.certs, vec![vec![3, 4]]);
        assert_eq!(format!("{:?}", tls.keys[0]), "KeyObject { kind: Private, len: 2 }");
    }
}

//! Endpoint options.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::de;
use crate::core::constants::{
    CC_ALGO_BBR, CC_ALGO_BBR_STR, CC_ALGO_CUBIC, CC_ALGO_CUBIC_STR, CC_ALGO_RENO,
    CC_ALGO_RENO_STR, MAX_PAYLOAD_SIZE, MAX_UDP_BUFFER_SIZE, MAX_UDP_TTL, SECRET_LEN,
};
use crate::core::error::{QuicError, QuicResult};

// =============================================================================
// CONGESTION CONTROL
// =============================================================================

/// Congestion control algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "CongestionControlRepr")]
pub enum CongestionControl {
    /// NewReno.
    Reno,
    /// CUBIC.
    Cubic,
    /// BBR.
    Bbr,
}

impl CongestionControl {
    /// Native code.
    pub fn code(self) -> u8 {
        match self {
            CongestionControl::Reno => CC_ALGO_RENO,
            CongestionControl::Cubic => CC_ALGO_CUBIC,
            CongestionControl::Bbr => CC_ALGO_BBR,
        }
    }

    /// Canonical string form.
    pub fn as_str(self) -> &'static str {
        match self {
            CongestionControl::Reno => CC_ALGO_RENO_STR,
            CongestionControl::Cubic => CC_ALGO_CUBIC_STR,
            CongestionControl::Bbr => CC_ALGO_BBR_STR,
        }
    }
}

impl fmt::Display for CongestionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i64> for CongestionControl {
    type Error = QuicError;

    fn try_from(code: i64) -> QuicResult<Self> {
        match u8::try_from(code) {
            Ok(CC_ALGO_RENO) => Ok(CongestionControl::Reno),
            Ok(CC_ALGO_CUBIC) => Ok(CongestionControl::Cubic),
            Ok(CC_ALGO_BBR) => Ok(CongestionControl::Bbr),
            _ => Err(QuicError::invalid_value(
                "options.cc",
                format!("unknown congestion control code {code}"),
            )),
        }
    }
}

impl FromStr for CongestionControl {
    type Err = QuicError;

    fn from_str(s: &str) -> QuicResult<Self> {
        match s {
            CC_ALGO_RENO_STR => Ok(CongestionControl::Reno),
            CC_ALGO_CUBIC_STR => Ok(CongestionControl::Cubic),
            CC_ALGO_BBR_STR => Ok(CongestionControl::Bbr),
            other => Err(QuicError::invalid_value(
                "options.cc",
                format!("unknown congestion control {other:?}"),
            )),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CongestionControlRepr {
    Code(i64),
    Name(String),
}

impl TryFrom<CongestionControlRepr> for CongestionControl {
    type Error = QuicError;

    fn try_from(repr: CongestionControlRepr) -> QuicResult<Self> {
        match repr {
            CongestionControlRepr::Code(code) => Self::try_from(code),
            CongestionControlRepr::Name(name) => name.parse(),
        }
    }
}

// =============================================================================
// SECRETS
// =============================================================================

/// 16-byte secret used for stateless reset or address validation tokens.
///
/// Wiped on drop. `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Deserialize)]
#[serde(try_from = "Vec<u8>")]
pub struct TokenSecret([u8; SECRET_LEN]);

impl TokenSecret {
    /// Wrap raw bytes.
    pub fn new(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(..)")
    }
}

impl TryFrom<&[u8]> for TokenSecret {
    type Error = QuicError;

    fn try_from(bytes: &[u8]) -> QuicResult<Self> {
        let array: [u8; SECRET_LEN] = bytes.try_into().map_err(|_| {
            QuicError::invalid_value(
                "secret",
                format!("must be exactly {SECRET_LEN} bytes, got {}", bytes.len()),
            )
        })?;
        Ok(Self(array))
    }
}

impl TryFrom<Vec<u8>> for TokenSecret {
    type Error = QuicError;

    fn try_from(mut bytes: Vec<u8>) -> QuicResult<Self> {
        let secret = Self::try_from(bytes.as_slice());
        bytes.zeroize();
        secret
    }
}

// =============================================================================
// ENDPOINT OPTIONS
// =============================================================================

/// Endpoint options.
///
/// `None` leaves the engine default in place. Durations are seconds for the
/// token expirations and milliseconds for `handshake_timeout`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointOptions {
    /// Local address to bind. The engine picks one when absent.
    #[serde(deserialize_with = "de::present")]
    pub address: Option<SocketAddr>,
    /// Lifetime of retry tokens (s).
    #[serde(deserialize_with = "de::present")]
    pub retry_token_expiration: Option<u64>,
    /// Lifetime of regular tokens (s).
    #[serde(deserialize_with = "de::present")]
    pub token_expiration: Option<u64>,
    /// Concurrent sessions per remote host.
    #[serde(deserialize_with = "de::present")]
    pub max_connections_per_host: Option<u64>,
    /// Concurrent sessions in total.
    #[serde(deserialize_with = "de::present")]
    pub max_connections_total: Option<u64>,
    /// Stateless resets per remote host.
    #[serde(deserialize_with = "de::present")]
    pub max_stateless_resets_per_host: Option<u64>,
    /// Validated-address cache size.
    #[serde(rename = "addressLRUSize")]
    #[serde(deserialize_with = "de::present")]
    pub address_lru_size: Option<u64>,
    /// Retries per remote host.
    #[serde(deserialize_with = "de::present")]
    pub max_retries: Option<u64>,
    /// Largest UDP payload to send.
    #[serde(deserialize_with = "de::present")]
    pub max_payload_size: Option<u64>,
    /// Packets received before an ACK is forced.
    #[serde(deserialize_with = "de::present")]
    pub unacknowledged_packet_threshold: Option<u64>,
    /// Handshake deadline (ms).
    #[serde(deserialize_with = "de::present")]
    pub handshake_timeout: Option<u64>,
    /// Per-stream flow-control window ceiling.
    #[serde(deserialize_with = "de::present")]
    pub max_stream_window: Option<u64>,
    /// Connection flow-control window ceiling.
    #[serde(deserialize_with = "de::present")]
    pub max_window: Option<u64>,
    /// Probability of dropping a received packet, for diagnostics.
    #[serde(deserialize_with = "de::present")]
    pub rx_diagnostic_loss: Option<f64>,
    /// Probability of dropping a sent packet, for diagnostics.
    #[serde(deserialize_with = "de::present")]
    pub tx_diagnostic_loss: Option<f64>,
    /// Socket receive buffer size.
    #[serde(deserialize_with = "de::present")]
    pub udp_receive_buffer_size: Option<u32>,
    /// Socket send buffer size.
    #[serde(deserialize_with = "de::present")]
    pub udp_send_buffer_size: Option<u32>,
    /// IP TTL.
    #[serde(rename = "udpTTL")]
    #[serde(deserialize_with = "de::present")]
    pub udp_ttl: Option<u32>,
    /// Do not shape payload sizes to the path MTU.
    #[serde(deserialize_with = "de::truthy")]
    pub no_udp_payload_size_shaping: bool,
    /// Require address validation for every new session.
    #[serde(deserialize_with = "de::truthy")]
    pub validate_address: bool,
    /// Never send stateless resets.
    #[serde(deserialize_with = "de::truthy")]
    pub disable_stateless_reset: bool,
    /// Bind IPv6 sockets without dual-stack.
    #[serde(deserialize_with = "de::truthy")]
    pub ipv6_only: bool,
    /// Congestion control algorithm.
    #[serde(deserialize_with = "de::present")]
    pub cc: Option<CongestionControl>,
    /// Secret for stateless reset tokens.
    #[serde(deserialize_with = "de::present")]
    pub reset_token_secret: Option<TokenSecret>,
    /// Secret for address validation tokens.
    #[serde(deserialize_with = "de::present")]
    pub token_secret: Option<TokenSecret>,
}

impl EndpointOptions {
    /// Start a builder.
    pub fn builder() -> EndpointOptionsBuilder {
        EndpointOptionsBuilder::new()
    }

    /// Parse and validate JSON options.
    pub fn from_json(json: &str) -> QuicResult<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Parse and validate an already decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> QuicResult<Self> {
        let options: Self = serde_json::from_value(value)?;
        options.validate()?;
        Ok(options)
    }

    /// Check every bound the engine enforces.
    pub fn validate(&self) -> QuicResult<()> {
        if let Some(ttl) = self.udp_ttl.filter(|&ttl| ttl > MAX_UDP_TTL) {
            return Err(QuicError::out_of_range(
                "options.udpTTL",
                ttl,
                format!("0..={MAX_UDP_TTL}"),
            ));
        }
        for (name, size) in [
            ("options.udpReceiveBufferSize", self.udp_receive_buffer_size),
            ("options.udpSendBufferSize", self.udp_send_buffer_size),
        ] {
            if let Some(size) = size.filter(|&size| size > MAX_UDP_BUFFER_SIZE) {
                return Err(QuicError::out_of_range(
                    name,
                    size,
                    format!("0..={MAX_UDP_BUFFER_SIZE}"),
                ));
            }
        }
        for (name, loss) in [
            ("options.rxDiagnosticLoss", self.rx_diagnostic_loss),
            ("options.txDiagnosticLoss", self.tx_diagnostic_loss),
        ] {
            if let Some(loss) = loss.filter(|loss| !(0.0..=1.0).contains(loss)) {
                return Err(QuicError::out_of_range(name, loss, "0.0..=1.0"));
            }
        }
        if let Some(size) = self
            .max_payload_size
            .filter(|size| !(1..=MAX_PAYLOAD_SIZE).contains(size))
        {
            return Err(QuicError::out_of_range(
                "options.maxPayloadSize",
                size,
                format!("1..={MAX_PAYLOAD_SIZE}"),
            ));
        }
        for (name, secs) in [
            ("options.retryTokenExpiration", self.retry_token_expiration),
            ("options.tokenExpiration", self.token_expiration),
        ] {
            if secs == Some(0) {
                return Err(QuicError::out_of_range(name, 0, "1.."));
            }
        }
        Ok(())
    }
}

/// Builder for [`EndpointOptions`].
#[derive(Debug, Default)]
pub struct EndpointOptionsBuilder {
    options: EndpointOptions,
}

impl EndpointOptionsBuilder {
    /// Create a builder with engine defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn address(mut self, address: SocketAddr) -> Self {
        self.options.address = Some(address);
        self
    }

    /// Set the congestion control algorithm.
    pub fn cc(mut self, cc: CongestionControl) -> Self {
        self.options.cc = Some(cc);
        self
    }

    /// Set the per-host session limit.
    pub fn max_connections_per_host(mut self, max: u64) -> Self {
        self.options.max_connections_per_host = Some(max);
        self
    }

    /// Set the total session limit.
    pub fn max_connections_total(mut self, max: u64) -> Self {
        self.options.max_connections_total = Some(max);
        self
    }

    /// Set the handshake deadline in milliseconds.
    pub fn handshake_timeout(mut self, millis: u64) -> Self {
        self.options.handshake_timeout = Some(millis);
        self
    }

    /// Set the IP TTL.
    pub fn udp_ttl(mut self, ttl: u32) -> Self {
        self.options.udp_ttl = Some(ttl);
        self
    }

    /// Set the largest UDP payload.
    pub fn max_payload_size(mut self, size: u64) -> Self {
        self.options.max_payload_size = Some(size);
        self
    }

    /// Require address validation.
    pub fn validate_address(mut self, on: bool) -> Self {
        self.options.validate_address = on;
        self
    }

    /// Bind IPv6 only.
    pub fn ipv6_only(mut self, on: bool) -> Self {
        self.options.ipv6_only = on;
        self
    }

    /// Set the stateless reset secret.
    pub fn reset_token_secret(mut self, secret: TokenSecret) -> Self {
        self.options.reset_token_secret = Some(secret);
        self
    }

    /// Set the address validation token secret.
    pub fn token_secret(mut self, secret: TokenSecret) -> Self {
        self.options.token_secret = Some(secret);
        self
    }

    /// Validate and return the options.
    pub fn build(self) -> QuicResult<EndpointOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

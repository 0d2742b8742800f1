//! Session options and the validated configuration passed to the engine.

use std::net::{SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use serde::Deserialize;

use super::de;
use super::tls::TlsOptions;
use crate::core::constants::{
    DEFAULT_PREFERRED_ADDRESS_POLICY, MAX_ACK_DELAY_EXPONENT, MAX_ACK_DELAY_LIMIT_MS, MAX_STREAMS,
    MIN_ACTIVE_CONNECTION_ID_LIMIT, PREFERRED_ADDRESS_IGNORE, PREFERRED_ADDRESS_USE,
    QUIC_VERSION_1,
};
use crate::core::error::{QuicError, QuicResult};

/// What a client does with a server's preferred address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredAddressPolicy {
    /// Migrate to it.
    Use,
    /// Stay on the original path.
    Ignore,
    /// Engine default.
    #[default]
    Default,
}

impl PreferredAddressPolicy {
    /// Native code.
    pub fn code(self) -> u32 {
        match self {
            PreferredAddressPolicy::Use => PREFERRED_ADDRESS_USE,
            PreferredAddressPolicy::Ignore => PREFERRED_ADDRESS_IGNORE,
            PreferredAddressPolicy::Default => DEFAULT_PREFERRED_ADDRESS_POLICY,
        }
    }
}

impl FromStr for PreferredAddressPolicy {
    type Err = QuicError;

    fn from_str(s: &str) -> QuicResult<Self> {
        match s {
            "use" => Ok(PreferredAddressPolicy::Use),
            "ignore" => Ok(PreferredAddressPolicy::Ignore),
            "default" => Ok(PreferredAddressPolicy::Default),
            other => Err(QuicError::invalid_value(
                "options.preferredAddressPolicy",
                format!("{other:?} is not one of \"use\", \"ignore\", \"default\""),
            )),
        }
    }
}

/// Limits of the HTTP/3 style application layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationOptions {
    /// Header pairs per block.
    #[serde(deserialize_with = "de::present")]
    pub max_header_pairs: Option<u64>,
    /// Total header block length.
    #[serde(deserialize_with = "de::present")]
    pub max_header_length: Option<u64>,
    /// Field section size.
    #[serde(deserialize_with = "de::present")]
    pub max_field_section_size: Option<u64>,
    /// QPACK dynamic table capacity.
    #[serde(deserialize_with = "de::present")]
    pub qpack_max_dtable_capacity: Option<u64>,
    /// QPACK encoder dynamic table capacity.
    #[serde(deserialize_with = "de::present")]
    pub qpack_encoder_max_dtable_capacity: Option<u64>,
    /// QPACK blocked streams.
    #[serde(deserialize_with = "de::present")]
    pub qpack_blocked_streams: Option<u64>,
    /// Extended CONNECT.
    #[serde(deserialize_with = "de::present")]
    pub enable_connect_protocol: Option<bool>,
    /// HTTP datagrams.
    #[serde(deserialize_with = "de::present")]
    pub enable_datagrams: Option<bool>,
}

/// QUIC transport parameters (RFC 9000 section 18.2).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportParams {
    /// Server preferred address, IPv4.
    #[serde(deserialize_with = "de::present")]
    pub preferred_address_ipv4: Option<SocketAddrV4>,
    /// Server preferred address, IPv6.
    #[serde(deserialize_with = "de::present")]
    pub preferred_address_ipv6: Option<SocketAddrV6>,
    /// Initial flow-control limit for locally opened bidirectional streams.
    #[serde(deserialize_with = "de::present")]
    pub initial_max_stream_data_bidi_local: Option<u64>,
    /// Initial flow-control limit for peer-opened bidirectional streams.
    #[serde(deserialize_with = "de::present")]
    pub initial_max_stream_data_bidi_remote: Option<u64>,
    /// Initial flow-control limit for unidirectional streams.
    #[serde(deserialize_with = "de::present")]
    pub initial_max_stream_data_uni: Option<u64>,
    /// Initial connection flow-control limit.
    #[serde(deserialize_with = "de::present")]
    pub initial_max_data: Option<u64>,
    /// Bidirectional streams the peer may open.
    #[serde(deserialize_with = "de::present")]
    pub initial_max_streams_bidi: Option<u64>,
    /// Unidirectional streams the peer may open.
    #[serde(deserialize_with = "de::present")]
    pub initial_max_streams_uni: Option<u64>,
    /// Idle timeout (ms).
    #[serde(deserialize_with = "de::present")]
    pub max_idle_timeout: Option<u64>,
    /// Connection ids the peer may keep active.
    #[serde(rename = "activeConnectionIDLimit")]
    #[serde(deserialize_with = "de::present")]
    pub active_connection_id_limit: Option<u64>,
    /// ACK delay exponent.
    #[serde(deserialize_with = "de::present")]
    pub ack_delay_exponent: Option<u64>,
    /// Maximum ACK delay (ms).
    #[serde(deserialize_with = "de::present")]
    pub max_ack_delay: Option<u64>,
    /// Largest DATAGRAM frame accepted; zero disables datagrams.
    #[serde(deserialize_with = "de::present")]
    pub max_datagram_frame_size: Option<u64>,
    /// Forbid connection migration.
    pub disable_active_migration: bool,
}

impl TransportParams {
    /// Check RFC 9000 bounds.
    pub fn validate(&self) -> QuicResult<()> {
        if let Some(exp) = self
            .ack_delay_exponent
            .filter(|&exp| exp > MAX_ACK_DELAY_EXPONENT)
        {
            return Err(QuicError::out_of_range(
                "options.transportParams.ackDelayExponent",
                exp,
                format!("0..={MAX_ACK_DELAY_EXPONENT}"),
            ));
        }
        if let Some(delay) = self
            .max_ack_delay
            .filter(|&delay| delay >= MAX_ACK_DELAY_LIMIT_MS)
        {
            return Err(QuicError::out_of_range(
                "options.transportParams.maxAckDelay",
                delay,
                format!("0..{MAX_ACK_DELAY_LIMIT_MS}"),
            ));
        }
        if let Some(limit) = self
            .active_connection_id_limit
            .filter(|&limit| limit < MIN_ACTIVE_CONNECTION_ID_LIMIT)
        {
            return Err(QuicError::out_of_range(
                "options.transportParams.activeConnectionIDLimit",
                limit,
                format!("{MIN_ACTIVE_CONNECTION_ID_LIMIT}.."),
            ));
        }
        for (name, streams) in [
            (
                "options.transportParams.initialMaxStreamsBidi",
                self.initial_max_streams_bidi,
            ),
            (
                "options.transportParams.initialMaxStreamsUni",
                self.initial_max_streams_uni,
            ),
        ] {
            if let Some(streams) = streams.filter(|&streams| streams > MAX_STREAMS) {
                return Err(QuicError::out_of_range(
                    name,
                    streams,
                    format!("0..={MAX_STREAMS}"),
                ));
            }
        }
        Ok(())
    }
}

/// Options accepted by `listen()` and `connect()`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    /// Preferred QUIC version.
    #[serde(deserialize_with = "de::present")]
    pub version: Option<u32>,
    /// Lowest acceptable QUIC version.
    #[serde(deserialize_with = "de::present")]
    pub min_version: Option<u32>,
    /// Preferred address handling.
    pub preferred_address_policy: PreferredAddressPolicy,
    /// Application layer limits.
    pub application: ApplicationOptions,
    /// Transport parameters.
    pub transport_params: TransportParams,
    /// TLS options.
    pub tls: TlsOptions,
    /// Emit qlog.
    pub qlog: bool,
    /// Ticket from an earlier session, for resumption (client only).
    #[serde(deserialize_with = "de::present")]
    pub session_ticket: Option<Vec<u8>>,
}

impl SessionOptions {
    /// Parse JSON options. Validation happens at `listen()`/`connect()`.
    pub fn from_json(json: &str) -> QuicResult<Self> {
        let options: Self = serde_json::from_str(json)?;
        Ok(options)
    }

    /// Parse an already decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> QuicResult<Self> {
        let options: Self = serde_json::from_value(value)?;
        Ok(options)
    }

    /// Select the ALPN.
    pub fn with_alpn(mut self, alpn: impl Into<String>) -> Self {
        self.tls.alpn = Some(alpn.into());
        self
    }

    /// Select the SNI.
    pub fn with_sni(mut self, sni: impl Into<String>) -> Self {
        self.tls.sni = Some(sni.into());
        self
    }

    /// Resume from a ticket.
    pub fn with_session_ticket(mut self, ticket: impl Into<Vec<u8>>) -> Self {
        self.session_ticket = Some(ticket.into());
        self
    }

    /// Validate and translate into the engine's form.
    pub fn to_config(&self) -> QuicResult<SessionConfig> {
        let version = self.version.unwrap_or(QUIC_VERSION_1);
        let min_version = self.min_version.unwrap_or(QUIC_VERSION_1);
        if min_version > version {
            return Err(QuicError::out_of_range(
                "options.minVersion",
                min_version,
                format!("..={version}"),
            ));
        }
        self.transport_params.validate()?;
        self.tls.validate()?;

        Ok(SessionConfig {
            version,
            min_version,
            preferred_address_policy: self.preferred_address_policy.code(),
            application: self.application.clone(),
            transport_params: self.transport_params.clone(),
            tls: self.tls.clone(),
            qlog: self.qlog,
        })
    }
}

/// Validated session configuration as the engine receives it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Preferred QUIC version.
    pub version: u32,
    /// Lowest acceptable QUIC version.
    pub min_version: u32,
    /// Native preferred address policy code.
    pub preferred_address_policy: u32,
    /// Application layer limits.
    pub application: ApplicationOptions,
    /// Transport parameters.
    pub transport_params: TransportParams,
    /// TLS options.
    pub tls: TlsOptions,
    /// Emit qlog.
    pub qlog: bool,
}

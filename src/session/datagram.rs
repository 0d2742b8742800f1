//! Datagram payloads.

use bytes::Bytes;

/// Payload accepted by [`Session::send_datagram`](super::Session::send_datagram).
///
/// Text is sent as its UTF-8 bytes, so `"hi"` and `b"hi"` put the same
/// bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramPayload {
    /// Raw bytes.
    Binary(Bytes),
    /// Text.
    Text(String),
}

impl DatagramPayload {
    /// Wire bytes.
    pub fn into_bytes(self) -> Bytes {
        match self {
            DatagramPayload::Binary(bytes) => bytes,
            DatagramPayload::Text(text) => Bytes::from(text.into_bytes()),
        }
    }
}

impl From<Bytes> for DatagramPayload {
    fn from(bytes: Bytes) -> Self {
        DatagramPayload::Binary(bytes)
    }
}

impl From<Vec<u8>> for DatagramPayload {
    fn from(bytes: Vec<u8>) -> Self {
        DatagramPayload::Binary(Bytes::from(bytes))
    }
}

impl From<&[u8]> for DatagramPayload {
    fn from(bytes: &[u8]) -> Self {
        DatagramPayload::Binary(Bytes::copy_from_slice(bytes))
    }
}

impl<const N: usize> From<&[u8; N]> for DatagramPayload {
    fn from(bytes: &[u8; N]) -> Self {
        DatagramPayload::Binary(Bytes::copy_from_slice(bytes))
    }
}

impl From<String> for DatagramPayload {
    fn from(text: String) -> Self {
        DatagramPayload::Text(text)
    }
}

impl From<&str> for DatagramPayload {
    fn from(text: &str) -> Self {
        DatagramPayload::Text(text.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_bytes_agree() {
        let text = DatagramPayload::from("héllo").into_bytes();
        let bytes = DatagramPayload::from("héllo".as_bytes()).into_bytes();
        assert_eq!(text, bytes);
        assert_eq!(hex::encode(&text), "68c3a96c6c6f");
        assert_eq!(DatagramPayload::from(b"ab").into_bytes(), Bytes::from_static(b"ab"));
    }
}

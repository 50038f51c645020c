//! Envelope wire codec.
//!
//! Payloads are UTF-8 JSON objects. Decoding never fails: anything that is
//! not a well-formed envelope comes back as [`MessageEnvelope::Raw`] carrying
//! the payload text, so a misbehaving producer cannot wedge a consumer.

use super::envelope::MessageEnvelope;

/// Serialize an envelope to its wire form.
pub fn encode(envelope: &MessageEnvelope) -> Vec<u8> {
    // Serializing a struct of strings and a float into a Vec cannot fail.
    serde_json::to_vec(envelope).unwrap_or_default()
}

/// Parse a wire payload, falling back to a raw envelope.
///
/// The raw content is the payload as text. Byte sequences that are not valid
/// UTF-8 are replaced with U+FFFD, so a non-UTF-8 payload cannot be recovered
/// byte for byte from its fallback.
pub fn decode(payload: &[u8]) -> MessageEnvelope {
    match serde_json::from_slice::<MessageEnvelope>(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            let content = String::from_utf8_lossy(payload).into_owned();
            tracing::warn!("Error decoding message ({}): {}", e, content);
            MessageEnvelope::raw(content)
        }
    }
}

//! SDP offer generation.
//!
//! The generated offer is a fixed receive-only Opus template. Recorders read
//! it from disk, so the text must stay byte-for-byte stable.

/// RTP payload type announced for Opus.
pub const OPUS_PAYLOAD_TYPE: u8 = 98;

/// Where offers come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferSource {
    /// Generate from the template with the leased port and this address.
    Template { address: String },
    /// Use an operator-supplied offer verbatim.
    Prebuilt(String),
}

impl OfferSource {
    /// Choose the prebuilt offer when one is configured.
    #[must_use]
    pub fn new(address: String, prebuilt: Option<String>) -> Self {
        match prebuilt {
            Some(offer) => OfferSource::Prebuilt(offer),
            None => OfferSource::Template { address },
        }
    }

    /// Offer for a session receiving on `port`.
    #[must_use]
    pub fn offer_for(&self, port: u16) -> String {
        match self {
            OfferSource::Template { address } => template_offer(port, address),
            OfferSource::Prebuilt(offer) => offer.clone(),
        }
    }
}

/// Build the receive-only Opus offer for `address:port`.
#[must_use]
pub fn template_offer(port: u16, address: &str) -> String {
    [
        "v=0".to_string(),
        "t=0 0".to_string(),
        format!("m=audio {port} RTP/AVP {OPUS_PAYLOAD_TYPE}"),
        format!("c=IN IP4 {address}"),
        "a=recvonly".to_string(),
        format!("a=rtpmap:{OPUS_PAYLOAD_TYPE} opus/48000/2"),
        format!("a=fmtp:{OPUS_PAYLOAD_TYPE} stereo=0; sprop-stereo=0; useinbandfec=1"),
    ]
    .join("\n")
}

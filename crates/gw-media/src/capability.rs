//! The format table and capability negotiation (§4.7).

/// One entry in the format union the bridge must be able to form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    /// Wire name, e.g. `"wideband vbr audio"`.
    pub name: &'static str,
    /// Payload type. Several formats share a dynamic payload type (96 or
    /// 98) and are disambiguated by clock rate and negotiation order.
    pub payload_type: u8,
    /// RTP clock rate in Hz.
    pub clock_rate: u32,
    /// Kind of medium this format belongs to.
    pub medium: Medium,
}

/// Which medium a [`Format`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    /// Audio format.
    Audio,
    /// Video format.
    Video,
}

/// The full union of formats this bridge can form, in the order the
/// spec's table lists them.
pub const FORMATS: &[Format] = &[
    Format { name: "wideband vbr audio", payload_type: 96, clock_rate: 16000, medium: Medium::Audio },
    Format { name: "narrowband vbr audio", payload_type: 96, clock_rate: 8000, medium: Medium::Audio },
    Format { name: "companded mu-law audio", payload_type: 0, clock_rate: 8000, medium: Medium::Audio },
    Format { name: "companded a-law audio", payload_type: 8, clock_rate: 8000, medium: Medium::Audio },
    Format { name: "touch-tone events", payload_type: 101, clock_rate: 8000, medium: Medium::Audio },
    Format { name: "proprietary video", payload_type: 97, clock_rate: 90000, medium: Medium::Video },
    Format { name: "h264 video", payload_type: 99, clock_rate: 90000, medium: Medium::Video },
];

/// Label the streaming client sees after audio negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioLabel {
    /// Wideband or narrowband VBR, reported as "speex".
    Speex,
    /// Companded mu-law.
    Pcmu,
    /// Companded a-law.
    Pcma,
    /// No audio negotiated.
    None,
}

impl AudioLabel {
    /// The streaming-protocol-facing string for this label, or `None` for
    /// "the bridge will not forward this medium".
    #[must_use]
    pub fn as_wire_str(self) -> Option<&'static str> {
        match self {
            Self::Speex => Some("speex"),
            Self::Pcmu => Some("pcmu"),
            Self::Pcma => Some("pcma"),
            Self::None => None,
        }
    }
}

/// Label the streaming client sees after video negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoLabel {
    /// H.264, adapted between bitstream and access-unit framing.
    H264,
    /// Proprietary chunked video — the streaming client may pick its own
    /// codec.
    Default,
    /// No video negotiated.
    None,
}

impl VideoLabel {
    /// The streaming-protocol-facing string for this label, or `None`.
    #[must_use]
    pub fn as_wire_str(self) -> Option<&'static str> {
        match self {
            Self::H264 => Some("h264"),
            Self::Default => Some("default"),
            Self::None => None,
        }
    }
}

/// A negotiated call's formats, as reported to the streaming client via
/// the `accepted(audio?, video?)` indication (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Chosen audio format, if any.
    pub audio: Option<Format>,
    /// Chosen video format, if any.
    pub video: Option<Format>,
}

impl Negotiated {
    /// The label reported to the streaming client for the audio leg.
    #[must_use]
    pub fn audio_label(&self) -> AudioLabel {
        match self.audio.map(|f| f.name) {
            Some("wideband vbr audio" | "narrowband vbr audio") => AudioLabel::Speex,
            Some("companded mu-law audio") => AudioLabel::Pcmu,
            Some("companded a-law audio") => AudioLabel::Pcma,
            _ => AudioLabel::None,
        }
    }

    /// The label reported to the streaming client for the video leg.
    #[must_use]
    pub fn video_label(&self) -> VideoLabel {
        match self.video.map(|f| f.name) {
            Some("h264 video") => VideoLabel::H264,
            Some("proprietary video") => VideoLabel::Default,
            _ => VideoLabel::None,
        }
    }
}

/// Build the ordered list of formats to offer for a call, from the
/// streaming client's requested codec labels (`invite`/`accept`'s
/// `codec1, codec2, …` list). An empty list falls back to the legacy
/// default: wideband audio plus proprietary video.
#[must_use]
pub fn offer_for(requested: &[&str]) -> Vec<Format> {
    if requested.is_empty() {
        return vec![find("wideband vbr audio"), find("proprietary video")];
    }
    requested.iter().filter_map(|label| offer_label_to_format(label)).collect()
}

fn offer_label_to_format(label: &str) -> Option<Format> {
    match label {
        "wideband" => Some(find("wideband vbr audio")),
        "narrowband" => Some(find("narrowband vbr audio")),
        "pcmu" => Some(find("companded mu-law audio")),
        "pcma" => Some(find("companded a-law audio")),
        "dtmf" => Some(find("touch-tone events")),
        "h264" => Some(find("h264 video")),
        "default" => Some(find("proprietary video")),
        _ => None,
    }
}

fn find(name: &str) -> Format {
    *FORMATS.iter().find(|f| f.name == name).expect("format table entry must exist")
}

/// Intersect a local offer with a peer's offered formats, picking the
/// first local preference that the peer also advertised, for each
/// medium independently. Returns `None` for a medium with no overlap;
/// an overall `Negotiated` with both `None` means "488 Incompatible
/// SDP" at the call site.
#[must_use]
pub fn negotiate(local_offer: &[Format], peer_offer: &[Format]) -> Negotiated {
    let audio = local_offer
        .iter()
        .filter(|f| f.medium == Medium::Audio)
        .find(|f| peer_offer.iter().any(|p| p.medium == Medium::Audio && p.name == f.name))
        .copied();
    let video = local_offer
        .iter()
        .filter(|f| f.medium == Medium::Video)
        .find(|f| peer_offer.iter().any(|p| p.medium == Medium::Video && p.name == f.name))
        .copied();
    Negotiated { audio, video }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_falls_back_to_legacy_default() {
        let offer = offer_for(&[]);
        assert_eq!(offer, vec![find("wideband vbr audio"), find("proprietary video")]);
    }

    #[test]
    fn negotiation_picks_first_local_preference_present_in_peer_offer() {
        let local = offer_for(&["narrowband", "pcmu", "pcma"]);
        let peer = vec![find("companded mu-law audio"), find("companded a-law audio")];
        let negotiated = negotiate(&local, &peer);
        assert_eq!(negotiated.audio_label(), AudioLabel::Pcmu);
    }

    #[test]
    fn no_overlap_yields_none_on_both_legs() {
        let local = vec![find("h264 video")];
        let peer = vec![find("proprietary video")];
        let negotiated = negotiate(&local, &peer);
        assert_eq!(negotiated.video, None);
        assert_eq!(negotiated.video_label(), VideoLabel::None);
    }

    #[test]
    fn scenario_e4_capability_negotiation_audio_only() {
        let local = offer_for(&["wideband", "narrowband", "pcmu", "pcma", "dtmf"]);
        let peer = vec![find("companded mu-law audio")];
        let negotiated = negotiate(&local, &peer);
        assert_eq!(negotiated.audio_label(), AudioLabel::Pcmu);
        assert_eq!(negotiated.video, None);
    }
}

//! Session description rewriting for codec preference
//!
//! Rewrites a generated offer/answer so the target audio codec leads
//! the audio media line and comfort-noise payload types are stripped,
//! forcing continuous codec use during silence.

/// Default preferred audio codec
pub const DEFAULT_CODEC: &str = "opus";

/// Default codec clock rate in Hz
pub const DEFAULT_CLOCK_RATE: u32 = 48000;

/// Prefer opus/48000 on the audio media line
pub fn prefer_opus(sdp: &str) -> String {
    prefer_codec(sdp, DEFAULT_CODEC, DEFAULT_CLOCK_RATE)
}

/// Rewrite a session description to prefer the given audio codec
///
/// Moves the codec's payload type to the head of the `m=audio` line's
/// payload list and removes every comfort-noise (`CN/<rate>`) rtpmap
/// attribute together with its media-line reference. Descriptions
/// without an audio media line, or without the target codec, pass
/// through unchanged apart from comfort-noise removal. Non-audio media
/// sections are never reordered.
pub fn prefer_codec(sdp: &str, codec: &str, clock_rate: u32) -> String {
    let mut lines: Vec<String> = sdp.split("\r\n").map(str::to_string).collect();

    let audio_index = match lines.iter().position(|l| l.starts_with("m=audio")) {
        Some(index) => index,
        None => return sdp.to_string(),
    };

    let target = format!("{}/{}", codec.to_ascii_lowercase(), clock_rate);
    let mut codec_pt: Option<String> = None;
    let mut cn_pts: Vec<String> = Vec::new();
    let mut cn_lines: Vec<usize> = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let Some((pt, mapping)) = parse_rtpmap(line) else {
            continue;
        };
        let mapping = mapping.to_ascii_lowercase();
        if mapping.starts_with(&target) && codec_pt.is_none() {
            codec_pt = Some(pt.to_string());
        }
        if mapping.starts_with("cn/") {
            cn_pts.push(pt.to_string());
            cn_lines.push(index);
        }
    }

    if let Some(pt) = &codec_pt {
        let fields: Vec<&str> = lines[audio_index].split(' ').collect();
        let mut rebuilt: Vec<&str> = Vec::with_capacity(fields.len() + 1);
        for (position, field) in fields.iter().enumerate() {
            // The first three fields are media, port and proto; payload
            // types start at position 3, where the target codec leads.
            if position == 3 {
                rebuilt.push(pt);
            }
            if *field != pt.as_str() && !cn_pts.iter().any(|cn| cn == field) {
                rebuilt.push(field);
            }
        }
        lines[audio_index] = rebuilt.join(" ");
    } else if !cn_pts.is_empty() {
        let fields: Vec<&str> = lines[audio_index].split(' ').collect();
        let rebuilt: Vec<&str> = fields
            .iter()
            .enumerate()
            .filter(|(position, field)| *position < 3 || !cn_pts.iter().any(|cn| cn == *field))
            .map(|(_, field)| *field)
            .collect();
        lines[audio_index] = rebuilt.join(" ");
    }

    for index in cn_lines.into_iter().rev() {
        lines.remove(index);
    }

    lines.join("\r\n")
}

/// Split an `a=rtpmap:<pt> <encoding>/<rate>[/<channels>]` attribute
fn parse_rtpmap(line: &str) -> Option<(&str, &str)> {
    line.strip_prefix("a=rtpmap:")?.split_once(' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 20518 0 IN IP4 0.0.0.0\r\n\
        s=-\r\n\
        m=audio 54609 UDP/TLS/RTP/SAVPF 0 8 111 13 110\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        a=rtpmap:8 PCMA/8000\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=rtpmap:13 CN/8000\r\n\
        a=rtpmap:110 CN/16000\r\n\
        m=video 54611 UDP/TLS/RTP/SAVPF 96\r\n\
        a=rtpmap:96 VP8/90000";

    #[test]
    fn test_opus_moves_to_front() {
        let rewritten = prefer_opus(OFFER);
        let audio_line = rewritten
            .split("\r\n")
            .find(|l| l.starts_with("m=audio"))
            .unwrap();
        assert_eq!(audio_line, "m=audio 54609 UDP/TLS/RTP/SAVPF 111 0 8");
    }

    #[test]
    fn test_comfort_noise_lines_removed() {
        let rewritten = prefer_opus(OFFER);
        assert!(!rewritten.contains("CN/8000"));
        assert!(!rewritten.contains("CN/16000"));
        assert!(!rewritten.contains(" 13"));
        assert!(!rewritten.contains(" 110"));
    }

    #[test]
    fn test_idempotent() {
        let once = prefer_opus(OFFER);
        let twice = prefer_opus(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_no_audio_line_returns_input() {
        let video_only = "v=0\r\nm=video 54611 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000";
        assert_eq!(prefer_opus(video_only), video_only);
    }

    #[test]
    fn test_missing_codec_still_strips_comfort_noise() {
        let no_opus = "v=0\r\n\
            m=audio 54609 UDP/TLS/RTP/SAVPF 0 13\r\n\
            a=rtpmap:0 PCMU/8000\r\n\
            a=rtpmap:13 CN/8000";
        let rewritten = prefer_opus(no_opus);
        assert!(!rewritten.contains("CN/8000"));
        assert!(rewritten.contains("m=audio 54609 UDP/TLS/RTP/SAVPF 0"));
    }

    #[test]
    fn test_non_audio_sections_untouched() {
        let rewritten = prefer_opus(OFFER);
        assert!(rewritten.contains("m=video 54611 UDP/TLS/RTP/SAVPF 96"));
        assert!(rewritten.contains("a=rtpmap:96 VP8/90000"));
    }

    #[test]
    fn test_relative_order_preserved() {
        let offer = "v=0\r\n\
            m=audio 9 UDP/TLS/RTP/SAVPF 8 0 111 9\r\n\
            a=rtpmap:8 PCMA/8000\r\n\
            a=rtpmap:0 PCMU/8000\r\n\
            a=rtpmap:111 opus/48000/2\r\n\
            a=rtpmap:9 G722/8000";
        let rewritten = prefer_opus(offer);
        let audio_line = rewritten
            .split("\r\n")
            .find(|l| l.starts_with("m=audio"))
            .unwrap();
        assert_eq!(audio_line, "m=audio 9 UDP/TLS/RTP/SAVPF 111 8 0 9");
    }

    #[test]
    fn test_case_insensitive_codec_match() {
        let offer = "v=0\r\n\
            m=audio 9 UDP/TLS/RTP/SAVPF 0 111\r\n\
            a=rtpmap:0 PCMU/8000\r\n\
            a=rtpmap:111 OPUS/48000/2";
        let rewritten = prefer_opus(offer);
        assert!(rewritten.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111 0"));
    }
}

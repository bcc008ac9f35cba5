//! SDP answer patching
//!
//! Chromium negotiates Opus as mono unless the answer asks for stereo
//! explicitly (https://bugs.chromium.org/p/chromium/issues/detail?id=818180),
//! so the `a=fmtp:111` line of every answer sent to the server gets the stereo
//! parameters.

/// Opus payload type the server offers
const OPUS_FMTP_PREFIX: &str = "a=fmtp:111 ";

/// Parameters appended to the Opus fmtp line
const STEREO_PARAMS: &str = ";stereo=1;sprop-stereo=1";

/// Append stereo parameters to the Opus `fmtp` line
///
/// Only `a=fmtp:111` lines are touched, and only when they do not carry the
/// parameters already. Running it again on its own output returns the same string.
pub fn force_opus_stereo(sdp: &str) -> String {
    let mut out = String::with_capacity(sdp.len() + STEREO_PARAMS.len());

    for line in sdp.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        out.push_str(body);
        if body.starts_with(OPUS_FMTP_PREFIX) && !body.contains(STEREO_PARAMS) {
            out.push_str(STEREO_PARAMS);
        }
        out.push_str(ending);
    }

    out
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

//! Playlist Renderer — spec §4.7.

use crate::types::{
    ByteRange, EncryptionMethod, MasterPlaylist, MediaPlaylist, PlaylistType, PreloadHintType,
    RenditionType,
};

/// Format a duration/hold-back value with up to 5 fractional digits,
/// trailing zeros trimmed but never below `.0`.
pub fn format_decimal(v: f64) -> String {
    let s = format!("{v:.5}");
    let trimmed = s.trim_end_matches('0');
    let trimmed = trimmed.trim_end_matches('.');
    if let Some(dot) = trimmed.find('.') {
        let _ = dot;
        trimmed.to_string()
    } else {
        format!("{trimmed}.0")
    }
}

fn escape_quoted(s: &str) -> String {
    s.replace('"', "")
}

fn render_byte_range(br: &ByteRange) -> String {
    match br.offset {
        Some(off) => format!("{}@{}", br.length, off),
        None => format!("{}", br.length),
    }
}

pub fn render_media_playlist(pl: &MediaPlaylist) -> String {
    let mut lines = Vec::new();
    lines.push("#EXTM3U".to_string());
    lines.push(format!("#EXT-X-VERSION:{}", pl.version));
    lines.push(format!("#EXT-X-TARGETDURATION:{}", pl.target_duration));
    lines.push(format!("#EXT-X-MEDIA-SEQUENCE:{}", pl.media_sequence));
    if pl.discontinuity_sequence > 0 {
        lines.push(format!(
            "#EXT-X-DISCONTINUITY-SEQUENCE:{}",
            pl.discontinuity_sequence
        ));
    }
    if let Some(part_target) = pl.part_target_duration {
        lines.push(format!("#EXT-X-PART-INF:PART-TARGET={}", format_decimal(part_target)));
    }
    if let Some(sc) = &pl.server_control {
        let mut attrs = Vec::new();
        if sc.can_block_reload {
            attrs.push("CAN-BLOCK-RELOAD=YES".to_string());
        }
        if let Some(hb) = sc.hold_back {
            attrs.push(format!("HOLD-BACK={}", format_decimal(hb)));
        }
        if let Some(phb) = sc.part_hold_back {
            attrs.push(format!("PART-HOLD-BACK={}", format_decimal(phb)));
        }
        if let Some(csu) = sc.can_skip_until {
            attrs.push(format!("CAN-SKIP-UNTIL={}", format_decimal(csu)));
        }
        if sc.can_skip_date_ranges {
            attrs.push("CAN-SKIP-DATERANGES=YES".to_string());
        }
        lines.push(format!("#EXT-X-SERVER-CONTROL:{}", attrs.join(",")));
    }
    if pl.independent_segments {
        lines.push("#EXT-X-INDEPENDENT-SEGMENTS".to_string());
    }
    if let Some(skip) = &pl.skip {
        let mut attrs = vec![format!("SKIPPED-SEGMENTS={}", skip.skipped_segments)];
        if skip.recently_removed_dateranges {
            attrs.push("RECENTLY-REMOVED-DATERANGES=\"\"".to_string());
        }
        lines.push(format!("#EXT-X-SKIP:{}", attrs.join(",")));
    }

    for seg in &pl.segments {
        if seg.discontinuity {
            lines.push("#EXT-X-DISCONTINUITY".to_string());
        }
        if let Some(map) = &seg.map {
            let mut attrs = vec![format!("URI=\"{}\"", escape_quoted(&map.uri))];
            if let Some(br) = &map.byte_range {
                attrs.push(format!("BYTERANGE=\"{}\"", render_byte_range(br)));
            }
            lines.push(format!("#EXT-X-MAP:{}", attrs.join(",")));
        }
        if let Some(key) = &seg.key {
            lines.push(render_key_tag(key));
        }
        if let Some(pdt) = seg.program_date_time {
            lines.push(format!(
                "#EXT-X-PROGRAM-DATE-TIME:{}",
                pdt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            ));
        }
        if let Some(br) = &seg.byte_range {
            lines.push(format!("#EXT-X-BYTERANGE:{}", render_byte_range(br)));
        }
        if let Some(bitrate) = seg.bitrate {
            lines.push(format!("#EXT-X-BITRATE:{bitrate}"));
        }
        if seg.is_gap {
            lines.push("#EXT-X-GAP".to_string());
        }
        for part in &seg.partials {
            lines.push(render_part_tag(part));
        }
        let title = seg.title.clone().unwrap_or_default();
        lines.push(format!("#EXTINF:{},{}", format_decimal(seg.duration), title));
        lines.push(seg.uri.clone());
    }

    for part in &pl.partial_segments {
        lines.push(render_part_tag(part));
    }
    for hint in &pl.preload_hints {
        let type_str = match hint.hint_type {
            PreloadHintType::Part => "PART",
            PreloadHintType::Map => "MAP",
        };
        let mut attrs = vec![
            format!("TYPE={type_str}"),
            format!("URI=\"{}\"", escape_quoted(&hint.uri)),
        ];
        if let Some(start) = hint.byte_range_start {
            attrs.push(format!("BYTERANGE-START={start}"));
        }
        if let Some(len) = hint.byte_range_length {
            attrs.push(format!("BYTERANGE-LENGTH={len}"));
        }
        lines.push(format!("#EXT-X-PRELOAD-HINT:{}", attrs.join(",")));
    }
    for report in &pl.rendition_reports {
        let mut attrs = vec![
            format!("URI=\"{}\"", escape_quoted(&report.uri)),
            format!("LAST-MSN={}", report.last_msn),
        ];
        if let Some(part) = report.last_part {
            attrs.push(format!("LAST-PART={part}"));
        }
        lines.push(format!("#EXT-X-RENDITION-REPORT:{}", attrs.join(",")));
    }

    if pl.has_endlist {
        lines.push("#EXT-X-ENDLIST".to_string());
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn render_part_tag(part: &crate::types::PartialSegment) -> String {
    let mut attrs = vec![
        format!("DURATION={}", format_decimal(part.duration)),
        format!("URI=\"{}\"", escape_quoted(&part.uri)),
    ];
    if part.independent {
        attrs.push("INDEPENDENT=YES".to_string());
    }
    if let Some(br) = &part.byte_range {
        attrs.push(format!("BYTERANGE=\"{}\"", render_byte_range(br)));
    }
    if part.is_gap {
        attrs.push("GAP=YES".to_string());
    }
    format!("#EXT-X-PART:{}", attrs.join(","))
}

fn render_key_tag(key: &crate::types::EncryptionKey) -> String {
    let mut attrs = vec![format!("METHOD={}", key.method.as_tag_str())];
    if let Some(uri) = &key.uri {
        attrs.push(format!("URI=\"{}\"", escape_quoted(uri)));
    }
    if let Some(iv) = &key.iv {
        attrs.push(format!("IV=0x{}", hex::encode(iv)));
    }
    if let Some(fmt) = &key.key_format {
        attrs.push(format!("KEYFORMAT=\"{}\"", escape_quoted(fmt)));
    }
    if let Some(versions) = &key.key_format_versions {
        attrs.push(format!("KEYFORMATVERSIONS=\"{}\"", escape_quoted(versions)));
    }
    format!("#EXT-X-KEY:{}", attrs.join(","))
}

pub fn render_master_playlist(pl: &MasterPlaylist) -> String {
    let mut lines = Vec::new();
    lines.push("#EXTM3U".to_string());
    lines.push(format!("#EXT-X-VERSION:{}", pl.version));
    if pl.independent_segments {
        lines.push("#EXT-X-INDEPENDENT-SEGMENTS".to_string());
    }
    for (name, value) in &pl.definitions {
        lines.push(format!(
            "#EXT-X-DEFINE:NAME=\"{}\",VALUE=\"{}\"",
            escape_quoted(name),
            escape_quoted(value)
        ));
    }
    if let Some(offset) = pl.start_offset {
        lines.push(format!("#EXT-X-START:TIME-OFFSET={}", format_decimal(offset)));
    }
    for key in &pl.session_keys {
        lines.push(render_key_tag(&key.key).replacen("#EXT-X-KEY", "#EXT-X-SESSION-KEY", 1));
    }
    for data in &pl.session_data {
        let mut attrs = vec![format!("DATA-ID=\"{}\"", escape_quoted(&data.data_id))];
        if let Some(v) = &data.value {
            attrs.push(format!("VALUE=\"{}\"", escape_quoted(v)));
        }
        if let Some(uri) = &data.uri {
            attrs.push(format!("URI=\"{}\"", escape_quoted(uri)));
        }
        if let Some(lang) = &data.language {
            attrs.push(format!("LANGUAGE=\"{}\"", escape_quoted(lang)));
        }
        lines.push(format!("#EXT-X-SESSION-DATA:{}", attrs.join(",")));
    }
    for rendition in &pl.renditions {
        let mut attrs = vec![
            format!("TYPE={}", rendition.media_type.as_tag_str()),
            format!("GROUP-ID=\"{}\"", escape_quoted(&rendition.group_id)),
            format!("NAME=\"{}\"", escape_quoted(&rendition.name)),
        ];
        if let Some(lang) = &rendition.language {
            attrs.push(format!("LANGUAGE=\"{}\"", escape_quoted(lang)));
        }
        attrs.push(format!("DEFAULT={}", if rendition.default { "YES" } else { "NO" }));
        attrs.push(format!(
            "AUTOSELECT={}",
            if rendition.autoselect { "YES" } else { "NO" }
        ));
        if rendition.media_type == RenditionType::Subtitles || rendition.media_type == RenditionType::ClosedCaptions {
            attrs.push(format!("FORCED={}", if rendition.forced { "YES" } else { "NO" }));
        }
        if let Some(channels) = &rendition.channels {
            attrs.push(format!("CHANNELS=\"{}\"", escape_quoted(channels)));
        }
        if let Some(uri) = &rendition.uri {
            attrs.push(format!("URI=\"{}\"", escape_quoted(uri)));
        }
        lines.push(format!("#EXT-X-MEDIA:{}", attrs.join(",")));
    }
    for iframe in &pl.i_frame_variants {
        let mut attrs = vec![format!("BANDWIDTH={}", iframe.bandwidth)];
        if let Some(codecs) = &iframe.codecs {
            attrs.push(format!("CODECS=\"{}\"", escape_quoted(codecs)));
        }
        if let Some(res) = iframe.resolution {
            attrs.push(format!("RESOLUTION={}x{}", res.width, res.height));
        }
        if let Some(group) = &iframe.video_group {
            attrs.push(format!("VIDEO=\"{}\"", escape_quoted(group)));
        }
        attrs.push(format!("URI=\"{}\"", escape_quoted(&iframe.uri)));
        lines.push(format!("#EXT-X-I-FRAME-STREAM-INF:{}", attrs.join(",")));
    }
    for variant in &pl.variants {
        let mut attrs = vec![format!("BANDWIDTH={}", variant.bandwidth)];
        if let Some(avg) = variant.average_bandwidth {
            attrs.push(format!("AVERAGE-BANDWIDTH={avg}"));
        }
        if let Some(codecs) = &variant.codecs {
            attrs.push(format!("CODECS=\"{}\"", escape_quoted(codecs)));
        }
        if let Some(res) = variant.resolution {
            attrs.push(format!("RESOLUTION={}x{}", res.width, res.height));
        }
        if let Some(fr) = variant.frame_rate {
            attrs.push(format!("FRAME-RATE={fr}"));
        }
        if let Some(group) = &variant.audio_group {
            attrs.push(format!("AUDIO=\"{}\"", escape_quoted(group)));
        }
        if let Some(group) = &variant.video_group {
            attrs.push(format!("VIDEO=\"{}\"", escape_quoted(group)));
        }
        if let Some(group) = &variant.subtitles_group {
            attrs.push(format!("SUBTITLES=\"{}\"", escape_quoted(group)));
        }
        if let Some(group) = &variant.closed_captions_group {
            attrs.push(format!("CLOSED-CAPTIONS=\"{}\"", escape_quoted(group)));
        }
        lines.push(format!("#EXT-X-STREAM-INF:{}", attrs.join(",")));
        lines.push(variant.uri.clone());
    }
    if let Some(steering) = &pl.content_steering {
        let mut attrs = vec![format!("SERVER-URI=\"{}\"", escape_quoted(&steering.server_uri))];
        if let Some(pathway) = &steering.pathway_id {
            attrs.push(format!("PATHWAY-ID=\"{}\"", escape_quoted(pathway)));
        }
        lines.push(format!("#EXT-X-CONTENT-STEERING:{}", attrs.join(",")));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn playlist_type_tag(ty: PlaylistType) -> &'static str {
    match ty {
        PlaylistType::Vod => "VOD",
        PlaylistType::Event => "EVENT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    #[test]
    fn formats_five_fractional_digits_trimmed() {
        assert_eq!(format_decimal(1.33336), "1.33336");
        assert_eq!(format_decimal(6.0), "6.0");
        assert_eq!(format_decimal(0.33334), "0.33334");
    }

    #[test]
    fn renders_part_then_extinf_then_preload_hint() {
        let pl = MediaPlaylist {
            version: 9,
            target_duration: 2,
            media_sequence: 0,
            partial_segments: vec![PartialSegment {
                uri: "seg1.0.mp4".into(),
                duration: 0.33334,
                independent: true,
                byte_range: None,
                is_gap: false,
            }],
            segments: vec![Segment {
                duration: 1.33336,
                uri: "seg0.mp4".into(),
                title: None,
                byte_range: None,
                key: None,
                map: None,
                program_date_time: None,
                discontinuity: false,
                is_gap: false,
                bitrate: None,
                partials: Vec::new(),
            }],
            preload_hints: vec![PreloadHint {
                hint_type: PreloadHintType::Part,
                uri: "seg1.0.mp4".into(),
                byte_range_start: None,
                byte_range_length: None,
            }],
            ..Default::default()
        };
        let out = render_media_playlist(&pl);
        assert!(out.contains("#EXTINF:1.33336,\nseg0.mp4"));
        assert!(out.contains("#EXT-X-PART:DURATION=0.33334,URI=\"seg1.0.mp4\",INDEPENDENT=YES"));
        assert!(out.contains("#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"seg1.0.mp4\""));
        let part_pos = out.find("#EXT-X-PART").unwrap();
        let preload_pos = out.find("#EXT-X-PRELOAD-HINT").unwrap();
        assert!(part_pos < preload_pos);
    }

    #[test]
    fn server_control_attribute_order() {
        let sc = ServerControlConfig {
            can_block_reload: true,
            hold_back: Some(6.0),
            part_hold_back: Some(1.0),
            can_skip_until: Some(12.0),
            can_skip_date_ranges: true,
        };
        let pl = MediaPlaylist {
            version: 9,
            target_duration: 2,
            server_control: Some(sc),
            ..Default::default()
        };
        let out = render_media_playlist(&pl);
        assert!(out.contains(
            "#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,HOLD-BACK=6.0,PART-HOLD-BACK=1.0,CAN-SKIP-UNTIL=12.0,CAN-SKIP-DATERANGES=YES"
        ));
    }
}

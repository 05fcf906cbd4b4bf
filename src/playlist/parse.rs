//! Playlist Parser — spec §4.8.
//!
//! Line-oriented and tolerant: blank lines and unrecognized `#` comments
//! are skipped. The first non-empty line must be `#EXTM3U`. Tags that
//! describe a segment accumulate until the next `#EXTINF`/URI pair.

use std::collections::HashMap;

use chrono::DateTime;

use crate::error::{PackagerError, Result};
use crate::types::*;

pub enum Playlist {
    Media(MediaPlaylist),
    Master(MasterPlaylist),
}

/// Split an HLS attribute list on commas outside double quotes.
fn split_attributes(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            ',' if !in_quotes => {
                out.push(std::mem::take(&mut cur));
            }
            _ => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn parse_attribute_list(s: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in split_attributes(s) {
        if let Some((k, v)) = pair.split_once('=') {
            let v = v.trim();
            let v = v.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(v);
            map.insert(k.trim().to_string(), v.to_string());
        }
    }
    map
}

fn parse_f64(map: &HashMap<String, String>, tag: &str, key: &str) -> Result<Option<f64>> {
    match map.get(key) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| PackagerError::InvalidAttributeValue {
                tag: tag.to_string(),
                attr: key.to_string(),
                value: v.clone(),
            }),
    }
}

fn parse_u64(map: &HashMap<String, String>, tag: &str, key: &str) -> Result<Option<u64>> {
    match map.get(key) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| PackagerError::InvalidAttributeValue {
                tag: tag.to_string(),
                attr: key.to_string(),
                value: v.clone(),
            }),
    }
}

fn required<'a>(map: &'a HashMap<String, String>, tag: &str, key: &str) -> Result<&'a str> {
    map.get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| PackagerError::MissingRequiredAttribute {
            tag: tag.to_string(),
            attr: key.to_string(),
        })
}

fn parse_byte_range(raw: &str) -> Option<ByteRange> {
    if let Some((len, off)) = raw.split_once('@') {
        Some(ByteRange {
            length: len.parse().ok()?,
            offset: Some(off.parse().ok()?),
        })
    } else {
        Some(ByteRange {
            length: raw.parse().ok()?,
            offset: None,
        })
    }
}

fn parse_key_tag(attrs: &HashMap<String, String>) -> Result<EncryptionKey> {
    let method_str = required(attrs, "EXT-X-KEY", "METHOD")?;
    let method = match method_str {
        "NONE" => return Ok(EncryptionKey::none()),
        "AES-128" => EncryptionMethod::Aes128,
        "SAMPLE-AES" => EncryptionMethod::SampleAes,
        "SAMPLE-AES-CTR" => EncryptionMethod::SampleAesCtr,
        other => {
            return Err(PackagerError::UnsupportedMethod(other.to_string()));
        }
    };
    let iv = match attrs.get("IV") {
        None => None,
        Some(raw) => {
            let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
            let bytes = hex::decode(trimmed)
                .map_err(|_| PackagerError::InvalidAttributeValue {
                    tag: "EXT-X-KEY".into(),
                    attr: "IV".into(),
                    value: raw.clone(),
                })?;
            Some(bytes.try_into().map_err(|_| PackagerError::InvalidAttributeValue {
                tag: "EXT-X-KEY".into(),
                attr: "IV".into(),
                value: raw.clone(),
            })?)
        }
    };
    Ok(EncryptionKey {
        method,
        uri: attrs.get("URI").cloned(),
        iv,
        key_format: attrs.get("KEYFORMAT").cloned(),
        key_format_versions: attrs.get("KEYFORMATVERSIONS").cloned(),
    })
}

pub fn parse_playlist(text: &str) -> Result<Playlist> {
    let lines: Vec<&str> = text.lines().collect();
    let mut non_blank = lines.iter().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let (first_idx, first_line) = non_blank.next().ok_or(PackagerError::EmptyManifest)?;
    if first_line.trim() != "#EXTM3U" {
        return Err(PackagerError::MissingHeader);
    }
    let _ = first_idx;

    let is_master = lines.iter().any(|l| l.starts_with("#EXT-X-STREAM-INF"));
    let is_media = lines
        .iter()
        .any(|l| l.starts_with("#EXT-X-TARGETDURATION") || l.starts_with("#EXTINF"));
    if !is_master && !is_media {
        return Err(PackagerError::AmbiguousPlaylistType);
    }

    if is_master {
        parse_master(&lines).map(Playlist::Master)
    } else {
        parse_media(&lines).map(Playlist::Media)
    }
}

fn parse_media(lines: &[&str]) -> Result<MediaPlaylist> {
    let mut pl = MediaPlaylist::default();

    // pending state accumulated until the next EXTINF
    let mut pending_discontinuity = false;
    let mut pending_gap = false;
    let mut pending_pdt = None;
    let mut pending_byte_range = None;
    let mut pending_key: Option<EncryptionKey> = None;
    let mut pending_bitrate: Option<u64> = None;
    let mut last_map: Option<MapTag> = None;
    let mut pending_parts: Vec<PartialSegment> = Vec::new();

    let mut i = 0usize;
    while i < lines.len() {
        let raw = lines[i];
        let line = raw.trim();
        i += 1;
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('#') {
            continue; // stray URI with no EXTINF is tolerated as a comment-less pass
        }
        if let Some(rest) = line.strip_prefix("#EXT-X-VERSION:") {
            pl.version = rest.parse().map_err(|_| PackagerError::InvalidVersion(rest.to_string()))?;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            pl.target_duration = rest
                .parse()
                .map_err(|_| PackagerError::InvalidTagFormat {
                    tag: "EXT-X-TARGETDURATION".into(),
                    line: i,
                })?;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            pl.media_sequence = rest
                .parse()
                .map_err(|_| PackagerError::InvalidTagFormat {
                    tag: "EXT-X-MEDIA-SEQUENCE".into(),
                    line: i,
                })?;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-DISCONTINUITY-SEQUENCE:") {
            pl.discontinuity_sequence =
                rest.parse().map_err(|_| PackagerError::InvalidTagFormat {
                    tag: "EXT-X-DISCONTINUITY-SEQUENCE".into(),
                    line: i,
                })?;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
            pl.playlist_type = Some(match rest {
                "VOD" => PlaylistType::Vod,
                "EVENT" => PlaylistType::Event,
                other => return Err(PackagerError::InvalidAttributeValue {
                    tag: "EXT-X-PLAYLIST-TYPE".into(),
                    attr: "value".into(),
                    value: other.to_string(),
                }),
            });
        } else if line == "#EXT-X-INDEPENDENT-SEGMENTS" {
            pl.independent_segments = true;
        } else if line == "#EXT-X-ENDLIST" {
            pl.has_endlist = true;
        } else if line == "#EXT-X-DISCONTINUITY" {
            pending_discontinuity = true;
        } else if line == "#EXT-X-GAP" {
            pending_gap = true;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-BITRATE:") {
            pending_bitrate = Some(rest.parse().map_err(|_| PackagerError::InvalidTagFormat {
                tag: "EXT-X-BITRATE".into(),
                line: i,
            })?);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-PROGRAM-DATE-TIME:") {
            pending_pdt = Some(
                DateTime::parse_from_rfc3339(rest)
                    .map_err(|_| PackagerError::InvalidAttributeValue {
                        tag: "EXT-X-PROGRAM-DATE-TIME".into(),
                        attr: "value".into(),
                        value: rest.to_string(),
                    })?
                    .with_timezone(&chrono::Utc),
            );
        } else if let Some(rest) = line.strip_prefix("#EXT-X-BYTERANGE:") {
            pending_byte_range = parse_byte_range(rest);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-PART-INF:") {
            let attrs = parse_attribute_list(rest);
            pl.part_target_duration = parse_f64(&attrs, "EXT-X-PART-INF", "PART-TARGET")?;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-SERVER-CONTROL:") {
            let attrs = parse_attribute_list(rest);
            pl.server_control = Some(ServerControlConfig {
                can_block_reload: attrs.get("CAN-BLOCK-RELOAD").map(|v| v == "YES").unwrap_or(false),
                hold_back: parse_f64(&attrs, "EXT-X-SERVER-CONTROL", "HOLD-BACK")?,
                part_hold_back: parse_f64(&attrs, "EXT-X-SERVER-CONTROL", "PART-HOLD-BACK")?,
                can_skip_until: parse_f64(&attrs, "EXT-X-SERVER-CONTROL", "CAN-SKIP-UNTIL")?,
                can_skip_date_ranges: attrs
                    .get("CAN-SKIP-DATERANGES")
                    .map(|v| v == "YES")
                    .unwrap_or(false),
            });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-SKIP:") {
            let attrs = parse_attribute_list(rest);
            pl.skip = Some(SkipTag {
                skipped_segments: parse_u64(&attrs, "EXT-X-SKIP", "SKIPPED-SEGMENTS")?.unwrap_or(0),
                recently_removed_dateranges: attrs.contains_key("RECENTLY-REMOVED-DATERANGES"),
            });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-KEY:") {
            let attrs = parse_attribute_list(rest);
            pending_key = Some(parse_key_tag(&attrs)?);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MAP:") {
            let attrs = parse_attribute_list(rest);
            let uri = required(&attrs, "EXT-X-MAP", "URI")?.to_string();
            let byte_range = attrs.get("BYTERANGE").and_then(|v| parse_byte_range(v));
            last_map = Some(MapTag { uri, byte_range });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-PART:") {
            let attrs = parse_attribute_list(rest);
            let duration = parse_f64(&attrs, "EXT-X-PART", "DURATION")?
                .ok_or_else(|| PackagerError::MissingRequiredAttribute {
                    tag: "EXT-X-PART".into(),
                    attr: "DURATION".into(),
                })?;
            let uri = required(&attrs, "EXT-X-PART", "URI")?.to_string();
            pending_parts.push(PartialSegment {
                uri,
                duration,
                independent: attrs.get("INDEPENDENT").map(|v| v == "YES").unwrap_or(false),
                byte_range: attrs.get("BYTERANGE").and_then(|v| parse_byte_range(v)),
                is_gap: attrs.get("GAP").map(|v| v == "YES").unwrap_or(false),
            });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-PRELOAD-HINT:") {
            let attrs = parse_attribute_list(rest);
            let hint_type = match required(&attrs, "EXT-X-PRELOAD-HINT", "TYPE")? {
                "PART" => PreloadHintType::Part,
                "MAP" => PreloadHintType::Map,
                other => {
                    return Err(PackagerError::InvalidAttributeValue {
                        tag: "EXT-X-PRELOAD-HINT".into(),
                        attr: "TYPE".into(),
                        value: other.to_string(),
                    })
                }
            };
            pl.preload_hints.push(PreloadHint {
                hint_type,
                uri: required(&attrs, "EXT-X-PRELOAD-HINT", "URI")?.to_string(),
                byte_range_start: parse_u64(&attrs, "EXT-X-PRELOAD-HINT", "BYTERANGE-START")?,
                byte_range_length: parse_u64(&attrs, "EXT-X-PRELOAD-HINT", "BYTERANGE-LENGTH")?,
            });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-RENDITION-REPORT:") {
            let attrs = parse_attribute_list(rest);
            pl.rendition_reports.push(RenditionReport {
                uri: required(&attrs, "EXT-X-RENDITION-REPORT", "URI")?.to_string(),
                last_msn: parse_u64(&attrs, "EXT-X-RENDITION-REPORT", "LAST-MSN")?.unwrap_or(0),
                last_part: parse_u64(&attrs, "EXT-X-RENDITION-REPORT", "LAST-PART")?.map(|v| v as u32),
            });
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let (dur_str, title) = rest.split_once(',').unwrap_or((rest, ""));
            let duration: f64 = dur_str
                .trim()
                .parse()
                .map_err(|_| PackagerError::InvalidDuration { line: i })?;
            let uri_line = loop {
                match lines.get(i) {
                    None => return Err(PackagerError::MissingURI { after: "EXTINF".into(), line: i }),
                    Some(l) if l.trim().is_empty() || l.trim_start().starts_with('#') => {
                        i += 1;
                        continue;
                    }
                    Some(l) => {
                        i += 1;
                        break l.trim().to_string();
                    }
                }
            };
            pl.segments.push(Segment {
                duration,
                uri: uri_line,
                title: if title.is_empty() { None } else { Some(title.to_string()) },
                byte_range: pending_byte_range.take(),
                key: pending_key.clone(),
                map: last_map.clone(),
                program_date_time: pending_pdt.take(),
                discontinuity: std::mem::take(&mut pending_discontinuity),
                is_gap: std::mem::take(&mut pending_gap),
                bitrate: pending_bitrate.take(),
                partials: std::mem::take(&mut pending_parts),
            });
        }
        // unrecognized tags are tolerated comments
    }
    // any PART lines not consumed by a following EXTINF belong to the
    // current in-progress segment's trailing tail.
    pl.partial_segments = pending_parts;
    Ok(pl)
}

fn parse_master(lines: &[&str]) -> Result<MasterPlaylist> {
    let mut pl = MasterPlaylist::default();
    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;
        if line.is_empty() || (!line.starts_with("#EXT")) {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXT-X-VERSION:") {
            pl.version = rest.parse().map_err(|_| PackagerError::InvalidVersion(rest.to_string()))?;
        } else if line == "#EXT-X-INDEPENDENT-SEGMENTS" {
            pl.independent_segments = true;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-START:") {
            let attrs = parse_attribute_list(rest);
            pl.start_offset = parse_f64(&attrs, "EXT-X-START", "TIME-OFFSET")?;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-DEFINE:") {
            let attrs = parse_attribute_list(rest);
            if let (Some(name), Some(value)) = (attrs.get("NAME"), attrs.get("VALUE")) {
                pl.definitions.push((name.clone(), value.clone()));
            }
        } else if let Some(rest) = line.strip_prefix("#EXT-X-SESSION-KEY:") {
            let attrs = parse_attribute_list(rest);
            pl.session_keys.push(SessionKey { key: parse_key_tag(&attrs)? });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-SESSION-DATA:") {
            let attrs = parse_attribute_list(rest);
            pl.session_data.push(SessionData {
                data_id: required(&attrs, "EXT-X-SESSION-DATA", "DATA-ID")?.to_string(),
                value: attrs.get("VALUE").cloned(),
                uri: attrs.get("URI").cloned(),
                language: attrs.get("LANGUAGE").cloned(),
            });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA:") {
            let attrs = parse_attribute_list(rest);
            let media_type = match required(&attrs, "EXT-X-MEDIA", "TYPE")? {
                "AUDIO" => RenditionType::Audio,
                "VIDEO" => RenditionType::Video,
                "SUBTITLES" => RenditionType::Subtitles,
                "CLOSED-CAPTIONS" => RenditionType::ClosedCaptions,
                other => {
                    return Err(PackagerError::InvalidAttributeValue {
                        tag: "EXT-X-MEDIA".into(),
                        attr: "TYPE".into(),
                        value: other.to_string(),
                    })
                }
            };
            pl.renditions.push(Rendition {
                media_type,
                group_id: required(&attrs, "EXT-X-MEDIA", "GROUP-ID")?.to_string(),
                name: required(&attrs, "EXT-X-MEDIA", "NAME")?.to_string(),
                uri: attrs.get("URI").cloned(),
                language: attrs.get("LANGUAGE").cloned(),
                default: attrs.get("DEFAULT").map(|v| v == "YES").unwrap_or(false),
                autoselect: attrs.get("AUTOSELECT").map(|v| v == "YES").unwrap_or(false),
                forced: attrs.get("FORCED").map(|v| v == "YES").unwrap_or(false),
                channels: attrs.get("CHANNELS").cloned(),
            });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-I-FRAME-STREAM-INF:") {
            let attrs = parse_attribute_list(rest);
            pl.i_frame_variants.push(IFrameVariantStream {
                uri: required(&attrs, "EXT-X-I-FRAME-STREAM-INF", "URI")?.to_string(),
                bandwidth: parse_u64(&attrs, "EXT-X-I-FRAME-STREAM-INF", "BANDWIDTH")?.unwrap_or(0),
                codecs: attrs.get("CODECS").cloned(),
                resolution: attrs.get("RESOLUTION").and_then(|v| parse_resolution(v)),
                video_group: attrs.get("VIDEO").cloned(),
            });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let attrs = parse_attribute_list(rest);
            let bandwidth = parse_u64(&attrs, "EXT-X-STREAM-INF", "BANDWIDTH")?
                .ok_or_else(|| PackagerError::MissingRequiredAttribute {
                    tag: "EXT-X-STREAM-INF".into(),
                    attr: "BANDWIDTH".into(),
                })?;
            let uri_line = loop {
                match lines.get(i) {
                    None => {
                        return Err(PackagerError::MissingURI {
                            after: "EXT-X-STREAM-INF".into(),
                            line: i,
                        })
                    }
                    Some(l) if l.trim().is_empty() || l.trim_start().starts_with('#') => {
                        i += 1;
                        continue;
                    }
                    Some(l) => {
                        i += 1;
                        break l.trim().to_string();
                    }
                }
            };
            pl.variants.push(VariantStream {
                uri: uri_line,
                bandwidth,
                average_bandwidth: parse_u64(&attrs, "EXT-X-STREAM-INF", "AVERAGE-BANDWIDTH")?,
                codecs: attrs.get("CODECS").cloned(),
                resolution: attrs.get("RESOLUTION").and_then(|v| parse_resolution(v)),
                frame_rate: attrs.get("FRAME-RATE").and_then(|v| v.parse().ok()),
                audio_group: attrs.get("AUDIO").cloned(),
                video_group: attrs.get("VIDEO").cloned(),
                subtitles_group: attrs.get("SUBTITLES").cloned(),
                closed_captions_group: attrs.get("CLOSED-CAPTIONS").cloned(),
            });
        } else if let Some(rest) = line.strip_prefix("#EXT-X-CONTENT-STEERING:") {
            let attrs = parse_attribute_list(rest);
            pl.content_steering = Some(ContentSteering {
                server_uri: required(&attrs, "EXT-X-CONTENT-STEERING", "SERVER-URI")?.to_string(),
                pathway_id: attrs.get("PATHWAY-ID").cloned(),
            });
        }
    }
    Ok(pl)
}

fn parse_resolution(v: &str) -> Option<Resolution> {
    let (w, h) = v.split_once('x')?;
    Some(Resolution {
        width: w.parse().ok()?,
        height: h.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::render::render_media_playlist;

    #[test]
    fn rejects_missing_header() {
        let err = parse_playlist("#EXT-X-VERSION:3\n").unwrap_err();
        assert!(matches!(err, PackagerError::MissingHeader));
    }

    #[test]
    fn rejects_ambiguous_playlist() {
        let err = parse_playlist("#EXTM3U\n#EXT-X-VERSION:3\n").unwrap_err();
        assert!(matches!(err, PackagerError::AmbiguousPlaylistType));
    }

    #[test]
    fn round_trips_simple_media_playlist() {
        let mut pl = MediaPlaylist::default();
        pl.version = 3;
        pl.target_duration = 6;
        pl.has_endlist = true;
        pl.segments.push(Segment {
            duration: 6.0,
            uri: "seg0.ts".into(),
            title: None,
            byte_range: None,
            key: None,
            map: None,
            program_date_time: None,
            discontinuity: false,
            is_gap: false,
            bitrate: None,
            partials: Vec::new(),
        });
        let rendered = render_media_playlist(&pl);
        let parsed = match parse_playlist(&rendered).unwrap() {
            Playlist::Media(m) => m,
            Playlist::Master(_) => panic!("expected media playlist"),
        };
        assert_eq!(parsed, pl);
    }

    #[test]
    fn stream_inf_without_uri_fails() {
        let text = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000\n";
        let err = parse_playlist(text).unwrap_err();
        assert!(matches!(err, PackagerError::MissingURI { .. }));
    }
}

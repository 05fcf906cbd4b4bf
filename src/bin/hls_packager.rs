//! CLI entry point: packages an already-encoded MP4 into an HLS VOD
//! rendition (init/media segments + playlist), optionally AES-128
//! encrypted. The live LL-HLS/push-engine pipeline is exposed as a
//! library surface (`hls_packager::llhls`, `hls_packager::push`) driven
//! by an ingestion process; it has no CLI entry point here.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use hls_packager::crypto::aes128;
use hls_packager::mp4::{MediaSource, Mp4File, TrackKind};
use hls_packager::mux::{FmP4Writer, TrackFragment, TrackMeta};
use hls_packager::planner::plan_segments;
use hls_packager::playlist::render_media_playlist;
use hls_packager::types::{EncryptionKey, EncryptionMethod, MapTag, MediaPlaylist, Segment};

#[derive(Parser, Debug)]
#[command(name = "hls-packager", about = "Package an MP4 into HLS fMP4 segments")]
struct Cli {
    /// Source MP4 file.
    input: PathBuf,

    /// Output directory for init.mp4, segment files, and playlist.m3u8.
    #[arg(short, long, default_value = "out")]
    output_dir: PathBuf,

    /// Target segment duration in seconds.
    #[arg(short, long, default_value_t = 6.0)]
    target_duration: f64,

    /// Output container.
    #[arg(short, long, value_enum, default_value_t = Container::Fmp4)]
    container: Container,

    /// AES-128 full-segment encryption key, as 32 hex characters.
    #[arg(long)]
    encryption_key_hex: Option<String>,

    #[arg(long)]
    key_uri: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Container {
    Fmp4,
    Ts,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating output dir {}", cli.output_dir.display()))?;

    let data = fs::read(&cli.input).with_context(|| format!("reading {}", cli.input.display()))?;
    let source = Mp4File::from_bytes(data);
    let analysis = source.analyze()?;

    let video = analysis
        .tracks
        .iter()
        .find(|t| t.kind == TrackKind::Video)
        .context("source has no video track")?;

    let encryption_key = match &cli.encryption_key_hex {
        Some(hex_str) => {
            let bytes = hex::decode(hex_str).context("encryption key must be hex")?;
            Some(aes128::key_from_bytes(&bytes)?)
        }
        None => None,
    };

    match cli.container {
        Container::Fmp4 => package_fmp4(&cli, &source, video, encryption_key).await,
        Container::Ts => {
            warn!("MPEG-TS CLI packaging is not yet wired to the TS writer's codec-config path; use the library API directly");
            anyhow::bail!("--container ts is not supported from the CLI yet")
        }
    }
}

async fn package_fmp4(
    cli: &Cli,
    source: &Mp4File,
    video: &hls_packager::mp4::TrackInfo,
    encryption_key: Option<[u8; 16]>,
) -> Result<()> {
    let segments_plan = plan_segments(&video.samples, video.timescale, cli.target_duration);
    info!(count = segments_plan.len(), "planned segments");

    let writer = FmP4Writer::new();
    let track_meta = TrackMeta {
        track_id: video.track_id,
        timescale: video.timescale,
        kind: TrackKind::Video,
        stsd_entry: video.sample_description.clone(),
    };
    let init_bytes = writer.write_init_segment(&[track_meta])?;
    fs::write(cli.output_dir.join("init.mp4"), &init_bytes)?;

    let mut writer = writer;
    let mut playlist = MediaPlaylist {
        version: 7,
        target_duration: cli.target_duration.ceil() as u32,
        has_endlist: true,
        independent_segments: true,
        ..Default::default()
    };

    for (idx, plan) in segments_plan.iter().enumerate() {
        let samples = &video.samples[plan.first_sample..plan.first_sample + plan.sample_count];
        let sample_data = source.sample_bytes(samples);
        let fragment = TrackFragment {
            track_id: video.track_id,
            samples,
            sample_data: &sample_data,
        };
        let mut media_bytes = writer.write_media_segment(&[fragment])?;

        if let Some(key) = encryption_key {
            let iv = aes128::iv_from_media_sequence(idx as u64);
            media_bytes = aes128::encrypt(&media_bytes, &key, &iv);
        }

        let filename = format!("seg{idx}.m4s");
        fs::write(cli.output_dir.join(&filename), &media_bytes)?;

        playlist.segments.push(Segment {
            duration: plan.duration as f64 / video.timescale as f64,
            uri: filename,
            title: None,
            byte_range: None,
            key: encryption_key.map(|_| EncryptionKey {
                method: EncryptionMethod::Aes128,
                uri: cli.key_uri.clone(),
                iv: Some(aes128::iv_from_media_sequence(idx as u64)),
                key_format: None,
                key_format_versions: None,
            }),
            map: if idx == 0 {
                Some(MapTag { uri: "init.mp4".into(), byte_range: None })
            } else {
                None
            },
            program_date_time: None,
            discontinuity: false,
            is_gap: false,
            bitrate: None,
            partials: Vec::new(),
        });
    }

    let rendered = render_media_playlist(&playlist);
    fs::write(cli.output_dir.join("playlist.m3u8"), rendered)?;
    info!(dir = %cli.output_dir.display(), "packaging complete");
    Ok(())
}

//! The `record` command: run the receiver with the mirror application and
//! save every inbound mirroring session to its own WebM file.

use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};

use takecast_core::adapters::crypto::KeyPair;
use takecast_core::adapters::media::{Packet, Session};
use takecast_core::adapters::server::{Server, ServerConfig};
use takecast_core::application::{MirrorApplication, MirrorConfig};
use takecast_core::domain::error::Error;
use takecast_core::domain::frame::MediaKind;

use crate::webm::{AudioSpec, TrackEntrySpec, VideoSpec, WebmWriter, TRACK_TYPE_AUDIO, TRACK_TYPE_VIDEO};

pub async fn run(cert_dir: &Path, out_filename_template: &str) -> anyhow::Result<()> {
    let root_ca = KeyPair::load_from_files(&cert_dir.join("ca.crt"), &cert_dir.join("ca.key"))
        .context("failed loading ca.crt/ca.key, did you forget to run 'patch'?")?;

    let recorder = Arc::new(Recorder {
        template: out_filename_template.to_string(),
        session_counter: AtomicU32::new(0),
    });

    let server = Arc::new(
        Server::listen(ServerConfig {
            root_ca: Some(root_ca),
            ..ServerConfig::default()
        })
        .await
        .context("failed starting server")?,
    );

    let mirror = MirrorApplication::new(MirrorConfig {
        on_session: Some(Arc::new({
            let recorder = Arc::clone(&recorder);
            move |session| Arc::clone(&recorder).on_session(session)
        })),
        ..MirrorConfig::default()
    });
    server
        .receiver()
        .register_application(mirror)
        .await
        .context("failed registering mirror application")?;

    let serve = Arc::clone(&server);
    let mut serve_task = tokio::spawn(async move { serve.serve().await });
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("got termination signal, closing");
            server.close().await;
            Ok(())
        }
        result = &mut serve_task => {
            bail!("server failed: {result:?}")
        }
    }
}

struct Recorder {
    template: String,
    session_counter: AtomicU32,
}

impl Recorder {
    fn on_session(self: Arc<Self>, session: Arc<Session>) {
        tokio::spawn(async move {
            if let Err(e) = self.run_session(session).await {
                warn!("recorder failure: {e:#}");
            }
        });
    }

    fn filename(&self, index: u32) -> String {
        self.template
            .replace("{index}", &index.to_string())
            .replace("{Index}", &index.to_string())
    }

    async fn run_session(&self, session: Arc<Session>) -> anyhow::Result<()> {
        let index = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let filename = self.filename(index);
        info!(%filename, "recording new stream");

        let (tracks, audio_track, video_track) = session_tracks(&session)?;
        let file = std::fs::File::create(&filename)
            .with_context(|| format!("failed creating file at {filename}"))?;
        let mut writer = WebmWriter::new(BufWriter::new(file), &tracks)?;

        let mut framer = session.framer();
        let mut scratch = Vec::new();
        let mut audio_ms: i64 = 0;
        let mut video_ms: i64 = 0;
        let result = loop {
            let packet = match session.recv_packet(&mut scratch).await {
                Ok(packet) => packet,
                Err(Error::Cancelled) => break Ok(()),
                Err(e) => break Err(anyhow::Error::from(e)),
            };
            let Packet::Rtp(rtp) = packet else { continue };
            if let Err(e) = framer.write(&rtp) {
                warn!("dropping malformed packet: {e}");
                continue;
            }
            while let Some(frame) = framer.read() {
                match frame.kind {
                    MediaKind::Audio => {
                        audio_ms += frame.duration.as_millis() as i64;
                        if let Some(track) = audio_track {
                            writer.write_block(track, audio_ms, true, &frame.data)?;
                        }
                    }
                    MediaKind::Video => {
                        video_ms += frame.duration.as_millis() as i64;
                        if let Some(track) = video_track {
                            writer.write_block(track, video_ms, frame.is_keyframe(), &frame.data)?;
                        }
                    }
                }
            }
        };
        writer.finalize()?;
        result
    }
}

/// Build the WebM track table from the session's selected streams, returning
/// the track numbers for audio and video.
fn session_tracks(
    session: &Session,
) -> anyhow::Result<(Vec<TrackEntrySpec>, Option<u64>, Option<u64>)> {
    let mut tracks = Vec::with_capacity(2);
    let mut audio_track = None;
    let mut video_track = None;

    if let Some(audio) = &session.audio {
        if audio.codec_name != "opus" {
            bail!("expected opus audio codec, got {:?}", audio.codec_name);
        }
        let number = tracks.len() as u64 + 1;
        tracks.push(TrackEntrySpec {
            number,
            uid: audio.ssrc as u64,
            codec_id: "A_OPUS".into(),
            track_type: TRACK_TYPE_AUDIO,
            default_duration_ns: 20_000_000,
            audio: Some(AudioSpec {
                sampling_frequency: if audio.sample_rate > 0.0 {
                    audio.sample_rate
                } else {
                    48_000.0
                },
                channels: if audio.channels > 0 {
                    audio.channels as u64
                } else {
                    2
                },
            }),
            video: None,
        });
        audio_track = Some(number);
    }
    if let Some(video) = &session.video {
        if video.codec_name != "vp8" {
            bail!("expected vp8 video codec, got {:?}", video.codec_name);
        }
        let number = tracks.len() as u64 + 1;
        let (width, height) = video
            .resolutions
            .first()
            .map(|r| (r.width as u64, r.height as u64))
            .unwrap_or((320, 240));
        tracks.push(TrackEntrySpec {
            number,
            uid: video.ssrc as u64,
            codec_id: "V_VP8".into(),
            track_type: TRACK_TYPE_VIDEO,
            default_duration_ns: 33_333_333,
            audio: None,
            video: Some(VideoSpec {
                pixel_width: width,
                pixel_height: height,
            }),
        });
        video_track = Some(number);
    }
    if tracks.is_empty() {
        bail!("session has no recordable streams");
    }
    Ok((tracks, audio_track, video_track))
}

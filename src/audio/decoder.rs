use std::{collections::HashMap, io::Cursor, path::PathBuf, sync::Arc, time::Duration};

use dasp::sample::ToSample;
use futures_util::{future::BoxFuture, FutureExt as _};
use symphonia::core::{
    audio::{AudioBuffer, AudioBufferRef, Signal},
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
    sample::Sample,
};

use super::track::{LoadedTrack, PcmBuffer, Track};
use crate::error::LoadError;

/// Retrieves the raw bytes behind a track URL.
///
/// The returned future must not borrow `self`; decks spawn it onto the
/// runtime and keep serving other calls while it runs.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, LoadError>>;
}

// ── HttpFetcher ──────────────────────────────────────────────────────────────

/// Fetches `http(s)://` URLs with reqwest; `file://` URLs and bare paths are
/// read from disk.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, LoadError>> {
        let client = self.client.clone();
        let url = url.to_string();
        async move {
            if let Some(path) = local_path(&url) {
                return tokio::fs::read(&path)
                    .await
                    .map_err(|e| LoadError::fetch(&url, format!("Cannot open {}: {e}", path.display())));
            }
            let response = client
                .get(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| LoadError::fetch(&url, e))?;
            let bytes = response.bytes().await.map_err(|e| LoadError::fetch(&url, e))?;
            Ok(bytes.to_vec())
        }
        .boxed()
    }
}

/// `file:///x.mp3` → `/x.mp3`; anything without a scheme is already a path.
fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if url.contains("://") {
        None
    } else {
        Some(PathBuf::from(url))
    }
}

// ── MemoryFetcher ────────────────────────────────────────────────────────────

/// Serves bytes registered up front, optionally after a per-URL delay.
/// Unknown URLs fail like a 404.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    entries: HashMap<String, (Arc<Vec<u8>>, Duration)>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.insert_delayed(url, bytes, Duration::ZERO);
    }

    pub fn insert_delayed(&mut self, url: impl Into<String>, bytes: Vec<u8>, delay: Duration) {
        self.entries.insert(url.into(), (Arc::new(bytes), delay));
    }

    pub fn with(mut self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(url, bytes);
        self
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, LoadError>> {
        let entry = self.entries.get(url).cloned();
        let url = url.to_string();
        async move {
            let (bytes, delay) = entry.ok_or_else(|| LoadError::fetch(&url, "404 Not Found"))?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(bytes.as_ref().clone())
        }
        .boxed()
    }
}

// ── Decode ───────────────────────────────────────────────────────────────────

/// Fetch `track.url` and decode it into memory. The only suspension point of
/// a deck load; no retries.
pub async fn fetch_and_decode(fetcher: Arc<dyn Fetcher>, track: Track) -> Result<LoadedTrack, LoadError> {
    let bytes = fetcher.fetch(&track.url).await?;
    let url = track.url.clone();
    let pcm = tokio::task::spawn_blocking(move || decode_bytes(&url, bytes))
        .await
        .map_err(|e| LoadError::decode(&track.url, format!("Decode task failed: {e}")))??;
    log::debug!(
        "Decoded '{}': {} frames @ {} Hz, {} ch",
        track.url,
        pcm.frames(),
        pcm.sample_rate(),
        pcm.source_channels()
    );
    Ok(LoadedTrack::new(track, pcm))
}

/// Decode a complete audio file held in memory to interleaved stereo f32.
pub fn decode_bytes(url: &str, bytes: Vec<u8>) -> Result<PcmBuffer, LoadError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = url_extension(url) {
        hint.with_extension(ext);
    }
    let mut probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| LoadError::decode(url, format!("Probe failed: {e}")))?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| LoadError::NoAudioTrack { url: url.to_string() })?
        .clone();

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| LoadError::decode(url, format!("Codec init: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match probed.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(LoadError::decode(url, format!("Format read: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Decode error in '{url}' (skip packet): {e}");
                continue;
            }
            Err(e) => return Err(LoadError::decode(url, format!("Fatal decode: {e}"))),
        };
        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;
        append_decoded(decoded, &mut samples);
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(LoadError::decode(url, "Stream contains no audio frames"));
    }
    Ok(PcmBuffer::new(samples, sample_rate, channels))
}

/// Extension of the last path segment, ignoring query and fragment.
fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty()).then_some(ext)
}

fn append_decoded(decoded: AudioBufferRef<'_>, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::F32(b) => append_stereo(b.as_ref(), out),
        AudioBufferRef::F64(b) => append_stereo(b.as_ref(), out),
        AudioBufferRef::S32(b) => append_stereo(b.as_ref(), out),
        AudioBufferRef::S16(b) => append_stereo(b.as_ref(), out),
        AudioBufferRef::S8(b) => append_stereo(b.as_ref(), out),
        AudioBufferRef::U32(b) => append_stereo(b.as_ref(), out),
        AudioBufferRef::U16(b) => append_stereo(b.as_ref(), out),
        AudioBufferRef::U8(b) => append_stereo(b.as_ref(), out),
        other => {
            // 24-bit formats have no dasp counterpart; let symphonia convert.
            let mut converted = other.make_equivalent::<f32>();
            other.convert(&mut converted);
            append_stereo(&converted, out);
        }
    }
}

/// Push `buf` as interleaved stereo f32: mono is duplicated, extra channels dropped.
fn append_stereo<S>(buf: &AudioBuffer<S>, out: &mut Vec<f32>)
where
    S: Sample + ToSample<f32>,
{
    let n_channels = buf.spec().channels.count();
    if n_channels == 0 || buf.frames() == 0 {
        return;
    }
    let left = buf.chan(0);
    let right = if n_channels > 1 { buf.chan(1) } else { buf.chan(0) };
    out.reserve(buf.frames() * 2);
    for (&l, &r) in left.iter().zip(right.iter()) {
        out.push(l.to_sample_());
        out.push(r.to_sample_());
    }
}

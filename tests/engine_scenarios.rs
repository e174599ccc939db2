use std::{io::Cursor, sync::Arc};

use dualdeck_lib::{DeckSide, DjEngine, EngineConfig, HttpFetcher, MemoryFetcher, OutputBackend, Track};

const RATE: u32 = 2_000;

fn sine_wav(seconds: f32, rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..(seconds * rate as f32) as usize {
            let t = i as f32 / rate as f32;
            writer.write_sample(((t * 330.0 * std::f32::consts::TAU).sin() * 12_000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn offline_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.output.backend = OutputBackend::Offline;
    config.output.offline_sample_rate = RATE;
    config
}

fn render_secs(engine: &mut DjEngine, seconds: f64) {
    let mut buf = vec![0.0; (seconds * RATE as f64) as usize * 2];
    assert!(engine.render(&mut buf), "offline engine must render");
}

#[tokio::test]
async fn load_play_pause_seek_resume_scenario() {
    let fetcher = MemoryFetcher::new().with("mem://a.wav", sine_wav(10.0, RATE));
    let mut engine = DjEngine::new(offline_config(), Arc::new(fetcher)).unwrap();

    engine.load_track(Track::new("A", "Track A", "Artist", "mem://a.wav"), DeckSide::Left);
    engine.settle().await;
    let left = engine.state().left_deck;
    assert_eq!(left.current_track.map(|t| t.id), Some("A".to_string()));
    assert!(!left.is_playing);

    engine.toggle_playback(DeckSide::Left);
    assert!(engine.state().left_deck.is_playing);

    render_secs(&mut engine, 3.0);
    assert!((engine.progress(DeckSide::Left) - 0.3).abs() < 1e-3);

    engine.toggle_playback(DeckSide::Left);
    assert!(!engine.state().left_deck.is_playing);
    render_secs(&mut engine, 1.0);
    assert!((engine.progress(DeckSide::Left) - 0.3).abs() < 1e-3, "paused progress must hold");

    engine.seek(DeckSide::Left, 8.0);
    assert!((engine.state().left_deck.position_secs - 8.0).abs() < 1e-9);

    engine.toggle_playback(DeckSide::Left);
    let mut last = engine.progress(DeckSide::Left);
    assert!((last - 0.8).abs() < 1e-3);
    for _ in 0..4 {
        render_secs(&mut engine, 0.25);
        let p = engine.progress(DeckSide::Left);
        assert!(p > last, "progress must climb: {p} <= {last}");
        last = p;
    }
    assert!((last - 0.9).abs() < 1e-3);
}

#[tokio::test]
async fn state_subscribers_see_load_completion() {
    let fetcher = MemoryFetcher::new().with("mem://b.wav", sine_wav(1.0, RATE));
    let mut engine = DjEngine::new(offline_config(), Arc::new(fetcher)).unwrap();
    let mut rx = engine.subscribe();

    engine.load_track(Track::new("B", "Track B", "Artist", "mem://b.wav"), DeckSide::Right);
    assert!(rx.borrow_and_update().right_deck.is_loading);

    engine.settle().await;
    let state = rx.borrow_and_update().clone();
    assert!(state.initialized);
    assert!(!state.right_deck.is_loading);
    assert_eq!(state.right_deck.current_track.map(|t| t.title), Some("Track B".to_string()));
}

#[tokio::test]
async fn spectrum_reacts_to_playback() {
    let fetcher = MemoryFetcher::new().with("mem://c.wav", sine_wav(3.0, RATE));
    let mut engine = DjEngine::new(offline_config(), Arc::new(fetcher)).unwrap();
    let bins = engine.frequency_data().len();
    assert_eq!(bins, 1024);

    engine.load_track(Track::new("C", "Track C", "Artist", "mem://c.wav"), DeckSide::Left);
    engine.settle().await;
    engine.toggle_playback(DeckSide::Left);
    render_secs(&mut engine, 2.0);

    let spectrum = engine.frequency_data();
    assert_eq!(spectrum.len(), bins);
    assert!(spectrum.iter().any(|&b| b > 0), "a playing tone must show up in the spectrum");
}

#[tokio::test]
async fn loads_from_a_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("d.wav");
    std::fs::write(&path, sine_wav(0.5, RATE)).unwrap();
    let url = format!("file://{}", path.display());

    let mut engine = DjEngine::new(offline_config(), Arc::new(HttpFetcher::new())).unwrap();
    engine.load_track(Track::new("D", "Track D", "Artist", url), DeckSide::Left);
    engine.settle().await;

    let left = engine.state().left_deck;
    assert!(left.last_error.is_none(), "unexpected error: {:?}", left.last_error);
    assert!((left.duration_secs - 0.5).abs() < 1e-3);
}

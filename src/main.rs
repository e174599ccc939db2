use std::{io::Write, path::Path, sync::Arc, time::Duration};

use dualdeck_lib::{DeckSide, DjEngine, EngineConfig, EngineError, HttpFetcher, OutputBackend, Track};

const TICK: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.len() > 2 {
        eprintln!("usage: dualdeck <left-track> [right-track]");
        std::process::exit(2);
    }

    if let Err(e) = run(&args).await {
        log::error!("{e}");
        std::process::exit(1);
    }
}

/// Play the left track, then sweep the crossfader over to the right track
/// across the left track's length.
async fn run(args: &[String]) -> Result<(), EngineError> {
    let config = match std::env::var_os("DUALDECK_CONFIG") {
        Some(path) => EngineConfig::from_file(Path::new(&path))?,
        None => EngineConfig::default(),
    };
    let offline = config.output.backend == OutputBackend::Offline;

    let mut engine = DjEngine::new(config, Arc::new(HttpFetcher::new()))?;
    engine.init()?;

    let sides = [DeckSide::Left, DeckSide::Right];
    for (side, url) in sides.iter().zip(args) {
        engine.load_track(track_for(url), *side);
    }
    engine.settle().await;

    let state = engine.state();
    for side in sides.iter().take(args.len()) {
        if let Some(err) = &state.deck(*side).last_error {
            return Err(EngineError::Load(format!("{side} deck: {err}")));
        }
    }

    let mixing = args.len() == 2;
    engine.set_crossfader(if mixing { -1.0 } else { 0.0 });
    for side in sides.iter().take(args.len()) {
        engine.toggle_playback(*side);
    }

    // Offline output only advances when someone pulls frames.
    let mut scratch = match engine.sample_rate() {
        Some(rate) if offline => vec![0.0; (rate as f64 * TICK.as_secs_f64()) as usize * 2],
        _ => Vec::new(),
    };

    let mut ticker = tokio::time::interval(TICK);
    loop {
        ticker.tick().await;
        if offline {
            engine.render(&mut scratch);
        } else {
            engine.pump();
        }

        let left = engine.progress(DeckSide::Left);
        if mixing {
            engine.set_crossfader((left * 2.0 - 1.0) as f32);
        }

        let state = engine.state();
        print!("\rleft {:>5.1}%", left * 100.0);
        if mixing {
            print!(
                "  right {:>5.1}%  xfade {:+.2}",
                engine.progress(DeckSide::Right) * 100.0,
                state.crossfader_value
            );
        }

        let _ = std::io::stdout().flush();

        if !state.left_deck.is_playing && !state.right_deck.is_playing {
            println!();
            break;
        }
    }

    engine.dispose();
    Ok(())
}

fn track_for(url: &str) -> Track {
    let title = Path::new(url)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.to_string());
    Track::new(url, title, "", url)
}

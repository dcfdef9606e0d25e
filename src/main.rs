use beacon_positioning::{init_logging, LocationPipeline, MockScanner, PipelineConfig, Sighting};
use serde::Deserialize;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// One recorded scan cycle
#[derive(Debug, Deserialize)]
struct ReplayFrame {
    timestamp_ms: u64,
    #[serde(default)]
    sightings: Vec<Sighting>,
}

fn parse_frames(content: &str) -> serde_json::Result<Vec<ReplayFrame>> {
    serde_json::from_str(content)
}

/// Run every frame through a pipeline, writing one JSON line per update.
/// Returns the number of lines written.
async fn replay<W: Write>(
    config: &PipelineConfig,
    frames: &[ReplayFrame],
    out: &mut W,
) -> Result<usize, Box<dyn Error>> {
    let scanner = Arc::new(MockScanner::new().with_registry(config.anchor_registry()?));
    let pipeline = LocationPipeline::new(Arc::clone(&scanner), config);
    let mut updates = pipeline.location_updates();
    pipeline.start()?;

    let mut written = 0;
    for frame in frames {
        scanner.push_sightings(frame.timestamp_ms, &frame.sightings);

        match tokio::time::timeout(UPDATE_TIMEOUT, updates.changed()).await {
            Ok(Some(update)) => {
                writeln!(out, "{}", serde_json::to_string(&update)?)?;
                written += 1;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(timestamp_ms = frame.timestamp_ms, "No location update for replayed frame");
            }
        }
    }

    pipeline.stop()?;
    pipeline.cleanup();
    pipeline.closed().await;
    Ok(written)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() != 3 {
        eprintln!(
            "Usage: {} <config.json> <replay.json>",
            args.first().map_or("beacon-positioning", |s| s.as_str())
        );
        return Err("Invalid arguments".into());
    }

    let config = PipelineConfig::from_file(&args[1])?;
    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("Logging already initialised: {e}");
    }

    let replay_data = std::fs::read_to_string(&args[2])?;
    let frames = parse_frames(&replay_data)?;
    info!(frames = frames.len(), anchors = config.anchors.len(), "Replaying recorded scans");

    let mut stdout = std::io::stdout();
    replay(&config, &frames, &mut stdout).await?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_positioning::LocationUpdate;

    const CONFIG: &str = r#"{
        "calculator": "weighted_centroid",
        "anchors": [
            { "uuid": "2f234454-cf6d-4a0f-adf2-f4911ba9ffa6", "major": 1, "minor": 1,
              "latitude": 26.8, "longitude": 80.9 }
        ]
    }"#;

    const FRAMES: &str = r#"[
        { "timestamp_ms": 1000,
          "sightings": [
            { "id": { "group": "2f234454-cf6d-4a0f-adf2-f4911ba9ffa6", "major": 1, "minor": 1 },
              "rssi": -60, "distance": 2.5 },
            { "id": { "group": "2f234454-cf6d-4a0f-adf2-f4911ba9ffa6", "major": 9, "minor": 9 },
              "rssi": -50, "distance": 1.0 }
          ] },
        { "timestamp_ms": 2000 }
    ]"#;

    #[test]
    fn test_parse_frames() {
        let frames = parse_frames(FRAMES).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp_ms, 1000);
        assert_eq!(frames[0].sightings.len(), 2);
        assert_eq!(frames[0].sightings[0].distance, Some(2.5));
        assert!(frames[1].sightings.is_empty());
    }

    #[test]
    fn test_parse_frames_rejects_non_array() {
        assert!(parse_frames(r#"{ "timestamp_ms": 1 }"#).is_err());
    }

    #[tokio::test]
    async fn test_replay_writes_one_line_per_frame() {
        let config = PipelineConfig::from_json_str(CONFIG).unwrap();
        let frames = parse_frames(FRAMES).unwrap();
        let mut out = Vec::new();

        let written = replay(&config, &frames, &mut out).await.unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<LocationUpdate> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        // the unregistered beacon is dropped
        assert_eq!(lines[0].beacons.len(), 1);
        assert_eq!(lines[0].error, None);
        let position = lines[0].position.unwrap();
        assert_eq!((position.latitude, position.longitude), (26.8, 80.9));
        assert_eq!(position.accuracy, 2.5);
        assert_eq!(position.timestamp_ms, 1000);

        assert_eq!(lines[1], LocationUpdate::initial());
    }
}

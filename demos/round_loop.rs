//! Replay one hole through the round driver and print everything it does.
//!
//! Usage: cargo run --example round_loop
//!
//! Runs offline: positions come from a scripted source (with a GPS dropout
//! halfway through) and predictions from an in-process stand-in for the
//! prediction service. Set `RUST_LOG=debug` to see stale predictions.

use std::process;
use std::time::Duration;

use caddie::error::TransportError;
use caddie::stream::ScriptedSource;
use caddie::{
    DriverError, DriverEvent, GeoPoint, HoleLayout, OverlayCommand, Polygon, PredictionClient,
    Reading, RoundDriver, SessionRegistry, Step, StreamError, WatchOptions,
};
use serde_json::{Value, json};

/// meters → yards
fn m_to_yd(m: f64) -> f64 {
    m * 1.09361
}

// ---------------------------------------------------------------------------
// Scripted inputs
// ---------------------------------------------------------------------------

fn hole_one() -> Result<HoleLayout, caddie::GeometryError> {
    let boundary = Polygon::new(vec![
        GeoPoint::new(53.3500, -6.2680),
        GeoPoint::new(53.3500, -6.2620),
        GeoPoint::new(53.3600, -6.2620),
        GeoPoint::new(53.3600, -6.2680),
    ])?;
    Ok(HoleLayout::bounded("Hole 1", boundary))
}

fn at(lat: f64, lon: f64, ts: u64) -> Reading {
    Reading::new(GeoPoint::new(lat, lon), ts).with_accuracy(5.0)
}

/// Tee shot, a wander off the hole, the second shot, then the GPS drops.
fn first_leg() -> ScriptedSource {
    ScriptedSource::new([
        at(53.3505, -6.2650, 0),
        at(53.3650, -6.2650, 30_000),
        at(53.3530, -6.2648, 60_000),
    ])
    .then_fail(StreamError::SourceUnavailable {
        reason: "GPS signal lost".into(),
    })
}

/// Positioning back on the green.
fn second_leg() -> ScriptedSource {
    ScriptedSource::new([at(53.3575, -6.2645, 120_000)]).hold_open()
}

/// Predicts a carry of ~150 m north and picks a club from it.
fn predict(path: &str, body: Value) -> Result<Value, TransportError> {
    if path.starts_with("/predictlocation/") {
        let lat = body["start_x"].as_f64().unwrap_or_default() + 0.00135;
        Ok(json!({"latitude": lat, "longitude": body["start_y"]}))
    } else {
        let club = if body["shot_id"].as_u64() == Some(1) { "Driver" } else { "7-Iron" };
        Ok(json!({"Club": club}))
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let layout = hole_one()?;
    let surface = layout.boundary.clone();
    let registry = SessionRegistry::new();
    let session = registry.open("2001".into(), layout)?;

    let bridge = |cmd: OverlayCommand| println!("  >> {}", cmd.to_json());
    let mut driver = RoundDriver::new(bridge, PredictionClient::new(predict));
    let options = WatchOptions::default();
    driver.start_verified(session, first_leg(), options.clone(), &surface)?;
    println!("=== Round started on Hole 1 ===");

    let mut recovery = Some(second_leg());
    let mut idle = 0;
    while idle < 5 {
        match driver.step(Duration::from_millis(200)) {
            Ok(Some(event)) => {
                idle = 0;
                print_event(&event);
            }
            Ok(None) => idle += 1,
            Err(DriverError::Positioning(e)) => {
                println!("  positioning lost: {e}");
                match recovery.take() {
                    Some(source) => {
                        println!("  re-subscribing...");
                        driver.resubscribe(source, options.clone())?;
                    }
                    None => break,
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    let Some(session) = driver.teardown() else {
        return Ok(());
    };
    println!("=== Round over: {} shots ===", session.shots().len());
    for shot in session.shots() {
        let carry = shot
            .distance_m()
            .map_or_else(|| "in play".to_string(), |d| format!("{:.0} yd", m_to_yd(d)));
        let club = shot.recommended_club.as_deref().unwrap_or("-");
        println!("  #{} from {}  {carry}  club {club}", shot.shot_id, shot.start);
        if let Some(err) = shot.prediction_error_m() {
            println!("     prediction off by {:.0} yd", m_to_yd(err));
        }
    }
    println!("{}", session.shots_json()?);
    Ok(())
}

fn print_event(event: &DriverEvent) {
    match event {
        DriverEvent::Fix { fix, step } => match step {
            Step::Idle => {}
            Step::Outside => println!("  fix {} off the hole, ignored", fix.point()),
            Step::Exhausted => println!("  fix {} ignored, shot ids used up", fix.point()),
            Step::FirstShot(req) => println!("  tee shot #{} at {}", req.shot_id, req.start),
            Step::NextShot { closed, request } => {
                println!("  shot #{closed} done, #{} from {}", request.shot_id, request.start);
            }
        },
        DriverEvent::Prediction { shot_id, resolution } => {
            println!("  prediction for #{shot_id}: {resolution:?}");
        }
    }
}

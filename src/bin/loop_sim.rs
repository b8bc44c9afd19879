//! Desktop simulation of two trains on the reference loop.
//!
//! Each train gets a mock hub and a feeder task that plays the tiles of its
//! lap back as sensor detections while the train is moving. Status reports
//! are logged as they arrive.
//!
//! ```text
//! cargo run --bin loop_sim -- [seconds] [config.json]
//! RUST_LOG=trainz_autopilot=debug cargo run --bin loop_sim
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trainz_autopilot::hal::MockHardware;
use trainz_autopilot::status::ChannelStatusSink;
use trainz_autopilot::track::standard_loop;
use trainz_autopilot::{
    Color, Config, Dispatcher, MotionState, OperatorCommand, TrainConfig, TrainId, TrainSetup,
    TravelDirection,
};

/// Tiles of one lap in direction B, starting at RED_1.
const LAP_B: &[Color] = &[
    Color::Cyan,
    Color::Green,
    Color::Cyan,
    Color::Green,
    Color::Blue,
    Color::Blue,
    Color::Blue,
    Color::Red,
    Color::Magenta,
    Color::Magenta,
    Color::Yellow,
    Color::Yellow,
    Color::Yellow,
    Color::Red,
];

/// Tiles of one lap in direction A, starting at RED_2.
const LAP_A: &[Color] = &[
    Color::Blue,
    Color::Blue,
    Color::Blue,
    Color::Green,
    Color::Cyan,
    Color::Green,
    Color::Cyan,
    Color::Red,
    Color::Yellow,
    Color::Yellow,
    Color::Yellow,
    Color::Magenta,
    Color::Magenta,
    Color::Red,
];

const TILE_SPACING: Duration = Duration::from_millis(1500);

fn default_config() -> Config {
    Config::default()
        .with_train(TrainConfig::new(1, "cargo").with_direction(TravelDirection::B))
        .with_train(
            TrainConfig::new(2, "express")
                .with_direction(TravelDirection::A)
                .with_home_station("RED_2"),
        )
}

async fn feed(dispatcher: Arc<Dispatcher>, train: TrainId, lap: &'static [Color]) {
    for &color in lap.iter().cycle() {
        // Only a moving train can pass a tile.
        loop {
            match dispatcher.snapshot(train).await {
                Ok(s) if s.power_index != 0
                    && !s.signal_blind
                    && s.state != MotionState::Manual =>
                {
                    break
                }
                Ok(_) => tokio::time::sleep(Duration::from_millis(200)).await,
                Err(_) => return,
            }
        }
        tokio::time::sleep(TILE_SPACING).await;
        if dispatcher.on_detection(train, color).is_err() {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainz_autopilot=info,loop_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let seconds: u64 = match args.next() {
        Some(s) => s.parse().context("seconds must be a whole number")?,
        None => 60,
    };
    let config = match args.next() {
        Some(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            Config::from_json(&json).with_context(|| format!("parsing {path}"))?
        }
        None => default_config(),
    };

    let dispatcher = Arc::new(Dispatcher::new(Arc::new(standard_loop()), config.clone())?);
    let (sink, mut reports) = ChannelStatusSink::channel(64);
    let sink = Arc::new(sink);

    let mut feeders = Vec::new();
    for train in &config.trains {
        let setup = TrainSetup::new(train.clone(), MockHardware::new());
        let id = dispatcher.spawn_train(setup, sink.clone())?;
        let lap = match train.direction {
            TravelDirection::A => LAP_A,
            TravelDirection::B => LAP_B,
        };
        feeders.push(tokio::spawn(feed(dispatcher.clone(), id, lap)));
        dispatcher.command(id, OperatorCommand::Restart).await?;
    }

    let logger = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            tracing::info!(
                train = %report.id,
                state = report.state.as_str(),
                sector = %report.sector_text(),
                power = report.power_index,
                dwell_ms = ?report.dwell_remaining_ms,
                "status"
            );
        }
    });

    tracing::info!(seconds, "simulation running");
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    dispatcher.emergency_stop().await;
    for feeder in feeders {
        feeder.abort();
        let _ = feeder.await;
    }
    tracing::info!(dropped = sink.dropped(), "simulation finished");

    let dispatcher = Arc::try_unwrap(dispatcher)
        .map_err(|_| anyhow::anyhow!("dispatcher still shared"))?;
    dispatcher.shutdown().await;
    logger.abort();
    Ok(())
}

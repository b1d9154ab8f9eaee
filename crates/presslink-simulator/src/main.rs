//! Desktop simulator for the presslink pressure telemetry pipeline.
//!
//! Runs every pipeline stage and the lifecycle controller on the host
//! against a synthetic transducer. Published batches go to the log.
//!
//! # Usage
//!
//! ```text
//! presslink-simulator [--config <file.json>] [--fault-every <reads>]
//!                     [--outage-after <secs>] [--lose-every <sends>]
//!                     [--seed <n>]
//! ```
//!
//! Set `RUST_LOG=debug` to see payload bodies.

mod link;
mod sim_bus;

use std::path::{Path, PathBuf};

use clap::Parser;
use embassy_executor::Spawner;
use embassy_futures::join::{join, join3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant};
use log::{error, info, warn};
use static_cell::StaticCell;

use presslink_core::app_state::{AppError, LifecycleController, SystemContext, SystemReset};
use presslink_core::batching::{LinkStatus, MessageBatcher, MessageForwarder};
use presslink_core::bus::AsyncI2cDevice;
use presslink_core::config::{
    EVENT_QUEUE_CAPACITY, MESSAGE_QUEUE_CAPACITY, PipelineConfig, SAMPLE_QUEUE_CAPACITY,
};
use presslink_core::processing::SignalProcessor;
use presslink_core::queue::BoundedQueue;
use presslink_core::sensors::Wnk80ma;
use presslink_core::source::PressureSource;
use presslink_core::types::{OutboundMessage, PressureEvent, RawSample};

use link::LogPublisher;
use sim_bus::SimulatedBus;

// ---------------------------------------------------------------------------
// Shared pipeline state
// ---------------------------------------------------------------------------

static SAMPLES: BoundedQueue<RawSample, SAMPLE_QUEUE_CAPACITY> = BoundedQueue::new();
static EVENTS: BoundedQueue<PressureEvent, EVENT_QUEUE_CAPACITY> = BoundedQueue::new();
static MESSAGES: BoundedQueue<OutboundMessage, MESSAGE_QUEUE_CAPACITY> = BoundedQueue::new();
static CONTEXT: SystemContext = SystemContext::new();
static LINK: LinkStatus = LinkStatus::new();

static I2C_BUS: StaticCell<Mutex<CriticalSectionRawMutex, SimulatedBus>> = StaticCell::new();

/// Exit code used when the lifecycle controller requests a restart.
const RESTART_EXIT_CODE: i32 = 3;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "presslink-simulator")]
#[command(about = "Run the pressure telemetry pipeline against a simulated transducer", long_about = None)]
struct Options {
    /// JSON pipeline configuration; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start a bus fault burst every this many reads (0 disables faults)
    #[arg(long, default_value_t = 0)]
    fault_every: u64,

    /// Drop the transport this many seconds after each connect
    #[arg(long, value_name = "SECS")]
    outage_after: Option<u64>,

    /// Lose every n-th publish (0 never loses)
    #[arg(long, default_value_t = 0)]
    lose_every: u32,

    /// Seed for the synthetic sensor noise
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn startup_error(message: &str) -> AppError {
    let mut text = heapless::String::new();
    for c in message.chars() {
        if text.push(c).is_err() {
            break;
        }
    }
    AppError::Startup(text)
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, AppError> {
    let config = match path {
        Some(path) => {
            let bytes = std::fs::read(path).map_err(|e| {
                error!("Cannot read {}: {}", path.display(), e);
                startup_error("config file unreadable")
            })?;
            serde_json::from_slice::<PipelineConfig>(&bytes).map_err(|e| {
                error!("Cannot parse {}: {}", path.display(), e);
                startup_error("config file malformed")
            })?
        }
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Restart handling
// ---------------------------------------------------------------------------

/// On the host a restart ends the process; a supervisor may start it again.
struct HostReset;

impl SystemReset for HostReset {
    fn restart(&mut self) -> ! {
        warn!("Restart requested, exiting");
        std::process::exit(RESTART_EXIT_CODE)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

async fn run(options: Options) -> Result<(), AppError> {
    let config = load_config(options.config.as_deref())?;
    let stats_ms = config.stats_interval_ms;

    info!(
        "Starting pipeline: {} Hz, sensor id {}, topic prefix {}",
        config.sampling.sample_rate_hz, config.batching.sensor_id, config.batching.topic_prefix
    );

    let bus = I2C_BUS.init(Mutex::new(SimulatedBus::new(
        config.sampling.i2c_address,
        config.sampling.read_command,
        options.fault_every,
        options.seed,
    )));
    let sensor = Wnk80ma::new(
        AsyncI2cDevice::new(bus),
        config.sampling.i2c_address,
        config.sampling.read_command,
    );

    let mut source = PressureSource::new(sensor, &config.sampling);
    let mut processor = SignalProcessor::new(&config.signal);
    let mut batcher = MessageBatcher::new(&config.batching, Instant::now().as_millis())?;
    let mut forwarder = MessageForwarder::new(
        LogPublisher::new(&LINK, options.lose_every),
        config.batching.pause_poll_ms,
    );
    let mut controller = LifecycleController::new(&CONTEXT, &config.lifecycle);
    let mut reset = HostReset;

    join(
        join3(
            source.run(&SAMPLES, &CONTEXT, stats_ms),
            processor.run(&SAMPLES, &EVENTS, &CONTEXT, stats_ms),
            batcher.run(&EVENTS, &MESSAGES, &CONTEXT, &LINK, stats_ms),
        ),
        join3(
            forwarder.run(&MESSAGES, &CONTEXT, stats_ms),
            controller.run(&mut reset, stats_ms),
            link::run_connectivity(
                &CONTEXT,
                &LINK,
                options.outage_after.map(Duration::from_secs),
            ),
        ),
    )
    .await;

    Ok(())
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = Options::parse();

    // The pipeline state lives on the heap; the executor's task slot only
    // holds the box.
    if let Err(e) = Box::pin(run(options)).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

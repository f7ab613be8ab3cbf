#[macro_use]
extern crate rocket;

use rocket::http::ContentType;
use rocket::{Build, Rocket, State};
use sems_rs::host::{DeviceRegistry, SharedRegistry};
use sems_rs::session::PollingSession;
use sems_rs::settings::{self, Settings};
use sems_rs::transport::HttpTransport;
use sems_rs::{metrics, Error};
use tokio::sync::mpsc;

/// Structure containing state for API handlers.
pub struct StateData {
    registry: SharedRegistry,
}

fn init_logger(settings: &Settings) {
    let level = if settings.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Startup dump of the configuration and the devices known to the registry.
fn dump_config(settings: &Settings, registry: &SharedRegistry) {
    log::debug!("{:?}", settings);
    let dumped = registry.with(|registry: &DeviceRegistry| {
        log::debug!("Device count: {}", registry.len());
        for device in registry.devices() {
            log::debug!("Device: {:?}", device);
        }
    });
    if let Err(e) = dumped {
        log::warn!("Unable to dump devices: {}", e);
    }
}

#[get("/metrics")]
fn metrics_route() -> Result<String, Error> {
    metrics::read()
}

#[get("/devices")]
fn devices_route(state: &State<StateData>) -> Result<(ContentType, String), Error> {
    state
        .registry
        .with(|registry| {
            let devices: Vec<_> = registry.devices().collect();
            serde_json::to_string_pretty(&devices).or(Err(Error::FormatError))
        })?
        .map(|json| (ContentType::JSON, json))
}

#[launch]
async fn rocket() -> Rocket<Build> {
    let settings = settings::read_settings().expect("Configuration error");
    init_logger(&settings);

    let registry = SharedRegistry::default();
    if settings.debug {
        dump_config(&settings, &registry);
    }

    let api = settings.api().expect("Configuration error");
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = HttpTransport::new(api.address.clone(), api.port, settings.timeout(), events_tx)
        .expect("Unable to build HTTP client");
    let session = PollingSession::new(api, transport, registry.clone(), settings.run_again);
    tokio::spawn(session.run(events_rx, settings.heartbeat()));

    rocket::build()
        .manage(StateData { registry })
        .mount("/", routes![metrics_route, devices_route])
}

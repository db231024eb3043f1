use std::time::Duration;

use em2rs::{Em2rs, Em2rsAxis};
use mcdc2805::Mcdc2805;
use motion_engine::{Controller, ControllerDriver, ControllerRegistry};
use tracing::{error, info, warn};
use utilities::{
    TransportChannel, TransportError,
    lazy_tcp::LazyTcpStream,
    serial::{SerialChannel, SerialSettings},
};

use crate::config::{CardEntry, DriverKind, TransportConfig};

pub fn open_transport(config: &TransportConfig) -> Result<Box<dyn TransportChannel>, TransportError> {
    match config {
        TransportConfig::Tcp {
            address,
            max_retries,
            connect_timeout_ms,
        } => {
            let stream = LazyTcpStream::new(
                address.as_str(),
                *max_retries,
                Duration::from_millis(*connect_timeout_ms),
            );
            if stream.peer().is_none() {
                return Err(TransportError::Protocol(format!(
                    "Cannot resolve address {address}"
                )));
            }
            Ok(Box::new(stream))
        }
        TransportConfig::Serial { path, baud_rate } => {
            let channel = SerialChannel::open(&SerialSettings::new(path.as_str(), *baud_rate))?;
            Ok(Box::new(channel))
        }
    }
}

pub fn build_driver(card: &CardEntry) -> Box<dyn ControllerDriver> {
    match card.driver {
        DriverKind::Em2rs => {
            let axes: Vec<Em2rsAxis> = card
                .axes
                .iter()
                .map(|axis| Em2rsAxis {
                    address: axis.address,
                    low_limit: axis.low_limit,
                    high_limit: axis.high_limit,
                })
                .collect();
            Box::new(Em2rs::new(&axes, card.steps_per_rev))
        }
        DriverKind::Mcdc2805 => {
            let steps: Vec<u32> = card
                .axes
                .iter()
                .map(|axis| card.steps_per_rev(axis))
                .collect();
            Box::new(Mcdc2805::new(&steps))
        }
    }
}

/// Starts a poller for every card whose transport opens. Cards that do not
/// identify stay registered but offline.
pub fn build_registry(cards: &[CardEntry]) -> ControllerRegistry {
    let mut registry = ControllerRegistry::new();

    for card in cards {
        let channel = match open_transport(&card.transport) {
            Ok(channel) => channel,
            Err(e) => {
                error!("{}: cannot open transport: {}", card.name, e);
                continue;
            }
        };

        match Controller::start(card.engine(), build_driver(card), channel) {
            Ok(controller) => {
                if !controller.is_online() {
                    warn!("{}: controller did not identify, card offline", card.name);
                }
                let id = registry.insert(controller);
                info!("{}: registered as {}", card.name, id);
            }
            Err(e) => error!("{}: {}", card.name, e),
        }
    }

    registry
}

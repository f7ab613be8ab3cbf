use crate::model::Reading;
use serde::Deserialize;

/* Field names as sent by the portal, `tempperature` included */
#[derive(Deserialize)]
pub struct Inverter {
    pub sn: String,
    pub tempperature: Reading,
    pub output_current: Reading,
    pub output_voltage: Reading,
    pub output_power: Reading,
    pub etotal: Reading,
}

#[derive(Deserialize)]
pub struct GetMonitorDetailByPowerstationId {
    pub inverter: Vec<Inverter>,
}

use crate::api::Error;
use crate::host::{DeviceKind, Unit};
use crate::model::{Inverter, Reading};
use lazy_static::lazy_static;
use prometheus::{opts, register_gauge_vec, Encoder, GaugeVec, TextEncoder};

lazy_static! {
    static ref TEMPERATURE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("inverter_temperature", "inverter reported temperature (in °C)"),
        &["sn", "unit"],
    )
    .expect("inverter_temperature gauge");
    static ref OUTPUT_CURRENT_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("inverter_output_current", "inverter output current (in A)"),
        &["sn", "unit"],
    )
    .expect("inverter_output_current gauge");
    static ref OUTPUT_VOLTAGE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("inverter_output_voltage", "inverter output voltage (in V)"),
        &["sn", "unit"],
    )
    .expect("inverter_output_voltage gauge");
    static ref OUTPUT_POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("inverter_output_power", "inverter output power (in W)"),
        &["sn", "unit"],
    )
    .expect("inverter_output_power gauge");
    static ref ENERGY_TOTAL_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("inverter_energy_total", "total amount of energy generated by inverter (in kWh)"),
        &["sn", "unit"],
    )
    .expect("inverter_energy_total gauge");
}

fn set(gauge: &GaugeVec, labels: &[&str], reading: &Reading) {
    if let Some(v) = reading.as_f64() {
        gauge.with_label_values(labels).set(v);
    }
}

/// Mirror the readings of `inverter`, whose channels start at `base`, into
/// the gauges. Readings that are not numeric leave their gauge untouched.
pub fn record(inverter: &Inverter, base: Unit) {
    for (offset, kind) in (0..).zip(DeviceKind::ALL.iter()) {
        let unit = base.saturating_add(offset).to_string();
        let labels = [inverter.serial.as_str(), unit.as_str()];

        match kind {
            DeviceKind::Temperature => set(&TEMPERATURE_GAUGE, &labels, &inverter.temperature),
            DeviceKind::Current => set(&OUTPUT_CURRENT_GAUGE, &labels, &inverter.output_current),
            DeviceKind::Voltage => set(&OUTPUT_VOLTAGE_GAUGE, &labels, &inverter.output_voltage),
            DeviceKind::Energy => {
                set(&OUTPUT_POWER_GAUGE, &labels, &inverter.output_power);
                set(&ENERGY_TOTAL_GAUGE, &labels, &inverter.energy_total);
            }
        }
    }
}

/// Read metrics from Prometheus exporter registry.
pub fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::FormatError))?;
    String::from_utf8(buffer).or(Err(Error::FormatError))
}

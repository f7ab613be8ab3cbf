use serde::Serialize;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::api::Error;
use crate::model::Inverter;

/// Host device identifier; the host only has room for `u8` units and unit 0
/// is never handed out.
pub type Unit = u8;

/// Number of consecutive units reserved for one inverter.
pub const CHANNELS_PER_INVERTER: Unit = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceKind {
    Temperature,
    Current,
    Voltage,
    Energy,
}

impl DeviceKind {
    /// Channel order within an inverter's block of units.
    pub const ALL: [DeviceKind; 4] = [
        DeviceKind::Temperature,
        DeviceKind::Current,
        DeviceKind::Voltage,
        DeviceKind::Energy,
    ];

    /// Host (type, subtype) of the device.
    pub fn host_type(&self) -> (u8, u8) {
        match self {
            DeviceKind::Temperature => (80, 5),
            DeviceKind::Current => (243, 23),
            DeviceKind::Voltage => (243, 8),
            DeviceKind::Energy => (243, 29),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            DeviceKind::Temperature => "temperature",
            DeviceKind::Current => "output current",
            DeviceKind::Voltage => "output voltage",
            DeviceKind::Energy => "output power",
        }
    }

    pub fn name(&self, serial: &str) -> String {
        format!("Solar inverter {} (SN: {})", self.label(), serial)
    }

    /// `sValue` of this channel taken from the inverter's readings.
    pub fn s_value(&self, inverter: &Inverter) -> String {
        match self {
            DeviceKind::Temperature => inverter.temperature.to_string(),
            DeviceKind::Current => inverter.output_current.to_string(),
            DeviceKind::Voltage => inverter.output_voltage.to_string(),
            DeviceKind::Energy => {
                format!("{};{}", inverter.output_power, inverter.energy_total)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub unit: Unit,
    /// Serial number of the inverter the channel belongs to.
    pub device_id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub n_value: i64,
    pub s_value: String,
}

/// Device primitives offered by the home-automation host.
pub trait DeviceHost {
    /// Lowest unit registered for `device_id`.
    fn find(&self, device_id: &str) -> Option<Unit>;
    fn highest_unit(&self) -> Option<Unit>;
    fn create(&mut self, device: Device) -> Result<(), Error>;
    fn update(&mut self, unit: Unit, n_value: i64, s_value: String) -> Result<(), Error>;
}

/// In-memory device table keyed by unit.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<Unit, Device>,
}

impl DeviceRegistry {
    pub fn get(&self, unit: Unit) -> Option<&Device> {
        self.devices.get(&unit)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceHost for DeviceRegistry {
    fn find(&self, device_id: &str) -> Option<Unit> {
        self.devices
            .values()
            .find(|device| device.device_id == device_id)
            .map(|device| device.unit)
    }

    fn highest_unit(&self) -> Option<Unit> {
        self.devices.keys().next_back().copied()
    }

    fn create(&mut self, device: Device) -> Result<(), Error> {
        if self.devices.contains_key(&device.unit) {
            return Err(Error::InternalError);
        }
        self.devices.insert(device.unit, device);
        Ok(())
    }

    fn update(&mut self, unit: Unit, n_value: i64, s_value: String) -> Result<(), Error> {
        let device = self.devices.get_mut(&unit).ok_or(Error::InternalError)?;
        device.n_value = n_value;
        device.s_value = s_value;
        Ok(())
    }
}

/// Registry shared between the polling session and the HTTP routes.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry(Arc<Mutex<DeviceRegistry>>);

impl SharedRegistry {
    /// Run `f` against the locked registry.
    pub fn with<T>(&self, f: impl FnOnce(&DeviceRegistry) -> T) -> Result<T, Error> {
        self.0
            .lock()
            .map(|registry| f(&registry))
            .or(Err(Error::InternalError))
    }

    fn with_mut<T>(
        &self,
        f: impl FnOnce(&mut DeviceRegistry) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut registry = self.0.lock().or(Err(Error::InternalError))?;
        f(&mut registry)
    }
}

impl DeviceHost for SharedRegistry {
    fn find(&self, device_id: &str) -> Option<Unit> {
        self.with(|registry| registry.find(device_id)).ok().flatten()
    }

    fn highest_unit(&self) -> Option<Unit> {
        self.with(DeviceRegistry::highest_unit).ok().flatten()
    }

    fn create(&mut self, device: Device) -> Result<(), Error> {
        self.with_mut(|registry| registry.create(device))
    }

    fn update(&mut self, unit: Unit, n_value: i64, s_value: String) -> Result<(), Error> {
        self.with_mut(|registry| registry.update(unit, n_value, s_value))
    }
}

/// First unit of the block belonging to `serial`, creating the four channels
/// right after the highest unit in use when the serial is new.
pub fn ensure_channels<H: DeviceHost>(host: &mut H, serial: &str) -> Result<Unit, Error> {
    if let Some(base) = host.find(serial) {
        return Ok(base);
    }

    let base = match host.highest_unit() {
        Some(unit) => unit.checked_add(1),
        None => Some(1),
    }
    .filter(|base| base.checked_add(CHANNELS_PER_INVERTER - 1).is_some())
    .ok_or_else(|| Error::UnitsExhausted(serial.to_string()))?;

    for (offset, kind) in (0..).zip(DeviceKind::ALL.iter()) {
        host.create(Device {
            unit: base + offset,
            device_id: serial.to_string(),
            name: kind.name(serial),
            kind: *kind,
            n_value: 0,
            s_value: String::new(),
        })?;
    }
    log::info!("Devices created for GoodWe inverter (SN: {})", serial);

    Ok(base)
}

/// Push the inverter's readings into its four channels.
pub fn publish<H: DeviceHost>(host: &mut H, inverter: &Inverter) -> Result<Unit, Error> {
    let base = ensure_channels(host, &inverter.serial)?;
    for (offset, kind) in (0..).zip(DeviceKind::ALL.iter()) {
        host.update(base + offset, 0, kind.s_value(inverter))?;
    }
    Ok(base)
}

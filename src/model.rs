use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use std::fmt;
use std::str::FromStr;

use crate::api::Error;

/// SEMS portal regions selectable in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Europe,
    Australia,
    Global,
}

impl Region {
    pub fn host(&self) -> &'static str {
        match self {
            Region::Europe => "eu.goodwe-power.com",
            Region::Australia => "au.goodwe-power.com",
            Region::Global => "www.goodwe-power.com",
        }
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "europe" | "eu" => Ok(Region::Europe),
            "australia" | "au" => Ok(Region::Australia),
            "global" | "www" => Ok(Region::Global),
            _ => Err(Error::UnknownRegion(s.to_string())),
        }
    }
}

/// Everything the session needs to reach the portal and authenticate.
#[derive(Debug, Clone)]
pub struct Api {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Single station to poll instead of listing all stations of the account.
    pub station_id: Option<String>,
}

impl Api {
    /// `address:port`, as sent in the `Host` header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Credential structure returned by `CrossLogin`.
///
/// Fields the portal adds beyond the known ones are kept in `extra` so the
/// `token` header carries the structure exactly as it was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub language: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AuthToken {
    /// Anonymous token sent with the login request.
    fn default() -> Self {
        AuthToken {
            uid: String::new(),
            timestamp: 0,
            token: String::new(),
            client: String::from("web"),
            version: String::new(),
            language: String::from("en-GB"),
            extra: Map::new(),
        }
    }
}

/// One reading as reported by the portal: a bare number, a string which
/// may carry a unit suffix (`"1.2A"`), or `null` from an inverter that is
/// offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Number(Number),
    Text(String),
    Null,
}

impl Reading {
    /// Numeric value, taking the leading number of textual readings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Number(n) => n.as_f64(),
            Reading::Text(s) => leading_number(s),
            Reading::Null => None,
        }
    }
}

/// Number at the start of `s`, ignoring a trailing unit such as `"W"`.
pub fn leading_number(s: &str) -> Option<f64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && c == '-')))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Number(n) => write!(f, "{}", n),
            Reading::Text(s) => f.write_str(s),
            Reading::Null => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inverter {
    pub serial: String,
    pub temperature: Reading,
    pub output_current: Reading,
    pub output_voltage: Reading,
    pub output_power: Reading,
    pub energy_total: Reading,
}

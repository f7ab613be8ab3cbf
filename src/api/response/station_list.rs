use serde::Deserialize;

#[derive(Deserialize)]
pub struct Data {
    pub id: String,
    #[serde(default)]
    pub stationname: Option<String>,
}

#[derive(Deserialize)]
pub struct QueryPowerStationByHistory {
    pub list: Vec<Data>,
}

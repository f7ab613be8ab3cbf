pub mod cross_login;
pub mod station_detail;
pub mod station_list;

use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Default)]
pub struct Components {
    #[serde(default)]
    pub api: Option<String>,
}

/* Envelope shared by every SEMS response; `data` is `null` when the portal has nothing to say */
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemsApiResponse {
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub components: Components,
}

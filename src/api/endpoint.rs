pub type Endpoint = str;

pub const CROSS_LOGIN: &Endpoint = "/api/v2/Common/CrossLogin";
pub const STATION_LIST: &Endpoint = "/api/v2/HistoryData/QueryPowerStationByHistory";
pub const STATION_DETAIL: &Endpoint = "/api/v2/PowerStation/GetMonitorDetailByPowerstationId";

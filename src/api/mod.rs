pub mod endpoint;
pub mod error;
pub mod response;

use crate::model;
pub use error::Error;
use http::header::{HeaderMap, HeaderValue};
use http::header::{ACCEPT, CONNECTION, CONTENT_TYPE, HOST, USER_AGENT};
use http::StatusCode;
use response::station_detail::GetMonitorDetailByPowerstationId;
use response::station_list::QueryPowerStationByHistory;
use response::SemsApiResponse;
use serde_json::{json, Value};

const TOKEN: &str = "token";
const USER_AGENT_VALUE: &str = concat!("sems-rs/", env!("CARGO_PKG_VERSION"));

/// What an in-flight request asked for. Travels with the request and comes
/// back with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Login,
    StationList,
    StationDetail,
}

impl RequestKind {
    pub fn endpoint(&self) -> &'static endpoint::Endpoint {
        match self {
            RequestKind::Login => endpoint::CROSS_LOGIN,
            RequestKind::StationList => endpoint::STATION_LIST,
            RequestKind::StationDetail => endpoint::STATION_DETAIL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub kind: RequestKind,
    pub body: String,
    pub headers: HeaderMap,
}

impl ApiRequest {
    pub fn path(&self) -> &'static endpoint::Endpoint {
        self.kind.endpoint()
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub kind: RequestKind,
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Moved,
    BadRequest,
    ServerError,
    Unknown,
}

impl StatusClass {
    pub fn of(status: StatusCode) -> StatusClass {
        if status.is_redirection() {
            StatusClass::Moved
        } else if status.is_client_error() {
            StatusClass::BadRequest
        } else if status.is_server_error() {
            StatusClass::ServerError
        } else {
            StatusClass::Unknown
        }
    }
}

/// Only `200 OK` carries a payload worth parsing; anything else is mapped
/// to `Error::Http` with its class.
pub fn check_status(status: StatusCode) -> Result<(), Error> {
    if status == StatusCode::OK {
        Ok(())
    } else {
        Err(Error::Http(StatusClass::of(status), status.as_u16()))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader(format!("{}: {}", value, e)))
}

/// Header block sent with every call, `token` included.
fn headers(api: &model::Api, token: &model::AuthToken) -> Result<HeaderMap, Error> {
    let token = serde_json::to_string(token).or(Err(Error::FormatError))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("Content-Type: application/json; charset=UTF-8"),
    );
    headers.insert(HOST, header_value(&api.authority())?);
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    headers.insert(TOKEN, header_value(&token)?);
    Ok(headers)
}

fn request(
    api: &model::Api,
    token: &model::AuthToken,
    kind: RequestKind,
    body: Value,
) -> Result<ApiRequest, Error> {
    Ok(ApiRequest {
        kind,
        body: body.to_string(),
        headers: headers(api, token)?,
    })
}

pub fn login_request(api: &model::Api, token: &model::AuthToken) -> Result<ApiRequest, Error> {
    let body = json!({
        "account": api.username,
        "pwd": api.password,
        "is_local": true,
        "agreement_agreement": 1,
    });
    request(api, token, RequestKind::Login, body)
}

pub fn station_list_request(
    api: &model::Api,
    token: &model::AuthToken,
) -> Result<ApiRequest, Error> {
    request(api, token, RequestKind::StationList, json!({}))
}

pub fn station_detail_request(
    api: &model::Api,
    token: &model::AuthToken,
    station_id: &str,
) -> Result<ApiRequest, Error> {
    let body = json!({ "powerStationId": station_id });
    request(api, token, RequestKind::StationDetail, body)
}

/// Parse the common envelope and make sure it answers the request it claims to.
fn envelope(response: &HttpResponse) -> Result<SemsApiResponse, Error> {
    log::trace!(
        "endpoint: {}, response_text: {}",
        response.kind.endpoint(),
        response.body
    );

    let envelope = serde_json::from_str::<SemsApiResponse>(&response.body)
        .map_err(|e| Error::MalformedPayload(e.to_string(), response.body.to_owned()))?;

    if let Some(api) = &envelope.components.api {
        if !api.contains(response.kind.endpoint()) {
            return Err(Error::UnexpectedApiResponse(format!(
                "expected {}, got {}",
                response.kind.endpoint(),
                api
            )));
        }
    }

    if envelope.has_error {
        log::warn!(
            "GoodWe SEMS API reported an error (code {}): {}",
            envelope.code,
            envelope.msg.as_deref().unwrap_or("(no error message received)")
        );
    }

    Ok(envelope)
}

fn data<T: serde::de::DeserializeOwned>(data: Value, body: &str) -> Result<T, Error> {
    serde_json::from_value::<T>(data)
        .map_err(|e| Error::MalformedPayload(e.to_string(), body.to_owned()))
}

pub fn parse_login(response: &HttpResponse) -> Result<model::AuthToken, Error> {
    let envelope = envelope(response)?;
    if envelope.data.is_null() {
        return Err(Error::MalformedPayload(
            String::from("no token in login response"),
            response.body.to_owned(),
        ));
    }
    data::<response::cross_login::CrossLogin>(envelope.data, &response.body)
}

pub fn parse_station_list(response: &HttpResponse) -> Result<Vec<model::Station>, Error> {
    let envelope = envelope(response)?;
    let list = data::<QueryPowerStationByHistory>(envelope.data, &response.body)?;

    Ok(list
        .list
        .into_iter()
        .map(|station| model::Station {
            id: station.id,
            name: station.stationname,
        })
        .collect())
}

/// Inverters of one station. A `null` payload is the portal's way of saying
/// the token is no longer good for anything.
pub fn parse_station_detail(response: &HttpResponse) -> Result<Vec<model::Inverter>, Error> {
    let envelope = envelope(response)?;
    if envelope.data.is_null() {
        return Err(Error::EmptyStationData);
    }
    let detail = data::<GetMonitorDetailByPowerstationId>(envelope.data, &response.body)?;

    Ok(detail
        .inverter
        .into_iter()
        .map(|inverter| model::Inverter {
            serial: inverter.sn,
            temperature: inverter.tempperature,
            output_current: inverter.output_current,
            output_voltage: inverter.output_voltage,
            output_power: inverter.output_power,
            energy_total: inverter.etotal,
        })
        .collect())
}

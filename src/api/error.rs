use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::fmt;
use std::io::Cursor;

use super::StatusClass;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ConnectFailure(String),
    Http(StatusClass, u16),
    EmptyStationData,
    /* (parse error, response body) */
    MalformedPayload(String, String),
    UnexpectedApiResponse(String),
    UnitsExhausted(String),
    InvalidHeader(String),
    UnknownRegion(String),
    FormatError,
    InternalError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectFailure(s) => write!(f, "connection failed: {}", s),
            Error::Http(StatusClass::Moved, _) => {
                write!(f, "GoodWe SEMS API returned a Page Moved Error.")
            }
            Error::Http(StatusClass::BadRequest, _) => {
                write!(f, "GoodWe SEMS API returned a Bad Request Error.")
            }
            Error::Http(StatusClass::ServerError, _) => {
                write!(f, "GoodWe SEMS API returned a Server Error.")
            }
            Error::Http(_, code) => write!(f, "GoodWe SEMS API returned a status: {}", code),
            Error::EmptyStationData => write!(f, "no station data in response"),
            Error::MalformedPayload(e, body) => write!(f, "malformed payload ({}): {}", e, body),
            Error::UnexpectedApiResponse(s) => write!(f, "unexpected API response: {}", s),
            Error::UnitsExhausted(sn) => {
                write!(f, "no free device units left for inverter {}", sn)
            }
            Error::InvalidHeader(s) => write!(f, "invalid request header: {}", s),
            Error::UnknownRegion(s) => write!(f, "unknown SEMS region: {}", s),
            Error::FormatError => write!(f, "format error"),
            Error::InternalError => write!(f, "internal error"),
        }
    }
}

impl std::error::Error for Error {}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let error = format!(
            "<html><body><h3>Internal error</h3><code>{}</code></body></html>",
            self
        );
        Response::build()
            .status(Status::InternalServerError)
            .sized_body(error.len(), Cursor::new(error))
            .header(ContentType::new("text", "html"))
            .ok()
    }
}

use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;

use std::time::Duration;

use crate::api::{ApiRequest, Error, HttpResponse};

/// Notifications delivered back to the session by the networking layer.
#[derive(Debug, Clone)]
pub enum Event {
    /// Outcome of `Transport::connect`; the error carries a description.
    Connected(Result<(), String>),
    Message(HttpResponse),
    Disconnected,
}

/// Asynchronous connection capability the session drives. Calls return at
/// once; their outcome arrives later as an `Event`.
pub trait Transport {
    fn connect(&mut self);
    fn send(&mut self, request: ApiRequest);
    fn disconnect(&mut self);
}

/// `Transport` over plain HTTP to the SEMS portal.
pub struct HttpTransport {
    address: String,
    port: u16,
    timeout: Duration,
    client: reqwest::Client,
    events: UnboundedSender<Event>,
}

impl HttpTransport {
    pub fn new(
        address: String,
        port: u16,
        timeout: Duration,
        events: UnboundedSender<Event>,
    ) -> Result<HttpTransport, Error> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(timeout)
            .timeout(timeout)
            .pool_max_idle_per_host(1)
            .build()
            .or(Err(Error::InternalError))?;

        Ok(HttpTransport {
            address,
            port,
            timeout,
            client,
            events,
        })
    }

    fn notify(events: &UnboundedSender<Event>, event: Event) {
        if events.send(event).is_err() {
            log::debug!("session is gone, dropping transport event");
        }
    }
}

impl Transport for HttpTransport {
    /// Open (and release) a TCP connection to the portal to learn whether it
    /// is reachable; reqwest keeps its own connection for the requests.
    fn connect(&mut self) {
        let events = self.events.clone();
        let address = self.address.clone();
        let port = self.port;
        let timeout = self.timeout;

        tokio::spawn(async move {
            let connecting = TcpStream::connect((address.as_str(), port));
            let status = match tokio::time::timeout(timeout, connecting).await {
                Ok(Ok(_stream)) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
            };
            HttpTransport::notify(&events, Event::Connected(status));
        });
    }

    fn send(&mut self, request: ApiRequest) {
        let events = self.events.clone();
        let url = format!("http://{}:{}{}", self.address, self.port, request.path());

        log::debug!("POST {} {}", url, request.body);

        let pending = self
            .client
            .post(url)
            .headers(request.headers)
            .body(request.body)
            .send();
        let kind = request.kind;

        tokio::spawn(async move {
            let event = match pending.await {
                Ok(response) => {
                    let status = response.status();
                    match response.text().await {
                        Ok(body) => Event::Message(HttpResponse { kind, status, body }),
                        Err(e) => {
                            log::warn!("Error reading API response: {}", e);
                            Event::Disconnected
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Request to {} failed: {}", kind.endpoint(), e);
                    Event::Disconnected
                }
            };
            HttpTransport::notify(&events, event);
        });
    }

    fn disconnect(&mut self) {
        HttpTransport::notify(&self.events, Event::Disconnected);
    }
}

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use std::time::Duration;

use crate::api::{self, ApiRequest, Error, HttpResponse, RequestKind, StatusClass};
use crate::host::{self, DeviceHost};
use crate::metrics;
use crate::model::{Api, AuthToken};
use crate::transport::{Event, Transport};

/// Heartbeats to wait before an idle session connects again.
pub const RUN_AGAIN: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    AwaitingLogin,
    AwaitingStationList,
    /// Index into the station list of the station being polled.
    AwaitingStationDetail(usize),
    Disconnecting,
}

impl State {
    /// Kind of response this state is waiting for.
    fn awaits(&self) -> Option<RequestKind> {
        match self {
            State::AwaitingLogin => Some(RequestKind::Login),
            State::AwaitingStationList => Some(RequestKind::StationList),
            State::AwaitingStationDetail(_) => Some(RequestKind::StationDetail),
            _ => None,
        }
    }
}

/// Login → station list → station detail walk against the SEMS portal,
/// re-entered on every heartbeat countdown.
pub struct PollingSession<T: Transport, H: DeviceHost> {
    api: Api,
    transport: T,
    host: H,
    state: State,
    /// Token of the last login. Kept for the rest of the pass even once it is
    /// known to be stale; `token_valid` decides whether the next pass logs in.
    token: Option<AuthToken>,
    token_valid: bool,
    stations: Vec<String>,
    run_again: u32,
    heartbeats: u32,
    /// Alive heartbeats since the last state change.
    stalled: u32,
}

impl<T: Transport, H: DeviceHost> PollingSession<T, H> {
    pub fn new(api: Api, transport: T, host: H, heartbeats: u32) -> Self {
        let heartbeats = heartbeats.max(1);
        PollingSession {
            api,
            transport,
            host,
            state: State::Idle,
            token: None,
            token_valid: false,
            stations: Vec::new(),
            run_again: heartbeats,
            heartbeats,
            stalled: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stations(&self) -> &[String] {
        &self.stations
    }

    pub fn has_valid_token(&self) -> bool {
        self.token_valid && self.token.is_some()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// A connection is open or being opened.
    pub fn is_alive(&self) -> bool {
        self.state != State::Idle
    }

    pub fn start(&mut self) {
        self.connect();
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Connected(status) => self.on_connect(status),
            Event::Message(response) => self.on_message(response),
            Event::Disconnected => self.on_disconnect(),
        }
    }

    /// Counts down to the next connection attempt while idle. While alive,
    /// a session that made no progress for `run_again` heartbeats (after a
    /// non-200 response, say) drops its connection so the countdown resumes.
    pub fn on_heartbeat(&mut self) {
        if self.is_alive() {
            self.stalled += 1;
            if self.stalled < self.heartbeats {
                debug!("onHeartbeat called, Connection is alive.");
                return;
            }

            warn!(
                "No progress while {:?} for {} heartbeats, dropping connection.",
                self.state, self.stalled
            );
            if self.state == State::Disconnecting {
                self.on_disconnect();
            } else {
                self.finish_pass();
            }
            return;
        }

        self.run_again = self.run_again.saturating_sub(1);
        if self.run_again == 0 {
            self.connect();
        } else {
            debug!(
                "onHeartbeat called, run again in {} heartbeats.",
                self.run_again
            );
        }
    }

    pub fn on_connect(&mut self, status: Result<(), String>) {
        if self.state != State::Connecting {
            warn!("Ignoring connect notification while {:?}", self.state);
            return;
        }

        match status {
            Err(description) => {
                let e = Error::ConnectFailure(description);
                error!("Failed to connect to {}: {}", self.api.authority(), e);
                self.enter(State::Idle);
            }
            Ok(()) => {
                debug!("Connected to SEMS portal API successfully.");
                if self.has_valid_token() {
                    self.request_station_detail(0);
                } else {
                    self.stations.clear();
                    self.login();
                }
            }
        }
    }

    pub fn on_message(&mut self, response: HttpResponse) {
        if let Err(e) = api::check_status(response.status) {
            match e {
                Error::Http(StatusClass::Moved, _) => warn!("{}", e),
                _ => error!("{}", e),
            }
            return;
        }

        if self.state.awaits() != Some(response.kind) {
            warn!(
                "Ignoring response from {} while {:?}",
                response.kind.endpoint(),
                self.state
            );
            return;
        }

        match self.state {
            State::AwaitingLogin => self.on_login(&response),
            State::AwaitingStationList => self.on_station_list(&response),
            State::AwaitingStationDetail(index) => self.on_station_detail(index, &response),
            _ => {}
        }
    }

    pub fn on_disconnect(&mut self) {
        info!("Disconnected from {}", self.api.authority());
        self.enter(State::Idle);
    }

    fn on_login(&mut self, response: &HttpResponse) {
        match api::parse_login(response) {
            Ok(token) => {
                info!("SEMS API token received");
                debug!("SEMS API Token: {:?}", token);
                self.token = Some(token);
                self.token_valid = true;

                match self.api.station_id.clone().filter(|id| !id.is_empty()) {
                    Some(id) => {
                        self.stations = vec![id];
                        self.request_station_detail(0);
                    }
                    None => self.request_station_list(),
                }
            }
            Err(e) => {
                error!("Login to GoodWe SEMS API failed: {}", e);
                self.token = None;
                self.token_valid = false;
                self.finish_pass();
            }
        }
    }

    fn on_station_list(&mut self, response: &HttpResponse) {
        match api::parse_station_list(response) {
            Ok(stations) => {
                for station in &stations {
                    match &station.name {
                        Some(name) => info!("Station found: {} ({})", station.id, name),
                        None => info!("Station found: {}", station.id),
                    }
                }
                self.stations = stations.into_iter().map(|station| station.id).collect();
                self.request_station_detail(0);
            }
            Err(e) => {
                error!("Unable to read station list: {}", e);
                self.token_valid = false;
                self.finish_pass();
            }
        }
    }

    fn on_station_detail(&mut self, index: usize, response: &HttpResponse) {
        let station = self.stations.get(index).cloned().unwrap_or_default();

        match api::parse_station_detail(response) {
            Ok(inverters) => {
                info!(
                    "Station data received from GoodWe SEMS API (Station ID: {})",
                    station
                );
                for inverter in &inverters {
                    match host::publish(&mut self.host, inverter) {
                        Ok(base) => metrics::record(inverter, base),
                        Err(e) => error!(
                            "Unable to update devices of inverter {}: {}",
                            inverter.serial, e
                        ),
                    }
                }
            }
            Err(e) => {
                if e != Error::EmptyStationData {
                    warn!("{}", e);
                }
                warn!(
                    "No station data received from GoodWe SEMS API (Station ID: {})",
                    station
                );
                self.token_valid = false;
            }
        }

        if index + 1 >= self.stations.len() {
            self.finish_pass();
        } else {
            info!(
                "Retrieving next station data (ID: {})",
                self.stations[index + 1]
            );
            self.request_station_detail(index + 1);
        }
    }

    fn enter(&mut self, state: State) {
        self.state = state;
        self.stalled = 0;
    }

    fn connect(&mut self) {
        info!("Connecting to SEMS portal API at {}", self.api.authority());
        self.run_again = self.heartbeats;
        self.enter(State::Connecting);
        self.transport.connect();
    }

    fn send(&mut self, request: Result<ApiRequest, Error>, next: State) {
        match request {
            Ok(request) => {
                self.enter(next);
                self.transport.send(request);
            }
            Err(e) => {
                error!("Unable to build request: {}", e);
                self.finish_pass();
            }
        }
    }

    fn login(&mut self) {
        let request = api::login_request(&self.api, &AuthToken::default());
        self.send(request, State::AwaitingLogin);
    }

    fn request_station_list(&mut self) {
        let token = self.token.clone().unwrap_or_default();
        let request = api::station_list_request(&self.api, &token);
        self.send(request, State::AwaitingStationList);
    }

    fn request_station_detail(&mut self, index: usize) {
        let token = self.token.clone().unwrap_or_default();
        let request = match self.stations.get(index) {
            Some(id) => api::station_detail_request(&self.api, &token, id),
            None => {
                info!("No stations to poll.");
                self.finish_pass();
                return;
            }
        };
        self.send(request, State::AwaitingStationDetail(index));
    }

    fn finish_pass(&mut self) {
        info!("Disconnecting and dropping connection.");
        self.enter(State::Disconnecting);
        self.transport.disconnect();
    }

    /// Drive the session from heartbeat ticks and transport events until the
    /// event channel closes.
    pub async fn run(mut self, mut events: UnboundedReceiver<Event>, heartbeat: Duration) {
        self.start();

        let mut ticker = tokio::time::interval(heartbeat);
        /* first tick completes immediately */
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_heartbeat(),
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        info!("Transport event channel closed, polling stopped.");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host::DeviceRegistry;
    use http::StatusCode;
    use serde_json::{json, Value};
    use std::fs;
    use std::path::PathBuf;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Connect,
        Send(RequestKind, String),
        Disconnect,
    }

    #[derive(Default)]
    struct RecordingTransport {
        calls: Vec<Call>,
    }

    impl Transport for RecordingTransport {
        fn connect(&mut self) {
            self.calls.push(Call::Connect);
        }

        fn send(&mut self, request: ApiRequest) {
            self.calls.push(Call::Send(request.kind, request.body));
        }

        fn disconnect(&mut self) {
            self.calls.push(Call::Disconnect);
        }
    }

    type TestSession = PollingSession<RecordingTransport, DeviceRegistry>;

    fn read_resource(filename: &str) -> String {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        fs::read_to_string(d.as_path()).unwrap()
    }

    fn session(station_id: Option<&str>) -> TestSession {
        let api = Api {
            address: String::from("www.goodwe-power.com"),
            port: 82,
            username: String::from("someone@example.com"),
            password: String::from("secret"),
            station_id: station_id.map(String::from),
        };
        PollingSession::new(
            api,
            RecordingTransport::default(),
            DeviceRegistry::default(),
            RUN_AGAIN,
        )
    }

    fn ok(kind: RequestKind, body: String) -> Event {
        Event::Message(HttpResponse {
            kind,
            status: StatusCode::OK,
            body,
        })
    }

    fn login_ok() -> Event {
        ok(RequestKind::Login, read_resource("crossLogin.json"))
    }

    fn station_list(ids: &[&str]) -> Event {
        let list: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        ok(
            RequestKind::StationList,
            json!({ "hasError": false, "data": { "list": list } }).to_string(),
        )
    }

    fn detail(serials: &[&str]) -> Event {
        let inverters: Vec<Value> = serials
            .iter()
            .map(|sn| {
                json!({
                    "sn": sn,
                    "tempperature": 42,
                    "output_current": 1.2,
                    "output_voltage": 230.5,
                    "output_power": 300,
                    "etotal": 1500
                })
            })
            .collect();
        ok(
            RequestKind::StationDetail,
            json!({ "data": { "inverter": inverters } }).to_string(),
        )
    }

    fn detail_null() -> Event {
        ok(
            RequestKind::StationDetail,
            read_resource("getMonitorDetailByPowerstationId_null.json"),
        )
    }

    fn calls(session: &TestSession) -> &[Call] {
        &session.transport().calls
    }

    fn detail_requests(session: &TestSession) -> Vec<String> {
        calls(session)
            .iter()
            .filter_map(|call| match call {
                Call::Send(RequestKind::StationDetail, body) => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(session: &TestSession, wanted: &Call) -> usize {
        calls(session).iter().filter(|call| *call == wanted).count()
    }

    /// Start a session and walk it up to the station list response.
    fn logged_in(station_id: Option<&str>) -> TestSession {
        let mut session = session(station_id);
        session.start();
        session.handle(Event::Connected(Ok(())));
        session.handle(login_ok());
        session
    }

    /// Heartbeat until the countdown fires a new connection attempt.
    fn next_cycle(session: &mut TestSession) {
        for _ in 0..RUN_AGAIN {
            session.on_heartbeat();
        }
        assert_eq!(State::Connecting, session.state());
        session.handle(Event::Connected(Ok(())));
    }

    #[test]
    fn full_pass_visits_every_station_once_in_order() {
        let mut session = logged_in(None);
        assert_eq!(State::AwaitingStationList, session.state());

        session.handle(station_list(&["a", "b", "c"]));
        for expected in 0..3 {
            assert_eq!(State::AwaitingStationDetail(expected), session.state());
            session.handle(detail(&["X1"]));
        }

        assert_eq!(
            vec![
                r#"{"powerStationId":"a"}"#,
                r#"{"powerStationId":"b"}"#,
                r#"{"powerStationId":"c"}"#
            ],
            detail_requests(&session)
        );
        assert_eq!(Some(&Call::Disconnect), calls(&session).last());
        assert_eq!(State::Disconnecting, session.state());

        session.handle(Event::Disconnected);
        assert_eq!(State::Idle, session.state());
    }

    #[test]
    fn empty_station_list_disconnects_without_detail_requests() {
        let mut session = logged_in(None);
        session.handle(station_list(&[]));

        assert!(detail_requests(&session).is_empty());
        assert_eq!(Some(&Call::Disconnect), calls(&session).last());
        assert_eq!(State::Disconnecting, session.state());
    }

    #[test]
    fn configured_station_skips_station_list() {
        let session = logged_in(Some("only-one"));

        assert_eq!(
            0,
            count(&session, &Call::Send(RequestKind::StationList, String::from("{}")))
        );
        assert_eq!(State::AwaitingStationDetail(0), session.state());
        assert_eq!(["only-one"], session.stations());
    }

    #[test]
    fn empty_configured_station_lists_stations() {
        let session = logged_in(Some(""));

        assert_eq!(
            1,
            count(&session, &Call::Send(RequestKind::StationList, String::from("{}")))
        );
        assert_eq!(State::AwaitingStationList, session.state());
    }

    #[test]
    fn login_request_precedes_station_list() {
        let session = logged_in(None);

        assert_eq!(
            vec![
                RequestKind::Login,
                RequestKind::StationList
            ],
            calls(&session)
                .iter()
                .filter_map(|call| match call {
                    Call::Send(kind, _) => Some(*kind),
                    _ => None,
                })
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn valid_token_is_reused_on_next_cycle() {
        let mut session = logged_in(None);
        session.handle(station_list(&["a"]));
        session.handle(detail(&["X1"]));
        session.handle(Event::Disconnected);
        assert!(session.has_valid_token());

        next_cycle(&mut session);

        let logins = calls(&session)
            .iter()
            .filter(|call| matches!(call, Call::Send(RequestKind::Login, _)))
            .count();
        assert_eq!(1, logins);
        assert_eq!(State::AwaitingStationDetail(0), session.state());
        assert_eq!(2, detail_requests(&session).len());
    }

    #[test]
    fn empty_station_data_forces_login_on_next_cycle() {
        let mut session = logged_in(None);
        session.handle(station_list(&["a", "b"]));
        session.handle(detail_null());

        /* the pass still goes on to the next station */
        assert!(!session.has_valid_token());
        assert_eq!(State::AwaitingStationDetail(1), session.state());

        session.handle(detail(&["X1"]));
        session.handle(Event::Disconnected);

        next_cycle(&mut session);

        assert_eq!(State::AwaitingLogin, session.state());
        assert!(matches!(
            calls(&session).last(),
            Some(Call::Send(RequestKind::Login, _))
        ));
        assert!(session.stations().is_empty());
    }

    #[test]
    fn malformed_station_data_is_treated_as_empty() {
        let mut session = logged_in(Some("a"));
        session.handle(ok(
            RequestKind::StationDetail,
            String::from(r#"{"data":{"inverter":[{"sn":"X1"}]}}"#),
        ));

        assert!(!session.has_valid_token());
        assert!(session.host().is_empty());
        assert_eq!(State::Disconnecting, session.state());
    }

    #[test]
    fn fixed_payload_updates_four_channels() {
        let mut session = logged_in(Some("a"));
        session.handle(ok(
            RequestKind::StationDetail,
            String::from(r#"{"data":{"inverter":[{"sn":"X1","tempperature":42,"output_current":1.2,"output_voltage":230.5,"output_power":300,"etotal":1500}]}}"#),
        ));

        let values: Vec<(u8, &str, &str)> = session
            .host()
            .devices()
            .map(|d| (d.unit, d.device_id.as_str(), d.s_value.as_str()))
            .collect();
        assert_eq!(
            vec![
                (1, "X1", "42"),
                (2, "X1", "1.2"),
                (3, "X1", "230.5"),
                (4, "X1", "300;1500")
            ],
            values
        );
    }

    #[test]
    fn serial_numbers_keep_their_units_across_passes() {
        let mut session = logged_in(None);
        session.handle(station_list(&["a", "b"]));
        session.handle(detail(&["X1", "X2"]));
        session.handle(detail(&["X3"]));
        session.handle(Event::Disconnected);
        assert_eq!(12, session.host().len());

        next_cycle(&mut session);
        session.handle(detail(&["X3", "X1"]));
        session.handle(detail(&["X2"]));

        let registry = session.host();
        assert_eq!(12, registry.len());
        assert_eq!(Some(1), registry.find("X1"));
        assert_eq!(Some(5), registry.find("X2"));
        assert_eq!(Some(9), registry.find("X3"));
    }

    #[test]
    fn non_200_leaves_state_unchanged() {
        let mut session = session(None);
        session.start();
        session.handle(Event::Connected(Ok(())));
        let before = calls(&session).len();

        for status in [302u16, 400, 500, 418].iter() {
            session.handle(Event::Message(HttpResponse {
                kind: RequestKind::Login,
                status: StatusCode::from_u16(*status).unwrap(),
                body: String::new(),
            }));
            assert_eq!(State::AwaitingLogin, session.state());
        }
        assert_eq!(before, calls(&session).len());
    }

    #[test]
    fn non_200_pass_recovers_after_heartbeats() {
        let mut session = session(None);
        session.start();
        session.handle(Event::Connected(Ok(())));
        session.handle(Event::Message(HttpResponse {
            kind: RequestKind::Login,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        }));

        for _ in 0..(RUN_AGAIN - 1) {
            session.on_heartbeat();
        }
        assert_eq!(State::AwaitingLogin, session.state());
        assert_eq!(0, count(&session, &Call::Disconnect));

        session.on_heartbeat();
        assert_eq!(State::Disconnecting, session.state());
        assert_eq!(1, count(&session, &Call::Disconnect));
        session.handle(Event::Disconnected);

        next_cycle(&mut session);
        assert_eq!(2, count(&session, &Call::Connect));
        assert_eq!(State::AwaitingLogin, session.state());
        let logins = calls(&session)
            .iter()
            .filter(|call| matches!(call, Call::Send(RequestKind::Login, _)))
            .count();
        assert_eq!(2, logins);
    }

    #[test]
    fn progress_resets_stall_count() {
        let mut session = logged_in(None);
        session.handle(station_list(&["a", "b"]));
        for _ in 0..(RUN_AGAIN - 1) {
            session.on_heartbeat();
        }
        session.handle(detail(&["X1"]));
        for _ in 0..(RUN_AGAIN - 1) {
            session.on_heartbeat();
        }

        assert_eq!(State::AwaitingStationDetail(1), session.state());
        assert_eq!(0, count(&session, &Call::Disconnect));
    }

    #[test]
    fn lost_disconnect_notification_returns_to_idle() {
        let mut session = logged_in(None);
        session.handle(station_list(&[]));
        assert_eq!(State::Disconnecting, session.state());

        for _ in 0..RUN_AGAIN {
            session.on_heartbeat();
        }
        assert_eq!(State::Idle, session.state());
    }

    #[test]
    fn null_reading_keeps_the_rest_of_the_station() {
        let mut session = logged_in(Some("a"));
        session.handle(ok(
            RequestKind::StationDetail,
            json!({ "data": { "inverter": [
                { "sn": "X1", "tempperature": null, "output_current": 1.2,
                  "output_voltage": 230.5, "output_power": 300, "etotal": 1500 },
                { "sn": "X2", "tempperature": 40, "output_current": 0.8,
                  "output_voltage": 229, "output_power": 180, "etotal": 900 }
            ] } })
            .to_string(),
        ));

        assert!(session.has_valid_token());
        let registry = session.host();
        assert_eq!(8, registry.len());
        assert_eq!("", registry.get(1).unwrap().s_value);
        assert_eq!("1.2", registry.get(2).unwrap().s_value);
        assert_eq!("40", registry.get(5).unwrap().s_value);
        assert_eq!("180;900", registry.get(8).unwrap().s_value);
    }

    #[test]
    fn stale_response_is_ignored() {
        let mut session = logged_in(None);
        session.handle(detail(&["X1"]));

        assert_eq!(State::AwaitingStationList, session.state());
        assert!(session.host().is_empty());
    }

    #[test]
    fn failed_login_ends_pass() {
        let mut session = session(None);
        session.start();
        session.handle(Event::Connected(Ok(())));
        session.handle(ok(
            RequestKind::Login,
            String::from(r#"{"hasError":true,"msg":"Email or password error.","data":null}"#),
        ));

        assert!(!session.has_valid_token());
        assert_eq!(State::Disconnecting, session.state());
    }

    #[test]
    fn connect_failure_returns_to_idle() {
        let mut session = session(None);
        session.start();
        session.handle(Event::Connected(Err(String::from("connection refused"))));

        assert_eq!(State::Idle, session.state());
        assert_eq!(vec![Call::Connect], calls(&session));
    }

    #[test]
    fn heartbeat_countdown() {
        let mut session = session(None);
        session.start();

        /* alive: no reconnect while connecting */
        for _ in 0..(RUN_AGAIN - 1) {
            session.on_heartbeat();
        }
        assert_eq!(State::Connecting, session.state());
        assert_eq!(1, count(&session, &Call::Connect));

        session.handle(Event::Connected(Err(String::from("unreachable"))));
        for _ in 0..(RUN_AGAIN - 1) {
            session.on_heartbeat();
        }
        assert_eq!(1, count(&session, &Call::Connect));

        session.on_heartbeat();
        assert_eq!(2, count(&session, &Call::Connect));

        /* counter was reset by the attempt */
        session.handle(Event::Connected(Err(String::from("unreachable"))));
        for _ in 0..(RUN_AGAIN - 1) {
            session.on_heartbeat();
        }
        assert_eq!(2, count(&session, &Call::Connect));
        session.on_heartbeat();
        assert_eq!(3, count(&session, &Call::Connect));
    }

    #[tokio::test]
    async fn run_stops_when_events_close() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(tx);
        session(None).run(rx, Duration::from_secs(3600)).await;
    }
}

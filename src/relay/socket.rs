//! # Relay Session (Client WebSocket)
//!
//! One actor per browser connection. It owns every piece of per-session state:
//! the event router (with its playback sequencer), the capture gate, the playback
//! device and the realtime connection.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: Client connects to `/ws`; the session dials the realtime endpoint
//! 2. **Audio In**: Binary frames of 16-bit mono PCM (the microphone)
//! 3. **Audio Out**: Binary frames of 16-bit mono PCM, paced in real time (the speaker)
//! 4. **Events**: JSON text frames tagged by `type` (see `FrontendEvent`)
//! 5. **Close**: Either side closing tears the whole session down
//!
//! ## Actor Model:
//! Client frames, realtime signals, render completions and weather results all
//! arrive as messages or actor futures and run to completion one at a time on
//! this actor, so none of the session state needs a lock.

use crate::audio::capture::{CaptureSource, ClientCapture};
use crate::audio::pcm::AudioFormat;
use crate::audio::playback::{ClientPlaybackOutput, PlaybackDevice, PlaybackFrame, PlaybackOutput};
use crate::audio::sequencer::Fragment;
use crate::config::AppConfig;
use crate::enrichment::{lookup, WeatherProvider};
use crate::error::{AppError, AppResult, RelayError};
use crate::realtime::client::{RealtimeConnector, RemoteConnector, RemoteLink, RemoteSignal};
use crate::realtime::messages::SessionConfig;
use crate::relay::events::FrontendEvent;
use crate::relay::registry::{CloseSession, SessionRegistry};
use crate::relay::router::{EnrichmentRequest, RelayAction, RelayRouter, RelayState, Transition};
use crate::relay::teardown::teardown;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, info_span, trace, warn, Span};
use uuid::Uuid;

/// How often a ping is sent to the browser.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long the browser may stay silent before the session is closed.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// A render finished without going through the device future.
#[derive(Message)]
#[rtype(result = "()")]
struct FragmentDone {
    epoch: u64,
    played_bytes: usize,
}

/// WebSocket actor relaying one browser connection.
pub struct RelaySession {
    id: Uuid,
    span: Span,
    config: Arc<AppConfig>,
    registry: SessionRegistry,
    weather: Option<Arc<dyn WeatherProvider>>,

    router: RelayRouter,
    /// Last state applied, for transition logging
    state: RelayState,

    capture: Box<dyn CaptureSource>,
    playback_output: Option<Box<dyn PlaybackOutput>>,
    playback: Option<Box<dyn PlaybackDevice>>,
    /// In-flight render future
    render: Option<SpawnHandle>,
    connector: Box<dyn RemoteConnector>,
    remote: Option<Box<dyn RemoteLink>>,

    last_heartbeat: Instant,
}

impl RelaySession {
    pub fn new(state: &AppState) -> Self {
        let id = Uuid::new_v4();
        let config = state.config.clone();
        let format = AudioFormat::from(&config.audio);

        Self {
            id,
            span: info_span!("relay_session", session = %id),
            registry: state.sessions.clone(),
            weather: state.weather.clone(),
            router: RelayRouter::new(
                format,
                SessionConfig::from(&config.realtime),
                config.enrichment.enabled && state.weather.is_some(),
            ),
            state: RelayState::Idle,
            capture: Box::new(ClientCapture::new(state.call.clone(), format)),
            playback_output: None,
            playback: None,
            render: None,
            connector: Box::new(RealtimeConnector),
            remote: None,
            last_heartbeat: Instant::now(),
            config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Execute the router's actions in order.
    fn apply(&mut self, transition: Transition, ctx: &mut ws::WebsocketContext<Self>) {
        if transition.state != self.state {
            info!("State {:?} -> {:?}", self.state, transition.state);
            self.state = transition.state;
        }

        for action in transition.actions {
            match action {
                RelayAction::Forward(event) => self.send_event(ctx, &event),
                RelayAction::Remote(call) => {
                    let kind = call.kind();
                    match self.remote.as_deref() {
                        Some(remote) => {
                            if let Err(e) = call.send_via(remote) {
                                warn!("Failed to send {}: {}", kind, e);
                            }
                        }
                        None => warn!("No realtime connection; dropping {}", kind),
                    }
                }
                RelayAction::StartFragment(fragment) => self.start_fragment(fragment, ctx),
                RelayAction::StopPlayback => self.stop_playback(ctx),
                RelayAction::StartCapture => {
                    if self.capture.start() {
                        info!("Listening for user input");
                    }
                }
                RelayAction::RestartCapture => {
                    if self.capture.restart() {
                        info!("Listening for user input");
                    }
                }
                RelayAction::Lookup(request) => self.spawn_lookup(request, ctx),
            }
        }
    }

    /// Serialize and send a client-facing event.
    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: &FrontendEvent) {
        match event.to_json() {
            Ok(json) => ctx.text(json),
            Err(e) => error!("Failed to serialize client event: {}", e),
        }
    }

    /// Render a fragment, opening the playback device first if needed.
    fn start_fragment(&mut self, fragment: Fragment, ctx: &mut ws::WebsocketContext<Self>) {
        let epoch = fragment.epoch;

        if self.playback.is_none() {
            let opened = match self.playback_output.as_ref() {
                Some(output) => output.open(),
                None => Err(RelayError::Device("Playback output not initialized".to_string())),
            };
            match opened {
                Ok(device) => self.playback = Some(device),
                Err(e) => {
                    warn!("Failed to open playback device: {}", e);
                    ctx.notify(FragmentDone { epoch, played_bytes: 0 });
                    return;
                }
            }
        }

        let Some(device) = self.playback.as_mut() else {
            return;
        };

        let render = device.render(fragment);
        let handle = ctx.spawn(render.into_actor(self).map(move |result, act, ctx| {
            act.render = None;
            let played_bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _guard = act.span.clone().entered();
                    warn!("Playback render failed: {}", e);
                    0
                }
            };
            act.finish_fragment(epoch, played_bytes, ctx);
        }));
        self.render = Some(handle);
    }

    fn finish_fragment(&mut self, epoch: u64, played_bytes: usize, ctx: &mut ws::WebsocketContext<Self>) {
        let _guard = self.span.clone().entered();
        let transition = self.router.fragment_finished(epoch, played_bytes);
        self.apply(transition, ctx);
    }

    /// Cancel the in-flight render and release the device.
    fn stop_playback(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(handle) = self.render.take() {
            ctx.cancel_future(handle);
        }
        if let Some(mut device) = self.playback.take() {
            if let Err(e) = device.close() {
                warn!("Failed to close playback device: {}", e);
            }
        }
    }

    /// Run a weather lookup in the background and hand the result to the router.
    fn spawn_lookup(&mut self, request: EnrichmentRequest, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(provider) = self.weather.clone() else {
            debug!("No weather provider; skipping lookup for {}", request.place);
            return;
        };

        let EnrichmentRequest { place, response_id } = request;
        let lookup_place = place.clone();
        let fut = async move { lookup(provider.as_ref(), &lookup_place).await.to_context_message() };

        ctx.spawn(fut.into_actor(self).map(move |text, act, ctx| {
            let _guard = act.span.clone().entered();
            info!("Weather lookup for {} finished", place);
            let transition = act.router.enrichment_ready(response_id, text);
            act.apply(transition, ctx);
        }));
    }

    /// Forward a microphone frame if the capture gate lets it through.
    fn handle_capture(&mut self, frame: Vec<u8>, ctx: &mut ws::WebsocketContext<Self>) {
        match self.capture.accept(frame) {
            Ok(Some(frame)) => {
                if let Some(remote) = self.remote.as_ref() {
                    trace!("Sending audio chunk of size: {}", frame.len());
                    if let Err(e) = remote.send_audio_chunk(&frame) {
                        warn!("Failed to forward audio chunk: {}", e);
                    }
                }
            }
            Ok(None) => trace!("Dropping audio chunk; capture inactive"),
            Err(e) => {
                warn!("Rejected audio frame: {}", e);
                self.send_event(ctx, &FrontendEvent::local_error(e.to_string()));
            }
        }
    }

    /// Dial the realtime endpoint; on success start consuming its signals.
    fn connect_remote(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let fut = self.connector.connect(&self.config.realtime);

        ctx.spawn(fut.into_actor(self).map(|result, act, ctx| {
            let _guard = act.span.clone().entered();
            match result {
                Ok((link, signals)) => {
                    act.remote = Some(link);
                    ctx.add_stream(UnboundedReceiverStream::new(signals));
                    let transition = act.router.remote_opened();
                    act.apply(transition, ctx);
                }
                Err(e) => {
                    error!("Realtime connection failed: {}", e);
                    act.send_event(ctx, &FrontendEvent::local_error(e.to_string()));
                    ctx.close(Some(ws::CloseCode::Error.into()));
                    ctx.stop();
                }
            }
        }));
    }
}

impl Actor for RelaySession {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        let _guard = self.span.clone().entered();
        info!("Client connected");

        self.registry.register(self.id, ctx.address().recipient());
        self.playback_output = Some(Box::new(ClientPlaybackOutput::new(
            ctx.address().recipient(),
            AudioFormat::from(&self.config.audio),
        )));

        // Heartbeat: drop clients that stop answering pings
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                let _guard = act.span.clone().entered();
                warn!("Client heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        self.connect_remote(ctx);
    }

    /// Called when the WebSocket connection stops.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let _guard = self.span.clone().entered();

        // Reborrow so the trait object lifetime can shorten to this call
        let remote: Option<&mut dyn RemoteLink> = match self.remote.as_mut() {
            Some(link) => Some(&mut **link),
            None => None,
        };
        let report = teardown(self.capture.as_mut(), self.playback.take(), remote);
        for failure in report.failures() {
            error!("Teardown step failed: {}", failure);
        }

        self.registry.unregister(&self.id);
        info!(
            state = ?self.router.state(),
            response = ?self.router.response_id(),
            item = ?self.router.item_id(),
            playing = self.router.sequencer().is_playing(),
            queued = self.router.sequencer().queued(),
            "Client disconnected"
        );
    }
}

/// Frames from the browser.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let _guard = self.span.clone().entered();

        match msg {
            Ok(ws::Message::Binary(bytes)) => {
                self.last_heartbeat = Instant::now();
                self.handle_capture(bytes.to_vec(), ctx);
            }
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                debug!("Ignoring text frame from client: {}", text);
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Client closed connection: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!("Client WebSocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Signals from the realtime connection.
impl StreamHandler<RemoteSignal> for RelaySession {
    fn handle(&mut self, signal: RemoteSignal, ctx: &mut Self::Context) {
        let _guard = self.span.clone().entered();

        match signal {
            RemoteSignal::Event(event) => {
                let transition = self.router.handle(event);
                self.apply(transition, ctx);
            }
            RemoteSignal::Malformed(e) => {
                self.send_event(ctx, &FrontendEvent::local_error(e.to_string()));
            }
            RemoteSignal::Closed(reason) => {
                info!("Disconnected from realtime endpoint: {:?}", reason);
                ctx.close(Some(ws::CloseCode::Away.into()));
                ctx.stop();
            }
            RemoteSignal::Failed(e) => {
                error!("Realtime connection failed: {}", e);
                self.send_event(ctx, &FrontendEvent::local_error(e.to_string()));
                ctx.close(Some(ws::CloseCode::Error.into()));
                ctx.stop();
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!(session = %self.id, "Realtime signal stream ended");
        ctx.stop();
    }
}

/// Audio on its way to the browser. Frames from an interrupted epoch are dropped.
impl Handler<PlaybackFrame> for RelaySession {
    type Result = ();

    fn handle(&mut self, frame: PlaybackFrame, ctx: &mut Self::Context) {
        if frame.epoch == self.router.sequencer().epoch() {
            ctx.binary(frame.data);
        } else {
            trace!(session = %self.id, "Dropping frame from interrupted playback");
        }
    }
}

impl Handler<FragmentDone> for RelaySession {
    type Result = ();

    fn handle(&mut self, msg: FragmentDone, ctx: &mut Self::Context) {
        self.finish_fragment(msg.epoch, msg.played_bytes, ctx);
    }
}

/// Server shutdown (or any other owner) asking the session to close.
impl Handler<CloseSession> for RelaySession {
    type Result = ();

    fn handle(&mut self, msg: CloseSession, ctx: &mut Self::Context) {
        let _guard = self.span.clone().entered();
        info!("Closing session: {}", msg.reason);
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Away,
            description: Some(msg.reason),
        }));
        ctx.stop();
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Checks that a relay can actually be served (API key present, a session slot
/// free), then upgrades the request. The relay itself runs in `RelaySession`.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    if !state.config.has_api_key() {
        return Err(AppError::ConfigError(
            "Realtime API key is not configured (set OPENAI_API_KEY)".to_string(),
        ));
    }

    let session = RelaySession::new(&state);
    let id = session.id();

    // The slot is held from here until the session stops
    if !state.reserve_session(id) {
        return Err(AppError::ServiceUnavailable(format!(
            "Maximum concurrent sessions ({}) reached",
            state.config.performance.max_concurrent_sessions
        )));
    }

    debug!("Starting relay session {}", id);
    ws::start(session, &req, stream).map_err(|e| {
        state.sessions.unregister(&id);
        AppError::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayResult;
    use crate::realtime::client::RemoteSession;
    use crate::realtime::messages::{ClientCommand, ItemRef, ResponseRef, ServerEvent};
    use actix_web::error::PayloadError;
    use actix_web::web::Bytes;
    use actix_web::{http::StatusCode, test, App};
    use base64::prelude::*;
    use futures_util::future::{FutureExt, LocalBoxFuture};
    use futures_util::StreamExt;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use tokio::sync::mpsc;

    struct Idle;

    impl Actor for Idle {
        type Context = Context<Self>;
    }

    impl Handler<CloseSession> for Idle {
        type Result = ();

        fn handle(&mut self, _msg: CloseSession, _ctx: &mut Self::Context) {}
    }

    /// In-memory realtime link that records every command.
    struct FakeLink {
        open: bool,
        sent: Rc<RefCell<Vec<ClientCommand>>>,
        closes: Rc<Cell<u32>>,
    }

    impl RemoteLink for FakeLink {
        fn send(&self, command: ClientCommand) -> RelayResult<()> {
            self.sent.borrow_mut().push(command);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) -> RelayResult<()> {
            self.open = false;
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    /// Hands out one prepared link instead of dialing.
    struct FakeConnector {
        session: RefCell<Option<RemoteSession>>,
    }

    impl RemoteConnector for FakeConnector {
        fn connect(&self, _config: &crate::config::RealtimeConfig) -> LocalBoxFuture<'static, RelayResult<RemoteSession>> {
            let session = self
                .session
                .borrow_mut()
                .take()
                .ok_or_else(|| RelayError::Transport("already connected".to_string()));
            async move { session }.boxed_local()
        }
    }

    /// A running session wired to fakes on both sides.
    struct Harness {
        addr: Addr<RelaySession>,
        client: mpsc::UnboundedSender<Result<Bytes, PayloadError>>,
        remote: mpsc::UnboundedSender<RemoteSignal>,
        sent: Rc<RefCell<Vec<ClientCommand>>>,
        closes: Rc<Cell<u32>>,
        output: Rc<RefCell<Vec<u8>>>,
    }

    impl Harness {
        fn start(state: &AppState) -> Self {
            let sent = Rc::new(RefCell::new(Vec::new()));
            let closes = Rc::new(Cell::new(0));
            let (remote, signals) = mpsc::unbounded_channel();
            let link: Box<dyn RemoteLink> =
                Box::new(FakeLink { open: true, sent: sent.clone(), closes: closes.clone() });

            let mut session = RelaySession::new(state);
            session.connector = Box::new(FakeConnector {
                session: RefCell::new(Some((link, signals))),
            });

            let (client, incoming) = mpsc::unbounded_channel();
            let (addr, frames) = ws::WebsocketContext::create_with_addr(
                session,
                UnboundedReceiverStream::new(incoming),
            );

            // The actor only runs while its output is being polled
            let output = Rc::new(RefCell::new(Vec::new()));
            let sink = output.clone();
            actix_web::rt::spawn(async move {
                let mut frames = Box::pin(frames);
                while let Some(Ok(bytes)) = frames.next().await {
                    sink.borrow_mut().extend_from_slice(&bytes);
                }
            });

            Self { addr, client, remote, sent, closes, output }
        }

        fn event(&self, event: ServerEvent) {
            self.remote.send(RemoteSignal::Event(event)).unwrap();
        }

        /// Send a binary frame as a browser would (masked, zero key).
        fn mic(&self, pcm: &[u8]) {
            let mut frame = vec![0x82, 0x80 | pcm.len() as u8, 0, 0, 0, 0];
            frame.extend_from_slice(pcm);
            self.client.send(Ok(Bytes::from(frame))).unwrap();
        }

        fn kinds(&self) -> Vec<&'static str> {
            self.sent.borrow().iter().map(ClientCommand::kind).collect()
        }

        /// Payloads of the binary frames written to the browser so far.
        fn audio_out(&self) -> Vec<Vec<u8>> {
            let buf = self.output.borrow();
            let mut frames = Vec::new();
            let mut pos = 0;
            while pos + 2 <= buf.len() {
                let opcode = buf[pos] & 0x0F;
                let mut len = (buf[pos + 1] & 0x7F) as usize;
                pos += 2;
                if len == 126 {
                    len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
                    pos += 2;
                } else if len == 127 {
                    let mut size = [0u8; 8];
                    size.copy_from_slice(&buf[pos..pos + 8]);
                    len = u64::from_be_bytes(size) as usize;
                    pos += 8;
                }
                if opcode == 0x2 {
                    frames.push(buf[pos..pos + len].to_vec());
                }
                pos += len;
            }
            frames
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn audio(bytes: &[u8]) -> ServerEvent {
        ServerEvent::AudioDelta { delta: BASE64_STANDARD.encode(bytes) }
    }

    fn created(id: &str) -> ServerEvent {
        ServerEvent::ResponseCreated { response: ResponseRef { id: id.to_string() } }
    }

    #[actix_web::test]
    async fn test_playback_device_reopened_after_interruption() {
        let state = AppState::with_provider(AppConfig::default(), None);
        let h = Harness::start(&state);
        settle().await;
        assert_eq!(h.kinds(), vec!["session.update"]);

        h.event(created("resp_1"));
        h.event(ServerEvent::OutputItemAdded { item: ItemRef { id: "item_1".to_string() } });
        // One second of audio, then a fragment queued behind it
        h.event(audio(&[1; 48000]));
        h.event(audio(&[3; 48]));
        settle().await;
        assert_eq!(h.audio_out(), vec![vec![1; 48000]]);

        h.event(ServerEvent::SpeechStarted);
        settle().await;
        assert_eq!(
            h.kinds(),
            vec!["session.update", "response.cancel", "conversation.item.truncate"]
        );
        match h.sent.borrow().last() {
            Some(ClientCommand::TruncateItem { item_id, audio_end_ms, .. }) => {
                assert_eq!(item_id, "item_1");
                assert_eq!(*audio_end_ms, 0);
            }
            other => panic!("Unexpected command: {:?}", other),
        }

        // The old device was closed; the next response plays on a fresh one
        h.event(created("resp_2"));
        h.event(audio(&[2; 48]));
        settle().await;
        assert_eq!(h.audio_out(), vec![vec![1; 48000], vec![2; 48]]);
    }

    #[actix_web::test]
    async fn test_frames_from_old_epoch_are_dropped() {
        let state = AppState::with_provider(AppConfig::default(), None);
        let h = Harness::start(&state);
        settle().await;

        h.addr.do_send(PlaybackFrame { epoch: 1, data: vec![9; 4] });
        h.addr.do_send(PlaybackFrame { epoch: 0, data: vec![7; 4] });
        settle().await;

        assert_eq!(h.audio_out(), vec![vec![7; 4]]);
    }

    #[actix_web::test]
    async fn test_mic_audio_only_forwarded_during_call() {
        // No call: capture never starts
        let idle = AppState::with_provider(AppConfig::default(), None);
        let h = Harness::start(&idle);
        settle().await;
        h.mic(&[1, 0, 2, 0]);
        settle().await;
        assert_eq!(h.kinds(), vec!["session.update"]);

        // Active call: frames flow until the call stops
        let state = AppState::with_provider(AppConfig::default(), None);
        state.call.start();
        let h = Harness::start(&state);
        settle().await;
        h.mic(&[1, 0, 2, 0]);
        settle().await;
        assert_eq!(h.kinds(), vec!["session.update", "input_audio_buffer.append"]);

        state.call.stop();
        h.mic(&[1, 0, 2, 0]);
        settle().await;
        assert_eq!(h.kinds(), vec!["session.update", "input_audio_buffer.append"]);
    }

    #[actix_web::test]
    async fn test_close_releases_remote_and_slot() {
        let state = AppState::with_provider(AppConfig::default(), None);
        let h = Harness::start(&state);
        settle().await;
        assert_eq!(state.active_sessions(), 1);

        h.addr.do_send(CloseSession { reason: "server shutting down".to_string() });
        settle().await;

        assert_eq!(h.closes.get(), 1);
        assert_eq!(state.active_sessions(), 0);
    }

    #[actix_web::test]
    async fn test_malformed_remote_frame_reported_to_client() {
        let state = AppState::with_provider(AppConfig::default(), None);
        let h = Harness::start(&state);
        settle().await;

        h.remote
            .send(RemoteSignal::Malformed(RelayError::Protocol("bad frame".to_string())))
            .unwrap();
        settle().await;

        let output = String::from_utf8_lossy(&h.output.borrow()).to_string();
        assert!(output.contains("Protocol error: bad frame"));
        // Session stays up
        assert_eq!(h.closes.get(), 0);
        assert_eq!(state.active_sessions(), 1);
    }

    fn upgrade_request() -> test::TestRequest {
        test::TestRequest::get()
            .uri("/ws")
            .insert_header(("connection", "upgrade"))
            .insert_header(("upgrade", "websocket"))
            .insert_header(("sec-websocket-version", "13"))
            .insert_header(("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="))
    }

    #[actix_web::test]
    async fn test_upgrade_refused_without_api_key() {
        let state = AppState::with_provider(AppConfig::default(), None);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/ws", web::get().to(relay_websocket)),
        )
        .await;

        let resp = test::call_service(&app, upgrade_request().to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "config_error");
    }

    #[actix_web::test]
    async fn test_upgrade_refused_at_capacity() {
        let mut config = AppConfig::default();
        config.realtime.api_key = "sk-test".to_string();
        config.performance.max_concurrent_sessions = 1;
        let state = AppState::with_provider(config, None);
        state.sessions.register(Uuid::new_v4(), Idle.start().recipient());

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/ws", web::get().to(relay_websocket)),
        )
        .await;

        let resp = test::call_service(&app, upgrade_request().to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_back_to_back_upgrades_respect_limit() {
        let mut config = AppConfig::default();
        config.realtime.api_key = "sk-test".to_string();
        config.realtime.url = "ws://127.0.0.1:9/v1/realtime".to_string();
        config.performance.max_concurrent_sessions = 1;
        let state = AppState::with_provider(config, None);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws", web::get().to(relay_websocket)),
        )
        .await;

        // Neither session actor has started yet when the second request arrives
        let first = test::call_service(&app, upgrade_request().to_request()).await;
        assert_eq!(first.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(state.active_sessions(), 1);

        let second = test::call_service(&app, upgrade_request().to_request()).await;
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.active_sessions(), 1);
    }
}

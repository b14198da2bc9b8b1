//! # Relay Event Router
//!
//! The state machine at the heart of a relay session. It interprets events from
//! the realtime endpoint, drives the playback sequencer, detects barge-in, and
//! decides what the client connection should be told.
//!
//! ## State Machine:
//! ```text
//!   Idle ──remote opened──► Listening ──response.created──► Responding
//!                              ▲                                │
//!                              ├────────── response.done ───────┤
//!                              │                                │
//!                              └──── Interrupting ◄─ speech_started
//! ```
//!
//! ## Pure Dispatch:
//! The router never performs I/O. Every input returns a `Transition`: the
//! resulting state plus an ordered list of `RelayAction`s. The session actor
//! executes the actions in order (forward to client, send to remote, render a
//! fragment, ...). This keeps every rule testable without sockets.

use crate::audio::pcm::AudioFormat;
use crate::audio::sequencer::{Fragment, PlaybackSequencer};
use crate::enrichment::extract_place;
use crate::error::RelayResult;
use crate::realtime::client::RemoteLink;
use crate::realtime::messages::{ServerEvent, SessionConfig};
use crate::relay::events::FrontendEvent;

use base64::prelude::*;
use tracing::{debug, info, warn};

/// Router states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Remote connection not open yet
    Idle,
    /// Waiting for the user (no response in flight)
    Listening,
    /// The assistant is producing a response
    Responding,
    /// Transient: tearing down a response after barge-in
    Interrupting,
}

/// A weather lookup the session should run in the background.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentRequest {
    pub place: String,
    /// Response id current when the lookup was requested
    pub response_id: Option<String>,
}

/// Side effects requested by the router, executed in order by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    /// Send a notification to the client connection
    Forward(FrontendEvent),
    /// Send a command to the realtime endpoint
    Remote(RemoteCall),
    /// Hand a fragment to the playback device (opening one if needed)
    StartFragment(Fragment),
    /// Cancel the in-flight render and close the playback device
    StopPlayback,
    StartCapture,
    RestartCapture,
    Lookup(EnrichmentRequest),
}

/// A command for the realtime endpoint, sent through the matching `RemoteLink` helper.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    SessionUpdate(SessionConfig),
    Cancel,
    Truncate { item_id: String, played_ms: u64 },
    ContextMessage(String),
}

impl RemoteCall {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteCall::SessionUpdate(_) => "session.update",
            RemoteCall::Cancel => "response.cancel",
            RemoteCall::Truncate { .. } => "conversation.item.truncate",
            RemoteCall::ContextMessage(_) => "conversation.item.add",
        }
    }

    pub fn send_via(self, link: &dyn RemoteLink) -> RelayResult<()> {
        match self {
            RemoteCall::SessionUpdate(session) => link.send_session_update(session),
            RemoteCall::Cancel => link.send_cancel(),
            RemoteCall::Truncate { item_id, played_ms } => link.send_truncate(&item_id, played_ms),
            RemoteCall::ContextMessage(text) => link.send_context_message(&text),
        }
    }
}

/// Result of feeding one input to the router.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: RelayState,
    pub actions: Vec<RelayAction>,
}

/// Per-session relay state.
#[derive(Debug)]
pub struct RelayRouter {
    state: RelayState,
    response_id: Option<String>,
    item_id: Option<String>,
    sequencer: PlaybackSequencer,
    session: SessionConfig,
    enrichment_enabled: bool,
}

impl RelayRouter {
    pub fn new(format: AudioFormat, session: SessionConfig, enrichment_enabled: bool) -> Self {
        Self {
            state: RelayState::Idle,
            response_id: None,
            item_id: None,
            sequencer: PlaybackSequencer::new(format),
            session,
            enrichment_enabled,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn item_id(&self) -> Option<&str> {
        self.item_id.as_deref()
    }

    pub fn sequencer(&self) -> &PlaybackSequencer {
        &self.sequencer
    }

    fn transition(&self, actions: Vec<RelayAction>) -> Transition {
        Transition {
            state: self.state,
            actions,
        }
    }

    /// The realtime connection is open: configure the session, then enable capture.
    pub fn remote_opened(&mut self) -> Transition {
        self.state = RelayState::Listening;
        info!("Realtime session open, listening");
        self.transition(vec![
            RelayAction::Remote(RemoteCall::SessionUpdate(self.session.clone())),
            RelayAction::StartCapture,
        ])
    }

    /// Dispatch one event from the realtime endpoint.
    pub fn handle(&mut self, event: ServerEvent) -> Transition {
        let mut actions = Vec::new();

        match event {
            ServerEvent::SessionCreated | ServerEvent::SessionUpdated => {
                info!("Session configured");
            }

            ServerEvent::SpeechStarted => {
                debug!("Speech detected");
                actions.push(RelayAction::Forward(FrontendEvent::InputSpeechStarted));
                if self.state == RelayState::Responding {
                    self.interrupt(&mut actions);
                }
            }

            ServerEvent::SpeechStopped => {
                debug!("Speech ended");
                actions.push(RelayAction::Forward(FrontendEvent::InputSpeechStopped));
            }

            ServerEvent::ResponseCreated { response } => {
                info!("Response {} started", response.id);
                self.state = RelayState::Responding;
                self.response_id = Some(response.id);
                self.sequencer.reset_played();
                actions.push(RelayAction::Forward(FrontendEvent::ResponseCreated));
            }

            ServerEvent::OutputItemAdded { item } => {
                debug!("Output item {}", item.id);
                self.item_id = Some(item.id);
            }

            ServerEvent::AudioDelta { delta } => match BASE64_STANDARD.decode(delta.as_bytes()) {
                Ok(bytes) if bytes.is_empty() => {
                    debug!("Skipping empty audio delta");
                }
                Ok(bytes) => {
                    if let Some(fragment) = self.sequencer.enqueue(bytes) {
                        actions.push(RelayAction::StartFragment(fragment));
                    }
                }
                Err(e) => {
                    warn!("Dropping undecodable audio delta: {}", e);
                }
            },

            ServerEvent::ResponseDone => {
                info!("Response completed");
                actions.push(RelayAction::Forward(FrontendEvent::ResponseDone));
                self.state = RelayState::Listening;
                self.response_id = None;
                self.item_id = None;
                self.sequencer.reset_played();
                actions.push(RelayAction::RestartCapture);
            }

            ServerEvent::TranscriptionCompleted { transcript } => {
                info!("User transcript: {}", transcript);
                let place = if self.enrichment_enabled {
                    extract_place(&transcript)
                } else {
                    None
                };
                actions.push(RelayAction::Forward(FrontendEvent::TranscriptionCompleted {
                    transcript,
                }));
                if let Some(place) = place {
                    info!("Weather lookup requested for {}", place);
                    actions.push(RelayAction::Lookup(EnrichmentRequest {
                        place,
                        response_id: self.response_id.clone(),
                    }));
                }
            }

            ServerEvent::AudioTranscriptDelta { delta } => {
                actions.push(RelayAction::Forward(FrontendEvent::AudioTranscriptDelta { delta }));
            }

            ServerEvent::AudioTranscriptDone => {
                actions.push(RelayAction::Forward(FrontendEvent::AudioTranscriptDone));
            }

            ServerEvent::TextDelta { delta } => {
                actions.push(RelayAction::Forward(FrontendEvent::TextDelta { delta }));
            }

            ServerEvent::Error { error } => {
                warn!("Realtime error event: {}", error);
                actions.push(RelayAction::Forward(FrontendEvent::Error { error }));
            }

            ServerEvent::Unknown => {
                debug!("Unhandled realtime event type");
            }
        }

        self.transition(actions)
    }

    /// A render started under `epoch` ended after playing `played_bytes`.
    pub fn fragment_finished(&mut self, epoch: u64, played_bytes: usize) -> Transition {
        let actions = self
            .sequencer
            .finish(epoch, played_bytes)
            .map(RelayAction::StartFragment)
            .into_iter()
            .collect();
        self.transition(actions)
    }

    /// A weather lookup tagged with `tag` produced `text`.
    ///
    /// The text is sent only if the current response id still equals the tag;
    /// a result that outlived its turn is dropped.
    pub fn enrichment_ready(&mut self, tag: Option<String>, text: String) -> Transition {
        if tag != self.response_id {
            warn!(
                "Dropping weather result for response {:?}; current response is {:?}",
                tag, self.response_id
            );
            return self.transition(Vec::new());
        }

        self.transition(vec![RelayAction::Remote(RemoteCall::ContextMessage(text))])
    }

    /// Barge-in: the user started talking over the assistant.
    fn interrupt(&mut self, actions: &mut Vec<RelayAction>) {
        self.state = RelayState::Interrupting;

        // Played, not generated, duration
        let played_ms = self.sequencer.played_ms_floor();
        let discarded = self.sequencer.interrupt();
        info!(
            "Interruption detected: discarded {} queued fragments after {}ms played",
            discarded, played_ms
        );

        actions.push(RelayAction::StopPlayback);
        actions.push(RelayAction::Remote(RemoteCall::Cancel));
        if let Some(item_id) = self.item_id.take() {
            actions.push(RelayAction::Remote(RemoteCall::Truncate { item_id, played_ms }));
        }
        self.response_id = None;

        self.state = RelayState::Listening;
    }
}

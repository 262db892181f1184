//! Maps decoded frames onto the credential and message stores.
//!
//! [`Dispatcher::dispatch`] is the single decision point: it switches on the
//! frame's `type`, mutates the caller's [`Session`] and returns the replies
//! destined for that connection. `send_message` replies through the
//! broadcast instead, which also reaches the sender.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::HubConfig,
    error::HubError,
    protocol::{Frame, ServerMessage, Status},
    session::Session,
    store::{ChatMessage, CreateOutcome, CredentialStore, MessageStore, VerifyOutcome},
};

const MISSING_CREDENTIALS: &str = "Username and password required";
const MISSING_MESSAGE: &str = "Sender and message required";
const LOGIN_REQUIRED: &str = "You must be logged in to send messages";
const ALREADY_LOGGED_IN: &str = "Already logged in";
const UNKNOWN_REQUEST: &str = "Unknown request type";
const HISTORY_UNAVAILABLE: &str = "Message history unavailable";
const STORE_UNAVAILABLE: &str = "Message could not be stored";

#[derive(Clone)]
pub struct Dispatcher {
    credentials: Arc<dyn CredentialStore>,
    messages: Arc<dyn MessageStore>,
    broadcaster: Broadcaster,
    config: HubConfig,
}

impl Dispatcher {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        messages: Arc<dyn MessageStore>,
        broadcaster: Broadcaster,
        config: HubConfig,
    ) -> Self {
        Self {
            credentials,
            messages,
            broadcaster,
            config,
        }
    }

    /// Parses one line and dispatches it, turning parse failures into an
    /// `error` reply.
    pub async fn dispatch_line(&self, session: &mut Session, line: &str) -> Vec<ServerMessage> {
        match Frame::parse(line) {
            Ok(frame) => self.dispatch(session, &frame).await,
            Err(err) => {
                debug!(error = %err, "rejecting malformed frame");
                vec![reply_for(HubError::from(err))]
            }
        }
    }

    pub async fn dispatch(&self, session: &mut Session, frame: &Frame) -> Vec<ServerMessage> {
        match frame.kind() {
            "register" => vec![self.register(frame)],
            "login" => self.login(session, frame),
            "get_history" => vec![self.history(frame)],
            "send_message" => self.send_message(session, frame).await.into_iter().collect(),
            other => {
                debug!(kind = other, "unknown request type");
                vec![ServerMessage::error(UNKNOWN_REQUEST)]
            }
        }
    }

    fn register(&self, frame: &Frame) -> ServerMessage {
        let Some((username, password)) = credentials_of(frame) else {
            return register_response(Status::Error, MISSING_CREDENTIALS);
        };

        match self.credentials.create(username, password) {
            Ok(CreateOutcome::Created { user_id }) => {
                info!(user_id, username, "user registered");
                register_response(Status::Success, "User registered successfully")
            }
            Ok(CreateOutcome::Rejected { message }) => register_response(Status::Error, &message),
            Err(err) => {
                warn!(error = %err, "credential store failed during register");
                register_response(Status::Error, &HubError::from(err).to_string())
            }
        }
    }

    fn login(&self, session: &mut Session, frame: &Frame) -> Vec<ServerMessage> {
        if session.is_authenticated() {
            return vec![ServerMessage::login_error(ALREADY_LOGGED_IN)];
        }
        let Some((username, password)) = credentials_of(frame) else {
            return vec![ServerMessage::login_error(MISSING_CREDENTIALS)];
        };

        let (user_id, username) = match self.credentials.verify(username, password) {
            Ok(VerifyOutcome::Verified { user_id, username }) => (user_id, username),
            Ok(VerifyOutcome::Rejected { message }) => {
                return vec![ServerMessage::login_error(message)];
            }
            Err(err) => {
                warn!(error = %err, "credential store failed during login");
                return vec![ServerMessage::login_error(HubError::from(err).to_string())];
            }
        };

        if session.authenticate(user_id, username.clone()).is_err() {
            return vec![ServerMessage::login_error(ALREADY_LOGGED_IN)];
        }
        info!(user_id, %username, "user logged in");

        let mut replies = vec![ServerMessage::login_success(user_id, username)];
        if self.config.replay_history_on_login {
            replies.push(self.load_history(self.config.history_limit));
        }
        replies
    }

    fn history(&self, frame: &Frame) -> ServerMessage {
        match frame.u64_field("limit") {
            Ok(limit) => {
                let limit = limit
                    .map_or(self.config.history_limit, |limit| {
                        usize::try_from(limit).unwrap_or(usize::MAX)
                    })
                    .min(self.config.max_history);
                self.load_history(limit)
            }
            Err(err) => reply_for(HubError::from(err)),
        }
    }

    fn load_history(&self, limit: usize) -> ServerMessage {
        match self.messages.recent(limit) {
            Ok(messages) => ServerMessage::HistoryResponse {
                messages: messages.iter().map(ChatMessage::history_entry).collect(),
            },
            Err(err) => {
                warn!(error = %err, "message store failed during history fetch");
                ServerMessage::error(HISTORY_UNAVAILABLE)
            }
        }
    }

    async fn send_message(&self, session: &Session, frame: &Frame) -> Option<ServerMessage> {
        let sender = frame.str_field("sender").filter(|sender| !sender.is_empty());
        let text = frame.str_field("message").filter(|text| !text.trim().is_empty());
        let (Some(sender), Some(text)) = (sender, text) else {
            return Some(ServerMessage::error(MISSING_MESSAGE));
        };
        if self.config.require_login_to_send && !session.is_authenticated() {
            return Some(ServerMessage::error(LOGIN_REQUIRED));
        }

        let message = ChatMessage {
            sender_id: session.user_id().unwrap_or(0),
            sender_username: sender.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.messages.append(&message) {
            warn!(error = %err, "message store failed during append");
            return Some(ServerMessage::error(STORE_UNAVAILABLE));
        }

        let payload = ServerMessage::NewMessage {
            sender: message.sender_username,
            message: message.text,
            timestamp: message.timestamp,
        };
        if let Err(err) = self.broadcaster.broadcast(&payload, None).await {
            warn!(error = %err, "failed to encode broadcast");
        }
        None
    }
}

/// Reply sent to a connection whose frame could not be handled.
pub fn reply_for(error: HubError) -> ServerMessage {
    ServerMessage::error(error.to_string())
}

fn credentials_of(frame: &Frame) -> Option<(&str, &str)> {
    let username = frame.str_field("username").filter(|name| !name.is_empty())?;
    let password = frame.str_field("password").filter(|password| !password.is_empty())?;
    Some((username, password))
}

fn register_response(status: Status, message: &str) -> ServerMessage {
    ServerMessage::RegisterResponse {
        status,
        message: message.to_string(),
    }
}

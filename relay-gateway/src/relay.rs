//! Completion relay.
//!
//! Turns one user message into one upstream completion call, either waiting
//! for the whole reply or forwarding it fragment by fragment. A session's
//! history only changes once an exchange has completed: the user message and
//! the reply are committed together, so a failed upstream call leaves the
//! stored history untouched.

use crate::history::trim_history;
use crate::provider::{ChatRequest, Message, Provider};
use crate::session::{SessionGuard, SessionStore};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use relay_common::Result;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Session used when a request does not name one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Fragments buffered between the upstream reader and a slow caller.
const STREAM_BUFFER: usize = 16;

/// Reply fragments forwarded to the caller, in upstream order.
pub type ReplyStream = BoxStream<'static, std::result::Result<String, Infallible>>;

/// A validated chat request.
#[derive(Debug, Clone)]
pub struct ChatInput {
    pub session_id: String,
    pub user_message: String,
    /// Model override; the relay default is used when `None`.
    pub model: Option<String>,
    /// Replaces the session's leading system message for this call only.
    pub system_prompt: Option<String>,
}

impl ChatInput {
    pub fn new(session_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_message: user_message.into(),
            model: None,
            system_prompt: None,
        }
    }
}

/// Relays chat exchanges between sessions and the upstream provider.
#[derive(Clone)]
pub struct ChatRelay {
    store: Arc<SessionStore>,
    provider: Arc<dyn Provider>,
    default_model: String,
    max_history: usize,
}

impl ChatRelay {
    /// Create a relay.
    ///
    /// `max_history` is raised if needed so a trimmed history always keeps
    /// the newest message next to a seeded system message.
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn Provider>,
        default_model: impl Into<String>,
        max_history: usize,
    ) -> Self {
        let floor = 1 + store.initial_history().len();
        Self {
            store,
            provider,
            default_model: default_model.into(),
            max_history: max_history.max(floor),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Build the trimmed candidate history and the upstream request.
    fn prepare(&self, session: &SessionGuard, input: &ChatInput) -> (Vec<Message>, ChatRequest) {
        let mut candidate = session.messages().to_vec();
        candidate.push(Message::user(input.user_message.as_str()));
        let candidate = trim_history(candidate, self.max_history);

        let request = ChatRequest {
            model: input
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages: outbound_messages(&candidate, input.system_prompt.as_deref()),
        };

        (candidate, request)
    }

    /// Relay one message and wait for the complete reply.
    pub async fn chat(&self, input: ChatInput) -> Result<String> {
        let mut session = self.store.lock(&input.session_id).await;
        let (candidate, request) = self.prepare(&session, &input);

        tracing::debug!(
            session_id = %input.session_id,
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self.provider.chat(request).await?;

        tracing::info!(
            session_id = %input.session_id,
            provider = %response.provider,
            model = %response.model,
            latency_ms = response.latency_ms,
            total_tokens = response.usage.total_tokens,
            "Completion relayed"
        );

        commit(&mut session, candidate, response.content.clone(), self.max_history);
        Ok(response.content)
    }

    /// Relay one message and forward the reply as it arrives.
    ///
    /// The first fragment is awaited before returning, so failures that
    /// happen before any output exists come back as `Err`. Afterwards a
    /// background task owns the session lock, forwards fragments, and
    /// commits the exchange once the upstream stream is exhausted. If the
    /// caller goes away or the upstream fails mid-stream, the output just
    /// ends and nothing is committed.
    pub async fn chat_stream(&self, input: ChatInput) -> Result<ReplyStream> {
        let mut session = self.store.lock(&input.session_id).await;
        let (candidate, request) = self.prepare(&session, &input);
        let model = request.model.clone();

        tracing::debug!(
            session_id = %input.session_id,
            model = %model,
            messages = request.messages.len(),
            "Sending streaming completion request"
        );

        let mut upstream = self.provider.chat_stream(request).await?;
        let mut pending = match upstream.next().await {
            Some(Ok(fragment)) => Some(fragment),
            Some(Err(e)) => return Err(e.into()),
            None => None,
        };

        let (tx, rx) = mpsc::channel::<String>(STREAM_BUFFER);
        let max_history = self.max_history;
        let session_id = input.session_id;
        let provider = self.provider.name().to_string();

        tokio::spawn(async move {
            let mut reply = String::new();
            let mut fragments = 0usize;

            loop {
                let next = match pending.take() {
                    Some(fragment) => Some(Ok(fragment)),
                    // A stalled upstream must not pin the session lock once
                    // nobody is reading.
                    None => tokio::select! {
                        next = upstream.next() => next,
                        _ = tx.closed() => {
                            tracing::info!(
                                session_id = %session_id,
                                fragments,
                                "Caller disconnected while upstream was idle, exchange discarded"
                            );
                            return;
                        }
                    },
                };

                let fragment = match next {
                    Some(Ok(fragment)) => fragment,
                    Some(Err(e)) => {
                        tracing::error!(
                            session_id = %session_id,
                            error = %e,
                            fragments,
                            "Upstream stream failed mid-reply"
                        );
                        return;
                    }
                    None => break,
                };

                reply.push_str(&fragment);
                fragments += 1;
                if tx.send(fragment).await.is_err() {
                    tracing::info!(
                        session_id = %session_id,
                        fragments,
                        "Caller disconnected mid-stream, exchange discarded"
                    );
                    return;
                }
            }

            tracing::info!(
                session_id = %session_id,
                provider = %provider,
                model = %model,
                fragments,
                reply_len = reply.len(),
                "Streamed completion relayed"
            );
            commit(&mut session, candidate, reply, max_history);
        });

        let output = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|fragment| (Ok::<_, Infallible>(fragment), rx))
        });
        Ok(output.boxed())
    }
}

/// Store the completed exchange.
fn commit(session: &mut SessionGuard, mut candidate: Vec<Message>, reply: String, max: usize) {
    candidate.push(Message::assistant(reply));
    session.replace(trim_history(candidate, max));
}

/// Messages sent upstream: the history, with its leading system message
/// swapped for `system_prompt` when one is given.
fn outbound_messages(history: &[Message], system_prompt: Option<&str>) -> Vec<Message> {
    let Some(prompt) = system_prompt else {
        return history.to_vec();
    };

    let rest = match history.first() {
        Some(first) if first.is_system() => &history[1..],
        _ => history,
    };

    std::iter::once(Message::system(prompt))
        .chain(rest.iter().cloned())
        .collect()
}

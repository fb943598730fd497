//! Dispatcher: one inbound message in, exactly one reply out.
//!
//! classify → resolve user → merge context → look up package → invoke (bounded) → save turn →
//! commit context. Everything after classification degrades to the fallback reply instead of
//! failing the request.

use std::sync::Arc;
use std::time::Duration;

use super::command::{parse_command, CommandKind, InboundRequest, DEFAULT_TRAINING_KEYWORD};
use super::turns::KeyedLocks;
use crate::channels::Delivery;
use crate::classifier::{Classifier, ClassifierError};
use crate::context::{CommitStatus, ContextStore};
use crate::packages::{
    normalize_route, HealthState, InvokeError, PackageRegistry, SkillTransport,
};
use crate::routing::ResponseRouter;
use crate::transcript::{Transcript, TurnRecord};
use crate::types::{
    Context, DispatchOutcome, FlexIdentity, Message, OutcomeError, User, ANONYMOUS_USER_ID,
};
use crate::users::UserStore;

pub const DEFAULT_SKILL_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_FALLBACK_REPLY: &str = "Sorry, I didn't understand that.";

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("classifier has not been trained yet")]
    ClassifierUntrained,
    #[error("training failed: {0}")]
    Training(ClassifierError),
}

impl From<ClassifierError> for DispatchError {
    fn from(e: ClassifierError) -> Self {
        match e {
            ClassifierError::Untrained => DispatchError::ClassifierUntrained,
            ClassifierError::InvalidExample(m) => DispatchError::InvalidCommand(m),
            other => DispatchError::Training(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub skill_timeout: Duration,
    pub fallback_reply: String,
    pub training_keyword: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            skill_timeout: DEFAULT_SKILL_TIMEOUT,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            training_keyword: DEFAULT_TRAINING_KEYWORD.to_string(),
        }
    }
}

/// Services the dispatcher orchestrates. Each is owned by the caller and shared by `Arc`.
#[derive(Clone)]
pub struct DispatchServices {
    pub classifier: Arc<Classifier>,
    pub users: Arc<UserStore>,
    pub contexts: Arc<ContextStore>,
    pub registry: Arc<PackageRegistry>,
    pub transport: Arc<dyn SkillTransport>,
    pub transcript: Arc<dyn Transcript>,
    pub router: Arc<ResponseRouter>,
}

/// Reply for the request layer plus what happened to its delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub reply: String,
    /// False when the channel's delivery path failed or does not exist.
    pub delivered: bool,
    /// True when the reply should travel back in the response body.
    pub inline: bool,
}

pub struct Dispatcher {
    services: DispatchServices,
    settings: DispatchSettings,
    turns: KeyedLocks<FlexIdentity>,
}

impl Dispatcher {
    pub fn new(services: DispatchServices, settings: DispatchSettings) -> Self {
        Self {
            services,
            settings,
            turns: KeyedLocks::new(),
        }
    }

    pub fn services(&self) -> &DispatchServices {
        &self.services
    }

    /// Run one turn and return the reply text. Only an empty or malformed command, an
    /// untrained classifier, or a failed training write surface as errors.
    pub async fn handle(&self, req: &InboundRequest) -> Result<String, DispatchError> {
        let text = req.text.trim();
        if text.is_empty() {
            return Err(DispatchError::InvalidCommand("empty command".to_string()));
        }
        match parse_command(text, &self.settings.training_keyword) {
            CommandKind::Train { label, example } => {
                self.services.classifier.train(label, example).await?;
                log::info!("dispatch: trained {} from {}", label, req.identity);
                return Ok(String::new());
            }
            CommandKind::MalformedTrain => {
                return Err(DispatchError::InvalidCommand(format!(
                    "expected `{} <label>: <example>`",
                    self.settings.training_keyword
                )));
            }
            CommandKind::Dispatch => {}
        }

        let _turn_lock = self.turns.lock(req.identity.clone()).await;
        let input = self.services.classifier.classify(text).await?;
        let user = self.resolve_user(req).await;
        let (context, turn) = if user.is_anonymous() {
            (Context::empty(ANONYMOUS_USER_ID), None)
        } else {
            let contexts = &self.services.contexts;
            let turn = contexts.begin_turn(user.id).await;
            let prior = contexts.get_context(user.id).await;
            (contexts.merge_context(user.id, &input, &prior), Some(turn))
        };
        let message = Message {
            user,
            input,
            context,
        };

        let outcome = self.dispatch(&message, req.route.as_deref()).await;

        let record = TurnRecord::new(
            message.user.id,
            req.identity.clone(),
            message.input.clone(),
            outcome.clone(),
        );
        if let Err(e) = self.services.transcript.save_turn(&record).await {
            log::warn!("dispatch: saving turn {} failed: {}", record.id, e);
        }
        if let Some(turn) = turn {
            let status = self
                .services
                .contexts
                .commit_context(message.user.id, turn, &message.input, &outcome)
                .await;
            if status == CommitStatus::Stale {
                log::debug!("dispatch: context for user {} moved past turn {}", message.user.id, turn);
            }
        }
        Ok(outcome.reply_text)
    }

    /// `handle`, then deliver the reply over the request's channel. Delivery problems are
    /// logged and reported through `delivered`; the reply is always returned.
    pub async fn respond(&self, req: &InboundRequest) -> Result<TurnReply, DispatchError> {
        let reply = self.handle(req).await?;
        if reply.is_empty() {
            return Ok(TurnReply {
                reply,
                delivered: true,
                inline: true,
            });
        }
        let (delivered, inline) = match self.services.router.deliver(&req.identity, &reply).await {
            Ok(Delivery::Inline) => (true, true),
            Ok(Delivery::Sent(receipt)) => {
                log::debug!("dispatch: reply to {} sent ({})", req.identity, receipt.id);
                (true, false)
            }
            Err(e) => {
                log::warn!("dispatch: delivering reply to {} failed: {}", req.identity, e);
                (false, false)
            }
        };
        Ok(TurnReply {
            reply,
            delivered,
            inline,
        })
    }

    async fn resolve_user(&self, req: &InboundRequest) -> User {
        if let Some(id) = req.user_id.filter(|id| *id != ANONYMOUS_USER_ID) {
            if let Some(user) = self.services.users.get_user(id).await {
                return user;
            }
            log::debug!("dispatch: unknown user id {}, resolving {}", id, req.identity);
        }
        match self.services.users.resolve_user(&req.identity).await {
            Ok(user) => user,
            Err(e) => {
                log::info!("dispatch: {}; continuing anonymously", e);
                User::anonymous()
            }
        }
    }

    /// Look up and invoke the package for this message. Never fails: every failure becomes the
    /// fallback reply tagged with its cause.
    async fn dispatch(&self, message: &Message, explicit_route: Option<&str>) -> DispatchOutcome {
        let explicit = explicit_route
            .map(str::to_string)
            .or_else(|| follow_up_route(message));
        let fallback = self.settings.fallback_reply.as_str();

        // The route recorded for the turn is the target that actually matched.
        let (package, route) = match self
            .services
            .registry
            .lookup(message.input.intent(), explicit.as_deref())
            .await
        {
            Ok(found) => found,
            Err(e) => {
                log::debug!("dispatch: {}", e);
                let tried = explicit
                    .as_deref()
                    .or(message.input.intent())
                    .map(normalize_route)
                    .unwrap_or_default();
                return DispatchOutcome::fallback(fallback, "", tried, OutcomeError::MissingPackage);
            }
        };

        let invocation = self.services.transport.invoke(&package, message);
        let failure = match tokio::time::timeout(self.settings.skill_timeout, invocation).await {
            Ok(Ok(mut outcome)) => {
                self.services
                    .registry
                    .mark_health(&package.name, HealthState::Healthy)
                    .await;
                outcome.package_name = package.name.clone();
                if outcome.route.is_empty() {
                    outcome.route = route;
                }
                if outcome.reply_text.trim().is_empty() {
                    outcome.reply_text = fallback.to_string();
                }
                return outcome;
            }
            Ok(Err(InvokeError::Remote { status, body })) => {
                log::warn!("dispatch: package {} returned {}: {}", package.name, status, body);
                OutcomeError::Remote
            }
            Ok(Err(e @ InvokeError::Unknown(_))) => {
                log::warn!("dispatch: {}", e);
                self.services
                    .registry
                    .mark_health(&package.name, HealthState::Unreachable)
                    .await;
                OutcomeError::MissingPackage
            }
            Ok(Err(e)) => {
                log::warn!("dispatch: invoking package {} failed: {}", package.name, e);
                self.services
                    .registry
                    .mark_health(&package.name, HealthState::Unreachable)
                    .await;
                OutcomeError::Transport
            }
            Err(_) => {
                log::warn!(
                    "dispatch: package {} timed out after {:?}",
                    package.name,
                    self.settings.skill_timeout
                );
                OutcomeError::Timeout
            }
        };
        DispatchOutcome::fallback(fallback, package.name, route, failure)
    }
}

/// An unclassified message answering a package's open question goes back to that package.
fn follow_up_route(message: &Message) -> Option<String> {
    if message.input.is_classified() || message.context.pending_slots.is_empty() {
        return None;
    }
    message.context.last_route.clone()
}

//! Command dispatch: the end-to-end turn pipeline, the training pseudo-command, and the
//! per-identity turn locks that keep one caller's turns in order.

mod command;
mod dispatcher;
mod turns;

pub use command::{parse_command, CommandKind, InboundRequest, DEFAULT_TRAINING_KEYWORD};
pub use dispatcher::{
    DispatchError, DispatchServices, DispatchSettings, Dispatcher, TurnReply,
    DEFAULT_FALLBACK_REPLY, DEFAULT_SKILL_TIMEOUT,
};
pub use turns::{KeyedLocks, TurnGuard};

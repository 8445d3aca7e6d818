//! Message observers.
//!
//! - `before_any_message`: outbound requests (id assigned, not yet encoded)
//!   and inbound requests (before they reach the application)
//! - `after_any_message`: outbound responses (not yet encoded) and matched
//!   inbound responses (before the waiting caller is woken)

use std::fmt;
use std::sync::Arc;

use crate::protocol::Message;

/// Observer callback.
pub type MessageHook = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct MessageHooks {
    pub(crate) before_any_message: Option<MessageHook>,
    pub(crate) after_any_message: Option<MessageHook>,
}

impl MessageHooks {
    #[inline]
    pub(crate) fn before(&self, message: &Message) {
        if let Some(hook) = &self.before_any_message {
            hook(message);
        }
    }

    #[inline]
    pub(crate) fn after(&self, message: &Message) {
        if let Some(hook) = &self.after_any_message {
            hook(message);
        }
    }
}

impl fmt::Debug for MessageHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHooks")
            .field("before_any_message", &self.before_any_message.is_some())
            .field("after_any_message", &self.after_any_message.is_some())
            .finish()
    }
}

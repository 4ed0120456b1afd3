use teachprompt_core::UserId;

/// Requester identity for a request.
///
/// Set by the upstream auth gateway via `x-user-id`; present on every
/// `/optimizations` route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequesterContext {
    user_id: UserId,
}

impl RequesterContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

// ABOUTME: Registry of in-flight authorization flows keyed by their CSRF state
// ABOUTME: Hands out each state once, expires stale flows, and fans results out to waiting callers

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::{
    error::AuthError,
    oauth::types::{AuthorizationRequest, OAuthToken},
};

/// Why a pending flow ended without a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowFailure {
    TimedOut,
    Failed(String),
}

impl From<FlowFailure> for AuthError {
    fn from(failure: FlowFailure) -> Self {
        match failure {
            FlowFailure::TimedOut => AuthError::FlowTimedOut,
            FlowFailure::Failed(message) => AuthError::OAuthFailed(message),
        }
    }
}

pub type FlowOutcome = Result<OAuthToken, FlowFailure>;

/// One authorization attempt waiting for its redirect
#[derive(Debug)]
pub struct PendingFlow {
    pub user_id: String,
    pub code_verifier: String,
    pub request: AuthorizationRequest,
    waiters: Vec<oneshot::Sender<FlowOutcome>>,
}

impl PendingFlow {
    pub fn new(user_id: &str, code_verifier: String, request: AuthorizationRequest) -> Self {
        Self {
            user_id: user_id.to_string(),
            code_verifier,
            request,
            waiters: Vec::new(),
        }
    }

    pub fn state(&self) -> &str {
        &self.request.state
    }

    pub fn redirect_uri(&self) -> &str {
        &self.request.redirect_uri
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.request.expires_at
    }

    /// Deliver the outcome to every caller that joined this flow
    pub fn resolve(self, outcome: &FlowOutcome) -> usize {
        let mut delivered = 0;
        for waiter in self.waiters {
            if waiter.send(outcome.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// State-keyed map of pending flows
#[derive(Debug, Default)]
pub struct PendingFlows {
    flows: Mutex<HashMap<String, PendingFlow>>,
}

impl PendingFlows {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, flow: PendingFlow) {
        let state = flow.state().to_string();
        debug!("Registering pending authorization flow for user {}", flow.user_id);
        self.flows.lock().await.insert(state, flow);
    }

    /// Insert `flow` unless its user already has a live one.
    /// Returns the existing request when the new flow was discarded.
    pub async fn register(&self, flow: PendingFlow, now: i64) -> Option<AuthorizationRequest> {
        let mut flows = self.flows.lock().await;
        if let Some(existing) = flows
            .values()
            .find(|existing| existing.user_id == flow.user_id && !existing.is_expired(now))
        {
            debug!("Reusing pending authorization flow for user {}", flow.user_id);
            return Some(existing.request.clone());
        }

        debug!("Registering pending authorization flow for user {}", flow.user_id);
        flows.insert(flow.state().to_string(), flow);
        None
    }

    /// Remove and return the flow for `state`; a state can be taken once.
    /// Expired flows are dropped (their waiters see a timeout) and yield `None`.
    pub async fn take(&self, state: &str, now: i64) -> Option<PendingFlow> {
        let flow = self.flows.lock().await.remove(state)?;
        if flow.is_expired(now) {
            debug!("Pending flow for user {} expired before callback", flow.user_id);
            flow.resolve(&Err(FlowFailure::TimedOut));
            return None;
        }
        Some(flow)
    }

    /// The live request for `user_id`, if a flow is already waiting for its redirect
    pub async fn find_active_for_user(&self, user_id: &str, now: i64) -> Option<AuthorizationRequest> {
        self.flows
            .lock()
            .await
            .values()
            .find(|flow| flow.user_id == user_id && !flow.is_expired(now))
            .map(|flow| flow.request.clone())
    }

    /// Join the live flow for `user_id` and receive its outcome
    pub async fn subscribe_user(
        &self,
        user_id: &str,
        now: i64,
    ) -> Option<oneshot::Receiver<FlowOutcome>> {
        let mut flows = self.flows.lock().await;
        let flow = flows
            .values_mut()
            .find(|flow| flow.user_id == user_id && !flow.is_expired(now))?;

        let (tx, rx) = oneshot::channel();
        flow.waiters.push(tx);
        Some(rx)
    }

    /// Join the flow registered under `state`
    pub async fn subscribe(&self, state: &str) -> Option<oneshot::Receiver<FlowOutcome>> {
        let mut flows = self.flows.lock().await;
        let flow = flows.get_mut(state)?;

        let (tx, rx) = oneshot::channel();
        flow.waiters.push(tx);
        Some(rx)
    }

    /// Drop the flow for `state` and report `failure` to its waiters
    pub async fn fail(&self, state: &str, failure: FlowFailure) -> bool {
        let flow = self.flows.lock().await.remove(state);
        match flow {
            Some(flow) => {
                flow.resolve(&Err(failure));
                true
            }
            None => false,
        }
    }

    /// Drop every flow past its deadline; returns how many were removed
    pub async fn purge_expired(&self, now: i64) -> usize {
        let expired: Vec<PendingFlow> = {
            let mut flows = self.flows.lock().await;
            let states: Vec<String> = flows
                .iter()
                .filter(|(_, flow)| flow.is_expired(now))
                .map(|(state, _)| state.clone())
                .collect();
            states
                .iter()
                .filter_map(|state| flows.remove(state))
                .collect()
        };

        let count = expired.len();
        for flow in expired {
            flow.resolve(&Err(FlowFailure::TimedOut));
        }
        if count > 0 {
            debug!("Purged {} expired authorization flow(s)", count);
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.flows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.flows.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn flow(user: &str, state: &str, expires_at: i64) -> PendingFlow {
        PendingFlow::new(
            user,
            format!("verifier-{}", state),
            AuthorizationRequest {
                url: Url::parse("https://open.cherryin.ai/oauth2/auth").unwrap(),
                state: state.to_string(),
                redirect_uri: "http://127.0.0.1:1/oauth/callback".to_string(),
                expires_at,
            },
        )
    }

    fn token(user: &str) -> OAuthToken {
        OAuthToken {
            user_id: user.to_string(),
            access_token: "at".to_string(),
            refresh_token: None,
            expires_at: None,
            token_type: "Bearer".to_string(),
            scope: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_state_can_be_taken_once() {
        let flows = PendingFlows::new();
        flows.insert(flow("alice", "s1", 100)).await;

        let taken = flows.take("s1", 10).await.unwrap();
        assert_eq!(taken.code_verifier, "verifier-s1");
        assert!(flows.take("s1", 10).await.is_none());
        assert!(flows.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_state_is_rejected_and_waiters_time_out() {
        let flows = PendingFlows::new();
        flows.insert(flow("alice", "s1", 100)).await;
        let rx = flows.subscribe("s1").await.unwrap();

        assert!(flows.take("s1", 100).await.is_none());
        assert_eq!(rx.await.unwrap(), Err(FlowFailure::TimedOut));
    }

    #[tokio::test]
    async fn test_find_active_for_user_skips_expired_and_other_users() {
        let flows = PendingFlows::new();
        flows.insert(flow("alice", "old", 50)).await;
        flows.insert(flow("bob", "bob-state", 500)).await;

        assert!(flows.find_active_for_user("alice", 60).await.is_none());

        flows.insert(flow("alice", "new", 500)).await;
        let request = flows.find_active_for_user("alice", 60).await.unwrap();
        assert_eq!(request.state, "new");
    }

    #[tokio::test]
    async fn test_register_deduplicates_per_user() {
        let flows = PendingFlows::new();
        assert!(flows.register(flow("alice", "first", 500), 10).await.is_none());

        let existing = flows.register(flow("alice", "second", 500), 10).await.unwrap();
        assert_eq!(existing.state, "first");
        assert!(flows.register(flow("bob", "bobs", 500), 10).await.is_none());
        assert_eq!(flows.len().await, 2);

        // An expired flow does not block a new one
        assert!(flows.register(flow("alice", "third", 900), 600).await.is_none());
    }

    #[tokio::test]
    async fn test_waiters_receive_resolved_token() {
        let flows = PendingFlows::new();
        flows.insert(flow("alice", "s1", 500)).await;
        let first = flows.subscribe_user("alice", 10).await.unwrap();
        let second = flows.subscribe_user("alice", 10).await.unwrap();
        assert!(flows.subscribe_user("bob", 10).await.is_none());

        let taken = flows.take("s1", 10).await.unwrap();
        assert_eq!(taken.resolve(&Ok(token("alice"))), 2);

        assert_eq!(first.await.unwrap().unwrap().user_id, "alice");
        assert_eq!(second.await.unwrap().unwrap().access_token, "at");
    }

    #[tokio::test]
    async fn test_fail_notifies_waiters() {
        let flows = PendingFlows::new();
        flows.insert(flow("alice", "s1", 500)).await;
        let rx = flows.subscribe("s1").await.unwrap();

        assert!(flows.fail("s1", FlowFailure::Failed("access_denied".into())).await);
        assert!(!flows.fail("s1", FlowFailure::TimedOut).await);
        assert_eq!(
            rx.await.unwrap(),
            Err(FlowFailure::Failed("access_denied".into()))
        );
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let flows = PendingFlows::new();
        flows.insert(flow("alice", "a", 10)).await;
        flows.insert(flow("bob", "b", 20)).await;
        flows.insert(flow("carol", "c", 30)).await;

        assert_eq!(flows.purge_expired(20).await, 2);
        assert_eq!(flows.len().await, 1);
        assert!(flows.take("c", 20).await.is_some());
    }

    #[test]
    fn test_failure_maps_to_auth_error() {
        assert!(matches!(
            AuthError::from(FlowFailure::TimedOut),
            AuthError::FlowTimedOut
        ));
        assert!(matches!(
            AuthError::from(FlowFailure::Failed("x".into())),
            AuthError::OAuthFailed(_)
        ));
    }
}

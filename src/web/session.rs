//! Per-connection state machine of the realtime gateway.
//!
//! A connection starts unauthenticated and only listens for `auth`. Once a
//! credential verifies it is bound to that user: it receives the latest
//! samples and its own pending alert, and may subscribe with `notify`.
//! Closing the connection never touches the registry; delivery happens
//! through the bot, not the socket.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, FixedOffset};
use tracing::{debug, error, info, warn};

use crate::db::{MeasurementStore, NotificationRegistry};
use crate::services::CredentialVerifier;
use crate::web::models::websocket_models::{AlertView, ClientEvent, ServerEvent};

/// Collaborators and settings shared by every session.
pub struct GatewayContext {
    pub measurements: Arc<dyn MeasurementStore>,
    pub registry: Arc<dyn NotificationRegistry>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub auth_secret: String,
    pub recent_window: usize,
    pub delivery_window: ChronoDuration,
    pub display_offset: FixedOffset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { user_id: String },
}

pub struct Session {
    state: SessionState,
    ctx: Arc<GatewayContext>,
}

impl Session {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self {
            state: SessionState::Unauthenticated,
            ctx,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Applies one client event and returns the pushes for this client.
    pub async fn handle(&mut self, event: ClientEvent) -> Vec<ServerEvent> {
        match event {
            ClientEvent::Auth(payload) => self.authenticate(&payload.sign).await,
            ClientEvent::Notify => match &self.state {
                SessionState::Authenticated { user_id } => {
                    let user_id = user_id.clone();
                    self.subscribe(&user_id).await
                }
                SessionState::Unauthenticated => {
                    debug!("Ignoring notify on an unauthenticated connection.");
                    Vec::new()
                }
            },
        }
    }

    async fn authenticate(&mut self, sign: &str) -> Vec<ServerEvent> {
        // Clients send the launch query string with its leading `?`.
        let mut chars = sign.chars();
        chars.next();
        let user_id = match self.ctx.verifier.verify(chars.as_str(), &self.ctx.auth_secret) {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(error = %e, "Credential verification failed, connection stays unauthenticated.");
                return Vec::new();
            }
        };

        info!(user_id = %user_id, "Connection authenticated.");
        self.state = SessionState::Authenticated {
            user_id: user_id.clone(),
        };

        let mut pushes = Vec::new();
        match self.ctx.measurements.recent(self.ctx.recent_window).await {
            Ok(points) => pushes.push(ServerEvent::Times(points)),
            Err(e) => error!(error = %e, "Failed to load recent samples for a new session."),
        }
        pushes.extend(self.pending_alert(&user_id).await);
        pushes
    }

    async fn subscribe(&self, user_id: &str) -> Vec<ServerEvent> {
        if let Err(e) = self.ctx.registry.upsert(user_id).await {
            error!(user_id = %user_id, error = %e, "Failed to store pending alert.");
            return Vec::new();
        }
        info!(user_id = %user_id, "User is waiting for the site to become fast.");
        self.pending_alert(user_id).await.into_iter().collect()
    }

    async fn pending_alert(&self, user_id: &str) -> Option<ServerEvent> {
        match self.ctx.registry.get(user_id).await {
            Ok(alert) => alert.map(|alert| {
                ServerEvent::Notify(AlertView::from_alert(
                    &alert,
                    self.ctx.delivery_window,
                    self.ctx.display_offset,
                ))
            }),
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to load pending alert.");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryMeasurementStore, MemoryNotificationRegistry, system_clock};
    use crate::services::AuthError;
    use chrono::Utc;

    /// Accepts credentials of the form `user=<id>` for the secret `s3cret`.
    struct StubVerifier;

    impl CredentialVerifier for StubVerifier {
        fn verify(&self, signed_payload: &str, secret: &str) -> Result<String, AuthError> {
            if secret != "s3cret" {
                return Err(AuthError::InvalidSignature);
            }
            signed_payload
                .strip_prefix("user=")
                .map(str::to_string)
                .ok_or(AuthError::InvalidSignature)
        }
    }

    struct Fixture {
        measurements: Arc<MemoryMeasurementStore>,
        registry: Arc<MemoryNotificationRegistry>,
        ctx: Arc<GatewayContext>,
    }

    fn fixture() -> Fixture {
        let offset = FixedOffset::east_opt(0).unwrap();
        let measurements = Arc::new(MemoryMeasurementStore::new(system_clock(), offset));
        let registry = Arc::new(MemoryNotificationRegistry::new(system_clock()));
        let ctx = Arc::new(GatewayContext {
            measurements: measurements.clone(),
            registry: registry.clone(),
            verifier: Arc::new(StubVerifier),
            auth_secret: "s3cret".to_string(),
            recent_window: 6,
            delivery_window: ChronoDuration::hours(5),
            display_offset: offset,
        });
        Fixture {
            measurements,
            registry,
            ctx,
        }
    }

    fn auth(sign: &str) -> ClientEvent {
        ClientEvent::Auth(crate::web::models::websocket_models::AuthPayload {
            sign: sign.to_string(),
        })
    }

    #[tokio::test]
    async fn test_auth_without_pending_alert_pushes_times_only() {
        let fx = fixture();
        fx.measurements.record(4.2).await.unwrap();
        let mut session = Session::new(fx.ctx.clone());

        let pushes = session.handle(auth("?user=u1")).await;

        assert_eq!(
            session.state(),
            &SessionState::Authenticated {
                user_id: "u1".to_string()
            }
        );
        assert_eq!(pushes.len(), 1);
        match &pushes[0] {
            ServerEvent::Times(points) => {
                assert_eq!(points.len(), 1);
                assert_eq!(points[0].loadtime, 4.2);
            }
            other => panic!("expected times, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_auth_with_pending_alert_pushes_notify() {
        let fx = fixture();
        fx.registry.upsert("u1").await.unwrap();
        let mut session = Session::new(fx.ctx.clone());

        let pushes = session.handle(auth("?user=u1")).await;

        assert_eq!(pushes.len(), 2);
        assert!(matches!(pushes[0], ServerEvent::Times(_)));
        match &pushes[1] {
            ServerEvent::Notify(view) => assert_eq!(view.id, "u1"),
            other => panic!("expected notify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_credential_stays_unauthenticated() {
        let fx = fixture();
        let mut session = Session::new(fx.ctx.clone());

        assert!(session.handle(auth("?bogus")).await.is_empty());
        assert_eq!(session.state(), &SessionState::Unauthenticated);

        // The leading character is always dropped, so an unprefixed credential fails too.
        assert!(session.handle(auth("user=u1")).await.is_empty());
        assert!(session.handle(auth("")).await.is_empty());
        assert_eq!(session.state(), &SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_notify_before_auth_is_ignored() {
        let fx = fixture();
        let mut session = Session::new(fx.ctx.clone());

        assert!(session.handle(ClientEvent::Notify).await.is_empty());
        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_notify_creates_and_echoes_pending_alert() {
        let fx = fixture();
        let mut session = Session::new(fx.ctx.clone());
        session.handle(auth("?user=u1")).await;

        let before = Utc::now();
        let pushes = session.handle(ClientEvent::Notify).await;

        let stored = fx.registry.get("u1").await.unwrap().unwrap();
        assert!(stored.start_time >= before);
        assert!(stored.start_time <= Utc::now());
        assert_eq!(
            pushes,
            vec![ServerEvent::Notify(AlertView::from_alert(
                &stored,
                ChronoDuration::hours(5),
                FixedOffset::east_opt(0).unwrap(),
            ))]
        );
    }

    #[tokio::test]
    async fn test_repeated_notify_refreshes_single_record() {
        let fx = fixture();
        let mut session = Session::new(fx.ctx.clone());
        session.handle(auth("?user=u1")).await;

        session.handle(ClientEvent::Notify).await;
        let first = fx.registry.get("u1").await.unwrap().unwrap();
        session.handle(ClientEvent::Notify).await;
        let second = fx.registry.get("u1").await.unwrap().unwrap();

        assert_eq!(fx.registry.len(), 1);
        assert!(second.start_time >= first.start_time);
    }

    #[tokio::test]
    async fn test_reauth_switches_user() {
        let fx = fixture();
        let mut session = Session::new(fx.ctx.clone());
        session.handle(auth("?user=u1")).await;
        session.handle(auth("?user=u2")).await;
        session.handle(ClientEvent::Notify).await;

        assert!(fx.registry.get("u1").await.unwrap().is_none());
        assert!(fx.registry.get("u2").await.unwrap().is_some());
    }
}

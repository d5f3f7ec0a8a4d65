//! Per-connection handler: read a line, dispatch it, write one response.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! Requests on one connection are handled strictly in order; a malformed
//! or failed request produces an error response and the loop carries on.
//! The loop ends when the peer disconnects, a read fails, the connection
//! is closed by the idle sweep or shutdown, or a fatal error occurs.

use std::sync::Arc;

use warden_protocol::{
    Codec, LoginData, MessageData, RegisterData, Request, RequestKind, Response, ValidateData,
};
use warden_session::{AuthProvider, Session, SessionError};
use warden_transport::{Connection, TransportError};

use crate::WardenError;
use crate::registry::ConnectionRecord;
use crate::server::ServerState;

/// Drop guard that removes the connection from the registry and clears its
/// presence record when the handler exits, including on panic.
///
/// `Drop` is synchronous, so the async cleanup runs on a spawned task.
struct ConnectionGuard<A: AuthProvider, K: Codec, C: Connection> {
    record: Arc<ConnectionRecord<C>>,
    state: Arc<ServerState<A, K, C>>,
}

impl<A, K, C> Drop for ConnectionGuard<A, K, C>
where
    A: AuthProvider,
    K: Codec,
    C: Connection,
{
    fn drop(&mut self) {
        // No runtime means the process is already going down.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let record = Arc::clone(&self.record);
        let state = Arc::clone(&self.state);
        runtime.spawn(async move {
            let id = record.id();
            state.registry.deregister(id).await;
            if record.binding().is_some() {
                state.auth.detach(&id.to_string()).await;
            }
            if let Err(e) = record.connection().close().await {
                tracing::debug!(%id, error = %e, "close after handler exit failed");
            }
        });
    }
}

/// Handles a single registered connection until it ends.
pub(crate) async fn handle_connection<A, K, C>(
    record: Arc<ConnectionRecord<C>>,
    state: Arc<ServerState<A, K, C>>,
) -> Result<(), WardenError>
where
    A: AuthProvider,
    K: Codec,
    C: Connection<Error = TransportError>,
{
    let conn_id = record.id();
    let _guard = ConnectionGuard {
        record: Arc::clone(&record),
        state: Arc::clone(&state),
    };
    let conn = Arc::clone(record.connection());
    tracing::debug!(%conn_id, "handling new connection");

    loop {
        let frame = match conn.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!(%conn_id, "connection closed");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        };
        record.touch();

        if frame.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let request: Request = match state.codec.decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "undecodable request");
                send_response(conn.as_ref(), &state.codec, &Response::error("invalid JSON format"))
                    .await?;
                continue;
            }
        };

        let mut fatal = false;
        let response = match request.kind() {
            Err(e) => {
                tracing::debug!(%conn_id, kind = %request.kind, "unknown request type");
                Response::error(e.to_string())
            }
            Ok(kind) => {
                tracing::debug!(%conn_id, %kind, "request");
                match dispatch(&state.auth, &record, &request, kind).await {
                    Ok(response) => response,
                    Err(e) => {
                        log_failure(&record, kind, &e);
                        fatal = e.is_fatal();
                        Response::error(e.client_message())
                    }
                }
            }
        };

        send_response(conn.as_ref(), &state.codec, &response).await?;

        if fatal {
            tracing::error!(%conn_id, "cannot issue credentials, shutting down");
            // Err only means nobody is listening, i.e. shutdown is underway.
            let _ = state.shutdown.send(());
            break;
        }
    }

    // _guard drops here → deregister + presence cleanup fire.
    Ok(())
}

/// Runs one request against the auth provider and shapes the response.
///
/// Missing fields are answered here, before anything touches a store.
async fn dispatch<A, C>(
    auth: &A,
    record: &ConnectionRecord<C>,
    request: &Request,
    kind: RequestKind,
) -> Result<Response, SessionError>
where
    A: AuthProvider,
    C: Connection,
{
    match kind {
        RequestKind::Register => {
            let (Some(username), Some(email), Some(password)) =
                (request.username(), request.email(), request.password())
            else {
                return Ok(Response::error("username, email, and password are required"));
            };
            let user = auth.register(username, email, password).await?;
            Ok(Response::success(RegisterData {
                user_id: user.id,
                username: user.username,
                email: user.email,
            }))
        }

        RequestKind::Login => {
            let (Some(username), Some(password)) = (request.username(), request.password())
            else {
                return Ok(Response::error("username and password are required"));
            };
            let session = auth.login(username, password).await?;
            bind_session(auth, record, &session).await;
            Ok(Response::success(login_data(session)))
        }

        RequestKind::Logout => {
            let Some(token) = request.token() else {
                return Ok(token_required());
            };
            auth.logout(token).await?;
            if record.clear_if(token) {
                auth.detach(&record.id().to_string()).await;
            }
            Ok(Response::success(MessageData {
                message: "logged out successfully".to_string(),
            }))
        }

        RequestKind::Validate => {
            let Some(token) = request.token() else {
                return Ok(token_required());
            };
            let data = match auth.validate(token).await {
                Ok(user) => ValidateData {
                    valid: true,
                    user_id: Some(user.id),
                    username: Some(user.username),
                    email: Some(user.email),
                },
                Err(SessionError::InvalidOrExpired) => ValidateData::invalid(),
                Err(e) => return Err(e),
            };
            Ok(Response::success(data))
        }

        RequestKind::Refresh => {
            let Some(token) = request.token() else {
                return Ok(token_required());
            };
            let session = auth.refresh(token).await?;
            bind_session(auth, record, &session).await;
            Ok(Response::success(login_data(session)))
        }
    }
}

async fn bind_session<A: AuthProvider, C: Connection>(
    auth: &A,
    record: &ConnectionRecord<C>,
    session: &Session,
) {
    record.bind(&session.user_id, session.token.as_str());
    auth.attach(&record.id().to_string(), session).await;
}

fn login_data(session: Session) -> LoginData {
    LoginData {
        expires_at: session.expires_at.timestamp(),
        token: session.token.into_string(),
        user_id: session.user_id,
        username: session.username,
        email: session.email,
    }
}

fn token_required() -> Response {
    Response::error("token is required")
}

fn log_failure<C: Connection>(record: &ConnectionRecord<C>, kind: RequestKind, err: &SessionError) {
    let conn_id = record.id();
    match err {
        SessionError::StoreUnavailable(source) => {
            tracing::error!(%conn_id, %kind, error = %source, "store unavailable");
        }
        SessionError::Entropy(source) => {
            tracing::error!(%conn_id, %kind, error = %source, "token generation failed");
        }
        other => {
            tracing::debug!(%conn_id, %kind, error = %other, "request rejected");
        }
    }
}

/// Encodes and sends one response.
async fn send_response<C>(conn: &C, codec: &impl Codec, response: &Response) -> Result<(), WardenError>
where
    C: Connection<Error = TransportError>,
{
    let bytes = codec.encode(response)?;
    conn.send(&bytes).await?;
    Ok(())
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use warden_protocol::{ResponseData, Status};
    use warden_session::{
        AuthService, SessionConfig, SessionManager, SessionStore, StoreConfig,
    };
    use warden_store::{BcryptVerifier, CacheStore, MemoryAudit, MemoryCache, MemoryUsers};

    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::registry::tests::MockConnection;

    type Service = AuthService<MemoryCache, MemoryAudit, MemoryUsers, BcryptVerifier>;

    fn service() -> Service {
        let store = SessionStore::new(MemoryCache::new(), MemoryAudit::new(), StoreConfig::default());
        AuthService::new(
            SessionManager::new(store, SessionConfig::default()),
            MemoryUsers::new(),
            BcryptVerifier::with_cost(4),
        )
    }

    async fn record() -> Arc<ConnectionRecord<MockConnection>> {
        ConnectionRegistry::new()
            .register(MockConnection::new(1))
            .await
            .unwrap()
    }

    async fn run(
        auth: &Service,
        record: &ConnectionRecord<MockConnection>,
        request: Request,
    ) -> Result<Response, SessionError> {
        let kind = request.kind().unwrap();
        dispatch(auth, record, &request, kind).await
    }

    fn register(username: &str) -> Request {
        Request::new(RequestKind::Register)
            .with_username(username)
            .with_email(format!("{username}@x.com"))
            .with_password("secret1")
    }

    fn login(username: &str) -> Request {
        Request::new(RequestKind::Login)
            .with_username(username)
            .with_password("secret1")
    }

    fn token_of(response: &Response) -> String {
        match &response.data {
            Some(ResponseData::Login(data)) => data.token.clone(),
            other => panic!("expected login data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_register_missing_fields_is_error_response() {
        let auth = service();
        let record = record().await;
        let request = Request::new(RequestKind::Register).with_username("alice");

        let response = run(&auth, &record, request).await.unwrap();

        assert_eq!(response.status, Status::Error);
        assert_eq!(
            response.message.as_deref(),
            Some("username, email, and password are required")
        );
    }

    #[tokio::test]
    async fn test_dispatch_login_binds_connection() {
        let auth = service();
        let record = record().await;
        run(&auth, &record, register("alice")).await.unwrap();

        let response = run(&auth, &record, login("alice")).await.unwrap();
        let token = token_of(&response);

        let binding = record.binding().unwrap();
        assert_eq!(binding.token, token);
        let presence = auth
            .sessions()
            .store()
            .cache()
            .get("connection:conn-1")
            .await
            .unwrap();
        assert!(presence.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_logout_bound_token_clears_binding() {
        let auth = service();
        let record = record().await;
        run(&auth, &record, register("alice")).await.unwrap();
        let token = token_of(&run(&auth, &record, login("alice")).await.unwrap());

        let response = run(
            &auth,
            &record,
            Request::new(RequestKind::Logout).with_token(&token),
        )
        .await
        .unwrap();

        assert!(response.is_success());
        assert!(record.binding().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_validate_unknown_token_is_success_with_invalid() {
        let auth = service();
        let record = record().await;

        let response = run(
            &auth,
            &record,
            Request::new(RequestKind::Validate).with_token("nope"),
        )
        .await
        .unwrap();

        assert!(response.is_success());
        assert_eq!(
            response.data,
            Some(ResponseData::Validate(ValidateData::invalid()))
        );
    }

    #[tokio::test]
    async fn test_dispatch_refresh_rebinds_to_new_token() {
        let auth = service();
        let record = record().await;
        run(&auth, &record, register("alice")).await.unwrap();
        let old = token_of(&run(&auth, &record, login("alice")).await.unwrap());

        let response = run(
            &auth,
            &record,
            Request::new(RequestKind::Refresh).with_token(&old),
        )
        .await
        .unwrap();
        let fresh = token_of(&response);

        assert_ne!(fresh, old);
        assert_eq!(record.binding().unwrap().token, fresh);
    }

    #[tokio::test]
    async fn test_dispatch_token_required_for_token_kinds() {
        let auth = service();
        let record = record().await;
        for kind in [RequestKind::Logout, RequestKind::Validate, RequestKind::Refresh] {
            let response = run(&auth, &record, Request::new(kind)).await.unwrap();
            assert_eq!(response.message.as_deref(), Some("token is required"));
        }
    }

    #[tokio::test]
    async fn test_dispatch_store_outage_is_internal_error() {
        let auth = service();
        let record = record().await;
        run(&auth, &record, register("alice")).await.unwrap();
        auth.sessions().store().cache().set_unavailable(true);

        let err = run(&auth, &record, login("alice")).await.unwrap_err();
        assert_eq!(err.client_message(), "internal server error");
        assert!(record.binding().is_none());
    }
}

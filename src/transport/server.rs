use iroh::endpoint::Connection;
use web_transport_proto::{ConnectRequest, ConnectResponse};

use crate::transport::{Connecting, OriginPolicy, ServerError, Session, Settings};

/// An H3 WebTransport handshake, SETTINGS exchanged and CONNECT accepted,
/// awaiting server decision (respond OK / reject).
pub struct H3Request {
    conn: Connection,
    settings: Settings,
    connect: Connecting,
}

impl H3Request {
    /// Accept a new H3 WebTransport session from a client.
    pub async fn accept(conn: Connection) -> Result<Self, ServerError> {
        // Perform the H3 handshake by sending/receiving SETTINGS frames.
        let settings = Settings::connect(&conn).await?;

        // Accept the CONNECT request but don't send a response yet.
        let connect = Connecting::accept(&conn).await?;

        Ok(Self {
            conn,
            settings,
            connect,
        })
    }

    /// Returns the underlying QUIC connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Accept the session with a default 200 OK response.
    pub async fn ok(self) -> Result<Session, ServerError> {
        self.respond(ConnectResponse::OK).await
    }

    /// Reply to the session with the given response, usually 200 OK.
    ///
    /// [`ConnectResponse::with_protocol`] can be used to select a subprotocol.
    pub async fn respond(
        self,
        response: impl Into<ConnectResponse>,
    ) -> Result<Session, ServerError> {
        let response = response.into();
        let connect = self.connect.respond(response).await?;
        Ok(Session::new_h3(self.conn, self.settings, connect))
    }

    /// Reject the session with the given status code.
    pub async fn reject(self, status: http::StatusCode) -> Result<(), ServerError> {
        self.connect.reject(status).await?;
        Ok(())
    }

    /// Returns the [`ConnectRequest`] sent by the client.
    pub fn request(&self) -> &ConnectRequest {
        &self.connect
    }

    /// Checks the request against an [`OriginPolicy`], rejecting with 403 and
    /// consuming `self` if it is denied. Returns `self` unchanged if allowed.
    pub async fn check_origin(
        self,
        policy: &dyn OriginPolicy,
    ) -> Result<Option<Self>, ServerError> {
        if policy.allow(&self.connect) {
            Ok(Some(self))
        } else {
            self.reject(http::StatusCode::FORBIDDEN).await?;
            Ok(None)
        }
    }
}

impl core::ops::Deref for H3Request {
    type Target = ConnectRequest;

    fn deref(&self) -> &Self::Target {
        &self.connect
    }
}

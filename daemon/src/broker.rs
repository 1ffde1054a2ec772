//! Typed proxy for the session protocol a broker exposes over IPC.

use std::io::{Error as IoError, ErrorKind};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::UnixStream;
use tokio::time;
use tokio_util::codec::Framed;
use tokio_util::codec::{Decoder, Encoder};

use authgate_common::broker_proto::{
    BrokerReply, BrokerRequest, FieldMap, WireValue, METHOD_CANCEL_IS_AUTHORIZED,
    METHOD_END_SESSION, METHOD_GET_AUTHENTICATION_MODES, METHOD_IS_AUTHORIZED,
    METHOD_NEW_SESSION, METHOD_SELECT_AUTHENTICATION_MODE,
};
use authgate_common::descriptor::BrokerDescriptor;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The connection to the broker failed, timed out, or closed before a
    /// reply arrived.
    #[error("broker transport error: {0}")]
    Transport(#[from] IoError),
    /// The broker answered the call with a fault of its own.
    #[error("broker fault: {0}")]
    Fault(String),
    /// The reply arrived but did not match the shape the method contract
    /// requires. Wire data is never trusted past this point.
    #[error("invalid broker response, expected {expected}")]
    Decode { expected: &'static str },
}

/// The five-call session protocol plus best-effort cancellation.
///
/// Implementations must be shareable across concurrent sessions without
/// internal locking; per-session call ordering is the caller's concern.
#[async_trait]
pub trait Broker {
    /// Returns the broker-assigned session token and encryption key.
    async fn new_session(
        &self,
        username: &str,
        lang: &str,
    ) -> Result<(String, String), BrokerError>;

    async fn get_authentication_modes(
        &self,
        session_id: &str,
        supported_ui_layouts: &[FieldMap],
    ) -> Result<Vec<FieldMap>, BrokerError>;

    /// Returns the UI layout the caller must render for the chosen mode.
    async fn select_authentication_mode(
        &self,
        session_id: &str,
        mode_id: &str,
    ) -> Result<FieldMap, BrokerError>;

    /// Returns the raw access verdict and the user-info payload. May block
    /// for as long as the broker needs; cancellable only through
    /// [`Broker::cancel_is_authorized`].
    async fn is_authorized(
        &self,
        session_id: &str,
        authentication_data: &str,
    ) -> Result<(String, String), BrokerError>;

    /// Best effort: failure is logged by the implementation, never
    /// propagated.
    async fn cancel_is_authorized(&self, session_id: &str);

    async fn end_session(&self, session_id: &str) -> Result<(), BrokerError>;
}

struct BrokerClientCodec;

impl Decoder for BrokerClientCodec {
    type Error = IoError;
    type Item = BrokerReply;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match serde_json::from_slice::<BrokerReply>(src) {
            Ok(msg) => {
                // Clear the buffer for the next message.
                src.clear();
                Ok(Some(msg))
            }
            _ => Ok(None),
        }
    }
}

impl Encoder<BrokerRequest> for BrokerClientCodec {
    type Error = IoError;

    fn encode(&mut self, msg: BrokerRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = serde_json::to_vec(&msg).map_err(|e| {
            error!("socket encoding error -> {:?}", e);
            IoError::new(ErrorKind::Other, "JSON encode error")
        })?;
        trace!("Attempting to send call -> {}", msg.method);
        dst.put(data.as_slice());
        Ok(())
    }
}

/// A broker proxy speaking JSON frames over a unix stream socket.
///
/// Every call opens its own connection, so one instance can be shared
/// freely across concurrent sessions.
pub struct UnixBroker {
    sock_path: String,
    object: String,
    interface: String,
    conn_timeout: Duration,
}

impl UnixBroker {
    pub fn new(descriptor: &BrokerDescriptor, conn_timeout: Duration) -> Self {
        UnixBroker {
            sock_path: descriptor.ipc.name.clone(),
            object: descriptor.ipc.object.clone(),
            interface: descriptor.ipc.interface.clone(),
            conn_timeout,
        }
    }

    async fn call_inner(
        &self,
        method: String,
        args: Vec<WireValue>,
    ) -> Result<Vec<WireValue>, BrokerError> {
        let stream = UnixStream::connect(&self.sock_path).await?;
        let mut reqs = Framed::new(stream, BrokerClientCodec);

        reqs.send(BrokerRequest {
            object: self.object.clone(),
            method,
            args,
        })
        .await?;
        reqs.flush().await?;

        match reqs.next().await {
            Some(Ok(BrokerReply::Values(values))) => Ok(values),
            Some(Ok(BrokerReply::Fault(fault))) => Err(BrokerError::Fault(fault)),
            Some(Err(err)) => Err(BrokerError::Transport(err)),
            None => Err(BrokerError::Transport(IoError::new(
                ErrorKind::UnexpectedEof,
                "broker closed the connection without replying",
            ))),
        }
    }

    /// Place one call, bounded by the connection timeout.
    async fn call(
        &self,
        method_name: &str,
        args: Vec<WireValue>,
    ) -> Result<Vec<WireValue>, BrokerError> {
        let method = format!("{}.{}", self.interface, method_name);

        let sleep = time::sleep(self.conn_timeout);
        tokio::pin!(sleep);

        tokio::select! {
            _ = &mut sleep => {
                error!("Timed out calling broker method {:?}", method_name);
                Err(BrokerError::Transport(IoError::new(
                    ErrorKind::TimedOut,
                    "broker call timed out",
                )))
            }
            res = self.call_inner(method, args) => res,
        }
    }
}

fn expect_two_texts(
    values: Vec<WireValue>,
    expected: &'static str,
) -> Result<(String, String), BrokerError> {
    let mut values = values.into_iter();
    match (values.next(), values.next(), values.next()) {
        (Some(WireValue::Text(a)), Some(WireValue::Text(b)), None) => Ok((a, b)),
        _ => Err(BrokerError::Decode { expected }),
    }
}

fn expect_dict_list(
    values: Vec<WireValue>,
    expected: &'static str,
) -> Result<Vec<FieldMap>, BrokerError> {
    let mut values = values.into_iter();
    match (values.next(), values.next()) {
        (Some(WireValue::DictList(list)), None) => Ok(list),
        _ => Err(BrokerError::Decode { expected }),
    }
}

fn expect_dict(values: Vec<WireValue>, expected: &'static str) -> Result<FieldMap, BrokerError> {
    let mut values = values.into_iter();
    match (values.next(), values.next()) {
        (Some(WireValue::Dict(dict)), None) => Ok(dict),
        _ => Err(BrokerError::Decode { expected }),
    }
}

#[async_trait]
impl Broker for UnixBroker {
    async fn new_session(
        &self,
        username: &str,
        lang: &str,
    ) -> Result<(String, String), BrokerError> {
        let values = self
            .call(
                METHOD_NEW_SESSION,
                vec![
                    WireValue::Text(username.to_string()),
                    WireValue::Text(lang.to_string()),
                ],
            )
            .await?;
        expect_two_texts(values, "session id and encryption key")
    }

    async fn get_authentication_modes(
        &self,
        session_id: &str,
        supported_ui_layouts: &[FieldMap],
    ) -> Result<Vec<FieldMap>, BrokerError> {
        let values = self
            .call(
                METHOD_GET_AUTHENTICATION_MODES,
                vec![
                    WireValue::Text(session_id.to_string()),
                    WireValue::DictList(supported_ui_layouts.to_vec()),
                ],
            )
            .await?;
        expect_dict_list(values, "a list of authentication modes")
    }

    async fn select_authentication_mode(
        &self,
        session_id: &str,
        mode_id: &str,
    ) -> Result<FieldMap, BrokerError> {
        let values = self
            .call(
                METHOD_SELECT_AUTHENTICATION_MODE,
                vec![
                    WireValue::Text(session_id.to_string()),
                    WireValue::Text(mode_id.to_string()),
                ],
            )
            .await?;
        expect_dict(values, "a ui layout")
    }

    async fn is_authorized(
        &self,
        session_id: &str,
        authentication_data: &str,
    ) -> Result<(String, String), BrokerError> {
        // Deliberately unbounded: the broker may wait on an external
        // identity provider or on the user. Cancellation happens through
        // CancelIsAuthorized, not through a transport deadline.
        let method = format!("{}.{}", self.interface, METHOD_IS_AUTHORIZED);
        let values = self
            .call_inner(
                method,
                vec![
                    WireValue::Text(session_id.to_string()),
                    WireValue::Text(authentication_data.to_string()),
                ],
            )
            .await?;
        expect_two_texts(values, "access verdict and user info")
    }

    async fn cancel_is_authorized(&self, session_id: &str) {
        if let Err(err) = self
            .call(
                METHOD_CANCEL_IS_AUTHORIZED,
                vec![WireValue::Text(session_id.to_string())],
            )
            .await
        {
            error!(
                "could not cancel IsAuthorized call for session {:?}: {:?}",
                session_id, err
            );
        }
    }

    async fn end_session(&self, session_id: &str) -> Result<(), BrokerError> {
        self.call(
            METHOD_END_SESSION,
            vec![WireValue::Text(session_id.to_string())],
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_expect_two_texts() {
        let ok = vec![
            WireValue::Text("sess".to_string()),
            WireValue::Text("key".to_string()),
        ];
        assert_eq!(
            expect_two_texts(ok, "pair").ok(),
            Some(("sess".to_string(), "key".to_string()))
        );

        for bad in [
            vec![],
            vec![WireValue::Text("only one".to_string())],
            vec![
                WireValue::Text("a".to_string()),
                WireValue::Dict(FieldMap::new()),
            ],
            vec![
                WireValue::Text("a".to_string()),
                WireValue::Text("b".to_string()),
                WireValue::Text("c".to_string()),
            ],
        ] {
            match expect_two_texts(bad, "pair") {
                Err(BrokerError::Decode { expected }) => assert_eq!(expected, "pair"),
                other => panic!("expected decode error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_expect_dict_shapes() {
        let mut layout = FieldMap::new();
        layout.insert("type".to_string(), "entry".to_string());

        let values = vec![WireValue::Dict(layout.clone())];
        assert_eq!(expect_dict(values, "layout").ok(), Some(layout.clone()));

        let values = vec![WireValue::DictList(vec![layout.clone()])];
        assert_eq!(
            expect_dict_list(values, "modes").ok(),
            Some(vec![layout.clone()])
        );

        // A list is not a dict, and a dict is not a list.
        assert!(expect_dict(vec![WireValue::DictList(vec![])], "layout").is_err());
        assert!(expect_dict_list(vec![WireValue::Dict(layout)], "modes").is_err());
    }
}

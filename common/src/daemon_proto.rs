//! The protocol spoken between login clients (PAM modules, greeters, the
//! admin tool) and the daemon socket.

use serde::{Deserialize, Serialize};

use crate::broker_proto::{AccessVerdict, FieldMap};

/// The NSS-shaped view of a provisional user. Every field except `uid`
/// (and the pseudonymous `name`) is a placeholder until the user is
/// admitted to the permanent user database.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub homedir: String,
    pub shell: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    pub name: String,
    pub brand_icon: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum DaemonRequest {
    ListBrokers,
    BeginSession {
        broker: String,
        username: String,
        lang: String,
    },
    AuthenticationModes {
        supported_ui_layouts: Vec<FieldMap>,
    },
    SelectAuthenticationMode(String),
    Authorize {
        authentication_data: String,
    },
    EndSession,
    UserByID(u32),
    UserByLogin(String),
    UserByName(String),
    Status,
}

impl DaemonRequest {
    /// Get a safe display version of the request, without credentials.
    pub fn as_safe_string(&self) -> String {
        match self {
            DaemonRequest::ListBrokers => "ListBrokers".to_string(),
            DaemonRequest::BeginSession {
                broker,
                username,
                lang,
            } => format!(
                "BeginSession{{ broker={} username={} lang={} }}",
                broker, username, lang
            ),
            DaemonRequest::AuthenticationModes {
                supported_ui_layouts,
            } => format!("AuthenticationModes({} layouts)", supported_ui_layouts.len()),
            DaemonRequest::SelectAuthenticationMode(mode) => {
                format!("SelectAuthenticationMode({})", mode)
            }
            DaemonRequest::Authorize { .. } => "Authorize".to_string(),
            DaemonRequest::EndSession => "EndSession".to_string(),
            DaemonRequest::UserByID(uid) => format!("UserByID({})", uid),
            DaemonRequest::UserByLogin(login) => format!("UserByLogin({})", login),
            DaemonRequest::UserByName(name) => format!("UserByName({})", name),
            DaemonRequest::Status => "Status".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DaemonStatus {
    pub brokers: Vec<BrokerInfo>,
    pub pre_auth_users: usize,
    pub max_pre_auth_users: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum DaemonResponse {
    Brokers(Vec<BrokerInfo>),
    SessionBegun { encryption_key: String },
    AuthenticationModes(Vec<FieldMap>),
    UiLayout(FieldMap),
    AccessResult { verdict: AccessVerdict, user_info: String },
    User(Option<ProvisionalUser>),
    Status(DaemonStatus),
    Ok,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemonrequest_as_safe_string() {
        assert_eq!(
            DaemonRequest::Status.as_safe_string(),
            "Status".to_string()
        );
        assert_eq!(
            DaemonRequest::UserByLogin("cheese".to_string()).as_safe_string(),
            format!("UserByLogin({})", "cheese")
        );
        // Credential payloads must never appear in logs.
        let req = DaemonRequest::Authorize {
            authentication_data: "hunter2".to_string(),
        };
        assert!(!req.as_safe_string().contains("hunter2"));
    }
}

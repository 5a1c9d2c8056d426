//! D-Bus transport for the backend contract
//!
//! Thin zbus proxies over the configuration manager and session manager
//! services, plus the error classification that turns raw bus failures into
//! tagged [`BackendError`] values. Classification happens here and nowhere
//! else; the controller only ever sees the tagged form.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::{StreamExt, future};
use tracing::debug;
use zbus::Connection;
use zbus::proxy::CacheProperties;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, Value};

use super::{
    AttentionType, BackendError, ConfigNode, ConfigProperties, ConfigService, CredentialSlot,
    SessionService, SessionSignal, SignalStream, StatusEvent, VpnSession,
};

#[zbus::proxy(
    interface = "net.openvpn.v3.configuration",
    default_service = "net.openvpn.v3.configuration",
    default_path = "/net/openvpn/v3/configuration",
    gen_blocking = false
)]
trait ConfigurationManager {
    fn import(
        &self,
        name: &str,
        config_str: &str,
        single_use: bool,
        persistent: bool,
    ) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "net.openvpn.v3.configuration",
    default_service = "net.openvpn.v3.configuration",
    gen_blocking = false
)]
trait ConfigurationNode {
    fn fetch(&self) -> zbus::Result<String>;

    fn set_override(&self, name: &str, value: Value<'_>) -> zbus::Result<()>;

    fn remove(&self) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "net.openvpn.v3.sessions",
    default_service = "net.openvpn.v3.sessions",
    default_path = "/net/openvpn/v3/sessions",
    gen_blocking = false
)]
trait SessionManager {
    fn new_tunnel(&self, config_path: &ObjectPath<'_>) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "net.openvpn.v3.sessions",
    default_service = "net.openvpn.v3.sessions",
    gen_blocking = false
)]
trait SessionNode {
    fn ready(&self) -> zbus::Result<()>;

    fn connect(&self) -> zbus::Result<()>;

    fn disconnect(&self) -> zbus::Result<()>;

    fn user_input_queue_get_type_group(&self) -> zbus::Result<Vec<(u32, u32)>>;

    fn user_input_queue_check(&self, qtype: u32, qgroup: u32) -> zbus::Result<Vec<u32>>;

    fn user_input_queue_fetch(
        &self,
        qtype: u32,
        qgroup: u32,
        qid: u32,
    ) -> zbus::Result<(u32, u32, u32, String, String, bool)>;

    fn user_input_provide(
        &self,
        qtype: u32,
        qgroup: u32,
        qid: u32,
        value: &str,
    ) -> zbus::Result<()>;
}

/// Map a bus failure into the tagged backend error contract.
///
/// The backend reports everything as generic method errors with free-text
/// detail, so the textual matching the rest of the crate must never do is
/// concentrated in this one place.
fn classify(err: zbus::Error) -> BackendError {
    match err {
        zbus::Error::MethodError(name, detail, _) => {
            classify_failure(name.as_str(), detail.as_deref().unwrap_or(""))
        }
        other => BackendError::Bus(other.to_string()),
    }
}

fn classify_failure(name: &str, detail: &str) -> BackendError {
    let text = if detail.is_empty() {
        name.to_owned()
    } else {
        detail.to_owned()
    };
    let lower = text.to_ascii_lowercase();

    if lower.contains("missing user credentials") {
        BackendError::InputRequired(text)
    } else if lower.contains("not ready") {
        BackendError::NotReady(text)
    } else if lower.contains("died") || lower.contains("process exited") {
        BackendError::Crashed(text)
    } else if lower.contains("server-locked") || lower.contains("unsupported profile") {
        BackendError::UnsupportedProfile(text)
    } else if lower.contains("no such")
        || name.ends_with("UnknownMethod")
        || name.ends_with("UnknownObject")
        || name.ends_with("UnknownProperty")
    {
        BackendError::Unavailable(text)
    } else {
        BackendError::Bus(format!("{name}: {text}"))
    }
}

/// Import and override rejections carry no structure at all; everything the
/// configuration manager refuses is a rejection.
fn classify_config(err: zbus::Error) -> BackendError {
    match err {
        zbus::Error::MethodError(name, detail, _) => {
            BackendError::ConfigRejected(detail.unwrap_or_else(|| name.to_string()))
        }
        other => BackendError::Bus(other.to_string()),
    }
}

/// Connection to the system bus shared by both backend services.
pub struct DbusBackend {
    conn: Connection,
}

impl DbusBackend {
    pub async fn connect() -> Result<Self, BackendError> {
        let conn = Connection::system()
            .await
            .map_err(|e| BackendError::Bus(e.to_string()))?;
        Ok(Self { conn })
    }

    pub async fn configs(&self) -> Result<DbusConfigService, BackendError> {
        let proxy = ConfigurationManagerProxy::builder(&self.conn)
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .map_err(classify)?;
        Ok(DbusConfigService {
            conn: self.conn.clone(),
            proxy,
        })
    }

    pub async fn sessions(&self) -> Result<DbusSessionService, BackendError> {
        let proxy = SessionManagerProxy::builder(&self.conn)
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .map_err(classify)?;
        Ok(DbusSessionService {
            conn: self.conn.clone(),
            proxy,
        })
    }

    /// Attach to an already-stored configuration object by path.
    pub async fn config_node(&self, path: &str) -> Result<DbusConfigNode, BackendError> {
        DbusConfigNode::attach(self.conn.clone(), path).await
    }
}

pub struct DbusConfigService {
    conn: Connection,
    proxy: ConfigurationManagerProxy<'static>,
}

#[async_trait]
impl ConfigService for DbusConfigService {
    async fn import(
        &self,
        name: &str,
        content: &str,
        single_use: bool,
        persistent: bool,
    ) -> Result<Box<dyn ConfigNode>, BackendError> {
        let path = self
            .proxy
            .import(name, content, single_use, persistent)
            .await
            .map_err(classify_config)?;
        debug!("imported configuration {name} as {path}");
        let node = DbusConfigNode::attach(self.conn.clone(), path.as_str()).await?;
        Ok(Box::new(node))
    }
}

pub struct DbusConfigNode {
    path: String,
    proxy: ConfigurationNodeProxy<'static>,
}

impl DbusConfigNode {
    async fn attach(conn: Connection, path: &str) -> Result<Self, BackendError> {
        let proxy = ConfigurationNodeProxy::builder(&conn)
            .path(path.to_owned())
            .map_err(classify)?
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .map_err(classify)?;
        Ok(Self {
            path: path.to_owned(),
            proxy,
        })
    }
}

#[async_trait]
impl ConfigNode for DbusConfigNode {
    fn path(&self) -> &str {
        &self.path
    }

    async fn set_override(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.proxy
            .set_override(key, Value::from(value))
            .await
            .map_err(classify_config)
    }

    async fn properties(&self) -> Result<ConfigProperties, BackendError> {
        let proxy = self.proxy.inner();
        Ok(ConfigProperties {
            name: proxy.get_property("name").await.map_err(classify)?,
            valid: proxy.get_property("valid").await.map_err(classify)?,
            readonly: proxy.get_property("readonly").await.map_err(classify)?,
            persistent: proxy.get_property("persistent").await.map_err(classify)?,
            single_use: proxy.get_property("single_use").await.map_err(classify)?,
        })
    }

    async fn fetch(&self) -> Result<String, BackendError> {
        self.proxy.fetch().await.map_err(classify)
    }

    async fn remove(&self) -> Result<(), BackendError> {
        self.proxy.remove().await.map_err(classify)
    }
}

pub struct DbusSessionService {
    conn: Connection,
    proxy: SessionManagerProxy<'static>,
}

#[async_trait]
impl SessionService for DbusSessionService {
    async fn new_tunnel(&self, config_path: &str) -> Result<Box<dyn VpnSession>, BackendError> {
        let config_path = ObjectPath::try_from(config_path)
            .map_err(|e| BackendError::Bus(format!("invalid configuration path: {e}")))?;
        let session_path = self
            .proxy
            .new_tunnel(&config_path)
            .await
            .map_err(classify)?;
        debug!("created session {session_path}");
        let session = DbusSession::attach(self.conn.clone(), session_path.as_str()).await?;
        Ok(Box::new(session))
    }
}

pub struct DbusSession {
    path: String,
    proxy: SessionNodeProxy<'static>,
}

impl DbusSession {
    async fn attach(conn: Connection, path: &str) -> Result<Self, BackendError> {
        let proxy = SessionNodeProxy::builder(&conn)
            .path(path.to_owned())
            .map_err(classify)?
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .map_err(classify)?;
        Ok(Self {
            path: path.to_owned(),
            proxy,
        })
    }
}

#[async_trait]
impl VpnSession for DbusSession {
    fn path(&self) -> &str {
        &self.path
    }

    async fn ready(&self) -> Result<(), BackendError> {
        self.proxy.ready().await.map_err(classify)
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.proxy.connect().await.map_err(classify)
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.proxy.disconnect().await.map_err(classify)
    }

    async fn set_log_verbosity(&self, level: u32) -> Result<(), BackendError> {
        self.proxy
            .inner()
            .set_property("log_verbosity", level)
            .await
            .map_err(|e| BackendError::Bus(e.to_string()))
    }

    async fn set_dco(&self, enable: bool) -> Result<(), BackendError> {
        self.proxy
            .inner()
            .set_property("dco", enable)
            .await
            .map_err(|e| BackendError::Bus(e.to_string()))
    }

    async fn status(&self) -> Result<StatusEvent, BackendError> {
        let (major, minor, message): (u32, u32, String) = self
            .proxy
            .inner()
            .get_property("status")
            .await
            .map_err(classify)?;
        Ok(StatusEvent::new(major, minor, message))
    }

    async fn formatted_statistics(&self) -> Result<String, BackendError> {
        let stats: HashMap<String, i64> = self
            .proxy
            .inner()
            .get_property("statistics")
            .await
            .map_err(classify)?;
        let mut keys: Vec<_> = stats.keys().collect();
        keys.sort();
        let mut out = String::new();
        for key in keys {
            out.push_str(&format!("    {:.<24}{:>12}\n", key, stats[key]));
        }
        Ok(out)
    }

    async fn user_input_slots(&self) -> Result<Vec<CredentialSlot>, BackendError> {
        let mut slots = Vec::new();
        for (qtype, qgroup) in self
            .proxy
            .user_input_queue_get_type_group()
            .await
            .map_err(classify)?
        {
            for qid in self
                .proxy
                .user_input_queue_check(qtype, qgroup)
                .await
                .map_err(classify)?
            {
                let (kind, group, id, name, label, masked) = self
                    .proxy
                    .user_input_queue_fetch(qtype, qgroup, qid)
                    .await
                    .map_err(classify)?;
                slots.push(CredentialSlot {
                    kind: AttentionType::from_code(kind),
                    group,
                    id,
                    name,
                    label,
                    masked,
                });
            }
        }
        Ok(slots)
    }

    async fn provide_input(
        &self,
        slot: &CredentialSlot,
        value: &str,
    ) -> Result<(), BackendError> {
        self.proxy
            .user_input_provide(slot.kind.code(), slot.group, slot.id, value)
            .await
            .map_err(classify)
    }

    async fn signals(&self) -> Result<SignalStream, BackendError> {
        let status = self
            .proxy
            .inner()
            .receive_signal("StatusChange")
            .await
            .map_err(classify)?
            .filter_map(|msg| {
                future::ready(
                    msg.body()
                        .deserialize::<(u32, u32, String)>()
                        .ok()
                        .map(|(major, minor, message)| {
                            SessionSignal::Status(StatusEvent::new(major, minor, message))
                        }),
                )
            });
        let log = self
            .proxy
            .inner()
            .receive_signal("Log")
            .await
            .map_err(classify)?
            .filter_map(|msg| {
                future::ready(msg.body().deserialize::<(u32, u32, String)>().ok().map(
                    |(group, level, message)| SessionSignal::Log {
                        group,
                        level,
                        message,
                    },
                ))
            });
        Ok(futures_util::stream::select(status, log).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_credentials() {
        let err = classify_failure(
            "net.openvpn.v3.error.ready",
            "Missing user credentials",
        );
        assert!(matches!(err, BackendError::InputRequired(_)));
    }

    #[test]
    fn test_classify_not_ready() {
        let err = classify_failure(
            "net.openvpn.v3.error.ready",
            "Backend VPN process is not ready",
        );
        assert!(matches!(err, BackendError::NotReady(_)));
    }

    #[test]
    fn test_classify_backend_crash() {
        let err = classify_failure(
            "net.openvpn.v3.error",
            "Backend VPN process have died",
        );
        assert!(matches!(err, BackendError::Crashed(_)));
    }

    #[test]
    fn test_classify_server_locked_profile() {
        let err = classify_failure(
            "net.openvpn.v3.error",
            "Server-locked profiles are not supported",
        );
        assert!(matches!(err, BackendError::UnsupportedProfile(_)));
    }

    #[test]
    fn test_classify_missing_statistics() {
        let err = classify_failure(
            "net.openvpn.v3.error",
            "No such statistics available",
        );
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[test]
    fn test_classify_unknown_is_bus_error() {
        let err = classify_failure("org.freedesktop.DBus.Error.Failed", "something else");
        assert!(matches!(err, BackendError::Bus(_)));
    }
}

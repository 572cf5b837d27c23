//! The named multi-connection pool: groups connections by name and role, fans
//! pool-wide handlers into every member through a subscriber proxy installed on each
//! connection, and drives the client auto-reconnect loop.

use crate::config::{NodeConfig, PoolConfig};
use crate::connection::{Connection, Role, Status};
use crate::dispatcher::{MessageHandler, StatusHandler};
use crate::error::Error;
use crate::message::MessageType;
use crate::utils::generate_id;
use log::warn;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Async dial closure handed to `Pool::add_client` so the retry loop can redial an
/// initiator-role member without the caller threading the dial URL/config back
/// through the pool.
pub type Dialer = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<Connection, Error>> + Send>> + Send + Sync>;

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Default)]
struct Members {
    by_name: HashMap<String, Connection>,
    initiators: Vec<String>,
    responders: Vec<String>,
}

struct Inner {
    config: PoolConfig,
    members: AsyncMutex<Members>,
    closed: AtomicBool,
    status_handlers: StdMutex<HashMap<Status, StatusHandler>>,
    message_handlers: StdMutex<HashMap<MessageType, MessageHandler>>,
}

/// A named collection of connections, keyed by name with role sub-lists.
/// Cheap to clone — every clone shares the same member map and lock, so a `Pool`
/// handle can be moved into spawned reaper/retry tasks.
#[derive(Clone)]
pub struct Pool(Arc<Inner>);

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        Pool(Arc::new(Inner {
            config,
            members: AsyncMutex::new(Members::default()),
            closed: AtomicBool::new(false),
            status_handlers: StdMutex::new(HashMap::new()),
            message_handlers: StdMutex::new(HashMap::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.config.name
    }

    pub async fn len(&self) -> usize {
        self.0.members.lock().await.by_name.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Registers a pool-wide default handler for `status`. Fired, through the
    /// subscriber proxy installed by `add`, on every member connection that reaches
    /// it.
    pub fn on_status(&self, status: Status, handler: StatusHandler) {
        self.0.status_handlers.lock().unwrap().insert(status, handler);
    }

    pub fn on_message(&self, message_type: MessageType, handler: MessageHandler) {
        self.0.message_handlers.lock().unwrap().insert(message_type, handler);
    }

    /// Adds `connection` under `node`'s name (random if empty), installs the pool's
    /// subscriber proxy, and rejects duplicate names or over-capacity pools.
    /// The connection's read loop is already running by the time a handshake
    /// function hands it back, so `add` does not start it again.
    pub async fn add(&self, connection: Connection, node: NodeConfig) -> Result<(), Error> {
        let name = self.add_inner(connection, node).await?;
        self.spawn_reaper(name);
        Ok(())
    }

    /// As `add`, but also registers `dialer` so the connection is transparently
    /// redialed (up to `PoolConfig::client_retry` times) whenever its read loop
    /// exits while the pool is still open. Intended for initiator-role members;
    /// `dialer` is never consulted for a responder.
    pub async fn add_client(&self, connection: Connection, node: NodeConfig, dialer: Dialer) -> Result<(), Error> {
        let role = connection.role();
        let name = self.add_inner(connection, node.clone()).await?;
        if role == Role::Initiator {
            self.spawn_retry_loop(name, node, dialer);
        } else {
            self.spawn_reaper(name);
        }
        Ok(())
    }

    async fn add_inner(&self, connection: Connection, mut node: NodeConfig) -> Result<String, Error> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        if node.name.is_empty() {
            node.name = generate_id();
        }
        let name = node.name.clone();

        let mut members = self.0.members.lock().await;
        if members.by_name.contains_key(&name) {
            return Err(Error::DuplicateNodeName(name));
        }
        if self.0.config.size > 0 && members.by_name.len() >= self.0.config.size {
            return Err(Error::PoolAtCapacity);
        }

        connection.set_node(node);
        connection.set_name(name.clone());
        self.install_proxy(&connection, &name);
        match connection.role() {
            Role::Initiator => members.initiators.push(name.clone()),
            Role::Responder => members.responders.push(name.clone()),
        }
        members.by_name.insert(name.clone(), connection);

        Ok(name)
    }

    /// Installs a named subscriber on `connection` that looks up the pool's default
    /// handlers on every event — this is the subscriber-to-publisher proxy, and the
    /// reason `remove` always calls `Connection::revoke` before dropping its
    /// reference to the member.
    fn install_proxy(&self, connection: &Connection, name: &str) {
        let status_pool = self.clone();
        let status_handler: StatusHandler = Arc::new(move |status, conn| {
            let handler = status_pool.0.status_handlers.lock().unwrap().get(&status).cloned();
            if let Some(handler) = handler {
                handler(status, conn);
            }
        });
        let message_pool = self.clone();
        let message_handler: MessageHandler = Arc::new(move |message, conn| {
            let handler = message_pool.0.message_handlers.lock().unwrap().get(&message.message_type()).cloned();
            if let Some(handler) = handler {
                handler(message, conn);
            }
        });
        connection.subscribe(name, Some(status_handler), Some(message_handler));
    }

    /// Watches a non-retried member until its read loop ends, then removes it —
    /// the counterpart to the retry loop's own removal path, needed so `wait`
    /// converges for responder-role (and retry-exhausted) members too.
    fn spawn_reaper(&self, name: String) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.wait_for_member_close(&name).await;
            pool.remove(&name).await;
        });
    }

    async fn wait_for_member_close(&self, name: &str) {
        loop {
            let status = {
                let members = self.0.members.lock().await;
                members.by_name.get(name).map(Connection::status)
            };
            match status {
                Some(Status::Closed) | None => return,
                _ => tokio::time::sleep(REAP_POLL_INTERVAL).await,
            }
        }
    }

    /// On read-loop exit, redial through `dialer` while the pool is open and retries
    /// remain; otherwise remove the member.
    fn spawn_retry_loop(&self, name: String, node: NodeConfig, dialer: Dialer) {
        let pool = self.clone();
        let mut attempts_left = self.0.config.client_retry;
        let interval = Duration::from_secs(self.0.config.retry_interval_secs);
        tokio::spawn(async move {
            loop {
                pool.wait_for_member_close(&name).await;

                if pool.0.closed.load(Ordering::SeqCst) || attempts_left == 0 {
                    pool.remove(&name).await;
                    return;
                }
                attempts_left -= 1;

                tokio::time::sleep(interval).await;
                if pool.0.closed.load(Ordering::SeqCst) {
                    pool.remove(&name).await;
                    return;
                }

                match dialer().await {
                    Ok(connection) => {
                        connection.set_node(node.clone());
                        connection.set_name(name.clone());
                        pool.install_proxy(&connection, &name);
                        let mut members = pool.0.members.lock().await;
                        members.by_name.insert(name.clone(), connection);
                    }
                    Err(e) => warn!("pool {}: redial for {} failed: {}", pool.name(), name, e),
                }
            }
        });
    }

    /// Removes `name`, revoking its subscriber on the connection before the pool
    /// drops its reference — required to break the connection-to-pool-to-connection
    /// cycle a lingering subscriber would otherwise hold open.
    async fn remove(&self, name: &str) {
        let connection = {
            let mut members = self.0.members.lock().await;
            let connection = members.by_name.remove(name);
            members.initiators.retain(|n| n != name);
            members.responders.retain(|n| n != name);
            connection
        };
        if let Some(connection) = connection {
            connection.revoke(name);
        }
    }

    async fn snapshot_all(&self) -> Vec<Connection> {
        self.0.members.lock().await.by_name.values().cloned().collect()
    }

    async fn snapshot_role(&self, role: Role) -> Vec<Connection> {
        let members = self.0.members.lock().await;
        let names = match role {
            Role::Initiator => &members.initiators,
            Role::Responder => &members.responders,
        };
        names.iter().filter_map(|n| members.by_name.get(n).cloned()).collect()
    }

    async fn snapshot_group(&self, group: &str) -> Vec<Connection> {
        self.0
            .members
            .lock()
            .await
            .by_name
            .values()
            .filter(|c| c.node().map(|n| n.group == group).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Forwards `payload` to every target, under no lock (the member-map lock is
    /// only ever held for the snapshot itself). A single member's failure
    /// is logged and does not interrupt the rest of the fan-out.
    async fn fan_out(&self, targets: Vec<Connection>, message_type: MessageType, payload: &[u8]) {
        for connection in targets {
            if let Err(e) = connection.dispatch(message_type, payload.to_vec()).await {
                warn!("pool {}: dispatch to {} failed: {}", self.name(), connection.name(), e);
            }
        }
    }

    /// Broadcasts to every member.
    pub async fn dispatch(&self, message_type: MessageType, payload: &[u8]) {
        let targets = self.snapshot_all().await;
        self.fan_out(targets, message_type, payload).await;
    }

    /// Broadcasts to initiator-role members only.
    pub async fn to_clients(&self, message_type: MessageType, payload: &[u8]) {
        let targets = self.snapshot_role(Role::Initiator).await;
        self.fan_out(targets, message_type, payload).await;
    }

    /// Broadcasts to responder-role members only.
    pub async fn to_servers(&self, message_type: MessageType, payload: &[u8]) {
        let targets = self.snapshot_role(Role::Responder).await;
        self.fan_out(targets, message_type, payload).await;
    }

    /// Broadcasts to every member whose `NodeConfig::group` matches `group`.
    pub async fn to_group(&self, group: &str, message_type: MessageType, payload: &[u8]) {
        let targets = self.snapshot_group(group).await;
        self.fan_out(targets, message_type, payload).await;
    }

    /// Broadcasts to every member except the one named `name`.
    pub async fn except(&self, name: &str, message_type: MessageType, payload: &[u8]) {
        let targets: Vec<Connection> = {
            let members = self.0.members.lock().await;
            members.by_name.iter().filter(|(n, _)| n.as_str() != name).map(|(_, c)| c.clone()).collect()
        };
        self.fan_out(targets, message_type, payload).await;
    }

    /// Dispatches to exactly one member by name, surfacing `NoSuchNode` rather than
    /// silently dropping the message as the broadcast variants do.
    pub async fn to_pick(&self, name: &str, message_type: MessageType, payload: &[u8]) -> Result<(), Error> {
        let target = { self.0.members.lock().await.by_name.get(name).cloned() };
        match target {
            Some(connection) => connection.dispatch(message_type, payload.to_vec()).await,
            None => Err(Error::NoSuchNode(name.to_string())),
        }
    }

    /// Marks the pool closed, issues `Close` to every current member, then returns
    /// once `wait` observes the member map empty.
    pub async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        let targets = self.snapshot_all().await;
        for connection in targets {
            let _ = connection.close().await;
        }
        self.wait().await;
    }

    /// Polls the member map until every reaper/retry task has removed its entry.
    pub async fn wait(&self) {
        while !self.is_empty().await {
            tokio::time::sleep(REAP_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::Negotiated;
    use crate::transport::Transport;
    use tokio::io::duplex;

    fn negotiated() -> Negotiated {
        Negotiated { compress: false, compress_level: 1, streams: false, max_streams: 0 }
    }

    async fn loopback_pair() -> (Connection, Connection) {
        let (a, b) = duplex(64 * 1024);
        let (initiator, initiator_read) =
            Connection::new(Role::Initiator, Transport::Duplex(a), ConnectionConfig::default(), negotiated());
        let (responder, responder_read) =
            Connection::new(Role::Responder, Transport::Duplex(b), ConnectionConfig::default(), negotiated());
        let i2 = initiator.clone();
        tokio::spawn(async move {
            let _ = i2.start(initiator_read).await;
        });
        let r2 = responder.clone();
        tokio::spawn(async move {
            let _ = r2.start(responder_read).await;
        });
        (initiator, responder)
    }

    #[tokio::test]
    async fn add_assigns_a_random_name_when_none_given() {
        let pool = Pool::new(PoolConfig::default());
        let (initiator, _responder) = loopback_pair().await;
        pool.add(initiator.clone(), NodeConfig::default()).await.unwrap();
        assert!(!initiator.name().is_empty());
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn add_rejects_duplicate_names() {
        let pool = Pool::new(PoolConfig::default());
        let (a, _a_peer) = loopback_pair().await;
        let (b, _b_peer) = loopback_pair().await;
        pool.add(a, NodeConfig { name: "node-1".into(), group: String::new() }).await.unwrap();
        let err = pool.add(b, NodeConfig { name: "node-1".into(), group: String::new() }).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateNodeName(n) if n == "node-1"));
    }

    #[tokio::test]
    async fn add_rejects_over_capacity() {
        let pool = Pool::new(PoolConfig { name: "p".into(), size: 1, client_retry: 0, retry_interval_secs: 1 });
        let (a, _a_peer) = loopback_pair().await;
        let (b, _b_peer) = loopback_pair().await;
        pool.add(a, NodeConfig::default()).await.unwrap();
        let err = pool.add(b, NodeConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::PoolAtCapacity));
    }

    #[tokio::test]
    async fn to_group_reaches_only_matching_members() {
        let pool = Pool::new(PoolConfig::default());
        let (member_a, peer_a) = loopback_pair().await;
        let (member_b, _peer_b) = loopback_pair().await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        peer_a.on_message(
            MessageType::Text,
            Arc::new(move |msg, _conn| {
                let tx = tx.clone();
                let _ = tx.try_send(msg.read_text().unwrap());
            }),
        );

        pool.add(member_a, NodeConfig { name: "a".into(), group: "topic".into() }).await.unwrap();
        pool.add(member_b, NodeConfig { name: "b".into(), group: "other".into() }).await.unwrap();

        pool.to_group("topic", MessageType::Text, b"hello").await;

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(received, "hello");
    }

    #[tokio::test]
    async fn to_pick_reports_no_such_node() {
        let pool = Pool::new(PoolConfig::default());
        let err = pool.to_pick("missing", MessageType::Text, b"hi").await.unwrap_err();
        assert!(matches!(err, Error::NoSuchNode(n) if n == "missing"));
    }

    #[tokio::test]
    async fn close_empties_the_pool() {
        let pool = Pool::new(PoolConfig::default());
        let (member, _peer) = loopback_pair().await;
        pool.add(member, NodeConfig::default()).await.unwrap();
        assert_eq!(pool.len().await, 1);
        tokio::time::timeout(Duration::from_secs(2), pool.close()).await.unwrap();
        assert_eq!(pool.len().await, 0);
    }
}

//! Per-status and per-type handler registries, plus named subscribers, with two
//! delivery modes. Status and message callbacks run directly off these registries
//! without the caller polling a stream.

use crate::connection::{Connection, Status};
use crate::message::{Message, MessageType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type StatusHandler = Arc<dyn Fn(Status, Connection) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(Arc<Message>, Connection) + Send + Sync>;

/// Concurrent spawns one task per handler invocation; Synchronized runs every handler
/// inline, in order, on the reader task. `ReadIter` refuses to run under
/// Synchronized, since the reader would otherwise block itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Concurrent,
    Synchronized,
}

struct Subscriber {
    name: String,
    status_handler: Option<StatusHandler>,
    message_handler: Option<MessageHandler>,
}

pub(crate) struct Dispatcher {
    mode: DeliveryMode,
    status_handlers: Mutex<HashMap<Status, StatusHandler>>,
    message_handlers: Mutex<HashMap<MessageType, MessageHandler>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Dispatcher {
    pub(crate) fn new(mode: DeliveryMode) -> Self {
        Dispatcher {
            mode,
            status_handlers: Mutex::new(HashMap::new()),
            message_handlers: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub(crate) fn on_status(&self, status: Status, handler: StatusHandler) {
        self.status_handlers.lock().unwrap().insert(status, handler);
    }

    pub(crate) fn on_message(&self, message_type: MessageType, handler: MessageHandler) {
        self.message_handlers.lock().unwrap().insert(message_type, handler);
    }

    /// Installs a named subscriber with its own status/message handlers, in addition to
    /// the default registries — used by `Pool` to fan events into a pool-wide proxy.
    pub(crate) fn subscribe(
        &self,
        name: impl Into<String>,
        status_handler: Option<StatusHandler>,
        message_handler: Option<MessageHandler>,
    ) {
        self.subscribers.lock().unwrap().push(Subscriber {
            name: name.into(),
            status_handler,
            message_handler,
        });
    }

    /// Removes the first subscriber with the given name. Subscribers are resolved by
    /// name, not by handler identity.
    pub(crate) fn revoke(&self, name: &str) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(index) = subscribers.iter().position(|s| s.name == name) {
            subscribers.remove(index);
        }
    }

    /// `new_status` selects which registry entry fires; the handler itself is always
    /// invoked with `prev_status` — the map is keyed by the status being transitioned
    /// *to*, but the callback only ever learns what it transitioned *from*.
    pub(crate) fn dispatch_status(&self, new_status: Status, prev_status: Status, connection: &Connection) {
        let default = self.status_handlers.lock().unwrap().get(&new_status).cloned();
        let subscriber_handlers: Vec<StatusHandler> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| s.status_handler.clone())
            .collect();

        let mut handlers = Vec::with_capacity(1 + subscriber_handlers.len());
        handlers.extend(default);
        handlers.extend(subscriber_handlers);

        match self.mode {
            DeliveryMode::Concurrent => {
                for handler in handlers {
                    let connection = connection.clone();
                    tokio::spawn(async move { handler(prev_status, connection) });
                }
            }
            DeliveryMode::Synchronized => {
                for handler in handlers {
                    handler(prev_status, connection.clone());
                }
            }
        }
    }

    pub(crate) fn dispatch_message(&self, message: Arc<Message>, connection: &Connection) {
        let message_type = message.message_type();
        let default = self.message_handlers.lock().unwrap().get(&message_type).cloned();
        let subscriber_handlers: Vec<MessageHandler> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| s.message_handler.clone())
            .collect();

        let mut handlers = Vec::with_capacity(1 + subscriber_handlers.len());
        handlers.extend(default);
        handlers.extend(subscriber_handlers);

        match self.mode {
            DeliveryMode::Concurrent => {
                for handler in handlers {
                    let connection = connection.clone();
                    let message = Arc::clone(&message);
                    tokio::spawn(async move { handler(message, connection) });
                }
            }
            DeliveryMode::Synchronized => {
                for handler in handlers {
                    handler(Arc::clone(&message), connection.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoke_removes_only_the_first_matching_subscriber() {
        let dispatcher = Dispatcher::new(DeliveryMode::Concurrent);
        dispatcher.subscribe("a", None, None);
        dispatcher.subscribe("a", None, None);
        dispatcher.subscribe("b", None, None);
        dispatcher.revoke("a");
        let names: Vec<String> = dispatcher.subscribers.lock().unwrap().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}

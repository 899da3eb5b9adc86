//! Application instance registry: per-`app`-name publisher/player fan-out
//! (§3, §4.2).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::chunk::Message;
use crate::error::CommandError;

/// Opaque id distinguishing connections within an [`Application`].
pub type ConnectionId = u64;

/// A connection's registered interest in a named stream, carrying the
/// channel used to deliver fan-out media directly to that connection's
/// write task (§4.2 "Fan-out").
#[derive(Clone)]
pub struct StreamHandle {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// The connection-local stream id media should be tagged with.
    pub stream_id: u32,
    /// Delivery channel into the connection's outbound task.
    pub sender: mpsc::Sender<Message>,
}

/// One named application instance (e.g. `"live"`), tracking publishers,
/// players and membership (§3 "Application instance").
pub struct Application {
    /// The `app` attribute this instance was created for.
    pub name: String,
    publishers: DashMap<String, StreamHandle>,
    players: DashMap<String, Vec<StreamHandle>>,
    members: DashMap<ConnectionId, ()>,
}

impl Application {
    /// Create an empty instance.
    #[must_use]
    pub fn new(name: String) -> Self {
        Self {
            name,
            publishers: DashMap::new(),
            players: DashMap::new(),
            members: DashMap::new(),
        }
    }

    /// Record `connection_id` as a member (called on `connect`).
    pub fn join(&self, connection_id: ConnectionId) {
        self.members.insert(connection_id, ());
    }

    /// Register a publisher for `stream_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::NameAlreadyPublished`] if another connection
    /// already publishes under that name on this instance (§4.2 `publish`).
    pub fn publish(&self, stream_name: &str, handle: StreamHandle) -> Result<(), CommandError> {
        if self.publishers.contains_key(stream_name) {
            return Err(CommandError::NameAlreadyPublished(stream_name.to_string()));
        }
        self.publishers.insert(stream_name.to_string(), handle);
        Ok(())
    }

    /// Add a player for `stream_name`.
    pub fn play(&self, stream_name: &str, handle: StreamHandle) {
        self.players
            .entry(stream_name.to_string())
            .or_default()
            .push(handle);
    }

    /// Deliver `message` to every current player of `stream_name`, deep
    /// copying the message so concurrent sends cannot share mutable state
    /// (§4.2 "Duplication MUST be deep enough...").
    pub async fn fan_out(&self, stream_name: &str, message: &Message) {
        let Some(players) = self.players.get(stream_name) else {
            return;
        };
        for handle in players.iter() {
            let mut copy = message.clone();
            copy.stream_id = handle.stream_id;
            let _ = handle.sender.send(copy).await;
        }
    }

    /// Remove every publisher/player registration owned by
    /// `connection_id` (§4.2 "Disconnection").
    pub fn retire(&self, connection_id: ConnectionId) {
        self.publishers
            .retain(|_, handle| handle.connection_id != connection_id);
        for mut entry in self.players.iter_mut() {
            entry.value_mut().retain(|h| h.connection_id != connection_id);
        }
        self.members.remove(&connection_id);
    }

    /// Remove only the registration for `connection_id`'s `stream_id`
    /// (§4.2 `closeStream`: "remove the referenced Stream from the
    /// connection"), leaving its other Streams untouched.
    pub fn retire_stream(&self, connection_id: ConnectionId, stream_id: u32) {
        self.publishers
            .retain(|_, handle| !(handle.connection_id == connection_id && handle.stream_id == stream_id));
        for mut entry in self.players.iter_mut() {
            entry
                .value_mut()
                .retain(|h| !(h.connection_id == connection_id && h.stream_id == stream_id));
        }
    }

    /// Whether this instance has no remaining members (§4.2 "When the
    /// last member leaves, the instance is destroyed").
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Registry of live [`Application`] instances keyed by `app` name.
#[derive(Default)]
pub struct Registry {
    apps: DashMap<String, Arc<Application>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            apps: DashMap::new(),
        }
    }

    /// Get the instance named `name`, creating it if this is the first
    /// connection to reference it.
    pub fn get_or_create(&self, name: &str) -> Arc<Application> {
        self.apps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Application::new(name.to_string())))
            .clone()
    }

    /// Look up a live instance without creating it.
    #[must_use]
    pub fn peek(&self, name: &str) -> Option<Arc<Application>> {
        self.apps.get(name).map(|entry| entry.clone())
    }

    /// Drop `name` from the registry if its instance has no members left.
    pub fn destroy_if_empty(&self, name: &str) {
        let mut remove = false;
        if let Some(app) = self.apps.get(name) {
            remove = app.is_empty();
        }
        if remove {
            self.apps.remove(name);
        }
    }
}

/// A connection's view of its own streams: stream id → (publish/play
/// name), used on disconnect to retire everything it owned (§4.2).
#[derive(Default)]
pub struct StreamTable {
    next_id: u32,
    names: HashMap<u32, String>,
}

impl StreamTable {
    /// Allocate the next stream id (§4.2 `createStream`). Id `0` is
    /// reserved for commands, so allocation starts at `1`.
    pub fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Record that `stream_id` is now associated with `name` (publish or
    /// play target).
    pub fn bind(&mut self, stream_id: u32, name: String) {
        self.names.insert(stream_id, name);
    }

    /// Remove a stream id's binding, returning the name it was bound to.
    pub fn unbind(&mut self, stream_id: u32) -> Option<String> {
        self.names.remove(&stream_id)
    }

    /// The publish/play name currently bound to `stream_id`, if any.
    #[must_use]
    pub fn name_of(&self, stream_id: u32) -> Option<String> {
        self.names.get(&stream_id).cloned()
    }

    /// All bound stream ids and their names, for disconnect cleanup.
    pub fn drain(&mut self) -> Vec<(u32, String)> {
        self.names.drain().collect()
    }
}

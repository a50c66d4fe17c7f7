use std::sync::Arc;

use super::Transport;

/// A named pool of transports, kept in registration order for version
/// negotiation.
#[derive(Debug, Default)]
pub struct TransportRegistry {
    transports: Vec<Arc<dyn Transport>>,
}

impl TransportRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transport; rejects duplicate names.
    pub fn add(&mut self, transport: Arc<dyn Transport>) -> bool {
        if self.get(transport.name()).is_some() {
            return false;
        }
        self.transports.push(transport);
        true
    }

    /// The names of every registered transport.
    pub fn known_transports(&self) -> Vec<String> {
        self.transports.iter().map(|transport| transport.name().to_owned()).collect()
    }

    /// The names of the transports accepting the given version.
    pub fn find_transports(&self, bayeux_version: &str) -> Vec<String> {
        self.transports
            .iter()
            .filter(|transport| transport.accept(bayeux_version))
            .map(|transport| transport.name().to_owned())
            .collect()
    }

    /// Looks a transport up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.iter().find(|transport| transport.name() == name).cloned()
    }

    /// Every registered transport.
    pub fn all(&self) -> Vec<Arc<dyn Transport>> {
        self.transports.clone()
    }

    /// The first requested transport known locally and accepting the given
    /// version.
    pub fn negotiate(
        &self,
        requested_transports: &[String],
        bayeux_version: &str,
    ) -> Option<Arc<dyn Transport>> {
        requested_transports
            .iter()
            .filter_map(|name| self.get(name))
            .find(|transport| transport.accept(bayeux_version))
    }

    /// Removes a transport by name.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Transport>> {
        let index = self.transports.iter().position(|transport| transport.name() == name)?;
        Some(self.transports.remove(index))
    }

    /// Resets every registered transport.
    pub fn reset(&self) {
        for transport in &self.transports {
            transport.reset();
        }
    }
}

//! Pages served by the offline layer (the `clients` global).

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::ServiceWorkerId;

/// A window client (a page the offline layer can control).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently serving this client's fetches.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A window client for `url`, not yet controlled.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            focused: false,
            controller: None,
        }
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients controlled by `worker`.
    pub fn controlled_by(&self, worker: ServiceWorkerId) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .collect()
    }

    /// Open and focus a new window client controlled by `controller`.
    pub fn open_window(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> Client {
        let client = Client {
            focused: true,
            controller,
            ..Client::window(url)
        };
        for other in self.clients.values_mut() {
            other.focused = false;
        }
        self.add(client.clone());
        client
    }

    /// Take control of every client. Returns the IDs whose controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_open_window_focuses_new_client() {
        let (old, new) = (ServiceWorkerId::new(), ServiceWorkerId::new());
        let mut clients = Clients::new();
        let first = clients.open_window(url("https://example.com/"), Some(old));
        let second = clients.open_window(url("https://example.com/about"), Some(new));

        assert!(second.focused);
        let earlier = clients.controlled_by(old);
        assert_eq!(earlier.len(), 1);
        assert_eq!(earlier[0].id, first.id);
        assert!(!earlier[0].focused);
        assert_eq!(clients.len(), 2);
    }

    #[test]
    fn test_claim_changes_controller_once() {
        let worker = ServiceWorkerId::new();
        let mut clients = Clients::new();
        clients.add(Client::window(url("https://example.com/")));
        clients.add(Client::window(url("https://example.com/contact")));

        assert_eq!(clients.claim(worker).len(), 2);
        assert_eq!(clients.controlled_by(worker).len(), 2);
        assert!(clients.claim(worker).is_empty());
    }

    #[test]
    fn test_new_clients_are_uncontrolled() {
        let worker = ServiceWorkerId::new();
        let mut clients = Clients::new();
        assert!(clients.is_empty());

        let client = Client::window(url("https://example.com/"));
        assert!(client.controller.is_none());
        assert!(!client.focused);
        clients.add(client);

        assert!(!clients.is_empty());
        assert!(clients.controlled_by(worker).is_empty());
    }
}

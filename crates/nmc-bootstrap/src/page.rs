//! The hosting page: location, reload, and session storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use url::Url;

/// What the bootstrapper needs from the page it runs in.
pub trait PageHost: Send + Sync {
    /// Current document URL.
    fn location(&self) -> Url;

    /// Reload the document.
    fn reload(&self);

    fn session_get(&self, key: &str) -> Option<String>;

    fn session_set(&self, key: &str, value: &str);

    fn session_remove(&self, key: &str);
}

/// Page stand-in that records reloads.
#[derive(Debug)]
pub struct MemoryPage {
    location: Url,
    session: Mutex<HashMap<String, String>>,
    reloads: AtomicUsize,
}

impl MemoryPage {
    pub fn new(location: Url) -> Self {
        Self {
            location,
            session: Mutex::new(HashMap::new()),
            reloads: AtomicUsize::new(0),
        }
    }

    /// Number of reloads requested so far.
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl PageHost for MemoryPage {
    fn location(&self) -> Url {
        self.location.clone()
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }

    fn session_get(&self, key: &str) -> Option<String> {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session.get(key).cloned()
    }

    fn session_set(&self, key: &str, value: &str) {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session.insert(key.to_string(), value.to_string());
    }

    fn session_remove(&self, key: &str) {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session.remove(key);
    }
}

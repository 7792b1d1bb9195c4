//! Navigation side effects triggered by session expiry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// The host's navigation surface.
pub trait Navigator: Send + Sync {
    /// Path of the surface the user is currently on.
    fn current_path(&self) -> String;

    /// Send the user to the login surface.
    fn navigate_to_login(&self);
}

/// Whether `current_path` is already the login surface.
pub fn is_login_surface(current_path: &str, login_path: &str) -> bool {
    !login_path.is_empty() && current_path.contains(login_path)
}

/// Navigator for processes without a UI: records redirects and logs them.
#[derive(Debug)]
pub struct HeadlessNavigator {
    login_path: String,
    current_path: Mutex<String>,
    redirects: AtomicUsize,
}

impl HeadlessNavigator {
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
            current_path: Mutex::new("/".to_string()),
            redirects: AtomicUsize::new(0),
        }
    }

    pub fn set_current_path(&self, path: impl Into<String>) {
        *self.current_path.lock().expect("navigator lock poisoned") = path.into();
    }

    /// Number of login redirects performed.
    pub fn redirect_count(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl Navigator for HeadlessNavigator {
    fn current_path(&self) -> String {
        self.current_path.lock().expect("navigator lock poisoned").clone()
    }

    fn navigate_to_login(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
        self.set_current_path(self.login_path.clone());
        tracing::info!(path = %self.login_path, "Redirecting to login");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_surface_detection() {
        assert!(is_login_surface("/login", "/login"));
        assert!(is_login_surface("/login?next=/loads", "/login"));
        assert!(!is_login_surface("/loads/42", "/login"));
        assert!(!is_login_surface("/loads", ""));
    }

    #[test]
    fn test_headless_navigator_moves_to_login() {
        let nav = HeadlessNavigator::new("/login");
        nav.set_current_path("/messages");
        nav.navigate_to_login();
        assert_eq!(nav.current_path(), "/login");
        assert_eq!(nav.redirect_count(), 1);
    }
}

//! Ties a view's lifetime to the signed-in identity

use tracing::info;

/// Holds the view opened for the current user, if any
///
/// Signing in opens a view, switching users drops the old view before
/// opening the new one, and signing out drops it. Views that own a
/// [`CollectionSubscription`](super::subscription::CollectionSubscription)
/// stop polling as soon as they are dropped
pub struct IdentityScope<V> {
    open: Box<dyn Fn(&str) -> V + Send + Sync>,
    current: Option<(String, V)>,
}

impl<V> IdentityScope<V> {
    pub fn new(open: impl Fn(&str) -> V + Send + Sync + 'static) -> Self {
        Self {
            open: Box::new(open),
            current: None,
        }
    }

    /// Returns true when the view was replaced or dropped
    pub fn set_identity(&mut self, email: Option<&str>) -> bool {
        let unchanged = match (&self.current, email) {
            (Some((current, _)), Some(email)) => current == email,
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return false;
        }

        if let Some((previous, view)) = self.current.take() {
            drop(view);
            info!(user_email = %previous, "Closed view for signed-out identity");
        }
        if let Some(email) = email {
            let view = (self.open)(email);
            info!(user_email = %email, "Opened view for identity");
            self.current = Some((email.to_string(), view));
        }
        true
    }

    pub fn identity(&self) -> Option<&str> {
        self.current.as_ref().map(|(email, _)| email.as_str())
    }

    pub fn view(&self) -> Option<&V> {
        self.current.as_ref().map(|(_, view)| view)
    }

    pub fn view_mut(&mut self) -> Option<&mut V> {
        self.current.as_mut().map(|(_, view)| view)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    struct TrackedView {
        email: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Drop for TrackedView {
        fn drop(&mut self) {
            self.log.lock().push(format!("drop {}", self.email));
        }
    }

    fn scope(log: &Arc<Mutex<Vec<String>>>) -> IdentityScope<TrackedView> {
        let log = Arc::clone(log);
        IdentityScope::new(move |email| {
            log.lock().push(format!("open {email}"));
            TrackedView {
                email: email.to_string(),
                log: Arc::clone(&log),
            }
        })
    }

    #[test]
    fn switching_users_closes_before_opening() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scope = scope(&log);

        assert!(scope.set_identity(Some("ada@example.com")));
        assert!(!scope.set_identity(Some("ada@example.com")));
        assert!(scope.set_identity(Some("grace@example.com")));
        assert_eq!(scope.identity(), Some("grace@example.com"));
        assert!(scope.set_identity(None));
        assert!(scope.view().is_none());

        assert_eq!(
            *log.lock(),
            vec![
                "open ada@example.com",
                "drop ada@example.com",
                "open grace@example.com",
                "drop grace@example.com",
            ]
        );
    }

    #[test]
    fn no_identity_opens_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scope = scope(&log);
        assert!(!scope.set_identity(None));
        assert!(log.lock().is_empty());
    }
}

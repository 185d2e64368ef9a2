//! A connection paired with the deadline after which it must not be reused.

use tokio::time::Instant;

/// A connection held across a bounded window of time.
///
/// The pool stores every idle connection as a `Session`, but the type is
/// also useful on its own to callers which want to keep one connection for
/// several operations without going back to the pool each time.
#[derive(Debug)]
pub struct Session<C> {
    connection: C,
    expires_at: Instant,
}

impl<C> Session<C> {
    /// Pair `connection` with its expiration deadline.
    pub fn new(connection: C, expires_at: Instant) -> Self {
        Self {
            connection,
            expires_at,
        }
    }

    /// The connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// The connection, mutably.
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Give up the session, returning the connection.
    pub fn into_connection(self) -> C {
        self.connection
    }

    /// The instant at which the session expires.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Returns `true` once `now` has reached the deadline.
    ///
    /// The deadline itself counts as expired.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn expiry_is_boundary_inclusive() {
        let now = Instant::now();
        let session = Session::new("conn", now + Duration::from_secs(5));

        assert!(!session.is_expired(now));
        assert!(!session.is_expired(now + Duration::from_millis(4999)));
        assert!(session.is_expired(now + Duration::from_secs(5)));
        assert!(session.is_expired(now + Duration::from_secs(6)));
    }

    #[test]
    fn session_accessors() {
        let now = Instant::now();
        let mut session = Session::new(String::from("conn"), now);

        assert_eq!(session.connection(), "conn");
        session.connection_mut().push_str("-1");
        assert_eq!(session.expires_at(), now);
        assert!(session.is_expired(now));
        assert_eq!(session.into_connection(), "conn-1");
    }
}

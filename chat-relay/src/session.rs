/// Authentication state of one connection.
///
/// Owned by the connection's driver task; starts anonymous and becomes
/// authenticated at most once.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Session {
    identity: Option<Identity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: u64,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyAuthenticated;

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn user_id(&self) -> Option<u64> {
        self.identity.as_ref().map(|identity| identity.user_id)
    }

    pub fn username(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.username.as_str())
    }

    pub fn authenticate(
        &mut self,
        user_id: u64,
        username: String,
    ) -> Result<(), AlreadyAuthenticated> {
        if self.identity.is_some() {
            return Err(AlreadyAuthenticated);
        }
        self.identity = Some(Identity { user_id, username });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_anonymous() {
        let session = Session::new();
        assert!(!session.is_authenticated());
        assert_eq!(session.user_id(), None);
        assert_eq!(session.username(), None);
    }

    #[test]
    fn authenticates_exactly_once() {
        let mut session = Session::new();
        session
            .authenticate(3, "alice".into())
            .expect("first login succeeds");

        assert_eq!(session.authenticate(4, "bob".into()), Err(AlreadyAuthenticated));
        assert_eq!(session.user_id(), Some(3));
        assert_eq!(session.username(), Some("alice"));
    }
}

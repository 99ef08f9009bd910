#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Guest,
    User,
}

/// Per-connection identity record. Every connection starts as a Guest and
/// may be upgraded to a User at most once for the lifetime of the
/// connection; queue and room membership are unaffected by the upgrade.
#[derive(Debug, Clone)]
pub struct ConnectionIdentity {
    pub connection_id: String,
    pub kind: IdentityKind,
    pub guest_id: String,
    pub user_id: Option<i64>,
    pub display_name: Option<String>,
}

impl ConnectionIdentity {
    pub fn guest(connection_id: String, guest_id: String) -> Self {
        Self {
            connection_id,
            kind: IdentityKind::Guest,
            guest_id,
            user_id: None,
            display_name: None,
        }
    }

    /// Rewrite this identity in place after a successful token check.
    pub fn upgrade(&mut self, user_id: i64, display_name: String) {
        self.kind = IdentityKind::User;
        self.user_id = Some(user_id);
        self.display_name = Some(display_name);
    }

    pub fn is_user(&self) -> bool {
        self.kind == IdentityKind::User
    }
}

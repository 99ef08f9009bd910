use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Expired,
}

impl FriendRequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Terminal statuses can never transition again.
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            FriendRequestStatus::Pending,
            FriendRequestStatus::Accepted,
            FriendRequestStatus::Rejected,
            FriendRequestStatus::Cancelled,
            FriendRequestStatus::Expired,
        ] {
            assert_eq!(FriendRequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(FriendRequestStatus::parse("bogus"), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!FriendRequestStatus::Pending.is_terminal());
        assert!(FriendRequestStatus::Accepted.is_terminal());
        assert!(FriendRequestStatus::Expired.is_terminal());
    }
}

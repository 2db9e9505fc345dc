use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

impl Role {
    pub fn from_acquired(acquired: bool) -> Self {
        if acquired {
            Role::Leader
        } else {
            Role::Follower
        }
    }

    pub fn is_leader(self) -> bool {
        self == Role::Leader
    }

    /// Event-log message for a change from `self` to `next`, if it is one.
    pub fn transition_message(self, next: Role) -> Option<&'static str> {
        match (self, next) {
            (Role::Follower, Role::Leader) => Some("became leader."),
            (Role::Leader, Role::Follower) => Some("lost leader status."),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leader => f.write_str("leader"),
            Role::Follower => f.write_str("follower"),
        }
    }
}

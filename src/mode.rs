use serde::{Deserialize, Serialize};
use std::fmt;

/// The driving mode of a platooning vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatoonMode {
    /// Solo, free driving.
    None,
    /// Heading a platoon of two or more vehicles.
    Leader,
    /// Following another member of a platoon.
    Follower,
    /// Actively closing the distance to a platoon ahead.
    Catchup,
    /// Following while the platoon is catching up.
    CatchupFollower,
}

impl PlatoonMode {
    /// The mode a non-leading member holds while its platoon is in `self`.
    pub fn follower_variant(self) -> Self {
        match self {
            PlatoonMode::Leader => PlatoonMode::Follower,
            PlatoonMode::Catchup => PlatoonMode::CatchupFollower,
            other => other,
        }
    }

    /// The mode the member at `index` holds while its platoon is in `self`.
    pub fn member_mode(self, index: usize) -> Self {
        if index == 0 {
            self
        } else {
            self.follower_variant()
        }
    }
}

impl fmt::Display for PlatoonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlatoonMode::None => "none",
            PlatoonMode::Leader => "leader",
            PlatoonMode::Follower => "follower",
            PlatoonMode::Catchup => "catchup",
            PlatoonMode::CatchupFollower => "catchup-follower",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::PlatoonMode::*;

    #[test]
    fn member_modes_follow_the_platoon_mode() {
        assert_eq!(Leader.member_mode(0), Leader);
        assert_eq!(Leader.member_mode(3), Follower);
        assert_eq!(Catchup.member_mode(0), Catchup);
        assert_eq!(Catchup.member_mode(1), CatchupFollower);
        assert_eq!(None.member_mode(0), None);
        assert_eq!(Follower.member_mode(0), Follower);
        assert_eq!(Follower.member_mode(2), Follower);
    }
}

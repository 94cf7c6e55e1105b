//! Main Mode state machine
//!
//! Each state names the handler that runs on the next inbound message (or,
//! for state 1, on the locally started exchange).
//!
//! # State Transitions
//!
//! ```text
//! Initiator                              Responder
//! ---------                              ---------
//! 1: send SA              -->
//!                                        2: select SA, send SA
//! 3: verify SA, send KE Ni <--
//!                         -->            4: send KE Nr, derive keys
//! 5: derive keys,         <--
//!    send ID + HASH_I/SIG_I (encrypted)
//!                         -->            6: verify, send ID + HASH_R/SIG_R
//! 7: verify               <--               COMPLETE
//!    COMPLETE
//! ```

use std::fmt;

/// Which side of the exchange we are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// We sent the first message
    Initiator,
    /// We answered the first message
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

/// Main Mode exchange state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MainModeState {
    /// Send the SA proposal
    Initiator1,
    /// Select a transform from the Initiator's proposal
    Responder2,
    /// Verify the selection, send KE and nonce
    Initiator3,
    /// Receive KE and nonce, send ours
    Responder4,
    /// Receive KE and nonce, send encrypted identity and authentication
    Initiator5,
    /// Verify the Initiator, send encrypted identity and authentication
    Responder6,
    /// Verify the Responder
    Initiator7,
    /// Exchange finished; terminal
    Complete,
}

impl MainModeState {
    /// First state for a role
    pub fn initial(role: Role) -> Self {
        match role {
            Role::Initiator => MainModeState::Initiator1,
            Role::Responder => MainModeState::Responder2,
        }
    }

    /// State number 1..=7, `None` once complete
    pub fn number(self) -> Option<u8> {
        match self {
            MainModeState::Initiator1 => Some(1),
            MainModeState::Responder2 => Some(2),
            MainModeState::Initiator3 => Some(3),
            MainModeState::Responder4 => Some(4),
            MainModeState::Initiator5 => Some(5),
            MainModeState::Responder6 => Some(6),
            MainModeState::Initiator7 => Some(7),
            MainModeState::Complete => None,
        }
    }

    /// Role that runs this state, `None` once complete
    pub fn role(self) -> Option<Role> {
        match self.number() {
            Some(n) if n % 2 == 1 => Some(Role::Initiator),
            Some(_) => Some(Role::Responder),
            None => None,
        }
    }

    /// The state that follows a successful handler
    pub fn next(self) -> Self {
        match self {
            MainModeState::Initiator1 => MainModeState::Initiator3,
            MainModeState::Initiator3 => MainModeState::Initiator5,
            MainModeState::Initiator5 => MainModeState::Initiator7,
            MainModeState::Responder2 => MainModeState::Responder4,
            MainModeState::Responder4 => MainModeState::Responder6,
            MainModeState::Responder6 | MainModeState::Initiator7 | MainModeState::Complete => {
                MainModeState::Complete
            }
        }
    }

    /// Whether the inbound message for this state must be encrypted
    pub fn expects_encryption(self) -> bool {
        matches!(self, MainModeState::Responder6 | MainModeState::Initiator7)
    }

    /// Whether the exchange is finished
    pub fn is_complete(self) -> bool {
        self == MainModeState::Complete
    }
}

impl fmt::Display for MainModeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number() {
            Some(n) => write!(f, "MM{}", n),
            None => f.write_str("COMPLETE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(role: Role) -> Vec<MainModeState> {
        let mut states = vec![MainModeState::initial(role)];
        while !states[states.len() - 1].is_complete() {
            let next = states[states.len() - 1].next();
            states.push(next);
        }
        states
    }

    #[test]
    fn test_initiator_path() {
        let path = walk(Role::Initiator);
        let numbers: Vec<_> = path.iter().filter_map(|s| s.number()).collect();
        assert_eq!(numbers, vec![1, 3, 5, 7]);
        assert!(path[..4].iter().all(|s| s.role() == Some(Role::Initiator)));
    }

    #[test]
    fn test_responder_path() {
        let path = walk(Role::Responder);
        let numbers: Vec<_> = path.iter().filter_map(|s| s.number()).collect();
        assert_eq!(numbers, vec![2, 4, 6]);
        assert!(path[..3].iter().all(|s| s.role() == Some(Role::Responder)));
    }

    #[test]
    fn test_complete_is_terminal() {
        assert_eq!(MainModeState::Complete.next(), MainModeState::Complete);
        assert_eq!(MainModeState::Complete.role(), None);
        assert_eq!(MainModeState::Complete.to_string(), "COMPLETE");
        assert_eq!(MainModeState::Responder4.to_string(), "MM4");
    }

    #[test]
    fn test_encrypted_states() {
        assert!(MainModeState::Responder6.expects_encryption());
        assert!(MainModeState::Initiator7.expects_encryption());
        assert!(!MainModeState::Initiator5.expects_encryption());
    }
}

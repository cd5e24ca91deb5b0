//! Privilege levels, encoded as in table 3.1 of the privileged spec.

/// One of the three privilege levels this core implements.
///
/// Hypervisor-extension levels are not represented: only User, Supervisor,
/// and Machine exist here, matching `Non-goals` (no virtualization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrivilegeLevel {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

impl PrivilegeLevel {
    /// Decodes the 2-bit encoding used in `mstatus.MPP`/`mstatus.SPP` and the
    /// `PRV_*` constants of the privileged spec.
    ///
    /// The reserved encoding `2` (Hypervisor) is treated as Supervisor, which
    /// is the architecturally-mandated WARL behavior for a core that does not
    /// implement H-mode.
    pub fn from_u2(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::User,
            2 => Self::Supervisor,
            3 => Self::Machine,
            _ => Self::Supervisor,
        }
    }

    pub fn as_u2(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_its_own_encoding() {
        for level in [
            PrivilegeLevel::User,
            PrivilegeLevel::Supervisor,
            PrivilegeLevel::Machine,
        ] {
            assert_eq!(PrivilegeLevel::from_u2(level.as_u2()), level);
        }
    }

    #[test]
    fn machine_outranks_supervisor_outranks_user() {
        assert!(PrivilegeLevel::Machine > PrivilegeLevel::Supervisor);
        assert!(PrivilegeLevel::Supervisor > PrivilegeLevel::User);
    }
}

//! Exceptions, interrupts, and the trap-delivery sequence.
//!
//! Chapter 3.1.7 of the privileged spec: on a trap the core chooses a target
//! privilege mode (Machine, or Supervisor if the cause is delegated),
//! updates that mode's `epc`/`cause`/`tval`/status-stack CSRs, and sets `pc`
//! to that mode's trap vector. `mret`/`sret` reverse the status-stack half of
//! that sequence and restore `pc` from the saved `epc`.

use crate::csr::{Csr, MIP_MEIP, MIP_MSIP, MIP_MTIP, MIP_SEIP, MIP_SSIP, MIP_STIP};
use crate::privilege::PrivilegeLevel;

/// Synchronous exception causes this core raises. Values match the `mcause`
/// encoding in table 3.6 of the privileged spec (bit 31 clear).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    InstructionAddressMisaligned = 0,
    InstructionAccessFault = 1,
    IllegalInstruction = 2,
    Breakpoint = 3,
    LoadAddressMisaligned = 4,
    LoadAccessFault = 5,
    StoreAddressMisaligned = 6,
    StoreAccessFault = 7,
    EnvironmentCallFromUMode = 8,
    EnvironmentCallFromSMode = 9,
    EnvironmentCallFromMMode = 11,
}

/// Asynchronous interrupt causes. Values match table 3.6 with the
/// interrupt bit stripped off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    SupervisorSoftware = 1,
    MachineSoftware = 3,
    SupervisorTimer = 5,
    MachineTimer = 7,
    SupervisorExternal = 9,
    MachineExternal = 11,
}

impl Interrupt {
    fn mip_bit(self) -> u32 {
        match self {
            Self::SupervisorSoftware => MIP_SSIP,
            Self::MachineSoftware => MIP_MSIP,
            Self::SupervisorTimer => MIP_STIP,
            Self::MachineTimer => MIP_MTIP,
            Self::SupervisorExternal => MIP_SEIP,
            Self::MachineExternal => MIP_MEIP,
        }
    }
}

/// An exception together with the `tval` it reports: the faulting address
/// for memory faults, the raw instruction word for illegal instructions,
/// zero otherwise — matching the convention of the source this is grounded
/// on rather than the architecturally-optional "implementation may report
/// zero" fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecFault {
    pub exception: Exception,
    pub tval: u32,
}

impl ExecFault {
    pub fn new(exception: Exception, tval: u32) -> Self {
        Self { exception, tval }
    }
}

/// Either kind of trap, together with the `mcause`/`scause` encoding logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl Trap {
    /// The raw `mcause`/`scause` value: the exception/interrupt code in the
    /// low bits, with bit 31 set for interrupts.
    pub fn cause_code(self) -> u32 {
        match self {
            Self::Exception(e) => e as u32,
            Self::Interrupt(i) => (1 << 31) | (i as u32),
        }
    }
}

/// Delivers `trap` at the current `pc`, updating `csr` and `priv_level` and
/// returning the `pc` the core should resume at (the chosen mode's trap
/// vector).
///
/// A trap is delegated to Supervisor mode only when the current privilege is
/// User or Supervisor *and* the corresponding bit of `medeleg`/`mideleg` is
/// set; Machine-mode traps and non-delegated traps always go to Machine mode,
/// since RISC-V never traps "down" in privilege.
pub fn raise(csr: &mut Csr, priv_level: &mut PrivilegeLevel, pc: u32, trap: Trap, tval: u32) -> u32 {
    let delegated = *priv_level <= PrivilegeLevel::Supervisor
        && match trap {
            Trap::Exception(e) => (csr.medeleg() >> (e as u32)) & 1 != 0,
            Trap::Interrupt(i) => (csr.mideleg() >> (i as u32)) & 1 != 0,
        };

    let cause = trap.cause_code();
    if delegated {
        csr.set_scause(cause);
        csr.set_sepc(pc);
        csr.set_stval(tval);
        csr.set_mstatus_spie(csr.mstatus_sie());
        csr.set_mstatus_spp(*priv_level);
        csr.set_mstatus_sie(false);
        *priv_level = PrivilegeLevel::Supervisor;
        csr.stvec()
    } else {
        csr.set_mcause(cause);
        csr.set_mepc(pc);
        csr.set_mtval(tval);
        csr.set_mstatus_mpie(csr.mstatus_mie());
        csr.set_mstatus_mpp(*priv_level);
        csr.set_mstatus_mie(false);
        *priv_level = PrivilegeLevel::Machine;
        csr.mtvec()
    }
}

/// `MRET`: returns from Machine mode, restoring `MIE` from `MPIE`, dropping
/// privilege to `MPP`, and resetting `MPP` to User (table 3.7: "MRET...
/// sets the privilege mode as previously determined, and sets MPP to U").
pub fn mret(csr: &mut Csr, priv_level: &mut PrivilegeLevel) -> u32 {
    let mpp = csr.mstatus_mpp();
    csr.set_mstatus_mie(csr.mstatus_mpie());
    csr.set_mstatus_mpie(true);
    csr.set_mstatus_mpp(PrivilegeLevel::User);
    *priv_level = mpp;
    csr.mepc()
}

/// `SRET`: the Supervisor-mode analogue of [`mret`].
pub fn sret(csr: &mut Csr, priv_level: &mut PrivilegeLevel) -> u32 {
    let spp = csr.mstatus_spp();
    csr.set_mstatus_sie(csr.mstatus_spie());
    csr.set_mstatus_spie(true);
    csr.set_mstatus_spp(PrivilegeLevel::User);
    *priv_level = spp;
    csr.sepc()
}

/// Returns the lowest-cause-index pending, enabled interrupt, or `None`.
///
/// Masking follows the source directly rather than the general "traps never
/// go down in privilege" principle: in Machine mode only non-delegated
/// interrupts can fire, and only with `mstatus.MIE` set; in Supervisor mode
/// every non-delegated interrupt fires unconditionally, and delegated ones
/// fire too if `mstatus.SIE` is set; in User mode everything pending fires.
/// Ties are broken by picking the lowest cause index, not by a
/// priority table.
pub fn pending_interrupt(csr: &Csr, priv_level: PrivilegeLevel) -> Option<Interrupt> {
    let pending = csr.mip() & csr.mie_reg();
    if pending == 0 {
        return None;
    }

    let enabled_mask = match priv_level {
        PrivilegeLevel::Machine => {
            if csr.mstatus_mie() {
                !csr.mideleg()
            } else {
                0
            }
        }
        PrivilegeLevel::Supervisor => {
            let mut mask = !csr.mideleg();
            if csr.mstatus_sie() {
                mask |= csr.mideleg();
            }
            mask
        }
        PrivilegeLevel::User => u32::MAX,
    };

    const ALL: [Interrupt; 6] = [
        Interrupt::SupervisorSoftware,
        Interrupt::MachineSoftware,
        Interrupt::SupervisorTimer,
        Interrupt::MachineTimer,
        Interrupt::SupervisorExternal,
        Interrupt::MachineExternal,
    ];
    ALL.into_iter().find(|i| pending & enabled_mask & i.mip_bit() != 0)
}

//! The hart: the single owning aggregate of all processor state.
//!
//! Every other module in this crate is a pure function or a narrow
//! state machine (registers, memory, CSRs, the trap unit); `Hart` is what
//! glues them into something that can run a program. This mirrors the
//! reference design's choice to centralize state in one struct that every
//! instruction handler borrows mutably, rather than scattering global
//! mutable statics the way the original C implementation did.

use log::{debug, trace};

use crate::compressed;
use crate::csr::{Csr, CsrAccessError, CsrWriteOutcome};
use crate::decode::Instruction;
use crate::execute;
use crate::memory::Memory;
use crate::privilege::PrivilegeLevel;
use crate::registers::Registers;
use crate::stats::Stats;
use crate::trap::{self, Trap};

/// 10 MHz: one `mtime` tick per 100ns of wall-clock time.
const TIMER_TICK_NANOS: u128 = 100;
/// Per-instruction `mtime` advance under `reproducible_timer`, chosen to keep
/// test runs that busy-wait on the timer converging in a bounded number of
/// iterations without depending on wall-clock speed.
const REPRODUCIBLE_TIMER_STEP: u64 = 1;

/// Physical address at which the next instruction will be fetched.
pub type Address = u32;

/// Construction-time options that do not change once a [`Hart`] is running.
#[derive(Debug, Clone, Copy)]
pub struct HartOptions {
    pub m_extension_enabled: bool,
    pub a_extension_enabled: bool,
    pub compressed_enabled: bool,
    /// When true (the reference policy), an illegal-instruction exception
    /// terminates the machine instead of being delivered to a trap handler.
    pub illegal_instruction_terminates: bool,
    /// When true, `mtime` advances by a fixed amount per retired instruction
    /// instead of tracking wall-clock time, making runs byte-for-byte
    /// reproducible. Used by the test suite and any deterministic replay.
    pub reproducible_timer: bool,
    pub collect_stats: bool,
}

impl Default for HartOptions {
    fn default() -> Self {
        Self {
            m_extension_enabled: true,
            a_extension_enabled: true,
            compressed_enabled: true,
            illegal_instruction_terminates: true,
            reproducible_timer: false,
            collect_stats: false,
        }
    }
}

/// One RV32 hart: registers, memory, CSR file, and the bookkeeping the core
/// loop needs to fetch, decode, and execute one instruction at a time.
#[derive(Debug)]
pub struct Hart {
    pub(crate) pc: Address,
    pub(crate) next_pc: Address,
    pub(crate) registers: Registers,
    pub(crate) priv_level: PrivilegeLevel,
    pub(crate) csr: Csr,
    pub(crate) memory: Memory,
    /// Address reserved by the last `LR.W`, cleared on any `SC.W`.
    pub(crate) load_reservation: Option<u32>,
    pub(crate) insn_counter: u64,
    pub(crate) machine_running: bool,
    pub(crate) options: HartOptions,
    pub(crate) stats: Stats,
    /// `[begin_signature, end_signature)`, when the loader found those
    /// symbols. Gates the compliance-test `ECALL` termination convention.
    pub(crate) signature_range: Option<(u32, u32)>,
    pub(crate) exit_status: Option<u32>,
    /// The trap delivered by the most recent [`Hart::step`], if any. Reset
    /// to `None` at the start of every step; exists so a caller (e.g. the
    /// `--exceptions-are-errors` CLI flag) can observe trap delivery without
    /// reaching into CSR state to infer it.
    pub(crate) last_trap: Option<Trap>,
    start_instant: Option<std::time::Instant>,
}

impl Hart {
    /// Creates a hart with `options`, RAM of `ram_size` bytes based at
    /// `ram_start`, starting execution at `entry` in Machine mode with the
    /// stack pointer initialized to the top of RAM.
    pub fn new(ram_start: u32, ram_size: usize, entry: u32, options: HartOptions) -> Self {
        let mut registers = Registers::new();
        registers.write(2, ram_start.wrapping_add(ram_size as u32));
        Self {
            pc: entry,
            next_pc: entry,
            registers,
            priv_level: PrivilegeLevel::Machine,
            csr: Csr::new(),
            memory: Memory::new(ram_start, ram_size),
            load_reservation: None,
            insn_counter: 0,
            machine_running: true,
            options,
            stats: Stats::default(),
            signature_range: None,
            exit_status: None,
            last_trap: None,
            start_instant: None,
        }
    }

    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn set_pc(&mut self, pc: Address) {
        self.pc = pc;
        self.next_pc = pc;
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn csr(&self) -> &Csr {
        &self.csr
    }

    /// Direct CSR access for debug tooling (a monitor dumping state, a
    /// test harness seeding interrupt-enable CSRs) outside of a `CSRRW`-style
    /// instruction. Subject to the same privilege/read-only checks as guest
    /// code issued at the current privilege level.
    pub fn read_csr(&self, csr: u16) -> Result<u32, CsrAccessError> {
        self.csr.read(csr, self.priv_level, false, self.insn_counter)
    }

    /// See [`Hart::read_csr`].
    pub fn write_csr(&mut self, csr: u16, value: u32) -> Result<CsrWriteOutcome, CsrAccessError> {
        self.csr.write(csr, value, self.priv_level)
    }

    pub fn priv_level(&self) -> PrivilegeLevel {
        self.priv_level
    }

    pub fn insn_counter(&self) -> u64 {
        self.insn_counter
    }

    pub fn is_running(&self) -> bool {
        self.machine_running
    }

    pub fn stop(&mut self) {
        self.machine_running = false;
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Sets `mtvec` directly. Used by the loader to pre-populate the trap
    /// vector from the `__irq_wrapper` symbol, bypassing CSR access checks
    /// since the loader runs before the hart has a notion of "current
    /// instruction".
    pub fn set_initial_mtvec(&mut self, value: u32) {
        self.csr.set_mtvec_from_loader(value);
    }

    /// Records the `begin_signature`/`end_signature` range found by the
    /// loader, enabling the compliance-test `ECALL` termination convention.
    pub fn set_signature_range(&mut self, begin: u32, end: u32) {
        self.signature_range = Some((begin, end));
    }

    pub fn signature_range(&self) -> Option<(u32, u32)> {
        self.signature_range
    }

    /// The exit status recorded by a compliance-test termination `ECALL`,
    /// or `None` if the machine hasn't terminated that way.
    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    /// Runs until [`Hart::is_running`] becomes false, returning the total
    /// number of instructions retired.
    pub fn run(&mut self) -> u64 {
        let start = self.insn_counter;
        while self.is_running() {
            self.step();
        }
        self.insn_counter - start
    }

    /// Advances the machine by exactly one core-loop iteration (§4.6): timer
    /// advance, interrupt check, fetch/decode/execute, next-PC alignment
    /// check, PC update.
    pub fn step(&mut self) {
        self.last_trap = None;
        self.advance_timer();
        self.next_pc = self.pc.wrapping_add(4);

        self.csr.set_mtip(self.memory.mtimecmp() <= self.memory.mtime());

        if let Some(interrupt) = trap::pending_interrupt(&self.csr, self.priv_level) {
            debug!("delivering {interrupt:?} at pc=0x{:08x}", self.pc);
            self.next_pc = trap::raise(&mut self.csr, &mut self.priv_level, self.pc, Trap::Interrupt(interrupt), 0);
            self.last_trap = Some(Trap::Interrupt(interrupt));
            if self.options.collect_stats {
                self.stats.record_trap();
            }
        } else {
            self.fetch_and_execute();
        }

        if self.next_pc % 4 != 0 {
            debug!("misaligned fetch target 0x{:08x}", self.next_pc);
            let exception = trap::Exception::InstructionAddressMisaligned;
            self.next_pc = trap::raise(&mut self.csr, &mut self.priv_level, self.next_pc, Trap::Exception(exception), self.next_pc);
            self.last_trap = Some(Trap::Exception(exception));
            if self.options.collect_stats {
                self.stats.record_trap();
            }
        }

        self.pc = self.next_pc;
    }

    /// The trap delivered by the most recent [`Hart::step`], or `None` if
    /// that step executed to completion without one.
    pub fn last_trap(&self) -> Option<Trap> {
        self.last_trap
    }

    fn advance_timer(&mut self) {
        if self.options.reproducible_timer {
            let mtime = self.memory.mtime().wrapping_add(REPRODUCIBLE_TIMER_STEP);
            self.memory.set_mtime(mtime);
        } else {
            let start = *self.start_instant.get_or_insert_with(std::time::Instant::now);
            let ticks = (start.elapsed().as_nanos() / TIMER_TICK_NANOS) as u64;
            self.memory.set_mtime(ticks);
        }
    }

    fn fetch_and_execute(&mut self) {
        let pc = self.pc;
        let half = self.memory.get_halfword(pc);
        let (raw, insn_size) = if self.options.compressed_enabled && half & 0b11 != 0b11 {
            (half as u32, 2)
        } else {
            (self.memory.get_insn32(pc), 4)
        };
        self.insn_counter += 1;

        let decoded = if insn_size == 2 {
            compressed::expand(half)
        } else {
            Ok(raw)
        }
        .and_then(Instruction::decode);

        trace!("pc=0x{pc:08x} raw=0x{raw:08x} size={insn_size}");

        let outcome = match decoded {
            Ok(instruction) => {
                if self.options.collect_stats {
                    self.stats.record_retirement(instruction.mnemonic(), self.insn_counter);
                }
                execute::execute(self, pc, insn_size, raw, instruction)
            }
            Err(_) => Err(trap::ExecFault::new(trap::Exception::IllegalInstruction, raw)),
        };

        if let Err(fault) = outcome {
            if fault.exception == trap::Exception::IllegalInstruction && self.options.illegal_instruction_terminates {
                debug!("illegal instruction 0x{raw:08x} at pc=0x{pc:08x}; halting");
                self.machine_running = false;
                self.next_pc = pc;
                return;
            }
            debug!("exception {:?} at pc=0x{pc:08x} tval=0x{:08x}", fault.exception, fault.tval);
            self.next_pc = trap::raise(&mut self.csr, &mut self.priv_level, pc, Trap::Exception(fault.exception), fault.tval);
            self.last_trap = Some(Trap::Exception(fault.exception));
            if self.options.collect_stats {
                self.stats.record_trap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::{addr, MIP_MTIP};

    fn reproducible_hart() -> Hart {
        Hart::new(0, 4096, 0, HartOptions { reproducible_timer: true, ..HartOptions::default() })
    }

    #[test]
    fn add_then_return() {
        let mut hart = reproducible_hart();
        hart.memory_mut().load_bytes(0, &0x00B5_0533u32.to_le_bytes());
        hart.memory_mut().load_bytes(4, &0x0000_8067u32.to_le_bytes());
        hart.registers_mut().write(10, 1);
        hart.registers_mut().write(11, 1);
        hart.registers_mut().write(1, 0xffff_fffe);

        hart.step(); // add
        assert_eq!(hart.registers().read(10), 2);
        assert_eq!(hart.pc(), 4);
        hart.step(); // jalr
        assert_eq!(hart.pc(), 0xffff_fffe);
    }

    #[test]
    fn misaligned_load_traps_with_faulting_address_as_tval() {
        let mut hart = reproducible_hart();
        // lw a0, 0(a1)
        hart.memory_mut().load_bytes(0, &0x0005_A503u32.to_le_bytes());
        hart.registers_mut().write(11, 0x1001);

        hart.step();

        assert_eq!(hart.csr().mcause(), 4);
        assert_eq!(hart.csr().mepc(), 0);
        assert_eq!(hart.priv_level(), PrivilegeLevel::Machine);
    }

    #[test]
    fn pending_timer_interrupt_is_delivered_before_fetch() {
        let mut hart = reproducible_hart();
        hart.csr.write(addr::MTVEC, 0x100, PrivilegeLevel::Machine).unwrap();
        hart.csr.write(addr::MIE, MIP_MTIP, PrivilegeLevel::Machine).unwrap();
        hart.csr.set_mstatus_mie(true);
        // mtimecmp defaults to 0, so it is immediately <= mtime.

        hart.step();

        assert_eq!(hart.pc(), 0x100);
        assert_eq!(hart.csr().mcause(), 0x8000_0007);
        assert_eq!(hart.priv_level(), PrivilegeLevel::Machine);
    }

    #[test]
    fn illegal_instruction_halts_machine_by_default() {
        let mut hart = reproducible_hart();
        hart.memory_mut().load_bytes(0, &0u32.to_le_bytes()); // opcode 0 is not a legal instruction
        hart.step();
        assert!(!hart.is_running());
    }

    #[test]
    fn compliance_ecall_with_odd_a3_terminates_with_exit_status() {
        let mut hart = reproducible_hart();
        // ecall
        hart.memory_mut().load_bytes(0, &0x0000_0073u32.to_le_bytes());
        hart.set_signature_range(0x40, 0x60);
        hart.registers_mut().write(3, (5 << 1) | 1);

        hart.step();

        assert!(!hart.is_running());
        assert_eq!(hart.exit_status(), Some(5));
    }
}

//! Per-opcode instruction semantics.
//!
//! Each handler reads whatever state it needs from `hart` and either sets
//! `hart.next_pc` and returns `Ok(())`, or returns `Err(Exception)` without
//! mutating `next_pc` — the caller (the core loop) is responsible for
//! turning that into a delivered trap. This keeps the invariant from the
//! data model intact: exactly one of "`next_pc` was set" or "a trap was
//! raised" holds on every path out of here.

use crate::csr::CsrWriteOutcome;
use crate::decode::{AmoOp, BranchCondition, CsrOp, Instruction, LoadWidth, RegImmOp, RegRegOp, ShiftImmOp, StoreWidth};
use crate::hart::Hart;
use crate::memory::MemoryFault;
use crate::privilege::PrivilegeLevel;
use crate::trap::{self, ExecFault, Exception};

fn load_fault(fault: MemoryFault) -> ExecFault {
    let tval = fault.address();
    let exception = match fault {
        MemoryFault::MisalignedLoad(_) => Exception::LoadAddressMisaligned,
        MemoryFault::LoadAccessFault(_) => Exception::LoadAccessFault,
        MemoryFault::MisalignedStore(_) | MemoryFault::StoreAccessFault(_) => {
            unreachable!("a load path never produces a store fault")
        }
    };
    ExecFault::new(exception, tval)
}

fn store_fault(fault: MemoryFault) -> ExecFault {
    let tval = fault.address();
    let exception = match fault {
        MemoryFault::MisalignedStore(_) => Exception::StoreAddressMisaligned,
        MemoryFault::StoreAccessFault(_) => Exception::StoreAccessFault,
        MemoryFault::MisalignedLoad(_) | MemoryFault::LoadAccessFault(_) => {
            unreachable!("a store path never produces a load fault")
        }
    };
    ExecFault::new(exception, tval)
}

pub fn execute(hart: &mut Hart, pc: u32, insn_size: u32, raw: u32, instruction: Instruction) -> Result<(), ExecFault> {
    let default_next = pc.wrapping_add(insn_size);
    let illegal = || ExecFault::new(Exception::IllegalInstruction, raw);
    match instruction {
        Instruction::Lui { rd, imm } => {
            hart.registers.write(rd, imm as u32);
            hart.next_pc = default_next;
        }
        Instruction::Auipc { rd, imm } => {
            hart.registers.write(rd, pc.wrapping_add(imm as u32));
            hart.next_pc = default_next;
        }
        Instruction::Jal { rd, offset } => {
            if rd != 0 {
                hart.registers.write(rd, default_next);
            }
            hart.next_pc = pc.wrapping_add(offset as u32);
            if hart.options.collect_stats {
                hart.stats.record_jump(pc, hart.next_pc);
            }
        }
        Instruction::Jalr { rd, rs1, offset } => {
            let target = hart.registers.read(rs1).wrapping_add(offset as u32) & !1;
            if rd != 0 {
                hart.registers.write(rd, default_next);
            }
            hart.next_pc = target;
            if hart.options.collect_stats {
                hart.stats.record_jump(pc, hart.next_pc);
            }
        }
        Instruction::Branch { condition, rs1, rs2, offset } => {
            let a = hart.registers.read(rs1);
            let b = hart.registers.read(rs2);
            let taken = match condition {
                BranchCondition::Beq => a == b,
                BranchCondition::Bne => a != b,
                BranchCondition::Blt => (a as i32) < (b as i32),
                BranchCondition::Bge => (a as i32) >= (b as i32),
                BranchCondition::Bltu => a < b,
                BranchCondition::Bgeu => a >= b,
            };
            hart.next_pc = if taken { pc.wrapping_add(offset as u32) } else { default_next };
            if hart.options.collect_stats {
                hart.stats.record_branch(taken);
            }
        }
        Instruction::Load { width, rd, rs1, offset } => {
            let addr = hart.registers.read(rs1).wrapping_add(offset as u32);
            let value = match width {
                LoadWidth::Lb => hart.memory.read_u8(addr).map(|v| v as i8 as i32 as u32).map_err(load_fault)?,
                LoadWidth::Lbu => hart.memory.read_u8(addr).map(u32::from).map_err(load_fault)?,
                LoadWidth::Lh => hart.memory.read_u16(addr).map(|v| v as i16 as i32 as u32).map_err(load_fault)?,
                LoadWidth::Lhu => hart.memory.read_u16(addr).map(u32::from).map_err(load_fault)?,
                LoadWidth::Lw => hart.memory.read_u32(addr).map_err(load_fault)?,
            };
            if rd != 0 {
                hart.registers.write(rd, value);
            }
            hart.next_pc = default_next;
        }
        Instruction::Store { width, rs1, rs2, offset } => {
            let addr = hart.registers.read(rs1).wrapping_add(offset as u32);
            let value = hart.registers.read(rs2);
            match width {
                StoreWidth::Sb => hart.memory.write_u8(addr, value as u8).map_err(store_fault)?,
                StoreWidth::Sh => hart.memory.write_u16(addr, value as u16).map_err(store_fault)?,
                StoreWidth::Sw => hart.memory.write_u32(addr, value).map_err(store_fault)?,
            }
            hart.next_pc = default_next;
        }
        Instruction::OpImm { op, rd, rs1, imm } => {
            let a = hart.registers.read(rs1);
            let result = match op {
                RegImmOp::Addi => a.wrapping_add(imm as u32),
                RegImmOp::Slti => u32::from((a as i32) < imm),
                RegImmOp::Sltiu => u32::from(a < imm as u32),
                RegImmOp::Xori => a ^ (imm as u32),
                RegImmOp::Ori => a | (imm as u32),
                RegImmOp::Andi => a & (imm as u32),
            };
            hart.registers.write(rd, result);
            hart.next_pc = default_next;
        }
        Instruction::ShiftImm { op, rd, rs1, shamt } => {
            let a = hart.registers.read(rs1);
            let result = match op {
                ShiftImmOp::Slli => a << shamt,
                ShiftImmOp::Srli => a >> shamt,
                ShiftImmOp::Srai => ((a as i32) >> shamt) as u32,
            };
            hart.registers.write(rd, result);
            hart.next_pc = default_next;
        }
        Instruction::Op { op, rd, rs1, rs2 } => {
            let a = hart.registers.read(rs1);
            let b = hart.registers.read(rs2);
            let is_m_ext = matches!(
                op,
                RegRegOp::Mul | RegRegOp::Mulh | RegRegOp::Mulhsu | RegRegOp::Mulhu | RegRegOp::Div | RegRegOp::Divu | RegRegOp::Rem | RegRegOp::Remu
            );
            if is_m_ext && !hart.options.m_extension_enabled {
                return Err(illegal());
            }
            let result = match op {
                RegRegOp::Add => a.wrapping_add(b),
                RegRegOp::Sub => a.wrapping_sub(b),
                RegRegOp::Sll => a << (b & 0x1f),
                RegRegOp::Slt => u32::from((a as i32) < (b as i32)),
                RegRegOp::Sltu => u32::from(a < b),
                RegRegOp::Xor => a ^ b,
                RegRegOp::Srl => a >> (b & 0x1f),
                RegRegOp::Sra => ((a as i32) >> (b & 0x1f)) as u32,
                RegRegOp::Or => a | b,
                RegRegOp::And => a & b,
                RegRegOp::Mul => a.wrapping_mul(b),
                RegRegOp::Mulh => (((a as i32 as i64).wrapping_mul(b as i32 as i64)) >> 32) as u32,
                RegRegOp::Mulhsu => (((a as i32 as i64).wrapping_mul(b as i64)) >> 32) as u32,
                RegRegOp::Mulhu => (((a as u64).wrapping_mul(b as u64)) >> 32) as u32,
                RegRegOp::Div => div_signed(a as i32, b as i32) as u32,
                RegRegOp::Divu => div_unsigned(a, b),
                RegRegOp::Rem => rem_signed(a as i32, b as i32) as u32,
                RegRegOp::Remu => rem_unsigned(a, b),
            };
            hart.registers.write(rd, result);
            hart.next_pc = default_next;
        }
        Instruction::Fence | Instruction::FenceI => {
            hart.next_pc = default_next;
        }
        Instruction::Ecall => {
            let a3 = hart.registers.read(3);
            if hart.signature_range.is_some() && a3 & 1 != 0 {
                hart.exit_status = Some(a3 >> 1);
                hart.machine_running = false;
                hart.next_pc = default_next;
            } else {
                let exception = match hart.priv_level {
                    PrivilegeLevel::User => Exception::EnvironmentCallFromUMode,
                    PrivilegeLevel::Supervisor => Exception::EnvironmentCallFromSMode,
                    PrivilegeLevel::Machine => Exception::EnvironmentCallFromMMode,
                };
                return Err(ExecFault::new(exception, 0));
            }
        }
        Instruction::Ebreak => return Err(ExecFault::new(Exception::Breakpoint, 0)),
        Instruction::Mret => {
            if hart.priv_level != PrivilegeLevel::Machine {
                return Err(illegal());
            }
            hart.next_pc = trap::mret(&mut hart.csr, &mut hart.priv_level);
        }
        Instruction::Sret => {
            if hart.priv_level < PrivilegeLevel::Supervisor {
                return Err(illegal());
            }
            hart.next_pc = trap::sret(&mut hart.csr, &mut hart.priv_level);
        }
        Instruction::Wfi => {
            hart.next_pc = default_next;
        }
        Instruction::SfenceVma { .. } => {
            if hart.priv_level < PrivilegeLevel::Supervisor {
                return Err(illegal());
            }
            hart.next_pc = default_next;
        }
        Instruction::Csr { op, rd, rs1, csr } => {
            let write_suppressed = matches!(op, CsrOp::ReadSet | CsrOp::ReadClear) && rs1 == 0;
            let rs1_val = hart.registers.read(rs1);
            let old = do_csr(hart, op, csr, rs1_val, write_suppressed, raw)?;
            if rd != 0 {
                hart.registers.write(rd, old);
            }
            hart.next_pc = default_next;
        }
        Instruction::Csri { op, rd, imm, csr } => {
            let write_suppressed = matches!(op, CsrOp::ReadSet | CsrOp::ReadClear) && imm == 0;
            let old = do_csr(hart, op, csr, imm, write_suppressed, raw)?;
            if rd != 0 {
                hart.registers.write(rd, old);
            }
            hart.next_pc = default_next;
        }
        Instruction::Amo { op, width: _, aq: _, rl: _, rd, rs1, rs2 } => {
            if !hart.options.a_extension_enabled {
                return Err(illegal());
            }
            let addr = hart.registers.read(rs1);
            let result = execute_amo(hart, op, addr, rs2)?;
            if rd != 0 {
                hart.registers.write(rd, result);
            }
            hart.next_pc = default_next;
        }
    }
    Ok(())
}

fn do_csr(hart: &mut Hart, op: CsrOp, csr_num: u16, rs1_val: u32, write_suppressed: bool, raw: u32) -> Result<u32, ExecFault> {
    let will_write = !write_suppressed;
    let old = hart
        .csr
        .read(csr_num, hart.priv_level, will_write, hart.insn_counter)
        .map_err(|_| ExecFault::new(Exception::IllegalInstruction, raw))?;
    if !write_suppressed {
        let new_value = match op {
            CsrOp::ReadWrite => rs1_val,
            CsrOp::ReadSet => old | rs1_val,
            CsrOp::ReadClear => old & !rs1_val,
        };
        let outcome = hart
            .csr
            .write(csr_num, new_value, hart.priv_level)
            .map_err(|_| ExecFault::new(Exception::IllegalInstruction, raw))?;
        debug_assert!(matches!(outcome, CsrWriteOutcome::Ok | CsrWriteOutcome::FlushHint));
    }
    Ok(old)
}

fn execute_amo(hart: &mut Hart, op: AmoOp, addr: u32, rs2: u8) -> Result<u32, ExecFault> {
    match op {
        AmoOp::Lr => {
            let value = hart.memory.read_u32(addr).map_err(load_fault)?;
            hart.load_reservation = Some(addr);
            Ok(value)
        }
        AmoOp::Sc => {
            let rs2_val = hart.registers.read(rs2);
            if hart.load_reservation == Some(addr) {
                hart.memory.write_u32(addr, rs2_val).map_err(store_fault)?;
                hart.load_reservation = None;
                Ok(0)
            } else {
                hart.load_reservation = None;
                Ok(1)
            }
        }
        _ => {
            let original = hart.memory.read_u32(addr).map_err(load_fault)?;
            let operand = hart.registers.read(rs2);
            let new_value = match op {
                AmoOp::Swap => operand,
                AmoOp::Add => original.wrapping_add(operand),
                AmoOp::Xor => original ^ operand,
                AmoOp::And => original & operand,
                AmoOp::Or => original | operand,
                AmoOp::Min => ((original as i32).min(operand as i32)) as u32,
                AmoOp::Max => ((original as i32).max(operand as i32)) as u32,
                AmoOp::Minu => original.min(operand),
                AmoOp::Maxu => original.max(operand),
                AmoOp::Lr | AmoOp::Sc => unreachable!(),
            };
            hart.memory.write_u32(addr, new_value).map_err(store_fault)?;
            Ok(original)
        }
    }
}

/// `DIV` per the reference numeric edge cases: divide by zero yields
/// all-ones; `INT32_MIN / -1` overflows back to `INT32_MIN`.
fn div_signed(a: i32, b: i32) -> i32 {
    if b == 0 {
        -1
    } else if a == i32::MIN && b == -1 {
        i32::MIN
    } else {
        a.wrapping_div(b)
    }
}

fn div_unsigned(a: u32, b: u32) -> u32 {
    if b == 0 {
        u32::MAX
    } else {
        a / b
    }
}

/// `REM`: divide by zero returns the dividend; the `INT32_MIN / -1` overflow
/// case returns zero.
fn rem_signed(a: i32, b: i32) -> i32 {
    if b == 0 {
        a
    } else if a == i32::MIN && b == -1 {
        0
    } else {
        a.wrapping_rem(b)
    }
}

fn rem_unsigned(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        a % b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Instruction;
    use crate::hart::HartOptions;

    fn test_hart() -> Hart {
        Hart::new(0, 4096, 0, HartOptions::default())
    }

    #[test]
    fn addi_writes_result_and_advances_pc() {
        let mut hart = test_hart();
        hart.registers_mut().write(1, 5);
        execute(&mut hart, 0, 4, 0, Instruction::OpImm { op: RegImmOp::Addi, rd: 2, rs1: 1, imm: 10 }).unwrap();
        assert_eq!(hart.registers().read(2), 15);
        assert_eq!(hart.next_pc, 4);
    }

    #[test]
    fn jal_links_return_address_at_fetched_instruction_size() {
        let mut hart = test_hart();
        execute(&mut hart, 0x100, 2, 0, Instruction::Jal { rd: 1, offset: 16 }).unwrap();
        assert_eq!(hart.registers().read(1), 0x102);
        assert_eq!(hart.next_pc, 0x110);
    }

    #[test]
    fn jalr_clears_low_bit_of_target() {
        let mut hart = test_hart();
        hart.registers_mut().write(5, 0x205);
        execute(&mut hart, 0x0, 4, 0, Instruction::Jalr { rd: 0, rs1: 5, offset: 0 }).unwrap();
        assert_eq!(hart.next_pc, 0x204);
    }

    #[test]
    fn branch_not_taken_falls_through() {
        let mut hart = test_hart();
        execute(&mut hart, 0x10, 4, 0, Instruction::Branch { condition: BranchCondition::Beq, rs1: 1, rs2: 2, offset: -8 }).unwrap();
        assert_eq!(hart.next_pc, 0x14);
    }

    #[test]
    fn signed_division_by_zero_returns_all_ones() {
        let mut hart = test_hart();
        hart.registers_mut().write(1, 7);
        hart.registers_mut().write(2, 0);
        execute(&mut hart, 0, 4, 0, Instruction::Op { op: RegRegOp::Div, rd: 3, rs1: 1, rs2: 2 }).unwrap();
        assert_eq!(hart.registers().read(3), u32::MAX);
    }

    #[test]
    fn signed_division_overflow_returns_dividend() {
        let mut hart = test_hart();
        hart.registers_mut().write(1, i32::MIN as u32);
        hart.registers_mut().write(2, u32::MAX); // -1
        execute(&mut hart, 0, 4, 0, Instruction::Op { op: RegRegOp::Div, rd: 3, rs1: 1, rs2: 2 }).unwrap();
        assert_eq!(hart.registers().read(3), i32::MIN as u32);
        execute(&mut hart, 0, 4, 0, Instruction::Op { op: RegRegOp::Rem, rd: 4, rs1: 1, rs2: 2 }).unwrap();
        assert_eq!(hart.registers().read(4), 0);
    }

    #[test]
    fn m_extension_disabled_raises_illegal_instruction() {
        let mut hart = Hart::new(0, 4096, 0, HartOptions { m_extension_enabled: false, ..HartOptions::default() });
        let err = execute(&mut hart, 0, 4, 0xbeef, Instruction::Op { op: RegRegOp::Mul, rd: 1, rs1: 0, rs2: 0 }).unwrap_err();
        assert_eq!(err.exception, Exception::IllegalInstruction);
        assert_eq!(err.tval, 0xbeef);
    }

    #[test]
    fn misaligned_load_raises_load_address_misaligned() {
        let mut hart = test_hart();
        hart.registers_mut().write(1, 1);
        let err = execute(&mut hart, 0, 4, 0, Instruction::Load { width: LoadWidth::Lw, rd: 2, rs1: 1, offset: 0 }).unwrap_err();
        assert_eq!(err.exception, Exception::LoadAddressMisaligned);
        assert_eq!(err.tval, 1);
    }

    #[test]
    fn lr_then_matching_sc_succeeds_once() {
        let mut hart = test_hart();
        hart.registers_mut().write(1, 0x10);
        execute(&mut hart, 0, 4, 0, Instruction::Amo { op: AmoOp::Lr, width: StoreWidth::Sw, aq: false, rl: false, rd: 2, rs1: 1, rs2: 0 }).unwrap();
        hart.registers_mut().write(3, 0xaa);
        execute(&mut hart, 0, 4, 0, Instruction::Amo { op: AmoOp::Sc, width: StoreWidth::Sw, aq: false, rl: false, rd: 4, rs1: 1, rs2: 3 }).unwrap();
        assert_eq!(hart.registers().read(4), 0);
        assert_eq!(hart.memory().read_u32(0x10).unwrap(), 0xaa);
        // Reservation is now cleared; a second SC.W without a new LR.W fails.
        execute(&mut hart, 0, 4, 0, Instruction::Amo { op: AmoOp::Sc, width: StoreWidth::Sw, aq: false, rl: false, rd: 5, rs1: 1, rs2: 3 }).unwrap();
        assert_eq!(hart.registers().read(5), 1);
    }

    #[test]
    fn ecall_cause_depends_on_current_privilege() {
        let mut hart = test_hart();
        hart.priv_level = PrivilegeLevel::User;
        let err = execute(&mut hart, 0, 4, 0, Instruction::Ecall).unwrap_err();
        assert_eq!(err.exception, Exception::EnvironmentCallFromUMode);
        assert_eq!(err.tval, 0);
    }

    #[test]
    fn mret_from_non_machine_mode_is_illegal() {
        let mut hart = test_hart();
        hart.priv_level = PrivilegeLevel::User;
        let err = execute(&mut hart, 0, 4, 0x30200073, Instruction::Mret).unwrap_err();
        assert_eq!(err.exception, Exception::IllegalInstruction);
    }

    #[test]
    fn csrrs_with_rs1_zero_skips_write() {
        let mut hart = test_hart();
        // mtvec is writable from Machine mode; seed it, then issue csrrs x1, mtvec, x0.
        hart.csr.write(0x305, 0x4000, PrivilegeLevel::Machine).unwrap();
        execute(&mut hart, 0, 4, 0, Instruction::Csr { op: CsrOp::ReadSet, rd: 1, rs1: 0, csr: 0x305 }).unwrap();
        assert_eq!(hart.registers().read(1), 0x4000);
        assert_eq!(hart.csr.mtvec(), 0x4000);
    }
}

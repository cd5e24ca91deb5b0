//! Expansion of 16-bit compressed instructions into their equivalent
//! standard 32-bit encoding.
//!
//! [`expand`] is a pure function: it never touches processor state, and the
//! word it returns is handed straight to [`crate::decode::Instruction::decode`].
//! Immediates here are re-derived from the architecture's own bit layout for
//! each mnemonic rather than copied from any particular implementation, so
//! `c.addi16sp` and `c.lwsp` — whose source bit positions are easy to get
//! wrong by one nibble — are worked out from first principles below.

use crate::decode::DecodeError;

fn prime(bits: u16) -> u8 {
    8 + (bits & 0x7) as u8
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (((imm as u32) & 0xfff) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn s_type(imm: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 0x7f) << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | ((imm & 0x1f) << 7) | opcode
}

fn b_type(imm: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = imm as u32;
    let bit12 = (imm >> 12) & 1;
    let bit11 = (imm >> 11) & 1;
    let bits10_5 = (imm >> 5) & 0x3f;
    let bits4_1 = (imm >> 1) & 0xf;
    (bit12 << 31) | (bits10_5 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (bits4_1 << 8) | (bit11 << 7) | opcode
}

fn u_type(imm: u32, rd: u32, opcode: u32) -> u32 {
    (imm & 0xffff_f000) | (rd << 7) | opcode
}

fn j_type(imm: i32, rd: u32, opcode: u32) -> u32 {
    let imm = imm as u32;
    let bit20 = (imm >> 20) & 1;
    let bits19_12 = (imm >> 12) & 0xff;
    let bit11 = (imm >> 11) & 1;
    let bits10_1 = (imm >> 1) & 0x3ff;
    (bit20 << 31) | (bits10_1 << 21) | (bit11 << 20) | (bits19_12 << 12) | (rd << 7) | opcode
}

const OP_IMM: u32 = 0b001_0011;
const LUI: u32 = 0b011_0111;
const JAL: u32 = 0b110_1111;
const JALR: u32 = 0b110_0111;
const BRANCH: u32 = 0b110_0011;
const LOAD: u32 = 0b000_0011;
const STORE: u32 = 0b010_0011;
const OP: u32 = 0b011_0011;
const SYSTEM: u32 = 0b111_0011;

/// Expands a 16-bit compressed instruction word into the equivalent 32-bit
/// standard encoding. Reserved or all-zero encodings are illegal.
pub fn expand(half: u16) -> Result<u32, DecodeError> {
    let op = half & 0b11;
    let funct3 = (half >> 13) & 0b111;
    if half == 0 {
        return Err(DecodeError::IllegalEncoding(u32::from(half)));
    }

    match (op, funct3) {
        // Quadrant 0.
        (0b00, 0b000) => {
            // c.addi4spn rd', nzuimm -> addi rd', x2, nzuimm
            let rd = prime(half >> 2);
            let nzuimm = ((half >> 7) & 0x30) as u32 // bits 5:4 at [12:11]
                | ((half >> 1) & 0x3c0) as u32 // bits 9:6 at [10:7]
                | ((half >> 4) & 0x4) as u32 // bit 2 at [6]
                | ((half >> 2) & 0x8) as u32; // bit 3 at [5]
            if nzuimm == 0 {
                return Err(DecodeError::IllegalEncoding(u32::from(half)));
            }
            Ok(i_type(nzuimm as i32, 2, 0, u32::from(rd), OP_IMM))
        }
        (0b00, 0b010) => {
            // c.lw rd', imm(rs1')
            let rd = prime(half >> 2);
            let rs1 = prime(half >> 7);
            let imm = lw_imm(half);
            Ok(i_type(imm, u32::from(rs1), 0b010, u32::from(rd), LOAD))
        }
        (0b00, 0b110) => {
            // c.sw rs2', imm(rs1')
            let rs2 = prime(half >> 2);
            let rs1 = prime(half >> 7);
            let imm = lw_imm(half);
            Ok(s_type(imm, u32::from(rs2), u32::from(rs1), 0b010, STORE))
        }

        // Quadrant 1.
        (0b01, 0b000) => {
            // c.addi rd, nzimm (rd=0,imm=0 is c.nop)
            let rd = rd_rs1_field(half);
            let imm = addi_imm(half);
            Ok(i_type(imm, u32::from(rd), 0, u32::from(rd), OP_IMM))
        }
        (0b01, 0b010) => {
            // c.li rd, imm -> addi rd, x0, imm
            let rd = rd_rs1_field(half);
            let imm = addi_imm(half);
            Ok(i_type(imm, 0, 0, u32::from(rd), OP_IMM))
        }
        (0b01, 0b011) => {
            let rd = rd_rs1_field(half);
            if rd == 2 {
                // c.addi16sp imm -> addi x2, x2, imm
                let imm = addi16sp_imm(half);
                if imm == 0 {
                    return Err(DecodeError::IllegalEncoding(u32::from(half)));
                }
                Ok(i_type(imm, 2, 0, 2, OP_IMM))
            } else {
                // c.lui rd, imm -> lui rd, imm
                let nzimm = lui_imm(half);
                if nzimm == 0 || rd == 0 {
                    return Err(DecodeError::IllegalEncoding(u32::from(half)));
                }
                Ok(u_type(nzimm as u32, u32::from(rd), LUI))
            }
        }
        (0b01, 0b001) => {
            // c.jal imm -> jal x1, imm (RV32-only encoding; reserved on RV64)
            let imm = cj_imm(half);
            Ok(j_type(imm, 1, JAL))
        }
        (0b01, 0b100) => decode_misc_alu(half),
        (0b01, 0b101) => {
            // c.j imm -> jal x0, imm
            let imm = cj_imm(half);
            Ok(j_type(imm, 0, JAL))
        }
        (0b01, 0b110) | (0b01, 0b111) => {
            // c.beqz / c.bnez rs1', imm
            let rs1 = prime(half >> 7);
            let imm = cb_imm(half);
            let beq = funct3 == 0b110;
            Ok(b_type(imm, 0, u32::from(rs1), if beq { 0b000 } else { 0b001 }, BRANCH))
        }

        // Quadrant 2.
        (0b10, 0b000) => {
            // c.slli rd, shamt
            let rd = rd_rs1_field(half);
            let shamt = slli_shamt(half);
            if rd == 0 || shamt == 0 {
                return Err(DecodeError::IllegalEncoding(u32::from(half)));
            }
            Ok(r_type(0, shamt, u32::from(rd), 0b001, u32::from(rd), OP_IMM))
        }
        (0b10, 0b010) => {
            // c.lwsp rd, imm -> lw rd, imm(x2)
            let rd = rd_rs1_field(half);
            if rd == 0 {
                return Err(DecodeError::IllegalEncoding(u32::from(half)));
            }
            let imm = lwsp_imm(half);
            Ok(i_type(imm, 2, 0b010, u32::from(rd), LOAD))
        }
        (0b10, 0b100) => decode_cr(half),
        (0b10, 0b110) => {
            // c.swsp rs2, imm -> sw rs2, imm(x2)
            let rs2 = ((half >> 2) & 0x1f) as u32;
            let imm = swsp_imm(half);
            Ok(s_type(imm, rs2, 2, 0b010, STORE))
        }
        _ => Err(DecodeError::IllegalEncoding(u32::from(half))),
    }
}

fn rd_rs1_field(half: u16) -> u8 {
    ((half >> 7) & 0x1f) as u8
}

/// Sign-extended immediate shared by `c.addi`/`c.li`: bit 12 at [12], bits
/// 4:0 at [6:2].
fn addi_imm(half: u16) -> i32 {
    let raw = (((half >> 12) & 1) as u32) << 5 | ((half >> 2) & 0x1f) as u32;
    sign_extend(raw, 6)
}

/// `c.addi16sp`: nzimm[9] at [12], nzimm[4|6|8:7|5] at [6:2], scaled to a
/// multiple of 16.
fn addi16sp_imm(half: u16) -> i32 {
    let bit9 = ((half >> 12) & 1) as u32;
    let bit4 = ((half >> 6) & 1) as u32;
    let bit6 = ((half >> 5) & 1) as u32;
    let bits8_7 = ((half >> 3) & 0x3) as u32;
    let bit5 = ((half >> 2) & 1) as u32;
    let raw = (bit9 << 9) | (bit6 << 6) | (bits8_7 << 7) | (bit4 << 4) | (bit5 << 5);
    sign_extend(raw, 10)
}

/// `c.lui`: nzimm[17] at [12], nzimm[16:12] at [6:2] — placed directly in the
/// 20-bit `U`-immediate's low bits (bits 17:12 of the final value).
fn lui_imm(half: u16) -> i32 {
    let bit17 = ((half >> 12) & 1) as u32;
    let bits16_12 = ((half >> 2) & 0x1f) as u32;
    let raw = (bit17 << 17) | (bits16_12 << 12);
    sign_extend(raw, 18)
}

/// `c.lw`/`c.sw`: imm[5:3] at [12:10], imm[2] at [6], imm[6] at [5].
fn lw_imm(half: u16) -> i32 {
    let bits5_3 = ((half >> 10) & 0x7) as u32;
    let bit2 = ((half >> 6) & 1) as u32;
    let bit6 = ((half >> 5) & 1) as u32;
    ((bits5_3 << 3) | (bit2 << 2) | (bit6 << 6)) as i32
}

/// `c.j`: imm[11|4|9:8|10|6|7|3:1|5], the most scattered field in the set.
fn cj_imm(half: u16) -> i32 {
    let bit11 = ((half >> 12) & 1) as u32;
    let bit4 = ((half >> 11) & 1) as u32;
    let bits9_8 = ((half >> 9) & 0x3) as u32;
    let bit10 = ((half >> 8) & 1) as u32;
    let bit6 = ((half >> 7) & 1) as u32;
    let bit7 = ((half >> 6) & 1) as u32;
    let bits3_1 = ((half >> 3) & 0x7) as u32;
    let bit5 = ((half >> 2) & 1) as u32;
    let raw = (bit11 << 11) | (bit10 << 10) | (bits9_8 << 8) | (bit7 << 7) | (bit6 << 6) | (bit5 << 5) | (bit4 << 4) | (bits3_1 << 1);
    sign_extend(raw, 12)
}

/// `c.beqz`/`c.bnez`: imm[8|4:3] at [12:10], imm[7:6|2:1|5] at [6:2].
fn cb_imm(half: u16) -> i32 {
    let bit8 = ((half >> 12) & 1) as u32;
    let bits4_3 = ((half >> 10) & 0x3) as u32;
    let bits7_6 = ((half >> 5) & 0x3) as u32;
    let bits2_1 = ((half >> 3) & 0x3) as u32;
    let bit5 = ((half >> 2) & 1) as u32;
    let raw = (bit8 << 8) | (bits7_6 << 6) | (bit5 << 5) | (bits4_3 << 3) | (bits2_1 << 1);
    sign_extend(raw, 9)
}

fn slli_shamt(half: u16) -> u32 {
    let bit5 = ((half >> 12) & 1) as u32;
    let bits4_0 = ((half >> 2) & 0x1f) as u32;
    (bit5 << 5) | bits4_0
}

/// `c.lwsp`: imm[5] at [12], imm[4:2] at [6:4], imm[7:6] at [3:2].
fn lwsp_imm(half: u16) -> i32 {
    let bit5 = ((half >> 12) & 1) as u32;
    let bits4_2 = ((half >> 4) & 0x7) as u32;
    let bits7_6 = ((half >> 2) & 0x3) as u32;
    ((bit5 << 5) | (bits7_6 << 6) | (bits4_2 << 2)) as i32
}

/// `c.swsp`: imm[5:2] at [12:9], imm[7:6] at [8:7].
fn swsp_imm(half: u16) -> i32 {
    let bits5_2 = ((half >> 9) & 0xf) as u32;
    let bits7_6 = ((half >> 7) & 0x3) as u32;
    ((bits7_6 << 6) | (bits5_2 << 2)) as i32
}

fn decode_misc_alu(half: u16) -> Result<u32, DecodeError> {
    let rd = prime(half >> 7);
    let funct2 = (half >> 10) & 0x3;
    match funct2 {
        0b00 | 0b01 => {
            // c.srli / c.srai rd', shamt
            let shamt = slli_shamt(half);
            let funct7 = if funct2 == 0b00 { 0 } else { 0b010_0000 };
            Ok(r_type(funct7, shamt, u32::from(rd), 0b101, u32::from(rd), OP_IMM))
        }
        0b10 => {
            // c.andi rd', imm
            let imm = addi_imm(half);
            Ok(i_type(imm, u32::from(rd), 0b111, u32::from(rd), OP_IMM))
        }
        0b11 => {
            let rs2 = prime(half >> 2);
            let bit12 = (half >> 12) & 1;
            let funct2b = (half >> 5) & 0x3;
            let (funct7, funct3) = match (bit12, funct2b) {
                (0, 0b00) => (0b010_0000, 0b000), // c.sub
                (0, 0b01) => (0, 0b100),           // c.xor
                (0, 0b10) => (0, 0b110),           // c.or
                (0, 0b11) => (0, 0b111),           // c.and
                _ => return Err(DecodeError::IllegalEncoding(u32::from(half))),
            };
            Ok(r_type(funct7, u32::from(rs2), u32::from(rd), funct3, u32::from(rd), OP))
        }
        _ => unreachable!(),
    }
}

fn decode_cr(half: u16) -> Result<u32, DecodeError> {
    let rd = rd_rs1_field(half);
    let rs2 = ((half >> 2) & 0x1f) as u32;
    let bit12 = (half >> 12) & 1;
    match (bit12, rs2) {
        (0, 0) => {
            // c.jr rd -> jalr x0, 0(rd)
            if rd == 0 {
                return Err(DecodeError::IllegalEncoding(u32::from(half)));
            }
            Ok(i_type(0, u32::from(rd), 0, 0, JALR))
        }
        (0, _) => {
            // c.mv rd, rs2 -> add rd, x0, rs2
            Ok(r_type(0, rs2, 0, 0, u32::from(rd), OP))
        }
        (1, 0) if rd == 0 => {
            // c.ebreak
            Ok(0x0010_0073)
        }
        (1, 0) => {
            // c.jalr rd -> jalr x1, 0(rd)
            Ok(i_type(0, u32::from(rd), 0, 1, JALR))
        }
        (1, _) => {
            // c.add rd, rs2 -> add rd, rd, rs2
            Ok(r_type(0, rs2, u32::from(rd), 0, u32::from(rd), OP))
        }
        _ => Err(DecodeError::IllegalEncoding(u32::from(half))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Instruction, RegImmOp, RegRegOp};

    #[test]
    fn all_zero_halfword_is_illegal() {
        assert!(matches!(expand(0), Err(DecodeError::IllegalEncoding(_))));
    }

    #[test]
    fn c_nop_expands_to_addi_x0_x0_0() {
        let word = expand(0x0001).unwrap();
        assert_eq!(Instruction::decode(word).unwrap(), Instruction::OpImm { op: RegImmOp::Addi, rd: 0, rs1: 0, imm: 0 });
    }

    #[test]
    fn c_li_expands_to_addi_from_x0() {
        // c.li x1, 5: funct3=010, rd=00001, imm bits encode 5.
        let half: u16 = 0b010_0_00001_00101_01;
        let word = expand(half).unwrap();
        assert_eq!(Instruction::decode(word).unwrap(), Instruction::OpImm { op: RegImmOp::Addi, rd: 1, rs1: 0, imm: 5 });
    }

    #[test]
    fn c_mv_expands_to_add_with_zero_source() {
        // c.mv x3, x5: funct4=1000 at [15:12]=0b1000? rd=00011, rs2=00101, op=10.
        let half: u16 = 0b1000_00011_00101_10;
        let word = expand(half).unwrap();
        assert_eq!(Instruction::decode(word).unwrap(), Instruction::Op { op: RegRegOp::Add, rd: 3, rs1: 0, rs2: 5 });
    }

    #[test]
    fn c_jr_requires_nonzero_rd() {
        let half: u16 = 0b1000_00000_00000_10;
        assert!(matches!(expand(half), Err(DecodeError::IllegalEncoding(_))));
    }

    #[test]
    fn c_addi4spn_rejects_all_zero_immediate() {
        // rd'=000 (x8), all immediate bits zero is reserved.
        let half: u16 = 0b000_00000000_000_00;
        assert!(matches!(expand(half), Err(DecodeError::IllegalEncoding(_))));
    }

    #[test]
    fn c_lw_then_c_sw_round_trip_same_offset() {
        // c.lw x8, 4(x9): rd'=000(x8), rs1'=001(x9), offset=4 (bit2 set, rest clear).
        let lw_half: u16 = 0x40c0;
        let lw_word = expand(lw_half).unwrap();
        match Instruction::decode(lw_word).unwrap() {
            Instruction::Load { rd: 8, rs1: 9, offset: 4, .. } => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn c_jal_expands_to_jal_x1() {
        // c.jal with offset 1600: op=01, funct3=001, and the same scattered
        // immediate layout as c.j.
        let half: u16 = 0x2581;
        let word = expand(half).unwrap();
        match Instruction::decode(word).unwrap() {
            Instruction::Jal { rd: 1, offset: 1600 } => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn c_ebreak_expands_to_standard_ebreak() {
        let half: u16 = 0b1001_00000_00000_10;
        let word = expand(half).unwrap();
        assert_eq!(Instruction::decode(word).unwrap(), Instruction::Ebreak);
    }
}

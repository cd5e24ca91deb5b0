//! Optional execution statistics, gated behind [`crate::hart::HartOptions::collect_stats`].
//!
//! Nothing here affects architectural behavior: a hart built with
//! `collect_stats: false` never touches this module's counters, and reading
//! them back always succeeds (they just stay at zero).

use std::collections::BTreeMap;

/// Running counters for a single hart's execution.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    branches_taken: u64,
    branches_not_taken: u64,
    jumps_forward: u64,
    jumps_backward: u64,
    traps_delivered: u64,
    instruction_count: u64,
    /// Per-mnemonic retirement counts, mirroring the reference
    /// implementation's `stats`/`statnames` histogram.
    opcode_counts: BTreeMap<&'static str, u64>,
}

impl Stats {
    pub fn record_branch(&mut self, taken: bool) {
        if taken {
            self.branches_taken += 1;
        } else {
            self.branches_not_taken += 1;
        }
    }

    /// Classifies a jump (`JAL`/`JALR`/taken branch) by whether it moved the
    /// program counter forward or backward.
    pub fn record_jump(&mut self, from: u32, to: u32) {
        if to >= from {
            self.jumps_forward += 1;
        } else {
            self.jumps_backward += 1;
        }
    }

    pub fn record_trap(&mut self) {
        self.traps_delivered += 1;
    }

    /// Records the retirement of one instruction, identified by its
    /// mnemonic ([`crate::decode::Instruction::mnemonic`]).
    pub fn record_retirement(&mut self, mnemonic: &'static str, instruction_count: u64) {
        *self.opcode_counts.entry(mnemonic).or_insert(0) += 1;
        self.instruction_count = instruction_count;
    }

    pub fn branches_taken(&self) -> u64 {
        self.branches_taken
    }

    pub fn branches_not_taken(&self) -> u64 {
        self.branches_not_taken
    }

    pub fn jumps_forward(&self) -> u64 {
        self.jumps_forward
    }

    pub fn jumps_backward(&self) -> u64 {
        self.jumps_backward
    }

    pub fn traps_delivered(&self) -> u64 {
        self.traps_delivered
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn opcode_counts(&self) -> &BTreeMap<&'static str, u64> {
        &self.opcode_counts
    }

    /// Renders a human-readable summary for the `--stats` CLI flag. Uses
    /// `println!` directly rather than the `log` facade: this is a
    /// requested report, not a diagnostic.
    pub fn print_report(&self) {
        println!("instructions retired: {}", self.instruction_count);
        println!("branches taken:      {}", self.branches_taken);
        println!("branches not taken:  {}", self.branches_not_taken);
        println!("jumps forward:       {}", self.jumps_forward);
        println!("jumps backward:      {}", self.jumps_backward);
        println!("traps delivered:     {}", self.traps_delivered);

        println!("\nper-opcode retirement counts:");
        let mut by_count: Vec<(&&str, &u64)> = self.opcode_counts.iter().collect();
        by_count.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (mnemonic, count) in by_count {
            println!("  {mnemonic:<12} {count}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_counters_start_at_zero() {
        let stats = Stats::default();
        assert_eq!(stats.branches_taken(), 0);
        assert_eq!(stats.branches_not_taken(), 0);
    }

    #[test]
    fn record_branch_increments_the_right_counter() {
        let mut stats = Stats::default();
        stats.record_branch(true);
        stats.record_branch(false);
        stats.record_branch(true);
        assert_eq!(stats.branches_taken(), 2);
        assert_eq!(stats.branches_not_taken(), 1);
    }

    #[test]
    fn record_jump_classifies_forward_and_backward() {
        let mut stats = Stats::default();
        stats.record_jump(0x100, 0x200);
        stats.record_jump(0x200, 0x100);
        assert_eq!(stats.jumps_forward(), 1);
        assert_eq!(stats.jumps_backward(), 1);
    }

    #[test]
    fn record_retirement_tallies_per_opcode_counts_and_instruction_count() {
        let mut stats = Stats::default();
        stats.record_retirement("ADDI", 1);
        stats.record_retirement("ADDI", 2);
        stats.record_retirement("JAL", 3);
        assert_eq!(stats.opcode_counts().get("ADDI"), Some(&2));
        assert_eq!(stats.opcode_counts().get("JAL"), Some(&1));
        assert_eq!(stats.instruction_count(), 3);
    }
}

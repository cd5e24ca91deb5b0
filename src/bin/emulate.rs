use std::io::{self, Write};

use clap::Parser;
use clap_num::maybe_hex;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use rv32emu::hart::HartOptions;
use rv32emu::loader::{self, DEFAULT_RAM_SIZE};

/// Emulate an RV32 hart against an ELF program image.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the ELF program image.
    input: String,

    /// Single-step through each instruction, printing pc and the
    /// instruction count and waiting for input between instructions.
    #[arg(short, long)]
    debug: bool,

    /// Stop the machine and report instead of letting a delivered trap
    /// run the guest's handler.
    #[arg(short, long)]
    exceptions_are_errors: bool,

    /// Break on program-counter match and begin single-stepping (0x prefix
    /// for hexadecimal).
    #[arg(short, long, value_parser=maybe_hex::<u32>)]
    pc_breakpoint: Option<u32>,

    /// Break on instruction-count match and begin single-stepping (0x
    /// prefix for hexadecimal).
    #[arg(short, long, value_parser=maybe_hex::<u64>)]
    cycle_breakpoint: Option<u64>,

    /// Print execution statistics after the machine halts.
    #[arg(long)]
    stats: bool,
}

fn main() {
    env_logger::init();

    let mut raw_args: Vec<String> = std::env::args().collect();
    let signature_path = extract_signature_arg(&mut raw_args);
    let args = Args::parse_from(raw_args);

    let hart_options = HartOptions { collect_stats: args.stats, ..HartOptions::default() };
    let mut hart = match loader::load_elf(&args.input, DEFAULT_RAM_SIZE, hart_options) {
        Ok(hart) => hart,
        Err(e) => {
            eprintln!("error loading {}: {e}", args.input);
            std::process::exit(1);
        }
    };

    let mut stepping = args.debug;
    let mut editor = DefaultEditor::new().ok();
    let stdout = io::stdout();

    while hart.is_running() {
        if args.pc_breakpoint == Some(hart.pc()) || args.cycle_breakpoint == Some(hart.insn_counter()) {
            stepping = true;
        }

        hart.step();

        for byte in hart.memory_mut().take_uart_tx() {
            let mut handle = stdout.lock();
            handle.write_all(&[byte]).ok();
            handle.flush().ok();
        }

        if args.exceptions_are_errors {
            if let Some(trap) = hart.last_trap() {
                println!("trap {trap:?} delivered at pc=0x{:08x}, insn_counter={}", hart.pc(), hart.insn_counter());
                break;
            }
        }

        if stepping {
            println!("pc=0x{:08x} insn_counter={}", hart.pc(), hart.insn_counter());
            if !prompt_continue(&mut editor) {
                break;
            }
        }
    }

    if args.stats {
        hart.stats().print_report();
    }

    if let Some(path) = signature_path {
        match loader::format_signature(&hart) {
            Some(signature) => {
                if let Err(e) = std::fs::write(&path, signature) {
                    eprintln!("error writing signature to {path}: {e}");
                    std::process::exit(1);
                }
            }
            None => eprintln!("no begin_signature/end_signature found in {}", args.input),
        }
    }

    if let Some(status) = hart.exit_status() {
        std::process::exit(status as i32);
    }
}

/// Pulls a `+signature=<path>` argument out of `args` in place, matching the
/// reference toolchain's `+`-prefixed flag rather than clap's `--`/`-`
/// conventions (clap has no notion of a `+`-prefixed option).
fn extract_signature_arg(args: &mut Vec<String>) -> Option<String> {
    let index = args.iter().position(|a| a.starts_with("+signature="))?;
    let arg = args.remove(index);
    arg.strip_prefix("+signature=").map(str::to_string)
}

fn prompt_continue(editor: &mut Option<DefaultEditor>) -> bool {
    let Some(editor) = editor else { return true };
    match editor.readline("(step) ") {
        Ok(_) => true,
        Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => false,
        Err(_) => true,
    }
}

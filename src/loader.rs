//! ELF image loading.
//!
//! Per §6's loader contract this is ordinary host-side glue, not part of the
//! architectural core: it builds a [`Hart`] by reading an ELF file with the
//! `elf` crate, locating the symbols the reference toolchain relies on
//! (`_start`/`__reset`, `__irq_wrapper`, `begin_signature`/`end_signature`),
//! and copying every allocatable section into RAM relative to the first
//! `PROGBITS` section's address. Errors here are host `thiserror` errors,
//! never guest traps.

use elf::abi::{SHT_NOBITS, SHT_PROGBITS};
use elf::endian::AnyEndian;
use elf::ElfBytes;
use log::{debug, warn};
use thiserror::Error;

use crate::hart::{Hart, HartOptions};

/// Matches the reference implementation's fixed RAM size (`RAM_SIZE` in the
/// source), used when the caller doesn't need a different budget.
pub const DEFAULT_RAM_SIZE: usize = 0x1_0000;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ELF image: {0}")]
    Parse(#[from] elf::ParseError),
    #[error("ELF image has no PROGBITS section to anchor ram_start")]
    NoTextSection,
    #[error("ELF image has no loadable sections")]
    NoLoadableSections,
}

/// Reads the ELF file at `path` and builds a [`Hart`] with `ram_size` bytes
/// of RAM, populated per the loader contract: `ram_start` is the address of
/// the first `PROGBITS` section, `pc` is `_start`/`__reset` (falling back to
/// the ELF entry point), `mtvec` is pre-populated from `__irq_wrapper` if
/// present, and the `begin_signature`/`end_signature` symbols (if both are
/// present) enable the compliance-test `ECALL` termination convention.
pub fn load_elf(path: &str, ram_size: usize, options: HartOptions) -> Result<Hart, LoaderError> {
    let bytes = std::fs::read(path).map_err(|source| LoaderError::Io { path: path.to_string(), source })?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(&bytes)?;

    let (shdrs, shstrtab) = file.section_headers_with_strtab()?;
    let shdrs = shdrs.ok_or(LoaderError::NoLoadableSections)?;
    let shstrtab = shstrtab.ok_or(LoaderError::NoLoadableSections)?;

    let ram_start = shdrs
        .iter()
        .find(|shdr| shdr.sh_type == SHT_PROGBITS && shdr.sh_addr != 0)
        .map(|shdr| shdr.sh_addr as u32)
        .ok_or(LoaderError::NoTextSection)?;

    let mut entry_symbol = None;
    let mut mtvec = None;
    let mut begin_signature = None;
    let mut end_signature = None;

    if let Some((symtab, strtab)) = file.symbol_table()? {
        for sym in symtab.iter() {
            let Ok(name) = strtab.get(sym.st_name as usize) else { continue };
            match name {
                "_start" | "__reset" => entry_symbol = Some(sym.st_value as u32),
                "__irq_wrapper" => mtvec = Some(sym.st_value as u32),
                "begin_signature" => begin_signature = Some(sym.st_value as u32),
                "end_signature" => end_signature = Some(sym.st_value as u32),
                _ => {}
            }
        }
    }

    let entry = entry_symbol.unwrap_or(file.ehdr.e_entry as u32);
    debug!("ram_start=0x{ram_start:08x} entry=0x{entry:08x}");

    let mut hart = Hart::new(ram_start, ram_size, entry, options);

    let mut loaded_any = false;
    for (index, shdr) in shdrs.iter().enumerate() {
        if shdr.sh_type == SHT_NOBITS || shdr.sh_addr == 0 || (shdr.sh_addr as u32) < ram_start {
            continue;
        }
        let Ok(data) = shstrtab.get(shdr.sh_name as usize) else { continue };
        let (section_bytes, compression) = file.section_data(&shdr)?;
        if compression.is_some() {
            warn!("section {data} (index {index}) is compressed; skipping");
            continue;
        }
        let offset = (shdr.sh_addr as u32 - ram_start) as usize;
        hart.memory_mut().load_bytes(offset, section_bytes);
        loaded_any = true;
    }
    if !loaded_any {
        return Err(LoaderError::NoLoadableSections);
    }

    if let Some(mtvec) = mtvec {
        hart.set_initial_mtvec(mtvec);
    }
    if let (Some(begin), Some(end)) = (begin_signature, end_signature) {
        hart.set_signature_range(begin, end);
    }

    Ok(hart)
}

/// Formats the `[begin_signature, end_signature)` range as the conformance
/// suite's signature file: one line per 16-byte chunk, each chunk's bytes
/// reversed (big-endian word order within the line, little-endian in RAM).
pub fn format_signature(hart: &Hart) -> Option<String> {
    let (begin, end) = hart.signature_range()?;
    let bytes = hart.memory().read_range(begin, (end - begin) as usize);
    let mut out = String::new();
    for chunk in bytes.chunks(16) {
        for byte in chunk.iter().rev() {
            out.push_str(&format!("{byte:02x}"));
        }
        out.push('\n');
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_signature_is_none_without_a_recorded_range() {
        let hart = Hart::new(0, 64, 0, HartOptions::default());
        assert_eq!(format_signature(&hart), None);
    }

    #[test]
    fn format_signature_reverses_bytes_within_each_16_byte_line() {
        let mut hart = Hart::new(0, 64, 0, HartOptions::default());
        hart.memory_mut().load_bytes(0, &(1..=16).collect::<Vec<u8>>());
        hart.set_signature_range(0, 16);
        let expected: String = (1..=16u8).rev().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join("") + "\n";
        assert_eq!(format_signature(&hart).unwrap(), expected);
    }
}

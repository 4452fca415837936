//! file: cli/src/disassembler.rs
//! description: renders encoded Kiln binaries back into a readable
//! listing. Mnemonics follow the assembly printer, targets come out as
//! absolute byte offsets since label identities do not survive encoding.

use std::collections::HashSet;
use std::io::Cursor;
use std::io::Read;

use kiln_core::codegen::asm::{CONTAINER_HEADER_LEN, CONTAINER_MAGIC};

/// One decoded instruction. Operand-free ops carry just the mnemonic.
#[derive(Debug)]
enum Decoded {
    Plain(&'static str),
    Slot(&'static str, u8),
    Push(u64),
    Target(&'static str, usize),
}

struct Line {
    offset: usize,
    op: Decoded,
}

pub fn disassemble(bytes: &[u8]) -> Result<String, String> {
    let mut out = String::new();
    let body = match strip_container(bytes, &mut out)? {
        Some(body) => body,
        None => bytes,
    };

    // First pass: decode every instruction and collect the offsets that
    // jumps and calls land on.
    let mut cur = Cursor::new(body);
    let mut lines: Vec<Line> = Vec::new();
    let mut targets: HashSet<usize> = HashSet::new();
    while (cur.position() as usize) < body.len() {
        let offset = cur.position() as usize;
        let code = read_u8(&mut cur)?;
        let op = match code {
            0x00 => Decoded::Plain("stop"),
            0x01 => Decoded::Plain("add"),
            0x02 => Decoded::Plain("sub"),
            0x03 => Decoded::Plain("mul"),
            0x04 => Decoded::Plain("div"),
            0x05 => Decoded::Plain("mod"),
            0x10 => Decoded::Plain("and"),
            0x11 => Decoded::Plain("or"),
            0x12 => Decoded::Plain("xor"),
            0x13 => Decoded::Plain("not"),
            0x14 => Decoded::Plain("shl"),
            0x15 => Decoded::Plain("shr"),
            0x20 => Decoded::Plain("eq"),
            0x21 => Decoded::Plain("lt"),
            0x22 => Decoded::Plain("gt"),
            0x23 => Decoded::Plain("iszero"),
            0x30 => Decoded::Plain("mload"),
            0x31 => Decoded::Plain("mstore"),
            0x32 => Decoded::Plain("memtop"),
            0x38 => Decoded::Plain("sload"),
            0x39 => Decoded::Plain("sstore"),
            0x50 => Decoded::Plain("pop"),
            0x51 => Decoded::Slot("sget", read_u8(&mut cur)?),
            0x52 => Decoded::Slot("sput", read_u8(&mut cur)?),
            0x53 => Decoded::Target("jump", read_u32(&mut cur)? as usize),
            0x54 => Decoded::Target("jumpi", read_u32(&mut cur)? as usize),
            0x55 => Decoded::Target("call", read_u32(&mut cur)? as usize),
            0x56 => Decoded::Plain("ret"),
            0x57 => Decoded::Plain("enter"),
            code @ 0x60..=0x67 => {
                let width = (code - 0x60) as usize + 1;
                Decoded::Push(read_word(&mut cur, width)?)
            }
            0x70 => Decoded::Plain("install"),
            0x71 => Decoded::Plain("abort"),
            0x72 => Decoded::Plain("dcopy"),
            0x73 => Decoded::Plain("input"),
            0x74 => Decoded::Plain("fuel"),
            other => {
                return Err(format!("unknown opcode 0x{:02x} at offset 0x{:04x}", other, offset));
            }
        };
        if let Decoded::Target(_, target) = &op {
            targets.insert(*target);
        }
        lines.push(Line { offset, op });
    }

    // Second pass: render, marking every offset some instruction
    // targets. Data and sub regions land behind the code, so a target
    // past the last instruction gets a trailing marker.
    for line in &lines {
        if targets.contains(&line.offset) {
            out.push_str(&format!("0x{:04x}:\n", line.offset));
        }
        match &line.op {
            Decoded::Plain(mnemonic) => {
                out.push_str(&format!("{:04x}    {}\n", line.offset, mnemonic));
            }
            Decoded::Slot(mnemonic, slot) => {
                out.push_str(&format!("{:04x}    {} {}\n", line.offset, mnemonic, slot));
            }
            Decoded::Push(value) => {
                out.push_str(&format!("{:04x}    push {}\n", line.offset, value));
            }
            Decoded::Target(mnemonic, target) => {
                out.push_str(&format!(
                    "{:04x}    {} 0x{:04x}\n",
                    line.offset, mnemonic, target
                ));
            }
        }
    }
    let mut past: Vec<usize> = targets.into_iter().filter(|t| *t >= body.len()).collect();
    past.sort_unstable();
    for target in past {
        out.push_str(&format!("0x{:04x}: (past code)\n", target));
    }

    Ok(out)
}

/// Peel a sealed container header off, describing it in `out`. Returns
/// `None` when the bytes do not start with the magic.
fn strip_container<'a>(bytes: &'a [u8], out: &mut String) -> Result<Option<&'a [u8]>, String> {
    if !bytes.starts_with(CONTAINER_MAGIC) {
        return Ok(None);
    }
    if bytes.len() < CONTAINER_HEADER_LEN {
        return Err(format!(
            "truncated container header: {} bytes, need {}",
            bytes.len(),
            CONTAINER_HEADER_LEN
        ));
    }
    let version = bytes[4];
    let declared = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
    let body = &bytes[CONTAINER_HEADER_LEN..];
    if declared != body.len() {
        return Err(format!(
            "container declares a {} byte body but {} bytes follow the header",
            declared,
            body.len()
        ));
    }
    out.push_str(&format!("container version {}, {} byte body\n", version, declared));
    Ok(Some(body))
}

/// Hex text in, bytes out. Anything that does not look like hex is
/// taken to be a raw binary already.
pub fn normalize_input(raw: &[u8]) -> Vec<u8> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(_) => return raw.to_vec(),
    };
    let stripped: String = text.split_whitespace().collect();
    let digits = stripped.strip_prefix("0x").unwrap_or(&stripped);
    if digits.is_empty() || digits.len() % 2 != 0 {
        return raw.to_vec();
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return raw.to_vec();
    }
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for i in (0..digits.len()).step_by(2) {
        match u8::from_str_radix(&digits[i..i + 2], 16) {
            Ok(byte) => bytes.push(byte),
            Err(_) => return raw.to_vec(),
        }
    }
    bytes
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, String> {
    let mut b = [0u8; 1];
    cur.read_exact(&mut b).map_err(|e| format!("unexpected eof: {}", e))?;
    Ok(b[0])
}

fn read_u32(cur: &mut Cursor<&[u8]>) -> Result<u32, String> {
    let mut b = [0u8; 4];
    cur.read_exact(&mut b).map_err(|e| format!("unexpected eof: {}", e))?;
    Ok(u32::from_le_bytes(b))
}

/// Little-endian value of `width` bytes, one to eight.
fn read_word(cur: &mut Cursor<&[u8]>, width: usize) -> Result<u64, String> {
    let mut b = [0u8; 8];
    cur.read_exact(&mut b[..width])
        .map_err(|e| format!("unexpected eof: {}", e))?;
    Ok(u64::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::codegen::asm::{Assembly, AsmItem, AsmOp};

    fn mnemonics(listing: &str) -> Vec<String> {
        listing
            .lines()
            .filter(|l| !l.ends_with(':') && !l.starts_with("container") && !l.starts_with("0x"))
            .map(|l| l[4..].trim().to_string())
            .collect()
    }

    #[test]
    fn every_operation_comes_back_with_its_mnemonic() {
        let ops = vec![
            AsmOp::Push(7),
            AsmOp::Push(300),
            AsmOp::Pop,
            AsmOp::SlotGet(3),
            AsmOp::SlotPut(4),
            AsmOp::Label(0),
            AsmOp::Add,
            AsmOp::Sub,
            AsmOp::Mul,
            AsmOp::Div,
            AsmOp::Mod,
            AsmOp::And,
            AsmOp::Or,
            AsmOp::Xor,
            AsmOp::Not,
            AsmOp::Shl,
            AsmOp::Shr,
            AsmOp::Eq,
            AsmOp::Lt,
            AsmOp::Gt,
            AsmOp::IsZero,
            AsmOp::MLoad,
            AsmOp::MStore,
            AsmOp::MemTop,
            AsmOp::SLoad,
            AsmOp::SStore,
            AsmOp::Install,
            AsmOp::Abort,
            AsmOp::DataCopy,
            AsmOp::Input,
            AsmOp::Fuel,
            AsmOp::Push(1),
            AsmOp::JumpIf(0),
            AsmOp::Jump(0),
            AsmOp::Call(0),
            AsmOp::Ret,
            AsmOp::Enter,
            AsmOp::Stop,
        ];
        let mut assembly = Assembly::new("probe");
        assembly.items = ops.into_iter().map(AsmItem::new).collect();
        let binary = assembly.assemble(None).expect("assembles");

        let listing = disassemble(&binary.bytecode).expect("decodes");
        let seen = mnemonics(&listing);
        let expected = [
            "push 7", "push 300", "pop", "sget 3", "sput 4", "add", "sub", "mul", "div",
            "mod", "and", "or", "xor", "not", "shl", "shr", "eq", "lt", "gt", "iszero",
            "mload", "mstore", "memtop", "sload", "sstore", "install", "abort", "dcopy",
            "input", "fuel", "push 1", "jumpi", "jump", "call", "ret", "enter", "stop",
        ];
        assert_eq!(seen.len(), expected.len(), "listing:\n{}", listing);
        for (rendered, want) in seen.iter().zip(expected.iter()) {
            if *want == "jumpi" || *want == "jump" || *want == "call" {
                assert!(
                    rendered.starts_with(&format!("{} 0x", want)),
                    "expected a {} with an offset, got {}",
                    want,
                    rendered
                );
            } else {
                assert_eq!(rendered, want);
            }
        }
        // Both branches aim at the label before `add`.
        assert!(listing.contains("0x000a:\n000a    add"), "listing:\n{}", listing);
    }

    #[test]
    fn container_headers_are_described() {
        let mut assembly = Assembly::new("sealed");
        assembly.items = vec![AsmItem::new(AsmOp::Stop)];
        let binary = assembly.assemble(Some(2)).expect("assembles");
        let listing = disassemble(&binary.bytecode).expect("decodes");
        assert!(listing.starts_with("container version 2, 1 byte body\n"));
        assert!(listing.contains("0000    stop"));
    }

    #[test]
    fn an_unknown_opcode_is_an_error() {
        let err = disassemble(&[0x00, 0xff]).unwrap_err();
        assert_eq!(err, "unknown opcode 0xff at offset 0x0001");
    }

    #[test]
    fn a_truncated_operand_is_an_error() {
        let err = disassemble(&[0x60]).unwrap_err();
        assert!(err.starts_with("unexpected eof"), "{}", err);
    }

    #[test]
    fn a_length_mismatch_in_the_header_is_an_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(CONTAINER_MAGIC);
        bytes.push(1);
        bytes.extend_from_slice(&9u32.to_le_bytes());
        bytes.push(0x00);
        let err = disassemble(&bytes).unwrap_err();
        assert!(err.contains("declares a 9 byte body"), "{}", err);
    }

    #[test]
    fn hex_text_is_normalized_to_bytes() {
        assert_eq!(normalize_input(b"0x6007\n"), vec![0x60, 0x07]);
        assert_eq!(normalize_input(b"60 07"), vec![0x60, 0x07]);
        let raw = [0x60u8, 0x07];
        assert_eq!(normalize_input(&raw), raw.to_vec());
    }
}

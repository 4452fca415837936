//! file: core/src/codegen/asm.rs
//! description: assembly containers, the binary encoder and source maps.
//!
//! An `Assembly` mirrors the unit tree: its own instruction list plus
//! nested sub-assemblies and data segments. Encoding lays the regions
//! out as [own code][sub regions][data segments] and resolves label and
//! data references against that layout.
//!
//! The target is a small stack machine with a slot frame per call.
//! Operands are evaluated left to right, so an operation pops its last
//! operand first. `sget`/`sput` move values between the stack and the
//! current frame's slots.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Unimplemented;
use crate::location::Span;
use crate::optimize::fuel::byte_width;

/// Magic prefix of a sealed container.
pub const CONTAINER_MAGIC: &[u8; 4] = b"KILN";
/// Sealed header: magic, one version byte, u32 body length.
pub const CONTAINER_HEADER_LEN: usize = 9;

/// One instruction, or a label marker that encodes to nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmOp {
    /// Push a constant word with the narrowest width variant.
    Push(u64),
    /// Push the byte offset of a named sub region, patched at link time.
    PushDataOffset(String),
    /// Push the byte length of a named sub region, patched at link time.
    PushDataSize(String),
    Pop,
    /// Push the value of a frame slot.
    SlotGet(u8),
    /// Pop the stack top into a frame slot.
    SlotPut(u8),
    /// Position marker for jumps and calls. Encodes to nothing.
    Label(usize),
    Jump(usize),
    /// Pop a condition, jump when it is non-zero.
    JumpIf(usize),
    /// Jump to a function entry, pushing the return frame.
    Call(usize),
    Ret,
    /// Function prologue marker, opens a fresh slot frame.
    Enter,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Eq,
    Lt,
    Gt,
    IsZero,
    MLoad,
    MStore,
    MemTop,
    SLoad,
    SStore,
    Install,
    Abort,
    DataCopy,
    Input,
    Fuel,
    Stop,
    /// Caller-supplied bytes dropped into the output verbatim.
    Raw(Vec<u8>),
}

impl AsmOp {
    /// True for ops after which execution never falls through.
    pub fn terminates(&self) -> bool {
        matches!(self, AsmOp::Jump(_) | AsmOp::Ret | AsmOp::Stop | AsmOp::Abort)
    }

    fn emits_bytes(&self) -> bool {
        !matches!(self, AsmOp::Label(_))
    }
}

/// An instruction with the source span it was generated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmItem {
    pub op: AsmOp,
    pub span: Option<Span>,
}

impl AsmItem {
    pub fn new(op: AsmOp) -> Self {
        AsmItem { op, span: None }
    }

    pub fn with_span(op: AsmOp, span: Option<Span>) -> Self {
        AsmItem { op, span }
    }
}

/// A child region of an assembly.
#[derive(Debug, Clone)]
pub enum SubAssembly {
    Unit(Arc<Assembly>),
    Data { name: String, contents: Vec<u8> },
}

impl SubAssembly {
    pub fn name(&self) -> &str {
        match self {
            SubAssembly::Unit(a) => &a.name,
            SubAssembly::Data { name, .. } => name,
        }
    }
}

/// A data reference the encoder could not resolve against the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRef {
    pub name: String,
    /// Byte position of the u32 placeholder in the binary.
    pub position: usize,
}

/// The encoded artifact.
#[derive(Debug, Clone, Default)]
pub struct LinkedBinary {
    pub bytecode: Vec<u8>,
    pub unresolved_refs: Vec<UnresolvedRef>,
}

#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub name: String,
    pub items: Vec<AsmItem>,
    pub subs: Vec<SubAssembly>,
}

impl Assembly {
    pub fn new(name: impl Into<String>) -> Self {
        Assembly {
            name: name.into(),
            items: Vec::new(),
            subs: Vec::new(),
        }
    }

    pub fn find_sub_unit(&self, name: &str) -> Option<&Arc<Assembly>> {
        self.subs.iter().find_map(|s| match s {
            SubAssembly::Unit(a) if a.name == name => Some(a),
            _ => None,
        })
    }

    pub fn sub_units(&self) -> impl Iterator<Item = &Arc<Assembly>> {
        self.subs.iter().filter_map(|s| match s {
            SubAssembly::Unit(a) => Some(a),
            SubAssembly::Data { .. } => None,
        })
    }

    /// Encode to a linked binary. With a container version the region is
    /// sealed under a header; embedded sub regions are never sealed
    /// individually.
    pub fn assemble(&self, container: Option<u8>) -> Result<LinkedBinary, Unimplemented> {
        let mut binary = self.encode_region()?;
        if let Some(version) = container {
            let body = std::mem::take(&mut binary.bytecode);
            let mut sealed = Vec::with_capacity(CONTAINER_HEADER_LEN + body.len());
            sealed.extend_from_slice(CONTAINER_MAGIC);
            sealed.push(version);
            sealed.extend_from_slice(&(body.len() as u32).to_le_bytes());
            sealed.extend_from_slice(&body);
            binary.bytecode = sealed;
            for r in &mut binary.unresolved_refs {
                r.position += CONTAINER_HEADER_LEN;
            }
        }
        Ok(binary)
    }

    fn encode_region(&self) -> Result<LinkedBinary, Unimplemented> {
        let mut out: Vec<u8> = Vec::new();
        let mut label_at: HashMap<usize, usize> = HashMap::new();
        // (byte position of the u32 placeholder, label id)
        let mut jump_sites: Vec<(usize, usize)> = Vec::new();
        // (byte position, name, wants size rather than offset)
        let mut data_sites: Vec<(usize, &str, bool)> = Vec::new();

        for item in &self.items {
            match &item.op {
                AsmOp::Label(id) => {
                    let previous = label_at.insert(*id, out.len());
                    assert!(
                        previous.is_none(),
                        "label {} defined twice in assembly \"{}\"",
                        id,
                        self.name
                    );
                }
                AsmOp::Push(value) => {
                    let width = byte_width(*value) as usize;
                    out.push(0x60 + (width - 1) as u8);
                    out.extend_from_slice(&value.to_le_bytes()[..width]);
                }
                AsmOp::PushDataOffset(name) => {
                    out.push(0x63);
                    data_sites.push((out.len(), name, false));
                    write_u32(&mut out, 0);
                }
                AsmOp::PushDataSize(name) => {
                    out.push(0x63);
                    data_sites.push((out.len(), name, true));
                    write_u32(&mut out, 0);
                }
                AsmOp::Pop => out.push(0x50),
                AsmOp::SlotGet(slot) => {
                    out.push(0x51);
                    out.push(*slot);
                }
                AsmOp::SlotPut(slot) => {
                    out.push(0x52);
                    out.push(*slot);
                }
                AsmOp::Jump(id) => {
                    out.push(0x53);
                    jump_sites.push((out.len(), *id));
                    write_u32(&mut out, 0);
                }
                AsmOp::JumpIf(id) => {
                    out.push(0x54);
                    jump_sites.push((out.len(), *id));
                    write_u32(&mut out, 0);
                }
                AsmOp::Call(id) => {
                    out.push(0x55);
                    jump_sites.push((out.len(), *id));
                    write_u32(&mut out, 0);
                }
                AsmOp::Ret => out.push(0x56),
                AsmOp::Enter => out.push(0x57),
                AsmOp::Add => out.push(0x01),
                AsmOp::Sub => out.push(0x02),
                AsmOp::Mul => out.push(0x03),
                AsmOp::Div => out.push(0x04),
                AsmOp::Mod => out.push(0x05),
                AsmOp::And => out.push(0x10),
                AsmOp::Or => out.push(0x11),
                AsmOp::Xor => out.push(0x12),
                AsmOp::Not => out.push(0x13),
                AsmOp::Shl => out.push(0x14),
                AsmOp::Shr => out.push(0x15),
                AsmOp::Eq => out.push(0x20),
                AsmOp::Lt => out.push(0x21),
                AsmOp::Gt => out.push(0x22),
                AsmOp::IsZero => out.push(0x23),
                AsmOp::MLoad => out.push(0x30),
                AsmOp::MStore => out.push(0x31),
                AsmOp::MemTop => out.push(0x32),
                AsmOp::SLoad => out.push(0x38),
                AsmOp::SStore => out.push(0x39),
                AsmOp::Install => out.push(0x70),
                AsmOp::Abort => out.push(0x71),
                AsmOp::DataCopy => out.push(0x72),
                AsmOp::Input => out.push(0x73),
                AsmOp::Fuel => out.push(0x74),
                AsmOp::Stop => out.push(0x00),
                AsmOp::Raw(bytes) => out.extend_from_slice(bytes),
            }
        }

        // Sub regions are laid out after the code, in declaration order.
        let mut layout: HashMap<&str, (usize, usize)> = HashMap::new();
        let mut unresolved: Vec<UnresolvedRef> = Vec::new();
        for sub in &self.subs {
            let bytes = match sub {
                SubAssembly::Unit(assembly) => {
                    let inner = assembly.encode_region()?;
                    for r in inner.unresolved_refs {
                        unresolved.push(UnresolvedRef {
                            name: r.name,
                            position: out.len() + r.position,
                        });
                    }
                    inner.bytecode
                }
                SubAssembly::Data { contents, .. } => contents.clone(),
            };
            layout.insert(sub.name(), (out.len(), bytes.len()));
            out.extend_from_slice(&bytes);
        }

        if out.len() > u32::MAX as usize {
            return Err(Unimplemented::new(
                format!(
                    "assembly \"{}\" exceeds the 4-byte address space",
                    self.name
                ),
                None,
            ));
        }

        for (position, id) in jump_sites {
            let target = label_at
                .get(&id)
                .unwrap_or_else(|| panic!("jump to undefined label {} in assembly \"{}\"", id, self.name));
            patch_u32(&mut out, position, *target as u32);
        }
        for (position, name, wants_size) in data_sites {
            match layout.get(name) {
                Some(&(offset, size)) => {
                    let value = if wants_size { size } else { offset };
                    patch_u32(&mut out, position, value as u32);
                }
                None => unresolved.push(UnresolvedRef {
                    name: name.to_string(),
                    position,
                }),
            }
        }

        Ok(LinkedBinary {
            bytecode: out,
            unresolved_refs: unresolved,
        })
    }

    /// The compressed source map for this assembly's own instructions.
    ///
    /// One entry per encoded instruction, `start:length:sourceIndex`,
    /// entries separated by `;`. Fields repeating the previous entry are
    /// omitted from the right; instructions without a span map to
    /// `-1:-1:0`. The single retained source is index 0.
    pub fn compute_source_map(&self) -> String {
        let mut map = String::new();
        let mut prev: Option<[i64; 3]> = None;
        for item in &self.items {
            if !item.op.emits_bytes() {
                continue;
            }
            let cur = match &item.span {
                Some(span) => [span.start as i64, span.len() as i64, 0],
                None => [-1, -1, 0],
            };
            if prev.is_some() {
                map.push(';');
            }
            map.push_str(&map_entry(cur, prev));
            prev = Some(cur);
        }
        map
    }
}

fn map_entry(cur: [i64; 3], prev: Option<[i64; 3]>) -> String {
    let keep = match prev {
        None => 3,
        Some(prev) => {
            let mut keep = 0;
            for i in 0..3 {
                if cur[i] != prev[i] {
                    keep = i + 1;
                }
            }
            keep
        }
    };
    cur[..keep]
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(":")
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn patch_u32(out: &mut [u8], position: usize, value: u32) {
    out[position..position + 4].copy_from_slice(&value.to_le_bytes());
}

/// The always-on structural cleanup over an instruction list. Returns
/// how many items it removed.
pub(crate) fn peephole(items: &mut Vec<AsmItem>) -> usize {
    let before = items.len();
    loop {
        let len = items.len();
        drop_value_then_pop(items);
        collapse_iszero_pairs(items);
        drop_jump_to_next(items);
        drop_unreachable(items);
        if items.len() == len {
            break;
        }
    }
    before - items.len()
}

// A pure value producer directly followed by pop cancels out.
fn drop_value_then_pop(items: &mut Vec<AsmItem>) {
    let mut i = 0;
    while i + 1 < items.len() {
        let produces = matches!(
            items[i].op,
            AsmOp::Push(_)
                | AsmOp::PushDataOffset(_)
                | AsmOp::PushDataSize(_)
                | AsmOp::SlotGet(_)
                | AsmOp::MemTop
                | AsmOp::Fuel
        );
        if produces && items[i + 1].op == AsmOp::Pop {
            items.drain(i..=i + 1);
            i = i.saturating_sub(1);
        } else {
            i += 1;
        }
    }
}

// iszero iszero jumpi tests the same condition as jumpi alone. The pair
// is only redundant in branch position, it normalizes values elsewhere.
fn collapse_iszero_pairs(items: &mut Vec<AsmItem>) {
    let mut i = 0;
    while i + 2 < items.len() {
        if items[i].op == AsmOp::IsZero
            && items[i + 1].op == AsmOp::IsZero
            && matches!(items[i + 2].op, AsmOp::JumpIf(_))
        {
            items.drain(i..=i + 1);
        } else {
            i += 1;
        }
    }
}

fn drop_jump_to_next(items: &mut Vec<AsmItem>) {
    let mut i = 0;
    while i < items.len() {
        let AsmOp::Jump(target) = items[i].op else {
            i += 1;
            continue;
        };
        let falls_through = items[i + 1..]
            .iter()
            .map_while(|item| match item.op {
                AsmOp::Label(id) => Some(id),
                _ => None,
            })
            .any(|id| id == target);
        if falls_through {
            items.remove(i);
        } else {
            i += 1;
        }
    }
}

fn drop_unreachable(items: &mut Vec<AsmItem>) {
    let mut i = 0;
    while i < items.len() {
        if items[i].op.terminates() {
            let mut cut = i + 1;
            while cut < items.len() && !matches!(items[cut].op, AsmOp::Label(_)) {
                cut += 1;
            }
            items.drain(i + 1..cut);
        }
        i += 1;
    }
}

impl fmt::Display for AsmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmOp::Push(value) => write!(f, "push {}", value),
            AsmOp::PushDataOffset(name) => write!(f, "push.off \"{}\"", name),
            AsmOp::PushDataSize(name) => write!(f, "push.size \"{}\"", name),
            AsmOp::Pop => write!(f, "pop"),
            AsmOp::SlotGet(slot) => write!(f, "sget {}", slot),
            AsmOp::SlotPut(slot) => write!(f, "sput {}", slot),
            AsmOp::Label(id) => write!(f, "L{}:", id),
            AsmOp::Jump(id) => write!(f, "jump L{}", id),
            AsmOp::JumpIf(id) => write!(f, "jumpi L{}", id),
            AsmOp::Call(id) => write!(f, "call L{}", id),
            AsmOp::Ret => write!(f, "ret"),
            AsmOp::Enter => write!(f, "enter"),
            AsmOp::Add => write!(f, "add"),
            AsmOp::Sub => write!(f, "sub"),
            AsmOp::Mul => write!(f, "mul"),
            AsmOp::Div => write!(f, "div"),
            AsmOp::Mod => write!(f, "mod"),
            AsmOp::And => write!(f, "and"),
            AsmOp::Or => write!(f, "or"),
            AsmOp::Xor => write!(f, "xor"),
            AsmOp::Not => write!(f, "not"),
            AsmOp::Shl => write!(f, "shl"),
            AsmOp::Shr => write!(f, "shr"),
            AsmOp::Eq => write!(f, "eq"),
            AsmOp::Lt => write!(f, "lt"),
            AsmOp::Gt => write!(f, "gt"),
            AsmOp::IsZero => write!(f, "iszero"),
            AsmOp::MLoad => write!(f, "mload"),
            AsmOp::MStore => write!(f, "mstore"),
            AsmOp::MemTop => write!(f, "memtop"),
            AsmOp::SLoad => write!(f, "sload"),
            AsmOp::SStore => write!(f, "sstore"),
            AsmOp::Install => write!(f, "install"),
            AsmOp::Abort => write!(f, "abort"),
            AsmOp::DataCopy => write!(f, "dcopy"),
            AsmOp::Input => write!(f, "input"),
            AsmOp::Fuel => write!(f, "fuel"),
            AsmOp::Stop => write!(f, "stop"),
            AsmOp::Raw(bytes) => {
                write!(f, "raw 0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl Assembly {
    fn write_listing(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "    ".repeat(depth);
        writeln!(f, "{}unit \"{}\":", pad, self.name)?;
        for item in &self.items {
            if matches!(item.op, AsmOp::Label(_)) {
                writeln!(f, "{}  {}", pad, item.op)?;
            } else {
                writeln!(f, "{}    {}", pad, item.op)?;
            }
        }
        for sub in &self.subs {
            match sub {
                SubAssembly::Unit(inner) => inner.write_listing(f, depth + 1)?,
                SubAssembly::Data { name, contents } => writeln!(
                    f,
                    "{}data \"{}\": {} bytes",
                    "    ".repeat(depth + 1),
                    name,
                    contents.len()
                )?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_listing(f, 0)
    }
}

// Intel-syntax listing of ia32 instructions.
//
// Virtual instructions print their register operands; real x87 instructions
// print stack positions taken from the x87 attributes.

use std::fmt;

use super::{Inst, MemOperand, Opcode};
use crate::x87::StReg;

impl fmt::Display for MemOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = match self.bits {
            8 => "byte",
            16 => "word",
            32 => "dword",
            64 => "qword",
            80 => "tbyte",
            _ => "",
        };
        if !size.is_empty() {
            write!(f, "{size} ptr ")?;
        }
        match self.offset {
            0 => write!(f, "[{}]", self.base),
            off if off < 0 => write!(f, "[{}-{}]", self.base, off.unsigned_abs()),
            off => write!(f, "[{}+{off}]", self.base),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op.is_virtual() {
            return self.fmt_virtual(f);
        }

        let name = self.op.mnemonic();
        let attr = self.x87;
        let pop = if attr.pop { "p" } else { "" };
        let reg = attr.reg.unwrap_or(StReg::TOP);
        match self.op {
            Opcode::Fld | Opcode::Fild => write!(f, "{name} {}", self.mem_str()),
            Opcode::Fldz | Opcode::Fld1 | Opcode::Fchs | Opcode::Fabs | Opcode::Fsqrt => {
                f.write_str(name)
            }
            Opcode::Fst | Opcode::Fist => write!(f, "{name}{pop} {}", self.mem_str()),
            Opcode::Fisttp => write!(f, "{name} {}", self.mem_str()),
            Opcode::Fadd | Opcode::Fsub | Opcode::Fmul | Opcode::Fdiv => {
                let rev = if attr.reverse { "r" } else { "" };
                match attr.reg {
                    None => write!(f, "{name}{rev} {}", self.mem_str()),
                    Some(reg) if attr.res_in_reg => {
                        write!(f, "{name}{rev}{pop} {reg}, {}", StReg::TOP)
                    }
                    Some(reg) => write!(f, "{name}{rev}{pop} {}, {reg}", StReg::TOP),
                }
            }
            Opcode::Fucomi => {
                write!(f, "{name}{pop} {}, {reg}", StReg::TOP)?;
                if attr.reverse {
                    f.write_str("  ; operands swapped")?;
                }
                Ok(())
            }
            Opcode::Fdup | Opcode::Fxch | Opcode::Fpop | Opcode::Ffreep => {
                write!(f, "{name} {reg}")
            }
            Opcode::Call => write!(f, "{name} {}", self.callee.as_deref().unwrap_or("?")),
            Opcode::Ret => f.write_str(name),
            Opcode::Jmp | Opcode::Jcc => {
                let cc = self.cc.map_or("mp", |cc| cc.suffix());
                write!(f, "j{cc}")?;
                let mut targets = self.targets.iter();
                if let Some(target) = targets.next() {
                    write!(f, " {target}")?;
                }
                if let Some(other) = targets.next() {
                    write!(f, "  ; else {other}")?;
                }
                Ok(())
            }
            _ => self.fmt_virtual(f),
        }
    }
}

impl Inst {
    fn mem_str(&self) -> String {
        self.mem.map(|m| m.to_string()).unwrap_or_default()
    }

    fn fmt_virtual(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.outs.is_empty() {
            let outs: Vec<String> = self.outs.iter().map(ToString::to_string).collect();
            write!(f, "{} = ", outs.join(", "))?;
        }
        f.write_str(self.op.mnemonic())?;

        let mem_base = self.mem.map(|m| m.base);
        let mut operands: Vec<String> = self.callee.iter().cloned().collect();
        operands.extend(
            self.ins
                .iter()
                .filter(|&&r| Some(r) != mem_base)
                .map(ToString::to_string),
        );
        operands.extend(self.mem.map(|m| m.to_string()));
        if !operands.is_empty() {
            write!(f, " {}", operands.join(", "))?;
        }
        Ok(())
    }
}

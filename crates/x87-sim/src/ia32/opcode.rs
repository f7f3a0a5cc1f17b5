use crate::ir::DenseOpcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Virtual x87 instructions, operands are flat fp registers
    VFld = 0,
    VFild = 1,
    VFldz = 2,
    VFld1 = 3,
    VFst = 4,
    VFist = 5,
    VFisttp = 6,
    VFadd = 7,
    VFsub = 8,
    VFmul = 9,
    VFdiv = 10,
    VFchs = 11,
    VFabs = 12,
    VFsqrt = 13,
    VFucomi = 14,
    // Register-level pseudo instructions
    VCopy = 15,
    VKeep = 16,
    VCall = 17,
    VRet = 18,
    // Real x87 instructions, operands are stack positions
    Fld = 19,
    Fild = 20,
    Fldz = 21,
    Fld1 = 22,
    Fst = 23,
    Fist = 24,
    Fisttp = 25,
    Fadd = 26,
    Fsub = 27,
    Fmul = 28,
    Fdiv = 29,
    Fchs = 30,
    Fabs = 31,
    Fsqrt = 32,
    Fucomi = 33,
    // Stack fixups
    Fdup = 34,
    Fxch = 35,
    Fpop = 36,
    Ffreep = 37,
    // Integer and control flow
    Call = 38,
    Ret = 39,
    Jmp = 40,
    Jcc = 41,
}

impl Opcode {
    /// The stack-form opcode a virtual opcode is rewritten to. `None` for
    /// real opcodes and for pseudo instructions that are removed instead.
    #[must_use]
    pub const fn real(self) -> Option<Self> {
        Some(match self {
            Self::VFld => Self::Fld,
            Self::VFild => Self::Fild,
            Self::VFldz => Self::Fldz,
            Self::VFld1 => Self::Fld1,
            Self::VFst => Self::Fst,
            Self::VFist => Self::Fist,
            Self::VFisttp => Self::Fisttp,
            Self::VFadd => Self::Fadd,
            Self::VFsub => Self::Fsub,
            Self::VFmul => Self::Fmul,
            Self::VFdiv => Self::Fdiv,
            Self::VFchs => Self::Fchs,
            Self::VFabs => Self::Fabs,
            Self::VFsqrt => Self::Fsqrt,
            Self::VFucomi => Self::Fucomi,
            Self::VCall => Self::Call,
            Self::VRet => Self::Ret,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn is_virtual(self) -> bool {
        (self as u8) <= Self::VRet as u8
    }

    /// Instructions carrying x87 stack attributes.
    #[must_use]
    pub const fn is_x87(self) -> bool {
        matches!(
            self,
            Self::VFld
                | Self::VFild
                | Self::VFldz
                | Self::VFld1
                | Self::VFst
                | Self::VFist
                | Self::VFisttp
                | Self::VFadd
                | Self::VFsub
                | Self::VFmul
                | Self::VFdiv
                | Self::VFchs
                | Self::VFabs
                | Self::VFsqrt
                | Self::VFucomi
                | Self::Fld
                | Self::Fild
                | Self::Fldz
                | Self::Fld1
                | Self::Fst
                | Self::Fist
                | Self::Fisttp
                | Self::Fadd
                | Self::Fsub
                | Self::Fmul
                | Self::Fdiv
                | Self::Fchs
                | Self::Fabs
                | Self::Fsqrt
                | Self::Fucomi
                | Self::Fdup
                | Self::Fxch
                | Self::Fpop
                | Self::Ffreep
        )
    }

    #[must_use]
    pub const fn is_terminating(self) -> bool {
        matches!(self, Self::VRet | Self::Ret | Self::Jmp | Self::Jcc)
    }

    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::VFld => "vfld",
            Self::VFild => "vfild",
            Self::VFldz => "vfldz",
            Self::VFld1 => "vfld1",
            Self::VFst => "vfst",
            Self::VFist => "vfist",
            Self::VFisttp => "vfisttp",
            Self::VFadd => "vfadd",
            Self::VFsub => "vfsub",
            Self::VFmul => "vfmul",
            Self::VFdiv => "vfdiv",
            Self::VFchs => "vfchs",
            Self::VFabs => "vfabs",
            Self::VFsqrt => "vfsqrt",
            Self::VFucomi => "vfucomi",
            Self::VCopy => "copy",
            Self::VKeep => "keep",
            Self::VCall => "vcall",
            Self::VRet => "vret",
            Self::Fld | Self::Fdup => "fld",
            Self::Fild => "fild",
            Self::Fldz => "fldz",
            Self::Fld1 => "fld1",
            Self::Fst => "fst",
            Self::Fist => "fist",
            Self::Fisttp => "fisttp",
            Self::Fadd => "fadd",
            Self::Fsub => "fsub",
            Self::Fmul => "fmul",
            Self::Fdiv => "fdiv",
            Self::Fchs => "fchs",
            Self::Fabs => "fabs",
            Self::Fsqrt => "fsqrt",
            Self::Fucomi => "fucomi",
            Self::Fxch => "fxch",
            Self::Fpop => "fstp",
            Self::Ffreep => "ffreep",
            Self::Call => "call",
            Self::Ret => "ret",
            Self::Jmp => "jmp",
            Self::Jcc => "j",
        }
    }
}

impl DenseOpcode for Opcode {
    const COUNT: usize = Self::Jcc as usize + 1;

    fn index(self) -> usize {
        self as usize
    }
}

use serde::{Deserialize, Serialize};

// =============================================================================
// OPCODE - first byte of every instruction
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==========================================================================
    // Stack copies and reservations
    // ==========================================================================
    /// Copy the top `size` bytes down to `[SP + offset]`.
    CpDownSp = 0x01,
    /// Reserve one uninitialised value of the qualifier's type.
    RsAdd = 0x02,
    /// Copy `size` bytes from `[SP + offset]` to the top of the stack.
    CpTopSp = 0x03,
    /// Push a constant of the qualifier's type.
    Const = 0x04,
    /// Call engine routine `index` with `argc` arguments.
    Action = 0x05,

    // ==========================================================================
    // Logical and bitwise
    // ==========================================================================
    LogAnd = 0x06,
    LogOr = 0x07,
    IncOr = 0x08,
    ExcOr = 0x09,
    BoolAnd = 0x0A,

    // ==========================================================================
    // Comparison
    // ==========================================================================
    Equal = 0x0B,
    NEqual = 0x0C,
    Geq = 0x0D,
    Gt = 0x0E,
    Lt = 0x0F,
    Leq = 0x10,

    // ==========================================================================
    // Arithmetic
    // ==========================================================================
    ShLeft = 0x11,
    ShRight = 0x12,
    UShRight = 0x13,
    Add = 0x14,
    Sub = 0x15,
    Mul = 0x16,
    Div = 0x17,
    Mod = 0x18,
    Neg = 0x19,
    Comp = 0x1A,

    // ==========================================================================
    // Control flow
    // ==========================================================================
    /// Adjust the stack pointer by a (negative) byte count.
    MovSp = 0x1B,
    StoreStateAll = 0x1C,
    /// Unconditional relative jump.
    Jmp = 0x1D,
    /// Call a subroutine; control returns after `RETN`.
    Jsr = 0x1E,
    /// Pop an int, jump if it is zero.
    Jz = 0x1F,
    Retn = 0x20,
    Destruct = 0x21,
    Not = 0x22,
    DecSp = 0x23,
    IncSp = 0x24,
    /// Pop an int, jump if it is non-zero.
    Jnz = 0x25,

    // ==========================================================================
    // Base-pointer addressing (globals)
    // ==========================================================================
    CpDownBp = 0x26,
    CpTopBp = 0x27,
    DecBp = 0x28,
    IncBp = 0x29,
    /// Push the current base pointer and point it at the stack top.
    SaveBp = 0x2A,
    RestoreBp = 0x2B,

    /// Snapshot globals and locals for a deferred `action` argument.
    StoreState = 0x2C,
    Nop = 0x2D,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x01 => CpDownSp,
            0x02 => RsAdd,
            0x03 => CpTopSp,
            0x04 => Const,
            0x05 => Action,
            0x06 => LogAnd,
            0x07 => LogOr,
            0x08 => IncOr,
            0x09 => ExcOr,
            0x0A => BoolAnd,
            0x0B => Equal,
            0x0C => NEqual,
            0x0D => Geq,
            0x0E => Gt,
            0x0F => Lt,
            0x10 => Leq,
            0x11 => ShLeft,
            0x12 => ShRight,
            0x13 => UShRight,
            0x14 => Add,
            0x15 => Sub,
            0x16 => Mul,
            0x17 => Div,
            0x18 => Mod,
            0x19 => Neg,
            0x1A => Comp,
            0x1B => MovSp,
            0x1C => StoreStateAll,
            0x1D => Jmp,
            0x1E => Jsr,
            0x1F => Jz,
            0x20 => Retn,
            0x21 => Destruct,
            0x22 => Not,
            0x23 => DecSp,
            0x24 => IncSp,
            0x25 => Jnz,
            0x26 => CpDownBp,
            0x27 => CpTopBp,
            0x28 => DecBp,
            0x29 => IncBp,
            0x2A => SaveBp,
            0x2B => RestoreBp,
            0x2C => StoreState,
            0x2D => Nop,
            _ => return None,
        })
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Opcodes whose encoding carries a relative jump instead of arguments.
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jsr | Opcode::Jz | Opcode::Jnz)
    }

    /// Opcodes that end a basic block. `JSR` returns to the next instruction
    /// and does not.
    pub fn ends_block(self) -> bool {
        matches!(
            self,
            Opcode::Jmp | Opcode::Jz | Opcode::Jnz | Opcode::Retn
        )
    }

    fn stem(self) -> &'static str {
        use Opcode::*;
        match self {
            CpDownSp => "CPDOWNSP",
            RsAdd => "RSADD",
            CpTopSp => "CPTOPSP",
            Const => "CONST",
            Action => "ACTION",
            LogAnd => "LOGAND",
            LogOr => "LOGOR",
            IncOr => "INCOR",
            ExcOr => "EXCOR",
            BoolAnd => "BOOLAND",
            Equal => "EQUAL",
            NEqual => "NEQUAL",
            Geq => "GEQ",
            Gt => "GT",
            Lt => "LT",
            Leq => "LEQ",
            ShLeft => "SHLEFT",
            ShRight => "SHRIGHT",
            UShRight => "USHRIGHT",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Neg => "NEG",
            Comp => "COMP",
            MovSp => "MOVSP",
            StoreStateAll => "STORE_STATEALL",
            Jmp => "JMP",
            Jsr => "JSR",
            Jz => "JZ",
            Retn => "RETN",
            Destruct => "DESTRUCT",
            Not => "NOT",
            DecSp => "DEC",
            IncSp => "INC",
            Jnz => "JNZ",
            CpDownBp => "CPDOWNBP",
            CpTopBp => "CPTOPBP",
            DecBp => "DEC",
            IncBp => "INC",
            SaveBp => "SAVEBP",
            RestoreBp => "RESTOREBP",
            StoreState => "STORE_STATE",
            Nop => "NOP",
        }
    }

    /// Assembler mnemonic for this opcode under `qualifier`, e.g. `ADDII`,
    /// `RSADDS` or `INCISP`.
    pub fn mnemonic(self, qualifier: Qualifier) -> String {
        match self {
            Opcode::StoreState | Opcode::StoreStateAll => self.stem().to_string(),
            Opcode::DecSp | Opcode::IncSp => format!("{}{}SP", self.stem(), qualifier.suffix()),
            Opcode::DecBp | Opcode::IncBp => format!("{}{}BP", self.stem(), qualifier.suffix()),
            _ => format!("{}{}", self.stem(), qualifier.suffix()),
        }
    }
}

// =============================================================================
// QUALIFIER - second byte, selects the operand types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qualifier {
    /// No operand types (jumps, `RETN`, `MOVSP`, ...).
    None = 0x00,
    /// Fixed qualifier of the stack-copy family and `DESTRUCT`.
    Copy = 0x01,

    Int = 0x03,
    Float = 0x04,
    String = 0x05,
    Object = 0x06,
    Effect = 0x10,
    Event = 0x11,
    Location = 0x12,
    Talent = 0x13,
    ItemProperty = 0x14,

    IntInt = 0x20,
    FloatFloat = 0x21,
    ObjectObject = 0x22,
    StringString = 0x23,
    StructStruct = 0x24,
    IntFloat = 0x25,
    FloatInt = 0x26,
    EffectEffect = 0x30,
    EventEvent = 0x31,
    LocationLocation = 0x32,
    TalentTalent = 0x33,
    ItemPropertyItemProperty = 0x34,
    VectorVector = 0x3A,
    VectorFloat = 0x3B,
    FloatVector = 0x3C,
}

impl Qualifier {
    /// Fixed qualifier byte of `STORE_STATE` (0x10, shared with `Effect`).
    pub const STATE: Qualifier = Qualifier::Effect;

    pub fn from_byte(byte: u8) -> Option<Qualifier> {
        use Qualifier::*;
        Some(match byte {
            0x00 => None,
            0x01 => Copy,
            0x03 => Int,
            0x04 => Float,
            0x05 => String,
            0x06 => Object,
            0x10 => Effect,
            0x11 => Event,
            0x12 => Location,
            0x13 => Talent,
            0x14 => ItemProperty,
            0x20 => IntInt,
            0x21 => FloatFloat,
            0x22 => ObjectObject,
            0x23 => StringString,
            0x24 => StructStruct,
            0x25 => IntFloat,
            0x26 => FloatInt,
            0x30 => EffectEffect,
            0x31 => EventEvent,
            0x32 => LocationLocation,
            0x33 => TalentTalent,
            0x34 => ItemPropertyItemProperty,
            0x3A => VectorVector,
            0x3B => VectorFloat,
            0x3C => FloatVector,
            _ => return Option::None,
        })
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn suffix(self) -> &'static str {
        use Qualifier::*;
        match self {
            None | Copy => "",
            Int => "I",
            Float => "F",
            String => "S",
            Object => "O",
            Effect => "EFF",
            Event => "EVT",
            Location => "LOC",
            Talent => "TAL",
            ItemProperty => "IP",
            IntInt => "II",
            FloatFloat => "FF",
            ObjectObject => "OO",
            StringString => "SS",
            StructStruct => "TT",
            IntFloat => "IF",
            FloatInt => "FI",
            EffectEffect => "EFFEFF",
            EventEvent => "EVTEVT",
            LocationLocation => "LOCLOC",
            TalentTalent => "TALTAL",
            ItemPropertyItemProperty => "IPIP",
            VectorVector => "VV",
            VectorFloat => "VF",
            FloatVector => "FV",
        }
    }

    /// Operand widths in words (lhs, rhs) for a binary qualifier, or the
    /// single operand width for a unary one in `.0`.
    pub fn operand_words(self) -> (i32, i32) {
        use Qualifier::*;
        match self {
            VectorVector => (3, 3),
            VectorFloat => (3, 1),
            FloatVector => (1, 3),
            IntInt | FloatFloat | ObjectObject | StringString | IntFloat | FloatInt
            | EffectEffect | EventEvent | LocationLocation | TalentTalent
            | ItemPropertyItemProperty => (1, 1),
            _ => (1, 0),
        }
    }
}

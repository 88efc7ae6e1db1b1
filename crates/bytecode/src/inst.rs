use enum_ordinalize::Ordinalize;

/// Shape of the operand that follows an opcode in the byte stream.
///
/// Multi-byte operands are big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    /// One byte: a stack slot, upvalue index or argument count
    Byte,
    /// Two bytes: index into the constant pool
    Const,
    /// Two bytes: forward jump distance, measured from the end of the operand
    Jump,
    /// Two bytes: backward jump distance, measured from the end of the operand
    Loop,
    /// Two bytes of function constant index, followed by one `(is_local, index)`
    /// byte pair per upvalue of that function
    Closure,
}

impl Operand {
    /// Size of the fixed part of the operand in bytes
    pub fn width(self) -> usize {
        match self {
            Operand::None => 0,
            Operand::Byte => 1,
            Operand::Const | Operand::Jump | Operand::Loop | Operand::Closure => 2,
        }
    }
}

macro_rules! define_op {
    (
        $(#[$meta:meta])*
        $ty_vis:vis $type:ident,
        $(
            $(#[$variant_meta:meta])*
            $name:ident
            $(($param_name:ident : $param:ident))?
        ),* $(,)?
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Copy, Ordinalize)]
        #[repr(u8)]
        $ty_vis enum $type {$(
            $(#[$variant_meta])*
            $name
        ),*}

        impl $type {
            /// Returns the operand layout of this instruction
            #[allow(path_statements)]
            pub fn operand(self) -> Operand {
                match self {$(
                    $type::$name => {
                        Operand::None
                        $(; Operand::$param)?
                    }
                ),*
                }
            }

            /// Human readable name of the operand, if any
            #[allow(path_statements)]
            pub fn operand_name(self) -> Option<&'static str> {
                match self {$(
                    $type::$name => {
                        None::<&'static str>
                        $(; Some(stringify!($param_name)))?
                    }
                ),*
                }
            }
        }

        impl ::std::fmt::Display for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {$(
                    Self::$name => f.pad(stringify!($name)),
                )*}
            }
        }
    };
}

// Instruction definition.
//
// Each line is an opcode, optionally followed by the operand it reads from the
// byte stream. Stack effects are described in the doc comments as
// `[before] -> [after]`, top of stack on the right.
define_op! {
    /// The instruction set. Every opcode is one byte.
    pub Op,

    // constants and literals
    /// `[] -> [constant]`
    Constant(idx: Const),
    Nil,
    True,
    False,

    // stack manipulation
    /// `[a] -> []`
    Pop,
    /// `[a] -> [a, a]`
    Dup,
    /// `[a, b] -> [b, a]`
    Swap,

    // variables
    GetLocal(slot: Byte),
    /// Stores the top of stack without popping it
    SetLocal(slot: Byte),
    GetUpvalue(slot: Byte),
    SetUpvalue(slot: Byte),
    /// `[value] -> []`
    DefineGlobal(name: Const),
    GetGlobal(name: Const),

    // properties and subscripts
    /// `[object] -> [value]`
    GetProperty(name: Const),
    /// `[object, value] -> [value]`
    SetProperty(name: Const),
    /// `[object, index] -> [value]`
    GetSubscript,
    /// `[object, index, value] -> [value]`
    SetSubscript,
    /// `[object, start, end] -> [slice]`, `nil` bounds mean "from the start"
    /// and "to the end"
    Slice,

    // operators
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Not,
    Negate,
    /// `[start, end] -> [list]`, inclusive on both ends
    Range,
    /// `[sequence] -> [number]`
    Length,
    /// `[sequence, index] -> [item]`. Like `GetSubscript`, except that a
    /// table yields its key at that position in insertion order.
    IterItem,
    /// `[value] -> [string]`
    Stringify,

    // increments. These push the value held before the update.
    IncLocal(slot: Byte),
    DecLocal(slot: Byte),
    IncUpvalue(slot: Byte),
    DecUpvalue(slot: Byte),
    /// `[object] -> [old]`
    IncProperty(name: Const),
    /// `[object] -> [old]`
    DecProperty(name: Const),
    /// `[object, delta] -> [new]`
    AddProperty(name: Const),
    /// `[object, index] -> [old]`
    IncSubscript,
    /// `[object, index] -> [old]`
    DecSubscript,
    /// `[object, index, delta] -> [new]`
    AddSubscript,

    // collections
    /// `[] -> [list]`
    NewList,
    /// `[list, value] -> [list]`
    ListAdd,
    /// `[] -> [table]`
    NewTable,
    /// `[table, key, value] -> [table]`
    TableAdd,

    Print,

    // control flow
    Jump(offset: Jump),
    /// Jumps if the top of stack is falsey. Does not pop.
    JumpIfFalse(offset: Jump),
    Loop(offset: Loop),
    /// `[callee, args...] -> [result]`
    Call(argc: Byte),
    Closure(function: Closure),
    /// Closes the upvalue on the top of stack and pops it
    CloseUpvalue,
    Return,

    // declarations
    Class(name: Const),
    Module(name: Const),
    /// `[class, closure] -> [class]`
    Method(name: Const),
    Enum(name: Const),
    /// `[enum] -> [enum]`, member gets the next ordinal
    EnumField(name: Const),
    /// `[enum, value] -> [enum]`
    EnumFieldValue(name: Const),
}

//! Syntax tree for the kernel dialect

use std::fmt;

/// Scalar element types the dialect knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
}

impl ScalarType {
    /// Width of one element in bytes
    pub const fn size_bytes(&self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 => 8,
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// The unsigned counterpart, used when parsing `unsigned int` forms
    pub const fn to_unsigned(self) -> Self {
        match self {
            Self::I8 => Self::U8,
            Self::I16 => Self::U16,
            Self::I32 => Self::U32,
            Self::I64 => Self::U64,
            other => other,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I8 => "char",
            Self::U8 => "uchar",
            Self::I16 => "short",
            Self::U16 => "ushort",
            Self::I32 => "int",
            Self::U32 => "uint",
            Self::I64 => "long",
            Self::U64 => "ulong",
            Self::F32 => "float",
        };
        write!(f, "{}", name)
    }
}

/// One translation unit: every `__kernel` function in the source
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramAst {
    pub kernels: Vec<KernelDef>,
}

impl ProgramAst {
    pub fn kernel(&self, name: &str) -> Option<&KernelDef> {
        self.kernels.iter().find(|k| k.name == name)
    }
}

/// One kernel entry point
#[derive(Debug, Clone, PartialEq)]
pub struct KernelDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
}

/// One kernel parameter. Pointers are `__global` buffer bindings; everything
/// else is a scalar passed by value.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: ScalarType,
    pub is_pointer: bool,
    pub is_const: bool,
}

/// Statement sequence inside braces
#[derive(Debug, Clone, PartialEq)]
pub struct Block(pub Vec<Stmt>);

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Local declaration, optionally initialized
    Decl {
        ty: ScalarType,
        name: String,
        init: Option<Expr>,
    },
    Assign {
        target: LValue,
        op: AssignOp,
        value: Expr,
    },
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    /// Early exit from the current work-item
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

/// Assignment target: a local variable or a buffer element
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    Var(String),
    Index { base: String, index: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(u64),
    FloatLit(f32),
    Var(String),
    Index {
        base: String,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Builtin {
        which: Builtin,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

/// The built-in functions available to kernel bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    GlobalId,
    LocalId,
    GroupId,
    GlobalSize,
    LocalSize,
    NumGroups,
    Min,
    Max,
}

impl Builtin {
    /// Look up a builtin by its dialect name, with its required arity
    pub fn lookup(name: &str) -> Option<(Self, usize)> {
        match name {
            "get_global_id" => Some((Self::GlobalId, 1)),
            "get_local_id" => Some((Self::LocalId, 1)),
            "get_group_id" => Some((Self::GroupId, 1)),
            "get_global_size" => Some((Self::GlobalSize, 1)),
            "get_local_size" => Some((Self::LocalSize, 1)),
            "get_num_groups" => Some((Self::NumGroups, 1)),
            "min" => Some((Self::Min, 2)),
            "max" => Some((Self::Max, 2)),
            _ => None,
        }
    }
}

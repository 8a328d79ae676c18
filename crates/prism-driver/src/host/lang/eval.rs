//! Work-item interpreter for the kernel dialect
//!
//! Executes a parsed kernel over an NDRange, one work-item at a time in
//! linear-id order (x fastest). Buffer element access goes through the
//! memory store with bounds and access-mode checks on every load and store;
//! a violation aborts the launch and surfaces as the command's failure.
//!
//! Scalar arithmetic follows C conversion rules in miniature: operands
//! promote to the wider of the two representations (float over unsigned over
//! signed), integer arithmetic wraps, and stores truncate to the declared
//! type.

use crate::driver::types::{AccessMode, BufferHandle};
use crate::error::DriverError;
use crate::host::lang::ast::{
    AssignOp, BinaryOp, Block, Builtin, Expr, KernelDef, LValue, ScalarType, Stmt, UnaryOp,
};
use crate::host::memory::MemoryStore;
use std::collections::HashMap;
use std::fmt;

/// A scalar value during evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f32),
}

impl Value {
    /// Zero of the representation class for `ty`
    fn zero_of(ty: ScalarType) -> Self {
        if ty.is_float() {
            Value::Float(0.0)
        } else if ty.is_signed() {
            Value::Int(0)
        } else {
            Value::Uint(0)
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Uint(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
        }
    }
}

/// A kernel argument after submit-time resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedArg {
    Scalar(Value),
    Buffer {
        handle: BufferHandle,
        elem: ScalarType,
        is_const: bool,
    },
}

/// An NDRange normalized to three dimensions, unused dimensions padded to 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGrid {
    pub global: [usize; 3],
    pub local: [usize; 3],
    pub dims: usize,
}

impl LaunchGrid {
    /// Build a grid from per-dimension extents of equal length in 1..=3.
    /// Callers validate shape and divisibility before constructing.
    pub fn from_dims(global: &[usize], local: &[usize]) -> Self {
        let mut g = [1usize; 3];
        let mut l = [1usize; 3];
        for (slot, v) in g.iter_mut().zip(global.iter()) {
            *slot = *v;
        }
        for (slot, v) in l.iter_mut().zip(local.iter()) {
            *slot = *v;
        }
        Self {
            global: g,
            local: l,
            dims: global.len(),
        }
    }

    /// Total number of work-items
    pub fn total_items(&self) -> usize {
        self.global[0] * self.global[1] * self.global[2]
    }
}

/// Runtime failure inside a kernel
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    UnknownVariable(String),
    NotABuffer(String),
    NotAScalar(String),
    UnknownBuffer(BufferHandle),
    OutOfBounds {
        buffer: BufferHandle,
        index: usize,
        elements: usize,
    },
    AccessViolation {
        buffer: BufferHandle,
        mode: AccessMode,
        op: &'static str,
    },
    ConstWrite(String),
    DivisionByZero,
    NegativeIndex(i64),
    NonIntegerIndex,
    ArgMismatch(usize),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVariable(name) => write!(f, "unknown variable '{}'", name),
            Self::NotABuffer(name) => write!(f, "'{}' is not a buffer parameter", name),
            Self::NotAScalar(name) => {
                write!(f, "buffer parameter '{}' used as a scalar value", name)
            }
            Self::UnknownBuffer(handle) => write!(f, "buffer {} no longer exists", handle),
            Self::OutOfBounds {
                buffer,
                index,
                elements,
            } => write!(
                f,
                "index {} out of bounds for {} with {} elements",
                index, buffer, elements
            ),
            Self::AccessViolation { buffer, mode, op } => {
                write!(f, "kernel attempted to {} {}, which is {}", op, buffer, mode)
            }
            Self::ConstWrite(name) => write!(f, "write through const parameter '{}'", name),
            Self::DivisionByZero => write!(f, "integer division by zero"),
            Self::NegativeIndex(v) => write!(f, "negative buffer index {}", v),
            Self::NonIntegerIndex => write!(f, "buffer index is not an integer"),
            Self::ArgMismatch(index) => {
                write!(f, "argument {} does not match its parameter shape", index)
            }
        }
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    /// Translate into the driver error reported to completion waiters.
    /// Access-mode violations keep their identity; everything else is an
    /// execution failure with the message preserved.
    pub fn into_driver_error(self) -> DriverError {
        match self {
            Self::AccessViolation { buffer, mode, op } => {
                DriverError::AccessViolation { buffer, mode, op }
            }
            other => DriverError::execution_failed(other.to_string()),
        }
    }
}

/// What a name resolves to inside a work-item
#[derive(Debug, Clone)]
enum Binding {
    Scalar {
        ty: ScalarType,
        value: Value,
    },
    Buffer {
        handle: BufferHandle,
        elem: ScalarType,
        is_const: bool,
    },
}

/// Run a kernel over the whole grid. Items execute sequentially, so a store
/// by item N is visible to item N+1; kernels that rely on item ordering are
/// not portable, but the common guarded-write pattern is well-defined.
pub fn run_kernel(
    store: &mut MemoryStore,
    kernel: &KernelDef,
    args: &[ResolvedArg],
    grid: &LaunchGrid,
) -> Result<(), EvalError> {
    let base = bind_params(kernel, args)?;
    let total = grid.total_items();
    for linear in 0..total {
        let gx = linear % grid.global[0];
        let rest = linear / grid.global[0];
        let gy = rest % grid.global[1];
        let gz = rest / grid.global[1];
        let mut item = ItemCtx {
            store,
            scopes: vec![base.clone()],
            grid,
            global_id: [gx, gy, gz],
        };
        item.exec_block(&kernel.body)?;
    }
    Ok(())
}

fn bind_params(
    kernel: &KernelDef,
    args: &[ResolvedArg],
) -> Result<HashMap<String, Binding>, EvalError> {
    if kernel.params.len() != args.len() {
        return Err(EvalError::ArgMismatch(args.len()));
    }
    let mut base = HashMap::with_capacity(args.len());
    for (index, (param, arg)) in kernel.params.iter().zip(args.iter()).enumerate() {
        let binding = match (param.is_pointer, arg) {
            (true, ResolvedArg::Buffer { handle, .. }) => Binding::Buffer {
                handle: *handle,
                elem: param.ty,
                is_const: param.is_const,
            },
            (false, ResolvedArg::Scalar(value)) => Binding::Scalar {
                ty: param.ty,
                value: coerce(*value, param.ty),
            },
            _ => return Err(EvalError::ArgMismatch(index)),
        };
        base.insert(param.name.clone(), binding);
    }
    Ok(base)
}

/// Truncate or convert a value to the representation of `ty`, the way a C
/// store through a typed lvalue would
fn coerce(value: Value, ty: ScalarType) -> Value {
    if ty.is_float() {
        let f = match value {
            Value::Int(v) => v as f32,
            Value::Uint(v) => v as f32,
            Value::Float(v) => v,
        };
        return Value::Float(f);
    }
    let wide = match value {
        Value::Int(v) => v as u64,
        Value::Uint(v) => v,
        Value::Float(v) => v as i64 as u64,
    };
    if ty.is_signed() {
        let v = match ty {
            ScalarType::I8 => wide as i8 as i64,
            ScalarType::I16 => wide as i16 as i64,
            ScalarType::I32 => wide as i32 as i64,
            _ => wide as i64,
        };
        Value::Int(v)
    } else {
        let v = match ty {
            ScalarType::U8 => wide as u8 as u64,
            ScalarType::U16 => wide as u16 as u64,
            ScalarType::U32 => wide as u32 as u64,
            _ => wide,
        };
        Value::Uint(v)
    }
}

/// Promote a pair of operands to a common representation
fn promote(a: Value, b: Value) -> (Value, Value) {
    use Value::*;
    match (a, b) {
        (Float(_), _) | (_, Float(_)) => {
            let to_f = |v: Value| match v {
                Int(x) => x as f32,
                Uint(x) => x as f32,
                Float(x) => x,
            };
            (Float(to_f(a)), Float(to_f(b)))
        }
        (Uint(_), _) | (_, Uint(_)) => {
            let to_u = |v: Value| match v {
                Int(x) => x as u64,
                Uint(x) => x,
                Float(_) => unreachable!(),
            };
            (Uint(to_u(a)), Uint(to_u(b)))
        }
        _ => (a, b),
    }
}

/// Per-work-item execution state
struct ItemCtx<'a> {
    store: &'a mut MemoryStore,
    scopes: Vec<HashMap<String, Binding>>,
    grid: &'a LaunchGrid,
    global_id: [usize; 3],
}

enum Flow {
    Normal,
    Return,
}

impl ItemCtx<'_> {
    fn lookup(&self, name: &str) -> Result<&Binding, EvalError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .ok_or_else(|| EvalError::UnknownVariable(name.to_string()))
    }

    fn buffer_of(&self, name: &str) -> Result<(BufferHandle, ScalarType, bool), EvalError> {
        match self.lookup(name)? {
            Binding::Buffer {
                handle,
                elem,
                is_const,
            } => Ok((*handle, *elem, *is_const)),
            Binding::Scalar { .. } => Err(EvalError::NotABuffer(name.to_string())),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Statements
    // --------------------------------------------------------------------------------------------

    fn exec_block(&mut self, block: &Block) -> Result<Flow, EvalError> {
        self.scopes.push(HashMap::new());
        let mut flow = Flow::Normal;
        for stmt in &block.0 {
            if let Flow::Return = self.exec_stmt(stmt)? {
                flow = Flow::Return;
                break;
            }
        }
        self.scopes.pop();
        Ok(flow)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, EvalError> {
        match stmt {
            Stmt::Decl { ty, name, init } => {
                let value = match init {
                    Some(expr) => coerce(self.eval(expr)?, *ty),
                    None => Value::zero_of(*ty),
                };
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), Binding::Scalar { ty: *ty, value });
                }
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, op, value } => {
                let rhs = self.eval(value)?;
                match target {
                    LValue::Var(name) => self.assign_var(name, *op, rhs)?,
                    LValue::Index { base, index } => {
                        let idx = self.eval(index)?;
                        self.assign_element(base, idx, *op, rhs)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond)?.is_truthy() {
                    self.exec_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.is_truthy() {
                    if let Flow::Return = self.exec_block(body)? {
                        return Ok(Flow::Return);
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return => Ok(Flow::Return),
        }
    }

    fn assign_var(&mut self, name: &str, op: AssignOp, rhs: Value) -> Result<(), EvalError> {
        let (ty, current) = match self.lookup(name)? {
            Binding::Scalar { ty, value } => (*ty, *value),
            Binding::Buffer { .. } => return Err(EvalError::NotAScalar(name.to_string())),
        };
        let combined = apply_assign_op(op, current, rhs)?;
        let stored = coerce(combined, ty);
        for scope in self.scopes.iter_mut().rev() {
            if let Some(binding) = scope.get_mut(name) {
                *binding = Binding::Scalar { ty, value: stored };
                return Ok(());
            }
        }
        Err(EvalError::UnknownVariable(name.to_string()))
    }

    fn assign_element(
        &mut self,
        base: &str,
        idx: Value,
        op: AssignOp,
        rhs: Value,
    ) -> Result<(), EvalError> {
        let (handle, elem, is_const) = self.buffer_of(base)?;
        if is_const {
            return Err(EvalError::ConstWrite(base.to_string()));
        }
        let index = index_of(idx)?;
        let combined = if let AssignOp::Set = op {
            rhs
        } else {
            let current = self.load_element(handle, elem, index)?;
            apply_assign_op(op, current, rhs)?
        };
        self.store_element(handle, elem, index, coerce(combined, elem))
    }

    // --------------------------------------------------------------------------------------------
    // Buffer element access
    // --------------------------------------------------------------------------------------------

    fn load_element(
        &mut self,
        handle: BufferHandle,
        elem: ScalarType,
        index: usize,
    ) -> Result<Value, EvalError> {
        let record = self
            .store
            .record(handle)
            .ok_or(EvalError::UnknownBuffer(handle))?;
        if !record.mode.device_readable() {
            return Err(EvalError::AccessViolation {
                buffer: handle,
                mode: record.mode,
                op: "read",
            });
        }
        let width = elem.size_bytes();
        let elements = record.data.len() / width;
        if index >= elements {
            return Err(EvalError::OutOfBounds {
                buffer: handle,
                index,
                elements,
            });
        }
        let bytes = &record.data[index * width..index * width + width];
        Ok(decode_element(bytes, elem))
    }

    fn store_element(
        &mut self,
        handle: BufferHandle,
        elem: ScalarType,
        index: usize,
        value: Value,
    ) -> Result<(), EvalError> {
        let record = self
            .store
            .record_mut(handle)
            .ok_or(EvalError::UnknownBuffer(handle))?;
        if !record.mode.device_writable() {
            return Err(EvalError::AccessViolation {
                buffer: handle,
                mode: record.mode,
                op: "write",
            });
        }
        let width = elem.size_bytes();
        let elements = record.data.len() / width;
        if index >= elements {
            return Err(EvalError::OutOfBounds {
                buffer: handle,
                index,
                elements,
            });
        }
        encode_element(&mut record.data[index * width..index * width + width], value, elem);
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Expressions
    // --------------------------------------------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::IntLit(v) => Ok(Value::Uint(*v)),
            Expr::FloatLit(v) => Ok(Value::Float(*v)),
            Expr::Var(name) => match self.lookup(name)? {
                Binding::Scalar { value, .. } => Ok(*value),
                Binding::Buffer { .. } => Err(EvalError::NotAScalar(name.to_string())),
            },
            Expr::Index { base, index } => {
                let idx = self.eval(index)?;
                let (handle, elem, _) = self.buffer_of(base)?;
                self.load_element(handle, elem, index_of(idx)?)
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Neg => match v {
                        Value::Int(x) => Value::Int(x.wrapping_neg()),
                        Value::Uint(x) => Value::Uint(x.wrapping_neg()),
                        Value::Float(x) => Value::Float(-x),
                    },
                    UnaryOp::Not => Value::Int(if v.is_truthy() { 0 } else { 1 }),
                })
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            Expr::Builtin { which, args } => self.eval_builtin(*which, args),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value, EvalError> {
        // Logical operators short-circuit
        match op {
            BinaryOp::And => {
                if !self.eval(lhs)?.is_truthy() {
                    return Ok(Value::Int(0));
                }
                return Ok(Value::Int(if self.eval(rhs)?.is_truthy() { 1 } else { 0 }));
            }
            BinaryOp::Or => {
                if self.eval(lhs)?.is_truthy() {
                    return Ok(Value::Int(1));
                }
                return Ok(Value::Int(if self.eval(rhs)?.is_truthy() { 1 } else { 0 }));
            }
            _ => {}
        }

        let (a, b) = promote(self.eval(lhs)?, self.eval(rhs)?);
        use Value::*;
        let result = match op {
            BinaryOp::Add => match (a, b) {
                (Int(x), Int(y)) => Int(x.wrapping_add(y)),
                (Uint(x), Uint(y)) => Uint(x.wrapping_add(y)),
                (Float(x), Float(y)) => Float(x + y),
                _ => unreachable!(),
            },
            BinaryOp::Sub => match (a, b) {
                (Int(x), Int(y)) => Int(x.wrapping_sub(y)),
                (Uint(x), Uint(y)) => Uint(x.wrapping_sub(y)),
                (Float(x), Float(y)) => Float(x - y),
                _ => unreachable!(),
            },
            BinaryOp::Mul => match (a, b) {
                (Int(x), Int(y)) => Int(x.wrapping_mul(y)),
                (Uint(x), Uint(y)) => Uint(x.wrapping_mul(y)),
                (Float(x), Float(y)) => Float(x * y),
                _ => unreachable!(),
            },
            BinaryOp::Div => match (a, b) {
                (Int(_), Int(0)) | (Uint(_), Uint(0)) => return Err(EvalError::DivisionByZero),
                (Int(x), Int(y)) => Int(x.wrapping_div(y)),
                (Uint(x), Uint(y)) => Uint(x / y),
                (Float(x), Float(y)) => Float(x / y),
                _ => unreachable!(),
            },
            BinaryOp::Rem => match (a, b) {
                (Int(_), Int(0)) | (Uint(_), Uint(0)) => return Err(EvalError::DivisionByZero),
                (Int(x), Int(y)) => Int(x.wrapping_rem(y)),
                (Uint(x), Uint(y)) => Uint(x % y),
                (Float(x), Float(y)) => Float(x % y),
                _ => unreachable!(),
            },
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq
            | BinaryOp::Ne => {
                let holds = match (a, b) {
                    (Int(x), Int(y)) => compare(op, x.cmp(&y).is_lt(), x.cmp(&y).is_gt(), x == y),
                    (Uint(x), Uint(y)) => compare(op, x < y, x > y, x == y),
                    (Float(x), Float(y)) => compare(op, x < y, x > y, x == y),
                    _ => unreachable!(),
                };
                Int(if holds { 1 } else { 0 })
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        };
        Ok(result)
    }

    fn eval_builtin(&mut self, which: Builtin, args: &[Expr]) -> Result<Value, EvalError> {
        match which {
            Builtin::Min | Builtin::Max => {
                let (a, b) = promote(self.eval(&args[0])?, self.eval(&args[1])?);
                use Value::*;
                let pick_first = match (a, b) {
                    (Int(x), Int(y)) => {
                        if let Builtin::Min = which {
                            x <= y
                        } else {
                            x >= y
                        }
                    }
                    (Uint(x), Uint(y)) => {
                        if let Builtin::Min = which {
                            x <= y
                        } else {
                            x >= y
                        }
                    }
                    (Float(x), Float(y)) => {
                        if let Builtin::Min = which {
                            x <= y
                        } else {
                            x >= y
                        }
                    }
                    _ => unreachable!(),
                };
                Ok(if pick_first { a } else { b })
            }
            _ => {
                let dim = match self.eval(&args[0])? {
                    Value::Int(v) => v,
                    Value::Uint(v) => v as i64,
                    Value::Float(_) => return Err(EvalError::NonIntegerIndex),
                };
                // Out-of-range dimensions answer like an unused dimension
                if !(0..3).contains(&dim) {
                    let fallback = match which {
                        Builtin::GlobalId | Builtin::LocalId | Builtin::GroupId => 0,
                        _ => 1,
                    };
                    return Ok(Value::Uint(fallback));
                }
                let d = dim as usize;
                let v = match which {
                    Builtin::GlobalId => self.global_id[d],
                    Builtin::LocalId => self.global_id[d] % self.grid.local[d],
                    Builtin::GroupId => self.global_id[d] / self.grid.local[d],
                    Builtin::GlobalSize => self.grid.global[d],
                    Builtin::LocalSize => self.grid.local[d],
                    Builtin::NumGroups => self.grid.global[d] / self.grid.local[d],
                    Builtin::Min | Builtin::Max => unreachable!(),
                };
                Ok(Value::Uint(v as u64))
            }
        }
    }
}

fn compare(op: BinaryOp, lt: bool, gt: bool, eq: bool) -> bool {
    match op {
        BinaryOp::Lt => lt,
        BinaryOp::Gt => gt,
        BinaryOp::Le => lt || eq,
        BinaryOp::Ge => gt || eq,
        BinaryOp::Eq => eq,
        BinaryOp::Ne => !eq,
        _ => false,
    }
}

fn apply_assign_op(op: AssignOp, current: Value, rhs: Value) -> Result<Value, EvalError> {
    let (a, b) = promote(current, rhs);
    use Value::*;
    Ok(match op {
        AssignOp::Set => rhs,
        AssignOp::Add => match (a, b) {
            (Int(x), Int(y)) => Int(x.wrapping_add(y)),
            (Uint(x), Uint(y)) => Uint(x.wrapping_add(y)),
            (Float(x), Float(y)) => Float(x + y),
            _ => unreachable!(),
        },
        AssignOp::Sub => match (a, b) {
            (Int(x), Int(y)) => Int(x.wrapping_sub(y)),
            (Uint(x), Uint(y)) => Uint(x.wrapping_sub(y)),
            (Float(x), Float(y)) => Float(x - y),
            _ => unreachable!(),
        },
        AssignOp::Mul => match (a, b) {
            (Int(x), Int(y)) => Int(x.wrapping_mul(y)),
            (Uint(x), Uint(y)) => Uint(x.wrapping_mul(y)),
            (Float(x), Float(y)) => Float(x * y),
            _ => unreachable!(),
        },
        AssignOp::Div => match (a, b) {
            (Int(_), Int(0)) | (Uint(_), Uint(0)) => return Err(EvalError::DivisionByZero),
            (Int(x), Int(y)) => Int(x.wrapping_div(y)),
            (Uint(x), Uint(y)) => Uint(x / y),
            (Float(x), Float(y)) => Float(x / y),
            _ => unreachable!(),
        },
    })
}

fn index_of(value: Value) -> Result<usize, EvalError> {
    match value {
        Value::Int(v) if v < 0 => Err(EvalError::NegativeIndex(v)),
        Value::Int(v) => Ok(v as usize),
        Value::Uint(v) => Ok(v as usize),
        Value::Float(_) => Err(EvalError::NonIntegerIndex),
    }
}

fn decode_element(bytes: &[u8], ty: ScalarType) -> Value {
    match ty {
        ScalarType::I8 => Value::Int(bytes[0] as i8 as i64),
        ScalarType::U8 => Value::Uint(bytes[0] as u64),
        ScalarType::I16 => Value::Int(i16::from_le_bytes([bytes[0], bytes[1]]) as i64),
        ScalarType::U16 => Value::Uint(u16::from_le_bytes([bytes[0], bytes[1]]) as u64),
        ScalarType::I32 => {
            Value::Int(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64)
        }
        ScalarType::U32 => {
            Value::Uint(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64)
        }
        ScalarType::I64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Value::Int(i64::from_le_bytes(raw))
        }
        ScalarType::U64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Value::Uint(u64::from_le_bytes(raw))
        }
        ScalarType::F32 => {
            Value::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
    }
}

fn encode_element(out: &mut [u8], value: Value, ty: ScalarType) {
    let stored = coerce(value, ty);
    match (ty, stored) {
        (ScalarType::I8, Value::Int(v)) => out[0] = v as i8 as u8,
        (ScalarType::U8, Value::Uint(v)) => out[0] = v as u8,
        (ScalarType::I16, Value::Int(v)) => out.copy_from_slice(&(v as i16).to_le_bytes()),
        (ScalarType::U16, Value::Uint(v)) => out.copy_from_slice(&(v as u16).to_le_bytes()),
        (ScalarType::I32, Value::Int(v)) => out.copy_from_slice(&(v as i32).to_le_bytes()),
        (ScalarType::U32, Value::Uint(v)) => out.copy_from_slice(&(v as u32).to_le_bytes()),
        (ScalarType::I64, Value::Int(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ScalarType::U64, Value::Uint(v)) => out.copy_from_slice(&v.to_le_bytes()),
        (ScalarType::F32, Value::Float(v)) => out.copy_from_slice(&v.to_le_bytes()),
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::lang::parser::compile;

    fn u32s(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn setup_vector_add(store: &mut MemoryStore) -> (BufferHandle, BufferHandle, BufferHandle) {
        let in1 = store.allocate(120, AccessMode::ReadOnly);
        let in2 = store.allocate(120, AccessMode::ReadOnly);
        let out = store.allocate(120, AccessMode::WriteOnly);
        let a: Vec<u8> = (0..30u32).flat_map(|v| v.to_le_bytes()).collect();
        let b: Vec<u8> = (0..30u32).flat_map(|v| (v * 10).to_le_bytes()).collect();
        store.write(in1, 0, &a).unwrap();
        store.write(in2, 0, &b).unwrap();
        (in1, in2, out)
    }

    #[test]
    fn test_vector_add_with_rounded_grid() {
        let source = r#"
            __kernel void vector_add(__global uint* in1, __global uint* in2,
                                     __global uint* out, uint n) {
                uint x = get_global_id(0);
                if (x >= n) return;
                out[x] = in1[x] + in2[x];
            }
        "#;
        let ast = compile(source).unwrap();
        let kernel = ast.kernel("vector_add").unwrap();
        let mut store = MemoryStore::new();
        let (in1, in2, out) = setup_vector_add(&mut store);
        let args = [
            ResolvedArg::Buffer {
                handle: in1,
                elem: ScalarType::U32,
                is_const: false,
            },
            ResolvedArg::Buffer {
                handle: in2,
                elem: ScalarType::U32,
                is_const: false,
            },
            ResolvedArg::Buffer {
                handle: out,
                elem: ScalarType::U32,
                is_const: false,
            },
            ResolvedArg::Scalar(Value::Uint(30)),
        ];
        // 30 items rounded up to a multiple of the 8-wide group
        let grid = LaunchGrid::from_dims(&[32], &[8]);
        run_kernel(&mut store, kernel, &args, &grid).unwrap();

        let result = u32s(&store.read(out, 0, 120).unwrap());
        for (i, v) in result.iter().enumerate() {
            assert_eq!(*v, (i as u32) * 11, "element {}", i);
        }
    }

    #[test]
    fn test_guard_skips_padded_items() {
        // Same launch but n = 4: elements 4.. stay zero
        let source = r#"
            __kernel void fill(__global uint* out, uint n) {
                uint x = get_global_id(0);
                if (x >= n) return;
                out[x] = 7;
            }
        "#;
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let out = store.allocate(32, AccessMode::ReadWrite);
        let args = [
            ResolvedArg::Buffer {
                handle: out,
                elem: ScalarType::U32,
                is_const: false,
            },
            ResolvedArg::Scalar(Value::Uint(4)),
        ];
        let grid = LaunchGrid::from_dims(&[8], &[8]);
        run_kernel(&mut store, ast.kernel("fill").unwrap(), &args, &grid).unwrap();
        assert_eq!(
            u32s(&store.read(out, 0, 32).unwrap()),
            vec![7, 7, 7, 7, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_write_to_read_only_is_violation() {
        let source = "__kernel void bad(__global uint* b) { b[0] = 1; }";
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let buf = store.allocate(16, AccessMode::ReadOnly);
        let args = [ResolvedArg::Buffer {
            handle: buf,
            elem: ScalarType::U32,
            is_const: false,
        }];
        let grid = LaunchGrid::from_dims(&[1], &[1]);
        let err = run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap_err();
        assert!(matches!(
            err,
            EvalError::AccessViolation { mode: AccessMode::ReadOnly, op: "write", .. }
        ));
    }

    #[test]
    fn test_read_from_write_only_is_violation() {
        let source = "__kernel void bad(__global uint* b, __global uint* o) { o[0] = b[0]; }";
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let b = store.allocate(16, AccessMode::WriteOnly);
        let o = store.allocate(16, AccessMode::ReadWrite);
        let args = [
            ResolvedArg::Buffer {
                handle: b,
                elem: ScalarType::U32,
                is_const: false,
            },
            ResolvedArg::Buffer {
                handle: o,
                elem: ScalarType::U32,
                is_const: false,
            },
        ];
        let grid = LaunchGrid::from_dims(&[1], &[1]);
        let err = run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap_err();
        assert!(matches!(
            err,
            EvalError::AccessViolation { mode: AccessMode::WriteOnly, op: "read", .. }
        ));
    }

    #[test]
    fn test_out_of_bounds_index() {
        let source = "__kernel void bad(__global uint* b) { b[4] = 1; }";
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let buf = store.allocate(16, AccessMode::ReadWrite);
        let args = [ResolvedArg::Buffer {
            handle: buf,
            elem: ScalarType::U32,
            is_const: false,
        }];
        let grid = LaunchGrid::from_dims(&[1], &[1]);
        let err = run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap_err();
        assert_eq!(
            err,
            EvalError::OutOfBounds {
                buffer: buf,
                index: 4,
                elements: 4
            }
        );
    }

    #[test]
    fn test_division_by_zero() {
        let source = "__kernel void bad(__global uint* b, uint d) { b[0] = 1 / d; }";
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let buf = store.allocate(4, AccessMode::ReadWrite);
        let args = [
            ResolvedArg::Buffer {
                handle: buf,
                elem: ScalarType::U32,
                is_const: false,
            },
            ResolvedArg::Scalar(Value::Uint(0)),
        ];
        let grid = LaunchGrid::from_dims(&[1], &[1]);
        let err = run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap_err();
        assert_eq!(err, EvalError::DivisionByZero);
    }

    #[test]
    fn test_while_loop_accumulates() {
        let source = r#"
            __kernel void sum(__global uint* out, uint n) {
                uint total = 0;
                uint i = 0;
                while (i < n) {
                    total += i;
                    i += 1;
                }
                out[0] = total;
            }
        "#;
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let out = store.allocate(4, AccessMode::ReadWrite);
        let args = [
            ResolvedArg::Buffer {
                handle: out,
                elem: ScalarType::U32,
                is_const: false,
            },
            ResolvedArg::Scalar(Value::Uint(10)),
        ];
        let grid = LaunchGrid::from_dims(&[1], &[1]);
        run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap();
        assert_eq!(u32s(&store.read(out, 0, 4).unwrap()), vec![45]);
    }

    #[test]
    fn test_local_and_group_ids() {
        let source = r#"
            __kernel void ids(__global uint* locals, __global uint* groups) {
                uint x = get_global_id(0);
                locals[x] = get_local_id(0);
                groups[x] = get_group_id(0);
            }
        "#;
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let locals = store.allocate(32, AccessMode::ReadWrite);
        let groups = store.allocate(32, AccessMode::ReadWrite);
        let args = [
            ResolvedArg::Buffer {
                handle: locals,
                elem: ScalarType::U32,
                is_const: false,
            },
            ResolvedArg::Buffer {
                handle: groups,
                elem: ScalarType::U32,
                is_const: false,
            },
        ];
        let grid = LaunchGrid::from_dims(&[8], &[4]);
        run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap();
        assert_eq!(
            u32s(&store.read(locals, 0, 32).unwrap()),
            vec![0, 1, 2, 3, 0, 1, 2, 3]
        );
        assert_eq!(
            u32s(&store.read(groups, 0, 32).unwrap()),
            vec![0, 0, 0, 0, 1, 1, 1, 1]
        );
    }

    #[test]
    fn test_two_dimensional_grid_order() {
        let source = r#"
            __kernel void grid(__global uint* out) {
                uint x = get_global_id(0);
                uint y = get_global_id(1);
                out[y * get_global_size(0) + x] = y * 100 + x;
            }
        "#;
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let out = store.allocate(4 * 6, AccessMode::ReadWrite);
        let args = [ResolvedArg::Buffer {
            handle: out,
            elem: ScalarType::U32,
            is_const: false,
        }];
        let grid = LaunchGrid::from_dims(&[3, 2], &[1, 1]);
        run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap();
        assert_eq!(
            u32s(&store.read(out, 0, 24).unwrap()),
            vec![0, 1, 2, 100, 101, 102]
        );
    }

    #[test]
    fn test_narrow_store_truncates() {
        let source = "__kernel void t(__global uchar* out, uint a, uint b) { out[0] = a + b; }";
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let out = store.allocate(1, AccessMode::ReadWrite);
        let args = [
            ResolvedArg::Buffer {
                handle: out,
                elem: ScalarType::U8,
                is_const: false,
            },
            ResolvedArg::Scalar(Value::Uint(200)),
            ResolvedArg::Scalar(Value::Uint(100)),
        ];
        let grid = LaunchGrid::from_dims(&[1], &[1]);
        run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap();
        assert_eq!(store.read(out, 0, 1).unwrap(), vec![44]);
    }

    #[test]
    fn test_const_param_write_rejected() {
        let source = "__kernel void t(__global const uint* b) { b[0] = 1; }";
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let buf = store.allocate(4, AccessMode::ReadWrite);
        let args = [ResolvedArg::Buffer {
            handle: buf,
            elem: ScalarType::U32,
            is_const: true,
        }];
        let grid = LaunchGrid::from_dims(&[1], &[1]);
        let err = run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap_err();
        assert_eq!(err, EvalError::ConstWrite("b".to_string()));
    }

    #[test]
    fn test_min_max_builtins() {
        let source = r#"
            __kernel void mm(__global int* out, int a, int b) {
                out[0] = min(a, b);
                out[1] = max(a, b);
            }
        "#;
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let out = store.allocate(8, AccessMode::ReadWrite);
        let args = [
            ResolvedArg::Buffer {
                handle: out,
                elem: ScalarType::I32,
                is_const: false,
            },
            ResolvedArg::Scalar(Value::Int(-5)),
            ResolvedArg::Scalar(Value::Int(3)),
        ];
        let grid = LaunchGrid::from_dims(&[1], &[1]);
        run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap();
        let bytes = store.read(out, 0, 8).unwrap();
        let vals: Vec<i32> = bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(vals, vec![-5, 3]);
    }

    #[test]
    fn test_float_arithmetic() {
        let source = "__kernel void f(__global float* out, float a, float b) { out[0] = a * b + 0.5f; }";
        let ast = compile(source).unwrap();
        let mut store = MemoryStore::new();
        let out = store.allocate(4, AccessMode::ReadWrite);
        let args = [
            ResolvedArg::Buffer {
                handle: out,
                elem: ScalarType::F32,
                is_const: false,
            },
            ResolvedArg::Scalar(Value::Float(2.0)),
            ResolvedArg::Scalar(Value::Float(3.0)),
        ];
        let grid = LaunchGrid::from_dims(&[1], &[1]);
        run_kernel(&mut store, &ast.kernels[0], &args, &grid).unwrap();
        let bytes = store.read(out, 0, 4).unwrap();
        let v = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert!((v - 6.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_grid_padding_and_totals() {
        let grid = LaunchGrid::from_dims(&[30], &[8]);
        assert_eq!(grid.global, [30, 1, 1]);
        assert_eq!(grid.local, [8, 1, 1]);
        assert_eq!(grid.dims, 1);
        assert_eq!(grid.total_items(), 30);

        let grid = LaunchGrid::from_dims(&[4, 5, 6], &[2, 1, 3]);
        assert_eq!(grid.total_items(), 120);
    }
}

//! Program records and build bookkeeping for the reference driver

use crate::driver::types::{ArgSlotKind, BuildStatus, DeviceHandle};
use crate::host::lang::ast::{KernelDef, ProgramAst, ScalarType};
use crate::host::lang::parser::compile;
use std::collections::HashMap;
use std::sync::Arc;

/// A successfully compiled program, shared by every kernel resolved from it
/// and by in-flight launches
#[derive(Debug)]
pub(crate) struct CompiledProgram {
    pub ast: ProgramAst,
}

impl CompiledProgram {
    pub fn kernel_index(&self, name: &str) -> Option<usize> {
        self.ast.kernels.iter().position(|k| k.name == name)
    }

    pub fn kernel(&self, index: usize) -> &KernelDef {
        &self.ast.kernels[index]
    }

    /// Argument slot kinds of one kernel, in positional order
    pub fn arg_slots(&self, index: usize) -> Vec<ArgSlotKind> {
        self.ast.kernels[index]
            .params
            .iter()
            .map(|param| {
                if param.is_pointer {
                    ArgSlotKind::Buffer
                } else {
                    scalar_slot(param.ty)
                }
            })
            .collect()
    }
}

fn scalar_slot(ty: ScalarType) -> ArgSlotKind {
    match ty {
        ScalarType::I8 => ArgSlotKind::Char,
        ScalarType::U8 => ArgSlotKind::Uchar,
        ScalarType::I16 => ArgSlotKind::Short,
        ScalarType::U16 => ArgSlotKind::Ushort,
        ScalarType::I32 => ArgSlotKind::Int,
        ScalarType::U32 => ArgSlotKind::Uint,
        ScalarType::I64 => ArgSlotKind::Long,
        ScalarType::U64 => ArgSlotKind::Ulong,
        ScalarType::F32 => ArgSlotKind::Float,
    }
}

/// Build outcome of one device
#[derive(Debug, Clone)]
pub(crate) struct BuildRecord {
    pub status: BuildStatus,
    pub log: String,
}

/// Driver-side state of one program
#[derive(Debug)]
pub(crate) struct ProgramRecord {
    pub source: String,
    pub builds: HashMap<u64, BuildRecord>,
    pub compiled: Option<Arc<CompiledProgram>>,
}

impl ProgramRecord {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            builds: HashMap::new(),
            compiled: None,
        }
    }

    pub fn set_status(&mut self, device: DeviceHandle, status: BuildStatus, log: String) {
        self.builds.insert(device.id(), BuildRecord { status, log });
    }

    pub fn status_for(&self, device: DeviceHandle) -> BuildStatus {
        self.builds
            .get(&device.id())
            .map(|r| r.status)
            .unwrap_or(BuildStatus::None)
    }

    pub fn has_success(&self) -> bool {
        self.builds
            .values()
            .any(|r| r.status == BuildStatus::Success)
    }
}

/// Compile the source for one device. The frontend is device-independent,
/// so every device sees the same verdict; the per-device shape exists so
/// drivers with real per-target codegen fit the same contract.
pub(crate) fn compile_for_device(source: &str) -> (BuildStatus, String, Option<ProgramAst>) {
    match compile(source) {
        Ok(ast) => (BuildStatus::Success, String::new(), Some(ast)),
        Err(err) => (BuildStatus::Error, err.to_string(), None),
    }
}

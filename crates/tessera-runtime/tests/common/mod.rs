//! Shared fixtures for runtime integration tests.
//!
//! Units are assembled in memory with `wasm-encoder`: every export is a
//! parameterless function returning `i32`, and the manifest is written into
//! the `tessera-unit` custom section. Bodies that pass strings to the host
//! build them in extism memory through the `extism:host/env` kernel.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tessera_runtime::manifest::MANIFEST_SECTION;
use tessera_config::SandboxConfig;
use tessera_runtime::{CapabilityRegistry, ModuleLoader, RuntimeOrchestrator};
use wasm_encoder::{
    BlockType, CodeSection, CustomSection, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, ImportSection, Instruction, Module, TypeSection, ValType,
};

/// What an exported function does when called.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    /// Return immediately.
    Ok,
    /// Trap.
    Trap,
    /// Loop forever without checking for cancellation.
    Spin,
    /// Poll `tessera_cancelled` until it reports a stop request.
    AwaitCancel,
    /// Call `tessera_log(level, message)`.
    Log(&'static str, &'static str),
    /// Call `tessera_log("info", ...)` with a message of this many bytes.
    LogRepeated(u32),
    /// Call `tessera_capability(type_key, "ping")` and discard the result.
    Invoke(&'static str),
    /// `Invoke`, then `AwaitCancel`.
    InvokeThenAwait(&'static str),
}

// Imported function indices, in declaration order.
const CANCELLED: u32 = 0;
const LOG: u32 = 1;
const CAPABILITY: u32 = 2;
const ALLOC: u32 = 3;
const STORE_U8: u32 = 4;
const IMPORT_COUNT: u32 = 5;

// Locals shared by every body.
const FIRST_PTR: u32 = 0;
const SECOND_PTR: u32 = 1;
const COUNTER: u32 = 2;

/// Builder for a `.unit` file.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    name: String,
    exports: Vec<(String, Body)>,
    manifest: String,
}

#[allow(dead_code)]
impl UnitBuilder {
    /// A unit named `name` with no exports and an empty manifest.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exports: Vec::new(),
            manifest: String::new(),
        }
    }

    /// Add an exported function.
    pub fn export(mut self, name: &str, body: Body) -> Self {
        self.exports.push((name.to_string(), body));
        self
    }

    /// Declare a capability provider backed by a new export.
    pub fn provider(self, type_key: &str, export: &str) -> Self {
        self.provider_with_body(type_key, export, Body::Ok)
    }

    /// Declare a provider whose export behaves as `body`.
    pub fn provider_with_body(self, type_key: &str, export: &str, body: Body) -> Self {
        self.export(export, body).manifest_text(&format!(
            "[[provider]]\ntype = \"{type_key}\"\nexport = \"{export}\"\n"
        ))
    }

    /// Declare a provider whose init export behaves as `init_body`.
    pub fn provider_with_init(
        self,
        type_key: &str,
        export: &str,
        init: &str,
        init_body: Body,
    ) -> Self {
        self.export(export, Body::Ok)
            .export(init, init_body)
            .manifest_text(&format!(
                "[[provider]]\ntype = \"{type_key}\"\nexport = \"{export}\"\ninit = \"{init}\"\n"
            ))
    }

    /// Declare an entry point backed by a new export.
    pub fn entry(self, kind: &str, export: &str, body: Body) -> Self {
        self.export(export, body).manifest_text(&format!(
            "[[entry]]\nkind = \"{kind}\"\nexport = \"{export}\"\n"
        ))
    }

    /// Declare a cooperative start/stop pair named `run`/`halt`.
    pub fn lifecycle(self) -> Self {
        self.entry("start", "run", Body::AwaitCancel)
            .entry("stop", "halt", Body::Ok)
    }

    /// Declare an injectable slot.
    pub fn inject(self, slot: &str, kind: &str) -> Self {
        self.manifest_text(&format!("[[inject]]\nslot = \"{slot}\"\nkind = \"{kind}\"\n"))
    }

    /// Append raw manifest TOML.
    pub fn manifest_text(mut self, text: &str) -> Self {
        self.manifest.push_str(text);
        self
    }

    /// Encode the module.
    pub fn build(&self) -> Vec<u8> {
        let mut types = TypeSection::new();
        types.ty().function([], [ValType::I32]);
        types.ty().function([], [ValType::I64]);
        types.ty().function([ValType::I64, ValType::I64], []);
        types.ty().function([ValType::I64, ValType::I64], [ValType::I64]);
        types.ty().function([ValType::I64], [ValType::I64]);
        types.ty().function([ValType::I64, ValType::I32], []);

        // Imported functions take the first indices.
        let mut imports = ImportSection::new();
        imports.import("extism:host/user", "tessera_cancelled", EntityType::Function(1));
        imports.import("extism:host/user", "tessera_log", EntityType::Function(2));
        imports.import("extism:host/user", "tessera_capability", EntityType::Function(3));
        imports.import("extism:host/env", "alloc", EntityType::Function(4));
        imports.import("extism:host/env", "store_u8", EntityType::Function(5));
        let first_local = IMPORT_COUNT;

        let mut functions = FunctionSection::new();
        let mut exports = ExportSection::new();
        let mut code = CodeSection::new();

        for (index, (name, body)) in (first_local..).zip(&self.exports) {
            functions.function(0);
            exports.export(name, ExportKind::Func, index);
            code.function(&encode_body(*body));
        }

        let mut module = Module::new();
        module.section(&types);
        module.section(&imports);
        module.section(&functions);
        module.section(&exports);
        module.section(&code);
        if !self.manifest.is_empty() {
            module.section(&CustomSection {
                name: Cow::Borrowed(MANIFEST_SECTION),
                data: Cow::Borrowed(self.manifest.as_bytes()),
            });
        }
        module.finish()
    }

    /// Write `<name>.unit` into `dir`.
    pub fn write(&self, dir: &Path) -> PathBuf {
        let path = dir.join(format!("{}.unit", self.name));
        std::fs::write(&path, self.build()).expect("write unit fixture");
        path
    }
}

/// Allocate `bytes` in extism memory and leave the offset in `local`.
fn store_bytes(f: &mut Function, local: u32, bytes: &[u8]) {
    f.instruction(&Instruction::I64Const(i64::try_from(bytes.len()).unwrap()));
    f.instruction(&Instruction::Call(ALLOC));
    f.instruction(&Instruction::LocalSet(local));
    for (offset, byte) in (0_i64..).zip(bytes) {
        f.instruction(&Instruction::LocalGet(local));
        f.instruction(&Instruction::I64Const(offset));
        f.instruction(&Instruction::I64Add);
        f.instruction(&Instruction::I32Const(i32::from(*byte)));
        f.instruction(&Instruction::Call(STORE_U8));
    }
}

/// Allocate `len` bytes of `x` in extism memory, offset in `local`.
fn store_repeated(f: &mut Function, local: u32, len: u32) {
    let len = i64::from(len);
    f.instruction(&Instruction::I64Const(len));
    f.instruction(&Instruction::Call(ALLOC));
    f.instruction(&Instruction::LocalSet(local));
    f.instruction(&Instruction::I64Const(0));
    f.instruction(&Instruction::LocalSet(COUNTER));
    f.instruction(&Instruction::Block(BlockType::Empty));
    f.instruction(&Instruction::Loop(BlockType::Empty));
    f.instruction(&Instruction::LocalGet(COUNTER));
    f.instruction(&Instruction::I64Const(len));
    f.instruction(&Instruction::I64GeU);
    f.instruction(&Instruction::BrIf(1));
    f.instruction(&Instruction::LocalGet(local));
    f.instruction(&Instruction::LocalGet(COUNTER));
    f.instruction(&Instruction::I64Add);
    f.instruction(&Instruction::I32Const(i32::from(b'x')));
    f.instruction(&Instruction::Call(STORE_U8));
    f.instruction(&Instruction::LocalGet(COUNTER));
    f.instruction(&Instruction::I64Const(1));
    f.instruction(&Instruction::I64Add);
    f.instruction(&Instruction::LocalSet(COUNTER));
    f.instruction(&Instruction::Br(0));
    f.instruction(&Instruction::End);
    f.instruction(&Instruction::End);
}

fn await_cancel(f: &mut Function) {
    f.instruction(&Instruction::Loop(BlockType::Empty));
    f.instruction(&Instruction::Call(CANCELLED));
    f.instruction(&Instruction::I64Eqz);
    f.instruction(&Instruction::BrIf(0));
    f.instruction(&Instruction::End);
}

fn invoke(f: &mut Function, type_key: &str) {
    store_bytes(f, FIRST_PTR, type_key.as_bytes());
    store_bytes(f, SECOND_PTR, b"ping");
    f.instruction(&Instruction::LocalGet(FIRST_PTR));
    f.instruction(&Instruction::LocalGet(SECOND_PTR));
    f.instruction(&Instruction::Call(CAPABILITY));
    f.instruction(&Instruction::Drop);
}

fn log(f: &mut Function) {
    f.instruction(&Instruction::LocalGet(FIRST_PTR));
    f.instruction(&Instruction::LocalGet(SECOND_PTR));
    f.instruction(&Instruction::Call(LOG));
}

fn encode_body(body: Body) -> Function {
    let mut f = Function::new([(3, ValType::I64)]);
    match body {
        Body::Ok => {},
        Body::Trap => {
            f.instruction(&Instruction::Unreachable);
        },
        Body::Spin => {
            f.instruction(&Instruction::Loop(BlockType::Empty));
            f.instruction(&Instruction::Br(0));
            f.instruction(&Instruction::End);
        },
        Body::AwaitCancel => await_cancel(&mut f),
        Body::Log(level, message) => {
            store_bytes(&mut f, FIRST_PTR, level.as_bytes());
            store_bytes(&mut f, SECOND_PTR, message.as_bytes());
            log(&mut f);
        },
        Body::LogRepeated(len) => {
            store_bytes(&mut f, FIRST_PTR, b"info");
            store_repeated(&mut f, SECOND_PTR, len);
            log(&mut f);
        },
        Body::Invoke(type_key) => invoke(&mut f, type_key),
        Body::InvokeThenAwait(type_key) => {
            invoke(&mut f, type_key);
            await_cancel(&mut f);
        },
    }
    if body != Body::Trap {
        f.instruction(&Instruction::I32Const(0));
    }
    f.instruction(&Instruction::End);
    f
}

/// A running orchestrator plus a scratch directory for units.
#[allow(dead_code)]
pub struct Harness {
    /// The orchestrator under test, already started.
    pub runtime: RuntimeOrchestrator,
    /// Shared capability registry.
    pub capabilities: Arc<CapabilityRegistry>,
    dir: TempDir,
}

#[allow(dead_code)]
impl Harness {
    /// Started orchestrator without snapshot persistence.
    pub fn new() -> Self {
        let capabilities = Arc::new(CapabilityRegistry::new());
        let runtime = RuntimeOrchestrator::new(ModuleLoader::new(capabilities.clone()));
        runtime.start().expect("start runtime");
        Self {
            runtime,
            capabilities,
            dir: TempDir::new().expect("failed to create tempdir"),
        }
    }

    /// Started orchestrator whose loader applies `sandbox`.
    pub fn with_sandbox(sandbox: SandboxConfig) -> Self {
        let capabilities = Arc::new(CapabilityRegistry::new());
        let loader = ModuleLoader::new(capabilities.clone()).with_sandbox(sandbox);
        let runtime = RuntimeOrchestrator::new(loader);
        runtime.start().expect("start runtime");
        Self {
            runtime,
            capabilities,
            dir: TempDir::new().expect("failed to create tempdir"),
        }
    }

    /// Started orchestrator persisting to `snapshot.json` in the scratch dir.
    pub fn persisting() -> Self {
        let capabilities = Arc::new(CapabilityRegistry::new());
        let dir = TempDir::new().expect("failed to create tempdir");
        let runtime = RuntimeOrchestrator::new(ModuleLoader::new(capabilities.clone()))
            .with_snapshot_path(dir.path().join("snapshot.json"));
        runtime.start().expect("start runtime");
        Self {
            runtime,
            capabilities,
            dir,
        }
    }

    /// Scratch directory.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Write a unit into the scratch directory.
    pub fn unit(&self, unit: &UnitBuilder) -> PathBuf {
        unit.write(self.dir.path())
    }
}

//! kalc-drv - JIT Execution Driver
//!
//! The evaluator drives the whole pipeline, strictly pull-based: it asks
//! the parser for one top-level construct at a time, hands it to the IR
//! emitter, and for anonymous top-level expressions JIT-compiles the
//! accumulated module and invokes the wrapper to produce a double.
//!
//! Persistence lives in the emitter's module, not in any execution
//! engine: each JIT invocation re-parses the module's printed IR into a
//! fresh in-memory module, verifies it, optionally optimizes it, and
//! hands it to a throwaway MCJIT engine. Declarations and named
//! definitions are additionally recorded in a history so the module can
//! be rebuilt after a failed emission corrupts it.

use std::cell::{Cell, RefCell};
use std::fs;
use std::rc::Rc;
use std::sync::OnceLock;

use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{
    CodeModel, FileType, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};
use inkwell::OptimizationLevel;
use thiserror::Error;

use kalc_gen::{CodeGenError, IrEmitter};
use kalc_par::{Item, OperatorInfo, OperatorTable, ParseError, Parser, DEFAULT_PRECEDENCE};

/// Name given to the persistent module (and its JIT copies).
pub const MODULE_NAME: &str = "kaleidoscope";

/// Evaluation error, spanning every phase the driver touches.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("code generation error: {0}")]
    CodeGen(#[from] CodeGenError),

    #[error("module verification failed: {0}")]
    Verify(String),

    #[error("JIT linking failed: {0}")]
    Link(String),

    #[error("LLVM error: {0}")]
    Llvm(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options controlling one evaluation pass. `optimize` defaults to on,
/// everything else to off.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Run the module-level optimizer (opt-level 2) before execution.
    pub optimize: bool,
    /// Write `__dump__unoptimized.ll`, `__dump__optimized.ll`, and
    /// `__dump__assembler.asm` to the working directory.
    pub llvmdump: bool,
    /// Stop after emitting unoptimized IR; the result value is that IR.
    pub noexec: bool,
    /// Stop after parsing; the result value is the printed AST.
    pub parseonly: bool,
    /// Verbose output in the driver binary.
    pub verbose: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            llvmdump: false,
            noexec: false,
            parseonly: false,
            verbose: false,
        }
    }
}

/// The payload of one evaluated top-level construct. Expressions yield a
/// `Double`; `parseonly` and `noexec` runs yield `Text`.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Double(f64),
    Text(String),
}

impl EvalValue {
    /// The numeric value, if this is one.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            EvalValue::Double(value) => Some(*value),
            EvalValue::Text(_) => None,
        }
    }
}

/// The outcome of evaluating one top-level construct.
///
/// `value` is `None` for declarations and named definitions.
/// `unoptimized_ir` holds the IR chunk the construct added to the module;
/// `optimized_ir` is present for expressions that went through the
/// optimizer.
#[derive(Debug, Clone)]
pub struct EvalResult {
    pub ast: Item,
    pub unoptimized_ir: Option<String>,
    pub optimized_ir: Option<String>,
    pub value: Option<EvalValue>,
}

/// Evaluator for Kaleidoscope code.
///
/// Definitions and `extern`s are only added into the growing module; no
/// compilation happens for them. When a top-level expression is
/// evaluated, the whole module is JIT-compiled and the expression's
/// wrapper is invoked to obtain its value.
pub struct Evaluator<'ctx> {
    context: &'ctx Context,
    emitter: IrEmitter<'ctx>,
    ops: Rc<RefCell<OperatorTable>>,
    anon_counter: Rc<Cell<u64>>,
    history: Vec<Item>,
}

impl<'ctx> Evaluator<'ctx> {
    /// Creates an evaluator with a fresh module and built-ins installed.
    pub fn new(context: &'ctx Context) -> Result<Self, EvalError> {
        initialize_targets()?;

        let mut emitter = IrEmitter::new(context, MODULE_NAME);
        emitter.install_builtins()?;

        Ok(Self {
            context,
            emitter,
            ops: Rc::new(RefCell::new(OperatorTable::new())),
            anon_counter: Rc::new(Cell::new(0)),
            history: Vec::new(),
        })
    }

    /// Evaluates `source` lazily, one top-level construct per step.
    ///
    /// The stream ends at end of input, or after yielding the first
    /// error; after a failed emission the module may be inconsistent and
    /// [`Evaluator::reset`] rebuilds it from the recorded history.
    pub fn eval<'e, 's>(&'e mut self, source: &'s str, options: &EvalOptions) -> EvalStream<'e, 's, 'ctx> {
        let parser = Parser::new(source, Rc::clone(&self.ops), Rc::clone(&self.anon_counter));
        EvalStream {
            evaluator: self,
            parser,
            options: options.clone(),
            done: false,
        }
    }

    /// Evaluates only the first top-level construct in `source` and
    /// returns its numeric value, if it has one.
    pub fn eval_expr(
        &mut self,
        source: &str,
        options: &EvalOptions,
    ) -> Result<Option<f64>, EvalError> {
        match self.eval(source, options).next() {
            Some(result) => Ok(result?.value.and_then(|value| value.as_double())),
            None => Ok(None),
        }
    }

    /// The declarations and named definitions successfully emitted so
    /// far, in order.
    pub fn history(&self) -> &[Item] {
        &self.history
    }

    /// The current printed IR of the persistent module.
    pub fn module_ir(&self) -> String {
        self.emitter.module.print_to_string().to_string()
    }

    /// Rebuilds the module by replaying a declaration history.
    ///
    /// With `None`, the evaluator's own recorded history is replayed;
    /// `Some(&[])` produces a fresh module. The rebuild is atomic: on any
    /// replay failure this returns `false` and the evaluator keeps its
    /// previous module, operator table, and history untouched. Built-ins
    /// and the default operator table are reinstalled on every reset, and
    /// operator prototypes in the history reinstall their table entries
    /// in replay order.
    pub fn reset(&mut self, history: Option<&[Item]>) -> bool {
        let items: Vec<Item> = match history {
            Some(history) => history.to_vec(),
            None => self.history.clone(),
        };

        let mut emitter = IrEmitter::new(self.context, MODULE_NAME);
        if emitter.install_builtins().is_err() {
            return false;
        }
        let mut ops = OperatorTable::new();

        for item in &items {
            let proto = item.proto();
            if proto.is_binary_op() {
                if let Some(op) = proto.operator_char() {
                    let precedence = proto.precedence.map_or(DEFAULT_PRECEDENCE, |p| p as i32);
                    ops.install(op, OperatorInfo::left(precedence));
                }
            }
            if emitter.emit(item).is_err() {
                return false;
            }
        }

        self.emitter = emitter;
        *self.ops.borrow_mut() = ops;
        self.history = items;
        true
    }

    /// Compiles the accumulated module to native object code.
    ///
    /// `triple` selects a cross-compilation target; `None` uses the host.
    pub fn compile_to_object(&self, triple: Option<&str>) -> Result<Vec<u8>, EvalError> {
        let triple = match triple {
            Some(triple) => TargetTriple::create(triple),
            None => TargetMachine::get_default_triple(),
        };
        let target = Target::from_triple(&triple).map_err(|e| EvalError::Llvm(e.to_string()))?;
        let target_machine = target
            .create_target_machine(
                &triple,
                "generic",
                "",
                OptimizationLevel::Default,
                RelocMode::Default,
                CodeModel::Small,
            )
            .ok_or_else(|| EvalError::Llvm("failed to create target machine".to_string()))?;

        let module = self.reparse_module()?;
        let object = target_machine
            .write_to_memory_buffer(&module, FileType::Object)
            .map_err(|e| EvalError::Llvm(e.to_string()))?;
        Ok(object.as_slice().to_vec())
    }

    /// Evaluates a single top-level construct.
    fn eval_item(&mut self, ast: Item, options: &EvalOptions) -> Result<EvalResult, EvalError> {
        if options.parseonly {
            let rendered = ast.to_string();
            return Ok(EvalResult {
                ast,
                unoptimized_ir: None,
                optimized_ir: None,
                value: Some(EvalValue::Text(rendered)),
            });
        }

        self.emitter.emit(&ast)?;

        let module_text = self.module_ir();
        let unoptimized_ir = last_chunk(&module_text).map(str::to_string);

        if options.llvmdump {
            fs::write("__dump__unoptimized.ll", &module_text)?;
        }

        if options.noexec {
            if !ast.is_anonymous() {
                self.history.push(ast.clone());
            }
            let value = unoptimized_ir.clone().map(EvalValue::Text);
            return Ok(EvalResult {
                ast,
                unoptimized_ir,
                optimized_ir: None,
                value,
            });
        }

        if !ast.is_anonymous() {
            // Declarations and definitions are only added into the IR;
            // record them so the module can be rebuilt later.
            self.history.push(ast.clone());
            return Ok(EvalResult {
                ast,
                unoptimized_ir,
                optimized_ir: None,
                value: None,
            });
        }

        // Anonymous wrapper: JIT-compile the whole module and run it.
        let fn_name = ast.proto().name.clone();
        let (value, optimized_ir) = self.jit_invoke(&fn_name, options)?;
        Ok(EvalResult {
            ast,
            unoptimized_ir,
            optimized_ir,
            value: Some(EvalValue::Double(value)),
        })
    }

    /// Runs the anonymous wrapper `fn_name` through verification,
    /// optimization, and MCJIT execution.
    ///
    /// The execution engine owns a freshly parsed copy of the module and
    /// both are released when this returns, on every exit path.
    fn jit_invoke(
        &self,
        fn_name: &str,
        options: &EvalOptions,
    ) -> Result<(f64, Option<String>), EvalError> {
        let jit_module = self.reparse_module()?;
        jit_module
            .verify()
            .map_err(|e| EvalError::Verify(e.to_string()))?;

        let target_machine = self.host_target_machine()?;

        let mut optimized_ir = None;
        if options.optimize {
            jit_module
                .run_passes("default<O2>", &target_machine, PassBuilderOptions::create())
                .map_err(|e| EvalError::Llvm(e.to_string()))?;

            let optimized_text = jit_module.print_to_string().to_string();
            if options.llvmdump {
                fs::write("__dump__optimized.ll", &optimized_text)?;
            }
            optimized_ir = chunk_for(&optimized_text, fn_name).map(str::to_string);
        }

        let engine = jit_module
            .create_jit_execution_engine(OptimizationLevel::Default)
            .map_err(|e| EvalError::Link(e.to_string()))?;

        if options.llvmdump {
            let asm = target_machine
                .write_to_memory_buffer(&jit_module, FileType::Assembly)
                .map_err(|e| EvalError::Llvm(e.to_string()))?;
            fs::write("__dump__assembler.asm", asm.as_slice())?;
        }

        let value = unsafe {
            let wrapper = engine
                .get_function::<unsafe extern "C" fn() -> f64>(fn_name)
                .map_err(|e| EvalError::Link(e.to_string()))?;
            wrapper.call()
        };

        Ok((value, optimized_ir))
    }

    /// Parses the persistent module's printed IR into a fresh in-memory
    /// module.
    fn reparse_module(&self) -> Result<inkwell::module::Module<'ctx>, EvalError> {
        let module_text = self.module_ir();
        let buffer =
            MemoryBuffer::create_from_memory_range_copy(module_text.as_bytes(), MODULE_NAME);
        self.context
            .create_module_from_ir(buffer)
            .map_err(|e| EvalError::Llvm(e.to_string()))
    }

    fn host_target_machine(&self) -> Result<TargetMachine, EvalError> {
        let triple = TargetMachine::get_default_triple();
        let target = Target::from_triple(&triple).map_err(|e| EvalError::Llvm(e.to_string()))?;
        target
            .create_target_machine(
                &triple,
                "generic",
                "",
                OptimizationLevel::Default,
                RelocMode::Default,
                CodeModel::Default,
            )
            .ok_or_else(|| EvalError::Llvm("failed to create target machine".to_string()))
    }
}

/// Lazy stream of evaluation results, one per top-level construct.
///
/// Fuses after the first error: a parse error abandons the current
/// construct and a codegen error may leave the module inconsistent, so
/// the caller decides whether to reset before evaluating further.
pub struct EvalStream<'e, 's, 'ctx> {
    evaluator: &'e mut Evaluator<'ctx>,
    parser: Parser<'s>,
    options: EvalOptions,
    done: bool,
}

impl<'e, 's, 'ctx> Iterator for EvalStream<'e, 's, 'ctx> {
    type Item = Result<EvalResult, EvalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.parser.parse_top_level() {
            Ok(Some(item)) => {
                let result = self.evaluator.eval_item(item, &self.options);
                if result.is_err() {
                    self.done = true;
                }
                Some(result)
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err.into()))
            }
        }
    }
}

/// One-time LLVM target initialization, shared by every evaluator in the
/// process.
fn initialize_targets() -> Result<(), EvalError> {
    static TARGETS: OnceLock<Result<(), String>> = OnceLock::new();
    TARGETS
        .get_or_init(|| {
            Target::initialize_native(&InitializationConfig::default())?;
            // Cross targets for compile_to_object.
            Target::initialize_all(&InitializationConfig::default());
            Ok(())
        })
        .clone()
        .map_err(EvalError::Llvm)
}

/// The last blank-line-separated paragraph of a printed module: the
/// construct most recently added to it.
fn last_chunk(module_text: &str) -> Option<&str> {
    module_text.trim_end().split("\n\n").last()
}

/// The paragraph of a printed module containing the definition of
/// `fn_name`, falling back to the last one.
fn chunk_for<'t>(module_text: &'t str, fn_name: &str) -> Option<&'t str> {
    let plain = format!("@{}(", fn_name);
    let quoted = format!("@\"{}\"(", fn_name);
    module_text
        .split("\n\n")
        .find(|chunk| chunk.contains(&plain) || chunk.contains(&quoted))
        .or_else(|| last_chunk(module_text))
}

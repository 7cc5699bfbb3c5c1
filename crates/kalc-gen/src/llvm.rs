//! LLVM IR emitter.
//!
//! Syntax-directed translation of Kaleidoscope AST nodes into LLVM IR
//! against a persistent module. Every value is a double. Mutable
//! variables and assignment work through a single mechanism: each
//! in-scope name maps to a stack slot allocated in the function's entry
//! block, reads emit a load and writes emit a store, and mem2reg promotes
//! the slots to SSA registers during optimization.

use std::collections::HashMap;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::values::{BasicMetadataValueEnum, FloatValue, FunctionValue, PointerValue};
use inkwell::FloatPredicate;

use kalc_par::{Expr, Function, Item, Prototype};

use crate::error::{CodeGenError, Result};

/// Emitter state: the growing module, the instruction builder, and the
/// per-function symbol table mapping variable names to their stack slots.
pub struct IrEmitter<'ctx> {
    pub context: &'ctx Context,
    pub module: Module<'ctx>,
    builder: Builder<'ctx>,
    symtab: HashMap<String, PointerValue<'ctx>>,
    cur_fn: Option<FunctionValue<'ctx>>,
}

impl<'ctx> IrEmitter<'ctx> {
    /// Creates an emitter with an empty module named `module_name`.
    pub fn new(context: &'ctx Context, module_name: &str) -> Self {
        Self {
            context,
            module: context.create_module(module_name),
            builder: context.create_builder(),
            symtab: HashMap::new(),
            cur_fn: None,
        }
    }

    /// Installs the built-in functions: a declaration of
    /// `putchar: (i32) -> i32` resolved from the C runtime, and a
    /// definition of `putchard: (double) -> double` that truncates its
    /// argument, prints it as a character, and yields 0.0.
    pub fn install_builtins(&mut self) -> Result<()> {
        let i32_type = self.context.i32_type();
        let f64_type = self.context.f64_type();

        let putchar_type = i32_type.fn_type(&[i32_type.into()], false);
        let putchar = self
            .module
            .add_function("putchar", putchar_type, Some(Linkage::External));

        let putchard_type = f64_type.fn_type(&[f64_type.into()], false);
        let putchard = self.module.add_function("putchard", putchard_type, None);

        let entry = self.context.append_basic_block(putchard, "entry");
        self.builder.position_at_end(entry);

        let arg = putchard
            .get_nth_param(0)
            .ok_or_else(|| {
                CodeGenError::LlvmOperationFailed("putchard has no parameter".to_string())
            })?
            .into_float_value();
        let int_value = self
            .builder
            .build_float_to_unsigned_int(arg, i32_type, "intcast")
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed intcast: {}", e)))?;
        self.builder
            .build_call(putchar, &[int_value.into()], "")
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed putchar call: {}", e)))?;
        self.builder
            .build_return(Some(&f64_type.const_zero()))
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed return: {}", e)))?;

        Ok(())
    }

    /// Emits IR for a top-level construct, returning the function it
    /// declares or defines.
    ///
    /// On error the module may be left with a half-built function; the
    /// driver is expected to rebuild it by replaying the declaration
    /// history.
    pub fn emit(&mut self, item: &Item) -> Result<FunctionValue<'ctx>> {
        match item {
            Item::Prototype(proto) => self.emit_prototype(proto),
            Item::Function(func) => self.emit_function(func),
        }
    }

    /// Declares a function, or re-uses a compatible earlier declaration.
    ///
    /// A name may transition from declaration to definition exactly once;
    /// a redeclaration must match the previous arity. No symbol-table
    /// entries are created here.
    fn emit_prototype(&mut self, proto: &Prototype) -> Result<FunctionValue<'ctx>> {
        if let Some(function) = self.module.get_function(&proto.name) {
            if function.count_basic_blocks() > 0 {
                return Err(CodeGenError::Redefinition(proto.name.clone()));
            }
            let expected = function.count_params() as usize;
            if expected != proto.params.len() {
                return Err(CodeGenError::ArityMismatch {
                    name: proto.name.clone(),
                    expected,
                    found: proto.params.len(),
                });
            }
            return Ok(function);
        }
        if self.module.get_global(&proto.name).is_some() {
            return Err(CodeGenError::NameCollision(proto.name.clone()));
        }

        let f64_type = self.context.f64_type();
        let param_types = vec![f64_type.into(); proto.params.len()];
        let fn_type = f64_type.fn_type(&param_types, false);
        let function = self.module.add_function(&proto.name, fn_type, None);

        for (param, name) in function.get_param_iter().zip(&proto.params) {
            param.into_float_value().set_name(name);
        }

        Ok(function)
    }

    /// Defines a function: prototype, entry block, one stack slot per
    /// parameter, then the body expression as the return value.
    fn emit_function(&mut self, func: &Function) -> Result<FunctionValue<'ctx>> {
        self.symtab.clear();

        let function = self.emit_prototype(&func.proto)?;

        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);
        self.cur_fn = Some(function);

        for (param, name) in function.get_param_iter().zip(&func.proto.params) {
            let slot = self.create_entry_block_alloca(function, name)?;
            self.builder.build_store(slot, param).map_err(|e| {
                CodeGenError::LlvmOperationFailed(format!("failed parameter store: {}", e))
            })?;
            self.symtab.insert(name.clone(), slot);
        }

        let ret = self.emit_expr(&func.body)?;
        self.builder
            .build_return(Some(&ret))
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed return: {}", e)))?;

        self.cur_fn = None;
        Ok(function)
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<FloatValue<'ctx>> {
        match expr {
            Expr::Number(text) => self.emit_number(text),
            Expr::Variable(name) => self.emit_variable(name),
            Expr::Unary { op, operand } => self.emit_unary(*op, operand),
            Expr::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),
            Expr::Call { callee, args } => self.emit_call(callee, args),
            Expr::If { cond, then, orelse } => self.emit_if(cond, then, orelse),
            Expr::For {
                var,
                init,
                cond,
                step,
                body,
            } => self.emit_for(var, init, cond, step.as_deref(), body),
            Expr::VarIn { bindings, body } => self.emit_var_in(bindings, body),
        }
    }

    fn emit_number(&self, text: &str) -> Result<FloatValue<'ctx>> {
        let value: f64 = text
            .parse()
            .map_err(|_| CodeGenError::InvalidNumber(text.to_string()))?;
        Ok(self.context.f64_type().const_float(value))
    }

    fn emit_variable(&self, name: &str) -> Result<FloatValue<'ctx>> {
        let slot = self
            .symtab
            .get(name)
            .copied()
            .ok_or_else(|| CodeGenError::UnknownVariable(name.to_string()))?;
        let loaded = self
            .builder
            .build_load(slot, name)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed load: {}", e)))?;
        Ok(loaded.into_float_value())
    }

    /// There are no built-in unary operators; every unary application is
    /// a call to a user-defined `unary<op>` function.
    fn emit_unary(&mut self, op: char, operand: &Expr) -> Result<FloatValue<'ctx>> {
        let operand = self.emit_expr(operand)?;
        let callee = self
            .module
            .get_function(&format!("unary{}", op))
            .ok_or(CodeGenError::UnknownUnaryOp(op))?;
        self.build_float_call(callee, &[operand.into()], "unop")
    }

    fn emit_binary(&mut self, op: char, lhs: &Expr, rhs: &Expr) -> Result<FloatValue<'ctx>> {
        // Assignment is handled as a special case: the LHS is not
        // evaluated, it names the slot to store into.
        if op == '=' {
            return self.emit_assignment(lhs, rhs);
        }

        let l = self.emit_expr(lhs)?;
        let r = self.emit_expr(rhs)?;

        match op {
            '+' => self
                .builder
                .build_float_add(l, r, "addtmp")
                .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed fadd: {}", e))),
            '-' => self
                .builder
                .build_float_sub(l, r, "subtmp")
                .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed fsub: {}", e))),
            '*' => self
                .builder
                .build_float_mul(l, r, "multmp")
                .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed fmul: {}", e))),
            '<' => {
                // Unordered comparison: either operand may be a NaN.
                let cmp = self
                    .builder
                    .build_float_compare(FloatPredicate::ULT, l, r, "cmptmp")
                    .map_err(|e| {
                        CodeGenError::LlvmOperationFailed(format!("failed fcmp: {}", e))
                    })?;
                // Convert the i1 back to 0.0 or 1.0.
                self.builder
                    .build_unsigned_int_to_float(cmp, self.context.f64_type(), "booltmp")
                    .map_err(|e| {
                        CodeGenError::LlvmOperationFailed(format!("failed uitofp: {}", e))
                    })
            }
            _ => {
                // User-defined binary operator.
                let callee = self
                    .module
                    .get_function(&format!("binary{}", op))
                    .ok_or(CodeGenError::UnknownBinaryOp(op))?;
                self.build_float_call(callee, &[l.into(), r.into()], "binop")
            }
        }
    }

    /// `lhs = rhs`: store into the named slot and yield the stored value.
    fn emit_assignment(&mut self, lhs: &Expr, rhs: &Expr) -> Result<FloatValue<'ctx>> {
        let name = match lhs {
            Expr::Variable(name) => name,
            _ => return Err(CodeGenError::AssignLhsNotVariable),
        };
        let value = self.emit_expr(rhs)?;
        let slot = self
            .symtab
            .get(name)
            .copied()
            .ok_or_else(|| CodeGenError::UnknownVariable(name.clone()))?;
        self.builder
            .build_store(slot, value)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed store: {}", e)))?;
        Ok(value)
    }

    fn emit_call(&mut self, callee: &str, args: &[Expr]) -> Result<FloatValue<'ctx>> {
        let callee_fn = self
            .module
            .get_function(callee)
            .ok_or_else(|| CodeGenError::UnknownCallee(callee.to_string()))?;

        let expected = callee_fn.count_params() as usize;
        if expected != args.len() {
            return Err(CodeGenError::ArityMismatch {
                name: callee.to_string(),
                expected,
                found: args.len(),
            });
        }

        let mut values: Vec<BasicMetadataValueEnum> = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.emit_expr(arg)?.into());
        }
        self.build_float_call(callee_fn, &values, "calltmp")
    }

    fn emit_if(&mut self, cond: &Expr, then: &Expr, orelse: &Expr) -> Result<FloatValue<'ctx>> {
        let f64_type = self.context.f64_type();

        let cond_value = self.emit_expr(cond)?;
        // Ordered comparison: NaN condition values take the else branch.
        let cond_bool = self
            .builder
            .build_float_compare(FloatPredicate::ONE, cond_value, f64_type.const_zero(), "ifcond")
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed fcmp: {}", e)))?;

        let function = self.current_function()?;
        let then_block = self.context.append_basic_block(function, "then");
        let else_block = self.context.append_basic_block(function, "else");
        let merge_block = self.context.append_basic_block(function, "endif");

        self.builder
            .build_conditional_branch(cond_bool, then_block, else_block)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed cbranch: {}", e)))?;

        // Emitting a branch body can itself open new blocks, so the block
        // the phi must name is wherever the builder ended up, not the one
        // created above.
        self.builder.position_at_end(then_block);
        let then_value = self.emit_expr(then)?;
        self.builder
            .build_unconditional_branch(merge_block)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed branch: {}", e)))?;
        let then_end = self.insert_block()?;

        self.builder.position_at_end(else_block);
        let else_value = self.emit_expr(orelse)?;
        self.builder
            .build_unconditional_branch(merge_block)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed branch: {}", e)))?;
        let else_end = self.insert_block()?;

        self.builder.position_at_end(merge_block);
        let phi = self
            .builder
            .build_phi(f64_type, "iftmp")
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed phi: {}", e)))?;
        phi.add_incoming(&[(&then_value, then_end), (&else_value, else_end)]);

        Ok(phi.as_basic_value().into_float_value())
    }

    /// `for` loop emission.
    ///
    /// The loop condition is computed on the pre-increment value of the
    /// induction variable, and the increment is stored before the
    /// back-edge branch. The body therefore runs once more after the last
    /// passing test and sees the value reached by the final step: with
    /// `for i = 0, i < 10, 2` the body observes 0, 2, 4, 6, 8 and 10.
    /// The expression itself always yields 0.0.
    fn emit_for(
        &mut self,
        var: &str,
        init: &Expr,
        cond: &Expr,
        step: Option<&Expr>,
        body: &Expr,
    ) -> Result<FloatValue<'ctx>> {
        let f64_type = self.context.f64_type();
        let function = self.current_function()?;

        // Slot for the induction variable, then the initializer without
        // the variable in scope yet.
        let slot = self.create_entry_block_alloca(function, var)?;
        let init_value = self.emit_expr(init)?;
        self.builder
            .build_store(slot, init_value)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed store: {}", e)))?;

        let loop_block = self.context.append_basic_block(function, "loopbody");
        // Explicit fall through into the loop body.
        self.builder
            .build_unconditional_branch(loop_block)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed branch: {}", e)))?;
        self.builder.position_at_end(loop_block);

        // Shadow any existing binding of the loop variable.
        let shadowed = self.symtab.insert(var.to_string(), slot);

        // The body's value is discarded.
        self.emit_expr(body)?;

        let step_value = match step {
            Some(step) => self.emit_expr(step)?,
            None => f64_type.const_float(1.0),
        };

        let cond_value = self.emit_expr(cond)?;
        let cond_bool = self
            .builder
            .build_float_compare(
                FloatPredicate::ONE,
                cond_value,
                f64_type.const_zero(),
                "loopcond",
            )
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed fcmp: {}", e)))?;

        // Reload, increment, and store back; going through the slot keeps
        // this correct when the body mutates the variable.
        let cur = self
            .builder
            .build_load(slot, var)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed load: {}", e)))?
            .into_float_value();
        let next = self
            .builder
            .build_float_add(cur, step_value, "nextloopvar")
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed fadd: {}", e)))?;
        self.builder
            .build_store(slot, next)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed store: {}", e)))?;

        let after_block = self.context.append_basic_block(function, "endfor");
        self.builder
            .build_conditional_branch(cond_bool, loop_block, after_block)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed cbranch: {}", e)))?;
        self.builder.position_at_end(after_block);

        // Restore the shadowed binding, or drop the loop variable.
        match shadowed {
            Some(prev) => {
                self.symtab.insert(var.to_string(), prev);
            }
            None => {
                self.symtab.remove(var);
            }
        }

        Ok(f64_type.const_zero())
    }

    fn emit_var_in(
        &mut self,
        bindings: &[(String, Option<Expr>)],
        body: &Expr,
    ) -> Result<FloatValue<'ctx>> {
        let f64_type = self.context.f64_type();
        let mut shadowed: Vec<(String, Option<PointerValue<'ctx>>)> =
            Vec::with_capacity(bindings.len());

        for (name, init) in bindings {
            // Emit the initializer before installing the name, so an
            // initializer cannot reference the variable it introduces.
            let init_value = match init {
                Some(init) => self.emit_expr(init)?,
                None => f64_type.const_zero(),
            };

            let function = self.current_function()?;
            let slot = self.create_entry_block_alloca(function, name)?;
            self.builder
                .build_store(slot, init_value)
                .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed store: {}", e)))?;

            shadowed.push((name.clone(), self.symtab.insert(name.clone(), slot)));
        }

        let body_value = self.emit_expr(body)?;

        // Restore the shadowed bindings.
        for (name, prev) in shadowed {
            match prev {
                Some(prev) => {
                    self.symtab.insert(name, prev);
                }
                None => {
                    self.symtab.remove(&name);
                }
            }
        }

        Ok(body_value)
    }

    /// Creates a stack slot for `name` in the entry block of `function`,
    /// ahead of any existing instructions, so mem2reg can promote it.
    fn create_entry_block_alloca(
        &self,
        function: FunctionValue<'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>> {
        let builder = self.context.create_builder();
        let entry = function.get_first_basic_block().ok_or_else(|| {
            CodeGenError::LlvmOperationFailed("function has no entry block".to_string())
        })?;
        match entry.get_first_instruction() {
            Some(first) => builder.position_before(&first),
            None => builder.position_at_end(entry),
        }
        builder
            .build_alloca(self.context.f64_type(), name)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed alloca: {}", e)))
    }

    fn build_float_call(
        &self,
        callee: FunctionValue<'ctx>,
        args: &[BasicMetadataValueEnum<'ctx>],
        name: &str,
    ) -> Result<FloatValue<'ctx>> {
        let call = self
            .builder
            .build_call(callee, args, name)
            .map_err(|e| CodeGenError::LlvmOperationFailed(format!("failed call: {}", e)))?;
        Ok(call.try_as_basic_value().unwrap_basic().into_float_value())
    }

    fn current_function(&self) -> Result<FunctionValue<'ctx>> {
        self.cur_fn.ok_or_else(|| {
            CodeGenError::LlvmOperationFailed("no function is being emitted".to_string())
        })
    }

    fn insert_block(&self) -> Result<inkwell::basic_block::BasicBlock<'ctx>> {
        self.builder.get_insert_block().ok_or_else(|| {
            CodeGenError::LlvmOperationFailed("builder has no insertion block".to_string())
        })
    }
}

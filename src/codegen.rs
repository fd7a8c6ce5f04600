//! Cranelift JIT backend.
//!
//! A lowered form compiles to one native function `fn(env) -> result`.
//! Booleans are `i8`. Numbers are decimals that live in an arena owned by
//! the environment, and the generated code only moves `i64` handles into
//! that arena around. Decimal arithmetic and every global access go through
//! `extern "C"` callbacks that receive the environment pointer.
//!
//! A callback that fails records the error in the environment and returns a
//! negative value. The generated code checks for that after every fallible
//! call and leaves the function straight away.

use std::collections::HashMap;

use cranelift::codegen;
use cranelift::codegen::ir::FuncRef;
use cranelift::prelude::{
    types, AbiParam, Block, EntityRef, FunctionBuilder, FunctionBuilderContext, InstBuilder,
    IntCC, Value as IrValue, Variable,
};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use ecow::EcoString;
use rust_decimal::Decimal;
use tracing::{debug, trace};

use crate::error::{JitError, RuntimeError};
use crate::globals::GlobalStore;
use crate::hlir::{self, ArithmeticOp, ComparisonOp, HlirExpr, LogicalOp, SlotId, Type};

const FAILED: i64 = -1;

/// Handle of the zero constant, which every function's arena starts with.
const ZERO: i64 = 0;

struct JitEnv<'a> {
    store: &'a mut dyn GlobalStore,
    names: &'a [EcoString],
    numbers: Vec<Decimal>,
    error: Option<RuntimeError>,
}

impl JitEnv<'_> {
    fn number(&self, handle: i64) -> Option<Decimal> {
        self.numbers.get(usize::try_from(handle).ok()?).copied()
    }

    fn push(&mut self, n: Decimal) -> i64 {
        self.numbers.push(n);
        self.numbers.len() as i64 - 1
    }

    fn fail(&mut self, error: RuntimeError) {
        self.error.get_or_insert(error);
    }

    fn get(&mut self, id: i64, expected: Type) -> Option<hlir::Value> {
        let name = self.names.get(usize::try_from(id).ok()?)?;
        // A name bound but never written reads as its type's default.
        let value = self
            .store
            .try_get(name)
            .unwrap_or_else(|| hlir::Value::default_of(expected));
        if value.ty() == expected {
            Some(value)
        } else {
            self.error.get_or_insert(RuntimeError::GlobalTypeMismatch {
                name: name.clone(),
                expected,
                found: value.ty(),
            });
            None
        }
    }

    fn set(&mut self, id: i64, value: hlir::Value) {
        if let Some(name) = usize::try_from(id).ok().and_then(|id| self.names.get(id)) {
            self.store.set(name, value);
        }
    }

    fn arithmetic(&mut self, op: ArithmeticOp, left: i64, right: i64) -> i64 {
        let (Some(l), Some(r)) = (self.number(left), self.number(right)) else {
            self.fail(invalid_handle(op.symbol()));
            return FAILED;
        };
        match op.apply(l, r) {
            Ok(n) => self.push(n),
            Err(error) => {
                self.fail(error);
                FAILED
            }
        }
    }
}

fn invalid_handle(operator: &'static str) -> RuntimeError {
    RuntimeError::InvalidOperand {
        operator,
        found: Type::Void,
    }
}

extern "C" fn ncalc_number_add(env: *mut JitEnv<'_>, left: i64, right: i64) -> i64 {
    unsafe { &mut *env }.arithmetic(ArithmeticOp::Add, left, right)
}

extern "C" fn ncalc_number_subtract(env: *mut JitEnv<'_>, left: i64, right: i64) -> i64 {
    unsafe { &mut *env }.arithmetic(ArithmeticOp::Subtract, left, right)
}

extern "C" fn ncalc_number_multiply(env: *mut JitEnv<'_>, left: i64, right: i64) -> i64 {
    unsafe { &mut *env }.arithmetic(ArithmeticOp::Multiply, left, right)
}

extern "C" fn ncalc_number_divide(env: *mut JitEnv<'_>, left: i64, right: i64) -> i64 {
    unsafe { &mut *env }.arithmetic(ArithmeticOp::Divide, left, right)
}

extern "C" fn ncalc_number_negate(env: *mut JitEnv<'_>, operand: i64) -> i64 {
    let env = unsafe { &mut *env };
    match env.number(operand) {
        Some(n) => env.push(-n),
        None => {
            env.fail(invalid_handle("-"));
            FAILED
        }
    }
}

/// Orders two numbers as 0 (less), 1 (equal) or 2 (greater).
extern "C" fn ncalc_number_compare(env: *mut JitEnv<'_>, left: i64, right: i64) -> i8 {
    let env = unsafe { &mut *env };
    match (env.number(left), env.number(right)) {
        (Some(l), Some(r)) => l.cmp(&r) as i8 + 1,
        _ => {
            env.fail(invalid_handle("compare"));
            FAILED as i8
        }
    }
}

extern "C" fn ncalc_global_get_number(env: *mut JitEnv<'_>, id: i64) -> i64 {
    let env = unsafe { &mut *env };
    match env.get(id, Type::Number).and_then(|value| value.as_number()) {
        Some(n) => env.push(n),
        None => FAILED,
    }
}

extern "C" fn ncalc_global_set_number(env: *mut JitEnv<'_>, id: i64, handle: i64) -> i64 {
    let env = unsafe { &mut *env };
    match env.number(handle) {
        Some(n) => {
            env.set(id, hlir::Value::Number(n));
            handle
        }
        None => {
            env.fail(invalid_handle("="));
            FAILED
        }
    }
}

extern "C" fn ncalc_global_get_boolean(env: *mut JitEnv<'_>, id: i64) -> i8 {
    let env = unsafe { &mut *env };
    env.get(id, Type::Boolean)
        .and_then(|value| value.as_boolean())
        .map_or(FAILED as i8, i8::from)
}

extern "C" fn ncalc_global_set_boolean(env: *mut JitEnv<'_>, id: i64, value: i8) -> i8 {
    let env = unsafe { &mut *env };
    env.set(id, hlir::Value::Boolean(value != 0));
    value
}

fn ir_type(ty: Type) -> Result<types::Type, JitError> {
    match ty {
        Type::Number => Ok(types::I64),
        Type::Boolean => Ok(types::I8),
        other => Err(JitError::Unsupported(other)),
    }
}

#[derive(Clone, Copy)]
struct Callbacks {
    add: FuncId,
    subtract: FuncId,
    multiply: FuncId,
    divide: FuncId,
    negate: FuncId,
    compare: FuncId,
    get_number: FuncId,
    set_number: FuncId,
    get_boolean: FuncId,
    set_boolean: FuncId,
}

impl Callbacks {
    fn declare(module: &mut JITModule) -> Result<Self, JitError> {
        let pointer = module.target_config().pointer_type();
        let mut declare = |name: &str, params: &[types::Type], returns: types::Type| {
            let mut signature = module.make_signature();
            signature.params.push(AbiParam::new(pointer));
            signature
                .params
                .extend(params.iter().map(|ty| AbiParam::new(*ty)));
            signature.returns.push(AbiParam::new(returns));
            module.declare_function(name, Linkage::Import, &signature)
        };

        let binary = [types::I64, types::I64];
        Ok(Callbacks {
            add: declare("ncalc_number_add", &binary, types::I64)?,
            subtract: declare("ncalc_number_subtract", &binary, types::I64)?,
            multiply: declare("ncalc_number_multiply", &binary, types::I64)?,
            divide: declare("ncalc_number_divide", &binary, types::I64)?,
            negate: declare("ncalc_number_negate", &[types::I64], types::I64)?,
            compare: declare("ncalc_number_compare", &binary, types::I8)?,
            get_number: declare("ncalc_global_get_number", &[types::I64], types::I64)?,
            set_number: declare("ncalc_global_set_number", &binary, types::I64)?,
            get_boolean: declare("ncalc_global_get_boolean", &[types::I64], types::I8)?,
            set_boolean: declare(
                "ncalc_global_set_boolean",
                &[types::I64, types::I8],
                types::I8,
            )?,
        })
    }

    fn arithmetic(self, op: ArithmeticOp) -> FuncId {
        match op {
            ArithmeticOp::Add => self.add,
            ArithmeticOp::Subtract => self.subtract,
            ArithmeticOp::Multiply => self.multiply,
            ArithmeticOp::Divide => self.divide,
        }
    }
}

pub struct Jit {
    builder_ctx: FunctionBuilderContext,
}

impl Default for Jit {
    fn default() -> Self {
        Self::new()
    }
}

impl Jit {
    pub fn new() -> Self {
        Jit {
            builder_ctx: FunctionBuilderContext::new(),
        }
    }

    fn new_module() -> Result<JITModule, JitError> {
        let mut builder = JITBuilder::new(cranelift_module::default_libcall_names())?;
        builder.symbol("ncalc_number_add", ncalc_number_add as *const u8);
        builder.symbol("ncalc_number_subtract", ncalc_number_subtract as *const u8);
        builder.symbol("ncalc_number_multiply", ncalc_number_multiply as *const u8);
        builder.symbol("ncalc_number_divide", ncalc_number_divide as *const u8);
        builder.symbol("ncalc_number_negate", ncalc_number_negate as *const u8);
        builder.symbol("ncalc_number_compare", ncalc_number_compare as *const u8);
        builder.symbol("ncalc_global_get_number", ncalc_global_get_number as *const u8);
        builder.symbol("ncalc_global_set_number", ncalc_global_set_number as *const u8);
        builder.symbol("ncalc_global_get_boolean", ncalc_global_get_boolean as *const u8);
        builder.symbol("ncalc_global_set_boolean", ncalc_global_set_boolean as *const u8);
        Ok(JITModule::new(builder))
    }

    pub fn compile(&mut self, form: &HlirExpr) -> Result<JitFunction, JitError> {
        let mut module = Self::new_module()?;
        let callbacks = Callbacks::declare(&mut module)?;
        let pointer = module.target_config().pointer_type();
        let result = form.ty();

        let mut ctx = module.make_context();
        ctx.func.signature.params.push(AbiParam::new(pointer));
        if result != Type::Void {
            ctx.func
                .signature
                .returns
                .push(AbiParam::new(ir_type(result)?));
        }

        let mut names = Vec::new();
        let mut constants = vec![Decimal::ZERO];
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut self.builder_ctx);
            let entry = builder.create_block();
            let abort = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            let env = builder.block_params(entry)[0];

            let mut translator = Translator {
                builder,
                module: &mut module,
                callbacks,
                func_refs: HashMap::new(),
                env,
                abort,
                locals: HashMap::new(),
                globals: HashMap::new(),
                names: &mut names,
                constants: &mut constants,
                loop_exits: Vec::new(),
            };

            let value = translator.translate(form)?;
            match value {
                Some(value) if result != Type::Void => {
                    translator.builder.ins().return_(&[value]);
                }
                None if result == Type::Void => {
                    translator.builder.ins().return_(&[]);
                }
                _ => return Err(JitError::Unsupported(result)),
            }

            // The error is already recorded; any well-typed value will do.
            translator.builder.switch_to_block(abort);
            match result {
                Type::Number => {
                    let zero = translator.builder.ins().iconst(types::I64, ZERO);
                    translator.builder.ins().return_(&[zero]);
                }
                Type::Boolean => {
                    let no = translator.builder.ins().iconst(types::I8, 0);
                    translator.builder.ins().return_(&[no]);
                }
                _ => {
                    translator.builder.ins().return_(&[]);
                }
            }

            translator.builder.seal_all_blocks();
            translator.builder.finalize();
        }

        codegen::verify_function(&ctx.func, module.isa())
            .map_err(|errors| JitError::Verifier(errors.to_string()))?;
        trace!("IR:\n{:?}", ctx.func);

        let id = module.declare_function("main", Linkage::Export, &ctx.func.signature)?;
        module.define_function(id, &mut ctx)?;
        module.clear_context(&mut ctx);
        module.finalize_definitions();

        let code = module.get_finalized_function(id);
        debug!(
            %result,
            globals = names.len(),
            constants = constants.len(),
            "compiled native function"
        );

        Ok(JitFunction {
            module: Some(module),
            code,
            names,
            constants,
            result,
        })
    }
}

struct Translator<'a> {
    builder: FunctionBuilder<'a>,
    module: &'a mut JITModule,
    callbacks: Callbacks,
    func_refs: HashMap<FuncId, FuncRef>,
    env: IrValue,
    abort: Block,
    locals: HashMap<SlotId, Variable>,
    globals: HashMap<EcoString, i64>,
    names: &'a mut Vec<EcoString>,
    constants: &'a mut Vec<Decimal>,
    loop_exits: Vec<Block>,
}

impl Translator<'_> {
    fn value(&mut self, expr: &HlirExpr) -> Result<IrValue, JitError> {
        self.translate(expr)?
            .ok_or(JitError::Unsupported(Type::Void))
    }

    fn translate(&mut self, expr: &HlirExpr) -> Result<Option<IrValue>, JitError> {
        let value = match expr {
            HlirExpr::Constant(constant) => match constant {
                hlir::Value::Number(n) => {
                    self.constants.push(*n);
                    let handle = self.constants.len() as i64 - 1;
                    self.builder.ins().iconst(types::I64, handle)
                }
                hlir::Value::Boolean(b) => self.builder.ins().iconst(types::I8, i64::from(*b)),
                hlir::Value::String(_) => return Err(JitError::Unsupported(Type::String)),
                hlir::Value::Void => return Ok(None),
            },
            HlirExpr::Negate(operand) => {
                let operand = self.value(operand)?;
                self.checked_call(self.callbacks.negate, &[operand])
            }
            HlirExpr::Arithmetic { op, left, right } => {
                let lhs = self.value(left)?;
                let rhs = self.value(right)?;
                self.checked_call(self.callbacks.arithmetic(*op), &[lhs, rhs])
            }
            HlirExpr::Comparison { op, left, right } => self.translate_comparison(*op, left, right)?,
            HlirExpr::Logical { op, left, right } => self.translate_logical(*op, left, right)?,
            HlirExpr::GlobalGet { name, ty } => {
                let callback = match ty {
                    Type::Number => self.callbacks.get_number,
                    Type::Boolean => self.callbacks.get_boolean,
                    other => return Err(JitError::Unsupported(*other)),
                };
                let id = self.global_id(name);
                self.checked_call(callback, &[id])
            }
            HlirExpr::GlobalSet { name, value } => {
                let ty = value.ty();
                let value = self.value(value)?;
                let id = self.global_id(name);
                match ty {
                    Type::Number => self.checked_call(self.callbacks.set_number, &[id, value]),
                    Type::Boolean => self.call(self.callbacks.set_boolean, &[id, value]),
                    other => return Err(JitError::Unsupported(other)),
                }
            }
            HlirExpr::LocalGet(slot) => {
                let variable = self.local(slot)?;
                self.builder.use_var(variable)
            }
            HlirExpr::LocalSet { slot, value } => {
                let variable = self.local(slot)?;
                let value = self.value(value)?;
                self.builder.def_var(variable, value);
                value
            }
            HlirExpr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                self.translate_conditional(condition, then_branch, else_branch.as_deref())?;
                return Ok(None);
            }
            HlirExpr::Loop(body) => {
                let header = self.builder.create_block();
                let exit = self.builder.create_block();
                self.builder.ins().jump(header, &[]);

                self.builder.switch_to_block(header);
                self.loop_exits.push(exit);
                self.translate(body)?;
                self.loop_exits.pop();
                self.builder.ins().jump(header, &[]);

                self.builder.switch_to_block(exit);
                return Ok(None);
            }
            HlirExpr::Break => {
                let exit = *self.loop_exits.last().ok_or(JitError::BreakOutsideLoop)?;
                self.builder.ins().jump(exit, &[]);
                // Whatever follows the break is unreachable but still needs a block.
                let rest = self.builder.create_block();
                self.builder.switch_to_block(rest);
                return Ok(None);
            }
            HlirExpr::Sequence { locals, body } => {
                for slot in locals {
                    let variable = Variable::new(self.locals.len());
                    let ty = ir_type(slot.ty)?;
                    self.builder.declare_var(variable, ty);
                    let initial = match slot.ty {
                        Type::Number => self.builder.ins().iconst(types::I64, ZERO),
                        _ => self.builder.ins().iconst(types::I8, 0),
                    };
                    self.builder.def_var(variable, initial);
                    self.locals.insert(slot.id, variable);
                }

                let mut last = None;
                for expr in body {
                    last = self.translate(expr)?;
                }
                return Ok(last);
            }
        };

        Ok(Some(value))
    }

    fn local(&self, slot: &hlir::LocalSlot) -> Result<Variable, JitError> {
        self.locals
            .get(&slot.id)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownLocal(slot.name.clone()).into())
    }

    fn global_id(&mut self, name: &EcoString) -> IrValue {
        let id = match self.globals.get(name) {
            Some(id) => *id,
            None => {
                let id = self.names.len() as i64;
                self.names.push(name.clone());
                self.globals.insert(name.clone(), id);
                id
            }
        };
        self.builder.ins().iconst(types::I64, id)
    }

    fn call(&mut self, callback: FuncId, args: &[IrValue]) -> IrValue {
        let callee = match self.func_refs.get(&callback) {
            Some(callee) => *callee,
            None => {
                let callee = self
                    .module
                    .declare_func_in_func(callback, &mut self.builder.func);
                self.func_refs.insert(callback, callee);
                callee
            }
        };

        let mut call_args = vec![self.env];
        call_args.extend_from_slice(args);
        let call = self.builder.ins().call(callee, &call_args);
        self.builder.inst_results(call)[0]
    }

    /// Calls a callback that may fail and leaves the function when it does.
    fn checked_call(&mut self, callback: FuncId, args: &[IrValue]) -> IrValue {
        let result = self.call(callback, args);
        let failed = self.builder.ins().icmp_imm(IntCC::SignedLessThan, result, 0i64);
        let next = self.builder.create_block();
        self.builder.ins().brnz(failed, self.abort, &[]);
        self.builder.ins().jump(next, &[]);
        self.builder.switch_to_block(next);
        result
    }

    fn translate_comparison(
        &mut self,
        op: ComparisonOp,
        left: &HlirExpr,
        right: &HlirExpr,
    ) -> Result<IrValue, JitError> {
        let operand_ty = left.ty();
        let lhs = self.value(left)?;
        let rhs = self.value(right)?;

        let flag = match operand_ty {
            Type::Number => {
                let order = self.checked_call(self.callbacks.compare, &[lhs, rhs]);
                let (cc, against): (IntCC, i64) = match op {
                    ComparisonOp::Less => (IntCC::Equal, 0),
                    ComparisonOp::LessEqual => (IntCC::SignedLessThanOrEqual, 1),
                    ComparisonOp::Greater => (IntCC::Equal, 2),
                    ComparisonOp::GreaterEqual => (IntCC::SignedGreaterThanOrEqual, 1),
                    ComparisonOp::Equal => (IntCC::Equal, 1),
                    ComparisonOp::NotEqual => (IntCC::NotEqual, 1),
                };
                self.builder.ins().icmp_imm(cc, order, against)
            }
            Type::Boolean if op.is_equality() => {
                let cc = if op == ComparisonOp::Equal {
                    IntCC::Equal
                } else {
                    IntCC::NotEqual
                };
                self.builder.ins().icmp(cc, lhs, rhs)
            }
            other => return Err(JitError::Unsupported(other)),
        };

        Ok(self.builder.ins().bint(types::I8, flag))
    }

    fn translate_logical(
        &mut self,
        op: LogicalOp,
        left: &HlirExpr,
        right: &HlirExpr,
    ) -> Result<IrValue, JitError> {
        let lhs = self.value(left)?;

        let rhs_block = self.builder.create_block();
        let merge = self.builder.create_block();
        self.builder.append_block_param(merge, types::I8);

        // Skip the right operand when the left one decides the result.
        match op {
            LogicalOp::And => self.builder.ins().brz(lhs, merge, &[lhs]),
            LogicalOp::Or => self.builder.ins().brnz(lhs, merge, &[lhs]),
        };
        self.builder.ins().jump(rhs_block, &[]);

        self.builder.switch_to_block(rhs_block);
        let rhs = self.value(right)?;
        self.builder.ins().jump(merge, &[rhs]);

        self.builder.switch_to_block(merge);
        Ok(self.builder.block_params(merge)[0])
    }

    fn translate_conditional(
        &mut self,
        condition: &HlirExpr,
        then_branch: &HlirExpr,
        else_branch: Option<&HlirExpr>,
    ) -> Result<(), JitError> {
        let condition = self.value(condition)?;
        let then_block = self.builder.create_block();
        let merge = self.builder.create_block();
        let else_block = match else_branch {
            Some(_) => self.builder.create_block(),
            None => merge,
        };

        self.builder.ins().brz(condition, else_block, &[]);
        self.builder.ins().jump(then_block, &[]);

        self.builder.switch_to_block(then_block);
        self.translate(then_branch)?;
        self.builder.ins().jump(merge, &[]);

        if let Some(else_branch) = else_branch {
            self.builder.switch_to_block(else_block);
            self.translate(else_branch)?;
            self.builder.ins().jump(merge, &[]);
        }

        self.builder.switch_to_block(merge);
        Ok(())
    }
}

/// A natively compiled form. Invoking it runs the machine code against the
/// given store; it can be invoked any number of times.
pub struct JitFunction {
    module: Option<JITModule>,
    code: *const u8,
    names: Vec<EcoString>,
    /// Number literals, indexed by the handles baked into the code.
    constants: Vec<Decimal>,
    result: Type,
}

impl JitFunction {
    pub fn result_type(&self) -> Type {
        self.result
    }

    pub fn invoke(&self, store: &mut dyn GlobalStore) -> Result<hlir::Value, JitError> {
        let mut env = JitEnv {
            store,
            names: &self.names,
            numbers: self.constants.clone(),
            error: None,
        };
        let env_ptr = &mut env as *mut JitEnv<'_> as *mut u8;

        // The signature was built from `self.result` in `Jit::compile`.
        let value = unsafe {
            match self.result {
                Type::Number => {
                    let code: extern "C" fn(*mut u8) -> i64 = std::mem::transmute(self.code);
                    let handle = code(env_ptr);
                    hlir::Value::Number(env.number(handle).unwrap_or_default())
                }
                Type::Boolean => {
                    let code: extern "C" fn(*mut u8) -> i8 = std::mem::transmute(self.code);
                    hlir::Value::Boolean(code(env_ptr) != 0)
                }
                Type::Void => {
                    let code: extern "C" fn(*mut u8) = std::mem::transmute(self.code);
                    code(env_ptr);
                    hlir::Value::Void
                }
                Type::String => return Err(JitError::Unsupported(Type::String)),
            }
        };

        match env.error.take() {
            Some(error) => Err(error.into()),
            None => Ok(value),
        }
    }
}

impl Drop for JitFunction {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // `code` points into this module and is never called after drop.
            unsafe { module.free_memory() };
        }
    }
}

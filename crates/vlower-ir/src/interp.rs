//! Reference evaluator
//!
//! A small tree-walking interpreter over the IR. It gives the IR an
//! executable meaning so a program can be run before and after lowering
//! and the results compared.

use crate::ir::*;
use crate::program::Program;
use log::trace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use vlower_types::{DeclId, LocalId};

const MAX_CALL_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum InterpError {
    #[error("`{0}` has no body")]
    MissingBody(String),
    #[error("`{0}` is not a function")]
    NotAFunction(String),
    #[error("field `{0}` read before initialization")]
    UninitializedField(String),
    #[error("member access on a non-object value")]
    NotAnObject,
    #[error("type error: {0}")]
    TypeMismatch(String),
    #[error("unsupported during evaluation: {0}")]
    Unsupported(String),
    #[error("call depth limit exceeded")]
    StackOverflow,
}

#[derive(Debug)]
pub struct Object {
    pub class: DeclId,
    pub fields: HashMap<DeclId, Value>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Object(Rc<RefCell<Object>>),
    Function(DeclId),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

struct Frame {
    this: Option<Value>,
    params: Vec<Value>,
    locals: HashMap<LocalId, Value>,
}

impl Frame {
    fn new(this: Option<Value>, params: Vec<Value>) -> Self {
        Self { this, params, locals: HashMap::new() }
    }
}

pub struct Interpreter<'p> {
    program: &'p Program,
    statics: HashMap<DeclId, Value>,
    output: Vec<String>,
    depth: usize,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self { program, statics: HashMap::new(), output: Vec::new(), depth: 0 }
    }

    /// Lines printed so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Call a function with already evaluated arguments.
    ///
    /// Calls with a receiver dispatch virtually on the receiver's class.
    pub fn call(
        &mut self,
        function: DeclId,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value, InterpError> {
        let target = match &receiver {
            Some(Value::Object(obj)) => self.dispatch(obj.borrow().class, function),
            _ => function,
        };
        let target = self.program.resolve_fake_override(target).unwrap_or(target);
        let decl = self.program.get(target);
        let func = decl
            .as_function()
            .ok_or_else(|| InterpError::NotAFunction(self.program.qualified_name(target)))?;
        if func.is_constructor() {
            return self.construct(target, args);
        }
        let body = func
            .body
            .clone()
            .ok_or_else(|| InterpError::MissingBody(self.program.qualified_name(target)))?;

        trace!("call {}", self.program.qualified_name(target));
        let mut frame = Frame::new(receiver, args);
        self.enter()?;
        let result = self.run_body(&body, &mut frame);
        self.depth -= 1;
        result
    }

    /// Instantiate a class through its constructor.
    pub fn construct(&mut self, constructor: DeclId, args: Vec<Value>) -> Result<Value, InterpError> {
        let decl = self.program.get(constructor);
        let func = decl
            .as_function()
            .ok_or_else(|| InterpError::NotAFunction(self.program.qualified_name(constructor)))?;
        if !func.is_primary_constructor() {
            return Err(InterpError::Unsupported(format!(
                "secondary constructor `{}`",
                self.program.qualified_name(constructor)
            )));
        }
        let class = decl
            .parent
            .ok_or_else(|| InterpError::Unsupported("constructor without a class".into()))?;

        let object = Rc::new(RefCell::new(Object { class, fields: HashMap::new() }));
        let mut frame = Frame::new(Some(Value::Object(Rc::clone(&object))), args);
        self.enter()?;
        let result = self.initialize(class, func.body.as_ref(), &object, &mut frame);
        self.depth -= 1;
        result.map(|()| Value::Object(object))
    }

    /// Field initializers and init blocks in member order, then the
    /// constructor body.
    fn initialize(
        &mut self,
        class: DeclId,
        body: Option<&Body>,
        object: &Rc<RefCell<Object>>,
        frame: &mut Frame,
    ) -> Result<(), InterpError> {
        for member in self.program.members(class) {
            let member = self.program.get(member);
            match &member.kind {
                DeclKind::Field(field) if !field.is_static => {
                    if let Some(init) = &field.initializer {
                        let value = self.eval(init, frame)?;
                        object.borrow_mut().fields.insert(member.id, value);
                    }
                }
                DeclKind::Initializer(init) => {
                    self.run_block(&init.body, frame)?;
                }
                _ => {}
            }
        }
        if let Some(body) = body {
            self.run_body(body, frame)?;
        }
        Ok(())
    }

    /// Structural equality for value classes, identity for other objects.
    pub fn values_equal(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Unit, Value::Unit) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.class != b.class || !self.program.is_value_class(a.class) {
                    return false;
                }
                self.program.fields(a.class).iter().all(|f| {
                    match (a.fields.get(f), b.fields.get(f)) {
                        (Some(x), Some(y)) => self.values_equal(x, y),
                        (None, None) => true,
                        _ => false,
                    }
                })
            }
            _ => false,
        }
    }

    /// Render a value the way `print` shows it.
    pub fn render(&self, value: &Value) -> String {
        match value {
            Value::Unit => "Unit".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Str(s) => s.clone(),
            Value::Function(f) => format!("::{}", self.program.qualified_name(*f)),
            Value::Object(obj) => {
                let obj = obj.borrow();
                let fields: Vec<String> = self
                    .program
                    .fields(obj.class)
                    .iter()
                    .filter_map(|f| {
                        let v = obj.fields.get(f)?;
                        Some(format!("{}={}", self.program.get(*f).name, self.render(v)))
                    })
                    .collect();
                format!("{}({})", self.program.get(obj.class).name, fields.join(", "))
            }
        }
    }

    fn enter(&mut self) -> Result<(), InterpError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(InterpError::StackOverflow);
        }
        self.depth += 1;
        Ok(())
    }

    /// Most derived member of `class` that overrides `function`.
    fn dispatch(&self, class: DeclId, function: DeclId) -> DeclId {
        self.program
            .members(class)
            .into_iter()
            .find(|m| *m == function || self.program.overrides(*m, function))
            .unwrap_or(function)
    }

    fn run_body(&mut self, body: &Body, frame: &mut Frame) -> Result<Value, InterpError> {
        match body {
            Body::Expr(expr) => self.eval(expr, frame),
            Body::Block(stmts) => Ok(self.run_block(stmts, frame)?.unwrap_or(Value::Unit)),
        }
    }

    /// Returns `Some` when a `return` was executed.
    fn run_block(&mut self, stmts: &[Stmt], frame: &mut Frame) -> Result<Option<Value>, InterpError> {
        for stmt in stmts {
            match stmt {
                Stmt::Let { id, init, .. } => {
                    let value = self.eval(init, frame)?;
                    frame.locals.insert(*id, value);
                }
                Stmt::Expr { expr } => {
                    self.eval(expr, frame)?;
                }
                Stmt::Return { value } => {
                    let value = match value {
                        Some(expr) => self.eval(expr, frame)?,
                        None => Value::Unit,
                    };
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    fn read(&self, value: &ValueRef, frame: &Frame) -> Result<Value, InterpError> {
        let found = match value {
            ValueRef::This => frame.this.clone(),
            ValueRef::Param(i) => frame.params.get(*i).cloned(),
            ValueRef::Local(id) => frame.locals.get(id).cloned(),
        };
        found.ok_or_else(|| InterpError::TypeMismatch(format!("unbound value {:?}", value)))
    }

    fn eval(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Value, InterpError> {
        match expr {
            Expr::Const { value } => Ok(match value {
                Literal::Unit => Value::Unit,
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Double(d) => Value::Double(*d),
                Literal::String(s) => Value::Str(s.clone()),
            }),
            Expr::Get { value } => self.read(value, frame),
            Expr::Set { target, value } => {
                let value = self.eval(value, frame)?;
                match target {
                    ValueRef::Param(i) if *i < frame.params.len() => frame.params[*i] = value,
                    ValueRef::Local(id) => {
                        frame.locals.insert(*id, value);
                    }
                    other => {
                        return Err(InterpError::TypeMismatch(format!("cannot assign {:?}", other)))
                    }
                }
                Ok(Value::Unit)
            }
            Expr::GetField { field, receiver } => match receiver {
                None => Ok(self.statics.get(field).cloned().unwrap_or(Value::Null)),
                Some(receiver) => {
                    let Value::Object(obj) = self.eval(receiver, frame)? else {
                        return Err(InterpError::NotAnObject);
                    };
                    let value = obj.borrow().fields.get(field).cloned();
                    value.ok_or_else(|| {
                        InterpError::UninitializedField(self.program.qualified_name(*field))
                    })
                }
            },
            Expr::SetField { field, receiver, value } => {
                let target = match receiver {
                    Some(receiver) => Some(self.eval(receiver, frame)?),
                    None => None,
                };
                let value = self.eval(value, frame)?;
                match target {
                    None => {
                        self.statics.insert(*field, value);
                    }
                    Some(Value::Object(obj)) => {
                        obj.borrow_mut().fields.insert(*field, value);
                    }
                    Some(_) => return Err(InterpError::NotAnObject),
                }
                Ok(Value::Unit)
            }
            Expr::Call { function, receiver, args, .. } => {
                let receiver = match receiver {
                    Some(r) => Some(self.eval(r, frame)?),
                    None => None,
                };
                let args = self.eval_all(args, frame)?;
                self.call(*function, receiver, args)
            }
            Expr::ConstructorCall { constructor, args, .. } => {
                let args = self.eval_all(args, frame)?;
                self.construct(*constructor, args)
            }
            Expr::FunctionReference { function } => Ok(Value::Function(*function)),
            Expr::Equals { left, right } => {
                let left = self.eval(left, frame)?;
                let right = self.eval(right, frame)?;
                Ok(Value::Bool(self.values_equal(&left, &right)))
            }
            Expr::AndAnd { left, right } => {
                if !self.eval_bool(left, frame)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_bool(right, frame)?))
            }
            Expr::Intrinsic { op, args } => {
                let args = self.eval_all(args, frame)?;
                self.intrinsic(*op, args)
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], frame: &mut Frame) -> Result<Vec<Value>, InterpError> {
        exprs.iter().map(|e| self.eval(e, frame)).collect()
    }

    fn eval_bool(&mut self, expr: &Expr, frame: &mut Frame) -> Result<bool, InterpError> {
        self.eval(expr, frame)?
            .as_bool()
            .ok_or_else(|| InterpError::TypeMismatch("expected a boolean".into()))
    }

    fn intrinsic(&mut self, op: Intrinsic, args: Vec<Value>) -> Result<Value, InterpError> {
        match op {
            Intrinsic::Add | Intrinsic::Sub => {
                let ints: Option<Vec<i64>> = args.iter().map(Value::as_int).collect();
                let ints = ints.ok_or_else(|| InterpError::TypeMismatch("expected integers".into()))?;
                let result = match op {
                    Intrinsic::Add => ints.iter().sum(),
                    _ => match ints.split_first() {
                        Some((first, rest)) => rest.iter().fold(*first, |acc, v| acc - v),
                        None => 0,
                    },
                };
                Ok(Value::Int(result))
            }
            Intrinsic::Concat => Ok(Value::Str(args.iter().map(|v| self.render(v)).collect())),
            Intrinsic::Print => {
                let line: Vec<String> = args.iter().map(|v| self.render(v)).collect();
                self.output.push(line.join(" "));
                Ok(Value::Unit)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "Unit"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
            Value::Object(obj) => write!(f, "<object {}>", obj.borrow().class),
            Value::Function(id) => write!(f, "<function {}>", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use vlower_types::Type;

    #[test]
    fn test_construct_and_structural_equality() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let main = b.function(
            "main",
            &[],
            Type::Boolean,
            Body::Expr(Expr::equals(
                Expr::construct(point.constructor, vec![Expr::int(1), Expr::int(2)]),
                Expr::construct(point.constructor, vec![Expr::int(1), Expr::int(2)]),
            )),
        );
        let program = b.finish();
        let mut interp = Interpreter::new(&program);
        assert_eq!(interp.call(main, None, vec![]).unwrap().as_bool(), Some(true));
    }

    #[test]
    fn test_init_blocks_run_in_member_order() {
        let mut b = ProgramBuilder::new();
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        b.init_block(
            point.class,
            vec![Stmt::expr(Expr::intrinsic(
                Intrinsic::Print,
                vec![Expr::get_field(point.fields[1], Expr::this())],
            ))],
        );
        let program = b.finish();
        let mut interp = Interpreter::new(&program);
        let value = interp
            .construct(point.constructor, vec![Value::Int(3), Value::Int(4)])
            .unwrap();
        assert_eq!(interp.output(), ["4"]);
        assert_eq!(interp.render(&value), "Point(x=3, y=4)");
    }

    #[test]
    fn test_fake_override_dispatches_to_interface_body() {
        let mut b = ProgramBuilder::new();
        let shape = b.interface("Shape");
        let area = b.method(shape, "area", &[], Type::Int, Some(Body::Expr(Expr::int(7))));
        let point = b.value_class("Point", &[("x", Type::Int), ("y", Type::Int)]);
        let fake = b.fake_override(point.class, area);
        let program = b.finish();

        let mut interp = Interpreter::new(&program);
        let p = interp
            .construct(point.constructor, vec![Value::Int(1), Value::Int(2)])
            .unwrap();
        assert_eq!(interp.call(fake, Some(p.clone()), vec![]).unwrap().as_int(), Some(7));
        assert_eq!(interp.call(area, Some(p), vec![]).unwrap().as_int(), Some(7));
    }

    #[test]
    fn test_runaway_recursion_is_reported() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], Type::Int, Body::Expr(Expr::int(0)));
        b.configure(f, |func| func.body = Some(Body::Expr(Expr::call(f, vec![]))));
        let program = b.finish();
        let mut interp = Interpreter::new(&program);
        assert_eq!(interp.call(f, None, vec![]).unwrap_err(), InterpError::StackOverflow);
    }
}

//! Expression evaluation
//!
//! Expressions and command scripts run against a composed scope: resolved
//! variables, integration namespaces, the math library and, for commands
//! only, the mutation primitives. Text goes through placeholder expansion
//! and await sequencing before it is parsed; evaluation is strictly
//! left-to-right and every deferred call is awaited where it appears.

use crate::ast::*;
use crate::error::{EngineError, Result};
use crate::integration::IntegrationSet;
use crate::math::{MathLibrary, MATH_NAMESPACE};
use crate::parser::parse_program;
use crate::sequencer::{AwaitSequencer, SequencingMode};
use crate::store::ResolvedScope;
use crate::template::{PlaceholderExpander, PlaceholderMode};
use crate::value::Value;
use futures_util::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Everything an evaluation needs besides the scope it reads. Owned by the
/// engine; the sequencer cache lives here so each engine has its own.
#[derive(Default)]
pub struct Runtime {
    pub integrations: IntegrationSet,
    pub sequencer: AwaitSequencer,
    pub math: MathLibrary,
    pub placeholders: PlaceholderExpander,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_integrations(integrations: IntegrationSet) -> Self {
        Self {
            integrations,
            ..Self::default()
        }
    }

    /// Parses `text` the way it would be evaluated, without running it.
    /// Placeholders are replaced by `null`.
    pub fn check_syntax(&self, text: &str, mode: SequencingMode) -> Result<()> {
        let sequenced = self.sequencer.rewrite(&self.integrations, text, mode);
        let source = if PlaceholderExpander::has_placeholders(&sequenced) {
            let lookup = |_: &str| Some(Value::Null);
            self.placeholders.expand(&sequenced, &lookup, PlaceholderMode::SourceLiteral)?
        } else {
            sequenced
        };
        parse_program(&source).map(|_| ())
    }
}

/// `setValue` / `addValue`, provided by a command session.
pub trait MutationPrimitives {
    fn set_value(&self, name: String, value: Value) -> LocalBoxFuture<'_, Result<Value>>;
    fn add_value(&self, name: String, delta: Value) -> LocalBoxFuture<'_, Result<Value>>;
}

/// Per-call evaluation context; built fresh for every evaluation.
pub struct EvalContext<'a> {
    pub runtime: &'a Runtime,
    pub scope: &'a RefCell<ResolvedScope>,
    pub declared: &'a HashSet<String>,
    pub primitives: Option<&'a dyn MutationPrimitives>,
}

pub struct Evaluator<'a> {
    ctx: EvalContext<'a>,
    locals: RefCell<HashMap<String, Value>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: EvalContext<'a>) -> Self {
        Self {
            ctx,
            locals: RefCell::new(HashMap::new()),
        }
    }

    /// Sequences awaits, expands placeholders, parses and runs `text`.
    /// The value of a program is the value of its last statement.
    pub async fn evaluate(&self, text: &str, mode: SequencingMode) -> Result<Value> {
        let runtime = self.ctx.runtime;
        // Placeholder values are literals and never contain a call site
        let sequenced = runtime.sequencer.rewrite(&runtime.integrations, text, mode);
        let source = if PlaceholderExpander::has_placeholders(&sequenced) {
            let lookup = |name: &str| self.lookup_declared(name);
            runtime.placeholders.expand(&sequenced, &lookup, PlaceholderMode::SourceLiteral)?
        } else {
            sequenced
        };

        let program = parse_program(&source)?;
        self.run_program(&program).await
    }

    pub async fn run_program(&self, program: &Program) -> Result<Value> {
        let mut last = Value::Null;
        for statement in &program.statements {
            match statement {
                Statement::Let { name, value } => {
                    let value = self.eval(value).await?;
                    self.locals.borrow_mut().insert(name.clone(), value);
                    last = Value::Null;
                }
                Statement::Expr(expr) => {
                    last = self.eval(expr).await?;
                }
            }
        }
        Ok(last)
    }

    fn eval<'b>(&'b self, expr: &'b Expr) -> LocalBoxFuture<'b, Result<Value>> {
        async move {
            match expr {
                Expr::Number(n) => Ok(Value::Number(*n)),
                Expr::String(s) => Ok(Value::String(s.clone())),
                Expr::Boolean(b) => Ok(Value::Bool(*b)),
                Expr::Null => Ok(Value::Null),
                Expr::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item).await?);
                    }
                    Ok(Value::Array(values))
                }
                Expr::Template(parts) => {
                    let mut text = String::new();
                    for part in parts {
                        match part {
                            TemplatePart::Text(t) => text.push_str(t),
                            TemplatePart::Expr(e) => text.push_str(&self.eval(e).await?.to_display_string()),
                        }
                    }
                    Ok(Value::String(text))
                }
                Expr::Identifier(name) => self.lookup_identifier(name),
                Expr::This => Err(EngineError::evaluation("'this' can only be used to access variables")),
                Expr::Member { object, property } => self.eval_member(object, property).await,
                Expr::Index { object, index } => self.eval_index(object, index).await,
                Expr::Call { callee, args } => self.call(callee, args, false).await,
                Expr::Await(inner) => match inner.as_ref() {
                    Expr::Call { callee, args } => self.call(callee, args, true).await,
                    other => self.eval(other).await,
                },
                Expr::Unary { op, operand } => {
                    let value = self.eval(operand).await?;
                    Ok(match op {
                        UnaryOp::Negate => Value::Number(-value.to_number()),
                        UnaryOp::Plus => Value::Number(value.to_number()),
                        UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    })
                }
                Expr::Binary { op: BinaryOp::And, left, right } => {
                    let left = self.eval(left).await?;
                    if left.is_truthy() {
                        self.eval(right).await
                    } else {
                        Ok(left)
                    }
                }
                Expr::Binary { op: BinaryOp::Or, left, right } => {
                    let left = self.eval(left).await?;
                    if left.is_truthy() {
                        Ok(left)
                    } else {
                        self.eval(right).await
                    }
                }
                Expr::Binary { op, left, right } => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    Ok(apply_binary(*op, &left, &right))
                }
                Expr::Ternary {
                    condition,
                    true_value,
                    false_value,
                } => {
                    if self.eval(condition).await?.is_truthy() {
                        self.eval(true_value).await
                    } else {
                        self.eval(false_value).await
                    }
                }
            }
        }
        .boxed_local()
    }

    /// Current value of a declared variable, null while unresolved.
    fn lookup_declared(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.ctx.scope.borrow().get(name) {
            return Some(value.clone());
        }
        self.ctx.declared.contains(name).then_some(Value::Null)
    }

    fn lookup_variable(&self, name: &str) -> Result<Value> {
        self.lookup_declared(name)
            .ok_or_else(|| EngineError::evaluation(format!("'{}' is not a declared variable", name)))
    }

    fn lookup_identifier(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.locals.borrow().get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.lookup_declared(name) {
            return Ok(value);
        }
        if let Some(constant) = self.ctx.runtime.math.constant(name) {
            return Ok(constant);
        }
        if self.ctx.runtime.integrations.contains(name) {
            return Err(EngineError::evaluation(format!(
                "'{}' is an integration namespace, not a value",
                name
            )));
        }
        Err(EngineError::evaluation(format!("'{}' is not defined", name)))
    }

    /// Whether a bare name refers to a value rather than a namespace or
    /// library function.
    fn is_shadowed(&self, name: &str) -> bool {
        self.locals.borrow().contains_key(name) || self.lookup_declared(name).is_some()
    }

    async fn eval_member(&self, object: &Expr, property: &str) -> Result<Value> {
        match object {
            Expr::This => return self.lookup_variable(property),
            Expr::Identifier(ns) if !self.is_shadowed(ns) => {
                if ns == MATH_NAMESPACE {
                    return self.ctx.runtime.math.constant(property).ok_or_else(|| {
                        EngineError::evaluation(format!("{}.{} is not a constant", ns, property))
                    });
                }
                if self.ctx.runtime.integrations.contains(ns) {
                    return Err(EngineError::evaluation(format!(
                        "{}.{} is an operation and must be called",
                        ns, property
                    )));
                }
            }
            _ => {}
        }

        let value = self.eval(object).await?;
        match (&value, property) {
            (Value::String(s), "length") => Ok(Value::Number(s.chars().count() as f64)),
            (Value::Array(items), "length") => Ok(Value::Number(items.len() as f64)),
            _ => Err(EngineError::evaluation(format!(
                "{} has no property '{}'",
                value.type_name(),
                property
            ))),
        }
    }

    async fn eval_index(&self, object: &Expr, index: &Expr) -> Result<Value> {
        if matches!(object, Expr::This) {
            let key = self.eval(index).await?;
            return self.lookup_variable(&key.to_display_string());
        }

        let value = self.eval(object).await?;
        let key = self.eval(index).await?;
        let position = key.to_number();
        if position.is_nan() || position < 0.0 || position.fract() != 0.0 {
            return Ok(Value::Null);
        }
        let position = position as usize;
        Ok(match value {
            Value::Array(items) => items.get(position).cloned().unwrap_or(Value::Null),
            Value::String(s) => s
                .chars()
                .nth(position)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
            other => {
                return Err(EngineError::evaluation(format!(
                    "cannot index into {}",
                    other.type_name()
                )))
            }
        })
    }

    async fn eval_arguments(&self, args: &[Expr]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg).await?);
        }
        Ok(values)
    }

    async fn call(&self, callee: &Expr, args: &[Expr], awaited: bool) -> Result<Value> {
        match callee {
            Expr::Identifier(name) => self.call_function(name, args, awaited).await,
            Expr::Member { object, property } => match object.as_ref() {
                Expr::Identifier(ns) if !self.is_shadowed(ns) => {
                    self.call_operation(ns, property, args, awaited).await
                }
                _ => Err(EngineError::evaluation(format!(
                    "'{}' is not a function",
                    property
                ))),
            },
            _ => Err(EngineError::evaluation("expression is not callable")),
        }
    }

    async fn call_function(&self, name: &str, args: &[Expr], awaited: bool) -> Result<Value> {
        if let Some(primitives) = self.ctx.primitives {
            if name == "setValue" || name == "addValue" {
                if !awaited {
                    return Err(EngineError::evaluation(format!("{}() must be awaited", name)));
                }
                let mut values = self.eval_arguments(args).await?.into_iter();
                let target = match values.next() {
                    Some(Value::String(target)) => target,
                    other => {
                        return Err(EngineError::evaluation(format!(
                            "{}() expects a variable name, got {}",
                            name,
                            other.map_or("nothing", |v| v.type_name())
                        )))
                    }
                };
                let argument = values.next().unwrap_or(Value::Null);
                return if name == "setValue" {
                    primitives.set_value(target, argument).await
                } else {
                    primitives.add_value(target, argument).await
                };
            }
        }

        if self.is_shadowed(name) {
            return Err(EngineError::evaluation(format!("'{}' is not a function", name)));
        }
        if self.ctx.runtime.math.has_function(name) {
            let values = self.eval_arguments(args).await?;
            return self.ctx.runtime.math.call(name, &values);
        }
        Err(EngineError::evaluation(format!("'{}' is not defined", name)))
    }

    async fn call_operation(&self, ns: &str, op_name: &str, args: &[Expr], awaited: bool) -> Result<Value> {
        if ns == MATH_NAMESPACE && !self.ctx.runtime.integrations.contains(ns) {
            let values = self.eval_arguments(args).await?;
            return self.ctx.runtime.math.call(op_name, &values);
        }

        let integration = self
            .ctx
            .runtime
            .integrations
            .get(ns)
            .ok_or_else(|| EngineError::evaluation(format!("'{}' is not defined", ns)))?;
        let operation = integration
            .operation(op_name)
            .ok_or_else(|| EngineError::evaluation(format!("{}.{} is not a function", ns, op_name)))?;

        if operation.is_async && !awaited {
            return Err(EngineError::evaluation(format!(
                "deferred call {}.{}() must be awaited",
                ns, op_name
            )));
        }

        let values = self.eval_arguments(args).await?;
        log::trace!("Calling {}.{} with {} argument(s)", ns, op_name, values.len());

        let result = match operation.call_immediate(&values) {
            Some(result) => result,
            None => operation.invoke(values).await,
        };
        result.map_err(|e| match e {
            EngineError::Integration { .. } => e,
            other => EngineError::integration(ns, op_name, other.to_string()),
        })
    }
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::String(_) | Value::Array(_), _) | (_, Value::String(_) | Value::Array(_)) => {
                Value::String(format!("{}{}", left.to_display_string(), right.to_display_string()))
            }
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Subtract => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Multiply => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Divide => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Remainder => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Equal => Value::Bool(left.loose_eq(right)),
        BinaryOp::NotEqual => Value::Bool(!left.loose_eq(right)),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            Value::Bool(match ordering {
                None => false,
                Some(ordering) => match op {
                    BinaryOp::Less => ordering.is_lt(),
                    BinaryOp::LessEqual => ordering.is_le(),
                    BinaryOp::Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                },
            })
        }
        // Short-circuit operators are handled before operands are evaluated
        BinaryOp::And | BinaryOp::Or => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::Integration;
    use std::cell::Cell;
    use std::rc::Rc;

    fn runtime() -> Runtime {
        let mut integrations = IntegrationSet::new();
        integrations.register(
            Integration::new("Integration")
                .deferred("get", |args: Vec<Value>| async move {
                    match args.first().and_then(Value::as_str) {
                        Some("k") => Ok(Value::Number(41.0)),
                        _ => Err(EngineError::integration("Integration", "get", "no such key")),
                    }
                })
                .immediate("echo", |args| Ok(args.first().cloned().unwrap_or(Value::Null))),
        );
        Runtime::with_integrations(integrations)
    }

    async fn eval_with(runtime: &Runtime, scope: ResolvedScope, text: &str) -> Result<Value> {
        let declared: HashSet<String> = scope.keys().cloned().collect();
        let scope = RefCell::new(scope);
        let evaluator = Evaluator::new(EvalContext {
            runtime,
            scope: &scope,
            declared: &declared,
            primitives: None,
        });
        evaluator.evaluate(text, SequencingMode::Expression).await
    }

    async fn eval(text: &str) -> Result<Value> {
        eval_with(&runtime(), ResolvedScope::new(), text).await
    }

    #[tokio::test]
    async fn test_arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3").await.unwrap(), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3").await.unwrap(), Value::Number(9.0));
        assert_eq!(eval("7 % 4 - -1").await.unwrap(), Value::Number(4.0));
        assert_eq!(eval("1 / 0").await.unwrap(), Value::Number(f64::INFINITY));
    }

    #[tokio::test]
    async fn test_strings_and_templates() {
        assert_eq!(eval("'a' + 1").await.unwrap(), Value::from("a1"));
        assert_eq!(eval("`x=${1 + 1}`").await.unwrap(), Value::from("x=2"));
        assert_eq!(eval("'abc'.length").await.unwrap(), Value::Number(3.0));
        assert_eq!(eval("[1, 2, 3][1]").await.unwrap(), Value::Number(2.0));
    }

    #[tokio::test]
    async fn test_logic_and_ternary() {
        assert_eq!(eval("1 < 2 && 'yes'").await.unwrap(), Value::from("yes"));
        assert_eq!(eval("0 || 'fallback'").await.unwrap(), Value::from("fallback"));
        assert_eq!(eval("2 >= 3 ? 'a' : 'b'").await.unwrap(), Value::from("b"));
        assert_eq!(eval("'2' == 2").await.unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn test_math_library() {
        assert_eq!(eval("Math.floor(2.9) + floor(1.5)").await.unwrap(), Value::Number(3.0));
        assert_eq!(eval("max(1, 8, 3)").await.unwrap(), Value::Number(8.0));
        assert_eq!(eval("Math.PI > 3").await.unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn test_variables_through_this_and_bare_names() {
        let mut scope = ResolvedScope::new();
        scope.insert("a".to_string(), Value::Number(2.0));
        let value = eval_with(&runtime(), scope, "this.a * 2 + a + this['a']").await.unwrap();
        assert_eq!(value, Value::Number(8.0));
    }

    #[tokio::test]
    async fn test_explicit_await_is_numeric_not_concatenation() {
        let value = eval("(await Integration.get('k')) + 1").await.unwrap();
        assert_eq!(value, Value::Number(42.0));
    }

    #[tokio::test]
    async fn test_missing_await_is_inserted() {
        let value = eval("Integration.get('k') + 1").await.unwrap();
        assert_eq!(value, Value::Number(42.0));
    }

    #[tokio::test]
    async fn test_unsequenced_program_is_rejected() {
        let runtime = runtime();
        let scope = RefCell::new(ResolvedScope::new());
        let declared = HashSet::new();
        let evaluator = Evaluator::new(EvalContext {
            runtime: &runtime,
            scope: &scope,
            declared: &declared,
            primitives: None,
        });
        let program = parse_program("Integration.get('k') + 1").unwrap();
        assert!(evaluator.run_program(&program).await.is_err());
    }

    #[tokio::test]
    async fn test_failures() {
        assert!(matches!(eval("missing + 1").await, Err(EngineError::Evaluation { .. })));
        assert!(matches!(eval("1 +").await, Err(EngineError::Parse { .. })));
        assert!(matches!(
            eval("Integration.get('nope')").await,
            Err(EngineError::Integration { .. })
        ));
        assert!(eval("Integration.missing()").await.is_err());
        assert!(eval("setValue('a', 1)").await.is_err());
    }

    #[tokio::test]
    async fn test_let_locals() {
        let value = eval("let x = Integration.echo(5); x * 2").await.unwrap();
        assert_eq!(value, Value::Number(10.0));
    }

    #[tokio::test]
    async fn test_deferred_calls_run_left_to_right() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut integrations = IntegrationSet::new();
        let calls = Rc::new(Cell::new(0));
        {
            let log = Rc::clone(&log);
            let calls = Rc::clone(&calls);
            integrations.register(Integration::new("Seq").deferred("next", move |args: Vec<Value>| {
                calls.set(calls.get() + 1);
                log.borrow_mut().push(args[0].to_display_string());
                let n = calls.get() as f64;
                async move { Ok(Value::Number(n)) }
            }));
        }
        let runtime = Runtime::with_integrations(integrations);
        let value = eval_with(&runtime, ResolvedScope::new(), "Seq.next('a') * 10 + Seq.next('b')")
            .await
            .unwrap();
        assert_eq!(value, Value::Number(12.0));
        assert_eq!(*log.borrow(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_placeholders_in_expressions() {
        let mut scope = ResolvedScope::new();
        scope.insert("name".to_string(), Value::from("Ayla"));
        let value = eval_with(&runtime(), scope, "{name} + '!'").await.unwrap();
        assert_eq!(value, Value::from("Ayla!"));
    }

    #[tokio::test]
    async fn test_non_finite_placeholders_keep_their_value() {
        let mut scope = ResolvedScope::new();
        scope.insert("x".to_string(), Value::Number(f64::INFINITY));
        scope.insert("low".to_string(), Value::Number(f64::NEG_INFINITY));
        scope.insert("odd".to_string(), Value::Number(f64::NAN));
        scope.insert("list".to_string(), Value::Array(vec![Value::Number(f64::INFINITY)]));
        let runtime = runtime();

        let braced = eval_with(&runtime, scope.clone(), "{x} + 1").await.unwrap();
        assert_eq!(braced, Value::Number(f64::INFINITY));
        let low = eval_with(&runtime, scope.clone(), "{low} * 2").await.unwrap();
        assert_eq!(low, Value::Number(f64::NEG_INFINITY));
        let odd = eval_with(&runtime, scope.clone(), "{odd} + 1").await.unwrap();
        assert!(odd.as_number().map_or(false, f64::is_nan));
        let element = eval_with(&runtime, scope, "{list}[0]").await.unwrap();
        assert_eq!(element, Value::Number(f64::INFINITY));
    }

    #[tokio::test]
    async fn test_changing_values_do_not_grow_the_rewrite_cache() {
        let runtime = runtime();
        for i in 0..50 {
            let mut scope = ResolvedScope::new();
            scope.insert("n".to_string(), Value::Number(i as f64));
            let value = eval_with(&runtime, scope, "{n} + Integration.get('k')").await.unwrap();
            assert_eq!(value, Value::Number(i as f64 + 41.0));
        }
        assert_eq!(runtime.sequencer.cached_rewrites(), 1);
    }

    #[tokio::test]
    async fn test_template_text_stays_literal() {
        let value = eval("`call Integration.get(1) now`").await.unwrap();
        assert_eq!(value, Value::from("call Integration.get(1) now"));
    }
}

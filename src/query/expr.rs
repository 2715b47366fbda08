//! Expressions for quals and projections, and their evaluator

use super::binding::{ParamId, ParamSlot, ParamTable};
use crate::error::{ExecError, Result};
use crate::types::{ColumnType, Schema, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference by position in the input row
    Column(usize),

    /// Literal value
    Literal(Value),

    /// Scalar query parameter
    Param(ParamId),

    /// Binary operation
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },

    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expr>,
    },

    /// IS [NOT] NULL
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,   // =
    Ne,   // !=
    Lt,   // <
    Gt,   // >
    Le,   // <=
    Ge,   // >=

    // Logical
    And,
    Or,

    // Arithmetic
    Add,  // +
    Sub,  // -
    Mul,  // *
    Div,  // /
    Mod,  // %

    // String
    Concat, // ||
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

impl BinaryOperator {
    fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Lt
                | BinaryOperator::Gt
                | BinaryOperator::Le
                | BinaryOperator::Ge
        )
    }
}

// Builders, so plans in tests and benches read like SQL
impl Expr {
    pub fn col(index: usize) -> Self {
        Expr::Column(index)
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn param(id: ParamId) -> Self {
        Expr::Param(id)
    }

    pub fn binary(self, op: BinaryOperator, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn equals(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Eq, right)
    }

    pub fn lt(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Lt, right)
    }

    pub fn le(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Le, right)
    }

    pub fn gt(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Gt, right)
    }

    pub fn and(self, right: Expr) -> Self {
        self.binary(BinaryOperator::And, right)
    }

    pub fn or(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Or, right)
    }

    pub fn add(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Add, right)
    }

    pub fn sub(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Sub, right)
    }

    pub fn mul(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Mul, right)
    }

    pub fn modulo(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Mod, right)
    }

    pub fn concat(self, right: Expr) -> Self {
        self.binary(BinaryOperator::Concat, right)
    }

    pub fn not(self) -> Self {
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(self),
        }
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// Highest column index referenced, if any
    pub fn max_column(&self) -> Option<usize> {
        match self {
            Expr::Column(i) => Some(*i),
            Expr::Literal(_) | Expr::Param(_) => None,
            Expr::BinaryOp { left, right, .. } => match (left.max_column(), right.max_column()) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
            Expr::UnaryOp { expr, .. } | Expr::IsNull { expr, .. } => expr.max_column(),
        }
    }
}

/// Expression evaluator - evaluates expressions against rows
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl ExprEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `expr` against `row`
    pub fn eval(&self, expr: &Expr, row: &[Value], params: &ParamTable) -> Result<Value> {
        match expr {
            Expr::Column(i) => row.get(*i).cloned().ok_or_else(|| {
                ExecError::ColumnNotFound(format!("column #{} (row has {} columns)", i, row.len()))
            }),

            Expr::Literal(v) => Ok(v.clone()),

            Expr::Param(id) => self.param_value(*id, params),

            Expr::BinaryOp { left, op, right } => {
                // AND/OR short-circuit on a decisive left side
                if matches!(op, BinaryOperator::And | BinaryOperator::Or) {
                    let l = self.to_tristate(&self.eval(left, row, params)?)?;
                    match (op, l) {
                        (BinaryOperator::And, Some(false)) => return Ok(Value::Bool(false)),
                        (BinaryOperator::Or, Some(true)) => return Ok(Value::Bool(true)),
                        _ => {}
                    }
                    let r = self.to_tristate(&self.eval(right, row, params)?)?;
                    return Ok(self.logical(*op, l, r));
                }
                let l = self.eval(left, row, params)?;
                let r = self.eval(right, row, params)?;
                self.eval_binary_op(*op, l, r)
            }

            Expr::UnaryOp { op, expr } => {
                let val = self.eval(expr, row, params)?;
                self.eval_unary_op(*op, val)
            }

            Expr::IsNull { expr, negated } => {
                let val = self.eval(expr, row, params)?;
                Ok(Value::Bool(val.is_null() != *negated))
            }
        }
    }

    /// Evaluate a qual: only TRUE passes, NULL and FALSE reject
    pub fn eval_predicate(&self, expr: &Expr, row: &[Value], params: &ParamTable) -> Result<bool> {
        match self.eval(expr, row, params)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(ExecError::TypeError(format!(
                "predicate must be boolean, got {:?}",
                other
            ))),
        }
    }

    /// Output type of `expr` over rows of `input`
    pub fn infer_type(&self, expr: &Expr, input: &Schema, params: &ParamTable) -> Result<ColumnType> {
        match expr {
            Expr::Column(i) => input
                .column(*i)
                .map(|c| c.col_type)
                .ok_or_else(|| ExecError::ColumnNotFound(format!(
                    "column #{} (input has {} columns)",
                    i,
                    input.column_count()
                ))),
            // Untyped NULL resolves to text
            Expr::Literal(v) => Ok(v.column_type().unwrap_or(ColumnType::Text)),
            Expr::Param(id) => Ok(self
                .param_value(*id, params)?
                .column_type()
                .unwrap_or(ColumnType::Text)),
            Expr::BinaryOp { left, op, right } => {
                let l = self.infer_type(left, input, params)?;
                let r = self.infer_type(right, input, params)?;
                if op.is_comparison() || matches!(op, BinaryOperator::And | BinaryOperator::Or) {
                    return Ok(ColumnType::Boolean);
                }
                if *op == BinaryOperator::Concat {
                    return Ok(ColumnType::Text);
                }
                match (l, r) {
                    (ColumnType::Integer, ColumnType::Integer) => Ok(ColumnType::Integer),
                    (ColumnType::Integer | ColumnType::Float, ColumnType::Integer | ColumnType::Float) => {
                        Ok(ColumnType::Float)
                    }
                    _ => Err(ExecError::TypeError(format!(
                        "operator {:?} not defined for {:?} and {:?}",
                        op, l, r
                    ))),
                }
            }
            Expr::UnaryOp { op: UnaryOperator::Not, expr } | Expr::IsNull { expr, .. } => {
                self.infer_type(expr, input, params)?;
                Ok(ColumnType::Boolean)
            }
            Expr::UnaryOp { op: UnaryOperator::Minus, expr } => self.infer_type(expr, input, params),
        }
    }

    fn param_value(&self, id: ParamId, params: &ParamTable) -> Result<Value> {
        if id.0 >= params.len() {
            return Err(ExecError::Query(format!("param {} out of range", id)));
        }
        match params.get(id) {
            ParamSlot::Datum(v) => Ok(v.clone()),
            ParamSlot::Unset => Err(ExecError::Query(format!("param {} is not bound", id))),
            ParamSlot::WorkTable(_) => Err(ExecError::Query(format!(
                "param {} is a working table, not a scalar",
                id
            ))),
        }
    }

    fn eval_binary_op(&self, op: BinaryOperator, left: Value, right: Value) -> Result<Value> {
        if left.is_null() || right.is_null() {
            return Ok(Value::Null);
        }

        if op.is_comparison() {
            let ord = left.partial_cmp(&right).ok_or_else(|| {
                ExecError::TypeError(format!("cannot compare {:?} with {:?}", left, right))
            })?;
            let result = match op {
                BinaryOperator::Eq => ord == Ordering::Equal,
                BinaryOperator::Ne => ord != Ordering::Equal,
                BinaryOperator::Lt => ord == Ordering::Less,
                BinaryOperator::Gt => ord == Ordering::Greater,
                BinaryOperator::Le => ord != Ordering::Greater,
                BinaryOperator::Ge => ord != Ordering::Less,
                _ => unreachable!(),
            };
            return Ok(Value::Bool(result));
        }

        match op {
            BinaryOperator::Add => self.arith(op, left, right, i64::checked_add, |a, b| a + b),
            BinaryOperator::Sub => self.arith(op, left, right, i64::checked_sub, |a, b| a - b),
            BinaryOperator::Mul => self.arith(op, left, right, i64::checked_mul, |a, b| a * b),
            BinaryOperator::Div => {
                if self.is_zero(&right) {
                    return Err(ExecError::DivisionByZero);
                }
                self.arith(op, left, right, i64::checked_div, |a, b| a / b)
            }
            BinaryOperator::Mod => {
                if self.is_zero(&right) {
                    return Err(ExecError::DivisionByZero);
                }
                self.arith(op, left, right, i64::checked_rem, |a, b| a % b)
            }
            BinaryOperator::Concat => Ok(Value::Text(format!(
                "{}{}",
                self.to_text(&left),
                self.to_text(&right)
            ))),
            _ => unreachable!("logical and comparison operators handled above"),
        }
    }

    fn arith(
        &self,
        op: BinaryOperator,
        left: Value,
        right: Value,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value> {
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => int_op(l, r)
                .map(Value::Integer)
                .ok_or_else(|| ExecError::Query(format!("integer overflow in {} {:?} {}", l, op, r))),
            (Value::Float(l), Value::Float(r)) => Ok(Value::Float(float_op(l, r))),
            (Value::Integer(l), Value::Float(r)) => Ok(Value::Float(float_op(l as f64, r))),
            (Value::Float(l), Value::Integer(r)) => Ok(Value::Float(float_op(l, r as f64))),
            (l, r) => Err(ExecError::TypeError(format!(
                "operator {:?} not defined for {:?} and {:?}",
                op, l, r
            ))),
        }
    }

    fn eval_unary_op(&self, op: UnaryOperator, val: Value) -> Result<Value> {
        match op {
            UnaryOperator::Not => Ok(match self.to_tristate(&val)? {
                Some(b) => Value::Bool(!b),
                None => Value::Null,
            }),
            UnaryOperator::Minus => match val {
                Value::Integer(i) => i
                    .checked_neg()
                    .map(Value::Integer)
                    .ok_or_else(|| ExecError::Query(format!("integer overflow in -{}", i))),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Null => Ok(Value::Null),
                _ => Err(ExecError::TypeError("Cannot negate non-numeric value".to_string())),
            },
        }
    }

    fn logical(&self, op: BinaryOperator, l: Option<bool>, r: Option<bool>) -> Value {
        let result = match op {
            BinaryOperator::And => match (l, r) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            _ => match (l, r) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        };
        result.map_or(Value::Null, Value::Bool)
    }

    fn to_tristate(&self, val: &Value) -> Result<Option<bool>> {
        match val {
            Value::Bool(b) => Ok(Some(*b)),
            Value::Null => Ok(None),
            _ => Err(ExecError::TypeError("Cannot convert to boolean".to_string())),
        }
    }

    fn to_text(&self, val: &Value) -> String {
        match val {
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
        }
    }

    fn is_zero(&self, val: &Value) -> bool {
        matches!(val, Value::Integer(0)) || matches!(val, Value::Float(f) if *f == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &Expr, row: &[Value]) -> Result<Value> {
        ExprEvaluator::new().eval(expr, row, &ParamTable::default())
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let row = vec![Value::Integer(3), Value::Float(1.5)];
        assert_eq!(eval(&Expr::col(0).add(Expr::lit(1)), &row).unwrap(), Value::Integer(4));
        assert_eq!(eval(&Expr::col(0).mul(Expr::col(1)), &row).unwrap(), Value::Float(4.5));
        assert_eq!(eval(&Expr::col(0).lt(Expr::lit(4)), &row).unwrap(), Value::Bool(true));
        assert_eq!(eval(&Expr::col(0).equals(Expr::lit(3.0)), &row).unwrap(), Value::Bool(true));
        assert_eq!(eval(&Expr::col(0).modulo(Expr::lit(2)), &row).unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_null_semantics() {
        let row = vec![Value::Null];
        let evaluator = ExprEvaluator::new();
        let params = ParamTable::default();

        assert_eq!(eval(&Expr::col(0).equals(Expr::lit(1)), &row).unwrap(), Value::Null);
        assert!(!evaluator.eval_predicate(&Expr::col(0).equals(Expr::col(0)), &row, &params).unwrap());
        assert_eq!(eval(&Expr::col(0).is_null(), &row).unwrap(), Value::Bool(true));

        // NULL AND FALSE = FALSE, NULL OR TRUE = TRUE
        let null_eq = Expr::col(0).equals(Expr::lit(1));
        assert_eq!(eval(&null_eq.clone().and(Expr::lit(false)), &row).unwrap(), Value::Bool(false));
        assert_eq!(eval(&null_eq.clone().or(Expr::lit(true)), &row).unwrap(), Value::Bool(true));
        assert_eq!(eval(&null_eq.not(), &row).unwrap(), Value::Null);
    }

    #[test]
    fn test_errors() {
        let row = vec![Value::Integer(i64::MAX), Value::Text("a".into())];
        assert!(matches!(eval(&Expr::col(0).add(Expr::lit(1)), &row), Err(ExecError::Query(_))));
        assert!(matches!(
            eval(&Expr::col(0).binary(BinaryOperator::Div, Expr::lit(0)), &row),
            Err(ExecError::DivisionByZero)
        ));
        assert!(matches!(eval(&Expr::col(1).lt(Expr::lit(1)), &row), Err(ExecError::TypeError(_))));
        assert!(matches!(eval(&Expr::col(5), &row), Err(ExecError::ColumnNotFound(_))));
    }

    #[test]
    fn test_concat_and_params() {
        let mut params = ParamTable::with_len(1);
        params.set(ParamId(0), ParamSlot::Datum(Value::Text("->".into())));
        let row = vec![Value::Text("a".into()), Value::Integer(2)];
        let expr = Expr::col(0).concat(Expr::param(ParamId(0))).concat(Expr::col(1));
        assert_eq!(
            ExprEvaluator::new().eval(&expr, &row, &params).unwrap(),
            Value::Text("a->2".into())
        );

        let unset = ParamTable::with_len(1);
        assert!(ExprEvaluator::new().eval(&Expr::param(ParamId(0)), &row, &unset).is_err());
    }

    #[test]
    fn test_infer_type() {
        let schema = Schema::from_pairs(&[("n", ColumnType::Integer), ("w", ColumnType::Float)]);
        let evaluator = ExprEvaluator::new();
        let params = ParamTable::default();
        let ty = |e: Expr| evaluator.infer_type(&e, &schema, &params);

        assert_eq!(ty(Expr::col(0).add(Expr::lit(1))).unwrap(), ColumnType::Integer);
        assert_eq!(ty(Expr::col(0).add(Expr::col(1))).unwrap(), ColumnType::Float);
        assert_eq!(ty(Expr::col(0).lt(Expr::lit(4))).unwrap(), ColumnType::Boolean);
        assert_eq!(ty(Expr::col(0).concat(Expr::lit("x"))).unwrap(), ColumnType::Text);
        assert!(ty(Expr::col(2)).is_err());
        assert_eq!(Expr::col(0).add(Expr::col(3)).max_column(), Some(3));
    }
}

//! Expressions.
//!
//! Expressions are the computational payload of calculation, traversal and
//! index nodes. They are plain trees over [`Value`]s and variable registers;
//! the optimizer inspects them (determinism, variable use, attribute paths)
//! and rewrites them (variable substitution, parameter binding).

mod eval;
mod functions;
mod quantifier;

pub use functions::Function;
pub use quantifier::{Quantifier, compare_values, evaluate_quantified};

use crate::query::variable::VariableRegistry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tessera_common::{Error, Result, Value, VariableId};
use tessera_core::index::{AttributePath, PathSegment};

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `IN`
    In,
    /// `NOT IN`
    NotIn,
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::In => "IN",
            ComparisonOp::NotIn => "NOT IN",
        };
        write!(f, "{s}")
    }
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Logical and. Yields the left operand if it is falsy, else the right.
    And,
    /// Logical or. Yields the left operand if it is truthy, else the right.
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// Comparison.
    Compare(ComparisonOp),
}

impl BinaryOp {
    fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::And => write!(f, "&&"),
            BinaryOp::Or => write!(f, "||"),
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Mod => write!(f, "%"),
            BinaryOp::Compare(op) => write!(f, "{op}"),
        }
    }
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Neg,
}

/// An expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A constant.
    Literal(Value),
    /// Read of a variable register.
    Variable(VariableId),
    /// An unbound `@name` parameter.
    Parameter(String),
    /// `base.name`
    Attribute {
        /// Object expression.
        base: Box<Expression>,
        /// Attribute name.
        name: String,
    },
    /// `base[index]`
    Index {
        /// Array or object expression.
        base: Box<Expression>,
        /// Position or attribute name.
        index: Box<Expression>,
    },
    /// `base[*].a.b`: applies the attribute path to every array element.
    Expansion {
        /// Array expression.
        base: Box<Expression>,
        /// Attribute path applied to each element.
        path: Vec<String>,
    },
    /// Array constructor.
    Array(Vec<Expression>),
    /// Object constructor.
    Object(Vec<(String, Expression)>),
    /// `low..high`, inclusive.
    Range {
        /// Start.
        low: Box<Expression>,
        /// End.
        high: Box<Expression>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expression>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// `left QUANT op right`, e.g. `doc.tags ANY == "x"`.
    Quantified {
        /// ALL, ANY or NONE.
        quantifier: Quantifier,
        /// Per-element comparison.
        op: ComparisonOp,
        /// Array operand.
        left: Box<Expression>,
        /// Value every element is compared with.
        right: Box<Expression>,
    },
    /// Function call.
    Function {
        /// Function.
        function: Function,
        /// Arguments.
        args: Vec<Expression>,
    },
}

// === Construction ===

impl Expression {
    /// A literal.
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    /// A variable read.
    #[must_use]
    pub fn variable(id: VariableId) -> Self {
        Expression::Variable(id)
    }

    /// A bind parameter.
    pub fn parameter(name: impl Into<String>) -> Self {
        Expression::Parameter(name.into())
    }

    /// `self.name`
    #[must_use]
    pub fn attribute(self, name: &str) -> Self {
        Expression::Attribute {
            base: Box::new(self),
            name: name.to_string(),
        }
    }

    /// `self[index]`
    #[must_use]
    pub fn index(self, index: Expression) -> Self {
        Expression::Index {
            base: Box::new(self),
            index: Box::new(index),
        }
    }

    /// `self[*].path`
    #[must_use]
    pub fn expand(self, path: &[&str]) -> Self {
        Expression::Expansion {
            base: Box::new(self),
            path: path.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Array constructor.
    #[must_use]
    pub fn array(items: Vec<Expression>) -> Self {
        Expression::Array(items)
    }

    /// Object constructor.
    #[must_use]
    pub fn object(fields: Vec<(&str, Expression)>) -> Self {
        Expression::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    /// `low..high`
    #[must_use]
    pub fn range(low: Expression, high: Expression) -> Self {
        Expression::Range {
            low: Box::new(low),
            high: Box::new(high),
        }
    }

    /// Binary operation.
    #[must_use]
    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Comparison.
    #[must_use]
    pub fn compare(op: ComparisonOp, left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::Compare(op), left, right)
    }

    /// `self == other`
    #[must_use]
    pub fn equals(self, other: Expression) -> Self {
        Self::compare(ComparisonOp::Eq, self, other)
    }

    /// `left && right`
    #[must_use]
    pub fn and(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    /// `left || right`
    #[must_use]
    pub fn or(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::Or, left, right)
    }

    /// `NOT operand`
    #[must_use]
    pub fn not(operand: Expression) -> Self {
        Expression::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    /// `-operand`
    #[must_use]
    pub fn neg(operand: Expression) -> Self {
        Expression::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(operand),
        }
    }

    /// Quantified comparison.
    #[must_use]
    pub fn quantified(
        quantifier: Quantifier,
        op: ComparisonOp,
        left: Expression,
        right: Expression,
    ) -> Self {
        Expression::Quantified {
            quantifier,
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Function call.
    #[must_use]
    pub fn call(function: Function, args: Vec<Expression>) -> Self {
        Expression::Function { function, args }
    }
}

// === Analysis ===

impl Expression {
    /// Visits every sub-expression in pre-order.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expression)) {
        f(self);
        match self {
            Expression::Literal(_) | Expression::Variable(_) | Expression::Parameter(_) => {}
            Expression::Attribute { base, .. } | Expression::Expansion { base, .. } => base.walk(f),
            Expression::Index { base, index } => {
                base.walk(f);
                index.walk(f);
            }
            Expression::Array(items) | Expression::Function { args: items, .. } => {
                for item in items {
                    item.walk(f);
                }
            }
            Expression::Object(fields) => {
                for (_, value) in fields {
                    value.walk(f);
                }
            }
            Expression::Range { low: a, high: b }
            | Expression::Binary { left: a, right: b, .. }
            | Expression::Quantified { left: a, right: b, .. } => {
                a.walk(f);
                b.walk(f);
            }
            Expression::Unary { operand, .. } => operand.walk(f),
        }
    }

    /// Visits every sub-expression mutably, children before parents.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Expression)) {
        match self {
            Expression::Literal(_) | Expression::Variable(_) | Expression::Parameter(_) => {}
            Expression::Attribute { base, .. } | Expression::Expansion { base, .. } => {
                base.walk_mut(f);
            }
            Expression::Index { base, index } => {
                base.walk_mut(f);
                index.walk_mut(f);
            }
            Expression::Array(items) | Expression::Function { args: items, .. } => {
                for item in items {
                    item.walk_mut(f);
                }
            }
            Expression::Object(fields) => {
                for (_, value) in fields {
                    value.walk_mut(f);
                }
            }
            Expression::Range { low: a, high: b }
            | Expression::Binary { left: a, right: b, .. }
            | Expression::Quantified { left: a, right: b, .. } => {
                a.walk_mut(f);
                b.walk_mut(f);
            }
            Expression::Unary { operand, .. } => operand.walk_mut(f),
        }
        f(self);
    }

    /// Variables read by this expression.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<VariableId> {
        let mut vars = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expression::Variable(v) = e {
                vars.insert(*v);
            }
        });
        vars
    }

    /// Returns true if this expression reads `var`.
    #[must_use]
    pub fn uses_variable(&self, var: VariableId) -> bool {
        self.count_variable_uses(var) > 0
    }

    /// Number of places this expression reads `var`.
    #[must_use]
    pub fn count_variable_uses(&self, var: VariableId) -> usize {
        let mut count = 0;
        self.walk(&mut |e| {
            if *e == Expression::Variable(var) {
                count += 1;
            }
        });
        count
    }

    /// Number of `LENGTH(var)` calls in this expression.
    #[must_use]
    pub fn count_length_uses(&self, var: VariableId) -> usize {
        let mut count = 0;
        self.walk(&mut |e| {
            if let Expression::Function {
                function: Function::Length,
                args,
            } = e
            {
                if args.as_slice() == [Expression::Variable(var)] {
                    count += 1;
                }
            }
        });
        count
    }

    /// Returns false if evaluating this expression twice may give different
    /// results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        let mut deterministic = true;
        self.walk(&mut |e| {
            if let Expression::Function { function, .. } = e {
                deterministic &= function.is_deterministic();
            }
        });
        deterministic
    }

    /// Returns true if evaluation may raise an error.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        let mut throws = false;
        self.walk(&mut |e| {
            throws |= match e {
                Expression::Parameter(_) | Expression::Range { .. } => true,
                Expression::Unary {
                    op: UnaryOp::Neg, ..
                } => true,
                Expression::Binary { op, .. } => op.is_arithmetic(),
                Expression::Function { function, .. } => function.can_throw(),
                _ => false,
            };
        });
        throws
    }

    /// Returns true if this expression reads no variables and parameters and
    /// is deterministic, so it can be evaluated at planning time.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        self.walk(&mut |e| match e {
            Expression::Variable(_) | Expression::Parameter(_) => constant = false,
            Expression::Function { function, .. } => constant &= function.is_deterministic(),
            _ => {}
        });
        constant
    }

    /// Replaces every read of `old` by a read of `new`. Returns the number of
    /// rewritten sites.
    pub fn replace_variable(&mut self, old: VariableId, new: VariableId) -> usize {
        let mut count = 0;
        self.walk_mut(&mut |e| {
            if let Expression::Variable(v) = e {
                if *v == old {
                    *v = new;
                    count += 1;
                }
            }
        });
        count
    }

    /// Rewrites every `LENGTH(var)` into a plain read of `var`. Returns the
    /// number of rewritten calls.
    pub fn replace_length_with_variable(&mut self, var: VariableId) -> usize {
        let mut count = 0;
        self.walk_mut(&mut |e| {
            if let Expression::Function {
                function: Function::Length,
                args,
            } = e
            {
                if args.as_slice() == [Expression::Variable(var)] {
                    *e = Expression::Variable(var);
                    count += 1;
                }
            }
        });
        count
    }

    /// Replaces bind parameters by their values.
    pub fn bind_parameters(&mut self, parameters: &BTreeMap<String, Value>) -> Result<()> {
        let mut missing = None;
        self.walk_mut(&mut |e| {
            if let Expression::Parameter(name) = e {
                match parameters.get(name.as_str()) {
                    Some(value) => *e = Expression::Literal(value.clone()),
                    None => {
                        missing.get_or_insert_with(|| name.clone());
                    }
                }
            }
        });
        match missing {
            Some(name) => Err(Error::BindParameterMissing(name)),
            None => Ok(()),
        }
    }

    /// Returns the names of unbound parameters.
    #[must_use]
    pub fn parameters(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expression::Parameter(name) = e {
                names.insert(name.clone());
            }
        });
        names
    }

    /// If this expression is an attribute path rooted at `var`, such as
    /// `var.a.b` or `var.tags[*].name`, returns that path.
    #[must_use]
    pub fn attribute_path(&self, var: VariableId) -> Option<AttributePath> {
        let mut segments = Vec::new();
        if !collect_path(self, var, &mut segments) || segments.is_empty() {
            return None;
        }
        Some(AttributePath::new(segments))
    }

    /// Evaluates the expression against a register file.
    pub fn evaluate(&self, row: &[Value]) -> Result<Value> {
        eval::evaluate(self, row)
    }

    /// Renders the expression using the variable names of `registry`.
    #[must_use]
    pub fn render(&self, registry: &VariableRegistry) -> String {
        let mut out = String::new();
        render(self, registry, &mut out);
        out
    }
}

fn collect_path(expr: &Expression, var: VariableId, segments: &mut Vec<PathSegment>) -> bool {
    match expr {
        Expression::Variable(v) => *v == var,
        Expression::Attribute { base, name } => {
            if !collect_path(base, var, segments) {
                return false;
            }
            segments.push(PathSegment::Attribute(name.clone()));
            true
        }
        Expression::Expansion { base, path } => {
            if !collect_path(base, var, segments) {
                return false;
            }
            segments.push(PathSegment::Expand);
            segments.extend(path.iter().map(|p| PathSegment::Attribute(p.clone())));
            true
        }
        _ => false,
    }
}

fn render(expr: &Expression, registry: &VariableRegistry, out: &mut String) {
    use std::fmt::Write;
    match expr {
        Expression::Literal(v) => {
            let _ = write!(out, "{v}");
        }
        Expression::Variable(v) => out.push_str(&registry.name(*v)),
        Expression::Parameter(name) => {
            let _ = write!(out, "@{name}");
        }
        Expression::Attribute { base, name } => {
            render(base, registry, out);
            out.push('.');
            out.push_str(name);
        }
        Expression::Index { base, index } => {
            render(base, registry, out);
            out.push('[');
            render(index, registry, out);
            out.push(']');
        }
        Expression::Expansion { base, path } => {
            render(base, registry, out);
            out.push_str("[*]");
            for p in path {
                out.push('.');
                out.push_str(p);
            }
        }
        Expression::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render(item, registry, out);
            }
            out.push(']');
        }
        Expression::Object(fields) => {
            out.push('{');
            for (i, (name, value)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{name}: ");
                render(value, registry, out);
            }
            out.push('}');
        }
        Expression::Range { low, high } => {
            render(low, registry, out);
            out.push_str("..");
            render(high, registry, out);
        }
        Expression::Unary { op, operand } => {
            out.push_str(match op {
                UnaryOp::Not => "NOT ",
                UnaryOp::Neg => "-",
            });
            render(operand, registry, out);
        }
        Expression::Binary { op, left, right } => {
            out.push('(');
            render(left, registry, out);
            let _ = write!(out, " {op} ");
            render(right, registry, out);
            out.push(')');
        }
        Expression::Quantified {
            quantifier,
            op,
            left,
            right,
        } => {
            out.push('(');
            render(left, registry, out);
            let _ = write!(out, " {quantifier} {op} ");
            render(right, registry, out);
            out.push(')');
        }
        Expression::Function { function, args } => {
            out.push_str(function.name());
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render(arg, registry, out);
            }
            out.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(id: u32) -> Expression {
        Expression::variable(VariableId::new(id))
    }

    #[test]
    fn test_variables_and_replace() {
        let mut expr = Expression::and(
            var(0).attribute("a").equals(var(1)),
            Expression::compare(ComparisonOp::Lt, var(0), Expression::literal(3)),
        );
        assert_eq!(
            expr.variables().into_iter().collect::<Vec<_>>(),
            vec![VariableId::new(0), VariableId::new(1)]
        );
        assert_eq!(expr.replace_variable(VariableId::new(0), VariableId::new(5)), 2);
        assert!(!expr.uses_variable(VariableId::new(0)));
        assert_eq!(expr.count_variable_uses(VariableId::new(5)), 2);
    }

    #[test]
    fn test_determinism_and_constness() {
        let rand = Expression::call(Function::Rand, vec![]);
        assert!(!rand.is_deterministic());
        assert!(!rand.is_constant());

        let constant = Expression::array(vec![Expression::literal(1), Expression::literal(2)]);
        assert!(constant.is_constant());
        assert!(!constant.can_throw());

        let arithmetic = Expression::binary(BinaryOp::Add, var(0), Expression::literal(1));
        assert!(arithmetic.can_throw());
        assert!(Expression::call(Function::Fail, vec![]).can_throw());
    }

    #[test]
    fn test_length_rewrite() {
        let v = VariableId::new(2);
        let mut expr = Expression::binary(
            BinaryOp::Add,
            Expression::call(Function::Length, vec![var(2)]),
            Expression::call(Function::Length, vec![var(3)]),
        );
        assert_eq!(expr.count_length_uses(v), 1);
        assert_eq!(expr.count_variable_uses(v), 1);
        assert_eq!(expr.replace_length_with_variable(v), 1);
        assert_eq!(expr.count_length_uses(v), 0);
        assert!(expr.uses_variable(v));
    }

    #[test]
    fn test_bind_parameters() {
        let mut expr = var(0).attribute("a").equals(Expression::parameter("x"));
        assert_eq!(expr.parameters().len(), 1);

        let mut params = BTreeMap::new();
        assert_eq!(
            expr.clone().bind_parameters(&params),
            Err(Error::BindParameterMissing("x".to_string()))
        );
        params.insert("x".to_string(), Value::Int64(4));
        expr.bind_parameters(&params).unwrap();
        assert!(expr.parameters().is_empty());
    }

    #[test]
    fn test_attribute_path() {
        let d = VariableId::new(0);
        let path = var(0).attribute("tags").expand(&["name"]).attribute_path(d);
        assert_eq!(path.unwrap().to_string(), "tags[*].name");

        assert_eq!(
            var(0).attribute("a").attribute("b").attribute_path(d).unwrap().to_string(),
            "a.b"
        );
        assert!(var(0).attribute_path(d).is_none());
        assert!(var(1).attribute("a").attribute_path(d).is_none());
    }

    #[test]
    fn test_render() {
        let mut registry = VariableRegistry::new();
        let u = registry.declare(Some("u")).unwrap();
        let expr = Expression::variable(u)
            .attribute("age")
            .equals(Expression::literal(3));
        assert_eq!(expr.render(&registry), "(u.age == 3)");
    }
}

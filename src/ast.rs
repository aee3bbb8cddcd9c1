//! The AST the interpreter consumes (spec.md §3, §9 open question 1).
//!
//! This crate does not parse mlld source — an external `Parser` (spec.md §6) is assumed
//! to already have produced this shape. The node set below models the *newer* canonical
//! shape spec.md describes: `Directive { kind, subtype, values: map<string, Node[]> }`
//! with discriminated variants, not the legacy grammar's alternative layout.
//!
//! Shape follows a discriminated-union style (`pub enum Node { ... }` over boxed
//! children with a `Location`), generalized to mlld's directive/expression variants.

use std::fmt;

use indexmap::IndexMap;

/// A byte-range location in a single source file, used for error reporting and guard
/// traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub source_id: u32,
    pub offset: u32,
    pub len: u32,
}

impl Location {
    #[must_use]
    pub fn new(source_id: u32, offset: u32, len: u32) -> Self {
        Self { source_id, offset, len }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}..{}", self.source_id, self.offset, self.offset + self.len)
    }
}

/// The kind of a `/`-directive (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum DirectiveKind {
    Var,
    Exe,
    Run,
    Show,
    Log,
    Output,
    When,
    For,
    Loop,
    Import,
    Export,
    Path,
    Guard,
    Bail,
    Stream,
}

/// A directive subtype, distinguishing e.g. `cmd`/`sh` forms of `/exe`, or the template
/// style of a `/var` template body. Free-form because the subtype vocabulary is
/// directive-specific; the evaluator matches on the string by convention
/// (`"cmd"`, `"sh"`, `"js"`, `"node"`, `"py"`, `"python"`, `"template"`, `"when"`,
/// `"for"`, `"block"`, `"reference"`).
pub type Subtype = Option<String>;

/// Template quoting style (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TemplateStyle {
    Backtick,
    DoubleColon,
    TripleColon,
}

/// `when` evaluation mode (spec.md §4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WhenMode {
    Simple,
    First,
    All,
    Any,
}

/// One `(condition, action)` arm of a `when` expression.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WhenArm {
    /// `None` for a bare `let @x = ...` local binding arm, which has no condition and
    /// is always "executed" to extend subsequent arms' scope (spec.md §4.3.1).
    pub condition: Option<Node>,
    pub action: Node,
    /// `let @x = expr` local binding preceding this arm, visible to it and to every
    /// subsequent arm in the same `when` block.
    pub binding: Option<(String, Node)>,
}

/// A single step of field/index/method access chained onto a variable reference
/// (spec.md §4.3.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum FieldAccess {
    Field(String),
    Index(Box<Node>),
    Slice { start: Option<Box<Node>>, end: Option<Box<Node>> },
    /// `@arr.method(args)` — a built-in array/string/universal method call.
    MethodCall { name: String, args: Vec<Node> },
}

/// A reference to a resolved stage in a pipeline (spec.md §4.6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StageRef {
    /// The executable (or inline expression) invoked for this stage.
    pub target: Node,
}

/// Binary operators available in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Unary operators available in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOperator {
    Not,
    Neg,
}

/// A declared parameter of an `/exe` definition, with an optional loose type hint
/// (spec.md §3's `(Name, TypeHint?)[]`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Param {
    pub name: String,
    pub type_hint: Option<String>,
}

/// The body of an `/exe` definition (spec.md §4.3 forms).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ExeBody {
    /// `cmd { ... }` / `sh { ... }`
    Command { language: String, source: Vec<Node> },
    /// `js { ... }` / `node { ... }` / `py { ... }` / `python { ... }`
    Code { language: String, source: String },
    /// A backtick/double-colon/triple-colon template body.
    Template { style: TemplateStyle, body: Vec<Node> },
    /// `when [ ... ]`
    When { mode: WhenMode, arms: Vec<WhenArm> },
    /// `for @v in iterable => body`
    For { variable: String, iterable: Box<Node>, body: Box<Node>, parallel: bool },
    /// `[ statements; => expr ]`
    Block { statements: Vec<Node>, tail: Option<Box<Node>> },
    /// A reference to another named executable (aliasing).
    Reference { name: String },
}

/// A discriminated AST node (spec.md §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Node {
    Text {
        content: String,
        location: Location,
    },
    VariableReference {
        identifier: String,
        fields: Vec<FieldAccess>,
        location: Location,
    },
    FileLoad {
        path_expr: Box<Node>,
        section: Option<String>,
        selector: Option<String>,
        location: Location,
    },
    ExecInvocation {
        target: Box<Node>,
        args: Vec<Node>,
        location: Location,
    },
    Template {
        body: Vec<Node>,
        style: TemplateStyle,
        location: Location,
    },
    WhenExpression {
        mode: WhenMode,
        arms: Vec<WhenArm>,
        location: Location,
    },
    ForExpression {
        variable: String,
        iterable: Box<Node>,
        body: Box<Node>,
        parallel: bool,
        location: Location,
    },
    LoopExpression {
        max: u32,
        interval_ms: u32,
        until_condition: Box<Node>,
        body: Box<Node>,
        location: Location,
    },
    PipelineExpression {
        head: Box<Node>,
        stages: Vec<StageRef>,
        parallel: bool,
        location: Location,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<Node>,
        right: Box<Node>,
        location: Location,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Node>,
        location: Location,
    },
    Ternary {
        condition: Box<Node>,
        if_true: Box<Node>,
        if_false: Box<Node>,
        location: Location,
    },
    StringLiteral {
        value: String,
        /// Single-quoted strings are literal — no interpolation (spec.md §4.4).
        interpolated: bool,
        location: Location,
    },
    NumberLiteral {
        value: f64,
        location: Location,
    },
    BooleanLiteral {
        value: bool,
        location: Location,
    },
    ObjectLiteral {
        entries: Vec<(String, Node)>,
        location: Location,
    },
    ArrayLiteral {
        items: Vec<Node>,
        location: Location,
    },
    Directive {
        kind: DirectiveKind,
        subtype: Subtype,
        values: IndexMap<String, Vec<Node>>,
        raw: IndexMap<String, String>,
        params: Vec<Param>,
        exe_body: Option<ExeBody>,
        location: Location,
    },
}

impl Node {
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::Text { location, .. }
            | Self::VariableReference { location, .. }
            | Self::FileLoad { location, .. }
            | Self::ExecInvocation { location, .. }
            | Self::Template { location, .. }
            | Self::WhenExpression { location, .. }
            | Self::ForExpression { location, .. }
            | Self::LoopExpression { location, .. }
            | Self::PipelineExpression { location, .. }
            | Self::BinaryOp { location, .. }
            | Self::UnaryOp { location, .. }
            | Self::Ternary { location, .. }
            | Self::StringLiteral { location, .. }
            | Self::NumberLiteral { location, .. }
            | Self::BooleanLiteral { location, .. }
            | Self::ObjectLiteral { location, .. }
            | Self::ArrayLiteral { location, .. }
            | Self::Directive { location, .. } => *location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DirectiveKind, Location, Node};

    #[test]
    fn location_is_recoverable_from_any_variant() {
        let loc = Location::new(0, 10, 5);
        let node = Node::NumberLiteral { value: 1.0, location: loc };
        assert_eq!(node.location(), loc);
    }

    #[test]
    fn directive_kind_roundtrips_through_display() {
        use std::str::FromStr;
        assert_eq!(DirectiveKind::Var.to_string(), "var");
        assert_eq!(DirectiveKind::from_str("var").unwrap(), DirectiveKind::Var);
    }
}

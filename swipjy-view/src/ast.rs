//! 模板语法树

use std::sync::Arc;

use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Import(Import),
    Function(Arc<FunctionDef>),
    Let { pattern: Pattern, init: Option<Expr> },
    /// `module.exports = ...` / `exports.key = ...`
    Export { target: ExportTarget, value: Expr },
    Return(Option<Expr>),
    If {
        test: Expr,
        consequent: Vec<Stmt>,
        alternate: Option<Vec<Stmt>>,
    },
    Block(Vec<Stmt>),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub source: String,
    pub default: Option<String>,
    pub namespace: Option<String>,
    /// (导入名, 本地名)
    pub named: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportTarget {
    /// `module.exports`
    Module,
    /// `module.exports.key`
    ModuleKey(String),
    /// `exports.key`
    ExportsKey(String),
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: FunctionBody,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// 箭头函数的表达式体
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct Param {
    pub pattern: Pattern,
    pub default: Option<Expr>,
}

/// 绑定模式（变量声明与参数共用）
#[derive(Debug, Clone)]
pub enum Pattern {
    Ident(String),
    Object {
        properties: Vec<PatternProperty>,
        rest: Option<String>,
    },
    Array(Vec<Option<Param>>),
}

#[derive(Debug, Clone)]
pub struct PatternProperty {
    pub key: String,
    pub value: Param,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Template {
        quasis: Vec<String>,
        exprs: Vec<Expr>,
    },
    Ident(String),
    Array(Vec<ArrayItem>),
    Object(Vec<ObjectEntry>),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<ArrayItem>,
        optional: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Function(Arc<FunctionDef>),
    Element(Box<ElementExpr>),
}

#[derive(Debug, Clone)]
pub enum ArrayItem {
    Item(Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum ObjectEntry {
    Property(PropertyKey, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum PropertyKey {
    Static(String),
    Computed(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

/// 编译后的标记：一次树构建调用
#[derive(Debug, Clone)]
pub struct ElementExpr {
    pub kind: ElementKind,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum ElementKind {
    /// 小写标签名，交给树构建库
    Intrinsic(String),
    /// 组件（大写或带点号的名字）
    Component(Expr),
    /// `<>...</>`
    Fragment,
}

#[derive(Debug, Clone)]
pub enum Attribute {
    Named(String, Expr),
    Spread(Expr),
}

//! 模板源码解析器
//!
//! 手写的递归下降解析器，直接在字符流上工作。表达式中出现在操作数位置的
//! `<` 被当作标记的开始，于是标记内部的文本可以按标记规则扫描，不需要
//! 单独的词法分析阶段。

use std::fmt;
use std::sync::Arc;

use crate::ast::*;
use crate::value::{format_number, Value};

/// 表达式、标记、语句块与解构模式共用的嵌套上限，保证在 2 MiB 的工作线程栈上解析
const MAX_NESTING: usize = 64;

/// 语法树深度上限：嵌套与左结合的运算链（`a + b + …`、`a.b.c…`）都计入
const MAX_TREE_DEPTH: usize = 256;

/// 不支持的语法关键字
const UNSUPPORTED_WORDS: &[&str] = &[
    "new", "class", "this", "await", "async", "yield", "delete", "void", "for", "while", "do",
    "switch", "try", "throw", "with", "super",
];

/// 不能作为绑定名的保留字
const RESERVED_WORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "default", "delete", "do", "else",
    "export", "extends", "false", "finally", "for", "function", "if", "import", "in",
    "instanceof", "let", "new", "null", "return", "super", "switch", "this", "throw", "true",
    "try", "typeof", "var", "void", "while", "with", "yield",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.line, self.column)
    }
}

impl std::error::Error for ParseError {}

type PResult<T> = Result<T, ParseError>;

/// 解析完整的模块源码
pub fn parse(source: &str) -> PResult<Program> {
    let mut parser = Parser {
        chars: source.chars().collect(),
        pos: 0,
        depth: 0,
        tree: 0,
    };
    parser.program()
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
    tree: usize,
}

impl Parser {
    // ---- 字符级工具 ----

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn slice(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    /// 跳过空白与注释
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('/') if self.peek_at(1) == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.pos += 2;
                    while !self.is_eof() && !self.starts_with("*/") {
                        self.pos += 1;
                    }
                    self.pos = (self.pos + 2).min(self.chars.len());
                }
                _ => break,
            }
        }
    }

    fn check(&mut self, s: &str) -> bool {
        self.skip_trivia();
        self.starts_with(s)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.check(s) {
            self.pos += s.chars().count();
            true
        } else {
            false
        }
    }

    /// 匹配运算符，且后面不是 `not_followed` 中的字符
    fn eat_op(&mut self, op: &str, not_followed: &[char]) -> bool {
        self.skip_trivia();
        let len = op.chars().count();
        if self.starts_with(op) && !self.peek_at(len).is_some_and(|c| not_followed.contains(&c)) {
            self.pos += len;
            true
        } else {
            false
        }
    }

    fn eat_assign(&mut self) -> bool {
        self.eat_op("=", &['=', '>'])
    }

    fn expect(&mut self, s: &str) -> PResult<()> {
        if self.eat(s) {
            Ok(())
        } else {
            self.unexpected(&format!("'{}'", s))
        }
    }

    fn check_keyword(&mut self, keyword: &str) -> bool {
        self.skip_trivia();
        self.starts_with(keyword)
            && !self
                .peek_at(keyword.chars().count())
                .is_some_and(is_ident_part)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.pos += keyword.chars().count();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> PResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            self.unexpected(&format!("'{}'", keyword))
        }
    }

    fn ident(&mut self) -> PResult<String> {
        self.skip_trivia();
        match self.peek() {
            Some(c) if is_ident_start(c) => {}
            _ => return self.unexpected("identifier"),
        }
        let start = self.pos;
        while self.peek().is_some_and(is_ident_part) {
            self.pos += 1;
        }
        Ok(self.slice(start))
    }

    fn binding_ident(&mut self) -> PResult<String> {
        self.skip_trivia();
        let start = self.pos;
        let name = self.ident()?;
        if RESERVED_WORDS.contains(&name.as_str()) {
            return self.error_at(start, format!("Unexpected reserved word '{}'", name));
        }
        Ok(name)
    }

    // ---- 错误 ----

    fn line_col(&self, pos: usize) -> (usize, usize) {
        let mut line = 1;
        let mut column = 1;
        for &c in &self.chars[..pos.min(self.chars.len())] {
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        (line, column)
    }

    fn error_at<T>(&self, pos: usize, message: impl Into<String>) -> PResult<T> {
        let (line, column) = self.line_col(pos);
        Err(ParseError {
            line,
            column,
            message: message.into(),
        })
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        self.error_at(self.pos, message)
    }

    fn nested<T>(&mut self, what: &str, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING || self.tree >= MAX_TREE_DEPTH {
            return self.error(format!("{} nested too deeply", what));
        }
        let (depth, tree) = (self.depth, self.tree);
        self.depth += 1;
        self.tree += 1;
        let result = parse(self);
        self.depth = depth;
        self.tree = tree;
        result
    }

    fn link(&mut self) -> PResult<()> {
        self.tree += 1;
        if self.tree > MAX_TREE_DEPTH {
            return self.error("Expression chain too long");
        }
        Ok(())
    }

    fn unexpected<T>(&self, expected: &str) -> PResult<T> {
        match self.peek() {
            Some(c) => self.error(format!("Unexpected token '{}', expected {}", c, expected)),
            None => self.error(format!("Unexpected end of input, expected {}", expected)),
        }
    }

    // ---- 语句 ----

    fn program(&mut self) -> PResult<Program> {
        let mut body = Vec::new();
        loop {
            self.skip_trivia();
            if self.is_eof() {
                break;
            }
            if self.eat(";") {
                continue;
            }
            self.statement(&mut body, true)?;
        }
        Ok(Program { body })
    }

    fn statement(&mut self, out: &mut Vec<Stmt>, top_level: bool) -> PResult<()> {
        self.skip_trivia();
        let start = self.pos;
        let export = if top_level { self.export_target() } else { None };

        if let Some(target) = export {
            let value = self.expression()?;
            out.push(Stmt::Export { target, value });
        } else if self.eat_keyword("import") {
            if !top_level {
                return self.error_at(start, "Import declarations may only appear at top level");
            }
            let import = self.import_declaration()?;
            out.push(Stmt::Import(import));
        } else if self.check_keyword("export") {
            return self.error_at(start, "Unsupported export form");
        } else if self.eat_keyword("function") {
            let def = self.function_rest(true)?;
            out.push(Stmt::Function(Arc::new(def)));
            return Ok(());
        } else if self.eat_keyword("const") || self.eat_keyword("let") || self.eat_keyword("var") {
            loop {
                let pattern = self.pattern()?;
                let init = if self.eat_assign() {
                    Some(self.expression()?)
                } else {
                    None
                };
                out.push(Stmt::Let { pattern, init });
                if !self.eat(",") {
                    break;
                }
            }
        } else if self.eat_keyword("return") {
            if top_level {
                return self.error_at(start, "Illegal return statement");
            }
            self.skip_trivia();
            let value = if self.is_eof() || self.starts_with(";") || self.starts_with("}") {
                None
            } else {
                Some(self.expression()?)
            };
            out.push(Stmt::Return(value));
        } else if self.eat_keyword("if") {
            let stmt = self.if_rest()?;
            out.push(stmt);
            return Ok(());
        } else if self.check("{") {
            let body = self.block()?;
            out.push(Stmt::Block(body));
            return Ok(());
        } else {
            let expr = self.expression()?;
            out.push(Stmt::Expr(expr));
        }

        self.eat(";");
        Ok(())
    }

    /// `module.exports[.key] =` 或 `exports.key =`，不匹配时回退
    fn export_target(&mut self) -> Option<ExportTarget> {
        let start = self.pos;
        let target = self.export_target_inner();
        if target.is_none() {
            self.pos = start;
        }
        target
    }

    fn export_target_inner(&mut self) -> Option<ExportTarget> {
        let target = if self.eat_keyword("module") {
            if !(self.eat(".") && self.eat_keyword("exports")) {
                return None;
            }
            if self.eat(".") {
                ExportTarget::ModuleKey(self.ident().ok()?)
            } else {
                ExportTarget::Module
            }
        } else if self.eat_keyword("exports") {
            if !self.eat(".") {
                return None;
            }
            ExportTarget::ExportsKey(self.ident().ok()?)
        } else {
            return None;
        };

        self.eat_assign().then_some(target)
    }

    fn import_declaration(&mut self) -> PResult<Import> {
        let mut import = Import {
            source: String::new(),
            default: None,
            namespace: None,
            named: Vec::new(),
        };

        self.skip_trivia();
        if matches!(self.peek(), Some('"' | '\'')) {
            import.source = self.string_literal()?;
            self.eat(";");
            return Ok(import);
        }

        if self.eat("*") {
            self.expect_keyword("as")?;
            import.namespace = Some(self.binding_ident()?);
        } else if self.check("{") {
            import.named = self.import_specifiers()?;
        } else {
            import.default = Some(self.binding_ident()?);
            if self.eat(",") {
                if self.eat("*") {
                    self.expect_keyword("as")?;
                    import.namespace = Some(self.binding_ident()?);
                } else {
                    import.named = self.import_specifiers()?;
                }
            }
        }

        self.expect_keyword("from")?;
        self.skip_trivia();
        import.source = self.string_literal()?;
        self.eat(";");
        Ok(import)
    }

    fn import_specifiers(&mut self) -> PResult<Vec<(String, String)>> {
        self.expect("{")?;
        let mut named = Vec::new();
        while !self.eat("}") {
            let imported = self.ident()?;
            let local = if self.eat_keyword("as") {
                self.binding_ident()?
            } else {
                imported.clone()
            };
            named.push((imported, local));
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(named)
    }

    fn if_rest(&mut self) -> PResult<Stmt> {
        self.expect("(")?;
        let test = self.expression()?;
        self.expect(")")?;
        let consequent = self.branch()?;
        let alternate = if self.eat_keyword("else") {
            Some(self.branch()?)
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn branch(&mut self) -> PResult<Vec<Stmt>> {
        self.nested("Statement", Self::branch_inner)
    }

    fn branch_inner(&mut self) -> PResult<Vec<Stmt>> {
        if self.check("{") {
            self.block()
        } else {
            let mut body = Vec::new();
            self.statement(&mut body, false)?;
            Ok(body)
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.nested("Block", Self::block_inner)
    }

    fn block_inner(&mut self) -> PResult<Vec<Stmt>> {
        self.expect("{")?;
        let mut body = Vec::new();
        loop {
            if self.eat("}") {
                break;
            }
            if self.is_eof() {
                return self.unexpected("'}'");
            }
            if self.eat(";") {
                continue;
            }
            self.statement(&mut body, false)?;
        }
        Ok(body)
    }

    fn function_rest(&mut self, declaration: bool) -> PResult<FunctionDef> {
        self.skip_trivia();
        let name = if self.peek().is_some_and(is_ident_start) {
            Some(self.binding_ident()?)
        } else if declaration {
            return self.unexpected("function name");
        } else {
            None
        };
        self.expect("(")?;
        let params = self.params_rest()?;
        let body = self.block()?;
        Ok(FunctionDef {
            name,
            params,
            body: FunctionBody::Block(body),
        })
    }

    /// 参数列表，调用前已消费 `(`
    fn params_rest(&mut self) -> PResult<Vec<Param>> {
        let mut params = Vec::new();
        while !self.eat(")") {
            if self.check("...") {
                return self.error("Rest parameters are not supported");
            }
            params.push(self.param()?);
            if !self.eat(",") {
                self.expect(")")?;
                break;
            }
        }
        Ok(params)
    }

    fn param(&mut self) -> PResult<Param> {
        let pattern = self.pattern()?;
        let default = if self.eat_assign() {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(Param { pattern, default })
    }

    fn pattern(&mut self) -> PResult<Pattern> {
        self.nested("Pattern", Self::pattern_inner)
    }

    fn pattern_inner(&mut self) -> PResult<Pattern> {
        self.skip_trivia();
        match self.peek() {
            Some('{') => {
                self.pos += 1;
                let mut properties = Vec::new();
                let mut rest = None;
                while !self.eat("}") {
                    if self.eat("...") {
                        rest = Some(self.binding_ident()?);
                        self.eat(",");
                        self.expect("}")?;
                        break;
                    }
                    self.skip_trivia();
                    let key = if matches!(self.peek(), Some('"' | '\'')) {
                        self.string_literal()?
                    } else {
                        self.ident()?
                    };
                    let pattern = if self.eat(":") {
                        self.pattern()?
                    } else {
                        Pattern::Ident(key.clone())
                    };
                    let default = if self.eat_assign() {
                        Some(self.expression()?)
                    } else {
                        None
                    };
                    properties.push(PatternProperty {
                        key,
                        value: Param { pattern, default },
                    });
                    if !self.eat(",") {
                        self.expect("}")?;
                        break;
                    }
                }
                Ok(Pattern::Object { properties, rest })
            }
            Some('[') => {
                self.pos += 1;
                let mut items = Vec::new();
                while !self.eat("]") {
                    if self.eat(",") {
                        items.push(None);
                        continue;
                    }
                    items.push(Some(self.param()?));
                    if !self.eat(",") {
                        self.expect("]")?;
                        break;
                    }
                }
                Ok(Pattern::Array(items))
            }
            _ => Ok(Pattern::Ident(self.binding_ident()?)),
        }
    }

    // ---- 表达式 ----

    fn expression(&mut self) -> PResult<Expr> {
        self.nested("Expression", Self::conditional)
    }

    fn is_optional_chain(&self) -> bool {
        self.starts_with("?.") && !self.peek_at(2).is_some_and(|c| c.is_ascii_digit())
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let test = self.nullish()?;
        self.skip_trivia();
        if self.starts_with("?") && !self.starts_with("??") && !self.is_optional_chain() {
            self.pos += 1;
            let consequent = self.expression()?;
            self.expect(":")?;
            let alternate = self.expression()?;
            return Ok(Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            });
        }
        Ok(test)
    }

    fn nullish(&mut self) -> PResult<Expr> {
        let mut left = self.logical_or()?;
        let base = self.tree;
        while self.eat_op("??", &['=']) {
            self.link()?;
            let right = self.logical_or()?;
            left = logical(LogicalOp::Nullish, left, right);
        }
        self.tree = base;
        Ok(left)
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut left = self.logical_and()?;
        let base = self.tree;
        while self.eat_op("||", &['=']) {
            self.link()?;
            let right = self.logical_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        self.tree = base;
        Ok(left)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut left = self.equality()?;
        let base = self.tree;
        while self.eat_op("&&", &['=']) {
            self.link()?;
            let right = self.equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        self.tree = base;
        Ok(left)
    }

    fn equality(&mut self) -> PResult<Expr> {
        let mut left = self.relational()?;
        let base = self.tree;
        loop {
            let op = if self.eat_op("===", &[]) {
                BinaryOp::StrictEq
            } else if self.eat_op("!==", &[]) {
                BinaryOp::StrictNe
            } else if self.eat_op("==", &['=']) {
                BinaryOp::LooseEq
            } else if self.eat_op("!=", &['=']) {
                BinaryOp::LooseNe
            } else {
                break;
            };
            self.link()?;
            let right = self.relational()?;
            left = binary(op, left, right);
        }
        self.tree = base;
        Ok(left)
    }

    fn relational(&mut self) -> PResult<Expr> {
        let mut left = self.additive()?;
        let base = self.tree;
        loop {
            let op = if self.eat_op("<=", &[]) {
                BinaryOp::Le
            } else if self.eat_op(">=", &[]) {
                BinaryOp::Ge
            } else if self.eat_op("<", &['<', '=']) {
                BinaryOp::Lt
            } else if self.eat_op(">", &['>', '=']) {
                BinaryOp::Gt
            } else {
                break;
            };
            self.link()?;
            let right = self.additive()?;
            left = binary(op, left, right);
        }
        self.tree = base;
        Ok(left)
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut left = self.multiplicative()?;
        let base = self.tree;
        loop {
            let op = if self.eat_op("+", &['+', '=']) {
                BinaryOp::Add
            } else if self.eat_op("-", &['-', '=']) {
                BinaryOp::Sub
            } else {
                break;
            };
            self.link()?;
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
        self.tree = base;
        Ok(left)
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.unary()?;
        let base = self.tree;
        loop {
            let op = if self.eat_op("*", &['*', '=']) {
                BinaryOp::Mul
            } else if self.eat_op("/", &['=']) {
                BinaryOp::Div
            } else if self.eat_op("%", &['=']) {
                BinaryOp::Rem
            } else {
                break;
            };
            self.link()?;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
        self.tree = base;
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = if self.eat_op("!", &['=']) {
            Some(UnaryOp::Not)
        } else if self.eat_op("-", &['-', '=']) {
            Some(UnaryOp::Neg)
        } else if self.eat_op("+", &['+', '=']) {
            Some(UnaryOp::Plus)
        } else if self.eat_keyword("typeof") {
            Some(UnaryOp::TypeOf)
        } else {
            None
        };

        // 每个前缀运算符都计入嵌套深度，`!!!…x` 这样的长链会在这里停下
        match op {
            Some(op) => {
                let operand = self.nested("Expression", Self::unary)?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        let base = self.tree;
        loop {
            self.skip_trivia();
            if self.is_optional_chain() || self.starts_with(".") || self.starts_with("[") || self.starts_with("(") {
                self.link()?;
            }
            if self.is_optional_chain() {
                self.pos += 2;
                expr = if self.eat("(") {
                    Expr::Call {
                        callee: Box::new(expr),
                        args: self.arguments_rest()?,
                        optional: true,
                    }
                } else if self.eat("[") {
                    let index = self.expression()?;
                    self.expect("]")?;
                    Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    }
                } else {
                    Expr::Member {
                        object: Box::new(expr),
                        property: self.ident()?,
                        optional: true,
                    }
                };
            } else if self.starts_with(".") && !self.starts_with("...") {
                self.pos += 1;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: self.ident()?,
                    optional: false,
                };
            } else if self.starts_with("[") {
                self.pos += 1;
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else if self.starts_with("(") {
                self.pos += 1;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args: self.arguments_rest()?,
                    optional: false,
                };
            } else {
                break;
            }
        }
        self.tree = base;
        Ok(expr)
    }

    /// 调用实参，调用前已消费 `(`
    fn arguments_rest(&mut self) -> PResult<Vec<ArrayItem>> {
        let mut args = Vec::new();
        while !self.eat(")") {
            if self.eat("...") {
                args.push(ArrayItem::Spread(self.expression()?));
            } else {
                args.push(ArrayItem::Item(self.expression()?));
            }
            if !self.eat(",") {
                self.expect(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        self.skip_trivia();
        let start = self.pos;
        match self.peek() {
            None => self.unexpected("expression"),
            Some(c) if c.is_ascii_digit() => Ok(Expr::Literal(Value::Number(self.number_literal()?))),
            Some('.') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                Ok(Expr::Literal(Value::Number(self.number_literal()?)))
            }
            Some('"' | '\'') => Ok(Expr::Literal(Value::from(self.string_literal()?))),
            Some('`') => self.template_literal(),
            Some('(') => self.parenthesized_or_arrow(),
            Some('[') => self.array_literal(),
            Some('{') => self.object_literal(),
            Some('<') => Ok(Expr::Element(Box::new(self.jsx_element()?))),
            Some(c) if is_ident_start(c) => {
                let name = self.ident()?;
                match name.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" => Ok(Expr::Literal(Value::Null)),
                    "undefined" => Ok(Expr::Literal(Value::Undefined)),
                    "function" => Ok(Expr::Function(Arc::new(self.function_rest(false)?))),
                    word if UNSUPPORTED_WORDS.contains(&word) => {
                        self.error_at(start, format!("Unsupported syntax: '{}'", word))
                    }
                    word if RESERVED_WORDS.contains(&word) => {
                        self.error_at(start, format!("Unexpected token '{}'", word))
                    }
                    _ => {
                        if self.eat("=>") {
                            let body = self.arrow_body()?;
                            Ok(Expr::Function(Arc::new(FunctionDef {
                                name: None,
                                params: vec![Param {
                                    pattern: Pattern::Ident(name),
                                    default: None,
                                }],
                                body,
                            })))
                        } else {
                            Ok(Expr::Ident(name))
                        }
                    }
                }
            }
            Some(c) => self.error(format!("Unexpected token '{}'", c)),
        }
    }

    fn parenthesized_or_arrow(&mut self) -> PResult<Expr> {
        let start = self.pos;
        let params = self.expect("(").and_then(|_| self.params_rest());
        if let Ok(params) = params {
            if self.eat("=>") {
                let body = self.arrow_body()?;
                return Ok(Expr::Function(Arc::new(FunctionDef {
                    name: None,
                    params,
                    body,
                })));
            }
        }

        self.pos = start;
        self.expect("(")?;
        let expr = self.expression()?;
        self.expect(")")?;
        Ok(expr)
    }

    fn arrow_body(&mut self) -> PResult<FunctionBody> {
        if self.check("{") {
            Ok(FunctionBody::Block(self.block()?))
        } else {
            Ok(FunctionBody::Expr(self.expression()?))
        }
    }

    fn array_literal(&mut self) -> PResult<Expr> {
        self.pos += 1;
        let mut items = Vec::new();
        while !self.eat("]") {
            if self.eat(",") {
                items.push(ArrayItem::Item(Expr::Literal(Value::Undefined)));
                continue;
            }
            if self.eat("...") {
                items.push(ArrayItem::Spread(self.expression()?));
            } else {
                items.push(ArrayItem::Item(self.expression()?));
            }
            if !self.eat(",") {
                self.expect("]")?;
                break;
            }
        }
        Ok(Expr::Array(items))
    }

    fn object_literal(&mut self) -> PResult<Expr> {
        self.pos += 1;
        let mut entries = Vec::new();
        while !self.eat("}") {
            if self.eat("...") {
                entries.push(ObjectEntry::Spread(self.expression()?));
            } else {
                self.skip_trivia();
                let mut shorthand = None;
                let key = match self.peek() {
                    Some('"' | '\'') => PropertyKey::Static(self.string_literal()?),
                    Some('[') => {
                        self.pos += 1;
                        let key = self.expression()?;
                        self.expect("]")?;
                        PropertyKey::Computed(key)
                    }
                    Some(c) if c.is_ascii_digit() => {
                        PropertyKey::Static(format_number(self.number_literal()?))
                    }
                    _ => {
                        let name = self.ident()?;
                        shorthand = Some(name.clone());
                        PropertyKey::Static(name)
                    }
                };

                let value = if self.eat(":") {
                    self.expression()?
                } else if self.eat("(") {
                    let params = self.params_rest()?;
                    let body = self.block()?;
                    Expr::Function(Arc::new(FunctionDef {
                        name: shorthand,
                        params,
                        body: FunctionBody::Block(body),
                    }))
                } else if let Some(name) = shorthand {
                    Expr::Ident(name)
                } else {
                    return self.unexpected("':'");
                };
                entries.push(ObjectEntry::Property(key, value));
            }
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }

    // ---- 字面量 ----

    fn number_literal(&mut self) -> PResult<f64> {
        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X' | 'b' | 'B' | 'o' | 'O')) {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => 16,
                Some('b' | 'B') => 2,
                _ => 8,
            };
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_digit(radix) || c == '_') {
                self.pos += 1;
            }
            let digits: String = self.slice(digits_start).chars().filter(|c| *c != '_').collect();
            return match u64::from_str_radix(&digits, radix) {
                Ok(n) => Ok(n as f64),
                Err(_) => self.error_at(start, "Invalid number literal"),
            };
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
        if self.peek() == Some('.') && !self.peek_at(1).is_some_and(|c| is_ident_start(c) || c == '.') {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += digit_at;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text: String = self.slice(start).chars().filter(|c| *c != '_').collect();
        match text.parse::<f64>() {
            Ok(n) => Ok(n),
            Err(_) => self.error_at(start, format!("Invalid number literal '{}'", text)),
        }
    }

    fn string_literal(&mut self) -> PResult<String> {
        let start = self.pos;
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return self.unexpected("string literal"),
        };
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return self.error_at(start, "Unterminated string literal"),
                Some(c) if c == quote => break,
                Some('\\') => self.escape_into(&mut out, start)?,
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    fn template_literal(&mut self) -> PResult<Expr> {
        let start = self.pos;
        self.pos += 1;
        let mut quasis = Vec::new();
        let mut exprs = Vec::new();
        let mut current = String::new();
        loop {
            match self.bump() {
                None => return self.error_at(start, "Unterminated template literal"),
                Some('`') => break,
                Some('\\') => self.escape_into(&mut current, start)?,
                Some('$') if self.peek() == Some('{') => {
                    self.pos += 1;
                    quasis.push(std::mem::take(&mut current));
                    exprs.push(self.expression()?);
                    self.expect("}")?;
                }
                Some(c) => current.push(c),
            }
        }
        quasis.push(current);
        Ok(Expr::Template { quasis, exprs })
    }

    fn escape_into(&mut self, out: &mut String, start: usize) -> PResult<()> {
        match self.bump() {
            None => return self.error_at(start, "Unterminated string literal"),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('0') => out.push('\0'),
            Some('\n') => {}
            Some('x') => {
                let c = self.hex_escape(2)?;
                out.push(c);
            }
            Some('u') => {
                let c = if self.peek() == Some('{') {
                    self.pos += 1;
                    let digits_start = self.pos;
                    while self.peek().is_some_and(|c| c != '}') {
                        self.pos += 1;
                    }
                    let digits = self.slice(digits_start);
                    self.expect("}")?;
                    self.code_point(&digits)?
                } else {
                    self.hex_escape(4)?
                };
                out.push(c);
            }
            Some(c) => out.push(c),
        }
        Ok(())
    }

    fn hex_escape(&mut self, len: usize) -> PResult<char> {
        let digits_start = self.pos;
        for _ in 0..len {
            if self.bump().is_none() {
                break;
            }
        }
        let digits = self.slice(digits_start);
        self.code_point(&digits)
    }

    fn code_point(&self, digits: &str) -> PResult<char> {
        match u32::from_str_radix(digits, 16).ok().and_then(char::from_u32) {
            Some(c) => Ok(c),
            None => self.error(format!("Invalid escape sequence '{}'", digits)),
        }
    }

    // ---- 标记 ----

    fn jsx_element(&mut self) -> PResult<ElementExpr> {
        self.nested("Markup", Self::jsx_element_inner)
    }

    fn jsx_element_inner(&mut self) -> PResult<ElementExpr> {
        let start = self.pos;
        self.pos += 1;
        self.skip_trivia();

        if self.peek() == Some('>') {
            self.pos += 1;
            let children = self.jsx_children(start, "")?;
            return Ok(ElementExpr {
                kind: ElementKind::Fragment,
                attributes: Vec::new(),
                children,
            });
        }

        let name = self.jsx_name()?;
        let mut attributes = Vec::new();
        loop {
            self.skip_trivia();
            if self.starts_with("/>") {
                self.pos += 2;
                return Ok(ElementExpr {
                    kind: element_kind(&name),
                    attributes,
                    children: Vec::new(),
                });
            }
            if self.starts_with(">") {
                self.pos += 1;
                break;
            }
            if self.is_eof() {
                return self.error_at(start, format!("Unterminated JSX element <{}>", name));
            }
            if self.starts_with("{") {
                self.pos += 1;
                self.expect("...")?;
                attributes.push(Attribute::Spread(self.expression()?));
                self.expect("}")?;
                continue;
            }

            let attr = self.jsx_name()?;
            let value = if self.eat("=") {
                self.skip_trivia();
                match self.peek() {
                    Some('"' | '\'') => Expr::Literal(Value::from(self.jsx_attribute_string()?)),
                    Some('{') => {
                        self.pos += 1;
                        let expr = self.expression()?;
                        self.expect("}")?;
                        expr
                    }
                    Some('<') => Expr::Element(Box::new(self.jsx_element()?)),
                    _ => return self.unexpected("attribute value"),
                }
            } else {
                Expr::Literal(Value::Bool(true))
            };
            attributes.push(Attribute::Named(attr, value));
        }

        let children = self.jsx_children(start, &name)?;
        Ok(ElementExpr {
            kind: element_kind(&name),
            attributes,
            children,
        })
    }

    fn jsx_name(&mut self) -> PResult<String> {
        self.skip_trivia();
        match self.peek() {
            Some(c) if is_ident_start(c) => {}
            _ => return self.unexpected("element name"),
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| is_ident_part(c) || matches!(c, '-' | '.' | ':'))
        {
            self.pos += 1;
        }
        Ok(self.slice(start))
    }

    fn jsx_attribute_string(&mut self) -> PResult<String> {
        let start = self.pos;
        let quote = self.bump();
        let content_start = self.pos;
        while self.peek().is_some() && self.peek() != quote {
            self.pos += 1;
        }
        if self.is_eof() {
            return self.error_at(start, "Unterminated string literal");
        }
        let raw = self.slice(content_start);
        self.pos += 1;
        Ok(decode_entities(&raw))
    }

    /// 子节点，直到匹配的闭合标签
    fn jsx_children(&mut self, open: usize, name: &str) -> PResult<Vec<Expr>> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return self.error_at(open, format!("Unterminated JSX element <{}>", name));
                }
                Some('<') if self.starts_with("</") => {
                    let close_start = self.pos;
                    self.pos += 2;
                    self.skip_trivia();
                    let close = if self.peek() == Some('>') {
                        String::new()
                    } else {
                        self.jsx_name()?
                    };
                    if close != name {
                        return self.error_at(
                            close_start,
                            format!("Expected corresponding closing tag for <{}>", name),
                        );
                    }
                    self.expect(">")?;
                    return Ok(children);
                }
                Some('<') => children.push(Expr::Element(Box::new(self.jsx_element()?))),
                Some('{') => {
                    self.pos += 1;
                    if self.eat("}") {
                        continue;
                    }
                    self.eat("...");
                    children.push(self.expression()?);
                    self.expect("}")?;
                }
                Some(_) => {
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c != '<' && c != '{') {
                        self.pos += 1;
                    }
                    let text = clean_jsx_text(&decode_entities(&self.slice(start)));
                    if !text.is_empty() {
                        children.push(Expr::Literal(Value::from(text)));
                    }
                }
            }
        }
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn element_kind(name: &str) -> ElementKind {
    if name.contains('.') {
        let mut parts = name.split('.');
        let mut expr = Expr::Ident(parts.next().unwrap_or_default().to_string());
        for part in parts {
            expr = Expr::Member {
                object: Box::new(expr),
                property: part.to_string(),
                optional: false,
            };
        }
        ElementKind::Component(expr)
    } else if name.starts_with(|c: char| c.is_ascii_lowercase()) || name.contains('-') || name.contains(':') {
        ElementKind::Intrinsic(name.to_string())
    } else {
        ElementKind::Component(Expr::Ident(name.to_string()))
    }
}

/// 标记文本的空白规则：跨行空白折叠为单个空格，仅含空白的行被丢弃
fn clean_jsx_text(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = normalized.split('\n').collect();
    let last_non_empty = lines
        .iter()
        .rposition(|line| line.chars().any(|c| c != ' ' && c != '\t'));

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let mut trimmed = line.replace('\t', " ");
        if i != 0 {
            trimmed = trimmed.trim_start_matches(' ').to_string();
        }
        if i != lines.len() - 1 {
            trimmed = trimmed.trim_end_matches(' ').to_string();
        }
        if !trimmed.is_empty() {
            if Some(i) != last_non_empty {
                trimmed.push(' ');
            }
            out.push_str(&trimmed);
        }
    }
    out
}

/// 解码 HTML 实体（命名实体与数字实体）
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        let tail = &rest[i + 1..];
        let decoded = tail
            .find(';')
            .filter(|&end| end > 0 && end <= 10)
            .and_then(|end| decode_entity(&tail[..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code);
    }

    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "middot" => '\u{b7}',
        "bull" => '\u{2022}',
        "times" => '\u{d7}',
        "larr" => '\u{2190}',
        "rarr" => '\u{2192}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "deg" => '\u{b0}',
        "euro" => '\u{20ac}',
        _ => return None,
    };
    Some(c)
}

//! 受限解释器
//!
//! 模块代码只能看到显式注入的名字：树构建库、`require`、几组平台原语。
//! 没有任何环境全局变量，也无法访问文件系统或进程。
//!
//! 局部作用域是不可变的链表，闭包只捕获局部作用域；模块级名字统一从
//! `Globals` 中查找，所以闭包与模块之间不会形成引用环。

use std::cell::Cell;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::*;
use crate::builtins::{self, Builtin};
use crate::library::{collect_children, into_node, TreeLibrary};
use crate::node::Node;
use crate::value::{Function, Object, Value};

/// 调用栈深度上限
const MAX_CALL_DEPTH: usize = 128;

pub(crate) type Exec<T> = Result<T, String>;

/// 模块级名字表
pub(crate) type Globals = IndexMap<String, Value>;

#[derive(Clone, Default)]
pub(crate) struct Env(Option<Arc<Frame>>);

struct Frame {
    name: String,
    value: Value,
    parent: Env,
}

impl Env {
    fn bind(&self, name: String, value: Value) -> Env {
        Env(Some(Arc::new(Frame {
            name,
            value,
            parent: self.clone(),
        })))
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        let mut current = &self.0;
        while let Some(frame) = current {
            if frame.name == name {
                return Some(&frame.value);
            }
            current = &frame.parent.0;
        }
        None
    }
}

/// 模板中定义的函数及其捕获的局部作用域
pub struct Closure {
    def: Arc<FunctionDef>,
    env: Env,
}

impl Closure {
    pub fn name(&self) -> &str {
        self.def.name.as_deref().unwrap_or("anonymous")
    }
}

fn closure(def: &Arc<FunctionDef>, env: Env) -> Value {
    Value::Function(Function::Closure(Arc::new(Closure {
        def: def.clone(),
        env,
    })))
}

enum Flow {
    Normal,
    Return(Value),
}

/// 模块语句对模块作用域的影响
enum Effect {
    Bind(String, Value),
    Export(ExportTarget, Value),
}

/// 实例化后的模块
pub(crate) struct Module {
    pub globals: Globals,
    pub entry: Function,
}

/// 执行模块体，得到导出的渲染函数
pub(crate) fn instantiate(program: &Program, library: &dyn TreeLibrary, template: &str) -> Exec<Module> {
    let mut globals = builtins::globals(library);

    // 函数声明提升
    for stmt in &program.body {
        if let Stmt::Function(def) = stmt {
            if let Some(name) = &def.name {
                globals.insert(name.clone(), closure(def, Env::default()));
            }
        }
    }

    let mut exports = Object::new();
    let mut module_exports: Option<Value> = None;

    for stmt in &program.body {
        let effects = Interpreter::new(&globals, library, template).module_statement(stmt)?;
        for effect in effects {
            match effect {
                Effect::Bind(name, value) => {
                    globals.insert(name, value);
                }
                Effect::Export(ExportTarget::Module, value) => module_exports = Some(value),
                Effect::Export(ExportTarget::ExportsKey(key), value) => {
                    exports.insert(key, value);
                }
                Effect::Export(ExportTarget::ModuleKey(key), value) => match &mut module_exports {
                    None => {
                        exports.insert(key, value);
                    }
                    Some(Value::Object(map)) => {
                        Arc::make_mut(map).insert(key, value);
                    }
                    Some(_) => {
                        tracing::debug!(template, key = %key, "Ignoring property export on non-object module.exports");
                    }
                },
            }
        }
    }

    let exported = module_exports.unwrap_or_else(|| Value::object(exports));
    let entry = match exported.get("default") {
        default if default.is_truthy() => default,
        _ => exported,
    };

    match entry {
        Value::Function(entry) => Ok(Module { globals, entry }),
        other => Err(format!("Component is not a function, got: {}", other.type_of())),
    }
}

pub(crate) struct Interpreter<'a> {
    globals: &'a Globals,
    pub(crate) library: &'a dyn TreeLibrary,
    pub(crate) template: &'a str,
    depth: Cell<usize>,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(globals: &'a Globals, library: &'a dyn TreeLibrary, template: &'a str) -> Self {
        Self {
            globals,
            library,
            template,
            depth: Cell::new(0),
        }
    }

    fn module_statement(&self, stmt: &Stmt) -> Exec<Vec<Effect>> {
        let env = Env::default();
        match stmt {
            Stmt::Function(_) => Ok(Vec::new()),
            Stmt::Import(import) => {
                let module = self.require(&import.source)?;
                let mut effects = Vec::new();
                if let Some(local) = &import.default {
                    effects.push(Effect::Bind(local.clone(), module.clone()));
                }
                if let Some(local) = &import.namespace {
                    effects.push(Effect::Bind(local.clone(), module.clone()));
                }
                for (imported, local) in &import.named {
                    effects.push(Effect::Bind(local.clone(), module.get(imported)));
                }
                Ok(effects)
            }
            Stmt::Let { pattern, init } => {
                let value = match init {
                    Some(init) => self.eval(init, &env)?,
                    None => Value::Undefined,
                };
                let mut bindings = Vec::new();
                self.destructure(pattern, value, &env, &mut bindings)?;
                Ok(bindings
                    .into_iter()
                    .map(|(name, value)| Effect::Bind(name, value))
                    .collect())
            }
            Stmt::Export { target, value } => {
                Ok(vec![Effect::Export(target.clone(), self.eval(value, &env)?)])
            }
            Stmt::Expr(expr) => {
                self.eval(expr, &env)?;
                Ok(Vec::new())
            }
            Stmt::If { .. } | Stmt::Block(_) => {
                self.exec_block(std::slice::from_ref(stmt), env)?;
                Ok(Vec::new())
            }
            Stmt::Return(_) => Err("Illegal return statement".to_string()),
        }
    }

    /// 解析注入的模块
    pub(crate) fn require(&self, name: &str) -> Exec<Value> {
        if self.library.provides(name) {
            Ok(builtins::library_namespace())
        } else {
            Err(format!("Cannot find module '{}'", name))
        }
    }

    // ---- 调用 ----

    pub(crate) fn call(&self, func: &Function, args: &[Value]) -> Exec<Value> {
        match func {
            Function::Builtin(builtin) => self.call_builtin(*builtin, args),
            Function::Host(host) => host(args),
            Function::Closure(closure) => {
                let depth = self.depth.get();
                if depth >= MAX_CALL_DEPTH {
                    return Err("Maximum call stack size exceeded".to_string());
                }
                self.depth.set(depth + 1);
                let result = self.invoke(closure, args);
                self.depth.set(depth);
                result
            }
        }
    }

    pub(crate) fn call_value(&self, callee: &Value, args: &[Value]) -> Exec<Value> {
        match callee {
            Value::Function(func) => self.call(func, args),
            other => Err(format!("{} is not a function", other.type_of())),
        }
    }

    fn invoke(&self, closure: &Closure, args: &[Value]) -> Exec<Value> {
        let mut env = closure.env.clone();
        for (i, param) in closure.def.params.iter().enumerate() {
            let arg = args.get(i).cloned().unwrap_or_default();
            let arg = self.apply_default(arg, param.default.as_ref(), &env)?;
            let mut bindings = Vec::new();
            self.destructure(&param.pattern, arg, &env, &mut bindings)?;
            for (name, value) in bindings {
                env = env.bind(name, value);
            }
        }

        match &closure.def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &env),
            FunctionBody::Block(body) => match self.exec_block(body, env)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::Undefined),
            },
        }
    }

    fn apply_default(&self, value: Value, default: Option<&Expr>, env: &Env) -> Exec<Value> {
        match (value, default) {
            (Value::Undefined, Some(default)) => self.eval(default, env),
            (value, _) => Ok(value),
        }
    }

    fn destructure(
        &self,
        pattern: &Pattern,
        value: Value,
        env: &Env,
        out: &mut Vec<(String, Value)>,
    ) -> Exec<()> {
        match pattern {
            Pattern::Ident(name) => out.push((name.clone(), value)),
            Pattern::Object { properties, rest } => {
                if value.is_nullish() {
                    return Err(format!("Cannot destructure '{}' as it is {}", value, value));
                }
                for property in properties {
                    let item = self.get_property(&value, &property.key)?;
                    let item = self.apply_default(item, property.value.default.as_ref(), env)?;
                    self.destructure(&property.value.pattern, item, env, out)?;
                }
                if let Some(rest) = rest {
                    let remaining: Object = value
                        .as_object()
                        .map(|map| {
                            map.iter()
                                .filter(|(key, _)| !properties.iter().any(|p| &p.key == *key))
                                .map(|(key, value)| (key.clone(), value.clone()))
                                .collect()
                        })
                        .unwrap_or_default();
                    out.push((rest.clone(), Value::object(remaining)));
                }
            }
            Pattern::Array(items) => {
                let values = self.iterate(&value)?;
                for (i, item) in items.iter().enumerate() {
                    if let Some(param) = item {
                        let element = values.get(i).cloned().unwrap_or_default();
                        let element = self.apply_default(element, param.default.as_ref(), env)?;
                        self.destructure(&param.pattern, element, env, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn iterate(&self, value: &Value) -> Exec<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.to_vec()),
            Value::String(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            other => Err(format!("{} is not iterable", other.type_of())),
        }
    }

    // ---- 语句 ----

    fn exec_block(&self, body: &[Stmt], env: Env) -> Exec<Flow> {
        let mut env = env;

        for stmt in body {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let value = closure(def, env.clone());
                    env = env.bind(name.clone(), value);
                }
            }
        }

        for stmt in body {
            match stmt {
                Stmt::Function(_) => {}
                Stmt::Let { pattern, init } => {
                    let value = match init {
                        Some(init) => self.eval(init, &env)?,
                        None => Value::Undefined,
                    };
                    let mut bindings = Vec::new();
                    self.destructure(pattern, value, &env, &mut bindings)?;
                    for (name, value) in bindings {
                        env = env.bind(name, value);
                    }
                }
                Stmt::Return(value) => {
                    let value = match value {
                        Some(value) => self.eval(value, &env)?,
                        None => Value::Undefined,
                    };
                    return Ok(Flow::Return(value));
                }
                Stmt::If {
                    test,
                    consequent,
                    alternate,
                } => {
                    let branch = if self.eval(test, &env)?.is_truthy() {
                        Some(consequent)
                    } else {
                        alternate.as_ref()
                    };
                    if let Some(branch) = branch {
                        if let Flow::Return(value) = self.exec_block(branch, env.clone())? {
                            return Ok(Flow::Return(value));
                        }
                    }
                }
                Stmt::Block(inner) => {
                    if let Flow::Return(value) = self.exec_block(inner, env.clone())? {
                        return Ok(Flow::Return(value));
                    }
                }
                Stmt::Expr(expr) => {
                    self.eval(expr, &env)?;
                }
                Stmt::Import(_) | Stmt::Export { .. } => {
                    return Err("Imports and exports are only allowed at module level".to_string());
                }
            }
        }

        Ok(Flow::Normal)
    }

    // ---- 表达式 ----

    fn eval(&self, expr: &Expr, env: &Env) -> Exec<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Template { quasis, exprs } => {
                let mut out = String::new();
                for (i, quasi) in quasis.iter().enumerate() {
                    out.push_str(quasi);
                    if let Some(expr) = exprs.get(i) {
                        out.push_str(&self.eval(expr, env)?.to_string());
                    }
                }
                Ok(Value::from(out))
            }
            Expr::Ident(name) => self.lookup(name, env),
            Expr::Array(items) => Ok(Value::array(self.eval_items(items, env)?)),
            Expr::Object(entries) => self.eval_object(entries, env),
            Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr, env)?.unwrap_or_default())
            }
            Expr::Unary { op, operand } => self.eval_unary(*op, operand, env),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                Ok(builtins::binary_op(*op, &left, &right))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.is_truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Function(def) => Ok(closure(def, env.clone())),
            Expr::Element(element) => self.eval_element(element, env),
        }
    }

    fn lookup(&self, name: &str, env: &Env) -> Exec<Value> {
        env.lookup(name)
            .or_else(|| self.globals.get(name))
            .cloned()
            .ok_or_else(|| format!("{} is not defined", name))
    }

    fn eval_unary(&self, op: UnaryOp, operand: &Expr, env: &Env) -> Exec<Value> {
        if op == UnaryOp::TypeOf {
            if let Expr::Ident(name) = operand {
                if env.lookup(name).is_none() && !self.globals.contains_key(name) {
                    return Ok(Value::from("undefined"));
                }
            }
        }

        let value = self.eval(operand, env)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::Neg => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::TypeOf => Value::from(value.type_of()),
        })
    }

    fn eval_items(&self, items: &[ArrayItem], env: &Env) -> Exec<Vec<Value>> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ArrayItem::Item(expr) => values.push(self.eval(expr, env)?),
                ArrayItem::Spread(expr) => {
                    let spread = self.eval(expr, env)?;
                    values.extend(self.iterate(&spread)?);
                }
            }
        }
        Ok(values)
    }

    fn eval_object(&self, entries: &[ObjectEntry], env: &Env) -> Exec<Value> {
        let mut map = Object::new();
        for entry in entries {
            match entry {
                ObjectEntry::Property(key, value) => {
                    let key = match key {
                        PropertyKey::Static(key) => key.clone(),
                        PropertyKey::Computed(expr) => self.eval(expr, env)?.to_string(),
                    };
                    map.insert(key, self.eval(value, env)?);
                }
                ObjectEntry::Spread(expr) => match self.eval(expr, env)? {
                    Value::Object(source) => {
                        map.extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    Value::Array(items) => {
                        map.extend(items.iter().enumerate().map(|(i, v)| (i.to_string(), v.clone())));
                    }
                    _ => {}
                },
            }
        }
        Ok(Value::object(map))
    }

    /// 成员访问链；可选链短路时返回 `None`
    fn eval_chain(&self, expr: &Expr, env: &Env) -> Exec<Option<Value>> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(target) = self.eval_chain(object, env)? else {
                    return Ok(None);
                };
                if *optional && target.is_nullish() {
                    return Ok(None);
                }
                self.get_property(&target, property).map(Some)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let Some(target) = self.eval_chain(object, env)? else {
                    return Ok(None);
                };
                if *optional && target.is_nullish() {
                    return Ok(None);
                }
                let key = self.eval(index, env)?;
                self.get_index(&target, &key).map(Some)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional, env),
            other => self.eval(other, env).map(Some),
        }
    }

    fn eval_call(
        &self,
        callee: &Expr,
        args: &[ArrayItem],
        optional: bool,
        env: &Env,
    ) -> Exec<Option<Value>> {
        if let Expr::Member {
            object,
            property,
            optional: member_optional,
        } = callee
        {
            let Some(target) = self.eval_chain(object, env)? else {
                return Ok(None);
            };
            if *member_optional && target.is_nullish() {
                return Ok(None);
            }
            let method = self.get_property(&target, property)?;
            if let Value::Function(func) = &method {
                let args = self.eval_items(args, env)?;
                return self.call(func, &args).map(Some);
            }
            if optional && method.is_nullish() {
                return Ok(None);
            }
            let args = self.eval_items(args, env)?;
            return match self.call_method(&target, property, &args)? {
                Some(result) => Ok(Some(result)),
                None => Err(format!("{}.{} is not a function", describe(object), property)),
            };
        }

        let Some(func) = self.eval_chain(callee, env)? else {
            return Ok(None);
        };
        if optional && func.is_nullish() {
            return Ok(None);
        }
        let Value::Function(func) = func else {
            return Err(format!("{} is not a function", describe(callee)));
        };
        let args = self.eval_items(args, env)?;
        self.call(&func, &args).map(Some)
    }

    pub(crate) fn get_property(&self, target: &Value, key: &str) -> Exec<Value> {
        match target {
            Value::Undefined | Value::Null => Err(format!(
                "Cannot read properties of {} (reading '{}')",
                target, key
            )),
            Value::Object(map) => Ok(map.get(key).cloned().unwrap_or_default()),
            Value::Array(items) => Ok(match key {
                "length" => Value::from(items.len() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            }),
            Value::String(s) => Ok(match key {
                "length" => Value::from(s.chars().count() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::from(c.to_string()))
                    .unwrap_or_default(),
            }),
            Value::Function(Function::Closure(closure)) if key == "name" => {
                Ok(Value::from(closure.name()))
            }
            _ => Ok(Value::Undefined),
        }
    }

    fn get_index(&self, target: &Value, key: &Value) -> Exec<Value> {
        match key {
            Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => {
                self.get_property(target, &format!("{}", *n as usize))
            }
            other => self.get_property(target, &other.to_string()),
        }
    }

    // ---- 标记 ----

    fn eval_element(&self, element: &ElementExpr, env: &Env) -> Exec<Value> {
        let mut props = Object::new();
        for attribute in &element.attributes {
            match attribute {
                Attribute::Named(name, expr) => {
                    props.insert(name.clone(), self.eval(expr, env)?);
                }
                Attribute::Spread(expr) => {
                    if let Value::Object(source) = self.eval(expr, env)? {
                        props.extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                }
            }
        }

        let mut children = Vec::with_capacity(element.children.len());
        for child in &element.children {
            children.push(self.eval(child, env)?);
        }

        let kind = match &element.kind {
            ElementKind::Intrinsic(tag) => Value::from(tag.as_str()),
            ElementKind::Fragment => Value::Function(Function::Builtin(Builtin::Fragment)),
            ElementKind::Component(expr) => self.eval(expr, env)?,
        };
        self.create_element(&kind, props, children).map(Value::node)
    }

    /// 树构建调用：内建标签交给树构建库，组件立即以 props 调用
    pub(crate) fn create_element(&self, kind: &Value, mut props: Object, children: Vec<Value>) -> Exec<Node> {
        match kind {
            Value::String(tag) => {
                let nodes = collect_children(children, self.library)?;
                self.library.create_element(tag, &props, nodes)
            }
            Value::Function(Function::Builtin(Builtin::Fragment)) => {
                let nodes = collect_children(children, self.library)?;
                Ok(self.library.fragment(nodes))
            }
            Value::Function(func) => {
                let mut children = children;
                match children.len() {
                    0 => {}
                    1 => {
                        props.insert("children".to_string(), children.remove(0));
                    }
                    _ => {
                        props.insert("children".to_string(), Value::array(children));
                    }
                }
                let rendered = self.call(func, &[Value::object(props)])?;
                into_node(rendered, self.library)
            }
            other => Err(format!(
                "Element type is invalid: expected a string or a function but got: {}",
                other.type_of()
            )),
        }
    }

    /// 以 props 调用入口组件
    pub(crate) fn render(&self, entry: &Function, props: Value) -> Exec<Node> {
        let rendered = self.call(entry, &[props])?;
        into_node(rendered, self.library)
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member { object, property, .. } => format!("{}.{}", describe(object), property),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::HtmlLibrary;
    use crate::node::render_to_static_markup;
    use crate::parser::parse;
    use serde_json::json;

    fn render(source: &str, props: serde_json::Value) -> Result<String, String> {
        let program = parse(source).map_err(|e| e.to_string())?;
        let module = instantiate(&program, &HtmlLibrary, "test")?;
        let interpreter = Interpreter::new(&module.globals, &HtmlLibrary, "test");
        let node = interpreter.render(&module.entry, Value::from(props))?;
        Ok(render_to_static_markup(&node))
    }

    #[test]
    fn test_component_with_props() {
        let html = render(
            r#"
            function Page({ title, items = [] }) {
                return (
                    <main>
                        <h1>{title}</h1>
                        <ul>{items.map((item, i) => <li key={i}>{i + 1}. {item}</li>)}</ul>
                    </main>
                );
            }
            module.exports = Page;
            "#,
            json!({"title": "Todo", "items": ["a", "b"]}),
        )
        .unwrap();

        assert_eq!(html, "<main><h1>Todo</h1><ul><li>1. a</li><li>2. b</li></ul></main>");
    }

    #[test]
    fn test_nested_components_receive_children() {
        let html = render(
            r#"
            const Card = ({ title, children }) => <section><h2>{title}</h2>{children}</section>;
            const Layout = (props) => <div className="layout">{props.children}</div>;
            module.exports = function App() {
                return <Layout><Card title="One"><p>first</p></Card><>tail</></Layout>;
            };
            "#,
            json!({}),
        )
        .unwrap();

        assert_eq!(
            html,
            r#"<div class="layout"><section><h2>One</h2><p>first</p></section>tail</div>"#
        );
    }

    #[test]
    fn test_conditionals_and_operators() {
        let html = render(
            r#"
            function Status({ user, count }) {
                if (!user) {
                    return <p>Guest</p>;
                }
                const label = count === 1 ? "item" : "items";
                return <p>{user.name ?? "anon"} has {count} {label}{user.admin && " (admin)"}</p>;
            }
            module.exports = Status;
            "#,
            json!({"user": {"name": "Ada", "admin": true}, "count": 2}),
        )
        .unwrap();

        assert_eq!(html, "<p>Ada has 2 items (admin)</p>");
    }

    #[test]
    fn test_create_element_calls() {
        let html = render(
            r#"
            const React = require("react");
            module.exports = (props) => React.createElement("a", { href: props.url }, "link", 1);
            "#,
            json!({"url": "/x"}),
        )
        .unwrap();
        assert_eq!(html, r#"<a href="/x">link1</a>"#);
    }

    #[test]
    fn test_default_export_key_is_preferred() {
        let html = render(
            r#"
            exports.default = () => <b>default</b>;
            exports.other = () => <i>other</i>;
            "#,
            json!({}),
        )
        .unwrap();
        assert_eq!(html, "<b>default</b>");
    }

    #[test]
    fn test_unknown_module_is_rejected() {
        let err = render(r#"const fs = require("fs"); module.exports = () => null;"#, json!({})).unwrap_err();
        assert!(err.contains("Cannot find module 'fs'"));
    }

    #[test]
    fn test_no_ambient_globals() {
        let err = render("module.exports = () => <p>{process.env.HOME}</p>;", json!({})).unwrap_err();
        assert_eq!(err, "process is not defined");

        let html = render("module.exports = () => <p>{typeof process}</p>;", json!({})).unwrap();
        assert_eq!(html, "<p>undefined</p>");
    }

    #[test]
    fn test_non_function_export_is_rejected() {
        let program = parse("module.exports = { title: 1 };").unwrap();
        let err = instantiate(&program, &HtmlLibrary, "test").err().unwrap();
        assert_eq!(err, "Component is not a function, got: object");
    }

    #[test]
    fn test_runaway_recursion_is_bounded() {
        let err = render("function Loop() { return Loop(); } module.exports = Loop;", json!({})).unwrap_err();
        assert_eq!(err, "Maximum call stack size exceeded");
    }

    #[test]
    fn test_optional_chaining_short_circuits() {
        let html = render(
            "module.exports = (p) => <p>{String(p.user?.profile.name)}</p>;",
            json!({}),
        )
        .unwrap();
        assert_eq!(html, "<p>undefined</p>");
    }

    #[test]
    fn test_reading_property_of_undefined_fails() {
        let err = render("module.exports = (p) => <p>{p.user.name}</p>;", json!({})).unwrap_err();
        assert_eq!(err, "Cannot read properties of undefined (reading 'name')");
    }
}

//! 解析后的样式树：语句联合体与承载它们的 Block。
//! Block 维护一组派生标志位与惰性重建的变量缓存，避免求值期反复全量扫描。

use crate::env::Frame;
use crate::guard::Guard;
use crate::value::Value;
use bitflags::bitflags;
use indexmap::IndexMap;
use std::fmt::{self, Display};

bitflags! {
    /// Block 的派生标志位，随 push/splice 增量维护。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u8 {
        const HAS_IMPORTS = 1;
        const HAS_MIXIN_CALLS = 1 << 1;
        const HAS_MERGE_MODES = 1 << 2;
        const HAS_NESTED_BLOCK = 1 << 3;
        const HAS_NESTED_EXTEND = 1 << 4;
        /// 游离规则集的块尚未捕获定义点闭包。
        const DEFERRED = 1 << 5;
    }
}

/// 有序、可原地改写的语句序列，归属于唯一的块节点。
/// 求值前由持有者深拷贝，原定义因此保持可重复调用。
#[derive(Debug, Clone, Default)]
pub struct Block {
    statements: Vec<Node>,
    flags: BlockFlags,
    /// 变量名 → 原始定义值；None 表示缓存已失效。
    variables: Option<IndexMap<String, Value>>,
}

impl Block {
    pub fn new(statements: Vec<Node>) -> Self {
        let mut flags = BlockFlags::empty();
        for node in &statements {
            flags |= node_flags(node);
        }
        Self {
            statements,
            flags,
            variables: None,
        }
    }

    pub fn deferred(statements: Vec<Node>) -> Self {
        let mut block = Self::new(statements);
        block.flags |= BlockFlags::DEFERRED;
        block
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.statements.get(index)
    }

    pub fn statements(&self) -> &[Node] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<Node> {
        self.statements
    }

    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    pub fn push(&mut self, node: Node) {
        self.flags |= node_flags(&node);
        if matches!(node, Node::VariableDef(_)) {
            self.mark_dirty();
        }
        self.statements.push(node);
    }

    /// 覆写单条语句；变量缓存一并失效。
    pub fn set(&mut self, index: usize, node: Node) {
        self.flags |= node_flags(&node);
        self.statements[index] = node;
        self.mark_dirty();
    }

    /// 将 index 处的语句替换为一段新语句（mixin 展开的拼接点）。
    /// 拼接可能引入新的变量定义，缓存必须失效。
    pub fn splice(&mut self, index: usize, replacement: Vec<Node>) {
        for node in &replacement {
            self.flags |= node_flags(node);
        }
        self.statements.splice(index..index + 1, replacement);
        self.mark_dirty();
    }

    pub fn clear_flag(&mut self, flag: BlockFlags) {
        self.flags.remove(flag);
    }

    pub fn mark_dirty(&mut self) {
        self.variables = None;
    }

    /// 按当前语句全量重算标志位（测试与断言用）。
    pub fn recompute_flags(&mut self) {
        let deferred = self.flags.contains(BlockFlags::DEFERRED);
        let mut flags = BlockFlags::empty();
        for node in &self.statements {
            flags |= node_flags(node);
        }
        if deferred {
            flags |= BlockFlags::DEFERRED;
        }
        self.flags = flags;
    }

    /// 变量名 → 定义值的缓存，脏则重建。同名后定义者覆盖先定义者。
    pub fn variables(&mut self) -> &IndexMap<String, Value> {
        if self.variables.is_none() {
            let mut table = IndexMap::new();
            for node in &self.statements {
                if let Node::VariableDef(def) = node {
                    table.insert(def.name.clone(), def.value.clone());
                }
            }
            self.variables = Some(table);
        }
        self.variables.as_ref().expect("缓存刚刚重建")
    }
}

fn node_flags(node: &Node) -> BlockFlags {
    match node {
        Node::Import(_) => BlockFlags::HAS_IMPORTS,
        Node::MixinCall(_) | Node::DetachedCall(_) => BlockFlags::HAS_MIXIN_CALLS,
        Node::Declaration(decl) if decl.merge.is_some() => BlockFlags::HAS_MERGE_MODES,
        Node::Ruleset(rs) => {
            let mut flags = BlockFlags::HAS_NESTED_BLOCK;
            if rs.selectors.iter().any(|s| !s.extends.is_empty()) {
                flags |= BlockFlags::HAS_NESTED_EXTEND;
            }
            flags
        }
        Node::AtRule(_) => BlockFlags::HAS_NESTED_BLOCK,
        Node::Extend(_) => BlockFlags::HAS_NESTED_EXTEND,
        _ => BlockFlags::empty(),
    }
}

/// 一份完整的 LESS 样式表。
#[derive(Debug, Clone)]
pub struct Stylesheet {
    pub block: Block,
}

impl Stylesheet {
    pub fn new(statements: Vec<Node>) -> Self {
        Self {
            block: Block::new(statements),
        }
    }
}

/// 树中的语句联合体。
#[derive(Debug, Clone)]
pub enum Node {
    Declaration(Declaration),
    VariableDef(VariableDef),
    Ruleset(Ruleset),
    AtRule(AtRule),
    /// 无块体指令，如 `@charset "utf-8";`。
    Directive { name: String, params: String },
    Mixin(MixinDefinition),
    MixinCall(MixinCall),
    DetachedCall(DetachedCall),
    /// 规则级 `&:extend(...)`，作用于所在规则集的选择器。
    Extend(Vec<Extend>),
    Import(ImportStatement),
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub value: Value,
    pub important: bool,
    pub merge: Option<MergeMode>,
}

/// 属性合并模式：`name+:` 逗号合并，`name+_:` 空格合并。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Comma,
    Space,
}

#[derive(Debug, Clone)]
pub struct VariableDef {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct Selector {
    /// 去除 `:extend(...)` 之后的选择器文本。
    pub value: String,
    pub extends: Vec<Extend>,
}

impl Selector {
    pub fn simple(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            extends: Vec::new(),
        }
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// 单条 extend 模式；`all` 表示在目标选择器内任意位置匹配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extend {
    pub pattern: String,
    pub all: bool,
}

#[derive(Debug, Clone)]
pub struct Ruleset {
    /// 解析期分配的稳定标识，用于自递归检测；随克隆保留。
    pub id: usize,
    pub selectors: Vec<Selector>,
    pub guard: Option<Guard>,
    pub block: Block,
}

/// 带块体的 at-rule（@media / @supports / @font-face / @keyframes …）。
#[derive(Debug, Clone)]
pub struct AtRule {
    pub name: String,
    pub params: String,
    pub block: Block,
}

impl AtRule {
    pub fn is_media(&self) -> bool {
        self.name.eq_ignore_ascii_case("media")
    }
}

#[derive(Debug, Clone)]
pub struct MixinDefinition {
    pub id: usize,
    pub name: String,
    pub params: Vec<MixinParam>,
    pub guard: Option<Guard>,
    pub block: Block,
}

impl MixinDefinition {
    /// 非 variadic 且无默认值的参数个数。
    pub fn required_params(&self) -> usize {
        self.params
            .iter()
            .filter(|p| !p.variadic && p.default.is_none())
            .count()
    }
}

/// mixin 形参。变量名为 None 代表匿名 `...`。
/// 不变量：至多一个 variadic，且必须位于末尾（解析器保证）。
#[derive(Debug, Clone)]
pub struct MixinParam {
    pub name: Option<String>,
    pub default: Option<Value>,
    pub variadic: bool,
}

/// mixin 调用。`path` 是调用写法中的名字链（`#ns > .m();` 为 `["#ns", ".m"]`），
/// 组合符在解析期剥除，解析时逐元素向定义作用域内层匹配。
#[derive(Debug, Clone)]
pub struct MixinCall {
    pub path: Vec<String>,
    pub args: CallArgs,
    pub important: bool,
}

impl MixinCall {
    /// 调用路径的 CSS 形式，仅用于错误信息。
    pub fn css_name(&self) -> String {
        self.path.join(" > ")
    }

    /// 渲染实参列表，仅用于错误信息。
    pub fn args_css(&self) -> String {
        self.args
            .args
            .iter()
            .map(|arg| match &arg.name {
                Some(name) => format!("@{}: {}", name, arg.value.to_css()),
                None => arg.value.to_css(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// 分隔符标记过的实参列表。
/// 不变量：顶层分隔符统一（逗号或分号，解析器保证）。
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub args: Vec<Argument>,
    pub delimiter: Delimiter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delimiter {
    #[default]
    Comma,
    Semicolon,
}

#[derive(Debug, Clone)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Value,
}

/// 以 `@name();` 形式调用游离规则集。
#[derive(Debug, Clone)]
pub struct DetachedCall {
    pub name: String,
}

/// 游离规则集：可存入变量的规则块。
/// 定义时捕获环境快照作为闭包，调用时置于实参绑定帧之下。
#[derive(Debug, Clone)]
pub struct DetachedRuleset {
    pub block: Block,
    pub closure: Vec<Frame>,
}

#[derive(Debug, Clone)]
pub struct ImportStatement {
    pub raw: String,
    pub path: Option<String>,
    pub is_css: bool,
    /// 为真时同一文件只展开一次（`(multiple)` 选项关闭）。
    pub once: bool,
}

//! 块求值器：驱动整个语义求值。
//! 每个块先做 Pass A（mixin 调用原地展开拼接），再做 Pass B（按语句类别分发），
//! 递归进入嵌套块，产出扁平化的已求值树。

use crate::ast::{
    AtRule, BlockFlags, Declaration, Extend, MergeMode, Node, Ruleset, Stylesheet,
};
use crate::env::{Environment, FrameKind};
use crate::error::{LessError, LessResult};
use crate::functions::FunctionRegistry;
use crate::guard::{eval_guard, ValueEval};
use crate::value::Value;
use crate::EvalOptions;
use once_cell::sync::Lazy;
use regex::Regex;

/// 经过语义求值后的样式树，交给渲染器消费。
#[derive(Debug, Clone)]
pub struct EvaluatedStylesheet {
    pub charset: Option<String>,
    pub imports: Vec<String>,
    pub nodes: Vec<EvaluatedNode>,
}

#[derive(Debug, Clone)]
pub enum EvaluatedNode {
    Rule(EvaluatedRule),
    AtRule(EvaluatedAtRule),
    Directive { name: String, params: String },
}

#[derive(Debug, Clone)]
pub struct EvaluatedRule {
    pub selectors: Vec<String>,
    pub declarations: Vec<EvaluatedDeclaration>,
    /// 该规则声明的 extend 模式，供索引器预扫描。
    pub extends: Vec<Extend>,
}

#[derive(Debug, Clone)]
pub struct EvaluatedAtRule {
    pub name: String,
    pub params: String,
    pub declarations: Vec<EvaluatedDeclaration>,
    pub children: Vec<EvaluatedNode>,
}

impl EvaluatedAtRule {
    pub fn is_media(&self) -> bool {
        self.name.eq_ignore_ascii_case("media")
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatedDeclaration {
    pub name: String,
    pub value: String,
    pub important: bool,
}

/// 负责维护作用域栈并完成变量解析、mixin 展开与守卫判定。
pub struct Evaluator {
    pub(crate) env: Environment,
    pub(crate) registry: FunctionRegistry,
}

impl Evaluator {
    pub fn new(options: &EvalOptions) -> Self {
        Self {
            env: Environment::new(options.strict, options.max_mixin_depth),
            registry: FunctionRegistry::default(),
        }
    }

    pub fn with_registry(options: &EvalOptions, registry: FunctionRegistry) -> Self {
        Self {
            env: Environment::new(options.strict, options.max_mixin_depth),
            registry,
        }
    }

    pub fn evaluate(&mut self, stylesheet: Stylesheet) -> LessResult<EvaluatedStylesheet> {
        tracing::debug!(statements = stylesheet.block.len(), "开始语义求值");
        self.env.push(stylesheet.block, Vec::new(), FrameKind::Root);
        let result = self.eval_root();
        self.env.pop();
        self.env.debug_check_balanced();
        result
    }

    fn eval_root(&mut self) -> LessResult<EvaluatedStylesheet> {
        self.expand_calls()?;
        let mut sheet = EvaluatedStylesheet {
            charset: None,
            imports: Vec::new(),
            nodes: Vec::new(),
        };
        let mut i = 0;
        while i < self.env.top().block.len() {
            let node = self.env.top().block.get(i).cloned().expect("索引已检查");
            match node {
                Node::Import(import) => sheet.imports.push(import.raw),
                Node::Directive { name, params } if name.eq_ignore_ascii_case("charset") => {
                    // 第一个 @charset 生效，其余丢弃
                    if sheet.charset.is_none() {
                        sheet.charset = Some(params);
                    } else {
                        tracing::debug!("忽略重复的 @charset");
                    }
                }
                Node::Directive { name, params } => {
                    sheet.nodes.push(EvaluatedNode::Directive { name, params });
                }
                Node::VariableDef(_) => self.eval_definition(i)?,
                Node::Mixin(_) => {}
                Node::Ruleset(rs) => self.eval_ruleset(rs, &[], false, &mut sheet.nodes)?,
                Node::AtRule(ar) => {
                    let evaluated = self.eval_at_rule(ar, &[], false)?;
                    sheet.nodes.push(EvaluatedNode::AtRule(evaluated));
                }
                Node::Declaration(_) => {
                    return Err(LessError::eval_msg("顶层 mixin 调用产生了无法附加的声明"));
                }
                Node::Extend(_) | Node::MixinCall(_) | Node::DetachedCall(_) => {}
            }
            i += 1;
        }
        Ok(sheet)
    }

    /// Pass A：按索引遍历当前块，把每个 mixin / 游离规则集调用替换为其产出。
    /// 拼接会让语句表原地增减，也可能引入新的变量定义，缓存随之失效。
    pub(crate) fn expand_calls(&mut self) -> LessResult<()> {
        if !self
            .env
            .top()
            .block
            .flags()
            .contains(BlockFlags::HAS_MIXIN_CALLS)
        {
            return Ok(());
        }
        let mut i = 0;
        while i < self.env.top().block.len() {
            let produced = match self.env.top().block.get(i) {
                Some(Node::MixinCall(call)) => {
                    let call = call.clone();
                    let nodes = self.expand_mixin_call(&call).map_err(|err| {
                        err.with_frame(format!(
                            "mixin 调用 {}({})",
                            call.css_name(),
                            call.args_css()
                        ))
                    })?;
                    Some(nodes)
                }
                Some(Node::DetachedCall(call)) => {
                    let name = call.name.clone();
                    let nodes = self
                        .expand_detached_call(&name)
                        .map_err(|err| err.with_frame(format!("规则集调用 @{name}()")))?;
                    Some(nodes)
                }
                _ => None,
            };
            match produced {
                Some(nodes) => {
                    let produced_len = nodes.len();
                    self.env.top().block.splice(i, nodes);
                    i += produced_len;
                }
                None => i += 1,
            }
        }
        self.env.top().block.clear_flag(BlockFlags::HAS_MIXIN_CALLS);
        Ok(())
    }

    fn eval_ruleset(
        &mut self,
        ruleset: Ruleset,
        parents: &[String],
        force_important: bool,
        sink: &mut Vec<EvaluatedNode>,
    ) -> LessResult<()> {
        // guard 在定义处的作用域判定；为假时整个规则集不产出
        if let Some(guard) = &ruleset.guard {
            if !eval_guard(guard, self)? {
                return Ok(());
            }
        }

        let mut own = Vec::with_capacity(ruleset.selectors.len());
        let mut extends = Vec::new();
        for selector in &ruleset.selectors {
            own.push(self.interpolate(&selector.value)?);
            for extend in &selector.extends {
                extends.push(Extend {
                    pattern: self.interpolate(&extend.pattern)?,
                    all: extend.all,
                });
            }
        }
        let merged = combine_selectors(parents, &own);

        self.env
            .push(ruleset.block, merged.clone(), FrameKind::Ruleset);
        let result = self.eval_block_body(&merged, force_important, &mut extends);
        self.env.pop();
        let (declarations, pending) =
            result.map_err(|err| err.with_frame(format!("规则集 {}", merged.join(", "))))?;

        // 空声明但带 extend 的规则仍需进入索引
        if !declarations.is_empty() || !extends.is_empty() {
            sink.push(EvaluatedNode::Rule(EvaluatedRule {
                selectors: merged,
                declarations,
                extends,
            }));
        }
        sink.extend(pending);
        Ok(())
    }

    /// Pass B：对栈顶帧的块逐条分发。块在 Pass A 后不再增长。
    fn eval_block_body(
        &mut self,
        selectors: &[String],
        force_important: bool,
        extends: &mut Vec<Extend>,
    ) -> LessResult<(Vec<EvaluatedDeclaration>, Vec<EvaluatedNode>)> {
        self.expand_calls()?;
        let flags = self.env.top().block.flags();
        // 规则级 `&:extend` 在分发前按源序收集一遍；无该标志的块跳过扫描
        if flags.contains(BlockFlags::HAS_NESTED_EXTEND) {
            for node in self.env.top().block.statements() {
                if let Node::Extend(list) = node {
                    extends.extend(list.iter().cloned());
                }
            }
        }
        let merge_enabled = flags.contains(BlockFlags::HAS_MERGE_MODES);
        let mut declarations = Vec::new();
        let mut pending = Vec::new();
        let mut i = 0;
        while i < self.env.top().block.len() {
            let node = self.env.top().block.get(i).cloned().expect("索引已检查");
            match node {
                Node::Declaration(decl) => {
                    let evaluated = self.eval_declaration(&decl, force_important)?;
                    if merge_enabled {
                        push_declaration(&mut declarations, evaluated, decl.merge);
                    } else {
                        declarations.push(evaluated);
                    }
                }
                Node::VariableDef(_) => self.eval_definition(i)?,
                Node::Mixin(_) => {}
                Node::Ruleset(nested) => {
                    self.eval_ruleset(nested, selectors, force_important, &mut pending)?;
                }
                Node::AtRule(at_rule) => {
                    let evaluated = self.eval_at_rule(at_rule, selectors, force_important)?;
                    pending.push(EvaluatedNode::AtRule(evaluated));
                }
                Node::Extend(_) => {}
                Node::Directive { .. } | Node::Import(_) => {}
                // Pass A 之后不应再出现
                Node::MixinCall(_) | Node::DetachedCall(_) => {}
            }
            i += 1;
        }
        Ok((declarations, pending))
    }

    fn eval_at_rule(
        &mut self,
        at_rule: AtRule,
        parents: &[String],
        force_important: bool,
    ) -> LessResult<EvaluatedAtRule> {
        let name = at_rule.name.clone();
        let params = self.interpolate(&at_rule.params)?;
        self.env
            .push(at_rule.block, parents.to_vec(), FrameKind::AtRule);
        let result = self.eval_at_rule_body(parents, force_important);
        self.env.pop();
        let (at_declarations, scoped_declarations, scoped_extends, children) =
            result.map_err(|err| err.with_frame(format!("@{name} {params}")))?;

        let mut nodes = Vec::new();
        if !parents.is_empty() && (!scoped_declarations.is_empty() || !scoped_extends.is_empty()) {
            nodes.push(EvaluatedNode::Rule(EvaluatedRule {
                selectors: parents.to_vec(),
                declarations: scoped_declarations,
                extends: scoped_extends,
            }));
        }
        nodes.extend(children);

        Ok(EvaluatedAtRule {
            name,
            params,
            declarations: at_declarations,
            children: nodes,
        })
    }

    #[allow(clippy::type_complexity)]
    fn eval_at_rule_body(
        &mut self,
        parents: &[String],
        force_important: bool,
    ) -> LessResult<(
        Vec<EvaluatedDeclaration>,
        Vec<EvaluatedDeclaration>,
        Vec<Extend>,
        Vec<EvaluatedNode>,
    )> {
        self.expand_calls()?;
        let flags = self.env.top().block.flags();
        let mut scoped_extends = Vec::new();
        if flags.contains(BlockFlags::HAS_NESTED_EXTEND) {
            for node in self.env.top().block.statements() {
                if let Node::Extend(list) = node {
                    scoped_extends.extend(list.iter().cloned());
                }
            }
        }
        let merge_enabled = flags.contains(BlockFlags::HAS_MERGE_MODES);
        let mut at_declarations = Vec::new();
        let mut scoped_declarations = Vec::new();
        let mut children = Vec::new();
        let mut i = 0;
        while i < self.env.top().block.len() {
            let node = self.env.top().block.get(i).cloned().expect("索引已检查");
            match node {
                Node::Declaration(decl) => {
                    let evaluated = self.eval_declaration(&decl, force_important)?;
                    // 嵌套在选择器内的 @media，声明归属到作用域规则
                    let sink = if parents.is_empty() {
                        &mut at_declarations
                    } else {
                        &mut scoped_declarations
                    };
                    if merge_enabled {
                        push_declaration(sink, evaluated, decl.merge);
                    } else {
                        sink.push(evaluated);
                    }
                }
                Node::VariableDef(_) => self.eval_definition(i)?,
                Node::Mixin(_) => {}
                Node::Ruleset(nested) => {
                    self.eval_ruleset(nested, parents, force_important, &mut children)?;
                }
                Node::AtRule(inner) => {
                    let evaluated = self.eval_at_rule(inner, parents, force_important)?;
                    children.push(EvaluatedNode::AtRule(evaluated));
                }
                Node::Extend(_) => {}
                Node::Directive { .. } | Node::Import(_) => {}
                Node::MixinCall(_) | Node::DetachedCall(_) => {}
            }
            i += 1;
        }
        Ok((at_declarations, scoped_declarations, scoped_extends, children))
    }

    /// 对索引处的变量定义做求值并写回。
    /// 游离规则集不做急切求值，只捕获当前环境作为闭包，留待调用时展开。
    pub(crate) fn eval_definition(&mut self, index: usize) -> LessResult<()> {
        let node = self.env.top().block.get(index).cloned();
        let Some(Node::VariableDef(mut def)) = node else {
            return Ok(());
        };
        match &mut def.value {
            Value::DetachedRuleset(detached)
                if detached.block.flags().contains(BlockFlags::DEFERRED) =>
            {
                detached.closure = self.env.frames().to_vec();
                detached.block.clear_flag(BlockFlags::DEFERRED);
                self.env.top().block.set(index, Node::VariableDef(def));
            }
            value if value.needs_eval() => {
                self.env.begin_resolving(&def.name)?;
                let evaluated = self.eval_value(value);
                self.env.end_resolving();
                def.value = evaluated?;
                self.env.top().block.set(index, Node::VariableDef(def));
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn eval_declaration(
        &mut self,
        decl: &Declaration,
        force_important: bool,
    ) -> LessResult<EvaluatedDeclaration> {
        let name = self.interpolate(&decl.name)?;
        let value = self.eval_value(&decl.value)?;
        Ok(EvaluatedDeclaration {
            name,
            value: value.to_css(),
            important: decl.important || force_important,
        })
    }

    /// 变量求值：取原始定义值，需要时在当前环境继续求值。
    pub(crate) fn eval_variable(&mut self, name: &str) -> LessResult<Value> {
        let raw = self.env.resolve_variable(name)?;
        if !raw.needs_eval() {
            return Ok(raw);
        }
        self.env.begin_resolving(name)?;
        let result = self.eval_value(&raw);
        self.env.end_resolving();
        result
    }

    /// `@{name}` 插值，用于属性名、选择器与 at-rule 参数。
    pub(crate) fn interpolate(&mut self, raw: &str) -> LessResult<String> {
        if !raw.contains("@{") {
            return Ok(raw.trim().to_string());
        }
        static INTERP_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"@\{([\w-]+)\}").expect("插值正则编译失败"));
        let mut out = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in INTERP_RE.captures_iter(raw) {
            let matched = caps.get(0).expect("捕获组 0 恒存在");
            out.push_str(&raw[last..matched.start()]);
            let name = caps.get(1).expect("捕获组 1 恒存在").as_str();
            let value = self.eval_variable(name)?;
            out.push_str(value.to_css().trim());
            last = matched.end();
        }
        out.push_str(&raw[last..]);
        Ok(out.trim().to_string())
    }
}

impl ValueEval for Evaluator {
    /// 值求值分发中枢：闭合联合体上的穷尽匹配。
    fn eval_value(&mut self, value: &Value) -> LessResult<Value> {
        if !value.needs_eval() {
            return Ok(value.clone());
        }
        match value {
            Value::Variable(name) => self.eval_variable(name),
            Value::Operation { op, left, right } => {
                let left = self.eval_value(left)?;
                let right = self.eval_value(right)?;
                left.operate(*op, &right, self.env.strict)
            }
            Value::Call { name, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_value(arg)?);
                }
                match self.registry.lookup(name) {
                    Some(function) => function(&evaluated)
                        .map_err(|err| err.with_frame(format!("函数调用 {name}()"))),
                    // 未注册的名字原样保留为 CSS 函数
                    None => Ok(Value::Call {
                        name: name.clone(),
                        args: evaluated,
                    }),
                }
            }
            Value::Expression(items) => {
                let mut evaluated = Vec::with_capacity(items.len());
                for item in items {
                    evaluated.push(self.eval_value(item)?);
                }
                if evaluated.len() == 1 {
                    Ok(evaluated.pop().expect("长度已检查"))
                } else {
                    Ok(Value::Expression(evaluated))
                }
            }
            Value::List(items) => {
                let mut evaluated = Vec::with_capacity(items.len());
                for item in items {
                    evaluated.push(self.eval_value(item)?);
                }
                Ok(Value::List(evaluated))
            }
            Value::Quoted(quoted) => {
                let mut result = quoted.clone();
                result.text = self.interpolate_text(&quoted.text)?;
                Ok(Value::Quoted(result))
            }
            Value::Keyword(keyword) => Ok(Value::Keyword(self.interpolate_text(keyword)?)),
            Value::DetachedRuleset(detached) => {
                let mut captured = detached.clone();
                if captured.block.flags().contains(BlockFlags::DEFERRED) {
                    captured.closure = self.env.frames().to_vec();
                    captured.block.clear_flag(BlockFlags::DEFERRED);
                }
                Ok(Value::DetachedRuleset(captured))
            }
            Value::Dimension(_) | Value::Color(_) | Value::Raw(_) => Ok(value.clone()),
        }
    }
}

impl Evaluator {
    /// 与 `interpolate` 相同但不去除首尾空白（引号内文本）。
    fn interpolate_text(&mut self, raw: &str) -> LessResult<String> {
        if !raw.contains("@{") {
            return Ok(raw.to_string());
        }
        static INTERP_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"@\{([\w-]+)\}").expect("插值正则编译失败"));
        let mut out = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in INTERP_RE.captures_iter(raw) {
            let matched = caps.get(0).expect("捕获组 0 恒存在");
            out.push_str(&raw[last..matched.start()]);
            let name = caps.get(1).expect("捕获组 1 恒存在").as_str();
            let value = self.eval_variable(name)?;
            out.push_str(value.to_css().trim());
            last = matched.end();
        }
        out.push_str(&raw[last..]);
        Ok(out)
    }
}

/// 合并父子选择器，支持 `&` 占位符；嵌套默认使用后代组合。
pub(crate) fn combine_selectors(parents: &[String], current: &[String]) -> Vec<String> {
    if parents.is_empty() {
        return current.to_vec();
    }
    let mut result = Vec::new();
    for parent in parents {
        for child in current {
            let selector = if child.contains('&') {
                child.replace('&', parent).trim().to_string()
            } else {
                format!("{} {}", parent.trim(), child.trim())
            };
            result.push(selector);
        }
    }
    result
}

/// 声明入列；带合并模式的同名属性拼到既有声明上。
pub(crate) fn push_declaration(
    declarations: &mut Vec<EvaluatedDeclaration>,
    decl: EvaluatedDeclaration,
    merge: Option<MergeMode>,
) {
    if let Some(mode) = merge {
        if let Some(existing) = declarations.iter_mut().rev().find(|d| d.name == decl.name) {
            let separator = match mode {
                MergeMode::Comma => ", ",
                MergeMode::Space => " ",
            };
            existing.value = format!("{}{}{}", existing.value, separator, decl.value);
            existing.important |= decl.important;
            return;
        }
    }
    declarations.push(decl);
}

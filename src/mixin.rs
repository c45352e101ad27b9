//! mixin 展开：实参绑定、守卫甄别与函数体求值。
//! 所有名字匹配且绑定成功的候选依次产出；绑定成功但守卫为假的候选
//! 静默跳过，一个候选都绑定不上才报错。

use crate::ast::{Argument, Block, MixinCall, MixinParam, Node, VariableDef};
use crate::env::{CandidateKind, FrameKind, MixinCandidate};
use crate::error::{EvalErrorKind, LessError, LessResult};
use crate::evaluator::Evaluator;
use crate::guard::{eval_guard, Guard, ValueEval};
use crate::value::Value;

/// 单个候选的绑定结果。
enum BindOutcome {
    /// 绑定成功，携带供绑定帧使用的变量定义（默认值保持原始形态）。
    Bound(Vec<Node>),
    /// 元数对不上，候选出局但不报错。
    Mismatch,
    /// 具名实参在形参表中找不到对应名字。
    NamedMiss(String),
}

/// 形参与实参对位。具名实参先占槽，位置实参按序补空，
/// 默认值兜底，variadic 形参吞掉剩余的位置实参。
fn bind_arguments(params: &[MixinParam], args: &[Argument]) -> BindOutcome {
    let has_variadic = params.last().map(|p| p.variadic).unwrap_or(false);
    let fixed = if has_variadic {
        &params[..params.len() - 1]
    } else {
        params
    };

    let mut slots: Vec<Option<Value>> = vec![None; fixed.len()];
    let mut positional = Vec::new();
    for arg in args {
        match &arg.name {
            Some(name) => {
                match fixed
                    .iter()
                    .position(|p| p.name.as_deref() == Some(name.as_str()))
                {
                    Some(slot) => slots[slot] = Some(arg.value.clone()),
                    None => return BindOutcome::NamedMiss(name.clone()),
                }
            }
            None => positional.push(arg.value.clone()),
        }
    }

    let mut rest = Vec::new();
    for value in positional {
        match slots.iter().position(|slot| slot.is_none()) {
            Some(slot) => slots[slot] = Some(value),
            None if has_variadic => rest.push(value),
            None => return BindOutcome::Mismatch,
        }
    }

    let mut bindings = Vec::with_capacity(params.len());
    for (param, slot) in fixed.iter().zip(slots) {
        let value = match slot {
            Some(value) => {
                // 字面量形参只接受渲染结果相等的实参
                if param.name.is_none() {
                    if let Some(literal) = &param.default {
                        if literal.to_css() != value.to_css() {
                            return BindOutcome::Mismatch;
                        }
                    }
                }
                value
            }
            None => match (&param.name, &param.default) {
                (Some(_), Some(default)) => default.clone(),
                _ => return BindOutcome::Mismatch,
            },
        };
        if let Some(name) = &param.name {
            bindings.push(Node::VariableDef(VariableDef {
                name: name.clone(),
                value,
            }));
        }
    }
    if has_variadic {
        let param = params.last().expect("variadic 形参存在");
        if let Some(name) = &param.name {
            bindings.push(Node::VariableDef(VariableDef {
                name: name.clone(),
                value: Value::List(rest),
            }));
        }
    }
    BindOutcome::Bound(bindings)
}

impl Evaluator {
    /// 展开一次 mixin 调用，返回可拼接回调用方块的语句序列。
    /// 实参在调用方作用域先行求值，之后才切换到各候选的闭包。
    pub(crate) fn expand_mixin_call(&mut self, call: &MixinCall) -> LessResult<Vec<Node>> {
        let mut evaluated_args = Vec::with_capacity(call.args.args.len());
        for arg in &call.args.args {
            evaluated_args.push(Argument {
                name: arg.name.clone(),
                value: self.eval_value(&arg.value)?,
            });
        }

        let candidates = self.env.collect_mixins(&call.path);
        if candidates.is_empty() {
            return Err(LessError::eval(EvalErrorKind::UndefinedMixin(
                call.css_name(),
            )));
        }

        let mut produced = Vec::new();
        let mut any_bound = false;
        let mut named_miss = None;
        for candidate in candidates {
            let params = match &candidate.kind {
                CandidateKind::Mixin(def) => def.params.clone(),
                CandidateKind::Ruleset(_) => Vec::new(),
            };
            match bind_arguments(&params, &evaluated_args) {
                BindOutcome::Bound(bindings) => {
                    any_bound = true;
                    if let Some(nodes) =
                        self.invoke_candidate(candidate, bindings, call.important)?
                    {
                        produced.extend(nodes);
                    }
                }
                BindOutcome::Mismatch => {}
                BindOutcome::NamedMiss(name) => named_miss = Some(name),
            }
        }

        if !any_bound {
            if let Some(arg) = named_miss {
                return Err(LessError::eval(EvalErrorKind::NamedArgumentNotFound {
                    mixin: call.css_name(),
                    arg,
                }));
            }
            return Err(LessError::eval(EvalErrorKind::UndefinedMixin(format!(
                "{}({})",
                call.css_name(),
                call.args_css()
            ))));
        }
        Ok(produced)
    }

    /// 调用单个候选：切到定义点闭包，压绑定帧与函数体帧，
    /// 守卫为假返回 None。深度与自重入计数在所有出口都回退。
    fn invoke_candidate(
        &mut self,
        candidate: MixinCandidate,
        bindings: Vec<Node>,
        important: bool,
    ) -> LessResult<Option<Vec<Node>>> {
        let name = candidate.kind.name().to_string();
        let (guard, body, ruleset_id) = match candidate.kind {
            CandidateKind::Mixin(def) => (def.guard, def.block, None),
            CandidateKind::Ruleset(rs) => (rs.guard, rs.block, Some(rs.id)),
        };

        let saved = self.env.swap_frames(candidate.closure);
        self.env.push(Block::new(bindings), Vec::new(), FrameKind::Binding);
        let outcome = self.run_candidate_body(guard, body, important, &name, ruleset_id);
        self.env.pop();
        let _closure = self.env.swap_frames(saved);
        outcome
    }

    /// 守卫在绑定帧与闭包之上判定；只有守卫通过的候选才占用递归深度。
    fn run_candidate_body(
        &mut self,
        guard: Option<Guard>,
        body: Block,
        important: bool,
        name: &str,
        ruleset_id: Option<usize>,
    ) -> LessResult<Option<Vec<Node>>> {
        if let Some(guard) = &guard {
            if !eval_guard(guard, self)? {
                tracing::trace!(mixin = name, "guard 为假, 跳过该候选");
                return Ok(None);
            }
        }

        self.env.enter_call(name)?;
        if let Some(id) = ruleset_id {
            if let Err(err) = self.env.enter_ruleset(id, name) {
                self.env.exit_call();
                return Err(err);
            }
        }
        self.env.push(body, Vec::new(), FrameKind::Body);
        let nodes = self.resolve_block_nodes(important);
        self.env.pop();
        if let Some(id) = ruleset_id {
            self.env.exit_ruleset(id);
        }
        self.env.exit_call();
        nodes.map(Some)
    }

    /// 以 `@name();` 调用游离规则集：取出其闭包栈并在其上求值函数体。
    pub(crate) fn expand_detached_call(&mut self, name: &str) -> LessResult<Vec<Node>> {
        let value = self.eval_variable(name)?;
        let Value::DetachedRuleset(detached) = value else {
            return Err(LessError::eval(EvalErrorKind::TypeMismatch(format!(
                "@{name} 不是可调用的游离规则集, 实际为{}",
                value.type_name()
            ))));
        };

        self.env.enter_call(&format!("@{name}"))?;
        let saved = self.env.swap_frames(detached.closure);
        self.env.push(detached.block, Vec::new(), FrameKind::Body);
        let outcome = self.resolve_block_nodes(false);
        self.env.pop();
        let _closure = self.env.swap_frames(saved);
        self.env.exit_call();
        outcome
    }

    /// 结构保持的函数体求值：声明与变量取到终值，嵌套块递归处理，
    /// 结果可原样拼接回调用方。产出一经返回便不再依赖本次调用的作用域。
    pub(crate) fn resolve_block_nodes(&mut self, force_important: bool) -> LessResult<Vec<Node>> {
        self.expand_calls()?;
        let mut resolved = Vec::new();
        let mut i = 0;
        while i < self.env.top().block.len() {
            let node = self.env.top().block.get(i).cloned().expect("索引已检查");
            match node {
                Node::Declaration(mut decl) => {
                    decl.name = self.interpolate(&decl.name)?;
                    decl.value = self.eval_value(&decl.value)?;
                    decl.important |= force_important;
                    resolved.push(Node::Declaration(decl));
                }
                Node::VariableDef(_) => {
                    self.eval_definition(i)?;
                    if let Some(updated) = self.env.top().block.get(i).cloned() {
                        resolved.push(updated);
                    }
                }
                Node::Mixin(def) => resolved.push(Node::Mixin(def)),
                Node::Ruleset(mut ruleset) => {
                    let keep = match &ruleset.guard {
                        Some(guard) => eval_guard(guard, self)?,
                        None => true,
                    };
                    if keep {
                        let mut selectors = Vec::with_capacity(ruleset.selectors.len());
                        for selector in &ruleset.selectors {
                            let mut out = selector.clone();
                            out.value = self.interpolate(&selector.value)?;
                            for extend in &mut out.extends {
                                extend.pattern = self.interpolate(&extend.pattern)?;
                            }
                            selectors.push(out);
                        }
                        self.env.push(ruleset.block, Vec::new(), FrameKind::Body);
                        let inner = self.resolve_block_nodes(force_important);
                        self.env.pop();
                        ruleset.guard = None;
                        ruleset.selectors = selectors;
                        ruleset.block = Block::new(inner?);
                        resolved.push(Node::Ruleset(ruleset));
                    }
                }
                Node::AtRule(mut at_rule) => {
                    at_rule.params = self.interpolate(&at_rule.params)?;
                    self.env.push(at_rule.block, Vec::new(), FrameKind::Body);
                    let inner = self.resolve_block_nodes(force_important);
                    self.env.pop();
                    at_rule.block = Block::new(inner?);
                    resolved.push(Node::AtRule(at_rule));
                }
                node @ (Node::Extend(_) | Node::Directive { .. } | Node::Import(_)) => {
                    resolved.push(node)
                }
                Node::MixinCall(_) | Node::DetachedCall(_) => {}
            }
            i += 1;
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{EvaluatedNode, Evaluator};
    use crate::parser::LessParser;
    use crate::value::Dimension;
    use crate::EvalOptions;

    fn param(name: &str, default: Option<Value>) -> MixinParam {
        MixinParam {
            name: Some(name.into()),
            default,
            variadic: false,
        }
    }

    fn positional(value: Value) -> Argument {
        Argument { name: None, value }
    }

    fn named(name: &str, value: Value) -> Argument {
        Argument {
            name: Some(name.into()),
            value,
        }
    }

    fn dim(value: f64) -> Value {
        Value::Dimension(Dimension::new(value, "px"))
    }

    fn binding_names(outcome: BindOutcome) -> Vec<String> {
        match outcome {
            BindOutcome::Bound(defs) => defs
                .into_iter()
                .map(|node| match node {
                    Node::VariableDef(def) => def.name,
                    other => panic!("绑定帧只应含变量定义: {other:?}"),
                })
                .collect(),
            BindOutcome::Mismatch => panic!("期望绑定成功"),
            BindOutcome::NamedMiss(name) => panic!("意外的具名失配: {name}"),
        }
    }

    #[test]
    fn positional_then_defaults() {
        let params = vec![param("a", None), param("b", Some(dim(2.0)))];
        let names = binding_names(bind_arguments(&params, &[positional(dim(1.0))]));
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn named_arguments_occupy_their_slot() {
        let params = vec![param("a", None), param("b", None)];
        let outcome = bind_arguments(&params, &[named("b", dim(9.0)), positional(dim(1.0))]);
        let BindOutcome::Bound(defs) = outcome else {
            panic!("期望绑定成功");
        };
        let Node::VariableDef(first) = &defs[0] else {
            panic!("期望变量定义");
        };
        assert_eq!(first.name, "a");
        assert_eq!(first.value.to_css(), "1px");
    }

    #[test]
    fn unknown_named_argument_is_reported() {
        let params = vec![param("a", None)];
        assert!(matches!(
            bind_arguments(&params, &[named("missing", dim(1.0))]),
            BindOutcome::NamedMiss(name) if name == "missing"
        ));
    }

    #[test]
    fn arity_mismatch_is_silent() {
        let params = vec![param("a", None)];
        assert!(matches!(
            bind_arguments(&params, &[positional(dim(1.0)), positional(dim(2.0))]),
            BindOutcome::Mismatch
        ));
        assert!(matches!(bind_arguments(&params, &[]), BindOutcome::Mismatch));
    }

    #[test]
    fn variadic_collects_surplus() {
        let params = vec![
            param("a", None),
            MixinParam {
                name: Some("rest".into()),
                default: None,
                variadic: true,
            },
        ];
        let outcome = bind_arguments(
            &params,
            &[positional(dim(1.0)), positional(dim(2.0)), positional(dim(3.0))],
        );
        let BindOutcome::Bound(defs) = outcome else {
            panic!("期望绑定成功");
        };
        let Node::VariableDef(rest) = &defs[1] else {
            panic!("期望变量定义");
        };
        assert_eq!(rest.name, "rest");
        assert_eq!(rest.value.to_css(), "2px, 3px");
    }

    fn compile_rules(source: &str) -> Vec<EvaluatedNode> {
        let sheet = LessParser::new().parse(source).unwrap();
        Evaluator::new(&EvalOptions::default())
            .evaluate(sheet)
            .unwrap()
            .nodes
    }

    #[test]
    fn all_matching_overloads_fire() {
        let nodes = compile_rules(
            ".m(@a) { w: @a; }\n.m(@a, @b: 1) { h: @b; }\n.x { .m(5px); }",
        );
        let EvaluatedNode::Rule(rule) = &nodes[0] else {
            panic!("期望规则节点");
        };
        assert_eq!(rule.declarations.len(), 2);
        assert_eq!(rule.declarations[0].value, "5px");
        assert_eq!(rule.declarations[1].value, "1");
    }

    #[test]
    fn guard_false_candidate_is_skipped_without_error() {
        let nodes = compile_rules(
            ".m(@a) when (@a > 10) { big: @a; }\n.m(@a) when (@a <= 10) { small: @a; }\n.x { .m(3); }",
        );
        let EvaluatedNode::Rule(rule) = &nodes[0] else {
            panic!("期望规则节点");
        };
        assert_eq!(rule.declarations.len(), 1);
        assert_eq!(rule.declarations[0].name, "small");
    }

    #[test]
    fn closure_sees_definition_scope_not_call_scope() {
        let nodes = compile_rules(
            "@c: def-site;\n.m() { v: @c; }\n.x { @c: call-site; .m(); }",
        );
        let EvaluatedNode::Rule(rule) = &nodes[0] else {
            panic!("期望规则节点");
        };
        // 绑定帧之下是定义点闭包，调用方局部变量不可见
        assert_eq!(rule.declarations[0].value, "def-site");
    }

    #[test]
    fn plain_ruleset_is_callable_without_args() {
        let nodes = compile_rules(".base { color: red; }\n.x { .base; }");
        assert_eq!(nodes.len(), 2);
        let EvaluatedNode::Rule(rule) = &nodes[1] else {
            panic!("期望规则节点");
        };
        assert_eq!(rule.selectors, vec![".x".to_string()]);
        assert_eq!(rule.declarations[0].value, "red");
    }

    #[test]
    fn namespaced_call_matches_nested_definition() {
        let nodes = compile_rules(
            "#ns { @c: green; .m() { color: @c; } }\n.x { #ns > .m(); }\n.y { #ns.m(); }",
        );
        // #ns 自身无声明不产出，两个调用方各得一条
        assert_eq!(nodes.len(), 2);
        for (node, selector) in nodes.iter().zip([".x", ".y"]) {
            let EvaluatedNode::Rule(rule) = node else {
                panic!("期望规则节点");
            };
            assert_eq!(rule.selectors, vec![selector.to_string()]);
            // 命名空间内的变量对函数体可见
            assert_eq!(rule.declarations[0].value, "green");
        }
    }

    #[test]
    fn important_call_marks_all_produced_declarations() {
        let nodes = compile_rules(".m() { color: red; .inner { width: 1px; } }\n.x { .m() !important; }");
        let EvaluatedNode::Rule(rule) = &nodes[0] else {
            panic!("期望规则节点");
        };
        assert!(rule.declarations[0].important);
        let EvaluatedNode::Rule(inner) = &nodes[1] else {
            panic!("期望规则节点");
        };
        assert!(inner.declarations[0].important);
    }

    #[test]
    fn recursion_limit_boundary() {
        let source = |limit: usize| {
            format!(
                ".m(@n) when (@n > 0) {{ .m(@n - 1); }}\n.m(@n) when (@n = 0) {{ done: @n; }}\n.x {{ .m({limit}); }}"
            )
        };
        let options = EvalOptions {
            max_mixin_depth: 8,
            ..EvalOptions::default()
        };
        // 深度恰好触顶:通过;再多一层:报错
        let sheet = LessParser::new().parse(&source(7)).unwrap();
        assert!(Evaluator::new(&options).evaluate(sheet).is_ok());
        let sheet = LessParser::new().parse(&source(8)).unwrap();
        let err = Evaluator::new(&options).evaluate(sheet).unwrap_err();
        assert!(matches!(
            err.kind(),
            Some(EvalErrorKind::RecursionLimit { limit: 8, .. })
        ));
    }

    #[test]
    fn undefined_mixin_is_an_error() {
        let sheet = LessParser::new().parse(".x { .nope(); }").unwrap();
        let err = Evaluator::new(&EvalOptions::default())
            .evaluate(sheet)
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            Some(EvalErrorKind::UndefinedMixin(_))
        ));
    }

    #[test]
    fn detached_ruleset_call_uses_definition_closure() {
        let nodes = compile_rules(
            "@pad: 4px;\n@panel: { padding: @pad; };\n.x { @panel(); }",
        );
        let EvaluatedNode::Rule(rule) = &nodes[0] else {
            panic!("期望规则节点");
        };
        assert_eq!(rule.declarations[0].name, "padding");
        assert_eq!(rule.declarations[0].value, "4px");
    }

    #[test]
    fn mixin_exports_variables_to_caller() {
        let nodes = compile_rules(".m() { @exported: 7px; }\n.x { .m(); width: @exported; }");
        let EvaluatedNode::Rule(rule) = &nodes[0] else {
            panic!("期望规则节点");
        };
        assert_eq!(rule.declarations[0].value, "7px");
    }
}

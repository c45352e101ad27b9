//! 作用域栈：每进入一个嵌套块压入一帧，变量与 mixin 查找由内向外。
//! 帧从池中获取、严格按栈序归还；mixin 递归深度也记录在这里，
//! 避免任何进程级可变状态。

use crate::ast::{Block, MixinDefinition, Node, Ruleset};
use crate::error::{EvalErrorKind, LessError, LessResult};
use crate::value::Value;

/// 帧的来源类别，调试与闭包拼接时使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameKind {
    #[default]
    Root,
    Ruleset,
    AtRule,
    /// mixin 调用的实参绑定帧。
    Binding,
    /// mixin / 游离规则集的函数体帧。
    Body,
}

/// 作用域栈中的一帧，持有所属块与合并后的选择器上下文。
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub block: Block,
    pub selectors: Vec<String>,
    pub kind: FrameKind,
}

/// 从某一帧解析出的 mixin 候选，附带定义点的闭包栈。
#[derive(Debug, Clone)]
pub struct MixinCandidate {
    pub kind: CandidateKind,
    /// 定义点可见的帧栈快照，调用时置于绑定帧之下。
    pub closure: Vec<Frame>,
}

#[derive(Debug, Clone)]
pub enum CandidateKind {
    Mixin(MixinDefinition),
    Ruleset(Ruleset),
}

impl CandidateKind {
    pub fn name(&self) -> &str {
        match self {
            CandidateKind::Mixin(def) => &def.name,
            CandidateKind::Ruleset(rs) => rs
                .selectors
                .first()
                .map(|s| s.value.as_str())
                .unwrap_or(""),
        }
    }
}

pub struct Environment {
    frames: Vec<Frame>,
    /// 空闲帧池；acquire/release 必须严格配对。
    free: Vec<Frame>,
    outstanding: usize,
    /// 正在求值中的变量名，检测循环引用。
    resolving: Vec<String>,
    /// 正在展开中的规则集 id，禁止自重入。
    active_rulesets: Vec<usize>,
    pub call_stack: Vec<String>,
    depth: usize,
    max_depth: usize,
    pub strict: bool,
}

impl Environment {
    pub fn new(strict: bool, max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            free: Vec::new(),
            outstanding: 0,
            resolving: Vec::new(),
            active_rulesets: Vec::new(),
            call_stack: Vec::new(),
            depth: 0,
            max_depth,
            strict,
        }
    }

    /// 压入新帧。`selectors` 为空时继承父帧的选择器上下文。
    pub fn push(&mut self, block: Block, selectors: Vec<String>, kind: FrameKind) {
        let selectors = if selectors.is_empty() {
            self.frames
                .last()
                .map(|f| f.selectors.clone())
                .unwrap_or_default()
        } else {
            selectors
        };
        let mut frame = self.free.pop().unwrap_or_default();
        frame.block = block;
        frame.selectors = selectors;
        frame.kind = kind;
        self.frames.push(frame);
        self.outstanding += 1;
    }

    pub fn pop(&mut self) {
        if let Some(mut frame) = self.frames.pop() {
            frame.block = Block::default();
            frame.selectors.clear();
            self.free.push(frame);
            self.outstanding -= 1;
        }
    }

    pub fn top(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("作用域栈不应为空")
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// 把整个帧栈替换为闭包栈，返回原栈（mixin 调用的进出点）。
    pub fn swap_frames(&mut self, frames: Vec<Frame>) -> Vec<Frame> {
        std::mem::replace(&mut self.frames, frames)
    }

    /// 顶层求值结束后校验池中借出的帧已全部归还。
    pub fn debug_check_balanced(&self) {
        debug_assert_eq!(self.outstanding, 0, "作用域帧未按栈序归还");
        debug_assert!(self.resolving.is_empty(), "变量求值栈未清空");
    }

    /// 由内向外查找变量的原始定义值；各帧的块缓存脏则先重建。
    pub fn resolve_variable(&mut self, name: &str) -> LessResult<Value> {
        for frame in self.frames.iter_mut().rev() {
            if let Some(value) = frame.block.variables().get(name) {
                return Ok(value.clone());
            }
        }
        Err(LessError::eval(EvalErrorKind::UndefinedVariable(
            name.to_string(),
        )))
    }

    /// 变量求值的进入点：已在求值中的名字再次出现即为循环引用。
    pub fn begin_resolving(&mut self, name: &str) -> LessResult<()> {
        if self.resolving.iter().any(|n| n == name) {
            return Err(LessError::eval(EvalErrorKind::CircularVariable(
                name.to_string(),
            )));
        }
        self.resolving.push(name.to_string());
        Ok(())
    }

    pub fn end_resolving(&mut self) {
        self.resolving.pop();
    }

    /// 收集所有帧中路径匹配的 mixin / 规则集定义。
    /// 由内向外、帧内按源序；路径首元素命中后逐元素向块内层匹配，
    /// 每个候选都带上定义点可见的闭包栈，途经的命名空间块依次叠于其上。
    pub fn collect_mixins(&self, path: &[String]) -> Vec<MixinCandidate> {
        let Some((first, rest)) = path.split_first() else {
            return Vec::new();
        };
        let mut candidates = Vec::new();
        for (idx, frame) in self.frames.iter().enumerate().rev() {
            collect_in_block(
                frame.block.statements(),
                first,
                rest,
                &self.frames[..=idx],
                &mut Vec::new(),
                &mut candidates,
            );
        }
        candidates
    }

    /// mixin 展开进入点：深度加一并检查上限。
    pub fn enter_call(&mut self, name: &str) -> LessResult<()> {
        self.call_stack.push(name.to_string());
        self.depth += 1;
        if self.depth > self.max_depth {
            let err = LessError::eval(EvalErrorKind::RecursionLimit {
                limit: self.max_depth,
                path: self.call_stack.join(" -> "),
            });
            self.exit_call();
            return Err(err);
        }
        Ok(())
    }

    pub fn exit_call(&mut self) {
        self.call_stack.pop();
        self.depth -= 1;
    }

    /// 规则集作为 mixin 调用时禁止自重入，独立于深度计数。
    pub fn enter_ruleset(&mut self, id: usize, name: &str) -> LessResult<()> {
        if self.active_rulesets.contains(&id) {
            return Err(LessError::eval(EvalErrorKind::RulesetSelfRecursion(
                name.to_string(),
            )));
        }
        self.active_rulesets.push(id);
        Ok(())
    }

    pub fn exit_ruleset(&mut self, id: usize) {
        if let Some(pos) = self.active_rulesets.iter().rposition(|&v| v == id) {
            self.active_rulesets.remove(pos);
        }
    }
}

/// 在一个语句表内匹配路径的当前元素；还有剩余元素时把命名空间块
/// 作为新帧压入闭包继续向内。
fn collect_in_block(
    statements: &[Node],
    name: &str,
    rest: &[String],
    base: &[Frame],
    namespaces: &mut Vec<Frame>,
    out: &mut Vec<MixinCandidate>,
) {
    for node in statements {
        let inner = match node {
            Node::Mixin(def) if def.name == name => {
                if rest.is_empty() {
                    out.push(MixinCandidate {
                        kind: CandidateKind::Mixin(def.clone()),
                        closure: joined_closure(base, namespaces),
                    });
                    continue;
                }
                &def.block
            }
            Node::Ruleset(rs) if rs.selectors.iter().any(|s| s.value.trim() == name) => {
                if rest.is_empty() {
                    out.push(MixinCandidate {
                        kind: CandidateKind::Ruleset(rs.clone()),
                        closure: joined_closure(base, namespaces),
                    });
                    continue;
                }
                &rs.block
            }
            _ => continue,
        };
        let (next, tail) = rest.split_first().expect("剩余路径非空");
        namespaces.push(Frame {
            block: inner.clone(),
            selectors: Vec::new(),
            kind: FrameKind::Ruleset,
        });
        collect_in_block(inner.statements(), next, tail, base, namespaces, out);
        namespaces.pop();
    }
}

fn joined_closure(base: &[Frame], namespaces: &[Frame]) -> Vec<Frame> {
    let mut closure = base.to_vec();
    closure.extend_from_slice(namespaces);
    closure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VariableDef;

    fn def(name: &str, css: &str) -> Node {
        Node::VariableDef(VariableDef {
            name: name.into(),
            value: Value::Keyword(css.into()),
        })
    }

    #[test]
    fn innermost_definition_wins() {
        let mut env = Environment::new(false, 64);
        env.push(Block::new(vec![def("x", "outer")]), vec![], FrameKind::Root);
        env.push(
            Block::new(vec![def("x", "inner")]),
            vec![],
            FrameKind::Ruleset,
        );
        assert_eq!(env.resolve_variable("x").unwrap().to_css(), "inner");
        env.pop();
        assert_eq!(env.resolve_variable("x").unwrap().to_css(), "outer");
        env.pop();
        env.debug_check_balanced();
    }

    #[test]
    fn unresolved_variable_is_an_error() {
        let mut env = Environment::new(false, 64);
        env.push(Block::new(vec![]), vec![], FrameKind::Root);
        let err = env.resolve_variable("missing").unwrap_err();
        assert_eq!(
            err.kind(),
            Some(&EvalErrorKind::UndefinedVariable("missing".into()))
        );
        env.pop();
    }

    #[test]
    fn depth_limit_reports_call_path() {
        let mut env = Environment::new(false, 2);
        env.enter_call(".a").unwrap();
        env.enter_call(".b").unwrap();
        let err = env.enter_call(".c").unwrap_err();
        match err.kind() {
            Some(EvalErrorKind::RecursionLimit { limit, path }) => {
                assert_eq!(*limit, 2);
                assert_eq!(path, ".a -> .b -> .c");
            }
            other => panic!("意外的错误: {other:?}"),
        }
        env.exit_call();
        env.exit_call();
    }

    #[test]
    fn ruleset_reentry_is_rejected() {
        let mut env = Environment::new(false, 64);
        env.enter_ruleset(7, ".loop").unwrap();
        let err = env.enter_ruleset(7, ".loop").unwrap_err();
        assert_eq!(
            err.kind(),
            Some(&EvalErrorKind::RulesetSelfRecursion(".loop".into()))
        );
        env.exit_ruleset(7);
        env.enter_ruleset(7, ".loop").unwrap();
        env.exit_ruleset(7);
    }

    #[test]
    fn circular_resolution_is_detected() {
        let mut env = Environment::new(false, 64);
        env.begin_resolving("a").unwrap();
        env.begin_resolving("b").unwrap();
        let err = env.begin_resolving("a").unwrap_err();
        assert_eq!(
            err.kind(),
            Some(&EvalErrorKind::CircularVariable("a".into()))
        );
        env.end_resolving();
        env.end_resolving();
    }
}

//! `:extend` 选择器改写。求值完成后先对整棵树做一次索引预扫描，
//! 渲染时按目标选择器查询需要追加的选择器，传递关系闭包化，
//! 访问集保证环状 extend 可终止。

use crate::evaluator::{EvaluatedNode, EvaluatedStylesheet};
use std::collections::HashSet;

/// 单条 extend 记录：pattern 命中某规则的选择器时，把 sources 追加上去。
#[derive(Debug, Clone)]
struct ExtendEntry {
    pattern: String,
    /// `all` 模式允许 pattern 出现在目标选择器内部任意位置。
    all: bool,
    sources: Vec<String>,
    /// 所在媒体作用域；空串为顶层。
    scope: String,
}

/// 全树 extend 索引。
#[derive(Debug, Default)]
pub struct ExtendIndex {
    entries: Vec<ExtendEntry>,
}

impl ExtendIndex {
    /// 预扫描整棵已求值树，收集所有 extend 记录。
    pub fn build(sheet: &EvaluatedStylesheet) -> Self {
        let mut index = Self::default();
        index.scan(&sheet.nodes, "");
        index
    }

    fn scan(&mut self, nodes: &[EvaluatedNode], scope: &str) {
        for node in nodes {
            match node {
                EvaluatedNode::Rule(rule) => {
                    for extend in &rule.extends {
                        self.entries.push(ExtendEntry {
                            pattern: extend.pattern.trim().to_string(),
                            all: extend.all,
                            sources: rule.selectors.clone(),
                            scope: scope.to_string(),
                        });
                    }
                }
                EvaluatedNode::AtRule(at_rule) => {
                    // 媒体作用域按嵌套链拼接成键
                    let inner = if at_rule.is_media() {
                        format!("{scope}@media {}", at_rule.params)
                    } else {
                        scope.to_string()
                    };
                    self.scan(&at_rule.children, &inner);
                }
                EvaluatedNode::Directive { .. } => {}
            }
        }
    }

    /// 查询 `selector` 应追加的选择器集合，沿传递链闭包展开。
    /// 媒体块内只有同作用域与顶层的 extend 生效。
    pub fn resolve(&self, selector: &str, scope: &str) -> Vec<String> {
        let mut results = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(selector.trim().to_string());
        let mut queue = vec![selector.trim().to_string()];

        while let Some(target) = queue.pop() {
            for entry in &self.entries {
                if !(entry.scope == scope || entry.scope.is_empty()) {
                    continue;
                }
                let matched: Vec<String> = if entry.all {
                    rewrite_all(&target, &entry.pattern, &entry.sources)
                } else if target == entry.pattern {
                    entry.sources.clone()
                } else {
                    Vec::new()
                };
                for source in matched {
                    if seen.insert(source.clone()) {
                        results.push(source.clone());
                        queue.push(source);
                    }
                }
            }
        }
        results
    }
}

/// `all` 模式：pattern 在目标内任意元素边界上出现即可，
/// 每处出现都用每个 source 替换生成一个新选择器。
fn rewrite_all(target: &str, pattern: &str, sources: &[String]) -> Vec<String> {
    if pattern.is_empty() {
        return Vec::new();
    }
    let mut results = Vec::new();
    let mut start = 0;
    while let Some(offset) = target[start..].find(pattern) {
        let begin = start + offset;
        let end = begin + pattern.len();
        if boundary_ok(target, begin, end) {
            for source in sources {
                let mut rewritten = String::with_capacity(target.len() + source.len());
                rewritten.push_str(&target[..begin]);
                rewritten.push_str(source);
                rewritten.push_str(&target[end..]);
                if rewritten != target {
                    results.push(rewritten);
                }
            }
        }
        start = begin + 1;
    }
    results
}

/// 命中处前后都必须是元素边界，避免 `.a` 吞掉 `.abc`。
fn boundary_ok(target: &str, begin: usize, end: usize) -> bool {
    let before = target[..begin].chars().next_back();
    let after = target[end..].chars().next();
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    before.map_or(true, |c| !is_word(c)) && after.map_or(true, |c| !is_word(c))
}

//! 渲染器：把已求值的样式树转成最终 CSS 文本。
//! 渲染前先建好 extend 索引，输出每条规则时补上被 extend 进来的选择器。

use crate::evaluator::{
    EvaluatedAtRule, EvaluatedDeclaration, EvaluatedNode, EvaluatedRule, EvaluatedStylesheet,
};
use crate::extend::ExtendIndex;

/// 负责将扁平化的规则转换为最终 CSS 文本。
pub struct Serializer {
    minify: bool,
}

impl Serializer {
    pub fn new(minify: bool) -> Self {
        Self { minify }
    }

    pub fn to_css(&self, stylesheet: &EvaluatedStylesheet) -> String {
        let index = ExtendIndex::build(stylesheet);
        if self.minify {
            self.render_minified(stylesheet, &index)
        } else {
            self.render_pretty(stylesheet, &index)
        }
    }

    fn render_pretty(&self, stylesheet: &EvaluatedStylesheet, index: &ExtendIndex) -> String {
        let mut output = String::new();
        if let Some(charset) = &stylesheet.charset {
            output.push_str("@charset ");
            output.push_str(charset.trim());
            output.push_str(";\n");
        }
        for import in &stylesheet.imports {
            output.push_str(import.trim());
            output.push('\n');
        }
        if (!stylesheet.imports.is_empty() || stylesheet.charset.is_some())
            && !stylesheet.nodes.is_empty()
        {
            output.push('\n');
        }
        for (idx, node) in stylesheet.nodes.iter().enumerate() {
            self.render_node_pretty(node, index, "", 0, &mut output);
            if idx + 1 < stylesheet.nodes.len() {
                output.push('\n');
            }
        }
        output.trim().to_string()
    }

    fn render_minified(&self, stylesheet: &EvaluatedStylesheet, index: &ExtendIndex) -> String {
        let mut output = String::new();
        if let Some(charset) = &stylesheet.charset {
            output.push_str("@charset ");
            output.push_str(charset.trim());
            output.push(';');
        }
        for import in &stylesheet.imports {
            output.push_str(import.trim());
        }
        for node in &stylesheet.nodes {
            self.render_node_minified(node, index, "", &mut output);
        }
        while output.ends_with('\n') {
            output.pop();
        }
        output
    }

    /// 规则自身的选择器加上 extend 进来的选择器，去重保序。
    fn selectors_with_extends(
        &self,
        rule: &EvaluatedRule,
        index: &ExtendIndex,
        scope: &str,
    ) -> Vec<String> {
        let mut selectors = rule.selectors.clone();
        for selector in &rule.selectors {
            for extra in index.resolve(selector, scope) {
                if !selectors.contains(&extra) {
                    selectors.push(extra);
                }
            }
        }
        selectors
    }

    fn format_declaration(&self, decl: &EvaluatedDeclaration) -> String {
        let mut result = format!("{}: {}", decl.name.trim(), decl.value.trim());
        if decl.important {
            result.push_str(" !important");
        }
        result.push(';');
        result
    }

    fn format_declaration_minified(&self, decl: &EvaluatedDeclaration) -> String {
        let mut result = format!("{}:{}", decl.name.trim(), collapse_whitespace(&decl.value));
        if decl.important {
            result.push_str("!important");
        }
        result
    }

    fn render_node_pretty(
        &self,
        node: &EvaluatedNode,
        index: &ExtendIndex,
        scope: &str,
        level: usize,
        output: &mut String,
    ) {
        match node {
            EvaluatedNode::Rule(rule) => self.render_rule_pretty(rule, index, scope, level, output),
            EvaluatedNode::AtRule(at_rule) => {
                self.render_at_rule_pretty(at_rule, index, scope, level, output)
            }
            EvaluatedNode::Directive { name, params } => {
                output.push_str(&indent(level));
                output.push('@');
                output.push_str(name);
                if !params.is_empty() {
                    output.push(' ');
                    output.push_str(params.trim());
                }
                output.push_str(";\n");
            }
        }
    }

    fn render_rule_pretty(
        &self,
        rule: &EvaluatedRule,
        index: &ExtendIndex,
        scope: &str,
        level: usize,
        output: &mut String,
    ) {
        if rule.declarations.is_empty() {
            return;
        }
        output.push_str(&indent(level));
        output.push_str(&self.selectors_with_extends(rule, index, scope).join(", "));
        output.push_str(" {\n");
        for decl in &rule.declarations {
            output.push_str(&indent(level + 1));
            output.push_str(&self.format_declaration(decl));
            output.push('\n');
        }
        output.push_str(&indent(level));
        output.push_str("}\n");
    }

    fn render_at_rule_pretty(
        &self,
        at_rule: &EvaluatedAtRule,
        index: &ExtendIndex,
        scope: &str,
        level: usize,
        output: &mut String,
    ) {
        output.push_str(&indent(level));
        output.push('@');
        output.push_str(&at_rule.name);
        if !at_rule.params.is_empty() {
            output.push(' ');
            output.push_str(at_rule.params.trim());
        }
        output.push_str(" {\n");
        for decl in &at_rule.declarations {
            output.push_str(&indent(level + 1));
            output.push_str(&self.format_declaration(decl));
            output.push('\n');
        }
        let inner_scope = child_scope(at_rule, scope);
        for child in &at_rule.children {
            self.render_node_pretty(child, index, &inner_scope, level + 1, output);
            if !output.ends_with('\n') {
                output.push('\n');
            }
        }
        output.push_str(&indent(level));
        output.push_str("}\n");
    }

    fn render_node_minified(
        &self,
        node: &EvaluatedNode,
        index: &ExtendIndex,
        scope: &str,
        output: &mut String,
    ) {
        match node {
            EvaluatedNode::Rule(rule) => self.render_rule_minified(rule, index, scope, output),
            EvaluatedNode::AtRule(at_rule) => {
                self.render_at_rule_minified(at_rule, index, scope, output)
            }
            EvaluatedNode::Directive { name, params } => {
                output.push('@');
                output.push_str(name);
                if !params.trim().is_empty() {
                    output.push(' ');
                    output.push_str(&collapse_whitespace(params));
                }
                output.push(';');
            }
        }
    }

    fn render_rule_minified(
        &self,
        rule: &EvaluatedRule,
        index: &ExtendIndex,
        scope: &str,
        output: &mut String,
    ) {
        if rule.declarations.is_empty() {
            return;
        }
        output.push_str(&self.selectors_with_extends(rule, index, scope).join(","));
        output.push('{');
        for (idx, decl) in rule.declarations.iter().enumerate() {
            if idx > 0 {
                output.push(';');
            }
            output.push_str(&self.format_declaration_minified(decl));
        }
        output.push('}');
    }

    fn render_at_rule_minified(
        &self,
        at_rule: &EvaluatedAtRule,
        index: &ExtendIndex,
        scope: &str,
        output: &mut String,
    ) {
        output.push('@');
        output.push_str(&at_rule.name);
        if !at_rule.params.trim().is_empty() {
            output.push(' ');
            output.push_str(&collapse_whitespace(&at_rule.params));
        }
        output.push('{');
        for (idx, decl) in at_rule.declarations.iter().enumerate() {
            if idx > 0 {
                output.push(';');
            }
            output.push_str(&self.format_declaration_minified(decl));
        }
        let inner_scope = child_scope(at_rule, scope);
        for child in &at_rule.children {
            self.render_node_minified(child, index, &inner_scope, output);
        }
        output.push('}');
    }
}

/// 与 extend 索引一致的媒体作用域键。
fn child_scope(at_rule: &EvaluatedAtRule, scope: &str) -> String {
    if at_rule.is_media() {
        format!("{scope}@media {}", at_rule.params)
    } else {
        scope.to_string()
    }
}

fn indent(level: usize) -> String {
    "  ".repeat(level)
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.trim().chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

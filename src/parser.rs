//! LESS 解析器：递归下降加定点回溯探测。
//! 值在解析期就落成带类型的叶子（数值、颜色、字符串、变量、运算树），
//! 求值器因此不需要再做文本拆分。

use crate::ast::*;
use crate::color::Rgba;
use crate::error::{EvalErrorKind, LessError, LessResult};
use crate::guard::{CompareOp, Condition, ConditionKind, Guard};
use crate::value::{Dimension, Quoted, Value};

/// 透传给 CSS 的函数名，参数原样保留不做运算。
const PASSTHROUGH_FNS: &[&str] = &["url", "calc", "var", "attr", "counter"];

/// LESS 解析器，负责把源码转换成 AST。
/// 规则集与 mixin 定义在解析期分配稳定 id，供求值器做自重入检测。
pub struct LessParser {
    next_id: usize,
}

impl Default for LessParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LessParser {
    pub fn new() -> Self {
        Self { next_id: 0 }
    }

    fn alloc_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    pub fn parse(&mut self, input: &str) -> LessResult<Stylesheet> {
        let mut cursor = Cursor::new(input);
        let mut statements = Vec::new();

        while !cursor.is_eof() {
            cursor.skip_whitespace_and_comments();
            if cursor.is_eof() {
                break;
            }
            statements.push(self.parse_statement(&mut cursor, true)?);
        }

        Ok(Stylesheet::new(statements))
    }

    /// 顶层与块体共用的语句分发；`top_level` 只影响报错措辞。
    fn parse_statement(&mut self, cursor: &mut Cursor<'_>, top_level: bool) -> LessResult<Node> {
        // `@{...}` 开头的是插值属性名或插值选择器，不走 at 语句分发
        if cursor.starts_with('@') && !cursor.rest().starts_with("@{") {
            if cursor.lookahead_is_variable_decl()? {
                return self.parse_variable(cursor);
            }
            if cursor.lookahead_is_import()? {
                return self.parse_import(cursor);
            }
            if cursor.lookahead_is_block_at_rule()? {
                return self.parse_at_rule(cursor);
            }
            if cursor.lookahead_is_detached_call()? {
                return self.parse_detached_call(cursor);
            }
            return self.parse_directive(cursor);
        }

        if cursor.lookahead_is_extend_statement() {
            return self.parse_extend_statement(cursor);
        }
        if cursor.lookahead_is_mixin_definition()? {
            return self.parse_mixin_definition(cursor);
        }
        if cursor.lookahead_is_mixin_call()? {
            return self.parse_mixin_call(cursor);
        }

        if top_level {
            return self.parse_ruleset(cursor).map(Node::Ruleset);
        }
        match cursor.detect_body_kind() {
            Some(BodyKind::Declaration) => self.parse_declaration(cursor),
            Some(BodyKind::NestedRule) => self.parse_ruleset(cursor).map(Node::Ruleset),
            None => Err(LessError::parse(
                "无法判断声明或子选择器",
                cursor.position(),
            )),
        }
    }

    fn parse_block_body(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Vec<Node>> {
        let mut body = Vec::new();
        loop {
            cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                Some('}') => {
                    cursor.advance_char();
                    break;
                }
                None => {
                    return Err(LessError::parse("缺少匹配的 '}'", cursor.position()));
                }
                _ => body.push(self.parse_statement(cursor, false)?),
            }
        }
        Ok(body)
    }

    fn parse_variable(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        cursor.expect_char('@')?;
        let name = cursor.read_identifier();
        cursor.skip_whitespace_and_comments();
        cursor.expect_char(':')?;
        cursor.skip_whitespace_and_comments();

        let value = if cursor.peek_char() == Some('{') {
            cursor.advance_char();
            let body = self.parse_block_body(cursor)?;
            Value::DetachedRuleset(Box::new(DetachedRuleset {
                block: Block::deferred(body),
                closure: Vec::new(),
            }))
        } else {
            self.read_value(cursor, &[';', '}'])?
        };
        if cursor.peek_char() == Some(';') {
            cursor.advance_char();
        }

        Ok(Node::VariableDef(VariableDef { name, value }))
    }

    fn parse_ruleset(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Ruleset> {
        cursor.skip_whitespace_and_comments();
        let mut raw = String::new();
        let mut guard = None;
        let mut depth = 0usize;
        loop {
            if cursor.is_eof() {
                return Err(LessError::parse("选择器缺少 '{'", cursor.position()));
            }
            if depth == 0 && cursor.peek_char() == Some('{') {
                // 选择器内的 @{name} 插值，不是块体起点
                if raw.ends_with('@') {
                    while let Some(ch) = cursor.advance_char() {
                        raw.push(ch);
                        if ch == '}' {
                            break;
                        }
                    }
                    continue;
                }
                break;
            }
            if depth == 0
                && cursor.starts_with_keyword("when")
                && raw.chars().last().map_or(false, char::is_whitespace)
            {
                cursor.consume_keyword("when");
                cursor.skip_whitespace_and_comments();
                guard = Some(self.parse_guard(cursor)?);
                cursor.skip_whitespace_and_comments();
                if cursor.peek_char() != Some('{') {
                    return Err(LessError::parse("guard 之后应为 '{'", cursor.position()));
                }
                break;
            }
            let ch = cursor.advance_char().expect("已判非 EOF");
            match ch {
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                _ => {}
            }
            raw.push(ch);
        }
        cursor.expect_char('{')?;

        let selectors: Vec<Selector> = split_selectors(&raw)
            .into_iter()
            .map(|part| {
                let (value, extends) = split_extend(&part);
                Selector { value, extends }
            })
            .filter(|sel| !sel.value.is_empty() || !sel.extends.is_empty())
            .collect();
        if selectors.is_empty() {
            return Err(LessError::parse("缺少合法的选择器", cursor.position()));
        }

        let body = self.parse_block_body(cursor)?;
        Ok(Ruleset {
            id: self.alloc_id(),
            selectors,
            guard,
            block: Block::new(body),
        })
    }

    fn parse_at_rule(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        cursor.expect_char('@')?;
        let name = cursor.read_identifier();
        if name.is_empty() {
            return Err(LessError::parse("at-rule 名称不能为空", cursor.position()));
        }
        cursor.skip_whitespace_and_comments();
        let mut params = String::new();
        let mut paren_depth = 0usize;
        while let Some(ch) = cursor.peek_char() {
            if ch == '{' && paren_depth == 0 {
                if params.ends_with('@') {
                    while let Some(inner) = cursor.advance_char() {
                        params.push(inner);
                        if inner == '}' {
                            break;
                        }
                    }
                    continue;
                }
                break;
            }
            match ch {
                '(' => paren_depth += 1,
                ')' => paren_depth = paren_depth.saturating_sub(1),
                _ => {}
            }
            params.push(ch);
            cursor.advance_char();
        }
        cursor.expect_char('{')?;
        let body = self.parse_block_body(cursor)?;
        Ok(Node::AtRule(AtRule {
            name,
            params: params.trim().to_string(),
            block: Block::new(body),
        }))
    }

    /// 无块体指令（@charset、@namespace 一类），参数原文保留。
    fn parse_directive(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        cursor.expect_char('@')?;
        let name = cursor.read_identifier();
        if name.is_empty() {
            return Err(LessError::parse("指令名称不能为空", cursor.position()));
        }
        let params = cursor.read_until(';')?;
        cursor.expect_char(';')?;
        Ok(Node::Directive {
            name,
            params: params.trim().to_string(),
        })
    }

    fn parse_import(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        cursor.expect_char('@')?;
        let ident = cursor.read_identifier();
        if !ident.eq_ignore_ascii_case("import") {
            return Err(LessError::parse("仅支持 @import 语句", cursor.position()));
        }

        let spec = cursor.read_until(';')?;
        cursor.expect_char(';')?;

        let mut remainder = spec.trim_start();
        let mut options = Vec::new();
        if remainder.starts_with('(') {
            if let Some(end) = remainder.find(')') {
                options = remainder[1..end]
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.trim().to_ascii_lowercase())
                    .collect();
                remainder = remainder[end + 1..].trim_start();
            } else {
                return Err(LessError::parse("不完整的 @import 选项", cursor.position()));
            }
        }

        let trimmed = remainder.trim();
        let path = extract_import_path(trimmed);
        let mut is_css = options.iter().any(|opt| opt == "css");
        if !is_css && !options.iter().any(|opt| opt == "less") {
            if let Some(ref target) = path {
                if target.ends_with(".css") {
                    is_css = true;
                }
            } else {
                // 无法解析路径时默认视为 CSS 导入
                is_css = true;
            }
        }
        let once = !options.iter().any(|opt| opt == "multiple");

        let mut raw = String::from("@import ");
        raw.push_str(trimmed);
        raw.push(';');

        Ok(Node::Import(ImportStatement {
            raw,
            path,
            is_css,
            once,
        }))
    }

    fn parse_extend_statement(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        cursor.expect_char('&')?;
        let mut extends = Vec::new();
        loop {
            cursor.expect_char(':')?;
            let keyword = cursor.read_identifier();
            if keyword != "extend" {
                return Err(LessError::parse("期待 ':extend(...)'", cursor.position()));
            }
            cursor.expect_char('(')?;
            let inner = cursor.read_until(')')?;
            cursor.expect_char(')')?;
            for pattern in inner.split(',') {
                if let Some(extend) = parse_extend_pattern(pattern) {
                    extends.push(extend);
                }
            }
            if cursor.peek_char() != Some(':') {
                break;
            }
        }
        cursor.skip_whitespace_and_comments();
        if cursor.peek_char() == Some(';') {
            cursor.advance_char();
        }
        Ok(Node::Extend(extends))
    }

    fn parse_declaration(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let raw_name = cursor.read_property_name();
        cursor.skip_whitespace_and_comments();
        cursor.expect_char(':')?;
        cursor.skip_whitespace_and_comments();

        // 合并模式编码在属性名尾部
        let (name, merge) = if let Some(stripped) = raw_name.strip_suffix("+_") {
            (stripped.trim().to_string(), Some(MergeMode::Space))
        } else if let Some(stripped) = raw_name.strip_suffix('+') {
            (stripped.trim().to_string(), Some(MergeMode::Comma))
        } else {
            (raw_name, None)
        };

        let value = self.read_value(cursor, &[';', '}'])?;
        let important = self.parse_important(cursor)?;
        if cursor.peek_char() == Some(';') {
            cursor.advance_char();
        }

        Ok(Node::Declaration(Declaration {
            name,
            value,
            important,
            merge,
        }))
    }

    fn parse_important(&mut self, cursor: &mut Cursor<'_>) -> LessResult<bool> {
        cursor.skip_whitespace_and_comments();
        if cursor.peek_char() != Some('!') {
            return Ok(false);
        }
        cursor.advance_char();
        cursor.skip_whitespace_and_comments();
        let word = cursor.read_identifier();
        if !word.eq_ignore_ascii_case("important") {
            return Err(LessError::parse(
                format!("'!' 之后应为 important, 得到 '{word}'"),
                cursor.position(),
            ));
        }
        cursor.skip_whitespace_and_comments();
        Ok(true)
    }

    fn parse_mixin_definition(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let name = cursor.read_mixin_name()?;
        cursor.skip_whitespace_and_comments();
        let params = self.parse_mixin_params(cursor)?;
        cursor.skip_whitespace_and_comments();
        let guard = if cursor.starts_with_keyword("when") {
            cursor.consume_keyword("when");
            cursor.skip_whitespace_and_comments();
            Some(self.parse_guard(cursor)?)
        } else {
            None
        };
        cursor.skip_whitespace_and_comments();
        cursor.expect_char('{')?;
        let body = self.parse_block_body(cursor)?;
        Ok(Node::Mixin(MixinDefinition {
            id: self.alloc_id(),
            name,
            params,
            guard,
            block: Block::new(body),
        }))
    }

    /// 形参表。顶层分隔符必须统一，混用逗号与分号直接报错。
    fn parse_mixin_params(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Vec<MixinParam>> {
        let mut params = Vec::new();
        cursor.expect_char('(')?;
        let mut seen_comma = false;
        let mut seen_semi = false;
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.peek_char() == Some(')') {
                cursor.advance_char();
                break;
            }
            if cursor.is_eof() {
                return Err(LessError::parse("形参表缺少 ')'", cursor.position()));
            }

            let param = if cursor.starts_with('@') {
                cursor.advance_char();
                let name = cursor.read_identifier();
                if name.is_empty() {
                    return Err(LessError::parse("mixin 参数名不能为空", cursor.position()));
                }
                if cursor.match_str("...") {
                    MixinParam {
                        name: Some(name),
                        default: None,
                        variadic: true,
                    }
                } else {
                    cursor.skip_whitespace_and_comments();
                    let default = if cursor.peek_char() == Some(':') {
                        cursor.advance_char();
                        cursor.skip_whitespace_and_comments();
                        Some(self.parse_expression(cursor, false, &[',', ';', ')'])?)
                    } else {
                        None
                    };
                    MixinParam {
                        name: Some(name),
                        default,
                        variadic: false,
                    }
                }
            } else if cursor.match_str("...") {
                MixinParam {
                    name: None,
                    default: None,
                    variadic: true,
                }
            } else {
                // 字面量形参：按值匹配，不绑定变量
                let literal = self.parse_expression(cursor, false, &[',', ';', ')'])?;
                MixinParam {
                    name: None,
                    default: Some(literal),
                    variadic: false,
                }
            };
            let was_variadic = param.variadic;
            params.push(param);

            cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                Some(',') => {
                    if seen_semi {
                        return Err(LessError::eval(EvalErrorKind::MixedDelimiters));
                    }
                    seen_comma = true;
                    cursor.advance_char();
                }
                Some(';') => {
                    if seen_comma {
                        return Err(LessError::eval(EvalErrorKind::MixedDelimiters));
                    }
                    seen_semi = true;
                    cursor.advance_char();
                }
                Some(')') => {
                    cursor.advance_char();
                    break;
                }
                _ => {
                    return Err(LessError::parse(
                        "mixin 参数列表缺少分隔符",
                        cursor.position(),
                    ));
                }
            }
            if was_variadic {
                return Err(LessError::parse(
                    "variadic 形参必须位于末尾",
                    cursor.position(),
                ));
            }
        }
        Ok(params)
    }

    fn parse_mixin_call(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        let path = cursor.read_mixin_path()?;
        cursor.skip_whitespace_and_comments();
        let args = if cursor.peek_char() == Some('(') {
            self.parse_call_arguments(cursor)?
        } else {
            CallArgs::default()
        };
        let important = self.parse_important(cursor)?;
        cursor.expect_char(';')?;
        Ok(Node::MixinCall(MixinCall {
            path,
            args,
            important,
        }))
    }

    /// 实参表。出现分号时切换到分号分组：组内逗号只是列表分隔。
    fn parse_call_arguments(&mut self, cursor: &mut Cursor<'_>) -> LessResult<CallArgs> {
        cursor.expect_char('(')?;
        let mut pieces: Vec<(Option<String>, Value)> = Vec::new();
        let mut separators: Vec<char> = Vec::new();
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.peek_char() == Some(')') {
                cursor.advance_char();
                break;
            }
            if cursor.is_eof() {
                return Err(LessError::parse("实参表缺少 ')'", cursor.position()));
            }

            let name = {
                let save = cursor.clone();
                if cursor.starts_with('@') {
                    cursor.advance_char();
                    let ident = cursor.read_identifier();
                    cursor.skip_whitespace_and_comments();
                    if !ident.is_empty() && cursor.peek_char() == Some(':') {
                        cursor.advance_char();
                        cursor.skip_whitespace_and_comments();
                        Some(ident)
                    } else {
                        *cursor = save;
                        None
                    }
                } else {
                    None
                }
            };

            let value = if cursor.peek_char() == Some('{') {
                cursor.advance_char();
                let body = self.parse_block_body(cursor)?;
                Value::DetachedRuleset(Box::new(DetachedRuleset {
                    block: Block::deferred(body),
                    closure: Vec::new(),
                }))
            } else {
                self.parse_expression(cursor, false, &[',', ';', ')'])?
            };
            pieces.push((name, value));

            cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                Some(sep @ (',' | ';')) => {
                    separators.push(sep);
                    cursor.advance_char();
                }
                Some(')') => {
                    cursor.advance_char();
                    break;
                }
                _ => {
                    return Err(LessError::parse("mixin 实参缺少分隔符", cursor.position()));
                }
            }
        }

        if separators.contains(&';') {
            let mut args = Vec::new();
            let mut group: Vec<(Option<String>, Value)> = Vec::new();
            for (i, piece) in pieces.into_iter().enumerate() {
                group.push(piece);
                if matches!(separators.get(i), Some(';')) {
                    args.push(collapse_group(std::mem::take(&mut group)));
                }
            }
            if !group.is_empty() {
                args.push(collapse_group(group));
            }
            Ok(CallArgs {
                args,
                delimiter: Delimiter::Semicolon,
            })
        } else {
            Ok(CallArgs {
                args: pieces
                    .into_iter()
                    .map(|(name, value)| Argument { name, value })
                    .collect(),
                delimiter: Delimiter::Comma,
            })
        }
    }

    fn parse_detached_call(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Node> {
        cursor.expect_char('@')?;
        let name = cursor.read_identifier();
        if name.is_empty() {
            return Err(LessError::parse(
                "期待可调用的规则集名称",
                cursor.position(),
            ));
        }
        cursor.skip_whitespace_and_comments();
        cursor.expect_char('(')?;
        cursor.skip_whitespace_and_comments();
        if cursor.peek_char() != Some(')') {
            return Err(LessError::parse(
                "暂不支持带参数的规则集调用",
                cursor.position(),
            ));
        }
        cursor.advance_char();
        cursor.skip_whitespace_and_comments();
        cursor.expect_char(';')?;
        Ok(Node::DetachedCall(DetachedCall { name }))
    }

    // ------ guard ------

    fn parse_guard(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Guard> {
        let mut groups = Vec::new();
        loop {
            cursor.skip_whitespace_and_comments();
            groups.push(self.parse_guard_condition(cursor)?);
            cursor.skip_whitespace_and_comments();
            if cursor.peek_char() == Some(',') {
                cursor.advance_char();
            } else {
                break;
            }
        }
        Ok(Guard { groups })
    }

    fn parse_guard_condition(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Condition> {
        let mut left = self.parse_guard_primary(cursor)?;
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.starts_with_keyword("and") {
                cursor.consume_keyword("and");
                let right = self.parse_guard_primary(cursor)?;
                left = Condition {
                    negate: false,
                    kind: ConditionKind::And(Box::new(left), Box::new(right)),
                };
            } else if cursor.starts_with_keyword("or") {
                cursor.consume_keyword("or");
                let right = self.parse_guard_primary(cursor)?;
                left = Condition {
                    negate: false,
                    kind: ConditionKind::Or(Box::new(left), Box::new(right)),
                };
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_guard_primary(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Condition> {
        cursor.skip_whitespace_and_comments();
        let negate = if cursor.starts_with_keyword("not") {
            cursor.consume_keyword("not");
            cursor.skip_whitespace_and_comments();
            true
        } else {
            false
        };
        cursor.expect_char('(')?;
        cursor.skip_whitespace_and_comments();
        let left = self.parse_sum(cursor, true)?;
        cursor.skip_whitespace_and_comments();

        let op = match cursor.peek_char() {
            Some(')') => {
                cursor.advance_char();
                return Ok(Condition {
                    negate,
                    kind: ConditionKind::Truthy(left),
                });
            }
            Some('=') => {
                cursor.advance_char();
                if cursor.peek_char() == Some('<') {
                    cursor.advance_char();
                    CompareOp::Lte
                } else {
                    CompareOp::Eq
                }
            }
            Some('>') => {
                cursor.advance_char();
                if cursor.peek_char() == Some('=') {
                    cursor.advance_char();
                    CompareOp::Gte
                } else {
                    CompareOp::Gt
                }
            }
            Some('<') => {
                cursor.advance_char();
                if cursor.peek_char() == Some('=') {
                    cursor.advance_char();
                    CompareOp::Lte
                } else {
                    CompareOp::Lt
                }
            }
            other => {
                return Err(LessError::eval(EvalErrorKind::GuardOperator(
                    other.map(String::from).unwrap_or_default(),
                )));
            }
        };

        cursor.skip_whitespace_and_comments();
        let right = self.parse_sum(cursor, true)?;
        cursor.skip_whitespace_and_comments();
        cursor.expect_char(')')?;
        Ok(Condition {
            negate,
            kind: ConditionKind::Compare { op, left, right },
        })
    }

    // ------ 值 ------

    /// 声明值入口：逗号分隔的表达式列表。
    fn read_value(&mut self, cursor: &mut Cursor<'_>, terminators: &[char]) -> LessResult<Value> {
        let mut items = vec![self.parse_expression(cursor, false, terminators)?];
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.peek_char() == Some(',') {
                cursor.advance_char();
                items.push(self.parse_expression(cursor, false, terminators)?);
            } else {
                break;
            }
        }
        Ok(if items.len() == 1 {
            items.pop().expect("长度已检查")
        } else {
            Value::List(items)
        })
    }

    /// 空格分隔的表达式；紧贴的 `/`（font 简写）按字面粘连。
    fn parse_expression(
        &mut self,
        cursor: &mut Cursor<'_>,
        in_parens: bool,
        terminators: &[char],
    ) -> LessResult<Value> {
        let mut parts = Vec::new();
        loop {
            cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                None => break,
                Some(ch) if terminators.contains(&ch) => break,
                Some(',') | Some(';') | Some(')') | Some('}') | Some('!') => break,
                _ => {}
            }
            let mut value = self.parse_sum(cursor, in_parens)?;
            while cursor.peek_char() == Some('/') && !in_parens {
                cursor.advance_char();
                let right = self.parse_sum(cursor, in_parens)?;
                value = Value::Raw(format!("{}/{}", value.to_css(), right.to_css()));
            }
            parts.push(value);
        }
        if parts.is_empty() {
            return Err(LessError::parse("缺少值", cursor.position()));
        }
        Ok(if parts.len() == 1 {
            parts.pop().expect("长度已检查")
        } else {
            Value::Expression(parts)
        })
    }

    /// 加减层。括号外要求运算符两侧留白，否则按负号/连字处理。
    fn parse_sum(&mut self, cursor: &mut Cursor<'_>, in_parens: bool) -> LessResult<Value> {
        cursor.skip_whitespace_and_comments();
        let mut left = self.parse_product(cursor, in_parens)?;
        loop {
            let save = cursor.clone();
            let had_space = cursor.skip_ws_counted();
            match cursor.peek_char() {
                Some(op @ ('+' | '-')) => {
                    let mut probe = cursor.clone();
                    probe.advance_char();
                    let spaced_after = probe.peek_char().map_or(false, char::is_whitespace);
                    if !(in_parens || (had_space && spaced_after)) {
                        *cursor = save;
                        break;
                    }
                    cursor.advance_char();
                    cursor.skip_whitespace_and_comments();
                    let right = self.parse_product(cursor, in_parens)?;
                    left = Value::Operation {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                }
                _ => {
                    *cursor = save;
                    break;
                }
            }
        }
        Ok(left)
    }

    /// 乘除层。`/` 只有在括号内或两侧留白时才是除号。
    fn parse_product(&mut self, cursor: &mut Cursor<'_>, in_parens: bool) -> LessResult<Value> {
        let mut left = self.parse_operand(cursor, in_parens)?;
        loop {
            let save = cursor.clone();
            let had_space = cursor.skip_ws_counted();
            match cursor.peek_char() {
                Some('*') => {
                    cursor.advance_char();
                    cursor.skip_whitespace_and_comments();
                    let right = self.parse_operand(cursor, in_parens)?;
                    left = Value::Operation {
                        op: '*',
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                }
                Some('/') => {
                    let mut probe = cursor.clone();
                    probe.advance_char();
                    let spaced_after = probe.peek_char().map_or(false, char::is_whitespace);
                    if !(in_parens || (had_space && spaced_after)) {
                        *cursor = save;
                        break;
                    }
                    cursor.advance_char();
                    cursor.skip_whitespace_and_comments();
                    let right = self.parse_operand(cursor, in_parens)?;
                    left = Value::Operation {
                        op: '/',
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                }
                _ => {
                    *cursor = save;
                    break;
                }
            }
        }
        Ok(left)
    }

    fn parse_operand(&mut self, cursor: &mut Cursor<'_>, in_parens: bool) -> LessResult<Value> {
        match cursor.peek_char() {
            Some('@') => {
                let save = cursor.clone();
                cursor.advance_char();
                if cursor.peek_char() == Some('{') {
                    *cursor = save;
                    return Ok(Value::Keyword(cursor.read_interpolated_token()));
                }
                let name = cursor.read_identifier();
                if name.is_empty() {
                    return Err(LessError::parse("变量名不能为空", cursor.position()));
                }
                Ok(Value::Variable(name))
            }
            Some('~') => {
                cursor.advance_char();
                match cursor.peek_char() {
                    Some(quote @ ('"' | '\'')) => {
                        let text = cursor.read_quoted(quote)?;
                        Ok(Value::Quoted(Quoted {
                            text,
                            quote,
                            escaped: true,
                        }))
                    }
                    _ => Err(LessError::parse(
                        "'~' 之后应为引号字符串",
                        cursor.position(),
                    )),
                }
            }
            Some(quote @ ('"' | '\'')) => {
                let text = cursor.read_quoted(quote)?;
                Ok(Value::Quoted(Quoted {
                    text,
                    quote,
                    escaped: false,
                }))
            }
            Some('#') => {
                let token = cursor.read_hash_token();
                match Rgba::parse(&token) {
                    Some(color) => Ok(Value::Color(color)),
                    None => Ok(Value::Keyword(token)),
                }
            }
            Some('(') => {
                cursor.advance_char();
                cursor.skip_whitespace_and_comments();
                let inner = self.parse_sum(cursor, true)?;
                cursor.skip_whitespace_and_comments();
                cursor.expect_char(')')?;
                Ok(inner)
            }
            Some(ch) if ch.is_ascii_digit() || ((ch == '-' || ch == '.') && cursor.numeric_ahead()) => {
                self.parse_number(cursor)
            }
            // 括号组前的负号：折算为乘以 -1
            Some('-') if cursor.paren_after_minus() => {
                cursor.advance_char();
                let inner = self.parse_operand(cursor, in_parens)?;
                Ok(Value::Operation {
                    op: '*',
                    left: Box::new(Value::Dimension(Dimension::unitless(-1.0))),
                    right: Box::new(inner),
                })
            }
            Some(_) => {
                let token = cursor.read_word_token();
                if token.is_empty() {
                    return Err(LessError::parse("无法解析的值", cursor.position()));
                }
                if cursor.peek_char() == Some('(') {
                    if PASSTHROUGH_FNS.contains(&token.as_str()) {
                        let raw = cursor.read_balanced_parens()?;
                        return Ok(Value::Raw(format!("{token}{raw}")));
                    }
                    let args = self.parse_call_args(cursor)?;
                    return Ok(Value::Call { name: token, args });
                }
                Ok(Value::Keyword(token))
            }
            None => Err(LessError::parse("值意外结束", cursor.position())),
        }
    }

    fn parse_number(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Value> {
        let start = cursor.position();
        let mut text = String::new();
        if cursor.peek_char() == Some('-') {
            text.push('-');
            cursor.advance_char();
        }
        while let Some(ch) = cursor.peek_char() {
            if ch.is_ascii_digit() || ch == '.' {
                text.push(ch);
                cursor.advance_char();
            } else {
                break;
            }
        }
        let value: f64 = text
            .parse()
            .map_err(|_| LessError::parse(format!("无法解析数字 '{text}'"), start))?;
        let unit = cursor.read_unit();
        Ok(Value::Dimension(Dimension::new(value, unit)))
    }

    fn parse_call_args(&mut self, cursor: &mut Cursor<'_>) -> LessResult<Vec<Value>> {
        cursor.expect_char('(')?;
        let mut args = Vec::new();
        loop {
            cursor.skip_whitespace_and_comments();
            if cursor.peek_char() == Some(')') {
                cursor.advance_char();
                break;
            }
            if cursor.is_eof() {
                return Err(LessError::parse("函数调用缺少 ')'", cursor.position()));
            }
            args.push(self.parse_expression(cursor, true, &[',', ')'])?);
            cursor.skip_whitespace_and_comments();
            match cursor.peek_char() {
                Some(',') => {
                    cursor.advance_char();
                }
                Some(')') => {
                    cursor.advance_char();
                    break;
                }
                _ => {
                    return Err(LessError::parse("函数参数缺少分隔符", cursor.position()));
                }
            }
        }
        Ok(args)
    }
}

fn collapse_group(group: Vec<(Option<String>, Value)>) -> Argument {
    if group.len() == 1 {
        let (name, value) = group.into_iter().next().expect("非空分组");
        Argument { name, value }
    } else {
        Argument {
            name: None,
            value: Value::List(group.into_iter().map(|(_, value)| value).collect()),
        }
    }
}

/// 顶层逗号拆分选择器，括号与方括号内的逗号不算。
fn split_selectors(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' | '[' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// 把选择器中的 `:extend(...)` 剥离出来。
fn split_extend(selector: &str) -> (String, Vec<Extend>) {
    let mut value = String::new();
    let mut extends = Vec::new();
    let mut rest = selector;
    while let Some(idx) = rest.find(":extend(") {
        value.push_str(&rest[..idx]);
        let after = &rest[idx + ":extend(".len()..];
        let Some(close) = after.find(')') else {
            value.push_str(&rest[idx..]);
            return (value.trim().to_string(), extends);
        };
        for pattern in after[..close].split(',') {
            if let Some(extend) = parse_extend_pattern(pattern) {
                extends.push(extend);
            }
        }
        rest = &after[close + 1..];
    }
    value.push_str(rest);
    (value.trim().to_string(), extends)
}

fn parse_extend_pattern(pattern: &str) -> Option<Extend> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(stripped) = trimmed.strip_suffix(" all") {
        Some(Extend {
            pattern: stripped.trim().to_string(),
            all: true,
        })
    } else {
        Some(Extend {
            pattern: trimmed.to_string(),
            all: false,
        })
    }
}

fn extract_import_path(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let first = trimmed.chars().next()?;
    if first == '"' || first == '\'' {
        if let Some(end) = trimmed[1..].find(first) {
            return Some(trimmed[1..1 + end].to_string());
        }
        return None;
    }
    if trimmed.starts_with("url(") {
        return None;
    }
    let token = trimmed
        .split_whitespace()
        .next()
        .map(|s| s.trim().to_string())?;
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// 带位置指针的输入游标，提供便捷的字符读取与回退功能。
#[derive(Clone)]
struct Cursor<'a> {
    source: &'a str,
    len: usize,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            len: source.len(),
            position: 0,
        }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn is_eof(&self) -> bool {
        self.position >= self.len
    }

    fn rest(&self) -> &str {
        &self.source[self.position..]
    }

    fn starts_with(&self, ch: char) -> bool {
        self.peek_char() == Some(ch)
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        Some(ch)
    }

    fn expect_char(&mut self, expect: char) -> LessResult<()> {
        match self.advance_char() {
            Some(ch) if ch == expect => Ok(()),
            Some(ch) => Err(LessError::parse(
                format!("期待字符 '{expect}', 却得到 '{ch}'"),
                self.position,
            )),
            None => Err(LessError::parse(
                format!("期待字符 '{expect}'"),
                self.position,
            )),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            self.skip_whitespace();
            if self.starts_with('/') && self.consume_comment() {
                continue;
            }
            break;
        }
    }

    /// 同上，但报告是否确实跳过了内容（运算符留白判定用）。
    fn skip_ws_counted(&mut self) -> bool {
        let start = self.position;
        self.skip_whitespace_and_comments();
        self.position > start
    }

    fn consume_comment(&mut self) -> bool {
        if self.rest().starts_with("//") {
            self.position += 2;
            while let Some(ch) = self.peek_char() {
                self.advance_char();
                if ch == '\n' {
                    break;
                }
            }
            true
        } else if self.rest().starts_with("/*") {
            self.position += 2;
            while self.peek_char().is_some() {
                if self.match_str("*/") {
                    break;
                }
                self.advance_char();
            }
            true
        } else {
            false
        }
    }

    fn match_str(&mut self, prefix: &str) -> bool {
        if self.rest().starts_with(prefix) {
            self.position += prefix.len();
            true
        } else {
            false
        }
    }

    fn starts_with_keyword(&self, keyword: &str) -> bool {
        if !self.rest().starts_with(keyword) {
            return false;
        }
        match self.rest()[keyword.len()..].chars().next() {
            Some(ch) => !ch.is_alphanumeric() && ch != '-' && ch != '_',
            None => true,
        }
    }

    fn consume_keyword(&mut self, keyword: &str) {
        self.position += keyword.len();
    }

    fn read_identifier(&mut self) -> String {
        let mut ident = String::new();
        while let Some(ch) = self.peek_char() {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                ident.push(ch);
                self.advance_char();
            } else {
                break;
            }
        }
        ident
    }

    /// 数字、单位、百分号之外的裸词（关键字、函数名）。
    fn read_word_token(&mut self) -> String {
        let mut token = String::new();
        while let Some(ch) = self.peek_char() {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '%' {
                token.push(ch);
                self.advance_char();
            } else {
                break;
            }
        }
        token
    }

    /// `@{name}` 插值与词字符连写成的关键字片段。
    fn read_interpolated_token(&mut self) -> String {
        let mut out = String::new();
        loop {
            match self.peek_char() {
                Some('@') => {
                    let save = self.clone();
                    self.advance_char();
                    if self.peek_char() == Some('{') {
                        out.push('@');
                        while let Some(ch) = self.advance_char() {
                            out.push(ch);
                            if ch == '}' {
                                break;
                            }
                        }
                    } else {
                        *self = save;
                        break;
                    }
                }
                Some(ch) if ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '%' => {
                    out.push(ch);
                    self.advance_char();
                }
                _ => break,
            }
        }
        out
    }

    fn read_hash_token(&mut self) -> String {
        let mut token = String::new();
        token.push('#');
        self.advance_char();
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() {
                token.push(ch);
                self.advance_char();
            } else {
                break;
            }
        }
        token
    }

    fn read_unit(&mut self) -> String {
        if self.peek_char() == Some('%') {
            self.advance_char();
            return "%".to_string();
        }
        let mut unit = String::new();
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphabetic() {
                unit.push(ch);
                self.advance_char();
            } else {
                break;
            }
        }
        unit
    }

    /// 读取引号字符串正文（不含引号），处理反斜杠转义。
    fn read_quoted(&mut self, quote: char) -> LessResult<String> {
        self.expect_char(quote)?;
        let mut text = String::new();
        loop {
            match self.advance_char() {
                Some(ch) if ch == quote => return Ok(text),
                Some('\\') => {
                    text.push('\\');
                    if let Some(escaped) = self.advance_char() {
                        text.push(escaped);
                    }
                }
                Some(ch) => text.push(ch),
                None => {
                    return Err(LessError::parse("字符串缺少结束引号", self.position));
                }
            }
        }
    }

    /// 读取 `( ... )` 的原文（含括号），括号配平。
    fn read_balanced_parens(&mut self) -> LessResult<String> {
        let mut out = String::new();
        self.expect_char('(')?;
        out.push('(');
        let mut depth = 1usize;
        while let Some(ch) = self.advance_char() {
            out.push(ch);
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                }
                _ => {}
            }
        }
        Err(LessError::parse("括号未配平", self.position))
    }

    fn read_property_name(&mut self) -> String {
        let mut name = String::new();
        let mut pending_interpolation = false;
        while let Some(ch) = self.peek_char() {
            if ch == ':' || ch == ';' {
                break;
            }
            if ch == '{' && !pending_interpolation {
                break;
            }
            if ch.is_control() {
                break;
            }
            let ch = self.advance_char().expect("peek 已确认");
            name.push(ch);
            if ch == '@' {
                pending_interpolation = true;
            } else if ch == '{' && pending_interpolation {
                while let Some(inner) = self.advance_char() {
                    name.push(inner);
                    if inner == '}' {
                        pending_interpolation = false;
                        break;
                    }
                }
            } else if !ch.is_whitespace() {
                pending_interpolation = false;
            }
        }
        name.trim().to_string()
    }

    fn read_until(&mut self, end: char) -> LessResult<String> {
        let mut result = String::new();
        while let Some(ch) = self.peek_char() {
            if ch == end {
                break;
            }
            result.push(ch);
            self.advance_char();
        }
        if self.peek_char() != Some(end) {
            return Err(LessError::parse(format!("期待字符 '{end}'"), self.position));
        }
        Ok(result)
    }

    fn read_mixin_name(&mut self) -> LessResult<String> {
        match self.peek_char() {
            Some(prefix @ ('.' | '#')) => {
                self.advance_char();
                let ident = self.read_identifier();
                if ident.is_empty() {
                    return Err(LessError::parse("mixin 名称不合法", self.position()));
                }
                Ok(format!("{prefix}{ident}"))
            }
            _ => Err(LessError::parse("期待 mixin 名称", self.position())),
        }
    }

    /// 调用路径：`#ns > .m`、`#ns.m`、`#ns .m` 均可，组合符与空白一并剥除。
    fn read_mixin_path(&mut self) -> LessResult<Vec<String>> {
        let mut path = vec![self.read_mixin_name()?];
        loop {
            let save = self.clone();
            self.skip_whitespace_and_comments();
            if self.peek_char() == Some('>') {
                self.advance_char();
                self.skip_whitespace_and_comments();
            }
            if matches!(self.peek_char(), Some('.') | Some('#')) {
                let mut probe = self.clone();
                probe.advance_char();
                if !probe.read_identifier().is_empty() {
                    path.push(self.read_mixin_name()?);
                    continue;
                }
            }
            *self = save;
            break;
        }
        Ok(path)
    }

    fn paren_after_minus(&self) -> bool {
        let mut probe = self.clone();
        probe.advance_char();
        probe.peek_char() == Some('(')
    }

    fn numeric_ahead(&self) -> bool {
        let mut probe = self.clone();
        match probe.peek_char() {
            Some(c) if c.is_ascii_digit() => return true,
            Some('-') | Some('.') => {
                probe.advance_char();
            }
            _ => return false,
        }
        match probe.peek_char() {
            Some(c) if c.is_ascii_digit() => true,
            Some('.') => {
                probe.advance_char();
                matches!(probe.peek_char(), Some(c) if c.is_ascii_digit())
            }
            _ => false,
        }
    }

    // ------ 回溯探测 ------

    fn lookahead_is_variable_decl(&self) -> LessResult<bool> {
        let mut lookahead = self.clone();
        lookahead.expect_char('@')?;
        if lookahead.read_identifier().is_empty() {
            return Ok(false);
        }
        lookahead.skip_whitespace();
        Ok(lookahead.peek_char() == Some(':'))
    }

    fn lookahead_is_import(&self) -> LessResult<bool> {
        let mut lookahead = self.clone();
        if !lookahead.starts_with('@') {
            return Ok(false);
        }
        lookahead.expect_char('@')?;
        Ok(lookahead.read_identifier().eq_ignore_ascii_case("import"))
    }

    fn lookahead_is_block_at_rule(&self) -> LessResult<bool> {
        let mut lookahead = self.clone();
        if !lookahead.starts_with('@') {
            return Ok(false);
        }
        lookahead.advance_char();
        if lookahead.read_identifier().is_empty() {
            return Ok(false);
        }
        lookahead.skip_whitespace_and_comments();
        let mut paren_depth = 0usize;
        while let Some(ch) = lookahead.peek_char() {
            match ch {
                '{' if paren_depth == 0 => return Ok(true),
                '(' => {
                    paren_depth += 1;
                    lookahead.advance_char();
                }
                ')' => {
                    paren_depth = paren_depth.saturating_sub(1);
                    lookahead.advance_char();
                }
                ';' => return Ok(false),
                _ => {
                    lookahead.advance_char();
                }
            }
        }
        Ok(false)
    }

    fn lookahead_is_extend_statement(&self) -> bool {
        self.rest().starts_with("&:extend(")
    }

    fn lookahead_is_mixin_definition(&self) -> LessResult<bool> {
        let mut lookahead = self.clone();
        if !matches!(lookahead.peek_char(), Some('.') | Some('#')) {
            return Ok(false);
        }
        lookahead.advance_char();
        if lookahead.read_identifier().is_empty() {
            return Ok(false);
        }
        lookahead.skip_whitespace_and_comments();
        if lookahead.peek_char() != Some('(') {
            return Ok(false);
        }
        if !lookahead.skip_balanced_parens() {
            return Ok(false);
        }
        lookahead.skip_whitespace_and_comments();
        if lookahead.starts_with_keyword("when") {
            lookahead.consume_keyword("when");
            lookahead.skip_whitespace_and_comments();
            lookahead.skip_guard_condition();
            lookahead.skip_whitespace_and_comments();
        }
        Ok(lookahead.peek_char() == Some('{'))
    }

    fn lookahead_is_mixin_call(&self) -> LessResult<bool> {
        let mut lookahead = self.clone();
        // 逐段吞掉名字链，`>` 与紧邻的 `.`/`#` 都算链的延续
        loop {
            if !matches!(lookahead.peek_char(), Some('.') | Some('#')) {
                return Ok(false);
            }
            lookahead.advance_char();
            if lookahead.read_identifier().is_empty() {
                return Ok(false);
            }
            lookahead.skip_whitespace_and_comments();
            match lookahead.peek_char() {
                Some('>') => {
                    lookahead.advance_char();
                    lookahead.skip_whitespace_and_comments();
                }
                Some('.') | Some('#') => {}
                _ => break,
            }
        }
        if lookahead.peek_char() == Some('(') {
            if !lookahead.skip_balanced_parens() {
                return Ok(false);
            }
            lookahead.skip_whitespace_and_comments();
        }
        Ok(matches!(lookahead.peek_char(), Some(';') | Some('!')))
    }

    fn lookahead_is_detached_call(&self) -> LessResult<bool> {
        let mut lookahead = self.clone();
        if !lookahead.starts_with('@') {
            return Ok(false);
        }
        lookahead.advance_char();
        if lookahead.read_identifier().is_empty() {
            return Ok(false);
        }
        lookahead.skip_whitespace_and_comments();
        if lookahead.peek_char() != Some('(') {
            return Ok(false);
        }
        if !lookahead.skip_balanced_parens() {
            return Ok(false);
        }
        lookahead.skip_whitespace_and_comments();
        Ok(lookahead.peek_char() == Some(';'))
    }

    fn skip_balanced_parens(&mut self) -> bool {
        if self.peek_char() != Some('(') {
            return false;
        }
        self.advance_char();
        let mut depth = 1usize;
        while let Some(ch) = self.peek_char() {
            self.advance_char();
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    fn skip_guard_condition(&mut self) {
        let mut depth = 0usize;
        while let Some(ch) = self.peek_char() {
            if ch == '{' && depth == 0 {
                break;
            }
            match ch {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.advance_char();
        }
    }

    /// 通过向前查看判断接下来的语句类型（声明或子规则）。
    fn detect_body_kind(&self) -> Option<BodyKind> {
        let mut iter = self.clone();
        iter.skip_whitespace_and_comments();
        let mut saw_colon = false;
        let mut pending_interpolation = false;
        while let Some(ch) = iter.peek_char() {
            match ch {
                '@' => {
                    pending_interpolation = true;
                    iter.advance_char();
                    continue;
                }
                '{' if pending_interpolation => {
                    iter.advance_char();
                    while let Some(inner) = iter.peek_char() {
                        iter.advance_char();
                        if inner == '}' {
                            break;
                        }
                    }
                    pending_interpolation = false;
                    continue;
                }
                '{' => return Some(BodyKind::NestedRule),
                ';' => return Some(BodyKind::Declaration),
                '}' => {
                    return if saw_colon {
                        Some(BodyKind::Declaration)
                    } else {
                        None
                    };
                }
                ':' => {
                    saw_colon = true;
                }
                _ => {
                    pending_interpolation = false;
                }
            }
            iter.advance_char();
        }
        if saw_colon {
            Some(BodyKind::Declaration)
        } else {
            None
        }
    }
}

enum BodyKind {
    Declaration,
    NestedRule,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;

    fn parse(source: &str) -> Stylesheet {
        LessParser::new().parse(source).unwrap()
    }

    fn first(source: &str) -> Node {
        parse(source)
            .block
            .statements()
            .first()
            .cloned()
            .expect("至少一条语句")
    }

    #[test]
    fn variable_values_are_typed() {
        let Node::VariableDef(def) = first("@w: 10px;") else {
            panic!("期望变量定义");
        };
        assert!(matches!(def.value, Value::Dimension(ref d) if d.unit == "px"));

        let Node::VariableDef(def) = first("@c: #336699;") else {
            panic!("期望变量定义");
        };
        assert!(matches!(def.value, Value::Color(_)));

        let Node::VariableDef(def) = first("@s: ~\"raw text\";") else {
            panic!("期望变量定义");
        };
        assert!(matches!(def.value, Value::Quoted(ref q) if q.escaped));
    }

    #[test]
    fn spaced_operators_become_operations() {
        let Node::VariableDef(def) = first("@x: 1px + 2px;") else {
            panic!("期望变量定义");
        };
        assert!(matches!(def.value, Value::Operation { op: '+', .. }));
    }

    #[test]
    fn tight_slash_stays_literal() {
        let Node::Declaration(decl) = first(".a { font: 12px/1.5 serif; }")
            .clone_ruleset_first()
        else {
            panic!("期望声明");
        };
        let Value::Expression(parts) = &decl.value else {
            panic!("期望表达式: {:?}", decl.value);
        };
        assert_eq!(parts[0].to_css(), "12px/1.5");
    }

    #[test]
    fn parenthesized_division_computes() {
        let Node::VariableDef(def) = first("@x: (12px / 4);") else {
            panic!("期望变量定义");
        };
        assert!(matches!(def.value, Value::Operation { op: '/', .. }));
    }

    #[test]
    fn negative_number_is_not_subtraction() {
        let Node::VariableDef(def) = first("@m: -5px;") else {
            panic!("期望变量定义");
        };
        assert!(matches!(def.value, Value::Dimension(ref d) if d.value == -5.0));
    }

    #[test]
    fn mixin_definition_with_defaults_and_variadic() {
        let Node::Mixin(def) = first(".m(@a, @b: 2px, @rest...) { w: @a; }") else {
            panic!("期望 mixin 定义");
        };
        assert_eq!(def.params.len(), 3);
        assert!(def.params[1].default.is_some());
        assert!(def.params[2].variadic);
        assert_eq!(def.required_params(), 1);
    }

    #[test]
    fn mixed_parameter_delimiters_are_rejected() {
        let err = LessParser::new()
            .parse(".m(@a, @b; @c) { }")
            .unwrap_err();
        assert_eq!(err.kind(), Some(&EvalErrorKind::MixedDelimiters));
    }

    #[test]
    fn semicolon_call_arguments_regroup_commas() {
        let sheet = parse(".x { .m(1px, 2px; 3px); }");
        let Some(Node::Ruleset(rs)) = sheet.block.statements().first() else {
            panic!("期望规则集");
        };
        let Some(Node::MixinCall(call)) = rs.block.statements().first() else {
            panic!("期望 mixin 调用");
        };
        assert_eq!(call.args.delimiter, Delimiter::Semicolon);
        assert_eq!(call.args.args.len(), 2);
        assert!(matches!(call.args.args[0].value, Value::List(ref v) if v.len() == 2));
    }

    #[test]
    fn mixin_call_path_strips_combinators() {
        // 三种写法都解析为同一条名字链
        let sheet = parse(".x { #ns > .m(); #ns.m(); #ns .m(1px); }");
        let Some(Node::Ruleset(rs)) = sheet.block.statements().first() else {
            panic!("期望规则集");
        };
        for node in rs.block.statements() {
            let Node::MixinCall(call) = node else {
                panic!("期望 mixin 调用: {node:?}");
            };
            assert_eq!(call.path, vec!["#ns", ".m"]);
        }
    }

    #[test]
    fn compound_selector_is_not_a_call_path() {
        // `.a.b { ... }` 是选择器而非调用
        let sheet = parse(".a.b { color: red; }");
        let Some(Node::Ruleset(rs)) = sheet.block.statements().first() else {
            panic!("期望规则集");
        };
        assert_eq!(rs.selectors[0].value, ".a.b");
    }

    #[test]
    fn named_call_arguments() {
        let sheet = parse(".x { .m(@width: 10px); }");
        let Some(Node::Ruleset(rs)) = sheet.block.statements().first() else {
            panic!("期望规则集");
        };
        let Some(Node::MixinCall(call)) = rs.block.statements().first() else {
            panic!("期望 mixin 调用");
        };
        assert_eq!(call.args.args[0].name.as_deref(), Some("width"));
    }

    #[test]
    fn important_flag_on_declarations_and_calls() {
        let sheet = parse(".x { color: red !important; .m() !important; }");
        let Some(Node::Ruleset(rs)) = sheet.block.statements().first() else {
            panic!("期望规则集");
        };
        let Some(Node::Declaration(decl)) = rs.block.statements().first() else {
            panic!("期望声明");
        };
        assert!(decl.important);
        let Some(Node::MixinCall(call)) = rs.block.statements().get(1) else {
            panic!("期望 mixin 调用");
        };
        assert!(call.important);
    }

    #[test]
    fn merge_mode_suffixes() {
        let sheet = parse(".x { box-shadow+: 0; width+_: 1px; }");
        let Some(Node::Ruleset(rs)) = sheet.block.statements().first() else {
            panic!("期望规则集");
        };
        let Some(Node::Declaration(first)) = rs.block.statements().first() else {
            panic!("期望声明");
        };
        assert_eq!(first.name, "box-shadow");
        assert_eq!(first.merge, Some(MergeMode::Comma));
        let Some(Node::Declaration(second)) = rs.block.statements().get(1) else {
            panic!("期望声明");
        };
        assert_eq!(second.merge, Some(MergeMode::Space));
    }

    #[test]
    fn selector_extend_is_stripped() {
        let sheet = parse(".a:extend(.b all) { color: red; }");
        let Some(Node::Ruleset(rs)) = sheet.block.statements().first() else {
            panic!("期望规则集");
        };
        assert_eq!(rs.selectors[0].value, ".a");
        assert_eq!(rs.selectors[0].extends[0].pattern, ".b");
        assert!(rs.selectors[0].extends[0].all);
    }

    #[test]
    fn rule_level_extend_statement() {
        let sheet = parse(".a { &:extend(.b); color: red; }");
        let Some(Node::Ruleset(rs)) = sheet.block.statements().first() else {
            panic!("期望规则集");
        };
        let Some(Node::Extend(extends)) = rs.block.statements().first() else {
            panic!("期望 extend 语句");
        };
        assert_eq!(extends[0].pattern, ".b");
        assert!(!extends[0].all);
    }

    #[test]
    fn ruleset_guard_is_parsed() {
        let sheet = parse(".a when (@mode = dark) { color: red; }");
        let Some(Node::Ruleset(rs)) = sheet.block.statements().first() else {
            panic!("期望规则集");
        };
        assert!(rs.guard.is_some());
        assert_eq!(rs.selectors[0].value, ".a");
    }

    #[test]
    fn guard_requires_comparison_operator() {
        let err = LessParser::new()
            .parse(".m(@a) when (@a ~ 1) { }")
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            Some(EvalErrorKind::GuardOperator(_))
        ));
    }

    #[test]
    fn detached_ruleset_definition_and_call() {
        let sheet = parse("@panel: { color: red; };\n.x { @panel(); }");
        let Some(Node::VariableDef(def)) = sheet.block.statements().first() else {
            panic!("期望变量定义");
        };
        assert!(matches!(def.value, Value::DetachedRuleset(_)));
        let Some(Node::Ruleset(rs)) = sheet.block.statements().get(1) else {
            panic!("期望规则集");
        };
        assert!(matches!(
            rs.block.statements().first(),
            Some(Node::DetachedCall(call)) if call.name == "panel"
        ));
    }

    #[test]
    fn import_options() {
        let Node::Import(import) = first("@import (multiple) \"a.less\";") else {
            panic!("期望 import");
        };
        assert!(!import.once);
        assert!(!import.is_css);
        let Node::Import(import) = first("@import \"theme.css\";") else {
            panic!("期望 import");
        };
        assert!(import.is_css);
        assert!(import.once);
    }

    #[test]
    fn charset_is_a_directive() {
        let Node::Directive { name, params } = first("@charset \"utf-8\";") else {
            panic!("期望指令");
        };
        assert_eq!(name, "charset");
        assert_eq!(params, "\"utf-8\"");
    }

    #[test]
    fn passthrough_functions_stay_raw() {
        let Node::VariableDef(def) = first("@u: url(../img/bg.png);") else {
            panic!("期望变量定义");
        };
        assert_eq!(def.value.to_css(), "url(../img/bg.png)");
        let Node::VariableDef(def) = first("@c: calc(100% - 20px);") else {
            panic!("期望变量定义");
        };
        assert_eq!(def.value.to_css(), "calc(100% - 20px)");
    }

    #[test]
    fn keyframes_children_parse_as_rulesets() {
        let sheet = parse("@keyframes fade { from { opacity: 0; } to { opacity: 1; } }");
        let Some(Node::AtRule(at_rule)) = sheet.block.statements().first() else {
            panic!("期望 at-rule");
        };
        assert_eq!(at_rule.name, "keyframes");
        assert_eq!(at_rule.block.len(), 2);
    }

    impl Node {
        /// 测试辅助：取规则集的第一条语句。
        fn clone_ruleset_first(&self) -> Node {
            match self {
                Node::Ruleset(rs) => rs
                    .block
                    .statements()
                    .first()
                    .cloned()
                    .expect("规则集非空"),
                other => other.clone(),
            }
        }
    }
}

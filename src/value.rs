//! 值模型：带类型标签的叶子值及其运算契约。
//! 每个值支持 `needs_eval`（静态预判）、`operate`（二元算术分发）与 CSS 渲染。

use crate::ast::{BlockFlags, DetachedRuleset};
use crate::color::Rgba;
use crate::error::{EvalErrorKind, LessError, LessResult};
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::collections::HashMap;

/// 数值加单位。
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub value: f64,
    pub unit: String,
}

impl Dimension {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    pub fn unitless(value: f64) -> Self {
        Self::new(value, "")
    }

    /// 换算到目标单位；无单位视为与任何单位兼容。
    pub fn convert_to(&self, unit: &str) -> Option<f64> {
        if self.unit == unit || self.unit.is_empty() || unit.is_empty() {
            return Some(self.value);
        }
        let (from_group, from_scale) = unit_scale(&self.unit)?;
        let (to_group, to_scale) = unit_scale(unit)?;
        if from_group != to_group {
            return None;
        }
        Some(self.value * from_scale / to_scale)
    }

    pub fn to_css(&self) -> String {
        let mut out = format_number(self.value);
        out.push_str(&self.unit);
        out
    }
}

/// 引号字符串；`escaped` 对应 `~"..."`，渲染时去掉引号。
#[derive(Debug, Clone, PartialEq)]
pub struct Quoted {
    pub text: String,
    pub quote: char,
    pub escaped: bool,
}

/// 闭合的值联合体。求值分发集中在 Block Evaluator 的 match 中，
/// 新增变体会在那里成为编译错误。
#[derive(Debug, Clone)]
pub enum Value {
    Dimension(Dimension),
    Color(Rgba),
    Keyword(String),
    Quoted(Quoted),
    /// 原样透传的片段（url(...)、`12px/1.5` 一类的紧凑写法）。
    Raw(String),
    Variable(String),
    Operation {
        op: char,
        left: Box<Value>,
        right: Box<Value>,
    },
    Call {
        name: String,
        args: Vec<Value>,
    },
    /// 空格分隔的表达式序列。
    Expression(Vec<Value>),
    /// 逗号分隔的表达式列表。
    List(Vec<Value>),
    DetachedRuleset(Box<DetachedRuleset>),
}

impl Value {
    /// 廉价的静态预判：值是否需要进入求值器。
    /// 求值产物全部满足 `needs_eval() == false`，由此保证幂等。
    pub fn needs_eval(&self) -> bool {
        match self {
            Value::Variable(_) | Value::Operation { .. } | Value::Call { .. } => true,
            Value::Keyword(k) => k.contains("@{"),
            Value::Quoted(q) => q.text.contains("@{"),
            Value::Expression(items) | Value::List(items) => items.iter().any(Value::needs_eval),
            Value::DetachedRuleset(dr) => dr.block.flags().contains(BlockFlags::DEFERRED),
            Value::Dimension(_) | Value::Color(_) | Value::Raw(_) => false,
        }
    }

    /// 二元算术/颜色分发。`strict` 为假时，无法运算的组合退回左值并告警。
    pub fn operate(&self, op: char, other: &Value, strict: bool) -> LessResult<Value> {
        match (self, other) {
            (Value::Dimension(l), Value::Dimension(r)) => dimension_op(l, op, r, strict),
            (Value::Color(l), Value::Color(r)) => l
                .channel_op(op, *r)
                .map(Value::Color)
                .ok_or_else(|| divide_error(op)),
            (Value::Color(c), Value::Dimension(d)) if d.unit.is_empty() => c
                .scalar_op(op, d.value, true)
                .map(Value::Color)
                .ok_or_else(|| divide_error(op)),
            (Value::Dimension(d), Value::Color(c)) if d.unit.is_empty() => c
                .scalar_op(op, d.value, false)
                .map(Value::Color)
                .ok_or_else(|| divide_error(op)),
            _ => {
                if strict {
                    Err(LessError::eval(EvalErrorKind::TypeMismatch(format!(
                        "无法对 {} 与 {} 执行 '{op}' 运算",
                        self.type_name(),
                        other.type_name()
                    ))))
                } else {
                    tracing::warn!(
                        left = %self.to_css(),
                        right = %other.to_css(),
                        op = %op,
                        "宽松模式: 类型不支持运算, 退回左值"
                    );
                    Ok(self.clone())
                }
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Dimension(_) => "数值",
            Value::Color(_) => "颜色",
            Value::Keyword(_) => "关键字",
            Value::Quoted(_) => "字符串",
            Value::Raw(_) => "原样片段",
            Value::Variable(_) => "变量引用",
            Value::Operation { .. } => "运算表达式",
            Value::Call { .. } => "函数调用",
            Value::Expression(_) => "表达式",
            Value::List(_) => "列表",
            Value::DetachedRuleset(_) => "游离规则集",
        }
    }

    pub fn to_css(&self) -> String {
        match self {
            Value::Dimension(d) => d.to_css(),
            Value::Color(c) => c.to_css(),
            Value::Keyword(k) => k.clone(),
            Value::Quoted(q) => {
                if q.escaped {
                    q.text.clone()
                } else {
                    format!("{}{}{}", q.quote, q.text, q.quote)
                }
            }
            Value::Raw(raw) => raw.clone(),
            Value::Variable(name) => format!("@{name}"),
            Value::Operation { op, left, right } => {
                format!("{} {op} {}", left.to_css(), right.to_css())
            }
            Value::Call { name, args } => {
                let rendered: Vec<String> = args.iter().map(Value::to_css).collect();
                format!("{name}({})", rendered.join(", "))
            }
            Value::Expression(items) => {
                let rendered: Vec<String> = items.iter().map(Value::to_css).collect();
                rendered.join(" ")
            }
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(Value::to_css).collect();
                rendered.join(", ")
            }
            Value::DetachedRuleset(_) => String::new(),
        }
    }
}

fn divide_error(op: char) -> LessError {
    if op == '/' {
        LessError::eval_msg("除法分母不能为 0")
    } else {
        LessError::eval(EvalErrorKind::TypeMismatch(format!("未知的运算符 {op}")))
    }
}

fn dimension_op(l: &Dimension, op: char, r: &Dimension, strict: bool) -> LessResult<Value> {
    match op {
        '+' | '-' => {
            let rhs = match r.convert_to(&l.unit) {
                Some(v) => v,
                None => {
                    if strict {
                        return Err(LessError::eval(EvalErrorKind::IncompatibleUnits(
                            l.unit.clone(),
                            r.unit.clone(),
                        )));
                    }
                    tracing::warn!(
                        left = %l.to_css(),
                        right = %r.to_css(),
                        "宽松模式: 单位无法换算, 按原数值参与运算"
                    );
                    r.value
                }
            };
            let value = if op == '+' {
                l.value + rhs
            } else {
                l.value - rhs
            };
            let unit = if l.unit.is_empty() {
                r.unit.clone()
            } else {
                l.unit.clone()
            };
            Ok(Value::Dimension(Dimension::new(value, unit)))
        }
        '*' => {
            if !l.unit.is_empty() && !r.unit.is_empty() {
                return if strict {
                    Err(LessError::eval(EvalErrorKind::IncompatibleUnits(
                        l.unit.clone(),
                        r.unit.clone(),
                    )))
                } else {
                    Ok(Value::Dimension(Dimension::new(
                        l.value * r.value,
                        l.unit.clone(),
                    )))
                };
            }
            let unit = if l.unit.is_empty() {
                r.unit.clone()
            } else {
                l.unit.clone()
            };
            Ok(Value::Dimension(Dimension::new(l.value * r.value, unit)))
        }
        '/' => {
            if r.value.abs() < f64::EPSILON {
                return Err(LessError::eval_msg("除法分母不能为 0"));
            }
            if !r.unit.is_empty() && r.unit != l.unit {
                return if strict {
                    Err(LessError::eval(EvalErrorKind::IncompatibleUnits(
                        l.unit.clone(),
                        r.unit.clone(),
                    )))
                } else {
                    Ok(Value::Dimension(Dimension::new(
                        l.value / r.value,
                        l.unit.clone(),
                    )))
                };
            }
            // 同单位相除约去单位
            let unit = if r.unit == l.unit && !l.unit.is_empty() {
                String::new()
            } else {
                l.unit.clone()
            };
            Ok(Value::Dimension(Dimension::new(l.value / r.value, unit)))
        }
        _ => Err(LessError::eval(EvalErrorKind::TypeMismatch(format!(
            "未知的运算符 {op}"
        )))),
    }
}

/// 两个维度的数值比较；单位不可换算时返回 None。
pub fn compare_dimensions(l: &Dimension, r: &Dimension) -> Option<Ordering> {
    let rhs = r.convert_to(&l.unit)?;
    l.value.partial_cmp(&rhs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitGroup {
    Length,
    Duration,
    Angle,
}

static UNIT_TABLE: Lazy<HashMap<&'static str, (UnitGroup, f64)>> = Lazy::new(|| {
    let mut table = HashMap::new();
    // 长度基准：米
    table.insert("m", (UnitGroup::Length, 1.0));
    table.insert("cm", (UnitGroup::Length, 0.01));
    table.insert("mm", (UnitGroup::Length, 0.001));
    table.insert("in", (UnitGroup::Length, 0.0254));
    table.insert("px", (UnitGroup::Length, 0.0254 / 96.0));
    table.insert("pt", (UnitGroup::Length, 0.0254 / 72.0));
    table.insert("pc", (UnitGroup::Length, 0.0254 / 6.0));
    // 时长基准：秒
    table.insert("s", (UnitGroup::Duration, 1.0));
    table.insert("ms", (UnitGroup::Duration, 0.001));
    // 角度基准：圈
    table.insert("turn", (UnitGroup::Angle, 1.0));
    table.insert("deg", (UnitGroup::Angle, 1.0 / 360.0));
    table.insert("grad", (UnitGroup::Angle, 1.0 / 400.0));
    table.insert("rad", (UnitGroup::Angle, 1.0 / (2.0 * std::f64::consts::PI)));
    table
});

fn unit_scale(unit: &str) -> Option<(UnitGroup, f64)> {
    UNIT_TABLE.get(unit).copied()
}

/// 与 CSS 输出一致的数字格式：最多四位小数，去掉尾随零。
pub fn format_number(value: f64) -> String {
    let mut value = value;
    if value.abs() < 1e-9 {
        value = 0.0;
    }
    let mut formatted = format!("{value:.4}");
    while formatted.contains('.') && formatted.ends_with('0') {
        formatted.pop();
    }
    if formatted.ends_with('.') {
        formatted.pop();
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_converts_units() {
        let l = Dimension::new(1.0, "cm");
        let r = Dimension::new(10.0, "mm");
        let result = Value::Dimension(l).operate('+', &Value::Dimension(r), true).unwrap();
        assert_eq!(result.to_css(), "2cm");
    }

    #[test]
    fn incompatible_units_error_in_strict_mode() {
        let l = Value::Dimension(Dimension::new(1.0, "px"));
        let r = Value::Dimension(Dimension::new(1.0, "s"));
        let err = l.operate('+', &r, true).unwrap_err();
        assert_eq!(
            err.kind(),
            Some(&EvalErrorKind::IncompatibleUnits("px".into(), "s".into()))
        );
    }

    #[test]
    fn lenient_mode_falls_back_on_keyword_operand() {
        let l = Value::Dimension(Dimension::unitless(4.0));
        let r = Value::Keyword("auto".into());
        let result = l.operate('+', &r, false).unwrap();
        assert_eq!(result.to_css(), "4");
    }

    #[test]
    fn compare_across_convertible_units() {
        let l = Dimension::new(1.0, "s");
        let r = Dimension::new(1000.0, "ms");
        assert_eq!(compare_dimensions(&l, &r), Some(Ordering::Equal));
        assert_eq!(
            compare_dimensions(&Dimension::new(1.0, "px"), &Dimension::new(1.0, "s")),
            None
        );
    }

    #[test]
    fn number_formatting_trims_zeroes() {
        assert_eq!(format_number(9.0), "9");
        assert_eq!(format_number(0.75), "0.75");
        assert_eq!(format_number(-6.0), "-6");
    }

    #[test]
    fn same_unit_division_cancels() {
        let l = Value::Dimension(Dimension::new(12.0, "px"));
        let r = Value::Dimension(Dimension::new(4.0, "px"));
        assert_eq!(l.operate('/', &r, true).unwrap().to_css(), "3");
    }
}

//! guard 条件求值：带类型、带单位换算的比较。
//! 整个 guard 是逗号分隔条件组的析取，任一组为真即匹配；组内为 and 链。

use crate::error::{EvalErrorKind, LessError, LessResult};
use crate::value::{compare_dimensions, Value};
use std::cmp::Ordering;

/// 求值器提供给 guard 的最小接口；隔离出来便于单测作用域解析。
pub trait ValueEval {
    fn eval_value(&mut self, value: &Value) -> LessResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// `(operator, left, right, negate)` 树；and/or 的操作数是嵌套条件。
#[derive(Debug, Clone)]
pub struct Condition {
    pub negate: bool,
    pub kind: ConditionKind,
}

#[derive(Debug, Clone)]
pub enum ConditionKind {
    Compare {
        op: CompareOp,
        left: Value,
        right: Value,
    },
    /// 裸值条件 `when (@x)`：非布尔结果按假处理，不报错。
    Truthy(Value),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

/// 逗号分隔的条件组（析取）。没有任何条件的 guard 恒为真。
#[derive(Debug, Clone, Default)]
pub struct Guard {
    pub groups: Vec<Condition>,
}

pub fn eval_guard(guard: &Guard, ctx: &mut dyn ValueEval) -> LessResult<bool> {
    if guard.groups.is_empty() {
        return Ok(true);
    }
    for group in &guard.groups {
        if eval_condition(group, ctx)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn eval_condition(condition: &Condition, ctx: &mut dyn ValueEval) -> LessResult<bool> {
    let result = match &condition.kind {
        ConditionKind::And(left, right) => {
            eval_condition(left, ctx)? && eval_condition(right, ctx)?
        }
        ConditionKind::Or(left, right) => {
            eval_condition(left, ctx)? || eval_condition(right, ctx)?
        }
        ConditionKind::Compare { op, left, right } => {
            let left = ctx.eval_value(left)?;
            let right = ctx.eval_value(right)?;
            compare(*op, &left, &right)?
        }
        ConditionKind::Truthy(value) => is_truthy(&ctx.eval_value(value)?),
    };
    // negate 翻转的是本节点的最终结果，而非子结果
    Ok(result != condition.negate)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Keyword(k) => k == "true",
        Value::Quoted(q) => q.text == "true",
        _ => false,
    }
}

/// 对已求值完成的两个操作数执行比较。
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> LessResult<bool> {
    match order(left, right)? {
        Some(ordering) => Ok(match op {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
        }),
        // 同类但不可定序：相等性按「不相等」收敛，定序比较报错
        None => match op {
            CompareOp::Eq => Ok(false),
            _ => match (left, right) {
                (Value::Dimension(l), Value::Dimension(r)) => Err(LessError::eval(
                    EvalErrorKind::IncompatibleUnits(l.unit.clone(), r.unit.clone()),
                )),
                _ => Err(LessError::eval(EvalErrorKind::Uncomparable(
                    left.type_name().to_string(),
                    right.type_name().to_string(),
                ))),
            },
        },
    }
}

/// 定序内核。返回 Ok(None) 表示同类但不可定序（如单位不可换算）。
fn order(left: &Value, right: &Value) -> LessResult<Option<Ordering>> {
    match (left, right) {
        (Value::DetachedRuleset(_), _) | (_, Value::DetachedRuleset(_)) => {
            Err(LessError::eval(EvalErrorKind::Uncomparable(
                left.type_name().to_string(),
                right.type_name().to_string(),
            )))
        }
        (Value::Dimension(l), Value::Dimension(r)) => Ok(compare_dimensions(l, r)),
        // 颜色只做结构化相等比较
        (Value::Color(l), Value::Color(r)) => Ok(if l == r {
            Some(Ordering::Equal)
        } else {
            None
        }),
        (Value::Keyword(l), Value::Keyword(r)) => Ok(Some(l.cmp(r))),
        (Value::Quoted(l), Value::Quoted(r)) => Ok(Some(l.text.cmp(&r.text))),
        // 类型不一致时退回渲染后的字符串比较（兼容性契约，颜色除外）
        (Value::Color(_), _) | (_, Value::Color(_)) => Ok(None),
        _ => Ok(Some(left.to_css().cmp(&right.to_css()))),
    }
}

//! 内置函数注册表。求值器只依赖 `lookup(name)` 这一个查询点；
//! 未注册的名字原样保留为 CSS 函数调用。

use crate::color::Rgba;
use crate::error::{EvalErrorKind, LessError, LessResult};
use crate::value::Value;
use std::collections::HashMap;

/// 内置函数签名：入参已完成求值，返回一个终值。
pub type NativeFn = fn(&[Value]) -> LessResult<Value>;

pub struct FunctionRegistry {
    table: HashMap<&'static str, NativeFn>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = Self {
            table: HashMap::new(),
        };
        registry.register("lighten", fn_lighten);
        registry.register("darken", fn_darken);
        registry.register("fade", fn_fade);
        registry.register("overlay", fn_overlay);
        registry
    }
}

impl FunctionRegistry {
    /// 不带任何内置函数的空表。
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, function: NativeFn) {
        self.table.insert(name, function);
    }

    pub fn lookup(&self, name: &str) -> Option<NativeFn> {
        self.table.get(name).copied()
    }
}

fn arg_count(name: &str, args: &[Value], expected: usize) -> LessResult<()> {
    if args.len() != expected {
        return Err(LessError::eval_msg(format!(
            "函数 {name} 期望 {expected} 个参数, 实际 {} 个",
            args.len()
        )));
    }
    Ok(())
}

fn color_arg(value: &Value) -> LessResult<Rgba> {
    let parsed = match value {
        Value::Color(c) => Some(*c),
        other => Rgba::parse(&other.to_css()),
    };
    parsed.ok_or_else(|| {
        LessError::eval(EvalErrorKind::TypeMismatch(format!(
            "无法解析颜色参数: {}",
            value.to_css()
        )))
    })
}

/// 百分比或 0..1 小数，统一折算到 0..1。
fn amount_arg(value: &Value) -> LessResult<f64> {
    match value {
        Value::Dimension(d) if d.unit == "%" => Ok((d.value / 100.0).clamp(0.0, 1.0)),
        Value::Dimension(d) if d.unit.is_empty() => Ok(d.value.clamp(0.0, 1.0)),
        other => Err(LessError::eval(EvalErrorKind::TypeMismatch(format!(
            "无法解析百分比: {}",
            other.to_css()
        )))),
    }
}

fn fn_lighten(args: &[Value]) -> LessResult<Value> {
    arg_count("lighten", args, 2)?;
    let color = color_arg(&args[0])?;
    let amount = amount_arg(&args[1])?;
    Ok(Value::Color(color.lighten(amount)))
}

fn fn_darken(args: &[Value]) -> LessResult<Value> {
    arg_count("darken", args, 2)?;
    let color = color_arg(&args[0])?;
    let amount = amount_arg(&args[1])?;
    Ok(Value::Color(color.darken(amount)))
}

fn fn_fade(args: &[Value]) -> LessResult<Value> {
    arg_count("fade", args, 2)?;
    let color = color_arg(&args[0])?;
    let amount = amount_arg(&args[1])?;
    Ok(Value::Color(color.fade(amount)))
}

fn fn_overlay(args: &[Value]) -> LessResult<Value> {
    arg_count("overlay", args, 2)?;
    // 第一个参数是底色, 第二个是叠上去的颜色
    let base = color_arg(&args[0])?;
    let blend = color_arg(&args[1])?;
    Ok(Value::Color(blend.overlay_onto(base)))
}

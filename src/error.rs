use thiserror::Error;

/// 语义求值阶段的具体错误类别。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalErrorKind {
    #[error("未定义的变量 @{0}")]
    UndefinedVariable(String),
    #[error("未定义的 mixin {0}")]
    UndefinedMixin(String),
    #[error("变量 @{0} 存在循环引用")]
    CircularVariable(String),
    #[error("mixin 递归深度超出限制 {limit}: {path}")]
    RecursionLimit { limit: usize, path: String },
    #[error("规则集 {0} 不允许在自身展开过程中再次调用")]
    RulesetSelfRecursion(String),
    #[error("guard 需要布尔比较运算符, 得到 '{0}'")]
    GuardOperator(String),
    #[error("无法比较 {0} 与 {1}")]
    Uncomparable(String, String),
    #[error("单位 {0} 与 {1} 无法换算")]
    IncompatibleUnits(String, String),
    #[error("参数列表不能混用 ',' 与 ';' 分隔符")]
    MixedDelimiters,
    #[error("命名参数 @{arg} 在 mixin {mixin} 中不存在")]
    NamedArgumentNotFound { mixin: String, arg: String },
    #[error("类型不匹配: {0}")]
    TypeMismatch(String),
    #[error("{0}")]
    Other(String),
}

/// 编译过程中统一的错误类型。
///
/// 求值错误在向外传播时会把途经的构造（mixin 调用、规则集、@import 文件）
/// 逐层压入 `trace`，最终呈现为类似调用栈的诊断信息。
#[derive(Debug, Error)]
pub enum LessError {
    #[error("解析失败: {message} (位置 {position})")]
    Parse { message: String, position: usize },
    #[error("语义求值失败: {kind}{}", format_trace(.trace))]
    Eval {
        kind: EvalErrorKind,
        trace: Vec<String>,
    },
}

pub type LessResult<T> = Result<T, LessError>;

impl LessError {
    pub fn parse<S: Into<String>>(message: S, position: usize) -> Self {
        LessError::Parse {
            message: message.into(),
            position,
        }
    }

    pub fn eval(kind: EvalErrorKind) -> Self {
        LessError::Eval {
            kind,
            trace: Vec::new(),
        }
    }

    pub fn eval_msg<S: Into<String>>(message: S) -> Self {
        LessError::eval(EvalErrorKind::Other(message.into()))
    }

    /// 在错误向外传播时附加一层上下文。
    pub fn with_frame<S: Into<String>>(mut self, frame: S) -> Self {
        if let LessError::Eval { ref mut trace, .. } = self {
            trace.push(frame.into());
        }
        self
    }

    pub fn kind(&self) -> Option<&EvalErrorKind> {
        match self {
            LessError::Eval { kind, .. } => Some(kind),
            LessError::Parse { .. } => None,
        }
    }
}

fn format_trace(trace: &[String]) -> String {
    if trace.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for frame in trace {
        out.push_str("\n  于 ");
        out.push_str(frame);
    }
    out
}

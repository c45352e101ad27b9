//! LESS 求值引擎：解析、惰性变量、mixin 展开、extend 与最终 CSS 渲染。
//!
//! 入口是 [`compile`] 与 [`compile_file`]，编译行为由 [`EvalOptions`] 控制。
//! 内部流水线：解析 → 导入预展开 → 两趟求值（原地展开调用、扁平化输出）→ 渲染。

mod ast;
mod color;
mod env;
mod error;
mod evaluator;
mod extend;
mod functions;
mod guard;
mod importer;
mod mixin;
mod parser;
mod serializer;
mod value;

pub use error::{EvalErrorKind, LessError, LessResult};
pub use evaluator::{EvaluatedStylesheet, Evaluator};
pub use extend::ExtendIndex;
pub use functions::{FunctionRegistry, NativeFn};
pub use parser::LessParser;
pub use serializer::Serializer;

use importer::expand_imports;
use std::path::{Path, PathBuf};

/// 编译选项。
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// 输出压缩后的 CSS。
    pub minify: bool,
    /// 相对 @import 的解析基准目录；None 时不做导入展开。
    pub current_dir: Option<PathBuf>,
    /// @import 的附加搜索路径。
    pub include_paths: Vec<PathBuf>,
    /// 严格模式：无法运算或换算时直接报错，默认宽松地原样输出。
    pub strict: bool,
    /// mixin 展开深度上限，超出视为无限递归。
    pub max_mixin_depth: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            minify: false,
            current_dir: None,
            include_paths: Vec::new(),
            strict: false,
            max_mixin_depth: 64,
        }
    }
}

/// 把一段 LESS 源码编译为 CSS。
pub fn compile(source: &str, options: EvalOptions) -> LessResult<String> {
    let mut parser = LessParser::new();
    let mut ast = parser.parse(source)?;
    if options.current_dir.is_some() || !options.include_paths.is_empty() {
        ast = expand_imports(
            &mut parser,
            ast,
            options.current_dir.as_deref(),
            &options.include_paths,
        )?;
    }
    let mut evaluator = Evaluator::new(&options);
    let stylesheet = evaluator.evaluate(ast)?;
    Ok(Serializer::new(options.minify).to_css(&stylesheet))
}

/// 编译磁盘上的 LESS 文件；current_dir 缺省取文件所在目录。
pub fn compile_file(path: impl AsRef<Path>, mut options: EvalOptions) -> LessResult<String> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .map_err(|err| LessError::eval_msg(format!("读取文件 {} 失败: {err}", path.display())))?;
    if options.current_dir.is_none() {
        options.current_dir = path.parent().map(Path::to_path_buf);
    }
    compile(&source, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compile_default(source: &str) -> String {
        compile(source, EvalOptions::default()).unwrap()
    }

    fn compile_minified(source: &str) -> String {
        compile(
            source,
            EvalOptions {
                minify: true,
                ..EvalOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn compile_variables() {
        let css = compile_default("@primary: #336699;\n.a { color: @primary; }");
        assert_eq!(css, ".a {\n  color: #336699;\n}");
    }

    #[test]
    fn compile_nested_rules() {
        let css = compile_default(
            ".nav {\n  color: red;\n  .item { padding: 4px; }\n  &:hover { color: blue; }\n}",
        );
        assert_eq!(
            css,
            ".nav {\n  color: red;\n}\n\n.nav .item {\n  padding: 4px;\n}\n\n.nav:hover {\n  color: blue;\n}"
        );
    }

    #[test]
    fn compile_mixin_with_defaults() {
        let css = compile_default(
            ".bordered(@width: 1px, @color: black) {\n  border: @width solid @color;\n}\n.box { .bordered(2px); }",
        );
        assert_eq!(css, ".box {\n  border: 2px solid black;\n}");
    }

    #[test]
    fn compile_arithmetic() {
        let css = compile_default(
            "@gap: 12px;\n.a {\n  width: (@gap * 2);\n  margin: -(@gap / 2);\n  padding: @gap + 4px;\n}",
        );
        assert_eq!(
            css,
            ".a {\n  width: 24px;\n  margin: -6px;\n  padding: 16px;\n}"
        );
    }

    #[test]
    fn compile_color_functions() {
        let css = compile_default(
            "@primary: #336699;\n.btn {\n  color: lighten(@primary, 20%);\n  background: darken(@primary, 10%);\n  border-color: fade(#ffffff, 40%);\n}",
        );
        assert_eq!(
            css,
            ".btn {\n  color: #6699cc;\n  background: #264c73;\n  border-color: rgba(255, 255, 255, 0.4);\n}"
        );
    }

    #[test]
    fn compile_important_minified() {
        let css = compile_minified(".a { color: red !important; }");
        assert_eq!(css, ".a{color:red!important}");
    }

    #[test]
    fn compile_extend() {
        let css = compile_default(
            ".base { color: red; }\n.child {\n  &:extend(.base);\n  font-size: 12px;\n}",
        );
        assert_eq!(
            css,
            ".base, .child {\n  color: red;\n}\n\n.child {\n  font-size: 12px;\n}"
        );
    }

    #[test]
    fn compile_media_block() {
        let css = compile_default("@media (min-width: 768px) {\n  .a { color: red; }\n}");
        assert_eq!(
            css,
            "@media (min-width: 768px) {\n  .a {\n    color: red;\n  }\n}"
        );
    }

    #[test]
    fn compile_detached_ruleset() {
        let css = compile_default("@detached: { color: purple; };\n.a { @detached(); }");
        assert_eq!(css, ".a {\n  color: purple;\n}");
    }

    #[test]
    fn compile_interpolation() {
        let css = compile_default("@prop: color;\n@sel: btn;\n.@{sel} { @{prop}: green; }");
        assert_eq!(css, ".btn {\n  color: green;\n}");
    }

    #[test]
    fn compile_merge_modes() {
        let css = compile_default(
            ".a {\n  box-shadow+: inset 0 0 10px #555;\n  box-shadow+: 0 0 20px black;\n}",
        );
        assert_eq!(
            css,
            ".a {\n  box-shadow: inset 0 0 10px #555555, 0 0 20px black;\n}"
        );
    }

    #[test]
    fn compile_recursive_mixin_with_guard() {
        let css = compile_minified(
            ".loop(@i) when (@i > 0) {\n  .col-@{i} { width: (@i * 10px); }\n  .loop((@i - 1));\n}\n.loop(3);",
        );
        assert_eq!(
            css,
            ".col-3{width:30px}.col-2{width:20px}.col-1{width:10px}"
        );
    }

    #[test]
    fn compile_css_import_passes_through() {
        let css = compile_default("@import url(\"theme.css\");\n.a { color: red; }");
        assert_eq!(css, "@import url(\"theme.css\");\n\n.a {\n  color: red;\n}");
    }

    #[test]
    fn compile_calc_stays_raw() {
        let css = compile_default(".a { width: calc(100% - 20px); }");
        assert_eq!(css, ".a {\n  width: calc(100% - 20px);\n}");
    }
}

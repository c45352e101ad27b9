use less_eval::{compile, compile_file, EvalErrorKind, EvalOptions};
use std::path::Path;

fn minified(source: &str) -> String {
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
fn variable_and_nesting() {
    let src = r"@spacing: 8px;
.container {
  padding: @spacing;
  .title {
    margin-bottom: @spacing;
  }
}";
    let css = compile(src, EvalOptions::default()).unwrap();
    assert!(css.contains(".container"));
    assert!(css.contains(".container .title"));
}

#[test]
fn minify_output() {
    let src = r".demo {
  color: #333;
  font-weight: bold;
}";
    let css = minified(src);
    assert_eq!(css, ".demo{color:#333333;font-weight:bold}");
}

#[test]
fn mixin_and_color_functions() {
    let src = r".rounded(@radius) {
  border-radius: @radius;
}

.badge {
  .rounded(4px);
  background: lighten(#123456, 15%);
}";
    let css = minified(src);
    assert!(css.contains(".badge{border-radius:4px"));
    assert!(css.contains("background:#1f5a95"));
}

#[test]
fn mixin_default_and_override() {
    let src = r".shadow(@x: 0, @y: 2px, @blur: 4px) {
  box-shadow: @x @y @blur rgba(0, 0, 0, 0.4);
}

.dialog {
  .shadow();
}

.dialog-elevated {
  .shadow(0, 8px, 16px);
}";
    let css = minified(src);
    assert!(css.contains(".dialog{box-shadow:0 2px 4px rgba(0, 0, 0, 0.4)}"));
    assert!(css.contains(".dialog-elevated{box-shadow:0 8px 16px rgba(0, 0, 0, 0.4)}"));
}

#[test]
fn named_arguments_fill_their_slot() {
    let src = r".mix(@color: black, @margin: 10px) {
  color: @color;
  margin: @margin;
}

.x {
  .mix(@margin: 20px);
}";
    let css = minified(src);
    assert_eq!(css, ".x{color:black;margin:20px}");
}

#[test]
fn all_matching_overloads_fire() {
    let src = r".m(@a) when (@a > 10) { large: @a; }
.m(@a) when (@a > 0) { positive: @a; }
.x { .m(20); }
.y { .m(5); }";
    let css = minified(src);
    assert!(css.contains(".x{large:20;positive:20}"));
    assert!(css.contains(".y{positive:5}"));
}

#[test]
fn namespaced_mixin_calls_resolve() {
    let src = r"#theme {
  @accent: green;
  .emphasis() {
    color: @accent;
  }
}

.a {
  #theme > .emphasis();
}

.b {
  #theme.emphasis();
}";
    let css = minified(src);
    assert!(css.contains(".a{color:green}"));
    assert!(css.contains(".b{color:green}"));
}

#[test]
fn undefined_mixin_is_reported() {
    let err = compile(".x { .missing(); }", EvalOptions::default()).unwrap_err();
    assert!(matches!(err.kind(), Some(EvalErrorKind::UndefinedMixin(_))));
}

#[test]
fn infinite_recursion_hits_depth_limit() {
    let src = ".rec() { .rec(); }\n.x { .rec(); }";
    let err = compile(src, EvalOptions::default()).unwrap_err();
    assert!(matches!(
        err.kind(),
        Some(EvalErrorKind::RecursionLimit { .. })
    ));
}

#[test]
fn important_call_propagates_to_all_declarations() {
    let src = r".m() {
  color: red;
  background: blue;
}

.x {
  .m() !important;
}";
    let css = minified(src);
    assert_eq!(css, ".x{color:red!important;background:blue!important}");
}

#[test]
fn detached_ruleset_uses_definition_scope() {
    let src = r"@c: blue;
@panel: { color: @c; };
.x {
  @c: red;
  @panel();
}";
    let css = minified(src);
    assert_eq!(css, ".x{color:blue}");
}

#[test]
fn extend_all_rewrites_inside_compound_selectors() {
    let src = r".test { color: red; }
.nav .test:hover { color: blue; }
.replacement { &:extend(.test all); }";
    let css = compile(src, EvalOptions::default()).unwrap();
    assert!(css.contains(".test, .replacement {"));
    assert!(css.contains(".nav .test:hover, .nav .replacement:hover {"));
}

#[test]
fn extend_scoping_across_media() {
    let src = r"@media screen {
  .a { color: red; }
  .b { &:extend(.a); }
}
.c { &:extend(.a); }";
    let css = compile(src, EvalOptions::default()).unwrap();
    assert!(css.contains(".a, .b, .c {"));
}

#[test]
fn extend_index_is_usable_standalone() {
    use less_eval::{Evaluator, ExtendIndex, LessParser};

    let sheet = LessParser::new()
        .parse(".a { color: red; }\n.b { &:extend(.a); }")
        .unwrap();
    let evaluated = Evaluator::new(&EvalOptions::default())
        .evaluate(sheet)
        .unwrap();
    let index = ExtendIndex::build(&evaluated);
    assert_eq!(index.resolve(".a", ""), vec![".b".to_string()]);
}

#[test]
fn nested_media_queries() {
    let src = r".panel {
  color: #333;
  @media (min-width: 800px) {
    color: #000;
    .panel__title {
      font-size: 20px;
    }
  }
}

@media (max-width: 600px) {
  .panel {
    width: 100%;
  }
}";
    let css = compile(src, EvalOptions::default()).unwrap();
    assert!(css.contains(".panel {\n  color: #333333;"));
    assert!(css.contains("@media (min-width: 800px)"));
    assert!(css.contains(".panel .panel__title"));
    assert!(css.contains("@media (max-width: 600px)"));
    assert!(css.contains(".panel {\n    width: 100%;"));
}

#[test]
fn font_face_and_keyframes_blocks() {
    let src = r"@font-face {
  font-family: 'Open Sans';
  src: url('/fonts/open-sans.woff2') format('woff2');
}

@keyframes fade-in {
  from {
    opacity: 0;
  }
  to {
    opacity: 1;
  }
}";
    let css = minified(src);
    assert!(css.contains(
        "@font-face{font-family:'Open Sans';src:url('/fonts/open-sans.woff2') format('woff2')}"
    ));
    assert!(css.contains("@keyframes fade-in{from{opacity:0}to{opacity:1}}"));
}

#[test]
fn import_statement_passthrough() {
    let src = r#"@import (css) "https://cdn.example.com/reset.css";
body {
  color: #333;
}"#;
    let css = minified(src);
    assert!(css.starts_with(r#"@import "https://cdn.example.com/reset.css";"#));
    assert!(css.contains("body{color:#333333}"));
}

#[test]
fn compile_file_expands_less_imports() {
    let css = compile_file(
        Path::new("fixtures/app.less"),
        EvalOptions {
            minify: true,
            ..EvalOptions::default()
        },
    )
    .unwrap();
    assert_eq!(
        css,
        ".page{background:#f0f0f0;margin:0 auto;max-width:960px}.page-accent{border-color:#336699}"
    );
}

#[test]
fn import_inside_a_block_scopes_its_variables() {
    let css = compile_file(
        Path::new("fixtures/scoped.less"),
        EvalOptions {
            minify: true,
            ..EvalOptions::default()
        },
    )
    .unwrap();
    assert_eq!(css, ".wrap{background:#f0f0f0}");
}

#[test]
fn repeated_import_is_expanded_once() {
    let css = compile_file(
        Path::new("fixtures/twice.less"),
        EvalOptions {
            minify: true,
            ..EvalOptions::default()
        },
    )
    .unwrap();
    assert_eq!(css, ".badge{border-radius:4px}");
}

#[test]
fn multiple_option_expands_each_time() {
    let css = compile_file(
        Path::new("fixtures/multi.less"),
        EvalOptions {
            minify: true,
            ..EvalOptions::default()
        },
    )
    .unwrap();
    assert_eq!(css, ".badge{border-radius:4px}.badge{border-radius:4px}");
}

#[test]
fn circular_import_is_an_error() {
    let err = compile_file(Path::new("fixtures/cycle-a.less"), EvalOptions::default()).unwrap_err();
    assert!(err.to_string().contains("循环导入"));
}

#[test]
fn benchmark_fixture_compiles_both_ways() {
    let source = include_str!("../fixtures/benchmark.less");
    let pretty = compile(source, EvalOptions::default()).unwrap();
    assert!(pretty.starts_with("@charset \"utf-8\";"));
    assert!(pretty.contains(".button, .button-secondary {"));
    let min = minified(source);
    // 顶层 extend 也作用于 @media 内的同名选择器
    assert!(min.contains("@media (max-width: 600px){.button,.button-secondary{display:block;width:100%}}"));
}

#[test]
fn evaluated_output_is_a_fixpoint() {
    // 产出的 CSS 是合法输入, 再编译一遍应原样不动
    let source = include_str!("../fixtures/benchmark.less");
    let first = compile(source, EvalOptions::default()).unwrap();
    let second = compile(&first, EvalOptions::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn mixins_fixture_unrolls_guarded_loop() {
    let css = minified(include_str!("../fixtures/mixins.less"));
    assert!(css.contains(".col-6{width:60%}"));
    assert!(css.contains(".col-1{width:10%}"));
    assert!(!css.contains(".col-0"));
    assert!(css.contains(".square{width:40px;height:40px}"));
    assert!(css.contains(".dialog{box-shadow:0 8px 16px rgba(0, 0, 0, 0.4)!important}"));
}

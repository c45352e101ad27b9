use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use less_eval::{compile, EvalOptions};

/// 守卫递归展开：每层产出一个插值选择器与一次算术运算，
/// 压的是 mixin 候选甄别、绑定帧进出与作用域切换。
fn guarded_recursion_source(depth: usize) -> String {
    let mut src = String::from(
        ".step(@i) when (@i > 0) {\n  .cell-@{i} {\n    width: (@i * 10px);\n  }\n  .step(@i - 1);\n}\n",
    );
    src.push_str(&format!(".grid {{\n  .step({depth});\n}}\n"));
    src
}

/// extend 扇出：一条 `all` 模式要在大量复合选择器里逐条改写，
/// 压的是 extend 索引的构建与解析。
fn extend_heavy_source(rules: usize) -> String {
    let mut src = String::from(".seed {\n  color: red;\n}\n");
    for i in 0..rules {
        src.push_str(&format!(
            ".item-{i} .seed:hover {{\n  margin: {i}px;\n}}\n"
        ));
    }
    src.push_str(".clone {\n  &:extend(.seed all);\n}\n");
    src
}

fn bench_source(c: &mut Criterion, name: &str, source: &str) {
    let mut group = c.benchmark_group(format!("less_eval/{name}"));
    group.throughput(Throughput::Bytes(source.len() as u64));
    group.bench_function("pretty", |b| {
        b.iter(|| compile(source, EvalOptions::default()).unwrap());
    });
    group.bench_function("min", |b| {
        b.iter(|| {
            compile(
                source,
                EvalOptions {
                    minify: true,
                    ..EvalOptions::default()
                },
            )
            .unwrap()
        });
    });
    group.finish();
}

fn compile_benchmarks(c: &mut Criterion) {
    bench_source(c, "baseline", include_str!("../fixtures/benchmark.less"));
    bench_source(c, "merge_and_math", include_str!("../fixtures/arithmetic.less"));
    bench_source(c, "mixin_recursion", &guarded_recursion_source(48));
    bench_source(c, "extend_fanout", &extend_heavy_source(200));
}

criterion_group!(benches, compile_benchmarks);
criterion_main!(benches);

//! @import 预展开：求值之前把 LESS 导入原地替换为目标文件的语句。
//! CSS 导入原样保留，交给渲染器输出 `@import` 行。

use crate::ast::{Block, BlockFlags, Node, Stylesheet};
use crate::error::{LessError, LessResult};
use crate::parser::LessParser;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub struct ImportResolver<'a> {
    parser: &'a mut LessParser,
    include_paths: Vec<PathBuf>,
    /// 规范化路径 → 解析结果，同一文件只读盘解析一次。
    cache: HashMap<PathBuf, Stylesheet>,
    /// 已展开过的文件；once 语义下重复导入直接丢弃。
    expanded: HashSet<PathBuf>,
    stack: Vec<PathBuf>,
}

impl<'a> ImportResolver<'a> {
    pub fn new(parser: &'a mut LessParser, include_paths: &[PathBuf]) -> Self {
        Self {
            parser,
            include_paths: include_paths.to_vec(),
            cache: HashMap::new(),
            expanded: HashSet::new(),
            stack: Vec::new(),
        }
    }

    /// 展开一个块内的导入。标志位显示既无导入也无嵌套块时原样返回；
    /// 嵌套规则集与 at-rule 的块体同样下探，块内 @import 因此可用。
    pub fn expand_block(
        &mut self,
        block: Block,
        current_dir: Option<&Path>,
    ) -> LessResult<Block> {
        if !block
            .flags()
            .intersects(BlockFlags::HAS_IMPORTS | BlockFlags::HAS_NESTED_BLOCK)
        {
            return Ok(block);
        }
        let mut result = Vec::with_capacity(block.len());
        for statement in block.into_statements() {
            match statement {
                Node::Import(import) if !import.is_css => {
                    let Some(ref target) = import.path else {
                        result.push(Node::Import(import));
                        continue;
                    };
                    let resolved = self.resolve_path(target, current_dir)?;
                    if self.stack.contains(&resolved) {
                        return Err(LessError::eval_msg(format!(
                            "检测到循环导入: {}",
                            resolved.display()
                        )));
                    }
                    if import.once && !self.expanded.insert(resolved.clone()) {
                        tracing::debug!(path = %resolved.display(), "同一文件已导入, 跳过");
                        continue;
                    }
                    tracing::debug!(path = %resolved.display(), "展开导入");
                    self.stack.push(resolved.clone());
                    let stylesheet = self.load_stylesheet(&resolved)?;
                    let parent = resolved.parent().map(Path::to_path_buf);
                    let expanded = self.expand_block(stylesheet.block, parent.as_deref())?;
                    result.extend(expanded.into_statements());
                    self.stack.pop();
                }
                Node::Ruleset(mut ruleset) => {
                    ruleset.block = self.expand_block(ruleset.block, current_dir)?;
                    result.push(Node::Ruleset(ruleset));
                }
                Node::AtRule(mut at_rule) => {
                    at_rule.block = self.expand_block(at_rule.block, current_dir)?;
                    result.push(Node::AtRule(at_rule));
                }
                other => result.push(other),
            }
        }
        Ok(Block::new(result))
    }

    fn load_stylesheet(&mut self, path: &Path) -> LessResult<Stylesheet> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }
        let content = fs::read_to_string(path).map_err(|err| {
            LessError::eval_msg(format!("读取文件 {} 失败: {err}", path.display()))
        })?;
        let stylesheet = self
            .parser
            .parse(&content)
            .map_err(|err| attach_path(err, path))?;
        self.cache.insert(path.to_path_buf(), stylesheet.clone());
        Ok(stylesheet)
    }

    fn resolve_path(&self, target: &str, current_dir: Option<&Path>) -> LessResult<PathBuf> {
        let raw = Path::new(target);
        let mut candidates = Vec::new();
        if raw.is_absolute() {
            candidates.push(raw.to_path_buf());
        } else {
            if let Some(dir) = current_dir {
                candidates.push(dir.join(raw));
            }
            for base in &self.include_paths {
                candidates.push(base.join(raw));
            }
        }
        for candidate in candidates {
            if let Some(found) = find_existing(&candidate) {
                return Ok(found);
            }
        }
        Err(LessError::eval_msg(format!("无法解析 @import 路径 {target}")))
    }
}

fn find_existing(candidate: &Path) -> Option<PathBuf> {
    let mut attempts = vec![candidate.to_path_buf()];
    if candidate.extension().is_none() {
        attempts.push(candidate.with_extension("less"));
    }
    for attempt in attempts {
        if attempt.exists() && attempt.is_file() {
            if let Ok(real) = attempt.canonicalize() {
                return Some(real);
            }
            return Some(attempt);
        }
    }
    None
}

fn attach_path(err: LessError, path: &Path) -> LessError {
    match err {
        LessError::Parse { message, position } => LessError::Parse {
            message: format!("{message} (文件: {})", path.display()),
            position,
        },
        other => other.with_frame(format!("导入文件 {}", path.display())),
    }
}

pub fn expand_imports(
    parser: &mut LessParser,
    stylesheet: Stylesheet,
    current_dir: Option<&Path>,
    include_paths: &[PathBuf],
) -> LessResult<Stylesheet> {
    let mut resolver = ImportResolver::new(parser, include_paths);
    let block = resolver.expand_block(stylesheet.block, current_dir)?;
    Ok(Stylesheet { block })
}

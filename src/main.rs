use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cohort_query::config::{CompilerConfig, ConfigError};
use cohort_query::document::to_document_query;
use cohort_query::sql_compiler::SqlCompiler;
use cohort_query::QueryCompiler;

/// 未指定 --catalog 时尝试加载的字段目录
const DEFAULT_CATALOG: &str = "field_metadata.json";

/// Cohort Query: 查询语言到过滤树的编译器
#[derive(Debug, Parser)]
#[command(name = "cohort-query", version, about)]
struct Cli {
    /// 字段元数据配置文件 (JSON)
    #[arg(long, env = "COHORT_QUERY_CATALOG")]
    catalog: Option<PathBuf>,

    /// 关键字不区分大小写
    #[arg(long)]
    ignore_case: bool,

    /// 输出格式
    #[arg(long, value_enum, default_value_t = OutputFormat::Tree)]
    format: OutputFormat,

    /// 查询语句；省略时进入交互模式
    query: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// 过滤树
    Tree,
    /// 中间表示
    Ir,
    /// 具体语法树
    Cst,
    /// 过滤树 JSON
    Json,
    /// 文档数据库查询
    Document,
    /// PostgreSQL
    Sql,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.catalog.as_deref())?;
    let preserve_case = config.preserve_case && !cli.ignore_case;

    match &cli.query {
        Some(query) => {
            let output = render(&config, preserve_case, cli.format, query)?;
            println!("{output}");
            Ok(())
        }
        None => run_repl(&config, preserve_case, cli.format),
    }
}

/// 加载字段目录：--catalog 优先，其次是工作目录下的 field_metadata.json，最后使用默认配置
fn load_config(path: Option<&Path>) -> Result<CompilerConfig> {
    if let Some(path) = path {
        let config = CompilerConfig::from_json_file(path)
            .with_context(|| format!("无法加载字段目录 {}", path.display()))?;
        info!(path = %path.display(), fields = config.fields.len(), "loaded field catalog");
        return Ok(config);
    }

    match CompilerConfig::from_json_file(DEFAULT_CATALOG) {
        Ok(config) => {
            info!(path = DEFAULT_CATALOG, fields = config.fields.len(), "loaded field catalog");
            Ok(config)
        }
        Err(ConfigError::NotFound(_)) => {
            info!("no field catalog found, using the built-in demo catalog");
            Ok(CompilerConfig::default())
        }
        Err(e) => {
            warn!(error = %e, "failed to load field catalog, using the built-in demo catalog");
            Ok(CompilerConfig::default())
        }
    }
}

/// 编译一条查询并按格式输出
fn render(config: &CompilerConfig, preserve_case: bool, format: OutputFormat, query: &str) -> Result<String> {
    let compiler = QueryCompiler::new(config).preserve_case(preserve_case);
    let output = match format {
        OutputFormat::Cst => compiler.parse(query)?.to_string(),
        OutputFormat::Ir => compiler.reduce(query)?.to_string(),
        OutputFormat::Tree => compiler.compile(query)?.to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(&compiler.compile(query)?)?,
        OutputFormat::Document => {
            serde_json::to_string_pretty(&to_document_query(&compiler.compile(query)?))?
        }
        OutputFormat::Sql => {
            let result = SqlCompiler::from_config(config).compile(&compiler.compile(query)?)?;
            let mut output = result.sql;
            for optimization in &result.optimizations {
                output.push_str(&format!("\n-- 应用的优化: {optimization:?}"));
            }
            output
        }
    };
    Ok(output)
}

fn run_repl(config: &CompilerConfig, preserve_case: bool, mut format: OutputFormat) -> Result<()> {
    println!("--- Cohort Query: 查询语言编译器 ---");
    println!("字段目录中有 {} 个字段，表名: {}", config.fields.len(), config.table);
    println!("输入查询语句；:format <tree|ir|cst|json|document|sql> 切换输出格式，:fields 列出字段，:quit 退出");

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("cohort> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        editor.add_history_entry(line)?;

        match line {
            ":quit" | ":q" => break,
            ":fields" => {
                for (id, metadata) in config.fields.iter() {
                    println!(
                        "  {id}: instance {:?}, array {:?}",
                        metadata.instances(),
                        metadata.measurements()
                    );
                }
            }
            _ if line.starts_with(":format") => {
                let name = line.trim_start_matches(":format").trim();
                match OutputFormat::from_str(name, true) {
                    Ok(new_format) => {
                        format = new_format;
                        println!("✅ 输出格式: {name}");
                    }
                    Err(e) => println!("✗ {e}"),
                }
            }
            query => match render(config, preserve_case, format, query) {
                Ok(output) => println!("{output}"),
                Err(e) => println!("✗ 编译失败: {e}"),
            },
        }
    }
    Ok(())
}

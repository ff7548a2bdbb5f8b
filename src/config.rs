//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SOLACE__*` 覆盖（双下划线表示嵌套，
//! 如 `SOLACE__SERVER__BIND_ADDR=0.0.0.0:9000`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub corpus: CorpusSection,
    #[serde(default)]
    pub crisis: CrisisSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// [server] 段：监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// [provider] 段：OpenAI 兼容后端的模型与参数
///
/// API Key 只从环境变量 OPENAI_API_KEY 读取，不进配置文件。
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    /// 覆盖 API 地址（自建/代理网关时使用）
    pub base_url: Option<String>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_moderation_model")]
    pub moderation_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            base_url: None,
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            moderation_model: default_moderation_model(),
            temperature: default_temperature(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_moderation_model() -> String {
    "omni-moderation-latest".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

/// [corpus] 段：知识库目录与检索参数
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusSection {
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: PathBuf,
    /// 分块目标大小（字符数）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 相邻块重叠（字符数）
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// 每次检索返回的块数
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for CorpusSection {
    fn default() -> Self {
        Self {
            knowledge_dir: default_knowledge_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
        }
    }
}

fn default_knowledge_dir() -> PathBuf {
    PathBuf::from("knowledge_base")
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    4
}

/// [crisis] 段：热线国家与中度关键词阈值
#[derive(Debug, Clone, Deserialize)]
pub struct CrisisSection {
    /// 热线登记表的国家码（US/UK/CA/AU），未知时回退国际条目
    #[serde(default = "default_country")]
    pub country: String,
    /// 中度关键词触发所需的去重命中数
    #[serde(default = "default_moderate_threshold")]
    pub moderate_threshold: usize,
}

impl Default for CrisisSection {
    fn default() -> Self {
        Self {
            country: default_country(),
            moderate_threshold: default_moderate_threshold(),
        }
    }
}

fn default_country() -> String {
    "US".to_string()
}

fn default_moderate_threshold() -> usize {
    2
}

/// [session] 段：提示窗口轮数与可选的 SQLite 路径
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 进提示的最近对话轮数（每轮 user + assistant 两条）
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
    /// 设置后（且启用 async-sqlite feature）会话落盘到该 SQLite 文件
    pub db_path: Option<PathBuf>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_context_turns: default_max_context_turns(),
            db_path: None,
        }
    }
}

fn default_max_context_turns() -> usize {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            provider: ProviderSection::default(),
            corpus: CorpusSection::default(),
            crisis: CrisisSection::default(),
            session: SessionSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SOLACE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SOLACE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SOLACE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

use std::time::Duration;

/// 引擎配置 - 重算协调器的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | TAX_TIMEOUT_MS | 5000 | 单次税务调用超时(毫秒) |
/// | TAX_RETRY_ATTEMPTS | 3 | 税务调用最大尝试次数 |
/// | TAX_RETRY_BACKOFF_MS | 100 | 重试间隔(毫秒, 线性递增) |
/// | RECOMPUTE_MAX_ATTEMPTS | 3 | 税务调用期间明细被修改时的最大重算次数 |
/// | EVENT_CHANNEL_CAPACITY | 1024 | 事件广播通道容量 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (无) | 滚动日志目录 |
/// | ENVIRONMENT | development | 运行环境 |
///
/// # 示例
///
/// ```ignore
/// TAX_TIMEOUT_MS=2000 TAX_RETRY_ATTEMPTS=5 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 单次税务调用超时 (毫秒)
    pub tax_timeout_ms: u64,
    /// 税务调用最大尝试次数 (>= 1)
    pub tax_retry_attempts: u32,
    /// 重试退避基数 (毫秒)
    pub tax_retry_backoff_ms: u64,
    /// 版本冲突时的最大重算次数 (>= 1)
    pub recompute_max_attempts: u32,
    /// 事件广播通道容量
    pub event_channel_capacity: usize,
    /// 日志级别
    pub log_level: String,
    /// 日志目录 (None 表示仅输出到 stdout)
    pub log_dir: Option<String>,
    /// 运行环境: development | staging | production
    pub environment: String,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            tax_timeout_ms: std::env::var("TAX_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            tax_retry_attempts: std::env::var("TAX_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            tax_retry_backoff_ms: std::env::var("TAX_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            recompute_max_attempts: std::env::var("RECOMPUTE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            event_channel_capacity: std::env::var("EVENT_CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: std::env::var("LOG_DIR").ok(),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        }
    }

    /// 先读取 `.env` 文件 (若存在)，再从环境变量加载并校验
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenv::dotenv();
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// 使用自定义的税务调用参数覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(tax_timeout_ms: u64, tax_retry_attempts: u32) -> Self {
        let mut config = Self::from_env();
        config.tax_timeout_ms = tax_timeout_ms;
        config.tax_retry_attempts = tax_retry_attempts;
        config.tax_retry_backoff_ms = 0;
        config
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tax_timeout_ms == 0 {
            anyhow::bail!("TAX_TIMEOUT_MS must be greater than zero");
        }
        if self.tax_retry_attempts == 0 {
            anyhow::bail!("TAX_RETRY_ATTEMPTS must be at least 1");
        }
        if self.recompute_max_attempts == 0 {
            anyhow::bail!("RECOMPUTE_MAX_ATTEMPTS must be at least 1");
        }
        if self.event_channel_capacity == 0 {
            anyhow::bail!("EVENT_CHANNEL_CAPACITY must be greater than zero");
        }
        Ok(())
    }

    pub fn tax_timeout(&self) -> Duration {
        Duration::from_millis(self.tax_timeout_ms)
    }

    /// 第 `attempt` 次失败后的等待时间 (线性退避)
    pub fn tax_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.tax_retry_backoff_ms.saturating_mul(attempt as u64))
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否开发环境
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

//! Order Ledger - 订单金额重算与状态传播引擎
//!
//! # 架构概述
//!
//! 保持 Order、Shipment 与 LineItem 之间金额、税费、库存分配和退换货调整的一致性：
//!
//! - **账本** (`ledger`): LineItem / Shipment / Order / Return 的数据与纯计算
//! - **协调器** (`coordinator`): 变更 → 重算的传播策略 (sku → shipment → order)
//! - **配置** (`core`): 环境变量配置
//! - **工具** (`utils`): 日志初始化
//!
//! # 模块结构
//!
//! ```text
//! order-ledger/src/
//! ├── core/          # 配置
//! ├── ledger/        # 账本模型、金额工具、税务接口、错误
//! ├── coordinator/   # 重算协调器 (并发控制、事件广播)
//! └── utils/         # 日志
//! ```

pub mod coordinator;
pub mod core;
pub mod ledger;
pub mod utils;

// Re-export 公共类型
pub use coordinator::Coordinator;
pub use core::Config;
pub use ledger::{LedgerError, LedgerResult, TaxError, TaxService};

// Re-export unified error types from shared
pub use shared::error::{AppError, AppResult, ErrorCategory, ErrorCode};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

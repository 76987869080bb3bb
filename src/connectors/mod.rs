// src/connectors/mod.rs - 连接器模块入口

pub mod traits;
pub mod common;

// 重新导出核心trait
pub use traits::*;

// 连接器实现模块
pub mod bybit;

// 连接器注册表
pub mod manager;

pub use manager::ExchangeManager;

//! # 哈希时间轮定时器
//!
//! 基于哈希时间轮（Hashed Timing Wheel）算法实现的高性能定时器，
//! 用于管理大量延迟一次性任务。
//!
//! ## 特性
//!
//! - **高性能**: 调度和取消操作的时间复杂度为 O(1)，每个 tick 的处理量有界
//! - **大规模支持**: 能够高效管理 10000+ 并发超时任务
//! - **单 worker 线程**: 时间轮只被专属 worker 线程修改，核心数据结构无锁
//! - **无锁交接**: 任意线程通过 `crossbeam` 无锁队列把任务交给 worker，
//!   调度与取消永不阻塞调用方
//!
//! ## 快速开始
//!
//! ```no_run
//! use hashed_wheel_timer::{Timeout, TimerWheel};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 创建定时器
//!     let timer = TimerWheel::with_defaults()?;
//!
//!     // 调度一次性任务
//!     let handle = timer.new_timeout(Duration::from_secs(1), |_timeout: &Timeout| {
//!         println!("Timer fired after 1 second!");
//!     })?;
//!
//!     // 等待任务完成通知
//!     handle.into_completion_receiver().blocking_wait();
//!
//!     // 关闭定时器，回收未处理的任务
//!     let unprocessed = timer.stop()?;
//!     assert!(unprocessed.is_empty());
//!     Ok(())
//! }
//! ```
//!
//! ## 架构说明
//!
//! ### 时间轮算法
//!
//! 时间轮是一个环形桶数组，worker 线程以固定的 tick 频率推进，每个
//! tick 处理一个桶。超出一圈范围的任务用剩余轮数计数处理，每经过
//! 一次所在桶递减一轮。
//!
//! - **槽位数量**: 默认 512 个（可配置，向上归一化为 2 的幂次方，上限 2^30）
//! - **时间精度**: 默认 10ms（可配置）
//! - **轮次机制**: 超出时间轮范围的任务使用轮次计数处理
//!
//! ### 并发模型
//!
//! 时间轮和桶只被 worker 线程修改，因此不需要任何锁。其余线程只通过
//! 两条路径与 worker 交互：
//!
//! - **待定队列**: 新任务注册和取消摘除请求经由无锁 MPSC 队列交给
//!   worker，每个 tick 批量处理（单 tick 上限 100000 条）
//! - **原子状态机**: 每个超时句柄的状态（INIT/IN_BUCKET/CANCELLED/
//!   EXPIRED）用 compare-exchange 转换，取消与到期的竞争恰好一个胜者
//!
//! ### 调用方义务
//!
//! 任务回调在 worker 线程上同步执行。一个缓慢的回调会推迟该实例上
//! 所有后续的到期处理：回调应当保持简短，耗时工作应转交给其他线程。

mod config;
mod error;
mod logging;
mod misuse;
mod task;
mod timeout;
mod timer;
mod wheel;
mod worker;

// 重新导出公共 API
pub use config::{
    TimerConfig, TimerConfigBuilder, WheelConfig, WheelConfigBuilder, MAX_TICKS_PER_WHEEL,
};
pub use error::TimerError;
pub use logging::{LogLevel, TimerLogger, TracingLogger};
pub use misuse::{InstanceCounter, DEFAULT_INSTANCE_LIMIT};
pub use task::{CompletionReceiver, TaskCompletionReason, TaskId, TimerTask};
pub use timeout::{Timeout, TimerHandle};
pub use timer::TimerWheel;

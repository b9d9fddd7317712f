use std::fmt;
use std::time::Duration;

/// 定时器错误类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// tick 时长无效（必须大于 0）
    InvalidTickDuration {
        reason: &'static str,
    },

    /// 槽位数量无效（必须大于 0 且不超过 2^30）
    InvalidTicksPerWheel {
        ticks_per_wheel: usize,
        reason: &'static str,
    },

    /// tick 时长与槽位数量的时间跨度超出内部截止时间运算的表示范围
    TickDurationOverflow {
        tick_duration: Duration,
        ticks_per_wheel: usize,
    },

    /// 未决超时数量达到配置上限
    MaxPendingTimeouts {
        pending: u64,
        max: u64,
    },

    /// 定时器已经关闭，拒绝继续调度或启动
    Shutdown,

    /// 在 worker 线程内部调用 stop 会导致死锁，显式拒绝
    StopFromWorker,

    /// worker 线程创建失败
    WorkerSpawn {
        reason: String,
    },

    /// worker 线程异常终止
    WorkerPanicked,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::InvalidTickDuration { reason } => {
                write!(f, "无效的 tick 时长: {}", reason)
            }
            TimerError::InvalidTicksPerWheel { ticks_per_wheel, reason } => {
                write!(f, "无效的槽位数量 {}: {}", ticks_per_wheel, reason)
            }
            TimerError::TickDurationOverflow { tick_duration, ticks_per_wheel } => {
                write!(
                    f,
                    "tick 时长 {:?} 与槽位数量 {} 的时间跨度超出 u64 纳秒表示范围",
                    tick_duration, ticks_per_wheel
                )
            }
            TimerError::MaxPendingTimeouts { pending, max } => {
                write!(f, "未决超时数量 {} 已达到上限 {}", pending, max)
            }
            TimerError::Shutdown => {
                write!(f, "定时器已经关闭，不能再调度或启动")
            }
            TimerError::StopFromWorker => {
                write!(f, "不能在 worker 线程内部调用 stop")
            }
            TimerError::WorkerSpawn { reason } => {
                write!(f, "worker 线程创建失败: {}", reason)
            }
            TimerError::WorkerPanicked => {
                write!(f, "worker 线程异常终止")
            }
        }
    }
}

impl std::error::Error for TimerError {}

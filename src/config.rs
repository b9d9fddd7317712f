//! 定时器配置模块
//!
//! 提供分层的配置结构和 Builder 模式，用于配置时间轮的基本参数和调度上限。

use crate::error::TimerError;
use std::time::Duration;

/// 槽位数量的硬上限（2^30）
pub const MAX_TICKS_PER_WHEEL: usize = 1 << 30;

/// 时间轮配置
///
/// 用于配置时间轮的基本参数，包括 tick 时长和槽位数量。
/// 请求的槽位数量会在构建时间轮时向上归一化为 2 的幂次方。
///
/// # 示例
/// ```no_run
/// use hashed_wheel_timer::WheelConfig;
/// use std::time::Duration;
///
/// // 使用默认配置
/// let config = WheelConfig::default();
///
/// // 使用 Builder 自定义配置
/// let config = WheelConfig::builder()
///     .tick_duration(Duration::from_millis(100))
///     .ticks_per_wheel(1024)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct WheelConfig {
    /// 每个 tick 的时间长度
    pub tick_duration: Duration,
    /// 请求的槽位数量（必须大于 0 且不超过 2^30）
    pub ticks_per_wheel: usize,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(10),
            ticks_per_wheel: 512,
        }
    }
}

impl WheelConfig {
    /// 创建配置构建器
    pub fn builder() -> WheelConfigBuilder {
        WheelConfigBuilder::default()
    }

    /// 归一化后的槽位数量（下一个 2 的幂次方）
    ///
    /// # 注意
    /// 仅在配置通过验证后调用，此时 `ticks_per_wheel <= 2^30`，
    /// 归一化结果不会溢出。
    pub fn normalized_wheel_size(&self) -> usize {
        self.ticks_per_wheel.next_power_of_two()
    }

    /// 验证配置
    ///
    /// # 验证规则
    /// - tick_duration 必须大于 0
    /// - ticks_per_wheel 必须大于 0 且不超过 2^30
    /// - 归一化后的时间轮跨度（tick 时长 × 槽位数量）必须能用 u64 纳秒表示
    pub fn validate(&self) -> Result<(), TimerError> {
        if self.tick_duration.is_zero() {
            return Err(TimerError::InvalidTickDuration {
                reason: "tick 时长必须大于 0",
            });
        }

        if self.ticks_per_wheel == 0 {
            return Err(TimerError::InvalidTicksPerWheel {
                ticks_per_wheel: self.ticks_per_wheel,
                reason: "槽位数量必须大于 0",
            });
        }

        if self.ticks_per_wheel > MAX_TICKS_PER_WHEEL {
            return Err(TimerError::InvalidTicksPerWheel {
                ticks_per_wheel: self.ticks_per_wheel,
                reason: "槽位数量不能超过 2^30",
            });
        }

        // 截止时间以「自启动起的纳秒数」表示，tick 时长本身以及
        // 一整圈的时间跨度都必须落在 u64 范围内
        let tick_nanos = self.tick_duration.as_nanos();
        let wheel_size = self.ticks_per_wheel.next_power_of_two() as u128;
        if tick_nanos > u64::MAX as u128 || tick_nanos.saturating_mul(wheel_size) > u64::MAX as u128 {
            return Err(TimerError::TickDurationOverflow {
                tick_duration: self.tick_duration,
                ticks_per_wheel: self.ticks_per_wheel,
            });
        }

        Ok(())
    }
}

/// 时间轮配置构建器
#[derive(Debug, Clone)]
pub struct WheelConfigBuilder {
    tick_duration: Duration,
    ticks_per_wheel: usize,
}

impl Default for WheelConfigBuilder {
    fn default() -> Self {
        let config = WheelConfig::default();
        Self {
            tick_duration: config.tick_duration,
            ticks_per_wheel: config.ticks_per_wheel,
        }
    }
}

impl WheelConfigBuilder {
    /// 设置 tick 时长
    pub fn tick_duration(mut self, duration: Duration) -> Self {
        self.tick_duration = duration;
        self
    }

    /// 设置槽位数量
    pub fn ticks_per_wheel(mut self, count: usize) -> Self {
        self.ticks_per_wheel = count;
        self
    }

    /// 构建配置并进行验证
    ///
    /// # 返回
    /// - `Ok(WheelConfig)`: 配置有效
    /// - `Err(TimerError)`: 配置验证失败
    pub fn build(self) -> Result<WheelConfig, TimerError> {
        let config = WheelConfig {
            tick_duration: self.tick_duration,
            ticks_per_wheel: self.ticks_per_wheel,
        };
        config.validate()?;
        Ok(config)
    }
}

/// 顶层定时器配置
///
/// 组合时间轮配置与调度上限，提供完整的定时器系统配置。
///
/// # 示例
/// ```no_run
/// use hashed_wheel_timer::TimerConfig;
/// use std::time::Duration;
///
/// // 使用默认配置
/// let config = TimerConfig::default();
///
/// // 使用 Builder 自定义配置
/// let config = TimerConfig::builder()
///     .tick_duration(Duration::from_millis(100))
///     .ticks_per_wheel(512)
///     .max_pending_timeouts(100_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// 时间轮配置
    pub wheel: WheelConfig,
    /// 未决超时数量上限（0 表示不限制）
    pub max_pending_timeouts: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            wheel: WheelConfig::default(),
            max_pending_timeouts: 0,
        }
    }
}

impl TimerConfig {
    /// 创建配置构建器
    pub fn builder() -> TimerConfigBuilder {
        TimerConfigBuilder::default()
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), TimerError> {
        self.wheel.validate()
    }
}

/// 顶层定时器配置构建器
#[derive(Debug)]
pub struct TimerConfigBuilder {
    wheel_builder: WheelConfigBuilder,
    max_pending_timeouts: u64,
}

impl Default for TimerConfigBuilder {
    fn default() -> Self {
        Self {
            wheel_builder: WheelConfigBuilder::default(),
            max_pending_timeouts: 0,
        }
    }
}

impl TimerConfigBuilder {
    /// 设置 tick 时长
    pub fn tick_duration(mut self, duration: Duration) -> Self {
        self.wheel_builder = self.wheel_builder.tick_duration(duration);
        self
    }

    /// 设置槽位数量
    pub fn ticks_per_wheel(mut self, count: usize) -> Self {
        self.wheel_builder = self.wheel_builder.ticks_per_wheel(count);
        self
    }

    /// 设置未决超时数量上限（0 表示不限制）
    pub fn max_pending_timeouts(mut self, max: u64) -> Self {
        self.max_pending_timeouts = max;
        self
    }

    /// 构建配置并进行验证
    ///
    /// # 返回
    /// - `Ok(TimerConfig)`: 配置有效
    /// - `Err(TimerError)`: 配置验证失败
    pub fn build(self) -> Result<TimerConfig, TimerError> {
        Ok(TimerConfig {
            wheel: self.wheel_builder.build()?,
            max_pending_timeouts: self.max_pending_timeouts,
        })
    }
}

//! 日志协作者接口
//!
//! 核心只依赖一个可注入的窄接口，用于报告任务 panic 和实例数越限告警，
//! 不绑定任何具体日志框架。默认实现转发到 `tracing`。

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// 告警（实例数越限等误用提示）
    Warn,
    /// 错误（任务 panic 等执行失败）
    Error,
}

/// 定时器日志接口
///
/// 实现此 trait 的类型可以注入到定时器中接收告警和错误报告。
/// 核心只会在两种场合调用它：任务回调 panic 被隔离时，以及
/// 并发存活的定时器实例数越过阈值时。
pub trait TimerLogger: Send + Sync + 'static {
    /// 记录一条日志
    ///
    /// # 参数
    /// - `level`: 日志级别
    /// - `message`: 日志内容
    /// - `cause`: 触发原因（例如 panic 信息），可能为空
    fn log(&self, level: LogLevel, message: &str, cause: Option<&str>);
}

/// 默认日志实现，转发到 `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingLogger;

impl TimerLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, cause: Option<&str>) {
        match (level, cause) {
            (LogLevel::Warn, Some(cause)) => tracing::warn!(cause, "{}", message),
            (LogLevel::Warn, None) => tracing::warn!("{}", message),
            (LogLevel::Error, Some(cause)) => tracing::error!(cause, "{}", message),
            (LogLevel::Error, None) => tracing::error!("{}", message),
        }
    }
}

//! 实例数误用检测
//!
//! 定时器实例是共享资源：每个实例独占一个 worker 线程，正常情况下
//! 整个进程只需要少量实例。此模块提供一个显式注入的实例计数器，
//! 在并发存活实例数越过阈值时通过日志接口告警一次（回落后重新武装），
//! 作为线程泄漏的安全阀，而不是正确性机制。

use crate::logging::{LogLevel, TimerLogger};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// 默认的并发实例数阈值
pub const DEFAULT_INSTANCE_LIMIT: usize = 64;

/// 进程级默认计数器
static GLOBAL_COUNTER: OnceLock<Arc<InstanceCounter>> = OnceLock::new();

/// 并发定时器实例计数器
///
/// 通过构造函数显式传入定时器，避免隐藏的全局状态；
/// `InstanceCounter::global()` 提供一个进程级共享的默认实例。
pub struct InstanceCounter {
    /// 告警阈值
    limit: usize,
    /// 当前存活的实例数
    active: AtomicUsize,
    /// 本次越限是否已经告警过
    reported: AtomicBool,
}

impl InstanceCounter {
    /// 创建指定阈值的计数器
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            active: AtomicUsize::new(0),
            reported: AtomicBool::new(false),
        }
    }

    /// 获取进程级默认计数器（阈值为 [`DEFAULT_INSTANCE_LIMIT`]）
    pub fn global() -> Arc<InstanceCounter> {
        Arc::clone(GLOBAL_COUNTER.get_or_init(|| Arc::new(Self::new(DEFAULT_INSTANCE_LIMIT))))
    }

    /// 当前存活的实例数
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// 注册一个新实例，越限时告警一次
    pub(crate) fn register(&self, logger: &dyn TimerLogger) {
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        if active > self.limit && !self.reported.swap(true, Ordering::AcqRel) {
            logger.log(
                LogLevel::Warn,
                &format!(
                    "检测到 {} 个并发存活的定时器实例（阈值 {}）：\
                     定时器是共享资源，通常整个进程只需要少量实例",
                    active, self.limit
                ),
                None,
            );
        }
    }

    /// 注销一个实例，回落到阈值以下后重新武装告警
    pub(crate) fn release(&self) {
        let active = self.active.fetch_sub(1, Ordering::AcqRel) - 1;
        if active <= self.limit {
            self.reported.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// 记录告警调用的测试日志器
    struct RecordingLogger {
        messages: Mutex<Vec<(LogLevel, String)>>,
    }

    impl RecordingLogger {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }

        fn warn_count(&self) -> usize {
            self.messages
                .lock()
                .iter()
                .filter(|(level, _)| *level == LogLevel::Warn)
                .count()
        }
    }

    impl TimerLogger for RecordingLogger {
        fn log(&self, level: LogLevel, message: &str, _cause: Option<&str>) {
            self.messages.lock().push((level, message.to_string()));
        }
    }

    #[test]
    fn test_no_warning_under_limit() {
        let counter = InstanceCounter::new(4);
        let logger = RecordingLogger::new();

        for _ in 0..4 {
            counter.register(&logger);
        }

        assert_eq!(counter.active(), 4);
        assert_eq!(logger.warn_count(), 0);
    }

    #[test]
    fn test_warns_once_per_crossing() {
        let counter = InstanceCounter::new(2);
        let logger = RecordingLogger::new();

        for _ in 0..5 {
            counter.register(&logger);
        }

        // 越限多次，但只告警一次
        assert_eq!(logger.warn_count(), 1);

        // 回落到阈值以下后重新武装
        for _ in 0..4 {
            counter.release();
        }
        assert_eq!(counter.active(), 1);

        counter.register(&logger);
        counter.register(&logger);
        assert_eq!(logger.warn_count(), 2);
    }

    #[test]
    fn test_global_counter_is_shared() {
        let a = InstanceCounter::global();
        let b = InstanceCounter::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}

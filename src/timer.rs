use crate::config::TimerConfig;
use crate::error::TimerError;
use crate::logging::{TimerLogger, TracingLogger};
use crate::misuse::InstanceCounter;
use crate::task::{CompletionReceiver, TaskId, TimerTask};
use crate::timeout::{Timeout, TimeoutShared, TimerHandle};
use crate::worker::{
    PendingOp, Registration, TimerCore, Worker, TIMER_INIT, TIMER_STARTED,
};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// 哈希时间轮定时器
///
/// 管理大量延迟一次性任务的调度器：调度与取消都是 O(1)，每个 tick 的
/// 处理量有界。每个实例独占一个 worker 线程，任意线程通过无锁队列把
/// 任务交给它。
///
/// # 生命周期
/// 实例状态只向前推进：创建（INIT）→ 启动（STARTED）→ 关闭
/// （SHUTDOWN）。首次调用 [`TimerWheel::new_timeout`] 会隐式启动
/// worker；关闭之后调度与启动都会显式失败，实例不可复活。
///
/// # 示例
/// ```no_run
/// use hashed_wheel_timer::{Timeout, TimerWheel};
/// use std::time::Duration;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let timer = TimerWheel::with_defaults()?;
///
///     let handle = timer.new_timeout(Duration::from_secs(1), |_timeout: &Timeout| {
///         println!("Timer fired after 1 second!");
///     })?;
///
///     // 等待完成通知
///     handle.into_completion_receiver().blocking_wait();
///
///     // 关闭并回收未处理的任务
///     let unprocessed = timer.stop()?;
///     assert!(unprocessed.is_empty());
///     Ok(())
/// }
/// ```
pub struct TimerWheel {
    /// 与 worker 和超时句柄共享的核心状态
    core: Arc<TimerCore>,

    config: TimerConfig,

    /// 日志协作者（任务 panic 与误用告警）
    logger: Arc<dyn TimerLogger>,

    /// 实例计数器（误用检测安全阀）
    instance_counter: Arc<InstanceCounter>,

    /// worker 线程句柄，stop 时取走并 join
    worker_handle: Mutex<Option<JoinHandle<Vec<Timeout>>>>,

    /// worker 线程 ID，用于拒绝 worker 线程内的 stop 调用
    worker_thread: OnceLock<ThreadId>,
}

impl TimerWheel {
    /// 创建新的定时器
    ///
    /// 使用默认的日志实现（[`TracingLogger`]）和进程级实例计数器。
    ///
    /// # 参数
    /// - `config`: 定时器配置
    ///
    /// # 返回
    /// 配置无效时返回 [`TimerError`]（构造期快速失败）。
    pub fn new(config: TimerConfig) -> Result<Self, TimerError> {
        Self::with_instrumentation(config, Arc::new(TracingLogger), InstanceCounter::global())
    }

    /// 创建带默认配置的定时器
    /// - tick 时长: 10ms
    /// - 槽位数量: 512
    /// - 未决超时上限: 不限制
    pub fn with_defaults() -> Result<Self, TimerError> {
        Self::new(TimerConfig::default())
    }

    /// 创建定时器并显式注入协作者
    ///
    /// # 参数
    /// - `config`: 定时器配置
    /// - `logger`: 日志协作者，接收任务 panic 报告和误用告警
    /// - `instance_counter`: 实例计数器，由多个定时器共享
    pub fn with_instrumentation(
        config: TimerConfig,
        logger: Arc<dyn TimerLogger>,
        instance_counter: Arc<InstanceCounter>,
    ) -> Result<Self, TimerError> {
        config.validate()?;
        instance_counter.register(logger.as_ref());

        Ok(Self {
            core: Arc::new(TimerCore::new()),
            config,
            logger,
            instance_counter,
            worker_handle: Mutex::new(None),
            worker_thread: OnceLock::new(),
        })
    }

    /// 调度一次性超时任务
    ///
    /// 任务被包装成 INIT 状态的超时句柄放入待定队列后立即返回；
    /// 放入时间轮的桶是异步的，由 worker 在下一个 tick 完成。
    /// 首次调用会隐式启动 worker。
    ///
    /// # 参数
    /// - `delay`: 延迟时间（从调用时刻起算）
    /// - `task`: 实现了 [`TimerTask`] trait 的任务，常用闭包即可
    ///
    /// # 返回
    /// - `Ok(TimerHandle)`: 句柄，可用于取消任务和等待完成通知
    /// - `Err(TimerError::Shutdown)`: 定时器已关闭（不会悄悄复活）
    /// - `Err(TimerError::MaxPendingTimeouts)`: 未决超时数量达到上限
    ///
    /// # 示例
    /// ```no_run
    /// use hashed_wheel_timer::{Timeout, TimerWheel};
    /// use std::time::Duration;
    ///
    /// fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let timer = TimerWheel::with_defaults()?;
    ///     let handle = timer.new_timeout(Duration::from_millis(100), |_timeout: &Timeout| {
    ///         println!("Timer fired!");
    ///     })?;
    ///     Ok(())
    /// }
    /// ```
    pub fn new_timeout<T>(&self, delay: Duration, task: T) -> Result<TimerHandle, TimerError>
    where
        T: TimerTask,
    {
        // 先计数后检查，越限时回滚
        let pending = self.core.incr_pending();
        let max = self.config.max_pending_timeouts;
        if max > 0 && pending > max {
            self.core.decr_pending();
            return Err(TimerError::MaxPendingTimeouts {
                pending: pending - 1,
                max,
            });
        }

        // 隐式启动；关闭后显式失败
        if let Err(err) = self.start() {
            self.core.decr_pending();
            return Err(err);
        }
        let start_time = match self.core.wait_until_started() {
            Some(start_time) => start_time,
            None => {
                self.core.decr_pending();
                return Err(TimerError::Shutdown);
            }
        };

        // 绝对截止时间：自启动时刻起的纳秒数，溢出时饱和
        let elapsed_ns = u64::try_from(start_time.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let delay_ns = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let deadline_ns = elapsed_ns.saturating_add(delay_ns);

        let shared = Arc::new(TimeoutShared::new(
            TaskId::new(),
            deadline_ns,
            Arc::downgrade(&self.core),
        ));
        let (notifier, receiver) = CompletionReceiver::channel();
        let timeout = Timeout::from_shared(Arc::clone(&shared));

        self.core.submit(PendingOp::Register(Registration {
            shared,
            task: Box::new(task),
            notifier,
        }));

        Ok(TimerHandle::new(timeout, receiver))
    }

    /// 启动 worker 线程
    ///
    /// 幂等：INIT → STARTED 的转换只发生一次，已启动时直接返回。
    /// 阻塞到 worker 发布启动时刻为止，保证返回后截止时间的计算基准
    /// 已经确定。
    ///
    /// # 返回
    /// 定时器已关闭时返回 [`TimerError::Shutdown`]。
    pub fn start(&self) -> Result<(), TimerError> {
        match self.core.try_transition(TIMER_INIT, TIMER_STARTED) {
            Ok(()) => self.spawn_worker(),
            Err(TIMER_STARTED) => match self.core.wait_until_started() {
                Some(_) => Ok(()),
                None => Err(TimerError::Shutdown),
            },
            Err(_) => Err(TimerError::Shutdown),
        }
    }

    /// 停止定时器
    ///
    /// 发出关闭信号并阻塞等待 worker 线程完全退出。worker 退出前会
    /// 清空时间轮和待定队列，所有既未到期也未取消的超时句柄作为
    /// 返回值交还调用方做善后处理。
    ///
    /// 重复调用是无害的：后续调用返回空集合。
    ///
    /// # 返回
    /// - `Ok(Vec<Timeout>)`: 未处理的超时句柄集合
    /// - `Err(TimerError::StopFromWorker)`: 在 worker 线程内部调用
    ///   （会和 join 死锁，显式拒绝）
    /// - `Err(TimerError::WorkerPanicked)`: worker 因内部不变量被
    ///   破坏而异常终止
    pub fn stop(&self) -> Result<Vec<Timeout>, TimerError> {
        if let Some(worker_id) = self.worker_thread.get() {
            if *worker_id == thread::current().id() {
                return Err(TimerError::StopFromWorker);
            }
        }

        match self.core.signal_shutdown() {
            TIMER_STARTED => {
                let handle = self.worker_handle.lock().take();
                match handle {
                    Some(handle) => handle.join().map_err(|_| TimerError::WorkerPanicked),
                    // 并发的 stop 调用已经接管了 join
                    None => Ok(Vec::new()),
                }
            }
            // 从未启动，或已经停止过
            _ => Ok(Vec::new()),
        }
    }

    /// 当前未决（已调度、既未到期也未取消摘除）的超时数量
    pub fn pending_timeouts(&self) -> u64 {
        self.core.pending()
    }

    fn spawn_worker(&self) -> Result<(), TimerError> {
        let core = Arc::clone(&self.core);
        let logger = Arc::clone(&self.logger);
        let wheel_size = self.config.wheel.normalized_wheel_size();
        let tick_duration_ns = self.config.wheel.tick_duration.as_nanos() as u64;

        let builder = thread::Builder::new().name("hashed-wheel-timer".into());
        match builder.spawn(move || Worker::run(core, logger, wheel_size, tick_duration_ns)) {
            Ok(handle) => {
                let _ = self.worker_thread.set(handle.thread().id());
                *self.worker_handle.lock() = Some(handle);
                // worker 一进入就会发布启动时刻
                let _ = self.core.wait_until_started();
                Ok(())
            }
            Err(err) => {
                self.core.signal_shutdown();
                Err(TimerError::WorkerSpawn {
                    reason: err.to_string(),
                })
            }
        }
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.instance_counter.release();
        // 尽力通知 worker 退出，不阻塞等待
        self.core.signal_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskCompletionReason;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_timer_creation() {
        let timer = TimerWheel::with_defaults().unwrap();
        assert_eq!(timer.pending_timeouts(), 0);
    }

    #[test]
    fn test_schedule_once_fires() {
        let timer = TimerWheel::with_defaults().unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let handle = timer
            .new_timeout(Duration::from_millis(50), move |_timeout: &Timeout| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(
            handle.into_completion_receiver().blocking_wait(),
            Some(TaskCompletionReason::Completed)
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_timeout() {
        let timer = TimerWheel::with_defaults().unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let handle = timer
            .new_timeout(Duration::from_secs(10), move |_timeout: &Timeout| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(handle.cancel());
        assert!(handle.is_cancelled());

        assert_eq!(
            handle.into_completion_receiver().blocking_wait(),
            Some(TaskCompletionReason::Cancelled)
        );
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_explicit_start_is_idempotent() {
        let timer = TimerWheel::with_defaults().unwrap();
        timer.start().unwrap();
        timer.start().unwrap();
        timer.stop().unwrap();
    }

    #[test]
    fn test_stop_returns_unprocessed() {
        let timer = TimerWheel::with_defaults().unwrap();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let handle = timer
                .new_timeout(Duration::from_secs(60), |_timeout: &Timeout| {})
                .unwrap();
            handles.push(handle);
        }

        // 等待 worker 把任务转移入桶（在桶中与在队列中都应被回收）
        thread::sleep(Duration::from_millis(50));

        let unprocessed = timer.stop().unwrap();
        assert_eq!(unprocessed.len(), 3);
        for timeout in &unprocessed {
            assert!(!timeout.is_expired());
            assert!(!timeout.is_cancelled());
        }
    }

    #[test]
    fn test_stop_without_start_returns_empty() {
        let timer = TimerWheel::with_defaults().unwrap();
        let unprocessed = timer.stop().unwrap();
        assert!(unprocessed.is_empty());
    }

    #[test]
    fn test_stop_twice_returns_empty() {
        let timer = TimerWheel::with_defaults().unwrap();
        timer
            .new_timeout(Duration::from_secs(60), |_timeout: &Timeout| {})
            .unwrap();

        timer.stop().unwrap();
        let again = timer.stop().unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_schedule_after_shutdown_fails() {
        let timer = TimerWheel::with_defaults().unwrap();
        timer.stop().unwrap();

        let result = timer.new_timeout(Duration::from_millis(10), |_timeout: &Timeout| {});
        assert!(matches!(result, Err(TimerError::Shutdown)));
        assert_eq!(timer.pending_timeouts(), 0);
    }

    #[test]
    fn test_start_after_shutdown_fails() {
        let timer = TimerWheel::with_defaults().unwrap();
        timer.stop().unwrap();
        assert!(matches!(timer.start(), Err(TimerError::Shutdown)));
    }

    #[test]
    fn test_stop_from_worker_is_rejected() {
        let timer = Arc::new(TimerWheel::with_defaults().unwrap());
        let timer_clone = Arc::clone(&timer);
        let (tx, rx) = std::sync::mpsc::channel();

        timer
            .new_timeout(Duration::from_millis(20), move |_timeout: &Timeout| {
                let _ = tx.send(timer_clone.stop());
            })
            .unwrap();

        let result = rx.recv().unwrap();
        assert!(matches!(result, Err(TimerError::StopFromWorker)));

        // 正常线程上的 stop 仍然可用
        timer.stop().unwrap();
    }

    #[test]
    fn test_max_pending_timeouts_cap() {
        let config = TimerConfig::builder().max_pending_timeouts(2).build().unwrap();
        let timer = TimerWheel::new(config).unwrap();

        let _first = timer
            .new_timeout(Duration::from_secs(60), |_timeout: &Timeout| {})
            .unwrap();
        let _second = timer
            .new_timeout(Duration::from_secs(60), |_timeout: &Timeout| {})
            .unwrap();

        let result = timer.new_timeout(Duration::from_secs(60), |_timeout: &Timeout| {});
        assert!(matches!(
            result,
            Err(TimerError::MaxPendingTimeouts { pending: 2, max: 2 })
        ));
    }
}

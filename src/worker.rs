//! worker 线程与跨线程交接结构
//!
//! 每个定时器实例有且只有一个 worker 线程，时间轮的全部修改都发生在
//! 这个线程上，因此轮与桶不需要任何锁。其余线程只通过无锁待定队列和
//! 超时句柄上的原子状态转换与 worker 通信。

use crate::logging::{LogLevel, TimerLogger};
use crate::task::{CompletionNotifier, TaskCompletionReason};
use crate::timeout::{Timeout, TimeoutShared, ST_EXPIRED, ST_IN_BUCKET, ST_INIT};
use crate::wheel::{TimeoutEntry, Wheel};
use crate::TimerTask;
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 定时器状态：已创建，worker 尚未启动
pub(crate) const TIMER_INIT: u8 = 0;
/// 定时器状态：worker 已启动
pub(crate) const TIMER_STARTED: u8 = 1;
/// 定时器状态：已关闭（终态，不可重启）
pub(crate) const TIMER_SHUTDOWN: u8 = 2;

/// 每个 tick 从待定队列转移条目的上限
///
/// 限制单个 tick 的处理量，即使调度调用突发也能保证每 tick 的延迟
/// 有界；剩余条目留到后续 tick 处理。
pub(crate) const MAX_TRANSFERS_PER_TICK: usize = 100_000;

/// 新任务的注册请求，经待定队列交给 worker
pub(crate) struct Registration {
    pub(crate) shared: Arc<TimeoutShared>,
    pub(crate) task: Box<dyn TimerTask>,
    pub(crate) notifier: CompletionNotifier,
}

/// 待定队列中的操作
///
/// 注册与取消走同一条队列，保证对同一个超时的两种操作按提交顺序
/// 被 worker 观察到。
pub(crate) enum PendingOp {
    /// 新任务注册
    Register(Registration),
    /// 请求摘除一个已标记取消的超时
    Cancel(Arc<TimeoutShared>),
}

/// 定时器核心：façade、worker 和超时句柄三方共享的交接状态
pub(crate) struct TimerCore {
    /// 待定队列（多生产者，worker 单消费者）
    queue: SegQueue<PendingOp>,

    /// 未决超时计数
    pending: AtomicU64,

    /// 定时器状态机（INIT/STARTED/SHUTDOWN，只向前推进）
    state: AtomicU8,

    /// worker 睡眠锁与唤醒条件变量（关闭信号立即打断 tick 等待）
    sleep_lock: Mutex<()>,
    wakeup: Condvar,

    /// 启动闩：worker 发布启动时刻，启动方阻塞等待
    start_lock: Mutex<Option<Instant>>,
    started: Condvar,
}

impl TimerCore {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            pending: AtomicU64::new(0),
            state: AtomicU8::new(TIMER_INIT),
            sleep_lock: Mutex::new(()),
            wakeup: Condvar::new(),
            start_lock: Mutex::new(None),
            started: Condvar::new(),
        }
    }

    /// 向待定队列提交一个操作
    pub(crate) fn submit(&self, op: PendingOp) {
        self.queue.push(op);
    }

    pub(crate) fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.state() == TIMER_SHUTDOWN
    }

    /// 尝试状态转换，失败时返回当前状态
    pub(crate) fn try_transition(&self, from: u8, to: u8) -> Result<(), u8> {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    /// 推进到 SHUTDOWN 并唤醒所有等待者，返回之前的状态
    pub(crate) fn signal_shutdown(&self) -> u8 {
        let prev = self.state.swap(TIMER_SHUTDOWN, Ordering::AcqRel);
        // 在锁内通知，避免与「检查后等待」窗口丢失唤醒
        {
            let _guard = self.sleep_lock.lock();
            self.wakeup.notify_all();
        }
        {
            let _guard = self.start_lock.lock();
            self.started.notify_all();
        }
        prev
    }

    /// 未决超时计数加一，返回新值
    pub(crate) fn incr_pending(&self) -> u64 {
        self.pending.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn decr_pending(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// worker 发布启动时刻
    pub(crate) fn publish_start_time(&self, start_time: Instant) {
        let mut guard = self.start_lock.lock();
        *guard = Some(start_time);
        self.started.notify_all();
    }

    /// 阻塞等待 worker 发布启动时刻
    ///
    /// # 返回
    /// - `Some(start_time)`: worker 已启动
    /// - `None`: 定时器在 worker 发布启动时刻之前就被关闭
    pub(crate) fn wait_until_started(&self) -> Option<Instant> {
        let mut guard = self.start_lock.lock();
        loop {
            if let Some(start_time) = *guard {
                return Some(start_time);
            }
            if self.is_shutdown() {
                return None;
            }
            self.started.wait(&mut guard);
        }
    }
}

/// worker 线程的执行体
pub(crate) struct Worker {
    core: Arc<TimerCore>,
    wheel: Wheel,
    logger: Arc<dyn TimerLogger>,

    /// 启动时刻（单调时钟，只读取一次，不受挂钟调整影响）
    start_time: Instant,

    /// 当前 tick 编号
    tick: u64,

    tick_duration_ns: u64,
}

impl Worker {
    /// worker 线程入口
    ///
    /// 循环推进 tick 直到收到关闭信号，退出时把所有未处理的超时
    /// （既未到期也未取消）收集起来交给 `stop` 的调用方。
    pub(crate) fn run(
        core: Arc<TimerCore>,
        logger: Arc<dyn TimerLogger>,
        wheel_size: usize,
        tick_duration_ns: u64,
    ) -> Vec<Timeout> {
        let start_time = Instant::now();
        core.publish_start_time(start_time);

        let mut worker = Worker {
            wheel: Wheel::new(wheel_size, tick_duration_ns),
            core,
            logger,
            start_time,
            tick: 0,
            tick_duration_ns,
        };

        loop {
            let tick_deadline_ns = match worker.wait_for_next_tick() {
                Some(deadline) => deadline,
                None => break,
            };
            worker.transfer_timeouts_to_buckets();
            worker.expire_timeouts(tick_deadline_ns);
            worker.tick += 1;
        }

        worker.drain_unprocessed()
    }

    /// 等待下一个 tick 的截止时间
    ///
    /// 截止时间为 `tick_duration × (tick + 1)`，相对启动时刻计算。
    /// 提前醒来时在循环中重新计算剩余等待时间（漂移校正）；
    /// 关闭信号立即打断等待。
    ///
    /// # 返回
    /// - `Some(deadline_ns)`: 已到达该 tick 的截止时间
    /// - `None`: 收到关闭信号
    fn wait_for_next_tick(&self) -> Option<u64> {
        let deadline_ns = self.tick_duration_ns.saturating_mul(self.tick + 1);

        loop {
            if self.core.is_shutdown() {
                return None;
            }

            let elapsed_ns = elapsed_nanos(self.start_time);
            if elapsed_ns >= deadline_ns {
                return Some(deadline_ns);
            }

            let remaining = Duration::from_nanos(deadline_ns - elapsed_ns);
            let mut guard = self.core.sleep_lock.lock();
            if self.core.is_shutdown() {
                return None;
            }
            self.core.wakeup.wait_for(&mut guard, remaining);
        }
    }

    /// 把待定队列中的条目转移到目标桶，每 tick 处理量有上限
    fn transfer_timeouts_to_buckets(&mut self) {
        for _ in 0..MAX_TRANSFERS_PER_TICK {
            let op = match self.core.queue.pop() {
                Some(op) => op,
                None => break,
            };

            match op {
                PendingOp::Register(reg) => {
                    // INIT -> IN_BUCKET 只可能输给取消
                    if reg.shared.transition(ST_INIT, ST_IN_BUCKET) {
                        self.wheel.add_timeout(self.tick, reg);
                    } else {
                        // 入桶之前已被取消，静默丢弃
                        self.core.decr_pending();
                        reg.notifier.notify(TaskCompletionReason::Cancelled);
                    }
                }
                PendingOp::Cancel(shared) => {
                    if let Some(entry) = self.wheel.remove_cancelled(&shared) {
                        self.core.decr_pending();
                        entry.notifier.notify(TaskCompletionReason::Cancelled);
                    }
                }
            }
        }
    }

    /// 处理当前 tick 对应桶的到期条目
    ///
    /// 任务在 worker 线程上同步执行，按桶内 FIFO 顺序逐个运行完毕。
    /// 任务 panic 被捕获并通过日志接口报告，不会终止 worker，
    /// 也不影响其他超时。
    fn expire_timeouts(&mut self, tick_deadline_ns: u64) {
        for entry in self.wheel.expire_timeouts(self.tick, tick_deadline_ns) {
            self.core.decr_pending();
            let TimeoutEntry {
                shared,
                task,
                notifier,
                ..
            } = entry;

            // IN_BUCKET -> EXPIRED 与取消竞争，恰好一个胜者
            if shared.transition(ST_IN_BUCKET, ST_EXPIRED) {
                let timeout = Timeout::from_shared(shared);
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run(&timeout))) {
                    self.logger.log(
                        LogLevel::Error,
                        "定时器任务 panic，已隔离，时间轮继续运行",
                        Some(&panic_message(payload.as_ref())),
                    );
                }
                notifier.notify(TaskCompletionReason::Completed);
            } else {
                notifier.notify(TaskCompletionReason::Cancelled);
            }
        }
    }

    /// 关闭流程：清空所有桶和待定队列，收集未处理的超时
    fn drain_unprocessed(mut self) -> Vec<Timeout> {
        let mut entries = Vec::new();
        self.wheel.clear_timeouts(&mut entries);

        let mut unprocessed = Vec::new();
        for entry in entries {
            self.core.decr_pending();
            if entry.shared.is_cancelled() {
                entry.notifier.notify(TaskCompletionReason::Cancelled);
            } else {
                unprocessed.push(Timeout::from_shared(Arc::clone(&entry.shared)));
            }
        }

        while let Some(op) = self.core.queue.pop() {
            match op {
                PendingOp::Register(reg) => {
                    self.core.decr_pending();
                    if reg.shared.is_cancelled() {
                        reg.notifier.notify(TaskCompletionReason::Cancelled);
                    } else {
                        unprocessed.push(Timeout::from_shared(Arc::clone(&reg.shared)));
                    }
                }
                // 桶已经全部清空，摘除请求不再有目标
                PendingOp::Cancel(_) => {}
            }
        }

        unprocessed
    }
}

/// 自启动时刻起经过的纳秒数
fn elapsed_nanos(start_time: Instant) -> u64 {
    u64::try_from(start_time.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// 从 panic 负载中提取可读信息
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "非字符串 panic 负载".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::TracingLogger;
    use crate::task::{CompletionReceiver, TaskId};
    use std::sync::atomic::AtomicU32;
    use std::thread;

    const TICK_NS: u64 = Duration::from_millis(10).as_nanos() as u64;

    fn spawn_worker(core: &Arc<TimerCore>) -> thread::JoinHandle<Vec<Timeout>> {
        let core = Arc::clone(core);
        let logger: Arc<dyn TimerLogger> = Arc::new(TracingLogger);
        thread::spawn(move || Worker::run(core, logger, 8, TICK_NS))
    }

    fn submit_task(
        core: &Arc<TimerCore>,
        delay: Duration,
        task: Box<dyn TimerTask>,
    ) -> (Timeout, CompletionReceiver) {
        let shared = Arc::new(TimeoutShared::new(
            TaskId::new(),
            delay.as_nanos() as u64,
            Arc::downgrade(core),
        ));
        let (notifier, receiver) = CompletionReceiver::channel();
        let timeout = Timeout::from_shared(Arc::clone(&shared));
        core.incr_pending();
        core.submit(PendingOp::Register(Registration {
            shared,
            task,
            notifier,
        }));
        (timeout, receiver)
    }

    #[test]
    fn test_worker_runs_task_and_notifies() {
        let core = Arc::new(TimerCore::new());
        let handle = spawn_worker(&core);
        assert!(core.wait_until_started().is_some());

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let (timeout, receiver) = submit_task(
            &core,
            Duration::from_millis(30),
            Box::new(move |_: &Timeout| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(
            receiver.blocking_wait(),
            Some(TaskCompletionReason::Completed)
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(timeout.is_expired());
        assert_eq!(core.pending(), 0);

        core.signal_shutdown();
        let unprocessed = handle.join().unwrap();
        assert!(unprocessed.is_empty());
    }

    #[test]
    fn test_worker_isolates_panicking_task() {
        let core = Arc::new(TimerCore::new());
        let handle = spawn_worker(&core);
        assert!(core.wait_until_started().is_some());

        let (_bad, bad_rx) = submit_task(
            &core,
            Duration::from_millis(20),
            Box::new(|_: &Timeout| panic!("task failure")),
        );
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let (_good, good_rx) = submit_task(
            &core,
            Duration::from_millis(40),
            Box::new(move |_: &Timeout| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // panic 的任务也按完成处理，后续任务不受影响
        assert_eq!(bad_rx.blocking_wait(), Some(TaskCompletionReason::Completed));
        assert_eq!(
            good_rx.blocking_wait(),
            Some(TaskCompletionReason::Completed)
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        core.signal_shutdown();
        assert!(handle.join().unwrap().is_empty());
    }

    #[test]
    fn test_worker_returns_unprocessed_on_shutdown() {
        let core = Arc::new(TimerCore::new());
        let handle = spawn_worker(&core);
        assert!(core.wait_until_started().is_some());

        let (long_timeout, _rx) = submit_task(
            &core,
            Duration::from_secs(60),
            Box::new(|_: &Timeout| {}),
        );
        let (cancelled_timeout, cancelled_rx) = submit_task(
            &core,
            Duration::from_secs(60),
            Box::new(|_: &Timeout| {}),
        );

        // 让 worker 先把两个任务转移入桶
        thread::sleep(Duration::from_millis(50));
        assert!(cancelled_timeout.cancel());

        core.signal_shutdown();
        let unprocessed = handle.join().unwrap();

        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].task_id(), long_timeout.task_id());
        assert_eq!(
            cancelled_rx.blocking_wait(),
            Some(TaskCompletionReason::Cancelled)
        );
    }

    #[test]
    fn test_cancelled_before_transfer_is_discarded() {
        let core = Arc::new(TimerCore::new());

        // worker 尚未启动，注册请求停留在队列中
        let (timeout, receiver) = submit_task(
            &core,
            Duration::from_millis(20),
            Box::new(|_: &Timeout| panic!("不应该执行")),
        );
        assert!(timeout.cancel());

        let handle = spawn_worker(&core);
        assert_eq!(
            receiver.blocking_wait(),
            Some(TaskCompletionReason::Cancelled)
        );

        core.signal_shutdown();
        assert!(handle.join().unwrap().is_empty());
    }
}

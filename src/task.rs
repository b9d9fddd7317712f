use crate::timeout::Timeout;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// 全局唯一的任务 ID 生成器
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// 定时器任务的唯一标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// 生成一个新的唯一任务 ID
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 获取任务 ID 的数值
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// 定时器任务 trait
///
/// 实现此 trait 的类型可以作为超时任务注册到定时器。任务在到期时
/// 由 worker 线程同步调用且最多调用一次，调用时会传入触发它的
/// [`Timeout`] 句柄。
///
/// # 调用方义务
/// 回调在 worker 线程上同步执行，一个缓慢的回调会推迟该定时器实例上
/// 所有后续的到期处理。回调应当保持简短；耗时工作应转交给其他线程。
///
/// # 示例
///
/// ```no_run
/// use hashed_wheel_timer::{TimerTask, Timeout};
///
/// struct MyTask;
///
/// impl TimerTask for MyTask {
///     fn run(self: Box<Self>, _timeout: &Timeout) {
///         println!("Timer fired!");
///     }
/// }
/// ```
pub trait TimerTask: Send + 'static {
    /// 执行任务；`timeout` 是触发本次执行的超时句柄
    fn run(self: Box<Self>, timeout: &Timeout);
}

/// 为闭包实现 TimerTask trait
/// 支持 FnOnce(&Timeout) 类型的闭包（一次性任务，消耗自身）
impl<F> TimerTask for F
where
    F: FnOnce(&Timeout) + Send + 'static,
{
    fn run(self: Box<Self>, timeout: &Timeout) {
        (*self)(timeout)
    }
}

/// 任务完成原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletionReason {
    /// 任务已到期并执行完毕
    Completed,
    /// 任务在到期前被取消
    Cancelled,
}

/// 完成通知发送端（由 worker 持有）
pub(crate) struct CompletionNotifier(pub(crate) oneshot::Sender<TaskCompletionReason>);

impl CompletionNotifier {
    /// 发送完成通知；接收端已被丢弃时静默忽略
    pub(crate) fn notify(self, reason: TaskCompletionReason) {
        let _ = self.0.send(reason);
    }
}

/// 完成通知接收端
///
/// 任务到期执行完毕后收到 [`TaskCompletionReason::Completed`]，
/// 被取消并从时间轮摘除后收到 [`TaskCompletionReason::Cancelled`]。
/// 定时器在通知发出前被停止时，发送端被丢弃，接收端会得到
/// `RecvError`。
pub struct CompletionReceiver(pub oneshot::Receiver<TaskCompletionReason>);

impl CompletionReceiver {
    /// 创建一对完成通知通道
    pub(crate) fn channel() -> (CompletionNotifier, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        (CompletionNotifier(tx), CompletionReceiver(rx))
    }

    /// 阻塞等待完成通知（供非异步上下文使用）
    ///
    /// # 返回
    /// - `Some(reason)`: 收到完成通知
    /// - `None`: 发送端已被丢弃（定时器被停止）
    pub fn blocking_wait(self) -> Option<TaskCompletionReason> {
        self.0.blocking_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_completion_channel() {
        let (notifier, receiver) = CompletionReceiver::channel();
        notifier.notify(TaskCompletionReason::Completed);
        assert_eq!(
            receiver.blocking_wait(),
            Some(TaskCompletionReason::Completed)
        );
    }

    #[test]
    fn test_completion_channel_dropped_sender() {
        let (notifier, receiver) = CompletionReceiver::channel();
        drop(notifier);
        assert_eq!(receiver.blocking_wait(), None);
    }
}
